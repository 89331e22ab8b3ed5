use {
	super::{
		error::Error,
		protocol::{AckMsg, ServerId, WriteRef},
	},
	crate::primitives::UniqueId,
	std::sync::Arc,
	tokio::sync::{mpsc, oneshot},
	tracing::{debug, trace},
};

/// Handle to the ack aggregator paired with one table server.
///
/// The aggregator tracks, per in-flight write, which peers still owe an
/// acknowledgement and releases the waiting caller once the set empties.
/// It stops when its table server stops.
#[derive(Clone)]
pub(super) struct Acks {
	pub id: UniqueId,
	pub tx: mpsc::UnboundedSender<AckMsg>,
}

impl Acks {
	pub(super) fn spawn(table: Arc<str>) -> Self {
		let id = UniqueId::random();
		let (tx, rx) = mpsc::unbounded_channel();

		let worker = WorkerLoop {
			id,
			table,
			pending: Vec::new(),
			inbox: rx,
		};
		tokio::spawn(worker.run());

		Self { id, tx }
	}

	/// Reliable within the server's lifetime; peers deliver acks to the
	/// same inbox best-effort.
	pub(super) fn send(&self, msg: AckMsg) {
		self.tx.send(msg).ok();
	}
}

struct PendingWrite {
	caller: oneshot::Sender<Result<(), Error>>,
	remaining: Vec<ServerId>,
}

struct WorkerLoop {
	id: UniqueId,
	table: Arc<str>,
	// insertion order retained only for readable logs
	pending: Vec<(WriteRef, PendingWrite)>,
	inbox: mpsc::UnboundedReceiver<AckMsg>,
}

impl WorkerLoop {
	async fn run(mut self) {
		while let Some(msg) = self.inbox.recv().await {
			match msg {
				AckMsg::Add {
					write_ref,
					caller,
					peers,
				} => self.on_add(write_ref, caller, peers),
				AckMsg::Ack { write_ref, from } => self.on_ack(write_ref, from),
				AckMsg::RemoteDown { peer } => self.on_remote_down(peer),
				AckMsg::Flush { reply } => {
					reply.send(()).ok();
				}
				AckMsg::Stop => break,
			}
		}
		trace!(table = %self.table, acks = %self.id, "ack aggregator stopped");
	}

	fn on_add(
		&mut self,
		write_ref: WriteRef,
		caller: oneshot::Sender<Result<(), Error>>,
		peers: Vec<ServerId>,
	) {
		trace!(
			table = %self.table,
			write = %write_ref,
			peers = peers.len(),
			"tracking pending write"
		);
		self.pending.push((write_ref, PendingWrite {
			caller,
			remaining: peers,
		}));
	}

	fn on_ack(&mut self, write_ref: WriteRef, from: ServerId) {
		let Some(pos) = self.pending.iter().position(|(r, _)| *r == write_ref)
		else {
			// late ack for a write already released or timed out
			debug!(table = %self.table, write = %write_ref, "ack for unknown write");
			return;
		};

		let (_, pending) = &mut self.pending[pos];
		let Some(peer_pos) = pending.remaining.iter().position(|p| *p == from)
		else {
			debug!(
				table = %self.table,
				write = %write_ref,
				peer = %from,
				"ack from unexpected peer"
			);
			return;
		};
		pending.remaining.remove(peer_pos);

		if pending.remaining.is_empty() {
			let (_, pending) = self.pending.remove(pos);
			// the caller may have timed out and gone away
			pending.caller.send(Ok(())).ok();
		}
	}

	/// A departed peer is indistinguishable from one that acknowledged
	/// everything it still owed.
	fn on_remote_down(&mut self, peer: ServerId) {
		let mut released = 0usize;
		let mut retained = Vec::with_capacity(self.pending.len());

		for (write_ref, mut pending) in self.pending.drain(..) {
			pending.remaining.retain(|p| *p != peer);
			if pending.remaining.is_empty() {
				pending.caller.send(Ok(())).ok();
				released += 1;
			} else {
				retained.push((write_ref, pending));
			}
		}
		self.pending = retained;

		if released > 0 {
			debug!(
				table = %self.table,
				peer = %peer,
				released,
				"released pending writes after peer went down"
			);
		}
	}
}
