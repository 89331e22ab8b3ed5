use {
	super::{
		TableInfo,
		acks::Acks,
		config::{Config, DownInfo},
		error::Error,
		protocol::{
			AckMsg,
			AliasId,
			CheckServerReply,
			Command,
			DumpRef,
			JoinRef,
			PauseToken,
			Peer,
			RemoteOp,
			ServerId,
			ServerRef,
			WriteOp,
		},
		storage::Contents,
	},
	crate::{cluster::Node, primitives::UniqueId, record::Record},
	futures::{FutureExt, StreamExt, future::BoxFuture, stream::FuturesUnordered},
	std::{
		collections::{HashMap, HashSet, VecDeque},
		sync::Arc,
	},
	tokio::sync::{mpsc, oneshot, watch},
	tracing::{debug, info, trace, warn},
};

/// Join payload staged by `send_dump`, untouched until `apply_dump`.
struct StagedDump {
	peers: Vec<Peer>,
	join_ref: JoinRef,
	dump: Vec<Record>,
}

/// One entry of the pending-operations queue accumulated while paused.
enum QueuedOp {
	Local {
		op: WriteOp,
		reply: oneshot::Sender<Result<(), Error>>,
	},
	Remote(RemoteOp),
}

/// Background actor owning one table's local contents.
///
/// All interaction goes through the inbox; the owning [`super::Table`]
/// handle and segment peers only ever hold senders. The worker applies
/// writes, fans them out to peers, filters inbound replication by
/// destination alias, and cooperates with the join coordinator through
/// the pause / `send_dump` / `apply_dump` control plane.
pub(super) struct WorkerLoop {
	name: Arc<str>,
	id: ServerId,
	node: Node,
	config: Arc<Config>,
	acks: Acks,

	contents: Contents,
	snapshot: watch::Sender<Contents>,

	peers: Vec<Peer>,
	join_ref: JoinRef,

	// aliases this server minted; inbound remote ops must carry an
	// active one
	active_aliases: HashMap<AliasId, ServerId>,
	disabled_aliases: HashSet<AliasId>,
	pending_aliases: Vec<(ServerId, AliasId)>,

	staged: HashMap<DumpRef, StagedDump>,
	pause_tokens: Vec<PauseToken>,
	pending_ops: VecDeque<QueuedOp>,
	probe_peers_on_resume: bool,

	commands: mpsc::UnboundedReceiver<Command>,
	peer_down: FuturesUnordered<BoxFuture<'static, ServerId>>,
	owner_down: FuturesUnordered<BoxFuture<'static, PauseToken>>,
	probes: FuturesUnordered<BoxFuture<'static, (ServerId, bool)>>,
}

impl WorkerLoop {
	/// Spawns the server actor and its ack aggregator. Returns the
	/// server's address and the read snapshot.
	pub(super) fn spawn(
		node: Node,
		name: Arc<str>,
		config: Arc<Config>,
	) -> (ServerRef, watch::Receiver<Contents>) {
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let alive = tokio_util::sync::CancellationToken::new();

		let me = ServerRef {
			id: UniqueId::random(),
			node: node.id(),
			node_name: node.name_arc(),
			inbox: commands_tx,
			alive: alive.clone(),
		};

		let contents = Contents::new(config.table_type);
		let (snapshot_tx, snapshot_rx) = watch::channel(contents.clone());
		let acks = Acks::spawn(Arc::clone(&name));

		let worker = Self {
			name,
			id: me.id,
			node,
			config,
			acks,
			contents,
			snapshot: snapshot_tx,
			peers: Vec::new(),
			join_ref: UniqueId::random(),
			active_aliases: HashMap::new(),
			disabled_aliases: HashSet::new(),
			pending_aliases: Vec::new(),
			staged: HashMap::new(),
			pause_tokens: Vec::new(),
			pending_ops: VecDeque::new(),
			probe_peers_on_resume: false,
			commands: commands_rx,
			peer_down: FuturesUnordered::new(),
			owner_down: FuturesUnordered::new(),
			probes: FuturesUnordered::new(),
		};

		tokio::spawn(async move {
			// peers observe the cancelled token as a DOWN event, even if
			// the worker panics
			let _down_on_exit = alive.drop_guard();
			worker.run().await;
		});

		(me, snapshot_rx)
	}

	async fn run(mut self) {
		info!(
			table = %self.name,
			server = %self.id,
			node = %self.node.name(),
			"table server started"
		);

		loop {
			tokio::select! {
				command = self.commands.recv() => {
					match command {
						Some(Command::Stop { reply }) => {
							// reject new traffic before acknowledging the stop
							self.commands.close();
							reply.send(()).ok();
							break;
						}
						Some(command) => self.on_command(command),
						None => break,
					}
				}

				// a monitored segment peer terminated
				Some(peer_id) = self.peer_down.next() => {
					self.on_peer_down(peer_id);
				}

				// a pause owner terminated without unpausing
				Some(token) = self.owner_down.next() => {
					self.on_pause_owner_down(token);
				}

				// a check_server probe came back
				Some((peer_id, confirmed)) = self.probes.next() => {
					self.on_probe_result(peer_id, confirmed);
				}
			}
		}

		self.acks.send(AckMsg::Stop);
		self.node.cluster().unregister(self.node.id(), &self.name);
		info!(table = %self.name, server = %self.id, "table server stopped");
	}

	fn on_command(&mut self, command: Command) {
		match command {
			Command::Write { op, reply } => {
				if self.paused() {
					self.pending_ops.push_back(QueuedOp::Local { op, reply });
				} else {
					self.apply_and_replicate(op, reply);
				}
			}

			Command::Remote(remote) => {
				if self.paused() {
					self.pending_ops.push_back(QueuedOp::Remote(remote));
				} else {
					self.apply_remote(remote);
				}
			}

			Command::OtherPids { reply } => {
				let pids = self.peers.iter().map(|p| p.server.clone()).collect();
				reply.send(pids).ok();
			}

			Command::Pause { owner, reply } => {
				let token = UniqueId::random();
				self.pause_tokens.push(token);
				if let Some(owner) = owner {
					self
						.owner_down
						.push(async move {
							owner.cancelled_owned().await;
							token
						}
						.boxed());
				}
				debug!(table = %self.name, token = %token, "paused");
				reply.send(token).ok();
			}

			Command::Unpause { token, reply } => {
				reply.send(self.unpause(token)).ok();
			}

			Command::Info { reply } => {
				reply.send(self.info()).ok();
			}

			Command::RemoteDump { reply } => {
				reply.send(self.contents.dump()).ok();
			}

			Command::SendDump {
				peers,
				join_ref,
				dump,
				reply,
			} => {
				reply.send(self.on_send_dump(peers, join_ref, dump)).ok();
			}

			Command::ApplyDump { dump_ref, reply } => {
				reply.send(self.on_apply_dump(dump_ref)).ok();
			}

			Command::MakeAliasesFor { peers, reply } => {
				reply.send(self.on_make_aliases(peers)).ok();
			}

			Command::CheckServer {
				source,
				mon,
				alias,
				reply,
			} => {
				if self.active_aliases.contains_key(&alias) {
					reply.send(CheckServerReply::Confirmed).ok();
				} else {
					debug!(
						table = %self.name,
						source = %source,
						alias = %alias,
						"check_server probe on inactive alias"
					);
					reply.send(CheckServerReply::Failed { mon }).ok();
				}
			}

			Command::Ping { reply } => {
				reply.send(()).ok();
			}

			Command::Sync { reply } => {
				// the reply resolves once the aggregator has also drained
				// everything submitted before this call
				self.acks.send(AckMsg::Flush { reply });
			}

			// consumed in `run`
			Command::Stop { .. } => unreachable!("stop is handled by the run loop"),
		}
	}

	fn paused(&self) -> bool {
		!self.pause_tokens.is_empty()
	}

	fn publish(&self) {
		self.snapshot.send_replace(self.contents.clone());
	}

	/// Applies a local write and fans it out to the current peer set.
	fn apply_and_replicate(
		&mut self,
		op: WriteOp,
		reply: oneshot::Sender<Result<(), Error>>,
	) {
		self.contents.apply(&op, self.config.keypos);
		self.publish();

		if self.peers.is_empty() {
			// nothing to wait for; the aggregator never sees empty peer sets
			reply.send(Ok(())).ok();
			return;
		}

		let write_ref = UniqueId::random();
		let peer_ids = self.peers.iter().map(|p| p.server.id).collect();
		self.acks.send(AckMsg::Add {
			write_ref,
			caller: reply,
			peers: peer_ids,
		});

		for peer in &self.peers {
			peer.server.send(Command::Remote(RemoteOp {
				alias: peer.alias,
				write_ref,
				reply_to: self.acks.tx.clone(),
				from: self.id,
				op: op.clone(),
			}));
		}

		trace!(
			table = %self.name,
			write = %write_ref,
			peers = self.peers.len(),
			"replicated write"
		);
	}

	/// Applies a write replicated from a peer, if its alias is active.
	fn apply_remote(&mut self, remote: RemoteOp) {
		if !self.active_aliases.contains_key(&remote.alias) {
			if self.disabled_aliases.contains(&remote.alias) {
				debug!(
					table = %self.name,
					from = %remote.from,
					alias = %remote.alias,
					"dropping replication on disabled alias"
				);
			} else {
				debug!(
					table = %self.name,
					from = %remote.from,
					alias = %remote.alias,
					"dropping replication on unknown alias"
				);
			}
			return;
		}

		self.contents.apply(&remote.op, self.config.keypos);
		self.publish();
		remote
			.reply_to
			.send(AckMsg::Ack {
				write_ref: remote.write_ref,
				from: self.id,
			})
			.ok();
	}

	fn unpause(&mut self, token: PauseToken) -> Result<(), Error> {
		let Some(pos) = self.pause_tokens.iter().position(|t| *t == token) else {
			return Err(Error::UnknownPauseMonitor);
		};
		self.pause_tokens.remove(pos);

		// pending aliases not referenced by the current peer set are
		// dropped on every unpause
		let referenced: HashSet<ServerId> =
			self.peers.iter().map(|p| p.server.id).collect();
		self
			.pending_aliases
			.retain(|(server, _)| referenced.contains(server));

		if self.pause_tokens.is_empty() {
			self.resume();
		}
		Ok(())
	}

	fn on_pause_owner_down(&mut self, token: PauseToken) {
		// the owner may have unpaused properly before terminating
		if self.unpause(token).is_ok() {
			debug!(
				table = %self.name,
				token = %token,
				"pause owner went down, token released"
			);
		}
	}

	/// Transition back to RUNNING: drain the pending queue in arrival
	/// order, then verify peers if a dump was installed while paused.
	fn resume(&mut self) {
		debug!(
			table = %self.name,
			queued = self.pending_ops.len(),
			"resuming"
		);

		// dumps staged by an aborted join are stale from here on; their
		// refs answer UnknownDumpRef
		self.staged.clear();

		while let Some(queued) = self.pending_ops.pop_front() {
			match queued {
				QueuedOp::Local { op, reply } => self.apply_and_replicate(op, reply),
				QueuedOp::Remote(remote) => self.apply_remote(remote),
			}
		}

		if self.probe_peers_on_resume {
			self.probe_peers_on_resume = false;
			self.probe_peers();
		}
	}

	fn on_send_dump(
		&mut self,
		peers: Vec<Peer>,
		join_ref: JoinRef,
		dump: Vec<Record>,
	) -> Result<DumpRef, Error> {
		if !self.paused() {
			return Err(Error::NotPaused);
		}

		let dump_ref = UniqueId::random();
		debug!(
			table = %self.name,
			dump_ref = %dump_ref,
			join_ref = %join_ref,
			records = dump.len(),
			"staged dump"
		);
		self.staged.insert(dump_ref, StagedDump {
			peers,
			join_ref,
			dump,
		});
		Ok(dump_ref)
	}

	fn on_apply_dump(&mut self, dump_ref: DumpRef) -> Result<(), Error> {
		let Some(staged) = self.staged.remove(&dump_ref) else {
			return Err(Error::UnknownDumpRef);
		};

		self.contents = Contents::from_dump(
			self.config.table_type,
			staged.dump,
			self.config.keypos,
		);
		self.publish();

		let new_peers: Vec<Peer> = staged
			.peers
			.into_iter()
			.filter(|p| p.server.id != self.id)
			.collect();

		for peer in &new_peers {
			// the previous inbound alias for this peer is superseded
			self.disable_alias_for(peer.server.id);
			if let Some(pos) = self
				.pending_aliases
				.iter()
				.position(|(server, _)| *server == peer.server.id)
			{
				let (_, alias) = self.pending_aliases.remove(pos);
				self.active_aliases.insert(alias, peer.server.id);
			}
			if !self.peers.iter().any(|p| p.server.id == peer.server.id) {
				self.watch_peer(&peer.server);
			}
		}

		self.peers = new_peers;
		self.join_ref = staged.join_ref;
		self.probe_peers_on_resume = true;

		info!(
			table = %self.name,
			join_ref = %self.join_ref,
			peers = self.peers.len(),
			"applied dump"
		);
		Ok(())
	}

	fn on_make_aliases(
		&mut self,
		peers: Vec<ServerId>,
	) -> Result<Vec<(ServerId, AliasId)>, Error> {
		if !self.paused() {
			return Err(Error::NotPaused);
		}

		let pairs: Vec<(ServerId, AliasId)> = peers
			.into_iter()
			.map(|peer| (peer, UniqueId::random()))
			.collect();

		for (peer, alias) in &pairs {
			// a re-minted alias supersedes any earlier pending one
			self.pending_aliases.retain(|(server, _)| server != peer);
			self.pending_aliases.push((*peer, *alias));
		}
		Ok(pairs)
	}

	fn info(&self) -> TableInfo {
		TableInfo {
			name: self.name.to_string(),
			table_type: self.config.table_type,
			keypos: self.config.keypos,
			size: self.contents.size(),
			peers: self
				.peers
				.iter()
				.map(|p| (p.server.id, p.alias))
				.collect(),
			pause_tokens: self.pause_tokens.clone(),
			pending_aliases: self
				.pending_aliases
				.iter()
				.map(|(_, alias)| *alias)
				.collect(),
			join_ref: self.join_ref,
			acks: self.acks.id,
		}
	}

	fn watch_peer(&mut self, server: &ServerRef) {
		let id = server.id;
		let alive = server.alive.clone();
		self
			.peer_down
			.push(async move {
				alive.cancelled_owned().await;
				id
			}
			.boxed());
	}

	fn disable_alias_for(&mut self, peer: ServerId) {
		let superseded: Vec<AliasId> = self
			.active_aliases
			.iter()
			.filter(|(_, server)| **server == peer)
			.map(|(alias, _)| *alias)
			.collect();
		for alias in superseded {
			self.active_aliases.remove(&alias);
			self.disabled_aliases.insert(alias);
		}
	}

	fn on_peer_down(&mut self, peer_id: ServerId) {
		let Some(pos) = self.peers.iter().position(|p| p.server.id == peer_id)
		else {
			// stale watcher for a server that already left the segment
			return;
		};
		self.peers.remove(pos);
		info!(table = %self.name, peer = %peer_id, "segment peer down");

		self.disable_alias_for(peer_id);

		if let Some(handler) = &self.config.handle_down {
			handler(DownInfo {
				remote: peer_id,
				table: self.name.to_string(),
			});
		}

		// pending writes stop waiting for the departed peer
		self.acks.send(AckMsg::RemoteDown { peer: peer_id });

		// verify the rest of the segment is still mutually reachable
		self.probe_peers();
	}

	/// Sends a `check_server` probe to every current peer. A peer that
	/// no longer recognizes the alias we hold for it has diverged and is
	/// treated as departed.
	fn probe_peers(&mut self) {
		for peer in &self.peers {
			let server = peer.server.clone();
			let alias = peer.alias;
			let mon = UniqueId::random();
			let source = self.id;

			self
				.probes
				.push(async move {
					let (tx, rx) = oneshot::channel();
					let sent = server.send(Command::CheckServer {
						source,
						mon,
						alias,
						reply: tx,
					});
					if !sent {
						return (server.id, false);
					}
					match rx.await {
						Ok(CheckServerReply::Confirmed) => (server.id, true),
						Ok(CheckServerReply::Failed { .. }) | Err(_) => (server.id, false),
					}
				}
				.boxed());
		}
	}

	fn on_probe_result(&mut self, peer_id: ServerId, confirmed: bool) {
		if confirmed {
			return;
		}
		if self.peers.iter().any(|p| p.server.id == peer_id) {
			warn!(
				table = %self.name,
				peer = %peer_id,
				"peer failed alias check, dropping from segment"
			);
			self.on_peer_down(peer_id);
		}
	}
}
