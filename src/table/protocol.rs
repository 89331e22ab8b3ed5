use {
	super::{TableInfo, error::Error},
	crate::{
		cluster::NodeId,
		primitives::UniqueId,
		record::{Record, Value},
	},
	core::fmt,
	serde::{Deserialize, Serialize},
	std::sync::Arc,
	tokio::sync::{mpsc, oneshot},
	tokio_util::sync::CancellationToken,
};

/// Identity of one table server actor.
pub type ServerId = UniqueId;

/// Recipient-minted address attached to replication traffic. The sender
/// treats it as opaque; the recipient discards traffic on aliases it no
/// longer considers active.
pub type AliasId = UniqueId;

/// Identity of the most recent successful join within a segment.
pub type JoinRef = UniqueId;

/// Names a staged dump on one server between `send_dump` and
/// `apply_dump`.
pub type DumpRef = UniqueId;

/// Names one in-flight replicated write.
pub type WriteRef = UniqueId;

/// Issued by `pause`; the server stays paused while any token is
/// outstanding.
pub type PauseToken = UniqueId;

/// Address of a table server: enough to send it messages, watch its
/// liveness and name it in logs. Two refs are equal when they address
/// the same server.
#[derive(Clone)]
pub struct ServerRef {
	pub(crate) id: ServerId,
	pub(crate) node: NodeId,
	pub(crate) node_name: Arc<str>,
	pub(crate) inbox: mpsc::UnboundedSender<Command>,
	pub(crate) alive: CancellationToken,
}

impl PartialEq for ServerRef {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for ServerRef {}

impl fmt::Debug for ServerRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ServerRef({} @ {})", self.id, self.node_name)
	}
}

impl ServerRef {
	pub fn id(&self) -> ServerId {
		self.id
	}

	pub fn node(&self) -> NodeId {
		self.node
	}

	pub fn node_name(&self) -> &str {
		&self.node_name
	}

	/// Best-effort delivery into the server's inbox.
	pub(crate) fn send(&self, command: Command) -> bool {
		self.inbox.send(command).is_ok()
	}

	async fn call<T>(
		&self,
		make: impl FnOnce(oneshot::Sender<T>) -> Command,
	) -> Result<T, Error> {
		let (tx, rx) = oneshot::channel();
		if !self.send(make(tx)) {
			return Err(Error::ServerStopped);
		}
		rx.await.map_err(|_| Error::ServerStopped)
	}

	/// Current peer set of this server.
	pub async fn other_pids(&self) -> Result<Vec<ServerRef>, Error> {
		self.call(|reply| Command::OtherPids { reply }).await
	}

	/// Control-state snapshot.
	pub async fn info(&self) -> Result<TableInfo, Error> {
		self.call(|reply| Command::Info { reply }).await
	}

	/// Pauses the server without an owner; the token must be released
	/// with [`ServerRef::unpause`].
	pub async fn pause(&self) -> Result<PauseToken, Error> {
		self.call(|reply| Command::Pause { owner: None, reply }).await
	}

	/// Pauses the server on behalf of `owner`: if `owner` is cancelled
	/// while the token is outstanding, the token is consumed as if
	/// unpaused.
	pub async fn pause_monitored(
		&self,
		owner: CancellationToken,
	) -> Result<PauseToken, Error> {
		self
			.call(|reply| Command::Pause {
				owner: Some(owner),
				reply,
			})
			.await
	}

	pub async fn unpause(&self, token: PauseToken) -> Result<(), Error> {
		self.call(|reply| Command::Unpause { token, reply }).await?
	}

	/// Round-trip that flushes mailbox order.
	pub async fn ping(&self) -> Result<(), Error> {
		self.call(|reply| Command::Ping { reply }).await
	}

	/// Round-trip through the server and its ack aggregator, flushing
	/// any in-flight write bookkeeping submitted before the call.
	pub async fn sync(&self) -> Result<(), Error> {
		self.call(|reply| Command::Sync { reply }).await
	}

	/// Full ordered dump, served by the actor itself.
	pub async fn remote_dump(&self) -> Result<Vec<Record>, Error> {
		self.call(|reply| Command::RemoteDump { reply }).await
	}

	/// Stages a dump plus its future peer list and join reference on a
	/// paused server. Nothing is applied until [`ServerRef::apply_dump`].
	pub async fn send_dump(
		&self,
		peers: Vec<(ServerRef, AliasId)>,
		join_ref: JoinRef,
		dump: Vec<Record>,
	) -> Result<DumpRef, Error> {
		let peers = peers
			.into_iter()
			.map(|(server, alias)| Peer { server, alias })
			.collect();
		self
			.call(|reply| Command::SendDump {
				peers,
				join_ref,
				dump,
				reply,
			})
			.await?
	}

	/// Atomically installs a previously staged dump.
	pub async fn apply_dump(&self, dump_ref: DumpRef) -> Result<(), Error> {
		self
			.call(|reply| Command::ApplyDump { dump_ref, reply })
			.await?
	}

	/// Mints fresh destination aliases for each prospective peer while
	/// the server is paused. Returned as `(peer, alias)` pairs.
	pub async fn make_aliases_for(
		&self,
		peers: Vec<ServerId>,
	) -> Result<Vec<(ServerId, AliasId)>, Error> {
		self
			.call(|reply| Command::MakeAliasesFor { peers, reply })
			.await?
	}

	pub async fn stop(&self) -> Result<(), Error> {
		self.call(|reply| Command::Stop { reply }).await
	}
}

/// A fellow segment member plus the destination alias to attach to
/// replication traffic sent to it.
#[derive(Clone)]
pub(crate) struct Peer {
	pub server: ServerRef,
	pub alias: AliasId,
}

/// Replicated mutation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WriteOp {
	Insert(Record),
	InsertMany(Vec<Record>),
	Delete(Value),
	DeleteMany(Vec<Value>),
	DeleteObject(Record),
	DeleteObjects(Vec<Record>),
}

/// A write replicated from a segment peer.
pub(crate) struct RemoteOp {
	/// Destination alias minted by the receiving server; traffic on a
	/// non-active alias is discarded.
	pub alias: AliasId,
	pub write_ref: WriteRef,
	/// Inbox of the originating server's ack aggregator.
	pub reply_to: mpsc::UnboundedSender<AckMsg>,
	pub from: ServerId,
	pub op: WriteOp,
}

/// Messages understood by the ack aggregator.
pub(crate) enum AckMsg {
	/// Registers a pending write; `peers` is never empty (callers with
	/// no peers are released inline by the server).
	Add {
		write_ref: WriteRef,
		caller: oneshot::Sender<Result<(), Error>>,
		peers: Vec<ServerId>,
	},
	/// A peer acknowledged a write. Unknown refs and peers are dropped
	/// silently.
	Ack { write_ref: WriteRef, from: ServerId },
	/// A peer went down: indistinguishable from it having acked
	/// everything it still owed.
	RemoteDown { peer: ServerId },
	/// Round-trip marker used by `sync`.
	Flush { reply: oneshot::Sender<()> },
	Stop,
}

/// Reply to a `check_server` alias probe.
pub(crate) enum CheckServerReply {
	Confirmed,
	/// The probed alias is unknown or disabled at the recipient.
	Failed { mon: UniqueId },
}

/// Messages understood by the table server actor.
pub(crate) enum Command {
	Write {
		op: WriteOp,
		reply: oneshot::Sender<Result<(), Error>>,
	},
	Remote(RemoteOp),
	OtherPids {
		reply: oneshot::Sender<Vec<ServerRef>>,
	},
	Pause {
		owner: Option<CancellationToken>,
		reply: oneshot::Sender<PauseToken>,
	},
	Unpause {
		token: PauseToken,
		reply: oneshot::Sender<Result<(), Error>>,
	},
	Info {
		reply: oneshot::Sender<TableInfo>,
	},
	RemoteDump {
		reply: oneshot::Sender<Vec<Record>>,
	},
	SendDump {
		peers: Vec<Peer>,
		join_ref: JoinRef,
		dump: Vec<Record>,
		reply: oneshot::Sender<Result<DumpRef, Error>>,
	},
	ApplyDump {
		dump_ref: DumpRef,
		reply: oneshot::Sender<Result<(), Error>>,
	},
	MakeAliasesFor {
		peers: Vec<ServerId>,
		reply: oneshot::Sender<Result<Vec<(ServerId, AliasId)>, Error>>,
	},
	CheckServer {
		source: ServerId,
		mon: UniqueId,
		alias: AliasId,
		reply: oneshot::Sender<CheckServerReply>,
	},
	Ping {
		reply: oneshot::Sender<()>,
	},
	Sync {
		reply: oneshot::Sender<()>,
	},
	Stop {
		reply: oneshot::Sender<()>,
	},
}
