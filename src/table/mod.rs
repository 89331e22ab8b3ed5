//! Replicated table servers.
//!
//! A [`Table`] is a handle to one per-node table server actor. Servers
//! on different nodes form a segment by joining (see [`crate::join`]);
//! writes are applied locally, fanned out to every segment peer and
//! acknowledged back to the caller once all peers confirm.

use {
	crate::{
		cluster::Node,
		primitives::UniqueId,
		record::{Record, Value},
	},
	std::{sync::Arc, time::Duration},
	tokio::sync::{oneshot, watch},
	tokio_util::sync::CancellationToken,
};

mod acks;
mod config;
mod error;
mod protocol;
mod storage;
mod worker;

pub use {
	config::{
		Config,
		ConfigBuilder,
		ConfigBuilderError,
		ConflictHandler,
		DownHandler,
		DownInfo,
		IntoConfig,
		TableType,
	},
	error::Error,
	protocol::{
		AliasId,
		DumpRef,
		JoinRef,
		PauseToken,
		ServerId,
		ServerRef,
		WriteOp,
		WriteRef,
	},
};

use {protocol::Command, storage::Contents, worker::WorkerLoop};

/// Point-in-time snapshot of a table server's control state.
#[derive(Debug, Clone)]
pub struct TableInfo {
	pub name: String,
	pub table_type: TableType,
	pub keypos: usize,
	pub size: usize,
	/// Segment peers and the destination alias used to replicate to
	/// each.
	pub peers: Vec<(ServerId, AliasId)>,
	pub pause_tokens: Vec<PauseToken>,
	pub pending_aliases: Vec<AliasId>,
	pub join_ref: JoinRef,
	/// Identity of the paired ack aggregator.
	pub acks: UniqueId,
}

/// Handle to a table server. Cheap to clone.
///
/// The server lives until [`Table::stop`] is called or its actor
/// crashes; dropping handles does not stop it.
#[derive(Clone)]
pub struct Table {
	server: ServerRef,
	name: Arc<str>,
	node: Node,
	config: Arc<Config>,
	snapshot: watch::Receiver<Contents>,
}

impl Table {
	/// Starts a new table server on `node`.
	///
	/// Fails with [`Error::BagWithConflictHandler`] when a bag is paired
	/// with a conflict handler, and with [`Error::InvalidKeypos`] when
	/// the key position is zero.
	pub fn start(
		node: &Node,
		name: &str,
		config: impl IntoConfig,
	) -> Result<Self, Error> {
		let config = config.into_config()?;
		if config.keypos == 0 {
			return Err(Error::InvalidKeypos);
		}
		if config.table_type == TableType::Bag && config.handle_conflict.is_some()
		{
			return Err(Error::BagWithConflictHandler);
		}

		let name: Arc<str> = name.into();
		let config = Arc::new(config);
		let (server, snapshot) =
			WorkerLoop::spawn(node.clone(), Arc::clone(&name), Arc::clone(&config));

		let table = Self {
			server,
			name,
			node: node.clone(),
			config,
			snapshot,
		};
		node.cluster().register(&table);
		Ok(table)
	}

	/// Stops the server; its ack aggregator stops with it. Writes still
	/// pending acknowledgement never receive a late reply.
	pub async fn stop(&self) -> Result<(), Error> {
		self.server.stop().await
	}
}

/// Read API, served from the local replica without queueing behind the
/// server actor.
impl Table {
	/// All records stored under `key`.
	pub fn get(&self, key: impl Into<Value>) -> Vec<Record> {
		self.snapshot.borrow().get(&key.into())
	}

	/// Full contents, ordered by key ascending.
	pub fn dump(&self) -> Vec<Record> {
		self.snapshot.borrow().dump()
	}

	/// Total number of stored records.
	pub fn size(&self) -> usize {
		self.snapshot.borrow().size()
	}

	pub fn table_name(&self) -> &str {
		&self.name
	}

	pub fn node(&self) -> &Node {
		&self.node
	}

	/// Address of the underlying server actor.
	pub fn server(&self) -> &ServerRef {
		&self.server
	}

	pub fn table_type(&self) -> TableType {
		self.config.table_type
	}

	pub fn keypos(&self) -> usize {
		self.config.keypos
	}

	pub(crate) fn conflict_handler(&self) -> Option<&ConflictHandler> {
		self.config.handle_conflict.as_ref()
	}
}

/// Write API. Every operation has a synchronous variant that awaits full
/// acknowledgement and a `_request` variant returning a [`WriteRequest`]
/// awaitable with a timeout.
impl Table {
	pub async fn insert(&self, record: Record) -> Result<(), Error> {
		self.insert_request(record)?.done().await
	}

	pub fn insert_request(&self, record: Record) -> Result<WriteRequest, Error> {
		self.submit(WriteOp::Insert(record))
	}

	pub async fn insert_many(&self, records: Vec<Record>) -> Result<(), Error> {
		self.insert_many_request(records)?.done().await
	}

	pub fn insert_many_request(
		&self,
		records: Vec<Record>,
	) -> Result<WriteRequest, Error> {
		self.submit(WriteOp::InsertMany(records))
	}

	pub async fn delete(&self, key: impl Into<Value>) -> Result<(), Error> {
		self.delete_request(key)?.done().await
	}

	pub fn delete_request(
		&self,
		key: impl Into<Value>,
	) -> Result<WriteRequest, Error> {
		self.submit(WriteOp::Delete(key.into()))
	}

	pub async fn delete_many(&self, keys: Vec<Value>) -> Result<(), Error> {
		self.delete_many_request(keys)?.done().await
	}

	pub fn delete_many_request(
		&self,
		keys: Vec<Value>,
	) -> Result<WriteRequest, Error> {
		self.submit(WriteOp::DeleteMany(keys))
	}

	pub async fn delete_object(&self, record: Record) -> Result<(), Error> {
		self.delete_object_request(record)?.done().await
	}

	pub fn delete_object_request(
		&self,
		record: Record,
	) -> Result<WriteRequest, Error> {
		self.submit(WriteOp::DeleteObject(record))
	}

	pub async fn delete_objects(&self, records: Vec<Record>) -> Result<(), Error> {
		self.delete_objects_request(records)?.done().await
	}

	pub fn delete_objects_request(
		&self,
		records: Vec<Record>,
	) -> Result<WriteRequest, Error> {
		self.submit(WriteOp::DeleteObjects(records))
	}

	fn submit(&self, op: WriteOp) -> Result<WriteRequest, Error> {
		self.validate(&op)?;
		let (reply, rx) = oneshot::channel();
		if !self.server.send(Command::Write { op, reply }) {
			return Err(Error::ServerStopped);
		}
		Ok(WriteRequest { rx })
	}

	/// Inserted and object-deleted records must reach up to the key
	/// position; key-based deletes carry the key itself.
	fn validate(&self, op: &WriteOp) -> Result<(), Error> {
		let keypos = self.config.keypos;
		let records: &[Record] = match op {
			WriteOp::Insert(r) | WriteOp::DeleteObject(r) => core::slice::from_ref(r),
			WriteOp::InsertMany(rs) | WriteOp::DeleteObjects(rs) => rs,
			WriteOp::Delete(_) | WriteOp::DeleteMany(_) => &[],
		};
		for record in records {
			if record.key(keypos).is_none() {
				return Err(Error::MissingKey {
					arity: record.arity(),
					keypos,
				});
			}
		}
		Ok(())
	}
}

/// Peer-management and control-plane API. Control-plane calls are
/// served even while the server is paused.
impl Table {
	/// Current peer set.
	pub async fn other_pids(&self) -> Result<Vec<ServerRef>, Error> {
		self.server.other_pids().await
	}

	/// Distinct names of the nodes hosting the current peers.
	pub async fn other_nodes(&self) -> Result<Vec<String>, Error> {
		let mut nodes: Vec<String> = self
			.other_pids()
			.await?
			.into_iter()
			.map(|p| p.node_name().to_owned())
			.collect();
		nodes.sort();
		nodes.dedup();
		Ok(nodes)
	}

	/// Pauses the server. Writes submitted while paused queue up and are
	/// applied, in arrival order, once every outstanding token has been
	/// released.
	pub async fn pause(&self) -> Result<PauseToken, Error> {
		self.server.pause().await
	}

	/// Pauses the server on behalf of `owner`: cancellation of the owner
	/// releases the token as if unpaused.
	pub async fn pause_monitored(
		&self,
		owner: CancellationToken,
	) -> Result<PauseToken, Error> {
		self.server.pause_monitored(owner).await
	}

	/// Releases a pause token. Fails with [`Error::UnknownPauseMonitor`]
	/// when the token was never issued or is already consumed.
	pub async fn unpause(&self, token: PauseToken) -> Result<(), Error> {
		self.server.unpause(token).await
	}

	pub async fn info(&self) -> Result<TableInfo, Error> {
		self.server.info().await
	}

	/// Round-trip to the server, flushing mailbox order.
	pub async fn ping(&self) -> Result<(), Error> {
		self.server.ping().await
	}

	/// Round-trip through the server and its ack aggregator.
	pub async fn sync(&self) -> Result<(), Error> {
		self.server.sync().await
	}

	/// Full dump served by the server actor rather than the local
	/// snapshot.
	pub async fn remote_dump(&self) -> Result<Vec<Record>, Error> {
		self.server.remote_dump().await
	}

	/// Stages a dump with its future peer list and join reference; the
	/// server must be paused. See [`Table::apply_dump`].
	pub async fn send_dump(
		&self,
		peers: Vec<(ServerRef, AliasId)>,
		join_ref: JoinRef,
		dump: Vec<Record>,
	) -> Result<DumpRef, Error> {
		self.server.send_dump(peers, join_ref, dump).await
	}

	/// Atomically installs a staged dump: the local contents, the peer
	/// set and the join reference are replaced, and destination aliases
	/// are refreshed. Unknown references fail with
	/// [`Error::UnknownDumpRef`].
	pub async fn apply_dump(&self, dump_ref: DumpRef) -> Result<(), Error> {
		self.server.apply_dump(dump_ref).await
	}

	/// Mints fresh destination aliases for prospective peers while
	/// paused.
	pub async fn make_aliases_for(
		&self,
		peers: Vec<ServerId>,
	) -> Result<Vec<(ServerId, AliasId)>, Error> {
		self.server.make_aliases_for(peers).await
	}
}

/// An in-flight write returned by the `_request` variants.
///
/// Dropping the request abandons the wait; replication proceeds to
/// completion regardless.
pub struct WriteRequest {
	rx: oneshot::Receiver<Result<(), Error>>,
}

impl WriteRequest {
	/// Waits for full acknowledgement without a deadline.
	pub async fn done(mut self) -> Result<(), Error> {
		Self::outcome((&mut self.rx).await)
	}

	/// Waits for full acknowledgement up to `timeout`.
	///
	/// A timeout is purely client-side: the write continues in the
	/// background, a later release is observed by waiting again, and a
	/// peer going down after the timeout never surfaces as a failure.
	pub async fn wait(&mut self, timeout: Duration) -> Result<(), Error> {
		match tokio::time::timeout(timeout, &mut self.rx).await {
			Ok(outcome) => Self::outcome(outcome),
			Err(_) => Err(Error::Timeout),
		}
	}

	fn outcome(
		received: Result<Result<(), Error>, oneshot::error::RecvError>,
	) -> Result<(), Error> {
		match received {
			Ok(outcome) => outcome,
			Err(_) => Err(Error::AckAggregatorLost),
		}
	}
}
