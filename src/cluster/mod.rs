//! In-process cluster substrate: node identities, the table registry the
//! discovery loop resolves against, and cluster-wide named advisory
//! locks.
//!
//! Table servers on different [`Node`]s of one [`Cluster`] behave like
//! processes on different machines: they interact only by message
//! passing and observe each other's liveness through DOWN notifications.

use {
	crate::{primitives::UniqueId, table::Table},
	dashmap::DashMap,
	std::sync::Arc,
};

mod lock;

pub use lock::LockGuard;

/// Identifies a logical node, derived from the node name.
pub type NodeId = UniqueId;

/// Shared cluster context. Cheap to clone; all clones observe the same
/// lock table and table registry.
#[derive(Clone, Default)]
pub struct Cluster {
	inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
	locks: lock::Locks,
	tables: DashMap<(NodeId, UniqueId), Table>,
}

impl Cluster {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the logical node with the given name, creating its
	/// identity on first use.
	pub fn node(&self, name: &str) -> Node {
		Node {
			cluster: self.clone(),
			id: UniqueId::from(name),
			name: name.into(),
		}
	}

	/// Acquires the cluster-wide advisory lock named `key`.
	pub async fn lock(&self, key: &str) -> LockGuard {
		self.inner.locks.acquire(key).await
	}

	/// Looks up the table server registered under (`node`, `name`).
	pub fn find_table(&self, node: &NodeId, name: &str) -> Option<Table> {
		self
			.inner
			.tables
			.get(&(*node, UniqueId::from(name)))
			.map(|entry| entry.value().clone())
	}

	pub(crate) fn register(&self, table: &Table) {
		let key = (table.node().id(), UniqueId::from(table.table_name()));
		self.inner.tables.insert(key, table.clone());
	}

	pub(crate) fn unregister(&self, node: NodeId, name: &str) {
		self.inner.tables.remove(&(node, UniqueId::from(name)));
	}
}

/// A logical node of the cluster.
///
/// Table servers are started on a node; peers started on other nodes
/// show up in [`Table::other_nodes`].
#[derive(Clone)]
pub struct Node {
	cluster: Cluster,
	id: NodeId,
	name: Arc<str>,
}

impl Node {
	pub fn id(&self) -> NodeId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn name_arc(&self) -> Arc<str> {
		Arc::clone(&self.name)
	}

	pub fn cluster(&self) -> &Cluster {
		&self.cluster
	}
}
