//! Cluster-replicated in-memory tables.
//!
//! Each [`Table`] is a per-node server actor owning one keyed table.
//! Servers on different nodes form a *segment* by pairwise
//! [`join`]ing: writes originating anywhere in the segment are applied
//! locally, fanned out to every peer, and acknowledged back to the
//! caller once all peers confirm. Joins merge two segments by
//! exchanging full dumps under a cluster-wide lock while writes are
//! transparently paused and queued.
//!
//! Consistency is eventual: once a write has been acknowledged it is
//! present on every surviving member, but concurrent writes to the same
//! key from different nodes resolve last-writer-wins per replica, and
//! pre-join conflicts are only reconciled when a conflict handler is
//! configured.

pub mod bits;
mod cluster;
pub mod discovery;
pub mod join;
mod primitives;
pub mod record;
pub mod table;
mod task;

pub use {
	cluster::{Cluster, LockGuard, Node, NodeId},
	join::{Checkpoint, CheckpointHandler, JoinOpts, join, join_with},
	primitives::UniqueId,
	record::{Record, Value},
	table::{
		Config,
		Error,
		ServerId,
		ServerRef,
		Table,
		TableInfo,
		TableType,
		WriteRequest,
	},
	task::{LongTask, TaskError, spawn_logged},
};
