//! Discovery loop.
//!
//! Polls a [`Backend`] for the desired node set and drives the join
//! coordinator for every (table, node) pair not yet in the table's
//! segment. Join failures are logged and retried on the next tick.

use {
	crate::{join, table::Table},
	std::collections::HashSet,
	tokio::time,
	tokio_util::sync::{CancellationToken, DropGuard},
	tracing::{debug, warn},
};

mod backend;
mod config;

pub use {
	backend::{Backend, FixedBackend},
	config::{Config, ConfigBuilder, ConfigBuilderError},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("backend failed to resolve nodes: {0}")]
	Backend(String),
}

/// Handle to a running discovery loop. The loop stops when the handle
/// is dropped.
pub struct Discovery {
	_stop_on_drop: DropGuard,
}

impl Discovery {
	/// Spawns the discovery loop for `table`.
	pub fn spawn(table: Table, backend: impl Backend, config: Config) -> Self {
		let cancel = CancellationToken::new();

		let worker = WorkerLoop {
			table,
			backend: Box::new(backend),
			config,
			cancel: cancel.clone(),
		};
		tokio::spawn(worker.run());

		Self {
			_stop_on_drop: cancel.drop_guard(),
		}
	}
}

struct WorkerLoop {
	table: Table,
	backend: Box<dyn Backend>,
	config: Config,
	cancel: CancellationToken,
}

impl WorkerLoop {
	async fn run(mut self) {
		let mut ticks = time::interval(self.config.poll_interval);

		loop {
			tokio::select! {
				() = self.cancel.cancelled() => {
					debug!(table = %self.table.table_name(), "discovery loop terminating");
					return;
				}

				_ = ticks.tick() => self.tick().await,
			}
		}
	}

	async fn tick(&mut self) {
		let desired = match self.backend.get_nodes() {
			Ok(nodes) => nodes,
			Err(e) => {
				warn!(
					table = %self.table.table_name(),
					error = %e,
					"discovery backend failed"
				);
				return;
			}
		};

		let Ok(connected) = self.table.other_nodes().await else {
			// the table stopped; the loop will be dropped with it
			return;
		};
		let connected: HashSet<String> = connected.into_iter().collect();
		let own_node = self.table.node().name().to_owned();
		let cluster = self.table.node().cluster().clone();

		for node in desired {
			if node == own_node || connected.contains(&node) {
				continue;
			}

			let node_id = crate::UniqueId::from(&node);
			let Some(remote) = cluster.find_table(&node_id, self.table.table_name())
			else {
				debug!(
					table = %self.table.table_name(),
					node = %node,
					"node has no table server yet"
				);
				continue;
			};

			// ping before joining; an unreachable server is retried on
			// the next tick
			if remote.ping().await.is_err() {
				debug!(
					table = %self.table.table_name(),
					node = %node,
					"remote table did not answer ping"
				);
				continue;
			}

			let lock_key = self
				.config
				.lock_key
				.clone()
				.unwrap_or_else(|| format!("crit/{}", self.table.table_name()));

			match join::join(&cluster, &lock_key, &self.table, &remote).await {
				// a concurrent join may have connected the nodes already
				Ok(()) | Err(join::Error::AlreadyJoined) => {}
				Err(e) => {
					warn!(
						table = %self.table.table_name(),
						node = %node,
						error = %e,
						"discovery-driven join failed"
					);
				}
			}
		}
	}
}
