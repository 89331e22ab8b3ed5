//! Segment join coordinator.
//!
//! [`join`] merges the segments of two table servers under a
//! cluster-wide lock: every member of both sides is paused, full dumps
//! are exchanged (optionally resolving per-key conflicts), and the
//! merged peer list plus a fresh join reference are installed on every
//! member before everything is unpaused.

use {
	crate::{
		cluster::Cluster,
		primitives::UniqueId,
		table::{
			AliasId,
			JoinRef,
			PauseToken,
			ServerId,
			ServerRef,
			Table,
			TableType,
		},
		task,
	},
	std::{
		collections::{HashMap, HashSet},
		sync::Arc,
		time::Duration,
	},
	tokio_util::sync::CancellationToken,
	tracing::{debug, info, warn},
};

mod error;
mod resolve;

pub use error::{Error, Side};

/// Cadence of the join worker's progress log line.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Named protocol steps surfaced to the checkpoint hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
	/// Every member of both sides is paused.
	Paused,
	/// Both sides' dumps have been taken.
	DumpsTaken,
	/// About to stage the dump on the given member.
	SendDump(ServerId),
	/// About to apply the staged dump on the given member.
	ApplyDump(ServerId),
}

/// Test-only fault-injection hook invoked at named protocol steps.
/// Returning an error aborts the join at that step; the coordinator
/// still unpauses everything on the way out.
pub type CheckpointHandler =
	Arc<dyn Fn(&Checkpoint) -> Result<(), String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct JoinOpts {
	pub checkpoint: Option<CheckpointHandler>,
}

/// Merges the segments of `local` and `remote`.
pub async fn join(
	cluster: &Cluster,
	lock_key: &str,
	local: &Table,
	remote: &Table,
) -> Result<(), Error> {
	join_with(cluster, lock_key, local, remote, JoinOpts::default()).await
}

/// [`join`] with explicit options.
pub async fn join_with(
	cluster: &Cluster,
	lock_key: &str,
	local: &Table,
	remote: &Table,
	opts: JoinOpts,
) -> Result<(), Error> {
	if local.server() == remote.server() {
		return Err(Error::SamePid);
	}
	if local.other_pids().await?.contains(remote.server()) {
		return Err(Error::AlreadyJoined);
	}

	let worker = task::spawn_logged(
		format!("join {} ({lock_key})", local.table_name()),
		PROGRESS_INTERVAL,
		{
			let cluster = cluster.clone();
			let lock_key = lock_key.to_owned();
			let local = local.clone();
			let remote = remote.clone();
			move |lifeline| {
				run_join(cluster, lock_key, local, remote, opts, lifeline)
			}
		},
	);

	worker.join().await?
}

async fn run_join(
	cluster: Cluster,
	lock_key: String,
	local: Table,
	remote: Table,
	opts: JoinOpts,
	lifeline: CancellationToken,
) -> Result<(), Error> {
	// joins are serialized per lock key cluster-wide
	let _lock = cluster.lock(&lock_key).await;
	debug!(
		table = %local.table_name(),
		lock = %lock_key,
		"join lock acquired"
	);

	let loc_pids = gather(&local).await?;
	let rem_pids = gather(&remote).await?;

	let loc_ids: HashSet<ServerId> = loc_pids.iter().map(ServerRef::id).collect();
	if rem_pids.iter().any(|p| loc_ids.contains(&p.id)) {
		return Err(Error::Overlap);
	}

	check_fully_connected(&loc_pids, Side::Local).await?;
	check_fully_connected(&rem_pids, Side::Remote).await?;

	// pause everything; tokens are released on every exit path, and the
	// servers additionally monitor this worker's lifeline
	let mut paused: Vec<(ServerRef, PauseToken)> = Vec::new();
	let result = merge(
		&loc_pids, &rem_pids, &local, &opts, &lifeline, &mut paused,
	)
	.await;

	for (server, token) in paused {
		if let Err(e) = server.unpause(token).await {
			warn!(server = %server.id(), error = %e, "unpause after join failed");
		}
	}

	result
}

async fn merge(
	loc_pids: &[ServerRef],
	rem_pids: &[ServerRef],
	local: &Table,
	opts: &JoinOpts,
	lifeline: &CancellationToken,
	paused: &mut Vec<(ServerRef, PauseToken)>,
) -> Result<(), Error> {
	for server in loc_pids.iter().chain(rem_pids) {
		let token = server.pause_monitored(lifeline.clone()).await?;
		paused.push((server.clone(), token));
	}
	checkpoint(opts, Checkpoint::Paused)?;

	// flush in-flight operations submitted before the pause
	loc_pids[0].sync().await?;
	rem_pids[0].sync().await?;

	let loc_dump = loc_pids[0].remote_dump().await?;
	let rem_dump = rem_pids[0].remote_dump().await?;
	checkpoint(opts, Checkpoint::DumpsTaken)?;

	// a member failure while gathering dumps would have changed the
	// memberships; a mismatch here means a concurrent failure in flight
	check_fully_connected(loc_pids, Side::Local).await?;
	check_fully_connected(rem_pids, Side::Remote).await?;

	// each side installs the other side's view; with a conflict handler
	// both views are pre-merged and identical
	let (loc_install, rem_install) = match local.conflict_handler() {
		Some(resolver) if local.table_type() == TableType::OrderedSet => {
			let (left, right) =
				resolve::resolve_sorted(&loc_dump, &rem_dump, local.keypos(), resolver);
			(right, left)
		}
		_ => (rem_dump, loc_dump),
	};

	let join_ref: JoinRef = UniqueId::random();
	let all: Vec<ServerRef> = loc_pids.iter().chain(rem_pids).cloned().collect();

	// every member mints fresh inbound aliases for its future peers
	let mut minted: HashMap<ServerId, HashMap<ServerId, AliasId>> =
		HashMap::new();
	for member in &all {
		let future_peers: Vec<ServerId> = all
			.iter()
			.map(ServerRef::id)
			.filter(|id| *id != member.id)
			.collect();
		let pairs = member.make_aliases_for(future_peers).await?;
		minted.insert(member.id, pairs.into_iter().collect());
	}

	// stage the dumps; failures surface through logs and the
	// post-unpause alias checks rather than aborting the join
	let mut staged: Vec<(ServerRef, crate::table::DumpRef)> = Vec::new();
	for (members, dump) in [(loc_pids, &loc_install), (rem_pids, &rem_install)] {
		for member in members {
			checkpoint(opts, Checkpoint::SendDump(member.id))?;
			let peers = peer_list_for(member, &all, &minted);
			match member.send_dump(peers, join_ref, dump.clone()).await {
				Ok(dump_ref) => staged.push((member.clone(), dump_ref)),
				Err(e) => {
					warn!(server = %member.id(), error = %e, "send_dump failed");
				}
			}
		}
	}

	for (member, dump_ref) in staged {
		checkpoint(opts, Checkpoint::ApplyDump(member.id))?;
		if let Err(e) = member.apply_dump(dump_ref).await {
			warn!(server = %member.id(), error = %e, "apply_dump failed");
		}
	}

	info!(
		table = %local.table_name(),
		join_ref = %join_ref,
		members = all.len(),
		"segments joined"
	);
	Ok(())
}

/// A member plus everything in its peer set.
async fn gather(table: &Table) -> Result<Vec<ServerRef>, Error> {
	let mut pids = vec![table.server().clone()];
	pids.extend(table.other_pids().await?);
	Ok(pids)
}

/// Verifies that every member of `side` agrees on the side's membership
/// and that all members share one join reference.
async fn check_fully_connected(
	pids: &[ServerRef],
	side: Side,
) -> Result<(), Error> {
	let expected: HashSet<ServerId> = pids.iter().map(ServerRef::id).collect();
	let mut join_ref: Option<JoinRef> = None;

	for member in pids {
		let mut seen: HashSet<ServerId> = member
			.other_pids()
			.await?
			.iter()
			.map(ServerRef::id)
			.collect();
		seen.insert(member.id);
		if seen != expected {
			return Err(Error::NotFullyConnected(side));
		}

		let info = member.info().await?;
		match join_ref {
			None => join_ref = Some(info.join_ref),
			Some(expected_ref) if expected_ref == info.join_ref => {}
			Some(_) => return Err(Error::JoinRefMismatch(side)),
		}
	}
	Ok(())
}

/// The merged peer list for `target`: every other member, addressed by
/// the alias that member minted for `target`.
fn peer_list_for(
	target: &ServerRef,
	all: &[ServerRef],
	minted: &HashMap<ServerId, HashMap<ServerId, AliasId>>,
) -> Vec<(ServerRef, AliasId)> {
	all
		.iter()
		.filter(|member| member.id != target.id)
		.filter_map(|member| {
			let alias = minted.get(&member.id)?.get(&target.id)?;
			Some((member.clone(), *alias))
		})
		.collect()
}

fn checkpoint(opts: &JoinOpts, at: Checkpoint) -> Result<(), Error> {
	match &opts.checkpoint {
		Some(hook) => hook(&at).map_err(|reason| Error::Checkpoint { at, reason }),
		None => Ok(()),
	}
}
