mod utils;

use {
	anyhow::Result,
	core::time::Duration,
	crit::{Cluster, Config, Error, Table, join, record},
	std::sync::{Arc, Mutex},
	utils::{eventually, timeout_s},
};

#[tokio::test]
async fn replicate_between_two_nodes() -> Result<()> {
	let cluster = Cluster::new();
	let t1 = Table::start(&cluster.node("n1"), "t", Config::default())?;
	let t2 = Table::start(&cluster.node("n2"), "t", Config::default())?;

	timeout_s(5, join(&cluster, "t", &t1, &t2)).await??;

	// the synchronous insert resolves only after every peer acked
	timeout_s(5, t1.insert(record!["alice", 32])).await??;
	assert_eq!(t2.get("alice"), vec![record!["alice", 32]]);

	Ok(())
}

#[tokio::test]
async fn four_node_merge() -> Result<()> {
	let cluster = Cluster::new();
	let t1 = Table::start(&cluster.node("n1"), "t", Config::default())?;
	let t2 = Table::start(&cluster.node("n2"), "t", Config::default())?;
	let t3 = Table::start(&cluster.node("n3"), "t", Config::default())?;
	let t4 = Table::start(&cluster.node("n4"), "t", Config::default())?;

	timeout_s(5, join(&cluster, "t", &t1, &t3)).await??;
	timeout_s(5, join(&cluster, "t", &t2, &t4)).await??;
	timeout_s(5, join(&cluster, "t", &t1, &t2)).await??;

	// every member sees the three others
	for t in [&t1, &t2, &t3, &t4] {
		assert_eq!(timeout_s(2, t.other_pids()).await??.len(), 3);
	}

	timeout_s(5, t1.insert(record!["a"])).await??;
	timeout_s(5, t2.insert(record!["b"])).await??;
	timeout_s(5, t3.insert(record!["c"])).await??;
	timeout_s(5, t4.insert(record!["d"])).await??;

	let expected = vec![record!["a"], record!["b"], record!["c"], record!["d"]];
	for t in [&t1, &t2, &t3, &t4] {
		assert_eq!(t.dump(), expected);
	}

	timeout_s(5, t4.delete("a")).await??;
	let expected = vec![record!["b"], record!["c"], record!["d"]];
	for t in [&t1, &t2, &t3, &t4] {
		assert_eq!(t.dump(), expected);
	}

	Ok(())
}

#[tokio::test]
async fn write_survives_remote_crash() -> Result<()> {
	let cluster = Cluster::new();
	let t1 = Table::start(&cluster.node("n1"), "t", Config::default())?;
	let t2 = Table::start(&cluster.node("n2"), "t", Config::default())?;
	timeout_s(5, join(&cluster, "t", &t1, &t2)).await??;

	// suspend the peer so it cannot acknowledge
	timeout_s(2, t2.pause()).await??;

	let mut request = t1.insert_request(record!["alice", 32])?;

	// kill the peer while the write is outstanding
	timeout_s(2, t2.stop()).await??;

	// the peer's contribution is dropped from the wait list
	timeout_s(5, request.wait(Duration::from_secs(5))).await??;
	assert_eq!(t1.get("alice"), vec![record!["alice", 32]]);

	Ok(())
}

#[tokio::test]
async fn timeout_does_not_resurface_as_a_failure() -> Result<()> {
	let cluster = Cluster::new();
	let t1 = Table::start(&cluster.node("n1"), "t", Config::default())?;
	let t2 = Table::start(&cluster.node("n2"), "t", Config::default())?;
	timeout_s(5, join(&cluster, "t", &t1, &t2)).await??;

	timeout_s(2, t2.pause()).await??;

	let mut request = t1.insert_request(record!["alice", 32])?;

	// waiting with a zero timeout fails immediately
	let result = request.wait(Duration::ZERO).await;
	assert!(matches!(result, Err(Error::Timeout)));

	// the peer dying afterwards must not surface as another failure:
	// the write is simply released
	timeout_s(2, t2.stop()).await??;
	timeout_s(5, request.wait(Duration::from_secs(5))).await??;

	Ok(())
}

#[tokio::test]
async fn peer_down_fires_the_handler_and_shrinks_the_segment() -> Result<()> {
	let cluster = Cluster::new();
	let downs: Arc<Mutex<Vec<(crit::ServerId, String)>>> =
		Arc::new(Mutex::new(Vec::new()));

	let config = Config::builder().with_handle_down({
		let downs = Arc::clone(&downs);
		Arc::new(move |info: crit::table::DownInfo| {
			downs.lock().unwrap().push((info.remote, info.table));
		})
	});
	let t1 = Table::start(&cluster.node("n1"), "t", config)?;
	let t2 = Table::start(&cluster.node("n2"), "t", Config::default())?;
	timeout_s(5, join(&cluster, "t", &t1, &t2)).await??;

	let t2_id = t2.server().id();
	timeout_s(2, t2.stop()).await??;

	assert!(
		eventually(5, || *downs.lock().unwrap()
			== vec![(t2_id, "t".to_owned())])
		.await
	);
	assert!(timeout_s(2, t1.other_pids()).await??.is_empty());

	Ok(())
}

#[tokio::test]
async fn acknowledged_writes_are_visible_on_every_member() -> Result<()> {
	let cluster = Cluster::new();
	let t1 = Table::start(&cluster.node("n1"), "t", Config::default())?;
	let t2 = Table::start(&cluster.node("n2"), "t", Config::default())?;
	let t3 = Table::start(&cluster.node("n3"), "t", Config::default())?;

	timeout_s(5, join(&cluster, "t", &t1, &t2)).await??;
	timeout_s(5, join(&cluster, "t", &t1, &t3)).await??;

	timeout_s(5, t1.insert(record!["a", 1])).await??;
	timeout_s(5, t2.insert(record!["b", 2])).await??;
	timeout_s(5, t3.delete("a")).await??;

	let expected = vec![record!["b", 2]];
	for t in [&t1, &t2, &t3] {
		assert_eq!(t.dump(), expected);
	}

	Ok(())
}
