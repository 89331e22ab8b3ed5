mod utils;

use {
	anyhow::Result,
	crit::{Cluster, Config, Error, Record, Table, TableType, Value, record},
	std::sync::Arc,
	utils::timeout_s,
};

#[tokio::test]
async fn basic_local() -> Result<()> {
	let cluster = Cluster::new();
	let node = cluster.node("n1");
	let t = Table::start(&node, "people", Config::default())?;

	timeout_s(2, t.insert(record!["alice", 32])).await??;
	assert_eq!(t.get("alice"), vec![record!["alice", 32]]);

	Ok(())
}

#[tokio::test]
async fn insert_then_delete_is_a_noop() -> Result<()> {
	let cluster = Cluster::new();
	let t = Table::start(&cluster.node("n1"), "t", Config::default())?;

	timeout_s(2, t.insert(record!["alice", 32])).await??;
	timeout_s(2, t.delete("alice")).await??;

	assert_eq!(t.size(), 0);
	assert!(t.dump().is_empty());
	assert!(t.get("alice").is_empty());

	Ok(())
}

#[tokio::test]
async fn ordered_set_keeps_one_record_per_key() -> Result<()> {
	let cluster = Cluster::new();
	let t = Table::start(&cluster.node("n1"), "t", Config::default())?;

	timeout_s(2, t.insert(record!["alice", 32])).await??;
	timeout_s(2, t.insert(record!["alice", 33])).await??;

	assert_eq!(t.size(), 1);
	assert_eq!(t.get("alice"), vec![record!["alice", 33]]);

	Ok(())
}

#[tokio::test]
async fn dump_is_sorted_by_key() -> Result<()> {
	let cluster = Cluster::new();
	let t = Table::start(&cluster.node("n1"), "t", Config::default())?;

	timeout_s(
		2,
		t.insert_many(vec![record!["carol"], record!["alice"], record!["bob"]]),
	)
	.await??;

	assert_eq!(
		t.dump(),
		vec![record!["alice"], record!["bob"], record!["carol"]]
	);

	Ok(())
}

#[tokio::test]
async fn bag_semantics() -> Result<()> {
	let cluster = Cluster::new();
	let config = Config::builder().with_table_type(TableType::Bag);
	let t = Table::start(&cluster.node("n1"), "t", config)?;

	timeout_s(2, t.insert(record!["k", 1])).await??;
	timeout_s(2, t.insert(record!["k", 2])).await??;
	// identical records are not duplicated
	timeout_s(2, t.insert(record!["k", 1])).await??;
	assert_eq!(t.size(), 2);

	// delete_object removes by full value
	timeout_s(2, t.delete_object(record!["k", 1])).await??;
	assert_eq!(t.get("k"), vec![record!["k", 2]]);

	// delete by key removes the remaining records
	timeout_s(2, t.delete("k")).await??;
	assert_eq!(t.size(), 0);

	Ok(())
}

#[tokio::test]
async fn respects_configured_key_position() -> Result<()> {
	let cluster = Cluster::new();
	let config = Config::builder().with_keypos(2);
	let t = Table::start(&cluster.node("n1"), "t", config)?;

	timeout_s(2, t.insert(record![1, "alice"])).await??;
	timeout_s(2, t.insert(record![2, "alice"])).await??;

	assert_eq!(t.size(), 1);
	assert_eq!(t.get("alice"), vec![record![2, "alice"]]);

	Ok(())
}

#[tokio::test]
async fn bag_with_conflict_handler_is_rejected() {
	let cluster = Cluster::new();
	let config = Config::builder()
		.with_table_type(TableType::Bag)
		.with_handle_conflict(Arc::new(|l: &Record, _: &Record| l.clone()));

	let result = Table::start(&cluster.node("n1"), "t", config);
	assert!(matches!(result, Err(Error::BagWithConflictHandler)));
}

#[tokio::test]
async fn zero_keypos_is_rejected() {
	let cluster = Cluster::new();
	let config = Config::builder().with_keypos(0);

	let result = Table::start(&cluster.node("n1"), "t", config);
	assert!(matches!(result, Err(Error::InvalidKeypos)));
}

#[tokio::test]
async fn records_shorter_than_the_key_position_are_rejected() -> Result<()> {
	let cluster = Cluster::new();
	let config = Config::builder().with_keypos(3);
	let t = Table::start(&cluster.node("n1"), "t", config)?;

	let result = t.insert(record!["only", "two"]).await;
	assert!(matches!(result, Err(Error::MissingKey { arity: 2, keypos: 3 })));

	Ok(())
}

#[tokio::test]
async fn info_reflects_server_state() -> Result<()> {
	let cluster = Cluster::new();
	let t = Table::start(&cluster.node("n1"), "inventory", Config::default())?;

	timeout_s(2, t.insert(record!["a", 1])).await??;

	let info = timeout_s(2, t.info()).await??;
	assert_eq!(info.name, "inventory");
	assert_eq!(info.table_type, TableType::OrderedSet);
	assert_eq!(info.keypos, 1);
	assert_eq!(info.size, 1);
	assert!(info.peers.is_empty());
	assert!(info.pause_tokens.is_empty());
	assert!(info.pending_aliases.is_empty());

	Ok(())
}

#[tokio::test]
async fn stop_shuts_the_server_down() -> Result<()> {
	let cluster = Cluster::new();
	let node = cluster.node("n1");
	let t = Table::start(&node, "t", Config::default())?;

	timeout_s(2, t.stop()).await??;

	let result = t.insert(record!["a", 1]).await;
	assert!(matches!(result, Err(Error::ServerStopped)));
	assert!(matches!(t.ping().await, Err(Error::ServerStopped)));

	Ok(())
}

#[tokio::test]
async fn delete_many_removes_all_named_keys() -> Result<()> {
	let cluster = Cluster::new();
	let t = Table::start(&cluster.node("n1"), "t", Config::default())?;

	timeout_s(
		2,
		t.insert_many(vec![record![1], record![2], record![3]]),
	)
	.await??;
	timeout_s(2, t.delete_many(vec![Value::from(1), Value::from(3)])).await??;

	assert_eq!(t.dump(), vec![record![2]]);

	Ok(())
}
