use {
	super::{config::TableType, protocol::WriteOp},
	crate::record::{Record, Value},
	im::OrdMap,
};

/// Local contents of one table, keyed by the value at the table's key
/// position.
///
/// Persistent maps keep dump extraction and snapshot publication cheap:
/// cloning shares structure instead of copying records.
#[derive(Clone)]
pub(super) enum Contents {
	/// At most one record per key.
	OrderedSet(OrdMap<Value, Record>),
	/// Any number of records per key, in insertion order, no duplicate
	/// identical records within a key.
	Bag(OrdMap<Value, Vec<Record>>),
}

impl Contents {
	pub(super) fn new(table_type: TableType) -> Self {
		match table_type {
			TableType::OrderedSet => Contents::OrderedSet(OrdMap::new()),
			TableType::Bag => Contents::Bag(OrdMap::new()),
		}
	}

	/// Total number of stored records.
	pub(super) fn size(&self) -> usize {
		match self {
			Contents::OrderedSet(map) => map.len(),
			Contents::Bag(map) => map.values().map(Vec::len).sum(),
		}
	}

	/// All records stored under `key`.
	pub(super) fn get(&self, key: &Value) -> Vec<Record> {
		match self {
			Contents::OrderedSet(map) => map.get(key).cloned().into_iter().collect(),
			Contents::Bag(map) => map.get(key).cloned().unwrap_or_default(),
		}
	}

	/// Full contents ordered by key ascending; bag records keep their
	/// insertion order within a key.
	pub(super) fn dump(&self) -> Vec<Record> {
		match self {
			Contents::OrderedSet(map) => map.values().cloned().collect(),
			Contents::Bag(map) => map.values().flatten().cloned().collect(),
		}
	}

	/// Applies one replicated operation. Records without a key at
	/// `keypos` are skipped; the caller validates before submission.
	pub(super) fn apply(&mut self, op: &WriteOp, keypos: usize) {
		match op {
			WriteOp::Insert(record) => self.insert(record.clone(), keypos),
			WriteOp::InsertMany(records) => {
				for record in records {
					self.insert(record.clone(), keypos);
				}
			}
			WriteOp::Delete(key) => self.delete(key),
			WriteOp::DeleteMany(keys) => {
				for key in keys {
					self.delete(key);
				}
			}
			WriteOp::DeleteObject(record) => self.delete_object(record, keypos),
			WriteOp::DeleteObjects(records) => {
				for record in records {
					self.delete_object(record, keypos);
				}
			}
		}
	}

	pub(super) fn insert(&mut self, record: Record, keypos: usize) {
		let Some(key) = record.key(keypos).cloned() else {
			return;
		};
		match self {
			Contents::OrderedSet(map) => {
				map.insert(key, record);
			}
			Contents::Bag(map) => {
				let bucket = map.entry(key).or_insert_with(Vec::new);
				if !bucket.contains(&record) {
					bucket.push(record);
				}
			}
		}
	}

	pub(super) fn delete(&mut self, key: &Value) {
		match self {
			Contents::OrderedSet(map) => {
				map.remove(key);
			}
			Contents::Bag(map) => {
				map.remove(key);
			}
		}
	}

	/// Removes records equal to `record` by full-value comparison.
	pub(super) fn delete_object(&mut self, record: &Record, keypos: usize) {
		let Some(key) = record.key(keypos) else {
			return;
		};
		match self {
			Contents::OrderedSet(map) => {
				if map.get(key) == Some(record) {
					map.remove(key);
				}
			}
			Contents::Bag(map) => {
				let emptied = match map.get_mut(key) {
					Some(bucket) => {
						bucket.retain(|r| r != record);
						bucket.is_empty()
					}
					None => false,
				};
				if emptied {
					map.remove(key);
				}
			}
		}
	}

	/// Builds fresh contents from a dump received from another segment.
	/// Installing the result replaces whatever the table held before.
	pub(super) fn from_dump(
		table_type: TableType,
		dump: Vec<Record>,
		keypos: usize,
	) -> Self {
		let mut contents = Contents::new(table_type);
		for record in dump {
			contents.insert(record, keypos);
		}
		contents
	}
}

#[cfg(test)]
mod tests {
	use {super::*, crate::record};

	#[test]
	fn ordered_set_overwrites_per_key() {
		let mut c = Contents::new(TableType::OrderedSet);
		c.insert(record!["alice", 32], 1);
		c.insert(record!["alice", 33], 1);

		assert_eq!(c.size(), 1);
		assert_eq!(c.get(&"alice".into()), vec![record!["alice", 33]]);
	}

	#[test]
	fn ordered_set_dump_is_sorted_by_key() {
		let mut c = Contents::new(TableType::OrderedSet);
		c.insert(record!["carol"], 1);
		c.insert(record!["alice"], 1);
		c.insert(record!["bob"], 1);

		assert_eq!(
			c.dump(),
			vec![record!["alice"], record!["bob"], record!["carol"]]
		);
	}

	#[test]
	fn bag_keeps_many_records_per_key_without_duplicates() {
		let mut c = Contents::new(TableType::Bag);
		c.insert(record!["k", 1], 1);
		c.insert(record!["k", 2], 1);
		c.insert(record!["k", 1], 1); // identical record is a no-op

		assert_eq!(c.size(), 2);
		assert_eq!(c.get(&"k".into()), vec![record!["k", 1], record!["k", 2]]);
	}

	#[test]
	fn delete_object_compares_full_value() {
		let mut c = Contents::new(TableType::Bag);
		c.insert(record!["k", 1], 1);
		c.insert(record!["k", 2], 1);

		c.delete_object(&record!["k", 1], 1);
		assert_eq!(c.get(&"k".into()), vec![record!["k", 2]]);

		// ordered set: only an exact match deletes
		let mut c = Contents::new(TableType::OrderedSet);
		c.insert(record!["k", 1], 1);
		c.delete_object(&record!["k", 2], 1);
		assert_eq!(c.size(), 1);
		c.delete_object(&record!["k", 1], 1);
		assert_eq!(c.size(), 0);
	}

	#[test]
	fn insert_then_delete_restores_empty_contents() {
		let mut c = Contents::new(TableType::OrderedSet);
		c.insert(record!["alice", 32], 1);
		c.delete(&"alice".into());

		assert_eq!(c.size(), 0);
		assert!(c.dump().is_empty());
	}

	#[test]
	fn from_dump_replaces_prior_contents() {
		let mut c = Contents::new(TableType::OrderedSet);
		c.insert(record!["alice", 1], 1);

		c = Contents::from_dump(
			TableType::OrderedSet,
			vec![record!["bob", 20], record!["carol", 3]],
			1,
		);

		// keys the dump does not mention are gone
		assert!(c.get(&"alice".into()).is_empty());
		assert_eq!(c.dump(), vec![record!["bob", 20], record!["carol", 3]]);
	}

	#[test]
	fn from_dump_deduplicates_bag_records() {
		let c = Contents::from_dump(
			TableType::Bag,
			vec![record!["k", 1], record!["k", 2], record!["k", 1]],
			1,
		);

		assert_eq!(c.get(&"k".into()), vec![record!["k", 1], record!["k", 2]]);
	}

	#[test]
	fn respects_key_position() {
		let mut c = Contents::new(TableType::OrderedSet);
		c.insert(record![1, "alice"], 2);
		c.insert(record![2, "alice"], 2);

		assert_eq!(c.size(), 1);
		assert_eq!(c.get(&"alice".into()), vec![record![2, "alice"]]);
	}
}
