use {
	super::protocol::ServerId,
	crate::record::Record,
	derive_builder::Builder,
	serde::{Deserialize, Serialize},
	std::sync::Arc,
};

/// Storage flavor of a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
	/// At most one record per key; dumps are sorted by key ascending.
	#[default]
	OrderedSet,
	/// Any number of records per key; deletion compares full values.
	Bag,
}

/// Resolves two records that share a key when segments merge.
///
/// Must be deterministic: both sides of a join apply it to the same
/// argument order and adopt its output. Ordered-set tables only.
pub type ConflictHandler = Arc<dyn Fn(&Record, &Record) -> Record + Send + Sync>;

/// Invoked when a segment peer goes down.
pub type DownHandler = Arc<dyn Fn(DownInfo) + Send + Sync>;

/// Passed to a [`DownHandler`] when a peer disappears from the segment.
#[derive(Debug, Clone)]
pub struct DownInfo {
	pub remote: ServerId,
	pub table: String,
}

/// Table server options.
#[derive(Clone, Builder)]
#[builder(pattern = "owned", setter(prefix = "with"), derive(Clone))]
#[builder_struct_attr(doc(hidden))]
pub struct Config {
	/// Storage flavor. Conflict handlers are rejected for bags.
	#[builder(default)]
	pub table_type: TableType,

	/// 1-indexed position of the key within each record.
	#[builder(default = "1")]
	pub keypos: usize,

	/// Merges two records sharing a key at join time.
	#[builder(default, setter(strip_option))]
	pub handle_conflict: Option<ConflictHandler>,

	/// Called when a segment peer goes down.
	#[builder(default, setter(strip_option))]
	pub handle_down: Option<DownHandler>,
}

impl Config {
	/// Creates a new config builder with default values.
	pub fn builder() -> ConfigBuilder {
		ConfigBuilder::default()
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			table_type: TableType::default(),
			keypos: 1,
			handle_conflict: None,
			handle_down: None,
		}
	}
}

#[doc(hidden)]
pub trait IntoConfig {
	fn into_config(self) -> Result<Config, ConfigBuilderError>;
}

impl IntoConfig for Config {
	fn into_config(self) -> Result<Config, ConfigBuilderError> {
		Ok(self)
	}
}

impl IntoConfig for ConfigBuilder {
	fn into_config(self) -> Result<Config, ConfigBuilderError> {
		self.build()
	}
}
