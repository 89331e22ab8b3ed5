use {core::time::Duration, derive_builder::Builder};

/// Configuration options for the discovery loop.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(prefix = "with"), derive(Debug, Clone))]
#[builder_struct_attr(doc(hidden))]
pub struct Config {
	/// How often the backend is polled for the desired node set.
	#[builder(default = "Duration::from_secs(5)")]
	pub poll_interval: Duration,

	/// Cluster lock key used for the joins driven by this loop. Derived
	/// from the table name when unset.
	#[builder(default, setter(strip_option, into))]
	pub lock_key: Option<String>,
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
			poll_interval: Duration::from_secs(5),
			lock_key: None,
		}
	}
}
