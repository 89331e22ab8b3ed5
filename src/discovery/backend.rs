use super::Error;

/// Resolves the set of nodes a table's segment should span.
///
/// Backends are polled by the [`super::Discovery`] loop; transient
/// resolution failures are logged and retried on the next tick.
pub trait Backend: Send + 'static {
	/// Returns the names of the nodes that should currently be part of
	/// the segment.
	fn get_nodes(&mut self) -> Result<Vec<String>, Error>;
}

/// Backend over a fixed node list.
pub struct FixedBackend {
	nodes: Vec<String>,
}

impl FixedBackend {
	pub fn new(nodes: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			nodes: nodes.into_iter().map(Into::into).collect(),
		}
	}
}

impl Backend for FixedBackend {
	fn get_nodes(&mut self) -> Result<Vec<String>, Error> {
		Ok(self.nodes.clone())
	}
}
