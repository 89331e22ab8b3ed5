use super::config::ConfigBuilderError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// Bags delete by full-value comparison; a conflict handler could
	/// never be invoked for one.
	#[error("bag tables cannot carry a conflict handler")]
	BagWithConflictHandler,

	#[error("invalid table options: {0}")]
	Config(#[from] ConfigBuilderError),

	#[error("key position must be at least 1")]
	InvalidKeypos,

	#[error("record has {arity} fields but the key position is {keypos}")]
	MissingKey { arity: usize, keypos: usize },

	#[error("unknown or already consumed pause token")]
	UnknownPauseMonitor,

	#[error("unknown dump reference")]
	UnknownDumpRef,

	#[error("operation is only valid while the server is paused")]
	NotPaused,

	#[error("timed out waiting for write acknowledgement")]
	Timeout,

	#[error("the server or its ack aggregator stopped before releasing the write")]
	AckAggregatorLost,

	#[error("table server is not running")]
	ServerStopped,
}
