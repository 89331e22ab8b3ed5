use {
	super::Checkpoint,
	crate::{table, task::TaskError},
	core::fmt,
};

/// Which half of a join a segment-level failure was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
	Local,
	Remote,
}

impl fmt::Display for Side {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Side::Local => write!(f, "local"),
			Side::Remote => write!(f, "remote"),
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("cannot join a table server with itself")]
	SamePid,

	#[error("the servers are already members of the same segment")]
	AlreadyJoined,

	#[error("the local and remote segments overlap")]
	Overlap,

	/// A concurrent failure is in flight: members of one side disagree
	/// about the side's membership.
	#[error("the {0} segment is not fully connected")]
	NotFullyConnected(Side),

	/// Members of one side hold different join references.
	#[error("members of the {0} segment disagree on the join reference")]
	JoinRefMismatch(Side),

	#[error("segment member failed during join: {0}")]
	Member(#[from] table::Error),

	/// The test-only checkpoint hook aborted the join.
	#[error("join aborted at {at:?}: {reason}")]
	Checkpoint { at: Checkpoint, reason: String },

	#[error("join worker failed: {0}")]
	Task(#[from] TaskError),
}
