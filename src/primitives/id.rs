use {crate::primitives::Short, core::fmt, derive_more::Deref};

/// Uniquely identifies entities in a crit cluster: table servers, nodes,
/// destination aliases, join references, dump references, write references
/// and pause tokens.
///
/// Represented as a 32-byte array, either derived from a name by hashing
/// its bytes or minted randomly for ephemeral references.
#[derive(Clone, Copy, Deref, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueId([u8; 32]);

impl<T: AsRef<str>> From<T> for UniqueId {
	fn from(s: T) -> Self {
		UniqueId(*blake3::hash(s.as_ref().as_bytes()).as_bytes())
	}
}

impl UniqueId {
	/// Returns the byte representation of the unique id.
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}

	/// Creates a unique id from the given bytes.
	pub fn from_bytes(bytes: impl Into<[u8; 32]>) -> Self {
		UniqueId(bytes.into())
	}

	/// Mints a random unique id.
	pub fn random() -> Self {
		UniqueId(rand::random())
	}
}

impl AsRef<[u8]> for UniqueId {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl fmt::Debug for UniqueId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(self.0))
	}
}

impl fmt::Display for UniqueId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", Short(&self.0))
	}
}
