use core::fmt;

/// A wrapper type that formats the inner value as a shortened hex string.
pub struct Short<T>(pub T);

impl<T: AsRef<[u8]>> fmt::Display for Short<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		const LEN: usize = 5;
		let s = self.0.as_ref();
		if s.len() <= LEN {
			write!(f, "{}", hex::encode(s))
		} else {
			write!(f, "{}", hex::encode(&s[0..LEN]))
		}
	}
}
