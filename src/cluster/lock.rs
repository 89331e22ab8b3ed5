use {
	crate::primitives::UniqueId,
	dashmap::DashMap,
	std::{sync::Arc, time::Duration},
	tokio::sync::{Mutex, OwnedMutexGuard},
	tracing::warn,
};

/// Delay between re-entries once the immediate retry after the first
/// abort has also failed.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Registry of cluster-wide named advisory locks.
#[derive(Default)]
pub(super) struct Locks {
	entries: DashMap<UniqueId, Arc<Mutex<()>>>,
}

/// Exclusive lease on a named cluster lock. Released on drop.
pub struct LockGuard {
	_guard: OwnedMutexGuard<()>,
}

impl Locks {
	/// Acquires the lock named `key`, serializing all holders of the same
	/// key cluster-wide.
	///
	/// A contended acquisition is retried once immediately, then
	/// re-entered without bound with a short delay. Every retry is
	/// logged; acquisition itself never fails.
	pub(super) async fn acquire(&self, key: &str) -> LockGuard {
		let entry = self
			.entries
			.entry(UniqueId::from(key))
			.or_default()
			.clone();

		let mut attempts = 0u32;
		loop {
			match entry.clone().try_lock_owned() {
				Ok(guard) => return LockGuard { _guard: guard },
				Err(_) => {
					attempts += 1;
					warn!(lock = %key, attempts, "cluster lock contended, retrying");
					if attempts > 1 {
						tokio::time::sleep(RETRY_DELAY).await;
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn lock_is_exclusive_per_key() {
		let locks = Arc::new(Locks::default());

		let first = locks.acquire("segment").await;
		// a different key is independent
		let _other = locks.acquire("other").await;

		let contender = tokio::spawn({
			let locks = Arc::clone(&locks);
			async move {
				let _guard = locks.acquire("segment").await;
			}
		});

		// the contender cannot finish while the lease is held
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(!contender.is_finished());

		drop(first);
		tokio::time::timeout(Duration::from_secs(5), contender)
			.await
			.expect("contender acquires after release")
			.unwrap();
	}
}
