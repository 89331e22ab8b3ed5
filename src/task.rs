//! Supervised workers for long-running procedures.
//!
//! [`spawn_logged`] runs a future in a background task that logs a
//! progress line while it runs and converts a panic into a tagged error
//! instead of poisoning the caller. The worker exposes a lifeline token
//! that collaborators can monitor the way segment peers monitor each
//! other; it is cancelled the moment the worker exits for any reason.

use {
	std::{pin::pin, time::Duration},
	tokio::{task::JoinHandle, time},
	tokio_util::sync::CancellationToken,
	tracing::{info, warn},
};

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
	/// The worker panicked; carries the panic message when it was a
	/// string.
	#[error("worker panicked: {0}")]
	Panicked(String),

	#[error("worker was cancelled")]
	Cancelled,
}

/// Handle to a worker spawned by [`spawn_logged`].
pub struct LongTask<T> {
	name: String,
	lifeline: CancellationToken,
	handle: JoinHandle<T>,
}

/// Runs `work` in a supervised background task.
///
/// The closure receives the worker's lifeline token, which stays
/// un-cancelled exactly as long as the worker is alive. While the work
/// runs, a progress line is logged every `progress_interval`.
pub fn spawn_logged<T, F, Fut>(
	name: impl Into<String>,
	progress_interval: Duration,
	work: F,
) -> LongTask<T>
where
	F: FnOnce(CancellationToken) -> Fut,
	Fut: Future<Output = T> + Send + 'static,
	T: Send + 'static,
{
	let name = name.into();
	let lifeline = CancellationToken::new();
	let work = work(lifeline.clone());

	let handle = tokio::spawn({
		let name = name.clone();
		let lifeline = lifeline.clone();
		async move {
			// monitors observe the cancelled lifeline even if the work
			// panics
			let _down_on_exit = lifeline.drop_guard();

			let mut progress = time::interval(progress_interval);
			progress.tick().await; // the first tick completes immediately

			let mut work = pin!(work);
			loop {
				tokio::select! {
					output = &mut work => return output,
					_ = progress.tick() => {
						info!(task = %name, "still running");
					}
				}
			}
		}
	});

	LongTask {
		name,
		lifeline,
		handle,
	}
}

impl<T> LongTask<T> {
	/// Cancelled the moment the worker exits, normally or not.
	pub fn lifeline(&self) -> &CancellationToken {
		&self.lifeline
	}

	/// Waits for the worker and converts a panic into [`TaskError`].
	pub async fn join(self) -> Result<T, TaskError> {
		match self.handle.await {
			Ok(output) => Ok(output),
			Err(e) if e.is_panic() => {
				let payload = e.into_panic();
				let reason = payload
					.downcast_ref::<String>()
					.cloned()
					.or_else(|| payload.downcast_ref::<&str>().map(|s| (*s).to_owned()))
					.unwrap_or_else(|| "unknown panic payload".to_owned());
				warn!(task = %self.name, %reason, "worker panicked");
				Err(TaskError::Panicked(reason))
			}
			Err(_) => Err(TaskError::Cancelled),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn passes_the_output_through() {
		let task = spawn_logged("double", Duration::from_secs(60), |_| async {
			21 * 2
		});
		assert_eq!(task.join().await.unwrap(), 42);
	}

	#[tokio::test]
	async fn converts_panics_into_errors() {
		let task = spawn_logged("boom", Duration::from_secs(60), |_| async {
			panic!("simulated failure");
		});
		match task.join().await {
			Err(TaskError::Panicked(reason)) => {
				assert!(reason.contains("simulated failure"));
			}
			other => panic!("expected a panic error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn lifeline_is_cancelled_on_exit() {
		let task = spawn_logged("noop", Duration::from_secs(60), |_| async {});
		let lifeline = task.lifeline().clone();
		task.join().await.unwrap();
		lifeline.cancelled().await;
	}

	#[tokio::test]
	async fn lifeline_is_cancelled_on_panic() {
		let task = spawn_logged("boom", Duration::from_secs(60), |_| async {
			panic!("simulated failure");
		});
		let lifeline = task.lifeline().clone();
		let _ = task.join().await;
		lifeline.cancelled().await;
	}
}
