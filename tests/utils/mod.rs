#![allow(unused)]

use {core::time::Duration, tokio::time::Timeout};

#[ctor::ctor]
fn init_test_logging() {
	use tracing_subscriber::{filter::filter_fn, prelude::*};
	if let Ok(v) = std::env::var("TEST_TRACE") {
		let level = match v.as_str() {
			"true" | "debug" | "on" => tracing::Level::DEBUG,
			"trace" => tracing::Level::TRACE,
			"info" => tracing::Level::INFO,
			"warn" => tracing::Level::WARN,
			"error" => tracing::Level::ERROR,
			_ => return,
		};

		let _ = tracing_subscriber::registry()
			.with(tracing_subscriber::fmt::layer())
			.with(filter_fn(move |metadata| metadata.level() <= &level))
			.try_init();
	}
}

pub fn timeout_s<F: Future>(secs: u64, f: F) -> Timeout<F> {
	tokio::time::timeout(Duration::from_secs(secs), f)
}

/// Polls `check` until it returns true or `secs` elapse.
pub async fn eventually(secs: u64, mut check: impl FnMut() -> bool) -> bool {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
	loop {
		if check() {
			return true;
		}
		if tokio::time::Instant::now() >= deadline {
			return false;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}
