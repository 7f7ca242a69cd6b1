use std::time::Duration;

use async_trait::async_trait;

/// Which round timer fired, fed back into the voter as a
/// [`crate::voter::Input::TimerFired`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerKind {
	Prevote,
	Precommit,
	/// The liveness check.
	Liveness,
}

/// A small port over `tokio::time`: substituting a scripted clock for real
/// wall-clock delays is what makes the round and liveness timers
/// deterministically testable.
#[async_trait]
pub trait Clock: Send + Sync {
	async fn delay(&self, duration: Duration);
}

/// The production clock: a thin wrapper over `tokio::time::sleep`.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
	async fn delay(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}
}
