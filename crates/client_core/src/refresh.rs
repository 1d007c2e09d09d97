//! Single-flight guard for token refreshes.
//!
//! The refresh that is currently running is itself the guard: callers that
//! arrive while it runs await the same future instead of issuing another
//! request, and the guard is released as soon as that future settles. A
//! successful refresh additionally opens a cooldown window during which new
//! refreshes are skipped.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::info;

pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome<T> {
    /// This call issued the refresh.
    Refreshed(T),
    /// Another refresh was running; this call waited for its result.
    Joined(T),
    /// A refresh succeeded recently enough that no new one was issued.
    Skipped,
}

impl<T> RefreshOutcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            RefreshOutcome::Refreshed(value) | RefreshOutcome::Joined(value) => Some(value),
            RefreshOutcome::Skipped => None,
        }
    }
}

type InFlight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct GuardState<T, E> {
    generation: u64,
    in_flight: Option<(u64, InFlight<T, E>)>,
    last_success: Option<Instant>,
}

pub struct RefreshCoordinator<T, E> {
    cooldown: Duration,
    state: Arc<Mutex<GuardState<T, E>>>,
}

impl<T, E> RefreshCoordinator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: Arc::new(Mutex::new(GuardState {
                generation: 0,
                in_flight: None,
                last_success: None,
            })),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn is_in_progress(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    /// Run `start` unless a refresh is already in flight (join it) or one
    /// succeeded within the cooldown (skip). `start` is only called when a new
    /// refresh is actually issued.
    pub async fn run<F, Fut>(&self, start: F) -> Result<RefreshOutcome<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (generation, refresh, joined) = {
            let mut state = self.lock();
            if let Some((generation, refresh)) = &state.in_flight {
                info!("token refresh already in progress");
                (*generation, refresh.clone(), true)
            } else if state
                .last_success
                .is_some_and(|at| at.elapsed() < self.cooldown)
            {
                info!(
                    cooldown_secs = self.cooldown.as_secs(),
                    "token refresh skipped: cooldown active"
                );
                return Ok(RefreshOutcome::Skipped);
            } else {
                state.generation += 1;
                let generation = state.generation;
                let refresh = start().boxed().shared();
                state.in_flight = Some((generation, refresh.clone()));

                // driven to completion even if every caller goes away, so the
                // guard is always released
                let guard = Arc::clone(&self.state);
                let driver = refresh.clone();
                tokio::spawn(async move {
                    let result = driver.await;
                    settle(&guard, generation, result.is_ok());
                });
                (generation, refresh, false)
            }
        };

        let result = refresh.await;
        settle(&self.state, generation, result.is_ok());

        let value = result?;
        Ok(if joined {
            RefreshOutcome::Joined(value)
        } else {
            RefreshOutcome::Refreshed(value)
        })
    }

    fn lock(&self) -> MutexGuard<'_, GuardState<T, E>> {
        lock(&self.state)
    }
}

fn lock<T, E>(state: &Mutex<GuardState<T, E>>) -> MutexGuard<'_, GuardState<T, E>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Release the guard held by `generation`; a newer refresh is left alone.
fn settle<T, E>(state: &Mutex<GuardState<T, E>>, generation: u64, succeeded: bool) {
    let mut state = lock(state);
    let current = matches!(&state.in_flight, Some((running, _)) if *running == generation);
    if !current {
        return;
    }
    state.in_flight = None;
    if succeeded {
        state.last_success = Some(Instant::now());
    }
}

#[cfg(test)]
#[path = "tests/refresh_tests.rs"]
mod tests;
