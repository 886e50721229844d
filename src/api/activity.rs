use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::watch;
use tracing::info;

use crate::api::server::AppState;

pub const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// In-flight request count plus the time of the last request seen.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    inner: Arc<ActivityInner>,
}

#[derive(Debug)]
struct ActivityInner {
    in_flight: AtomicUsize,
    last_activity: Mutex<Instant>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                in_flight: AtomicUsize::new(0),
                last_activity: Mutex::new(Instant::now()),
            }),
        }
    }
}

impl ActivityTracker {
    pub fn begin(&self) -> ActivityGuard {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        ActivityGuard {
            tracker: self.clone(),
        }
    }

    pub fn touch(&self) {
        *self
            .inner
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn idle_for(&self) -> Duration {
        self.inner
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.in_flight() == 0 && self.idle_for() >= timeout
    }
}

pub struct ActivityGuard {
    tracker: ActivityTracker,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let _ = self
            .tracker
            .inner
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_sub(1))
            });
    }
}

/// One-shot shutdown latch shared by the server, the `/shutdown` route and
/// the inactivity watchdog.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl ShutdownSignal {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

pub async fn track_activity(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = state.activity.begin();
    let response = next.run(request).await;
    state.activity.touch();
    response
}

/// Polls every [`WATCHDOG_POLL_INTERVAL`] and fires `shutdown` once nothing
/// is in flight and the last request is older than `timeout`.
pub async fn run_inactivity_watchdog(
    activity: ActivityTracker,
    timeout: Duration,
    shutdown: ShutdownSignal,
) {
    run_watchdog_with_interval(activity, timeout, shutdown, WATCHDOG_POLL_INTERVAL).await;
}

async fn run_watchdog_with_interval(
    activity: ActivityTracker,
    timeout: Duration,
    shutdown: ShutdownSignal,
    poll: Duration,
) {
    let mut ticker = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = shutdown.wait() => return,
            _ = ticker.tick() => {
                if activity.is_idle(timeout) {
                    info!(
                        idle_secs = activity.idle_for().as_secs(),
                        "no activity within the idle timeout; shutting down"
                    );
                    shutdown.trigger();
                    return;
                }
            }
        }
    }
}
