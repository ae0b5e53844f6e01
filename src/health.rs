//! Refresher health, as reported by [`Client::status`](crate::Client::status).
use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No snapshot has been published yet. Evaluations serve caller defaults.
    Cold,
    /// The last refresh succeeded.
    Healthy,
    /// The last refresh failed. Evaluations keep using the last good snapshot.
    Degraded,
    /// The refresher was stopped.
    Stopped,
}

/// Point-in-time view of the refresher.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub state: HealthState,
    /// When the last fetch attempt finished, successful or not.
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// When definitions were last confirmed current (published or not modified).
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<Error>,
    pub consecutive_failures: u32,
    /// Version of the currently published snapshot.
    pub snapshot_version: Option<String>,
}

impl HealthStatus {
    fn cold() -> HealthStatus {
        HealthStatus {
            state: HealthState::Cold,
            last_fetch_at: None,
            last_success_at: None,
            last_error: None,
            consecutive_failures: 0,
            snapshot_version: None,
        }
    }

    /// `true` once definitions are available for evaluation.
    pub fn is_ready(&self) -> bool {
        match self.state {
            HealthState::Healthy | HealthState::Degraded => true,
            HealthState::Cold => false,
            HealthState::Stopped => self.last_success_at.is_some(),
        }
    }
}

/// Shared between the refresher thread (writer) and the client (readers). Waiters are woken on
/// every change.
pub(crate) struct HealthTracker {
    status: Mutex<HealthStatus>,
    changed: Condvar,
}

impl HealthTracker {
    pub fn new() -> HealthTracker {
        HealthTracker {
            status: Mutex::new(HealthStatus::cold()),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HealthStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut HealthStatus)) {
        f(&mut self.lock());
        self.changed.notify_all();
    }

    pub fn status(&self) -> HealthStatus {
        self.lock().clone()
    }

    pub fn state(&self) -> HealthState {
        self.lock().state
    }

    /// A refresher (re)started. Until its first cycle completes, a restarted refresher reports
    /// the outcome of the last refresh before the stop.
    pub fn record_started(&self, has_snapshot: bool) {
        self.update(|status| {
            if status.state != HealthState::Stopped {
                return;
            }
            // A panic belongs to the old thread; keeping it would fail readiness waits.
            if matches!(status.last_error, Some(Error::RefresherPanicked)) {
                status.last_error = None;
                status.state = if has_snapshot {
                    HealthState::Degraded
                } else {
                    HealthState::Cold
                };
                return;
            }
            status.state = match (has_snapshot, &status.last_error) {
                (false, _) => HealthState::Cold,
                (true, None) => HealthState::Healthy,
                (true, Some(_)) => HealthState::Degraded,
            };
        });
    }

    /// Definitions were published or confirmed unchanged.
    pub fn record_success(&self, snapshot_version: Option<String>) {
        let now = Utc::now();
        self.update(|status| {
            if status.state != HealthState::Stopped {
                status.state = HealthState::Healthy;
            }
            status.last_fetch_at = Some(now);
            status.last_success_at = Some(now);
            status.last_error = None;
            status.consecutive_failures = 0;
            status.snapshot_version = snapshot_version;
        });
    }

    /// A fetch or publish failed. A cold refresher stays cold.
    pub fn record_failure(&self, error: Error, consecutive_failures: u32) {
        let now = Utc::now();
        self.update(|status| {
            if status.state == HealthState::Healthy {
                status.state = HealthState::Degraded;
            }
            status.last_fetch_at = Some(now);
            status.last_error = Some(error);
            status.consecutive_failures = consecutive_failures;
        });
    }

    /// The refresher loop died. Definitions will not be refreshed anymore.
    pub fn record_panic(&self) {
        self.update(|status| {
            if status.state == HealthState::Healthy {
                status.state = HealthState::Degraded;
            }
            status.last_error = Some(Error::RefresherPanicked);
        });
    }

    pub fn record_stopped(&self) {
        self.update(|status| status.state = HealthState::Stopped);
    }

    /// Block until a snapshot is available, the refresher stops, or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::RefresherPanicked`] if the refresher died before publishing.
    /// - [`Error::NotReady`] if no snapshot was published in time.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let (status, _) = self
            .changed
            .wait_timeout_while(self.lock(), timeout, |status| {
                status.state == HealthState::Cold
                    && !matches!(status.last_error, Some(Error::RefresherPanicked))
            })
            .unwrap_or_else(PoisonError::into_inner);

        if status.is_ready() {
            Ok(())
        } else if matches!(status.last_error, Some(Error::RefresherPanicked)) {
            Err(Error::RefresherPanicked)
        } else {
            Err(Error::NotReady(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{HealthState, HealthTracker};
    use crate::{DefinitionFetchError, Error};

    fn fetch_error() -> Error {
        DefinitionFetchError::Status(503).into()
    }

    #[test]
    fn starts_cold() {
        let health = HealthTracker::new();
        let status = health.status();
        assert_eq!(status.state, HealthState::Cold);
        assert!(!status.is_ready());
        assert!(status.last_fetch_at.is_none());
    }

    #[test]
    fn failure_while_cold_stays_cold() {
        let health = HealthTracker::new();
        health.record_failure(fetch_error(), 1);

        let status = health.status();
        assert_eq!(status.state, HealthState::Cold);
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_fetch_at.is_some());
        assert!(status.last_success_at.is_none());
    }

    #[test]
    fn failure_after_success_degrades_and_success_recovers() {
        let health = HealthTracker::new();
        health.record_success(Some("1".to_owned()));
        assert_eq!(health.state(), HealthState::Healthy);

        health.record_failure(fetch_error(), 1);
        health.record_failure(fetch_error(), 2);
        let status = health.status();
        assert_eq!(status.state, HealthState::Degraded);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.snapshot_version.as_deref(), Some("1"));
        assert!(status.is_ready());

        health.record_success(Some("2".to_owned()));
        let status = health.status();
        assert_eq!(status.state, HealthState::Healthy);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn stopped_is_terminal() {
        let health = HealthTracker::new();
        health.record_success(None);
        health.record_stopped();
        health.record_success(None);
        health.record_failure(fetch_error(), 1);
        assert_eq!(health.state(), HealthState::Stopped);
        assert!(health.status().is_ready());
    }

    #[test]
    fn restart_reports_last_refresh_outcome() {
        let health = HealthTracker::new();
        health.record_success(Some("1".to_owned()));
        health.record_failure(fetch_error(), 1);
        health.record_stopped();

        health.record_started(true);
        let status = health.status();
        assert_eq!(status.state, HealthState::Degraded);
        assert!(matches!(
            status.last_error,
            Some(Error::Fetch(DefinitionFetchError::Status(503)))
        ));

        health.record_success(Some("2".to_owned()));
        health.record_stopped();
        health.record_started(true);
        assert_eq!(health.state(), HealthState::Healthy);
    }

    #[test]
    fn restart_after_panic_can_become_ready() {
        let health = HealthTracker::new();
        health.record_panic();
        health.record_stopped();

        health.record_started(false);
        let status = health.status();
        assert_eq!(status.state, HealthState::Cold);
        assert!(status.last_error.is_none());
        assert!(matches!(
            health.wait_until_ready(Duration::from_millis(10)),
            Err(Error::NotReady(_))
        ));
    }

    #[test]
    fn wait_times_out_while_cold() {
        let health = HealthTracker::new();
        let result = health.wait_until_ready(Duration::from_millis(20));
        assert!(matches!(result, Err(Error::NotReady(_))));
    }

    #[test]
    fn wait_returns_when_ready() {
        let health = Arc::new(HealthTracker::new());
        {
            let health = health.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                health.record_success(None);
            });
        }
        assert!(health.wait_until_ready(Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn wait_fails_fast_after_panic() {
        let health = HealthTracker::new();
        health.record_panic();
        let result = health.wait_until_ready(Duration::from_secs(10));
        assert!(matches!(result, Err(Error::RefresherPanicked)));
    }
}
