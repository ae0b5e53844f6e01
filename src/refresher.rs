//! A background refresher thread that periodically requests flag definitions from a
//! [`DefinitionSource`] and publishes them to a [`DefinitionCache`].
use std::{sync::Arc, thread::JoinHandle, time::Duration};

use tokio::sync::{watch, Notify};

use crate::{
    backoff::Backoff,
    config::RefresherConfig,
    health::HealthTracker,
    source::{DefinitionSource, FetchOutcome},
    DefinitionCache, DefinitionFetchError, Error, Result, Snapshot,
};

/// A definition refresher thread.
///
/// The thread drives a single-threaded tokio runtime. Each cycle fetches definitions (bounded by
/// [`RefresherConfig::fetch_timeout`]), publishes them on success, and sleeps until the next
/// cycle, [`Refresher::refresh_now`], or a stop command, whichever comes first.
pub struct Refresher {
    join_handle: JoinHandle<()>,

    /// Holds the grace period once a stop was requested.
    stop_sender: watch::Sender<Option<Duration>>,

    wake: Arc<Notify>,
}

impl Refresher {
    /// Starts the refresher thread.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the thread failed to start.
    pub(crate) fn start<S: DefinitionSource>(
        source: S,
        cache: Arc<DefinitionCache>,
        health: Arc<HealthTracker>,
        config: RefresherConfig,
    ) -> std::io::Result<Refresher> {
        let (stop_sender, stop_receiver) = watch::channel(None);
        let wake = Arc::new(Notify::new());

        health.record_started(cache.has_published());

        let join_handle = {
            let refresh_loop = RefreshLoop {
                source,
                backoff: Backoff::new(&config),
                config,
                cache,
                health: Arc::clone(&health),
                stop: stop_receiver,
                wake: Arc::clone(&wake),
            };
            let health = Arc::clone(&health);

            std::thread::Builder::new()
                .name("feature-flags-refresher".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        let runtime = match tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                        {
                            Ok(runtime) => runtime,
                            Err(err) => {
                                log::warn!(target: "feature_flags",
                                           "failed to start refresher runtime: {err}");
                                health.record_failure(Error::from(err), 0);
                                return;
                            }
                        };

                        runtime.block_on(refresh_loop.run());
                    }));

                    // If catch_unwind returns Err, it means a panic occurred.
                    if let Err(_panic_info) = result {
                        log::warn!(target: "feature_flags", "refresher thread panicked");
                        health.record_panic();
                    }
                    health.record_stopped();
                })?
        };

        Ok(Refresher {
            join_handle,
            stop_sender,
            wake,
        })
    }

    /// Trigger a refresh cycle without waiting for the current interval to elapse.
    pub fn refresh_now(&self) {
        self.wake.notify_one();
    }

    /// Stop the refresher thread.
    ///
    /// A fetch in flight is given up to `grace` to complete; its result is published if it does.
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self, grace: Duration) {
        // Only the first stop command counts.
        self.stop_sender.send_if_modified(|stop| {
            if stop.is_none() {
                *stop = Some(grace);
                true
            } else {
                false
            }
        });
    }

    /// Stop the refresher thread and block waiting for it to exit.
    ///
    /// # Errors
    ///
    /// - [`Error::RefresherPanicked`] if the thread has panicked.
    pub fn shutdown(self, grace: Duration) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop(grace);

        self.join_handle
            .join()
            .map_err(|_| Error::RefresherPanicked)?;

        Ok(())
    }
}

struct RefreshLoop<S> {
    source: S,
    cache: Arc<DefinitionCache>,
    health: Arc<HealthTracker>,
    config: RefresherConfig,
    backoff: Backoff,
    stop: watch::Receiver<Option<Duration>>,
    wake: Arc<Notify>,
}

impl<S: DefinitionSource> RefreshLoop<S> {
    async fn run(self) {
        let RefreshLoop {
            mut source,
            cache,
            health,
            config,
            mut backoff,
            mut stop,
            wake,
        } = self;

        loop {
            let version = cache.current().version().map(str::to_owned);
            let mut fetch = std::pin::pin!(fetch_with_timeout(
                &mut source,
                version.as_deref(),
                config.fetch_timeout
            ));

            let result = tokio::select! {
                result = &mut fetch => result,
                grace = stop_requested(&mut stop) => {
                    match tokio::time::timeout(grace, fetch).await {
                        Ok(result) => apply(result, &cache, &health, &mut backoff),
                        Err(_) => {
                            log::debug!(target: "feature_flags",
                                        "dropping in-flight fetch on stop");
                        }
                    }
                    log::debug!(target: "feature_flags", "refresher received stop command");
                    return;
                }
            };
            apply(result, &cache, &health, &mut backoff);

            let delay = backoff.next_delay();
            log::debug!(target: "feature_flags",
                        delay_ms = delay.as_millis() as u64;
                        "next refresh scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wake.notified() => {
                    log::debug!(target: "feature_flags", "refresh requested");
                }
                _ = stop_requested(&mut stop) => {
                    log::debug!(target: "feature_flags", "refresher received stop command");
                    return;
                }
            }
        }
    }
}

/// Resolves with the grace period once a stop is requested. Dropping the sender counts as a stop
/// with no grace.
async fn stop_requested(stop: &mut watch::Receiver<Option<Duration>>) -> Duration {
    loop {
        if let Some(grace) = *stop.borrow_and_update() {
            return grace;
        }
        if stop.changed().await.is_err() {
            return Duration::ZERO;
        }
    }
}

async fn fetch_with_timeout<S: DefinitionSource>(
    source: &mut S,
    version: Option<&str>,
    timeout: Duration,
) -> Result<FetchOutcome> {
    tokio::time::timeout(timeout, source.fetch(version))
        .await
        .unwrap_or_else(|_| Err(DefinitionFetchError::Timeout(timeout).into()))
}

/// Publish a fetch result and update health and backoff.
fn apply(
    result: Result<FetchOutcome>,
    cache: &DefinitionCache,
    health: &HealthTracker,
    backoff: &mut Backoff,
) {
    let published = result.and_then(|outcome| match outcome {
        FetchOutcome::Updated {
            definitions,
            version,
        } => {
            let snapshot = Snapshot::from_definitions(definitions, version);
            let version = snapshot.version().map(str::to_owned);
            let flags = snapshot.len();
            cache.publish(snapshot)?;
            log::debug!(target: "feature_flags",
                        flags,
                        version:? = version;
                        "published new flag definitions");
            Ok(version)
        }
        FetchOutcome::NotModified => Ok(cache.current().version().map(str::to_owned)),
    });

    match published {
        Ok(version) => {
            backoff.reset();
            health.record_success(version);
        }
        Err(err) => {
            let failures = backoff.record_failure();
            log::warn!(target: "feature_flags",
                       consecutive_failures = failures;
                       "failed to refresh flag definitions: {err}");
            health.record_failure(err, failures);
        }
    }
}
