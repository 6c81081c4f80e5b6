use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigStore, TracingConfig};
use crate::pipeline::ExporterPipeline;
use crate::span_tree;

/// Poll interval while the loop is alive but not generating.
const IDLE_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Shared {
    enabled: AtomicBool,
    traces_emitted: AtomicU64,
    pipeline_builds: AtomicU64,
}

/// Counters surfaced on the status endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpammerStats {
    pub traces_emitted: u64,
    pub pipeline_builds: u64,
}

/// What ended a pacing or idle wait.
enum Wake {
    Cancelled,
    ConfigChanged,
    Tick,
}

/// The scheduling loop and its control handle.
///
/// `TraceSpammer` is a cheap clone over shared state: any clone can toggle
/// [`start`]/[`stop`] or read [`stats`], while exactly one caller drives
/// [`run`], which owns the current exporter pipeline for its whole lifetime.
///
/// The loop moves through three states: idle until `run` has attempted its
/// first pipeline build; armed while alive but disabled (or without a usable
/// pipeline), polling every 500ms; running while enabled, emitting one root
/// trace per tick and pacing at `1 / rate_per_second`, recomputed from each
/// tick's snapshot so a rate change takes effect on the next tick. A
/// configuration change in any state triggers exactly one pipeline rebuild
/// and leaves the enabled flag untouched.
///
/// [`start`]: TraceSpammer::start
/// [`stop`]: TraceSpammer::stop
/// [`stats`]: TraceSpammer::stats
/// [`run`]: TraceSpammer::run
#[derive(Clone)]
pub struct TraceSpammer {
    store: Arc<ConfigStore>,
    shared: Arc<Shared>,
}

impl TraceSpammer {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            store,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.store
    }

    /// Enable generation. No-op when already running.
    pub fn start(&self) {
        self.shared.enabled.store(true, Ordering::SeqCst);
    }

    /// Disable generation. Takes effect before the next root span, even
    /// inside a burst.
    pub fn stop(&self) {
        self.shared.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SpammerStats {
        SpammerStats {
            traces_emitted: self.shared.traces_emitted.load(Ordering::Relaxed),
            pipeline_builds: self.shared.pipeline_builds.load(Ordering::Relaxed),
        }
    }

    /// Drive the loop until `cancel` fires.
    ///
    /// Cancellation is observed at the top of every tick and at every
    /// suspension point (pacing sleep, idle poll, simulated span waits), so
    /// the loop terminates within one wait's latency. The current pipeline
    /// is disposed on the way out.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut config_rx = self.store.subscribe();
        let initial = config_rx.borrow_and_update().clone();
        let mut pipeline = self.build_pipeline(&initial);
        let mut rebuild_pending = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if rebuild_pending || config_rx.has_changed().unwrap_or(false) {
                rebuild_pending = false;
                let snapshot = config_rx.borrow_and_update().clone();
                if let Some(rebuilt) = self.build_pipeline(&snapshot) {
                    if let Some(old) = pipeline.replace(rebuilt) {
                        old.shutdown();
                    }
                }
                // On failure the previous pipeline, if any, stays current.
            }

            // One consistent snapshot per tick; a mid-tick mutation is
            // picked up on the next iteration.
            let config = config_rx.borrow().clone();

            let wake = match &pipeline {
                Some(pipeline) if self.is_running() && config.rate_per_second >= 1 => {
                    span_tree::emit_trace(pipeline.tracer(), &config, &cancel).await;
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.shared.traces_emitted.fetch_add(1, Ordering::Relaxed);
                    let pause = Duration::from_secs_f64(1.0 / f64::from(config.rate_per_second));
                    self.wait(pause, &cancel, &mut config_rx).await
                }
                _ => self.wait(IDLE_POLL, &cancel, &mut config_rx).await,
            };

            match wake {
                Wake::Cancelled => break,
                Wake::ConfigChanged => rebuild_pending = true,
                Wake::Tick => {}
            }
        }

        if let Some(pipeline) = pipeline.take() {
            pipeline.shutdown();
        }
        tracing::debug!("spammer loop stopped");
    }

    fn build_pipeline(&self, config: &TracingConfig) -> Option<ExporterPipeline> {
        match ExporterPipeline::build(config) {
            Ok(pipeline) => {
                self.shared.pipeline_builds.fetch_add(1, Ordering::Relaxed);
                Some(pipeline)
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    endpoint = %config.endpoint,
                    "failed to build exporter pipeline"
                );
                None
            }
        }
    }

    /// Sleep for `pause`, waking early on cancellation or a configuration
    /// change.
    async fn wait(
        &self,
        pause: Duration,
        cancel: &CancellationToken,
        config_rx: &mut watch::Receiver<TracingConfig>,
    ) -> Wake {
        tokio::select! {
            _ = cancel.cancelled() => Wake::Cancelled,
            changed = config_rx.changed() => {
                if changed.is_ok() { Wake::ConfigChanged } else { Wake::Tick }
            }
            _ = tokio::time::sleep(pause) => Wake::Tick,
        }
    }
}
