//! Live acquisition loop.
//!
//! A [`PollScheduler`] anchors its [`SimulatedClock`] to the provider's
//! latest time, then once per tick advances the clock by one second and
//! fetches the EEW record and the intensity raster for the new key in
//! parallel. Each fetch settles independently: EEW drives the connection
//! status, the raster only replaces the point collection.
//!
//! Every start or stop bumps an epoch counter. A loop or tick holding an
//! older epoch is cancelled: it exits on its next wake-up and never commits
//! results.

use crate::clock::{SimulatedClock, TimeKey};
use crate::config::MonitorConfig;
use crate::sampler::{self, DecodeError};
use crate::types::{ConnectionStatus, IntensityType, StationCatalogs, StationSource};
use crate::upstream::{Upstream, UpstreamError};
use geojson::FeatureCollection;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const SYNC_FAILED: &str = "Sync Failed";
pub const CONNECTION_LOST: &str = "Connection Lost";

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to sync with the provider's latest time")]
    Sync(#[source] UpstreamError),
    #[error("sync was cancelled before it completed")]
    Cancelled,
}

/// Why a tick produced no new point collection.
#[derive(Debug, Error)]
pub enum PointsError {
    #[error(transparent)]
    Fetch(#[from] UpstreamError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("raster decode task failed: {0}")]
    Join(#[from] JoinError),
}

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub intensity: IntensityType,
    pub source: StationSource,
    pub interval: Duration,
}

impl From<&MonitorConfig> for MonitorOptions {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            intensity: config.intensity,
            source: config.source,
            interval: config.tick_interval(),
        }
    }
}

/// What the map/UI side reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub eew: Option<Value>,
    pub points: Option<FeatureCollection>,
    pub display_time: String,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct MonitorState {
    clock: SimulatedClock,
    status: ConnectionStatus,
    last_error: Option<String>,
    eew: Option<Value>,
    points: Option<FeatureCollection>,
    epoch: u64,
    running: bool,
}

impl MonitorState {
    fn begin_sync(&mut self) -> u64 {
        self.status = ConnectionStatus::Syncing;
        self.running = false;
        self.epoch += 1;
        self.epoch
    }

    fn apply_eew(&mut self, outcome: Result<Value, UpstreamError>) {
        match outcome {
            Ok(payload) => {
                self.eew = Some(payload);
                self.status = ConnectionStatus::Live;
                self.last_error = None;
            }
            Err(e) => {
                warn!("EEW fetch failed: {}", e);
                self.status = ConnectionStatus::Error;
                self.last_error = Some(CONNECTION_LOST.to_string());
            }
        }
    }

    fn apply_points(&mut self, outcome: Result<FeatureCollection, PointsError>) {
        match outcome {
            Ok(collection) => self.points = Some(collection),
            Err(e) => warn!("Keeping previous points: {}", e),
        }
    }

    fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            eew: self.eew.clone(),
            points: self.points.clone(),
            display_time: self.clock.display(),
            status: self.status,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickFlow {
    Continue,
    Stop,
}

pub(crate) struct TickContext<U> {
    upstream: Arc<U>,
    catalogs: Arc<StationCatalogs>,
    options: MonitorOptions,
    state: Arc<Mutex<MonitorState>>,
}

impl<U> Clone for TickContext<U> {
    fn clone(&self) -> Self {
        Self {
            upstream: Arc::clone(&self.upstream),
            catalogs: Arc::clone(&self.catalogs),
            options: self.options.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<U> TickContext<U> {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<U: Upstream> TickContext<U> {
    async fn run(self, epoch: u64) {
        let period = self.options.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.tick(epoch).await == TickFlow::Stop {
                break;
            }
            // Next tick is a full period after this one settled, never a catch-up.
            ticker.reset();
        }
        debug!(epoch, "Poll loop exited");
    }

    pub(crate) async fn tick(&self, epoch: u64) -> TickFlow {
        let key = {
            let mut state = self.lock();
            if state.epoch != epoch {
                return TickFlow::Stop;
            }
            match state.clock.advance() {
                Ok(now) => TimeKey::from_datetime(&now),
                Err(e) => {
                    warn!("Skipping tick: {}", e);
                    return TickFlow::Continue;
                }
            }
        };
        debug!(key = %key, "Tick");

        let (eew, points) = tokio::join!(self.upstream.eew(&key), self.fetch_points(&key));

        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(key = %key, "Discarding results of a cancelled tick");
            return TickFlow::Stop;
        }
        state.apply_eew(eew);
        state.apply_points(points);
        TickFlow::Continue
    }

    /// Raster for `key` as points. A raster the provider has not published
    /// is an empty collection; fetch and decode failures are errors.
    async fn fetch_points(&self, key: &TimeKey) -> Result<FeatureCollection, PointsError> {
        let MonitorOptions { intensity, source, .. } = self.options;
        let Some(bytes) = self.upstream.raster(key, intensity, source).await? else {
            debug!(key = %key, "No raster published yet");
            return Ok(sampler::empty_collection());
        };

        let catalogs = Arc::clone(&self.catalogs);
        let collection = tokio::task::spawn_blocking(move || {
            sampler::sample(&bytes, catalogs.for_source(source))
        })
        .await??;
        Ok(collection)
    }
}

/// One acquisition session. Owns its clock, status and last-known payloads.
pub struct PollScheduler<U> {
    ctx: TickContext<U>,
}

impl<U: Upstream> PollScheduler<U> {
    pub fn new(upstream: Arc<U>, catalogs: Arc<StationCatalogs>, options: MonitorOptions) -> Self {
        Self {
            ctx: TickContext {
                upstream,
                catalogs,
                options,
                state: Arc::new(Mutex::new(MonitorState::default())),
            },
        }
    }

    pub async fn init(&self) -> Result<(), MonitorError> {
        let epoch = self.ctx.lock().begin_sync();
        self.sync_and_start(epoch).await
    }

    /// Re-anchor the clock and restart the loop. Ignored while a sync is
    /// already underway.
    pub async fn manual_resync(&self) -> Result<(), MonitorError> {
        let epoch = {
            let mut state = self.ctx.lock();
            if state.status == ConnectionStatus::Syncing {
                debug!("Resync requested while syncing; ignored");
                return Ok(());
            }
            state.begin_sync()
        };
        self.sync_and_start(epoch).await
    }

    pub fn stop(&self) {
        let mut state = self.ctx.lock();
        if !state.running && state.status != ConnectionStatus::Syncing {
            return;
        }
        state.epoch += 1;
        state.running = false;
        if state.status == ConnectionStatus::Syncing {
            state.status = ConnectionStatus::Init;
        }
        info!("Poll loop stopped");
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.ctx.lock().snapshot()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.ctx.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.ctx.lock().running
    }

    async fn sync_and_start(&self, epoch: u64) -> Result<(), MonitorError> {
        let outcome = self.ctx.upstream.latest_time().await;

        let mut state = self.ctx.lock();
        if state.epoch != epoch {
            debug!("Discarding sync result of a cancelled session");
            return Err(MonitorError::Cancelled);
        }

        match outcome {
            Ok(latest) => {
                state.clock.sync(latest.time);
                state.last_error = None;
                state.running = true;
                drop(state);

                info!("Synced time to {}", latest.raw);
                tokio::spawn(self.ctx.clone().run(epoch));
                Ok(())
            }
            Err(e) => {
                error!("Failed to sync latest time: {}", e);
                state.status = ConnectionStatus::Error;
                state.last_error = Some(SYNC_FAILED.to_string());
                Err(MonitorError::Sync(e))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> TickContext<U> {
        self.ctx.clone()
    }

    #[cfg(test)]
    pub(crate) fn epoch(&self) -> u64 {
        self.ctx.lock().epoch
    }

    #[cfg(test)]
    pub(crate) async fn tick_now(&self) -> TickFlow {
        let epoch = self.epoch();
        self.ctx.tick(epoch).await
    }

    #[cfg(test)]
    fn force_status(&self, status: ConnectionStatus) {
        self.ctx.lock().status = status;
    }
}

impl<U> Drop for PollScheduler<U> {
    fn drop(&mut self) {
        let mut state = self.ctx.lock();
        state.epoch += 1;
        state.running = false;
    }
}
