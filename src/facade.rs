use crate::monitor::{MonitorError, MonitorSnapshot, PollScheduler};
use crate::region::{BoundarySource, RegionError, RegionIndex};
use crate::types::ConnectionStatus;
use crate::upstream::Upstream;
use geojson::{Feature, FeatureCollection};
use serde_json::Value;
use std::sync::{PoisonError, RwLock};

/// Entry point for the map/UI side: live acquisition state plus the
/// currently highlighted region.
pub struct AcquisitionFacade<U, B> {
    scheduler: PollScheduler<U>,
    regions: RegionIndex<B>,
    selection: RwLock<Option<Feature>>,
}

impl<U: Upstream, B: BoundarySource> AcquisitionFacade<U, B> {
    pub fn new(scheduler: PollScheduler<U>, regions: RegionIndex<B>) -> Self {
        Self { scheduler, regions, selection: RwLock::new(None) }
    }

    pub async fn init(&self) -> Result<(), MonitorError> {
        self.scheduler.init().await
    }

    pub async fn manual_resync(&self) -> Result<(), MonitorError> {
        self.scheduler.manual_resync().await
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.scheduler.snapshot()
    }

    pub fn eew(&self) -> Option<Value> {
        self.snapshot().eew
    }

    pub fn points(&self) -> Option<FeatureCollection> {
        self.snapshot().points
    }

    pub fn display_time(&self) -> String {
        self.snapshot().display_time
    }

    pub fn status(&self) -> ConnectionStatus {
        self.scheduler.status()
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshot().last_error
    }

    pub fn scheduler(&self) -> &PollScheduler<U> {
        &self.scheduler
    }

    /// Resolve a location event. A hit replaces the highlighted region; a
    /// miss leaves the previous one in place.
    pub async fn highlight(&self, lng: f64, lat: f64) -> Result<Option<Feature>, RegionError> {
        let found = self.regions.resolve(lng, lat).await?;
        if let Some(feature) = &found {
            *self.selection.write().unwrap_or_else(PoisonError::into_inner) = Some(feature.clone());
        }
        Ok(found)
    }

    pub fn selected_region(&self) -> Option<Feature> {
        self.selection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorOptions;
    use crate::testing::{at, catalogs, two_squares, MockUpstream, StaticBoundaries};
    use crate::types::{IntensityType, StationSource};
    use std::sync::Arc;
    use std::time::Duration;

    fn facade(latest: Option<chrono::NaiveDateTime>) -> AcquisitionFacade<MockUpstream, StaticBoundaries> {
        let scheduler = PollScheduler::new(
            Arc::new(MockUpstream::new(latest)),
            Arc::new(catalogs()),
            MonitorOptions {
                intensity: IntensityType::Jma,
                source: StationSource::Surface,
                interval: Duration::from_secs(3600),
            },
        );
        AcquisitionFacade::new(scheduler, RegionIndex::new(StaticBoundaries(two_squares())))
    }

    fn selected_name<U: Upstream, B: BoundarySource>(facade: &AcquisitionFacade<U, B>) -> Option<String> {
        facade
            .selected_region()?
            .property("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn fresh_facade_is_empty() {
        let facade = facade(None);
        assert_eq!(facade.status(), ConnectionStatus::Init);
        assert_eq!(facade.display_time(), "");
        assert!(facade.eew().is_none());
        assert!(facade.points().is_none());
        assert!(facade.last_error().is_none());
        assert!(facade.selected_region().is_none());
    }

    #[tokio::test]
    async fn lifecycle_passes_through_to_the_scheduler() {
        let facade = facade(Some(at(2025, 7, 15, 3, 4, 5)));
        facade.init().await.unwrap();
        assert_eq!(facade.display_time(), "2025/07/15 03:04:05");
        assert!(facade.scheduler().is_running());

        facade.stop();
        facade.stop();
        assert!(!facade.scheduler().is_running());
    }

    #[tokio::test]
    async fn sync_failure_is_visible_through_the_facade() {
        let facade = facade(None);
        assert!(facade.init().await.is_err());
        assert_eq!(facade.status(), ConnectionStatus::Error);
        assert_eq!(facade.last_error().as_deref(), Some("Sync Failed"));
    }

    #[tokio::test]
    async fn highlight_replaces_selection_only_on_hit() {
        let facade = facade(None);

        facade.highlight(0.5, 0.5).await.unwrap();
        assert_eq!(selected_name(&facade).as_deref(), Some("West"));

        assert!(facade.highlight(3.0, 0.5).await.unwrap().is_none());
        assert_eq!(selected_name(&facade).as_deref(), Some("West"));

        facade.highlight(5.5, 0.5).await.unwrap();
        assert_eq!(selected_name(&facade).as_deref(), Some("East"));
    }
}
