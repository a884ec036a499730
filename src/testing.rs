//! In-memory collaborators shared by the unit tests.

use crate::clock::{format_display, TimeKey};
use crate::region::BoundarySource;
use crate::types::{IntensityType, Station, StationCatalog, StationCatalogs, StationSource};
use crate::upstream::{LatestTime, Upstream, UpstreamError};
use chrono::{NaiveDate, NaiveDateTime};
use geojson::FeatureCollection;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, s)
        .unwrap()
}

pub fn catalogs() -> StationCatalogs {
    let surface = StationCatalog::new(vec![
        Station {
            code: "TKY001".into(),
            name: "Chiyoda".into(),
            lat: 35.69,
            lon: 139.75,
            x: 2,
            y: 2,
        },
        Station {
            code: "NONE01".into(),
            name: "Unmapped".into(),
            lat: 34.0,
            lon: 135.0,
            x: 0,
            y: 0,
        },
    ]);
    StationCatalogs { surface, borehole: StationCatalog::default() }
}

/// A 4x4 PNG with a single opaque orange pixel under `TKY001`.
pub fn opaque_png() -> Vec<u8> {
    let mut image = RgbaImage::new(4, 4);
    image.put_pixel(2, 2, Rgba([0xff, 0x80, 0x00, 0xff]));
    image.put_pixel(0, 0, Rgba([0x00, 0x00, 0xff, 0xff]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

fn unavailable(what: &str) -> UpstreamError {
    UpstreamError::Status {
        url: format!("mock://{}", what),
        status: StatusCode::BAD_GATEWAY,
    }
}

#[derive(Debug, Clone)]
pub enum RasterReply {
    Image(Vec<u8>),
    NotFound,
    Fail,
}

pub struct MockUpstream {
    latest: Mutex<Option<NaiveDateTime>>,
    raster: Mutex<RasterReply>,
    eew_keys: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
    pub eew_ok: AtomicBool,
    pub latest_calls: AtomicUsize,
}

impl MockUpstream {
    /// `None` makes the latest-time endpoint fail.
    pub fn new(latest: Option<NaiveDateTime>) -> Self {
        Self {
            latest: Mutex::new(latest),
            raster: Mutex::new(RasterReply::NotFound),
            eew_keys: Mutex::new(Vec::new()),
            gate: None,
            eew_ok: AtomicBool::new(true),
            latest_calls: AtomicUsize::new(0),
        }
    }

    /// EEW requests wait on [`MockUpstream::gate`] before answering.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    pub fn gate(&self) -> Arc<Notify> {
        Arc::clone(self.gate.as_ref().expect("upstream is not gated"))
    }

    pub fn set_latest(&self, latest: Option<NaiveDateTime>) {
        *self.latest.lock().unwrap() = latest;
    }

    pub fn set_raster(&self, reply: RasterReply) {
        *self.raster.lock().unwrap() = reply;
    }

    pub fn eew_keys(&self) -> Vec<String> {
        self.eew_keys.lock().unwrap().clone()
    }
}

impl Upstream for MockUpstream {
    async fn latest_time(&self) -> Result<LatestTime, UpstreamError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        let latest = *self.latest.lock().unwrap();
        latest
            .map(|time| LatestTime { time, raw: format_display(&time) })
            .ok_or_else(|| unavailable("latest"))
    }

    async fn eew(&self, key: &TimeKey) -> Result<Value, UpstreamError> {
        self.eew_keys.lock().unwrap().push(key.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.eew_ok.load(Ordering::SeqCst) {
            Ok(json!({ "request_time": key.as_str(), "result": { "message": "" } }))
        } else {
            Err(unavailable("eew"))
        }
    }

    async fn raster(
        &self,
        _key: &TimeKey,
        _kind: IntensityType,
        _source: StationSource,
    ) -> Result<Option<Vec<u8>>, UpstreamError> {
        let reply = self.raster.lock().unwrap().clone();
        match reply {
            RasterReply::Image(bytes) => Ok(Some(bytes)),
            RasterReply::NotFound => Ok(None),
            RasterReply::Fail => Err(unavailable("raster")),
        }
    }
}

/// Boundary source that always yields the same collection.
pub struct StaticBoundaries(pub FeatureCollection);

impl BoundarySource for StaticBoundaries {
    async fn load(&self) -> anyhow::Result<FeatureCollection> {
        Ok(self.0.clone())
    }
}

pub fn two_squares() -> FeatureCollection {
    serde_json::from_value(json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "name": "West" },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "name": "East" },
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [[[[5.0, 0.0], [6.0, 0.0], [6.0, 1.0], [5.0, 1.0], [5.0, 0.0]]]]
                }
            }
        ]
    }))
    .unwrap()
}
