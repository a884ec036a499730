use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A monitoring station as published in the provider's station list.
///
/// `x`/`y` address a pixel in the realtime raster; `(0, 0)` means the station
/// is not drawn on that raster.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Station {
    pub code: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub x: u32,
    pub y: u32,
}

impl Station {
    pub fn is_mapped(&self) -> bool {
        !(self.x == 0 && self.y == 0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StationCatalog {
    pub stations: Vec<Station>,
}

impl StationCatalog {
    pub fn new(stations: Vec<Station>) -> Self {
        Self { stations }
    }

    /// Stations that have a pixel on the raster.
    pub fn mapped(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter().filter(|s| s.is_mapped())
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

/// Surface and borehole catalogs, selected by [`StationSource`].
#[derive(Debug, Clone, Default)]
pub struct StationCatalogs {
    pub surface: StationCatalog,
    pub borehole: StationCatalog,
}

impl StationCatalogs {
    pub fn for_source(&self, source: StationSource) -> &StationCatalog {
        match source {
            StationSource::Surface => &self.surface,
            StationSource::Borehole => &self.borehole,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} {value:?}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// Raster product drawn by the provider for each timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum IntensityType {
    Jma,
    Acmap,
    Vcmap,
    Dcmap,
    Rsp0125,
    Rsp0250,
    Rsp0500,
    Rsp1000,
    Rsp2000,
    Rsp4000,
}

impl IntensityType {
    pub const ALL: [IntensityType; 10] = [
        IntensityType::Jma,
        IntensityType::Acmap,
        IntensityType::Vcmap,
        IntensityType::Dcmap,
        IntensityType::Rsp0125,
        IntensityType::Rsp0250,
        IntensityType::Rsp0500,
        IntensityType::Rsp1000,
        IntensityType::Rsp2000,
        IntensityType::Rsp4000,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IntensityType::Jma => "jma",
            IntensityType::Acmap => "acmap",
            IntensityType::Vcmap => "vcmap",
            IntensityType::Dcmap => "dcmap",
            IntensityType::Rsp0125 => "rsp0125",
            IntensityType::Rsp0250 => "rsp0250",
            IntensityType::Rsp0500 => "rsp0500",
            IntensityType::Rsp1000 => "rsp1000",
            IntensityType::Rsp2000 => "rsp2000",
            IntensityType::Rsp4000 => "rsp4000",
        }
    }
}

impl FromStr for IntensityType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownVariant { kind: "intensity type", value: s.to_string() })
    }
}

impl TryFrom<String> for IntensityType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IntensityType> for String {
    fn from(value: IntensityType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for IntensityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which station network a raster is drawn for: `s` (surface) or `b` (borehole).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum StationSource {
    Surface,
    Borehole,
}

impl StationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            StationSource::Surface => "s",
            StationSource::Borehole => "b",
        }
    }
}

impl FromStr for StationSource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s" => Ok(StationSource::Surface),
            "b" => Ok(StationSource::Borehole),
            other => Err(UnknownVariant { kind: "station source", value: other.to_string() }),
        }
    }
}

impl TryFrom<String> for StationSource {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StationSource> for String {
    fn from(value: StationSource) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for StationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Init,
    Syncing,
    Live,
    Error,
}
