use crate::config::AppConfig;
use crate::types::{Station, StationCatalog, StationCatalogs};
use anyhow::{anyhow, Context, Result};
use geojson::{FeatureCollection, GeoJson};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

pub fn load_catalogs(config: &AppConfig) -> Result<StationCatalogs> {
    let surface = load_stations(&config.stations.surface)?;
    let borehole = load_stations(&config.stations.borehole)?;
    info!(
        "Loaded {} surface and {} borehole stations",
        surface.len(),
        borehole.len()
    );
    Ok(StationCatalogs { surface, borehole })
}

/// Read a station list: a JSON array of `{code, name, lat, lon, x, y}`.
pub fn load_stations(path: &Path) -> Result<StationCatalog> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open station list: {:?}", path))?;
    let stations: Vec<Station> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse station list: {:?}", path))?;

    let unmapped = stations.iter().filter(|s| !s.is_mapped()).count();
    if unmapped > 0 {
        info!("{:?}: {} stations have no raster position", path, unmapped);
    }

    Ok(StationCatalog::new(stations))
}

pub fn load_boundaries(path: &Path) -> Result<FeatureCollection> {
    info!("Loading boundaries from {:?}...", path);
    let file = File::open(path)
        .with_context(|| format!("Failed to open boundary file: {:?}", path))?;
    let reader = BufReader::new(file);

    // Parses the whole file into memory.
    let geojson = GeoJson::from_reader(reader).context("Failed to parse boundary GeoJSON")?;
    into_collection(geojson)
}

pub fn parse_boundaries(body: &str) -> Result<FeatureCollection> {
    let geojson: GeoJson = body.parse().context("Failed to parse boundary GeoJSON")?;
    into_collection(geojson)
}

fn into_collection(geojson: GeoJson) -> Result<FeatureCollection> {
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        _ => Err(anyhow!("Boundary GeoJSON must be a FeatureCollection")),
    }
}
