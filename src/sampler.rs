use crate::types::{Station, StationCatalog};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to decode raster image")]
pub struct DecodeError(#[from] image::ImageError);

/// Colour read for one station on one raster.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledPoint<'a> {
    pub station: &'a Station,
    pub color: String,
    pub alpha: u8,
}

impl SampledPoint<'_> {
    pub fn to_feature(&self) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("code".into(), self.station.code.clone().into());
        properties.insert("name".into(), self.station.name.clone().into());
        properties.insert("color".into(), self.color.clone().into());

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![self.station.lon, self.station.lat]))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Pack a pixel as `0xRRGGBBAA`.
pub fn pack(pixel: Rgba<u8>) -> u32 {
    u32::from_be_bytes(pixel.0)
}

/// Split `0xRRGGBBAA` into `[r, g, b, a]`.
pub fn unpack(value: u32) -> [u8; 4] {
    [
        ((value >> 24) & 0xff) as u8,
        ((value >> 16) & 0xff) as u8,
        ((value >> 8) & 0xff) as u8,
        (value & 0xff) as u8,
    ]
}

pub fn hex_color(r: u8, g: u8, b: u8) -> String {
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

pub fn empty_collection() -> FeatureCollection {
    FeatureCollection { bbox: None, features: Vec::new(), foreign_members: None }
}

pub fn decode(bytes: &[u8]) -> Result<RgbaImage, DecodeError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Read the pixel under every mapped station.
///
/// Stations outside the image bounds and fully transparent pixels carry no
/// measurement and are left out.
pub fn sample_points<'a>(image: &RgbaImage, catalog: &'a StationCatalog) -> Vec<SampledPoint<'a>> {
    let (width, height) = image.dimensions();

    catalog
        .stations
        .par_iter()
        .filter(|station| station.is_mapped())
        .filter(|station| station.x < width && station.y < height)
        .filter_map(|station| {
            let [r, g, b, alpha] = unpack(pack(*image.get_pixel(station.x, station.y)));
            if alpha == 0 {
                return None;
            }
            Some(SampledPoint { station, color: hex_color(r, g, b), alpha })
        })
        .collect()
}

/// Decode a raster and turn it into a point feature collection.
pub fn sample(bytes: &[u8], catalog: &StationCatalog) -> Result<FeatureCollection, DecodeError> {
    let image = decode(bytes)?;
    let features = sample_points(&image, catalog)
        .iter()
        .map(SampledPoint::to_feature)
        .collect();

    Ok(FeatureCollection { bbox: None, features, foreign_members: None })
}
