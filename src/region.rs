use crate::data;
use anyhow::Context;
use geo::bounding_rect::BoundingRect;
use geo::intersects::Intersects;
use geo::{Point, Polygon};
use geojson::{Feature, FeatureCollection, JsonObject, Value};
use rstar::{RTree, RTreeObject, AABB};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RegionError {
    #[error(transparent)]
    Load(#[from] anyhow::Error),
}

/// Where the boundary dataset comes from. Loaded at most once per index.
pub trait BoundarySource: Send + Sync + 'static {
    fn load(&self) -> impl Future<Output = anyhow::Result<FeatureCollection>> + Send;
}

#[derive(Debug, Clone)]
pub enum BoundaryResource {
    File(PathBuf),
    Url(String),
}

impl BoundaryResource {
    /// `http(s)://` locations are fetched, anything else is read from disk.
    pub fn from_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            BoundaryResource::Url(location.to_string())
        } else {
            BoundaryResource::File(PathBuf::from(location))
        }
    }
}

impl BoundarySource for BoundaryResource {
    async fn load(&self) -> anyhow::Result<FeatureCollection> {
        match self {
            BoundaryResource::File(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || data::load_boundaries(&path)).await?
            }
            BoundaryResource::Url(url) => {
                let body = reqwest::get(url)
                    .await
                    .and_then(|r| r.error_for_status())
                    .with_context(|| format!("Failed to fetch boundaries from {}", url))?
                    .text()
                    .await?;
                data::parse_boundaries(&body)
            }
        }
    }
}

// One polygon of a region; multi-polygon regions contribute one entry per part.
struct RegionPart {
    feature: usize,
    part: Option<usize>,
    polygon: Polygon<f64>,
}

struct PartEnvelope {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for PartEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// A loaded boundary dataset ready for containment queries.
pub struct RegionSet {
    features: Vec<Feature>,
    parts: Vec<RegionPart>,
    tree: RTree<PartEnvelope>,
}

impl RegionSet {
    pub fn new(collection: FeatureCollection) -> Self {
        let mut parts = Vec::new();

        for (index, feature) in collection.features.iter().enumerate() {
            let Some(geometry) = &feature.geometry else { continue };
            if !matches!(geometry.value, Value::Polygon(_) | Value::MultiPolygon(_)) {
                continue;
            }

            let converted: Result<geo::Geometry<f64>, _> = geometry.value.clone().try_into();
            match converted {
                Ok(geo::Geometry::Polygon(polygon)) => {
                    parts.push(RegionPart { feature: index, part: None, polygon });
                }
                Ok(geo::Geometry::MultiPolygon(multi)) => {
                    for (part, polygon) in multi.into_iter().enumerate() {
                        parts.push(RegionPart { feature: index, part: Some(part), polygon });
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(feature = index, "Skipping malformed boundary geometry: {:?}", e),
            }
        }

        let envelopes: Vec<PartEnvelope> = parts
            .iter()
            .enumerate()
            .filter_map(|(index, part)| {
                let rect = part.polygon.bounding_rect()?;
                Some(PartEnvelope {
                    index,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        Self {
            features: collection.features,
            parts,
            tree: RTree::bulk_load(envelopes),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// First region, in dataset order, whose polygon contains the point.
    /// Points on a boundary count as inside.
    pub fn resolve(&self, lng: f64, lat: f64) -> Option<Feature> {
        let point = Point::new(lng, lat);
        let mut candidates: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&AABB::from_point([lng, lat]))
            .map(|envelope| envelope.index)
            .collect();
        // Parts were pushed in dataset order.
        candidates.sort_unstable();

        candidates
            .into_iter()
            .map(|index| &self.parts[index])
            .find(|part| part.polygon.intersects(&point))
            .map(|part| self.feature_for(part))
    }

    fn feature_for(&self, part: &RegionPart) -> Feature {
        let feature = &self.features[part.feature];
        let Some(part_index) = part.part else {
            return feature.clone();
        };

        let coordinates = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::MultiPolygon(polygons)) => polygons.get(part_index).cloned(),
            _ => None,
        };
        let value = coordinates
            .map(Value::Polygon)
            .unwrap_or_else(|| Value::from(&part.polygon));

        Feature {
            bbox: None,
            geometry: Some(value.into()),
            id: None,
            properties: Some(feature.properties.clone().unwrap_or_else(JsonObject::new)),
            foreign_members: None,
        }
    }
}

/// Lazily loaded region lookup. Concurrent first callers share one load.
pub struct RegionIndex<B> {
    source: B,
    regions: OnceCell<Arc<RegionSet>>,
}

impl<B: BoundarySource> RegionIndex<B> {
    pub fn new(source: B) -> Self {
        Self { source, regions: OnceCell::new() }
    }

    pub async fn regions(&self) -> Result<Arc<RegionSet>, RegionError> {
        let regions = self
            .regions
            .get_or_try_init(|| async {
                let collection = self.source.load().await?;
                let regions = RegionSet::new(collection);
                info!("Loaded {} boundary regions", regions.len());
                Ok::<_, RegionError>(Arc::new(regions))
            })
            .await?;
        Ok(Arc::clone(regions))
    }

    pub async fn resolve(&self, lng: f64, lat: f64) -> Result<Option<Feature>, RegionError> {
        Ok(self.regions().await?.resolve(lng, lat))
    }
}
