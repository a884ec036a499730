pub mod clock;
pub mod config;
pub mod data;
pub mod facade;
pub mod monitor;
pub mod region;
pub mod sampler;
pub mod server;
pub mod types;
pub mod upstream;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::clock::TimeKey;
use crate::config::AppConfig;
use crate::facade::AcquisitionFacade;
use crate::monitor::{MonitorOptions, PollScheduler};
use crate::region::{BoundaryResource, RegionIndex};
use crate::types::{IntensityType, StationSource};
use crate::upstream::{KmoniClient, Upstream};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the provider and serve the live state to the map
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Fetch and decode one intensity raster as GeoJSON
    Points {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// YYYYMMDDHHmmss; defaults to the provider's latest time
        #[arg(short, long)]
        time: Option<String>,
        #[arg(short, long)]
        kind: Option<IntensityType>,
        #[arg(short, long)]
        source: Option<StationSource>,
    },
    /// Print the region containing a coordinate
    Locate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            info!("Serving with config: {:?}", config);
            let app_config = AppConfig::load_from_file(config)?;

            let catalogs = Arc::new(data::load_catalogs(&app_config)?);
            let upstream = Arc::new(KmoniClient::new(&app_config.upstream)?);
            let scheduler = PollScheduler::new(
                Arc::clone(&upstream),
                Arc::clone(&catalogs),
                MonitorOptions::from(&app_config.monitor),
            );
            let regions = RegionIndex::new(BoundaryResource::from_location(&app_config.regions.boundary));
            let facade = AcquisitionFacade::new(scheduler, regions);

            if app_config.monitor.autostart {
                if let Err(e) = facade.init().await {
                    warn!("Initial sync failed ({}); POST /api/monitor/resync to retry", e);
                }
            }

            let state = Arc::new(server::AppState { facade, upstream, catalogs });
            server::start_server(&app_config, state).await?;
        }
        Commands::Points { config, time, kind, source } => {
            let app_config = AppConfig::load_from_file(config)?;
            let catalogs = data::load_catalogs(&app_config)?;
            let upstream = KmoniClient::new(&app_config.upstream)?;

            let key = match time {
                Some(raw) => TimeKey::parse(raw)?,
                None => TimeKey::from_datetime(&upstream.latest_time().await?.time),
            };
            let kind = kind.unwrap_or(app_config.monitor.intensity);
            let source = source.unwrap_or(app_config.monitor.source);
            info!("Sampling {}_{} raster at {}", kind, source, clock::format_display(&key.datetime()));

            let collection = match upstream.raster(&key, kind, source).await? {
                Some(bytes) => sampler::sample(&bytes, catalogs.for_source(source))?,
                None => {
                    info!("No raster published for {}", key);
                    sampler::empty_collection()
                }
            };
            println!("{}", serde_json::to_string_pretty(&collection)?);
        }
        Commands::Locate { config, lng, lat } => {
            let app_config = AppConfig::load_from_file(config)?;
            let regions = RegionIndex::new(BoundaryResource::from_location(&app_config.regions.boundary));

            let feature = regions.resolve(*lng, *lat).await?;
            println!("{}", serde_json::to_string_pretty(&feature)?);
        }
    }

    Ok(())
}
