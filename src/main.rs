use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::fs;
use std::path::PathBuf;

use murabba::cache::{FsTileStore, TileStore};
use murabba::config::MapConfig;
use murabba::download::Downloader;
use murabba::grid::{transform, GridTemplate};
use murabba::measure::format_area;
use murabba::model::ParcelIndex;
use murabba::tiles::TileCache;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the tile cache directory (overrides the settings file)
    #[arg(short, long)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesise the killa grid of one murabba
    Grid {
        /// Boundary layer GeoJSON holding the murabba polygons
        #[arg(short, long)]
        boundary: PathBuf,

        /// Murabba number to subdivide
        #[arg(short, long)]
        parcel: String,

        /// Template GeoJSON supplying per-cell properties
        #[arg(short, long)]
        template: Option<PathBuf>,

        /// Where to write the sub-grid; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Express an area in acres, kanals, marlas and square feet
    Area {
        #[arg(long)]
        sq_feet: f64,
    },

    /// Fetch a tile through the cache
    Tile {
        #[arg(short, long)]
        url: String,
    },

    /// Clear the tile cache
    ClearCache,
}

fn read_geojson(path: &PathBuf) -> Result<geojson::GeoJson> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    raw.parse::<geojson::GeoJson>()
        .with_context(|| format!("Failed to parse GeoJSON in {}", path.display()))
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MapConfig::from_file(path)?,
        None => MapConfig::default(),
    };
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }

    match cli.command {
        Commands::Grid { boundary, parcel, template, output } => {
            let index = ParcelIndex::from_geojson(&read_geojson(&boundary)?);
            info!("Loaded {} murabbas from {}", index.len(), boundary.display());

            let quad = index
                .parcel(&parcel)
                .map(|p| p.quad)
                .ok_or_else(|| anyhow!("Murabba {} not found in {}", parcel, boundary.display()))?;

            let template = match template {
                Some(path) => GridTemplate::from_geojson(&read_geojson(&path)?)
                    .context("Invalid grid template")?,
                None => GridTemplate::standard(),
            };

            let grid = transform(&template, &quad)
                .with_context(|| format!("Failed to subdivide murabba {}", parcel))?;
            let json = serde_json::to_string_pretty(&grid.to_feature_collection())?;

            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Wrote {} killas to {}", grid.len(), path.display());
                }
                None => println!("{}", json),
            }
        }

        Commands::Area { sq_feet } => {
            println!("{}", format_area(sq_feet));
        }

        Commands::Tile { url } => {
            let store = FsTileStore::new(&config.cache_dir)
                .context("Failed to create tile cache")?;
            let cached = store.get(&url)?.is_some();
            let downloader = Downloader::new(config.origin.as_deref(), config.request_timeout())
                .context("Failed to create downloader")?;

            let tiles = TileCache::new(store, downloader);
            let data = tiles
                .get_or_fetch(&url)
                .with_context(|| format!("Failed to fetch tile {}", url))?;
            println!("{} bytes from {}", data.len(), if cached { "cache" } else { "network" });
        }

        Commands::ClearCache => {
            info!("Clearing cache");
            let store = FsTileStore::new(&config.cache_dir)
                .context("Failed to create tile cache")?;
            store.clear().context("Failed to clear cache")?;
            info!("Cache cleared");
        }
    }

    Ok(())
}
