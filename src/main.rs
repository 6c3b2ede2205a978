use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use pinalbum::catalog::{FileCatalog, Location, LocationCatalog, LocationSort};
use pinalbum::config::Config;
use pinalbum::images::ImageStore;
use pinalbum::search::PhotoSearchClient;
use pinalbum::sync::{CollectionSyncEngine, SyncOutcome};
use pinalbum::transport::ReqwestTransport;

#[derive(Parser)]
#[command(author, version, about = "Keep a cached photo album for each pin on a map")]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize with a default config file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Drop a pin and fetch its photos
    Add {
        #[arg(allow_hyphen_values = true)]
        latitude: f64,
        #[arg(allow_hyphen_values = true)]
        longitude: f64,
        /// Only store the pin, don't search for photos yet
        #[arg(long)]
        no_fetch: bool,
    },

    /// List pins
    List {
        /// Sort by created, lat or lon
        #[arg(short, long, default_value = "created")]
        sort: LocationSort,
    },

    /// Show a pin's photos, fetching them if the pin has none yet
    Photos {
        /// Pin id or 1-based list position
        pin: String,
    },

    /// Replace a pin's photos with a new collection
    Refresh {
        /// Pin id or 1-based list position
        pin: String,
    },

    /// Download the image bytes of a pin's photos
    Download {
        /// Pin id or 1-based list position
        pin: String,
        /// Also write each image into this directory
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Remove one photo
    RemovePhoto { photo_id: Uuid },

    /// Remove a pin and all of its photos
    Remove {
        /// Pin id or 1-based list position
        pin: String,
    },

    /// Show configuration and catalog summary
    Status,
}

/// Services shared by every command that touches the catalog
struct App {
    catalog: Arc<FileCatalog>,
    engine: CollectionSyncEngine,
    images: ImageStore,
    download_concurrency: usize,
}

impl App {
    fn open(config: &Config) -> Result<Self> {
        let catalog = Arc::new(
            FileCatalog::open(Path::new(&config.catalog_file))
                .with_context(|| format!("Failed to open catalog {}", config.catalog_file))?,
        );
        let transport = Arc::new(
            ReqwestTransport::new(config.request_timeout())
                .context("Failed to create HTTP client")?,
        );
        let search = Arc::new(PhotoSearchClient::new(
            transport.clone(),
            config.search_settings(),
        ));
        let engine = CollectionSyncEngine::new(search, catalog.clone(), config.sync_settings());
        let images = ImageStore::new(transport, catalog.clone());

        Ok(Self {
            catalog,
            engine,
            images,
            download_concurrency: config.download_concurrency,
        })
    }

    /// Accepts a pin UUID or a 1-based position in creation order
    fn resolve_pin(&self, pin: &str) -> Result<Location> {
        if let Ok(id) = Uuid::parse_str(pin) {
            return self
                .catalog
                .get_location(id)?
                .with_context(|| format!("No pin with id {id}"));
        }

        let position: usize = pin
            .parse()
            .with_context(|| format!("'{pin}' is neither a pin id nor a list position"))?;
        let locations = self.catalog.list_locations(LocationSort::CreatedAt)?;
        position
            .checked_sub(1)
            .and_then(|i| locations.get(i).cloned())
            .with_context(|| format!("No pin at position {position} ({} pins)", locations.len()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Seconds))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { force } => init_config(&cli.config, *force),
        Commands::Add {
            latitude,
            longitude,
            no_fetch,
        } => {
            let app = App::open(&load_config(&cli.config)?)?;
            add_pin(&app, *latitude, *longitude, *no_fetch).await
        }
        Commands::List { sort } => {
            let app = App::open(&load_config(&cli.config)?)?;
            list_pins(&app, *sort)
        }
        Commands::Photos { pin } => {
            let app = App::open(&load_config(&cli.config)?)?;
            let location = app.resolve_pin(pin)?;
            let outcome = app.engine.ensure_populated(location.id).await?;
            report_outcome(&outcome);
            print_photos(&app, &location)
        }
        Commands::Refresh { pin } => {
            let app = App::open(&load_config(&cli.config)?)?;
            let location = app.resolve_pin(pin)?;
            let outcome = app
                .engine
                .replace_collection(location.id)
                .await
                .context("New collection failed; the previous photos were kept")?;
            report_outcome(&outcome);
            print_photos(&app, &location)
        }
        Commands::Download { pin, out } => {
            let app = App::open(&load_config(&cli.config)?)?;
            let location = app.resolve_pin(pin)?;
            download_photos(&app, &location, out.as_deref()).await
        }
        Commands::RemovePhoto { photo_id } => {
            let app = App::open(&load_config(&cli.config)?)?;
            app.catalog
                .delete_photo(*photo_id)
                .with_context(|| format!("Failed to remove photo {photo_id}"))?;
            println!("Removed photo {photo_id}");
            Ok(())
        }
        Commands::Remove { pin } => {
            let app = App::open(&load_config(&cli.config)?)?;
            let location = app.resolve_pin(pin)?;
            app.catalog.delete_location(location.id)?;
            println!("Removed pin {} and its photos", location.id);
            Ok(())
        }
        Commands::Status => {
            let config = load_config(&cli.config)?;
            show_status(&config)
        }
    }
}

async fn add_pin(app: &App, latitude: f64, longitude: f64, no_fetch: bool) -> Result<()> {
    let location = match app.catalog.find_location(latitude, longitude)? {
        Some(existing) => {
            println!("Pin already exists at {}", existing.coordinate());
            existing
        }
        None => {
            let created = app
                .catalog
                .create_location(latitude, longitude)
                .context("Failed to add pin")?;
            println!("Added pin {} at {}", created.id, created.coordinate());
            created
        }
    };

    if no_fetch {
        return Ok(());
    }

    let outcome = app.engine.ensure_populated(location.id).await?;
    report_outcome(&outcome);
    Ok(())
}

fn list_pins(app: &App, sort: LocationSort) -> Result<()> {
    let locations = app.catalog.list_locations(sort)?;
    if locations.is_empty() {
        println!("No pins yet. Add one with 'pinalbum add <LAT> <LON>'.");
        return Ok(());
    }

    // Positions always refer to creation order, whatever the display order
    let by_creation = app.catalog.list_locations(LocationSort::CreatedAt)?;
    for location in &locations {
        let position = by_creation
            .iter()
            .position(|l| l.id == location.id)
            .map(|i| i + 1)
            .unwrap_or_default();
        let count = app.catalog.photo_count(location.id)?;
        let fetched = if location.is_synced() { "" } else { " (not fetched)" };
        println!(
            "{position:>3}. {}  {}  {count} photos{fetched}",
            location.id,
            location.coordinate()
        );
    }
    Ok(())
}

fn report_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::AlreadyPopulated => debug!("Collection already populated"),
        SyncOutcome::Populated(count) => println!("Stored {count} photos"),
        SyncOutcome::NoPhotosFound => println!("No photos found near this pin"),
    }
}

fn print_photos(app: &App, location: &Location) -> Result<()> {
    let photos = app.catalog.list_photos(location.id)?;
    println!("Pin {} at {}: {} photos", location.id, location.coordinate(), photos.len());
    for photo in &photos {
        let cached = if photo.has_payload() { "cached" } else { "remote" };
        let title = photo.title.as_deref().unwrap_or("(untitled)");
        println!("  {}  [{cached}]  {title}  {}", photo.id, photo.url);
    }
    Ok(())
}

async fn download_photos(app: &App, location: &Location, out: Option<&Path>) -> Result<()> {
    app.engine.ensure_populated(location.id).await?;
    let photos = app.catalog.list_photos(location.id)?;

    if let Some(dir) = out {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let results: Vec<_> = stream::iter(photos)
        .map(|photo| async move {
            let result = app.images.resolve(&photo.url).await;
            (photo, result)
        })
        .buffer_unordered(app.download_concurrency)
        .collect()
        .await;

    let mut downloaded = 0;
    let mut failed = 0;
    for (photo, result) in results {
        match result {
            Ok(bytes) => {
                downloaded += 1;
                if let Some(dir) = out {
                    let path = dir.join(format!("{}.jpg", photo.id));
                    tokio::fs::write(&path, &*bytes)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                }
            }
            Err(e) => {
                failed += 1;
                println!("  failed: {} ({e})", photo.url);
            }
        }
    }

    println!("Downloaded {downloaded} photos, {failed} failed");
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    println!("pinalbum Status");
    println!("Configuration:");
    println!("  API URL: {}", config.api_url);
    println!("  Catalog file: {}", config.catalog_file);
    println!("  Photos per pin: {}", config.per_page);

    let catalog = FileCatalog::open(Path::new(&config.catalog_file))
        .with_context(|| format!("Failed to open catalog {}", config.catalog_file))?;
    let locations = catalog.list_locations(LocationSort::CreatedAt)?;

    let mut photo_total = 0;
    let mut cached_total = 0;
    let mut unfetched = 0;
    for location in &locations {
        let photos = catalog.list_photos(location.id)?;
        photo_total += photos.len();
        cached_total += photos.iter().filter(|p| p.has_payload()).count();
        if !location.is_synced() {
            unfetched += 1;
        }
    }

    println!("Catalog:");
    println!("  Pins: {}", locations.len());
    println!("  Pins not yet fetched: {unfetched}");
    println!("  Photos: {photo_total}");
    println!("  Photos with cached images: {cached_total}/{photo_total}");
    Ok(())
}

fn init_config(config_path_opt: &Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = Config::get_config_path(config_path_opt);

    if config_path.exists() && !force {
        println!("Config file already exists at {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    let config = Config::default();
    config
        .save_to_file(&config_path)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    println!("Created config file at {}", config_path.display());
    Ok(())
}

fn load_config(config_path_opt: &Option<PathBuf>) -> Result<Config> {
    let config_path = Config::get_config_path(config_path_opt);

    if !config_path.exists() {
        anyhow::bail!(
            "Config file not found at {}. Run 'pinalbum init' to create one.",
            config_path.display()
        );
    }

    Config::load_from_file(&config_path)
}
