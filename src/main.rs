//! Elevation Mosaic - seamless terrain tiles from overlapping sources.
//!
//! This binary runs one pipeline step per invocation.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use elevation_mosaic::{
    config::{AggregateConfig, Cli, Command, CoverConfig, DownsampleConfig, InspectConfig},
    coverage::Catalog,
    pipeline::{cover, downsample, inspect, Aggregator, BatchSummary},
    raster::GdalToolkit,
    store::StoreLayout,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Cover(config) => run_cover(config),
        Command::Aggregate(config) => run_aggregate(config).await,
        Command::Downsample(config) => run_downsample(config).await,
        Command::Inspect(config) => run_inspect(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "elevation_mosaic=debug"
    } else {
        "elevation_mosaic=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn exit_code(summary: &BatchSummary) -> ExitCode {
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        for (unit, message) in &summary.failed {
            error!("  {}: {}", unit, message);
        }
        ExitCode::FAILURE
    }
}

// =============================================================================
// cover
// =============================================================================

fn run_cover(config: CoverConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let catalog = match Catalog::load(&config.catalog) {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("Failed to load catalog {}: {}", config.catalog.display(), e);
            return ExitCode::FAILURE;
        }
    };
    info!("Catalog: {} source(s)", catalog.sources().len());

    let store = StoreLayout::new(&config.store);
    match cover(&catalog, &store, &config.resolver_config()) {
        Ok(report) => {
            info!(
                "{} of {} cell(s) changed",
                report.dirty_cells.len(),
                report.total_cells
            );
            // The run id is the only thing on stdout, for scripting
            println!("{}", report.run);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cover failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// aggregate
// =============================================================================

async fn run_aggregate(config: AggregateConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let catalog = match Catalog::load(&config.catalog) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            error!("Failed to load catalog {}: {}", config.catalog.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let toolkit = match &config.gdal_bin {
        Some(dir) => GdalToolkit::with_bin_dir(dir),
        None => GdalToolkit::new(),
    };

    let store = StoreLayout::new(&config.store);
    let aggregator = Aggregator::new(Arc::new(toolkit), catalog, store, &config.options());

    match aggregator.run(&config.run_id).await {
        Ok(summary) => exit_code(&summary),
        Err(e) => {
            error!("Aggregate failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// downsample
// =============================================================================

async fn run_downsample(config: DownsampleConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let store = StoreLayout::new(&config.store);
    match downsample(&store, &config.run_id, &config.options()).await {
        Ok(summary) => exit_code(&summary),
        Err(e) => {
            error!("Downsample failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// inspect
// =============================================================================

async fn run_inspect(config: InspectConfig) -> ExitCode {
    let report = match inspect(&config.path).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let header = &report.header;
    println!("Archive: {}", report.path);
    println!("═════════════════════════════════");
    println!("Tile type:        {}", header.tile_type);
    println!("Zoom:             {} - {}", header.min_zoom, header.max_zoom);
    println!(
        "Bounds:           {:.5}, {:.5}, {:.5}, {:.5}",
        f64::from(header.min_lon_e7) / 1e7,
        f64::from(header.min_lat_e7) / 1e7,
        f64::from(header.max_lon_e7) / 1e7,
        f64::from(header.max_lat_e7) / 1e7
    );
    println!("Addressed tiles:  {}", header.addressed_tiles);
    println!("Tile entries:     {}", header.tile_entries);
    println!("Tile contents:    {}", header.tile_contents);
    println!();
    for (zoom, count) in &report.tiles_per_zoom {
        println!("  z{:<3} {} tile(s)", zoom, count);
    }

    if config.metadata {
        println!();
        match serde_json::to_string_pretty(&report.metadata) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
