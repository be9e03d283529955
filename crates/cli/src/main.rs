//! hubflow CLI - tiled raster processing from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hubflow::objects::ClassificationParams;
use hubflow::operators::{MaskFromRasterParams, MaskValue};
use hubflow::{ApplierConfig, ClassDefinition, Classification, Mask, MaskAggregation, ProcessingMode, ProgressSink, Raster};
use hubflow_core::io::Storage;
use hubflow_core::{BlockSize, Grid, ResampleAlg, Resolution};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hubflow")]
#[command(author, version, about = "Tiled raster processing for image analysis", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Tile size in pixels (rows and columns)
    #[arg(short, long, global = true, default_value = "256")]
    block_size: usize,

    /// Process tiles on all cores
    #[arg(short, long, global = true)]
    parallel: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Derive a 0/1 mask from raster values
    MaskFromRaster {
        /// Input raster
        input: PathBuf,
        /// Output mask file
        output: PathBuf,
        /// Values marking valid pixels, e.g. "1,5,10..20" (ranges are half-open)
        #[arg(short, long, default_value = "")]
        true_values: String,
        /// Values marking invalid pixels, applied after --true-values
        #[arg(short, long, default_value = "")]
        false_values: String,
        /// Pixels matching neither list start out valid
        #[arg(long)]
        init_valid: bool,
        /// A pixel is valid if any band is valid (default: all bands)
        #[arg(long)]
        any: bool,
    },
    /// Resample a raster to another resolution
    Resample {
        /// Input raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Target pixel size in map units
        #[arg(short, long)]
        resolution: f64,
        /// Resampling algorithm: nearest, average
        #[arg(short, long, default_value = "nearest")]
        alg: String,
    },
    /// Resample a classification through its class fractions
    ClassificationResample {
        /// Input classification
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Target pixel size in map units
        #[arg(short, long)]
        resolution: f64,
        /// Number of classes; read from the file metadata when omitted
        #[arg(short, long)]
        classes: Option<usize>,
        /// Minimum summed class coverage of an output pixel
        #[arg(long, default_value = "0.5")]
        min_overall_coverage: f64,
        /// Minimum coverage of the dominant class of an output pixel
        #[arg(long, default_value = "0.5")]
        min_dominant_coverage: f64,
    },
    /// Per-band statistics, optionally inside a mask
    Statistics {
        /// Input raster
        input: PathBuf,
        /// Mask raster; its no-data pixels are excluded
        #[arg(short, long)]
        mask: Option<PathBuf>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Smooth every band with a mean filter
    Convolve {
        /// Input raster
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Kernel size in pixels (odd)
        #[arg(short, long, default_value = "3")]
        size: usize,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install the log subscriber")
}

/// Progress bar fed by the applier
struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}%")
                .context("Invalid progress template")?
                .progress_chars("=> "),
        );
        Ok(Self { bar })
    }
}

impl ProgressSink for BarSink {
    fn set_percentage(&self, percentage: f64) {
        self.bar.set_position(percentage.round() as u64);
    }

    fn set_text(&self, text: &str) {
        self.bar.set_message(text.to_string());
    }

    fn file_created(&self, filename: &str) {
        self.bar.finish_and_clear();
        println!("Created: {}", filename);
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))
}

fn config(cli: &Cli) -> Result<ApplierConfig> {
    let processing = if cli.parallel {
        ProcessingMode::Parallel
    } else {
        ProcessingMode::Sequential
    };
    Ok(ApplierConfig::default()
        .with_block_size(BlockSize::square(cli.block_size))
        .with_processing(processing)
        .with_progress(Arc::new(BarSink::new()?)))
}

fn native_grid(storage: &Storage, path: &Path) -> Result<Grid> {
    let ds = storage
        .open_raster(path_str(path)?)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(ds.grid().clone())
}

fn target_grid(storage: &Storage, path: &Path, resolution: f64) -> Result<Grid> {
    native_grid(storage, path)?
        .with_resolution(Resolution::square(resolution))
        .context("Invalid target resolution")
}

fn parse_alg(s: &str) -> Result<ResampleAlg> {
    match s.to_lowercase().as_str() {
        "nearest" | "near" => Ok(ResampleAlg::Nearest),
        "average" | "mean" => Ok(ResampleAlg::Average),
        _ => anyhow::bail!("Unknown algorithm: {}. Use nearest or average.", s),
    }
}

fn parse_mask_values(s: &str) -> Result<Vec<MaskValue>> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once("..") {
            Some((start, end)) => {
                let start: f64 = start.trim().parse().with_context(|| format!("Invalid range start: {}", item))?;
                let end: f64 = end.trim().parse().with_context(|| format!("Invalid range end: {}", item))?;
                if end <= start {
                    anyhow::bail!("Empty range: {}", item);
                }
                Ok(MaskValue::Range(start, end))
            }
            None => Ok(MaskValue::Value(item.parse().with_context(|| format!("Invalid value: {}", item))?)),
        })
        .collect()
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let storage = Storage::shared();

    match &cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let ds = storage
                .open_raster(path_str(input)?)
                .with_context(|| format!("Failed to open {}", input.display()))?;
            let grid = ds.grid();
            let extent = grid.extent();
            let res = grid.resolution();

            println!("File: {}", input.display());
            println!(
                "Dimensions: {} x {} ({} cells), {} band(s) of {}",
                grid.width(),
                grid.height(),
                grid.width() * grid.height(),
                ds.band_count(),
                ds.data_type()
            );
            println!("Cell size: {} x {}", res.x, res.y);
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                extent.xmin, extent.ymin, extent.xmax, extent.ymax
            );
            println!("Projection: {}", grid.projection());
            for (band, meta) in ds.metadata().bands.iter().enumerate() {
                let name = meta.description.as_deref().unwrap_or("-");
                match meta.no_data_value {
                    Some(no_data) => println!("Band {}: {} (NoData: {})", band + 1, name, no_data),
                    None => println!("Band {}: {}", band + 1, name),
                }
            }
            if let Some(definition) = ClassDefinition::from_metadata(ds.metadata()) {
                println!("\nClasses:");
                for (label, name) in definition.names().iter().enumerate() {
                    println!("  {}: {}", label + 1, name);
                }
            }
        }

        // ── Masks ────────────────────────────────────────────────────
        Commands::MaskFromRaster {
            input,
            output,
            true_values,
            false_values,
            init_valid,
            any,
        } => {
            let params = MaskFromRasterParams {
                true_values: parse_mask_values(true_values)?,
                false_values: parse_mask_values(false_values)?,
                init_value: *init_valid,
                aggregate: if *any { MaskAggregation::Any } else { MaskAggregation::All },
            };
            let start = Instant::now();
            Mask::from_raster(
                &storage,
                path_str(output)?,
                &Raster::new(path_str(input)?),
                params,
                config(&cli)?,
            )
            .context("Failed to derive mask")?;
            done("Mask", output, start.elapsed());
        }

        // ── Resampling ───────────────────────────────────────────────
        Commands::Resample {
            input,
            output,
            resolution,
            alg,
        } => {
            let raster = Raster::new(path_str(input)?).with_resample_alg(parse_alg(alg)?);
            let grid = target_grid(&storage, input, *resolution)?;
            info!("Target grid: {} x {}", grid.width(), grid.height());
            let start = Instant::now();
            raster
                .resample(&storage, path_str(output)?, &grid, config(&cli)?)
                .context("Failed to resample")?;
            done("Resampled raster", output, start.elapsed());
        }

        Commands::ClassificationResample {
            input,
            output,
            resolution,
            classes,
            min_overall_coverage,
            min_dominant_coverage,
        } => {
            let filename = path_str(input)?;
            let definition = match classes {
                Some(classes) => ClassDefinition::from_classes(*classes)?,
                None => {
                    let ds = storage
                        .open_raster(filename)
                        .with_context(|| format!("Failed to open {}", input.display()))?;
                    ClassDefinition::from_metadata(ds.metadata())
                        .context("No class definition in the file metadata, pass --classes")?
                }
            };
            let classification = Classification::new(filename, definition).with_params(ClassificationParams {
                min_overall_coverage: *min_overall_coverage,
                min_dominant_coverage: *min_dominant_coverage,
            });
            let grid = target_grid(&storage, input, *resolution)?;
            let start = Instant::now();
            classification
                .resample(&storage, path_str(output)?, &grid, config(&cli)?)
                .context("Failed to resample classification")?;
            done("Classification", output, start.elapsed());
        }

        // ── Statistics ───────────────────────────────────────────────
        Commands::Statistics { input, mask, json } => {
            let mask = match mask {
                Some(path) => Some(Mask::new(path_str(path)?).into()),
                None => None,
            };
            let start = Instant::now();
            let stats = Raster::new(path_str(input)?)
                .statistics(&storage, mask, config(&cli)?)
                .context("Failed to compute statistics")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Band        Count          Min          Max         Mean       StdDev");
                for (band, s) in stats.iter().enumerate() {
                    println!(
                        "{:<4} {:>12} {:>12.4} {:>12.4} {:>12.4} {:>12.4}",
                        band + 1,
                        s.count,
                        s.min,
                        s.max,
                        s.mean,
                        s.std_dev
                    );
                }
                println!("  Processing time: {:.2?}", start.elapsed());
            }
        }

        // ── Filters ──────────────────────────────────────────────────
        Commands::Convolve { input, output, size } => {
            if size % 2 == 0 {
                anyhow::bail!("Kernel size must be odd, got {}", size);
            }
            let kernel = ndarray::Array2::from_elem((*size, *size), 1.0 / (size * size) as f64);
            let start = Instant::now();
            Raster::new(path_str(input)?)
                .convolve(&storage, path_str(output)?, kernel, config(&cli)?)
                .context("Failed to convolve")?;
            done("Filtered raster", output, start.elapsed());
        }
    }

    Ok(())
}
