//! fitex - firmware FIT/FDT container extraction CLI.
//!
//! Scan a firmware image for embedded components, persist the offset
//! registry, and extract the components to standalone artifacts.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fitex::{
    pipeline, BinwalkScanner, Config, ContainerResolver, FirmwareImage, OffsetRegistry,
    SemanticRole, SignatureScanner,
};

/// File name of the offset registry artifact inside the output directory.
const OFFSETS_FILE: &str = "offsets.txt";

/// A firmware FIT/FDT container extraction engine.
#[derive(Parser, Debug)]
#[command(name = "fitex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan an image and emit the offset registry
    Scan {
        /// Path to the firmware image
        image: PathBuf,

        /// Write the registry to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Signature scanner binary
        #[arg(long, default_value = "binwalk")]
        tool: String,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },

    /// Extract components from an image
    Extract {
        /// Path to the firmware image
        image: PathBuf,

        /// Output directory for extracted artifacts
        #[arg(short, long, default_value = "extracted")]
        output: PathBuf,

        /// Reuse a previously persisted offset registry instead of
        /// re-scanning
        #[arg(long)]
        offsets: Option<PathBuf>,

        /// Extract a single role (e.g. "KERNEL_FIT")
        #[arg(short, long)]
        role: Option<String>,

        /// Signature scanner binary
        #[arg(long, default_value = "binwalk")]
        tool: String,

        /// Number of parallel jobs (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Override the container size ceiling in bytes
        #[arg(long)]
        max_container_size: Option<u64>,

        /// Override the wrapper-FIT search start offset
        #[arg(long)]
        search_start: Option<u64>,

        /// Declared size directly identifying the kernel FIT
        #[arg(long)]
        kernel_size_hint: Option<u64>,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },

    /// Show image and container information
    Info {
        /// Path to the firmware image
        image: PathBuf,

        /// Reuse a previously persisted offset registry
        #[arg(long)]
        offsets: Option<PathBuf>,

        /// Signature scanner binary
        #[arg(long, default_value = "binwalk")]
        tool: String,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            image,
            output,
            tool,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_scan(&image, output, &tool)
        }
        Commands::Extract {
            image,
            output,
            offsets,
            role,
            tool,
            jobs,
            max_container_size,
            search_start,
            kernel_size_hint,
            verbosity,
        } => {
            setup_logging(verbosity);
            let mut config = Config::default();
            if let Some(max) = max_container_size {
                config.max_container_size = max;
            }
            if let Some(start) = search_start {
                config.kernel_search_start = start;
            }
            if kernel_size_hint.is_some() {
                config.kernel_fit_size_hint = kernel_size_hint;
            }
            cmd_extract(&image, &output, offsets, role, &tool, jobs, &config)
        }
        Commands::Info {
            image,
            offsets,
            tool,
            verbosity,
        } => {
            setup_logging(verbosity);
            cmd_info(&image, offsets, &tool)
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Loads a persisted registry or scans the image to build a fresh one.
fn load_or_scan_registry(
    image: &Path,
    offsets: Option<PathBuf>,
    tool: &str,
    config: &Config,
) -> Result<OffsetRegistry> {
    match offsets {
        Some(path) => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read offsets file: {}", path.display()))?;
            OffsetRegistry::parse(&text)
                .with_context(|| format!("Failed to parse offsets file: {}", path.display()))
        }
        None => {
            let scanner = BinwalkScanner::with_tool(tool);
            let hits = scanner
                .scan(image)
                .with_context(|| format!("Signature scan failed for: {}", image.display()))?;
            info!("{} signature hits", hits.len());
            Ok(OffsetRegistry::build(&hits, config))
        }
    }
}

fn cmd_scan(image: &Path, output: Option<PathBuf>, tool: &str) -> Result<()> {
    let config = Config::default();
    let registry = load_or_scan_registry(image, None, tool, &config)?;

    if registry.is_empty() {
        warn!("no roles classified in: {}", image.display());
    }

    let table = registry.to_table();
    match output {
        Some(path) => {
            fs::write(&path, &table)
                .with_context(|| format!("Failed to write: {}", path.display()))?;
            info!("offset registry written to {}", path.display());
        }
        None => print!("{table}"),
    }

    Ok(())
}

fn cmd_extract(
    image_path: &Path,
    output: &Path,
    offsets: Option<PathBuf>,
    role: Option<String>,
    tool: &str,
    jobs: Option<usize>,
    config: &Config,
) -> Result<()> {
    let start = Instant::now();

    let image = FirmwareImage::open(image_path)
        .with_context(|| format!("Failed to open image: {}", image_path.display()))?;

    let mut registry = load_or_scan_registry(image_path, offsets, tool, config)?;

    if let Some(ref role_name) = role {
        let wanted = SemanticRole::parse_name(role_name)
            .with_context(|| format!("Unknown role: {role_name}"))?;
        registry.retain(|r| r == wanted);
        if registry.is_empty() {
            bail!("Role {role_name} was not discovered in this image");
        }
    }

    if registry.is_empty() {
        warn!("nothing to extract");
        return Ok(());
    }

    // Configure thread pool
    if let Some(n) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .ok();
    }

    // Persist the registry artifact alongside the extracted components.
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output dir: {}", output.display()))?;
    fs::write(output.join(OFFSETS_FILE), registry.to_table())?;

    let total = registry.slot_count() as u64;
    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .unwrap()
            .progress_chars("#>-"),
    );

    let report = pipeline::run(&image, &registry, config, output, || progress.inc(1))?;
    progress.finish_and_clear();

    print!("{}", report.render());

    let elapsed = start.elapsed();
    if report.failed_count() > 0 {
        warn!(
            "{} of {} slots failed and were skipped",
            report.failed_count(),
            report.statuses.len()
        );
    }
    info!(
        "Extracted {}/{} slots in {:.2}s",
        report.extracted_count(),
        report.statuses.len(),
        elapsed.as_secs_f64()
    );

    Ok(())
}

fn cmd_info(image_path: &Path, offsets: Option<PathBuf>, tool: &str) -> Result<()> {
    let config = Config::default();
    let image = FirmwareImage::open(image_path)
        .with_context(|| format!("Failed to open image: {}", image_path.display()))?;
    let registry = load_or_scan_registry(image_path, offsets, tool, &config)?;

    println!("Firmware Image Information");
    println!("==========================");
    println!("Path:   {}", image_path.display());
    println!(
        "Size:   {:.2} MB ({} bytes)",
        image.len() as f64 / 1024.0 / 1024.0,
        image.len()
    );
    println!("Roles:  {}", registry.role_count());

    if registry.is_empty() {
        return Ok(());
    }

    println!("\nDiscovered roles:");
    let resolver = ContainerResolver::new(&image, &config);
    for (role, entries) in registry.iter() {
        for (slot, entry) in entries.entries().iter().enumerate() {
            let marker = if slot == entries.primary_index() {
                "primary"
            } else {
                "slot"
            };
            print!(
                "  {:<22} {:>10} {:#12x}",
                role.name(),
                marker,
                entry.offset
            );
            match role {
                SemanticRole::BootloaderFit | SemanticRole::KernelFit => {
                    match resolver.read_header(entry.offset) {
                        Ok(header) => print!("  [{header}]"),
                        Err(e) => print!("  [unreadable: {}]", e.kind_str()),
                    }
                }
                _ => {
                    if let Some(size) = entry.size {
                        print!("  [declared size: {size}]");
                    }
                }
            }
            println!();
        }
    }

    Ok(())
}
