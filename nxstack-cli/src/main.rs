//! nxstack command-line interface.
//!
//! Converts collections of scan files into stacked NeXus files and inspects
//! persisted containers and datasets.
#![allow(clippy::uninlined_format_args, clippy::cast_precision_loss)]

use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use nxstack_core::{slice_with, AxisRole, SliceDescriptor, SliceRange};
use nxstack_io::{
    convert, open_source, ConversionContext, ConversionScheme, JobOutcome, PersistentContainer,
    ScanGrid, Worker,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    NxstackIo(#[from] nxstack_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] nxstack_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("conversion cancelled")]
    Cancelled,
}

/// Conversion scheme selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scheme {
    /// Stack 1-D datasets from every file into 2-D or 3-D datasets
    #[value(name = "h5-from-1d")]
    H5From1d,
    /// Append one shape-reconciled slice per file
    Compare,
}

impl From<Scheme> for ConversionScheme {
    fn from(scheme: Scheme) -> Self {
        match scheme {
            Scheme::H5From1d => ConversionScheme::H5From1D,
            Scheme::Compare => ConversionScheme::Compare,
        }
    }
}

/// Lazy N-dimensional datasets and NeXus stacks.
#[derive(Parser)]
#[command(name = "nxstack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stack datasets from many files into one NeXus file
    Convert {
        /// Input NeXus/HDF5 or SPEC (.dat, .spec) files
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Conversion scheme
        #[arg(short, long, value_enum, default_value = "h5-from-1d")]
        scheme: Scheme,

        /// Dataset path pattern (regular expression matching the whole path)
        #[arg(short, long = "dataset", required = true)]
        datasets: Vec<String>,

        /// Axis dataset, copied once from the first file
        #[arg(short, long)]
        axis: Option<String>,

        /// Points per row of a 2-D scan
        #[arg(long, requires = "slow")]
        fast: Option<usize>,

        /// Rows of a 2-D scan
        #[arg(long, requires = "fast")]
        slow: Option<usize>,

        /// Required shape for a dataset path in the compare scheme (PATH=2x4)
        #[arg(long = "shape")]
        shapes: Vec<String>,
    },

    /// Show the header and contents of a NeXus container
    Info {
        /// Input file
        input: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Slice a dataset and summarize the result
    Slice {
        /// Input file
        input: PathBuf,

        /// Dataset path
        dataset: String,

        /// Dimension shown along X (default: last)
        #[arg(short)]
        x: Option<usize>,

        /// Dimension shown along Y (default: second to last)
        #[arg(short)]
        y: Option<usize>,

        /// Fixed index for a dimension (DIM=INDEX)
        #[arg(long = "fix")]
        fixed: Vec<String>,

        /// Range kept for a dimension (DIM=START:STOP[:STEP])
        #[arg(long = "range")]
        ranges: Vec<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            input,
            output,
            scheme,
            datasets,
            axis,
            fast,
            slow,
            shapes,
        } => {
            let mut context = ConversionContext::new(input, &output).with_scheme(scheme.into());
            for pattern in datasets {
                context = context.with_dataset_pattern(pattern);
            }
            if let Some(axis) = axis {
                context = context.with_axis_dataset(axis);
            }
            if let (Some(fast), Some(slow)) = (fast, slow) {
                context = context.with_grid(ScanGrid::new(fast, slow));
            }
            for spec in &shapes {
                let (path, shape) = parse_required_shape(spec)?;
                context = context.with_required_shape(path, shape);
            }
            run_convert(context)?;
        }

        Commands::Info { input, json } => show_info(&input, json)?,

        Commands::Slice {
            input,
            dataset,
            x,
            y,
            fixed,
            ranges,
            json,
        } => {
            let lazy = open_source(&input)?.lazy(&dataset)?;
            let shape = lazy.shape();
            let mut descriptor = SliceDescriptor::default_for(&shape);
            for arg in &fixed {
                let (dim, value) = split_dim(arg)?;
                descriptor.assign(dim, AxisRole::Fixed(parse_usize(value)?))?;
            }
            for arg in &ranges {
                let (dim, value) = split_dim(arg)?;
                descriptor.assign(dim, AxisRole::Range(parse_range(value)?))?;
            }
            if let Some(y) = y {
                descriptor.assign(y, AxisRole::Y)?;
            }
            if let Some(x) = x {
                descriptor.assign(x, AxisRole::X)?;
            }

            let start = Instant::now();
            let sliced = slice_with(&lazy, &descriptor)?;
            info!("sliced {} in {:.2?}", dataset, start.elapsed());

            let values = sliced.to_f64_vec().unwrap_or_default();
            let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
            let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
            let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = if finite.is_empty() {
                f64::NAN
            } else {
                finite.iter().sum::<f64>() / finite.len() as f64
            };

            if json {
                let summary = serde_json::json!({
                    "dataset": dataset,
                    "source_shape": shape,
                    "shape": sliced.shape(),
                    "type": sliced.element_type().name(),
                    "finite": finite.len(),
                    "min": min,
                    "max": max,
                    "mean": mean,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Dataset: {} {:?}", dataset, shape);
                println!("Slice shape: {:?} ({})", sliced.shape(), sliced.element_type());
                if finite.is_empty() {
                    println!("No finite values");
                } else {
                    println!("Range: {} - {}", min, max);
                    println!("Mean: {:.6}", mean);
                }
            }
        }
    }

    Ok(())
}

fn run_convert(context: ConversionContext) -> Result<()> {
    let start = Instant::now();
    let output = context.output.clone();
    let worker = Worker::new("nxstack-convert")?;

    let (report_tx, report_rx) = std::sync::mpsc::channel();
    let job = worker.submit(output.clone(), move |cancel| {
        let report = convert(&context, cancel)?;
        let _ = report_tx.send(report);
        Ok(())
    });

    match job.wait()? {
        JobOutcome::Completed => {}
        JobOutcome::Failed(e) => return Err(e.into()),
        JobOutcome::Cancelled | JobOutcome::Replaced => return Err(CliError::Cancelled),
    }
    let report = report_rx
        .recv()
        .map_err(|_| CliError::Argument("conversion produced no report".to_string()))?;

    println!(
        "Converted {} file(s) to {} ({}) in {:.2?}",
        report.sources,
        output.display(),
        report.scheme,
        start.elapsed()
    );
    for dataset in &report.datasets {
        let signal = if dataset.signal { " [signal]" } else { "" };
        println!("  {} {:?}{}", dataset.key, dataset.shape, signal);
    }
    Ok(())
}

fn show_info(input: &Path, json: bool) -> Result<()> {
    let datasets = open_source(input)?.dataset_names()?;
    let mut container = PersistentContainer::open(input);
    let site = container.site().ok();
    let version = container.version().ok();

    let mut groups = Vec::new();
    if container.contains_data() {
        groups.push(("data", container.data_names()?));
    }
    if container.contains_mask() {
        groups.push(("mask", container.mask_names()?));
    }
    if container.contains_region() {
        groups.push(("roi", container.roi_names()?));
    }
    if container.contains_function() {
        groups.push(("function", container.function_names()?));
    }
    if container.contains_history() {
        groups.push(("history", container.history_names()?));
    }
    let metadata = container.contains_diffraction_metadata();
    container.close();

    if json {
        let groups: serde_json::Map<String, serde_json::Value> = groups
            .into_iter()
            .map(|(name, members)| (name.to_string(), serde_json::json!(members)))
            .collect();
        let summary = serde_json::json!({
            "file": input.display().to_string(),
            "site": site,
            "version": version,
            "groups": groups,
            "diffraction_metadata": metadata,
            "datasets": datasets,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("File: {}", input.display());
    match (&site, &version) {
        (Some(site), Some(version)) => println!("Site: {}, version {}", site, version),
        _ => println!("Not a persistence container (no /entry header)"),
    }
    for (name, members) in &groups {
        println!("{}: {}", name, members.join(", "));
    }
    if metadata {
        println!("diffraction_metadata: present");
    }
    println!("Datasets: {}", datasets.len());
    for name in &datasets {
        println!("  {}", name);
    }
    Ok(())
}

fn parse_usize(value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| CliError::Argument(format!("'{}' is not an index", value)))
}

fn split_dim(arg: &str) -> Result<(usize, &str)> {
    let (dim, value) = arg
        .split_once('=')
        .ok_or_else(|| CliError::Argument(format!("expected DIM=VALUE, got '{}'", arg)))?;
    Ok((parse_usize(dim)?, value))
}

fn parse_range(value: &str) -> Result<SliceRange> {
    let parts: Vec<&str> = value.split(':').collect();
    match parts.as_slice() {
        [start, stop] => Ok(SliceRange::new(parse_usize(start)?, parse_usize(stop)?, 1)),
        [start, stop, step] => Ok(SliceRange::new(
            parse_usize(start)?,
            parse_usize(stop)?,
            parse_usize(step)?,
        )),
        _ => Err(CliError::Argument(format!(
            "expected START:STOP[:STEP], got '{}'",
            value
        ))),
    }
}

fn parse_required_shape(arg: &str) -> Result<(String, Vec<usize>)> {
    let (path, shape) = arg
        .rsplit_once('=')
        .ok_or_else(|| CliError::Argument(format!("expected PATH=SHAPE, got '{}'", arg)))?;
    let shape = shape
        .split('x')
        .map(parse_usize)
        .collect::<Result<Vec<_>>>()?;
    Ok((path.to_string(), shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("2:10").unwrap(), SliceRange::new(2, 10, 1));
        assert_eq!(parse_range("0:9:3").unwrap(), SliceRange::new(0, 9, 3));
        assert!(parse_range("5").is_err());
    }

    #[test]
    fn test_parse_required_shape() {
        let (path, shape) = parse_required_shape("/entry/d=2x4").unwrap();
        assert_eq!(path, "/entry/d");
        assert_eq!(shape, vec![2, 4]);
        assert!(parse_required_shape("/entry/d").is_err());
    }

    #[test]
    fn test_cli_parses_convert() {
        let cli = Cli::try_parse_from([
            "nxstack", "convert", "a.nxs", "b.nxs", "-o", "out.nxs", "-d", "/entry1/(I0|It)",
            "--fast", "2", "--slow", "1",
        ])
        .unwrap();
        let Commands::Convert { input, fast, scheme, .. } = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(input.len(), 2);
        assert_eq!(fast, Some(2));
        assert!(matches!(scheme, Scheme::H5From1d));
    }
}
