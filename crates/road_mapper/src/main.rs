use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, trace};
use rayon::prelude::*;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    num::NonZeroU32,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};
use walkdir::WalkDir;

use carmen_map::MapCreator;
use road_mapper::{convert_file, Cell, ClaimObserver, MapReport, RenderOptions, BEZIER_FRACTION};

/// Rasterize SVG lane drawings into CARMEN road ground-truth maps.
#[derive(Parser, Debug, Clone)]
#[command(name = "road_mapper", version)]
struct Args {
    /// Log level: 0 = info, 1 = debug, 2 or more = trace. RUST_LOG takes precedence.
    #[arg(short, long, default_value_t = 0)]
    verbose: u8,

    /// Pause this many milliseconds after every claimed cell and trace each claim.
    /// Files are then converted one at a time.
    #[arg(short, long, value_name = "MS")]
    animation: Option<u64>,

    /// Text file listing SVG files, one per line ('#' starts a comment).
    #[arg(short = 'f', long = "file", value_name = "LIST")]
    file_lists: Vec<PathBuf>,

    /// Write maps here instead of next to their SVG files.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    skip_existing: bool,

    /// Parametric step of the Bézier tessellation.
    #[arg(long, default_value_t = BEZIER_FRACTION)]
    fraction: f64,

    /// Origin recorded in the map header.
    #[arg(long, default_value = "")]
    origin: String,

    /// Description recorded in the map header.
    #[arg(long, default_value = "Generated by road_mapper")]
    description: String,

    /// Write per-file reports as JSON.
    #[arg(long)]
    summary: Option<PathBuf>,

    /// SVG files or directories containing them.
    inputs: Vec<PathBuf>,
}

/// Slows rasterization down so claims can be followed in the log.
struct AnimationObserver {
    delay: Duration,
    claims: u64,
}

impl ClaimObserver for AnimationObserver {
    fn on_claim(&mut self, lane: NonZeroU32, x: usize, y: usize, cell: &Cell) {
        self.claims += 1;
        trace!(
            "[{}] lane {} -> ({}, {}) center {} solid {} broken {}",
            self.claims,
            lane,
            x,
            y,
            cell.lane_center,
            cell.solid_marking,
            cell.broken_marking
        );
        thread::sleep(self.delay);
    }
}

fn level_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Entries of a file list; relative paths are resolved against the list's directory.
fn read_file_list(list: &Path) -> Result<Vec<PathBuf>> {
    let text = fs::read_to_string(list)
        .with_context(|| format!("reading file list {}", list.display()))?;
    let base = list.parent().unwrap_or_else(|| Path::new(""));

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| base.join(line))
        .collect())
}

fn is_svg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("svg"))
}

fn collect_inputs(args: &Args) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for list in &args.file_lists {
        inputs.extend(read_file_list(list)?);
    }

    for input in &args.inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_svg(e.path()))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            info!("{}: {} SVG files", input.display(), found.len());
            inputs.extend(found);
        } else {
            inputs.push(input.clone());
        }
    }

    Ok(inputs)
}

/// `<input stem>.map`, next to the input or inside `output_dir`.
fn output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let out = input.with_extension("map");
    match (output_dir, out.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => out,
    }
}

fn process_one(
    input: &Path,
    args: &Args,
    opts: &RenderOptions,
    observer: Option<&mut dyn ClaimObserver>,
) -> Result<Option<MapReport>> {
    let output = output_path(input, args.output_dir.as_deref());
    if args.skip_existing && output.exists() {
        info!("{} exists, skipping {}", output.display(), input.display());
        return Ok(None);
    }

    let creator = MapCreator::now(&args.origin, &args.description);
    let report = convert_file(input, &output, opts, creator, observer)?;
    Ok(Some(report))
}

fn write_summary(path: &Path, reports: &[MapReport]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, reports)?;
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level_filter(args.verbose)),
    )
    .init();

    if !(args.fraction > 0.0 && args.fraction <= 1.0) {
        bail!("--fraction must be in (0, 1], got {}", args.fraction);
    }
    let opts = RenderOptions {
        fraction: args.fraction,
    };

    if let Some(dir) = &args.output_dir {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let inputs = collect_inputs(&args)?;
    if inputs.is_empty() {
        bail!("no input files (pass SVG files, directories or --file lists)");
    }

    info!("Processing {} files...", inputs.len());
    let start = Instant::now();

    let results: Vec<(&PathBuf, Result<Option<MapReport>>)> = match args.animation {
        Some(ms) => {
            let mut observer = AnimationObserver {
                delay: Duration::from_millis(ms),
                claims: 0,
            };
            inputs
                .iter()
                .map(|input| {
                    let observer = &mut observer as &mut dyn ClaimObserver;
                    (input, process_one(input, &args, &opts, Some(observer)))
                })
                .collect()
        }
        None => inputs
            .par_iter()
            .map(|input| (input, process_one(input, &args, &opts, None)))
            .collect(),
    };

    let mut reports = Vec::with_capacity(results.len());
    let mut failed = 0usize;
    for (input, result) in results {
        match result {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(err) => {
                failed += 1;
                error!("Error processing {}: {:#}", input.display(), err);
            }
        }
    }

    let skipped_lanes: usize = reports.iter().map(MapReport::skipped_lanes).sum();
    let token_errors: usize = reports.iter().map(MapReport::token_errors).sum();
    info!(
        "Wrote {} maps in {:.2?} ({} lanes skipped, {} path tokens rejected)",
        reports.len(),
        start.elapsed(),
        skipped_lanes,
        token_errors
    );

    if let Some(path) = &args.summary {
        write_summary(path, &reports)?;
        info!("Summary written to {}", path.display());
    }

    if failed > 0 {
        bail!("{} of {} files failed", failed, inputs.len());
    }
    Ok(())
}
