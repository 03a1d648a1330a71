/// Sampling design tool: draws simple or stratified random samples from a
/// thematic map and writes them as a GeoJSON point file plus a JSON summary.
///
/// Rasters are GeoTIFFs (extent given with `--extent`) or JSON raster
/// documents. Stratified allocations come from fixed per-stratum values or
/// from area-based proportion under a target standard error.
use std::fs;
use std::path::{Path, PathBuf};

use accuracy_core::allocation::{AllocationMethod, AllocationTable};
use accuracy_core::raster::{ClassRaster, Extent, RasterSource};
use accuracy_core::sampling::session::{RasterRef, SamplingSession, SamplingSummary};
use accuracy_core::sampling::{
    parse_pixel_values, NeighborRule, Sampler, SamplingConfig, SamplingDesign, SamplingStatus,
};
use accuracy_core::vector;
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Design {
    Simple,
    Stratified,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Method {
    /// Per-stratum counts given with --targets
    Fixed,
    /// Counts derived from stratum areas and expected standard errors
    Area,
}

#[derive(Parser, Debug)]
#[command(name = "sampler", about = "Generate simple or stratified random sampling points")]
struct Args {
    /// Thematic raster (.tif or .json)
    #[arg(long)]
    thematic: PathBuf,

    /// Thematic raster extent `xmin,ymin,xmax,ymax` (required for GeoTIFF)
    #[arg(long)]
    extent: Option<String>,

    /// Thematic nodata value
    #[arg(long)]
    nodata: Option<i64>,

    /// Categorical raster used for categories or strata (.tif or .json)
    #[arg(long)]
    categorical: Option<PathBuf>,

    /// Categorical raster extent; defaults to the thematic extent
    #[arg(long)]
    categorical_extent: Option<String>,

    #[arg(long)]
    categorical_nodata: Option<i64>,

    /// JSON file with a full sampling configuration; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "simple")]
    design: Design,

    /// Number of samples (simple design)
    #[arg(short, long)]
    num_samples: Option<usize>,

    /// Categorical pixel values a simple sample must fall on, e.g. "1,3"
    #[arg(long)]
    categories: Option<String>,

    /// Allocation method (stratified design)
    #[arg(long, value_enum, default_value = "area")]
    method: Method,

    /// Strata pixel values; area method defaults to every class present
    #[arg(long)]
    pixel_values: Option<String>,

    /// Per-stratum sample counts (fixed method), same order as --pixel-values
    #[arg(long)]
    targets: Option<String>,

    /// Overall expected standard error (area method)
    #[arg(long, default_value = "0.01")]
    total_std_error: f64,

    /// Per-stratum expected standard error override, `PIXEL=SE`, repeatable
    #[arg(long = "std-error", value_name = "PIXEL=SE")]
    std_errors: Vec<String>,

    /// Manual stratum count edit rebalanced over the others, `PIXEL=N`, repeatable
    #[arg(long = "set", value_name = "PIXEL=N")]
    edits: Vec<String>,

    /// Stratum pixel value to leave out of the allocation, repeatable
    #[arg(long = "disable", value_name = "PIXEL")]
    disabled: Vec<i64>,

    /// Minimum distance between samples, map units
    #[arg(long)]
    min_distance: Option<f64>,

    /// Neighbour rule: number of nearest pixels inspected
    #[arg(long, requires = "same_class")]
    neighbors: Option<usize>,

    /// Neighbour rule: how many of them must share the centre class
    #[arg(long, requires = "neighbors")]
    same_class: Option<usize>,

    /// Draws allowed per requested sample
    #[arg(long)]
    max_attempts: Option<u64>,

    /// Random seed (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Output GeoJSON point file; the summary is written next to it as .json
    #[arg(short, long, default_value = "random_sampling.geojson")]
    output: PathBuf,

    /// Print the stratified allocation and exit
    #[arg(long)]
    plan_only: bool,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn parse_assignment<T: std::str::FromStr>(text: &str) -> Result<(i64, T)> {
    let (k, v) = text.split_once('=').with_context(|| format!("expected PIXEL=VALUE, got {text:?}"))?;
    let pixel = k.trim().parse::<i64>().with_context(|| format!("invalid pixel value in {text:?}"))?;
    let value = v.trim().parse::<T>().ok().with_context(|| format!("invalid value in {text:?}"))?;
    Ok((pixel, value))
}

fn index_of(table: &AllocationTable, pixel: i64) -> Result<usize> {
    table
        .strata
        .iter()
        .position(|s| s.pixel_value == pixel)
        .with_context(|| format!("pixel value {pixel} is not a stratum"))
}

/// Build the allocation table and apply the requested edits in order:
/// disabled strata, std errors, then manual counts.
fn plan_allocation(args: &Args, categorical: &ClassRaster) -> Result<AllocationTable> {
    let selected = args.pixel_values.as_deref().map(parse_pixel_values).transpose()?;
    let mut table = match args.method {
        Method::Fixed => {
            let pixel_values = selected.context("--pixel-values is required with the fixed method")?;
            let targets = args
                .targets
                .as_deref()
                .map(parse_pixel_values)
                .transpose()?
                .context("--targets is required with the fixed method")?;
            if targets.len() != pixel_values.len() {
                bail!("{} targets for {} pixel values", targets.len(), pixel_values.len());
            }
            let mut table = AllocationTable::fixed(&pixel_values);
            for (i, &n) in targets.iter().enumerate() {
                if n < 0 {
                    bail!("negative target {n} for pixel value {}", pixel_values[i]);
                }
                table.set_num_samples(i, n as u64)?;
            }
            table
        }
        Method::Area => {
            let histogram = categorical.class_histogram();
            let counts: Vec<(i64, u64)> = match &selected {
                Some(values) => values.iter().map(|&v| (v, histogram.get(&v).copied().unwrap_or(0))).collect(),
                None => histogram.into_iter().collect(),
            };
            AllocationTable::area_based(&counts, args.total_std_error)?
        }
    };

    for &pixel in &args.disabled {
        let i = index_of(&table, pixel)?;
        table.set_enabled(i, false)?;
    }
    for text in &args.std_errors {
        let (pixel, se) = parse_assignment::<f64>(text)?;
        let i = index_of(&table, pixel)?;
        table.set_std_error(i, se)?;
    }
    for text in &args.edits {
        let (pixel, n) = parse_assignment::<u64>(text)?;
        let i = index_of(&table, pixel)?;
        table.set_num_samples(i, n)?;
    }
    Ok(table)
}

fn print_allocation(table: &AllocationTable) {
    eprintln!("[sampler] allocation ({}):", table.method);
    eprintln!("  {:>8} {:>12} {:>9} {:>8} {:>8}", "pixel", "pixels", "std err", "enabled", "samples");
    for s in &table.strata {
        eprintln!(
            "  {:>8} {:>12} {:>9.4} {:>8} {:>8}",
            s.pixel_value, s.pixel_count, s.std_error, s.enabled, s.num_samples
        );
    }
    eprintln!("  total samples: {}", table.total_samples());
}

fn build_config(args: &Args, allocation: Option<&AllocationTable>) -> Result<SamplingConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SamplingConfig::default(),
    };

    match (args.design, allocation) {
        (Design::Stratified, Some(table)) => {
            let (pixel_values, targets) = table.sampling_targets();
            config.design = SamplingDesign::Stratified { pixel_values, targets };
        }
        (Design::Stratified, None) => bail!("stratified sampling needs --categorical"),
        (Design::Simple, _) => {
            if args.num_samples.is_some() || args.categories.is_some() || args.config.is_none() {
                let categories = args.categories.as_deref().map(parse_pixel_values).transpose()?;
                let num_samples = match (&config.design, args.num_samples) {
                    (_, Some(n)) => n,
                    (SamplingDesign::Simple { num_samples, .. }, None) => *num_samples,
                    (SamplingDesign::Stratified { .. }, None) => bail!("--num-samples is required"),
                };
                config.design = SamplingDesign::Simple { num_samples, categories };
            }
        }
    }

    if let Some(d) = args.min_distance {
        config.min_distance = d;
    }
    if let (Some(neighbors), Some(same_class)) = (args.neighbors, args.same_class) {
        config.neighbor_rule = Some(NeighborRule { neighbors, same_class });
    }
    if args.max_attempts.is_some() {
        config.max_attempts = args.max_attempts;
    }
    config.seed = args.seed.unwrap_or_else(rand::random);
    config.validate()?;
    Ok(config)
}

fn summary_path(output: &Path) -> PathBuf {
    output.with_extension("json")
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let thematic_extent = args.extent.as_deref().map(str::parse::<Extent>).transpose()?;
    let thematic = ClassRaster::open(&args.thematic, thematic_extent, args.nodata)
        .with_context(|| format!("loading thematic raster {}", args.thematic.display()))?;
    eprintln!(
        "[sampler] thematic {}: {}×{} px, pixel {:?}",
        args.thematic.display(),
        thematic.width,
        thematic.height,
        thematic.pixel_size()
    );

    let categorical = match &args.categorical {
        Some(path) => {
            let extent = match args.categorical_extent.as_deref() {
                Some(text) => Some(text.parse::<Extent>()?),
                None => Some(thematic.extent),
            };
            let raster = ClassRaster::open(path, extent, args.categorical_nodata)
                .with_context(|| format!("loading categorical raster {}", path.display()))?;
            Some(raster)
        }
        None => None,
    };

    let allocation = match (args.design, &categorical) {
        (Design::Stratified, Some(cat)) => {
            let table = plan_allocation(&args, cat)?;
            print_allocation(&table);
            if table.method == AllocationMethod::AreaBasedProportion {
                eprintln!("  expected total: {:.2}", table.expected_total()?);
            }
            Some(table)
        }
        _ => None,
    };
    if args.plan_only {
        return Ok(());
    }

    let config = build_config(&args, allocation.as_ref())?;
    eprintln!(
        "[sampler] {} of {} points, seed {}",
        config.design.label(),
        config.design.total_requested(),
        config.seed
    );

    let requested = config.design.total_requested();
    let step = (requested / 10).max(1);
    let outcome = Sampler::new(&thematic, categorical.as_ref().map(|c| c as &dyn RasterSource))
        .generate_with(
            &config,
            &mut |p| {
                if p.accepted % step == 0 || p.accepted == p.requested {
                    eprintln!("  {}/{} points ({} draws)", p.accepted, p.requested, p.iterations);
                }
            },
            &Default::default(),
        )?;

    match outcome.status {
        SamplingStatus::Failed => {
            bail!(
                "no point satisfied the constraints after {} draws; nothing written",
                outcome.iterations
            );
        }
        SamplingStatus::Partial => eprintln!(
            "[sampler] warning: attempts exceeded, generated {} of {} points",
            outcome.generated(),
            outcome.requested
        ),
        _ => {}
    }

    let name = args
        .output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "random_sampling".to_string());
    let thematic_ref = RasterRef { path: args.thematic.display().to_string(), nodata: thematic.nodata };
    let categorical_ref = args
        .categorical
        .as_ref()
        .zip(categorical.as_ref())
        .map(|(path, r)| RasterRef { path: path.display().to_string(), nodata: r.nodata });
    let mut summary = SamplingSummary::new(&name, &config, &outcome, thematic_ref, categorical_ref);
    if let Some(table) = &allocation {
        summary = summary.with_allocation(table);
    }

    let Some(session) = SamplingSession::from_outcome(summary, outcome) else {
        bail!("sampling produced no points; nothing written");
    };
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    vector::write_sample_points(&args.output, &session.points)
        .with_context(|| format!("writing {}", args.output.display()))?;
    let summary_out = summary_path(&args.output);
    session.summary.save(&summary_out).with_context(|| format!("writing {}", summary_out.display()))?;

    eprintln!(
        "[sampler] {} points → {} (summary {})",
        session.points.len(),
        args.output.display(),
        summary_out.display()
    );
    Ok(())
}
