/// Sample labelling tool: keeps a classification ledger for a sampling file
/// and records the label given to each sample.
///
/// The ledger is a JSON document next to the samples (`<samples>.ledger.json`
/// unless `--ledger` says otherwise). Labels are configured once at `init`
/// from a JSON map `{ "<classif id>": { "name", "color", "thematic_class" } }`.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use accuracy_core::ledger::{ClassificationLedger, LabelConfig, LedgerState, ViewState};
use accuracy_core::point::ClassificationPoint;
use accuracy_core::raster::{ClassRaster, Extent, RasterSource};
use accuracy_core::vector;
use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "classifier", about = "Label sampling points and export the classification")]
struct Cli {
    /// Ledger file (defaults to `<samples>.ledger.json`)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a ledger for a sampling file
    Init {
        /// GeoJSON sampling file
        samples: PathBuf,
        /// Label configuration JSON
        #[arg(long)]
        labels: PathBuf,
        /// Shuffle seed (random when omitted)
        #[arg(long)]
        seed: Option<u64>,
        /// Overwrite an existing ledger
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        map: MapArgs,
    },
    /// Label a sample, or clear its label
    Classify {
        samples: PathBuf,
        /// Label id; omit with --clear
        #[arg(required_unless_present = "clear")]
        label: Option<u32>,
        /// Sample by `id` attribute instead of the active one
        #[arg(long)]
        shape_id: Option<u64>,
        #[arg(long, conflicts_with = "label")]
        clear: bool,
        /// Move to the next sample afterwards
        #[arg(long)]
        next: bool,
    },
    /// Jump to a display position
    Goto { samples: PathBuf, index: usize },
    /// Merge changes made to the sampling file
    Reload { samples: PathBuf },
    /// Print progress
    Status { samples: PathBuf },
    /// Write the classified samples as GeoJSON
    Export {
        samples: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        map: MapArgs,
    },
}

/// Thematic map used to fill `Thematic Class` and `Match`.
#[derive(ClapArgs, Debug, Default)]
struct MapArgs {
    /// Thematic raster (.tif or .json)
    #[arg(long)]
    thematic: Option<PathBuf>,
    #[arg(long)]
    extent: Option<String>,
    #[arg(long)]
    nodata: Option<i64>,
}

impl MapArgs {
    fn open(&self) -> Result<Option<ClassRaster>> {
        let Some(path) = &self.thematic else { return Ok(None) };
        let extent = self.extent.as_deref().map(str::parse::<Extent>).transpose()?;
        let raster = ClassRaster::open(path, extent, self.nodata)
            .with_context(|| format!("loading thematic raster {}", path.display()))?;
        Ok(Some(raster))
    }
}

fn ledger_path(cli: &Cli, samples: &Path) -> PathBuf {
    cli.ledger.clone().unwrap_or_else(|| samples.with_extension("ledger.json"))
}

fn read_labels(path: &Path) -> Result<BTreeMap<u32, LabelConfig>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let labels: BTreeMap<u32, LabelConfig> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    if labels.is_empty() {
        bail!("{} defines no labels", path.display());
    }
    Ok(labels)
}

fn read_samples(samples: &Path) -> Result<Vec<ClassificationPoint>> {
    vector::read_classification_points(samples).with_context(|| format!("reading samples {}", samples.display()))
}

fn read_state(ledger: &Path) -> Result<LedgerState> {
    let text = fs::read_to_string(ledger)
        .with_context(|| format!("reading {} (run `classifier init` first)", ledger.display()))?;
    Ok(serde_json::from_str(&text).with_context(|| format!("parsing {}", ledger.display()))?)
}

/// Ledger restored against the current sampling file.
fn open_ledger(ledger: &Path, samples: &Path) -> Result<ClassificationLedger> {
    Ok(ClassificationLedger::from_state(read_state(ledger)?, read_samples(samples)?))
}

fn print_status(ledger: &ClassificationLedger) {
    eprintln!(
        "[classifier] {}: {} classified, {} unclassified of {}{}",
        ledger.source(),
        ledger.classified_count(),
        ledger.unclassified_count(),
        ledger.len(),
        if ledger.is_completed() { " (completed)" } else { "" }
    );
    if let Some(p) = ledger.current_point() {
        let label = p
            .classif_id
            .and_then(|id| ledger.labels().get(&id).map(|l| format!("{id} {}", l.name)))
            .unwrap_or_else(|| "unclassified".to_string());
        eprintln!(
            "  active sample {}/{}: id {} at ({:.3}, {:.3}), {}",
            ledger.current_index() + 1,
            ledger.len(),
            p.shape_id,
            p.position.x,
            p.position.y,
            label
        );
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Init { samples, labels, seed, force, map } => {
            let path = ledger_path(cli, samples);
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let points = read_samples(samples)?;
            let seed = seed.unwrap_or_else(rand::random);
            let mut ledger =
                ClassificationLedger::new(&samples.display().to_string(), points, seed).with_labels(read_labels(labels)?);
            if let Some(raster) = map.open()? {
                ledger.view = ViewState::for_unit(raster.distance_unit());
            }
            ledger.save(&path)?;
            eprintln!("[classifier] ledger {} with {} samples (seed {seed})", path.display(), ledger.len());
            print_status(&ledger);
        }
        Command::Classify { samples, label, shape_id, clear, next } => {
            let path = ledger_path(cli, samples);
            let mut ledger = open_ledger(&path, samples)?;
            let index = match shape_id {
                Some(id) => ledger.position_of(*id).with_context(|| format!("no sample with id {id}"))?,
                None => ledger.current_index(),
            };
            let label = if *clear { None } else { *label };
            ledger.classify(index, label)?;
            if *next {
                ledger.set_current_index(index + 1);
            } else {
                ledger.set_current_index(index);
            }
            ledger.save(&path)?;
            print_status(&ledger);
        }
        Command::Goto { samples, index } => {
            let path = ledger_path(cli, samples);
            let mut ledger = open_ledger(&path, samples)?;
            ledger.set_current_index(index.saturating_sub(1));
            ledger.save(&path)?;
            print_status(&ledger);
        }
        Command::Reload { samples } => {
            let path = ledger_path(cli, samples);
            let state = read_state(&path)?;
            let saved = state.saved_points();
            let mut ledger = ClassificationLedger::from_state(state, saved);
            let outcome = ledger.reload(read_samples(samples)?);
            if outcome.is_unchanged() {
                eprintln!("[classifier] the sampling file has no changes");
            } else {
                eprintln!(
                    "[classifier] reloaded: {} modified, {} added and {} removed",
                    outcome.modified, outcome.added, outcome.removed
                );
                ledger.save(&path)?;
            }
            print_status(&ledger);
        }
        Command::Status { samples } => {
            let ledger = open_ledger(&ledger_path(cli, samples), samples)?;
            print_status(&ledger);
        }
        Command::Export { samples, output, map } => {
            let ledger = open_ledger(&ledger_path(cli, samples), samples)?;
            let raster = map.open()?;
            if ledger.with_thematic_classes() && raster.is_none() {
                eprintln!("[classifier] warning: no --thematic map, `Thematic Class` and `Match` stay empty");
            }
            ledger
                .export_classification(output, raster.as_ref().map(|r| r as &dyn RasterSource))
                .with_context(|| format!("writing {}", output.display()))?;
            eprintln!("[classifier] {} samples → {}", ledger.len(), output.display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    run(&cli)
}
