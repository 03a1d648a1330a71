/// Accuracy assessment tool: compares the labels of a classification ledger
/// with the thematic map and reports the error matrix, user's/producer's and
/// overall accuracy, and area estimates with confidence intervals.
use std::fs;
use std::path::{Path, PathBuf};

use accuracy_core::accuracy::export::CsvFormat;
use accuracy_core::accuracy::units::AreaUnit;
use accuracy_core::raster::{ClassRaster, Extent};
use accuracy_core::{vector, AccuracyResult, ClassificationLedger};
use anyhow::{anyhow, Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "assess", about = "Accuracy assessment of a thematic map from classified samples")]
struct Args {
    /// GeoJSON sampling file the ledger was built on
    samples: PathBuf,

    /// Ledger file (defaults to `<samples>.ledger.json`)
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Thematic raster (.tif or .json)
    #[arg(long)]
    thematic: PathBuf,

    #[arg(long)]
    extent: Option<String>,

    #[arg(long)]
    nodata: Option<i64>,

    /// Confidence multiplier; defaults to the ledger's setting
    #[arg(long)]
    z_score: Option<f64>,

    /// Area unit, e.g. `ha`, `km²` or `square_kilometers`; defaults to the
    /// ledger's setting, then the map unit
    #[arg(long)]
    area_unit: Option<String>,

    /// Write the result tables as CSV
    #[arg(long)]
    csv: Option<PathBuf>,

    /// CSV field separator
    #[arg(long)]
    separator: Option<char>,

    /// CSV decimal separator
    #[arg(long)]
    decimal_separator: Option<char>,

    /// Write the text report here instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write the full result as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Store the settings used back into the ledger
    #[arg(long)]
    save_settings: bool,
}

fn apply_settings(args: &Args, ledger: &mut ClassificationLedger) -> Result<()> {
    let settings = &mut ledger.accuracy_settings;
    if let Some(z) = args.z_score {
        settings.z_score = z;
    }
    if let Some(text) = &args.area_unit {
        settings.area_unit = Some(AreaUnit::parse(text).ok_or_else(|| anyhow!("unknown area unit {text:?}"))?);
    }
    if let Some(sep) = args.separator {
        settings.csv_separator = sep;
    }
    if let Some(sep) = args.decimal_separator {
        settings.csv_decimal_separator = sep;
    }
    settings.validate()?;
    Ok(())
}

fn write_outputs(args: &Args, ledger: &ClassificationLedger, result: &AccuracyResult) -> Result<()> {
    if let Some(path) = &args.csv {
        let s = &ledger.accuracy_settings;
        CsvFormat::new(s.csv_separator, s.csv_decimal_separator)?
            .write(result, path)
            .with_context(|| format!("failed to export results to {}", path.display()))?;
        eprintln!("[assess] CSV → {}", path.display());
    }
    if let Some(path) = &args.json {
        fs::write(path, serde_json::to_string_pretty(result)?).with_context(|| format!("writing {}", path.display()))?;
        eprintln!("[assess] JSON → {}", path.display());
    }
    match &args.report {
        Some(path) => {
            fs::write(path, result.to_string()).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("[assess] report → {}", path.display());
        }
        None => print!("{result}"),
    }
    Ok(())
}

fn run(args: &Args) -> Result<AccuracyResult> {
    let ledger_path = args.ledger.clone().unwrap_or_else(|| args.samples.with_extension("ledger.json"));
    let points = vector::read_classification_points(&args.samples)
        .with_context(|| format!("reading samples {}", args.samples.display()))?;
    let mut ledger = ClassificationLedger::load(&ledger_path, points)
        .with_context(|| format!("loading ledger {}", ledger_path.display()))?;

    let extent = args.extent.as_deref().map(str::parse::<Extent>).transpose()?;
    let thematic = ClassRaster::open(&args.thematic, extent, args.nodata)
        .with_context(|| format!("loading thematic raster {}", args.thematic.display()))?;

    apply_settings(args, &mut ledger)?;
    if !ledger.is_completed() {
        eprintln!(
            "[assess] warning: {} of {} samples are not classified yet",
            ledger.unclassified_count(),
            ledger.len()
        );
    }

    let result = ledger.assess(&thematic)?;
    if !result.outside_thematic.is_empty() {
        eprintln!(
            "[assess] {} classified samples fall outside the thematic map and were left out",
            result.outside_thematic.len()
        );
    }
    write_outputs(args, &ledger, &result)?;

    if args.save_settings {
        ledger.save(&ledger_path)?;
        eprintln!("[assess] settings saved to {}", ledger_path.display());
    }
    Ok(result)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    run(&args)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use accuracy_core::ledger::LabelConfig;
    use accuracy_core::point::{Position, SamplePoint};
    use std::collections::BTreeMap;

    /// Two-class map, a sampling file over it and a fully labelled ledger.
    fn fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let map = ClassRaster::with_unit_pixels(vec![1, 1, 2, 2, 1, 1, 2, 2], 4, 2, None).unwrap();
        let map_path = dir.join("map.json");
        fs::write(&map_path, serde_json::to_string(&map).unwrap()).unwrap();

        let samples_path = dir.join("samples.geojson");
        let samples: Vec<SamplePoint> = [(0.5, 0.5), (1.5, 1.5), (2.5, 0.5), (3.5, 1.5)]
            .iter()
            .zip(1..)
            .map(|(&(x, y), id)| SamplePoint { id, position: Position::new(x, y), stratum_index: None })
            .collect();
        vector::write_sample_points(&samples_path, &samples).unwrap();

        let mut labels = BTreeMap::new();
        labels.insert(1, LabelConfig { name: "forest".into(), color: String::new(), thematic_class: Some(1) });
        labels.insert(2, LabelConfig { name: "water".into(), color: String::new(), thematic_class: Some(2) });
        let points = vector::read_classification_points(&samples_path).unwrap();
        let mut ledger = ClassificationLedger::new("samples.geojson", points, 0).with_labels(labels);
        // Sample 2 sits on forest but is labelled water.
        for (id, label) in [(1, 1), (2, 2), (3, 2), (4, 2)] {
            let i = ledger.position_of(id).unwrap();
            ledger.classify(i, Some(label)).unwrap();
        }
        ledger.save(&samples_path.with_extension("ledger.json")).unwrap();
        (samples_path, map_path)
    }

    #[test]
    fn assessment_writes_every_output() {
        let dir = tempfile::tempdir().unwrap();
        let (samples, map) = fixture(dir.path());
        let csv = dir.path().join("results.csv");
        let report = dir.path().join("report.txt");
        let args = Args::parse_from([
            "assess",
            samples.to_str().unwrap(),
            "--thematic",
            map.to_str().unwrap(),
            "--area-unit",
            "ha",
            "--csv",
            csv.to_str().unwrap(),
            "--decimal-separator",
            ",",
            "--report",
            report.to_str().unwrap(),
            "--save-settings",
        ]);
        let result = run(&args).unwrap();
        assert_eq!(result.samples(), 4);
        assert_eq!(result.matrix.count(1, 2), 1);
        assert_eq!(result.area_unit, AreaUnit::Hectares);
        assert!(fs::read_to_string(&csv).unwrap().contains("0,7500"));
        assert!(fs::read_to_string(&report).unwrap().contains("overall accuracy"));

        let text = fs::read_to_string(samples.with_extension("ledger.json")).unwrap();
        assert!(text.contains("\"hectares\""));
    }

    #[test]
    fn bad_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (samples, map) = fixture(dir.path());
        let base = ["assess", samples.to_str().unwrap(), "--thematic", map.to_str().unwrap()];
        let bad_unit = Args::parse_from(base.iter().copied().chain(["--area-unit", "furlongs"]));
        assert!(run(&bad_unit).is_err());
        let bad_z = Args::parse_from(base.iter().copied().chain(["--z-score=-1"]));
        assert!(run(&bad_z).is_err());
    }
}
