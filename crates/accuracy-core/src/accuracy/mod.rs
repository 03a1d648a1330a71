//! Accuracy assessment of a thematic map from classified samples.
//!
//! Map classes are the strata (Olofsson et al. 2014). With `n_ij` the error
//! matrix counts, `n_i.` the row totals, `N_i` the mapped pixels of class `i`
//! and `W_i = N_i / Σ N`:
//!
//!   p_ij = W_i · n_ij / n_i.
//!   U_i  = n_ii / n_i.               V(U_i) = U_i (1 − U_i) / (n_i. − 1)
//!   P_j  = p_jj / p_.j
//!   O    = Σ p_jj                    V(O)   = Σ W_i² U_i (1 − U_i) / (n_i. − 1)
//!   Â_j  = A · p_.j                  V(p_.j) = Σ W_i² (n_ij/n_i.)(1 − n_ij/n_i.) / (n_i. − 1)
//!
//! A stratum with mapped pixels but fewer than two samples leaves every
//! variance it enters undefined. Undefined values are `None`.

pub mod export;
pub mod matrix;
pub mod units;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::LabelConfig;
use crate::point::ClassificationPoint;
use crate::raster::RasterSource;
pub use matrix::ErrorMatrix;
use matrix::ratio;
use units::AreaUnit;

// ── Settings ─────────────────────────────────────────────────────────────────

/// User-adjustable parameters of an assessment. Persisted with the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracySettings {
    /// Output area unit; `None` uses the thematic raster's own unit.
    pub area_unit: Option<AreaUnit>,
    pub z_score: f64,
    pub csv_separator: char,
    pub csv_decimal_separator: char,
}

impl Default for AccuracySettings {
    fn default() -> Self {
        Self {
            area_unit: None,
            z_score: 1.96,
            csv_separator: ';',
            csv_decimal_separator: '.',
        }
    }
}

impl AccuracySettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.z_score > 0.0) || !self.z_score.is_finite() {
            return Err(Error::InvalidInput(format!("z score must be positive, got {}", self.z_score)));
        }
        if self.csv_separator == self.csv_decimal_separator {
            return Err(Error::InvalidInput(format!(
                "CSV field and decimal separators are both {:?}",
                self.csv_separator
            )));
        }
        Ok(())
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// An estimate with its standard error and confidence half-width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Estimate {
    pub value: Option<f64>,
    pub std_error: Option<f64>,
    /// `z · std_error`.
    pub half_width: Option<f64>,
}

impl Estimate {
    fn new(value: Option<f64>, variance: Option<f64>, z_score: f64) -> Self {
        let std_error = match value {
            Some(_) => variance.filter(|v| v.is_finite() && *v >= 0.0).map(f64::sqrt),
            None => None,
        };
        Self { value, std_error, half_width: std_error.map(|se| z_score * se) }
    }

    fn scaled(self, factor: f64) -> Self {
        Self {
            value: self.value.map(|v| v * factor),
            std_error: self.std_error.map(|v| v * factor),
            half_width: self.half_width.map(|v| v * factor),
        }
    }
}

/// Per-class statistics, in matrix axis order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassAccuracy {
    pub value: i64,
    pub name: Option<String>,
    /// Mapped pixels of this class in the whole thematic raster.
    pub pixel_count: u64,
    pub weight: f64,
    pub mapped_area: f64,
    pub users_accuracy: Estimate,
    pub producers_accuracy: Estimate,
    /// Estimated proportion of area `p_.j`.
    pub proportion: Estimate,
    pub estimated_area: Estimate,
    /// Unweighted accuracies straight from sample counts.
    pub point_users_accuracy: Option<f64>,
    pub point_producers_accuracy: Option<f64>,
}

/// Snapshot of one assessment. Recomputed whole on every parameter change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyResult {
    pub matrix: ErrorMatrix,
    /// Area-weighted proportions `p_ij`, row-major like the matrix.
    pub proportions: Vec<Vec<f64>>,
    pub classes: Vec<ClassAccuracy>,
    pub overall_accuracy: Estimate,
    pub point_overall_accuracy: Option<f64>,
    pub z_score: f64,
    pub area_unit: AreaUnit,
    /// Area of one pixel in `area_unit`.
    pub pixel_area: f64,
    pub total_area: f64,
    /// `shape_id`s of classified samples with no thematic value under them.
    pub outside_thematic: Vec<u64>,
}

impl AccuracyResult {
    /// Derive every estimate from a matrix and per-class mapped pixel counts
    /// (in axis order).
    pub fn from_matrix(
        matrix: ErrorMatrix,
        pixel_counts: &[u64],
        pixel_area: f64,
        area_unit: AreaUnit,
        z_score: f64,
    ) -> Self {
        let n = matrix.size();
        let row: Vec<u64> = (0..n).map(|i| matrix.row_sum(i)).collect();
        let big_n: Vec<f64> = (0..n).map(|i| pixel_counts.get(i).copied().unwrap_or(0) as f64).collect();
        let total_pixels: f64 = big_n.iter().sum();
        let weighted = total_pixels > 0.0;
        let w: Vec<f64> = big_n.iter().map(|&ni| if weighted { ni / total_pixels } else { 0.0 }).collect();

        // Share of row i classified as j.
        let share = |i: usize, j: usize| -> f64 {
            if row[i] == 0 {
                0.0
            } else {
                matrix.get(i, j) as f64 / row[i] as f64
            }
        };
        // Σ c_i² · q(1 − q)/(n_i. − 1) over strata; None when a weighted stratum
        // has too few samples.
        let stratified_var = |coef: &dyn Fn(usize) -> f64, q: &dyn Fn(usize) -> f64, skip: Option<usize>| {
            let mut sum = 0.0;
            for i in (0..n).filter(|&i| Some(i) != skip) {
                let c = coef(i);
                if c == 0.0 {
                    continue;
                }
                if row[i] <= 1 {
                    return None;
                }
                let qi = q(i);
                sum += c * c * qi * (1.0 - qi) / (row[i] - 1) as f64;
            }
            Some(sum)
        };

        let proportions: Vec<Vec<f64>> =
            (0..n).map(|i| (0..n).map(|j| w[i] * share(i, j)).collect()).collect();
        let col_p: Vec<f64> = (0..n).map(|j| (0..n).map(|i| proportions[i][j]).sum()).collect();
        let total_area = total_pixels * pixel_area;

        let classes = (0..n)
            .map(|k| {
                let users = ratio(matrix.get(k, k), row[k]);
                let users_var = match users {
                    Some(u) if row[k] > 1 => Some(u * (1.0 - u) / (row[k] - 1) as f64),
                    _ => None,
                };

                let producers = (weighted && col_p[k] > 0.0).then(|| proportions[k][k] / col_p[k]);
                let producers_var = producers.and_then(|p| {
                    let est_col: f64 = (0..n).filter(|&i| row[i] > 0).map(|i| big_n[i] * share(i, k)).sum();
                    if est_col <= 0.0 {
                        return None;
                    }
                    let own = if big_n[k] == 0.0 {
                        0.0
                    } else {
                        let u = users.filter(|_| row[k] > 1)?;
                        big_n[k].powi(2) * (1.0 - p).powi(2) * u * (1.0 - u) / (row[k] - 1) as f64
                    };
                    let others = stratified_var(&|i| big_n[i], &|i| share(i, k), Some(k))?;
                    Some((own + p * p * others) / est_col.powi(2))
                });

                let proportion_value = weighted.then_some(col_p[k]);
                let proportion_var = stratified_var(&|i| w[i], &|i| share(i, k), None);
                let proportion = Estimate::new(proportion_value, proportion_var, z_score);

                ClassAccuracy {
                    value: matrix.values()[k],
                    name: None,
                    pixel_count: big_n[k] as u64,
                    weight: w[k],
                    mapped_area: big_n[k] * pixel_area,
                    users_accuracy: Estimate::new(users, users_var, z_score),
                    producers_accuracy: Estimate::new(producers, producers_var, z_score),
                    proportion,
                    estimated_area: if total_area > 0.0 { proportion.scaled(total_area) } else { Estimate::default() },
                    point_users_accuracy: matrix.users_accuracy(k),
                    point_producers_accuracy: matrix.producers_accuracy(k),
                }
            })
            .collect();

        let overall = (weighted && n > 0).then(|| (0..n).map(|k| proportions[k][k]).sum::<f64>());
        let overall_var = stratified_var(&|i| w[i], &|i| share(i, i), None);

        Self {
            point_overall_accuracy: matrix.overall_accuracy(),
            matrix,
            proportions,
            classes,
            overall_accuracy: Estimate::new(overall, overall_var, z_score),
            z_score,
            area_unit,
            pixel_area,
            total_area,
            outside_thematic: Vec::new(),
        }
    }

    /// Number of paired samples in the matrix.
    pub fn samples(&self) -> u64 {
        self.matrix.total()
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Accuracy engine of one ledger.
///
/// Holds the mapped pixel count of every class it has seen. The thematic
/// raster is fixed for a ledger, so the cache is never invalidated.
#[derive(Debug, Default)]
pub struct AccuracyAssessment {
    pixel_counts: HashMap<i64, u64>,
}

impl AccuracyAssessment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapped pixels of `value`, counted on first request.
    pub fn pixel_count(&mut self, thematic: &dyn RasterSource, value: i64) -> u64 {
        *self.pixel_counts.entry(value).or_insert_with(|| {
            log::debug!("counting thematic pixels of class {value}");
            thematic.pixel_count(value)
        })
    }

    pub fn cached_classes(&self) -> usize {
        self.pixel_counts.len()
    }

    /// Assess paired thematic and classified labels.
    pub fn compute_from_labels(
        &mut self,
        thematic_values: &[i64],
        classified_values: &[i64],
        thematic: &dyn RasterSource,
        settings: &AccuracySettings,
    ) -> Result<AccuracyResult> {
        settings.validate()?;
        let matrix = ErrorMatrix::from_labels(thematic_values, classified_values)?;
        let counts: Vec<u64> = matrix.values().iter().map(|&v| self.pixel_count(thematic, v)).collect();

        let base_unit = thematic.distance_unit().area_unit();
        let area_unit = settings.area_unit.unwrap_or(base_unit);
        let (dx, dy) = thematic.pixel_size();
        let pixel_area = dx * dy * base_unit.factor_to(area_unit);

        let result = AccuracyResult::from_matrix(matrix, &counts, pixel_area, area_unit, settings.z_score);
        log::info!(
            "accuracy assessment over {} samples and {} classes, z = {}, area in {}",
            result.samples(),
            result.matrix.size(),
            settings.z_score,
            area_unit
        );
        Ok(result)
    }

    /// Assess the classified points of a ledger against the thematic map.
    ///
    /// Points with no thematic value under them are left out of the matrix and
    /// listed in `outside_thematic`.
    pub fn compute(
        &mut self,
        points: &[ClassificationPoint],
        labels: &BTreeMap<u32, LabelConfig>,
        thematic: &dyn RasterSource,
        settings: &AccuracySettings,
    ) -> Result<AccuracyResult> {
        let mut classified: Vec<&ClassificationPoint> = points.iter().filter(|p| p.is_classified).collect();
        if classified.is_empty() {
            return Err(Error::NothingClassified);
        }
        classified.sort_by_key(|p| p.shape_id);

        let mut thematic_values = Vec::with_capacity(classified.len());
        let mut classified_values = Vec::with_capacity(classified.len());
        let mut outside = Vec::new();
        for p in classified {
            let Some(classif_id) = p.classif_id else { continue };
            let label = labels.get(&classif_id).ok_or(Error::UnknownLabel(classif_id))?;
            let class = label.thematic_class.ok_or(Error::MissingThematicClass { classif_id })?;
            match thematic.value_at(p.position.x, p.position.y) {
                Some(v) => {
                    thematic_values.push(v);
                    classified_values.push(class);
                }
                None => outside.push(p.shape_id),
            }
        }
        if !outside.is_empty() {
            log::warn!("{} classified samples fall outside the thematic map", outside.len());
        }

        let mut result = self.compute_from_labels(&thematic_values, &classified_values, thematic, settings)?;
        let names: HashMap<i64, &str> = labels
            .values()
            .filter_map(|l| l.thematic_class.map(|c| (c, l.name.as_str())))
            .collect();
        for class in &mut result.classes {
            class.name = names.get(&class.value).map(|s| s.to_string());
        }
        result.outside_thematic = outside;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ClassRaster;
    use approx::assert_relative_eq;

    #[test]
    fn four_sample_scenario_point_statistics() {
        let m = ErrorMatrix::from_labels(&[1, 1, 2, 2], &[1, 2, 2, 2]).unwrap();
        let r = AccuracyResult::from_matrix(m, &[50, 50], 1.0, AreaUnit::SquareMeters, 1.96);
        assert_relative_eq!(r.point_overall_accuracy.unwrap(), 0.75);
        assert_relative_eq!(r.classes[1].point_users_accuracy.unwrap(), 1.0);
        assert_relative_eq!(r.classes[0].point_producers_accuracy.unwrap(), 1.0);
        assert_eq!(r.samples(), 4);
    }

    #[test]
    fn stratified_estimates_match_hand_computation() {
        // Rows (map): class 1 → [1 correct, 1 wrong], class 2 → [0, 2 correct].
        // Class 1 covers 3/4 of the map.
        let m = ErrorMatrix::from_labels(&[1, 1, 2, 2], &[1, 2, 2, 2]).unwrap();
        let r = AccuracyResult::from_matrix(m, &[300, 100], 2.0, AreaUnit::SquareMeters, 2.0);

        // p = [[0.375, 0.375], [0, 0.25]]
        assert_relative_eq!(r.proportions[0][0], 0.375);
        assert_relative_eq!(r.proportions[0][1], 0.375);
        assert_relative_eq!(r.proportions[1][1], 0.25);

        let o = r.overall_accuracy;
        assert_relative_eq!(o.value.unwrap(), 0.625);
        // V(O) = 0.75² · 0.5·0.5/1 + 0.25² · 1·0/1
        assert_relative_eq!(o.std_error.unwrap(), (0.5625f64 * 0.25).sqrt());
        assert_relative_eq!(o.half_width.unwrap(), 2.0 * (0.5625f64 * 0.25).sqrt());

        let c1 = &r.classes[0];
        assert_relative_eq!(c1.users_accuracy.value.unwrap(), 0.5);
        assert_relative_eq!(c1.producers_accuracy.value.unwrap(), 1.0);
        assert_relative_eq!(c1.proportion.value.unwrap(), 0.375);
        assert_relative_eq!(r.total_area, 800.0);
        assert_relative_eq!(c1.estimated_area.value.unwrap(), 300.0);
        assert_relative_eq!(c1.mapped_area, 600.0);

        let c2 = &r.classes[1];
        assert_relative_eq!(c2.producers_accuracy.value.unwrap(), 0.25 / 0.625);
        // V(p_.2) = 0.75² · 0.5·0.5/1 + 0.25² · 0 = 0.140625
        assert_relative_eq!(c2.proportion.std_error.unwrap(), 0.140625f64.sqrt());
        assert_relative_eq!(c2.estimated_area.std_error.unwrap(), 800.0 * 0.140625f64.sqrt());
    }

    #[test]
    fn producers_variance_follows_the_stratified_formula() {
        let m = ErrorMatrix::from_labels(&[1, 1, 2, 2], &[1, 2, 2, 2]).unwrap();
        let r = AccuracyResult::from_matrix(m, &[300, 100], 1.0, AreaUnit::SquareMeters, 1.96);
        // Class 2: P = 0.4, U_2 = 1, N̂_.2 = 300·0.5 + 100·1 = 250.
        // V = [100²·0.6²·0 + 0.4²·300²·0.25/1] / 250²
        let expected = (0.16 * 90_000.0 * 0.25) / 62_500.0;
        assert_relative_eq!(r.classes[1].producers_accuracy.std_error.unwrap(), f64::sqrt(expected));
    }

    #[test]
    fn undefined_terms_are_not_applicable() {
        // Class 3 is only ever a classified value and has no mapped pixels.
        let m = ErrorMatrix::from_labels(&[1, 1, 1], &[1, 3, 1]).unwrap();
        let r = AccuracyResult::from_matrix(m, &[10, 0], 1.0, AreaUnit::SquareMeters, 1.96);
        let c3 = &r.classes[1];
        assert_eq!(c3.users_accuracy.value, None);
        assert_eq!(c3.point_users_accuracy, None);
        // Classified as 3 once but never mapped as 3.
        assert_eq!(c3.producers_accuracy.value, Some(0.0));
        assert_eq!(c3.point_producers_accuracy, Some(0.0));
        assert_eq!(c3.users_accuracy.std_error, None);

        // A single-sample stratum with mapped pixels leaves variances undefined.
        let m = ErrorMatrix::from_labels(&[1, 2, 2], &[1, 2, 2]).unwrap();
        let r = AccuracyResult::from_matrix(m, &[5, 5], 1.0, AreaUnit::SquareMeters, 1.96);
        assert_relative_eq!(r.overall_accuracy.value.unwrap(), 1.0);
        assert_eq!(r.overall_accuracy.std_error, None);
        assert_eq!(r.classes[0].users_accuracy.std_error, None);
    }

    #[test]
    fn no_pixels_means_no_area_weighting() {
        let m = ErrorMatrix::from_labels(&[1, 2], &[1, 2]).unwrap();
        let r = AccuracyResult::from_matrix(m, &[0, 0], 1.0, AreaUnit::SquareMeters, 1.96);
        assert_eq!(r.overall_accuracy.value, None);
        assert_eq!(r.classes[0].estimated_area.value, None);
        assert_relative_eq!(r.point_overall_accuracy.unwrap(), 1.0);
    }

    fn ledger_inputs() -> (ClassRaster, Vec<ClassificationPoint>, BTreeMap<u32, LabelConfig>) {
        // 4×1 map, 10 m pixels: 1 1 2 nodata.
        let raster = ClassRaster::new(
            vec![1, 1, 2, 0],
            4,
            1,
            crate::raster::Extent::new(0.0, 0.0, 40.0, 10.0),
            Some(0),
        )
        .unwrap();
        let mut points: Vec<ClassificationPoint> =
            (0..4).map(|i| ClassificationPoint::new(i + 1, i as f64 * 10.0 + 5.0, 5.0)).collect();
        points[0].set_label(Some(10));
        points[1].set_label(Some(20));
        points[2].set_label(Some(20));
        points[3].set_label(Some(10));
        let mut labels = BTreeMap::new();
        labels.insert(10, LabelConfig { name: "forest".into(), color: String::new(), thematic_class: Some(1) });
        labels.insert(20, LabelConfig { name: "water".into(), color: String::new(), thematic_class: Some(2) });
        (raster, points, labels)
    }

    #[test]
    fn ledger_points_are_assessed_against_the_map() {
        let (raster, points, labels) = ledger_inputs();
        let settings = AccuracySettings { area_unit: Some(AreaUnit::Hectares), ..AccuracySettings::default() };
        let mut engine = AccuracyAssessment::new();
        let r = engine.compute(&points, &labels, &raster, &settings).unwrap();

        assert_eq!(r.outside_thematic, vec![4]);
        assert_eq!(r.samples(), 3);
        assert_eq!(r.matrix.count(1, 1), 1);
        assert_eq!(r.matrix.count(1, 2), 1);
        assert_eq!(r.matrix.count(2, 2), 1);
        assert_eq!(r.classes[0].name.as_deref(), Some("forest"));
        assert_eq!(r.classes[0].pixel_count, 2);
        assert_relative_eq!(r.pixel_area, 0.01);
        assert_eq!(engine.cached_classes(), 2);

        // Changing parameters recomputes everything but reuses the pixel counts.
        let z = AccuracySettings { z_score: 1.0, ..settings };
        let again = engine.compute(&points, &labels, &raster, &z).unwrap();
        assert_eq!(engine.cached_classes(), 2);
        assert_eq!(again.matrix, r.matrix);
        assert_eq!(again.z_score, 1.0);
    }

    #[test]
    fn labels_without_thematic_class_abort() {
        let (raster, points, mut labels) = ledger_inputs();
        labels.get_mut(&20).unwrap().thematic_class = None;
        let err = AccuracyAssessment::new()
            .compute(&points, &labels, &raster, &AccuracySettings::default())
            .unwrap_err();
        assert!(matches!(err, Error::MissingThematicClass { classif_id: 20 }));
    }

    #[test]
    fn nothing_classified_is_an_error() {
        let (raster, mut points, labels) = ledger_inputs();
        for p in &mut points {
            p.set_label(None);
        }
        let err = AccuracyAssessment::new()
            .compute(&points, &labels, &raster, &AccuracySettings::default())
            .unwrap_err();
        assert!(matches!(err, Error::NothingClassified));
    }

    #[test]
    fn settings_are_validated() {
        let bad_z = AccuracySettings { z_score: 0.0, ..AccuracySettings::default() };
        assert!(bad_z.validate().is_err());
        let same_sep = AccuracySettings { csv_decimal_separator: ';', ..AccuracySettings::default() };
        assert!(same_sep.validate().is_err());
    }
}
