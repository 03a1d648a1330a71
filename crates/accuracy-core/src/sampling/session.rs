//! A finished sampling run and its persisted summary document.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{SamplingConfig, SamplingDesign, SamplingOutcome, SamplingStatus};
use crate::allocation::{AllocationMethod, AllocationTable};
use crate::error::Result;
use crate::point::SamplePoint;

/// Where a raster came from, as recorded in the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterRef {
    pub path: String,
    pub nodata: Option<i64>,
}

/// Summary of one sampling run. Field order is the document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingSummary {
    pub name: String,
    pub sampling_type: String,
    pub thematic_raster: RasterRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorical_raster: Option<RasterRef>,
    pub status: SamplingStatus,
    pub total_requested: usize,
    pub total_of_samples: usize,
    pub min_distance: f64,
    /// Categorical pixel values a simple design was restricted to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_categorical_raster: Option<Vec<i64>>,
    /// Neighbour rule as `same/neighbors`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_neighbors_aggregation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_method: Option<AllocationMethod>,
    /// Generated points per stratum pixel value; strata left empty are omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_samples: Option<BTreeMap<i64, usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_expected_std_error: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_error: Option<BTreeMap<i64, f64>>,
    pub seed: u64,
}

impl SamplingSummary {
    pub fn new(
        name: &str,
        config: &SamplingConfig,
        outcome: &SamplingOutcome,
        thematic_raster: RasterRef,
        categorical_raster: Option<RasterRef>,
    ) -> Self {
        let (in_categorical_raster, num_samples) = match &config.design {
            SamplingDesign::Simple { categories, .. } => (categories.clone(), None),
            SamplingDesign::Stratified { pixel_values, .. } => {
                let counts = outcome.stratum_counts.as_deref().unwrap_or_default();
                let generated = pixel_values
                    .iter()
                    .zip(counts)
                    .filter(|&(_, &n)| n > 0)
                    .map(|(&v, &n)| (v, n))
                    .collect();
                (None, Some(generated))
            }
        };

        Self {
            name: name.to_string(),
            sampling_type: config.design.label().to_string(),
            thematic_raster,
            categorical_raster,
            status: outcome.status,
            total_requested: outcome.requested,
            total_of_samples: outcome.generated(),
            min_distance: config.min_distance,
            in_categorical_raster,
            with_neighbors_aggregation: config.neighbor_rule.map(|r| r.to_string()),
            sampling_method: None,
            num_samples,
            total_expected_std_error: None,
            std_error: None,
            seed: config.seed,
        }
    }

    /// Record the allocation a stratified run was planned with.
    pub fn with_allocation(mut self, table: &AllocationTable) -> Self {
        self.sampling_method = Some(table.method);
        if table.method == AllocationMethod::AreaBasedProportion {
            self.total_expected_std_error = Some(table.total_std_error);
            self.std_error = Some(
                table
                    .strata
                    .iter()
                    .filter(|s| s.enabled && s.num_samples > 0)
                    .map(|s| (s.pixel_value, s.std_error))
                    .collect(),
            );
        }
        self
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// A registered sampling: its summary plus the accepted points.
#[derive(Debug, Clone)]
pub struct SamplingSession {
    pub summary: SamplingSummary,
    pub points: Vec<SamplePoint>,
}

impl SamplingSession {
    /// Build a session from a run, or `None` when the run produced nothing
    /// worth keeping.
    pub fn from_outcome(summary: SamplingSummary, outcome: SamplingOutcome) -> Option<Self> {
        match outcome.status {
            SamplingStatus::Failed => None,
            _ if outcome.points.is_empty() => None,
            _ => Some(Self { summary, points: outcome.points }),
        }
    }

    pub fn name(&self) -> &str {
        &self.summary.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ClassRaster;
    use crate::sampling::{NeighborRule, Sampler};

    fn two_class() -> ClassRaster {
        let data = (0..100).map(|i| if i % 10 < 5 { 1 } else { 2 }).collect();
        ClassRaster::with_unit_pixels(data, 10, 10, None).unwrap()
    }

    fn thematic_ref() -> RasterRef {
        RasterRef { path: "thematic.tif".into(), nodata: None }
    }

    #[test]
    fn stratified_summary_keeps_only_filled_strata() {
        let r = two_class();
        let config = SamplingConfig {
            design: SamplingDesign::Stratified { pixel_values: vec![1, 2, 9], targets: vec![3, 2, 1] },
            max_attempts: Some(50),
            neighbor_rule: Some(NeighborRule { neighbors: 8, same_class: 4 }),
            ..SamplingConfig::default()
        };
        let outcome = Sampler::new(&r, Some(&r)).generate(&config).unwrap();
        let mut table = AllocationTable::fixed(&[1, 2, 9]);
        table.set_num_samples(0, 3).unwrap();
        let summary = SamplingSummary::new("s1", &config, &outcome, thematic_ref(), Some(thematic_ref()))
            .with_allocation(&table);

        let counts = summary.num_samples.clone().unwrap();
        assert_eq!(counts.get(&1), Some(&3));
        assert_eq!(counts.get(&2), Some(&2));
        assert!(!counts.contains_key(&9));
        assert_eq!(summary.with_neighbors_aggregation.as_deref(), Some("4/8"));
        assert_eq!(summary.sampling_method, Some(AllocationMethod::FixedValues));
        assert!(summary.std_error.is_none());
        assert_eq!(summary.status, SamplingStatus::Partial);
    }

    #[test]
    fn summary_round_trips_through_json() {
        let r = two_class();
        let config = SamplingConfig {
            design: SamplingDesign::Simple { num_samples: 5, categories: Some(vec![2]) },
            min_distance: 1.0,
            ..SamplingConfig::default()
        };
        let outcome = Sampler::new(&r, Some(&r)).generate(&config).unwrap();
        let summary = SamplingSummary::new("s2", &config, &outcome, thematic_ref(), Some(thematic_ref()));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s2.json");
        summary.save(&path).unwrap();
        let loaded = SamplingSummary::load(&path).unwrap();
        assert_eq!(loaded, summary);
        assert_eq!(loaded.sampling_type, "simple random sampling");
        assert_eq!(loaded.in_categorical_raster, Some(vec![2]));
    }

    #[test]
    fn failed_runs_are_not_kept() {
        let r = two_class();
        let config = SamplingConfig {
            design: SamplingDesign::Simple { num_samples: 3, categories: Some(vec![7]) },
            max_attempts: Some(5),
            ..SamplingConfig::default()
        };
        let outcome = Sampler::new(&r, Some(&r)).generate(&config).unwrap();
        let summary = SamplingSummary::new("s3", &config, &outcome, thematic_ref(), Some(thematic_ref()));
        assert!(SamplingSession::from_outcome(summary, outcome).is_none());
    }
}
