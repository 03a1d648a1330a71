//! Spatially constrained random sampling (simple and stratified designs).
//!
//! Candidates are drawn uniformly inside the thematic raster's extent and
//! accepted only when every active constraint holds. Constraints are checked
//! cheapest-first and stop at the first failure:
//!
//!   1. the thematic pixel under the point holds valid data
//!   2. the point lies inside the thematic extent
//!   3. no accepted point is closer than `min_distance` (k-d tree lookup)
//!   4. simple design with categories: the categorical pixel is one of them
//!   5. stratified design: the categorical pixel's stratum is not yet full
//!   6. neighbour rule `(K, M)`: at least M of the K nearest thematic pixels
//!      share the centre pixel's class
//!
//! The loop stops once the requested total is reached or after
//! `max_attempts × total` draws. Running out of attempts is a partial result,
//! not an error.

pub mod index;
pub mod session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::point::{Position, SamplePoint};
use crate::raster::RasterSource;
use index::SpatialIndex;

/// Attempts per requested sample used when the caller sets no cap.
pub const UNCAPPED_ATTEMPTS_PER_SAMPLE: u64 = 1_000_000;

/// Largest neighbour count a rule may ask for (the 7×7 window).
pub const MAX_NEIGHBORS: usize = 48;

/// Upper bound on the point buffer reserved before the loop starts.
const PREALLOCATED_POINTS: usize = 4096;

// ── Configuration ────────────────────────────────────────────────────────────

/// What to sample and how many.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "design", rename_all = "snake_case")]
pub enum SamplingDesign {
    /// `num_samples` points anywhere with valid data, optionally restricted to
    /// categorical raster classes.
    Simple {
        num_samples: usize,
        #[serde(default)]
        categories: Option<Vec<i64>>,
    },
    /// `targets[i]` points on categorical pixels equal to `pixel_values[i]`.
    Stratified {
        pixel_values: Vec<i64>,
        targets: Vec<usize>,
    },
}

impl SamplingDesign {
    /// Requested total, saturating at `usize::MAX`.
    pub fn total_requested(&self) -> usize {
        match self {
            SamplingDesign::Simple { num_samples, .. } => *num_samples,
            SamplingDesign::Stratified { targets, .. } => {
                targets.iter().fold(0usize, |acc, &t| acc.saturating_add(t))
            }
        }
    }

    pub fn needs_categorical(&self) -> bool {
        match self {
            SamplingDesign::Simple { categories, .. } => categories.is_some(),
            SamplingDesign::Stratified { .. } => true,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SamplingDesign::Simple { .. } => "simple random sampling",
            SamplingDesign::Stratified { .. } => "stratified random sampling",
        }
    }
}

/// Neighbour agreement: at least `same_class` of the `neighbors` nearest
/// thematic pixels must hold the centre pixel's class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborRule {
    pub neighbors: usize,
    pub same_class: usize,
}

impl std::fmt::Display for NeighborRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.same_class, self.neighbors)
    }
}

/// Full parameter set of one sampling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub design: SamplingDesign,
    /// Minimum Euclidean distance between accepted points, map units.
    pub min_distance: f64,
    pub neighbor_rule: Option<NeighborRule>,
    /// Draws allowed per requested sample; `None` falls back to
    /// [`UNCAPPED_ATTEMPTS_PER_SAMPLE`].
    pub max_attempts: Option<u64>,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            design: SamplingDesign::Simple { num_samples: 100, categories: None },
            min_distance: 0.0,
            neighbor_rule: None,
            max_attempts: None,
            seed: 42,
        }
    }
}

impl SamplingConfig {
    /// Reject configurations that cannot start a run.
    pub fn validate(&self) -> Result<()> {
        if self.design.total_requested() == 0 {
            return Err(Error::ZeroSamples);
        }
        if let SamplingDesign::Stratified { pixel_values, targets } = &self.design {
            if targets.iter().try_fold(0usize, |acc, &t| acc.checked_add(t)).is_none() {
                return Err(Error::InvalidInput("stratum targets overflow the sample total".into()));
            }
            if pixel_values.len() != targets.len() {
                return Err(Error::InvalidInput(format!(
                    "{} pixel values but {} stratum targets",
                    pixel_values.len(),
                    targets.len()
                )));
            }
        }
        if let SamplingDesign::Simple { categories: Some(c), .. } = &self.design {
            if c.is_empty() {
                return Err(Error::InvalidInput("empty categorical pixel value list".into()));
            }
        }
        if !(self.min_distance >= 0.0) || !self.min_distance.is_finite() {
            return Err(Error::InvalidInput(format!("invalid min distance {}", self.min_distance)));
        }
        if let Some(rule) = self.neighbor_rule {
            if rule.neighbors == 0 || rule.neighbors > MAX_NEIGHBORS || rule.same_class > rule.neighbors {
                return Err(Error::InvalidInput(format!("invalid neighbour rule {rule}")));
            }
        }
        if self.max_attempts == Some(0) {
            return Err(Error::InvalidInput("max attempts must be at least 1".into()));
        }
        Ok(())
    }

    fn max_iterations(&self) -> u64 {
        let per_sample = self.max_attempts.unwrap_or(UNCAPPED_ATTEMPTS_PER_SAMPLE);
        per_sample.saturating_mul(self.design.total_requested() as u64)
    }
}

/// Parse a comma-separated list of integer pixel values, e.g. `"1, 4,7"`.
pub fn parse_pixel_values(text: &str) -> Result<Vec<i64>> {
    text.split(',')
        .map(|s| {
            s.trim().parse::<i64>().map_err(|_| {
                Error::InvalidInput(format!(
                    "wrong pixel value {:?}: use integers separated by commas",
                    s.trim()
                ))
            })
        })
        .collect()
}

// ── Progress and cancellation ────────────────────────────────────────────────

/// Snapshot reported after every accepted point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingProgress {
    pub accepted: usize,
    pub requested: usize,
    pub iterations: u64,
}

/// Shared flag that stops a running sampler at its next draw.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStatus {
    /// Every requested point was generated.
    Complete,
    /// Attempts ran out with at least one point generated.
    Partial,
    /// Attempts ran out before any point was accepted.
    Failed,
    /// Stopped through a [`CancelToken`].
    Cancelled,
}

/// Draws discarded per failed constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub nodata: u64,
    pub outside_extent: u64,
    pub too_close: u64,
    pub category: u64,
    pub stratum_full: u64,
    pub neighbors: u64,
}

impl RejectionCounts {
    pub fn total(&self) -> u64 {
        self.nodata + self.outside_extent + self.too_close + self.category + self.stratum_full + self.neighbors
    }

    fn record(&mut self, r: Rejection) {
        match r {
            Rejection::NoData => self.nodata += 1,
            Rejection::OutsideExtent => self.outside_extent += 1,
            Rejection::TooClose => self.too_close += 1,
            Rejection::Category => self.category += 1,
            Rejection::StratumFull => self.stratum_full += 1,
            Rejection::Neighbors => self.neighbors += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplingOutcome {
    pub points: Vec<SamplePoint>,
    pub requested: usize,
    /// Points generated per stratum (stratified designs only).
    pub stratum_counts: Option<Vec<usize>>,
    pub iterations: u64,
    pub rejections: RejectionCounts,
    pub status: SamplingStatus,
}

impl SamplingOutcome {
    pub fn generated(&self) -> usize {
        self.points.len()
    }
}

// ── Sampler ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    NoData,
    OutsideExtent,
    TooClose,
    Category,
    StratumFull,
    Neighbors,
}

/// Per-run mutable state; owned by a single `generate` call.
struct RunState {
    index: SpatialIndex,
    points: Vec<SamplePoint>,
    stratum_counts: Vec<usize>,
}

/// Rejection sampler over a thematic raster and an optional categorical raster.
pub struct Sampler<'a> {
    thematic: &'a dyn RasterSource,
    categorical: Option<&'a dyn RasterSource>,
}

impl<'a> Sampler<'a> {
    pub fn new(thematic: &'a dyn RasterSource, categorical: Option<&'a dyn RasterSource>) -> Self {
        Self { thematic, categorical }
    }

    /// Run without progress reporting or cancellation.
    pub fn generate(&self, config: &SamplingConfig) -> Result<SamplingOutcome> {
        self.generate_with(config, &mut |_| {}, &CancelToken::new())
    }

    /// Run the rejection loop, calling `progress` after each accepted point.
    pub fn generate_with(
        &self,
        config: &SamplingConfig,
        progress: &mut dyn FnMut(SamplingProgress),
        cancel: &CancelToken,
    ) -> Result<SamplingOutcome> {
        config.validate()?;
        if config.design.needs_categorical() && self.categorical.is_none() {
            return Err(Error::InvalidInput(format!(
                "{} with categories needs a categorical raster",
                config.design.label()
            )));
        }

        let extent = self.thematic.extent();
        if !extent.is_valid() {
            return Err(Error::InvalidInput(format!("degenerate thematic extent {extent:?}")));
        }

        let requested = config.design.total_requested();
        let max_iterations = config.max_iterations();
        let mut rng = StdRng::seed_from_u64(config.seed);

        let n_strata = match &config.design {
            SamplingDesign::Stratified { targets, .. } => targets.len(),
            SamplingDesign::Simple { .. } => 0,
        };
        let mut state = RunState {
            index: SpatialIndex::new(),
            points: Vec::with_capacity(requested.min(PREALLOCATED_POINTS)),
            stratum_counts: vec![0; n_strata],
        };
        let mut rejections = RejectionCounts::default();
        let mut iterations = 0u64;
        let mut cancelled = false;

        log::info!(
            "{}: {} points requested, min distance {}, at most {} draws",
            config.design.label(),
            requested,
            config.min_distance,
            max_iterations
        );

        while iterations < max_iterations && state.points.len() < requested {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            iterations += 1;

            let candidate = Position::new(
                rng.gen_range(extent.xmin..extent.xmax),
                rng.gen_range(extent.ymin..extent.ymax),
            );
            let stratum = match self.check(candidate, config, &state) {
                Ok(stratum) => stratum,
                Err(r) => {
                    rejections.record(r);
                    continue;
                }
            };

            let id = state.points.len() as u64 + 1;
            state.index.insert(id, candidate);
            state.points.push(SamplePoint { id, position: candidate, stratum_index: stratum });
            if let Some(s) = stratum {
                state.stratum_counts[s] += 1;
            }
            progress(SamplingProgress { accepted: state.points.len(), requested, iterations });
        }

        let generated = state.points.len();
        let status = if cancelled {
            SamplingStatus::Cancelled
        } else if generated == requested {
            SamplingStatus::Complete
        } else if generated == 0 {
            SamplingStatus::Failed
        } else {
            SamplingStatus::Partial
        };

        match status {
            SamplingStatus::Complete => {
                log::info!("generated {generated}/{requested} points in {iterations} draws")
            }
            SamplingStatus::Partial => log::warn!(
                "attempts exceeded: generated only {generated}/{requested} points in {iterations} draws"
            ),
            SamplingStatus::Failed => {
                log::warn!("attempts exceeded: no point satisfied the constraints in {iterations} draws")
            }
            SamplingStatus::Cancelled => log::warn!("sampling cancelled after {generated}/{requested} points"),
        }
        log::debug!("rejections: {rejections:?}");

        Ok(SamplingOutcome {
            points: state.points,
            requested,
            stratum_counts: (n_strata > 0).then_some(state.stratum_counts),
            iterations,
            rejections,
            status,
        })
    }

    /// Accept or reject a candidate. On acceptance returns the stratum it fills.
    fn check(
        &self,
        p: Position,
        config: &SamplingConfig,
        state: &RunState,
    ) -> std::result::Result<Option<usize>, Rejection> {
        let centre = self.thematic.value_at(p.x, p.y).ok_or(Rejection::NoData)?;

        if !self.thematic.extent().contains(p.x, p.y) {
            return Err(Rejection::OutsideExtent);
        }

        if !state.index.is_clear(p, config.min_distance) {
            return Err(Rejection::TooClose);
        }

        let mut stratum = None;
        match &config.design {
            SamplingDesign::Simple { categories: Some(categories), .. } => {
                let value = self.categorical_value(p).ok_or(Rejection::Category)?;
                if !categories.contains(&value) {
                    return Err(Rejection::Category);
                }
            }
            SamplingDesign::Simple { categories: None, .. } => {}
            SamplingDesign::Stratified { pixel_values, targets } => {
                let value = self.categorical_value(p).ok_or(Rejection::Category)?;
                let idx = pixel_values.iter().position(|&v| v == value).ok_or(Rejection::Category)?;
                if state.stratum_counts[idx] >= targets[idx] {
                    return Err(Rejection::StratumFull);
                }
                stratum = Some(idx);
            }
        }

        if let Some(rule) = config.neighbor_rule {
            let agreeing = self
                .thematic
                .neighbor_values(p.x, p.y, rule.neighbors)
                .into_iter()
                .filter(|v| *v == Some(centre))
                .count();
            if agreeing < rule.same_class {
                return Err(Rejection::Neighbors);
            }
        }

        Ok(stratum)
    }

    fn categorical_value(&self, p: Position) -> Option<i64> {
        self.categorical.and_then(|r| r.value_at(p.x, p.y))
    }
}
