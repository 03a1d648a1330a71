//! Per-stratum sample allocation for stratified random sampling.
//!
//! Two methods:
//! - fixed values: the user types every stratum's sample count;
//! - area based proportion: with enabled strata pixel counts `p_i` and expected
//!   per-stratum standard errors `e_i`,
//!     S_i = sqrt(e_i · (1 − e_i))
//!     r_i = p_i / Σ p
//!     N   = (Σ r_i · S_i / E)²          (E = total expected standard error)
//!     n_i ≈ r_i · N
//!
//! Integer counts are apportioned with the largest-remainder method so the
//! enabled total is exactly `round(N)`, and an edited stratum's difference is
//! spread over the other enabled strata without changing that total.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default expected standard error of a new stratum.
pub const DEFAULT_STD_ERROR: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    FixedValues,
    AreaBasedProportion,
}

impl std::fmt::Display for AllocationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationMethod::FixedValues => write!(f, "fixed values"),
            AllocationMethod::AreaBasedProportion => write!(f, "area based proportion"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumAllocation {
    pub pixel_value: i64,
    /// Population size of the stratum, in pixels.
    pub pixel_count: u64,
    pub std_error: f64,
    pub enabled: bool,
    pub num_samples: u64,
}

/// The allocation table of one categorical raster under one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationTable {
    pub method: AllocationMethod,
    pub total_std_error: f64,
    pub strata: Vec<StratumAllocation>,
}

impl AllocationTable {
    /// Fixed-values table: every stratum enabled with zero samples.
    pub fn fixed(pixel_values: &[i64]) -> Self {
        Self {
            method: AllocationMethod::FixedValues,
            total_std_error: 0.0,
            strata: pixel_values
                .iter()
                .map(|&pixel_value| StratumAllocation {
                    pixel_value,
                    pixel_count: 0,
                    std_error: DEFAULT_STD_ERROR,
                    enabled: true,
                    num_samples: 0,
                })
                .collect(),
        }
    }

    /// Area-based table from `(pixel value, pixel count)` pairs.
    pub fn area_based(pixel_counts: &[(i64, u64)], total_std_error: f64) -> Result<Self> {
        let mut table = Self {
            method: AllocationMethod::AreaBasedProportion,
            total_std_error,
            strata: pixel_counts
                .iter()
                .map(|&(pixel_value, pixel_count)| StratumAllocation {
                    pixel_value,
                    pixel_count,
                    std_error: DEFAULT_STD_ERROR,
                    enabled: true,
                    num_samples: 0,
                })
                .collect(),
        };
        table.recompute()?;
        Ok(table)
    }

    /// Sum of `num_samples` over enabled strata.
    pub fn total_samples(&self) -> u64 {
        self.strata.iter().filter(|s| s.enabled).map(|s| s.num_samples).sum()
    }

    /// Unrounded total sample size `N` of the area-based formula.
    pub fn expected_total(&self) -> Result<f64> {
        if !(self.total_std_error > 0.0) {
            return Err(Error::InvalidInput(format!(
                "total expected standard error must be positive, got {}",
                self.total_std_error
            )));
        }
        let enabled: Vec<&StratumAllocation> = self.strata.iter().filter(|s| s.enabled).collect();
        let total_pixels: u64 = enabled.iter().map(|s| s.pixel_count).sum();
        if total_pixels == 0 {
            return Ok(0.0);
        }
        let mut weighted = 0.0;
        for s in &enabled {
            if !(0.0..=1.0).contains(&s.std_error) {
                return Err(Error::InvalidInput(format!(
                    "std error {} of pixel value {} is outside [0, 1]",
                    s.std_error, s.pixel_value
                )));
            }
            let ratio = s.pixel_count as f64 / total_pixels as f64;
            weighted += ratio * (s.std_error * (1.0 - s.std_error)).sqrt();
        }
        Ok((weighted / self.total_std_error).powi(2))
    }

    /// Full area-based recomputation. Disabled strata get zero samples.
    /// No-op for fixed-values tables.
    pub fn recompute(&mut self) -> Result<()> {
        if self.method == AllocationMethod::FixedValues {
            return Ok(());
        }
        let n = self.expected_total()?;
        let total = n.round() as u64;
        let weights: Vec<f64> = self
            .strata
            .iter()
            .map(|s| if s.enabled { s.pixel_count as f64 } else { 0.0 })
            .collect();
        let counts = apportion(&weights, total);
        for (s, c) in self.strata.iter_mut().zip(counts) {
            s.num_samples = c;
        }
        log::debug!("area based allocation: N = {n:.2}, {} samples", self.total_samples());
        Ok(())
    }

    pub fn set_total_std_error(&mut self, total_std_error: f64) -> Result<()> {
        let previous = self.total_std_error;
        self.total_std_error = total_std_error;
        self.recompute().inspect_err(|_| self.total_std_error = previous)
    }

    pub fn set_std_error(&mut self, index: usize, std_error: f64) -> Result<()> {
        let previous = self.stratum(index)?.std_error;
        self.strata[index].std_error = std_error;
        self.recompute().inspect_err(|_| self.strata[index].std_error = previous)
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        self.stratum(index)?;
        self.strata[index].enabled = enabled;
        self.recompute()
    }

    /// Edit one stratum's sample count.
    ///
    /// Fixed values: stored as is. Area based proportion: the difference
    /// `old − new` is spread over the other enabled strata proportionally to
    /// their pixel counts, keeping the enabled total unchanged. On error the
    /// table is left untouched.
    pub fn set_num_samples(&mut self, index: usize, num_samples: u64) -> Result<()> {
        let old = self.stratum(index)?.num_samples;
        if self.method == AllocationMethod::FixedValues {
            self.strata[index].num_samples = num_samples;
            return Ok(());
        }
        if old == num_samples {
            return Ok(());
        }
        if !self.strata[index].enabled {
            return Err(Error::Rebalance { index, reason: "stratum is disabled".into() });
        }

        let total = self.total_samples();
        if num_samples > total {
            return Err(Error::Rebalance {
                index,
                reason: format!("{num_samples} exceeds the total of {total} samples"),
            });
        }
        let others: Vec<usize> = (0..self.strata.len())
            .filter(|&i| i != index && self.strata[i].enabled)
            .collect();
        let others_pixels: u64 = others.iter().map(|&i| self.strata[i].pixel_count).sum();
        if others.is_empty() || others_pixels == 0 {
            return Err(Error::Rebalance {
                index,
                reason: "no other enabled stratum can absorb the difference".into(),
            });
        }

        let diff = old as f64 - num_samples as f64;
        let others_total = total - num_samples;
        let ideal: Vec<f64> = others
            .iter()
            .map(|&i| {
                let ratio = self.strata[i].pixel_count as f64 / others_pixels as f64;
                (self.strata[i].num_samples as f64 + ratio * diff).max(0.0)
            })
            .collect();
        let counts = apportion(&ideal, others_total);

        self.strata[index].num_samples = num_samples;
        for (&i, c) in others.iter().zip(counts) {
            self.strata[i].num_samples = c;
        }
        Ok(())
    }

    /// `(pixel values, targets)` for the sampler: enabled strata with samples.
    pub fn sampling_targets(&self) -> (Vec<i64>, Vec<usize>) {
        self.strata
            .iter()
            .filter(|s| s.enabled && s.num_samples > 0)
            .map(|s| (s.pixel_value, s.num_samples as usize))
            .unzip()
    }

    fn stratum(&self, index: usize) -> Result<&StratumAllocation> {
        self.strata.get(index).ok_or(Error::StratumOutOfRange(index))
    }
}

/// Split `total` into non-negative integers proportional to `weights`
/// (largest-remainder method). Zero weights receive nothing unless every
/// weight is zero, in which case everything is zero.
pub fn apportion(weights: &[f64], total: u64) -> Vec<u64> {
    let sum: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if sum <= 0.0 || total == 0 {
        return vec![0; weights.len()];
    }
    let quotas: Vec<f64> = weights
        .iter()
        .map(|&w| if w > 0.0 { w / sum * total as f64 } else { 0.0 })
        .collect();
    let mut counts: Vec<u64> = quotas.iter().map(|q| q.floor() as u64).collect();
    let assigned: u64 = counts.iter().sum();

    let mut order: Vec<usize> = (0..weights.len()).filter(|&i| weights[i] > 0.0).collect();
    order.sort_by(|&a, &b| {
        let ra = quotas[a] - quotas[a].floor();
        let rb = quotas[b] - quotas[b].floor();
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b))
    });
    // The shortfall is below the number of positive weights.
    for &i in order.iter().take(total.saturating_sub(assigned) as usize) {
        counts[i] += 1;
    }
    counts
}

// ── Cache ────────────────────────────────────────────────────────────────────

/// Allocation tables keyed by categorical raster and method, so that reopening
/// the same raster/method pair returns the previously edited table. Entries
/// live until explicitly removed.
#[derive(Debug, Default)]
pub struct AllocationCache {
    tables: HashMap<(String, AllocationMethod), AllocationTable>,
}

impl AllocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, raster_key: &str, method: AllocationMethod) -> Option<&AllocationTable> {
        self.tables.get(&(raster_key.to_string(), method))
    }

    pub fn get_mut(&mut self, raster_key: &str, method: AllocationMethod) -> Option<&mut AllocationTable> {
        self.tables.get_mut(&(raster_key.to_string(), method))
    }

    /// Stored table for the pair, or a new one built by `init`.
    pub fn table_or_insert_with<F>(
        &mut self,
        raster_key: &str,
        method: AllocationMethod,
        init: F,
    ) -> Result<&mut AllocationTable>
    where
        F: FnOnce() -> Result<AllocationTable>,
    {
        use std::collections::hash_map::Entry;
        match self.tables.entry((raster_key.to_string(), method)) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                log::debug!("new {method} allocation table for {raster_key}");
                Ok(e.insert(init()?))
            }
        }
    }

    pub fn remove(&mut self, raster_key: &str, method: AllocationMethod) -> Option<AllocationTable> {
        self.tables.remove(&(raster_key.to_string(), method))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
