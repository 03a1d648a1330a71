//! Sampling design and accuracy assessment for thematic raster maps.
//!
//! Pipeline: [`allocation`] plans per-stratum targets, [`sampling`] draws
//! constrained random points, [`ledger`] tracks how each point was labelled,
//! and [`accuracy`] turns labelled points into an error matrix and
//! area-weighted accuracy estimates.

pub mod accuracy;
pub mod allocation;
pub mod error;
pub mod ledger;
pub mod point;
pub mod raster;
pub mod registry;
pub mod sampling;
pub mod vector;

pub use accuracy::{AccuracyAssessment, AccuracyResult, AccuracySettings, ErrorMatrix};
pub use allocation::{AllocationCache, AllocationMethod, AllocationTable};
pub use error::{Error, Result};
pub use ledger::{ClassificationLedger, LabelConfig};
pub use point::{ClassificationPoint, Position, SamplePoint};
pub use raster::{ClassRaster, Extent, RasterSource};
pub use registry::SessionRegistry;
pub use sampling::{Sampler, SamplingConfig, SamplingDesign, SamplingOutcome, SamplingStatus};
