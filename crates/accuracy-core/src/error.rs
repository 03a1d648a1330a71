use thiserror::Error;

/// Errors raised by the sampling and accuracy-assessment engine.
///
/// Partial sampling results and undefined statistics are not errors; they are
/// reported through `SamplingStatus` and `None` estimates respectively.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no samples requested")]
    ZeroSamples,

    #[error("label id {0} is not configured")]
    UnknownLabel(u32),

    #[error("label id {classif_id} has no thematic class assigned")]
    MissingThematicClass { classif_id: u32 },

    #[error("stratum index {0} is out of range")]
    StratumOutOfRange(usize),

    #[error("cannot rebalance stratum {index}: {reason}")]
    Rebalance { index: usize, reason: String },

    #[error("raster data length {len} does not match {width}x{height}")]
    RasterShape { len: usize, width: usize, height: usize },

    #[error("ledger has no classified samples")]
    NothingClassified,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
}

pub type Result<T> = std::result::Result<T, Error>;
