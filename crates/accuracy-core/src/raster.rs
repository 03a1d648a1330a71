//! Categorical raster adapter.
//!
//! The engine only talks to rasters through [`RasterSource`]: a value lookup at
//! a map coordinate, per-class pixel counts, the extent and the pixel size, and
//! the class values of the pixels around a location. [`ClassRaster`] is the
//! in-memory implementation used by the tools and the tests; it can be read
//! from a GeoTIFF band or from a JSON document.
//!
//! Storage is row-major and north-up: row 0 is the `ymax` edge, column 0 the
//! `xmin` edge. Coordinates are map units (f64); class values are i64.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tiff::decoder::{Decoder, DecodingResult};

use crate::accuracy::units::DistanceUnit;
use crate::error::{Error, Result};

/// Axis-aligned bounding rectangle in map units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Finite bounds with a positive, finite width and height.
    pub fn is_valid(&self) -> bool {
        let (w, h) = (self.width(), self.height());
        [self.xmin, self.ymin, self.xmax, self.ymax].iter().all(|v| v.is_finite())
            && w > 0.0
            && h > 0.0
            && w.is_finite()
            && h.is_finite()
    }

    /// Half-open on the max edges so that every contained point maps to a pixel.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x < self.xmax && y > self.ymin && y <= self.ymax
    }
}

/// Parses `xmin,ymin,xmax,ymax`.
impl std::str::FromStr for Extent {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let v: Vec<f64> = text
            .split(',')
            .map(|s| s.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| Error::InvalidInput(format!("invalid extent {text:?}")))?;
        let extent = match v[..] {
            [xmin, ymin, xmax, ymax] => Self::new(xmin, ymin, xmax, ymax),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "extent needs 4 values xmin,ymin,xmax,ymax, got {}",
                    v.len()
                )))
            }
        };
        if !extent.is_valid() {
            return Err(Error::InvalidInput(format!("degenerate or non-finite extent {text:?}")));
        }
        Ok(extent)
    }
}

/// Narrow read interface over a categorical raster band.
pub trait RasterSource {
    fn extent(&self) -> Extent;

    /// Pixel size `(dx, dy)` in map units, both positive.
    fn pixel_size(&self) -> (f64, f64);

    /// Class value of the pixel under `(x, y)`. Nodata and out-of-bounds map to `None`.
    fn value_at(&self, x: f64, y: f64) -> Option<i64>;

    /// Number of pixels holding `class_value` in the whole raster.
    fn pixel_count(&self, class_value: i64) -> u64;

    /// Values of the `k` pixels nearest to the pixel under `(x, y)`, centre excluded.
    /// Neighbours outside the raster or on nodata are `None`.
    fn neighbor_values(&self, x: f64, y: f64, k: usize) -> Vec<Option<i64>>;

    /// Linear unit of the raster's coordinate reference system.
    fn distance_unit(&self) -> DistanceUnit {
        DistanceUnit::Meters
    }
}

/// In-memory categorical raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRaster {
    /// Row-major class values; pixels equal to `nodata` carry no data.
    pub data: Vec<i64>,
    pub width: usize,
    pub height: usize,
    pub extent: Extent,
    #[serde(default)]
    pub nodata: Option<i64>,
    #[serde(default)]
    pub distance_unit: DistanceUnit,
}

impl ClassRaster {
    /// Build a raster from row-major values, checking the data length.
    pub fn new(
        data: Vec<i64>,
        width: usize,
        height: usize,
        extent: Extent,
        nodata: Option<i64>,
    ) -> Result<Self> {
        if width == 0 || height == 0 || width.checked_mul(height) != Some(data.len()) {
            return Err(Error::RasterShape { len: data.len(), width, height });
        }
        if !extent.is_valid() {
            return Err(Error::InvalidInput(format!("degenerate raster extent {extent:?}")));
        }
        Ok(Self {
            data,
            width,
            height,
            extent,
            nodata,
            distance_unit: DistanceUnit::Meters,
        })
    }

    /// Raster whose pixels are unit squares: extent `(0, 0)–(width, height)`.
    pub fn with_unit_pixels(data: Vec<i64>, width: usize, height: usize, nodata: Option<i64>) -> Result<Self> {
        Self::new(data, width, height, Extent::new(0.0, 0.0, width as f64, height as f64), nodata)
    }

    pub fn with_distance_unit(mut self, unit: DistanceUnit) -> Self {
        self.distance_unit = unit;
        self
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<i64> {
        let v = self.data[row * self.width + col];
        if Some(v) == self.nodata {
            None
        } else {
            Some(v)
        }
    }

    /// Pixel `(row, col)` under a map coordinate, or `None` outside the extent.
    pub fn pixel_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !self.extent.contains(x, y) {
            return None;
        }
        let (dx, dy) = self.pixel_size();
        let col = ((x - self.extent.xmin) / dx).floor() as usize;
        let row = ((self.extent.ymax - y) / dy).floor() as usize;
        Some((row.min(self.height - 1), col.min(self.width - 1)))
    }

    /// Pixel counts for every class value present, nodata excluded.
    pub fn class_histogram(&self) -> BTreeMap<i64, u64> {
        histogram(&self.data, self.nodata)
    }

    /// Read band 1 of a single-band GeoTIFF. Georeferencing is not parsed;
    /// the caller supplies the extent. Float pixels must hold integral values
    /// (NaN is treated as nodata).
    pub fn from_tiff(path: &Path, extent: Extent, nodata: Option<i64>) -> Result<Self> {
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;
        let (w, h) = decoder.dimensions()?;
        let (width, height) = (w as usize, h as usize);

        let nan_fill = nodata.unwrap_or(i64::MIN);
        let data: Vec<i64> = match decoder.read_image()? {
            DecodingResult::U8(v) => v.into_iter().map(i64::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(i64::from).collect(),
            DecodingResult::U32(v) => v.into_iter().map(i64::from).collect(),
            DecodingResult::U64(v) => v.into_iter().map(|p| p as i64).collect(),
            DecodingResult::I8(v) => v.into_iter().map(i64::from).collect(),
            DecodingResult::I16(v) => v.into_iter().map(i64::from).collect(),
            DecodingResult::I32(v) => v.into_iter().map(i64::from).collect(),
            DecodingResult::I64(v) => v,
            DecodingResult::F32(v) => integral_floats(v.into_iter().map(f64::from), nan_fill)?,
            DecodingResult::F64(v) => integral_floats(v.into_iter(), nan_fill)?,
            #[allow(unreachable_patterns)]
            _ => return Err(Error::InvalidInput(format!("unsupported pixel type in {}", path.display()))),
        };

        let nodata = if nodata.is_none() && data.contains(&i64::MIN) { Some(i64::MIN) } else { nodata };
        Self::new(data, width, height, extent, nodata)
    }

    /// Open a `.tif`/`.tiff` or `.json` raster. GeoTIFFs need `extent`; a
    /// given `nodata` overrides the one stored in a JSON document.
    pub fn open(path: &Path, extent: Option<Extent>, nodata: Option<i64>) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
        let mut raster = match ext.as_str() {
            "json" => Self::from_json_file(path)?,
            "tif" | "tiff" => {
                let extent = extent.ok_or_else(|| {
                    Error::InvalidInput(format!("{} needs an extent", path.display()))
                })?;
                Self::from_tiff(path, extent, nodata)?
            }
            _ => return Err(Error::InvalidInput(format!("unsupported raster format: {}", path.display()))),
        };
        if nodata.is_some() {
            raster.nodata = nodata;
        }
        Ok(raster)
    }

    /// Read a raster serialised as JSON (the `ClassRaster` field layout).
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let raster: ClassRaster = serde_json::from_str(&text)?;
        // Re-run the shape checks skipped by deserialisation.
        let unit = raster.distance_unit;
        Ok(Self::new(raster.data, raster.width, raster.height, raster.extent, raster.nodata)?
            .with_distance_unit(unit))
    }
}

impl RasterSource for ClassRaster {
    fn extent(&self) -> Extent {
        self.extent
    }

    fn pixel_size(&self) -> (f64, f64) {
        (
            self.extent.width() / self.width as f64,
            self.extent.height() / self.height as f64,
        )
    }

    fn value_at(&self, x: f64, y: f64) -> Option<i64> {
        let (row, col) = self.pixel_of(x, y)?;
        self.get(row, col)
    }

    fn pixel_count(&self, class_value: i64) -> u64 {
        if Some(class_value) == self.nodata {
            return 0;
        }
        self.data.iter().filter(|&&v| v == class_value).count() as u64
    }

    fn neighbor_values(&self, x: f64, y: f64, k: usize) -> Vec<Option<i64>> {
        let Some((row, col)) = self.pixel_of(x, y) else {
            return vec![None; k];
        };
        neighbor_offsets(k)
            .into_iter()
            .map(|(dr, dc)| {
                let r = row as i64 + dr;
                let c = col as i64 + dc;
                if r < 0 || c < 0 || r >= self.height as i64 || c >= self.width as i64 {
                    None
                } else {
                    self.get(r as usize, c as usize)
                }
            })
            .collect()
    }

    fn distance_unit(&self) -> DistanceUnit {
        self.distance_unit
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// The `k` pixel offsets closest to the centre, ordered by squared distance
/// then row then column. k=4 is the von Neumann set, k=8 the 3×3 window,
/// k=24 the 5×5 window.
pub fn neighbor_offsets(k: usize) -> Vec<(i64, i64)> {
    if k == 0 {
        return Vec::new();
    }
    // Smallest square window holding at least k non-centre pixels.
    let mut radius = 1i64;
    while ((2 * radius + 1) * (2 * radius + 1) - 1) < k as i64 {
        radius += 1;
    }
    let mut offsets: Vec<(i64, i64)> = (-radius..=radius)
        .flat_map(|dr| (-radius..=radius).map(move |dc| (dr, dc)))
        .filter(|&(dr, dc)| (dr, dc) != (0, 0))
        .collect();
    offsets.sort_by_key(|&(dr, dc)| (dr * dr + dc * dc, dr, dc));
    offsets.truncate(k);
    offsets
}

fn integral_floats(values: impl Iterator<Item = f64>, nan_fill: i64) -> Result<Vec<i64>> {
    values
        .map(|v| {
            if v.is_nan() {
                Ok(nan_fill)
            } else if v.fract() != 0.0 || !v.is_finite() {
                Err(Error::InvalidInput(format!("non-integer pixel value {v}")))
            } else {
                Ok(v as i64)
            }
        })
        .collect()
}

fn histogram_serial(data: &[i64], nodata: Option<i64>) -> BTreeMap<i64, u64> {
    let mut counts = BTreeMap::new();
    for &v in data {
        if Some(v) != nodata {
            *counts.entry(v).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(not(feature = "threading"))]
fn histogram(data: &[i64], nodata: Option<i64>) -> BTreeMap<i64, u64> {
    histogram_serial(data, nodata)
}

#[cfg(feature = "threading")]
fn histogram(data: &[i64], nodata: Option<i64>) -> BTreeMap<i64, u64> {
    use rayon::prelude::*;

    data.par_chunks(1 << 16)
        .map(|chunk| histogram_serial(chunk, nodata))
        .reduce(BTreeMap::new, |mut a, b| {
            for (k, n) in b {
                *a.entry(k).or_insert(0) += n;
            }
            a
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster_3x3() -> ClassRaster {
        // 1 1 2
        // 1 0 2    (0 = nodata)
        // 3 3 2
        ClassRaster::with_unit_pixels(vec![1, 1, 2, 1, 0, 2, 3, 3, 2], 3, 3, Some(0)).unwrap()
    }

    #[test]
    fn extent_parses_from_text() {
        let e: Extent = "0, 10, 100.5, 20".parse().unwrap();
        assert_eq!(e, Extent::new(0.0, 10.0, 100.5, 20.0));
        assert!("0,1,2".parse::<Extent>().is_err());
        assert!("a,b,c,d".parse::<Extent>().is_err());
        assert!("0,0,inf,2".parse::<Extent>().is_err());
        assert!("0,NaN,2,2".parse::<Extent>().is_err());
        assert!("5,0,1,2".parse::<Extent>().is_err());
    }

    #[test]
    fn non_finite_extent_is_rejected() {
        let bad = [
            Extent::new(0.0, 0.0, f64::INFINITY, 2.0),
            Extent::new(0.0, f64::NAN, 2.0, 2.0),
            Extent::new(1.0, 0.0, 1.0, 2.0),
            Extent::new(-f64::MAX, 0.0, f64::MAX, 2.0),
        ];
        for extent in bad {
            let err = ClassRaster::new(vec![1; 4], 2, 2, extent, None).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{extent:?}");
        }
    }

    #[test]
    fn open_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, serde_json::to_string(&raster_3x3()).unwrap()).unwrap();
        let r = ClassRaster::open(&path, None, Some(3)).unwrap();
        assert_eq!(r.nodata, Some(3));
        assert_eq!(r.value_at(0.5, 0.5), None);
        assert!(ClassRaster::open(&dir.path().join("map.tif"), None, None).is_err());
        assert!(ClassRaster::open(&dir.path().join("map.png"), None, None).is_err());
    }

    #[test]
    fn value_lookup_is_north_up() {
        let r = raster_3x3();
        assert_eq!(r.value_at(0.5, 2.5), Some(1)); // top-left
        assert_eq!(r.value_at(2.5, 2.5), Some(2)); // top-right
        assert_eq!(r.value_at(0.5, 0.5), Some(3)); // bottom-left
        assert_eq!(r.value_at(1.5, 1.5), None); // nodata centre
    }

    #[test]
    fn out_of_bounds_lookup_returns_none() {
        let r = raster_3x3();
        assert!(r.value_at(-0.1, 1.0).is_none());
        assert!(r.value_at(3.0, 1.0).is_none());
        assert!(r.value_at(1.0, 3.1).is_none());
        assert!(r.value_at(1.0, 0.0).is_none());
    }

    #[test]
    fn histogram_skips_nodata() {
        let r = raster_3x3();
        let h = r.class_histogram();
        assert_eq!(h.get(&1), Some(&3));
        assert_eq!(h.get(&2), Some(&3));
        assert_eq!(h.get(&3), Some(&2));
        assert!(!h.contains_key(&0));
        assert_eq!(r.pixel_count(2), 3);
        assert_eq!(r.pixel_count(0), 0);
    }

    #[test]
    fn neighbor_offsets_match_standard_windows() {
        assert_eq!(neighbor_offsets(4), vec![(-1, 0), (0, -1), (0, 1), (1, 0)]);
        let eight = neighbor_offsets(8);
        assert_eq!(eight.len(), 8);
        assert!(eight.iter().all(|&(dr, dc)| dr.abs() <= 1 && dc.abs() <= 1));
        let twenty_four = neighbor_offsets(24);
        assert!(twenty_four.iter().all(|&(dr, dc)| dr.abs() <= 2 && dc.abs() <= 2));
    }

    #[test]
    fn neighbor_values_mark_edges_and_nodata() {
        let r = raster_3x3();
        // Top-left pixel: up and left fall outside, right is 1, down is 1.
        let n = r.neighbor_values(0.5, 2.5, 4);
        assert_eq!(n, vec![None, None, Some(1), Some(1)]);
        // Top-middle pixel: the pixel below is nodata.
        let n = r.neighbor_values(1.5, 2.5, 4);
        assert_eq!(n, vec![None, Some(1), Some(2), None]);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let err = ClassRaster::with_unit_pixels(vec![1, 2, 3], 2, 2, None).unwrap_err();
        assert!(matches!(err, Error::RasterShape { len: 3, .. }));
    }

    #[test]
    fn json_roundtrip_keeps_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raster.json");
        let r = raster_3x3().with_distance_unit(DistanceUnit::Feet);
        std::fs::write(&path, serde_json::to_string(&r).unwrap()).unwrap();
        let back = ClassRaster::from_json_file(&path).unwrap();
        assert_eq!(back.data, r.data);
        assert_eq!(back.distance_unit, DistanceUnit::Feet);
    }

    #[test]
    fn tiff_integer_pixels_load_row_major() {
        use tiff::encoder::{colortype::Gray8, TiffEncoder};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.tif");
        let mut file = File::create(&path).unwrap();
        TiffEncoder::new(&mut file).unwrap().write_image::<Gray8>(3, 2, &[1, 1, 2, 3, 0, 2]).unwrap();

        let r = ClassRaster::open(&path, Some(Extent::new(0.0, 0.0, 3.0, 2.0)), Some(0)).unwrap();
        assert_eq!((r.width, r.height), (3, 2));
        assert_eq!(r.value_at(0.5, 1.5), Some(1));
        assert_eq!(r.value_at(2.5, 1.5), Some(2));
        assert_eq!(r.value_at(0.5, 0.5), Some(3));
        assert_eq!(r.value_at(1.5, 0.5), None);
        assert_eq!(r.class_histogram(), BTreeMap::from([(1, 2), (2, 2), (3, 1)]));
    }

    #[test]
    fn tiff_float_nan_becomes_nodata() {
        use tiff::encoder::{colortype::Gray32Float, TiffEncoder};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.tif");
        let mut file = File::create(&path).unwrap();
        TiffEncoder::new(&mut file)
            .unwrap()
            .write_image::<Gray32Float>(2, 2, &[1.0, f32::NAN, 2.0, 2.0])
            .unwrap();
        let extent = Extent::new(0.0, 0.0, 2.0, 2.0);

        let r = ClassRaster::from_tiff(&path, extent, None).unwrap();
        assert_eq!(r.nodata, Some(i64::MIN));
        assert_eq!(r.value_at(1.5, 1.5), None);
        assert_eq!(r.class_histogram(), BTreeMap::from([(1, 1), (2, 2)]));

        let r = ClassRaster::from_tiff(&path, extent, Some(-9)).unwrap();
        assert_eq!(r.nodata, Some(-9));
        assert_eq!(r.get(0, 1), Some(-9));
        assert_eq!(r.value_at(1.5, 1.5), None);
    }

    #[test]
    fn tiff_fractional_pixels_are_rejected() {
        use tiff::encoder::{colortype::Gray32Float, TiffEncoder};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.tif");
        let mut file = File::create(&path).unwrap();
        TiffEncoder::new(&mut file).unwrap().write_image::<Gray32Float>(2, 1, &[1.0, 1.5]).unwrap();

        let err = ClassRaster::from_tiff(&path, Extent::new(0.0, 0.0, 2.0, 1.0), None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn histogram_over_many_chunks_matches_counts() {
        // Spans several parallel chunks when threading is enabled.
        let n = 200_003;
        let data: Vec<i64> = (0..n).map(|i| (i % 4) as i64).collect();
        let counts = histogram(&data, Some(0));
        assert_eq!(counts.get(&0), None);
        for class in 1..4 {
            let expected = (0..n).filter(|i| i % 4 == class).count() as u64;
            assert_eq!(counts[&(class as i64)], expected);
        }
    }

    #[cfg(feature = "threading")]
    #[test]
    fn parallel_histogram_matches_serial() {
        let data: Vec<i64> = (0..150_000).map(|i| (i * 7 % 11) as i64 - 1).collect();
        assert_eq!(histogram(&data, Some(-1)), histogram_serial(&data, Some(-1)));
    }
}
