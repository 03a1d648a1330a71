//! Sample points: the candidates drawn by the sampler and the labelled points
//! held by a classification ledger.

use serde::{Deserialize, Serialize};

/// A position in map units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn as_array(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// An accepted sample. The position never changes once accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// 1-based acceptance order.
    pub id: u64,
    pub position: Position,
    /// Index of the stratum this point filled (stratified designs only).
    pub stratum_index: Option<usize>,
}

/// A sample as seen by the labelling workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationPoint {
    /// Stable identity taken from the point file.
    pub shape_id: u64,
    pub position: Position,
    pub classif_id: Option<u32>,
    pub is_classified: bool,
}

impl ClassificationPoint {
    pub fn new(shape_id: u64, x: f64, y: f64) -> Self {
        Self {
            shape_id,
            position: Position::new(x, y),
            classif_id: None,
            is_classified: false,
        }
    }

    /// Set or clear the label. Returns true when the classified state flipped.
    pub(crate) fn set_label(&mut self, classif_id: Option<u32>) -> bool {
        let was = self.is_classified;
        self.classif_id = classif_id;
        self.is_classified = classif_id.is_some();
        was != self.is_classified
    }
}

impl From<&SamplePoint> for ClassificationPoint {
    fn from(p: &SamplePoint) -> Self {
        Self::new(p.id, p.position.x, p.position.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_label_reports_transitions_only() {
        let mut p = ClassificationPoint::new(7, 1.0, 2.0);
        assert!(p.set_label(Some(3)));
        assert!(!p.set_label(Some(3)));
        assert!(!p.set_label(Some(4)));
        assert!(p.set_label(None));
        assert!(!p.is_classified);
        assert_eq!(p.classif_id, None);
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < 1e-12);
    }
}
