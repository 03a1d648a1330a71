//! Classification ledger: the labelling state of one sample set.
//!
//! Points are shuffled into a display order once, at construction. Each point
//! moves between unclassified and classified only through [`ClassificationLedger::classify`];
//! counters change on state transitions, never on relabelling.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use geojson::{FeatureCollection, JsonObject};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::accuracy::units::DistanceUnit;
use crate::accuracy::{AccuracyAssessment, AccuracyResult, AccuracySettings};
use crate::error::{Error, Result};
use crate::point::{ClassificationPoint, Position};
use crate::raster::RasterSource;
use crate::vector;

// ── Configuration ────────────────────────────────────────────────────────────

/// One labelling button: what the label is called and which thematic class it
/// stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfig {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub thematic_class: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    pub columns: usize,
    pub rows: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { columns: 2, rows: 1 }
    }
}

/// Render settings of one view in the labelling grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    pub view_name: String,
    #[serde(default)]
    pub layer_name: Option<String>,
    #[serde(default)]
    pub render_path: Option<String>,
    #[serde(default)]
    pub activated: bool,
    pub scale_factor: f64,
}

/// Labelling UI state. Stored and restored as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub grid: GridConfig,
    /// Radius around the sample a view zooms to, in map units.
    pub fit_to_sample: f64,
    #[serde(default)]
    pub dialog_size: Option<(u32, u32)>,
    #[serde(default)]
    pub views: Vec<ViewConfig>,
}

impl ViewState {
    pub fn for_unit(unit: DistanceUnit) -> Self {
        Self { fit_to_sample: unit.fit_to_sample(), ..Self::default() }
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            fit_to_sample: DistanceUnit::Meters.fit_to_sample(),
            dialog_size: None,
            views: Vec::new(),
        }
    }
}

// ── Reload ───────────────────────────────────────────────────────────────────

/// What a reload changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// Surviving points whose geometry moved.
    pub modified: usize,
    pub added: usize,
    pub removed: usize,
}

impl ReloadOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.modified == 0 && self.added == 0 && self.removed == 0
    }
}

// ── Persisted state ──────────────────────────────────────────────────────────

/// Serializable ledger state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    pub source: String,
    pub labels: BTreeMap<u32, LabelConfig>,
    /// Display order by `shape_id`.
    pub points_order: Vec<u64>,
    /// `shape_id` → `classif_id` of classified points.
    pub classified: BTreeMap<u64, u32>,
    /// Geometry of every point when the state was taken.
    #[serde(default)]
    pub positions: BTreeMap<u64, Position>,
    pub current_index: usize,
    #[serde(default)]
    pub view: ViewState,
    #[serde(default)]
    pub accuracy: AccuracySettings,
}

impl LedgerState {
    /// The points as they were saved, unlabelled, in display order. Feed them
    /// back to [`ClassificationLedger::from_state`] and then
    /// [`ClassificationLedger::reload`] the live source to see what changed.
    pub fn saved_points(&self) -> Vec<ClassificationPoint> {
        self.points_order
            .iter()
            .filter_map(|id| self.positions.get(id).map(|p| ClassificationPoint::new(*id, p.x, p.y)))
            .collect()
    }
}

// ── Ledger ───────────────────────────────────────────────────────────────────

pub struct ClassificationLedger {
    source: String,
    labels: BTreeMap<u32, LabelConfig>,
    points: Vec<ClassificationPoint>,
    current: usize,
    classified: usize,
    unclassified: usize,
    pub view: ViewState,
    pub accuracy_settings: AccuracySettings,
    accuracy: Option<AccuracyAssessment>,
}

impl ClassificationLedger {
    /// Ledger over `points` from `source`, shuffled into display order with `seed`.
    pub fn new(source: &str, mut points: Vec<ClassificationPoint>, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        points.shuffle(&mut rng);
        let mut ledger = Self {
            source: source.to_string(),
            labels: BTreeMap::new(),
            points,
            current: 0,
            classified: 0,
            unclassified: 0,
            view: ViewState::default(),
            accuracy_settings: AccuracySettings::default(),
            accuracy: None,
        };
        ledger.recount();
        ledger
    }

    pub fn with_labels(mut self, labels: BTreeMap<u32, LabelConfig>) -> Self {
        self.labels = labels;
        self
    }

    pub fn set_labels(&mut self, labels: BTreeMap<u32, LabelConfig>) {
        self.labels = labels;
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn labels(&self) -> &BTreeMap<u32, LabelConfig> {
        &self.labels
    }

    /// True when at least one label maps to a thematic class.
    pub fn with_thematic_classes(&self) -> bool {
        self.labels.values().any(|l| l.thematic_class.is_some())
    }

    /// Points in display order.
    pub fn points(&self) -> &[ClassificationPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn position_of(&self, shape_id: u64) -> Option<usize> {
        self.points.iter().position(|p| p.shape_id == shape_id)
    }

    pub fn classified_count(&self) -> usize {
        self.classified
    }

    pub fn unclassified_count(&self) -> usize {
        self.unclassified
    }

    pub fn is_completed(&self) -> bool {
        self.unclassified == 0
    }

    // ── Navigation ───────────────────────────────────────────────────────────

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Move the active sample; out-of-range indices clamp to the last point.
    pub fn set_current_index(&mut self, index: usize) {
        self.current = index.min(self.points.len().saturating_sub(1));
    }

    pub fn current_point(&self) -> Option<&ClassificationPoint> {
        self.points.get(self.current)
    }

    // ── Labelling ────────────────────────────────────────────────────────────

    /// Label the point at display position `index`, or clear its label with
    /// `None`.
    pub fn classify(&mut self, index: usize, classif_id: Option<u32>) -> Result<()> {
        if let Some(id) = classif_id {
            if !self.labels.contains_key(&id) {
                return Err(Error::UnknownLabel(id));
            }
        }
        let n = self.points.len();
        let point = self
            .points
            .get_mut(index)
            .ok_or_else(|| Error::InvalidInput(format!("sample index {index} out of range (0..{n})")))?;

        if point.set_label(classif_id) {
            if point.is_classified {
                self.classified += 1;
                self.unclassified = self.unclassified.saturating_sub(1);
            } else {
                self.classified = self.classified.saturating_sub(1);
                self.unclassified += 1;
            }
        }
        Ok(())
    }

    pub fn classify_current(&mut self, classif_id: Option<u32>) -> Result<()> {
        self.classify(self.current, classif_id)
    }

    fn recount(&mut self) {
        self.classified = self.points.iter().filter(|p| p.is_classified).count();
        self.unclassified = self.points.len() - self.classified;
    }

    // ── Reload ───────────────────────────────────────────────────────────────

    /// Merge a fresh read of the point source by `shape_id`.
    ///
    /// Surviving points keep their label and display order, removed points are
    /// dropped and new points are appended unclassified in `shape_id` order.
    /// The active index moves back once per removed point before it.
    pub fn reload(&mut self, new_points: Vec<ClassificationPoint>) -> ReloadOutcome {
        let mut incoming: HashMap<u64, ClassificationPoint> = HashMap::with_capacity(new_points.len());
        for p in new_points {
            incoming.entry(p.shape_id).or_insert(p);
        }

        let mut outcome = ReloadOutcome::default();
        let mut kept = Vec::with_capacity(incoming.len());
        let mut removed_before_current = 0;
        for (i, old) in self.points.drain(..).enumerate() {
            match incoming.remove(&old.shape_id) {
                Some(fresh) => {
                    let mut p = old;
                    if p.position != fresh.position {
                        outcome.modified += 1;
                        p.position = fresh.position;
                    }
                    kept.push(p);
                }
                None => {
                    outcome.removed += 1;
                    if i < self.current {
                        removed_before_current += 1;
                    }
                }
            }
        }

        let mut added: Vec<ClassificationPoint> = incoming.into_values().collect();
        added.sort_by_key(|p| p.shape_id);
        outcome.added = added.len();
        kept.extend(added.into_iter().map(|mut p| {
            p.set_label(None);
            p
        }));

        self.points = kept;
        self.current -= removed_before_current;
        self.set_current_index(self.current);
        self.recount();

        if outcome.is_unchanged() {
            log::info!("{}: no changes detected in the sampling file", self.source);
        } else {
            log::info!(
                "{}: reloaded, {} modified, {} added and {} removed",
                self.source,
                outcome.modified,
                outcome.added,
                outcome.removed
            );
        }
        outcome
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    pub fn to_state(&self) -> LedgerState {
        LedgerState {
            source: self.source.clone(),
            labels: self.labels.clone(),
            points_order: self.points.iter().map(|p| p.shape_id).collect(),
            classified: self
                .points
                .iter()
                .filter_map(|p| p.classif_id.map(|c| (p.shape_id, c)))
                .collect(),
            positions: self.points.iter().map(|p| (p.shape_id, p.position)).collect(),
            current_index: self.current,
            view: self.view.clone(),
            accuracy: self.accuracy_settings.clone(),
        }
    }

    /// Rebuild a ledger from saved state and the live point source.
    ///
    /// Saved ids missing from `live_points` are dropped; live points absent
    /// from the saved order are appended unclassified in `shape_id` order.
    pub fn from_state(state: LedgerState, live_points: Vec<ClassificationPoint>) -> Self {
        let mut live: HashMap<u64, ClassificationPoint> =
            live_points.into_iter().map(|p| (p.shape_id, p)).collect();

        let mut points = Vec::with_capacity(live.len());
        for shape_id in &state.points_order {
            if let Some(p) = live.remove(shape_id) {
                points.push(p);
            }
        }
        let dropped = state.points_order.len() - points.len();
        let mut appended: Vec<ClassificationPoint> = live.into_values().collect();
        appended.sort_by_key(|p| p.shape_id);
        let n_appended = appended.len();
        points.extend(appended);

        for p in &mut points {
            let label = state.classified.get(&p.shape_id).copied();
            match label {
                Some(id) if !state.labels.contains_key(&id) => {
                    log::warn!("sample {}: label {} is not configured, left unclassified", p.shape_id, id);
                    p.set_label(None);
                }
                _ => {
                    p.set_label(label);
                }
            }
        }

        if dropped > 0 || n_appended > 0 {
            log::info!("{}: restored with {} samples dropped, {} appended", state.source, dropped, n_appended);
        }

        let mut ledger = Self {
            source: state.source,
            labels: state.labels,
            points,
            current: 0,
            classified: 0,
            unclassified: 0,
            view: state.view,
            accuracy_settings: state.accuracy,
            accuracy: None,
        };
        ledger.set_current_index(state.current_index);
        ledger.recount();
        ledger
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_state())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path, live_points: Vec<ClassificationPoint>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let state: LedgerState = serde_json::from_str(&text)?;
        Ok(Self::from_state(state, live_points))
    }

    // ── Accuracy ─────────────────────────────────────────────────────────────

    /// The ledger's accuracy engine, created on first use.
    pub fn accuracy_assessment(&mut self) -> &mut AccuracyAssessment {
        self.accuracy.get_or_insert_with(AccuracyAssessment::new)
    }

    /// Recompute the accuracy assessment against `thematic` with the current
    /// settings.
    pub fn assess(&mut self, thematic: &dyn RasterSource) -> Result<AccuracyResult> {
        let engine = self.accuracy.get_or_insert_with(AccuracyAssessment::new);
        engine.compute(&self.points, &self.labels, thematic, &self.accuracy_settings)
    }

    // ── Export ───────────────────────────────────────────────────────────────

    /// Classified sample file, sorted by `shape_id`.
    ///
    /// With thematic classes the attributes are `ID`, `Class Name`,
    /// `Classified`, `Thematic Class` and `Match`; otherwise `ID`,
    /// `Class Name` and `Classif ID`. Unclassified points carry nulls.
    pub fn classification_collection(&self, thematic: Option<&dyn RasterSource>) -> FeatureCollection {
        let with_thematic = self.with_thematic_classes();
        let mut ordered: Vec<&ClassificationPoint> = self.points.iter().collect();
        ordered.sort_by_key(|p| p.shape_id);

        let features = ordered
            .into_iter()
            .map(|p| {
                let label = p.classif_id.and_then(|id| self.labels.get(&id));
                let mut props = JsonObject::new();
                props.insert("ID".into(), JsonValue::from(p.shape_id));
                props.insert("Class Name".into(), label.map(|l| JsonValue::from(l.name.clone())).unwrap_or(JsonValue::Null));
                if with_thematic {
                    let classified = label.and_then(|l| l.thematic_class);
                    let observed = if p.is_classified {
                        thematic.and_then(|r| r.value_at(p.position.x, p.position.y))
                    } else {
                        None
                    };
                    let matched = p.is_classified.then(|| if observed == classified { "Yes" } else { "No" });
                    props.insert("Classified".into(), opt_json(classified));
                    props.insert("Thematic Class".into(), opt_json(observed));
                    props.insert("Match".into(), opt_json(matched));
                } else {
                    props.insert("Classif ID".into(), opt_json(p.classif_id));
                }
                vector::point_feature(p.position, props)
            })
            .collect();
        FeatureCollection { bbox: None, features, foreign_members: None }
    }

    pub fn export_classification(&self, path: &Path, thematic: Option<&dyn RasterSource>) -> Result<()> {
        vector::write_feature_collection(path, &self.classification_collection(thematic))
    }
}

fn opt_json<T: Into<JsonValue>>(v: Option<T>) -> JsonValue {
    v.map(Into::into).unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ClassRaster;

    fn labels() -> BTreeMap<u32, LabelConfig> {
        let mut m = BTreeMap::new();
        m.insert(1, LabelConfig { name: "forest".into(), color: "#228b22".into(), thematic_class: Some(1) });
        m.insert(2, LabelConfig { name: "water".into(), color: "#1e90ff".into(), thematic_class: Some(2) });
        m
    }

    fn points(ids: &[u64]) -> Vec<ClassificationPoint> {
        ids.iter().map(|&id| ClassificationPoint::new(id, id as f64 + 0.5, 0.5)).collect()
    }

    fn ledger(ids: &[u64]) -> ClassificationLedger {
        ClassificationLedger::new("samples.geojson", points(ids), 3).with_labels(labels())
    }

    fn order(l: &ClassificationLedger) -> Vec<u64> {
        l.points().iter().map(|p| p.shape_id).collect()
    }

    #[test]
    fn shuffle_is_seeded_and_complete() {
        let a = ledger(&[1, 2, 3, 4, 5, 6]);
        let b = ledger(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(order(&a), order(&b));
        let mut sorted = order(&a);
        sorted.sort();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(a.unclassified_count(), 6);
        assert!(!a.is_completed());
    }

    #[test]
    fn classify_is_idempotent_and_reversible() {
        let mut l = ledger(&[1, 2]);
        l.classify(0, Some(1)).unwrap();
        l.classify(0, Some(1)).unwrap();
        assert_eq!(l.classified_count(), 1);
        l.classify(0, Some(2)).unwrap();
        assert_eq!(l.classified_count(), 1);
        l.classify(0, None).unwrap();
        l.classify(0, None).unwrap();
        assert_eq!(l.classified_count(), 0);
        assert_eq!(l.unclassified_count(), 2);

        l.classify(0, Some(1)).unwrap();
        l.classify(1, Some(2)).unwrap();
        assert!(l.is_completed());
    }

    #[test]
    fn classify_rejects_unknown_labels_and_indices() {
        let mut l = ledger(&[1]);
        assert!(matches!(l.classify(0, Some(9)), Err(Error::UnknownLabel(9))));
        assert!(matches!(l.classify(5, Some(1)), Err(Error::InvalidInput(_))));
        assert_eq!(l.classified_count(), 0);
    }

    #[test]
    fn reload_merges_by_shape_id() {
        let mut l = ledger(&[1, 2, 3, 4]);
        let before = order(&l);
        for i in 0..4 {
            l.classify(i, Some(1)).unwrap();
        }
        l.set_current_index(3);

        // Drop the samples shown at display positions 0 and 3, move one
        // survivor and add two new ones.
        let gone = [before[0], before[3]];
        let mut fresh: Vec<ClassificationPoint> =
            points(&[1, 2, 3, 4, 10, 7]).into_iter().filter(|p| !gone.contains(&p.shape_id)).collect();
        fresh[0].position.y = 9.0;

        let out = l.reload(fresh);
        assert_eq!(out, ReloadOutcome { modified: 1, added: 2, removed: 2 });
        assert_eq!(order(&l), vec![before[1], before[2], 7, 10]);
        // One removal sat before the active sample.
        assert_eq!(l.current_index(), 2);
        assert_eq!(l.classified_count(), 2);
        assert_eq!(l.unclassified_count(), 2);
    }

    #[test]
    fn reload_with_same_points_is_unchanged() {
        let mut l = ledger(&[1, 2, 3]);
        let out = l.reload(points(&[3, 2, 1]));
        assert!(out.is_unchanged());
    }

    #[test]
    fn state_round_trip_tolerates_source_changes() {
        let mut l = ledger(&[1, 2, 3, 4, 5]);
        l.classify(0, Some(1)).unwrap();
        l.classify(2, Some(2)).unwrap();
        l.set_current_index(2);
        l.view.grid = GridConfig { columns: 3, rows: 2 };
        let saved_order = order(&l);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        l.save(&path).unwrap();

        // Point 5 vanished from the source, point 6 is new.
        let restored = ClassificationLedger::load(&path, points(&[1, 2, 3, 4, 6])).unwrap();
        let expected: Vec<u64> = saved_order.iter().copied().filter(|&id| id != 5).chain([6]).collect();
        assert_eq!(order(&restored), expected);
        for p in restored.points() {
            let original = l.points().iter().find(|q| q.shape_id == p.shape_id);
            match original {
                Some(q) => assert_eq!(p.classif_id, q.classif_id),
                None => assert!(!p.is_classified),
            }
        }
        assert_eq!(restored.view.grid, GridConfig { columns: 3, rows: 2 });
        assert_eq!(restored.labels(), l.labels());
    }

    #[test]
    fn saved_points_replay_a_reload() {
        let mut l = ledger(&[1, 2, 3]);
        l.classify(1, Some(2)).unwrap();
        let state = l.to_state();
        let saved = state.saved_points();
        assert_eq!(saved.iter().map(|p| p.shape_id).collect::<Vec<_>>(), order(&l));

        let mut restored = ClassificationLedger::from_state(state, saved);
        assert_eq!(restored.classified_count(), 1);
        let mut live = points(&[1, 2, 3]);
        live[0].position.x = 40.0;
        let out = restored.reload(live);
        assert_eq!(out, ReloadOutcome { modified: 1, added: 0, removed: 0 });
    }

    #[test]
    fn export_reports_matches_against_the_thematic_map() {
        let thematic = ClassRaster::with_unit_pixels(vec![1, 2, 2], 3, 1, None).unwrap();
        let mut l = ClassificationLedger::new("s", points(&[0, 1, 2]), 1).with_labels(labels());
        let p0 = l.position_of(0).unwrap();
        let p1 = l.position_of(1).unwrap();
        l.classify(p0, Some(1)).unwrap();
        l.classify(p1, Some(1)).unwrap();

        let fc = l.classification_collection(Some(&thematic));
        let props: Vec<&JsonObject> = fc.features.iter().map(|f| f.properties.as_ref().unwrap()).collect();
        assert_eq!(props[0]["ID"], JsonValue::from(0));
        assert_eq!(props[0]["Match"], JsonValue::from("Yes"));
        assert_eq!(props[1]["Thematic Class"], JsonValue::from(2));
        assert_eq!(props[1]["Match"], JsonValue::from("No"));
        assert_eq!(props[2]["Class Name"], JsonValue::Null);
        assert_eq!(props[2]["Match"], JsonValue::Null);
    }

    #[test]
    fn export_without_thematic_classes_uses_label_ids() {
        let mut plain = BTreeMap::new();
        plain.insert(4, LabelConfig { name: "crop".into(), color: String::new(), thematic_class: None });
        let mut l = ClassificationLedger::new("s", points(&[1]), 1).with_labels(plain);
        l.classify(0, Some(4)).unwrap();
        let fc = l.classification_collection(None);
        let props = fc.features[0].properties.as_ref().unwrap();
        assert_eq!(props["Classif ID"], JsonValue::from(4));
        assert!(!props.contains_key("Match"));
    }
}
