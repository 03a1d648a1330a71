//! GeoJSON point files: sampling output and classification input.

use std::path::Path;

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};

use crate::error::{Error, Result};
use crate::point::{ClassificationPoint, Position, SamplePoint};

/// A point feature with the given attribute table.
pub fn point_feature(position: Position, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![position.x, position.y]))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Accepted samples as features carrying an integer `id` attribute.
pub fn sample_points_collection(points: &[SamplePoint]) -> FeatureCollection {
    let features = points
        .iter()
        .map(|p| {
            let mut properties = JsonObject::new();
            properties.insert("id".to_string(), serde_json::Value::from(p.id));
            point_feature(p.position, properties)
        })
        .collect();
    FeatureCollection { bbox: None, features, foreign_members: None }
}

pub fn write_feature_collection(path: &Path, collection: &FeatureCollection) -> Result<()> {
    let json = serde_json::to_string_pretty(collection)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn write_sample_points(path: &Path, points: &[SamplePoint]) -> Result<()> {
    write_feature_collection(path, &sample_points_collection(points))
}

/// Point features of a collection as classification points.
///
/// `shape_id` comes from the integer `id` attribute when every feature has
/// one; otherwise features are numbered from 1 in file order. Non-point
/// geometries are rejected.
pub fn classification_points(collection: &FeatureCollection) -> Result<Vec<ClassificationPoint>> {
    let ids: Option<Vec<u64>> = collection
        .features
        .iter()
        .map(|f| f.property("id").and_then(|v| v.as_u64()))
        .collect();

    collection
        .features
        .iter()
        .enumerate()
        .map(|(i, feature)| {
            let position = point_position(feature)
                .ok_or_else(|| Error::InvalidInput(format!("feature {} is not a point", i + 1)))?;
            let shape_id = match &ids {
                Some(ids) => ids[i],
                None => i as u64 + 1,
            };
            Ok(ClassificationPoint::new(shape_id, position.x, position.y))
        })
        .collect()
}

pub fn read_classification_points(path: &Path) -> Result<Vec<ClassificationPoint>> {
    let text = std::fs::read_to_string(path)?;
    let geojson: GeoJson = text.parse()?;
    let collection = FeatureCollection::try_from(geojson)?;
    classification_points(&collection)
}

fn point_position(feature: &Feature) -> Option<Position> {
    match &feature.geometry.as_ref()?.value {
        Value::Point(coords) if coords.len() >= 2 => Some(Position::new(coords[0], coords[1])),
        _ => None,
    }
}
