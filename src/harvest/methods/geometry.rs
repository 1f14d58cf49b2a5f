//! Geometry methods: `point_geometry` and `bbox`.
//!
//! Geometries are GeoJSON-shaped mappings (RFC 7946): `{"type": ...,
//! "coordinates": ...}`. Bounding boxes are `[min_x, min_y, max_x, max_y]`.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::{ConfigError, MethodDescriptor};
use crate::harvest::record::WorkingRecord;
use crate::harvest::registry::parse_params;
use crate::harvest::traits::{ExtractionError, ExtractionMethod, StepContext, StepOutcome};
use crate::model::{Mapping, Value};

// ============================================================================
// point_geometry
// ============================================================================

#[derive(Debug, Deserialize)]
struct PointParams {
    /// `[x_key, y_key]`, usually longitude then latitude
    coordinate_keys: Vec<String>,

    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug)]
pub struct PointGeometryExtract {
    x_key: String,
    y_key: String,
    key: String,
}

impl PointGeometryExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let params: PointParams = parse_params(descriptor)?;
        let [x_key, y_key]: [String; 2] =
            params
                .coordinate_keys
                .try_into()
                .map_err(|_| ConfigError::InvalidParameters {
                    method: descriptor.method.clone(),
                    reason: "`coordinate_keys` must name exactly two keys".to_string(),
                })?;
        let key = params
            .key
            .or_else(|| descriptor.output_key.clone())
            .unwrap_or_else(|| "geometry".to_string());
        Ok(Arc::new(Self { x_key, y_key, key }))
    }
}

fn number(record: &WorkingRecord, ctx: &StepContext<'_>, key: &str) -> Result<f64, ExtractionError> {
    let value = ctx.require(record, key)?;
    value.as_f64().ok_or_else(|| ExtractionError::InvalidInput {
        key: key.to_string(),
        reason: format!("expected a coordinate, found {}", value.kind()),
    })
}

#[async_trait]
impl ExtractionMethod for PointGeometryExtract {
    fn method_name(&self) -> &'static str {
        "point_geometry"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let x = number(record, ctx, &self.x_key)?;
        let y = number(record, ctx, &self.y_key)?;

        let mut geometry = Mapping::new();
        geometry.insert("type".to_string(), Value::from("Point"));
        geometry.insert(
            "coordinates".to_string(),
            Value::Sequence(vec![Value::Float(x), Value::Float(y)]),
        );
        Ok(StepOutcome::single(
            ctx.update(self.key.clone(), Value::Mapping(geometry)),
        ))
    }
}

// ============================================================================
// bbox
// ============================================================================

#[derive(Debug, Deserialize)]
struct BboxParams {
    #[serde(default = "default_geometry_key")]
    from: String,

    #[serde(default)]
    key: Option<String>,
}

fn default_geometry_key() -> String {
    "geometry".to_string()
}

/// Derives a bounding box from a geometry written by an earlier step.
#[derive(Debug)]
pub struct BboxExtract {
    from: String,
    key: String,
}

impl BboxExtract {
    pub fn build(descriptor: &MethodDescriptor) -> Result<Arc<dyn ExtractionMethod>, ConfigError> {
        let params: BboxParams = parse_params(descriptor)?;
        let key = params
            .key
            .or_else(|| descriptor.output_key.clone())
            .unwrap_or_else(|| "bbox".to_string());
        Ok(Arc::new(Self {
            from: params.from,
            key,
        }))
    }
}

/// Collects every `[x, y, ...]` position nested anywhere in `coordinates`.
fn collect_positions(coordinates: &Value, out: &mut Vec<(f64, f64)>) -> bool {
    let Some(items) = coordinates.as_sequence() else {
        return false;
    };
    match items {
        [x, y, ..] if x.as_f64().is_some() => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => {
                out.push((x, y));
                true
            }
            _ => false,
        },
        nested => nested.iter().all(|inner| collect_positions(inner, out)),
    }
}

#[async_trait]
impl ExtractionMethod for BboxExtract {
    fn method_name(&self) -> &'static str {
        "bbox"
    }

    async fn extract(
        &self,
        record: &WorkingRecord,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, ExtractionError> {
        let geometry = ctx.require(record, &self.from)?;
        let invalid = |reason: &str| ExtractionError::InvalidInput {
            key: self.from.clone(),
            reason: reason.to_string(),
        };

        let coordinates = geometry
            .as_mapping()
            .and_then(|g| g.get("coordinates"))
            .ok_or_else(|| invalid("geometry has no coordinates"))?;

        let mut positions = Vec::new();
        if !collect_positions(coordinates, &mut positions) || positions.is_empty() {
            return Err(invalid("malformed coordinates"));
        }

        let (mut min_x, mut min_y) = positions[0];
        let (mut max_x, mut max_y) = positions[0];
        for &(x, y) in &positions[1..] {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let bbox = [min_x, min_y, max_x, max_y]
            .into_iter()
            .map(Value::Float)
            .collect::<Vec<_>>();
        Ok(StepOutcome::single(
            ctx.update(self.key.clone(), Value::Sequence(bbox)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::methods::testing::{record_with, run_item, updates};
    use crate::model::ItemDescriptor;
    use serde_json::json;

    fn polygon() -> Value {
        Value::from(json!({
            "type": "Polygon",
            "coordinates": [[[-10.0, 50.0], [2.0, 50.0], [2.0, 61.0], [-10.0, 61.0], [-10.0, 50.0]]]
        }))
    }

    #[tokio::test]
    async fn test_point_from_string_coordinates() {
        let item = ItemDescriptor::new("/data/a.nc");
        let record = record_with(&[("lon", Value::from("-1.5")), ("lat", Value::Float(51.75))]);
        let out = run_item(
            "point_geometry",
            json!({ "coordinate_keys": ["lon", "lat"] }),
            None,
            &item,
            &record,
        )
        .await
        .unwrap();
        let expected = Value::from(json!({ "type": "Point", "coordinates": [-1.5, 51.75] }));
        assert_eq!(updates(out), vec![("geometry".to_string(), expected)]);
    }

    #[tokio::test]
    async fn test_bbox_from_polygon() {
        let item = ItemDescriptor::new("/data/a.nc");
        let record = record_with(&[("geometry", polygon())]);
        let out = run_item("bbox", json!(null), None, &item, &record)
            .await
            .unwrap();
        assert_eq!(
            updates(out),
            vec![(
                "bbox".to_string(),
                Value::from(json!([-10.0, 50.0, 2.0, 61.0]))
            )]
        );
    }

    #[tokio::test]
    async fn test_bbox_from_point() {
        let item = ItemDescriptor::new("/data/a.nc");
        let point = Value::from(json!({ "type": "Point", "coordinates": [3, 4] }));
        let record = record_with(&[("location", point)]);
        let out = run_item("bbox", json!({ "from": "location" }), None, &item, &record)
            .await
            .unwrap();
        assert_eq!(
            updates(out),
            vec![("bbox".to_string(), Value::from(json!([3.0, 4.0, 3.0, 4.0])))]
        );
    }

    #[tokio::test]
    async fn test_bbox_rejects_malformed_geometry() {
        let item = ItemDescriptor::new("/data/a.nc");
        let record = record_with(&[("geometry", Value::from("POINT(1 2)"))]);
        let err = run_item("bbox", json!(null), None, &item, &record)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidInput { .. }));
    }
}
