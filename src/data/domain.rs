//! Core dataset definitions: fields, normalization metadata, and samples.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::common::error::{FlowError, FlowResult};
use crate::inference::domain::ModelFamily;

pub const COORDS: &str = "C";
pub const VELOCITY: &str = "U";
pub const PRESSURE: &str = "p";
pub const REGION: &str = "cellToRegion";
pub const MOMENTUM: &str = "Momentum";
pub const DIVERGENCE: &str = "div";

/// Row-major table of `dim` components per point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub dim: usize,
    pub values: Vec<f64>,
}

/// Named fields of one point set, in insertion order.
pub type FieldMap = IndexMap<String, Field>;

impl Field {
    pub fn new(dim: usize, values: Vec<f64>) -> FlowResult<Self> {
        if dim == 0 || values.len() % dim != 0 {
            return Err(FlowError::internal(format!(
                "field of {} values cannot have {dim} components",
                values.len()
            )));
        }
        Ok(Self { dim, values })
    }

    pub fn scalar(values: Vec<f64>) -> Self {
        Self { dim: 1, values }
    }

    pub fn from_rows(rows: &[[f64; 2]]) -> Self {
        Self {
            dim: 2,
            values: rows.iter().flatten().copied().collect(),
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.values.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        &self.values[idx * self.dim..(idx + 1) * self.dim]
    }

    /// One component across all points.
    pub fn component(&self, comp: usize) -> Vec<f64> {
        self.values
            .iter()
            .skip(comp)
            .step_by(self.dim.max(1))
            .copied()
            .collect()
    }

    /// Euclidean norm of every row.
    pub fn row_norms(&self) -> Vec<f64> {
        (0..self.len())
            .map(|i| self.row(i).iter().map(|v| v * v).sum::<f64>().sqrt())
            .collect()
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Field {
        let mut values = Vec::with_capacity(indices.len() * self.dim);
        for &idx in indices {
            values.extend_from_slice(self.row(idx));
        }
        Field {
            dim: self.dim,
            values,
        }
    }

    /// Stack several fields of equal width.
    pub fn concat(parts: &[Field]) -> FlowResult<Field> {
        let dim = parts.first().map(|f| f.dim).unwrap_or(1);
        if parts.iter().any(|f| f.dim != dim) {
            return Err(FlowError::internal("cannot stack fields of different widths"));
        }
        Ok(Field {
            dim,
            values: parts.iter().flat_map(|f| f.values.iter().copied()).collect(),
        })
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// Per-component `[min, max]` training range of one field.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FieldRange {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

/// Affine map between physical units and model space: `x_n = (x - offset) / scale`.
#[derive(Clone, Debug, PartialEq)]
pub struct Normalizer {
    offset: Vec<f64>,
    scale: Vec<f64>,
}

impl Normalizer {
    pub fn from_range(range: &FieldRange) -> FlowResult<Self> {
        if range.min.is_empty() || range.min.len() != range.max.len() {
            return Err(FlowError::load("normalization range needs equal, non-empty min/max"));
        }
        let scale = range
            .min
            .iter()
            .zip(&range.max)
            .map(|(lo, hi)| {
                let span = hi - lo;
                if span.abs() < f64::EPSILON {
                    1.0
                } else {
                    span
                }
            })
            .collect();
        Ok(Self {
            offset: range.min.clone(),
            scale,
        })
    }

    pub fn dim(&self) -> usize {
        self.offset.len()
    }

    pub fn transform(&self, field: &Field) -> FlowResult<Field> {
        self.apply(field, |v, offset, scale| (v - offset) / scale)
    }

    pub fn inverse_transform(&self, field: &Field) -> FlowResult<Field> {
        self.apply(field, |v, offset, scale| v * scale + offset)
    }

    fn apply(&self, field: &Field, op: impl Fn(f64, f64, f64) -> f64) -> FlowResult<Field> {
        if field.dim != self.dim() {
            return Err(FlowError::internal(format!(
                "normalizer has {} components, field has {}",
                self.dim(),
                field.dim
            )));
        }
        let values = field
            .values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let c = i % self.dim();
                op(v, self.offset[c], self.scale[c])
            })
            .collect();
        Ok(Field {
            dim: field.dim,
            values,
        })
    }
}

/// Normalizers keyed by field name.
#[derive(Clone, Debug, Default)]
pub struct Normalizers(IndexMap<String, Normalizer>);

impl Normalizers {
    pub fn from_ranges(ranges: &IndexMap<String, FieldRange>) -> FlowResult<Self> {
        let mut out = IndexMap::with_capacity(ranges.len());
        for (name, range) in ranges {
            let normalizer = Normalizer::from_range(range)
                .map_err(|err| FlowError::load(format!("field {name}: {err}")))?;
            out.insert(name.clone(), normalizer);
        }
        Ok(Self(out))
    }

    pub fn get(&self, name: &str) -> Option<&Normalizer> {
        self.0.get(name)
    }
}

/// Interior and boundary sample sizes a model family was trained with.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct PointCounts {
    pub internal: usize,
    pub boundary: usize,
}

/// Fixed, read-only metadata of one model family, loaded at startup.
#[derive(Clone, Debug)]
pub struct FamilyMetadata {
    pub counts: PointCounts,
    pub normalizers: Normalizers,
}

/// Family metadata for every family with a loaded model. Immutable once built.
#[derive(Clone, Debug, Default)]
pub struct MetadataCatalog {
    pipn: Option<Arc<FamilyMetadata>>,
    pi_gano: Option<Arc<FamilyMetadata>>,
}

impl MetadataCatalog {
    pub fn insert(&mut self, family: ModelFamily, metadata: FamilyMetadata) {
        let slot = match family {
            ModelFamily::Pipn => &mut self.pipn,
            ModelFamily::PiGano => &mut self.pi_gano,
        };
        *slot = Some(Arc::new(metadata));
    }

    pub fn get(&self, family: ModelFamily) -> FlowResult<Arc<FamilyMetadata>> {
        let slot = match family {
            ModelFamily::Pipn => &self.pipn,
            ModelFamily::PiGano => &self.pi_gano,
        };
        slot.clone().ok_or_else(|| {
            FlowError::load(format!("no metadata loaded for family {}", family.as_str()))
        })
    }
}

/// Upper bounds applied while sampling a generated case.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SampleBounds {
    pub max_boundary: usize,
    pub max_internal: usize,
    pub max_porous: usize,
}

impl Default for SampleBounds {
    fn default() -> Self {
        Self {
            max_boundary: 1000,
            max_internal: 200,
            max_porous: 500,
        }
    }
}

/// One in-memory sample, in model space, ready for inference.
///
/// `sample` holds `C`, `U`, `p` and `cellToRegion` for the sample points;
/// `internal` holds `C` for the collocation points where residuals live.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub sample: FieldMap,
    pub internal: FieldMap,
    pub metadata: Arc<FamilyMetadata>,
}

impl Dataset {
    pub fn sample_len(&self) -> usize {
        self.sample.get(COORDS).map(Field::len).unwrap_or(0)
    }

    pub fn internal_len(&self) -> usize {
        self.internal.get(COORDS).map(Field::len).unwrap_or(0)
    }

    pub fn sample_field(&self, name: &str) -> FlowResult<&Field> {
        self.sample
            .get(name)
            .ok_or_else(|| FlowError::transform(format!("dataset has no sample field {name}")))
    }

    pub fn internal_field(&self, name: &str) -> FlowResult<&Field> {
        self.internal
            .get(name)
            .ok_or_else(|| FlowError::transform(format!("dataset has no internal field {name}")))
    }

    /// Map a model-space field of `name` back to physical units.
    pub fn denormalize(&self, name: &str, field: &Field) -> FlowResult<Field> {
        let normalizer = self
            .metadata
            .normalizers
            .get(name)
            .ok_or_else(|| FlowError::transform(format!("no normalizer for field {name}")))?;
        normalizer
            .inverse_transform(field)
            .map_err(|err| FlowError::transform(format!("field {name}: {err}")))
    }

    /// Like [`Dataset::denormalize`], passing fields without a normalizer through.
    pub fn denormalize_or_keep(&self, name: &str, field: &Field) -> FlowResult<Field> {
        if self.metadata.normalizers.get(name).is_some() {
            self.denormalize(name, field)
        } else {
            Ok(field.clone())
        }
    }

    /// Porous-region membership of every sample point.
    pub fn porous_mask(&self) -> FlowResult<Vec<f64>> {
        Ok(self.sample_field(REGION)?.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizer_round_trips_per_component() {
        let n = Normalizer::from_range(&FieldRange {
            min: vec![-1.0, 0.0],
            max: vec![1.0, 4.0],
        })
        .unwrap();
        let field = Field::from_rows(&[[0.0, 2.0], [1.0, 4.0]]);
        let normalized = n.transform(&field).unwrap();
        assert_eq!(normalized.values, vec![0.5, 0.5, 1.0, 1.0]);
        assert_eq!(n.inverse_transform(&normalized).unwrap(), field);
    }

    #[test]
    fn zero_span_range_keeps_unit_scale() {
        let n = Normalizer::from_range(&FieldRange {
            min: vec![3.0],
            max: vec![3.0],
        })
        .unwrap();
        let out = n.transform(&Field::scalar(vec![4.0])).unwrap();
        assert_eq!(out.values, vec![1.0]);
    }

    #[test]
    fn normalizer_rejects_width_mismatch() {
        let n = Normalizer::from_range(&FieldRange {
            min: vec![0.0],
            max: vec![1.0],
        })
        .unwrap();
        assert!(n.transform(&Field::from_rows(&[[1.0, 2.0]])).is_err());
    }

    #[test]
    fn field_helpers_follow_row_layout() {
        let f = Field::from_rows(&[[3.0, 4.0], [0.0, 1.0], [6.0, 8.0]]);
        assert_eq!(f.len(), 3);
        assert_eq!(f.component(1), vec![4.0, 1.0, 8.0]);
        assert_eq!(f.row_norms(), vec![5.0, 1.0, 10.0]);
        assert_eq!(f.select(&[2, 0]).values, vec![6.0, 8.0, 3.0, 4.0]);
        let stacked = Field::concat(&[f.select(&[0]), f.select(&[1])]).unwrap();
        assert_eq!(stacked.len(), 2);
        assert!(Field::new(2, vec![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn catalog_reports_missing_family() {
        let mut catalog = MetadataCatalog::default();
        catalog.insert(
            ModelFamily::Pipn,
            FamilyMetadata {
                counts: PointCounts {
                    internal: 10,
                    boundary: 5,
                },
                normalizers: Normalizers::default(),
            },
        );
        assert!(catalog.get(ModelFamily::Pipn).is_ok());
        assert!(matches!(
            catalog.get(ModelFamily::PiGano),
            Err(FlowError::LoadError(_))
        ));
    }
}
