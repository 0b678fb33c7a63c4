//! Dataset assembly: seeded sampling of a generated case and normalization.
//!
//! Sample order is boundary faces, then porous cells, then fluid cells.
//! Collocation points are drawn from the fluid cells with the same generator.

use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::common::error::{FlowError, FlowResult};

use super::domain::{
    Dataset, FamilyMetadata, Field, FieldMap, SampleBounds, COORDS, PRESSURE, REGION, VELOCITY,
};
use super::repo_fs::{self, RawCase};

/// Seed shared by sampling and inference, so a case always yields the same answer.
pub const DEFAULT_SEED: u64 = 8421;

/// Read the case under `split_dir` and build the inference dataset.
pub fn load_dataset(
    split_dir: &Path,
    metadata: Arc<FamilyMetadata>,
    bounds: SampleBounds,
    seed: u64,
) -> FlowResult<Dataset> {
    let case = repo_fs::read_case(split_dir)?;
    tracing::debug!(
        case = %case.dir.display(),
        boundary = case.boundary[COORDS].len(),
        internal = case.internal[COORDS].len(),
        "case read"
    );
    build_dataset(&case, metadata, bounds, seed)
}

/// Row indices chosen from a case, already in sample order.
#[derive(Debug, PartialEq)]
struct Selection {
    boundary: Vec<usize>,
    cells: Vec<usize>,
    collocation: Vec<usize>,
}

fn select_points(
    boundary_len: usize,
    region: &[f64],
    internal_target: usize,
    boundary_target: usize,
    bounds: SampleBounds,
    seed: u64,
) -> FlowResult<Selection> {
    let mut rng = StdRng::seed_from_u64(seed);

    let n_boundary = bounds.max_boundary.min(boundary_target);
    if boundary_len < n_boundary {
        return Err(FlowError::load(format!(
            "case has {boundary_len} boundary points, {n_boundary} required"
        )));
    }
    let mut boundary: Vec<usize> = (0..boundary_len).collect();
    boundary.shuffle(&mut rng);
    boundary.truncate(n_boundary);

    let (mut porous, mut fluid): (Vec<usize>, Vec<usize>) =
        (0..region.len()).partition(|&i| region[i] > 0.5);
    porous.shuffle(&mut rng);
    fluid.shuffle(&mut rng);

    let n_porous = bounds.max_porous.min(porous.len()).min(internal_target);
    let n_fluid = internal_target - n_porous;
    if fluid.len() < n_fluid {
        return Err(FlowError::load(format!(
            "case has {} fluid cells, {n_fluid} required",
            fluid.len()
        )));
    }
    if fluid.len() < bounds.max_internal {
        return Err(FlowError::load(format!(
            "case has {} fluid cells, {} collocation points required",
            fluid.len(),
            bounds.max_internal
        )));
    }

    let mut cells = porous[..n_porous].to_vec();
    cells.extend_from_slice(&fluid[..n_fluid]);

    let mut collocation = fluid;
    collocation.shuffle(&mut rng);
    collocation.truncate(bounds.max_internal);

    Ok(Selection {
        boundary,
        cells,
        collocation,
    })
}

fn build_dataset(
    case: &RawCase,
    metadata: Arc<FamilyMetadata>,
    bounds: SampleBounds,
    seed: u64,
) -> FlowResult<Dataset> {
    let region = &case.internal[REGION].values;
    let selection = select_points(
        case.boundary[COORDS].len(),
        region,
        metadata.counts.internal,
        metadata.counts.boundary,
        bounds,
        seed,
    )?;

    let mut sample = FieldMap::new();
    for name in [COORDS, VELOCITY, PRESSURE] {
        let stacked = Field::concat(&[
            case.boundary[name].select(&selection.boundary),
            case.internal[name].select(&selection.cells),
        ])?;
        sample.insert(name.to_string(), normalize(&metadata, name, &stacked)?);
    }
    // Boundary faces lie outside the porous region by construction.
    let mut mask = vec![0.0; selection.boundary.len()];
    mask.extend(selection.cells.iter().map(|&i| region[i]));
    sample.insert(REGION.to_string(), Field::scalar(mask));

    let mut internal = FieldMap::new();
    let coords = case.internal[COORDS].select(&selection.collocation);
    internal.insert(COORDS.to_string(), normalize(&metadata, COORDS, &coords)?);

    Ok(Dataset {
        sample,
        internal,
        metadata,
    })
}

fn normalize(metadata: &FamilyMetadata, name: &str, field: &Field) -> FlowResult<Field> {
    let normalizer = metadata
        .normalizers
        .get(name)
        .ok_or_else(|| FlowError::load(format!("no normalizer for field {name}")))?;
    normalizer
        .transform(field)
        .map_err(|err| FlowError::load(format!("normalize {name}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::domain::{FieldRange, Normalizers, PointCounts};
    use indexmap::IndexMap;
    use std::path::PathBuf;

    fn metadata(internal: usize, boundary: usize) -> Arc<FamilyMetadata> {
        let mut ranges = IndexMap::new();
        ranges.insert(
            COORDS.to_string(),
            FieldRange {
                min: vec![0.0, 0.0],
                max: vec![2.0, 2.0],
            },
        );
        ranges.insert(
            VELOCITY.to_string(),
            FieldRange {
                min: vec![0.0, 0.0],
                max: vec![1.0, 1.0],
            },
        );
        ranges.insert(
            PRESSURE.to_string(),
            FieldRange {
                min: vec![0.0],
                max: vec![1.0],
            },
        );
        Arc::new(FamilyMetadata {
            counts: PointCounts { internal, boundary },
            normalizers: Normalizers::from_ranges(&ranges).unwrap(),
        })
    }

    fn case(boundary: usize, porous: usize, fluid: usize) -> RawCase {
        let rows = |n: usize, offset: f64| -> Vec<[f64; 2]> {
            (0..n).map(|i| [offset + i as f64 * 0.001, 1.0]).collect()
        };
        let mut b = FieldMap::new();
        b.insert(COORDS.into(), Field::from_rows(&rows(boundary, 0.0)));
        b.insert(VELOCITY.into(), Field::from_rows(&rows(boundary, 0.0)));
        b.insert(PRESSURE.into(), Field::scalar(vec![0.5; boundary]));

        let n = porous + fluid;
        let mut region = vec![1.0; porous];
        region.extend(vec![0.0; fluid]);
        let mut c = FieldMap::new();
        c.insert(COORDS.into(), Field::from_rows(&rows(n, 1.0)));
        c.insert(VELOCITY.into(), Field::from_rows(&rows(n, 0.0)));
        c.insert(PRESSURE.into(), Field::scalar(vec![0.25; n]));
        c.insert(REGION.into(), Field::scalar(region));
        RawCase {
            dir: PathBuf::from("case"),
            boundary: b,
            internal: c,
        }
    }

    #[test]
    fn dataset_has_requested_sizes_and_order() {
        let ds = build_dataset(
            &case(50, 30, 300),
            metadata(100, 40),
            SampleBounds::default(),
            DEFAULT_SEED,
        )
        .unwrap();
        assert_eq!(ds.sample_len(), 140);
        assert_eq!(ds.internal_len(), 200);
        let mask = &ds.sample[REGION].values;
        assert!(mask[..40].iter().all(|&v| v == 0.0));
        assert!(mask[40..70].iter().all(|&v| v == 1.0));
        assert!(mask[70..].iter().all(|&v| v == 0.0));
        // Coordinates are in model space: x / 2.
        assert!(ds.sample[COORDS].values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn porous_share_is_capped() {
        let bounds = SampleBounds {
            max_porous: 10,
            ..SampleBounds::default()
        };
        let ds = build_dataset(&case(50, 30, 300), metadata(100, 40), bounds, 1).unwrap();
        let porous = ds.sample[REGION].values.iter().filter(|&&v| v == 1.0).count();
        assert_eq!(porous, 10);
    }

    #[test]
    fn sampling_is_reproducible_per_seed() {
        let region: Vec<f64> = (0..400).map(|i| if i % 7 == 0 { 1.0 } else { 0.0 }).collect();
        let bounds = SampleBounds::default();
        let a = select_points(120, &region, 150, 60, bounds, DEFAULT_SEED).unwrap();
        let b = select_points(120, &region, 150, 60, bounds, DEFAULT_SEED).unwrap();
        let c = select_points(120, &region, 150, 60, bounds, DEFAULT_SEED + 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn too_few_points_is_a_load_error() {
        let bounds = SampleBounds::default();
        let err = build_dataset(&case(10, 5, 300), metadata(100, 40), bounds, 1).unwrap_err();
        assert!(matches!(err, FlowError::LoadError(_)));
        let err = build_dataset(&case(50, 5, 150), metadata(100, 40), bounds, 1).unwrap_err();
        assert!(matches!(err, FlowError::LoadError(_)));
    }
}
