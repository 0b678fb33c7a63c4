//! Filesystem readers for generated cases and per-family metadata.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::common::error::{FlowError, FlowResult};
use crate::inference::domain::ModelFamily;
use crate::session::domain::{META_FILE, MIN_POINTS_FILE};

use super::domain::{
    FamilyMetadata, Field, FieldMap, FieldRange, MetadataCatalog, Normalizers, PointCounts,
    COORDS, PRESSURE, REGION, VELOCITY,
};

pub const BOUNDARY_FILE: &str = "boundary.json";
pub const INTERNAL_FILE: &str = "internal.json";

/// Column table of one point set as written by the case generator.
#[derive(Debug, Deserialize)]
struct CaseTable {
    #[serde(rename = "C")]
    coords: Vec<[f64; 2]>,
    #[serde(rename = "U")]
    velocity: Vec<[f64; 2]>,
    #[serde(rename = "p")]
    pressure: Vec<f64>,
    #[serde(rename = "cellToRegion", default)]
    region: Option<Vec<f64>>,
}

impl CaseTable {
    fn into_fields(self, name: &str, needs_region: bool) -> FlowResult<FieldMap> {
        let n = self.coords.len();
        if self.velocity.len() != n || self.pressure.len() != n {
            return Err(FlowError::load(format!(
                "{name}: column lengths differ (C={n}, U={}, p={})",
                self.velocity.len(),
                self.pressure.len()
            )));
        }
        let mut fields = FieldMap::new();
        fields.insert(COORDS.into(), Field::from_rows(&self.coords));
        fields.insert(VELOCITY.into(), Field::from_rows(&self.velocity));
        fields.insert(PRESSURE.into(), Field::scalar(self.pressure));
        match self.region {
            Some(region) if region.len() == n => {
                fields.insert(REGION.into(), Field::scalar(region));
            }
            Some(region) => {
                return Err(FlowError::load(format!(
                    "{name}: {REGION} has {} rows, expected {n}",
                    region.len()
                )));
            }
            None if needs_region => {
                return Err(FlowError::load(format!("{name}: missing {REGION}")));
            }
            None => {}
        }
        if fields.values().any(|f| !f.is_finite()) {
            return Err(FlowError::load(format!("{name}: non-finite values")));
        }
        Ok(fields)
    }
}

/// Boundary faces and interior cells of one generated case, in physical units.
#[derive(Clone, Debug)]
pub struct RawCase {
    pub dir: PathBuf,
    pub boundary: FieldMap,
    pub internal: FieldMap,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> FlowResult<T> {
    let raw = fs::read_to_string(path)
        .map_err(|err| FlowError::load(format!("read {}: {err}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|err| FlowError::load(format!("parse {}: {err}", path.display())))
}

/// First case directory under `split_dir`, in name order.
pub fn find_case(split_dir: &Path) -> FlowResult<PathBuf> {
    let entries = fs::read_dir(split_dir)
        .map_err(|err| FlowError::load(format!("list {}: {err}", split_dir.display())))?;
    let mut cases: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.join(BOUNDARY_FILE).is_file() && path.join(INTERNAL_FILE).is_file())
        .collect();
    cases.sort();
    cases
        .into_iter()
        .next()
        .ok_or_else(|| FlowError::load(format!("no case found in {}", split_dir.display())))
}

pub fn read_case(split_dir: &Path) -> FlowResult<RawCase> {
    let dir = find_case(split_dir)?;
    let boundary: CaseTable = read_json(&dir.join(BOUNDARY_FILE))?;
    let internal: CaseTable = read_json(&dir.join(INTERNAL_FILE))?;
    Ok(RawCase {
        boundary: boundary.into_fields(BOUNDARY_FILE, false)?,
        internal: internal.into_fields(INTERNAL_FILE, true)?,
        dir,
    })
}

/// Point counts and normalizers stored in a family's asset directory.
pub fn load_family_metadata(family_dir: &Path) -> FlowResult<FamilyMetadata> {
    let counts: PointCounts = read_json(&family_dir.join(MIN_POINTS_FILE))?;
    let ranges: IndexMap<String, FieldRange> = read_json(&family_dir.join(META_FILE))?;
    for required in [COORDS, VELOCITY, PRESSURE] {
        if !ranges.contains_key(required) {
            return Err(FlowError::load(format!(
                "{} has no range for {required}",
                family_dir.join(META_FILE).display()
            )));
        }
    }
    Ok(FamilyMetadata {
        counts,
        normalizers: Normalizers::from_ranges(&ranges)?,
    })
}

/// Metadata for every family whose directory carries a `meta.json`.
pub fn load_catalog(assets_root: &Path) -> FlowResult<MetadataCatalog> {
    let mut catalog = MetadataCatalog::default();
    for family in ModelFamily::ALL {
        let dir = assets_root.join(family.asset_dir());
        if !dir.join(META_FILE).is_file() {
            tracing::warn!(family = family.as_str(), dir = %dir.display(), "no family metadata");
            continue;
        }
        catalog.insert(family, load_family_metadata(&dir)?);
        tracing::info!(family = family.as_str(), "family metadata loaded");
    }
    Ok(catalog)
}
