//! Case generation inputs, the derived solver configuration, and the generator seam.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::common::error::{FlowError, FlowResult};
use crate::inference::domain::ModelFamily;

/// Kinematic viscosity of the working fluid used when the models were trained.
pub const KINEMATIC_VISCOSITY: f64 = 1489.4e-6;
/// Inlet speed the particle size is calibrated against.
pub const REFERENCE_VELOCITY: f64 = 0.2;

const POROSITY_TOLERANCE: f64 = 1e-15;
const POROSITY_MAX_ITER: usize = 200;

/// Ordered outline of the porous object, as two coordinate columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundaryGeometry {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl BoundaryGeometry {
    pub fn validate(&self) -> FlowResult<()> {
        if self.x.is_empty() || self.y.is_empty() {
            return Err(FlowError::invalid("boundary geometry is empty"));
        }
        if self.x.len() != self.y.len() {
            return Err(FlowError::invalid(format!(
                "boundary geometry has {} x and {} y coordinates",
                self.x.len(),
                self.y.len()
            )));
        }
        if self.x.iter().chain(&self.y).any(|v| !v.is_finite()) {
            return Err(FlowError::invalid("boundary geometry has non-finite coordinates"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.x.len().min(self.y.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vertices(&self) -> Vec<[f64; 2]> {
        self.x.iter().zip(&self.y).map(|(&x, &y)| [x, y]).collect()
    }
}

/// Inflow and porous-region parameters of the variable-boundary request.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConditions {
    pub inlet_u: f64,
    pub inlet_angle: f64,
    /// Darcy coefficient of the porous region (inverse permeability).
    pub d: f64,
}

impl Default for BoundaryConditions {
    fn default() -> Self {
        Self {
            inlet_u: 0.2,
            inlet_angle: 0.0,
            d: 50_000.0,
        }
    }
}

impl BoundaryConditions {
    pub fn validate(&self) -> FlowResult<()> {
        if !(self.inlet_u.is_finite() && self.inlet_angle.is_finite() && self.d.is_finite()) {
            return Err(FlowError::invalid("boundary conditions must be finite"));
        }
        if self.d <= 0.0 {
            return Err(FlowError::invalid("d must be positive"));
        }
        Ok(())
    }
}

/// Reynolds number the family's training cases were generated at.
pub fn reynolds_number(family: ModelFamily) -> f64 {
    match family {
        ModelFamily::Pipn => 0.8,
        ModelFamily::PiGano => 13.428,
    }
}

/// Particle size that yields `re` at speed `u` in a fluid of viscosity `nu`.
pub fn particle_size(re: f64, u: f64, nu: f64) -> f64 {
    re * nu / u
}

/// Porosity from the Kozeny–Carman relation `dp² ε³ / (180 (1 − ε)²) = k`.
///
/// The left side is strictly increasing on (0, 1) and spans (0, ∞), so the
/// root there is unique; bisection makes the result reproducible bit for bit.
pub fn porosity(dp: f64, k: f64) -> FlowResult<f64> {
    if !(dp.is_finite() && k.is_finite()) || dp <= 0.0 || k <= 0.0 {
        return Err(FlowError::generation(format!(
            "porosity needs positive inputs, got dp={dp} k={k}"
        )));
    }
    let residual = |eps: f64| dp * dp * eps.powi(3) - 180.0 * k * (1.0 - eps).powi(2);
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    for _ in 0..POROSITY_MAX_ITER {
        let mid = 0.5 * (lo + hi);
        if residual(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < POROSITY_TOLERANCE {
            break;
        }
    }
    Ok(0.5 * (lo + hi))
}

/// Ergun-type Forchheimer factor of a packed bed with porosity `eps`.
pub fn forchheimer_from_porosity(eps: f64) -> f64 {
    1.8 / (180.0 * eps.powi(5)).sqrt() * eps
}

/// Forchheimer coefficient `f` for a region with Darcy coefficient `d`.
pub fn forchheimer_coefficient(d: f64, family: ModelFamily) -> FlowResult<f64> {
    let k = 1.0 / d;
    let dp = particle_size(reynolds_number(family), REFERENCE_VELOCITY, KINEMATIC_VISCOSITY);
    let eps = porosity(dp, k)?;
    Ok(forchheimer_from_porosity(eps) / k.sqrt())
}

/// Values merged into the base case config for a variable-boundary request.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseOverrides {
    pub d: f64,
    pub f: f64,
    pub inlet_u: f64,
    pub inlet_angle: f64,
}

impl CaseOverrides {
    pub fn derive(conditions: &BoundaryConditions, family: ModelFamily) -> FlowResult<Self> {
        conditions.validate()?;
        Ok(Self {
            d: conditions.d,
            f: forchheimer_coefficient(conditions.d, family)?,
            inlet_u: conditions.inlet_u,
            inlet_angle: conditions.inlet_angle,
        })
    }

    /// Write the overrides into a case config document.
    pub fn apply(&self, config: &mut Value) -> FlowResult<()> {
        let params = config
            .get_mut("cfd params")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| FlowError::generation("case config has no \"cfd params\" object"))?;
        params.insert("inlet".into(), json!([self.inlet_u]));
        params.insert(
            "angle".into(),
            json!([self.inlet_angle, self.inlet_angle, 0.0]),
        );

        let coeffs = params
            .get_mut("coeffs")
            .and_then(Value::as_array_mut)
            .and_then(|list| list.first_mut())
            .and_then(Value::as_object_mut)
            .ok_or_else(|| FlowError::generation("case config has no porous coefficients"))?;
        coeffs.insert("d".into(), json!([self.d, self.d, 0.0]));
        coeffs.insert("f".into(), json!([self.f, self.f, 0.0]));
        Ok(())
    }
}

/// What a request asks the generator to build, and where.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseRequest {
    pub session: String,
    pub assets_dir: PathBuf,
    pub mesh_dir: PathBuf,
    pub data_dir: PathBuf,
    pub geometry: BoundaryGeometry,
    /// `None` keeps the template config as is.
    pub overrides: Option<CaseOverrides>,
}

/// Message sent to a worker process on stdin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub request: CaseRequest,
    pub generator_cmd: Vec<String>,
    pub solver_cmd: PathBuf,
    pub n_procs: usize,
}

/// Message a worker prints on stdout when the case is ready.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub case_dir: PathBuf,
}

/// Builds a case on disk for one request. Partial output is left for the caller.
#[async_trait]
pub trait CaseGenerator: Send + Sync {
    async fn generate(&self, request: CaseRequest) -> FlowResult<GenerationOutput>;
}
