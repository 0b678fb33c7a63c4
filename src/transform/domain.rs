//! Public response shape of a prediction.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Field name to flat values, in presentation order.
pub type ValueMap = IndexMap<String, Vec<f64>>;

pub const GRID_RESOLUTION: usize = 50;

pub const UX: &str = "Ux";
pub const UY: &str = "Uy";
pub const U_MAG: &str = "U";
pub const P: &str = "p";
pub const MOMENTUM_X: &str = "Momentumx";
pub const MOMENTUM_Y: &str = "Momentumy";
pub const MOMENTUM_MAG: &str = "Momentum";
pub const DIV: &str = "div";

/// One variant of the response: point coordinates plus four field groups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response2d {
    pub points: ValueMap,
    pub target: ValueMap,
    pub predicted: ValueMap,
    pub error: ValueMap,
    pub residuals: ValueMap,
    /// Porous membership per raw sample point; `null` on the grid variant.
    pub porous_ids: Option<Vec<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub raw_data: Response2d,
    pub grid_data: Response2d,
}
