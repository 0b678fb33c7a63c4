//! Domain definitions for model selection and surrogate inference.

use std::path::Path;

use serde::Serialize;

use crate::common::error::{FlowError, FlowResult};
use crate::data::domain::{Dataset, FieldMap};

/// Model families sharing a case template, Reynolds number, and metadata.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ModelFamily {
    Pipn,
    PiGano,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 2] = [ModelFamily::Pipn, ModelFamily::PiGano];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Pipn => "pipn",
            ModelFamily::PiGano => "pi_gano",
        }
    }

    /// Directory under the assets root holding checkpoints and metadata.
    pub fn asset_dir(&self) -> &'static str {
        match self {
            ModelFamily::Pipn => "pipn",
            ModelFamily::PiGano => "pi-gano",
        }
    }
}

/// Closed set of surrogate variants the service can serve.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSelector {
    Pipn,
    PipnPp,
    PipnPpMrg,
    PiGano,
    PiGanoPp,
}

impl ModelSelector {
    pub const ALL: [ModelSelector; 5] = [
        ModelSelector::Pipn,
        ModelSelector::PipnPp,
        ModelSelector::PipnPpMrg,
        ModelSelector::PiGano,
        ModelSelector::PiGanoPp,
    ];

    /// Parse the wire name; anything else is `UnknownModel`.
    pub fn parse(raw: &str) -> FlowResult<Self> {
        Self::ALL
            .into_iter()
            .find(|sel| sel.as_str() == raw)
            .ok_or_else(|| FlowError::unknown_model(format!("{raw:?} is not a model selector")))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSelector::Pipn => "pipn",
            ModelSelector::PipnPp => "pipn_pp",
            ModelSelector::PipnPpMrg => "pipn_pp_mrg",
            ModelSelector::PiGano => "pi_gano",
            ModelSelector::PiGanoPp => "pi_gano_pp",
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            ModelSelector::Pipn | ModelSelector::PipnPp | ModelSelector::PipnPpMrg => {
                ModelFamily::Pipn
            }
            ModelSelector::PiGano | ModelSelector::PiGanoPp => ModelFamily::PiGano,
        }
    }

    /// Checkpoint file name inside the family's asset directory.
    pub fn checkpoint_file(&self) -> &'static str {
        match self {
            ModelSelector::Pipn => "pipn.ckpt",
            ModelSelector::PipnPp => "pipn-pp.ckpt",
            ModelSelector::PipnPpMrg => "pipn-pp-mrg.ckpt",
            ModelSelector::PiGano => "pi_gano.ckpt",
            ModelSelector::PiGanoPp => "pi_gano_pp.ckpt",
        }
    }
}

/// Output of one inference call, in model space.
///
/// `predicted` is aligned with the dataset's sample points, `residuals` with
/// its internal points.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionResult {
    pub predicted: FieldMap,
    pub residuals: FieldMap,
}

/// A loaded surrogate. Calls mutate internal state, so callers need exclusive access.
pub trait SurrogateModel: Send {
    fn predict(&mut self, dataset: &Dataset, seed: u64) -> FlowResult<PredictionResult>;
}

/// Turns a checkpoint into a ready model. Called once per selector at startup.
pub trait ModelLoader {
    fn load(
        &self,
        selector: ModelSelector,
        checkpoint: &Path,
    ) -> FlowResult<Box<dyn SurrogateModel>>;
}
