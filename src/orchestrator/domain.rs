//! Request types and the per-request lifecycle trace.

use serde::{Deserialize, Serialize};

use crate::casegen::domain::{BoundaryConditions, BoundaryGeometry};
use crate::common::error::FlowError;
use crate::common::log;
use crate::common::time::Stopwatch;

const MODULE: &str = "orchestrator";

/// Stages of one request. `Failed` is reachable from every non-terminal state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestState {
    Start,
    AreaCreated,
    CaseGenerated,
    DatasetLoaded,
    AreaDeleted,
    Inferred,
    Responded,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Start => "start",
            RequestState::AreaCreated => "area_created",
            RequestState::CaseGenerated => "case_generated",
            RequestState::DatasetLoaded => "dataset_loaded",
            RequestState::AreaDeleted => "area_deleted",
            RequestState::Inferred => "inferred",
            RequestState::Responded => "responded",
            RequestState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Responded | RequestState::Failed)
    }
}

fn default_inlet_u() -> f64 {
    BoundaryConditions::default().inlet_u
}

fn default_inlet_angle() -> f64 {
    BoundaryConditions::default().inlet_angle
}

fn default_d() -> f64 {
    BoundaryConditions::default().d
}

/// Body of `POST /predict`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Predict2dInput {
    pub uuid: String,
    pub model: String,
    pub points: BoundaryGeometry,
    #[serde(default = "default_inlet_u")]
    pub inlet_u: f64,
    #[serde(default = "default_inlet_angle")]
    pub inlet_angle: f64,
    #[serde(default = "default_d")]
    pub d: f64,
}

/// Body of `POST /predict_fixed`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PredictFixedInput {
    pub uuid: String,
    pub model: String,
    pub points: BoundaryGeometry,
}

/// One prediction request as the orchestrator sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictRequest {
    pub uuid: String,
    pub model: String,
    pub geometry: BoundaryGeometry,
    /// `None` runs the case template config unmodified.
    pub conditions: Option<BoundaryConditions>,
}

impl From<Predict2dInput> for PredictRequest {
    fn from(input: Predict2dInput) -> Self {
        Self {
            uuid: input.uuid,
            model: input.model,
            geometry: input.points,
            conditions: Some(BoundaryConditions {
                inlet_u: input.inlet_u,
                inlet_angle: input.inlet_angle,
                d: input.d,
            }),
        }
    }
}

impl From<PredictFixedInput> for PredictRequest {
    fn from(input: PredictFixedInput) -> Self {
        Self {
            uuid: input.uuid,
            model: input.model,
            geometry: input.points,
            conditions: None,
        }
    }
}

/// States a request went through, logged as they happen.
#[derive(Debug)]
pub struct Lifecycle {
    session: String,
    watch: Stopwatch,
    history: Vec<RequestState>,
}

impl Lifecycle {
    pub fn new(session: &str) -> Self {
        Self {
            session: session.to_string(),
            watch: Stopwatch::start(),
            history: vec![RequestState::Start],
        }
    }

    pub fn state(&self) -> RequestState {
        self.history
            .last()
            .copied()
            .unwrap_or(RequestState::Start)
    }

    pub fn advance(&mut self, next: RequestState) {
        if self.state().is_terminal() {
            return;
        }
        self.history.push(next);
        log::stage(MODULE, &self.session, next.as_str(), 0, self.watch.elapsed_ms());
    }

    /// Enter `Failed`, logging the error with the state it interrupted.
    pub fn fail(&mut self, err: &FlowError) {
        let from = self.state();
        if from.is_terminal() {
            return;
        }
        self.history.push(RequestState::Failed);
        log::failure(
            MODULE,
            &self.session,
            RequestState::Failed.as_str(),
            err.code() as u32,
            self.watch.elapsed_ms(),
            &format!("after {}: {err}", from.as_str()),
        );
    }

    pub fn history(&self) -> &[RequestState] {
        &self.history
    }

    pub fn into_history(self) -> Vec<RequestState> {
        self.history
    }
}
