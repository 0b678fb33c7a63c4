//! Request orchestrator: sequences the stages of one prediction and owns the
//! working area until the request is over.
//!
//! Stage order is area creation, case generation, dataset load, area
//! deletion, inference, transform. Any failure deletes the area before the
//! error is returned. A dropped request still removes its area, since the
//! area cleans up after itself on drop.
//!
//! Filesystem work on the area runs on the blocking pool, never on the
//! runtime threads.

use std::sync::Arc;
use std::time::Duration;

use crate::casegen::domain::{CaseGenerator, CaseOverrides, CaseRequest};
use crate::common::config::AppCfg;
use crate::common::error::{FlowError, FlowResult};
use crate::common::ids::SessionKey;
use crate::data::domain::{MetadataCatalog, SampleBounds};
use crate::data::service::{load_dataset, DEFAULT_SEED};
use crate::inference::domain::ModelSelector;
use crate::inference::service::PredictionGate;
use crate::session::domain::WorkingArea;
use crate::session::repo_fs::FsSessionStore;
use crate::transform::domain::{PredictionResponse, GRID_RESOLUTION};
use crate::transform::service::build_response;

use super::domain::{Lifecycle, PredictRequest, RequestState};

/// Knobs fixed for the lifetime of the service.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub bounds: SampleBounds,
    pub seed: u64,
    pub generation_timeout: Duration,
    pub inference_timeout: Duration,
    pub grid_res: usize,
}

impl PipelineSettings {
    pub fn new(cfg: &AppCfg) -> Self {
        Self {
            generation_timeout: cfg.generation_timeout,
            inference_timeout: cfg.inference_timeout,
            ..Self::default()
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bounds: SampleBounds::default(),
            seed: DEFAULT_SEED,
            generation_timeout: Duration::from_secs(600),
            inference_timeout: Duration::from_secs(120),
            grid_res: GRID_RESOLUTION,
        }
    }
}

pub struct Orchestrator {
    sessions: FsSessionStore,
    generator: Arc<dyn CaseGenerator>,
    catalog: Arc<MetadataCatalog>,
    gate: Arc<PredictionGate>,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        sessions: FsSessionStore,
        generator: Arc<dyn CaseGenerator>,
        catalog: Arc<MetadataCatalog>,
        gate: Arc<PredictionGate>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            sessions,
            generator,
            catalog,
            gate,
            settings,
        }
    }

    pub fn sessions(&self) -> &FsSessionStore {
        &self.sessions
    }

    pub fn loaded_models(&self) -> Vec<ModelSelector> {
        self.gate.loaded()
    }

    pub async fn predict(&self, request: PredictRequest) -> FlowResult<PredictionResponse> {
        self.predict_traced(request).await.0
    }

    /// Like [`Orchestrator::predict`], also returning the states visited.
    pub async fn predict_traced(
        &self,
        request: PredictRequest,
    ) -> (FlowResult<PredictionResponse>, Vec<RequestState>) {
        let mut life = Lifecycle::new(&request.uuid);
        let mut area = None;
        let result = self.run(&request, &mut life, &mut area).await;
        match result {
            Ok(response) => {
                life.advance(RequestState::Responded);
                (Ok(response), life.into_history())
            }
            Err(err) => {
                if let Some(mut area) = area.take() {
                    let cleanup = tokio::task::spawn_blocking(move || area.delete())
                        .await
                        .map_err(|err| FlowError::internal(format!("cleanup task failed: {err}")))
                        .and_then(|deleted| deleted);
                    if let Err(cleanup) = cleanup {
                        tracing::warn!(
                            session = %request.uuid,
                            error = %cleanup,
                            "working area cleanup failed"
                        );
                    }
                }
                life.fail(&err);
                (Err(err), life.into_history())
            }
        }
    }

    async fn run(
        &self,
        request: &PredictRequest,
        life: &mut Lifecycle,
        slot: &mut Option<WorkingArea>,
    ) -> FlowResult<PredictionResponse> {
        let key = SessionKey::parse(&request.uuid)?;
        request.geometry.validate()?;

        let sessions = self.sessions.clone();
        let reserved = key.clone();
        let created = tokio::task::spawn_blocking(move || sessions.create(&reserved))
            .await
            .map_err(|err| FlowError::internal(format!("area setup task failed: {err}")))??;
        let area = slot.insert(created);
        life.advance(RequestState::AreaCreated);

        let selector = ModelSelector::parse(&request.model)?;
        self.gate.ensure_loaded(selector)?;
        let family = selector.family();
        let metadata = self.catalog.get(family)?;
        let overrides = request
            .conditions
            .map(|conditions| CaseOverrides::derive(&conditions, family))
            .transpose()?;

        let case = CaseRequest {
            session: key.as_str().to_string(),
            assets_dir: area.assets_dir(),
            mesh_dir: area.mesh_dir(),
            data_dir: area.data_dir(),
            geometry: request.geometry.clone(),
            overrides,
        };
        let generated = tokio::time::timeout(
            self.settings.generation_timeout,
            self.generator.generate(case),
        )
        .await
        .map_err(|_| {
            FlowError::generation(format!(
                "timed out after {}s",
                self.settings.generation_timeout.as_secs_f64()
            ))
        })??;
        if generated.case_dir != area.data_dir() {
            return Err(FlowError::generation(format!(
                "case written to {}, outside the working area",
                generated.case_dir.display()
            )));
        }

        let sessions = self.sessions.clone();
        with_area(slot, move |area| {
            area.mark_populated();
            sessions.install_family_metadata(area, family)
        })
        .await?;
        life.advance(RequestState::CaseGenerated);

        let (bounds, seed) = (self.settings.bounds, self.settings.seed);
        let dataset = with_area(slot, move |area| {
            let dataset = load_dataset(&area.split_dir(), metadata, bounds, seed)?;
            area.mark_consumed();
            Ok(dataset)
        })
        .await?;
        life.advance(RequestState::DatasetLoaded);

        with_area(slot, |area| area.delete()).await?;
        life.advance(RequestState::AreaDeleted);

        let dataset = Arc::new(dataset);
        let prediction = tokio::time::timeout(
            self.settings.inference_timeout,
            self.gate.predict(selector, Arc::clone(&dataset), seed),
        )
        .await
        .map_err(|_| {
            FlowError::inference(format!(
                "timed out after {}s",
                self.settings.inference_timeout.as_secs_f64()
            ))
        })??;
        life.advance(RequestState::Inferred);

        let grid_res = self.settings.grid_res;
        tokio::task::spawn_blocking(move || build_response(&dataset, &prediction, grid_res))
            .await
            .map_err(|err| FlowError::transform(format!("transform task failed: {err}")))?
    }
}

/// Run blocking work on the request's area off the runtime threads.
///
/// The area travels into the blocking task and back. If the task panics or
/// the request is dropped meanwhile, the area is dropped there and removes
/// its tree.
async fn with_area<T, F>(slot: &mut Option<WorkingArea>, work: F) -> FlowResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut WorkingArea) -> FlowResult<T> + Send + 'static,
{
    let mut area = slot
        .take()
        .ok_or_else(|| FlowError::internal("working area is gone"))?;
    let (area, result) = tokio::task::spawn_blocking(move || {
        let result = work(&mut area);
        (area, result)
    })
    .await
    .map_err(|err| FlowError::internal(format!("area task failed: {err}")))?;
    *slot = Some(area);
    result
}
