//! Shared fixtures: an assets tree, a synthetic case generator, and mock models.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use poroflow::casegen::domain::{CaseGenerator, CaseRequest, GenerationOutput};
use poroflow::common::error::{FlowError, FlowResult};
use poroflow::data::domain::{
    Dataset, Field, FieldMap, DIVERGENCE, MOMENTUM, PRESSURE, VELOCITY,
};
use poroflow::data::repo_fs::load_catalog;
use poroflow::inference::domain::{ModelSelector, PredictionResult, SurrogateModel};
use poroflow::inference::{ModelRegistry, PredictionGate};
use poroflow::session::FsSessionStore;
use poroflow::{Orchestrator, PipelineSettings};
use serde_json::json;
use tempfile::TempDir;

/// Cells per side of the synthetic duct.
pub const CELLS: usize = 20;

pub fn write_assets(root: &Path) {
    let template = root.join("openfoam-case-template").join("system");
    fs::create_dir_all(&template).unwrap();
    fs::write(template.join("controlDict"), "application simpleFoam;").unwrap();
    fs::write(
        root.join("data_config.json"),
        json!({"cfd params": {
            "coeffs": [{"d": [0, 0, 0], "f": [0, 0, 0]}],
            "inlet": [0.1],
            "angle": [0, 0, 0]
        }})
        .to_string(),
    )
    .unwrap();
    fs::write(root.join("transforms.json"), "{}").unwrap();

    let family = root.join("pipn");
    fs::create_dir_all(&family).unwrap();
    fs::write(
        family.join("min_points.json"),
        json!({"internal": 300, "boundary": 60}).to_string(),
    )
    .unwrap();
    fs::write(
        family.join("meta.json"),
        json!({
            "C": {"min": [0.0, 0.0], "max": [1.0, 1.0]},
            "U": {"min": [0.0, 0.0], "max": [1.0, 1.0]},
            "p": {"min": [0.0], "max": [1.0]}
        })
        .to_string(),
    )
    .unwrap();
}

/// Pressure offset that tells one session's case apart from another's.
pub fn session_offset(session: &str) -> f64 {
    session.bytes().map(f64::from).sum::<f64>() % 97.0 / 10.0
}

fn flow_at(x: f64, y: f64, p_offset: f64) -> ([f64; 2], f64) {
    ([x, 0.5 * y], 1.0 - x + p_offset)
}

/// Unit-square duct with a porous block in the middle; `p` is shifted by `p_offset`.
pub fn write_case(data_dir: &Path, p_offset: f64) -> PathBuf {
    let case = data_dir.join("split").join("case_0");
    fs::create_dir_all(&case).unwrap();

    let mut coords = Vec::new();
    for k in 0..CELLS {
        let t = (k as f64 + 0.5) / CELLS as f64;
        coords.extend([[t, 0.0], [t, 1.0], [0.0, t], [1.0, t]]);
    }
    let (u, p): (Vec<_>, Vec<_>) = coords.iter().map(|c| flow_at(c[0], c[1], p_offset)).unzip();
    fs::write(
        case.join("boundary.json"),
        json!({"C": coords, "U": u, "p": p}).to_string(),
    )
    .unwrap();

    let mut coords = Vec::new();
    let mut region = Vec::new();
    for i in 0..CELLS {
        for j in 0..CELLS {
            let x = (j as f64 + 0.5) / CELLS as f64;
            let y = (i as f64 + 0.5) / CELLS as f64;
            coords.push([x, y]);
            let porous = (0.4..0.6).contains(&x) && (0.4..0.6).contains(&y);
            region.push(if porous { 1.0 } else { 0.0 });
        }
    }
    let (u, p): (Vec<_>, Vec<_>) = coords.iter().map(|c| flow_at(c[0], c[1], p_offset)).unzip();
    fs::write(
        case.join("internal.json"),
        json!({"C": coords, "U": u, "p": p, "cellToRegion": region}).to_string(),
    )
    .unwrap();
    case
}

/// Writes the synthetic case for the request's session after an optional delay
/// and records every request.
#[derive(Default)]
pub struct SyntheticGenerator {
    pub delay: Duration,
    pub requests: Mutex<Vec<CaseRequest>>,
}

impl SyntheticGenerator {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl CaseGenerator for SyntheticGenerator {
    async fn generate(&self, request: CaseRequest) -> FlowResult<GenerationOutput> {
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        write_case(&request.data_dir, session_offset(&request.session));
        Ok(GenerationOutput {
            case_dir: request.data_dir,
        })
    }
}

/// Counters shared by every instance of [`EchoModel`].
#[derive(Default)]
pub struct ModelCounters {
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

/// Predicts the target scaled by 0.9 and zero residuals.
pub struct EchoModel {
    pub counters: Arc<ModelCounters>,
    pub delay: Duration,
    pub broken: bool,
}

impl SurrogateModel for EchoModel {
    fn predict(&mut self, dataset: &Dataset, _seed: u64) -> FlowResult<PredictionResult> {
        let counters = &self.counters;
        counters.calls.fetch_add(1, Ordering::SeqCst);
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.broken {
            return Err(FlowError::inference("checkpoint produced garbage"));
        }
        let scale = |f: &Field| Field {
            dim: f.dim,
            values: f.values.iter().map(|v| v * 0.9).collect(),
        };
        let mut predicted = FieldMap::new();
        predicted.insert(VELOCITY.into(), scale(dataset.sample_field(VELOCITY)?));
        predicted.insert(PRESSURE.into(), scale(dataset.sample_field(PRESSURE)?));
        let m = dataset.internal_len();
        let mut residuals = FieldMap::new();
        residuals.insert(MOMENTUM.into(), Field::from_rows(&vec![[0.0, 0.0]; m]));
        residuals.insert(DIVERGENCE.into(), Field::scalar(vec![0.0; m]));
        Ok(PredictionResult {
            predicted,
            residuals,
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub orchestrator: Arc<Orchestrator>,
    pub generator: Arc<SyntheticGenerator>,
    pub counters: Arc<ModelCounters>,
}

impl Harness {
    pub fn sessions_root(&self) -> PathBuf {
        self.dir.path().join("sessions")
    }

    pub fn area(&self, key: &str) -> PathBuf {
        self.sessions_root().join(key)
    }
}

pub struct HarnessOptions {
    pub generator: SyntheticGenerator,
    pub generation_timeout: Duration,
    pub inference_timeout: Duration,
    pub model_delay: Duration,
    pub broken_model: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            generator: SyntheticGenerator::default(),
            generation_timeout: Duration::from_secs(30),
            inference_timeout: Duration::from_secs(30),
            model_delay: Duration::ZERO,
            broken_model: false,
        }
    }
}

pub fn harness(options: HarnessOptions) -> Harness {
    harness_with(options, |generator| generator as Arc<dyn CaseGenerator>)
}

/// Build a harness, letting the caller swap the generator the orchestrator uses.
pub fn harness_with(
    options: HarnessOptions,
    wrap: impl FnOnce(Arc<SyntheticGenerator>) -> Arc<dyn CaseGenerator>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let assets = dir.path().join("assets");
    write_assets(&assets);

    let counters = Arc::new(ModelCounters::default());
    let mut registry = ModelRegistry::default();
    registry.insert(
        ModelSelector::Pipn,
        Box::new(EchoModel {
            counters: Arc::clone(&counters),
            delay: options.model_delay,
            broken: options.broken_model,
        }),
    );

    let generator = Arc::new(options.generator);
    let settings = PipelineSettings {
        generation_timeout: options.generation_timeout,
        inference_timeout: options.inference_timeout,
        ..PipelineSettings::default()
    };
    let orchestrator = Orchestrator::new(
        FsSessionStore::with_roots(&dir.path().join("sessions"), &assets),
        wrap(Arc::clone(&generator)),
        Arc::new(load_catalog(&assets).unwrap()),
        Arc::new(PredictionGate::new(registry)),
        settings,
    );
    Harness {
        dir,
        orchestrator: Arc::new(orchestrator),
        generator,
        counters,
    }
}

pub fn square() -> poroflow::casegen::domain::BoundaryGeometry {
    poroflow::casegen::domain::BoundaryGeometry {
        x: vec![0.4, 0.6, 0.6, 0.4],
        y: vec![0.4, 0.4, 0.6, 0.6],
    }
}
