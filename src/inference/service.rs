//! Prediction gate: the loaded models and the locking discipline around them.
//!
//! Each selector owns one model behind its own `tokio::sync::Mutex`. A call
//! takes the guard as an owned value and moves it into the blocking task, so
//! the lock is held until the model returns even if the caller stops waiting.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::common::error::{FlowError, FlowResult};
use crate::common::time::Stopwatch;
use crate::data::domain::{Dataset, Field, FieldMap, DIVERGENCE, MOMENTUM, PRESSURE, VELOCITY};

use super::domain::{ModelLoader, ModelSelector, PredictionResult, SurrogateModel};

pub type SharedModel = Arc<Mutex<Box<dyn SurrogateModel>>>;

/// One optional model per selector. Filled at startup, never changed afterwards.
#[derive(Default)]
pub struct ModelRegistry {
    pipn: Option<SharedModel>,
    pipn_pp: Option<SharedModel>,
    pipn_pp_mrg: Option<SharedModel>,
    pi_gano: Option<SharedModel>,
    pi_gano_pp: Option<SharedModel>,
}

impl ModelRegistry {
    /// Load every selector whose checkpoint exists under `assets_root`.
    ///
    /// A missing checkpoint or a failed load leaves that selector empty.
    pub fn load(assets_root: &Path, loader: &dyn ModelLoader) -> Self {
        let mut registry = Self::default();
        for selector in ModelSelector::ALL {
            let checkpoint = assets_root
                .join(selector.family().asset_dir())
                .join(selector.checkpoint_file());
            if !checkpoint.is_file() {
                tracing::warn!(
                    model = selector.as_str(),
                    checkpoint = %checkpoint.display(),
                    "checkpoint missing, model not served"
                );
                continue;
            }
            let watch = Stopwatch::start();
            match loader.load(selector, &checkpoint) {
                Ok(model) => {
                    registry.insert(selector, model);
                    tracing::info!(
                        model = selector.as_str(),
                        dur_ms = watch.elapsed_ms() as u64,
                        "model loaded"
                    );
                }
                Err(err) => tracing::error!(
                    model = selector.as_str(),
                    code = err.code() as u32,
                    detail = %err,
                    "model load failed"
                ),
            }
        }
        registry
    }

    pub fn insert(&mut self, selector: ModelSelector, model: Box<dyn SurrogateModel>) {
        *self.slot_mut(selector) = Some(Arc::new(Mutex::new(model)));
    }

    fn slot_mut(&mut self, selector: ModelSelector) -> &mut Option<SharedModel> {
        match selector {
            ModelSelector::Pipn => &mut self.pipn,
            ModelSelector::PipnPp => &mut self.pipn_pp,
            ModelSelector::PipnPpMrg => &mut self.pipn_pp_mrg,
            ModelSelector::PiGano => &mut self.pi_gano,
            ModelSelector::PiGanoPp => &mut self.pi_gano_pp,
        }
    }

    fn slot(&self, selector: ModelSelector) -> Option<&SharedModel> {
        match selector {
            ModelSelector::Pipn => self.pipn.as_ref(),
            ModelSelector::PipnPp => self.pipn_pp.as_ref(),
            ModelSelector::PipnPpMrg => self.pipn_pp_mrg.as_ref(),
            ModelSelector::PiGano => self.pi_gano.as_ref(),
            ModelSelector::PiGanoPp => self.pi_gano_pp.as_ref(),
        }
    }

    pub fn loaded(&self) -> Vec<ModelSelector> {
        ModelSelector::ALL
            .into_iter()
            .filter(|sel| self.slot(*sel).is_some())
            .collect()
    }
}

/// Shared entry point for inference. Cheap to share behind an `Arc`.
pub struct PredictionGate {
    registry: ModelRegistry,
}

impl PredictionGate {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    pub fn loaded(&self) -> Vec<ModelSelector> {
        self.registry.loaded()
    }

    pub fn ensure_loaded(&self, selector: ModelSelector) -> FlowResult<()> {
        self.model(selector).map(|_| ())
    }

    fn model(&self, selector: ModelSelector) -> FlowResult<&SharedModel> {
        self.registry.slot(selector).ok_or_else(|| {
            FlowError::unknown_model(format!("model {} is not loaded", selector.as_str()))
        })
    }

    /// Run one inference call with exclusive access to the selector's model.
    pub async fn predict(
        &self,
        selector: ModelSelector,
        dataset: Arc<Dataset>,
        seed: u64,
    ) -> FlowResult<PredictionResult> {
        let model = Arc::clone(self.model(selector)?);
        let guard = model.lock_owned().await;
        let task = tokio::task::spawn_blocking(move || -> FlowResult<PredictionResult> {
            let mut guard = guard;
            let result = guard.predict(&dataset, seed)?;
            check_output(&dataset, &result)?;
            Ok(result)
        });
        match task.await {
            Ok(result) => result.map_err(|err| match err {
                FlowError::InferenceFailed(_) => err,
                other => FlowError::inference(other.to_string()),
            }),
            Err(join) if join.is_panic() => Err(FlowError::inference(format!(
                "model {} panicked",
                selector.as_str()
            ))),
            Err(join) => Err(FlowError::inference(format!("inference task failed: {join}"))),
        }
    }
}

fn expect_field(map: &FieldMap, group: &str, name: &str, dim: usize, len: usize) -> FlowResult<()> {
    let field: &Field = map
        .get(name)
        .ok_or_else(|| FlowError::inference(format!("{group} is missing {name}")))?;
    if field.dim != dim || field.len() != len || field.values.len() != dim * len {
        return Err(FlowError::inference(format!(
            "{group}.{name} has shape {}x{}, expected {len}x{dim}",
            field.len(),
            field.dim
        )));
    }
    if !field.is_finite() {
        return Err(FlowError::inference(format!("{group}.{name} has non-finite values")));
    }
    Ok(())
}

/// Shapes the model must return: `U`, `p` on the sample points and
/// `Momentum`, `div` on the internal points.
pub fn check_output(dataset: &Dataset, result: &PredictionResult) -> FlowResult<()> {
    let n = dataset.sample_len();
    expect_field(&result.predicted, "predicted", VELOCITY, 2, n)?;
    expect_field(&result.predicted, "predicted", PRESSURE, 1, n)?;
    let m = dataset.internal_len();
    expect_field(&result.residuals, "residuals", MOMENTUM, 2, m)?;
    expect_field(&result.residuals, "residuals", DIVERGENCE, 1, m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::domain::{FamilyMetadata, Normalizers, PointCounts, COORDS};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dataset(n: usize, m: usize) -> Arc<Dataset> {
        let mut sample = FieldMap::new();
        sample.insert(COORDS.into(), Field::from_rows(&vec![[0.5, 0.5]; n]));
        let mut internal = FieldMap::new();
        internal.insert(COORDS.into(), Field::from_rows(&vec![[0.5, 0.5]; m]));
        Arc::new(Dataset {
            sample,
            internal,
            metadata: Arc::new(FamilyMetadata {
                counts: PointCounts {
                    internal: n,
                    boundary: 0,
                },
                normalizers: Normalizers::default(),
            }),
        })
    }

    fn output(n: usize, m: usize) -> PredictionResult {
        let mut predicted = FieldMap::new();
        predicted.insert(VELOCITY.into(), Field::from_rows(&vec![[1.0, 0.0]; n]));
        predicted.insert(PRESSURE.into(), Field::scalar(vec![0.5; n]));
        let mut residuals = FieldMap::new();
        residuals.insert(MOMENTUM.into(), Field::from_rows(&vec![[0.0, 0.0]; m]));
        residuals.insert(DIVERGENCE.into(), Field::scalar(vec![0.0; m]));
        PredictionResult {
            predicted,
            residuals,
        }
    }

    struct Fixed {
        out: PredictionResult,
    }

    impl SurrogateModel for Fixed {
        fn predict(&mut self, _: &Dataset, _: u64) -> FlowResult<PredictionResult> {
            Ok(self.out.clone())
        }
    }

    struct Panicking;

    impl SurrogateModel for Panicking {
        fn predict(&mut self, _: &Dataset, _: u64) -> FlowResult<PredictionResult> {
            panic!("boom")
        }
    }

    struct CountingLoader(AtomicUsize);

    impl ModelLoader for CountingLoader {
        fn load(
            &self,
            selector: ModelSelector,
            _: &Path,
        ) -> FlowResult<Box<dyn SurrogateModel>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if selector == ModelSelector::PipnPp {
                return Err(FlowError::inference("bad checkpoint"));
            }
            Ok(Box::new(Fixed { out: output(1, 1) }))
        }
    }

    #[test]
    fn registry_skips_missing_and_failed_checkpoints() {
        let tmp = tempfile::tempdir().unwrap();
        let pipn: PathBuf = tmp.path().join("pipn");
        std::fs::create_dir_all(&pipn).unwrap();
        std::fs::write(pipn.join("pipn.ckpt"), b"w").unwrap();
        std::fs::write(pipn.join("pipn-pp.ckpt"), b"w").unwrap();

        let loader = CountingLoader(AtomicUsize::new(0));
        let registry = ModelRegistry::load(tmp.path(), &loader);
        assert_eq!(loader.0.load(Ordering::SeqCst), 2);
        assert_eq!(registry.loaded(), vec![ModelSelector::Pipn]);
    }

    #[tokio::test]
    async fn unloaded_selector_is_unknown_model() {
        let gate = PredictionGate::new(ModelRegistry::default());
        let err = gate
            .predict(ModelSelector::PiGano, dataset(1, 1), 8421)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownModel(_)));
        assert!(gate.ensure_loaded(ModelSelector::Pipn).is_err());
    }

    #[tokio::test]
    async fn well_formed_output_passes() {
        let mut registry = ModelRegistry::default();
        registry.insert(ModelSelector::Pipn, Box::new(Fixed { out: output(3, 2) }));
        let gate = PredictionGate::new(registry);
        let out = gate
            .predict(ModelSelector::Pipn, dataset(3, 2), 8421)
            .await
            .unwrap();
        assert_eq!(out.predicted[PRESSURE].len(), 3);
    }

    #[tokio::test]
    async fn wrong_shapes_and_nan_are_inference_failures() {
        let mut registry = ModelRegistry::default();
        registry.insert(ModelSelector::Pipn, Box::new(Fixed { out: output(2, 2) }));
        let mut nan = output(3, 2);
        nan.residuals.insert(DIVERGENCE.into(), Field::scalar(vec![f64::NAN; 2]));
        registry.insert(ModelSelector::PiGano, Box::new(Fixed { out: nan }));
        let gate = PredictionGate::new(registry);

        for selector in [ModelSelector::Pipn, ModelSelector::PiGano] {
            let err = gate.predict(selector, dataset(3, 2), 1).await.unwrap_err();
            assert!(matches!(err, FlowError::InferenceFailed(_)), "{err:?}");
        }
    }

    #[tokio::test]
    async fn panic_is_contained_and_lock_released() {
        let mut registry = ModelRegistry::default();
        registry.insert(ModelSelector::Pipn, Box::new(Panicking));
        let gate = PredictionGate::new(registry);
        for _ in 0..2 {
            let err = gate
                .predict(ModelSelector::Pipn, dataset(1, 1), 1)
                .await
                .unwrap_err();
            assert!(matches!(err, FlowError::InferenceFailed(_)));
        }
    }
}
