//! Surrogate models hosted in persistent runner processes.
//!
//! One runner per loaded selector, started at startup with
//! `<runner> --checkpoint <ckpt> --model <selector>`. The runner prints
//! `{"ready":true}` once loaded, then answers one JSON line per request line.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::common::error::{FlowError, FlowResult};
use crate::data::domain::{Dataset, FieldMap};

use super::domain::{ModelLoader, ModelSelector, PredictionResult, SurrogateModel};

#[derive(Serialize)]
struct RunnerRequest<'a> {
    id: u64,
    seed: u64,
    sample: &'a FieldMap,
    internal: &'a FieldMap,
}

#[derive(Deserialize)]
struct RunnerReply {
    id: u64,
    #[serde(default)]
    predicted: Option<FieldMap>,
    #[serde(default)]
    residuals: Option<FieldMap>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct Ready {
    ready: bool,
}

pub struct RunnerModel {
    selector: ModelSelector,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl RunnerModel {
    fn read_line(&mut self) -> FlowResult<String> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .map_err(|err| FlowError::inference(format!("read from runner: {err}")))?;
        if read == 0 {
            return Err(FlowError::inference(format!(
                "runner for {} exited",
                self.selector.as_str()
            )));
        }
        Ok(line)
    }
}

impl SurrogateModel for RunnerModel {
    fn predict(&mut self, dataset: &Dataset, seed: u64) -> FlowResult<PredictionResult> {
        self.next_id += 1;
        let id = self.next_id;
        let request = RunnerRequest {
            id,
            seed,
            sample: &dataset.sample,
            internal: &dataset.internal,
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|err| FlowError::inference(format!("encode request: {err}")))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(|err| FlowError::inference(format!("write to runner: {err}")))?;

        loop {
            let raw = self.read_line()?;
            if raw.trim().is_empty() {
                continue;
            }
            let reply: RunnerReply = serde_json::from_str(&raw)
                .map_err(|err| FlowError::inference(format!("malformed runner reply: {err}")))?;
            if reply.id != id {
                tracing::debug!(model = self.selector.as_str(), stale = reply.id, id, "stale reply");
                continue;
            }
            if let Some(error) = reply.error {
                return Err(FlowError::inference(error));
            }
            return match (reply.predicted, reply.residuals) {
                (Some(predicted), Some(residuals)) => Ok(PredictionResult {
                    predicted,
                    residuals,
                }),
                _ => Err(FlowError::inference("runner reply lacks predicted or residuals")),
            };
        }
    }
}

impl Drop for RunnerModel {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Starts a runner process per checkpoint.
pub struct RunnerLoader {
    cmd: Vec<String>,
}

impl RunnerLoader {
    pub fn new(cmd: Vec<String>) -> Self {
        Self { cmd }
    }
}

impl ModelLoader for RunnerLoader {
    fn load(
        &self,
        selector: ModelSelector,
        checkpoint: &Path,
    ) -> FlowResult<Box<dyn SurrogateModel>> {
        let (program, args) = self
            .cmd
            .split_first()
            .ok_or_else(|| FlowError::internal("runner command is empty"))?;
        let mut child = Command::new(program)
            .args(args)
            .arg("--checkpoint")
            .arg(checkpoint)
            .arg("--model")
            .arg(selector.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| FlowError::inference(format!("spawn runner {program}: {err}")))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(FlowError::internal("runner pipes unavailable"));
        };
        let mut model = RunnerModel {
            selector,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 0,
        };

        // Dropping `model` on a failed handshake kills the runner.
        let line = model.read_line()?;
        match serde_json::from_str::<Ready>(&line) {
            Ok(Ready { ready: true }) => Ok(Box::new(model)),
            _ => Err(FlowError::inference(format!(
                "runner for {} sent no ready line: {}",
                selector.as_str(),
                line.trim()
            ))),
        }
    }
}
