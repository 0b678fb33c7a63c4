//! Pool of single-use generation worker processes.
//!
//! Every job gets a fresh process, so the exporter's process-wide state never
//! outlives one case. At most `slots` workers run at once. Each worker leads
//! its own process group, and a dropped or failed job kills the whole group,
//! including the generator and solver processes the worker started.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::common::config::AppCfg;
use crate::common::error::{FlowError, FlowResult};

use super::domain::{CaseGenerator, CaseRequest, GenerationJob, GenerationOutput};

const STDERR_TAIL: usize = 2000;

pub struct ProcessCaseGenerator {
    worker_cmd: Vec<String>,
    generator_cmd: Vec<String>,
    solver_cmd: PathBuf,
    n_procs: usize,
    slots: Arc<Semaphore>,
}

impl ProcessCaseGenerator {
    pub fn new(cfg: &AppCfg) -> Self {
        Self::with_commands(
            cfg.worker_cmd.clone(),
            cfg.generator_cmd.clone(),
            cfg.solver_cmd(),
            cfg.n_procs,
            cfg.workers,
        )
    }

    pub fn with_commands(
        worker_cmd: Vec<String>,
        generator_cmd: Vec<String>,
        solver_cmd: PathBuf,
        n_procs: usize,
        slots: usize,
    ) -> Self {
        Self {
            worker_cmd,
            generator_cmd,
            solver_cmd,
            n_procs,
            slots: Arc::new(Semaphore::new(slots.max(1))),
        }
    }

    /// Worker slots not currently in use.
    pub fn idle_slots(&self) -> usize {
        self.slots.available_permits()
    }

    async fn run_worker(&self, job: &GenerationJob) -> FlowResult<GenerationOutput> {
        let payload = serde_json::to_vec(job)
            .map_err(|err| FlowError::internal(format!("encode generation job: {err}")))?;
        let (program, args) = self
            .worker_cmd
            .split_first()
            .ok_or_else(|| FlowError::generation("worker command is empty"))?;

        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| FlowError::generation("worker pool is closed"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|err| FlowError::generation(format!("spawn worker {program}: {err}")))?;
        let mut group = ProcessGroup::new(child.id());
        tracing::debug!(session = %job.request.session, pid = child.id(), "worker spawned");

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|err| FlowError::generation(format!("send job to worker: {err}")))?;
            // Closing stdin marks the end of the job document.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| FlowError::generation(format!("wait for worker: {err}")))?;

        if !output.status.success() {
            return Err(FlowError::generation(format!(
                "worker exited with {}: {}",
                output.status,
                tail(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| FlowError::generation("worker printed no result"))?;
        let result: GenerationOutput = serde_json::from_str(line)
            .map_err(|err| FlowError::generation(format!("malformed worker result: {err}")))?;
        if !result.case_dir.is_dir() {
            return Err(FlowError::generation(format!(
                "worker reported missing case dir {}",
                result.case_dir.display()
            )));
        }
        group.release();
        Ok(result)
    }
}

/// Kills a worker's process group when dropped, unless released.
///
/// `kill_on_drop` only reaches the worker itself; the generator and solver it
/// runs share its group and would otherwise keep writing into the area.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// The job finished cleanly; leave the group alone.
    fn release(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        let status = std::process::Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{pgid}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {
                tracing::debug!(pgid, "worker process group killed")
            }
            // Non-zero means the group had already exited.
            Ok(_) => {}
            Err(err) => tracing::warn!(pgid, error = %err, "could not kill worker process group"),
        }
    }
}

#[async_trait]
impl CaseGenerator for ProcessCaseGenerator {
    async fn generate(&self, request: CaseRequest) -> FlowResult<GenerationOutput> {
        let job = GenerationJob {
            request,
            generator_cmd: self.generator_cmd.clone(),
            solver_cmd: self.solver_cmd.clone(),
            n_procs: self.n_procs,
        };
        self.run_worker(&job).await
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
