//! Runtime configuration loaded from the process environment.
//!
//! Values are fixed at process start; nothing re-reads the environment once
//! the service is running.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use super::error::{FlowError, FlowResult};

/// Snapshot of configuration values consumed by the core.
#[derive(Clone, Debug)]
pub struct AppCfg {
    pub sessions_root: PathBuf,
    pub assets_root: PathBuf,
    pub openfoam_dir: PathBuf,
    /// Processes handed to the solver for a single case.
    pub n_procs: usize,
    /// Generation worker processes allowed to run at once.
    pub workers: usize,
    pub worker_cmd: Vec<String>,
    pub generator_cmd: Vec<String>,
    pub runner_cmd: Vec<String>,
    pub generation_timeout: Duration,
    pub inference_timeout: Duration,
    pub log_filter: String,
}

impl AppCfg {
    /// Create a configuration snapshot from the process environment.
    pub fn load() -> Self {
        fn env_or(key: &str, default: &str) -> String {
            env::var(key).unwrap_or_else(|_| default.to_string())
        }

        fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
            env::var(key)
                .ok()
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(default)
        }

        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let worker_cmd = match env::var("POROFLOW_WORKER_CMD") {
            Ok(raw) => split_command(&raw),
            Err(_) => vec![default_worker_binary().to_string_lossy().into_owned()],
        };

        Self {
            sessions_root: PathBuf::from(env_or("POROFLOW_SESSIONS_DIR", "sessions")),
            assets_root: PathBuf::from(env_or("POROFLOW_ASSETS_DIR", "assets")),
            openfoam_dir: PathBuf::from(env_or("POROFLOW_OPENFOAM_DIR", "/opt/openfoam")),
            n_procs: env_num("POROFLOW_N_PROCS", 1),
            workers: env_num("POROFLOW_WORKERS", default_workers),
            worker_cmd,
            generator_cmd: split_command(&env_or("POROFLOW_GENERATOR_CMD", "porous-casegen")),
            runner_cmd: split_command(&env_or("POROFLOW_RUNNER_CMD", "porous-runner")),
            generation_timeout: Duration::from_secs(env_num(
                "POROFLOW_GENERATION_TIMEOUT_SECS",
                600,
            )),
            inference_timeout: Duration::from_secs(env_num("POROFLOW_INFERENCE_TIMEOUT_SECS", 120)),
            log_filter: env_or("POROFLOW_LOG", "info"),
        }
    }

    /// Reject values the service cannot start with.
    pub fn validate(&self) -> FlowResult<()> {
        if self.n_procs == 0 {
            return Err(FlowError::internal("POROFLOW_N_PROCS must be at least 1"));
        }
        if self.workers == 0 {
            return Err(FlowError::internal("POROFLOW_WORKERS must be at least 1"));
        }
        if self.worker_cmd.is_empty() {
            return Err(FlowError::internal("POROFLOW_WORKER_CMD is empty"));
        }
        if self.generator_cmd.is_empty() {
            return Err(FlowError::internal("POROFLOW_GENERATOR_CMD is empty"));
        }
        if self.runner_cmd.is_empty() {
            return Err(FlowError::internal("POROFLOW_RUNNER_CMD is empty"));
        }
        if self.generation_timeout.is_zero() || self.inference_timeout.is_zero() {
            return Err(FlowError::internal("stage timeouts must be non-zero"));
        }
        Ok(())
    }

    /// Wrapper script that runs solver commands inside the OpenFOAM environment.
    pub fn solver_cmd(&self) -> PathBuf {
        self.openfoam_dir.join("etc").join("openfoam")
    }
}

/// Split a command line on whitespace. Quoting is not supported.
pub fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// `casegen-worker` next to the running executable, or on `PATH`.
fn default_worker_binary() -> PathBuf {
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("casegen-worker");
            if candidate.exists() {
                return candidate;
            }
        }
    }
    PathBuf::from("casegen-worker")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppCfg {
        AppCfg {
            sessions_root: PathBuf::from("sessions"),
            assets_root: PathBuf::from("assets"),
            openfoam_dir: PathBuf::from("/opt/openfoam"),
            n_procs: 2,
            workers: 4,
            worker_cmd: vec!["casegen-worker".into()],
            generator_cmd: vec!["porous-casegen".into()],
            runner_cmd: vec!["porous-runner".into()],
            generation_timeout: Duration::from_secs(600),
            inference_timeout: Duration::from_secs(120),
            log_filter: "info".into(),
        }
    }

    #[test]
    fn solver_cmd_points_into_etc() {
        assert_eq!(
            sample().solver_cmd(),
            PathBuf::from("/opt/openfoam/etc/openfoam")
        );
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut cfg = sample();
        assert!(cfg.validate().is_ok());
        cfg.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn split_command_ignores_extra_whitespace() {
        assert_eq!(
            split_command("  python   runner.py --fast "),
            vec!["python", "runner.py", "--fast"]
        );
        assert!(split_command("   ").is_empty());
    }
}
