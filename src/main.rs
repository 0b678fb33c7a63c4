use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use poroflow::api::{router, AppState};
use poroflow::casegen::ProcessCaseGenerator;
use poroflow::common::config::AppCfg;
use poroflow::common::log;
use poroflow::data::repo_fs::load_catalog;
use poroflow::inference::runner::RunnerLoader;
use poroflow::inference::{ModelRegistry, PredictionGate};
use poroflow::session::FsSessionStore;
use poroflow::{Orchestrator, PipelineSettings};

#[derive(Parser, Debug)]
#[command(name = "poroflow")]
#[command(about = "Flow prediction service for porous objects")]
struct Cli {
    /// TCP address to bind the web server
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Directory containing frontend assets
    #[arg(long, default_value = "static")]
    static_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = AppCfg::load();
    log::init(&cfg.log_filter);

    if let Err(err) = cfg.validate() {
        error!(code = err.code() as u32, "invalid configuration: {err}");
        return ExitCode::FAILURE;
    }

    let catalog = match load_catalog(&cfg.assets_root) {
        Ok(catalog) => Arc::new(catalog),
        Err(err) => {
            error!(code = err.code() as u32, "family metadata: {err}");
            return ExitCode::FAILURE;
        }
    };

    let loader = RunnerLoader::new(cfg.runner_cmd.clone());
    let assets_root = cfg.assets_root.clone();
    let registry =
        match tokio::task::spawn_blocking(move || ModelRegistry::load(&assets_root, &loader)).await
        {
            Ok(registry) => registry,
            Err(err) => {
                error!("model loading aborted: {err}");
                return ExitCode::FAILURE;
            }
        };
    let gate = Arc::new(PredictionGate::new(registry));
    let loaded: Vec<&str> = gate.loaded().iter().map(|sel| sel.as_str()).collect();
    info!(models = ?loaded, "prediction gate ready");

    let orchestrator = Orchestrator::new(
        FsSessionStore::new(&cfg),
        Arc::new(ProcessCaseGenerator::new(&cfg)),
        catalog,
        gate,
        PipelineSettings::new(&cfg),
    );
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
    };

    info!("Serving static files from: {}", cli.static_dir.display());
    let app = router(state, &cli.static_dir);

    let listener = match TcpListener::bind(cli.bind).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind {}: {err}", cli.bind);
            return ExitCode::FAILURE;
        }
    };
    info!("poroflow listening on http://{}", cli.bind);

    if let Err(err) = axum::serve(listener, app).await {
        error!("Server error: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
