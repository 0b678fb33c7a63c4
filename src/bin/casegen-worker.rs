//! Single-use generation worker.
//!
//! Reads one `GenerationJob` from stdin, builds the case, and prints the
//! `GenerationOutput` as the last stdout line. Logs go to stderr.

use std::io::{self, Read, Write};
use std::process::ExitCode;

use poroflow::casegen::domain::GenerationJob;
use poroflow::casegen::job::run_job;
use poroflow::common::error::{FlowError, FlowResult};
use poroflow::common::log;
use poroflow::common::time::Stopwatch;

fn run() -> FlowResult<String> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|err| FlowError::io("read job", err))?;
    let job: GenerationJob = serde_json::from_str(&raw)
        .map_err(|err| FlowError::generation(format!("malformed job: {err}")))?;
    let output = run_job(&job)?;
    serde_json::to_string(&output)
        .map_err(|err| FlowError::internal(format!("encode result: {err}")))
}

fn main() -> ExitCode {
    log::init_stderr("info");
    let watch = Stopwatch::start();
    match run() {
        Ok(line) => {
            let mut stdout = io::stdout().lock();
            if writeln!(stdout, "{line}").and_then(|_| stdout.flush()).is_err() {
                return ExitCode::FAILURE;
            }
            log::stage("casegen", "-", "job_done", 0, watch.elapsed_ms());
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::failure(
                "casegen",
                "-",
                "job_failed",
                err.code() as u32,
                watch.elapsed_ms(),
                &err.to_string(),
            );
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
