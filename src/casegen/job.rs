//! Body of a generation worker process.
//!
//! Runs once per process: export the outline, merge the overrides, then hand
//! the assets to the external case generator and wait for it.

use std::fs;
use std::io;
use std::process::{Command, Stdio};

use crate::common::error::{FlowError, FlowResult};
use crate::session::domain::DATA_CONFIG_FILE;

use super::domain::{GenerationJob, GenerationOutput};
use super::export;

pub fn run_job(job: &GenerationJob) -> FlowResult<GenerationOutput> {
    let request = &job.request;

    let vertices = export::outline(&request.geometry)?;
    fs::create_dir_all(&request.mesh_dir)
        .map_err(|err| FlowError::generation(format!("create mesh dir: {err}")))?;
    export::write_extruded_obj(&vertices, &request.mesh_dir.join(export::MESH_FILE))?;
    tracing::info!(
        session = %request.session,
        vertices = vertices.len(),
        "outline exported"
    );

    if let Some(overrides) = &request.overrides {
        export::apply_overrides_file(&request.assets_dir.join(DATA_CONFIG_FILE), overrides)?;
        tracing::info!(session = %request.session, f = overrides.f, "config overrides applied");
    }

    fs::create_dir_all(&request.data_dir)
        .map_err(|err| FlowError::generation(format!("create data dir: {err}")))?;

    let (program, args) = job
        .generator_cmd
        .split_first()
        .ok_or_else(|| FlowError::generation("generator command is empty"))?;
    // stdout carries the worker's answer, so the generator's chatter goes to stderr.
    let status = Command::new(program)
        .args(args)
        .arg("--assets")
        .arg(&request.assets_dir)
        .arg("--output")
        .arg(&request.data_dir)
        .arg("--solver")
        .arg(&job.solver_cmd)
        .arg("--procs")
        .arg(job.n_procs.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::from(io::stderr()))
        .status()
        .map_err(|err| FlowError::generation(format!("spawn generator {program}: {err}")))?;

    if !status.success() {
        return Err(FlowError::generation(format!("generator exited with {status}")));
    }
    if !request.data_dir.is_dir() {
        return Err(FlowError::generation("generator left no data directory"));
    }

    Ok(GenerationOutput {
        case_dir: request.data_dir.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casegen::domain::{BoundaryGeometry, CaseOverrides, CaseRequest};
    use std::path::Path;

    fn job(root: &Path, generator_cmd: Vec<String>, overrides: Option<CaseOverrides>) -> GenerationJob {
        let assets_dir = root.join("assets");
        fs::create_dir_all(&assets_dir).unwrap();
        fs::write(
            assets_dir.join(DATA_CONFIG_FILE),
            r#"{"cfd params": {"coeffs": [{"d": [0,0,0], "f": [0,0,0]}], "inlet": [0], "angle": [0,0,0]}}"#,
        )
        .unwrap();
        GenerationJob {
            request: CaseRequest {
                session: "a1".into(),
                mesh_dir: assets_dir.join("meshes/split"),
                assets_dir,
                data_dir: root.join("data"),
                geometry: BoundaryGeometry {
                    x: vec![0.0, 1.0, 1.0, 0.0],
                    y: vec![0.0, 0.0, 1.0, 1.0],
                },
                overrides,
            },
            generator_cmd,
            solver_cmd: "/opt/openfoam/etc/openfoam".into(),
            n_procs: 2,
        }
    }

    #[test]
    fn successful_generator_yields_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let overrides = CaseOverrides {
            d: 1.0,
            f: 2.0,
            inlet_u: 0.3,
            inlet_angle: 0.0,
        };
        let job = job(tmp.path(), vec!["true".into()], Some(overrides));
        let out = run_job(&job).unwrap();
        assert_eq!(out.case_dir, tmp.path().join("data"));
        assert!(job.request.mesh_dir.join(export::MESH_FILE).is_file());
        let config = fs::read_to_string(job.request.assets_dir.join(DATA_CONFIG_FILE)).unwrap();
        assert!(config.contains("0.3"));
    }

    #[test]
    fn failing_generator_is_generation_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let job = job(tmp.path(), vec!["false".into()], None);
        assert!(matches!(run_job(&job), Err(FlowError::GenerationFailed(_))));
    }

    #[test]
    fn malformed_outline_stops_before_generator() {
        let tmp = tempfile::tempdir().unwrap();
        let mut job = job(tmp.path(), vec!["true".into()], None);
        job.request.geometry = BoundaryGeometry {
            x: vec![0.0, 1.0, 0.0, 1.0],
            y: vec![0.0, 1.0, 1.0, 0.0],
        };
        assert!(matches!(run_job(&job), Err(FlowError::GenerationFailed(_))));
        assert!(!job.request.data_dir.exists());
    }
}
