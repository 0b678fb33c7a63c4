//! Outline export: turns the 2D boundary into the extruded mesh and config the
//! case generator consumes.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::Value;

use crate::common::error::{FlowError, FlowResult};

use super::domain::{BoundaryGeometry, CaseOverrides};

pub const MESH_FILE: &str = "mesh.obj";
/// Cap heights of the extruded prism.
pub const TOP_Z: f64 = 0.05;
pub const BOTTOM_Z: f64 = -0.05;

/// Closed outline ready for export.
///
/// A trailing vertex equal to the first is dropped. Fails on fewer than three
/// distinct vertices, zero-length edges, or self-intersections.
pub fn outline(geometry: &BoundaryGeometry) -> FlowResult<Vec<[f64; 2]>> {
    geometry
        .validate()
        .map_err(|err| FlowError::generation(err.to_string()))?;
    let mut vertices = geometry.vertices();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    if vertices.len() < 3 {
        return Err(FlowError::generation(format!(
            "outline needs at least 3 vertices, got {}",
            vertices.len()
        )));
    }

    let n = vertices.len();
    for i in 0..n {
        if vertices[i] == vertices[(i + 1) % n] {
            return Err(FlowError::generation(format!("outline edge {i} has zero length")));
        }
    }
    for i in 0..n {
        for j in (i + 2)..n {
            // Edges i and j share a vertex when they wrap around.
            if i == 0 && j == n - 1 {
                continue;
            }
            let a = (vertices[i], vertices[(i + 1) % n]);
            let b = (vertices[j], vertices[(j + 1) % n]);
            if segments_intersect(a, b) {
                return Err(FlowError::generation(format!(
                    "outline edges {i} and {j} intersect"
                )));
            }
        }
    }
    Ok(vertices)
}

fn orientation(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn on_segment(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> bool {
    p[0] >= a[0].min(b[0])
        && p[0] <= a[0].max(b[0])
        && p[1] >= a[1].min(b[1])
        && p[1] <= a[1].max(b[1])
}

fn segments_intersect(a: ([f64; 2], [f64; 2]), b: ([f64; 2], [f64; 2])) -> bool {
    let (p1, p2) = a;
    let (q1, q2) = b;
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

/// Write the outline as a prism between `BOTTOM_Z` and `TOP_Z` in Wavefront OBJ.
pub fn write_extruded_obj(vertices: &[[f64; 2]], path: &Path) -> FlowResult<()> {
    let file = File::create(path)
        .map_err(|err| FlowError::generation(format!("create {}: {err}", path.display())))?;
    let mut out = BufWriter::new(file);
    write_obj(vertices, &mut out)
        .and_then(|_| out.flush())
        .map_err(|err| FlowError::generation(format!("write {}: {err}", path.display())))
}

fn write_obj(vertices: &[[f64; 2]], out: &mut impl Write) -> std::io::Result<()> {
    let n = vertices.len();
    writeln!(out, "o object")?;
    for [x, y] in vertices {
        writeln!(out, "v {x} {y} {TOP_Z}")?;
    }
    for [x, y] in vertices {
        writeln!(out, "v {x} {y} {BOTTOM_Z}")?;
    }

    let top: Vec<String> = (1..=n).map(|i| i.to_string()).collect();
    writeln!(out, "f {}", top.join(" "))?;
    let bottom: Vec<String> = (n + 1..=2 * n).rev().map(|i| i.to_string()).collect();
    writeln!(out, "f {}", bottom.join(" "))?;
    for i in 0..n {
        let j = (i + 1) % n;
        writeln!(out, "f {} {} {} {}", i + 1, n + i + 1, n + j + 1, j + 1)?;
    }
    Ok(())
}

/// Rewrite the case config at `path` with `overrides` merged in.
pub fn apply_overrides_file(path: &Path, overrides: &CaseOverrides) -> FlowResult<()> {
    let raw = fs::read_to_string(path)
        .map_err(|err| FlowError::generation(format!("read {}: {err}", path.display())))?;
    let mut config: Value = serde_json::from_str(&raw)
        .map_err(|err| FlowError::generation(format!("parse {}: {err}", path.display())))?;
    overrides.apply(&mut config)?;
    let rendered = serde_json::to_string(&config)
        .map_err(|err| FlowError::generation(format!("render config: {err}")))?;
    fs::write(path, rendered)
        .map_err(|err| FlowError::generation(format!("write {}: {err}", path.display())))
}
