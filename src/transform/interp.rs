//! Scattered-data interpolation onto a fixed set of target points.
//!
//! Sites are triangulated once (incremental Delaunay), every target is
//! located once, and each field is then evaluated with a cubic Bézier
//! triangle patch built from the vertex values and least-squares gradients.
//! Targets outside the triangulation evaluate to 0.

use std::collections::HashMap;

use crate::common::error::{FlowError, FlowResult};

/// Sites closer than this (after scaling into the unit box) are merged.
const MERGE_EPS: f64 = 1e-10;
/// Barycentric slack when deciding whether a target lies in a triangle.
const INSIDE_EPS: f64 = 1e-9;
/// Orientation slack when locating the triangle an inserted site falls in.
const ORIENT_EPS: f64 = 1e-12;
/// Half-size of the enclosing triangle, in unit-box coordinates.
const SUPER_SIZE: f64 = 20.0;

type Point = [f64; 2];

fn orient(a: Point, b: Point, c: Point) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Positive when `d` lies strictly inside the circumcircle of the CCW triangle `abc`.
fn in_circle(a: Point, b: Point, c: Point, d: Point) -> f64 {
    let (adx, ady) = (a[0] - d[0], a[1] - d[1]);
    let (bdx, bdy) = (b[0] - d[0], b[1] - d[1]);
    let (cdx, cdy) = (c[0] - d[0], c[1] - d[1]);
    let ad = adx * adx + ady * ady;
    let bd = bdx * bdx + bdy * bdy;
    let cd = cdx * cdx + cdy * cdy;
    ad * (bdx * cdy - cdx * bdy) - bd * (adx * cdy - cdx * ady) + cd * (adx * bdy - bdx * ady)
}

/// Delaunay triangulation of a point set, triangles in CCW order.
#[derive(Debug)]
pub struct Triangulation {
    points: Vec<Point>,
    triangles: Vec<[usize; 3]>,
}

struct Builder {
    points: Vec<Point>,
    triangles: Vec<Option<[usize; 3]>>,
    edges: HashMap<(usize, usize), usize>,
}

impl Builder {
    fn add(&mut self, tri: [usize; 3]) {
        let idx = self.triangles.len();
        for k in 0..3 {
            self.edges.insert((tri[k], tri[(k + 1) % 3]), idx);
        }
        self.triangles.push(Some(tri));
    }

    fn remove(&mut self, idx: usize) {
        if let Some(tri) = self.triangles[idx].take() {
            for k in 0..3 {
                self.edges.remove(&(tri[k], tri[(k + 1) % 3]));
            }
        }
    }

    fn corners(&self, tri: [usize; 3]) -> [Point; 3] {
        [self.points[tri[0]], self.points[tri[1]], self.points[tri[2]]]
    }

    fn containing(&self, p: Point) -> Option<usize> {
        self.triangles.iter().enumerate().find_map(|(idx, tri)| {
            let [a, b, c] = self.corners((*tri)?);
            let inside = orient(a, b, p) >= -ORIENT_EPS
                && orient(b, c, p) >= -ORIENT_EPS
                && orient(c, a, p) >= -ORIENT_EPS;
            inside.then_some(idx)
        })
    }

    fn neighbour(&self, a: usize, b: usize) -> Option<usize> {
        self.edges.get(&(b, a)).copied()
    }

    /// Bowyer–Watson insertion with a cavity grown from the containing triangle.
    fn insert(&mut self, k: usize) {
        let p = self.points[k];
        let Some(start) = self.containing(p) else {
            return;
        };

        let mut bad = vec![start];
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            let Some(tri) = self.triangles[idx] else {
                continue;
            };
            for e in 0..3 {
                let Some(next) = self.neighbour(tri[e], tri[(e + 1) % 3]) else {
                    continue;
                };
                if bad.contains(&next) {
                    continue;
                }
                if let Some(other) = self.triangles[next] {
                    let [a, b, c] = self.corners(other);
                    if in_circle(a, b, c, p) > 0.0 {
                        bad.push(next);
                        stack.push(next);
                    }
                }
            }
        }

        // Grow the cavity until every boundary edge sees `p` on its left.
        let boundary = loop {
            let mut boundary = Vec::new();
            let mut grow = None;
            for &idx in &bad {
                let Some(tri) = self.triangles[idx] else {
                    continue;
                };
                for e in 0..3 {
                    let (a, b) = (tri[e], tri[(e + 1) % 3]);
                    let across = self.neighbour(a, b);
                    if across.is_some_and(|n| bad.contains(&n)) {
                        continue;
                    }
                    if orient(self.points[a], self.points[b], p) <= 0.0 {
                        if let Some(n) = across {
                            grow = Some(n);
                        }
                    }
                    boundary.push((a, b));
                }
            }
            match grow {
                Some(n) => bad.push(n),
                None => break boundary,
            }
        };

        for idx in bad {
            self.remove(idx);
        }
        for (a, b) in boundary {
            if orient(self.points[a], self.points[b], p) > 0.0 {
                self.add([a, b, k]);
            }
        }
    }
}

impl Triangulation {
    /// Triangulate `points`, which must be distinct.
    pub fn new(points: Vec<Point>) -> Self {
        let n = points.len();
        let mut builder = Builder {
            points,
            triangles: Vec::new(),
            edges: HashMap::new(),
        };
        builder.points.extend([
            [-SUPER_SIZE, -SUPER_SIZE],
            [SUPER_SIZE, -SUPER_SIZE],
            [0.0, SUPER_SIZE],
        ]);
        builder.add([n, n + 1, n + 2]);
        for k in 0..n {
            builder.insert(k);
        }

        let triangles = builder
            .triangles
            .into_iter()
            .flatten()
            .filter(|tri| tri.iter().all(|&v| v < n))
            .collect();
        builder.points.truncate(n);
        Self {
            points: builder.points,
            triangles,
        }
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Triangle containing `p` and its barycentric coordinates.
    pub fn locate(&self, p: Point) -> Option<(usize, [f64; 3])> {
        self.triangles.iter().enumerate().find_map(|(idx, tri)| {
            let [a, b, c] = [self.points[tri[0]], self.points[tri[1]], self.points[tri[2]]];
            let area = orient(a, b, c);
            if area <= 0.0 {
                return None;
            }
            let bary = [
                orient(p, b, c) / area,
                orient(a, p, c) / area,
                orient(a, b, p) / area,
            ];
            bary.iter()
                .all(|&l| l >= -INSIDE_EPS)
                .then_some((idx, bary))
        })
    }

    /// Vertices sharing an edge with each vertex.
    pub fn neighbours(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.points.len()];
        for tri in &self.triangles {
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                if !out[a].contains(&b) {
                    out[a].push(b);
                }
                if !out[b].contains(&a) {
                    out[b].push(a);
                }
            }
        }
        out
    }
}

/// Interpolates fields given at `sites` onto a fixed list of targets.
#[derive(Debug)]
pub struct Interpolator {
    /// Original site index backing each triangulation vertex.
    sources: Vec<usize>,
    site_count: usize,
    mesh: Triangulation,
    neighbours: Vec<Vec<usize>>,
    locations: Vec<Option<(usize, [f64; 3])>>,
}

impl Interpolator {
    pub fn new(sites: &[Point], targets: &[Point]) -> FlowResult<Self> {
        if sites
            .iter()
            .chain(targets)
            .any(|p| !(p[0].is_finite() && p[1].is_finite()))
        {
            return Err(FlowError::transform("interpolation coordinates must be finite"));
        }
        let frame = UnitFrame::fit(sites);
        let (sources, vertices) = merge_sites(sites, &frame);
        let mesh = Triangulation::new(vertices);
        let neighbours = mesh.neighbours();
        let locations = targets.iter().map(|&t| mesh.locate(frame.apply(t))).collect();
        Ok(Self {
            sources,
            site_count: sites.len(),
            mesh,
            neighbours,
            locations,
        })
    }

    pub fn target_count(&self) -> usize {
        self.locations.len()
    }

    /// Evaluate one field at every target.
    pub fn interpolate(&self, values: &[f64]) -> FlowResult<Vec<f64>> {
        if values.len() != self.site_count {
            return Err(FlowError::transform(format!(
                "field has {} values for {} sites",
                values.len(),
                self.site_count
            )));
        }
        let f: Vec<f64> = self.sources.iter().map(|&src| values[src]).collect();
        let gradients = self.gradients(&f);
        Ok(self
            .locations
            .iter()
            .map(|loc| match loc {
                Some((tri, bary)) => self.patch(self.mesh.triangles()[*tri], &f, &gradients, *bary),
                None => 0.0,
            })
            .collect())
    }

    /// Weighted least-squares gradient at every vertex, weights `1/|d|²`.
    fn gradients(&self, f: &[f64]) -> Vec<[f64; 2]> {
        let points = &self.mesh.points;
        (0..points.len())
            .map(|i| {
                let (mut sxx, mut sxy, mut syy, mut bx, mut by) = (0.0, 0.0, 0.0, 0.0, 0.0);
                for &j in &self.neighbours[i] {
                    let dx = points[j][0] - points[i][0];
                    let dy = points[j][1] - points[i][1];
                    let d2 = dx * dx + dy * dy;
                    if d2 == 0.0 {
                        continue;
                    }
                    let w = 1.0 / d2;
                    let df = f[j] - f[i];
                    sxx += w * dx * dx;
                    sxy += w * dx * dy;
                    syy += w * dy * dy;
                    bx += w * dx * df;
                    by += w * dy * df;
                }
                let det = sxx * syy - sxy * sxy;
                if det.abs() < 1e-12 * (sxx * syy).abs().max(f64::MIN_POSITIVE) {
                    [0.0, 0.0]
                } else {
                    [(syy * bx - sxy * by) / det, (sxx * by - sxy * bx) / det]
                }
            })
            .collect()
    }

    fn patch(&self, tri: [usize; 3], f: &[f64], g: &[[f64; 2]], bary: [f64; 3]) -> f64 {
        let p = [
            self.mesh.points[tri[0]],
            self.mesh.points[tri[1]],
            self.mesh.points[tri[2]],
        ];
        let v = [f[tri[0]], f[tri[1]], f[tri[2]]];
        let grad = [g[tri[0]], g[tri[1]], g[tri[2]]];
        // Edge control point next to vertex `i` on the edge towards `j`.
        let edge = |i: usize, j: usize| {
            let d = [p[j][0] - p[i][0], p[j][1] - p[i][1]];
            v[i] + (grad[i][0] * d[0] + grad[i][1] * d[1]) / 3.0
        };
        let (b210, b201) = (edge(0, 1), edge(0, 2));
        let (b120, b021) = (edge(1, 0), edge(1, 2));
        let (b102, b012) = (edge(2, 0), edge(2, 1));
        let e = (b210 + b201 + b120 + b021 + b102 + b012) / 6.0;
        let mean = (v[0] + v[1] + v[2]) / 3.0;
        let b111 = e + (e - mean) / 2.0;

        let [u, w1, w2] = bary;
        v[0] * u.powi(3)
            + v[1] * w1.powi(3)
            + v[2] * w2.powi(3)
            + 3.0 * (b210 * u * u * w1 + b201 * u * u * w2 + b120 * u * w1 * w1)
            + 3.0 * (b021 * w1 * w1 * w2 + b102 * u * w2 * w2 + b012 * w1 * w2 * w2)
            + 6.0 * b111 * u * w1 * w2
    }
}

/// Isotropic map of the sites' bounding box into the unit square.
struct UnitFrame {
    origin: Point,
    scale: f64,
}

impl UnitFrame {
    fn fit(sites: &[Point]) -> Self {
        let (min, max) = bounds(sites).unwrap_or(([0.0, 0.0], [1.0, 1.0]));
        let span = (max[0] - min[0]).max(max[1] - min[1]);
        Self {
            origin: min,
            scale: if span > 0.0 { span } else { 1.0 },
        }
    }

    fn apply(&self, p: Point) -> Point {
        [
            (p[0] - self.origin[0]) / self.scale,
            (p[1] - self.origin[1]) / self.scale,
        ]
    }
}

/// Drop coincident sites, keeping the first occurrence of each location.
fn merge_sites(sites: &[Point], frame: &UnitFrame) -> (Vec<usize>, Vec<Point>) {
    let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    let mut sources = Vec::with_capacity(sites.len());
    let mut vertices: Vec<Point> = Vec::with_capacity(sites.len());
    for (idx, &site) in sites.iter().enumerate() {
        let p = frame.apply(site);
        let cell = ((p[0] / MERGE_EPS).floor() as i64, (p[1] / MERGE_EPS).floor() as i64);
        let duplicate = (-1..=1).any(|dx| {
            (-1..=1).any(|dy| {
                cells.get(&(cell.0 + dx, cell.1 + dy)).is_some_and(|found| {
                    found.iter().any(|&v| {
                        let q = vertices[v];
                        (q[0] - p[0]).abs() <= MERGE_EPS && (q[1] - p[1]).abs() <= MERGE_EPS
                    })
                })
            })
        });
        if duplicate {
            continue;
        }
        cells.entry(cell).or_default().push(vertices.len());
        sources.push(idx);
        vertices.push(p);
    }
    (sources, vertices)
}

pub fn bounds(points: &[Point]) -> Option<(Point, Point)> {
    let first = *points.first()?;
    Some(points.iter().fold((first, first), |(lo, hi), p| {
        (
            [lo[0].min(p[0]), lo[1].min(p[1])],
            [hi[0].max(p[0]), hi[1].max(p[1])],
        )
    }))
}

/// `n` evenly spaced values from `lo` to `hi` inclusive.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => (0..n)
            .map(|k| lo + (hi - lo) * k as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// `res × res` grid over the bounding box of `points`, row-major with x fastest.
pub fn regular_grid(points: &[Point], res: usize) -> FlowResult<Vec<Point>> {
    let (min, max) =
        bounds(points).ok_or_else(|| FlowError::transform("cannot grid an empty point set"))?;
    let xs = linspace(min[0], max[0], res);
    let ys = linspace(min[1], max[1], res);
    Ok(ys
        .iter()
        .flat_map(|&y| xs.iter().map(move |&x| [x, y]))
        .collect())
}
