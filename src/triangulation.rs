use std::collections::{HashMap, HashSet};

use log::debug;

use crate::{
    datatypes::Vertex,
    error::{BracketError, Result},
    geometry::{coordinate_key, orientation},
};

/// Scale of the enclosing super triangle relative to the point cloud extent
const SUPER_TRIANGLE_SCALE: f64 = 100.0;

/// Relative tolerance of the in-circumcircle test
const CIRCUMCIRCLE_TOLERANCE: f64 = 1e-12;

/// Triangles whose doubled area falls below this fraction of the squared
/// extent are dropped as hull slivers
const DEGENERATE_AREA_TOLERANCE: f64 = 1e-12;

struct Cell {
    vertices: [usize; 3],
    center: Vertex,
    radius_sq: f64,
}

impl Cell {
    /// Builds a cell and caches its circumcircle. Collinear cells get an
    /// infinite circumcircle so that the next insertion removes them.
    fn new(vertices: [usize; 3], points: &[Vertex]) -> Cell {
        let a = points[vertices[0]];
        let b = points[vertices[1]];
        let c = points[vertices[2]];

        let bx = b.x - a.x;
        let by = b.y - a.y;
        let cx = c.x - a.x;
        let cy = c.y - a.y;

        let d = 2.0 * (bx * cy - by * cx);
        if d == 0.0 {
            return Cell {
                vertices,
                center: a,
                radius_sq: f64::INFINITY,
            };
        }

        let b_sq = bx * bx + by * by;
        let c_sq = cx * cx + cy * cy;
        let ux = (cy * b_sq - by * c_sq) / d;
        let uy = (bx * c_sq - cx * b_sq) / d;

        Cell {
            vertices,
            center: Vertex::new(a.x + ux, a.y + uy),
            radius_sq: ux * ux + uy * uy,
        }
    }

    fn circumcircle_contains(&self, point: &Vertex) -> bool {
        if self.radius_sq.is_infinite() {
            return true;
        }
        let dx = point.x - self.center.x;
        let dy = point.y - self.center.y;
        dx * dx + dy * dy < self.radius_sq * (1.0 - CIRCUMCIRCLE_TOLERANCE)
    }

    fn edges(&self) -> [(usize, usize); 3] {
        let [a, b, c] = self.vertices;
        [(a, b), (b, c), (c, a)]
    }
}

/// Checks that a point set can be triangulated
///
/// # Returns
/// The largest extent of the bounding box
fn validate_points(points: &[Vertex]) -> Result<f64> {
    if points.len() < 3 {
        return Err(BracketError::InvalidGeometry(format!(
            "at least 3 points are needed to triangulate, got {}",
            points.len()
        )));
    }

    if let Some(bad) = points.iter().find(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(BracketError::InvalidGeometry(format!(
            "non-finite coordinate in {bad:?}"
        )));
    }

    let mut seen = HashSet::with_capacity(points.len());
    for point in points {
        if !seen.insert(coordinate_key(point)) {
            return Err(BracketError::InvalidGeometry(format!(
                "duplicate point {point:?} passed to the triangulator"
            )));
        }
    }

    let (min_x, min_y, max_x, max_y) = bounding_box(points);
    let extent = f64::max(max_x - min_x, max_y - min_y);

    // all points collinear when every point is on the line through the first
    // point and the point farthest from it
    let first = points[0];
    let far = points
        .iter()
        .copied()
        .max_by(|a, b| first.distance(a).total_cmp(&first.distance(b)))
        .unwrap_or(first);
    let spread = points
        .iter()
        .map(|p| orientation(&first, &far, p).abs())
        .fold(0.0, f64::max);

    if spread <= DEGENERATE_AREA_TOLERANCE * extent * extent {
        return Err(BracketError::InvalidGeometry(
            "all points are collinear".to_owned(),
        ));
    }

    Ok(extent)
}

fn bounding_box(points: &[Vertex]) -> (f64, f64, f64, f64) {
    points.iter().fold(
        (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
        |(min_x, min_y, max_x, max_y), p| {
            (min_x.min(p.x), min_y.min(p.y), max_x.max(p.x), max_y.max(p.y))
        },
    )
}

/// Computes a Delaunay triangulation with the Bowyer-Watson algorithm
///
/// # Arguments
/// * `points` - Distinct points to triangulate
///
/// # Returns
/// Counter-clockwise index triples into `points`. The output only depends on
/// the input order, so identical input always yields identical triangles.
pub fn delaunay(points: &[Vertex]) -> Result<Vec<[usize; 3]>> {
    let extent = validate_points(points)?;
    let (min_x, min_y, max_x, max_y) = bounding_box(points);
    let mid_x = 0.5 * (min_x + max_x);
    let mid_y = 0.5 * (min_y + max_y);
    let span = SUPER_TRIANGLE_SCALE * extent;

    let n = points.len();
    let mut vertices: Vec<Vertex> = points.to_vec();
    vertices.push(Vertex::new(mid_x - span, mid_y - span));
    vertices.push(Vertex::new(mid_x + span, mid_y - span));
    vertices.push(Vertex::new(mid_x, mid_y + span));

    let mut cells: Vec<Cell> = vec![Cell::new([n, n + 1, n + 2], &vertices)];

    for p in 0..n {
        let point = vertices[p];

        let (bad, good): (Vec<Cell>, Vec<Cell>) = cells
            .into_iter()
            .partition(|cell| cell.circumcircle_contains(&point));
        cells = good;

        // the cavity boundary is every bad edge whose twin is not also bad
        let bad_edges: HashSet<(usize, usize)> =
            bad.iter().flat_map(|cell| cell.edges()).collect();

        for cell in &bad {
            for (a, b) in cell.edges() {
                if !bad_edges.contains(&(b, a)) {
                    cells.push(Cell::new([a, b, p], &vertices));
                }
            }
        }
    }

    let min_doubled_area = DEGENERATE_AREA_TOLERANCE * extent * extent;
    let mut dropped = 0usize;
    let triangles: Vec<[usize; 3]> = cells
        .into_iter()
        .filter(|cell| cell.vertices.iter().all(|&v| v < n))
        .filter_map(|cell| {
            let [a, b, c] = cell.vertices;
            let area = orientation(&vertices[a], &vertices[b], &vertices[c]);
            if area.abs() <= min_doubled_area {
                dropped += 1;
                return None;
            }
            if area < 0.0 {
                Some([a, c, b])
            } else {
                Some([a, b, c])
            }
        })
        .collect();

    if dropped > 0 {
        debug!("dropped {dropped} degenerate hull triangles");
    }

    if triangles.is_empty() {
        return Err(BracketError::InvalidGeometry(
            "triangulation produced no triangles".to_owned(),
        ));
    }

    Ok(triangles)
}

/// Collects the undirected edges of a triangulation, each edge once with its
/// smaller index first, in ascending order
pub fn edge_set(triangles: &[[usize; 3]]) -> Vec<(usize, usize)> {
    let mut edges: Vec<(usize, usize)> = triangles
        .iter()
        .flat_map(|&[a, b, c]| [(a, b), (b, c), (a, c)])
        .map(|(a, b)| (a.min(b), a.max(b)))
        .collect();
    edges.sort_unstable();
    edges.dedup();
    edges
}

/// Maps each point to a canonical representative, merging coincident points.
///
/// # Returns
/// The distinct points in first-seen order, and for every input point the
/// index of its representative.
pub fn deduplicate(points: &[Vertex]) -> (Vec<Vertex>, Vec<usize>) {
    let mut unique: Vec<Vertex> = Vec::with_capacity(points.len());
    let mut lookup: HashMap<(i64, i64), usize> = HashMap::with_capacity(points.len());
    let mut mapping: Vec<usize> = Vec::with_capacity(points.len());

    for point in points {
        let index = *lookup.entry(coordinate_key(point)).or_insert_with(|| {
            unique.push(*point);
            unique.len() - 1
        });
        mapping.push(index);
    }

    (unique, mapping)
}
