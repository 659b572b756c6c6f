use std::cmp::Ordering;

use crate::datatypes::Vertex;

/// Coordinates closer than this collapse to the same node
pub const COORDINATE_QUANTUM: f64 = 1e-6;

/// Reference direction the clockwise sort measures angles from
const REFERENCE_VECTOR: Vertex = Vertex { x: 0.0, y: 1.0 };

/// Hashable key identifying a vertex by its (quantized) coordinates
pub fn coordinate_key(vertex: &Vertex) -> (i64, i64) {
    (
        (vertex.x / COORDINATE_QUANTUM).round() as i64,
        (vertex.y / COORDINATE_QUANTUM).round() as i64,
    )
}

/// Calculates the clockwise angle of a point from the positive y axis,
/// measured around `origin`, along with its distance from `origin`.
///
/// # Returns
/// A tuple of the angle in `[0, 2pi)` and the distance, in that order. A point
/// on the origin returns `(-pi, 0)` so that it sorts first.
pub fn clockwise_angle_and_distance(point: &Vertex, origin: &Vertex) -> (f64, f64) {
    let vx = point.x - origin.x;
    let vy = point.y - origin.y;
    let length = f64::hypot(vx, vy);

    if length == 0.0 {
        return (-std::f64::consts::PI, 0.0);
    }

    let nx = vx / length;
    let ny = vy / length;

    let dot = nx * REFERENCE_VECTOR.x + ny * REFERENCE_VECTOR.y;
    let diff = REFERENCE_VECTOR.y * nx - REFERENCE_VECTOR.x * ny;
    let angle = f64::atan2(diff, dot);

    if angle < 0.0 {
        (2.0 * std::f64::consts::PI + angle, length)
    } else {
        (angle, length)
    }
}

/// Orders vertices for the global system layout.
///
/// Vertices are sorted by clockwise angle and distance around `origin`, the
/// first vertex is moved to the back, and the sequence is reversed.
///
/// # Returns
/// The vertex indices in mesh order
pub fn mesh_sort(vertices: &[Vertex], origin: &Vertex) -> Vec<usize> {
    let keys: Vec<(f64, f64)> = vertices
        .iter()
        .map(|v| clockwise_angle_and_distance(v, origin))
        .collect();

    let mut order: Vec<usize> = (0..vertices.len()).collect();
    order.sort_by(|&a, &b| {
        keys[a]
            .0
            .total_cmp(&keys[b].0)
            .then(keys[a].1.total_cmp(&keys[b].1))
            .then_with(|| compare_vertices(&vertices[a], &vertices[b]))
    });

    if !order.is_empty() {
        order.rotate_left(1);
        order.reverse();
    }

    order
}

/// Twice-signed area helper; positive when `a, b, c` turn counter-clockwise
pub fn orientation(a: &Vertex, b: &Vertex, c: &Vertex) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

pub fn signed_area(a: &Vertex, b: &Vertex, c: &Vertex) -> f64 {
    0.5 * orientation(a, b, c)
}

pub fn centroid(vertices: &[Vertex]) -> Vertex {
    let n = vertices.len() as f64;
    let (sx, sy) = vertices
        .iter()
        .fold((0.0, 0.0), |(sx, sy), v| (sx + v.x, sy + v.y));
    Vertex::new(sx / n, sy / n)
}

/// Even-odd point in polygon test. Points on the boundary may land either side.
pub fn point_in_polygon(point: &Vertex, polygon: &[Vertex]) -> bool {
    let mut inside = false;
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut j = n - 1;
    for i in 0..n {
        let pi = &polygon[i];
        let pj = &polygon[j];

        if (pi.y > point.y) != (pj.y > point.y) {
            let x_cross = pi.x + (point.y - pi.y) / (pj.y - pi.y) * (pj.x - pi.x);
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}

/// Total order on vertices used wherever a deterministic tie break is needed
pub fn compare_vertices(a: &Vertex, b: &Vertex) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_clockwise_angle_quadrants() {
        let origin = Vertex::new(0.0, 0.0);

        let (up, _) = clockwise_angle_and_distance(&Vertex::new(0.0, 1.0), &origin);
        let (right, _) = clockwise_angle_and_distance(&Vertex::new(1.0, 0.0), &origin);
        let (down, _) = clockwise_angle_and_distance(&Vertex::new(0.0, -1.0), &origin);
        let (left, dist) = clockwise_angle_and_distance(&Vertex::new(-2.0, 0.0), &origin);

        assert_relative_eq!(up, 0.0);
        assert_relative_eq!(right, PI / 2.0);
        assert_relative_eq!(down, PI);
        assert_relative_eq!(left, 3.0 * PI / 2.0);
        assert_relative_eq!(dist, 2.0);
    }

    #[test]
    fn test_origin_point_sorts_first() {
        let origin = Vertex::new(1.0, 1.0);
        assert_eq!(
            clockwise_angle_and_distance(&origin, &origin),
            (-PI, 0.0)
        );
    }

    #[test]
    fn test_mesh_sort_moves_first_then_reverses() {
        let vertices = vec![
            Vertex::new(-1.0, 1.0), // 7pi/4
            Vertex::new(1.0, 1.0),  // pi/4
            Vertex::new(1.0, -1.0), // 3pi/4
            Vertex::new(0.0, 2.0),  // 0
        ];

        // sorted: 3, 1, 2, 0 -> rotated: 1, 2, 0, 3 -> reversed: 3, 0, 2, 1
        let order = mesh_sort(&vertices, &Vertex::new(0.0, 0.0));
        assert_eq!(order, vec![3, 0, 2, 1]);
    }

    #[test]
    fn test_mesh_sort_depends_on_origin() {
        let vertices = vec![Vertex::new(0.0, 0.0), Vertex::new(2.0, 0.0), Vertex::new(1.0, 1.0)];

        let a = mesh_sort(&vertices, &Vertex::new(0.0, 0.0));
        let b = mesh_sort(&vertices, &Vertex::new(2.0, 0.0));
        assert_ne!(a, b);
        assert_eq!(a, mesh_sort(&vertices, &Vertex::new(0.0, 0.0)));
    }

    #[test]
    fn test_point_in_polygon() {
        let square = vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(2.0, 0.0),
            Vertex::new(2.0, 2.0),
            Vertex::new(0.0, 2.0),
        ];

        assert!(point_in_polygon(&Vertex::new(1.0, 1.0), &square));
        assert!(!point_in_polygon(&Vertex::new(3.0, 1.0), &square));
        assert!(!point_in_polygon(&Vertex::new(1.0, -0.5), &square));
    }

    #[test]
    fn test_coordinate_key_merges_close_points() {
        let a = Vertex::new(1.0, 2.0);
        let b = Vertex::new(1.0 + 1e-9, 2.0 - 1e-9);
        let c = Vertex::new(1.0 + 1e-3, 2.0);

        assert_eq!(coordinate_key(&a), coordinate_key(&b));
        assert_ne!(coordinate_key(&a), coordinate_key(&c));
    }

    #[test]
    fn test_signed_area_orientation() {
        let a = Vertex::new(0.0, 0.0);
        let b = Vertex::new(1.0, 0.0);
        let c = Vertex::new(0.0, 1.0);

        assert_relative_eq!(signed_area(&a, &b, &c), 0.5);
        assert_relative_eq!(signed_area(&a, &c, &b), -0.5);
    }
}
