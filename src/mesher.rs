use std::collections::HashMap;

use log::{debug, info, warn};
use nalgebra::Vector2;

use crate::{
    datatypes::{BoundaryAssignment, BoundaryConditions, Geometry, Node, Vertex, DOF},
    element::TriangleElement,
    error::{BracketError, Result},
    geometry::{centroid, coordinate_key, mesh_sort, point_in_polygon},
    triangulation::{deduplicate, delaunay, edge_set},
};

/// Refinement gives up after this many passes
pub const MAX_REFINEMENT_PASSES: usize = 64;

/// Outline of the reference bracket
pub const DEFAULT_BRACKET: [[f64; 2]; 8] = [
    [1700., 550.],
    [2200., 560.],
    [2600., 580.],
    [3200., 600.],
    [3200., 900.],
    [200., 900.],
    [200., 600.],
    [800., 580.],
];

/// Load direction of the reference bracket: 55 degrees from horizontal for x,
/// 145 degrees for y
pub fn default_load_direction() -> Vector2<f64> {
    Vector2::new(
        f64::cos(55f64.to_radians()),
        f64::cos(145f64.to_radians()),
    )
}

pub fn default_bracket() -> Vec<Vertex> {
    DEFAULT_BRACKET.iter().map(|&p| Vertex::from(p)).collect()
}

/// How triangles of the convex hull triangulation are cut back to the part
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ClipMode {
    /// Keep the full triangulation
    #[default]
    None,
    /// Bracket specific cut: drop triangles touching a node on the
    /// reference's horizontal line to its right that also have a node below
    /// that line. Only meaningful for the bracket it was tuned on.
    OutsideEdge(Vertex),
    /// Drop triangles whose centroid is outside every input polygon.
    ///
    /// The triangulation does not follow polygon edges, so along concave
    /// edges the clipped mesh only approximates the outline: triangles
    /// straddling such an edge are kept or dropped whole.
    Polygons,
}

fn validate_edge_length(max_edge_length: f64) -> Result<()> {
    if !(max_edge_length.is_finite() && max_edge_length > 0.0) {
        return Err(BracketError::InvalidGeometry(format!(
            "max edge length must be positive, got {max_edge_length}"
        )));
    }
    Ok(())
}

/// Inserts points until no edge of the Delaunay triangulation is longer than
/// `max_edge_length`
///
/// # Arguments
/// * `points` - The polygon to refine
/// * `max_edge_length` - The longest allowed edge
///
/// # Returns
/// The distinct input points followed by the inserted points
pub fn refine(points: &[Vertex], max_edge_length: f64) -> Result<Vec<Vertex>> {
    validate_edge_length(max_edge_length)?;

    let (mut points, _) = deduplicate(points);

    for pass in 0..MAX_REFINEMENT_PASSES {
        let triangles = delaunay(&points)?;

        let mut inserted: Vec<Vertex> = Vec::new();
        for (a, b) in edge_set(&triangles) {
            let start = points[a];
            let end = points[b];
            let length = start.distance(&end);

            if length <= max_edge_length {
                continue;
            }

            let pieces = (length / max_edge_length).ceil() as usize;
            for piece in 1..pieces {
                let t = piece as f64 / pieces as f64;
                inserted.push(Vertex::new(
                    start.x + t * (end.x - start.x),
                    start.y + t * (end.y - start.y),
                ));
            }
        }

        let before = points.len();
        points.extend(inserted);
        points = deduplicate(&points).0;

        if points.len() == before {
            debug!("refinement converged after {pass} passes with {before} points");
            return Ok(points);
        }
        debug!(
            "refinement pass {pass}: {} points inserted",
            points.len() - before
        );
    }

    Err(BracketError::InvalidGeometry(format!(
        "refinement did not converge after {MAX_REFINEMENT_PASSES} passes"
    )))
}

fn clip_outside_edge(
    vertices: &[Vertex],
    triangles: Vec<[usize; 3]>,
    reference: &Vertex,
) -> Vec<[usize; 3]> {
    let line_y = coordinate_key(reference).1;

    triangles
        .into_iter()
        .filter(|triangle| {
            let on_edge = triangle
                .iter()
                .map(|&i| &vertices[i])
                .filter(|v| coordinate_key(v).1 == line_y && v.x > reference.x)
                .last();

            match on_edge {
                Some(edge_node) => !triangle.iter().any(|&i| vertices[i].y < edge_node.y),
                None => true,
            }
        })
        .collect()
}

fn clip_holes(
    vertices: &[Vertex],
    triangles: Vec<[usize; 3]>,
    holes: &[Vec<Vertex>],
) -> Vec<[usize; 3]> {
    triangles
        .into_iter()
        .filter(|triangle| {
            let center = centroid(&triangle.map(|i| vertices[i]));
            !holes.iter().any(|hole| point_in_polygon(&center, hole))
        })
        .collect()
}

fn clip_to_polygons(
    vertices: &[Vertex],
    triangles: Vec<[usize; 3]>,
    polygons: &[Vec<Vertex>],
) -> Vec<[usize; 3]> {
    triangles
        .into_iter()
        .filter(|triangle| {
            let center = centroid(&triangle.map(|i| vertices[i]));
            polygons.iter().any(|polygon| point_in_polygon(&center, polygon))
        })
        .collect()
}

/// Configures and builds a [`Mesh`]
#[derive(Debug, Clone)]
pub struct MeshBuilder {
    max_edge_length: f64,
    polygons: Vec<Vec<Vertex>>,
    holes: Vec<Vec<Vertex>>,
    clip: ClipMode,
    origin: Vertex,
}

impl MeshBuilder {
    pub fn new(max_edge_length: f64) -> MeshBuilder {
        MeshBuilder {
            max_edge_length,
            polygons: Vec::new(),
            holes: Vec::new(),
            clip: ClipMode::None,
            origin: Vertex::new(0.0, 0.0),
        }
    }

    /// Adds a polygon; each polygon is refined on its own
    pub fn polygon(mut self, points: Vec<Vertex>) -> MeshBuilder {
        self.polygons.push(points);
        self
    }

    pub fn polygons(mut self, point_sets: impl IntoIterator<Item = Vec<Vertex>>) -> MeshBuilder {
        self.polygons.extend(point_sets);
        self
    }

    /// Adds a hole. Triangles whose centroid falls inside a hole are
    /// removed whatever the clip mode.
    pub fn hole(mut self, points: Vec<Vertex>) -> MeshBuilder {
        self.holes.push(points);
        self
    }

    pub fn holes(mut self, point_sets: impl IntoIterator<Item = Vec<Vertex>>) -> MeshBuilder {
        self.holes.extend(point_sets);
        self
    }

    pub fn geometry(self, geometry: Geometry) -> MeshBuilder {
        self.polygons(geometry.polygons).holes(geometry.holes)
    }

    pub fn clip(mut self, clip: ClipMode) -> MeshBuilder {
        self.clip = clip;
        self
    }

    /// Sets the point the node ordering sweeps around
    pub fn origin(mut self, origin: Vertex) -> MeshBuilder {
        self.origin = origin;
        self
    }

    /// Refines, triangulates, clips and orders the mesh
    pub fn build(&self) -> Result<Mesh> {
        validate_edge_length(self.max_edge_length)?;
        if self.polygons.is_empty() {
            return Err(BracketError::InvalidGeometry(
                "no polygons to mesh".to_owned(),
            ));
        }

        let mut points: Vec<Vertex> = Vec::new();
        for polygon in self.polygons.iter().chain(&self.holes) {
            points.extend(refine(polygon, self.max_edge_length)?);
        }

        let (vertices, _) = deduplicate(&points);
        if vertices.len() < points.len() {
            debug!(
                "merged {} coincident points",
                points.len() - vertices.len()
            );
        }

        let mut triangles = delaunay(&vertices)?;
        let unclipped = triangles.len();

        triangles = match &self.clip {
            ClipMode::None => triangles,
            ClipMode::OutsideEdge(reference) => clip_outside_edge(&vertices, triangles, reference),
            ClipMode::Polygons => clip_to_polygons(&vertices, triangles, &self.polygons),
        };
        if !self.holes.is_empty() {
            triangles = clip_holes(&vertices, triangles, &self.holes);
        }

        if triangles.is_empty() {
            return Err(BracketError::InvalidGeometry(
                "clipping removed every triangle".to_owned(),
            ));
        }
        if triangles.len() < unclipped {
            debug!("clipped {} triangles", unclipped - triangles.len());
        }

        let mesh = Mesh::finalize(&vertices, &triangles, &self.origin);
        info!(
            "meshed {} nodes and {} elements",
            mesh.node_count(),
            mesh.triangles().len()
        );

        Ok(mesh)
    }
}

/// Builds an unclipped mesh from one or more polygons
///
/// # Arguments
/// * `point_sets` - The polygons, each refined independently
/// * `max_edge_length` - The longest edge allowed in the mesh
pub fn build_mesh(point_sets: &[Vec<Vertex>], max_edge_length: f64) -> Result<Mesh> {
    MeshBuilder::new(max_edge_length)
        .polygons(point_sets.iter().cloned())
        .build()
}

/// Ordered nodes, elements and boundary conditions of a triangulated part
#[derive(Debug, Clone)]
pub struct Mesh {
    nodes: Vec<Node>,
    triangles: Vec<TriangleElement>,
    boundary_conditions: BoundaryConditions,
    lookup: HashMap<(i64, i64), usize>,
    node_triangles: Vec<Vec<usize>>,
}

impl Mesh {
    /// Creates the nodes of every vertex used by a triangle, in mesh order,
    /// and the elements over them
    fn finalize(vertices: &[Vertex], triangles: &[[usize; 3]], origin: &Vertex) -> Mesh {
        let mut used = vec![false; vertices.len()];
        for triangle in triangles {
            for &v in triangle {
                used[v] = true;
            }
        }

        let kept: Vec<usize> = (0..vertices.len()).filter(|&i| used[i]).collect();
        if kept.len() < vertices.len() {
            warn!(
                "dropped {} nodes not attached to any element",
                vertices.len() - kept.len()
            );
        }

        let kept_vertices: Vec<Vertex> = kept.iter().map(|&i| vertices[i]).collect();
        let order = mesh_sort(&kept_vertices, origin);

        let mut position = vec![usize::MAX; vertices.len()];
        for (index, &k) in order.iter().enumerate() {
            position[kept[k]] = index;
        }

        let nodes: Vec<Node> = order
            .iter()
            .enumerate()
            .map(|(index, &k)| Node {
                vertex: kept_vertices[k],
                index,
                fixed: false,
            })
            .collect();

        let elements: Vec<TriangleElement> = triangles
            .iter()
            .map(|triangle| TriangleElement::new(&nodes, triangle.map(|v| position[v])))
            .collect();

        let mut node_triangles: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (t, element) in elements.iter().enumerate() {
            for &n in &element.nodes {
                node_triangles[n].push(t);
            }
        }

        let lookup = nodes
            .iter()
            .map(|node| (coordinate_key(&node.vertex), node.index))
            .collect();

        Mesh {
            boundary_conditions: BoundaryConditions::free(DOF * nodes.len()),
            nodes,
            triangles: elements,
            lookup,
            node_triangles,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn triangles(&self) -> &[TriangleElement] {
        &self.triangles
    }

    /// Element connectivity as node index triples
    pub fn triangle_indices(&self) -> Vec<[usize; 3]> {
        self.triangles.iter().map(|t| t.nodes).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn dof_count(&self) -> usize {
        DOF * self.nodes.len()
    }

    pub fn boundary_conditions(&self) -> &BoundaryConditions {
        &self.boundary_conditions
    }

    /// Indices of the elements that contain `node`
    pub fn triangles_of(&self, node: usize) -> &[usize] {
        &self.node_triangles[node]
    }

    /// Finds the node at the given coordinates
    pub fn find_node(&self, point: &Vertex) -> Result<usize> {
        self.lookup
            .get(&coordinate_key(point))
            .copied()
            .ok_or(BracketError::NodeNotFound {
                x: point.x,
                y: point.y,
            })
    }

    pub fn nearest_node(&self, point: &Vertex) -> Option<usize> {
        self.nodes
            .iter()
            .min_by(|a, b| {
                point
                    .distance(&a.vertex)
                    .total_cmp(&point.distance(&b.vertex))
            })
            .map(|node| node.index)
    }

    /// Fixes the node at `point` with zero displacement
    pub fn set_fixed(&mut self, point: &Vertex) -> Result<usize> {
        self.set_displacement(point, 0.0, 0.0)
    }

    /// Fixes the node at `point` with a prescribed displacement
    pub fn set_displacement(&mut self, point: &Vertex, ux: f64, uy: f64) -> Result<usize> {
        let index = self.find_node(point)?;
        self.nodes[index].fixed = true;

        let bc = &mut self.boundary_conditions;
        for (dof, value) in [(DOF * index, ux), (DOF * index + 1, uy)] {
            bc.moving[dof] = false;
            bc.loads[dof] = f64::NAN;
            bc.prescribed[dof] = value;
        }

        Ok(index)
    }

    /// Loads the node at `point` along the bracket's default direction
    pub fn set_load(&mut self, point: &Vertex, magnitude: f64) -> Result<usize> {
        self.set_load_along(point, magnitude, default_load_direction())
    }

    /// Loads the node at `point` along `direction`, which is normalized
    pub fn set_load_along(
        &mut self,
        point: &Vertex,
        magnitude: f64,
        direction: Vector2<f64>,
    ) -> Result<usize> {
        let index = self.find_node(point)?;

        let norm = direction.norm();
        if !(norm.is_finite() && norm > 0.0) {
            return Err(BracketError::InvalidGeometry(format!(
                "load direction {direction:?} has no length"
            )));
        }
        let force = direction * (magnitude / norm);

        self.boundary_conditions.loads[DOF * index] = force.x;
        self.boundary_conditions.loads[DOF * index + 1] = force.y;

        Ok(index)
    }

    pub fn apply(&mut self, assignment: &BoundaryAssignment) -> Result<usize> {
        match assignment {
            BoundaryAssignment::Fixed { point } => self.set_fixed(point),
            BoundaryAssignment::Displacement { point, ux, uy } => {
                self.set_displacement(point, *ux, *uy)
            }
            BoundaryAssignment::Load {
                point,
                magnitude,
                direction: Some(direction),
            } => self.set_load_along(point, *magnitude, *direction),
            BoundaryAssignment::Load {
                point,
                magnitude,
                direction: None,
            } => self.set_load(point, *magnitude),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::signed_area;
    use approx::assert_relative_eq;

    fn square(side: f64) -> Vec<Vertex> {
        vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(side, 0.0),
            Vertex::new(side, side),
            Vertex::new(0.0, side),
        ]
    }

    fn l_shape() -> Vec<Vertex> {
        vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(2.0, 0.0),
            Vertex::new(2.0, 1.0),
            Vertex::new(1.0, 1.0),
            Vertex::new(1.0, 2.0),
            Vertex::new(0.0, 2.0),
        ]
    }

    fn mesh_area(mesh: &Mesh) -> f64 {
        mesh.triangles()
            .iter()
            .map(|t| {
                let [a, b, c] = t.vertices(mesh.nodes());
                signed_area(&a, &b, &c)
            })
            .sum()
    }

    #[test]
    fn test_refine_bounds_edge_length() {
        let points = refine(&square(1.0), 0.3).unwrap();
        assert!(points.len() > 4);

        let triangles = delaunay(&points).unwrap();
        for (a, b) in edge_set(&triangles) {
            assert!(points[a].distance(&points[b]) <= 0.3 + 1e-12);
        }
    }

    #[test]
    fn test_refine_is_idempotent() {
        let once = refine(&l_shape(), 0.4).unwrap();
        let twice = refine(&once, 0.4).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_refine_rejects_bad_input() {
        assert!(matches!(
            refine(&square(1.0), 0.0),
            Err(BracketError::InvalidGeometry(_))
        ));
        assert!(matches!(
            refine(&[Vertex::new(0.0, 0.0), Vertex::new(1.0, 0.0)], 1.0),
            Err(BracketError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_mesh_nodes_are_unique_and_indexed() {
        let mesh = build_mesh(&[square(2.0), square(1.0)], 0.5).unwrap();

        let mut keys: Vec<(i64, i64)> = mesh
            .nodes()
            .iter()
            .map(|n| coordinate_key(&n.vertex))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), mesh.node_count());

        for (i, node) in mesh.nodes().iter().enumerate() {
            assert_eq!(node.index, i);
        }
        for triangle in mesh.triangles() {
            assert!(triangle.nodes.iter().all(|&n| n < mesh.node_count()));
            assert_eq!(triangle.nodes[0], *triangle.nodes.iter().min().unwrap());
        }
        assert_relative_eq!(mesh_area(&mesh), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mesh_is_deterministic() {
        let a = build_mesh(&[l_shape()], 0.5).unwrap();
        let b = build_mesh(&[l_shape()], 0.5).unwrap();

        assert_eq!(a.nodes(), b.nodes());
        assert_eq!(a.triangle_indices(), b.triangle_indices());
    }

    fn offset_square(origin: f64, side: f64) -> Vec<Vertex> {
        square(side)
            .into_iter()
            .map(|v| Vertex::new(v.x + origin, v.y + origin))
            .collect()
    }

    #[test]
    fn test_holes_are_cut_out() {
        for clip in [ClipMode::None, ClipMode::Polygons] {
            let mesh = MeshBuilder::new(20.0)
                .polygon(square(10.0))
                .hole(offset_square(3.0, 3.0))
                .clip(clip)
                .build()
                .unwrap();

            assert_relative_eq!(mesh_area(&mesh), 91.0, epsilon = 1e-9);
            assert_eq!(mesh.node_count(), 8);

            let hole = offset_square(3.0, 3.0);
            for element in mesh.triangles() {
                let center = centroid(&element.vertices(mesh.nodes()));
                assert!(!point_in_polygon(&center, &hole));
            }
        }
    }

    #[test]
    fn test_polygon_clip_removes_notch() {
        let hull = MeshBuilder::new(10.0).polygon(l_shape()).build().unwrap();
        assert_relative_eq!(mesh_area(&hull), 3.5, epsilon = 1e-9);

        let clipped = MeshBuilder::new(10.0)
            .polygon(l_shape())
            .clip(ClipMode::Polygons)
            .build()
            .unwrap();
        assert_relative_eq!(mesh_area(&clipped), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_outside_edge_clip_drops_orphans() {
        let mut points = vec![
            Vertex::new(0.0, 0.0),
            Vertex::new(4.0, 0.0),
            Vertex::new(4.0, 2.0),
            Vertex::new(0.0, 2.0),
        ];
        points.push(Vertex::new(2.0, 1.0));

        let mesh = MeshBuilder::new(10.0)
            .polygon(points)
            .clip(ClipMode::OutsideEdge(Vertex::new(1.0, 1.0)))
            .build()
            .unwrap();

        assert_eq!(mesh.triangles().len(), 1);
        assert_eq!(mesh.node_count(), 3);
        assert!(mesh.find_node(&Vertex::new(0.0, 0.0)).is_err());
    }

    #[test]
    fn test_boundary_assignments() {
        let mut mesh = build_mesh(&[square(1.0)], 2.0).unwrap();

        let fixed = mesh.set_fixed(&Vertex::new(0.0, 0.0)).unwrap();
        assert!(mesh.nodes()[fixed].fixed);
        let bc = mesh.boundary_conditions();
        assert!(!bc.moving[2 * fixed] && !bc.moving[2 * fixed + 1]);
        assert!(bc.loads[2 * fixed].is_nan());

        let loaded = mesh.set_load(&Vertex::new(1.0, 1.0), 1000.0).unwrap();
        let bc = mesh.boundary_conditions();
        assert_relative_eq!(bc.loads[2 * loaded], 1000.0 * 55f64.to_radians().cos());
        assert_relative_eq!(bc.loads[2 * loaded + 1], 1000.0 * 145f64.to_radians().cos());

        let pulled = mesh
            .set_load_along(&Vertex::new(1.0, 0.0), 10.0, Vector2::new(0.0, -2.0))
            .unwrap();
        assert_relative_eq!(mesh.boundary_conditions().loads[2 * pulled + 1], -10.0);

        assert!(matches!(
            mesh.set_fixed(&Vertex::new(0.5, 0.7)),
            Err(BracketError::NodeNotFound { .. })
        ));
        assert!(matches!(
            mesh.set_load_along(&Vertex::new(1.0, 0.0), 1.0, Vector2::zeros()),
            Err(BracketError::InvalidGeometry(_))
        ));
        assert_eq!(mesh.nearest_node(&Vertex::new(0.1, -0.2)), Some(fixed));
    }

    #[test]
    fn test_default_direction_is_unit() {
        assert_relative_eq!(default_load_direction().norm(), 1.0, epsilon = 1e-12);
    }
}
