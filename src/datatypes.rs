use std::hash::{Hash, Hasher};

use nalgebra::{SMatrix, Vector2};

use crate::{
    element::compute_stress_strain_matrix,
    error::{BracketError, Result},
    geometry::coordinate_key,
};

/// Number of degrees of freedom carried by each node
pub const DOF: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Vertex {
        Vertex { x, y }
    }

    pub fn distance(&self, other: &Vertex) -> f64 {
        f64::hypot(other.x - self.x, other.y - self.y)
    }
}

impl From<[f64; 2]> for Vertex {
    fn from(value: [f64; 2]) -> Self {
        Vertex {
            x: value[0],
            y: value[1],
        }
    }
}

/// A finalized mesh vertex. Coordinates are fixed at creation; `index` is the
/// node's position in the mesh ordering and `2 * index` its first dof.
///
/// Two nodes are equal when their coordinates share a coordinate key,
/// whatever their index or support state.
#[derive(Debug, Clone)]
pub struct Node {
    pub vertex: Vertex,
    pub index: usize,
    pub fixed: bool,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        coordinate_key(&self.vertex) == coordinate_key(&other.vertex)
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        coordinate_key(&self.vertex).hash(state);
    }
}

impl Node {
    pub fn x(&self) -> f64 {
        self.vertex.x
    }

    pub fn y(&self) -> f64 {
        self.vertex.y
    }
}

/// Outline of a part: solid polygons, which are unioned, and holes cut out
/// of them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub polygons: Vec<Vec<Vertex>>,
    pub holes: Vec<Vec<Vertex>>,
}

impl Geometry {
    pub fn solid(polygons: Vec<Vec<Vertex>>) -> Geometry {
        Geometry {
            polygons,
            holes: Vec::new(),
        }
    }
}

/// Per-dof boundary conditions.
///
/// A dof is either free (`moving[d]`, with a known `loads[d]`) or prescribed
/// (`!moving[d]`, `loads[d]` is NaN and the displacement is `prescribed[d]`).
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryConditions {
    pub loads: Vec<f64>,
    pub moving: Vec<bool>,
    pub prescribed: Vec<f64>,
}

impl BoundaryConditions {
    /// Every dof free and unloaded
    pub fn free(dof_count: usize) -> BoundaryConditions {
        BoundaryConditions {
            loads: vec![0.0; dof_count],
            moving: vec![true; dof_count],
            prescribed: vec![0.0; dof_count],
        }
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    /// Indices of the dofs with prescribed displacement, checking that every
    /// dof is marked consistently.
    pub fn fixed_dofs(&self) -> Result<Vec<usize>> {
        let mut fixed = Vec::new();

        for (dof, (load, moving)) in std::iter::zip(&self.loads, &self.moving).enumerate() {
            match (load.is_nan(), *moving) {
                (true, false) => fixed.push(dof),
                (false, true) => {}
                _ => {
                    return Err(BracketError::BoundaryConditionConflict {
                        dof,
                        load: *load,
                        moving: *moving,
                    })
                }
            }
        }

        Ok(fixed)
    }
}

/// A support or load attached to the mesh node at `point`
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryAssignment {
    Fixed {
        point: Vertex,
    },
    Displacement {
        point: Vertex,
        ux: f64,
        uy: f64,
    },
    /// A point load. Without a direction the bracket's default is used.
    Load {
        point: Vertex,
        magnitude: f64,
        direction: Option<Vector2<f64>>,
    },
}

impl BoundaryAssignment {
    pub fn point(&self) -> &Vertex {
        match self {
            BoundaryAssignment::Fixed { point }
            | BoundaryAssignment::Displacement { point, .. }
            | BoundaryAssignment::Load { point, .. } => point,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverKind {
    /// Dense LU factorization
    #[default]
    Lu,
    /// Iterative conjugate gradient
    ConjugateGradient,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    pub part_thickness: f64,
    pub max_edge_length: f64,
    pub solver: SolverKind,
}

impl ModelMetadata {
    /// Validates material and mesh parameters
    ///
    /// # Arguments
    /// * `youngs_modulus` - The modulus of elasticity, positive
    /// * `poisson_ratio` - The poisson ratio, in (-1, 0.5)
    /// * `part_thickness` - The thickness of the part, positive
    /// * `max_edge_length` - The longest edge the mesher may leave, positive
    pub fn new(
        youngs_modulus: f64,
        poisson_ratio: f64,
        part_thickness: f64,
        max_edge_length: f64,
    ) -> Result<ModelMetadata> {
        if !(youngs_modulus.is_finite() && youngs_modulus > 0.0) {
            return Err(BracketError::InvalidMaterial(format!(
                "youngs modulus must be positive, got {youngs_modulus}"
            )));
        }
        if !(poisson_ratio > -1.0 && poisson_ratio < 0.5) {
            return Err(BracketError::InvalidMaterial(format!(
                "poisson ratio must lie in (-1, 0.5), got {poisson_ratio}"
            )));
        }
        if !(part_thickness.is_finite() && part_thickness > 0.0) {
            return Err(BracketError::InvalidMaterial(format!(
                "part thickness must be positive, got {part_thickness}"
            )));
        }
        if !(max_edge_length.is_finite() && max_edge_length > 0.0) {
            return Err(BracketError::InvalidGeometry(format!(
                "max edge length must be positive, got {max_edge_length}"
            )));
        }

        Ok(ModelMetadata {
            youngs_modulus,
            poisson_ratio,
            part_thickness,
            max_edge_length,
            solver: SolverKind::default(),
        })
    }

    pub fn with_solver(mut self, solver: SolverKind) -> ModelMetadata {
        self.solver = solver;
        self
    }

    /// The plane stress material matrix for this model
    pub fn material_matrix(&self) -> SMatrix<f64, 3, 3> {
        compute_stress_strain_matrix(self.poisson_ratio, self.youngs_modulus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_dofs_accepts_consistent_markings() {
        let mut bc = BoundaryConditions::free(4);
        bc.loads[2] = f64::NAN;
        bc.moving[2] = false;

        assert_eq!(bc.fixed_dofs().unwrap(), vec![2]);
    }

    #[test]
    fn test_fixed_dofs_rejects_loaded_support() {
        let mut bc = BoundaryConditions::free(4);
        bc.moving[1] = false;

        match bc.fixed_dofs() {
            Err(BracketError::BoundaryConditionConflict { dof, moving, .. }) => {
                assert_eq!(dof, 1);
                assert!(!moving);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_fixed_dofs_rejects_unloaded_free_dof() {
        let mut bc = BoundaryConditions::free(2);
        bc.loads[0] = f64::NAN;

        assert!(matches!(
            bc.fixed_dofs(),
            Err(BracketError::BoundaryConditionConflict { dof: 0, .. })
        ));
    }

    #[test]
    fn test_node_identity_is_by_coordinates() {
        let a = Node {
            vertex: Vertex::new(1.0, 2.0),
            index: 0,
            fixed: false,
        };
        let b = Node {
            vertex: Vertex::new(1.0 + 1e-9, 2.0),
            index: 7,
            fixed: true,
        };
        let c = Node {
            vertex: Vertex::new(1.0, 2.5),
            index: 0,
            fixed: false,
        };

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: std::collections::HashSet<Node> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_metadata_validation() {
        assert!(ModelMetadata::new(2.1e5, 0.3, 5.0, 100.0).is_ok());
        assert!(matches!(
            ModelMetadata::new(-1.0, 0.3, 5.0, 100.0),
            Err(BracketError::InvalidMaterial(_))
        ));
        assert!(matches!(
            ModelMetadata::new(2.1e5, 0.5, 5.0, 100.0),
            Err(BracketError::InvalidMaterial(_))
        ));
        assert!(matches!(
            ModelMetadata::new(2.1e5, 0.3, 0.0, 100.0),
            Err(BracketError::InvalidMaterial(_))
        ));
        assert!(matches!(
            ModelMetadata::new(2.1e5, 0.3, 5.0, 0.0),
            Err(BracketError::InvalidGeometry(_))
        ));
    }
}
