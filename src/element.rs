use std::cell::OnceCell;

use nalgebra::{matrix, SMatrix, SVector};

use crate::{
    datatypes::{Node, Vertex},
    error::{BracketError, Result},
    geometry::signed_area,
};

/// Areas below this fraction of the summed squared edge lengths are singular
const SINGULAR_AREA_RATIO: f64 = 1e-12;

/// Calculates the stress-strain matrix for plane stress
///
/// # Arguments
/// * `poisson_ratio` - The poisson ratio for the model
/// * `youngs_modulus` - The modulus of elasticity of the model
///
/// # Returns
/// A 3x3 stress-strain matrix
pub fn compute_stress_strain_matrix(poisson_ratio: f64, youngs_modulus: f64) -> SMatrix<f64, 3, 3> {
    let mut stress_strain_mat: SMatrix<f64, 3, 3> = matrix![
        1.0, poisson_ratio, 0.0;
        poisson_ratio, 1.0, 0.0;
        0.0, 0.0, (1.0 - poisson_ratio)/2.0;
    ];

    stress_strain_mat *= youngs_modulus / (1.0 - f64::powi(poisson_ratio, 2));

    stress_strain_mat
}

/// Calculates the signed area of a triangle, positive when counter-clockwise
pub fn compute_element_area(vertices: &[Vertex; 3]) -> f64 {
    signed_area(&vertices[0], &vertices[1], &vertices[2])
}

/// Calculates the strain-displacement matrix of a constant strain triangle
///
/// # Arguments
/// * `vertices` - The corners of the element, in element order
/// * `element_area` - The signed area of the element
///
/// # Returns
/// A 3x6 strain-displacement matrix
pub fn compute_strain_displacement_matrix(
    vertices: &[Vertex; 3],
    element_area: f64,
) -> SMatrix<f64, 3, 6> {
    let [v0, v1, v2] = vertices;

    let beta_1 = v1.y - v2.y;
    let beta_2 = v2.y - v0.y;
    let beta_3 = v0.y - v1.y;

    let gamma_1 = v2.x - v1.x;
    let gamma_2 = v0.x - v2.x;
    let gamma_3 = v1.x - v0.x;

    let mut strain_displacement_mat: SMatrix<f64, 3, 6> = matrix![
        beta_1, 0., beta_2, 0., beta_3, 0.;
        0., gamma_1, 0., gamma_2, 0., gamma_3;
        gamma_1, beta_1, gamma_2, beta_2, gamma_3, beta_3;
    ];

    strain_displacement_mat /= 2.0 * element_area;

    strain_displacement_mat
}

/// Von Mises equivalent stress of a plane stress state `[sx, sy, txy]`
pub fn von_mises(stress: &SVector<f64, 3>) -> f64 {
    let (sx, sy, txy) = (stress[0], stress[1], stress[2]);
    f64::sqrt(sx * sx - sx * sy + sy * sy + 3.0 * txy * txy)
}

/// A constant strain triangle over three mesh nodes
///
/// The node indices are kept counter-clockwise, starting from the smallest
/// index. The local stiffness matrix is computed on first use and kept for
/// the lifetime of the element.
#[derive(Debug, Clone)]
pub struct TriangleElement {
    pub nodes: [usize; 3],
    stiffness: OnceCell<SMatrix<f64, 6, 6>>,
}

impl TriangleElement {
    /// Creates an element, putting its nodes in canonical order
    ///
    /// # Arguments
    /// * `nodes` - The mesh nodes the indices refer to
    /// * `indices` - The three node indices, in any order
    pub fn new(nodes: &[Node], indices: [usize; 3]) -> TriangleElement {
        let [a, b, c] = indices;
        let mut ordered = if signed_area(&nodes[a].vertex, &nodes[b].vertex, &nodes[c].vertex) < 0.0
        {
            [a, c, b]
        } else {
            [a, b, c]
        };

        let start = ordered
            .iter()
            .enumerate()
            .min_by_key(|&(_, n)| *n)
            .map(|(i, _)| i)
            .unwrap_or(0);
        ordered.rotate_left(start);

        TriangleElement {
            nodes: ordered,
            stiffness: OnceCell::new(),
        }
    }

    pub fn vertices(&self, nodes: &[Node]) -> [Vertex; 3] {
        self.nodes.map(|i| nodes[i].vertex)
    }

    /// Local position (0, 1 or 2) of a mesh node in this element
    pub fn local_index(&self, node: usize) -> Option<usize> {
        self.nodes.iter().position(|&n| n == node)
    }

    /// Calculates the area of the element, rejecting degenerate elements
    pub fn area(&self, nodes: &[Node]) -> Result<f64> {
        let vertices = self.vertices(nodes);
        let area = compute_element_area(&vertices);

        let scale: f64 = (0..3)
            .map(|i| f64::powi(vertices[i].distance(&vertices[(i + 1) % 3]), 2))
            .sum();

        if area.abs() <= SINGULAR_AREA_RATIO * scale {
            return Err(BracketError::SingularElement {
                nodes: self.nodes,
                area,
            });
        }

        Ok(area)
    }

    pub fn strain_displacement_matrix(&self, nodes: &[Node]) -> Result<SMatrix<f64, 3, 6>> {
        let area = self.area(nodes)?;
        Ok(compute_strain_displacement_matrix(
            &self.vertices(nodes),
            area,
        ))
    }

    /// Computes the stiffness matrix for the element
    ///
    /// # Arguments
    /// * `nodes` - The mesh nodes
    /// * `stress_strain_mat` - The material matrix, constant for the analysis
    /// * `part_thickness` - The thickness of the part
    ///
    /// # Returns
    /// A 6x6 stiffness matrix, cached after the first call
    pub fn stiffness(
        &self,
        nodes: &[Node],
        stress_strain_mat: &SMatrix<f64, 3, 3>,
        part_thickness: f64,
    ) -> Result<&SMatrix<f64, 6, 6>> {
        if let Some(cached) = self.stiffness.get() {
            return Ok(cached);
        }

        let area = self.area(nodes)?;
        let strain_displacement_mat =
            compute_strain_displacement_matrix(&self.vertices(nodes), area);

        let stiffness = (strain_displacement_mat.transpose() * stress_strain_mat)
            * strain_displacement_mat
            * area
            * part_thickness;

        Ok(self.stiffness.get_or_init(|| stiffness))
    }

    /// Calculates the stress `[sx, sy, txy]` in the element
    ///
    /// # Arguments
    /// * `nodes` - The mesh nodes
    /// * `stress_strain_mat` - The material matrix
    /// * `displacements` - The element displacements `[u0, v0, u1, v1, u2, v2]`
    pub fn stress(
        &self,
        nodes: &[Node],
        stress_strain_mat: &SMatrix<f64, 3, 3>,
        displacements: &SVector<f64, 6>,
    ) -> Result<SVector<f64, 3>> {
        Ok(stress_strain_mat * self.strain_displacement_matrix(nodes)? * displacements)
    }
}
