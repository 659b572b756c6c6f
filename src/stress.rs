use nalgebra::{DVector, SVector, Vector2, Vector3};

use crate::{
    datatypes::{ModelMetadata, DOF},
    element::von_mises,
    error::{BracketError, Result},
    mesher::Mesh,
};

fn check_length(mesh: &Mesh, displacements: &DVector<f64>) -> Result<()> {
    if displacements.len() != mesh.dof_count() {
        return Err(BracketError::Input(format!(
            "{} displacements for a mesh with {} dofs",
            displacements.len(),
            mesh.dof_count()
        )));
    }
    Ok(())
}

/// Recovers the stress contribution at every node
///
/// For each element touching a node, the node's two rows of the element
/// matrix are applied to the displacements of the element's three nodes, and
/// the results are summed over the elements.
///
/// # Arguments
/// * `mesh` - The solved mesh
/// * `model_metadata` - The model metadata
/// * `displacements` - The full displacement vector
///
/// # Returns
/// One two-component vector per node, in mesh order
pub fn element_stresses(
    mesh: &Mesh,
    model_metadata: &ModelMetadata,
    displacements: &DVector<f64>,
) -> Result<Vec<Vector2<f64>>> {
    check_length(mesh, displacements)?;
    let stress_strain_mat = model_metadata.material_matrix();

    let mut stresses = Vec::with_capacity(mesh.node_count());
    for node in 0..mesh.node_count() {
        let mut accumulated = Vector2::zeros();

        for &t in mesh.triangles_of(node) {
            let element = &mesh.triangles()[t];
            let Some(local) = element.local_index(node) else {
                continue;
            };
            let stiffness_mat = element.stiffness(
                mesh.nodes(),
                &stress_strain_mat,
                model_metadata.part_thickness,
            )?;

            for (j, &other) in element.nodes.iter().enumerate() {
                let block = stiffness_mat.fixed_view::<2, 2>(DOF * local, DOF * j);
                let u = Vector2::new(displacements[DOF * other], displacements[DOF * other + 1]);
                accumulated += block * u;
            }
        }

        stresses.push(accumulated);
    }

    Ok(stresses)
}

/// Calculates the stress `[sx, sy, txy]` in every element
pub fn triangle_stresses(
    mesh: &Mesh,
    model_metadata: &ModelMetadata,
    displacements: &DVector<f64>,
) -> Result<Vec<Vector3<f64>>> {
    check_length(mesh, displacements)?;
    let stress_strain_mat = model_metadata.material_matrix();

    mesh.triangles()
        .iter()
        .map(|element| {
            let element_displacements: SVector<f64, 6> = SVector::from_iterator(
                element
                    .nodes
                    .iter()
                    .flat_map(|&n| [displacements[DOF * n], displacements[DOF * n + 1]]),
            );
            element.stress(mesh.nodes(), &stress_strain_mat, &element_displacements)
        })
        .collect()
}

/// Area weighted average of the von Mises stress of the elements around
/// each node
pub fn nodal_von_mises(mesh: &Mesh, element_stress: &[Vector3<f64>]) -> Result<Vec<f64>> {
    if element_stress.len() != mesh.triangles().len() {
        return Err(BracketError::Input(format!(
            "{} element stresses for a mesh with {} elements",
            element_stress.len(),
            mesh.triangles().len()
        )));
    }

    let mut nodal = Vec::with_capacity(mesh.node_count());

    for node in 0..mesh.node_count() {
        let mut weighted = 0.0;
        let mut total_area = 0.0;

        for &t in mesh.triangles_of(node) {
            let area = mesh.triangles()[t].area(mesh.nodes())?.abs();
            weighted += area * von_mises(&element_stress[t]);
            total_area += area;
        }

        nodal.push(if total_area > 0.0 {
            weighted / total_area
        } else {
            0.0
        });
    }

    Ok(nodal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{datatypes::Vertex, mesher::build_mesh, solver::assemble};
    use approx::assert_relative_eq;

    fn rectangle() -> Mesh {
        build_mesh(
            &[vec![
                Vertex::new(0.0, 0.0),
                Vertex::new(2.0, 0.0),
                Vertex::new(2.0, 1.0),
                Vertex::new(0.0, 1.0),
            ]],
            0.6,
        )
        .unwrap()
    }

    #[test]
    fn test_nodal_contributions_equal_global_product() {
        let mesh = rectangle();
        let metadata = ModelMetadata::new(500.0, 0.2, 1.5, 0.6).unwrap();
        let displacements = DVector::from_fn(mesh.dof_count(), |i, _| (i as f64 * 0.37).sin());

        let stresses = element_stresses(&mesh, &metadata, &displacements).unwrap();
        let product = assemble(&mesh, &metadata).unwrap() * &displacements;

        assert_eq!(stresses.len(), mesh.node_count());
        for (n, stress) in stresses.iter().enumerate() {
            assert_relative_eq!(stress[0], product[2 * n], epsilon = 1e-9);
            assert_relative_eq!(stress[1], product[2 * n + 1], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_uniform_strain_field() {
        let mesh = rectangle();
        let metadata = ModelMetadata::new(1000.0, 0.0, 1.0, 0.6).unwrap();

        // u = 0.001 x
        let mut displacements = DVector::zeros(mesh.dof_count());
        for node in mesh.nodes() {
            displacements[2 * node.index] = 0.001 * node.x();
        }

        let element_stress = triangle_stresses(&mesh, &metadata, &displacements).unwrap();
        for stress in &element_stress {
            assert_relative_eq!(stress[0], 1.0, epsilon = 1e-9);
            assert_relative_eq!(stress[1], 0.0, epsilon = 1e-9);
            assert_relative_eq!(stress[2], 0.0, epsilon = 1e-9);
        }

        let nodal = nodal_von_mises(&mesh, &element_stress).unwrap();
        for value in nodal {
            assert_relative_eq!(value, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rigid_motion_is_stress_free() {
        let mesh = rectangle();
        let metadata = ModelMetadata::new(1000.0, 0.3, 1.0, 0.6).unwrap();
        let displacements = DVector::from_fn(mesh.dof_count(), |i, _| if i % 2 == 0 { 0.5 } else { -0.2 });

        for stress in element_stresses(&mesh, &metadata, &displacements).unwrap() {
            assert_relative_eq!(stress.norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let mesh = rectangle();
        let metadata = ModelMetadata::new(1000.0, 0.3, 1.0, 0.6).unwrap();
        let displacements = DVector::zeros(3);

        assert!(element_stresses(&mesh, &metadata, &displacements).is_err());
        assert!(triangle_stresses(&mesh, &metadata, &displacements).is_err());
        assert!(matches!(
            nodal_von_mises(&mesh, &[Vector3::zeros()]),
            Err(BracketError::Input(_))
        ));
    }
}
