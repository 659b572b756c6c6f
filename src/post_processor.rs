use std::io::{BufWriter, Write};

use log::info;
use nalgebra::{Vector2, Vector3};

use crate::{
    element::von_mises,
    error::{BracketError, Result},
    mesher::Mesh,
    solver::Solution,
};

/// Post-solve values handed to the output writers
pub struct Results<'a> {
    pub mesh: &'a Mesh,
    pub solution: &'a Solution,
    pub node_stresses: &'a [Vector2<f64>],
    pub nodal_von_mises: &'a [f64],
    pub element_stresses: &'a [Vector3<f64>],
}

/// Writes the node table: coordinates, displacements, forces and stresses
pub fn write_nodes<W: Write>(results: &Results, writer: W) -> Result<()> {
    let mut out = BufWriter::new(writer);

    writeln!(out, "x,y,ux,uy,fx,fy,sx,sy,von_mises")?;
    for node in results.mesh.nodes() {
        let i = node.index;
        let (ux, uy) = results.solution.node_displacement(i);
        writeln!(
            out,
            "{x},{y},{ux},{uy},{fx},{fy},{sx},{sy},{vm}",
            x = node.x(),
            y = node.y(),
            fx = results.solution.forces[2 * i],
            fy = results.solution.forces[2 * i + 1],
            sx = results.node_stresses[i][0],
            sy = results.node_stresses[i][1],
            vm = results.nodal_von_mises[i],
        )?;
    }

    out.flush()?;
    Ok(())
}

/// Writes the element table: connectivity and von Mises stress
pub fn write_elements<W: Write>(results: &Results, writer: W) -> Result<()> {
    let mut out = BufWriter::new(writer);

    writeln!(out, "n0,n1,n2,von_mises")?;
    for (element, stress) in std::iter::zip(results.mesh.triangles(), results.element_stresses) {
        let [n0, n1, n2] = element.nodes;
        writeln!(out, "{n0},{n1},{n2},{}", von_mises(stress))?;
    }

    out.flush()?;
    Ok(())
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `results` - The post-solve mesh and fields
/// * `nodes_output` - The filename of the output nodes csv
/// * `elements_output` - The filename of the output elements csv
pub fn csv_output(results: &Results, nodes_output: &str, elements_output: &str) -> Result<()> {
    let nodes_file = std::fs::File::create(nodes_output).map_err(|err| {
        BracketError::PostProcessor(format!("Failed to create {nodes_output}: {err}"))
    })?;
    let elements_file = std::fs::File::create(elements_output).map_err(|err| {
        BracketError::PostProcessor(format!("Failed to create {elements_output}: {err}"))
    })?;

    write_nodes(results, nodes_file)?;
    write_elements(results, elements_file)?;

    info!("wrote output to {} and {}", nodes_output, elements_output);

    Ok(())
}
