use clap::Parser;
use log::{error, info, warn};

use bracket_fem::{
    datatypes::Geometry,
    element_stresses,
    input::{load_geometry_files, load_input_file},
    mesher::default_bracket,
    nodal_von_mises,
    post_processor::{csv_output, Results},
    solve, triangle_stresses, MeshBuilder, Result,
};

/// Plane stress analysis of a bracket
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Input json with metadata and boundary conditions
    input: String,

    /// Geometry files: one svg, or one csv per polygon
    geometry: Vec<String>,

    /// Where to write the node table
    #[arg(long, default_value = "nodes.csv")]
    nodes_output: String,

    /// Where to write the element table
    #[arg(long, default_value = "elements.csv")]
    elements_output: String,
}

fn run(args: &Args) -> Result<()> {
    let input = load_input_file(&args.input)?;

    let geometry = if !args.geometry.is_empty() {
        load_geometry_files(&args.geometry)?
    } else if let Some(geometry) = input.geometry.clone() {
        geometry
    } else {
        warn!("no geometry given, meshing the default bracket");
        Geometry::solid(vec![default_bracket()])
    };

    let mut mesh = MeshBuilder::new(input.metadata.max_edge_length)
        .geometry(geometry)
        .clip(input.clip.clone())
        .build()?;

    for (name, assignment) in &input.boundary_conditions {
        let node = mesh.apply(assignment)?;
        let point = assignment.point();
        info!(
            "applied {name} to node {node} near ({}, {})",
            point.x, point.y
        );
    }

    let solution = solve(&mesh, &input.metadata)?;
    let node_stresses = element_stresses(&mesh, &input.metadata, &solution.displacements)?;
    let element_stress = triangle_stresses(&mesh, &input.metadata, &solution.displacements)?;
    let nodal = nodal_von_mises(&mesh, &element_stress)?;

    let results = Results {
        mesh: &mesh,
        solution: &solution,
        node_stresses: &node_stresses,
        nodal_von_mises: &nodal,
        element_stresses: &element_stress,
    };

    csv_output(&results, &args.nodes_output, &args.elements_output)
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        error!("{err}");
        std::process::exit(1);
    }
}
