use bracket_fem::{
    build_mesh,
    mesher::{default_bracket, refine},
    solver::assemble,
    solve, BracketError, ClipMode, Mesh, MeshBuilder, ModelMetadata, Vertex,
};

fn bracket_mesh() -> Mesh {
    build_mesh(&[default_bracket()], 400.0).unwrap()
}

fn metadata() -> ModelMetadata {
    ModelMetadata::new(2.1e5, 0.3, 5.0, 400.0).unwrap()
}

fn supported_bracket() -> (Mesh, [usize; 2]) {
    let mut mesh = bracket_mesh();
    let top = mesh.set_fixed(&Vertex::new(200.0, 900.0)).unwrap();
    let bottom = mesh.set_fixed(&Vertex::new(200.0, 600.0)).unwrap();
    mesh.set_load(&Vertex::new(3200.0, 600.0), 1000.0).unwrap();
    mesh.set_load(&Vertex::new(2600.0, 580.0), 1000.0).unwrap();
    (mesh, [top, bottom])
}

#[test]
fn test_loaded_bracket_solves() {
    let (mesh, supports) = supported_bracket();
    let solution = solve(&mesh, &metadata()).unwrap();

    assert_eq!(solution.displacements.len(), mesh.dof_count());
    assert!(solution.displacements.iter().all(|u| u.is_finite()));
    assert!(solution.displacements.iter().any(|u| *u != 0.0));

    for node in supports {
        assert_eq!(solution.node_displacement(node), (0.0, 0.0));
    }
}

#[test]
fn test_bracket_mesh_is_reproducible() {
    let a = bracket_mesh();
    let b = bracket_mesh();

    assert_eq!(a.nodes(), b.nodes());
    assert_eq!(a.triangle_indices(), b.triangle_indices());
}

#[test]
fn test_bracket_outline_is_meshed() {
    let mesh = bracket_mesh();

    for corner in default_bracket() {
        assert!(mesh.find_node(&corner).is_ok());
    }
    for (i, node) in mesh.nodes().iter().enumerate() {
        assert_eq!(node.index, i);
        assert!(!mesh.triangles_of(i).is_empty());
    }
}

fn mesh_area(mesh: &Mesh) -> f64 {
    mesh.triangles()
        .iter()
        .map(|t| t.area(mesh.nodes()).unwrap())
        .sum()
}

#[test]
fn test_polygon_clip_approximates_outline() {
    let outline = default_bracket();
    let outline_area = 0.5
        * (0..outline.len())
            .map(|i| {
                let a = outline[i];
                let b = outline[(i + 1) % outline.len()];
                a.x * b.y - b.x * a.y
            })
            .sum::<f64>()
            .abs();

    let hull_area = mesh_area(&bracket_mesh());
    let clipped = MeshBuilder::new(400.0)
        .polygon(outline)
        .clip(ClipMode::Polygons)
        .build()
        .unwrap();
    let clipped_area = mesh_area(&clipped);

    assert!(clipped_area < hull_area);
    assert!((clipped_area - outline_area).abs() / outline_area < 2e-3);
}

#[test]
fn test_bracket_refinement_is_idempotent() {
    let once = refine(&default_bracket(), 400.0).unwrap();
    let twice = refine(&once, 400.0).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_bracket_stiffness_is_symmetric() {
    let mesh = bracket_mesh();
    let stiffness = assemble(&mesh, &metadata()).unwrap();

    let scale = stiffness.amax();
    for i in 0..stiffness.nrows() {
        assert!(stiffness[(i, i)] >= 0.0);
        for j in 0..i {
            assert!((stiffness[(i, j)] - stiffness[(j, i)]).abs() <= 1e-9 * scale);
        }
    }
}

#[test]
fn test_loaded_support_is_a_conflict() {
    let (mut mesh, _) = supported_bracket();
    mesh.set_load(&Vertex::new(200.0, 900.0), 10.0).unwrap();

    assert!(matches!(
        solve(&mesh, &metadata()),
        Err(BracketError::BoundaryConditionConflict { .. })
    ));
}

#[test]
fn test_missing_node_is_reported() {
    let mut mesh = bracket_mesh();

    assert!(matches!(
        mesh.set_fixed(&Vertex::new(-5.0, -5.0)),
        Err(BracketError::NodeNotFound { .. })
    ));
}
