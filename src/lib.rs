//! Plane stress finite element analysis of a bracket.
//!
//! A part outline is refined and triangulated into constant strain
//! triangles, boundary conditions are attached to mesh nodes, and the
//! assembled system is solved for nodal displacements and stresses.

pub mod datatypes;
pub mod element;
pub mod error;
pub mod geometry;
pub mod input;
pub mod mesher;
pub mod post_processor;
pub mod solver;
pub mod stress;
pub mod triangulation;

pub use datatypes::{BoundaryAssignment, Geometry, ModelMetadata, SolverKind, Vertex};
pub use error::{BracketError, Result};
pub use mesher::{build_mesh, ClipMode, Mesh, MeshBuilder};
pub use solver::{solve, Solution};
pub use stress::{element_stresses, nodal_von_mises, triangle_stresses};
