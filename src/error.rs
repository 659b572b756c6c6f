use thiserror::Error;

/// Errors raised by the meshing, solving and post-processing stages
#[derive(Error, Debug)]
pub enum BracketError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("No mesh node at ({x}, {y})")]
    NodeNotFound { x: f64, y: f64 },

    #[error("Conflicting boundary condition on dof {dof}: load = {load}, moving = {moving}")]
    BoundaryConditionConflict { dof: usize, load: f64, moving: bool },

    #[error("Singular element {nodes:?}: area {area:e}")]
    SingularElement { nodes: [usize; 3], area: f64 },

    #[error("Singular system: {0}")]
    SingularSystem(String),

    #[error("Invalid material: {0}")]
    InvalidMaterial(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Post processor error: {0}")]
    PostProcessor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BracketError>;
