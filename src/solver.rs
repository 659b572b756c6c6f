use indicatif::ProgressBar;
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{convert::serial::convert_coo_dense, CooMatrix};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        ArgminFloat, Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};

use crate::{
    datatypes::{BoundaryConditions, ModelMetadata, SolverKind, DOF},
    error::{BracketError, Result},
    mesher::Mesh,
};

pub const MAX_CG_ITER: u64 = 1e7 as u64;
pub const TARGET_CG_COST: f64 = 1e-4;

/// Smallest accepted ratio between the smallest and largest LU pivot
pub const SINGULAR_PIVOT_RATIO: f64 = 1e-12;

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a DMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> std::result::Result<Self::Output, Error> {
        Ok((self.a * DVector::from_column_slice(x)).data.as_vec().clone())
    }
}

/// Observer bar for argmin solver
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    start_mag: Option<f64>,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new() -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(1000),
            start_mag: None,
            final_mag: TARGET_CG_COST.log10().floor(),
        }
    }

    /// argmin only exposes its float through Debug and Display
    fn argmin_float_to_f64<F: ArgminFloat>(&self, value: F) -> Option<f64> {
        format!("{:?}", value).parse().ok()
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> std::result::Result<(), Error> {
        let cost = match self.argmin_float_to_f64(state.get_cost()) {
            Some(c) if c > 0.0 && c.is_finite() => c,
            _ => return Ok(()),
        };
        let cost_mag = cost.log10();
        let start_mag = *self.start_mag.get_or_insert(cost_mag);

        // progress in orders of magnitude towards the target cost
        let span = (start_mag - self.final_mag).max(f64::EPSILON);
        let fraction = ((start_mag - cost_mag) / span).clamp(0.0, 1.0);
        self.bar.set_position((1000.0 * fraction) as u64);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> std::result::Result<(), Error> {
        self.bar.finish_and_clear();
        Ok(())
    }
}

/// Solves a system of equations using the conjugate gradient method.
///
/// This function returns an approximation for x in `Ax=b`
///
/// # Arguments
/// * `a` - A square positive definite matrix
/// * `b` - A vector of the solutions to the system
///
/// # Returns
/// A DVector that represents `x` from the system
fn run_conjugate_gradient(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let b_flat: Vec<f64> = b.iter().copied().collect();
    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b_flat);
    let initial_guess: Vec<f64> = vec![0.0; b.nrows()];

    let operator = ConjugateGradientOperator { a };
    let observer = ConjugateGradientObserverBar::new();

    let res = Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(MAX_CG_ITER)
                .target_cost(TARGET_CG_COST)
        })
        .add_observer(observer, ObserverMode::NewBest)
        .run()
        .map_err(|err| BracketError::SingularSystem(format!("Conjugate Gradient error: {err}")))?;

    match &res.state().best_param {
        Some(vec) => Ok(DVector::from_vec(vec.clone())),
        None => Err(BracketError::SingularSystem(
            "Conjugate Gradient could not produce best parameter".to_owned(),
        )),
    }
}

/// Solves `Ax=b` with a dense LU factorization, rejecting singular and
/// numerically singular systems
fn run_lu(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let lu = a.clone().lu();

    let (min_pivot, max_pivot) = lu
        .u()
        .diagonal()
        .iter()
        .fold((f64::INFINITY, 0.0f64), |(lo, hi), p| {
            (lo.min(p.abs()), hi.max(p.abs()))
        });

    if !(max_pivot > 0.0) || min_pivot / max_pivot < SINGULAR_PIVOT_RATIO {
        return Err(BracketError::SingularSystem(format!(
            "pivot ratio {:e} is below {:e}; the structure may be under-constrained or the mesh too coarse",
            min_pivot / max_pivot,
            SINGULAR_PIVOT_RATIO
        )));
    }

    lu.solve(b).ok_or_else(|| {
        BracketError::SingularSystem("LU factorization is singular".to_owned())
    })
}

/// Compiles element stiffness matrices into a total stiffness matrix
///
/// Every element scatters its nine 2x2 node pair blocks; blocks landing on
/// the same global entries are summed.
///
/// # Arguments
/// * `mesh` - The mesh to assemble
/// * `model_metadata` - Material and thickness of the part
///
/// # Returns
/// A dense `2N x 2N` matrix
pub fn assemble(mesh: &Mesh, model_metadata: &ModelMetadata) -> Result<DMatrix<f64>> {
    let dofs = mesh.dof_count();
    let stress_strain_mat = model_metadata.material_matrix();
    let mut coo: CooMatrix<f64> = CooMatrix::new(dofs, dofs);

    let bar = ProgressBar::new(mesh.triangles().len() as u64);
    for element in mesh.triangles() {
        let stiffness_mat =
            element.stiffness(mesh.nodes(), &stress_strain_mat, model_metadata.part_thickness)?;

        for (local_row, node_row) in element.nodes.iter().enumerate() {
            for (local_col, node_col) in element.nodes.iter().enumerate() {
                let global_row = node_row * DOF;
                let global_col = node_col * DOF;
                let local_row = local_row * DOF;
                let local_col = local_col * DOF;

                for i in 0..DOF {
                    for j in 0..DOF {
                        coo.push(
                            global_row + i,
                            global_col + j,
                            stiffness_mat[(local_row + i, local_col + j)],
                        );
                    }
                }
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    debug!(
        "scattered {} entries into a {dofs}x{dofs} stiffness matrix",
        coo.nnz()
    );

    Ok(convert_coo_dense(&coo))
}

/// The system left after eliminating prescribed dofs
#[derive(Debug, Clone)]
pub struct ReducedSystem {
    pub matrix: DMatrix<f64>,
    pub rhs: DVector<f64>,
    pub free_dofs: Vec<usize>,
    pub fixed_dofs: Vec<usize>,
}

/// Deletes the rows and columns of prescribed dofs
///
/// The right-hand side is the known loads minus the forces caused by the
/// prescribed displacements.
///
/// # Arguments
/// * `total_stiffness_matrix` - The full stiffness matrix
/// * `boundary_conditions` - Loads and supports for every dof
pub fn reduce_system(
    total_stiffness_matrix: &DMatrix<f64>,
    boundary_conditions: &BoundaryConditions,
) -> Result<ReducedSystem> {
    let dofs = total_stiffness_matrix.nrows();
    if boundary_conditions.len() != dofs || total_stiffness_matrix.ncols() != dofs {
        return Err(BracketError::Input(format!(
            "{} boundary dofs for a {}x{} system",
            boundary_conditions.len(),
            dofs,
            total_stiffness_matrix.ncols()
        )));
    }

    let fixed_dofs = boundary_conditions.fixed_dofs()?;
    let mut is_fixed = vec![false; dofs];
    for &dof in &fixed_dofs {
        is_fixed[dof] = true;
    }
    let free_dofs: Vec<usize> = (0..dofs).filter(|&d| !is_fixed[d]).collect();

    let free_rows = total_stiffness_matrix.select_rows(free_dofs.iter());
    let matrix = free_rows.select_columns(free_dofs.iter());

    let mut rhs = DVector::from_iterator(
        free_dofs.len(),
        free_dofs.iter().map(|&d| boundary_conditions.loads[d]),
    );

    if !fixed_dofs.is_empty() {
        let known = free_rows.select_columns(fixed_dofs.iter());
        let prescribed = DVector::from_iterator(
            fixed_dofs.len(),
            fixed_dofs.iter().map(|&d| boundary_conditions.prescribed[d]),
        );
        rhs -= known * prescribed;
    }

    Ok(ReducedSystem {
        matrix,
        rhs,
        free_dofs,
        fixed_dofs,
    })
}

/// Solves a reduced system for the free displacements
pub fn solve_reduced(system: &ReducedSystem, solver: SolverKind) -> Result<DVector<f64>> {
    if system.free_dofs.is_empty() {
        return Ok(DVector::zeros(0));
    }

    let solution = match solver {
        SolverKind::Lu => run_lu(&system.matrix, &system.rhs)?,
        SolverKind::ConjugateGradient => run_conjugate_gradient(&system.matrix, &system.rhs)?,
    };

    if let Some(dof) = solution.iter().position(|u| !u.is_finite()) {
        return Err(BracketError::SingularSystem(format!(
            "non-finite displacement at reduced dof {dof}"
        )));
    }

    Ok(solution)
}

/// Scatters a reduced solution back into a full displacement vector
pub fn reconstruct(
    system: &ReducedSystem,
    solution: &DVector<f64>,
    boundary_conditions: &BoundaryConditions,
) -> DVector<f64> {
    let mut displacements = DVector::zeros(boundary_conditions.len());

    for &dof in &system.fixed_dofs {
        displacements[dof] = boundary_conditions.prescribed[dof];
    }
    for (&dof, value) in std::iter::zip(&system.free_dofs, solution.iter()) {
        displacements[dof] = *value;
    }

    displacements
}

/// Result of a static solve
#[derive(Debug, Clone)]
pub struct Solution {
    /// Displacement of every dof, `[ux0, uy0, ux1, uy1, ...]`
    pub displacements: DVector<f64>,
    /// Nodal forces `K u`; at supports these are the reactions
    pub forces: DVector<f64>,
}

impl Solution {
    pub fn node_displacement(&self, node: usize) -> (f64, f64) {
        (
            self.displacements[DOF * node],
            self.displacements[DOF * node + 1],
        )
    }
}

/// Solves for the displacements of a mesh under its boundary conditions
///
/// # Arguments
/// * `mesh` - The mesh, with supports and loads applied
/// * `model_metadata` - The model metadata
pub fn solve(mesh: &Mesh, model_metadata: &ModelMetadata) -> Result<Solution> {
    info!("building total stiffness matrix...");
    let total_stiffness_matrix = assemble(mesh, model_metadata)?;

    info!("setting up system...");
    let system = reduce_system(&total_stiffness_matrix, mesh.boundary_conditions())?;

    let start = std::time::Instant::now();
    info!(
        "solving {} unknowns with {:?}...",
        system.free_dofs.len(),
        model_metadata.solver
    );
    let solution = solve_reduced(&system, model_metadata.solver)?;
    info!(
        "solved system in {:.3} seconds",
        start.elapsed().as_secs_f32()
    );

    let displacements = reconstruct(&system, &solution, mesh.boundary_conditions());
    let forces = &total_stiffness_matrix * &displacements;

    Ok(Solution {
        displacements,
        forces,
    })
}
