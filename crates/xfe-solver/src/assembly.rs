//! Global system assembly.
//!
//! Element contributions are scatter-added into a [`GlobalSystem`]:
//! - the tangent is accumulated as COO triplets (duplicates sum on
//!   conversion to CSR/dense)
//! - the residual is a dense vector over equation numbers
//!
//! ## Assembly Process
//!
//! 1. `reset` the system for the current equation count
//! 2. Compute element matrices/vectors in parallel (rayon), one per
//!    active element
//! 3. Merge them sequentially in element-arena order, skipping DOFs
//!    without an equation
//!
//! Step 3 only ever adds, so any traversal order gives the same system
//! up to floating-point summation order.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

use crate::backend::{LinearSystemData, TangentTriplets};
use crate::dof_map::DofMap;
use crate::domain::{Domain, ElementId, Node};
use crate::elements::Element;
use crate::error::{Result, SolverError};

/// Assembled tangent and residual for one formation pass.
#[derive(Debug, Clone, Default)]
pub struct GlobalSystem {
    num_equations: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
    residual: DVector<f64>,
}

impl GlobalSystem {
    pub fn new(num_equations: usize) -> Self {
        Self {
            num_equations,
            residual: DVector::zeros(num_equations),
            ..Default::default()
        }
    }

    pub fn num_equations(&self) -> usize {
        self.num_equations
    }

    /// Zeroes the tangent and the residual, resizing if needed.
    pub fn reset(&mut self, num_equations: usize) {
        self.reset_tangent(num_equations);
        self.reset_residual(num_equations);
    }

    pub fn reset_tangent(&mut self, num_equations: usize) {
        self.num_equations = num_equations;
        self.rows.clear();
        self.cols.clear();
        self.values.clear();
    }

    pub fn reset_residual(&mut self, num_equations: usize) {
        self.num_equations = num_equations;
        if self.residual.len() == num_equations {
            self.residual.fill(0.0);
        } else {
            self.residual = DVector::zeros(num_equations);
        }
    }

    /// Adds `factor × m` at the rows/columns given by `equations`.
    pub fn add_matrix(&mut self, equations: &[Option<usize>], m: &DMatrix<f64>, factor: f64) {
        for (i, row) in equations.iter().enumerate() {
            let Some(row) = row else { continue };
            for (j, col) in equations.iter().enumerate() {
                let Some(col) = col else { continue };
                let value = m[(i, j)];
                if value != 0.0 {
                    self.rows.push(*row);
                    self.cols.push(*col);
                    self.values.push(factor * value);
                }
            }
        }
    }

    pub fn add_diagonal(&mut self, equation: usize, value: f64) {
        self.rows.push(equation);
        self.cols.push(equation);
        self.values.push(value);
    }

    pub fn add_vector(&mut self, equations: &[Option<usize>], v: &DVector<f64>, factor: f64) {
        for (i, eq) in equations.iter().enumerate() {
            if let Some(eq) = eq {
                self.residual[*eq] += factor * v[i];
            }
        }
    }

    pub fn add_global_vector(&mut self, v: &DVector<f64>, factor: f64) {
        self.residual.axpy(factor, v, 1.0);
    }

    pub fn residual(&self) -> &DVector<f64> {
        &self.residual
    }

    /// Number of stored triplets (before duplicate summation).
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn triplets(&self) -> TangentTriplets {
        TangentTriplets {
            size: self.num_equations,
            rows: self.rows.clone(),
            cols: self.cols.clone(),
            values: self.values.clone(),
        }
    }

    pub fn to_csr(&self) -> Result<CsrMatrix<f64>> {
        let coo = CooMatrix::try_from_triplets(
            self.num_equations,
            self.num_equations,
            self.rows.clone(),
            self.cols.clone(),
            self.values.clone(),
        )
        .map_err(|e| SolverError::LinearSolve(format!("invalid tangent triplets: {e:?}")))?;
        Ok(CsrMatrix::from(&coo))
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut k = DMatrix::zeros(self.num_equations, self.num_equations);
        for ((r, c), v) in self.rows.iter().zip(&self.cols).zip(&self.values) {
            k[(*r, *c)] += v;
        }
        k
    }

    /// Packages tangent and residual for a backend solve.
    pub fn linear_system(&self) -> LinearSystemData {
        LinearSystemData {
            tangent: self.triplets(),
            unbalance: self.residual.clone(),
        }
    }
}

/// Scatter-adds one matrix per active element.
pub fn assemble_element_matrices<F>(system: &mut GlobalSystem, domain: &Domain, map: &DofMap, form: F)
where
    F: Fn(&dyn Element) -> DMatrix<f64> + Sync,
{
    let active: Vec<(ElementId, &dyn Element)> = domain.active_elements().collect();
    let contributions: Vec<(ElementId, DMatrix<f64>)> = active
        .into_par_iter()
        .map(|(id, element)| (id, form(element)))
        .collect();
    for (id, k) in &contributions {
        system.add_matrix(map.element_equations(*id), k, 1.0);
    }
}

/// Scatter-adds one vector per active element into the residual.
pub fn assemble_element_vectors<F>(system: &mut GlobalSystem, domain: &Domain, map: &DofMap, form: F)
where
    F: Fn(&dyn Element, &[Node]) -> DVector<f64> + Sync,
{
    let nodes = domain.nodes();
    let active: Vec<(ElementId, &dyn Element)> = domain.active_elements().collect();
    let contributions: Vec<(ElementId, DVector<f64>)> = active
        .into_par_iter()
        .map(|(id, element)| (id, form(element, nodes)))
        .collect();
    for (id, p) in &contributions {
        system.add_vector(map.element_equations(*id), p, 1.0);
    }
}

/// Adds `factor × m` on the diagonal of every equation of nodes with a
/// lumped mass.
pub fn assemble_nodal_mass(system: &mut GlobalSystem, domain: &Domain, map: &DofMap, factor: f64) {
    for (group, node) in map.groups().iter().zip(domain.nodes()) {
        let Some(mass) = node.mass else { continue };
        for eq in group.equations().iter().flatten() {
            system.add_diagonal(*eq, factor * mass);
        }
    }
}

/// Adds the applied nodal loads to the residual.
pub fn assemble_nodal_loads(system: &mut GlobalSystem, domain: &Domain, map: &DofMap) {
    let loads = map.gather(domain.nodes(), |n| &n.load);
    system.add_global_vector(&loads, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_entries_add() {
        let mut system = GlobalSystem::new(2);
        let k = DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 2.0]);
        system.add_matrix(&[Some(0), Some(1)], &k, 1.0);
        system.add_matrix(&[Some(1), Some(0)], &k, 0.5);

        let dense = system.to_dense();
        assert_eq!(dense[(0, 0)], 3.0);
        assert_eq!(dense[(0, 1)], -1.5);
        assert_eq!(dense[(1, 1)], 3.0);

        let csr = system.to_csr().unwrap();
        assert_eq!(DMatrix::from(&csr), dense);
    }

    #[test]
    fn missing_equations_are_skipped() {
        let mut system = GlobalSystem::new(1);
        let k = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 5.0]);
        system.add_matrix(&[None, Some(0)], &k, 1.0);
        system.add_vector(&[None, Some(0)], &DVector::from_vec(vec![7.0, -3.0]), 2.0);

        assert_eq!(system.nnz(), 1);
        assert_eq!(system.to_dense()[(0, 0)], 5.0);
        assert_eq!(system.residual()[0], -6.0);
    }

    #[test]
    fn reset_clears_previous_formation() {
        let mut system = GlobalSystem::new(2);
        system.add_diagonal(1, 3.0);
        system.add_global_vector(&DVector::from_vec(vec![1.0, 1.0]), 1.0);
        system.reset(3);

        assert_eq!(system.nnz(), 0);
        assert_eq!(system.residual().len(), 3);
        assert_eq!(system.residual().norm(), 0.0);
    }

    #[test]
    fn linear_system_carries_residual() {
        let mut system = GlobalSystem::new(2);
        system.add_diagonal(0, 2.0);
        system.add_diagonal(1, 4.0);
        system.add_vector(&[Some(1)], &DVector::from_vec(vec![8.0]), 1.0);
        let data = system.linear_system();
        assert_eq!(data.num_equations(), 2);
        assert_eq!(data.tangent.nnz(), 2);
        assert_eq!(data.unbalance[1], 8.0);
    }
}
