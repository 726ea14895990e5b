//! DOF groups and global equation numbering.
//!
//! A [`DofMap`] is built from a [`Domain`] and stays valid until the
//! domain's change stamp moves. Free DOFs receive contiguous equation
//! numbers starting at 0 in node-arena order; constrained DOFs and DOFs
//! of nodes that no active element (and no nodal mass) touches get none.

use nalgebra::DVector;

use crate::domain::{Domain, ElementId, Node, NodeId};

/// Equation numbers of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct DofGroup {
    pub tag: usize,
    pub node: NodeId,
    equations: Vec<Option<usize>>,
}

impl DofGroup {
    pub fn equations(&self) -> &[Option<usize>] {
        &self.equations
    }

    pub fn equation(&self, dof: usize) -> Option<usize> {
        self.equations.get(dof).copied().flatten()
    }
}

/// Equation numbering for one state of the domain.
#[derive(Debug, Clone, Default)]
pub struct DofMap {
    groups: Vec<DofGroup>,
    element_equations: Vec<Vec<Option<usize>>>,
    num_equations: usize,
    stamp: u64,
}

impl DofMap {
    /// Simple numberer: walks nodes in arena order.
    pub fn build(domain: &Domain) -> Self {
        let nodes = domain.nodes();
        let constrained = domain.constrained_dofs();

        let mut connected: Vec<bool> = nodes.iter().map(|n| n.mass.is_some()).collect();
        for (_, element) in domain.active_elements() {
            for id in element.nodes() {
                connected[id.0] = true;
            }
        }

        let mut next = 0;
        let mut groups = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            let id = NodeId(i);
            let equations = (0..node.ndof())
                .map(|dof| {
                    if !connected[i] || constrained.contains(&(id, dof)) {
                        None
                    } else {
                        next += 1;
                        Some(next - 1)
                    }
                })
                .collect();
            groups.push(DofGroup {
                tag: i,
                node: id,
                equations,
            });
        }

        let element_equations = (0..domain.num_elements())
            .map(|i| {
                let id = ElementId(i);
                if !domain.is_active(id) {
                    return Vec::new();
                }
                domain
                    .element(id)
                    .nodes()
                    .iter()
                    .flat_map(|n| groups[n.0].equations.iter().copied())
                    .collect()
            })
            .collect();

        Self {
            groups,
            element_equations,
            num_equations: next,
            stamp: domain.change_stamp(),
        }
    }

    /// Whether this numbering still matches the domain.
    pub fn is_current(&self, domain: &Domain) -> bool {
        self.stamp == domain.change_stamp() && self.groups.len() == domain.nodes().len()
    }

    pub fn num_equations(&self) -> usize {
        self.num_equations
    }

    pub fn groups(&self) -> &[DofGroup] {
        &self.groups
    }

    pub fn group(&self, node: NodeId) -> &DofGroup {
        &self.groups[node.0]
    }

    pub fn equation(&self, node: NodeId, dof: usize) -> Option<usize> {
        self.groups.get(node.0).and_then(|g| g.equation(dof))
    }

    /// Element DOFs (node-major) mapped to equations; empty for inactive
    /// elements.
    pub fn element_equations(&self, element: ElementId) -> &[Option<usize>] {
        &self.element_equations[element.0]
    }

    /// Collects a nodal field into a global equation vector.
    pub fn gather(&self, nodes: &[Node], field: impl Fn(&Node) -> &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.num_equations);
        for (group, node) in self.groups.iter().zip(nodes) {
            let values = field(node);
            for (dof, eq) in group.equations.iter().enumerate() {
                if let Some(eq) = eq {
                    out[*eq] = values[dof];
                }
            }
        }
        out
    }

    /// Writes a global equation vector into a nodal field, leaving DOFs
    /// without an equation untouched.
    pub fn scatter(
        &self,
        nodes: &mut [Node],
        values: &DVector<f64>,
        mut field: impl FnMut(&mut Node) -> &mut DVector<f64>,
    ) {
        for (group, node) in self.groups.iter().zip(nodes.iter_mut()) {
            let target = field(node);
            for (dof, eq) in group.equations.iter().enumerate() {
                if let Some(eq) = eq {
                    target[dof] = values[*eq];
                }
            }
        }
    }
}
