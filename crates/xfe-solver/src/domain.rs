//! The analysis domain: node and element arenas, constraints and load
//! patterns.
//!
//! Nodes and elements live in index-based arenas owned by [`Domain`];
//! elements refer to nodes through [`NodeId`] only. Every change to the
//! set of active DOFs (nodes, elements, constraints, prescribed motions,
//! element activation) bumps the *change stamp*, which tells the DOF map
//! that its equation numbers are stale.

use std::collections::{BTreeMap, HashMap, HashSet};

use nalgebra::{DVector, Vector3};
use rayon::prelude::*;
use xfe_io::{DataSlots, RestartState};

use crate::boundary_conditions::{LoadPattern, SpConstraint};
use crate::elements::Element;
use crate::error::{Result, SolverError};

/// Index of a node in the domain arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Index of an element in the domain arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub usize);

const SLOT_TRIAL_DISP: u16 = 0;
const SLOT_TRIAL_VEL: u16 = 1;
const SLOT_TRIAL_ACCEL: u16 = 2;
const SLOT_COMMITTED_DISP: u16 = 3;
const SLOT_COMMITTED_VEL: u16 = 4;
const SLOT_COMMITTED_ACCEL: u16 = 5;

/// A node with committed and trial response quantities.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node tag (user numbering)
    pub tag: i32,
    pub coords: Vector3<f64>,
    ndof: usize,
    pub trial_disp: DVector<f64>,
    pub trial_vel: DVector<f64>,
    pub trial_accel: DVector<f64>,
    pub committed_disp: DVector<f64>,
    pub committed_vel: DVector<f64>,
    pub committed_accel: DVector<f64>,
    /// Applied nodal load at the current pseudo-time
    pub load: DVector<f64>,
    /// Lumped nodal mass, applied to every DOF
    pub mass: Option<f64>,
    pub reaction: DVector<f64>,
}

impl Node {
    pub fn new(tag: i32, coords: Vector3<f64>, ndof: usize) -> Self {
        let zeros = DVector::zeros(ndof);
        Self {
            tag,
            coords,
            ndof,
            trial_disp: zeros.clone(),
            trial_vel: zeros.clone(),
            trial_accel: zeros.clone(),
            committed_disp: zeros.clone(),
            committed_vel: zeros.clone(),
            committed_accel: zeros.clone(),
            load: zeros.clone(),
            mass: None,
            reaction: zeros,
        }
    }

    pub fn ndof(&self) -> usize {
        self.ndof
    }

    /// Displacement increment since the last commit.
    pub fn incremental_disp(&self) -> DVector<f64> {
        &self.trial_disp - &self.committed_disp
    }

    pub fn commit(&mut self) {
        self.committed_disp.copy_from(&self.trial_disp);
        self.committed_vel.copy_from(&self.trial_vel);
        self.committed_accel.copy_from(&self.trial_accel);
    }

    pub fn revert(&mut self) {
        self.trial_disp.copy_from(&self.committed_disp);
        self.trial_vel.copy_from(&self.committed_vel);
        self.trial_accel.copy_from(&self.committed_accel);
    }

    pub fn revert_to_start(&mut self) {
        for v in [
            &mut self.trial_disp,
            &mut self.trial_vel,
            &mut self.trial_accel,
            &mut self.committed_disp,
            &mut self.committed_vel,
            &mut self.committed_accel,
            &mut self.load,
            &mut self.reaction,
        ] {
            v.fill(0.0);
        }
    }

    pub fn send_state(&self) -> DataSlots {
        let mut slots = DataSlots::new();
        slots.put(SLOT_TRIAL_DISP, self.trial_disp.as_slice());
        slots.put(SLOT_TRIAL_VEL, self.trial_vel.as_slice());
        slots.put(SLOT_TRIAL_ACCEL, self.trial_accel.as_slice());
        slots.put(SLOT_COMMITTED_DISP, self.committed_disp.as_slice());
        slots.put(SLOT_COMMITTED_VEL, self.committed_vel.as_slice());
        slots.put(SLOT_COMMITTED_ACCEL, self.committed_accel.as_slice());
        slots
    }

    pub fn recv_state(&mut self, slots: &DataSlots) -> Result<()> {
        let n = self.ndof;
        let read = |slot| -> Result<DVector<f64>> {
            Ok(DVector::from_column_slice(slots.require(slot, n)?))
        };
        let trial_disp = read(SLOT_TRIAL_DISP)?;
        let trial_vel = read(SLOT_TRIAL_VEL)?;
        let trial_accel = read(SLOT_TRIAL_ACCEL)?;
        let committed_disp = read(SLOT_COMMITTED_DISP)?;
        let committed_vel = read(SLOT_COMMITTED_VEL)?;
        let committed_accel = read(SLOT_COMMITTED_ACCEL)?;
        self.trial_disp = trial_disp;
        self.trial_vel = trial_vel;
        self.trial_accel = trial_accel;
        self.committed_disp = committed_disp;
        self.committed_vel = committed_vel;
        self.committed_accel = committed_accel;
        Ok(())
    }
}

/// Gathers a nodal field into element DOF order.
pub fn gather_element_vector(
    nodes: &[Node],
    element: &dyn Element,
    field: impl Fn(&Node) -> &DVector<f64>,
) -> DVector<f64> {
    let per_node = element.dofs_per_node();
    let mut out = DVector::zeros(element.num_dofs());
    for (a, id) in element.nodes().iter().enumerate() {
        let values = field(&nodes[id.0]);
        for i in 0..per_node {
            out[a * per_node + i] = values[i];
        }
    }
    out
}

/// Complete analysis domain.
#[derive(Debug, Default)]
pub struct Domain {
    nodes: Vec<Node>,
    node_lookup: HashMap<i32, NodeId>,
    elements: Vec<Box<dyn Element>>,
    active: Vec<bool>,
    element_lookup: HashMap<i32, ElementId>,
    constraints: Vec<SpConstraint>,
    patterns: Vec<LoadPattern>,
    time: f64,
    committed_time: f64,
    change_stamp: u64,
}

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    fn domain_changed(&mut self) {
        self.change_stamp += 1;
    }

    /// Incremented on every change of the active DOF set.
    pub fn change_stamp(&self) -> u64 {
        self.change_stamp
    }

    // --- nodes ---

    pub fn add_node(&mut self, tag: i32, coords: Vector3<f64>, ndof: usize) -> Result<NodeId> {
        if self.node_lookup.contains_key(&tag) {
            return Err(SolverError::Domain(format!("duplicate node tag {tag}")));
        }
        if ndof == 0 {
            return Err(SolverError::Domain(format!("node {tag} has no DOFs")));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(tag, coords, ndof));
        self.node_lookup.insert(tag, id);
        self.domain_changed();
        Ok(id)
    }

    pub fn node_id(&self, tag: i32) -> Result<NodeId> {
        self.node_lookup
            .get(&tag)
            .copied()
            .ok_or_else(|| SolverError::Domain(format!("node {tag} not found")))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_by_tag(&self, tag: i32) -> Option<&Node> {
        self.node_lookup.get(&tag).map(|id| &self.nodes[id.0])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn set_nodal_mass(&mut self, tag: i32, mass: f64) -> Result<()> {
        let id = self.node_id(tag)?;
        self.nodes[id.0].mass = Some(mass);
        self.domain_changed();
        Ok(())
    }

    // --- elements ---

    pub fn add_element(&mut self, element: Box<dyn Element>) -> Result<ElementId> {
        let tag = element.tag();
        if self.element_lookup.contains_key(&tag) {
            return Err(SolverError::Domain(format!("duplicate element tag {tag}")));
        }
        for id in element.nodes() {
            let node = self.nodes.get(id.0).ok_or_else(|| {
                SolverError::Domain(format!("element {tag} references unknown node index {}", id.0))
            })?;
            if node.ndof() != element.dofs_per_node() {
                return Err(SolverError::Domain(format!(
                    "element {tag}: node {} has {} DOFs, element expects {}",
                    node.tag,
                    node.ndof(),
                    element.dofs_per_node()
                )));
            }
        }
        let id = ElementId(self.elements.len());
        self.elements.push(element);
        self.active.push(true);
        self.element_lookup.insert(tag, id);
        self.domain_changed();
        Ok(id)
    }

    pub fn element_id(&self, tag: i32) -> Result<ElementId> {
        self.element_lookup
            .get(&tag)
            .copied()
            .ok_or_else(|| SolverError::Domain(format!("element {tag} not found")))
    }

    pub fn element(&self, id: ElementId) -> &dyn Element {
        self.elements[id.0].as_ref()
    }

    pub fn element_by_tag(&self, tag: i32) -> Option<&dyn Element> {
        self.element_lookup
            .get(&tag)
            .map(|id| self.elements[id.0].as_ref())
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn is_active(&self, id: ElementId) -> bool {
        self.active[id.0]
    }

    /// Active elements in arena order.
    pub fn active_elements(&self) -> impl Iterator<Item = (ElementId, &dyn Element)> + '_ {
        self.elements
            .iter()
            .enumerate()
            .filter(|(i, _)| self.active[*i])
            .map(|(i, e)| (ElementId(i), e.as_ref()))
    }

    /// Removes an element from the analysis without deleting it.
    pub fn deactivate_element(&mut self, tag: i32) -> Result<()> {
        let id = self.element_id(tag)?;
        if self.active[id.0] {
            self.active[id.0] = false;
            self.domain_changed();
        }
        Ok(())
    }

    pub fn activate_element(&mut self, tag: i32) -> Result<()> {
        let id = self.element_id(tag)?;
        if !self.active[id.0] {
            self.active[id.0] = true;
            self.domain_changed();
        }
        Ok(())
    }

    // --- constraints and loads ---

    fn check_dof(&self, node: i32, dof: usize) -> Result<NodeId> {
        let id = self.node_id(node)?;
        let ndof = self.nodes[id.0].ndof();
        if dof >= ndof {
            return Err(SolverError::Domain(format!(
                "node {node} has {ndof} DOFs, DOF {dof} does not exist"
            )));
        }
        Ok(id)
    }

    /// Adds a single-point constraint, replacing an existing one on the
    /// same DOF.
    pub fn fix(&mut self, constraint: SpConstraint) -> Result<()> {
        self.check_dof(constraint.node, constraint.dof)?;
        self.constraints
            .retain(|c| c.dof_id() != constraint.dof_id());
        self.constraints.push(constraint);
        self.domain_changed();
        Ok(())
    }

    /// Returns whether a constraint was removed.
    pub fn remove_constraint(&mut self, node: i32, dof: usize) -> bool {
        let before = self.constraints.len();
        self.constraints.retain(|c| !(c.node == node && c.dof == dof));
        let removed = self.constraints.len() != before;
        if removed {
            self.domain_changed();
        }
        removed
    }

    pub fn constraints(&self) -> &[SpConstraint] {
        &self.constraints
    }

    pub fn add_pattern(&mut self, pattern: LoadPattern) -> Result<()> {
        if self.patterns.iter().any(|p| p.tag == pattern.tag) {
            return Err(SolverError::Domain(format!(
                "duplicate load pattern tag {}",
                pattern.tag
            )));
        }
        pattern.series.validate()?;
        for load in &pattern.nodal_loads {
            let id = self.node_id(load.node)?;
            if load.values.len() != self.nodes[id.0].ndof() {
                return Err(SolverError::Domain(format!(
                    "pattern {}: load on node {} has {} components, node has {} DOFs",
                    pattern.tag,
                    load.node,
                    load.values.len(),
                    self.nodes[id.0].ndof()
                )));
            }
        }
        for set in &pattern.element_loads {
            for &tag in &set.elements {
                self.element_id(tag)?;
            }
        }
        for sp in &pattern.prescribed_displacements {
            self.check_dof(sp.node, sp.dof)?;
        }
        self.patterns.push(pattern);
        self.domain_changed();
        Ok(())
    }

    pub fn remove_pattern(&mut self, tag: i32) -> Option<LoadPattern> {
        let index = self.patterns.iter().position(|p| p.tag == tag)?;
        self.domain_changed();
        Some(self.patterns.remove(index))
    }

    pub fn patterns(&self) -> &[LoadPattern] {
        &self.patterns
    }

    /// DOFs without an equation: constraints and prescribed motions.
    pub fn constrained_dofs(&self) -> HashSet<(NodeId, usize)> {
        let mut set = HashSet::new();
        for c in &self.constraints {
            if let Some(&id) = self.node_lookup.get(&c.node) {
                set.insert((id, c.dof));
            }
        }
        for sp in self.patterns.iter().flat_map(|p| &p.prescribed_displacements) {
            if let Some(&id) = self.node_lookup.get(&sp.node) {
                set.insert((id, sp.dof));
            }
        }
        set
    }

    // --- time and state ---

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn committed_time(&self) -> f64 {
        self.committed_time
    }

    /// Sets the pseudo-time and evaluates every load pattern at it:
    /// nodal and element loads are rebuilt from scratch and constrained
    /// DOFs receive their prescribed trial displacement.
    pub fn apply_loads(&mut self, time: f64) -> Result<()> {
        self.time = time;
        for node in &mut self.nodes {
            node.load.fill(0.0);
        }
        for element in &mut self.elements {
            element.zero_load();
        }

        for pattern in &self.patterns {
            let factor = pattern.series.factor(time);
            for load in &pattern.nodal_loads {
                let id = self.node_lookup[&load.node];
                let node = &mut self.nodes[id.0];
                for (slot, value) in node.load.iter_mut().zip(&load.values) {
                    *slot += factor * value;
                }
            }
            for set in &pattern.element_loads {
                for tag in &set.elements {
                    let id = self.element_lookup[tag];
                    self.elements[id.0].add_load(&set.load, factor)?;
                }
            }
            for sp in &pattern.prescribed_displacements {
                let id = self.node_lookup[&sp.node];
                self.nodes[id.0].trial_disp[sp.dof] = factor * sp.value;
            }
        }
        for c in &self.constraints {
            let id = self.node_lookup[&c.node];
            self.nodes[id.0].trial_disp[c.dof] = c.value;
        }
        Ok(())
    }

    /// Pushes the nodes' trial displacements into every active element.
    /// Elements are independent here, so the loop runs on the rayon pool.
    pub fn update_elements(&mut self) -> Result<()> {
        let nodes = &self.nodes;
        self.elements
            .par_iter_mut()
            .zip(self.active.par_iter())
            .filter(|(_, active)| **active)
            .try_for_each(|(element, _)| element.update(nodes))
    }

    pub fn set_time_increment(&mut self, dt: f64) {
        for element in &mut self.elements {
            element.set_time_increment(dt);
        }
    }

    /// Commits every element and node, or nothing when any integration
    /// point still holds a failed update.
    pub fn commit(&mut self) -> Result<()> {
        if let Some(element) = self.elements.iter().find(|e| e.has_failed_point()) {
            return Err(SolverError::CorruptState(format!(
                "element {} has a failed integration point, revert before committing",
                element.tag()
            )));
        }
        for element in &mut self.elements {
            element.commit_state()?;
        }
        for node in &mut self.nodes {
            node.commit();
        }
        self.committed_time = self.time;
        Ok(())
    }

    pub fn revert_to_last_commit(&mut self) -> Result<()> {
        for element in &mut self.elements {
            element.revert_to_last_commit()?;
        }
        for node in &mut self.nodes {
            node.revert();
        }
        self.time = self.committed_time;
        Ok(())
    }

    pub fn revert_to_start(&mut self) -> Result<()> {
        for element in &mut self.elements {
            element.revert_to_start()?;
            element.zero_load();
        }
        for node in &mut self.nodes {
            node.revert_to_start();
        }
        self.time = 0.0;
        self.committed_time = 0.0;
        Ok(())
    }

    /// Nodal reactions: element resisting forces minus applied nodal
    /// loads, optionally with inertia forces. At free DOFs in equilibrium
    /// this is zero; at constrained DOFs it is the support reaction.
    pub fn calculate_reactions(&mut self, include_inertia: bool) {
        for node in &mut self.nodes {
            node.reaction.fill(0.0);
            node.reaction -= &node.load;
            if include_inertia && let Some(mass) = node.mass {
                node.reaction += &node.trial_accel * mass;
            }
        }
        for (element, _) in self.elements.iter().zip(&self.active).filter(|(_, a)| **a) {
            let mut force = element.resisting_force();
            if include_inertia {
                let accel = gather_element_vector(&self.nodes, element.as_ref(), |n| &n.trial_accel);
                force += element.mass() * accel;
            }
            let per_node = element.dofs_per_node();
            for (a, id) in element.nodes().iter().enumerate() {
                let node = &mut self.nodes[id.0];
                for i in 0..per_node {
                    node.reaction[i] += force[a * per_node + i];
                }
            }
        }
    }

    /// Snapshot of all nodal and integration-point state.
    pub fn checkpoint(&self, step: usize) -> RestartState {
        let mut state = RestartState {
            step,
            time: self.time,
            committed_time: self.committed_time,
            ..Default::default()
        };
        for node in &self.nodes {
            state.nodes.insert(node.tag, node.send_state());
        }
        for element in &self.elements {
            state.elements.insert(element.tag(), element.send_state());
        }
        state
            .metadata
            .insert("change_stamp".into(), self.change_stamp.to_string());
        state
    }

    /// Restores a snapshot taken from a domain with the same model.
    pub fn restore(&mut self, state: &RestartState) -> Result<()> {
        let mut nodes: BTreeMap<i32, &DataSlots> = state.nodes.iter().map(|(k, v)| (*k, v)).collect();
        for node in &mut self.nodes {
            let slots = nodes.remove(&node.tag).ok_or_else(|| {
                SolverError::CorruptState(format!("checkpoint has no record for node {}", node.tag))
            })?;
            node.recv_state(slots)?;
        }
        for element in &mut self.elements {
            let slots = state.elements.get(&element.tag()).ok_or_else(|| {
                SolverError::CorruptState(format!(
                    "checkpoint has no record for element {}",
                    element.tag()
                ))
            })?;
            element.recv_state(slots)?;
        }
        if let Some(tag) = nodes.keys().next() {
            return Err(SolverError::CorruptState(format!(
                "checkpoint node {tag} is not in the domain"
            )));
        }
        self.time = state.time;
        self.committed_time = state.committed_time;
        Ok(())
    }
}
