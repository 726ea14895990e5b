//! Isoparametric continuum elements.
//!
//! One generic implementation, [`ContinuumElement`], parametrised by a
//! [`ShapeFamily`]:
//! - [`Quad4`]: 4-node bilinear quadrilateral in plane strain, 2×2 Gauss
//! - [`Hex8`]: 8-node trilinear hexahedron, 2×2×2 Gauss
//!
//! Strains use the 6-component Voigt vector
//! `{ε} = [εxx, εyy, εzz, γxy, γyz, γzx]ᵀ` for both families; in plane
//! strain the out-of-plane rows of B are zero.
//!
//! Geometry (shape functions, B matrices, det J) is evaluated once at
//! construction on the reference configuration.

use std::marker::PhantomData;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use xfe_io::DataSlots;

use crate::boundary_conditions::ElementLoad;
use crate::domain::{Node, NodeId};
use crate::error::{Result, SolverError};
use crate::materials::ConstitutiveModel;
use crate::response::Response;
use crate::tensor::Tangent;

use super::gauss::tensor_rule;
use super::{Element, ElementKind};

/// Shape-function family of a linear Lagrange element.
///
/// Shape functions are products of `(1 + ξ ξₐ)/2` over the element
/// dimensions, so a family only declares its node layout.
pub trait ShapeFamily: Send + Sync + std::fmt::Debug + 'static {
    const KIND: ElementKind;
    const NUM_NODES: usize;
    /// Spatial dimension (= DOFs per node).
    const DIM: usize;
    const GAUSS_ORDER: usize = 2;

    /// Natural coordinates of the nodes.
    fn node_coords() -> &'static [[f64; 3]];

    /// Local node indices of a boundary face (edge in 2-D), ordered around it.
    fn face_nodes(face: usize) -> Option<&'static [usize]>;

    fn shape_functions(xi: &[f64; 3]) -> Vec<f64> {
        Self::node_coords()
            .iter()
            .map(|node| {
                (0..Self::DIM)
                    .map(|d| 0.5 * (1.0 + xi[d] * node[d]))
                    .product::<f64>()
            })
            .collect()
    }

    /// `∂Nₐ/∂ξ_d` for every node; components beyond `DIM` are zero.
    fn shape_derivatives(xi: &[f64; 3]) -> Vec<[f64; 3]> {
        Self::node_coords()
            .iter()
            .map(|node| {
                let mut dn = [0.0; 3];
                for (d, slot) in dn.iter_mut().enumerate().take(Self::DIM) {
                    *slot = (0..Self::DIM)
                        .map(|i| {
                            if i == d {
                                0.5 * node[i]
                            } else {
                                0.5 * (1.0 + xi[i] * node[i])
                            }
                        })
                        .product::<f64>();
                }
                dn
            })
            .collect()
    }
}

/// Bilinear quadrilateral, counter-clockwise node order.
///
/// ```text
///  4-----3
///  |     |
///  |     |
///  1-----2
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Quad4Shape;

const QUAD4_NODES: [[f64; 3]; 4] = [
    [-1.0, -1.0, 0.0],
    [1.0, -1.0, 0.0],
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
];
const QUAD4_EDGES: [[usize; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 0]];

impl ShapeFamily for Quad4Shape {
    const KIND: ElementKind = ElementKind::Quad4;
    const NUM_NODES: usize = 4;
    const DIM: usize = 2;

    fn node_coords() -> &'static [[f64; 3]] {
        &QUAD4_NODES
    }

    fn face_nodes(face: usize) -> Option<&'static [usize]> {
        QUAD4_EDGES.get(face).map(|e| e.as_slice())
    }
}

/// Trilinear hexahedron.
///
/// ```text
///        8----------7
///       /|         /|
///      / |        / |
///     5----------6  |
///     |  4-------|--3
///     | /        | /
///     |/         |/
///     1----------2
/// ```
///
/// Nodes 1–4 lie on ζ = −1, nodes 5–8 on ζ = +1.
#[derive(Debug, Clone, Copy)]
pub struct Hex8Shape;

const HEX8_NODES: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];
const HEX8_FACES: [[usize; 4]; 6] = [
    [0, 1, 2, 3],
    [4, 7, 6, 5],
    [0, 4, 5, 1],
    [1, 5, 6, 2],
    [2, 6, 7, 3],
    [3, 7, 4, 0],
];

impl ShapeFamily for Hex8Shape {
    const KIND: ElementKind = ElementKind::Hex8;
    const NUM_NODES: usize = 8;
    const DIM: usize = 3;

    fn node_coords() -> &'static [[f64; 3]] {
        &HEX8_NODES
    }

    fn face_nodes(face: usize) -> Option<&'static [usize]> {
        HEX8_FACES.get(face).map(|f| f.as_slice())
    }
}

pub type Quad4 = ContinuumElement<Quad4Shape>;
pub type Hex8 = ContinuumElement<Hex8Shape>;

/// Section data of a continuum element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolidSection {
    /// Out-of-plane thickness (2-D only)
    pub thickness: f64,
    /// Row-sum lumped instead of consistent mass
    pub lumped_mass: bool,
}

impl Default for SolidSection {
    fn default() -> Self {
        Self {
            thickness: 1.0,
            lumped_mass: false,
        }
    }
}

#[derive(Debug, Clone)]
struct GaussPointGeometry {
    shape: Vec<f64>,
    /// Strain-displacement matrix, 6 × (nodes · DIM)
    b: DMatrix<f64>,
    /// weight · det J · thickness
    dv: f64,
    coords: Vector3<f64>,
}

#[derive(Debug)]
pub struct ContinuumElement<F: ShapeFamily> {
    tag: i32,
    nodes: Vec<NodeId>,
    coords: Vec<Vector3<f64>>,
    section: SolidSection,
    geometry: Vec<GaussPointGeometry>,
    materials: Vec<Box<dyn ConstitutiveModel>>,
    initial_stiffness: DMatrix<f64>,
    applied_load: DVector<f64>,
    _family: PhantomData<F>,
}

impl<F: ShapeFamily> ContinuumElement<F> {
    /// Builds the element and gives every integration point its own copy
    /// of `material`.
    ///
    /// # Errors
    /// `Domain` for a wrong node count, an unknown node or a node with the
    /// wrong number of DOFs; `Geometry` when det J ≤ 0 at any Gauss point.
    pub fn new(
        tag: i32,
        node_ids: Vec<NodeId>,
        nodes: &[Node],
        material: &dyn ConstitutiveModel,
        section: SolidSection,
    ) -> Result<Self> {
        if node_ids.len() != F::NUM_NODES {
            return Err(SolverError::Domain(format!(
                "element {tag}: {:?} needs {} nodes, got {}",
                F::KIND,
                F::NUM_NODES,
                node_ids.len()
            )));
        }
        if !(section.thickness > 0.0) {
            return Err(SolverError::InvalidInput(format!(
                "element {tag}: thickness must be positive"
            )));
        }

        let mut coords = Vec::with_capacity(F::NUM_NODES);
        for id in &node_ids {
            let node = nodes.get(id.0).ok_or_else(|| {
                SolverError::Domain(format!("element {tag}: node index {} out of range", id.0))
            })?;
            if node.ndof() != F::DIM {
                return Err(SolverError::Domain(format!(
                    "element {tag}: node {} has {} DOFs, {:?} needs {}",
                    node.tag,
                    node.ndof(),
                    F::KIND,
                    F::DIM
                )));
            }
            coords.push(node.coords);
        }

        let thickness = if F::DIM == 2 { section.thickness } else { 1.0 };
        let rule = tensor_rule(F::DIM, F::GAUSS_ORDER)?;
        let mut geometry = Vec::with_capacity(rule.len());
        for point in &rule {
            let dn = F::shape_derivatives(&point.coords);
            let jacobian = jacobian::<F>(&coords, &dn);
            let det_j = jacobian.determinant();
            if det_j <= 0.0 {
                return Err(SolverError::Geometry {
                    element: tag,
                    det_j,
                });
            }
            let inverse = jacobian
                .try_inverse()
                .ok_or(SolverError::Geometry { element: tag, det_j })?;

            let shape = F::shape_functions(&point.coords);
            let position = shape
                .iter()
                .zip(&coords)
                .fold(Vector3::zeros(), |acc, (n, x)| acc + x * *n);
            geometry.push(GaussPointGeometry {
                b: strain_displacement::<F>(&inverse, &dn),
                dv: point.weight * det_j * thickness,
                shape,
                coords: position,
            });
        }

        let materials: Vec<Box<dyn ConstitutiveModel>> =
            geometry.iter().map(|_| material.get_copy()).collect();
        let n_dofs = F::NUM_NODES * F::DIM;
        let mut element = Self {
            tag,
            nodes: node_ids,
            coords,
            section,
            geometry,
            materials,
            initial_stiffness: DMatrix::zeros(n_dofs, n_dofs),
            applied_load: DVector::zeros(n_dofs),
            _family: PhantomData,
        };
        element.initial_stiffness = element.integrate_stiffness(|m| m.initial_tangent());
        Ok(element)
    }

    pub fn section(&self) -> &SolidSection {
        &self.section
    }

    pub fn applied_load(&self) -> &DVector<f64> {
        &self.applied_load
    }

    pub fn materials(&self) -> &[Box<dyn ConstitutiveModel>] {
        &self.materials
    }

    /// Σ Bᵀ D B dV with `D` taken from each integration point.
    fn integrate_stiffness(&self, tangent: impl Fn(&dyn ConstitutiveModel) -> Tangent) -> DMatrix<f64> {
        let n = self.applied_load.len();
        let mut k = DMatrix::zeros(n, n);
        for (geom, material) in self.geometry.iter().zip(&self.materials) {
            let d = tangent(material.as_ref());
            let d = DMatrix::from_column_slice(6, 6, d.as_slice());
            k += geom.b.transpose() * (d * &geom.b) * geom.dv;
        }
        k
    }

    fn per_point(&self, f: impl Fn(&dyn ConstitutiveModel) -> Response) -> Response {
        Response::List(self.materials.iter().map(|m| f(m.as_ref())).collect())
    }

    fn element_displacements(&self, nodes: &[Node]) -> Result<DVector<f64>> {
        let mut u = DVector::zeros(self.applied_load.len());
        for (a, id) in self.nodes.iter().enumerate() {
            let node = nodes.get(id.0).ok_or_else(|| {
                SolverError::Domain(format!("element {}: node index {} out of range", self.tag, id.0))
            })?;
            for i in 0..F::DIM {
                u[a * F::DIM + i] = node.trial_disp[i];
            }
        }
        Ok(u)
    }

    fn body_force(&self, values: &[f64; 3]) -> DVector<f64> {
        let mut f = DVector::zeros(self.applied_load.len());
        for geom in &self.geometry {
            for (a, n) in geom.shape.iter().enumerate() {
                for i in 0..F::DIM {
                    f[a * F::DIM + i] += n * values[i] * geom.dv;
                }
            }
        }
        f
    }

    /// Consistent nodal forces of a uniform normal pressure on a face.
    /// Positive pressure acts against the outward normal.
    fn surface_pressure(&self, face: usize, pressure: f64) -> Result<DVector<f64>> {
        let local = F::face_nodes(face).ok_or_else(|| {
            SolverError::InvalidInput(format!(
                "element {}: {:?} has no face {face}",
                self.tag,
                F::KIND
            ))
        })?;
        let centroid = self.coords.iter().sum::<Vector3<f64>>() / self.coords.len() as f64;
        let face_center =
            local.iter().map(|&a| self.coords[a]).sum::<Vector3<f64>>() / local.len() as f64;
        let outward = |normal: Vector3<f64>| {
            if normal.dot(&(face_center - centroid)) < 0.0 {
                -normal
            } else {
                normal
            }
        };

        let mut f = DVector::zeros(self.applied_load.len());
        if F::DIM == 2 {
            // Edge: normal scaled by the edge length, half to each end node.
            let t = self.coords[local[1]] - self.coords[local[0]];
            let normal = outward(Vector3::new(t.y, -t.x, 0.0));
            let share = normal * (-pressure * self.section.thickness / 2.0);
            for &a in local {
                for i in 0..2 {
                    f[a * 2 + i] += share[i];
                }
            }
            return Ok(f);
        }

        // Bilinear face, 2×2 Gauss in (s, t).
        let corners = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];
        let mut sign = None;
        for point in tensor_rule(2, 2)? {
            let [s, t, _] = point.coords;
            let mut xs = Vector3::zeros();
            let mut xt = Vector3::zeros();
            let mut n = [0.0; 4];
            for (k, c) in corners.iter().enumerate() {
                n[k] = 0.25 * (1.0 + s * c[0]) * (1.0 + t * c[1]);
                let x = self.coords[local[k]];
                xs += x * (0.25 * c[0] * (1.0 + t * c[1]));
                xt += x * (0.25 * c[1] * (1.0 + s * c[0]));
            }
            let da = xs.cross(&xt);
            let sign = *sign.get_or_insert_with(|| if outward(da) == da { 1.0 } else { -1.0 });
            for (k, &a) in local.iter().enumerate() {
                let nodal = da * (-pressure * sign * n[k] * point.weight);
                for i in 0..3 {
                    f[a * 3 + i] += nodal[i];
                }
            }
        }
        Ok(f)
    }
}

fn jacobian<F: ShapeFamily>(coords: &[Vector3<f64>], dn: &[[f64; 3]]) -> Matrix3<f64> {
    let mut j = Matrix3::zeros();
    for (x, d) in coords.iter().zip(dn) {
        for r in 0..F::DIM {
            for c in 0..F::DIM {
                j[(r, c)] += d[r] * x[c];
            }
        }
    }
    if F::DIM == 2 {
        j[(2, 2)] = 1.0;
    }
    j
}

/// B matrix from `J⁻¹` and the natural shape derivatives.
fn strain_displacement<F: ShapeFamily>(inverse: &Matrix3<f64>, dn: &[[f64; 3]]) -> DMatrix<f64> {
    let mut b = DMatrix::zeros(6, F::NUM_NODES * F::DIM);
    for (a, d) in dn.iter().enumerate() {
        let g = inverse * Vector3::new(d[0], d[1], d[2]);
        let col = a * F::DIM;
        // εxx, εyy, γxy
        b[(0, col)] = g.x;
        b[(1, col + 1)] = g.y;
        b[(3, col)] = g.y;
        b[(3, col + 1)] = g.x;
        if F::DIM == 3 {
            // εzz, γyz, γzx
            b[(2, col + 2)] = g.z;
            b[(4, col + 1)] = g.z;
            b[(4, col + 2)] = g.y;
            b[(5, col)] = g.z;
            b[(5, col + 2)] = g.x;
        }
    }
    b
}

impl<F: ShapeFamily> Element for ContinuumElement<F> {
    fn tag(&self) -> i32 {
        self.tag
    }

    fn kind(&self) -> ElementKind {
        F::KIND
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn dofs_per_node(&self) -> usize {
        F::DIM
    }

    fn update(&mut self, nodes: &[Node]) -> Result<()> {
        let u = self.element_displacements(nodes)?;
        for (geom, material) in self.geometry.iter().zip(self.materials.iter_mut()) {
            let strain = &geom.b * &u;
            material.set_trial_strain(&Vector6::from_column_slice(strain.as_slice()))?;
        }
        Ok(())
    }

    fn tangent_stiffness(&self) -> DMatrix<f64> {
        self.integrate_stiffness(|m| m.tangent())
    }

    fn initial_stiffness(&self) -> DMatrix<f64> {
        self.initial_stiffness.clone()
    }

    fn committed_stiffness(&self) -> DMatrix<f64> {
        self.integrate_stiffness(|m| *m.state().committed_tangent())
    }

    fn mass(&self) -> DMatrix<f64> {
        let n = self.applied_load.len();
        let mut m = DMatrix::zeros(n, n);
        for (geom, material) in self.geometry.iter().zip(&self.materials) {
            let rho = material.density();
            if rho == 0.0 {
                continue;
            }
            for (a, na) in geom.shape.iter().enumerate() {
                for (b, nb) in geom.shape.iter().enumerate() {
                    let value = rho * na * nb * geom.dv;
                    for i in 0..F::DIM {
                        m[(a * F::DIM + i, b * F::DIM + i)] += value;
                    }
                }
            }
        }
        if self.section.lumped_mass {
            let lumped: Vec<f64> = m.row_iter().map(|row| row.sum()).collect();
            return DMatrix::from_diagonal(&DVector::from_vec(lumped));
        }
        m
    }

    fn resisting_force(&self) -> DVector<f64> {
        let mut p = -self.applied_load.clone();
        for (geom, material) in self.geometry.iter().zip(&self.materials) {
            let stress = DVector::from_column_slice(material.stress().as_slice());
            p += geom.b.tr_mul(&stress) * geom.dv;
        }
        p
    }

    fn zero_load(&mut self) {
        self.applied_load.fill(0.0);
    }

    fn add_load(&mut self, load: &ElementLoad, factor: f64) -> Result<()> {
        let f = match load {
            ElementLoad::BodyForce { values } => self.body_force(values),
            ElementLoad::SurfacePressure { face, pressure } => {
                self.surface_pressure(*face, *pressure)?
            }
        };
        self.applied_load += f * factor;
        Ok(())
    }

    fn set_time_increment(&mut self, dt: f64) {
        for material in &mut self.materials {
            material.set_time_increment(dt);
        }
    }

    fn has_failed_point(&self) -> bool {
        self.materials.iter().any(|m| m.state().is_failed())
    }

    fn commit_state(&mut self) -> Result<()> {
        for material in &mut self.materials {
            material.commit_state()?;
        }
        Ok(())
    }

    fn revert_to_last_commit(&mut self) -> Result<()> {
        for material in &mut self.materials {
            material.revert_to_last_commit()?;
        }
        Ok(())
    }

    fn revert_to_start(&mut self) -> Result<()> {
        for material in &mut self.materials {
            material.revert_to_start()?;
        }
        Ok(())
    }

    fn response(&self, query: &[&str]) -> Option<Response> {
        match query.first().copied()? {
            "stresses" => Some(self.per_point(|m| Response::voigt(&m.stress()))),
            "strains" => Some(self.per_point(|m| Response::voigt(&m.strain()))),
            "force" | "resisting_force" => Some(Response::Vector(self.resisting_force())),
            "stiffness" => Some(Response::Matrix(self.tangent_stiffness())),
            "mass" => Some(Response::Matrix(self.mass())),
            "gauss_points" => Some(Response::List(
                self.geometry
                    .iter()
                    .map(|g| Response::Vector(DVector::from_column_slice(g.coords.as_slice())))
                    .collect(),
            )),
            "material" => {
                let ip: usize = query.get(1)?.parse().ok()?;
                self.materials.get(ip)?.response(query.get(2)?)
            }
            _ => None,
        }
    }

    fn send_state(&self) -> Vec<DataSlots> {
        self.materials.iter().map(|m| m.send_state()).collect()
    }

    fn recv_state(&mut self, slots: &[DataSlots]) -> Result<()> {
        if slots.len() != self.materials.len() {
            return Err(SolverError::CorruptState(format!(
                "element {}: {} integration point records for {} points",
                self.tag,
                slots.len(),
                self.materials.len()
            )));
        }
        for (material, slot) in self.materials.iter_mut().zip(slots) {
            material.recv_state(slot)?;
        }
        Ok(())
    }
}
