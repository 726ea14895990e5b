//! Model builder: turns a JSON model description into a [`Domain`].
//!
//! The description lists nodes, named materials, elements (by node tag and
//! material name), single-point constraints, nodal masses and load
//! patterns. Every element receives its own deep copy of its material.
//!
//! ```json
//! {
//!   "nodes": [{"tag": 1, "coords": [0.0, 0.0]}, ...],
//!   "materials": {"soil": {"type": "DruckerPrager", ...}},
//!   "elements": [{"tag": 1, "kind": "Quad4", "nodes": [1, 2, 3, 4], "material": "soil"}],
//!   "constraints": [{"node": 1, "dof": 0}],
//!   "patterns": [{"tag": 1, "nodal_loads": [{"node": 3, "values": [0.0, -1.0]}]}],
//!   "analysis": {"integrator": {"type": "LoadControl", "increment": 0.1}, "num_steps": 10}
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::AnalysisConfig;
use crate::boundary_conditions::{LoadPattern, SpConstraint};
use crate::domain::{Domain, NodeId};
use crate::elements::{Element, ElementKind, Hex8, Quad4, SolidSection};
use crate::error::{Result, SolverError};
use crate::materials::{MaterialLibrary, MaterialSpec, ReturnMappingConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    pub tag: i32,
    /// Two or three coordinates
    pub coords: Vec<f64>,
    /// DOFs per node; inferred from the elements when omitted
    #[serde(default)]
    pub ndof: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInput {
    pub tag: i32,
    pub kind: ElementKind,
    /// Node tags in element order
    pub nodes: Vec<i32>,
    pub material: String,
    #[serde(default)]
    pub section: SolidSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodalMass {
    pub node: i32,
    pub mass: f64,
}

/// Complete model description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelInput {
    pub nodes: Vec<NodeInput>,
    pub materials: BTreeMap<String, MaterialSpec>,
    pub return_mapping: ReturnMappingConfig,
    pub elements: Vec<ElementInput>,
    pub constraints: Vec<SpConstraint>,
    pub nodal_masses: Vec<NodalMass>,
    pub patterns: Vec<LoadPattern>,
    pub analysis: AnalysisConfig,
}

impl ModelInput {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SolverError::InvalidInput(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Names of materials whose response depends on the time increment.
    pub fn rate_dependent_materials(&self) -> Vec<&str> {
        self.materials
            .iter()
            .filter(|(_, spec)| spec.is_rate_dependent())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Builds a domain and its material library from a model description.
pub struct ModelBuilder {
    domain: Domain,
    materials: MaterialLibrary,
    errors: Vec<String>,
}

impl ModelBuilder {
    pub fn new(return_mapping: ReturnMappingConfig) -> Self {
        Self {
            domain: Domain::new(),
            materials: MaterialLibrary::with_return_mapping(return_mapping),
            errors: Vec::new(),
        }
    }

    /// Builds the domain described by `input`.
    ///
    /// # Errors
    /// Material, node and element problems are collected and reported
    /// together; constraint, mass and pattern problems abort immediately.
    pub fn build(input: &ModelInput) -> Result<(Domain, MaterialLibrary)> {
        let mut builder = Self::new(input.return_mapping);
        builder.add_materials(input);
        builder.add_nodes(input);
        builder.add_elements(input);

        if !builder.errors.is_empty() {
            return Err(SolverError::InvalidInput(format!(
                "model building encountered {} errors:\n{}",
                builder.errors.len(),
                builder.errors.join("\n")
            )));
        }

        for constraint in &input.constraints {
            builder.domain.fix(*constraint)?;
        }
        for mass in &input.nodal_masses {
            builder.domain.set_nodal_mass(mass.node, mass.mass)?;
        }
        for pattern in &input.patterns {
            builder.domain.add_pattern(pattern.clone())?;
        }

        info!(
            nodes = builder.domain.nodes().len(),
            elements = builder.domain.num_elements(),
            materials = input.materials.len(),
            "model built"
        );
        Ok((builder.domain, builder.materials))
    }

    fn add_materials(&mut self, input: &ModelInput) {
        for (name, spec) in &input.materials {
            if let Err(e) = self.materials.add_material(name.clone(), spec) {
                self.errors.push(format!("material {name}: {e}"));
            }
        }
    }

    fn add_nodes(&mut self, input: &ModelInput) {
        let mut inferred: HashMap<i32, usize> = HashMap::new();
        for element in &input.elements {
            let ndof = dofs_per_node(element.kind);
            for tag in &element.nodes {
                inferred.entry(*tag).or_insert(ndof);
            }
        }

        for node in &input.nodes {
            let coords = match node.coords.as_slice() {
                [x, y] => Vector3::new(*x, *y, 0.0),
                [x, y, z] => Vector3::new(*x, *y, *z),
                other => {
                    self.errors.push(format!(
                        "node {}: expected 2 or 3 coordinates, got {}",
                        node.tag,
                        other.len()
                    ));
                    continue;
                }
            };
            let ndof = node
                .ndof
                .or_else(|| inferred.get(&node.tag).copied())
                .unwrap_or(node.coords.len());
            if let Err(e) = self.domain.add_node(node.tag, coords, ndof) {
                self.errors.push(e.to_string());
            }
        }
    }

    fn add_elements(&mut self, input: &ModelInput) {
        for element in &input.elements {
            if let Err(e) = self.add_element(element) {
                self.errors.push(format!("element {}: {e}", element.tag));
            }
        }
    }

    fn add_element(&mut self, input: &ElementInput) -> Result<()> {
        let ids = input
            .nodes
            .iter()
            .map(|tag| self.domain.node_id(*tag))
            .collect::<Result<Vec<NodeId>>>()?;
        let material = self.materials.instantiate(&input.material)?;
        self.materials.assign_material(input.tag, input.material.clone());

        let nodes = self.domain.nodes();
        let element: Box<dyn Element> = match input.kind {
            ElementKind::Quad4 => Box::new(Quad4::new(
                input.tag,
                ids,
                nodes,
                material.as_ref(),
                input.section,
            )?),
            ElementKind::Hex8 => Box::new(Hex8::new(
                input.tag,
                ids,
                nodes,
                material.as_ref(),
                input.section,
            )?),
        };
        self.domain.add_element(element)?;
        Ok(())
    }
}

fn dofs_per_node(kind: ElementKind) -> usize {
    match kind {
        ElementKind::Quad4 => 2,
        ElementKind::Hex8 => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCH: &str = r#"{
        "nodes": [
            {"tag": 1, "coords": [0.0, 0.0]},
            {"tag": 2, "coords": [1.0, 0.0]},
            {"tag": 3, "coords": [1.0, 1.0]},
            {"tag": 4, "coords": [0.0, 1.0]}
        ],
        "materials": {
            "rubber": {"type": "Elastic", "elastic_modulus": 10.0, "poissons_ratio": 0.3}
        },
        "elements": [
            {"tag": 7, "kind": "Quad4", "nodes": [1, 2, 3, 4], "material": "rubber",
             "section": {"thickness": 0.1}}
        ],
        "constraints": [{"node": 1, "dof": 0}, {"node": 1, "dof": 1}, {"node": 2, "dof": 1}],
        "patterns": [{"tag": 1, "nodal_loads": [{"node": 3, "values": [0.0, 1.0]}]}]
    }"#;

    #[test]
    fn builds_domain_from_json() {
        let input = ModelInput::from_json_str(PATCH).unwrap();
        let (domain, materials) = ModelBuilder::build(&input).unwrap();
        assert_eq!(domain.nodes().len(), 4);
        assert_eq!(domain.num_elements(), 1);
        assert_eq!(domain.node_by_tag(3).unwrap().ndof(), 2);
        assert_eq!(domain.constraints().len(), 3);
        assert_eq!(domain.patterns().len(), 1);
        assert!(materials.element_material(7).is_ok());
        assert_eq!(domain.element_by_tag(7).unwrap().num_dofs(), 8);
    }

    #[test]
    fn errors_are_collected() {
        let mut input = ModelInput::from_json_str(PATCH).unwrap();
        input.elements[0].material = "steel".into();
        input.nodes.push(NodeInput {
            tag: 9,
            coords: vec![1.0],
            ndof: None,
        });
        let err = ModelBuilder::build(&input).unwrap_err().to_string();
        assert!(err.contains("2 errors"), "{err}");
        assert!(err.contains("node 9"));
        assert!(err.contains("element 7"));
    }

    #[test]
    fn material_errors_are_collected_with_the_rest() {
        let mut input = ModelInput::from_json_str(PATCH).unwrap();
        input.materials.insert(
            "soft".into(),
            MaterialSpec::Elastic {
                elastic_modulus: -1.0,
                poissons_ratio: 0.3,
                density: 0.0,
            },
        );
        input.materials.insert(
            "sticky".into(),
            MaterialSpec::J2Plasticity {
                bulk_modulus: 160.0,
                shear_modulus: 80.0,
                yield_stress: 0.2,
                saturation_stress: 0.2,
                saturation_exponent: 0.0,
                hardening_modulus: 0.0,
                viscosity: -5.0,
                density: 0.0,
            },
        );
        input.nodes.push(NodeInput {
            tag: 9,
            coords: vec![],
            ndof: None,
        });
        let err = ModelBuilder::build(&input).unwrap_err().to_string();
        assert!(err.contains("3 errors"), "{err}");
        assert!(err.contains("material soft"));
        assert!(err.contains("material sticky"));
        assert!(err.contains("node 9"));
    }

    #[test]
    fn viscous_materials_are_listed() {
        let mut input = ModelInput::from_json_str(PATCH).unwrap();
        assert!(input.rate_dependent_materials().is_empty());
        input.materials.insert(
            "creep".into(),
            MaterialSpec::J2Plasticity {
                bulk_modulus: 160.0,
                shear_modulus: 80.0,
                yield_stress: 0.2,
                saturation_stress: 0.2,
                saturation_exponent: 0.0,
                hardening_modulus: 0.0,
                viscosity: 1000.0,
                density: 0.0,
            },
        );
        assert_eq!(input.rate_dependent_materials(), vec!["creep"]);
    }

    #[test]
    fn unknown_material_type_is_a_json_error() {
        let text = r#"{"materials": {"x": {"type": "Unobtainium"}}}"#;
        assert!(matches!(ModelInput::from_json_str(text), Err(SolverError::Json(_))));
    }
}
