//! Boundary conditions and loading.
//!
//! This module handles:
//! - Single-point displacement constraints
//! - Nodal loads, element loads (body force, surface pressure) and
//!   prescribed displacements grouped into load patterns
//! - Time series that scale a pattern with pseudo-time

use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};

/// Degree of freedom of a node (0-based DOF index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DofId {
    /// Node tag
    pub node: i32,
    /// DOF index (0 = X, 1 = Y, 2 = Z)
    pub dof: usize,
}

impl DofId {
    pub fn new(node: i32, dof: usize) -> Self {
        Self { node, dof }
    }
}

/// A DOF held at a constant value (zero for a homogeneous support).
/// Constrained DOFs receive no equation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpConstraint {
    pub node: i32,
    pub dof: usize,
    #[serde(default)]
    pub value: f64,
}

impl SpConstraint {
    pub fn fixed(node: i32, dof: usize) -> Self {
        Self {
            node,
            dof,
            value: 0.0,
        }
    }

    pub fn dof_id(&self) -> DofId {
        DofId::new(self.node, self.dof)
    }
}

/// Reference nodal load, one component per node DOF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodalLoad {
    pub node: i32,
    pub values: Vec<f64>,
}

/// Load applied over an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ElementLoad {
    /// Force per unit volume
    BodyForce { values: [f64; 3] },
    /// Uniform normal pressure on a face (edge in 2-D); positive pushes
    /// into the element
    SurfacePressure { face: usize, pressure: f64 },
}

/// An element load applied to a list of elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementLoadSet {
    pub elements: Vec<i32>,
    pub load: ElementLoad,
}

/// A DOF whose displacement follows `factor(t) × value`. The DOF is
/// constrained (no equation) while the pattern is in the domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrescribedDisplacement {
    pub node: i32,
    pub dof: usize,
    pub value: f64,
}

impl PrescribedDisplacement {
    pub fn dof_id(&self) -> DofId {
        DofId::new(self.node, self.dof)
    }
}

/// Load factor as a function of pseudo-time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TimeSeries {
    Constant {
        #[serde(default = "unit_factor")]
        factor: f64,
    },
    /// `factor × t`
    Linear {
        #[serde(default = "unit_factor")]
        factor: f64,
    },
    /// `factor` on `[start, finish]`, zero elsewhere
    Rectangular {
        start: f64,
        finish: f64,
        #[serde(default = "unit_factor")]
        factor: f64,
    },
    /// Piecewise-linear through `(times[i], values[i])`, held constant
    /// outside the table
    Path { times: Vec<f64>, values: Vec<f64> },
}

fn unit_factor() -> f64 {
    1.0
}

impl Default for TimeSeries {
    fn default() -> Self {
        TimeSeries::Linear { factor: 1.0 }
    }
}

impl TimeSeries {
    /// Checks that a path table is well formed.
    pub fn validate(&self) -> Result<()> {
        if let TimeSeries::Path { times, values } = self {
            if times.is_empty() || times.len() != values.len() {
                return Err(SolverError::InvalidInput(
                    "path time series needs equally long, non-empty time and value tables".into(),
                ));
            }
            if times.windows(2).any(|w| w[1] <= w[0]) {
                return Err(SolverError::InvalidInput(
                    "path time series times must be strictly increasing".into(),
                ));
            }
        }
        if let TimeSeries::Rectangular { start, finish, .. } = self
            && finish < start
        {
            return Err(SolverError::InvalidInput(
                "rectangular time series ends before it starts".into(),
            ));
        }
        Ok(())
    }

    pub fn factor(&self, time: f64) -> f64 {
        match self {
            TimeSeries::Constant { factor } => *factor,
            TimeSeries::Linear { factor } => factor * time,
            TimeSeries::Rectangular {
                start,
                finish,
                factor,
            } => {
                if time >= *start && time <= *finish {
                    *factor
                } else {
                    0.0
                }
            }
            TimeSeries::Path { times, values } => path_value(times, values, time),
        }
    }
}

fn path_value(times: &[f64], values: &[f64], time: f64) -> f64 {
    let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
        return 0.0;
    };
    if time <= first {
        return values[0];
    }
    if time >= last {
        return values[values.len() - 1];
    }
    let upper = times.partition_point(|&t| t <= time);
    let (t0, t1) = (times[upper - 1], times[upper]);
    let (v0, v1) = (values[upper - 1], values[upper]);
    v0 + (v1 - v0) * (time - t0) / (t1 - t0)
}

/// Loads and prescribed motions scaled by one time series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadPattern {
    pub tag: i32,
    #[serde(default)]
    pub series: TimeSeries,
    #[serde(default)]
    pub nodal_loads: Vec<NodalLoad>,
    #[serde(default)]
    pub element_loads: Vec<ElementLoadSet>,
    #[serde(default)]
    pub prescribed_displacements: Vec<PrescribedDisplacement>,
}

impl LoadPattern {
    pub fn new(tag: i32, series: TimeSeries) -> Self {
        Self {
            tag,
            series,
            ..Default::default()
        }
    }

    pub fn add_nodal_load(&mut self, node: i32, values: Vec<f64>) {
        self.nodal_loads.push(NodalLoad { node, values });
    }

    pub fn add_element_load(&mut self, elements: Vec<i32>, load: ElementLoad) {
        self.element_loads.push(ElementLoadSet { elements, load });
    }

    pub fn add_prescribed_displacement(&mut self, node: i32, dof: usize, value: f64) {
        self.prescribed_displacements
            .push(PrescribedDisplacement { node, dof, value });
    }
}
