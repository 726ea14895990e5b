//! Gauss–Legendre quadrature on the reference line, square and cube.

use crate::error::{Result, SolverError};

/// Integration point in natural coordinates (unused coordinates are 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraturePoint {
    pub coords: [f64; 3],
    pub weight: f64,
}

/// 1-D Gauss–Legendre abscissae and weights on [-1, 1].
pub fn gauss_legendre(order: usize) -> Result<Vec<(f64, f64)>> {
    let rule = match order {
        1 => vec![(0.0, 2.0)],
        2 => {
            let a = 1.0 / 3.0_f64.sqrt();
            vec![(-a, 1.0), (a, 1.0)]
        }
        3 => {
            let a = (3.0_f64 / 5.0).sqrt();
            vec![(-a, 5.0 / 9.0), (0.0, 8.0 / 9.0), (a, 5.0 / 9.0)]
        }
        _ => {
            return Err(SolverError::InvalidInput(format!(
                "Gauss-Legendre order {order} not supported (1-3)"
            )));
        }
    };
    Ok(rule)
}

/// Tensor-product rule on [-1, 1]^dim, first coordinate varying fastest.
pub fn tensor_rule(dim: usize, order: usize) -> Result<Vec<QuadraturePoint>> {
    let line = gauss_legendre(order)?;
    let mut points = Vec::with_capacity(line.len().pow(dim as u32));
    match dim {
        1 => {
            for &(x, wx) in &line {
                points.push(QuadraturePoint {
                    coords: [x, 0.0, 0.0],
                    weight: wx,
                });
            }
        }
        2 => {
            for &(y, wy) in &line {
                for &(x, wx) in &line {
                    points.push(QuadraturePoint {
                        coords: [x, y, 0.0],
                        weight: wx * wy,
                    });
                }
            }
        }
        3 => {
            for &(z, wz) in &line {
                for &(y, wy) in &line {
                    for &(x, wx) in &line {
                        points.push(QuadraturePoint {
                            coords: [x, y, z],
                            weight: wx * wy * wz,
                        });
                    }
                }
            }
        }
        _ => {
            return Err(SolverError::InvalidInput(format!(
                "quadrature dimension {dim} not supported"
            )));
        }
    }
    Ok(points)
}
