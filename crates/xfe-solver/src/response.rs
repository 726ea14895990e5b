//! Read-only response values returned by string-keyed queries on
//! materials and elements (for recorders and post-processing).

use nalgebra::{DMatrix, DVector, Matrix6, Vector6};

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Scalar(f64),
    Vector(DVector<f64>),
    Matrix(DMatrix<f64>),
    /// One entry per integration point (or per node).
    List(Vec<Response>),
}

impl Response {
    pub fn voigt(v: &Vector6<f64>) -> Self {
        Response::Vector(DVector::from_column_slice(v.as_slice()))
    }

    pub fn tangent(m: &Matrix6<f64>) -> Self {
        Response::Matrix(DMatrix::from_column_slice(6, 6, m.as_slice()))
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Response::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&DVector<f64>> {
        match self {
            Response::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&DMatrix<f64>> {
        match self {
            Response::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Response]> {
        match self {
            Response::List(items) => Some(items),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voigt_response_keeps_component_order() {
        let v = Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        let response = Response::voigt(&v);
        let values = response.as_vector().unwrap();
        assert_eq!(values.len(), 6);
        assert_eq!(values[3], 4.0);
        assert!(response.as_scalar().is_none());
    }

    #[test]
    fn tangent_response_is_column_major_copy() {
        let mut m = Matrix6::zeros();
        m[(1, 4)] = 7.0;
        let response = Response::tangent(&m);
        assert_eq!(response.as_matrix().unwrap()[(1, 4)], 7.0);
    }
}
