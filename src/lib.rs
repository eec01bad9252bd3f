//! Forward operators for land-surface parameter retrieval
//!
//! This library maps candidate biophysical states to sensor observables so an
//! external inversion engine can treat radar and optical data uniformly: the
//! Sentinel-1 Water Cloud Model with its analytic Jacobian, the PROSAIL
//! optical boundary, and the sparse precision matrices that weight
//! observations in the cost function.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    OperatorError, OperatorResult, Polarization, VariableDescriptor, Mask, StateMatrix,
    PixelVector, HessianCube,
};

pub use core::{
    sar_observation_operator, optical_forward_operator, build_precision_matrix, CsrMatrix,
    Emulator, LinearisedOperator, ObservationMetadata, ObservationOperator, OperatorRequest,
    SarObservationOperator, OpticalObservationOperator, WaterCloudModel, WaterCloudConfig,
};

pub use io::{InMemoryObservations, ObservationRecord, ObservationSource, Uncertainty};

#[cfg(feature = "python")]
mod python {
    use crate::core::precision::precision_diagonal;
    use crate::core::water_cloud;
    use crate::types::OperatorError;
    use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray2, PyReadonlyArrayDyn};
    use pyo3::prelude::*;

    fn to_py_err(e: OperatorError) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
    }

    /// Water Cloud Model backscatter (linear) and gradient
    #[pyfunction]
    fn sar_observation_operator<'py>(
        py: Python<'py>,
        x: PyReadonlyArrayDyn<'py, f64>,
        polarisation: &str,
    ) -> PyResult<(&'py PyArray1<f64>, &'py PyArray2<f64>)> {
        let (sigma, grad) = water_cloud::sar_observation_operator(x.as_array(), polarisation)
            .map_err(to_py_err)?;
        Ok((sigma.into_pyarray(py), grad.into_pyarray(py)))
    }

    /// Diagonal of the observation precision matrix
    #[pyfunction]
    fn precision_matrix_diagonal<'py>(
        py: Python<'py>,
        uncertainty: PyReadonlyArray2<'py, f64>,
        mask: PyReadonlyArray2<'py, bool>,
    ) -> PyResult<&'py PyArray1<f64>> {
        let diagonal = precision_diagonal(
            &uncertainty.as_array().to_owned(),
            &mask.as_array().to_owned(),
        )
        .map_err(to_py_err)?;
        Ok(diagonal.into_pyarray(py))
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(sar_observation_operator, m)?)?;
        m.add_function(wrap_pyfunction!(precision_matrix_diagonal, m)?)?;
        Ok(())
    }
}
