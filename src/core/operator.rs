//! Observation operator contract shared by the radar and optical models.
//!
//! An inversion engine asks an operator for a linearisation at `x_prev`: the
//! predicted observable per state pixel, a sparse per-pixel Jacobian and,
//! optionally, per-pixel Hessian blocks.

use crate::core::sparse::CsrMatrix;
use crate::types::{
    HessianCube, Mask, OperatorError, OperatorResult, PixelVector, Real, StateMatrix,
    VariableDescriptor,
};
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use std::collections::{BTreeMap, BTreeSet};

/// Incidence angle supplied with an observation, in degrees
#[derive(Debug, Clone, PartialEq)]
pub enum IncidenceAngle {
    Constant(Real),
    /// One angle per pixel of the observation grid
    PerPixel(Array2<Real>),
}

impl IncidenceAngle {
    /// Angles for the pixels selected by `state_mask`, in row-major order
    pub fn at_state_pixels(&self, state_mask: &Mask) -> OperatorResult<Array1<Real>> {
        match self {
            IncidenceAngle::Constant(angle) => {
                let n = state_mask.iter().filter(|&&ok| ok).count();
                Ok(Array1::from_elem(n, *angle))
            }
            IncidenceAngle::PerPixel(angles) => {
                if angles.shape() != state_mask.shape() {
                    return Err(OperatorError::ShapeMismatch(format!(
                        "incidence angle grid {:?} does not match state mask {:?}",
                        angles.shape(),
                        state_mask.shape()
                    )));
                }
                Ok(angles
                    .iter()
                    .zip(state_mask.iter())
                    .filter(|&(_, &ok)| ok)
                    .map(|(&angle, _)| angle)
                    .collect())
            }
        }
    }
}

/// Sun/view geometry in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewGeometry {
    pub sza: Real,
    pub vza: Real,
    pub raa: Real,
}

/// Auxiliary values that accompany one observation.
///
/// Only `incidence_angle` feeds the radar physics. `geometry` and
/// `frequency_ghz` describe the acquisition for the data-access layer and for
/// callers of [`optical_forward_operator`](crate::core::optical::optical_forward_operator);
/// emulators are trained per band and never see them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationMetadata {
    pub incidence_angle: Option<IncidenceAngle>,
    pub geometry: Option<ViewGeometry>,
    pub frequency_ghz: Option<Real>,
}

impl ObservationMetadata {
    pub fn with_incidence_angle(mut self, angle: IncidenceAngle) -> Self {
        self.incidence_angle = Some(angle);
        self
    }

    pub fn with_geometry(mut self, geometry: ViewGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_frequency(mut self, frequency_ghz: Real) -> Self {
        self.frequency_ghz = Some(frequency_ghz);
        self
    }
}

/// Surrogate (or physical) model mapping state rows to one band's observable
pub trait Emulator: Send + Sync {
    /// Expected parameters per state row
    fn num_inputs(&self) -> usize;

    /// Prediction and gradient for every row of `x`; the gradient is shaped like `x`
    fn predict(&self, x: ArrayView2<Real>) -> OperatorResult<(PixelVector, StateMatrix)>;

    /// Per-row Hessian blocks, `None` when the model cannot provide them
    fn hessian(&self, _x: ArrayView2<Real>) -> OperatorResult<Option<HessianCube>> {
        Ok(None)
    }
}

/// Inputs of [`ObservationOperator::create_observation_operator`]
#[derive(Clone, Copy)]
pub struct OperatorRequest<'a> {
    /// Parameters per pixel to return derivatives for (<= row length of `x_prev`)
    pub num_params: usize,
    pub emulator: Option<&'a dyn Emulator>,
    pub metadata: &'a ObservationMetadata,
    /// Observation validity
    pub mask: &'a Mask,
    /// Pixels that are retrieved
    pub state_mask: &'a Mask,
    /// Linearisation point, one row per `state_mask` pixel in row-major order
    pub x_prev: ArrayView2<'a, Real>,
    pub band: usize,
    pub calc_hessian: bool,
}

/// Linearised observation operator at one state estimate
#[derive(Debug, Clone)]
pub struct LinearisedOperator {
    /// Predicted observable per state pixel, zero where the observation is masked
    pub h: PixelVector,
    /// `n_state x (n_state * num_params)`, one block per pixel
    pub jacobian: CsrMatrix,
    /// `(n_state, num_params, num_params)`, present only when requested
    pub hessian: Option<HessianCube>,
}

/// Contract every observation operator satisfies
pub trait ObservationOperator: Send + Sync {
    /// Physical quantities the operator maps from; stable across calls
    fn supported_variables(&self) -> Vec<VariableDescriptor>;

    /// Sensor/product identifiers, e.g. `"S1"`
    fn supported_data_types(&self) -> BTreeSet<String>;

    /// Bands to read per data type. `None` selects every supported type.
    fn required_bands(
        &self,
        data_types: Option<&BTreeSet<String>>,
    ) -> OperatorResult<BTreeMap<String, Vec<String>>>;

    fn create_observation_operator(
        &self,
        request: &OperatorRequest<'_>,
    ) -> OperatorResult<LinearisedOperator>;
}

/// Shared implementation of `required_bands` over a static band table
pub(crate) fn select_bands(
    table: &[(&str, &[&str])],
    data_types: Option<&BTreeSet<String>>,
) -> OperatorResult<BTreeMap<String, Vec<String>>> {
    let lookup = |name: &str| {
        table
            .iter()
            .find(|(data_type, _)| *data_type == name)
            .map(|(data_type, bands)| {
                (
                    data_type.to_string(),
                    bands.iter().map(|b| b.to_string()).collect::<Vec<_>>(),
                )
            })
    };

    match data_types {
        None => Ok(table
            .iter()
            .filter_map(|(data_type, _)| lookup(*data_type))
            .collect()),
        Some(requested) => requested
            .iter()
            .map(|name| {
                lookup(name.as_str()).ok_or_else(|| {
                    OperatorError::Configuration(format!("unsupported data type '{}'", name))
                })
            })
            .collect(),
    }
}

/// Which state pixels carry a valid observation
#[derive(Debug, Clone)]
pub(crate) struct PixelSelection {
    pub observed: Vec<bool>,
    pub observed_index: Vec<usize>,
}

impl PixelSelection {
    pub fn n_state(&self) -> usize {
        self.observed.len()
    }

    pub fn n_observed(&self) -> usize {
        self.observed_index.len()
    }
}

/// Validate a request against a model with `expected_params` per row
pub(crate) fn select_pixels(
    request: &OperatorRequest<'_>,
    expected_params: usize,
) -> OperatorResult<PixelSelection> {
    let OperatorRequest {
        mask,
        state_mask,
        x_prev,
        num_params,
        ..
    } = *request;

    if mask.shape() != state_mask.shape() {
        return Err(OperatorError::ShapeMismatch(format!(
            "observation mask {:?} and state mask {:?} differ",
            mask.shape(),
            state_mask.shape()
        )));
    }
    if x_prev.ncols() != expected_params {
        return Err(OperatorError::ShapeMismatch(format!(
            "state rows have {} parameters, model expects {}",
            x_prev.ncols(),
            expected_params
        )));
    }
    if num_params == 0 || num_params > x_prev.ncols() {
        return Err(OperatorError::ShapeMismatch(format!(
            "num_params {} must be between 1 and {}",
            num_params,
            x_prev.ncols()
        )));
    }

    let observed: Vec<bool> = state_mask
        .iter()
        .zip(mask.iter())
        .filter(|&(&in_state, _)| in_state)
        .map(|(_, &valid)| valid)
        .collect();

    if observed.len() != x_prev.nrows() {
        return Err(OperatorError::ShapeMismatch(format!(
            "state mask selects {} pixels but x_prev has {} rows",
            observed.len(),
            x_prev.nrows()
        )));
    }

    let observed_index = observed
        .iter()
        .enumerate()
        .filter(|&(_, &valid)| valid)
        .map(|(i, _)| i)
        .collect();

    Ok(PixelSelection {
        observed,
        observed_index,
    })
}

/// Rows of `x` (state-pixel ordered) that carry an observation
pub(crate) fn observed_rows(x: ArrayView2<Real>, selection: &PixelSelection) -> StateMatrix {
    x.select(Axis(0), &selection.observed_index)
}

/// Scatter per-observed-pixel results back onto the state pixels
pub(crate) fn assemble(
    selection: &PixelSelection,
    num_params: usize,
    h_observed: PixelVector,
    grad_observed: StateMatrix,
    hess_observed: Option<HessianCube>,
) -> OperatorResult<LinearisedOperator> {
    let n_state = selection.n_state();
    if h_observed.len() != selection.n_observed() || grad_observed.nrows() != selection.n_observed() {
        return Err(OperatorError::ShapeMismatch(format!(
            "model returned {} predictions and {} gradient rows for {} observed pixels",
            h_observed.len(),
            grad_observed.nrows(),
            selection.n_observed()
        )));
    }
    if grad_observed.ncols() < num_params {
        return Err(OperatorError::ShapeMismatch(format!(
            "gradient has {} columns, {} requested",
            grad_observed.ncols(),
            num_params
        )));
    }

    let mut h = Array1::zeros(n_state);
    let mut blocks = Array2::zeros((n_state, num_params));
    for (k, &pixel) in selection.observed_index.iter().enumerate() {
        h[pixel] = h_observed[k];
        blocks
            .row_mut(pixel)
            .assign(&grad_observed.slice(s![k, ..num_params]));
    }
    let jacobian = CsrMatrix::block_diagonal_rows(blocks.view(), &selection.observed)?;

    let hessian = match hess_observed {
        None => None,
        Some(hess) => {
            let (rows, p, q) = hess.dim();
            if rows != selection.n_observed() || p < num_params || q < num_params {
                return Err(OperatorError::ShapeMismatch(format!(
                    "Hessian of shape {:?} does not cover {} pixels x {} parameters",
                    hess.dim(),
                    selection.n_observed(),
                    num_params
                )));
            }
            let mut full = Array3::zeros((n_state, num_params, num_params));
            for (k, &pixel) in selection.observed_index.iter().enumerate() {
                full.slice_mut(s![pixel, .., ..])
                    .assign(&hess.slice(s![k, ..num_params, ..num_params]));
            }
            Some(full)
        }
    };

    log::debug!(
        "Linearised operator: {} state pixels, {} observed, jacobian nnz {}",
        n_state,
        selection.n_observed(),
        jacobian.nnz()
    );

    Ok(LinearisedOperator {
        h,
        jacobian,
        hessian,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn request<'a>(
        metadata: &'a ObservationMetadata,
        mask: &'a Mask,
        state_mask: &'a Mask,
        x: &'a StateMatrix,
        num_params: usize,
    ) -> OperatorRequest<'a> {
        OperatorRequest {
            num_params,
            emulator: None,
            metadata,
            mask,
            state_mask,
            x_prev: x.view(),
            band: 0,
            calc_hessian: false,
        }
    }

    #[test]
    fn test_pixel_selection() {
        let metadata = ObservationMetadata::default();
        let mask = array![[true, false], [true, true]];
        let state_mask = array![[true, true], [false, true]];
        let x = Array2::<f64>::zeros((3, 2));

        let sel = select_pixels(&request(&metadata, &mask, &state_mask, &x, 2), 2).unwrap();
        assert_eq!(sel.observed, vec![true, false, true]);
        assert_eq!(sel.observed_index, vec![0, 2]);
    }

    #[test]
    fn test_pixel_selection_errors() {
        let metadata = ObservationMetadata::default();
        let mask = Mask::from_elem((2, 2), true);
        let state_mask = Mask::from_elem((2, 2), true);
        let small_mask = Mask::from_elem((1, 2), true);
        let x = Array2::<f64>::zeros((4, 2));
        let x_short = Array2::<f64>::zeros((3, 2));

        let cases = [
            request(&metadata, &small_mask, &state_mask, &x, 2),
            request(&metadata, &mask, &state_mask, &x_short, 2),
            request(&metadata, &mask, &state_mask, &x, 3),
            request(&metadata, &mask, &state_mask, &x, 0),
        ];
        for case in &cases {
            assert!(matches!(select_pixels(case, 2), Err(OperatorError::ShapeMismatch(_))));
        }
        assert!(matches!(
            select_pixels(&request(&metadata, &mask, &state_mask, &x, 2), 3),
            Err(OperatorError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_assemble_scatters_results() {
        let selection = PixelSelection {
            observed: vec![true, false, true],
            observed_index: vec![0, 2],
        };
        let h = array![1.0, 3.0];
        let grad = array![[0.1, 0.2], [0.3, 0.4]];

        let op = assemble(&selection, 1, h, grad, None).unwrap();
        assert_eq!(op.h, array![1.0, 0.0, 3.0]);
        assert_eq!(op.jacobian.shape(), (3, 3));
        assert_eq!(op.jacobian.get(0, 0), 0.1);
        assert_eq!(op.jacobian.get(2, 2), 0.3);
        assert_eq!(op.jacobian.nnz(), 2);
        assert!(op.hessian.is_none());
    }

    #[test]
    fn test_per_pixel_incidence_angles() {
        let angles = IncidenceAngle::PerPixel(array![[20.0, 30.0], [40.0, 50.0]]);
        let state_mask = array![[false, true], [true, true]];
        assert_eq!(angles.at_state_pixels(&state_mask).unwrap(), array![30.0, 40.0, 50.0]);

        let constant = IncidenceAngle::Constant(23.0);
        assert_eq!(constant.at_state_pixels(&state_mask).unwrap().len(), 3);

        let wrong = Mask::from_elem((3, 3), true);
        assert!(angles.at_state_pixels(&wrong).is_err());
    }

    #[test]
    fn test_metadata_builders() {
        let geometry = ViewGeometry { sza: 30.0, vza: 5.0, raa: 120.0 };
        let metadata = ObservationMetadata::default()
            .with_incidence_angle(IncidenceAngle::Constant(38.5))
            .with_geometry(geometry)
            .with_frequency(5.405);

        assert_eq!(metadata.incidence_angle, Some(IncidenceAngle::Constant(38.5)));
        assert_eq!(metadata.geometry, Some(geometry));
        assert_eq!(metadata.frequency_ghz, Some(5.405));
        assert_eq!(ObservationMetadata::default().geometry, None);
    }

    #[test]
    fn test_select_bands() {
        let table: &[(&str, &[&str])] = &[("S1", &["sigma0_VV", "sigma0_VH"]), ("S2", &["B04"])];

        let all = select_bands(table, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["S1"], vec!["sigma0_VV", "sigma0_VH"]);

        let only: BTreeSet<String> = ["S2".to_string()].into_iter().collect();
        assert_eq!(select_bands(table, Some(&only)).unwrap().len(), 1);

        let unknown: BTreeSet<String> = ["L8".to_string()].into_iter().collect();
        assert!(matches!(
            select_bands(table, Some(&unknown)),
            Err(OperatorError::Configuration(_))
        ));
    }
}
