use crate::core::sparse::CsrMatrix;
use crate::types::{Mask, OperatorError, OperatorResult, Real};
use ndarray::{Array1, Array2};

/// Radiometric uncertainty of Sentinel-1 backscatter, in dB
pub const DEFAULT_RADIOMETRIC_UNCERTAINTY_DB: Real = 1.0;

/// How per-pixel uncertainty is derived from an observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UncertaintyModel {
    /// Same absolute uncertainty for every pixel
    Constant(Real),
    /// Relative radiometric uncertainty given in dB, applied to linear power
    RelativeDb(Real),
    /// Speckle uncertainty `y / sqrt(ENL)` with ENL estimated from the scene
    EquivalentLooks,
}

impl Default for UncertaintyModel {
    fn default() -> Self {
        UncertaintyModel::RelativeDb(DEFAULT_RADIOMETRIC_UNCERTAINTY_DB)
    }
}

fn check_shapes(what: &str, shape: &[usize], mask: &Mask) -> OperatorResult<()> {
    if shape != mask.shape() {
        return Err(OperatorError::ShapeMismatch(format!(
            "{} shape {:?} does not match mask shape {:?}",
            what,
            shape,
            mask.shape()
        )));
    }
    Ok(())
}

/// Equivalent number of looks, `mean^2 / variance` over the valid pixels
pub fn equivalent_number_of_looks(observations: &Array2<Real>, mask: &Mask) -> OperatorResult<Real> {
    check_shapes("observation", observations.shape(), mask)?;

    let valid: Vec<Real> = observations
        .iter()
        .zip(mask.iter())
        .filter(|&(_, &ok)| ok)
        .map(|(&y, _)| y)
        .collect();

    if valid.len() < 2 {
        return Err(OperatorError::Configuration(format!(
            "at least two valid pixels are needed to estimate ENL, got {}",
            valid.len()
        )));
    }

    let n = valid.len() as Real;
    let mean = valid.iter().sum::<Real>() / n;
    let variance = valid.iter().map(|y| (y - mean).powi(2)).sum::<Real>() / n;

    if variance <= 0.0 {
        return Err(OperatorError::Configuration(
            "observations have zero variance, ENL is undefined".to_string(),
        ));
    }

    Ok(mean * mean / variance)
}

/// Per-pixel uncertainty for an observation.
///
/// The result is returned, never cached: every call computes it afresh.
pub fn estimate_uncertainty(
    observations: &Array2<Real>,
    mask: &Mask,
    model: UncertaintyModel,
) -> OperatorResult<Array2<Real>> {
    check_shapes("observation", observations.shape(), mask)?;

    let uncertainty = match model {
        UncertaintyModel::Constant(sigma) => Array2::from_elem(observations.dim(), sigma),
        UncertaintyModel::RelativeDb(db) => {
            let factor = 10f64.powf(db / 10.0) - 1.0;
            observations.mapv(|y| y.abs() * factor)
        }
        UncertaintyModel::EquivalentLooks => {
            let enl = equivalent_number_of_looks(observations, mask)?;
            log::debug!("Estimated equivalent number of looks: {:.3}", enl);
            let scale = enl.sqrt();
            observations.mapv(|y| y.abs() / scale)
        }
    };

    Ok(uncertainty)
}

/// Inverse-variance weights in flattened (row-major) pixel order
pub fn precision_diagonal(uncertainty: &Array2<Real>, mask: &Mask) -> OperatorResult<Array1<Real>> {
    check_shapes("uncertainty", uncertainty.shape(), mask)?;

    let mut diagonal = Array1::zeros(mask.len());
    for (index, ((&sigma, &valid), weight)) in uncertainty
        .iter()
        .zip(mask.iter())
        .zip(diagonal.iter_mut())
        .enumerate()
    {
        if !valid {
            continue;
        }
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(OperatorError::InvalidUncertainty { index, value: sigma });
        }
        *weight = 1.0 / (sigma * sigma);
    }

    Ok(diagonal)
}

/// Sparse diagonal precision matrix.
///
/// The side equals the flattened pixel count. Valid pixels get
/// `1 / uncertainty^2`, masked-out pixels get zero weight.
pub fn build_precision_matrix(uncertainty: &Array2<Real>, mask: &Mask) -> OperatorResult<CsrMatrix> {
    let diagonal = precision_diagonal(uncertainty, mask)?;
    let valid = mask.iter().filter(|&&ok| ok).count();
    log::debug!(
        "Built {}x{} precision matrix with {} weighted pixels",
        diagonal.len(),
        diagonal.len(),
        valid
    );
    Ok(CsrMatrix::from_diagonal(diagonal.view()))
}

/// Precision matrix for a single uncertainty shared by all pixels
pub fn build_precision_matrix_scalar(uncertainty: Real, mask: &Mask) -> OperatorResult<CsrMatrix> {
    build_precision_matrix(&Array2::from_elem(mask.dim(), uncertainty), mask)
}
