//! Water Cloud Model (WCM) radar observation operator.
//!
//! Backscatter for polarisation `p` is a vegetation volume term plus a soil
//! term attenuated twice by the canopy:
//!
//! ```text
//! tau        = exp(-2 B V / cos(theta))
//! sigma_veg  = A V^E cos(theta) (1 - tau)
//! sigma_soil = 10^((C + D S) / 10)
//! sigma_0    = sigma_veg + tau sigma_soil
//! ```
//!
//! `V` is a vegetation descriptor (e.g. LAI) and `S` a soil moisture linked
//! quantity. All returned backscatter values are linear power, not dB.

use crate::types::{
    HessianCube, OperatorError, OperatorResult, PixelVector, Polarization, Real, StateMatrix,
};
use ndarray::{Array1, Array2, Array3, ArrayView, ArrayView1, ArrayView2, Axis, Dimension, Ix1, Ix2};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;

/// Number of state parameters per pixel: `[V, S]`
pub const WCM_NUM_PARAMS: usize = 2;

/// Default incidence angle in degrees
pub const DEFAULT_INCIDENCE_ANGLE_DEG: Real = 23.0;

/// Floor used when converting non-positive power to dB
pub const MIN_DB: Real = -50.0;

/// Calibrated WCM coefficients for one polarisation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaterCloudCoefficients {
    pub a: Real,
    pub b: Real,
    pub c: Real,
    pub d: Real,
    pub e: Real,
}

/// Coefficient lookup with one entry per supported polarisation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoefficientTable {
    pub vv: WaterCloudCoefficients,
    pub vh: WaterCloudCoefficients,
}

impl CoefficientTable {
    pub fn get(&self, polarization: Polarization) -> &WaterCloudCoefficients {
        match polarization {
            Polarization::VV => &self.vv,
            Polarization::VH => &self.vh,
        }
    }
}

impl Default for CoefficientTable {
    fn default() -> Self {
        Self {
            vv: WaterCloudCoefficients {
                a: 0.0846,
                b: 0.0615,
                c: -14.8465,
                d: 9.0406,
                e: 0.0,
            },
            vh: WaterCloudCoefficients {
                a: 0.0795,
                b: 0.1464,
                c: -14.8332,
                d: 14.4027,
                e: 0.0,
            },
        }
    }
}

/// Water Cloud Model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterCloudConfig {
    /// Incidence angle (degrees) used when no per-pixel angles are given
    pub incidence_angle_deg: Real,
    pub coefficients: CoefficientTable,
}

impl Default for WaterCloudConfig {
    fn default() -> Self {
        Self {
            incidence_angle_deg: DEFAULT_INCIDENCE_ANGLE_DEG,
            coefficients: CoefficientTable::default(),
        }
    }
}

impl WaterCloudConfig {
    /// Load a configuration from a coefficient XML document
    pub fn from_xml(xml_content: &str) -> OperatorResult<Self> {
        crate::io::coefficients::parse_water_cloud_config(xml_content)
    }
}

/// Per-pixel decomposition of the modelled backscatter (linear power)
#[derive(Debug, Clone, PartialEq)]
pub struct WaterCloudComponents {
    pub sigma0: PixelVector,
    pub sigma_veg: PixelVector,
    pub sigma_soil: PixelVector,
    pub tau: PixelVector,
}

/// Everything evaluated for a single pixel in one pass
#[derive(Debug, Clone, Copy)]
struct PixelTerms {
    tau: Real,
    sigma_veg: Real,
    sigma_soil: Real,
    sigma0: Real,
    d_veg: Real,
    d_soil: Real,
}

/// `scale * v^exponent`, exactly zero when `scale` is zero so that `E = 0`
/// does not produce `0 * inf` at `V = 0`.
fn scaled_power(scale: Real, v: Real, exponent: Real) -> Real {
    if scale == 0.0 {
        0.0
    } else {
        scale * v.powf(exponent)
    }
}

fn evaluate_pixel(coeffs: &WaterCloudCoefficients, mu: Real, v: Real, s: Real) -> PixelTerms {
    let WaterCloudCoefficients { a, b, c, d, e } = *coeffs;

    let tau = (-2.0 * b * v / mu).exp();
    let sigma_veg = a * v.powf(e) * mu * (1.0 - tau);
    let sigma_soil = 10f64.powf((c + d * s) / 10.0);
    let sigma0 = sigma_veg + tau * sigma_soil;

    // 2^(y + 1) * 5^y == 2 * 10^y, so the soil part of dV is 2 B tau sigma_soil / mu
    let d_veg = scaled_power(a * e * mu, v, e - 1.0) * (1.0 - tau)
        + 2.0 * a * b * v.powf(e) * tau
        - 2.0 * b * tau * sigma_soil / mu;
    let d_soil = d * LN_10 * tau * 10f64.powf((c + d * s) / 10.0 - 1.0);

    PixelTerms {
        tau,
        sigma_veg,
        sigma_soil,
        sigma0,
        d_veg,
        d_soil,
    }
}

/// Second derivatives `[[VV, VS], [SV, SS]]` for one pixel
fn pixel_hessian(coeffs: &WaterCloudCoefficients, mu: Real, v: Real, s: Real) -> [[Real; 2]; 2] {
    let WaterCloudCoefficients { a, b, c, d, e } = *coeffs;

    let k = 2.0 * b / mu;
    let tau = (-k * v).exp();
    let sigma_soil = 10f64.powf((c + d * s) / 10.0);
    let dl = d * LN_10 / 10.0;

    let d_vv = scaled_power(a * mu * e * (e - 1.0), v, e - 2.0) * (1.0 - tau)
        + scaled_power(2.0 * a * mu * e * k, v, e - 1.0) * tau
        - a * mu * k * k * v.powf(e) * tau
        + k * k * tau * sigma_soil;
    let d_vs = -k * tau * sigma_soil * dl;
    let d_ss = tau * sigma_soil * dl * dl;

    [[d_vv, d_vs], [d_vs, d_ss]]
}

/// Promote a 1D state vector to a single-row 2D block; 2D input is passed through
pub fn as_state_rows<D: Dimension>(x: ArrayView<'_, Real, D>) -> OperatorResult<ArrayView2<'_, Real>> {
    let x = x.into_dyn();
    match x.ndim() {
        1 => x
            .into_dimensionality::<Ix1>()
            .map(|row| row.insert_axis(Axis(0)))
            .map_err(|e| OperatorError::ShapeMismatch(format!("{}", e))),
        2 => x
            .into_dimensionality::<Ix2>()
            .map_err(|e| OperatorError::ShapeMismatch(format!("{}", e))),
        n => Err(OperatorError::ShapeMismatch(format!(
            "state vector must be 1D or 2D, got {} dimensions",
            n
        ))),
    }
}

/// Water Cloud Model evaluator
#[derive(Debug, Clone, Default)]
pub struct WaterCloudModel {
    config: WaterCloudConfig,
}

impl WaterCloudModel {
    /// Create a model with a custom configuration
    pub fn new(config: WaterCloudConfig) -> Self {
        Self { config }
    }

    /// Create a model with the documented default calibration
    pub fn standard() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &WaterCloudConfig {
        &self.config
    }

    pub fn coefficients(&self, polarization: Polarization) -> &WaterCloudCoefficients {
        self.config.coefficients.get(polarization)
    }

    fn default_cosines(&self, n: usize) -> Array1<Real> {
        Array1::from_elem(n, self.config.incidence_angle_deg.to_radians().cos())
    }

    fn check_rows(x: &ArrayView2<Real>) -> OperatorResult<()> {
        if x.ncols() != WCM_NUM_PARAMS {
            return Err(OperatorError::ShapeMismatch(format!(
                "Water Cloud Model expects {} parameters per pixel [V, S], got {}",
                WCM_NUM_PARAMS,
                x.ncols()
            )));
        }
        Ok(())
    }

    fn angle_cosines(&self, n: usize, angles_deg: Option<ArrayView1<Real>>) -> OperatorResult<Array1<Real>> {
        match angles_deg {
            None => Ok(self.default_cosines(n)),
            Some(angles) if angles.len() == n => Ok(angles.mapv(|deg| deg.to_radians().cos())),
            Some(angles) => Err(OperatorError::ShapeMismatch(format!(
                "{} incidence angles given for {} pixels",
                angles.len(),
                n
            ))),
        }
    }

    fn evaluate(
        &self,
        x: ArrayView2<Real>,
        polarization: Polarization,
        angles_deg: Option<ArrayView1<Real>>,
    ) -> OperatorResult<Vec<PixelTerms>> {
        Self::check_rows(&x)?;
        let coeffs = self.coefficients(polarization);
        let mus = self.angle_cosines(x.nrows(), angles_deg)?;

        Ok(x.outer_iter()
            .zip(mus.iter())
            .map(|(row, &mu)| evaluate_pixel(coeffs, mu, row[0], row[1]))
            .collect())
    }

    fn assemble(terms: &[PixelTerms]) -> (PixelVector, StateMatrix) {
        let sigma0 = terms.iter().map(|t| t.sigma0).collect::<Array1<_>>();
        let mut grad = Array2::zeros((terms.len(), WCM_NUM_PARAMS));
        for (i, t) in terms.iter().enumerate() {
            grad[[i, 0]] = t.d_veg;
            grad[[i, 1]] = t.d_soil;
        }
        (sigma0, grad)
    }

    /// Backscatter and gradient for each row `[V, S]` of `x`.
    ///
    /// The gradient has the same shape as `x`.
    pub fn forward(
        &self,
        x: ArrayView2<Real>,
        polarization: Polarization,
    ) -> OperatorResult<(PixelVector, StateMatrix)> {
        let terms = self.evaluate(x, polarization, None)?;
        Ok(Self::assemble(&terms))
    }

    /// Same as [`forward`](Self::forward) with one incidence angle (degrees) per pixel
    pub fn forward_with_angles(
        &self,
        x: ArrayView2<Real>,
        polarization: Polarization,
        angles_deg: ArrayView1<Real>,
    ) -> OperatorResult<(PixelVector, StateMatrix)> {
        let terms = self.evaluate(x, polarization, Some(angles_deg))?;
        Ok(Self::assemble(&terms))
    }

    /// Volume, surface and attenuation terms alongside the total backscatter
    pub fn components(
        &self,
        x: ArrayView2<Real>,
        polarization: Polarization,
    ) -> OperatorResult<WaterCloudComponents> {
        let terms = self.evaluate(x, polarization, None)?;
        Ok(WaterCloudComponents {
            sigma0: terms.iter().map(|t| t.sigma0).collect(),
            sigma_veg: terms.iter().map(|t| t.sigma_veg).collect(),
            sigma_soil: terms.iter().map(|t| t.sigma_soil).collect(),
            tau: terms.iter().map(|t| t.tau).collect(),
        })
    }

    /// Per-pixel Hessian blocks, shape `(pixels, 2, 2)`
    pub fn hessian(
        &self,
        x: ArrayView2<Real>,
        polarization: Polarization,
        angles_deg: Option<ArrayView1<Real>>,
    ) -> OperatorResult<HessianCube> {
        Self::check_rows(&x)?;
        let coeffs = self.coefficients(polarization);
        let mus = self.angle_cosines(x.nrows(), angles_deg)?;

        let mut hess = Array3::zeros((x.nrows(), WCM_NUM_PARAMS, WCM_NUM_PARAMS));
        for (i, (row, &mu)) in x.outer_iter().zip(mus.iter()).enumerate() {
            let block = pixel_hessian(coeffs, mu, row[0], row[1]);
            for (p, block_row) in block.iter().enumerate() {
                for (q, &value) in block_row.iter().enumerate() {
                    hess[[i, p, q]] = value;
                }
            }
        }
        Ok(hess)
    }

    /// Parallel evaluation using Rayon; results match [`forward`](Self::forward) exactly
    #[cfg(feature = "parallel")]
    pub fn forward_parallel(
        &self,
        x: ArrayView2<Real>,
        polarization: Polarization,
    ) -> OperatorResult<(PixelVector, StateMatrix)> {
        use rayon::prelude::*;

        Self::check_rows(&x)?;
        log::debug!("Evaluating Water Cloud Model for {} pixels in parallel", x.nrows());

        let coeffs = self.coefficients(polarization);
        let mu = self.config.incidence_angle_deg.to_radians().cos();

        let terms: Vec<PixelTerms> = (0..x.nrows())
            .into_par_iter()
            .map(|i| evaluate_pixel(coeffs, mu, x[[i, 0]], x[[i, 1]]))
            .collect();

        Ok(Self::assemble(&terms))
    }
}

/// Water Cloud Model with the default calibration.
///
/// `x` is either a single `[V, S]` pair or a 2D array with one pair per row;
/// `polarisation` is `"VV"` or `"VH"`. Returns `(sigma0, grad)` in linear
/// power units, with `grad` shaped like the (promoted) input.
pub fn sar_observation_operator<D: Dimension>(
    x: ArrayView<'_, Real, D>,
    polarisation: &str,
) -> OperatorResult<(PixelVector, StateMatrix)> {
    let polarization: Polarization = polarisation.parse()?;
    let rows = as_state_rows(x)?;
    WaterCloudModel::standard().forward(rows, polarization)
}

/// Convert linear power to dB
pub fn linear_to_db(linear: &Array2<Real>) -> Array2<Real> {
    linear.mapv(|x| if x > 0.0 { 10.0 * x.log10() } else { MIN_DB })
}

/// Convert dB to linear power
pub fn db_to_linear(db: &Array2<Real>) -> Array2<Real> {
    db.mapv(|x| 10f64.powf(x / 10.0))
}
