//! Optical forward operator boundary (PROSPECT + SAIL).
//!
//! The radiative transfer physics lives in an external routine behind the
//! [`RadiativeTransfer`] trait; this module only marshals parameters and
//! validates what comes back. No gradients are computed here: the optical
//! observation operator linearises through an
//! [`Emulator`](crate::core::operator::Emulator) instead.

use crate::core::operator::{
    assemble, observed_rows, select_bands, select_pixels, LinearisedOperator,
    ObservationOperator, OperatorRequest, ViewGeometry,
};
use crate::types::{OperatorError, OperatorResult, Real, VariableDescriptor};
use ndarray::Array1;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// First wavelength of the simulated spectrum (nm)
pub const SPECTRUM_START_NM: usize = 400;
/// Last wavelength of the simulated spectrum (nm)
pub const SPECTRUM_END_NM: usize = 2500;
/// One reflectance value per nm
pub const SPECTRUM_LEN: usize = SPECTRUM_END_NM - SPECTRUM_START_NM + 1;

pub const DEFAULT_HOTSPOT: Real = 0.01;

const S2_BANDS: &[(&str, &[&str])] = &[(
    "S2",
    &["B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B11", "B12"],
)];

/// PROSPECT variant used inside PROSAIL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProsailVersion {
    /// PROSPECT-D, with leaf anthocyanins
    ProsailD,
    /// PROSPECT-5
    Prosail5,
}

impl ProsailVersion {
    /// Length of the state vector for this version
    pub fn num_params(&self) -> usize {
        self.parameter_names().len()
    }

    /// State vector ordering
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            ProsailVersion::ProsailD => &[
                "n", "ant", "cab", "car", "cbrown", "cw", "cm", "lai", "ala", "rsoil", "psoil",
            ],
            ProsailVersion::Prosail5 => &[
                "n", "cab", "car", "cbrown", "cw", "cm", "lai", "ala", "rsoil", "psoil",
            ],
        }
    }
}

impl std::fmt::Display for ProsailVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProsailVersion::ProsailD => write!(f, "PROSAIL_D"),
            ProsailVersion::Prosail5 => write!(f, "PROSAIL_5"),
        }
    }
}

impl FromStr for ProsailVersion {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PROSAIL_D" => Ok(ProsailVersion::ProsailD),
            "PROSAIL_5" => Ok(ProsailVersion::Prosail5),
            _ => Err(OperatorError::UnsupportedModelVersion(s.to_string())),
        }
    }
}

/// Leaf, canopy and soil parameters passed to PROSAIL
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProsailParameters {
    /// Leaf structure parameter
    pub n: Real,
    /// Anthocyanins (ug/cm2), PROSPECT-D only
    pub ant: Option<Real>,
    /// Chlorophyll a+b (ug/cm2)
    pub cab: Real,
    /// Carotenoids (ug/cm2)
    pub car: Real,
    /// Brown pigments
    pub cbrown: Real,
    /// Equivalent water thickness (cm)
    pub cw: Real,
    /// Dry matter (g/cm2)
    pub cm: Real,
    /// Leaf area index (m2/m2)
    pub lai: Real,
    /// Average leaf angle (degrees)
    pub ala: Real,
    /// Soil brightness
    pub rsoil: Real,
    /// Soil wetness
    pub psoil: Real,
}

impl ProsailParameters {
    /// Unpack a state vector ordered as in [`ProsailVersion::parameter_names`]
    pub fn from_state(x: &[Real], version: ProsailVersion) -> OperatorResult<Self> {
        if x.len() != version.num_params() {
            return Err(OperatorError::ShapeMismatch(format!(
                "{} expects {} parameters, got {}",
                version,
                version.num_params(),
                x.len()
            )));
        }

        let params = match version {
            ProsailVersion::ProsailD => Self {
                n: x[0],
                ant: Some(x[1]),
                cab: x[2],
                car: x[3],
                cbrown: x[4],
                cw: x[5],
                cm: x[6],
                lai: x[7],
                ala: x[8],
                rsoil: x[9],
                psoil: x[10],
            },
            ProsailVersion::Prosail5 => Self {
                n: x[0],
                ant: None,
                cab: x[1],
                car: x[2],
                cbrown: x[3],
                cw: x[4],
                cm: x[5],
                lai: x[6],
                ala: x[7],
                rsoil: x[8],
                psoil: x[9],
            },
        };
        Ok(params)
    }
}

/// External PROSPECT + SAIL routine
pub trait RadiativeTransfer: Send + Sync {
    /// Canopy reflectance, one value per nm from 400 to 2500 nm
    fn run_prosail(
        &self,
        params: &ProsailParameters,
        geometry: &ViewGeometry,
        hotspot: Real,
        version: ProsailVersion,
    ) -> OperatorResult<Array1<Real>>;
}

/// Wavelengths (nm) matching the reflectance spectrum
pub fn wavelengths() -> Array1<Real> {
    Array1::from_iter((SPECTRUM_START_NM..=SPECTRUM_END_NM).map(|nm| nm as Real))
}

/// Canopy reflectance for one state vector.
///
/// `version` is `"PROSAIL_D"` or `"PROSAIL_5"` (case-insensitive); the hotspot
/// parameter defaults to [`DEFAULT_HOTSPOT`].
pub fn optical_forward_operator(
    rt: &dyn RadiativeTransfer,
    x: &[Real],
    sza: Real,
    vza: Real,
    raa: Real,
    version: &str,
    hotspot: Option<Real>,
) -> OperatorResult<Array1<Real>> {
    let version: ProsailVersion = version.parse()?;
    let params = ProsailParameters::from_state(x, version)?;
    let geometry = ViewGeometry { sza, vza, raa };

    let rho = rt.run_prosail(&params, &geometry, hotspot.unwrap_or(DEFAULT_HOTSPOT), version)?;
    if rho.len() != SPECTRUM_LEN {
        return Err(OperatorError::ShapeMismatch(format!(
            "radiative transfer returned {} values, expected {}",
            rho.len(),
            SPECTRUM_LEN
        )));
    }
    Ok(rho)
}

/// Sentinel-2 observation operator linearised through a per-band emulator
#[derive(Debug, Clone)]
pub struct OpticalObservationOperator {
    version: ProsailVersion,
}

impl Default for OpticalObservationOperator {
    fn default() -> Self {
        Self::new(ProsailVersion::ProsailD)
    }
}

impl OpticalObservationOperator {
    pub fn new(version: ProsailVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> ProsailVersion {
        self.version
    }

    fn num_bands() -> usize {
        S2_BANDS[0].1.len()
    }
}

impl ObservationOperator for OpticalObservationOperator {
    fn supported_variables(&self) -> Vec<VariableDescriptor> {
        self.version
            .parameter_names()
            .iter()
            .map(|&name| {
                let (long_name, unit) = match name {
                    "n" => ("Leaf Structure Parameter", "-"),
                    "ant" => ("Leaf Anthocyanin Content", "ug/cm2"),
                    "cab" => ("Leaf Chlorophyll Content", "ug/cm2"),
                    "car" => ("Leaf Carotenoid Content", "ug/cm2"),
                    "cbrown" => ("Leaf Senescent Material", "-"),
                    "cw" => ("Leaf Water Content", "cm"),
                    "cm" => ("Leaf Dry Matter Content", "g/cm2"),
                    "lai" => ("Leaf Area Index", "m2/m2"),
                    "ala" => ("Average Leaf Angle", "deg"),
                    "rsoil" => ("Soil Brightness", "-"),
                    "psoil" => ("Soil Wetness", "-"),
                    _ => ("PROSAIL Parameter", "-"),
                };
                VariableDescriptor::new(name, long_name, format!("PROSAIL parameter {}", name), unit)
            })
            .collect()
    }

    fn supported_data_types(&self) -> BTreeSet<String> {
        S2_BANDS.iter().map(|(name, _)| name.to_string()).collect()
    }

    fn required_bands(
        &self,
        data_types: Option<&BTreeSet<String>>,
    ) -> OperatorResult<BTreeMap<String, Vec<String>>> {
        select_bands(S2_BANDS, data_types)
    }

    fn create_observation_operator(
        &self,
        request: &OperatorRequest<'_>,
    ) -> OperatorResult<LinearisedOperator> {
        if request.band >= Self::num_bands() {
            return Err(OperatorError::UnsupportedBand {
                band: request.band,
                supported: Self::num_bands(),
            });
        }
        log::info!(
            "Creating optical observation operator for band {} ({}), {} state pixels",
            request.band,
            self.version,
            request.x_prev.nrows()
        );

        let emulator = request.emulator.ok_or_else(|| {
            OperatorError::Configuration(format!(
                "optical band {} needs an emulator to linearise {}",
                request.band, self.version
            ))
        })?;
        if emulator.num_inputs() != self.version.num_params() {
            return Err(OperatorError::Configuration(format!(
                "emulator takes {} inputs, {} has {} parameters",
                emulator.num_inputs(),
                self.version,
                self.version.num_params()
            )));
        }

        let selection = select_pixels(request, self.version.num_params())?;
        let x_obs = observed_rows(request.x_prev, &selection);

        let (h, grad) = emulator.predict(x_obs.view())?;
        let hessian = if request.calc_hessian {
            Some(emulator.hessian(x_obs.view())?.ok_or_else(|| {
                OperatorError::Configuration("emulator cannot provide a Hessian".to_string())
            })?)
        } else {
            None
        };

        assemble(&selection, request.num_params, h, grad, hessian)
    }
}
