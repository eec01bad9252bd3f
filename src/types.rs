use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Scalar type used for all state and observation values
pub type Real = f64;

/// State vector block: one row per pixel, one column per parameter
pub type StateMatrix = Array2<Real>;

/// Per-pixel predictions (one value per pixel, flattened)
pub type PixelVector = Array1<Real>;

/// Per-pixel Hessian blocks (pixel x param x param)
pub type HessianCube = Array3<Real>;

/// 2D validity mask, `true` means the pixel is usable
pub type Mask = Array2<bool>;

/// Radar polarisations with a calibrated Water Cloud parameterisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
}

impl Polarization {
    /// All polarisations, in band order
    pub const ALL: [Polarization; 2] = [Polarization::VV, Polarization::VH];

    /// Band index used by the observation operators (0 = VV, 1 = VH)
    pub fn from_band(band: usize) -> OperatorResult<Self> {
        Self::ALL
            .get(band)
            .copied()
            .ok_or(OperatorError::UnsupportedBand {
                band,
                supported: Self::ALL.len(),
            })
    }

    pub fn band_index(&self) -> usize {
        match self {
            Polarization::VV => 0,
            Polarization::VH => 1,
        }
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
        }
    }
}

impl FromStr for Polarization {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            _ => Err(OperatorError::UnsupportedPolarisation(s.to_string())),
        }
    }
}

/// Metadata describing one retrievable physical quantity.
///
/// Identity is by `short_name`; all fields are fixed at construction.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    short_name: String,
    long_name: String,
    description: String,
    unit: String,
}

impl VariableDescriptor {
    pub fn new(
        short_name: impl Into<String>,
        long_name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            short_name: short_name.into(),
            long_name: long_name.into(),
            description: description.into(),
            unit: unit.into(),
        }
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn long_name(&self) -> &str {
        &self.long_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }
}

impl PartialEq for VariableDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.short_name == other.short_name
    }
}

impl std::hash::Hash for VariableDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.short_name.hash(state);
    }
}

/// Error types for observation operators
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("Unsupported polarisation '{0}': only VV and VH are available")]
    UnsupportedPolarisation(String),

    #[error("Unsupported band {band}: operator provides bands 0..{supported}")]
    UnsupportedBand { band: usize, supported: usize },

    #[error("Unsupported model version '{0}': expected PROSAIL_D or PROSAIL_5")]
    UnsupportedModelVersion(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid uncertainty {value} at valid pixel {index}")]
    InvalidUncertainty { index: usize, value: Real },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Emulator error: {0}")]
    Emulator(String),
}

/// Result type for operator calls
pub type OperatorResult<T> = Result<T, OperatorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_polarization_parsing() {
        assert_eq!("VV".parse::<Polarization>().unwrap(), Polarization::VV);
        assert_eq!("VH".parse::<Polarization>().unwrap(), Polarization::VH);

        for bad in ["HH", "HV", "", "VVH", "vv", "Vh", " VV", "VH "] {
            let err = bad.parse::<Polarization>().unwrap_err();
            assert!(matches!(err, OperatorError::UnsupportedPolarisation(ref p) if p == bad));
        }
    }

    #[test]
    fn test_polarization_band_mapping() {
        for pol in Polarization::ALL {
            assert_eq!(Polarization::from_band(pol.band_index()).unwrap(), pol);
        }
        assert!(matches!(
            Polarization::from_band(2),
            Err(OperatorError::UnsupportedBand { band: 2, supported: 2 })
        ));
    }

    #[test]
    fn test_variable_descriptor_identity() {
        let lai = VariableDescriptor::new("lai", "Leaf Area Index", "One-sided leaf area", "m2/m2");
        let other = VariableDescriptor::new("lai", "LAI", "", "");
        let sm = VariableDescriptor::new("sm", "Soil Moisture", "", "m3/m3");

        assert_eq!(lai.short_name(), "lai");
        assert_eq!(lai.long_name(), "Leaf Area Index");
        assert_eq!(lai.unit(), "m2/m2");
        assert_eq!(lai, other);
        assert_ne!(lai, sm);

        let set: HashSet<_> = [lai, other, sm].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
