use crate::core::water_cloud::{
    CoefficientTable, WaterCloudCoefficients, WaterCloudConfig, DEFAULT_INCIDENCE_ANGLE_DEG,
};
use crate::types::{OperatorError, OperatorResult, Polarization, Real};
use quick_xml::de::from_str;
use serde::Deserialize;

/// Root `<waterCloudModel>` element of a coefficient file
#[derive(Debug, Deserialize)]
pub struct WaterCloudXml {
    #[serde(rename = "incidenceAngle", default)]
    pub incidence_angle: Option<Real>,
    #[serde(rename = "coefficients", default)]
    pub coefficients: Vec<CoefficientsXml>,
}

/// One `<coefficients polarisation="..">` block
#[derive(Debug, Deserialize)]
pub struct CoefficientsXml {
    #[serde(rename = "@polarisation")]
    pub polarisation: String,
    #[serde(default)]
    pub a: Option<Real>,
    #[serde(default)]
    pub b: Option<Real>,
    #[serde(default)]
    pub c: Option<Real>,
    #[serde(default)]
    pub d: Option<Real>,
    #[serde(default)]
    pub e: Option<Real>,
}

impl CoefficientsXml {
    fn to_coefficients(&self, polarization: Polarization) -> OperatorResult<WaterCloudCoefficients> {
        let get = |value: Option<Real>, name: &str| {
            value.ok_or_else(|| {
                OperatorError::Configuration(format!(
                    "missing coefficient '{}' for {}",
                    name, polarization
                ))
            })
        };

        Ok(WaterCloudCoefficients {
            a: get(self.a, "a")?,
            b: get(self.b, "b")?,
            c: get(self.c, "c")?,
            d: get(self.d, "d")?,
            e: get(self.e, "e")?,
        })
    }
}

/// Attribute values may be padded with whitespace; case still matters
fn polarisation_attribute(value: &str) -> OperatorResult<Polarization> {
    value.trim().parse()
}

/// Parse a Water Cloud Model configuration document.
///
/// ```xml
/// <waterCloudModel>
///   <incidenceAngle>23.0</incidenceAngle>
///   <coefficients polarisation="VV"><a>0.0846</a><b>0.0615</b><c>-14.8465</c><d>9.0406</d><e>0</e></coefficients>
///   <coefficients polarisation="VH">...</coefficients>
/// </waterCloudModel>
/// ```
///
/// Both polarisations must be present; the incidence angle defaults to 23 degrees.
pub fn parse_water_cloud_config(xml_content: &str) -> OperatorResult<WaterCloudConfig> {
    log::debug!("Parsing Water Cloud coefficients (length: {})", xml_content.len());

    let root = from_str::<WaterCloudXml>(xml_content).map_err(|e| {
        OperatorError::XmlParsing(format!("Failed to parse coefficient XML: {}", e))
    })?;

    let mut vv = None;
    let mut vh = None;
    for block in &root.coefficients {
        let polarization = polarisation_attribute(&block.polarisation)?;
        let slot = match polarization {
            Polarization::VV => &mut vv,
            Polarization::VH => &mut vh,
        };
        if slot.is_some() {
            return Err(OperatorError::Configuration(format!(
                "coefficients for {} given more than once",
                polarization
            )));
        }
        *slot = Some(block.to_coefficients(polarization)?);
    }

    let missing = |pol: Polarization| {
        OperatorError::Configuration(format!("no coefficients for {} polarisation", pol))
    };
    let coefficients = CoefficientTable {
        vv: vv.ok_or_else(|| missing(Polarization::VV))?,
        vh: vh.ok_or_else(|| missing(Polarization::VH))?,
    };

    let incidence_angle_deg = match root.incidence_angle {
        Some(angle) => angle,
        None => {
            log::warn!(
                "No incidenceAngle in coefficient file, using {:.1} deg",
                DEFAULT_INCIDENCE_ANGLE_DEG
            );
            DEFAULT_INCIDENCE_ANGLE_DEG
        }
    };
    log::info!(
        "Loaded Water Cloud coefficients (incidence angle {:.1} deg)",
        incidence_angle_deg
    );

    Ok(WaterCloudConfig {
        incidence_angle_deg,
        coefficients,
    })
}
