use crate::core::operator::{
    assemble, observed_rows, select_bands, select_pixels, Emulator, LinearisedOperator,
    ObservationOperator, OperatorRequest,
};
use crate::core::water_cloud::{WaterCloudConfig, WaterCloudModel, WCM_NUM_PARAMS};
use crate::types::{
    HessianCube, OperatorError, OperatorResult, PixelVector, Polarization, Real, StateMatrix,
    VariableDescriptor,
};
use ndarray::{Array1, ArrayView2};
use std::collections::{BTreeMap, BTreeSet};

const S1_BANDS: &[(&str, &[&str])] = &[("S1", &["sigma0_VV", "sigma0_VH"])];

/// Water Cloud Model bound to one polarisation, usable wherever an [`Emulator`] is expected
#[derive(Debug, Clone)]
pub struct WaterCloudEmulator {
    model: WaterCloudModel,
    polarization: Polarization,
}

impl WaterCloudEmulator {
    pub fn new(model: WaterCloudModel, polarization: Polarization) -> Self {
        Self {
            model,
            polarization,
        }
    }

    pub fn polarization(&self) -> Polarization {
        self.polarization
    }
}

impl Emulator for WaterCloudEmulator {
    fn num_inputs(&self) -> usize {
        WCM_NUM_PARAMS
    }

    fn predict(&self, x: ArrayView2<Real>) -> OperatorResult<(PixelVector, StateMatrix)> {
        self.model.forward(x, self.polarization)
    }

    fn hessian(&self, x: ArrayView2<Real>) -> OperatorResult<Option<HessianCube>> {
        self.model.hessian(x, self.polarization, None).map(Some)
    }
}

/// Sentinel-1 observation operator. Band 0 is VV, band 1 is VH.
///
/// Without an emulator in the request the analytic Water Cloud Model is used,
/// with per-pixel incidence angles when the metadata carries them.
#[derive(Debug, Clone, Default)]
pub struct SarObservationOperator {
    model: WaterCloudModel,
}

impl SarObservationOperator {
    pub fn new(config: WaterCloudConfig) -> Self {
        Self {
            model: WaterCloudModel::new(config),
        }
    }

    pub fn model(&self) -> &WaterCloudModel {
        &self.model
    }

    /// Emulator handle for one band, e.g. to attach to an observation record
    pub fn emulator_for_band(&self, band: usize) -> OperatorResult<WaterCloudEmulator> {
        let polarization = Polarization::from_band(band)?;
        Ok(WaterCloudEmulator::new(self.model.clone(), polarization))
    }

    fn linearise_analytic(
        &self,
        request: &OperatorRequest<'_>,
        polarization: Polarization,
    ) -> OperatorResult<LinearisedOperator> {
        let selection = select_pixels(request, WCM_NUM_PARAMS)?;
        let x_obs = observed_rows(request.x_prev, &selection);

        let angles = match &request.metadata.incidence_angle {
            None => None,
            Some(incidence) => {
                let state_angles = incidence.at_state_pixels(request.state_mask)?;
                Some(
                    selection
                        .observed_index
                        .iter()
                        .map(|&i| state_angles[i])
                        .collect::<Array1<Real>>(),
                )
            }
        };

        let (h, grad) = match &angles {
            None => self.model.forward(x_obs.view(), polarization)?,
            Some(a) => self.model.forward_with_angles(x_obs.view(), polarization, a.view())?,
        };

        let hessian = if request.calc_hessian {
            Some(self.model.hessian(
                x_obs.view(),
                polarization,
                angles.as_ref().map(|a| a.view()),
            )?)
        } else {
            None
        };

        assemble(&selection, request.num_params, h, grad, hessian)
    }

    fn linearise_emulated(
        &self,
        request: &OperatorRequest<'_>,
        emulator: &dyn Emulator,
    ) -> OperatorResult<LinearisedOperator> {
        let selection = select_pixels(request, emulator.num_inputs())?;
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

impl ObservationOperator for SarObservationOperator {
    fn supported_variables(&self) -> Vec<VariableDescriptor> {
        vec![
            VariableDescriptor::new(
                "lai",
                "Leaf Area Index",
                "Vegetation descriptor V of the Water Cloud Model",
                "m2/m2",
            ),
            VariableDescriptor::new(
                "sm",
                "Soil Moisture",
                "Soil moisture linked quantity S driving the soil backscatter term",
                "m3/m3",
            ),
        ]
    }

    fn supported_data_types(&self) -> BTreeSet<String> {
        S1_BANDS.iter().map(|(name, _)| name.to_string()).collect()
    }

    fn required_bands(
        &self,
        data_types: Option<&BTreeSet<String>>,
    ) -> OperatorResult<BTreeMap<String, Vec<String>>> {
        select_bands(S1_BANDS, data_types)
    }

    fn create_observation_operator(
        &self,
        request: &OperatorRequest<'_>,
    ) -> OperatorResult<LinearisedOperator> {
        let polarization = Polarization::from_band(request.band)?;
        log::info!(
            "Creating SAR observation operator for band {} ({}), {} state pixels",
            request.band,
            polarization,
            request.x_prev.nrows()
        );

        match request.emulator {
            Some(emulator) => self.linearise_emulated(request, emulator),
            None => self.linearise_analytic(request, polarization),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operator::{IncidenceAngle, ObservationMetadata};
    use crate::types::Mask;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_declarations() {
        let op = SarObservationOperator::default();
        let names: Vec<_> = op
            .supported_variables()
            .iter()
            .map(|v| v.short_name().to_string())
            .collect();
        assert_eq!(names, vec!["lai", "sm"]);
        assert_eq!(op.supported_variables(), op.supported_variables());
        assert!(op.supported_data_types().contains("S1"));
        assert_eq!(op.required_bands(None).unwrap()["S1"].len(), 2);
    }

    #[test]
    fn test_analytic_linearisation_with_masked_pixel() {
        let op = SarObservationOperator::default();
        let metadata = ObservationMetadata::default();
        let mask = array![[true, false, true]];
        let state_mask = Mask::from_elem((1, 3), true);
        let x = array![[0.5, 2.0], [1.0, 1.0], [0.5, 2.0]];

        let request = OperatorRequest {
            num_params: 2,
            emulator: None,
            metadata: &metadata,
            mask: &mask,
            state_mask: &state_mask,
            x_prev: x.view(),
            band: 0,
            calc_hessian: false,
        };
        let lin = op.create_observation_operator(&request).unwrap();

        assert_abs_diff_eq!(lin.h[0], 1.975, epsilon = 1e-3);
        assert_eq!(lin.h[1], 0.0);
        assert_eq!(lin.h[0], lin.h[2]);
        assert_eq!(lin.jacobian.shape(), (3, 6));
        assert_eq!(lin.jacobian.nnz(), 4);
        assert!(lin.hessian.is_none());
    }

    #[test]
    fn test_per_pixel_angles_from_metadata() {
        let op = SarObservationOperator::default();
        let metadata = ObservationMetadata::default()
            .with_incidence_angle(IncidenceAngle::PerPixel(array![[23.0, 45.0]]));
        let mask = Mask::from_elem((1, 2), true);
        let x = array![[0.5, 2.0], [0.5, 2.0]];

        let request = OperatorRequest {
            num_params: 2,
            emulator: None,
            metadata: &metadata,
            mask: &mask,
            state_mask: &mask,
            x_prev: x.view(),
            band: 0,
            calc_hessian: true,
        };
        let lin = op.create_observation_operator(&request).unwrap();

        assert_abs_diff_eq!(lin.h[0], 1.975, epsilon = 1e-3);
        assert!(lin.h[1] < lin.h[0]);
        assert_eq!(lin.hessian.unwrap().dim(), (2, 2, 2));
    }

    #[test]
    fn test_emulator_path_matches_analytic() {
        let op = SarObservationOperator::default();
        let emulator = op.emulator_for_band(1).unwrap();
        let metadata = ObservationMetadata::default();
        let mask = Mask::from_elem((2, 2), true);
        let x = array![[0.5, 1.1], [1.0, 0.8], [2.0, 1.5], [0.1, 0.2]];

        let mut request = OperatorRequest {
            num_params: 2,
            emulator: None,
            metadata: &metadata,
            mask: &mask,
            state_mask: &mask,
            x_prev: x.view(),
            band: 1,
            calc_hessian: true,
        };
        let analytic = op.create_observation_operator(&request).unwrap();
        request.emulator = Some(&emulator);
        let emulated = op.create_observation_operator(&request).unwrap();

        assert_eq!(analytic.h, emulated.h);
        assert_eq!(analytic.jacobian, emulated.jacobian);
        assert_eq!(analytic.hessian, emulated.hessian);
    }

    /// Emulator without second derivatives
    struct GradientOnly(WaterCloudModel);

    impl Emulator for GradientOnly {
        fn num_inputs(&self) -> usize {
            WCM_NUM_PARAMS
        }

        fn predict(&self, x: ArrayView2<Real>) -> OperatorResult<(PixelVector, StateMatrix)> {
            self.0.forward(x, Polarization::VV)
        }
    }

    #[test]
    fn test_emulator_without_hessian() {
        let op = SarObservationOperator::default();
        let emulator = GradientOnly(WaterCloudModel::standard());
        let metadata = ObservationMetadata::default();
        let mask = Mask::from_elem((1, 2), true);
        let x = array![[0.5, 2.0], [1.0, 0.4]];

        let mut request = OperatorRequest {
            num_params: 2,
            emulator: Some(&emulator),
            metadata: &metadata,
            mask: &mask,
            state_mask: &mask,
            x_prev: x.view(),
            band: 0,
            calc_hessian: false,
        };
        let lin = op.create_observation_operator(&request).unwrap();
        assert_abs_diff_eq!(lin.h[0], 1.975, epsilon = 1e-3);
        assert!(lin.hessian.is_none());

        request.calc_hessian = true;
        assert!(matches!(
            op.create_observation_operator(&request),
            Err(OperatorError::Configuration(_))
        ));
    }

    #[test]
    fn test_hessian_restricted_to_num_params() {
        let op = SarObservationOperator::default();
        let metadata = ObservationMetadata::default();
        let mask = array![[true, false, true]];
        let state_mask = Mask::from_elem((1, 3), true);
        let x = array![[0.5, 2.0], [1.0, 1.0], [2.5, 0.7]];

        let request = OperatorRequest {
            num_params: 1,
            emulator: None,
            metadata: &metadata,
            mask: &mask,
            state_mask: &state_mask,
            x_prev: x.view(),
            band: 1,
            calc_hessian: true,
        };
        let lin = op.create_observation_operator(&request).unwrap();
        let full = op.model().hessian(x.view(), Polarization::VH, None).unwrap();
        let (_, grad) = op.model().forward(x.view(), Polarization::VH).unwrap();

        let hessian = lin.hessian.unwrap();
        assert_eq!(hessian.dim(), (3, 1, 1));
        assert_eq!(hessian[[0, 0, 0]], full[[0, 0, 0]]);
        assert_eq!(hessian[[1, 0, 0]], 0.0);
        assert_eq!(hessian[[2, 0, 0]], full[[2, 0, 0]]);

        assert_eq!(lin.jacobian.shape(), (3, 3));
        assert_eq!(lin.jacobian.get(2, 2), grad[[2, 0]]);
        assert_eq!(lin.jacobian.row(1).count(), 0);
    }

    #[test]
    fn test_unsupported_band() {
        let op = SarObservationOperator::default();
        let metadata = ObservationMetadata::default();
        let mask = Mask::from_elem((1, 1), true);
        let x = array![[0.5, 1.1]];

        let request = OperatorRequest {
            num_params: 2,
            emulator: None,
            metadata: &metadata,
            mask: &mask,
            state_mask: &mask,
            x_prev: x.view(),
            band: 2,
            calc_hessian: false,
        };
        assert!(matches!(
            op.create_observation_operator(&request),
            Err(OperatorError::UnsupportedBand { band: 2, .. })
        ));
    }
}
