use crate::core::operator::{Emulator, ObservationMetadata};
use crate::core::precision::{
    build_precision_matrix, build_precision_matrix_scalar, estimate_uncertainty, UncertaintyModel,
};
use crate::core::sparse::CsrMatrix;
use crate::types::{Mask, OperatorError, OperatorResult, Polarization, Real};
use chrono::NaiveDateTime;
use ndarray::{Array2, Zip};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Uncertainty attached to an observation
#[derive(Debug, Clone, PartialEq)]
pub enum Uncertainty {
    /// One value for every pixel
    Scalar(Real),
    /// One value per pixel, same shape as the observation
    PerPixel(Array2<Real>),
    /// Ready-made precision matrix
    Precision(CsrMatrix),
}

/// Everything the operators need for one (timestep, band)
#[derive(Clone)]
pub struct ObservationRecord {
    pub observations: Array2<Real>,
    pub uncertainty: Uncertainty,
    pub mask: Mask,
    pub metadata: ObservationMetadata,
    pub emulator: Option<Arc<dyn Emulator>>,
}

impl std::fmt::Debug for ObservationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationRecord")
            .field("shape", &self.observations.dim())
            .field("uncertainty", &self.uncertainty)
            .field("valid_pixels", &self.mask.iter().filter(|&&ok| ok).count())
            .field("metadata", &self.metadata)
            .field("emulator", &self.emulator.is_some())
            .finish()
    }
}

impl ObservationRecord {
    pub fn new(
        observations: Array2<Real>,
        uncertainty: Uncertainty,
        mask: Mask,
        metadata: ObservationMetadata,
        emulator: Option<Arc<dyn Emulator>>,
    ) -> OperatorResult<Self> {
        if observations.shape() != mask.shape() {
            return Err(OperatorError::ShapeMismatch(format!(
                "observations {:?} and mask {:?} differ",
                observations.shape(),
                mask.shape()
            )));
        }
        let pixels = observations.len();
        match &uncertainty {
            Uncertainty::PerPixel(u) if u.shape() != observations.shape() => {
                return Err(OperatorError::ShapeMismatch(format!(
                    "uncertainty {:?} and observations {:?} differ",
                    u.shape(),
                    observations.shape()
                )));
            }
            Uncertainty::Precision(p) if p.shape() != (pixels, pixels) => {
                return Err(OperatorError::ShapeMismatch(format!(
                    "precision matrix {:?} does not match {} pixels",
                    p.shape(),
                    pixels
                )));
            }
            _ => {}
        }

        Ok(Self {
            observations,
            uncertainty,
            mask,
            metadata,
            emulator,
        })
    }

    /// Observation weighting for the inversion cost function
    pub fn precision_matrix(&self) -> OperatorResult<CsrMatrix> {
        match &self.uncertainty {
            Uncertainty::Scalar(sigma) => build_precision_matrix_scalar(*sigma, &self.mask),
            Uncertainty::PerPixel(sigma) => build_precision_matrix(sigma, &self.mask),
            Uncertainty::Precision(matrix) => Ok(matrix.clone()),
        }
    }

    pub fn emulator(&self) -> Option<&dyn Emulator> {
        self.emulator.as_deref()
    }
}

/// Data-access collaborator: supplies observation records per (timestep, band)
pub trait ObservationSource {
    /// Available acquisition times, ascending
    fn timesteps(&self) -> Vec<NaiveDateTime>;

    fn get_band_data(&self, timestep: NaiveDateTime, band: usize) -> OperatorResult<ObservationRecord>;
}

/// Backscatter of one Sentinel-1 acquisition, already on the state grid
#[derive(Debug, Clone)]
pub struct SarScene {
    bands: BTreeMap<Polarization, Array2<Real>>,
    mask: Mask,
    metadata: ObservationMetadata,
}

impl SarScene {
    /// Scene whose mask marks pixels valid when every band is finite and positive
    pub fn new(
        bands: BTreeMap<Polarization, Array2<Real>>,
        metadata: ObservationMetadata,
    ) -> OperatorResult<Self> {
        let shape = match bands.values().next() {
            Some(first) => first.dim(),
            None => {
                return Err(OperatorError::Configuration(
                    "a scene needs at least one band".to_string(),
                ))
            }
        };

        let mut mask = Mask::from_elem(shape, true);
        for (pol, data) in &bands {
            if data.dim() != shape {
                return Err(OperatorError::ShapeMismatch(format!(
                    "band {} has shape {:?}, expected {:?}",
                    pol,
                    data.dim(),
                    shape
                )));
            }
            Zip::from(&mut mask)
                .and(data)
                .for_each(|ok, &value| *ok = *ok && value.is_finite() && value > 0.0);
        }

        Ok(Self {
            bands,
            mask,
            metadata,
        })
    }

    /// Restrict the validity mask further
    pub fn with_mask(mut self, mask: Mask) -> OperatorResult<Self> {
        if mask.dim() != self.mask.dim() {
            return Err(OperatorError::ShapeMismatch(format!(
                "mask {:?} does not match scene {:?}",
                mask.dim(),
                self.mask.dim()
            )));
        }
        Zip::from(&mut self.mask)
            .and(&mask)
            .for_each(|ok, &keep| *ok = *ok && keep);
        Ok(self)
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }
}

/// Sentinel-1 observations held in memory. Band 0 is VV, band 1 is VH.
#[derive(Default)]
pub struct InMemoryObservations {
    scenes: BTreeMap<NaiveDateTime, SarScene>,
    emulators: BTreeMap<Polarization, Arc<dyn Emulator>>,
    uncertainty_model: UncertaintyModel,
}

impl InMemoryObservations {
    pub fn new(uncertainty_model: UncertaintyModel) -> Self {
        Self {
            uncertainty_model,
            ..Self::default()
        }
    }

    pub fn add_scene(&mut self, timestep: NaiveDateTime, scene: SarScene) {
        log::debug!("Registering scene for {}", timestep);
        self.scenes.insert(timestep, scene);
    }

    pub fn set_emulator(&mut self, polarization: Polarization, emulator: Arc<dyn Emulator>) {
        self.emulators.insert(polarization, emulator);
    }
}

impl ObservationSource for InMemoryObservations {
    fn timesteps(&self) -> Vec<NaiveDateTime> {
        self.scenes.keys().copied().collect()
    }

    fn get_band_data(&self, timestep: NaiveDateTime, band: usize) -> OperatorResult<ObservationRecord> {
        let polarization = Polarization::from_band(band)?;
        let scene = self.scenes.get(&timestep).ok_or_else(|| {
            OperatorError::Configuration(format!("no observation for timestep {}", timestep))
        })?;
        let observations = scene.bands.get(&polarization).ok_or_else(|| {
            OperatorError::Configuration(format!(
                "scene {} has no {} backscatter",
                timestep, polarization
            ))
        })?;

        let uncertainty = estimate_uncertainty(observations, &scene.mask, self.uncertainty_model)?;

        ObservationRecord::new(
            observations.clone(),
            Uncertainty::PerPixel(uncertainty),
            scene.mask.clone(),
            scene.metadata.clone(),
            self.emulators.get(&polarization).cloned(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sar_operator::SarObservationOperator;
    use chrono::NaiveDate;
    use ndarray::array;

    fn timestep(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 3, day)
            .and_then(|d| d.and_hms_opt(5, 35, 0))
            .unwrap()
    }

    fn scene() -> SarScene {
        let mut bands = BTreeMap::new();
        bands.insert(Polarization::VV, array![[0.1, 0.2], [f64::NAN, 0.4]]);
        bands.insert(Polarization::VH, array![[0.01, 0.02], [0.03, 0.0]]);
        SarScene::new(bands, ObservationMetadata::default()).unwrap()
    }

    #[test]
    fn test_scene_mask() {
        let s = scene();
        assert_eq!(s.mask(), &array![[true, true], [false, false]]);

        let restricted = s.with_mask(array![[false, true], [true, true]]).unwrap();
        assert_eq!(restricted.mask(), &array![[false, true], [false, false]]);
    }

    #[test]
    fn test_get_band_data() {
        let op = SarObservationOperator::default();
        let mut source = InMemoryObservations::new(UncertaintyModel::Constant(0.5));
        source.add_scene(timestep(2), scene());
        source.add_scene(timestep(1), scene());
        source.set_emulator(Polarization::VH, Arc::new(op.emulator_for_band(1).unwrap()));

        assert_eq!(source.timesteps(), vec![timestep(1), timestep(2)]);

        let vv = source.get_band_data(timestep(1), 0).unwrap();
        assert!(vv.emulator().is_none());
        let precision = vv.precision_matrix().unwrap();
        assert_eq!(precision.diagonal().to_vec(), vec![4.0, 4.0, 0.0, 0.0]);

        let vh = source.get_band_data(timestep(1), 1).unwrap();
        assert!(vh.emulator().is_some());
        assert_eq!(vh.observations[[0, 1]], 0.02);

        assert!(matches!(
            source.get_band_data(timestep(1), 2),
            Err(OperatorError::UnsupportedBand { .. })
        ));
        assert!(matches!(
            source.get_band_data(timestep(9), 0),
            Err(OperatorError::Configuration(_))
        ));
    }

    #[test]
    fn test_record_validation() {
        let obs = Array2::<f64>::ones((2, 2));
        let mask = Mask::from_elem((2, 2), true);

        let bad_uncertainty = Uncertainty::PerPixel(Array2::ones((1, 2)));
        assert!(ObservationRecord::new(obs.clone(), bad_uncertainty, mask.clone(), ObservationMetadata::default(), None).is_err());

        let bad_precision = Uncertainty::Precision(CsrMatrix::zeros(3, 3));
        assert!(ObservationRecord::new(obs.clone(), bad_precision, mask.clone(), ObservationMetadata::default(), None).is_err());

        let record = ObservationRecord::new(obs, Uncertainty::Scalar(2.0), mask, ObservationMetadata::default(), None).unwrap();
        assert_eq!(record.precision_matrix().unwrap().get(3, 3), 0.25);
    }
}
