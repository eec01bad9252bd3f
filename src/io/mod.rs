//! Data-access contracts and configuration loading

pub mod coefficients;
pub mod observations;

pub use coefficients::parse_water_cloud_config;
pub use observations::{
    InMemoryObservations, ObservationRecord, ObservationSource, SarScene, Uncertainty,
};
