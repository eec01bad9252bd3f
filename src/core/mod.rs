//! Observation operators and the numerical pieces they share

pub mod sparse;
pub mod water_cloud;
pub mod precision;
pub mod operator;
pub mod sar_operator;
pub mod optical;

// Re-export main types
pub use sparse::CsrMatrix;
pub use water_cloud::{
    sar_observation_operator, CoefficientTable, WaterCloudCoefficients, WaterCloudComponents,
    WaterCloudConfig, WaterCloudModel,
};
pub use precision::{
    build_precision_matrix, estimate_uncertainty, equivalent_number_of_looks, UncertaintyModel,
};
pub use operator::{
    Emulator, IncidenceAngle, LinearisedOperator, ObservationMetadata, ObservationOperator,
    OperatorRequest, ViewGeometry,
};
pub use sar_operator::{SarObservationOperator, WaterCloudEmulator};
pub use optical::{
    optical_forward_operator, OpticalObservationOperator, ProsailParameters, ProsailVersion,
    RadiativeTransfer,
};
