pub mod density;
pub mod dimred;
pub mod error;
pub mod pipeline;
pub mod table;

pub use density::DensityModel;
pub use density::{CovarianceType, Covariances, GaussianMixture, GaussianMixtureBuilder};
pub use density::{KernelDensity, KernelDensityBuilder};
pub use dimred::{Pca, PcaBuilder, Reducer};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, Synthesis};
pub use table::{FeatureTable, PartyKey};
