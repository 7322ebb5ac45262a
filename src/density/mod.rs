//! # Density Modelling
//!
//! Probability models fitted over the latent points produced by a
//! [`Reducer`](crate::dimred::Reducer), each supporting independent draws of
//! synthetic latent points.
//!
//! ## Currently Available
//! - **Kernel density** ([`kernel`]): non-parametric Parzen-window estimate,
//!   no assumption about the shape of the distribution
//! - **Gaussian mixture** ([`mixture`]): parametric multi-modal estimate with
//!   interpretable cluster means and covariances
//!
//! Randomness is never global: every stochastic entry point takes the random
//! source as a parameter so tests and callers control reproducibility.

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use crate::error::Result;

pub mod kernel;
pub mod mixture;

pub use kernel::{KernelDensity, KernelDensityBuilder};
pub use mixture::{CovarianceType, Covariances, GaussianMixture, GaussianMixtureBuilder};

/// Shared capability of the two density engines.
///
/// `fit` replaces any previous fitted state wholesale; concurrent `fit`
/// calls on one instance must be serialized by the caller. `sample` only
/// reads fitted state, so concurrent sampling is safe as long as each caller
/// supplies its own random source.
pub trait DensityModel {
    /// Fits the model to `N × k` latent points.
    fn fit<R: Rng + ?Sized>(&mut self, x: ArrayView2<f64>, rng: &mut R) -> Result<()>;

    /// Draws `n` independent latent points from the fitted distribution.
    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Array2<f64>>;
}
