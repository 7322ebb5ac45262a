//! # Dimensionality Reduction
//!
//! This module provides the projection side of the pipeline: reducing a
//! high-dimensional attribute table to a small number of latent components
//! while keeping an exact linear route back to the original space.
//!
//! ## Currently Available
//! - **PCA** ([`pca`]): Principal Component Analysis with forward projection
//!   and exact inverse projection
//!
//! Every reducer exposes the [`Reducer`] capability so density models and the
//! pipeline can stay agnostic of the concrete projection algorithm.

use ndarray::{Array2, ArrayView2};

use crate::error::Result;

pub mod pca;

pub use pca::{Pca, PcaBuilder};

/// Capability for projecting rows into a latent space and back.
///
/// Implementations must pair `forward` and `inverse` over the same fitted
/// basis: sampling in latent space followed by `inverse` is only meaningful
/// through the reducer that produced the latent coordinates.
pub trait Reducer {
    /// Projects `N × D` rows onto the latent basis, returning `N × k`.
    fn forward(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Maps `M × k` latent points back to the original `M × D` space.
    fn inverse(&self, z: ArrayView2<f64>) -> Result<Array2<f64>>;
}
