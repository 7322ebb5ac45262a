//! # Kernel Density Estimation
//!
//! Fixed-bandwidth Parzen-window estimator. The fitted model is nothing more
//! than the stored point set plus the bandwidth; sampling picks a stored
//! point uniformly at random and perturbs it with isotropic Gaussian noise.

use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::density::DensityModel;
use crate::error::{Error, Result};

/// Non-parametric density estimate over latent points.
///
/// Appropriate when the cluster structure of the data is irregular or
/// unknown: no distributional shape is imposed beyond the smoothing scale of
/// the bandwidth.
pub struct KernelDensity {
    bandwidth: f64,
    points_: Option<Array2<f64>>,
}

impl KernelDensity {
    /// Stores the latent points as the model.
    ///
    /// No iterative optimization happens here. Fails with
    /// `InvalidParameter` when the configured bandwidth is not positive and
    /// with `DegenerateInput` when the point set is empty.
    pub fn fit(&mut self, x: ArrayView2<f64>) -> Result<&mut Self> {
        if !(self.bandwidth > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "bandwidth must be positive, got {}",
                self.bandwidth
            )));
        }
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(Error::DegenerateInput(
                "kernel density requires a non-empty point set".into(),
            ));
        }

        self.points_ = Some(x.to_owned());
        Ok(self)
    }

    /// Draws `n` points: a stored point chosen uniformly with replacement,
    /// plus `N(0, bandwidth² · I)` noise per draw.
    ///
    /// # Returns
    /// - `Ok(Array2<f64>)`: `n × k` sample batch
    /// - `Err(NotFitted)`: `fit` has not been called
    /// - `Err(InvalidParameter)`: `n` is zero
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Array2<f64>> {
        let points = self.points_.as_ref().ok_or(Error::NotFitted)?;
        if n == 0 {
            return Err(Error::InvalidParameter(
                "sample count must be at least 1".into(),
            ));
        }

        let dim = points.ncols();
        let mut samples = Array2::zeros((n, dim));
        for i in 0..n {
            let idx = rng.random_range(0..points.nrows());
            for j in 0..dim {
                let noise: f64 = rng.sample(StandardNormal);
                samples[[i, j]] = points[[idx, j]] + self.bandwidth * noise;
            }
        }
        Ok(samples)
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn points(&self) -> Option<&Array2<f64>> {
        self.points_.as_ref()
    }
}

impl DensityModel for KernelDensity {
    fn fit<R: Rng + ?Sized>(&mut self, x: ArrayView2<f64>, _rng: &mut R) -> Result<()> {
        KernelDensity::fit(self, x).map(|_| ())
    }

    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Array2<f64>> {
        KernelDensity::sample(self, n, rng)
    }
}

/// Builder for configuring and creating [`KernelDensity`] instances.
pub struct KernelDensityBuilder {
    bandwidth: f64,
}

impl Default for KernelDensityBuilder {
    fn default() -> Self {
        Self { bandwidth: 0.1 }
    }
}

impl KernelDensityBuilder {
    /// Creates a new builder with the default bandwidth of 0.1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the smoothing bandwidth. Must be positive; checked at `fit`.
    pub fn bandwidth(mut self, bandwidth: f64) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    pub fn build(self) -> KernelDensity {
        KernelDensity {
            bandwidth: self.bandwidth,
            points_: None,
        }
    }
}
