//! # Principal Component Analysis
//!
//! Orthogonal linear projection onto the directions of maximum variance,
//! derived from a symmetric eigendecomposition of the covariance matrix.
//! Components are ordered by decreasing explained variance and sign-fixed so
//! repeated fits on identical input are bit-reproducible.

use std::cmp::Ordering;

use log::debug;
use nalgebra::SymmetricEigen;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use nshare::{IntoNalgebra, IntoNdarray2};
use rayon::prelude::*;

use crate::dimred::Reducer;
use crate::error::{Error, Result};

/// Principal Component Analysis over dense attribute tables.
///
/// Finds the top `k` orthonormal directions of maximum variance in the data
/// and projects rows onto them. The stored basis also supports the exact
/// linear inverse, so latent points can be mapped back to the original
/// attribute space; the only information lost is the variance carried by the
/// discarded `D - k` components.
///
/// # Fitted State
/// - `components_`: `k × D` orthonormal basis, one component per row
/// - `explained_variance_`: per-component variance, non-increasing
/// - `mean_`: per-feature mean used for centering
///
/// The fitted state is immutable after `fit` and may be read concurrently.
pub struct Pca {
    n_components: usize,
    components_: Option<Array2<f64>>,
    explained_variance_: Option<Array1<f64>>,
    mean_: Option<Array1<f64>>,
    total_variance_: Option<f64>,
}

impl Pca {
    /// Fits the basis to an `N × D` table.
    ///
    /// # Parameters
    /// - `x`: input matrix (samples × features)
    ///
    /// # Returns
    /// - `Ok(&mut self)`: basis, explained variances and mean are stored
    /// - `Err(DegenerateInput)`: fewer rows than features, `n_components`
    ///   larger than the feature count, or zero total variance
    /// - `Err(InvalidParameter)`: `n_components` is zero
    ///
    /// On failure any previously fitted state is left untouched.
    pub fn fit(&mut self, x: ArrayView2<f64>) -> Result<&mut Self> {
        let (n_samples, n_features) = x.dim();

        if self.n_components == 0 {
            return Err(Error::InvalidParameter(
                "n_components must be at least 1".into(),
            ));
        }
        if n_features == 0 {
            return Err(Error::DegenerateInput("input has no columns".into()));
        }
        if n_samples < n_features {
            return Err(Error::DegenerateInput(format!(
                "{} rows cannot support a {}-dimensional basis",
                n_samples, n_features
            )));
        }
        if self.n_components > n_features {
            return Err(Error::DegenerateInput(format!(
                "{} components requested from {} features",
                self.n_components, n_features
            )));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::DegenerateInput("input has no rows".into()))?;
        let centered = center(x, &mean);

        let cov = centered.t().dot(&centered) / (n_samples as f64 - 1.0);
        let total_variance = cov.diag().sum();
        if total_variance <= f64::EPSILON {
            return Err(Error::DegenerateInput(
                "all columns have zero variance".into(),
            ));
        }

        let eig = SymmetricEigen::new(cov.into_nalgebra());
        let eigenvalues = eig.eigenvalues;
        let eigenvectors = eig.eigenvectors.into_ndarray2().into_owned();

        // Stable sort keeps tied eigenvalues in a reproducible order.
        let mut order: Vec<usize> = (0..n_features).collect();
        order.sort_by(|&a, &b| {
            eigenvalues[b]
                .partial_cmp(&eigenvalues[a])
                .unwrap_or(Ordering::Equal)
        });

        let mut components = Array2::zeros((self.n_components, n_features));
        let mut explained_variance = Array1::zeros(self.n_components);
        for (row, &idx) in order.iter().take(self.n_components).enumerate() {
            explained_variance[row] = eigenvalues[idx].max(0.0);
            for j in 0..n_features {
                components[[row, j]] = eigenvectors[[j, idx]];
            }
        }
        fix_signs(&mut components);

        debug!(
            "fitted {}-component basis over {} features, explained variance {:?}",
            self.n_components, n_features, explained_variance
        );

        self.components_ = Some(components);
        self.explained_variance_ = Some(explained_variance);
        self.mean_ = Some(mean);
        self.total_variance_ = Some(total_variance);

        Ok(self)
    }

    /// Projects rows onto the fitted basis.
    ///
    /// # Returns
    /// - `Ok(Array2<f64>)`: centered rows projected to `N × k`
    /// - `Err(NotFitted)`: `fit` has not been called
    /// - `Err(DimensionMismatch)`: column count differs from the fitted table
    pub fn forward(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let components = self.components_.as_ref().ok_or(Error::NotFitted)?;
        let mean = self.mean_.as_ref().ok_or(Error::NotFitted)?;

        if x.ncols() != mean.len() {
            return Err(Error::DimensionMismatch {
                expected: mean.len(),
                actual: x.ncols(),
            });
        }

        let centered = center(x, mean);
        Ok(centered.dot(&components.t()))
    }

    /// Maps latent points back to the original attribute space.
    ///
    /// # Returns
    /// - `Ok(Array2<f64>)`: `M × D` reconstruction, mean added back
    /// - `Err(NotFitted)`: `fit` has not been called
    /// - `Err(DimensionMismatch)`: point dimensionality differs from `k`
    pub fn inverse(&self, z: ArrayView2<f64>) -> Result<Array2<f64>> {
        let components = self.components_.as_ref().ok_or(Error::NotFitted)?;
        let mean = self.mean_.as_ref().ok_or(Error::NotFitted)?;

        if z.ncols() != components.nrows() {
            return Err(Error::DimensionMismatch {
                expected: components.nrows(),
                actual: z.ncols(),
            });
        }

        let mut reconstructed = z.dot(components);
        reconstructed
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(|mut row| {
                row += mean;
            });
        Ok(reconstructed)
    }

    /// Convenience method that fits the basis and projects the same table.
    pub fn fit_transform(&mut self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.forward(x)
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn components(&self) -> Option<&Array2<f64>> {
        self.components_.as_ref()
    }

    pub fn explained_variance(&self) -> Option<&Array1<f64>> {
        self.explained_variance_.as_ref()
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean_.as_ref()
    }

    /// Fraction of the total data variance carried by each kept component.
    pub fn explained_variance_ratio(&self) -> Option<Array1<f64>> {
        let explained = self.explained_variance_.as_ref()?;
        let total = self.total_variance_?;
        Some(explained.mapv(|v| v / total))
    }
}

impl Reducer for Pca {
    fn forward(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        Pca::forward(self, x)
    }

    fn inverse(&self, z: ArrayView2<f64>) -> Result<Array2<f64>> {
        Pca::inverse(self, z)
    }
}

/// Builder for configuring and creating [`Pca`] instances.
pub struct PcaBuilder {
    n_components: usize,
}

impl Default for PcaBuilder {
    fn default() -> Self {
        Self { n_components: 2 }
    }
}

impl PcaBuilder {
    /// Creates a new builder with the default of 2 components.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of latent components to keep.
    ///
    /// Must be between 1 and the feature count of the fitted table; the
    /// bound is checked at `fit` time.
    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn build(self) -> Pca {
        Pca {
            n_components: self.n_components,
            components_: None,
            explained_variance_: None,
            mean_: None,
            total_variance_: None,
        }
    }
}

fn center(x: ArrayView2<f64>, mean: &Array1<f64>) -> Array2<f64> {
    let mut centered = x.to_owned();
    centered
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            row -= mean;
        });
    centered
}

/// Flips each component so its largest-magnitude loading is positive.
fn fix_signs(components: &mut Array2<f64>) {
    for mut row in components.rows_mut() {
        let lead = row
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.abs().partial_cmp(&b.abs()).unwrap_or(Ordering::Equal)
            })
            .map(|(i, _)| i);
        if let Some(i) = lead {
            if row[i] < 0.0 {
                row.mapv_inplace(|v| -v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample_table() -> Array2<f64> {
        array![
            [2.5, 2.4, 0.5],
            [0.5, 0.7, 1.9],
            [2.2, 2.9, 0.4],
            [1.9, 2.2, 0.9],
            [3.1, 3.0, 0.1],
            [2.3, 2.7, 0.6],
            [2.0, 1.6, 1.1],
            [1.0, 1.1, 1.6],
            [1.5, 1.6, 1.2],
            [1.1, 0.9, 1.8],
        ]
    }

    #[test]
    fn test_round_trip_full_rank() {
        let x = sample_table();
        let mut pca = PcaBuilder::new().n_components(3).build();
        let z = pca.fit_transform(x.view()).unwrap();
        let back = pca.inverse(z.view()).unwrap();

        for (a, b) in x.iter().zip(back.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_truncated_residual_bounded_by_discarded_variance() {
        let x = sample_table();
        let n = x.nrows() as f64;

        let mut full = PcaBuilder::new().n_components(3).build();
        full.fit(x.view()).unwrap();
        let discarded: f64 = full.explained_variance().unwrap()[2];

        let mut pca = PcaBuilder::new().n_components(2).build();
        let z = pca.fit_transform(x.view()).unwrap();
        let back = pca.inverse(z.view()).unwrap();

        let residual: f64 = (&x - &back).mapv(|v| v * v).sum() / (n - 1.0);
        assert!(residual <= discarded + 1e-10);
    }

    #[test]
    fn test_basis_orthonormality() {
        let x = sample_table();
        let mut pca = PcaBuilder::new().n_components(3).build();
        pca.fit(x.view()).unwrap();

        let w = pca.components().unwrap();
        let gram = w.dot(&w.t());
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[[i, j]], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_explained_variance_non_increasing() {
        let x = sample_table();
        let mut pca = PcaBuilder::new().n_components(3).build();
        pca.fit(x.view()).unwrap();

        let ev = pca.explained_variance().unwrap();
        assert!(ev[0] >= ev[1]);
        assert!(ev[1] >= ev[2]);
    }

    #[test]
    fn test_explained_variance_ratio_sums_to_one_at_full_rank() {
        let x = sample_table();
        let mut pca = PcaBuilder::new().n_components(3).build();
        pca.fit(x.view()).unwrap();

        let ratio = pca.explained_variance_ratio().unwrap();
        assert_abs_diff_eq!(ratio.sum(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_sign_convention() {
        let x = sample_table();
        let mut pca = PcaBuilder::new().n_components(2).build();
        pca.fit(x.view()).unwrap();

        for row in pca.components().unwrap().rows() {
            let lead = row
                .iter()
                .cloned()
                .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
            assert!(lead > 0.0);
        }
    }

    #[test]
    fn test_refit_is_bit_reproducible() {
        let x = sample_table();
        let mut a = PcaBuilder::new().n_components(2).build();
        let mut b = PcaBuilder::new().n_components(2).build();
        a.fit(x.view()).unwrap();
        b.fit(x.view()).unwrap();

        assert_eq!(a.components().unwrap(), b.components().unwrap());
        assert_eq!(a.explained_variance().unwrap(), b.explained_variance().unwrap());
    }

    #[test]
    fn test_forward_without_fit() {
        let pca = PcaBuilder::new().build();
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(matches!(pca.forward(x.view()), Err(Error::NotFitted)));
    }

    #[test]
    fn test_forward_dimension_mismatch() {
        let x = sample_table();
        let mut pca = PcaBuilder::new().n_components(2).build();
        pca.fit(x.view()).unwrap();

        let narrow = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(matches!(
            pca.forward(narrow.view()),
            Err(Error::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_inverse_dimension_mismatch() {
        let x = sample_table();
        let mut pca = PcaBuilder::new().n_components(2).build();
        pca.fit(x.view()).unwrap();

        let wide = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            pca.inverse(wide.view()),
            Err(Error::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_too_few_rows_for_requested_basis() {
        let x = Array2::zeros((3, 5));
        let mut pca = PcaBuilder::new().n_components(5).build();
        assert!(matches!(pca.fit(x.view()), Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn test_more_components_than_features() {
        let x = sample_table();
        let mut pca = PcaBuilder::new().n_components(5).build();
        assert!(matches!(pca.fit(x.view()), Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn test_zero_variance_table() {
        let x = Array2::from_elem((6, 3), 1.5);
        let mut pca = PcaBuilder::new().n_components(2).build();
        assert!(matches!(pca.fit(x.view()), Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn test_zero_components_invalid() {
        let x = sample_table();
        let mut pca = PcaBuilder::new().n_components(0).build();
        assert!(matches!(pca.fit(x.view()), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_failed_fit_preserves_prior_state() {
        let x = sample_table();
        let mut pca = PcaBuilder::new().n_components(2).build();
        pca.fit(x.view()).unwrap();
        let before = pca.components().unwrap().clone();

        let bad = Array2::zeros((1, 3));
        assert!(pca.fit(bad.view()).is_err());
        assert_eq!(pca.components().unwrap(), &before);
    }
}
