//! # Gaussian Mixture Modelling
//!
//! Weighted sum of multivariate Gaussians fitted with
//! Expectation-Maximization. The covariance structure is configurable per
//! [`CovarianceType`]; near-singular covariances are repaired with diagonal
//! regularization instead of failing, and non-convergence at the iteration
//! cap is reported through [`GaussianMixture::converged`], never as an error.

use log::{debug, trace};
use nalgebra::{Cholesky, DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::density::DensityModel;
use crate::error::{Error, Result};

/// Structural constraint on each component's covariance.
///
/// The representation changes storage and the M-step update formula but not
/// the sampling contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CovarianceType {
    /// Unconstrained symmetric positive-definite matrix per component.
    #[default]
    Full,
    /// Per-component axis-aligned variances.
    Diagonal,
    /// One scalar variance per component.
    Spherical,
    /// A single full covariance shared by all components.
    Shared,
}

/// Fitted covariance storage, shaped by the configured [`CovarianceType`].
#[derive(Debug, Clone)]
pub enum Covariances {
    /// One `d × d` matrix per component.
    Full(Vec<Array2<f64>>),
    /// `C × d` variances.
    Diagonal(Array2<f64>),
    /// `C` scalar variances.
    Spherical(Array1<f64>),
    /// One `d × d` matrix for all components.
    Shared(Array2<f64>),
}

/// Parametric multi-modal density estimate over latent points.
///
/// Fits `C` weighted Gaussian components by maximizing the data
/// log-likelihood. Compared to the kernel estimator this imposes a smooth
/// multi-modal shape and yields interpretable cluster means and covariances.
pub struct GaussianMixture {
    n_components: usize,
    covariance_type: CovarianceType,
    max_iter: usize,
    tolerance: f64,
    reg_covar: f64,
    weights_: Option<Array1<f64>>,
    means_: Option<Array2<f64>>,
    covariances_: Option<Covariances>,
    converged_: bool,
    n_iter_: usize,
}

impl GaussianMixture {
    /// Fits the mixture to `N × k` latent points via EM.
    ///
    /// Component means are seeded with distance-weighted sampling from the
    /// injected random source, weights start uniform, and covariances start
    /// from the per-column data variance. The E-step computes
    /// responsibilities through a log-sum-exp normalization; the M-step
    /// recomputes weights, means and covariances as responsibility-weighted
    /// statistics. Iteration stops when the mean log-likelihood improves by
    /// less than `tolerance` or at `max_iter`; reaching the cap is not an
    /// error.
    ///
    /// # Returns
    /// - `Ok(&mut self)`: fitted parameters replace any previous state
    /// - `Err(InvalidParameter)`: component count outside `1..=N`, or a
    ///   non-positive tolerance / regularization / iteration cap
    /// - `Err(DegenerateInput)`: empty points, or a covariance that stays
    ///   singular after regularization
    ///
    /// On failure any previously fitted state is left untouched.
    pub fn fit<R: Rng + ?Sized>(&mut self, x: ArrayView2<f64>, rng: &mut R) -> Result<&mut Self> {
        let (n_samples, dim) = x.dim();

        if self.n_components == 0 {
            return Err(Error::InvalidParameter(
                "n_components must be at least 1".into(),
            ));
        }
        if self.n_components > n_samples {
            return Err(Error::InvalidParameter(format!(
                "n_components ({}) exceeds the number of points ({})",
                self.n_components, n_samples
            )));
        }
        if dim == 0 {
            return Err(Error::DegenerateInput("points have no columns".into()));
        }
        if !(self.tolerance > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if !(self.reg_covar > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "reg_covar must be positive, got {}",
                self.reg_covar
            )));
        }
        if self.max_iter == 0 {
            return Err(Error::InvalidParameter(
                "max_iter must be at least 1".into(),
            ));
        }

        let c = self.n_components;
        let mut weights = Array1::from_elem(c, 1.0 / c as f64);
        let mut means = init_means(x, c, rng);
        let mut covariances = self.initial_covariances(x, c);

        let mut prev_ll = f64::NEG_INFINITY;
        let mut converged = false;
        let mut n_iter = 0;

        for iter in 1..=self.max_iter {
            // E-step
            let log_prob = self.log_prob(x, &means, &covariances)?;
            let weighted = &log_prob + &weights.mapv(f64::ln);
            let (log_norm, resp) = normalize_responsibilities(&weighted);
            let ll = log_norm.sum() / n_samples as f64;
            trace!("em iteration {}: mean log-likelihood {:.6}", iter, ll);

            // M-step
            let (new_weights, new_means, new_covariances) = self.m_step(x, &resp);
            weights = new_weights;
            means = new_means;
            covariances = new_covariances;
            n_iter = iter;

            if (ll - prev_ll).abs() < self.tolerance {
                converged = true;
                debug!("em converged after {} iterations (ll {:.6})", iter, ll);
                break;
            }
            prev_ll = ll;
        }
        if !converged {
            debug!("em stopped at the {}-iteration cap", self.max_iter);
        }

        self.weights_ = Some(weights);
        self.means_ = Some(means);
        self.covariances_ = Some(covariances);
        self.converged_ = converged;
        self.n_iter_ = n_iter;

        Ok(self)
    }

    /// Draws `n` points: a component index by the mixing weights, then a
    /// draw from that component's Gaussian.
    ///
    /// # Returns
    /// - `Ok(Array2<f64>)`: `n × k` sample batch
    /// - `Err(NotFitted)`: `fit` has not been called
    /// - `Err(InvalidParameter)`: `n` is zero
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Array2<f64>> {
        let weights = self.weights_.as_ref().ok_or(Error::NotFitted)?;
        let means = self.means_.as_ref().ok_or(Error::NotFitted)?;
        let covariances = self.covariances_.as_ref().ok_or(Error::NotFitted)?;
        if n == 0 {
            return Err(Error::InvalidParameter(
                "sample count must be at least 1".into(),
            ));
        }

        let dim = means.ncols();
        let scales = self.sample_scales(covariances)?;

        let mut samples = Array2::zeros((n, dim));
        for i in 0..n {
            let k = pick_component(weights, rng);
            match &scales[k] {
                SampleScale::Tri(l) => {
                    let z = DVector::from_fn(dim, |_, _| rng.sample::<f64, _>(StandardNormal));
                    let offset = l * z;
                    for j in 0..dim {
                        samples[[i, j]] = means[[k, j]] + offset[j];
                    }
                }
                SampleScale::Axes(std_devs) => {
                    for j in 0..dim {
                        let z: f64 = rng.sample(StandardNormal);
                        samples[[i, j]] = means[[k, j]] + std_devs[j] * z;
                    }
                }
                SampleScale::Iso(std_dev) => {
                    for j in 0..dim {
                        let z: f64 = rng.sample(StandardNormal);
                        samples[[i, j]] = means[[k, j]] + std_dev * z;
                    }
                }
            }
        }
        Ok(samples)
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn covariance_type(&self) -> CovarianceType {
        self.covariance_type
    }

    pub fn weights(&self) -> Option<&Array1<f64>> {
        self.weights_.as_ref()
    }

    pub fn means(&self) -> Option<&Array2<f64>> {
        self.means_.as_ref()
    }

    pub fn covariances(&self) -> Option<&Covariances> {
        self.covariances_.as_ref()
    }

    /// Whether the last `fit` reached the convergence tolerance before the
    /// iteration cap.
    pub fn converged(&self) -> bool {
        self.converged_
    }

    /// EM iterations run by the last `fit`.
    pub fn n_iter(&self) -> usize {
        self.n_iter_
    }

    fn initial_covariances(&self, x: ArrayView2<f64>, c: usize) -> Covariances {
        let dim = x.ncols();
        let var0 = column_variances(x).mapv(|v| v + self.reg_covar);
        match self.covariance_type {
            CovarianceType::Full => {
                Covariances::Full(vec![Array2::from_diag(&var0); c])
            }
            CovarianceType::Diagonal => {
                Covariances::Diagonal(Array2::from_shape_fn((c, dim), |(_, j)| var0[j]))
            }
            CovarianceType::Spherical => {
                Covariances::Spherical(Array1::from_elem(c, var0.sum() / dim as f64))
            }
            CovarianceType::Shared => Covariances::Shared(Array2::from_diag(&var0)),
        }
    }

    /// Per-component Gaussian log-densities, `N × C`.
    fn log_prob(
        &self,
        x: ArrayView2<f64>,
        means: &Array2<f64>,
        covariances: &Covariances,
    ) -> Result<Array2<f64>> {
        let (n, dim) = x.dim();
        let c = means.nrows();
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();
        let mut out = Array2::zeros((n, c));

        match covariances {
            Covariances::Full(list) => {
                for k in 0..c {
                    let (l, log_det) = regularized_cholesky(&list[k], self.reg_covar)?;
                    fill_cholesky_log_prob(&mut out, x, means, k, &l, log_det, ln_2pi)?;
                }
            }
            Covariances::Shared(cov) => {
                let (l, log_det) = regularized_cholesky(cov, self.reg_covar)?;
                for k in 0..c {
                    fill_cholesky_log_prob(&mut out, x, means, k, &l, log_det, ln_2pi)?;
                }
            }
            Covariances::Diagonal(vars) => {
                for k in 0..c {
                    let log_det: f64 = vars.row(k).iter().map(|v| v.ln()).sum();
                    for i in 0..n {
                        let maha: f64 = (0..dim)
                            .map(|j| {
                                let diff = x[[i, j]] - means[[k, j]];
                                diff * diff / vars[[k, j]]
                            })
                            .sum();
                        out[[i, k]] = -0.5 * (dim as f64 * ln_2pi + log_det + maha);
                    }
                }
            }
            Covariances::Spherical(vars) => {
                for k in 0..c {
                    let var = vars[k];
                    let log_det = dim as f64 * var.ln();
                    for i in 0..n {
                        let maha: f64 = (0..dim)
                            .map(|j| {
                                let diff = x[[i, j]] - means[[k, j]];
                                diff * diff / var
                            })
                            .sum();
                        out[[i, k]] = -0.5 * (dim as f64 * ln_2pi + log_det + maha);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Responsibility-weighted parameter updates.
    fn m_step(
        &self,
        x: ArrayView2<f64>,
        resp: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>, Covariances) {
        let (n, dim) = x.dim();
        let c = resp.ncols();

        // Guard against components that lost every point.
        let nk = resp.sum_axis(Axis(0)).mapv(|v| v + 10.0 * f64::EPSILON);
        let weights = &nk / n as f64;

        let mut means = resp.t().dot(&x);
        for (k, mut row) in means.rows_mut().into_iter().enumerate() {
            row /= nk[k];
        }

        let covariances = match self.covariance_type {
            CovarianceType::Full => {
                let mut list = Vec::with_capacity(c);
                for k in 0..c {
                    let mut cov = weighted_scatter(x, resp, &means, k);
                    cov.mapv_inplace(|v| v / nk[k]);
                    for a in 0..dim {
                        cov[[a, a]] += self.reg_covar;
                    }
                    list.push(cov);
                }
                Covariances::Full(list)
            }
            CovarianceType::Diagonal => {
                let mut vars = Array2::zeros((c, dim));
                for k in 0..c {
                    for i in 0..n {
                        let r = resp[[i, k]];
                        for j in 0..dim {
                            let diff = x[[i, j]] - means[[k, j]];
                            vars[[k, j]] += r * diff * diff;
                        }
                    }
                    for j in 0..dim {
                        vars[[k, j]] = vars[[k, j]] / nk[k] + self.reg_covar;
                    }
                }
                Covariances::Diagonal(vars)
            }
            CovarianceType::Spherical => {
                let mut vars = Array1::zeros(c);
                for k in 0..c {
                    let mut acc = 0.0;
                    for i in 0..n {
                        let r = resp[[i, k]];
                        for j in 0..dim {
                            let diff = x[[i, j]] - means[[k, j]];
                            acc += r * diff * diff;
                        }
                    }
                    vars[k] = acc / (nk[k] * dim as f64) + self.reg_covar;
                }
                Covariances::Spherical(vars)
            }
            CovarianceType::Shared => {
                let mut cov = Array2::zeros((dim, dim));
                for k in 0..c {
                    cov += &weighted_scatter(x, resp, &means, k);
                }
                cov.mapv_inplace(|v| v / n as f64);
                for a in 0..dim {
                    cov[[a, a]] += self.reg_covar;
                }
                Covariances::Shared(cov)
            }
        };

        (weights, means, covariances)
    }

    fn sample_scales(&self, covariances: &Covariances) -> Result<Vec<SampleScale>> {
        match covariances {
            Covariances::Full(list) => list
                .iter()
                .map(|cov| {
                    regularized_cholesky(cov, self.reg_covar).map(|(l, _)| SampleScale::Tri(l))
                })
                .collect(),
            Covariances::Shared(cov) => {
                let (l, _) = regularized_cholesky(cov, self.reg_covar)?;
                Ok(vec![SampleScale::Tri(l); self.n_components])
            }
            Covariances::Diagonal(vars) => Ok((0..vars.nrows())
                .map(|k| SampleScale::Axes(vars.row(k).mapv(f64::sqrt)))
                .collect()),
            Covariances::Spherical(vars) => {
                Ok(vars.iter().map(|v| SampleScale::Iso(v.sqrt())).collect())
            }
        }
    }
}

impl DensityModel for GaussianMixture {
    fn fit<R: Rng + ?Sized>(&mut self, x: ArrayView2<f64>, rng: &mut R) -> Result<()> {
        GaussianMixture::fit(self, x, rng).map(|_| ())
    }

    fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Array2<f64>> {
        GaussianMixture::sample(self, n, rng)
    }
}

/// Builder for configuring and creating [`GaussianMixture`] instances.
pub struct GaussianMixtureBuilder {
    n_components: usize,
    covariance_type: CovarianceType,
    max_iter: usize,
    tolerance: f64,
    reg_covar: f64,
}

impl Default for GaussianMixtureBuilder {
    fn default() -> Self {
        Self {
            n_components: 10,
            covariance_type: CovarianceType::Full,
            max_iter: 100,
            tolerance: 1e-3,
            reg_covar: 1e-6,
        }
    }
}

impl GaussianMixtureBuilder {
    /// Creates a new builder with default parameters.
    ///
    /// Default values:
    /// - `n_components`: 10
    /// - `covariance_type`: `Full`
    /// - `max_iter`: 100
    /// - `tolerance`: 1e-3
    /// - `reg_covar`: 1e-6
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of mixture components. Must be between 1 and the
    /// number of fitted points; checked at `fit`.
    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn covariance_type(mut self, covariance_type: CovarianceType) -> Self {
        self.covariance_type = covariance_type;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the diagonal regularization added to covariances before
    /// inversion.
    pub fn reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    pub fn build(self) -> GaussianMixture {
        GaussianMixture {
            n_components: self.n_components,
            covariance_type: self.covariance_type,
            max_iter: self.max_iter,
            tolerance: self.tolerance,
            reg_covar: self.reg_covar,
            weights_: None,
            means_: None,
            covariances_: None,
            converged_: false,
            n_iter_: 0,
        }
    }
}

#[derive(Clone)]
enum SampleScale {
    Tri(DMatrix<f64>),
    Axes(Array1<f64>),
    Iso(f64),
}

/// Distance-weighted mean seeding: the first mean is a uniformly chosen
/// point, each further mean is drawn with probability proportional to the
/// squared distance from the nearest already chosen mean.
fn init_means<R: Rng + ?Sized>(x: ArrayView2<f64>, c: usize, rng: &mut R) -> Array2<f64> {
    let (n, dim) = x.dim();
    let mut means = Array2::zeros((c, dim));

    let first = rng.random_range(0..n);
    means.row_mut(0).assign(&x.row(first));

    let mut min_sq_dist = vec![f64::INFINITY; n];
    for k in 1..c {
        let last = means.row(k - 1);
        for i in 0..n {
            let sq: f64 = x
                .row(i)
                .iter()
                .zip(last.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            min_sq_dist[i] = min_sq_dist[i].min(sq);
        }

        let total: f64 = min_sq_dist.iter().sum();
        let idx = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = n - 1;
            for (i, &d) in min_sq_dist.iter().enumerate() {
                cumulative += d;
                if cumulative >= target {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            // All points coincide with a chosen mean.
            rng.random_range(0..n)
        };
        means.row_mut(k).assign(&x.row(idx));
    }
    means
}

fn column_variances(x: ArrayView2<f64>) -> Array1<f64> {
    let (n, dim) = x.dim();
    let mean = x.sum_axis(Axis(0)) / n as f64;
    let mut var = Array1::zeros(dim);
    for row in x.rows() {
        for j in 0..dim {
            let diff = row[j] - mean[j];
            var[j] += diff * diff;
        }
    }
    var / n as f64
}

/// Row-wise log-sum-exp: returns per-point normalizers and the exponentiated
/// responsibilities.
fn normalize_responsibilities(weighted: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let mut log_norm = Array1::zeros(weighted.nrows());
    let mut resp = weighted.clone();
    for (i, mut row) in resp.rows_mut().into_iter().enumerate() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let lse = max + row.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
        log_norm[i] = lse;
        row.mapv_inplace(|v| (v - lse).exp());
    }
    (log_norm, resp)
}

/// Responsibility-weighted scatter matrix of component `k`.
fn weighted_scatter(
    x: ArrayView2<f64>,
    resp: &Array2<f64>,
    means: &Array2<f64>,
    k: usize,
) -> Array2<f64> {
    let (n, dim) = x.dim();
    let mut cov = Array2::zeros((dim, dim));
    for i in 0..n {
        let r = resp[[i, k]];
        if r == 0.0 {
            continue;
        }
        for a in 0..dim {
            let da = x[[i, a]] - means[[k, a]];
            for b in a..dim {
                cov[[a, b]] += r * da * (x[[i, b]] - means[[k, b]]);
            }
        }
    }
    for a in 0..dim {
        for b in (a + 1)..dim {
            cov[[b, a]] = cov[[a, b]];
        }
    }
    cov
}

/// Lower Cholesky factor and log-determinant, retrying with escalating
/// diagonal jitter when the matrix is not positive definite.
fn regularized_cholesky(cov: &Array2<f64>, reg: f64) -> Result<(DMatrix<f64>, f64)> {
    let dim = cov.nrows();
    let mut jitter = 0.0;
    for _ in 0..4 {
        let m = DMatrix::from_fn(dim, dim, |i, j| {
            cov[[i, j]] + if i == j { jitter } else { 0.0 }
        });
        if let Some(chol) = Cholesky::new(m) {
            let l = chol.l();
            let log_det = 2.0 * l.diagonal().iter().map(|v| v.ln()).sum::<f64>();
            return Ok((l, log_det));
        }
        jitter = if jitter == 0.0 {
            reg.max(1e-12) * 10.0
        } else {
            jitter * 100.0
        };
    }
    Err(Error::DegenerateInput(
        "covariance is not positive definite even after regularization".into(),
    ))
}

fn fill_cholesky_log_prob(
    out: &mut Array2<f64>,
    x: ArrayView2<f64>,
    means: &Array2<f64>,
    k: usize,
    l: &DMatrix<f64>,
    log_det: f64,
    ln_2pi: f64,
) -> Result<()> {
    let (n, dim) = x.dim();
    for i in 0..n {
        let diff = DVector::from_fn(dim, |j, _| x[[i, j]] - means[[k, j]]);
        let y = l.solve_lower_triangular(&diff).ok_or_else(|| {
            Error::DegenerateInput("singular covariance factor".into())
        })?;
        out[[i, k]] = -0.5 * (dim as f64 * ln_2pi + log_det + y.norm_squared());
    }
    Ok(())
}

fn pick_component<R: Rng + ?Sized>(weights: &Array1<f64>, rng: &mut R) -> usize {
    let target = rng.random::<f64>();
    let mut cumulative = 0.0;
    for (k, &w) in weights.iter().enumerate() {
        cumulative += w;
        if target < cumulative {
            return k;
        }
    }
    weights.len() - 1
}
