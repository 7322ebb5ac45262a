//! # Synthesis Pipeline
//!
//! Composes a fitted [`Reducer`] with a [`DensityModel`]: project the input
//! table, fit the density model over the latent points, draw samples, and
//! map them back to the original attribute space.

use ndarray::Array2;
use rand::Rng;

use crate::density::DensityModel;
use crate::dimred::Reducer;
use crate::error::Result;
use crate::table::FeatureTable;

/// Everything the pipeline produces for one `process` call: the latent
/// table with positional component labels, the raw latent sample batch, and
/// the synthetic rows expressed in the input's columns.
pub struct Synthesis {
    pub reduced: FeatureTable,
    pub samples: Array2<f64>,
    pub synthetic: FeatureTable,
}

/// One-shot orchestrator over a paired reducer and density model.
///
/// The reducer must already be fitted; its latent dimensionality defines the
/// density model's input dimensionality, and inverse projection of samples
/// is only valid through this same reducer.
pub struct Pipeline<R, M>
where
    R: Reducer,
    M: DensityModel,
{
    reducer: R,
    model: M,
}

impl<R, M> Pipeline<R, M>
where
    R: Reducer,
    M: DensityModel,
{
    pub fn new(reducer: R, model: M) -> Self {
        Self { reducer, model }
    }

    /// Runs the complete density estimation and sampling process.
    ///
    /// Projects the table, fits the density model on the latent points,
    /// draws `n` samples, and inverse-projects them. All stochastic steps
    /// consume the injected random source, so a fixed seed reproduces the
    /// run exactly.
    pub fn process<G: Rng + ?Sized>(
        &mut self,
        table: &FeatureTable,
        n: usize,
        rng: &mut G,
    ) -> Result<Synthesis> {
        let reduced = self.reducer.forward(table.values())?;
        self.model.fit(reduced.view(), rng)?;
        let samples = self.model.sample(n, rng)?;
        let high_dim = self.reducer.inverse(samples.view())?;

        Ok(Synthesis {
            reduced: FeatureTable::components(reduced),
            samples,
            synthetic: FeatureTable::new(table.columns().to_vec(), high_dim)?,
        })
    }

    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    /// The fitted density model, for callers that inspect or persist its
    /// parameters.
    pub fn model(&self) -> &M {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::{
        CovarianceType, GaussianMixtureBuilder, KernelDensityBuilder,
    };
    use crate::dimred::PcaBuilder;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use rand::{Rng as _, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rand_distr::StandardNormal;

    /// 100×6 table: two well separated Gaussian blobs living in a 2-D
    /// subspace spanned by the first two columns, plus four noise columns.
    fn embedded_blobs(seed: u64) -> (FeatureTable, [[f64; 2]; 2]) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let centers = [[-4.0, -3.0], [4.0, 3.0]];
        let mut data = Array2::zeros((100, 6));
        for i in 0..100 {
            let center = centers[if i < 50 { 0 } else { 1 }];
            for j in 0..2 {
                let z: f64 = rng.sample(StandardNormal);
                data[[i, j]] = center[j] + 0.5 * z;
            }
            for j in 2..6 {
                let z: f64 = rng.sample(StandardNormal);
                data[[i, j]] = 0.05 * z;
            }
        }
        let columns = (0..6).map(|j| format!("attr_{}", j)).collect();
        (FeatureTable::new(columns, data).unwrap(), centers)
    }

    #[test]
    fn test_process_with_mixture_end_to_end() {
        let (table, centers) = embedded_blobs(101);

        let mut pca = PcaBuilder::new().n_components(2).build();
        pca.fit(table.values()).unwrap();

        // Project the true blob centers through the fitted basis so the
        // recovered component means can be compared in latent space.
        let true_centers = array![
            [centers[0][0], centers[0][1], 0.0, 0.0, 0.0, 0.0],
            [centers[1][0], centers[1][1], 0.0, 0.0, 0.0, 0.0],
        ];
        let projected_centers = pca.forward(true_centers.view()).unwrap();

        let gmm = GaussianMixtureBuilder::new()
            .n_components(2)
            .covariance_type(CovarianceType::Full)
            .build();
        let mut pipeline = Pipeline::new(pca, gmm);

        let mut rng = ChaCha8Rng::seed_from_u64(102);
        let synthesis = pipeline.process(&table, 50, &mut rng).unwrap();

        assert_eq!(synthesis.reduced.ncols(), 2);
        assert_eq!(synthesis.reduced.nrows(), 100);
        assert_eq!(synthesis.reduced.columns(), &["Component 1", "Component 2"]);
        assert_eq!(synthesis.samples.dim(), (50, 2));
        assert_eq!(synthesis.synthetic.nrows(), 50);
        assert_eq!(synthesis.synthetic.ncols(), 6);
        assert_eq!(synthesis.synthetic.columns(), table.columns());
        assert!(synthesis.synthetic.values().iter().all(|v| v.is_finite()));

        // Each recovered component mean must sit closer to a projected true
        // center than the two means sit to each other.
        let means = pipeline.model().means().unwrap();
        let dist = |a: &[f64], b: &[f64]| -> f64 {
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt()
        };
        let mean_rows: Vec<Vec<f64>> = means.rows().into_iter().map(|r| r.to_vec()).collect();
        let center_rows: Vec<Vec<f64>> = projected_centers
            .rows()
            .into_iter()
            .map(|r| r.to_vec())
            .collect();
        let between_means = dist(&mean_rows[0], &mean_rows[1]);
        for mean in &mean_rows {
            let nearest = center_rows
                .iter()
                .map(|c| dist(mean, c))
                .fold(f64::INFINITY, f64::min);
            assert!(
                nearest < between_means,
                "component mean {:?} is not anchored to a blob center",
                mean
            );
        }
    }

    #[test]
    fn test_process_with_kernel_density() {
        let (table, _) = embedded_blobs(201);

        let mut pca = PcaBuilder::new().n_components(2).build();
        pca.fit(table.values()).unwrap();
        let kde = KernelDensityBuilder::new().bandwidth(0.2).build();
        let mut pipeline = Pipeline::new(pca, kde);

        let mut rng = ChaCha8Rng::seed_from_u64(202);
        let synthesis = pipeline.process(&table, 25, &mut rng).unwrap();

        assert_eq!(synthesis.samples.dim(), (25, 2));
        assert_eq!(synthesis.synthetic.nrows(), 25);
        assert_eq!(synthesis.synthetic.ncols(), 6);
        assert!(synthesis.synthetic.values().iter().all(|v| v.is_finite()));
        assert_eq!(pipeline.model().points().unwrap().dim(), (100, 2));
    }

    #[test]
    fn test_process_is_reproducible_under_a_fixed_seed() {
        let (table, _) = embedded_blobs(301);

        let run = |seed: u64| {
            let mut pca = PcaBuilder::new().n_components(2).build();
            pca.fit(table.values()).unwrap();
            let gmm = GaussianMixtureBuilder::new().n_components(2).build();
            let mut pipeline = Pipeline::new(pca, gmm);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            pipeline.process(&table, 10, &mut rng).unwrap()
        };

        let a = run(7);
        let b = run(7);
        assert_eq!(a.samples, b.samples);
        for (x, y) in a
            .synthetic
            .values()
            .iter()
            .zip(b.synthetic.values().iter())
        {
            assert_abs_diff_eq!(x, y, epsilon = 0.0);
        }
    }

    #[test]
    fn test_unfit_reducer_surfaces_not_fitted() {
        let (table, _) = embedded_blobs(401);
        let pca = PcaBuilder::new().n_components(2).build();
        let kde = KernelDensityBuilder::new().build();
        let mut pipeline = Pipeline::new(pca, kde);

        let mut rng = ChaCha8Rng::seed_from_u64(402);
        assert!(matches!(
            pipeline.process(&table, 10, &mut rng),
            Err(crate::error::Error::NotFitted)
        ));
    }
}
