//! Estimator backend
//!
//! Operators hand estimators plain sample matrices: `x` is
//! (samples, features), `y` is (samples, targets). Classifier targets are
//! integer class labels starting at 1 in the first column.

use hubflow_core::{Error, Result};
use ndarray::{Array2, ArrayView2, Axis};

/// A trainable model over sample matrices
pub trait Estimator: Send + Sync {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<()>;

    /// Predicted targets, (samples, targets)
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Class membership probabilities, (samples, classes), columns in
    /// ascending label order
    fn predict_proba(&self, _x: ArrayView2<f64>) -> Result<Array2<f64>> {
        Err(Error::configuration("estimator does not support predict_proba"))
    }

    /// Feature-space transform, (samples, components)
    fn transform(&self, _x: ArrayView2<f64>) -> Result<Array2<f64>> {
        Err(Error::configuration("estimator does not support transform"))
    }

    /// Class labels seen by `fit`, ascending; `None` for regressors
    fn labels(&self) -> Option<&[u32]> {
        None
    }
}

fn check_fitted(x: ArrayView2<f64>, features: usize) -> Result<()> {
    if features == 0 {
        return Err(Error::configuration("estimator is not fitted"));
    }
    if x.ncols() != features {
        return Err(Error::InvalidParameter {
            name: "x",
            value: format!("{} feature(s)", x.ncols()),
            reason: format!("estimator was fitted with {} feature(s)", features),
        });
    }
    Ok(())
}

/// Nearest class centroid classifier.
///
/// Each class is represented by the mean of its training samples; a sample
/// gets the label of the closest centroid (Euclidean distance, first label
/// wins ties).
#[derive(Debug, Clone, Default)]
pub struct MinimumDistance {
    labels: Vec<u32>,
    centroids: Array2<f64>,
}

impl MinimumDistance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Class centroids, (classes, features)
    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    fn distances(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        check_fitted(x, self.centroids.ncols())?;
        Ok(Array2::from_shape_fn((x.nrows(), self.labels.len()), |(i, k)| {
            x.row(i)
                .iter()
                .zip(self.centroids.row(k))
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt()
        }))
    }
}

impl Estimator for MinimumDistance {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView2<f64>) -> Result<()> {
        if x.nrows() != y.nrows() || y.ncols() == 0 {
            return Err(Error::InvalidParameter {
                name: "y",
                value: format!("{}x{}", y.nrows(), y.ncols()),
                reason: format!("expected one label per sample for {} sample(s)", x.nrows()),
            });
        }
        let labels: Vec<u32> = y.column(0).iter().map(|&v| v.round().max(0.0) as u32).collect();
        let mut unique: Vec<u32> = labels.iter().copied().filter(|&l| l > 0).collect();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() < 2 {
            return Err(Error::InvalidParameter {
                name: "y",
                value: format!("{} class(es)", unique.len()),
                reason: "minimum distance needs at least 2 classes".into(),
            });
        }

        let mut sums = Array2::<f64>::zeros((unique.len(), x.ncols()));
        let mut counts = vec![0usize; unique.len()];
        for (sample, label) in x.axis_iter(Axis(0)).zip(&labels) {
            if let Ok(k) = unique.binary_search(label) {
                let mut sum = sums.row_mut(k);
                sum += &sample;
                counts[k] += 1;
            }
        }
        for (mut row, &count) in sums.axis_iter_mut(Axis(0)).zip(&counts) {
            row /= count as f64;
        }
        tracing::debug!("Fitted {} class centroid(s) over {} feature(s)", unique.len(), x.ncols());
        self.labels = unique;
        self.centroids = sums;
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let distances = self.distances(x)?;
        Ok(Array2::from_shape_fn((x.nrows(), 1), |(i, _)| {
            let row = distances.row(i);
            let mut best = 0;
            for (k, &d) in row.iter().enumerate() {
                if d < row[best] {
                    best = k;
                }
            }
            f64::from(self.labels[best])
        }))
    }

    /// Inverse-distance weights normalized to sum to 1; a sample lying on a
    /// centroid belongs to that class only.
    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let mut weights = self.distances(x)?;
        for mut row in weights.axis_iter_mut(Axis(0)) {
            if let Some(k) = row.iter().position(|&d| d == 0.0) {
                row.fill(0.0);
                row[k] = 1.0;
                continue;
            }
            row.mapv_inplace(|d| 1.0 / d);
            let total = row.sum();
            row /= total;
        }
        Ok(weights)
    }

    /// Distances to every centroid
    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.distances(x)
    }

    fn labels(&self) -> Option<&[u32]> {
        Some(&self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn fitted() -> MinimumDistance {
        let x = array![[0.0, 0.0], [0.0, 2.0], [10.0, 10.0], [12.0, 10.0]];
        let y = array![[1.0], [1.0], [3.0], [3.0]];
        let mut estimator = MinimumDistance::new();
        estimator.fit(x.view(), y.view()).unwrap();
        estimator
    }

    #[test]
    fn test_centroids() {
        let estimator = fitted();
        assert_eq!(estimator.labels(), Some(&[1, 3][..]));
        assert_relative_eq!(estimator.centroids()[(0, 1)], 1.0);
        assert_relative_eq!(estimator.centroids()[(1, 0)], 11.0);
    }

    #[test]
    fn test_predict() {
        let estimator = fitted();
        let predicted = estimator.predict(array![[1.0, 1.0], [9.0, 9.0]].view()).unwrap();
        assert_eq!(predicted, array![[1.0], [3.0]]);
    }

    #[test]
    fn test_proba_sums_to_one() {
        let estimator = fitted();
        let proba = estimator.predict_proba(array![[3.0, 4.0], [0.0, 1.0]].view()).unwrap();
        assert_relative_eq!(proba.row(0).sum(), 1.0, epsilon = 1e-12);
        assert!(proba[(0, 0)] > proba[(0, 1)]);
        assert_eq!(proba.row(1).to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_feature_count_checked() {
        let estimator = fitted();
        assert!(estimator.predict(array![[1.0]].view()).is_err());
        assert!(MinimumDistance::new().predict(array![[1.0]].view()).is_err());
    }

    #[test]
    fn test_needs_two_classes() {
        let mut estimator = MinimumDistance::new();
        let x = array![[0.0], [1.0]];
        assert!(estimator.fit(x.view(), array![[1.0], [1.0]].view()).is_err());
    }
}
