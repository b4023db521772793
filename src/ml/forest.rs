use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{DecisionTreeRegressor, DecisionTreeRegressorParameters};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

/// Hyperparameters for the bagged regression forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Share of features each tree is fitted on (1.0 = all)
    pub max_features_fraction: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 12,
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features_fraction: 1.0,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.n_estimators == 0 || self.n_estimators > 5_000 {
            errors.push("n_estimators must be between 1 and 5000".to_string());
        }
        if self.max_depth == 0 || self.max_depth > 64 {
            errors.push("max_depth must be between 1 and 64".to_string());
        }
        if self.min_samples_split < 2 {
            errors.push("min_samples_split must be >= 2".to_string());
        }
        if self.min_samples_leaf == 0 {
            errors.push("min_samples_leaf must be >= 1".to_string());
        }
        if !(self.max_features_fraction > 0.0 && self.max_features_fraction <= 1.0) {
            errors.push("max_features_fraction must be in (0, 1]".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

type Tree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

fn dense(rows: &Vec<Vec<f64>>) -> PipelineResult<DenseMatrix<f64>> {
    DenseMatrix::from_2d_vec(rows)
        .map_err(|e| PipelineError::TrainingFailure(format!("matrix error: {}", e)))
}

/// One bagged tree and the feature columns it was fitted on
#[derive(Debug, Serialize, Deserialize)]
struct Estimator {
    features: Vec<usize>,
    tree: Tree,
}

impl Estimator {
    fn predict_rows(&self, rows: &[Vec<f64>]) -> PipelineResult<Vec<f64>> {
        let projected: Vec<Vec<f64>> = rows
            .iter()
            .map(|row| self.features.iter().map(|&j| row[j]).collect())
            .collect();
        self.tree
            .predict(&dense(&projected)?)
            .map_err(|e| PipelineError::FeatureSchema(format!("tree could not score rows: {}", e)))
    }
}

/// Bagged ensemble of regression trees. Each tree is fitted on a bootstrap
/// sample and a feature subset drawn from a seed derived from
/// `ForestParams::seed`, so fitting the same data twice gives the same
/// forest.
#[derive(Debug, Serialize, Deserialize)]
pub struct RandomForest {
    estimators: Vec<Estimator>,
    n_features: usize,
    feature_importances: Vec<f64>,
}

impl RandomForest {
    #[cfg(test)]
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, params: &ForestParams) -> PipelineResult<Self> {
        Self::fit_until(x, y, params, &AtomicBool::new(false))
    }

    /// Same as `fit`, but gives up between trees once `cancel` is set
    pub fn fit_until(
        x: &Array2<f64>,
        y: &Array1<f64>,
        params: &ForestParams,
        cancel: &AtomicBool,
    ) -> PipelineResult<Self> {
        params
            .validate()
            .map_err(|errors| PipelineError::Validation(errors.join(", ")))?;

        let n = x.nrows();
        let n_features = x.ncols();
        if n == 0 || n_features == 0 {
            return Err(PipelineError::TrainingFailure(
                "cannot fit a forest on an empty matrix".to_string(),
            ));
        }
        if y.len() != n {
            return Err(PipelineError::TrainingFailure(format!(
                "feature rows ({}) and labels ({}) differ",
                n,
                y.len()
            )));
        }

        let rows: Vec<Vec<f64>> = x.rows().into_iter().map(|row| row.to_vec()).collect();
        let labels = y.to_vec();
        let features_per_tree = ((n_features as f64 * params.max_features_fraction).ceil()
            as usize)
            .clamp(1, n_features);
        let tree_params = DecisionTreeRegressorParameters::default()
            .with_max_depth(params.max_depth as u16)
            .with_min_samples_leaf(params.min_samples_leaf)
            .with_min_samples_split(params.min_samples_split);

        let mut estimators = Vec::with_capacity(params.n_estimators);
        for t in 0..params.n_estimators {
            if cancel.load(Ordering::Relaxed) {
                return Err(PipelineError::TrainingFailure(format!(
                    "fit cancelled after {} of {} trees",
                    t, params.n_estimators
                )));
            }

            let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
            let mut features = sample(&mut rng, n_features, features_per_tree).into_vec();
            features.sort_unstable();
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();

            let x_bag: Vec<Vec<f64>> = bootstrap
                .iter()
                .map(|&i| features.iter().map(|&j| rows[i][j]).collect())
                .collect();
            let y_bag: Vec<f64> = bootstrap.iter().map(|&i| labels[i]).collect();

            let tree = Tree::fit(&dense(&x_bag)?, &y_bag, tree_params.clone())
                .map_err(|e| PipelineError::TrainingFailure(format!("tree {} failed to fit: {}", t, e)))?;
            estimators.push(Estimator { features, tree });
        }

        let mut forest = Self {
            estimators,
            n_features,
            feature_importances: Vec::new(),
        };
        forest.feature_importances = forest.permutation_importances(&rows, &labels, params.seed)?;

        info!(
            "Fitted forest: {} trees on {} samples x {} features",
            forest.estimators.len(),
            n,
            n_features
        );
        Ok(forest)
    }

    /// Increase in training MSE when one feature column is shuffled,
    /// normalised to sum to 1 (all zero when no feature matters)
    fn permutation_importances(&self, rows: &[Vec<f64>], labels: &[f64], seed: u64) -> PipelineResult<Vec<f64>> {
        let baseline = mean_squared_error(&self.predict_rows(rows)?, labels);
        let mut rng = StdRng::seed_from_u64(seed.rotate_left(17));
        let mut permuted = rows.to_vec();
        let mut importances = Vec::with_capacity(self.n_features);

        for j in 0..self.n_features {
            let mut column: Vec<f64> = rows.iter().map(|row| row[j]).collect();
            column.shuffle(&mut rng);
            for (row, value) in permuted.iter_mut().zip(&column) {
                row[j] = *value;
            }

            let error = mean_squared_error(&self.predict_rows(&permuted)?, labels);
            importances.push((error - baseline).max(0.0));

            for (row, original) in permuted.iter_mut().zip(rows) {
                row[j] = original[j];
            }
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for importance in importances.iter_mut() {
                *importance /= total;
            }
        }
        debug!("Permutation importances: {:?}", importances);
        Ok(importances)
    }

    #[cfg(test)]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[cfg(test)]
    pub fn n_estimators(&self) -> usize {
        self.estimators.len()
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn check_width(&self, width: usize) -> PipelineResult<()> {
        if width == self.n_features {
            Ok(())
        } else {
            Err(PipelineError::FeatureSchema(format!(
                "model expects {} features, got {}",
                self.n_features, width
            )))
        }
    }

    /// Per-tree outputs, `outputs[tree][row]`
    fn estimator_outputs(&self, rows: &[Vec<f64>]) -> PipelineResult<Vec<Vec<f64>>> {
        for row in rows {
            self.check_width(row.len())?;
        }
        self.estimators.iter().map(|e| e.predict_rows(rows)).collect()
    }

    /// Ensemble mean per row
    fn predict_rows(&self, rows: &[Vec<f64>]) -> PipelineResult<Vec<f64>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let outputs = self.estimator_outputs(rows)?;
        let n_trees = outputs.len() as f64;
        Ok((0..rows.len())
            .map(|i| outputs.iter().map(|tree| tree[i]).sum::<f64>() / n_trees)
            .collect())
    }

    /// One prediction per constituent tree
    pub fn estimator_predictions(&self, row: &[f64]) -> PipelineResult<Vec<f64>> {
        let outputs = self.estimator_outputs(&[row.to_vec()])?;
        Ok(outputs.into_iter().map(|tree| tree[0]).collect())
    }

    /// Ensemble mean and population standard deviation across trees
    pub fn predict_with_spread(&self, row: &[f64]) -> PipelineResult<(f64, f64)> {
        let outputs = self.estimator_predictions(row)?;
        let n = outputs.len() as f64;
        let mean = outputs.iter().sum::<f64>() / n;
        let variance = outputs.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        Ok((mean, variance.sqrt()))
    }

    pub fn predict_batch(&self, x: &Array2<f64>) -> PipelineResult<Vec<f64>> {
        let rows: Vec<Vec<f64>> = x.rows().into_iter().map(|row| row.to_vec()).collect();
        self.predict_rows(&rows)
    }
}

fn mean_squared_error(predicted: &[f64], actual: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).powi(2))
        .sum::<f64>()
        / actual.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_params() -> ForestParams {
        ForestParams {
            n_estimators: 20,
            max_depth: 6,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features_fraction: 1.0,
            seed: 7,
        }
    }

    /// y = 3 * x0 with x1 as noise
    fn linear_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let mut x = Array2::<f64>::zeros((n, 2));
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            x[[i, 0]] = i as f64;
            x[[i, 1]] = ((i * 7) % 5) as f64;
            y[i] = 3.0 * i as f64;
        }
        (x, y)
    }

    #[test]
    fn test_params_validation() {
        assert!(ForestParams::default().validate().is_ok());
        let bad = ForestParams {
            n_estimators: 0,
            min_samples_split: 1,
            max_features_fraction: 1.5,
            ..ForestParams::default()
        };
        assert_eq!(bad.validate().unwrap_err().len(), 3);
    }

    #[test]
    fn test_fit_tracks_signal() {
        let (x, y) = linear_data(60);
        let forest = RandomForest::fit(&x, &y, &quick_params()).unwrap();

        assert_eq!(forest.n_estimators(), 20);
        assert_eq!(forest.n_features(), 2);
        let (low, _) = forest.predict_with_spread(&[5.0, 0.0]).unwrap();
        let (high, _) = forest.predict_with_spread(&[55.0, 0.0]).unwrap();
        assert!(high > low + 100.0, "low={} high={}", low, high);

        let importances = forest.feature_importances();
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (x, y) = linear_data(40);
        let a = RandomForest::fit(&x, &y, &quick_params()).unwrap();
        let b = RandomForest::fit(&x, &y, &quick_params()).unwrap();
        assert_eq!(a.predict_batch(&x).unwrap(), b.predict_batch(&x).unwrap());
        assert_eq!(a.feature_importances(), b.feature_importances());
    }

    #[test]
    fn test_fit_stops_when_cancelled() {
        let (x, y) = linear_data(20);
        let cancel = AtomicBool::new(true);
        let err = RandomForest::fit_until(&x, &y, &quick_params(), &cancel).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TrainingFailure);
        assert!(err.to_string().contains("after 0 of 20 trees"));
    }

    #[test]
    fn test_feature_subsets_cover_every_tree() {
        let (x, y) = linear_data(40);
        let params = ForestParams {
            max_features_fraction: 0.5,
            ..quick_params()
        };
        let forest = RandomForest::fit(&x, &y, &params).unwrap();
        assert!(forest.estimators.iter().all(|e| e.features.len() == 1));
        assert_eq!(forest.estimator_predictions(&[10.0, 2.0]).unwrap().len(), 20);
    }

    #[test]
    fn test_spread_matches_estimators() {
        let (x, y) = linear_data(40);
        let forest = RandomForest::fit(&x, &y, &quick_params()).unwrap();
        let outputs = forest.estimator_predictions(&[20.0, 1.0]).unwrap();
        assert_eq!(outputs.len(), 20);

        let (mean, std) = forest.predict_with_spread(&[20.0, 1.0]).unwrap();
        let expected_mean = outputs.iter().sum::<f64>() / outputs.len() as f64;
        assert!((mean - expected_mean).abs() < 1e-9);
        assert!(std >= 0.0);
    }

    #[test]
    fn test_constant_labels_give_single_leaf() {
        let x = Array2::<f64>::from_shape_fn((10, 2), |(i, j)| (i + j) as f64);
        let y = Array1::<f64>::from_elem(10, 42.0);
        let forest = RandomForest::fit(&x, &y, &quick_params()).unwrap();
        let (mean, std) = forest.predict_with_spread(&[3.0, 4.0]).unwrap();
        assert_eq!(mean, 42.0);
        assert_eq!(std, 0.0);
    }

    #[test]
    fn test_mismatched_shapes_rejected() {
        let x = Array2::<f64>::zeros((5, 2));
        let y = Array1::<f64>::zeros(4);
        assert!(RandomForest::fit(&x, &y, &quick_params()).is_err());
    }

    #[test]
    fn test_width_check() {
        let (x, y) = linear_data(20);
        let forest = RandomForest::fit(&x, &y, &quick_params()).unwrap();
        assert!(forest.check_width(2).is_ok());
        let err = forest.check_width(3).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::FeatureSchemaError);

        let err = forest.predict_with_spread(&[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::FeatureSchemaError);
    }

    #[test]
    fn test_serde_preserves_predictions() {
        let (x, y) = linear_data(30);
        let forest = RandomForest::fit(&x, &y, &quick_params()).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let restored: RandomForest = serde_json::from_str(&json).unwrap();
        assert_eq!(
            forest.predict_batch(&x).unwrap(),
            restored.predict_batch(&x).unwrap()
        );
    }
}
