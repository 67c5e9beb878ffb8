//! Silhouette scoring for choosing a sub-cluster count.
//!
//! Clusters of an aggregated pathway table become observations in gene
//! space; repeated k-means fits over a candidate range of counts give a
//! score distribution per count. Picking the count from those
//! distributions stays a human decision.

use crate::aggregate::{gene_expression, gene_expression_norm, ExpressionSource};
use crate::errors::AnalysisError;
use annmat::AnnMatrix;
use hclust::DistanceMetric;
use itertools::Itertools;
use log::info;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::Serialize;

/// Independent k-means fits scored per candidate count.
pub const SILHOUETTE_TRIALS: usize = 100;

/// Iteration cap for each k-means fit.
pub const KMEANS_MAX_ITER: usize = 100;

/// Square pairwise distance matrix over the rows of `x`.
pub fn pairwise_distances(x: ArrayView2<'_, f64>, metric: DistanceMetric) -> Array2<f64> {
    let n = x.nrows();
    let mut distances = Array2::zeros((n, n));
    for i in 0..n {
        for j in i + 1..n {
            let d = metric.apply(&x.row(i), &x.row(j));
            distances[[i, j]] = d;
            distances[[j, i]] = d;
        }
    }
    distances
}

/// Per-sample silhouette coefficients from a precomputed distance matrix.
///
/// Samples in singleton clusters score zero; so does every sample when the
/// labelling collapses to a single distinct cluster, which keeps the score
/// defined for degenerate fits.
pub fn silhouette_samples(distances: &Array2<f64>, labels: &[usize]) -> Vec<f64> {
    let n = labels.len();
    assert_eq!(distances.nrows(), n);
    assert_eq!(distances.ncols(), n);
    let distinct: Vec<usize> = labels.iter().copied().unique().collect();
    if distinct.len() < 2 {
        return vec![0.0; n];
    }
    let ids: Vec<usize> = labels
        .iter()
        .map(|l| distinct.iter().position(|d| d == l).unwrap())
        .collect();
    let k = distinct.len();
    let mut sizes = vec![0usize; k];
    for &id in &ids {
        sizes[id] += 1;
    }

    let mut result = Vec::with_capacity(n);
    for i in 0..n {
        if sizes[ids[i]] == 1 {
            result.push(0.0);
            continue;
        }
        let mut sums = vec![0.0; k];
        for j in 0..n {
            sums[ids[j]] += distances[[i, j]];
        }
        // the self distance is zero, so the own-cluster sum already
        // excludes it
        let a = sums[ids[i]] / (sizes[ids[i]] - 1) as f64;
        let b = (0..k)
            .filter(|&c| c != ids[i])
            .map(|c| sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        result.push(if denom == 0.0 { 0.0 } else { (b - a) / denom });
    }
    result
}

/// Mean silhouette coefficient of a labelling.
pub fn silhouette_score(distances: &Array2<f64>, labels: &[usize]) -> f64 {
    let samples = silhouette_samples(distances, labels);
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Silhouette scores of the independent fits for one candidate count.
#[derive(Clone, Debug, Serialize)]
pub struct TrialScores {
    /// Candidate cluster count these fits were run with.
    pub k: usize,
    /// One silhouette score per independent k-means fit.
    pub scores: Vec<f64>,
}

/// Score distributions for every candidate count of a sweep.
#[derive(Clone, Debug, Serialize)]
pub struct SilhouetteSweep {
    /// Per-candidate score distributions, in candidate order.
    pub trials: Vec<TrialScores>,
}

impl SilhouetteSweep {
    /// Mean score per candidate count, in sweep order.
    pub fn mean_scores(&self) -> Vec<(usize, f64)> {
        self.trials
            .iter()
            .map(|t| (t.k, t.scores.iter().sum::<f64>() / t.scores.len() as f64))
            .collect()
    }
}

/// Score [`SILHOUETTE_TRIALS`] independent k-means fits for every
/// candidate count over the rows of `x`, with cosine distances.
///
/// Every candidate is validated before any fit runs: a count must satisfy
/// `2 <= k < n` for `n` observations, otherwise
/// [`AnalysisError::InvalidClusterCount`]. Each fit draws its own
/// starting centroids, so the trials sample the stability of a count
/// rather than repeating one solution.
pub fn silhouette_analysis(
    candidates: &[usize],
    x: &Array2<f64>,
) -> Result<SilhouetteSweep, AnalysisError> {
    let samples = x.nrows();
    for &k in candidates {
        if k < 2 || k >= samples {
            return Err(AnalysisError::InvalidClusterCount {
                requested: k,
                samples,
            });
        }
    }

    let distances = pairwise_distances(x.view(), DistanceMetric::Cosine);
    let rows: Vec<Vec<f64>> = x.axis_iter(Axis(0)).map(|r| r.to_vec()).collect();

    let trials = candidates
        .iter()
        .map(|&k| {
            let scores: Vec<f64> = (0..SILHOUETTE_TRIALS)
                .into_par_iter()
                .map(|_| {
                    let fit = clustering::kmeans(k, &rows, KMEANS_MAX_ITER);
                    silhouette_score(&distances, &fit.membership)
                })
                .collect();
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            info!(
                "silhouette sweep k={}: mean score {:.4} over {} fits",
                k,
                mean,
                scores.len()
            );
            TrialScores { k, scores }
        })
        .collect();

    Ok(SilhouetteSweep { trials })
}

/// Conventional candidate counts for a table of `n` clusters: `2..n`.
pub fn pathway_cluster_range(n: usize) -> Vec<usize> {
    (2..n).collect()
}

/// Sweep candidate sub-cluster counts for one pathway: build its
/// cluster-level table from the chosen source, treat the cluster columns
/// as observations, and score the conventional candidate range.
///
/// Aggregation runs through the mutating variants, so the derived per-cell
/// columns persist exactly as a direct aggregation call would leave them.
pub fn sweep_pathway(
    matrix: &mut AnnMatrix,
    genes: &[String],
    gene_symbol_key: Option<&str>,
    source: ExpressionSource,
    partition_key: &str,
) -> Result<SilhouetteSweep, AnalysisError> {
    let table = match source {
        ExpressionSource::Working => gene_expression(matrix, genes, gene_symbol_key, partition_key)?,
        ExpressionSource::RawNormalized => {
            gene_expression_norm(matrix, genes, gene_symbol_key, partition_key)?
        }
    };
    let observations = table.transposed_values();
    let candidates = pathway_cluster_range(table.n_clusters());
    silhouette_analysis(&candidates, &observations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_silhouette_samples_two_tight_pairs() {
        // # Python code to reconstruct this test
        // import numpy as np
        // from sklearn.metrics import silhouette_samples
        // x = np.array([[0.0, 0.0], [0.0, 1.0], [10.0, 0.0], [10.0, 1.0]])
        // print(silhouette_samples(x, [0, 0, 1, 1]))
        // >> [0.90024876 0.90024876 0.90024876 0.90024876]
        let x = array![[0.0, 0.0], [0.0, 1.0], [10.0, 0.0], [10.0, 1.0]];
        let d = pairwise_distances(x.view(), DistanceMetric::Euclidean);
        let s = silhouette_samples(&d, &[0, 0, 1, 1]);
        for &v in &s {
            assert_abs_diff_eq!(v, 0.90024876, epsilon = 1e-8);
        }
        assert_abs_diff_eq!(
            silhouette_score(&d, &[0, 0, 1, 1]),
            0.90024876,
            epsilon = 1e-8
        );
    }

    #[test]
    fn test_silhouette_singletons_score_zero() {
        let x = array![[0.0, 0.0], [0.0, 1.0], [9.0, 0.0]];
        let d = pairwise_distances(x.view(), DistanceMetric::Euclidean);
        let s = silhouette_samples(&d, &[0, 1, 1]);
        assert_abs_diff_eq!(s[0], 0.0);
        assert!(s[1] != 0.0);
    }

    #[test]
    fn test_silhouette_degenerate_labelling_scores_zero() {
        let x = array![[0.0, 0.0], [0.0, 1.0], [9.0, 0.0]];
        let d = pairwise_distances(x.view(), DistanceMetric::Euclidean);
        assert_eq!(silhouette_samples(&d, &[3, 3, 3]), vec![0.0, 0.0, 0.0]);
        assert_abs_diff_eq!(silhouette_score(&d, &[3, 3, 3]), 0.0);
    }

    #[test]
    fn test_silhouette_identical_points_score_zero() {
        let x = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let d = pairwise_distances(x.view(), DistanceMetric::Euclidean);
        assert_eq!(silhouette_samples(&d, &[0, 0, 1, 1]), vec![0.0; 4]);
    }

    #[test]
    fn test_analysis_validates_every_candidate_up_front() {
        let x = Array2::zeros((5, 2));
        assert_eq!(
            silhouette_analysis(&[1], &x).unwrap_err(),
            AnalysisError::InvalidClusterCount {
                requested: 1,
                samples: 5
            }
        );
        assert_eq!(
            silhouette_analysis(&[5], &x).unwrap_err(),
            AnalysisError::InvalidClusterCount {
                requested: 5,
                samples: 5
            }
        );
        // one bad candidate poisons the whole request, valid ones included
        assert_eq!(
            silhouette_analysis(&[2, 3, 7], &x).unwrap_err(),
            AnalysisError::InvalidClusterCount {
                requested: 7,
                samples: 5
            }
        );
    }

    #[test]
    fn test_analysis_scores_stay_bounded() {
        // two tight direction bundles; k=2 should look clearly good
        let x = array![
            [1.0, 0.0],
            [0.99, 0.01],
            [0.98, 0.02],
            [0.0, 1.0],
            [0.01, 0.99],
            [0.02, 0.98],
        ];
        let sweep = silhouette_analysis(&[2, 3], &x).unwrap();
        assert_eq!(sweep.trials.len(), 2);
        for trial in &sweep.trials {
            assert_eq!(trial.scores.len(), SILHOUETTE_TRIALS);
            for &s in &trial.scores {
                assert!((-1.0..=1.0).contains(&s));
            }
        }
        let means = sweep.mean_scores();
        assert_eq!(means[0].0, 2);
        assert!(means[0].1 > 0.5);
    }

    #[test]
    fn test_pathway_cluster_range() {
        assert_eq!(pathway_cluster_range(6), vec![2, 3, 4, 5]);
        assert!(pathway_cluster_range(2).is_empty());
        assert!(pathway_cluster_range(0).is_empty());
    }
}
