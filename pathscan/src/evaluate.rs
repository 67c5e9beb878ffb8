//! Partition discriminability scoring against marker gene groups.

use crate::aggregate::{resolve_identifiers, resolve_partition};
use crate::errors::AnalysisError;
use crate::stats::nan_var;
use annmat::AnnMatrix;
use itertools::Itertools;
use ndarray::{Array1, Array2, Axis};

/// Mean z-scored expression per gene group (rows) and observed cluster
/// (columns).
///
/// Columns are the sorted distinct labels that actually occur, not the
/// partition's category order; empty categories never appear here.
#[derive(Clone, Debug)]
pub struct ScoreTable {
    /// Marker group names, in request order.
    pub groups: Vec<String>,
    /// Sorted distinct partition labels that hold at least one cell.
    pub clusters: Vec<String>,
    /// Pooled mean z score, `groups.len()` x `clusters.len()`.
    pub scores: Array2<f64>,
}

impl ScoreTable {
    /// Spread of the group scores within each cluster: the population
    /// variance across groups, one entry per cluster, skipping NaN scores.
    /// High-variance clusters are the ones the marker groups tell apart.
    pub fn cluster_variances(&self) -> Array1<f64> {
        self.scores.axis_iter(Axis(1)).map(nan_var).collect()
    }
}

/// Score how well the partition separates the given marker gene groups.
///
/// Works on a fresh z-scored copy of the values; the matrix is never
/// touched. Each score is the pooled mean of the z values over the block
/// (cluster cells) x (group genes); a group with no genes present scores
/// NaN in every cluster. Errors with [`AnalysisError::NoMarkersFound`]
/// when every cluster variance is NaN, which happens exactly when no gene
/// of any group is present.
pub fn evaluate_partition(
    matrix: &AnnMatrix,
    groups: &[(String, Vec<String>)],
    gene_symbol_key: Option<&str>,
    partition_key: &str,
) -> Result<ScoreTable, AnalysisError> {
    let partition = resolve_partition(matrix, partition_key)?;
    let identifiers = resolve_identifiers(matrix, gene_symbol_key)?;
    let clusters = partition.observed();
    let z = matrix.zscored();

    let cells_per_cluster: Vec<Vec<usize>> = clusters
        .iter()
        .map(|cluster| {
            partition
                .iter()
                .positions(|label| label == cluster)
                .collect()
        })
        .collect();

    let mut scores = Array2::zeros((groups.len(), clusters.len()));
    for (i, (_, genes)) in groups.iter().enumerate() {
        let cols: Vec<usize> = identifiers
            .iter()
            .positions(|id| genes.iter().any(|g| g == id))
            .collect();
        for (j, cells) in cells_per_cluster.iter().enumerate() {
            scores[[i, j]] = pooled_mean(&z, cells, &cols);
        }
    }

    let table = ScoreTable {
        groups: groups.iter().map(|(name, _)| name.clone()).collect(),
        clusters,
        scores,
    };
    if table.cluster_variances().iter().all(|v| v.is_nan()) {
        return Err(AnalysisError::NoMarkersFound);
    }
    Ok(table)
}

/// Plain mean over the `cells` x `cols` block of `z`; NaN when either
/// selection is empty.
fn pooled_mean(z: &Array2<f64>, cells: &[usize], cols: &[usize]) -> f64 {
    if cells.is_empty() || cols.is_empty() {
        return f64::NAN;
    }
    let mut sum = 0.0;
    for &c in cells {
        for &g in cols {
            sum += z[[c, g]];
        }
    }
    sum / (cells.len() * cols.len()) as f64
}
