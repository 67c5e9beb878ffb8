//! Group partition clusters into pathway sub-clusters.
//!
//! The cluster columns of an aggregated pathway table are joined by
//! agglomerative clustering on cosine distance, the dendrogram is cut to a
//! requested number of groups, and every cell inherits the group of its
//! partition cluster through a new categorical obs column.

use crate::aggregate::{
    gene_expression, gene_expression_norm, resolve_partition, ExpressionSource, MarkerTable,
};
use crate::errors::AnalysisError;
use crate::plot::{clustermap, qualitative_colors};
use annmat::{AnnMatrix, Categorical, Column, UnsValue};
use hclust::{ClusterDirection, DistanceMetric, HierarchicalCluster, LinkageMethod};
use itertools::Itertools;
use log::info;
use plotly::Plot;
use std::collections::HashMap;

/// Everything one sub-clustering run produces.
pub struct PathwayClustering {
    /// The recomputed genes x clusters table behind the figure.
    pub table: MarkerTable,
    /// Sub-cluster label per table column, parallel to `table.clusters`.
    /// Labels are 1-based, consecutive, first-appearance ordered.
    pub assignments: Vec<String>,
    /// Distinct labels, sorted.
    pub labels: Vec<String>,
    /// One color per entry of `labels`, also persisted in `uns`.
    pub colors: Vec<String>,
    /// Column permutation putting `table.clusters` in dendrogram leaf order.
    pub column_order: Vec<usize>,
    /// The rendered heatmap.
    pub figure: Plot,
}

// `Plot` has no `Debug` impl, so derive is unavailable; skip the figure.
impl std::fmt::Debug for PathwayClustering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathwayClustering")
            .field("table", &self.table)
            .field("assignments", &self.assignments)
            .field("labels", &self.labels)
            .field("colors", &self.colors)
            .field("column_order", &self.column_order)
            .finish_non_exhaustive()
    }
}

/// Sub-cluster the partition by pathway expression and label every cell.
///
/// Builds the genes x clusters table from `source`, cuts an agglomerative
/// tree over the cluster columns (cosine distance, the given linkage) into
/// exactly `num_clust` groups, and writes each cell's group under `name` as
/// a new categorical obs column. The table is recomputed after labelling so
/// the returned figure reflects the final matrix state. Colors for the
/// distinct labels are stored under `{name}_colors` in `uns`.
///
/// `num_clust` must satisfy `1 <= num_clust <= categories`; anything else
/// is [`AnalysisError::InvalidSubclusterCount`], raised before the matrix
/// is touched. A single-category partition skips the tree and labels its
/// lone cluster `"1"`.
#[allow(clippy::too_many_arguments)]
pub fn pathway_subclusters(
    matrix: &mut AnnMatrix,
    genes: &[String],
    num_clust: usize,
    name: &str,
    gene_symbol_key: Option<&str>,
    source: ExpressionSource,
    partition_key: &str,
    linkage: LinkageMethod,
) -> Result<PathwayClustering, AnalysisError> {
    let available = resolve_partition(matrix, partition_key)?.categories().len();
    if num_clust < 1 || num_clust > available {
        return Err(AnalysisError::InvalidSubclusterCount {
            requested: num_clust,
            available,
        });
    }

    let aggregate = |matrix: &mut AnnMatrix| match source {
        ExpressionSource::Working => gene_expression(matrix, genes, gene_symbol_key, partition_key),
        ExpressionSource::RawNormalized => {
            gene_expression_norm(matrix, genes, gene_symbol_key, partition_key)
        }
    };
    let table = aggregate(matrix)?;

    let (memberships, column_order) = if table.n_clusters() == 1 {
        (vec![1], vec![0])
    } else {
        let tree = HierarchicalCluster::new(
            &table.values,
            DistanceMetric::Cosine,
            linkage,
            ClusterDirection::Columns,
        );
        (tree.cut(num_clust), tree.leaves())
    };
    let assignments: Vec<String> = memberships.iter().map(|m| m.to_string()).collect();

    // every partition label is one of the table's cluster identifiers
    let cluster_to_group: HashMap<&str, &str> = table
        .clusters
        .iter()
        .map(String::as_str)
        .zip(assignments.iter().map(String::as_str))
        .collect();
    let cell_labels: Vec<String> = resolve_partition(matrix, partition_key)?
        .iter()
        .map(|label| cluster_to_group[label].to_string())
        .collect();
    matrix
        .obs_mut()
        .insert(name, Column::Categorical(Categorical::from_labels(&cell_labels)));

    let table = aggregate(matrix)?;

    let labels: Vec<String> = assignments.iter().cloned().sorted().dedup().collect();
    let colors = qualitative_colors(labels.len());
    matrix.set_uns(&format!("{name}_colors"), UnsValue::Colors(colors.clone()));
    info!(
        "{}: {} clusters cut into {} sub-clusters",
        name,
        table.n_clusters(),
        labels.len()
    );

    let figure = clustermap(
        &table,
        &assignments,
        &labels,
        &colors,
        &column_order,
        partition_key,
        &format!("{name} with {num_clust} clusters"),
    );

    Ok(PathwayClustering {
        table,
        assignments,
        labels,
        colors,
        column_order,
        figure,
    })
}
