//! Cluster-level aggregation of marker gene expression.
//!
//! All three entry points share one skeleton: validate the partition key,
//! then the gene symbol key, resolve the effective gene identifiers, and
//! average each requested gene over the cells of every partition cluster.
//! They differ in the value matrix they read and in whether the derived
//! per-cell signals persist as obs columns.

use crate::errors::AnalysisError;
use crate::stats::nan_sum;
use annmat::{AnnMatrix, Categorical, Column};
use anyhow::{bail, Error};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use std::str::FromStr;

/// Which value matrix an aggregation reads.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExpressionSource {
    /// The working values, typically regressed and scaled.
    Working,
    /// The normalized log values captured in the raw snapshot.
    RawNormalized,
}

impl FromStr for ExpressionSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "working" => Ok(ExpressionSource::Working),
            "raw" => Ok(ExpressionSource::RawNormalized),
            _ => bail!("Expression source not recognized: {}", s),
        }
    }
}

/// Mean expression per requested gene (rows) and partition cluster
/// (columns).
///
/// Rows keep the request order; genes with no identifier match are left
/// out. Tables are built fresh on every call and never cached.
#[derive(Clone, Debug)]
pub struct MarkerTable {
    /// Row labels, in request order.
    pub genes: Vec<String>,
    /// Group tag per row; present for the grouped variant.
    pub groups: Option<Vec<String>>,
    /// Column labels, one per partition category, in category order.
    pub clusters: Vec<String>,
    /// Aggregated means, `genes.len()` x `clusters.len()`.
    pub values: Array2<f64>,
}

impl MarkerTable {
    /// Number of gene rows.
    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    /// Number of cluster columns.
    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// NaN-skipping sum per cluster column.
    pub fn cluster_sums(&self) -> Array1<f64> {
        self.values.axis_iter(Axis(1)).map(nan_sum).collect()
    }

    /// NaN-skipping sum per gene row.
    pub fn gene_sums(&self) -> Array1<f64> {
        self.values.axis_iter(Axis(0)).map(nan_sum).collect()
    }

    /// Entries reaching `threshold`, one count per lane along `axis`:
    /// `Axis(0)` yields a count per gene row, `Axis(1)` a count per cluster
    /// column. NaN entries never count.
    pub fn counts_above(&self, axis: Axis, threshold: f64) -> Vec<usize> {
        self.values
            .axis_iter(axis)
            .map(|lane| lane.iter().filter(|&&v| v >= threshold).count())
            .collect()
    }

    /// Clusters x genes copy, for treating cluster columns as observations.
    pub fn transposed_values(&self) -> Array2<f64> {
        self.values.t().to_owned()
    }
}

pub(crate) fn resolve_partition<'a>(
    matrix: &'a AnnMatrix,
    partition_key: &str,
) -> Result<&'a Categorical, AnalysisError> {
    matrix
        .obs()
        .categorical(partition_key)
        .ok_or_else(|| AnalysisError::MissingPartition {
            key: partition_key.to_string(),
        })
}

/// The identifiers genes are matched against: the text var column under
/// `gene_symbol_key` when given, the gene names otherwise.
pub(crate) fn resolve_identifiers<'a>(
    matrix: &'a AnnMatrix,
    gene_symbol_key: Option<&str>,
) -> Result<&'a [String], AnalysisError> {
    match gene_symbol_key {
        Some(key) => matrix
            .var()
            .text(key)
            .ok_or_else(|| AnalysisError::MissingGeneKey {
                key: key.to_string(),
            }),
        None => Ok(matrix.var_names()),
    }
}

struct GeneRow {
    gene: String,
    /// Per-cell mean over the matched identifier columns.
    derived: Array1<f64>,
    /// Per-cluster means of `derived`, in category order.
    row: Array1<f64>,
}

fn matched_rows(
    values: ArrayView2<'_, f64>,
    identifiers: &[String],
    partition: &Categorical,
    genes: &[String],
) -> Vec<GeneRow> {
    genes
        .iter()
        .filter_map(|gene| {
            let cols: Vec<usize> = identifiers.iter().positions(|id| id == gene).collect();
            if cols.is_empty() {
                // quietly skip genes the matrix does not carry
                return None;
            }
            let derived = values.select(Axis(1), &cols).mean_axis(Axis(1)).unwrap();
            let row = partition.group_means(derived.view());
            Some(GeneRow {
                gene: gene.clone(),
                derived,
                row,
            })
        })
        .collect()
}

fn table_from_rows(
    rows: &[GeneRow],
    groups: Option<Vec<String>>,
    clusters: Vec<String>,
) -> MarkerTable {
    let mut values = Array2::zeros((rows.len(), clusters.len()));
    for (mut out, r) in values.axis_iter_mut(Axis(0)).zip(rows) {
        out.assign(&r.row);
    }
    MarkerTable {
        genes: rows.iter().map(|r| r.gene.clone()).collect(),
        groups,
        clusters,
        values,
    }
}

fn persist_derived(matrix: &mut AnnMatrix, rows: Vec<GeneRow>) {
    for r in rows {
        matrix.obs_mut().insert(&r.gene, Column::Numeric(r.derived));
    }
}

/// Mean expression of `genes` per partition cluster, read from the working
/// values.
///
/// A gene matching several identifiers is summarized by the per-cell mean
/// of its matches; a gene matching none is skipped. The derived per-cell
/// signal of every kept gene persists as an obs column named after the
/// gene, written only after validation and aggregation are complete.
/// Columns follow the partition's category order, one per category, with
/// NaN for categories that hold no cells.
pub fn gene_expression(
    matrix: &mut AnnMatrix,
    genes: &[String],
    gene_symbol_key: Option<&str>,
    partition_key: &str,
) -> Result<MarkerTable, AnalysisError> {
    let partition = resolve_partition(matrix, partition_key)?;
    let identifiers = resolve_identifiers(matrix, gene_symbol_key)?;
    let rows = matched_rows(matrix.values(), identifiers, partition, genes);
    let clusters = partition.categories().to_vec();
    let table = table_from_rows(&rows, None, clusters);
    persist_derived(matrix, rows);
    Ok(table)
}

/// Like [`gene_expression`], but read from the normalized log values held
/// in the raw snapshot, restricted to the current gene axis.
pub fn gene_expression_norm(
    matrix: &mut AnnMatrix,
    genes: &[String],
    gene_symbol_key: Option<&str>,
    partition_key: &str,
) -> Result<MarkerTable, AnalysisError> {
    let partition = resolve_partition(matrix, partition_key)?;
    let identifiers = resolve_identifiers(matrix, gene_symbol_key)?;
    let raw = matrix
        .raw_restricted_to_vars()
        .ok_or(AnalysisError::MissingRawSnapshot)?;
    let rows = matched_rows(raw.view(), identifiers, partition, genes);
    let clusters = partition.categories().to_vec();
    let table = table_from_rows(&rows, None, clusters);
    persist_derived(matrix, rows);
    Ok(table)
}

/// Aggregate named gene groups over a freshly z-scored copy of the working
/// values.
///
/// Rows iterate the groups in the order given and each group's genes in
/// list order, tagging every kept row with its group name. The caller's
/// matrix is never touched. Errors with
/// [`AnalysisError::NoMarkersFound`] when no gene of any group matches.
pub fn marker_gene_expression(
    matrix: &AnnMatrix,
    groups: &[(String, Vec<String>)],
    gene_symbol_key: Option<&str>,
    partition_key: &str,
) -> Result<MarkerTable, AnalysisError> {
    let partition = resolve_partition(matrix, partition_key)?;
    let identifiers = resolve_identifiers(matrix, gene_symbol_key)?;
    let z = matrix.zscored();

    let mut rows = Vec::new();
    let mut tags = Vec::new();
    for (group, genes) in groups {
        let group_rows = matched_rows(z.view(), identifiers, partition, genes);
        tags.extend(std::iter::repeat(group.clone()).take(group_rows.len()));
        rows.extend(group_rows);
    }
    if rows.is_empty() {
        return Err(AnalysisError::NoMarkersFound);
    }
    let clusters = partition.categories().to_vec();
    Ok(table_from_rows(&rows, Some(tags), clusters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn fixture() -> AnnMatrix {
        // cells x genes; cluster "0" holds cells 0 and 2, cluster "1"
        // holds cells 1 and 3
        let x = array![
            [1.0, 2.0, 3.0],
            [4.0, 5.0, 6.0],
            [7.0, 8.0, 9.0],
            [10.0, 11.0, 12.0],
        ];
        let mut m = AnnMatrix::new(
            x,
            (0..4).map(|i| format!("cell{}", i)).collect(),
            vec!["Wnt1".to_string(), "Wnt2".to_string(), "Actb".to_string()],
        )
        .unwrap();
        let labels = ["0", "1", "0", "1"];
        m.obs_mut().insert(
            "leiden",
            Column::Categorical(Categorical::from_labels(&labels)),
        );
        m
    }

    #[test]
    fn test_gene_expression_table() {
        // # Python code to reconstruct this test
        // import numpy as np, pandas as pd
        // x = np.arange(1.0, 13.0).reshape(4, 3)
        // df = pd.DataFrame(x, columns=["Wnt1", "Wnt2", "Actb"])
        // df["leiden"] = pd.Categorical(["0", "1", "0", "1"])
        // print(df.groupby("leiden")[["Wnt2", "Wnt1"]].mean().T)
        // >> leiden    0    1
        //    Wnt2    5.0  8.0
        //    Wnt1    4.0  7.0
        let mut m = fixture();
        let genes = vec![
            "Wnt2".to_string(),
            "Missing".to_string(),
            "Wnt1".to_string(),
        ];
        let table = gene_expression(&mut m, &genes, None, "leiden").unwrap();

        assert_eq!(table.genes, vec!["Wnt2".to_string(), "Wnt1".to_string()]);
        assert_eq!(table.clusters, vec!["0".to_string(), "1".to_string()]);
        assert!(table.groups.is_none());
        assert_abs_diff_eq!(table.values, array![[5.0, 8.0], [4.0, 7.0]], epsilon = 1e-12);

        // derived per-cell signals persist under the gene names
        assert_abs_diff_eq!(
            m.obs().numeric("Wnt2").unwrap().to_owned(),
            array![2.0, 5.0, 8.0, 11.0],
            epsilon = 1e-12
        );
        assert!(m.obs().numeric("Missing").is_none());
    }

    #[test]
    fn test_gene_expression_merges_duplicate_identifiers() {
        let x = array![[1.0, 3.0, 100.0], [5.0, 7.0, 100.0]];
        let mut m = AnnMatrix::new(
            x,
            vec!["c0".to_string(), "c1".to_string()],
            vec!["GeneA".to_string(), "GeneA".to_string(), "GeneB".to_string()],
        )
        .unwrap();
        m.obs_mut().insert(
            "leiden",
            Column::Categorical(Categorical::from_labels(&["0", "0"])),
        );
        let table = gene_expression(&mut m, &["GeneA".to_string()], None, "leiden").unwrap();
        // per-cell mean of the two matched columns, then the cluster mean
        assert_abs_diff_eq!(table.values[[0, 0]], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            m.obs().numeric("GeneA").unwrap().to_owned(),
            array![2.0, 6.0],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_gene_expression_keeps_empty_categories_as_nan() {
        let x = array![[1.0], [3.0]];
        let mut m = AnnMatrix::new(
            x,
            vec!["c0".to_string(), "c1".to_string()],
            vec!["GeneA".to_string()],
        )
        .unwrap();
        let cats = vec!["0".to_string(), "1".to_string(), "2".to_string()];
        m.obs_mut().insert(
            "leiden",
            Column::Categorical(Categorical::with_categories(&["0", "0"], cats).unwrap()),
        );
        let table = gene_expression(&mut m, &["GeneA".to_string()], None, "leiden").unwrap();
        assert_eq!(table.n_clusters(), 3);
        assert_abs_diff_eq!(table.values[[0, 0]], 2.0);
        assert!(table.values[[0, 1]].is_nan());
        assert!(table.values[[0, 2]].is_nan());
    }

    #[test]
    fn test_gene_expression_symbol_key() {
        let mut m = fixture();
        m.var_mut().insert(
            "gene_ids",
            Column::Text(vec![
                "ENSMUSG0001".to_string(),
                "ENSMUSG0002".to_string(),
                "ENSMUSG0003".to_string(),
            ]),
        );
        let table = gene_expression(
            &mut m,
            &["ENSMUSG0003".to_string()],
            Some("gene_ids"),
            "leiden",
        )
        .unwrap();
        assert_eq!(table.genes, vec!["ENSMUSG0003".to_string()]);
        assert_abs_diff_eq!(table.values, array![[6.0, 9.0]], epsilon = 1e-12);
    }

    #[test]
    fn test_empty_table_is_well_formed() {
        let mut m = fixture();
        let table = gene_expression(&mut m, &["Nope".to_string()], None, "leiden").unwrap();
        assert_eq!(table.n_genes(), 0);
        assert_eq!(table.clusters, vec!["0".to_string(), "1".to_string()]);
        assert_eq!(table.values.dim(), (0, 2));
    }

    #[test]
    fn test_missing_partition_before_any_mutation() {
        let mut m = fixture();
        let genes = vec!["Wnt1".to_string()];
        let err = gene_expression(&mut m, &genes, None, "louvain").unwrap_err();
        assert_eq!(
            err,
            AnalysisError::MissingPartition {
                key: "louvain".to_string()
            }
        );
        assert!(!m.obs().contains_column("Wnt1"));
    }

    #[test]
    fn test_missing_gene_key_before_any_mutation() {
        let mut m = fixture();
        let genes = vec!["Wnt1".to_string()];
        let err = gene_expression(&mut m, &genes, Some("symbols"), "leiden").unwrap_err();
        assert_eq!(
            err,
            AnalysisError::MissingGeneKey {
                key: "symbols".to_string()
            }
        );
        assert!(!m.obs().contains_column("Wnt1"));
    }

    #[test]
    fn test_norm_variant_requires_snapshot() {
        let mut m = fixture();
        let genes = vec!["Wnt1".to_string()];
        let err = gene_expression_norm(&mut m, &genes, None, "leiden").unwrap_err();
        assert_eq!(err, AnalysisError::MissingRawSnapshot);
        assert!(!m.obs().contains_column("Wnt1"));
    }

    #[test]
    fn test_norm_variant_reads_snapshot_not_working_values() {
        let mut m = fixture();
        m.set_raw();
        // overwrite the working values; the snapshot keeps the originals
        m.values_mut().fill(0.0);
        let genes = vec!["Wnt1".to_string()];
        let from_working = gene_expression(&mut m, &genes, None, "leiden").unwrap();
        assert_abs_diff_eq!(from_working.values, array![[0.0, 0.0]], epsilon = 1e-12);
        let from_raw = gene_expression_norm(&mut m, &genes, None, "leiden").unwrap();
        assert_abs_diff_eq!(from_raw.values, array![[4.0, 7.0]], epsilon = 1e-12);
        // the obs column reflects the last aggregation run
        assert_abs_diff_eq!(
            m.obs().numeric("Wnt1").unwrap().to_owned(),
            array![1.0, 4.0, 7.0, 10.0],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_marker_gene_expression_groups_and_zscores() {
        // # Python code to reconstruct this test
        // import numpy as np
        // col = np.array([1.0, 4.0, 7.0, 10.0])
        // z = (col - col.mean()) / col.std(ddof=1)
        // print(z[[0, 2]].mean(), z[[1, 3]].mean())
        // >> -0.3872983346207417 0.3872983346207417
        let m = fixture();
        let groups = vec![
            (
                "wnt".to_string(),
                vec!["Wnt1".to_string(), "Wnt2".to_string()],
            ),
            ("empty".to_string(), vec!["Zzz".to_string()]),
        ];
        let table = marker_gene_expression(&m, &groups, None, "leiden").unwrap();
        assert_eq!(table.genes, vec!["Wnt1".to_string(), "Wnt2".to_string()]);
        assert_eq!(
            table.groups,
            Some(vec!["wnt".to_string(), "wnt".to_string()])
        );
        let e = 0.3872983346207417;
        assert_abs_diff_eq!(table.values, array![[-e, e], [-e, e]], epsilon = 1e-12);
        // read-only: no derived columns appear
        assert!(!m.obs().contains_column("Wnt1"));
    }

    #[test]
    fn test_marker_gene_expression_no_markers() {
        let m = fixture();
        let groups = vec![
            ("a".to_string(), vec!["Zzz".to_string()]),
            ("b".to_string(), vec![]),
        ];
        let err = marker_gene_expression(&m, &groups, None, "leiden").unwrap_err();
        assert_eq!(err, AnalysisError::NoMarkersFound);
    }

    #[test]
    fn test_table_sums_and_threshold_counts() {
        let table = MarkerTable {
            genes: vec!["a".to_string(), "b".to_string()],
            groups: None,
            clusters: vec!["0".to_string(), "1".to_string(), "2".to_string()],
            values: array![[1.0, f64::NAN, 3.0], [0.5, 2.0, f64::NAN]],
        };
        assert_abs_diff_eq!(
            table.cluster_sums().to_owned(),
            array![1.5, 2.0, 3.0],
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            table.gene_sums().to_owned(),
            array![4.0, 2.5],
            epsilon = 1e-12
        );
        assert_eq!(table.counts_above(Axis(0), 1.0), vec![2, 1]);
        assert_eq!(table.counts_above(Axis(1), 1.0), vec![1, 1, 1]);
        assert_eq!(table.transposed_values().dim(), (3, 2));
    }

    #[test]
    fn test_parse_expression_source() {
        assert_eq!(
            "working".parse::<ExpressionSource>().unwrap(),
            ExpressionSource::Working
        );
        assert_eq!(
            "raw".parse::<ExpressionSource>().unwrap(),
            ExpressionSource::RawNormalized
        );
        assert!("scaled".parse::<ExpressionSource>().is_err());
    }
}
