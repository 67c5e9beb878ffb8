//! Count-matrix preprocessing: QC metrics, filtering, normalization,
//! highly-variable-gene selection, covariate regression and scaling.

use crate::stats::median_mut;
use annmat::{AnnMatrix, Column};
use anyhow::{bail, Result};
use log::info;
use ndarray::prelude::*;
use ndarray_stats::QuantileExt;

/// Cell and gene thresholds for [`filter_data`].
#[derive(Clone, Copy, Debug)]
pub struct FilterParams {
    /// Minimum total counts a cell must carry.
    pub min_counts: f64,
    /// Minimum number of detected genes a cell must carry.
    pub min_genes: usize,
    /// Minimum number of cells a gene must appear in.
    pub min_cells: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            min_counts: 2000.0,
            min_genes: 2000,
            min_cells: 3,
        }
    }
}

/// Cutoffs for [`highly_variable_genes`].
#[derive(Clone, Copy, Debug)]
pub struct HvgParams {
    /// Lower log1p mean expression bound.
    pub min_mean: f64,
    /// Upper log1p mean expression bound.
    pub max_mean: f64,
    /// Minimum normalized dispersion.
    pub min_disp: f64,
}

impl Default for HvgParams {
    fn default() -> Self {
        HvgParams {
            min_mean: 0.0125,
            max_mean: 3.0,
            min_disp: 0.5,
        }
    }
}

const HVG_BINS: usize = 20;

/// Write the per-cell QC columns `n_genes_per_cell` (nonzero count) and
/// `n_total_counts_per_cell` (row sum) and the per-gene column `n_cells`
/// (count of cells expressing the gene).
pub fn compute_qc_metrics(matrix: &mut AnnMatrix) {
    let x = matrix.values();
    let genes_per_cell: Array1<f64> = x
        .rows()
        .into_iter()
        .map(|row| row.iter().filter(|&&v| v > 0.0).count() as f64)
        .collect();
    let counts_per_cell: Array1<f64> = x.rows().into_iter().map(|row| row.sum()).collect();
    let cells_per_gene: Array1<f64> = x
        .columns()
        .into_iter()
        .map(|col| col.iter().filter(|&&v| v > 0.0).count() as f64)
        .collect();
    matrix
        .obs_mut()
        .insert("n_genes_per_cell", Column::Numeric(genes_per_cell));
    matrix
        .obs_mut()
        .insert("n_total_counts_per_cell", Column::Numeric(counts_per_cell));
    matrix.var_mut().insert("n_cells", Column::Numeric(cells_per_gene));
}

/// Drop low-coverage cells and rarely seen genes, in three passes:
/// 1. Keep cells whose total counts reach `min_counts`
/// 2. Keep cells expressing at least `min_genes` genes
/// 3. Keep genes expressed in at least `min_cells` of the remaining cells
///
/// The QC columns are refreshed for the surviving matrix.
pub fn filter_data(matrix: AnnMatrix, params: &FilterParams) -> AnnMatrix {
    let (cells_before, genes_before) = (matrix.n_obs(), matrix.n_vars());

    let keep: Vec<bool> = matrix
        .values()
        .rows()
        .into_iter()
        .map(|row| row.sum() >= params.min_counts)
        .collect();
    let matrix = matrix.subset_obs(&keep);

    let keep: Vec<bool> = matrix
        .values()
        .rows()
        .into_iter()
        .map(|row| row.iter().filter(|&&v| v > 0.0).count() >= params.min_genes)
        .collect();
    let matrix = matrix.subset_obs(&keep);

    let keep: Vec<bool> = matrix
        .values()
        .columns()
        .into_iter()
        .map(|col| col.iter().filter(|&&v| v > 0.0).count() >= params.min_cells)
        .collect();
    let mut matrix = matrix.subset_vars(&keep);

    compute_qc_metrics(&mut matrix);
    info!(
        "filtered out {} of {} cells and {} of {} genes",
        cells_before - matrix.n_obs(),
        cells_before,
        genes_before - matrix.n_vars(),
        genes_before
    );
    matrix
}

/// Normalize, log-transform and snapshot the matrix:
/// 1. Scale each cell to `target_sum` total counts. If `target_sum` is
///    `None`, use the median of the positive per-cell totals, floored at
///    one. Zero-count cells pass through unscaled
/// 2. Apply the transform `x -> ln(1 + x)`
/// 3. Capture the raw snapshot, so gene subsets taken later can still
///    reach the normalized values of every gene
/// 4. Flag highly variable genes with default [`HvgParams`]
pub fn normalize_data(matrix: &mut AnnMatrix, target_sum: Option<f64>) {
    let totals: Vec<f64> = matrix.values().rows().into_iter().map(|row| row.sum()).collect();
    let target = match target_sum {
        Some(x) => x,
        None => {
            // median_mut reorders its argument, hence the fresh vector
            let mut positive: Vec<f64> = totals.iter().copied().filter(|&t| t > 0.0).collect();
            median_mut(&mut positive).map_or(1.0, |median| median.max(1.0))
        }
    };
    let mut x = matrix.values_mut();
    for (mut row, &total) in x.rows_mut().into_iter().zip(&totals) {
        if total > 0.0 {
            let scale = target / total;
            row.mapv_inplace(|v| (v * scale).ln_1p());
        } else {
            row.mapv_inplace(f64::ln_1p);
        }
    }
    matrix.set_raw();
    highly_variable_genes(matrix, &HvgParams::default());
}

/// Flag highly variable genes of a logged matrix, Seurat flavor:
/// 1. Per gene, mean and variance (ddof 1) of the `expm1` values; a zero
///    mean becomes 1e-12
/// 2. Dispersion = variance / mean; a zero dispersion becomes NaN, then
///    dispersion -> ln(dispersion) and mean -> ln(1 + mean)
/// 3. Genes fall into 20 equal-width mean bins and each dispersion is
///    z-normalized (ddof 1) within its bin; a bin with a single measured
///    dispersion normalizes it to one
/// 4. NaN normalized dispersions drop to zero, and a gene is flagged iff
///    `min_mean < mean < max_mean` and its normalized dispersion exceeds
///    `min_disp`
///
/// Writes the `means`, `dispersions_norm` and `highly_variable` var
/// columns.
pub fn highly_variable_genes(matrix: &mut AnnMatrix, params: &HvgParams) {
    let x = matrix.values();
    let n = x.nrows();
    let n_vars = x.ncols();

    let mut means = Array1::zeros(n_vars);
    let mut dispersions = Array1::zeros(n_vars);
    for (g, col) in x.columns().into_iter().enumerate() {
        let values = col.mapv(f64::exp_m1);
        let mean = if n == 0 { 0.0 } else { values.sum() / n as f64 };
        let var = if n > 1 {
            values.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };
        let mean = if mean == 0.0 { 1e-12 } else { mean };
        let dispersion = var / mean;
        means[g] = mean.ln_1p();
        dispersions[g] = if dispersion == 0.0 {
            f64::NAN
        } else {
            dispersion.ln()
        };
    }

    let mut norm = Array1::zeros(n_vars);
    if n_vars > 0 {
        let lo = *means.min().unwrap();
        let hi = *means.max().unwrap();
        let width = (hi - lo) / HVG_BINS as f64;
        let bin_of = |m: f64| {
            if width > 0.0 {
                (((m - lo) / width) as usize).min(HVG_BINS - 1)
            } else {
                0
            }
        };

        let mut bins: Vec<Vec<usize>> = vec![Vec::new(); HVG_BINS];
        for g in 0..n_vars {
            bins[bin_of(means[g])].push(g);
        }
        for members in &bins {
            let measured: Vec<f64> = members
                .iter()
                .map(|&g| dispersions[g])
                .filter(|d| !d.is_nan())
                .collect();
            let (bin_mean, bin_std) = match measured.len() {
                0 => (0.0, f64::NAN),
                // a lone measured dispersion normalizes to one
                1 => (0.0, measured[0]),
                len => {
                    let m = measured.iter().sum::<f64>() / len as f64;
                    let var = measured.iter().map(|&d| (d - m) * (d - m)).sum::<f64>()
                        / (len - 1) as f64;
                    (m, var.sqrt())
                }
            };
            for &g in members {
                norm[g] = (dispersions[g] - bin_mean) / bin_std;
            }
        }
    }
    norm.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });

    let flags: Vec<bool> = (0..n_vars)
        .map(|g| {
            means[g] > params.min_mean && means[g] < params.max_mean && norm[g] > params.min_disp
        })
        .collect();
    matrix.var_mut().insert("means", Column::Numeric(means));
    matrix
        .var_mut()
        .insert("dispersions_norm", Column::Numeric(norm));
    matrix.var_mut().insert("highly_variable", Column::Bool(flags));
}

/// Subset the matrix to the union of flagged highly variable genes and the
/// catalog genes, where a catalog symbol claims every gene name it
/// prefixes. The raw snapshot keeps all genes.
pub fn merge_genes(matrix: AnnMatrix, gene_sets: &[&[&str]]) -> Result<AnnMatrix> {
    let flags = match matrix.var().bools("highly_variable") {
        Some(flags) => flags,
        None => bail!("var column highly_variable missing; normalize the matrix first"),
    };
    let keep: Vec<bool> = matrix
        .var_names()
        .iter()
        .zip(flags)
        .map(|(name, &hvg)| {
            hvg || gene_sets
                .iter()
                .any(|set| set.iter().any(|symbol| name.starts_with(symbol)))
        })
        .collect();
    let kept = keep.iter().filter(|&&k| k).count();
    info!("merged gene set keeps {} of {} genes", kept, keep.len());
    Ok(matrix.subset_vars(&keep))
}

/// Replace each gene's values with the residuals of an ordinary
/// least-squares fit (with intercept) against the named numeric obs
/// column. A constant covariate degenerates to centering.
pub fn regress_out(matrix: &mut AnnMatrix, covariate: &str) -> Result<()> {
    let cov = match matrix.obs().numeric(covariate) {
        Some(c) => c.clone(),
        None => bail!("obs column {} is missing or not numeric", covariate),
    };
    let n = matrix.n_obs();
    if n == 0 {
        return Ok(());
    }
    let cov_mean = cov.sum() / n as f64;
    let centered = cov.mapv(|c| c - cov_mean);
    let ss: f64 = centered.iter().map(|&c| c * c).sum();

    let mut x = matrix.values_mut();
    for mut col in x.columns_mut() {
        let y_mean = col.sum() / n as f64;
        if ss > 0.0 {
            let sxy: f64 = centered
                .iter()
                .zip(col.iter())
                .map(|(&c, &y)| c * (y - y_mean))
                .sum();
            let slope = sxy / ss;
            for (v, &c) in col.iter_mut().zip(centered.iter()) {
                *v -= y_mean + slope * c;
            }
        } else {
            col.mapv_inplace(|v| v - y_mean);
        }
    }
    Ok(())
}

/// Regress out `covariate`, then center each gene to zero mean and unit
/// variance in place.
pub fn scale_data(matrix: &mut AnnMatrix, covariate: &str) -> Result<()> {
    regress_out(matrix, covariate)?;
    matrix.scale();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn matrix_from(x: Array2<f64>) -> AnnMatrix {
        let cells = (0..x.nrows()).map(|i| format!("cell{i}")).collect();
        let genes = (0..x.ncols()).map(|j| format!("g{j}")).collect();
        AnnMatrix::new(x, cells, genes).unwrap()
    }

    #[test]
    fn test_compute_qc_metrics() {
        let mut matrix = matrix_from(array![[1.0, 0.0, 2.0], [0.0, 0.0, 3.0]]);
        compute_qc_metrics(&mut matrix);
        assert_eq!(
            matrix.obs().numeric("n_genes_per_cell").unwrap().to_vec(),
            vec![2.0, 1.0]
        );
        assert_eq!(
            matrix
                .obs()
                .numeric("n_total_counts_per_cell")
                .unwrap()
                .to_vec(),
            vec![3.0, 3.0]
        );
        assert_eq!(
            matrix.var().numeric("n_cells").unwrap().to_vec(),
            vec![1.0, 0.0, 2.0]
        );
    }

    #[test]
    fn test_filter_data_three_passes() {
        // cell1 fails the count pass, cell3 the gene pass; of the genes
        // only g1 is then seen in two cells
        let matrix = matrix_from(array![
            [2.0, 1.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 5.0, 1.0],
            [4.0, 0.0, 0.0],
        ]);
        let params = FilterParams {
            min_counts: 3.0,
            min_genes: 2,
            min_cells: 2,
        };
        let filtered = filter_data(matrix, &params);
        assert_eq!(filtered.obs_names(), ["cell0", "cell2"]);
        assert_eq!(filtered.var_names(), ["g1"]);
        assert_abs_diff_eq!(
            filtered.values().to_owned(),
            array![[1.0], [5.0]],
            epsilon = 1e-12
        );
        // QC columns describe the surviving matrix
        assert_eq!(
            filtered.obs().numeric("n_genes_per_cell").unwrap().to_vec(),
            vec![1.0, 1.0]
        );
        assert_eq!(filtered.var().numeric("n_cells").unwrap().to_vec(), vec![2.0]);
    }

    #[test]
    fn test_normalize_data_scales_to_median_and_logs() {
        // # Python code to reconstruct this test
        // import numpy as np, scanpy as sc, anndata as ad
        // a = ad.AnnData(np.array([[1., 3.], [2., 2.], [0., 6.]]))
        // sc.pp.normalize_total(a)   # median of totals [4, 4, 6] is 4
        // sc.pp.log1p(a)
        // print(a.X)
        // >> [[0.6931472 1.3862944]
        // >>  [1.0986123 1.0986123]
        // >>  [0.        1.609438 ]]
        let mut matrix = matrix_from(array![[1.0, 3.0], [2.0, 2.0], [0.0, 6.0]]);
        normalize_data(&mut matrix, None);
        assert_abs_diff_eq!(
            matrix.values().to_owned(),
            array![
                [2.0_f64.ln(), 4.0_f64.ln()],
                [3.0_f64.ln(), 3.0_f64.ln()],
                [0.0, 5.0_f64.ln()],
            ],
            epsilon = 1e-12
        );
        // the raw snapshot holds the logged values and the hvg flags exist
        let raw = matrix.raw().unwrap();
        assert_abs_diff_eq!(
            raw.values().to_owned(),
            matrix.values().to_owned(),
            epsilon = 1e-12
        );
        assert!(matrix.var().bools("highly_variable").is_some());
    }

    #[test]
    fn test_normalize_data_passes_zero_count_cells_through() {
        let mut matrix = matrix_from(array![[0.0, 0.0], [2.0, 2.0]]);
        normalize_data(&mut matrix, Some(4.0));
        assert_abs_diff_eq!(
            matrix.values().to_owned(),
            array![[0.0, 0.0], [3.0_f64.ln(), 3.0_f64.ln()]],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_highly_variable_genes_flags_dispersed_gene() {
        // # Python code to reconstruct this test
        // import numpy as np, scanpy as sc, anndata as ad
        // a = ad.AnnData(np.log1p(np.array(
        //     [[0., 1.], [0., 1.], [0., 1.], [0., 1.], [10., 1.]])))
        // sc.pp.highly_variable_genes(a)
        // print(a.var.highly_variable.values, a.var.dispersions_norm.values)
        // >> [ True False] [1. 0.]
        let x = array![
            [0.0, 2.0_f64.ln()],
            [0.0, 2.0_f64.ln()],
            [0.0, 2.0_f64.ln()],
            [0.0, 2.0_f64.ln()],
            [11.0_f64.ln(), 2.0_f64.ln()],
        ];
        let mut matrix = matrix_from(x);
        highly_variable_genes(&mut matrix, &HvgParams::default());
        assert_eq!(
            matrix.var().bools("highly_variable").unwrap(),
            [true, false]
        );
        assert_abs_diff_eq!(
            matrix.var().numeric("dispersions_norm").unwrap().to_vec()[..],
            [1.0, 0.0][..],
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            matrix.var().numeric("means").unwrap().to_vec()[..],
            [3.0_f64.ln(), 2.0_f64.ln()][..],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_merge_genes_keeps_hvg_and_prefix_matches() {
        let x = Array2::zeros((1, 4));
        let names = ["Wnt2", "Wnt2b", "Xyz", "Abc"];
        let mut matrix = AnnMatrix::new(
            x,
            vec!["cell0".to_string()],
            names.iter().map(|n| n.to_string()).collect(),
        )
        .unwrap();
        matrix.var_mut().insert(
            "highly_variable",
            Column::Bool(vec![false, false, false, true]),
        );
        let sets: [&[&str]; 1] = [&["Wnt2"]];
        let merged = merge_genes(matrix, &sets).unwrap();
        // "Wnt2" claims "Wnt2b" too, matching prefix semantics
        assert_eq!(merged.var_names(), ["Wnt2", "Wnt2b", "Abc"]);
    }

    #[test]
    fn test_merge_genes_requires_hvg_flags() {
        let matrix = matrix_from(Array2::zeros((1, 2)));
        let sets: [&[&str]; 0] = [];
        assert!(merge_genes(matrix, &sets).is_err());
    }

    #[test]
    fn test_regress_out_removes_linear_trend() {
        // # Python code to reconstruct this test
        // import numpy as np
        // c = np.array([1., 2., 3.])
        // A = np.vstack([np.ones(3), c]).T
        // for y in ([3., 5., 7.], [4., 4., 4.], [1., 1., 4.]):
        //     beta, *_ = np.linalg.lstsq(A, np.array(y), rcond=None)
        //     print(np.array(y) - A @ beta)
        // >> [0. 0. 0.]
        // >> [0. 0. 0.]
        // >> [ 0.5 -1.   0.5]
        let mut matrix = matrix_from(array![
            [3.0, 4.0, 1.0],
            [5.0, 4.0, 1.0],
            [7.0, 4.0, 4.0],
        ]);
        matrix.obs_mut().insert(
            "n_total_counts_per_cell",
            Column::Numeric(array![1.0, 2.0, 3.0]),
        );
        regress_out(&mut matrix, "n_total_counts_per_cell").unwrap();
        assert_abs_diff_eq!(
            matrix.values().to_owned(),
            array![[0.0, 0.0, 0.5], [0.0, 0.0, -1.0], [0.0, 0.0, 0.5]],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_regress_out_constant_covariate_centers() {
        let mut matrix = matrix_from(array![[1.0], [2.0], [6.0]]);
        matrix
            .obs_mut()
            .insert("depth", Column::Numeric(array![5.0, 5.0, 5.0]));
        regress_out(&mut matrix, "depth").unwrap();
        assert_abs_diff_eq!(
            matrix.values().to_owned(),
            array![[-2.0], [-1.0], [3.0]],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_regress_out_missing_covariate() {
        let mut matrix = matrix_from(array![[1.0], [2.0]]);
        assert!(regress_out(&mut matrix, "depth").is_err());
    }

    #[test]
    fn test_scale_data_standardizes_residuals() {
        let mut matrix = matrix_from(array![[1.0], [1.0], [4.0]]);
        matrix
            .obs_mut()
            .insert("depth", Column::Numeric(array![1.0, 2.0, 3.0]));
        scale_data(&mut matrix, "depth").unwrap();
        // residuals [0.5, -1, 0.5], sample std sqrt(0.75)
        let e = 0.75_f64.sqrt();
        assert_abs_diff_eq!(
            matrix.values().to_owned(),
            array![[0.5 / e], [-1.0 / e], [0.5 / e]],
            epsilon = 1e-12
        );
    }
}
