//! Plotly figure builders: the sub-cluster heatmap, silhouette box plots,
//! bar-chart table summaries and the QC report panels.

use crate::aggregate::MarkerTable;
use crate::silhouette::SilhouetteSweep;
use annmat::AnnMatrix;
use anyhow::{format_err, Result};
use noisy_float::prelude::*;
use plotly::color::NamedColor;
use plotly::common::{
    ColorBar, ColorScale, ColorScaleElement, ColorScalePalette, DashType, Marker, Mode,
};
use plotly::layout::{Axis, AxisType, Layout, Shape, ShapeLine, ShapeType};
use plotly::{Bar, BoxPlot, HeatMap, Histogram, Plot, Scatter};
use std::cmp::Reverse;

/// The fixed 12-entry qualitative palette used for sub-cluster colors.
pub const QUALITATIVE_PALETTE: [&str; 12] = [
    "#a6cee3", "#1f78b4", "#b2df8a", "#33a02c", "#fb9a99", "#e31a1c", "#fdbf6f", "#ff7f00",
    "#cab2d6", "#6a3d9a", "#ffff99", "#b15928",
];

/// `n` colors picked at evenly spaced positions across
/// [`QUALITATIVE_PALETTE`], endpoints included. Positions index the palette
/// by truncation, so requests beyond twelve repeat entries.
pub fn qualitative_colors(n: usize) -> Vec<String> {
    if n == 1 {
        return vec![QUALITATIVE_PALETTE[0].to_string()];
    }
    let last = QUALITATIVE_PALETTE.len() - 1;
    (0..n)
        .map(|i| {
            let position = i as f64 / (n - 1) as f64;
            let idx = (position * QUALITATIVE_PALETTE.len() as f64) as usize;
            QUALITATIVE_PALETTE[idx.min(last)].to_string()
        })
        .collect()
}

/// Piecewise-constant color scale assigning `colors[i]` to the band around
/// normalized value `i / (len - 1)`.
fn banded_scale(colors: &[String]) -> Vec<ColorScaleElement> {
    let k = colors.len();
    if k == 1 {
        return vec![
            ColorScaleElement(0.0, colors[0].clone()),
            ColorScaleElement(1.0, colors[0].clone()),
        ];
    }
    let denom = (2 * (k - 1)) as f64;
    let mut elements = Vec::with_capacity(2 * k);
    for (i, color) in colors.iter().enumerate() {
        let lo = if i == 0 { 0.0 } else { (2 * i - 1) as f64 / denom };
        let hi = if i == k - 1 {
            1.0
        } else {
            (2 * i + 1) as f64 / denom
        };
        elements.push(ColorScaleElement(lo, color.clone()));
        elements.push(ColorScaleElement(hi, color.clone()));
    }
    elements
}

/// Heatmap of an aggregated table with its columns in dendrogram leaf order
/// and a strip row showing each column's sub-cluster color.
///
/// Rows keep table order; `assignments` runs parallel to `table.clusters`,
/// `colors` parallel to the sorted distinct `labels`.
pub fn clustermap(
    table: &MarkerTable,
    assignments: &[String],
    labels: &[String],
    colors: &[String],
    column_order: &[usize],
    partition_key: &str,
    title: &str,
) -> Plot {
    let x: Vec<String> = column_order
        .iter()
        .map(|&c| table.clusters[c].clone())
        .collect();
    let z: Vec<Vec<f64>> = table
        .values
        .rows()
        .into_iter()
        .map(|row| column_order.iter().map(|&c| row[c]).collect())
        .collect();

    let values = HeatMap::new(x.clone(), table.genes.clone(), z)
        .color_scale(ColorScale::Palette(ColorScalePalette::Viridis))
        .color_bar(ColorBar::new().title("Expression").outline_width(0))
        .hover_template("Cluster %{x}<br>Gene %{y}<br>Expression %{z}")
        .name("");

    // strip values are positions in the sorted label list, so the banded
    // scale lines up with one band per label
    let strip_z: Vec<f64> = column_order
        .iter()
        .map(|&c| {
            labels
                .iter()
                .position(|l| *l == assignments[c])
                .map_or(f64::NAN, |p| p as f64)
        })
        .collect();
    let strip = HeatMap::new(x, vec!["Sub-cluster".to_string()], vec![strip_z])
        .color_scale(ColorScale::Vector(banded_scale(colors)))
        .show_scale(false)
        .hover_template("Cluster %{x}<br>Sub-cluster band %{z}")
        .name("");

    let mut plot = Plot::new();
    plot.add_trace(values);
    plot.add_trace(strip);
    plot.set_layout(
        Layout::new()
            .title(title)
            .x_axis(
                Axis::new()
                    .title(format!("{partition_key} clustering"))
                    .type_(AxisType::Category),
            )
            .y_axis(Axis::new().auto_margin(true).type_(AxisType::Category))
            .show_legend(false),
    );
    plot
}

/// One box of trial scores per candidate count.
pub fn silhouette_box_plot(sweep: &SilhouetteSweep, title: &str) -> Plot {
    let mut plot = Plot::new();
    for trial in &sweep.trials {
        plot.add_trace(BoxPlot::new(trial.scores.clone()).name(&trial.k.to_string()));
    }
    plot.set_layout(
        Layout::new()
            .title(title)
            .x_axis(
                Axis::new()
                    .title("Number of Clusters")
                    .type_(AxisType::Category),
            )
            .y_axis(Axis::new().title("Silhouette Score"))
            .show_legend(false),
    );
    plot
}

/// Bar chart of the NaN-skipping expression sum per cluster column.
pub fn expression_across_clusters(table: &MarkerTable) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(Bar::new(
        table.clusters.clone(),
        table.cluster_sums().to_vec(),
    ));
    plot.set_layout(
        Layout::new()
            .title("Z-Score Expression Sum Across Leiden Clusters")
            .x_axis(Axis::new().type_(AxisType::Category)),
    );
    plot
}

/// Bar chart of the NaN-skipping expression sum per gene row.
pub fn expression_across_genes(table: &MarkerTable) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(Bar::new(table.genes.clone(), table.gene_sums().to_vec()));
    plot.set_layout(
        Layout::new()
            .title("Z-Score Expression Sum Across Genes")
            .x_axis(Axis::new().type_(AxisType::Category)),
    );
    plot
}

/// Bar chart of how many table entries reach `threshold` along `axis`,
/// labelled per gene for `Axis(0)` and per cluster for `Axis(1)`.
pub fn counts_above_threshold(table: &MarkerTable, axis: ndarray::Axis, threshold: f64) -> Plot {
    let x = match axis.index() {
        0 => table.genes.clone(),
        _ => table.clusters.clone(),
    };
    let mut plot = Plot::new();
    plot.add_trace(Bar::new(x, table.counts_above(axis, threshold)));
    plot.set_layout(
        Layout::new()
            .title("Histogram of Counts Above Threshold Value")
            .x_axis(
                Axis::new()
                    .title(format!("Sum along axis {}", axis.index()))
                    .type_(AxisType::Category),
            )
            .y_axis(Axis::new().title("Counts Above Threshold Value")),
    );
    plot
}

/// Ranges, threshold guides and the top-gene count for [`qc_report`].
#[derive(Clone, Copy, Debug)]
pub struct QcPlotParams {
    /// X-axis range of the genes-per-cell histogram.
    pub genes_range: (f64, f64),
    /// X-axis range of the counts-per-cell histogram.
    pub counts_range: (f64, f64),
    /// Guide line position on the genes-per-cell histogram.
    pub genes_threshold: f64,
    /// Guide line position on the counts-per-cell histogram.
    pub counts_threshold: f64,
    /// How many of the highest expressed genes to box-plot.
    pub top_genes: usize,
}

impl Default for QcPlotParams {
    fn default() -> Self {
        QcPlotParams {
            genes_range: (0.0, 10_000.0),
            counts_range: (0.0, 400_000.0),
            genes_threshold: 2_000.0,
            counts_threshold: 20_000.0,
            top_genes: 15,
        }
    }
}

/// The four stand-alone QC panels.
pub struct QcReport {
    /// Histogram of detected genes per cell.
    pub genes_per_cell: Plot,
    /// Histogram of total counts per cell.
    pub counts_per_cell: Plot,
    /// Scatter of total counts against detected genes.
    pub counts_vs_genes: Plot,
    /// Box plots of the highest expressed genes.
    pub top_genes: Plot,
}

fn threshold_line(x: f64) -> Shape {
    Shape::new()
        .shape_type(ShapeType::Line)
        .x_ref("x")
        .y_ref("paper")
        .x0(x)
        .x1(x)
        .y0(0.0)
        .y1(1.0)
        .line(
            ShapeLine::new()
                .color(NamedColor::Red)
                .width(2.0)
                .dash(DashType::Dash),
        )
}

fn threshold_histogram(
    values: Vec<f64>,
    range: (f64, f64),
    threshold: f64,
    title: &str,
    x_title: &str,
    y_title: &str,
) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(Histogram::new(values).n_bins_x(100));
    plot.set_layout(
        Layout::new()
            .title(title)
            .x_axis(Axis::new().title(x_title).range(vec![range.0, range.1]))
            .y_axis(Axis::new().title(y_title))
            .shapes(vec![threshold_line(threshold)]),
    );
    plot
}

/// Build the QC panels: genes-per-cell and counts-per-cell histograms with
/// dashed threshold guides, a counts-vs-genes scatter, and box plots of the
/// per-cell count fraction for the highest-expressed genes.
///
/// Requires the per-cell QC columns, so run `compute_qc_metrics` first.
pub fn qc_report(matrix: &AnnMatrix, params: &QcPlotParams) -> Result<QcReport> {
    let genes = matrix
        .obs()
        .numeric("n_genes_per_cell")
        .ok_or_else(|| format_err!("obs column n_genes_per_cell missing; compute QC metrics first"))?;
    let counts = matrix.obs().numeric("n_total_counts_per_cell").ok_or_else(|| {
        format_err!("obs column n_total_counts_per_cell missing; compute QC metrics first")
    })?;

    let genes_per_cell = threshold_histogram(
        genes.to_vec(),
        params.genes_range,
        params.genes_threshold,
        "Histogram of Number of Genes per Cell",
        "Number of Genes",
        "Frequency (# of Cells)",
    );
    let counts_per_cell = threshold_histogram(
        counts.to_vec(),
        params.counts_range,
        params.counts_threshold,
        "Histogram of Counts per Cell",
        "Counts per Cell",
        "Frequency (# of Cells)",
    );

    let mut counts_vs_genes = Plot::new();
    counts_vs_genes.add_trace(
        Scatter::new(counts.to_vec(), genes.to_vec())
            .mode(Mode::Markers)
            .marker(Marker::new().size(2))
            .name(""),
    );
    counts_vs_genes.set_layout(
        Layout::new()
            .title("Counts vs. Genes")
            .x_axis(Axis::new().title("Counts"))
            .y_axis(Axis::new().title("Genes"))
            .show_legend(false),
    );

    Ok(QcReport {
        genes_per_cell,
        counts_per_cell,
        counts_vs_genes,
        top_genes: top_gene_fractions(matrix, params.top_genes),
    })
}

/// Box plots of the per-cell percentage of counts carried by each of the
/// `top` genes with the highest mean percentage.
fn top_gene_fractions(matrix: &AnnMatrix, top: usize) -> Plot {
    let x = matrix.values();
    let n_obs = matrix.n_obs();
    let n_vars = matrix.n_vars();
    let totals: Vec<f64> = x.rows().into_iter().map(|row| row.sum()).collect();

    let mut mean_percent = vec![0.0; n_vars];
    for (row, &total) in x.rows().into_iter().zip(&totals) {
        if total > 0.0 {
            for (g, &v) in row.iter().enumerate() {
                mean_percent[g] += 100.0 * v / total;
            }
        }
    }
    if n_obs > 0 {
        for m in &mut mean_percent {
            *m /= n_obs as f64;
        }
    }

    let mut order: Vec<usize> = (0..n_vars).collect();
    order.sort_by_key(|&g| Reverse(n64(mean_percent[g])));
    order.truncate(top);

    let var_names = matrix.var_names();
    let mut plot = Plot::new();
    for &g in &order {
        let percents: Vec<f64> = x
            .rows()
            .into_iter()
            .zip(&totals)
            .map(|(row, &total)| {
                if total > 0.0 {
                    100.0 * row[g] / total
                } else {
                    0.0
                }
            })
            .collect();
        plot.add_trace(BoxPlot::new(percents).name(&var_names[g]));
    }
    plot.set_layout(
        Layout::new()
            .title(&format!("{top} Highest Expressed Genes"))
            .y_axis(Axis::new().title("% of total counts"))
            .show_legend(false),
    );
    plot
}
