// Command line utility for running the pathscan pipeline

use annmat::{AnnMatrix, Categorical, Column};
use anyhow::{bail, format_err, Context, Error};
use clap::{value_parser, Arg, Command};
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hclust::LinkageMethod;
use ndarray::prelude::*;
use pathscan::aggregate::ExpressionSource;
use pathscan::evaluate::evaluate_partition;
use pathscan::genesets::{all_pathway_sets, pathway_groups};
use pathscan::plot::{
    expression_across_clusters, expression_across_genes, qc_report, silhouette_box_plot,
    QcPlotParams,
};
use pathscan::preprocess::{
    compute_qc_metrics, filter_data, merge_genes, normalize_data, scale_data, FilterParams,
};
use pathscan::silhouette::sweep_pathway;
use pathscan::subcluster::pathway_subclusters;
use std::collections::HashMap;
use std::fs::{create_dir, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("pathscan-cmd")
        .arg(
            Arg::new("INPUT")
                .help("Expression CSV to use, cells x genes, optionally gzipped")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("LABELS")
                .help("Cluster assignment CSV with barcode,label rows")
                .short('l')
                .long("labels")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("PARTITION_KEY")
                .help("Obs column to store the cluster assignments under")
                .long("partition_key")
                .default_value("leiden"),
        )
        .arg(
            Arg::new("PATHWAY")
                .help("Pathway catalog to sub-cluster")
                .short('p')
                .long("pathway")
                .default_value("wnt_ligands")
                .value_parser([
                    "wnt_ligands",
                    "wnt_receptors",
                    "bmp_ligands",
                    "bmp_receptors",
                    "notch",
                ]),
        )
        .arg(
            Arg::new("NUM_CLUST")
                .help("Number of sub-clusters to cut")
                .short('k')
                .long("num_clust")
                .default_value("2")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("SOURCE")
                .help("Expression values to aggregate")
                .long("source")
                .default_value("working")
                .value_parser(["working", "raw"]),
        )
        .arg(
            Arg::new("LINKAGE")
                .help("Linkage method to use")
                .long("linkage")
                .default_value("average")
                .value_parser(["single", "complete", "average", "ward"]),
        )
        .arg(
            Arg::new("TARGET_SUM")
                .help("Per-cell total after normalization; median of the kept cells when omitted")
                .long("target_sum")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("MIN_COUNTS")
                .help("Minimum counts for a cell to survive filtering")
                .long("min_counts")
                .default_value("2000")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("MIN_GENES")
                .help("Minimum detected genes for a cell to survive filtering")
                .long("min_genes")
                .default_value("2000")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("MIN_CELLS")
                .help("Minimum cells for a gene to survive filtering")
                .long("min_cells")
                .default_value("3")
                .value_parser(value_parser!(usize)),
        )
        .get_matches();

    let input: &PathBuf = matches.get_one("INPUT").unwrap();
    let labels: &PathBuf = matches.get_one("LABELS").unwrap();
    let out_dir: &PathBuf = matches.get_one("OUT_DIR").unwrap();
    let partition_key: &String = matches.get_one("PARTITION_KEY").unwrap();
    let pathway: &String = matches.get_one("PATHWAY").unwrap();
    let num_clust: usize = *matches.get_one("NUM_CLUST").unwrap();
    let source: ExpressionSource = matches.get_one::<String>("SOURCE").unwrap().parse()?;
    let linkage: LinkageMethod = matches.get_one::<String>("LINKAGE").unwrap().parse()?;
    let target_sum: Option<f64> = matches.get_one("TARGET_SUM").copied();
    let filter = FilterParams {
        min_counts: *matches.get_one("MIN_COUNTS").unwrap(),
        min_genes: *matches.get_one("MIN_GENES").unwrap(),
        min_cells: *matches.get_one("MIN_CELLS").unwrap(),
    };

    let mut matrix = load_csv_matrix(input)?;
    attach_labels(&mut matrix, labels, partition_key)?;

    if !out_dir.exists() {
        create_dir(out_dir).with_context(|| out_dir.display().to_string())?;
    }

    compute_qc_metrics(&mut matrix);
    let qc = qc_report(&matrix, &QcPlotParams::default())?;
    std::fs::write(out_dir.join("qc_genes_per_cell.html"), qc.genes_per_cell.to_html())?;
    std::fs::write(out_dir.join("qc_counts_per_cell.html"), qc.counts_per_cell.to_html())?;
    std::fs::write(out_dir.join("qc_counts_vs_genes.html"), qc.counts_vs_genes.to_html())?;
    std::fs::write(out_dir.join("qc_top_genes.html"), qc.top_genes.to_html())?;

    let mut matrix = filter_data(matrix, &filter);
    normalize_data(&mut matrix, target_sum);
    let sets = all_pathway_sets();
    let catalogs: Vec<&[&str]> = sets.iter().map(|(_, list)| *list).collect();
    let mut matrix = merge_genes(matrix, &catalogs)?;
    scale_data(&mut matrix, "n_total_counts_per_cell")?;

    let groups = pathway_groups(&matrix);
    let scores = evaluate_partition(&matrix, &groups, None, partition_key)?;
    table_to_csv(
        &scores.groups,
        &scores.clusters,
        scores.scores.view(),
        out_dir.join("partition_scores.csv.gz"),
    )?;
    let variances = scores
        .cluster_variances()
        .into_shape((1, scores.clusters.len()))?;
    table_to_csv(
        &["variance".to_string()],
        &scores.clusters,
        variances.view(),
        out_dir.join("partition_variances.csv.gz"),
    )?;

    let genes = groups
        .iter()
        .find(|(name, _)| name == pathway)
        .map(|(_, genes)| genes.clone())
        .ok_or_else(|| format_err!("unknown pathway {}", pathway))?;
    if genes.is_empty() {
        bail!("no {} genes present in the matrix", pathway);
    }

    let sweep = sweep_pathway(&mut matrix, &genes, None, source, partition_key)?;
    serde_json::to_writer_pretty(
        BufWriter::new(File::create(out_dir.join("silhouette_scores.json"))?),
        &sweep,
    )?;
    std::fs::write(
        out_dir.join("silhouette_box.html"),
        silhouette_box_plot(&sweep, pathway).to_html(),
    )?;

    let result = pathway_subclusters(
        &mut matrix,
        &genes,
        num_clust,
        pathway,
        None,
        source,
        partition_key,
        linkage,
    )?;
    std::fs::write(
        out_dir.join(format!("{pathway}_heatmap.html")),
        result.figure.to_html(),
    )?;
    table_to_csv(
        &result.table.genes,
        &result.table.clusters,
        result.table.values.view(),
        out_dir.join(format!("{pathway}_table.csv.gz")),
    )?;
    std::fs::write(
        out_dir.join(format!("{pathway}_cluster_sums.html")),
        expression_across_clusters(&result.table).to_html(),
    )?;
    std::fs::write(
        out_dir.join(format!("{pathway}_gene_sums.html")),
        expression_across_genes(&result.table).to_html(),
    )?;

    Ok(())
}

/// Load a dense cells x genes matrix from CSV, gzipped or plain.
///
/// The first row holds gene names after a leading corner cell; every other
/// row holds a cell barcode followed by that cell's counts.
pub fn load_csv_matrix(path: impl AsRef<Path>) -> Result<AnnMatrix, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let reader: Box<dyn BufRead> = if path.extension().map_or(false, |e| e == "gz") {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(file)
    };

    let mut lines = reader.lines();
    let header = lines.next().ok_or_else(|| format_err!("empty matrix file"))??;
    let var_names: Vec<String> = header.split(',').skip(1).map(|s| s.trim().to_string()).collect();
    if var_names.is_empty() {
        bail!("no gene columns in the header row");
    }

    let mut obs_names = Vec::new();
    let mut data = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split(',');
        let barcode = fields
            .next()
            .ok_or_else(|| format_err!("missing barcode"))?
            .trim()
            .to_string();
        let before = data.len();
        for field in fields {
            data.push(
                field
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("row {}", barcode))?,
            );
        }
        if data.len() - before != var_names.len() {
            bail!(
                "row {} has {} values for {} genes",
                barcode,
                data.len() - before,
                var_names.len()
            );
        }
        obs_names.push(barcode);
    }

    let x = Array2::from_shape_vec((obs_names.len(), var_names.len()), data)?;
    AnnMatrix::new(x, obs_names, var_names)
}

/// Attach the partition read from a barcode,label CSV as a categorical obs
/// column; every cell of the matrix must have a label.
pub fn attach_labels(matrix: &mut AnnMatrix, path: impl AsRef<Path>, key: &str) -> Result<(), Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let mut by_barcode = HashMap::new();
    for line in file.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (barcode, label) = line
            .split_once(',')
            .ok_or_else(|| format_err!("expected barcode,label rows: {}", line))?;
        by_barcode.insert(barcode.trim().to_string(), label.trim().to_string());
    }

    let labels = matrix
        .obs_names()
        .iter()
        .map(|barcode| {
            by_barcode
                .get(barcode)
                .cloned()
                .ok_or_else(|| format_err!("no cluster label for cell {}", barcode))
        })
        .collect::<Result<Vec<String>, Error>>()?;
    matrix
        .obs_mut()
        .insert(key, Column::Categorical(Categorical::from_labels(&labels)));
    Ok(())
}

pub fn table_to_csv(
    row_labels: &[String],
    col_labels: &[String],
    values: ArrayView2<'_, f64>,
    path: impl AsRef<Path>,
) -> Result<(), Error> {
    let mut writer = BufWriter::new(GzEncoder::new(File::create(path)?, Compression::default()));
    writeln!(writer, ",{}", col_labels.join(","))?;
    for (label, row) in row_labels.iter().zip(values.axis_iter(Axis(0))) {
        write!(writer, "{}", label)?;
        for entry in row.iter() {
            write!(writer, ",{}", *entry)?;
        }
        writeln!(writer)?;
    }
    Ok(())
}
