//! # pathscan: pathway-level single cell analysis
//!
//! Takes an annotated expression matrix with an existing cell partition
//! and asks how the cells of each signalling pathway organize: aggregate
//! marker expression per cluster, score how well the partition separates
//! marker groups, pick a sub-cluster count by silhouette sweep, and cut
//! the clusters into annotated, plotted sub-clusters.

#![deny(missing_docs)]
#![deny(warnings)]

/// Cluster-level aggregation of marker gene expression
pub mod aggregate;

/// Error types shared by the analysis entry points
pub mod errors;

/// Partition scoring against marker gene groups
pub mod evaluate;

/// Built-in signalling pathway gene catalogs
pub mod genesets;

/// Plotly figure builders
pub mod plot;

/// Filtering, normalization and gene selection
pub mod preprocess;

/// Silhouette sweeps over candidate cluster counts
pub mod silhouette;

/// Pathway sub-clustering and annotation
pub mod subcluster;

pub mod stats;

pub use errors::AnalysisError;
