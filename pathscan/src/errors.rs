//! Failure modes of the analysis entry points.

use thiserror::Error;

/// What can go wrong inside the analysis operations.
///
/// Validation runs before any matrix mutation: when one of these comes
/// back, the caller's matrix is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// The named obs column is absent or not categorical.
    #[error("partition key {key:?} is not a categorical obs column")]
    MissingPartition {
        /// Name of the obs column that was looked up.
        key: String,
    },

    /// A gene symbol key was given but no text var column carries it.
    #[error("gene symbol key {key:?} is not a text var column")]
    MissingGeneKey {
        /// Name of the var column that was looked up.
        key: String,
    },

    /// Nothing matched: no gene of any requested group is present.
    #[error("none of the requested marker genes are present in the matrix")]
    NoMarkersFound,

    /// A candidate cluster count cannot be fit over the available samples.
    #[error("cannot fit {requested} clusters over {samples} samples; valid counts are 2..{samples}")]
    InvalidClusterCount {
        /// Cluster count that was asked for.
        requested: usize,
        /// Number of samples available to cluster.
        samples: usize,
    },

    /// The requested sub-cluster count does not fit the partition.
    #[error("cannot split {available} clusters into {requested} sub-clusters")]
    InvalidSubclusterCount {
        /// Sub-cluster count that was asked for.
        requested: usize,
        /// Number of clusters in the partition being split.
        available: usize,
    },

    /// Raw-source aggregation was asked for before any snapshot was taken.
    #[error("no raw snapshot present; normalize the matrix before aggregating raw values")]
    MissingRawSnapshot,
}
