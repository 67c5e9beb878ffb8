//! Annotated dense expression matrix: a cells x genes value matrix kept in
//! lockstep with per-cell and per-gene metadata frames, an optional
//! pre-scaling snapshot of the values, and an unstructured side table.

pub mod categorical;
pub mod frame;
pub mod matrix;

pub use categorical::Categorical;
pub use frame::{Column, MetaFrame};
pub use matrix::{AnnMatrix, RawSnapshot, UnsValue};
