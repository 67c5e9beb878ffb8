use crate::frame::MetaFrame;
use anyhow::{format_err, Error};
use itertools::Itertools;
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis};
use std::collections::{BTreeMap, HashMap};

/// Entry in the unstructured side table.
#[derive(Clone, Debug, PartialEq)]
pub enum UnsValue {
    Colors(Vec<String>),
    Text(String),
    Scalar(f64),
}

/// Copy of the values and gene axis taken before destructive transforms.
#[derive(Clone, Debug)]
pub struct RawSnapshot {
    x: Array2<f64>,
    var_names: Vec<String>,
}

impl RawSnapshot {
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    /// Columns of the snapshot reindexed to `var_names`.
    ///
    /// Panics if a name is missing from the snapshot: snapshots are taken
    /// before gene subsetting, so the current gene axis is always covered.
    pub fn restricted_to(&self, var_names: &[String]) -> Array2<f64> {
        let pos: HashMap<&str, usize> = self
            .var_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let idx: Vec<usize> = var_names
            .iter()
            .map(|n| {
                *pos.get(n.as_str())
                    .unwrap_or_else(|| panic!("gene {} absent from the raw snapshot", n))
            })
            .collect();
        self.x.select(Axis(1), &idx)
    }

    fn select_rows(&self, idx: &[usize]) -> RawSnapshot {
        RawSnapshot {
            x: self.x.select(Axis(0), idx),
            var_names: self.var_names.clone(),
        }
    }
}

/// Dense cells x genes expression values with aligned metadata frames.
#[derive(Clone, Debug)]
pub struct AnnMatrix {
    x: Array2<f64>,
    obs: MetaFrame,
    var: MetaFrame,
    raw: Option<RawSnapshot>,
    uns: BTreeMap<String, UnsValue>,
}

impl AnnMatrix {
    pub fn new(
        x: Array2<f64>,
        obs_names: Vec<String>,
        var_names: Vec<String>,
    ) -> Result<AnnMatrix, Error> {
        if obs_names.len() != x.nrows() {
            return Err(format_err!(
                "{} cell names for a matrix of {} rows",
                obs_names.len(),
                x.nrows()
            ));
        }
        if var_names.len() != x.ncols() {
            return Err(format_err!(
                "{} gene names for a matrix of {} columns",
                var_names.len(),
                x.ncols()
            ));
        }
        Ok(AnnMatrix {
            x,
            obs: MetaFrame::new(obs_names),
            var: MetaFrame::new(var_names),
            raw: None,
            uns: BTreeMap::new(),
        })
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_vars(&self) -> usize {
        self.x.ncols()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn values_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        self.x.view_mut()
    }

    pub fn obs_names(&self) -> &[String] {
        self.obs.index()
    }

    pub fn var_names(&self) -> &[String] {
        self.var.index()
    }

    pub fn obs(&self) -> &MetaFrame {
        &self.obs
    }

    pub fn obs_mut(&mut self) -> &mut MetaFrame {
        &mut self.obs
    }

    pub fn var(&self) -> &MetaFrame {
        &self.var
    }

    pub fn var_mut(&mut self) -> &mut MetaFrame {
        &mut self.var
    }

    /// Keep the cells where `mask` holds, subsetting the values, the cell
    /// frame, and the raw snapshot together.
    pub fn subset_obs(self, mask: &[bool]) -> AnnMatrix {
        assert_eq!(mask.len(), self.n_obs());
        let idx: Vec<usize> = mask.iter().positions(|&m| m).collect();
        AnnMatrix {
            x: self.x.select(Axis(0), &idx),
            obs: self.obs.select(mask),
            var: self.var,
            raw: self.raw.map(|r| r.select_rows(&idx)),
            uns: self.uns,
        }
    }

    /// Keep the genes where `mask` holds. The raw snapshot keeps its full
    /// gene axis.
    pub fn subset_vars(self, mask: &[bool]) -> AnnMatrix {
        assert_eq!(mask.len(), self.n_vars());
        let idx: Vec<usize> = mask.iter().positions(|&m| m).collect();
        AnnMatrix {
            x: self.x.select(Axis(1), &idx),
            obs: self.obs,
            var: self.var.select(mask),
            raw: self.raw,
            uns: self.uns,
        }
    }

    /// Snapshot the current values and gene axis.
    pub fn set_raw(&mut self) {
        self.raw = Some(RawSnapshot {
            x: self.x.clone(),
            var_names: self.var.index().to_vec(),
        });
    }

    pub fn raw(&self) -> Option<&RawSnapshot> {
        self.raw.as_ref()
    }

    /// Snapshot values reindexed to the current gene axis, if a snapshot
    /// was taken.
    pub fn raw_restricted_to_vars(&self) -> Option<Array2<f64>> {
        self.raw.as_ref().map(|r| r.restricted_to(self.var.index()))
    }

    /// Per-gene z-scores of the values as a new matrix: subtract the gene
    /// mean and divide by the gene standard deviation (one delta degree of
    /// freedom). Genes with zero spread are centered only.
    pub fn zscored(&self) -> Array2<f64> {
        let mut out = self.x.clone();
        zscore_columns(&mut out);
        out
    }

    /// Z-score the values in place.
    pub fn scale(&mut self) {
        zscore_columns(&mut self.x);
    }

    pub fn set_uns(&mut self, key: &str, value: UnsValue) {
        self.uns.insert(key.to_string(), value);
    }

    pub fn uns(&self, key: &str) -> Option<&UnsValue> {
        self.uns.get(key)
    }
}

fn zscore_columns(x: &mut Array2<f64>) {
    let n = x.nrows();
    if n == 0 {
        return;
    }
    let denom = (n - 1).max(1) as f64;
    for mut col in x.axis_iter_mut(Axis(1)) {
        let mean = col.sum() / n as f64;
        let var = col.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / denom;
        let std = var.sqrt();
        let std = if std == 0.0 { 1.0 } else { std };
        col.mapv_inplace(|v| (v - mean) / std);
    }
}
