use anyhow::{format_err, Error};
use ndarray::{Array1, ArrayView1};
use std::collections::BTreeSet;

/// A label vector encoded against an explicit, ordered category list.
///
/// The category order is part of the value: aggregations emit one entry per
/// category in this order, whether or not every category is observed.
#[derive(Clone, Debug, PartialEq)]
pub struct Categorical {
    codes: Vec<u32>,
    categories: Vec<String>,
}

impl Categorical {
    /// Encode `labels` against their lexicographically sorted distinct
    /// values.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Categorical {
        let categories: Vec<String> = labels
            .iter()
            .map(|s| s.as_ref().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        // every label is a category by construction
        Categorical::with_categories(labels, categories).unwrap()
    }

    /// Encode `labels` against an explicit category order.
    pub fn with_categories<S: AsRef<str>>(
        labels: &[S],
        categories: Vec<String>,
    ) -> Result<Categorical, Error> {
        let codes = labels
            .iter()
            .map(|label| {
                let label = label.as_ref();
                categories
                    .iter()
                    .position(|c| c == label)
                    .map(|p| p as u32)
                    .ok_or_else(|| format_err!("label {} not among the categories", label))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Categorical { codes, categories })
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> &[u32] {
        &self.codes
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Label at position `i`.
    pub fn value(&self, i: usize) -> &str {
        &self.categories[self.codes[i] as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.codes
            .iter()
            .map(move |&c| self.categories[c as usize].as_str())
    }

    /// Sorted distinct labels that actually occur, independent of the
    /// category order.
    pub fn observed(&self) -> Vec<String> {
        let seen: BTreeSet<&str> = self.iter().collect();
        seen.into_iter().map(String::from).collect()
    }

    pub fn mask_eq(&self, label: &str) -> Vec<bool> {
        self.iter().map(|v| v == label).collect()
    }

    /// Subset positions where `mask` holds; the category list is preserved
    /// even when a category loses all of its members.
    pub fn select(&self, mask: &[bool]) -> Categorical {
        assert_eq!(mask.len(), self.codes.len());
        let codes = self
            .codes
            .iter()
            .zip(mask)
            .filter(|(_, &keep)| keep)
            .map(|(&c, _)| c)
            .collect();
        Categorical {
            codes,
            categories: self.categories.clone(),
        }
    }

    /// Mean of `values` per category, in category order. Categories with no
    /// members yield NaN; NaN values propagate into their category's mean.
    pub fn group_means(&self, values: ArrayView1<f64>) -> Array1<f64> {
        assert_eq!(values.len(), self.codes.len());
        let mut sums = vec![0.0; self.categories.len()];
        let mut counts = vec![0usize; self.categories.len()];
        for (&code, &v) in self.codes.iter().zip(values.iter()) {
            sums[code as usize] += v;
            counts[code as usize] += 1;
        }
        sums.iter()
            .zip(&counts)
            .map(|(&s, &n)| if n == 0 { f64::NAN } else { s / n as f64 })
            .collect()
    }
}
