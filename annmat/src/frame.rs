use crate::categorical::Categorical;
use ndarray::Array1;

/// A single typed metadata column.
#[derive(Clone, Debug)]
pub enum Column {
    Numeric(Array1<f64>),
    Bool(Vec<bool>),
    Text(Vec<String>),
    Categorical(Categorical),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Text(v) => v.len(),
            Column::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, mask: &[bool]) -> Column {
        fn pick<T: Clone>(v: &[T], mask: &[bool]) -> Vec<T> {
            v.iter()
                .zip(mask)
                .filter(|(_, &keep)| keep)
                .map(|(x, _)| x.clone())
                .collect()
        }
        match self {
            Column::Numeric(v) => Column::Numeric(
                v.iter()
                    .zip(mask)
                    .filter(|(_, &keep)| keep)
                    .map(|(&x, _)| x)
                    .collect(),
            ),
            Column::Bool(v) => Column::Bool(pick(v, mask)),
            Column::Text(v) => Column::Text(pick(v, mask)),
            Column::Categorical(v) => Column::Categorical(v.select(mask)),
        }
    }
}

/// Named typed columns over a shared string index, kept in insertion order.
#[derive(Clone, Debug, Default)]
pub struct MetaFrame {
    index: Vec<String>,
    columns: Vec<(String, Column)>,
}

impl MetaFrame {
    pub fn new(index: Vec<String>) -> MetaFrame {
        MetaFrame {
            index,
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    /// Insert a column, replacing any existing column of the same name in
    /// place. Panics if the length does not match the index.
    pub fn insert(&mut self, name: &str, column: Column) {
        assert_eq!(
            column.len(),
            self.index.len(),
            "column {} has {} entries for an index of {}",
            name,
            column.len(),
            self.index.len(),
        );
        if let Some(slot) = self.columns.iter_mut().find(|(n, _)| n == name) {
            slot.1 = column;
        } else {
            self.columns.push((name.to_string(), column));
        }
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn numeric(&self, name: &str) -> Option<&Array1<f64>> {
        match self.column(name) {
            Some(Column::Numeric(v)) => Some(v),
            _ => None,
        }
    }

    pub fn bools(&self, name: &str) -> Option<&[bool]> {
        match self.column(name) {
            Some(Column::Bool(v)) => Some(v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&[String]> {
        match self.column(name) {
            Some(Column::Text(v)) => Some(v),
            _ => None,
        }
    }

    pub fn categorical(&self, name: &str) -> Option<&Categorical> {
        match self.column(name) {
            Some(Column::Categorical(v)) => Some(v),
            _ => None,
        }
    }

    /// Subset rows where `mask` holds, carrying every column along.
    pub fn select(&self, mask: &[bool]) -> MetaFrame {
        assert_eq!(mask.len(), self.index.len());
        let index = self
            .index
            .iter()
            .zip(mask)
            .filter(|(_, &keep)| keep)
            .map(|(s, _)| s.clone())
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|(n, c)| (n.clone(), c.select(mask)))
            .collect();
        MetaFrame { index, columns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn frame() -> MetaFrame {
        let mut f = MetaFrame::new(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        f.insert("total", Column::Numeric(array![1.0, 2.0, 3.0]));
        f.insert("flag", Column::Bool(vec![true, false, true]));
        f
    }

    #[test]
    fn test_insert_and_lookup() {
        let f = frame();
        assert_eq!(f.len(), 3);
        assert!(f.contains_column("total"));
        assert!(!f.contains_column("missing"));
        assert_eq!(f.numeric("total").unwrap()[2], 3.0);
        assert_eq!(f.bools("flag").unwrap(), &[true, false, true]);
        assert!(f.numeric("flag").is_none());
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut f = frame();
        f.insert("total", Column::Numeric(array![9.0, 9.0, 9.0]));
        assert_eq!(f.column_names().collect::<Vec<_>>(), vec!["total", "flag"]);
        assert_eq!(f.numeric("total").unwrap()[0], 9.0);
    }

    #[test]
    #[should_panic]
    fn test_insert_rejects_length_mismatch() {
        let mut f = frame();
        f.insert("short", Column::Bool(vec![true]));
    }

    #[test]
    fn test_select_subsets_all_columns() {
        let f = frame().select(&[true, false, true]);
        assert_eq!(f.index(), ["a", "c"].map(String::from).as_slice());
        assert_eq!(f.numeric("total").unwrap().len(), 2);
        assert_eq!(f.numeric("total").unwrap()[1], 3.0);
        assert_eq!(f.bools("flag").unwrap(), &[true, true]);
    }
}
