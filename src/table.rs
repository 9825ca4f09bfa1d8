//! Labelled, dense tables of `f64` values.
//!
//! Every intermediate product in the pipeline (per-station series, gathers,
//! spectra and analyses) is one of these. Rows are addressed by an index
//! (epochs, frequencies or row labels) and columns by hierarchical labels, one
//! string per level, outermost level first.

use std::{collections::HashMap, hash::Hash};

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

/// A hierarchical label. The first element is the outermost level.
pub type Label = Vec1<String>;

/// Rows indexed by epoch (seconds since J2000).
pub type TimeTable = Table<i64>;

/// Rows indexed by frequency \[cycles per day\].
pub type SpectralTable = Table<f64>;

/// Rows indexed by labels, e.g. station / component / tidal wave.
pub type AnalysisTable = Table<Label>;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("{rows} index entries and {cols} column labels don't fit data of shape {shape:?}")]
    Shape {
        rows: usize,
        cols: usize,
        shape: (usize, usize),
    },

    #[error("Cannot combine tables with differing row indices")]
    IndexMismatch,

    #[error("Cannot stack tables with differing column labels")]
    ColumnMismatch,

    #[error("No tables were supplied to concatenate")]
    Empty,
}

/// Make a single-level label.
pub fn label<S: Into<String>>(s: S) -> Label {
    Vec1::new(s.into())
}

/// Make a label from several levels. Returns `None` if `levels` is empty.
pub fn label_from<S: AsRef<str>>(levels: &[S]) -> Option<Label> {
    let (first, rest) = levels.split_first()?;
    let mut l = Vec1::new(first.as_ref().to_string());
    for level in rest {
        l.push(level.as_ref().to_string());
    }
    Some(l)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table<I> {
    index: Vec<I>,
    columns: Vec<Label>,
    /// [row][column]
    data: Array2<f64>,
}

impl<I: Clone> Table<I> {
    pub fn new(index: Vec<I>, columns: Vec<Label>, data: Array2<f64>) -> Result<Self, TableError> {
        if data.dim() != (index.len(), columns.len()) {
            return Err(TableError::Shape {
                rows: index.len(),
                cols: columns.len(),
                shape: data.dim(),
            });
        }
        Ok(Table {
            index,
            columns,
            data,
        })
    }

    /// A table with the given columns and no rows.
    pub fn empty(columns: Vec<Label>) -> Self {
        let data = Array2::zeros((0, columns.len()));
        Table {
            index: vec![],
            columns,
            data,
        }
    }

    /// Build a table from `(label, values)` pairs sharing `index`.
    pub fn from_columns(index: Vec<I>, columns: Vec<(Label, Vec<f64>)>) -> Result<Self, TableError> {
        let mut data = Array2::zeros((index.len(), columns.len()));
        let mut labels = Vec::with_capacity(columns.len());
        for (i_col, (label, values)) in columns.into_iter().enumerate() {
            if values.len() != index.len() {
                return Err(TableError::Shape {
                    rows: index.len(),
                    cols: labels.len() + 1,
                    shape: (values.len(), 1),
                });
            }
            data.column_mut(i_col)
                .iter_mut()
                .zip(values)
                .for_each(|(d, v)| *d = v);
            labels.push(label);
        }
        Ok(Table {
            index,
            columns: labels,
            data,
        })
    }

    pub fn index(&self) -> &[I] {
        &self.index
    }

    pub fn columns(&self) -> &[Label] {
        &self.columns
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn num_rows(&self) -> usize {
        self.index.len()
    }

    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The values of the column with exactly this label.
    pub fn column(&self, label: &Label) -> Option<ArrayView1<'_, f64>> {
        self.columns
            .iter()
            .position(|l| l == label)
            .map(|i| self.data.column(i))
    }

    /// Copy out the rows at `positions`, in that order.
    pub fn select_rows(&self, positions: &[usize]) -> Self {
        Table {
            index: positions.iter().map(|&p| self.index[p].clone()).collect(),
            columns: self.columns.clone(),
            data: self.data.select(Axis(0), positions),
        }
    }

    /// Keep the columns for which `keep` is true.
    pub fn filter_columns<F: Fn(&Label) -> bool>(&self, keep: F) -> Self {
        let positions: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, l)| keep(l))
            .map(|(i, _)| i)
            .collect();
        Table {
            index: self.index.clone(),
            columns: positions.iter().map(|&i| self.columns[i].clone()).collect(),
            data: self.data.select(Axis(1), &positions),
        }
    }

    /// Put `level` above every column label.
    pub fn with_prefix(mut self, level: &str) -> Self {
        self.columns = self
            .columns
            .into_iter()
            .map(|l| {
                let mut prefixed = Vec1::new(level.to_string());
                for part in l {
                    prefixed.push(part);
                }
                prefixed
            })
            .collect();
        self
    }

    /// Cross-section: columns whose label has `key` at `level`, with that level
    /// removed. Columns that would be left without any label are dropped.
    pub fn select_level(&self, level: usize, key: &str) -> Self {
        let mut positions = vec![];
        let mut columns = vec![];
        for (i, l) in self.columns.iter().enumerate() {
            if l.get(level).map(String::as_str) != Some(key) {
                continue;
            }
            let rest: Vec<String> = l
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != level)
                .map(|(_, s)| s.clone())
                .collect();
            if let Some(rest) = label_from(rest.as_slice()) {
                positions.push(i);
                columns.push(rest);
            }
        }
        Table {
            index: self.index.clone(),
            columns,
            data: self.data.select(Axis(1), &positions),
        }
    }

    /// Shorthand for [`Table::select_level`] on the outermost level.
    pub fn xs(&self, key: &str) -> Self {
        self.select_level(0, key)
    }

    pub fn scale(mut self, factor: f64) -> Self {
        self.data.mapv_inplace(|v| v * factor);
        self
    }

    pub fn fill_nan(mut self, value: f64) -> Self {
        self.data.mapv_inplace(|v| if v.is_nan() { value } else { v });
        self
    }

    /// Stack tables side by side. All tables must share the same index.
    pub fn concat_columns(tables: Vec<Table<I>>) -> Result<Self, TableError>
    where
        I: PartialEq,
    {
        let first = tables.first().ok_or(TableError::Empty)?;
        if tables.iter().any(|t| t.index != first.index) {
            return Err(TableError::IndexMismatch);
        }
        let index = first.index.clone();
        let views: Vec<_> = tables.iter().map(|t| t.data.view()).collect();
        let data = ndarray::concatenate(Axis(1), &views).map_err(|_| TableError::IndexMismatch)?;
        let columns = tables.into_iter().flat_map(|t| t.columns).collect();
        Ok(Table {
            index,
            columns,
            data,
        })
    }

    /// Stack tables on top of each other. All tables must share the same
    /// columns.
    pub fn concat_rows(tables: Vec<Table<I>>) -> Result<Self, TableError> {
        let first = tables.first().ok_or(TableError::Empty)?;
        if tables.iter().any(|t| t.columns != first.columns) {
            return Err(TableError::ColumnMismatch);
        }
        let columns = first.columns.clone();
        let views: Vec<_> = tables.iter().map(|t| t.data.view()).collect();
        let data = ndarray::concatenate(Axis(0), &views).map_err(|_| TableError::ColumnMismatch)?;
        let index = tables.into_iter().flat_map(|t| t.index).collect();
        Ok(Table {
            index,
            columns,
            data,
        })
    }

    /// Add the columns of `other` to the columns of `self` that carry the same
    /// label. Columns without a counterpart are left alone.
    pub fn add_matching(&mut self, other: &Table<I>) -> Result<(), TableError>
    where
        I: PartialEq,
    {
        if self.index != other.index {
            return Err(TableError::IndexMismatch);
        }
        for (i_col, l) in self.columns.iter().enumerate() {
            if let Some(values) = other.column(l) {
                let mut col = self.data.column_mut(i_col);
                col += &values;
            }
        }
        Ok(())
    }
}

impl<I: Clone + Eq + Hash> Table<I> {
    /// Map from index value to its first row position.
    pub fn positions(&self) -> HashMap<I, usize> {
        let mut map = HashMap::with_capacity(self.index.len());
        for (i, v) in self.index.iter().enumerate() {
            map.entry(v.clone()).or_insert(i);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_col(index: Vec<i64>) -> TimeTable {
        let n = index.len();
        Table::from_columns(
            index,
            vec![
                (label("east"), (0..n).map(|i| i as f64).collect()),
                (label("up"), (0..n).map(|i| 10.0 * i as f64).collect()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_bad_shape() {
        let result = TimeTable::new(vec![1, 2], vec![label("a")], Array2::zeros((3, 1)));
        assert!(matches!(result, Err(TableError::Shape { .. })));
    }

    #[test]
    fn select_rows_copies_in_order() {
        let t = two_col(vec![10, 20, 30]);
        let s = t.select_rows(&[2, 0]);
        assert_eq!(s.index(), &[30, 10]);
        assert_eq!(s.data()[[0, 1]], 20.0);
        assert_eq!(s.data()[[1, 1]], 0.0);
    }

    #[test]
    fn prefix_then_cross_section() {
        let t = two_col(vec![1, 2]).with_prefix("GPS");
        assert_eq!(t.columns()[0].as_slice(), &["GPS".to_string(), "east".to_string()]);
        let both = TimeTable::concat_columns(vec![t, two_col(vec![1, 2]).with_prefix("GLONASS")]).unwrap();
        assert_eq!(both.num_cols(), 4);

        let glo = both.xs("GLONASS");
        assert_eq!(glo.num_cols(), 2);
        assert_eq!(glo.columns()[1], label("up"));
        assert_eq!(glo.column(&label("up")).unwrap().to_vec(), vec![0.0, 10.0]);
    }

    #[test]
    fn select_inner_level() {
        let t = TimeTable::from_columns(
            vec![0],
            vec![
                (label_from(&["up", "value"]).unwrap(), vec![1.0]),
                (label_from(&["up", "sigma"]).unwrap(), vec![0.1]),
            ],
        )
        .unwrap();
        let values = t.select_level(1, "value");
        assert_eq!(values.columns(), &[label("up")]);
        assert_eq!(values.data()[[0, 0]], 1.0);
    }

    #[test]
    fn concat_columns_needs_same_index() {
        let result = TimeTable::concat_columns(vec![two_col(vec![1, 2]), two_col(vec![1, 3])]);
        assert!(matches!(result, Err(TableError::IndexMismatch)));
    }

    #[test]
    fn concat_rows_keeps_order() {
        let t = TimeTable::concat_rows(vec![two_col(vec![5, 6]), two_col(vec![1])]).unwrap();
        assert_eq!(t.index(), &[5, 6, 1]);
        assert_eq!(t.num_cols(), 2);
    }

    #[test]
    fn fill_scale_and_add() {
        let mut t = TimeTable::from_columns(vec![0, 1], vec![(label("up"), vec![f64::NAN, 2.0])])
            .unwrap()
            .fill_nan(0.0)
            .scale(1000.0);
        assert_eq!(t.column(&label("up")).unwrap().to_vec(), vec![0.0, 2000.0]);

        let other = TimeTable::from_columns(
            vec![0, 1],
            vec![(label("up"), vec![1.0, 1.0]), (label("east"), vec![5.0, 5.0])],
        )
        .unwrap();
        t.add_matching(&other).unwrap();
        assert_eq!(t.column(&label("up")).unwrap().to_vec(), vec![1.0, 2001.0]);
        assert_eq!(t.num_cols(), 1);
    }
}
