use anyhow::{ensure, Result};
use chrono::NaiveDate;

/// Date-indexed table of named numeric columns.
///
/// Undefined values are stored as `NaN` until [`FeatureFrame::drop_incomplete_rows`]
/// removes every row that still carries one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFrame {
    dates: Vec<NaiveDate>,
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl FeatureFrame {
    pub fn new(dates: Vec<NaiveDate>) -> Self {
        Self {
            dates,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.position(name).map(|idx| self.columns[idx].as_slice())
    }

    /// Value of `name` on the most recent row.
    pub fn last_value(&self, name: &str) -> Option<f64> {
        self.column(name).and_then(|values| values.last().copied())
    }

    /// Adds or replaces a column; its length must match the date index.
    pub fn set_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        ensure!(
            values.len() == self.dates.len(),
            "column {} has {} values but the frame has {} rows",
            name,
            values.len(),
            self.dates.len()
        );
        match self.position(name) {
            Some(idx) => self.columns[idx] = values,
            None => {
                self.names.push(name.to_string());
                self.columns.push(values);
            }
        }
        Ok(())
    }

    /// Removes every row holding a non-finite value in any column.
    pub fn drop_incomplete_rows(&mut self) {
        let keep: Vec<bool> = (0..self.dates.len())
            .map(|row| self.columns.iter().all(|column| column[row].is_finite()))
            .collect();
        if keep.iter().all(|k| *k) {
            return;
        }

        self.dates = retain_by_mask(&self.dates, &keep);
        for column in self.columns.iter_mut() {
            *column = retain_by_mask(column, &keep);
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|existing| existing == name)
    }
}

fn retain_by_mask<T: Copy>(values: &[T], keep: &[bool]) -> Vec<T> {
    values
        .iter()
        .zip(keep)
        .filter_map(|(value, keep)| keep.then_some(*value))
        .collect()
}
