//! # Feature Tables
//!
//! Dense numeric tables with named columns and optional party/country row
//! identifiers. The identifiers ride alongside the numeric data but never
//! enter the numeric pipeline itself.

use ndarray::{Array2, ArrayView2};

use crate::error::{Error, Result};

/// Composite row identifier carried alongside the numeric columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartyKey {
    pub party: String,
    pub country: String,
}

impl PartyKey {
    pub fn new(party: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            party: party.into(),
            country: country.into(),
        }
    }
}

/// An ordered collection of named numeric columns.
///
/// Every cell must be a finite real number; the upstream preprocessing
/// collaborator is responsible for imputation and scaling, and the
/// constructor rejects tables that violate the invariant.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    columns: Vec<String>,
    keys: Option<Vec<PartyKey>>,
    values: Array2<f64>,
}

impl FeatureTable {
    /// Builds a table from column names and a values matrix.
    ///
    /// Fails with `DimensionMismatch` when the column count disagrees with
    /// the matrix width, and with `DegenerateInput` when any cell is NaN or
    /// infinite.
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(Error::DimensionMismatch {
                expected: columns.len(),
                actual: values.ncols(),
            });
        }
        if let Some((row, col)) = first_non_finite(&values) {
            return Err(Error::DegenerateInput(format!(
                "non-finite value at row {}, column {}",
                row, col
            )));
        }
        Ok(Self {
            columns,
            keys: None,
            values,
        })
    }

    /// Attaches one `PartyKey` per row.
    pub fn with_keys(mut self, keys: Vec<PartyKey>) -> Result<Self> {
        if keys.len() != self.values.nrows() {
            return Err(Error::DimensionMismatch {
                expected: self.values.nrows(),
                actual: keys.len(),
            });
        }
        self.keys = Some(keys);
        Ok(self)
    }

    /// Wraps a low-dimensional matrix with positional component labels,
    /// "Component 1" through "Component k".
    pub fn components(values: Array2<f64>) -> Self {
        let columns = (1..=values.ncols())
            .map(|i| format!("Component {}", i))
            .collect();
        Self {
            columns,
            keys: None,
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn keys(&self) -> Option<&[PartyKey]> {
        self.keys.as_deref()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }
}

fn first_non_finite(values: &Array2<f64>) -> Option<(usize, usize)> {
    values
        .indexed_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|((row, col), _)| (row, col))
}
