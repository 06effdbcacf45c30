use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use ndarray::{Array2, ArrayView1, Axis};

use crate::error::{BmaError, CoxError, Result};

/// numeric table w/ named columns - durations, event flags and covariates
#[derive(Debug, Clone)]
pub struct Dataset {
    column_names: Vec<String>,
    values: Array2<f64>, // n_rows x n_columns
}

impl Dataset {
    /// make a dataset from column names and a row-major value matrix
    pub fn new(column_names: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if column_names.len() != values.ncols() {
            return Err(BmaError::validation(format!(
                "{} column names for {} columns",
                column_names.len(),
                values.ncols()
            )));
        }

        let mut seen = HashSet::new();
        for name in &column_names {
            if !seen.insert(name.as_str()) {
                return Err(BmaError::validation(format!("duplicate column '{}'", name)));
            }
        }

        if let Some(((_, col), _)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(BmaError::validation(format!(
                "column '{}' holds a non-finite value",
                column_names[col]
            )));
        }

        Ok(Self { column_names, values })
    }

    /// make a dataset from (name, values) column pairs
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let (names, columns): (Vec<String>, Vec<Vec<f64>>) =
            columns.into_iter().map(|(name, col)| (name.into(), col)).unzip();

        let n_rows = columns.first().map_or(0, Vec::len);
        if let Some((name, col)) = names.iter().zip(&columns).find(|(_, c)| c.len() != n_rows) {
            return Err(BmaError::validation(format!(
                "column '{}' has {} rows, expected {}",
                name,
                col.len(),
                n_rows
            )));
        }

        let mut values = Array2::zeros((n_rows, columns.len()));
        for (j, col) in columns.iter().enumerate() {
            for (i, &v) in col.iter().enumerate() {
                values[[i, j]] = v;
            }
        }

        Self::new(names, values)
    }

    /// read a headed csv where every field parses as a number
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let column_names: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut flat = Vec::new();
        let mut n_rows = 0;
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            for (field, name) in record.iter().zip(&column_names) {
                let value = field.trim().parse::<f64>().map_err(|_| {
                    BmaError::validation(format!(
                        "row {} column '{}': '{}' is not a number",
                        row + 1,
                        name,
                        field
                    ))
                })?;
                flat.push(value);
            }
            n_rows += 1;
        }

        let values = Array2::from_shape_vec((n_rows, column_names.len()), flat)
            .map_err(|e| BmaError::validation(format!("ragged csv: {}", e)))?;
        Self::new(column_names, values)
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(std::io::BufReader::new(file))
    }

    /// how many records
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|n| n == name)
    }

    /// read-only view of one column
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|j| self.values.column(j))
    }

    /// every column that isn't the duration or event column, in table order
    pub fn covariate_names(&self, duration_col: &str, event_col: &str) -> Vec<String> {
        self.column_names
            .iter()
            .filter(|n| n.as_str() != duration_col && n.as_str() != event_col)
            .cloned()
            .collect()
    }

    /// borrow the columns needed to fit one model
    pub fn survival_view<'a>(
        &'a self,
        duration_col: &str,
        event_col: &str,
        covariates: &[String],
    ) -> std::result::Result<SurvivalView<'a>, CoxError> {
        let lookup = |name: &str| {
            self.column_index(name)
                .ok_or_else(|| CoxError::invalid_dimensions(format!("no column named '{}'", name)))
        };

        let duration = lookup(duration_col)?;
        let event = lookup(event_col)?;
        let covariate_indices = covariates
            .iter()
            .map(|name| {
                if name == duration_col || name == event_col {
                    Err(CoxError::invalid_dimensions(format!(
                        "'{}' is reserved and can't be a covariate",
                        name
                    )))
                } else {
                    lookup(name)
                }
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let view = SurvivalView { dataset: self, duration, event, covariate_indices };
        view.validate()?;
        Ok(view)
    }
}

/// borrowed (duration, event, covariates) selection of a dataset
#[derive(Debug, Clone)]
pub struct SurvivalView<'a> {
    dataset: &'a Dataset,
    duration: usize,
    event: usize,
    covariate_indices: Vec<usize>,
}

impl<'a> SurvivalView<'a> {
    fn validate(&self) -> std::result::Result<(), CoxError> {
        if self.times().iter().any(|&t| t < 0.0) {
            return Err(CoxError::invalid_survival_data("survival times must be non-negative"));
        }
        let events = self.dataset.values.column(self.event);
        if events.iter().any(|&e| e != 0.0 && e != 1.0) {
            return Err(CoxError::invalid_survival_data("event indicators must be 0 or 1"));
        }
        Ok(())
    }

    /// how many subjects
    pub fn n_samples(&self) -> usize {
        self.dataset.n_rows()
    }

    /// how many covariates in this selection
    pub fn n_features(&self) -> usize {
        self.covariate_indices.len()
    }

    /// survival/censoring times
    pub fn times(&self) -> ArrayView1<'a, f64> {
        self.dataset.values.column(self.duration)
    }

    /// event indicators (true = event, false = censored)
    pub fn events(&self) -> Vec<bool> {
        self.dataset
            .values
            .column(self.event)
            .iter()
            .map(|&e| e == 1.0)
            .collect()
    }

    pub fn n_events(&self) -> usize {
        self.dataset.values.column(self.event).iter().filter(|&&e| e == 1.0).count()
    }

    pub fn covariate_names(&self) -> Vec<String> {
        self.covariate_indices
            .iter()
            .map(|&j| self.dataset.column_names[j].clone())
            .collect()
    }

    /// covariate matrix for this selection (n_samples x n_features)
    pub fn covariate_matrix(&self) -> Array2<f64> {
        self.dataset.values.select(Axis(1), &self.covariate_indices)
    }
}
