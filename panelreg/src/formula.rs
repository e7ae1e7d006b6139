use crate::PanelError;
use nalgebra::{DMatrix, DVector};
use polars::prelude::*;

/// Name of the implicit constant column.
pub const INTERCEPT: &str = "Intercept";

/// A single right-hand-side term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// A numeric column entered as is.
    Numeric(String),
    /// A column expanded into treatment-coded dummies, written `C(column)`.
    Categorical(String),
}

impl Term {
    fn column(&self) -> &str {
        match self {
            Term::Numeric(c) | Term::Categorical(c) => c,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Formula {
    pub text: String,
    pub response: String,
    pub terms: Vec<Term>,
    pub intercept: bool,
}

/// The response vector and design matrix produced by evaluating a formula.
#[derive(Debug, Clone)]
pub struct DesignMatrices {
    pub response: String,
    pub y: DVector<f64>,
    pub x: DMatrix<f64>,
    /// Design column names, in column order.
    pub columns: Vec<String>,
    /// Indices of the table rows that were kept (rows with nulls are dropped).
    pub rows: Vec<usize>,
}

impl Formula {
    /// Parses an R-style formula string (e.g., "inv ~ value + capital + C(sector) - 1").
    ///
    /// An intercept is included unless the formula contains `- 1`, `+ 0` or `0 +`.
    pub fn parse(formula_str: &str) -> Result<Formula, PanelError> {
        let parts: Vec<&str> = formula_str.split('~').collect();
        if parts.len() != 2 {
            return Err(PanelError::formula(
                formula_str,
                "expected exactly one '~' separating response and predictors",
            ));
        }

        let response = parts[0].trim().to_string();
        if response.is_empty() {
            return Err(PanelError::formula(formula_str, "response variable is missing"));
        }
        if !is_column_name(&response) {
            return Err(PanelError::formula(
                formula_str,
                format!("unsupported response expression '{}'", response),
            ));
        }

        let mut terms: Vec<Term> = Vec::new();
        let mut intercept = true;

        for (negated, raw) in signed_terms(parts[1]) {
            let term = raw.trim();
            if term.is_empty() {
                return Err(PanelError::formula(formula_str, "empty term"));
            }

            match (negated, term) {
                (false, "1") => intercept = true,
                (false, "0") | (true, "1") => intercept = false,
                (true, "0") => intercept = true,
                _ => {
                    let parsed = parse_term(formula_str, term)?;
                    if negated {
                        terms.retain(|t| t != &parsed);
                    } else if !terms.contains(&parsed) {
                        terms.push(parsed);
                    }
                }
            }
        }

        if terms.is_empty() && !intercept {
            return Err(PanelError::formula(formula_str, "model has no terms"));
        }

        Ok(Formula {
            text: formula_str.trim().to_string(),
            response,
            terms,
            intercept,
        })
    }

    /// Builds the formula equivalent of an explicit dependent/independent column list.
    pub fn from_columns(dependent: &str, independent: &[String]) -> Result<Formula, PanelError> {
        let text = if independent.is_empty() {
            format!("{} ~ 1", dependent)
        } else {
            format!("{} ~ {}", dependent, independent.join(" + "))
        };
        Formula::parse(&text)
    }

    /// Every column this formula reads, response first.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = vec![self.response.as_str()];
        cols.extend(self.terms.iter().map(Term::column));
        cols
    }

    /// Evaluates the formula against a table.
    ///
    /// Rows with a null in any referenced column are dropped. The intercept,
    /// if any, is the first design column; the remaining columns follow the
    /// order of the terms, with categorical terms expanded in place.
    pub fn evaluate(&self, df: &DataFrame) -> Result<DesignMatrices, PanelError> {
        let mut used = Vec::new();
        for name in self.columns() {
            let column = df.column(name).map_err(|_| {
                PanelError::formula(&self.text, format!("unknown column '{}'", name))
            })?;
            used.push(column);
        }

        let rows: Vec<usize> = (0..df.height())
            .filter(|&r| used.iter().all(|c| !c.get(r).map(|v| v.is_null()).unwrap_or(true)))
            .collect();
        if rows.len() < df.height() {
            tracing::warn!(
                dropped = df.height() - rows.len(),
                "dropped rows with missing values"
            );
        }

        let y_all = self.numeric(df, &self.response)?;
        let y = DVector::from_iterator(rows.len(), rows.iter().map(|&r| y_all[r]));

        let mut columns: Vec<String> = Vec::new();
        let mut values: Vec<Vec<f64>> = Vec::new();

        if self.intercept {
            columns.push(INTERCEPT.to_string());
            values.push(vec![1.0; rows.len()]);
        }

        for term in &self.terms {
            match term {
                Term::Numeric(name) => {
                    let all = self.numeric(df, name)?;
                    columns.push(name.clone());
                    values.push(rows.iter().map(|&r| all[r]).collect());
                }
                Term::Categorical(name) => {
                    let labels = self.labels(df, name, &rows)?;
                    let mut levels = labels.clone();
                    levels.sort();
                    levels.dedup();
                    // Treatment coding: the first level is the reference.
                    for level in levels.iter().skip(1) {
                        columns.push(format!("C({})[T.{}]", name, level));
                        values.push(
                            labels
                                .iter()
                                .map(|l| if l == level { 1.0 } else { 0.0 })
                                .collect(),
                        );
                    }
                }
            }
        }

        let x = DMatrix::from_fn(rows.len(), columns.len(), |r, c| values[c][r]);

        Ok(DesignMatrices {
            response: self.response.clone(),
            y,
            x,
            columns,
            rows,
        })
    }

    fn numeric(&self, df: &DataFrame, name: &str) -> Result<Vec<f64>, PanelError> {
        let column = df.column(name)?;
        let dtype = column.dtype();
        if !(dtype.is_primitive_numeric() || dtype.is_bool()) {
            return Err(PanelError::formula(
                &self.text,
                format!("column '{}' is not numeric ({}); wrap it in C()", name, dtype),
            ));
        }
        let as_f64 = column.cast(&DataType::Float64)?;
        Ok(as_f64
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    }

    fn labels(&self, df: &DataFrame, name: &str, rows: &[usize]) -> Result<Vec<String>, PanelError> {
        let as_str = df.column(name)?.cast(&DataType::String)?;
        let ca = as_str.str()?;
        Ok(rows
            .iter()
            .map(|&r| ca.get(r).unwrap_or_default().to_string())
            .collect())
    }
}

/// Splits the right-hand side on `+` and `-`, tracking which terms were subtracted.
/// Operators inside parentheses are left alone.
fn signed_terms(rhs: &str) -> Vec<(bool, String)> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut negated = false;
    let mut depth = 0usize;

    for ch in rhs.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '+' | '-' if depth == 0 => {
                // A sign before the first term is not a separator.
                let leading = terms.is_empty() && current.trim().is_empty();
                if !leading {
                    terms.push((negated, std::mem::take(&mut current)));
                }
                negated = ch == '-';
            }
            _ => current.push(ch),
        }
    }
    terms.push((negated, current));
    terms
}

fn parse_term(formula_str: &str, term: &str) -> Result<Term, PanelError> {
    if let Some(inner) = term.strip_prefix("C(").and_then(|t| t.strip_suffix(')')) {
        let inner = inner.trim();
        if is_column_name(inner) {
            return Ok(Term::Categorical(inner.to_string()));
        }
    } else if is_column_name(term) {
        return Ok(Term::Numeric(term.to_string()));
    }
    Err(PanelError::formula(
        formula_str,
        format!("unsupported term '{}'", term),
    ))
}

fn is_column_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && !s.chars().all(|c| c.is_ascii_digit())
}
