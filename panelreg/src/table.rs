//! Side-by-side presentation of several fits.

use crate::regression::FittedRegression;
use comfy_table::{Cell, CellAlignment, Table};
use std::fmt;

/// Significance stars for a p-value: `*` below 0.05, `**` below 0.01, `***` below 0.001.
pub fn stars(p_value: f64) -> &'static str {
    if p_value < 0.001 {
        "***"
    } else if p_value < 0.01 {
        "**"
    } else if p_value < 0.05 {
        "*"
    } else {
        ""
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Blank,
    Estimate { value: f64, stars: &'static str },
    StdErr(f64),
    Text(String),
}

impl Entry {
    fn plain(&self) -> String {
        match self {
            Entry::Blank => String::new(),
            Entry::Estimate { value, stars } => format!("{:.4}{}", value, stars),
            Entry::StdErr(se) => format!("({:.4})", se),
            Entry::Text(text) => text.clone(),
        }
    }

    fn markdown(&self) -> String {
        match self {
            Entry::Estimate { value, stars } => {
                format!("{:.4}{}", value, stars.replace('*', "\\*"))
            }
            other => other.plain(),
        }
    }

    fn latex(&self) -> String {
        match self {
            Entry::Estimate { value, stars } if !stars.is_empty() => {
                format!("{:.4}$^{{{}}}$", value, stars)
            }
            other => escape_latex(&other.plain()),
        }
    }
}

struct Row {
    label: String,
    entries: Vec<Entry>,
}

/// A comparison table over an ordered list of fits.
///
/// Each selected coefficient takes two rows: the estimate with significance
/// stars, then the standard error in parentheses. A coefficient missing from a
/// model is left blank. The footer reports the number of observations and R².
#[derive(Debug, Clone)]
pub struct RegressionResultTable {
    fits: Vec<FittedRegression>,
    model_names: Vec<String>,
    /// `(coefficient, display name)` pairs, in display order.
    selection: Option<Vec<(String, String)>>,
}

impl RegressionResultTable {
    pub fn new(fits: Vec<FittedRegression>) -> Self {
        Self {
            fits,
            model_names: Vec::new(),
            selection: None,
        }
    }

    /// Sets the column headers. Models without a name fall back to `(1)`, `(2)`, ...
    pub fn model_names(&mut self, names: &[&str]) -> &mut Self {
        self.model_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Restricts and orders the coefficients shown, renaming them for display.
    pub fn coefficients(&mut self, selection: &[(&str, &str)]) -> &mut Self {
        self.selection = Some(
            selection
                .iter()
                .map(|(name, display)| (name.to_string(), display.to_string()))
                .collect(),
        );
        self
    }

    pub fn fits(&self) -> &[FittedRegression] {
        &self.fits
    }

    /// The header row: an empty corner cell followed by one name per model.
    pub fn header(&self) -> Vec<String> {
        std::iter::once(String::new())
            .chain((0..self.fits.len()).map(|i| {
                self.model_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("({})", i + 1))
            }))
            .collect()
    }

    /// The full grid as plain text cells, header row first.
    pub fn grid(&self) -> Vec<Vec<String>> {
        std::iter::once(self.header())
            .chain(self.rows().into_iter().map(|row| {
                std::iter::once(row.label)
                    .chain(row.entries.iter().map(Entry::plain))
                    .collect()
            }))
            .collect()
    }

    /// Renders the table as Markdown.
    pub fn to_markdown(&self) -> String {
        let header = self.header();
        let mut md = String::new();
        md.push_str(&format!("| {} |\n", header.join(" | ")));
        md.push_str(&format!("|{}\n", "---|".repeat(header.len())));
        for row in self.rows() {
            let cells: Vec<String> = std::iter::once(row.label)
                .chain(row.entries.iter().map(Entry::markdown))
                .collect();
            md.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
        md
    }

    /// Renders the table as a LaTeX table fragment.
    pub fn to_latex(&self) -> String {
        let header: Vec<String> = self.header().iter().map(|h| escape_latex(h)).collect();
        let mut latex = String::new();
        latex.push_str("\\begin{table}[ht]\n");
        latex.push_str("\\centering\n");
        latex.push_str(&format!("\\begin{{tabular}}{{l{}}}\n", "c".repeat(self.fits.len())));
        latex.push_str("\\hline\n");
        latex.push_str(&format!("{} \\\\\n", header.join(" & ")));
        latex.push_str("\\hline\n");
        for row in self.rows() {
            if row.label == "N" {
                latex.push_str("\\hline\n");
            }
            let cells: Vec<String> = std::iter::once(escape_latex(&row.label))
                .chain(row.entries.iter().map(Entry::latex))
                .collect();
            latex.push_str(&format!("{} \\\\\n", cells.join(" & ")));
        }
        latex.push_str("\\hline\n");
        latex.push_str("\\end{tabular}\n");
        latex.push_str("\\caption{Regression Results}\n");
        latex.push_str("\\label{tab:regression_results}\n");
        latex.push_str("\\end{table}\n");
        latex
    }

    /// Selected coefficients, defaulting to every coefficient in order of first appearance.
    fn selection(&self) -> Vec<(String, String)> {
        if let Some(selection) = &self.selection {
            return selection.clone();
        }
        let mut names: Vec<String> = Vec::new();
        for fit in &self.fits {
            for name in fit.coefficients().names() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names.into_iter().map(|n| (n.clone(), n)).collect()
    }

    fn rows(&self) -> Vec<Row> {
        let mut rows = Vec::new();
        for (name, display) in self.selection() {
            let mut estimates = Vec::with_capacity(self.fits.len());
            let mut errors = Vec::with_capacity(self.fits.len());
            for fit in &self.fits {
                match fit.coefficients().get(&name) {
                    Some(value) => {
                        let p = fit.p_values().get(&name).unwrap_or(f64::NAN);
                        let se = fit.standard_errors().get(&name).unwrap_or(f64::NAN);
                        estimates.push(Entry::Estimate {
                            value,
                            stars: stars(p),
                        });
                        errors.push(Entry::StdErr(se));
                    }
                    None => {
                        estimates.push(Entry::Blank);
                        errors.push(Entry::Blank);
                    }
                }
            }
            rows.push(Row {
                label: display,
                entries: estimates,
            });
            rows.push(Row {
                label: String::new(),
                entries: errors,
            });
        }

        rows.push(Row {
            label: "N".to_string(),
            entries: self
                .fits
                .iter()
                .map(|f| Entry::Text(f.nobs().to_string()))
                .collect(),
        });
        rows.push(Row {
            label: "R²".to_string(),
            entries: self
                .fits
                .iter()
                .map(|f| Entry::Text(format!("{:.4}", f.r_squared())))
                .collect(),
        });
        rows
    }
}

impl fmt::Display for RegressionResultTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut table = Table::new();
        table.set_header(self.header());
        for row in self.rows() {
            let mut cells = vec![Cell::new(row.label)];
            cells.extend(
                row.entries
                    .iter()
                    .map(|e| Cell::new(e.plain()).set_alignment(CellAlignment::Right)),
            );
            table.add_row(cells);
        }
        write!(f, "{}", table)?;
        write!(f, "\n* p<0.05, ** p<0.01, *** p<0.001")
    }
}

fn escape_latex(text: &str) -> String {
    text.replace('\\', "\\textbackslash{}")
        .replace('_', "\\_")
        .replace('%', "\\%")
        .replace('&', "\\&")
        .replace('#', "\\#")
        .replace('²', "$^2$")
}
