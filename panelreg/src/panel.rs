//! The panel data model: a `DataFrame` plus an optional (entity, time) key.

use crate::transform;
use crate::PanelError;
use getset::Getters;
use nalgebra::DMatrix;
use polars::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Column names reserved for panel metadata.
pub const RESERVED_COLUMN_NAMES: [&str; 5] = ["i", "t", "n", "N", "T"];

/// Maps every row of a table to a dense group code in `0..n_groups`.
///
/// Codes are assigned in order of first appearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityGrouping {
    codes: Vec<usize>,
    n_groups: usize,
}

impl EntityGrouping {
    /// Builds a grouping from precomputed codes. Every code must be below `n_groups`.
    pub fn from_codes(codes: Vec<usize>, n_groups: usize) -> Self {
        debug_assert!(codes.iter().all(|&c| c < n_groups));
        Self { codes, n_groups }
    }

    /// Encodes the values of a column. Values are compared as strings and a
    /// null forms its own group.
    pub fn from_column(column: &Column) -> Result<Self, PanelError> {
        let as_str = column.cast(&DataType::String)?;
        let mut levels: HashMap<Option<&str>, usize> = HashMap::new();
        let codes = as_str
            .str()?
            .into_iter()
            .map(|value| {
                let next = levels.len();
                *levels.entry(value).or_insert(next)
            })
            .collect();
        let n_groups = levels.len();
        Ok(Self { codes, n_groups })
    }

    /// Restricts the grouping to the given rows and renumbers the groups that
    /// remain.
    pub fn subset(&self, rows: &[usize]) -> Self {
        let mut remap: HashMap<usize, usize> = HashMap::new();
        let codes = rows
            .iter()
            .map(|&r| {
                let next = remap.len();
                *remap.entry(self.codes[r]).or_insert(next)
            })
            .collect();
        Self {
            codes,
            n_groups: remap.len(),
        }
    }

    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    pub fn code(&self, row: usize) -> usize {
        self.codes[row]
    }

    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// The (entity, time) key layered on top of a table.
///
/// The key keeps its own copy of both key columns so that it survives the
/// columns being dropped from the data payload.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct PanelKey {
    /// Name of the entity (individual) column.
    entity_column: String,
    /// Name of the time column.
    time_column: String,
    /// Values of the entity column, in row order.
    entity_values: Column,
    /// Values of the time column, in row order.
    time_values: Column,
    /// Row to entity mapping.
    entities: EntityGrouping,
    /// Row to time-period mapping.
    periods: EntityGrouping,
}

impl PanelKey {
    fn build(table: &PanelTable, entity: &str, time: &str) -> Result<Self, PanelError> {
        let entity_values = table.resolve_column(entity)?.clone();
        let time_values = table.resolve_column(time)?.clone();
        let entities = EntityGrouping::from_column(&entity_values)?;
        let periods = EntityGrouping::from_column(&time_values)?;
        Ok(Self {
            entity_column: entity.to_string(),
            time_column: time.to_string(),
            entity_values,
            time_values,
            entities,
            periods,
        })
    }

    /// Number of distinct entities (`n`).
    pub fn entity_count(&self) -> usize {
        self.entities.n_groups()
    }

    /// Number of distinct time periods (`T`).
    pub fn time_count(&self) -> usize {
        self.periods.n_groups()
    }
}

fn lookup<'a>(data: &'a DataFrame, name: &str) -> Result<&'a Column, PanelError> {
    data.column(name)
        .map_err(|_| PanelError::ColumnNotFound(name.to_string()))
}

/// A table of observations with an optional panel key.
///
/// The table owns its column data; the key is metadata on top of it.
#[derive(Debug, Clone)]
pub struct PanelTable {
    data: DataFrame,
    key: Option<PanelKey>,
}

impl PanelTable {
    /// Wraps a `DataFrame` without a panel key.
    pub fn new(data: DataFrame) -> Self {
        Self { data, key: None }
    }

    /// Wraps a `DataFrame` and sets the panel key in one step.
    pub fn with_panel_key(
        data: DataFrame,
        entity: &str,
        time: &str,
        drop_key_columns: bool,
    ) -> Result<Self, PanelError> {
        let mut table = Self::new(data);
        table.set_panel_key(entity, time, drop_key_columns)?;
        Ok(table)
    }

    /// Reads a delimited text file into a table without a panel key.
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        separator: u8,
        has_header: bool,
    ) -> Result<Self, PanelError> {
        let data = LazyCsvReader::new(path.as_ref())
            .with_has_header(has_header)
            .with_separator(separator)
            .finish()?
            .collect()?;
        tracing::debug!(
            path = %path.as_ref().display(),
            rows = data.height(),
            columns = data.width(),
            "loaded table"
        );
        Ok(Self::new(data))
    }

    /// Sets (or replaces) the panel key and recomputes the grouping.
    ///
    /// With `drop_key_columns` the two key columns are removed from the data
    /// payload; the key still holds their values. Key columns are resolved like
    /// [`resolve_column`](Self::resolve_column), so a table whose key columns
    /// were dropped can be keyed again on them.
    pub fn set_panel_key(
        &mut self,
        entity: &str,
        time: &str,
        drop_key_columns: bool,
    ) -> Result<(), PanelError> {
        let key = PanelKey::build(self, entity, time)?;

        for name in [entity, time]
            .into_iter()
            .chain(self.data.get_column_names_str())
        {
            if RESERVED_COLUMN_NAMES.contains(&name) {
                return Err(PanelError::ReservedColumnName(name.to_string()));
            }
        }

        if drop_key_columns {
            for name in [entity, time] {
                if self.data.column(name).is_ok() {
                    self.data = self.data.drop(name)?;
                }
            }
        }

        tracing::debug!(
            entity,
            time,
            n = key.entity_count(),
            t = key.time_count(),
            "panel key set"
        );
        self.key = Some(key);
        Ok(())
    }

    /// The underlying data payload.
    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    /// The panel key, if one is configured.
    pub fn key(&self) -> Option<&PanelKey> {
        self.key.as_ref()
    }

    /// The panel key, or `PanelNotConfigured` naming the operation that needed it.
    pub fn require_key(&self, operation: &str) -> Result<&PanelKey, PanelError> {
        self.key
            .as_ref()
            .ok_or_else(|| PanelError::panel_not_configured(operation))
    }

    /// `N`, the number of observations.
    pub fn row_count(&self) -> usize {
        self.data.height()
    }

    /// `K`, the number of data columns.
    pub fn column_count(&self) -> usize {
        self.data.width()
    }

    /// `n`, the number of distinct entities.
    pub fn entity_count(&self) -> Result<usize, PanelError> {
        Ok(self.require_key("entity_count")?.entity_count())
    }

    /// `T`, the number of distinct time periods.
    pub fn time_count(&self) -> Result<usize, PanelError> {
        Ok(self.require_key("time_count")?.time_count())
    }

    /// Whether every entity is observed in every period (`N == n * T`).
    pub fn is_balanced(&self) -> Result<bool, PanelError> {
        let key = self.require_key("is_balanced")?;
        Ok(self.row_count() == key.entity_count() * key.time_count())
    }

    /// The row to entity grouping of the configured key.
    pub fn entity_grouping(&self) -> Result<&EntityGrouping, PanelError> {
        Ok(self.require_key("entity_grouping")?.entities())
    }

    /// Reads a data column.
    pub fn column(&self, name: &str) -> Result<&Column, PanelError> {
        lookup(&self.data, name)
    }

    /// Resolves a column name against the data payload first and then against
    /// the key columns, which may have been dropped from the payload.
    pub fn resolve_column(&self, name: &str) -> Result<&Column, PanelError> {
        if let Ok(column) = self.data.column(name) {
            return Ok(column);
        }
        match &self.key {
            Some(key) if key.entity_column == name => Ok(&key.entity_values),
            Some(key) if key.time_column == name => Ok(&key.time_values),
            _ => Err(PanelError::ColumnNotFound(name.to_string())),
        }
    }

    /// A text report of the panel structure.
    pub fn panel_summary(&self) -> Result<String, PanelError> {
        let key = self.require_key("panel_summary")?;
        let balance = if self.is_balanced()? {
            "Balanced panel."
        } else {
            "Unbalanced panel."
        };
        Ok([
            balance.to_string(),
            format!("Group variable: {}", key.entity_column),
            format!("Time variable: {}", key.time_column),
            format!("n = {}", key.entity_count()),
            format!("T = {}", key.time_count()),
            format!("N = {}", self.row_count()),
        ]
        .join("\n"))
    }

    /// Within-transformed copies of the given columns (all numeric columns
    /// when `columns` is empty): each value minus its entity mean.
    pub fn within(&self, columns: &[&str]) -> Result<DataFrame, PanelError> {
        let grouping = self.require_key("within")?.entities();
        let (names, matrix) = self.numeric_matrix(columns)?;
        to_frame(&names, &transform::within(&matrix, grouping))
    }

    /// Entity means of the given columns broadcast to every row (all numeric
    /// columns when `columns` is empty).
    pub fn between(&self, columns: &[&str]) -> Result<DataFrame, PanelError> {
        let grouping = self.require_key("between")?.entities();
        let (names, matrix) = self.numeric_matrix(columns)?;
        to_frame(&names, &transform::between(&matrix, grouping))
    }

    /// Overall means of the given columns (all numeric columns when empty).
    pub fn grand_means(&self, columns: &[&str]) -> Result<Vec<(String, f64)>, PanelError> {
        let (names, matrix) = self.numeric_matrix(columns)?;
        let means = matrix.row_mean();
        Ok(names.into_iter().zip(means.iter().copied()).collect())
    }

    /// Collects numeric columns into a matrix. Nulls become NaN.
    fn numeric_matrix(&self, columns: &[&str]) -> Result<(Vec<String>, DMatrix<f64>), PanelError> {
        let names: Vec<String> = if columns.is_empty() {
            self.data
                .get_columns()
                .iter()
                .filter(|c| c.dtype().is_primitive_numeric())
                .map(|c| c.name().to_string())
                .collect()
        } else {
            columns.iter().map(|c| c.to_string()).collect()
        };

        let mut values = Vec::with_capacity(names.len() * self.row_count());
        for name in &names {
            let column = self.column(name)?.cast(&DataType::Float64)?;
            values.extend(column.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)));
        }
        let matrix = DMatrix::from_column_slice(self.row_count(), names.len(), &values);
        Ok((names, matrix))
    }
}

fn to_frame(names: &[String], matrix: &DMatrix<f64>) -> Result<DataFrame, PanelError> {
    let columns = names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            Series::new(name.as_str().into(), matrix.column(j).iter().copied().collect::<Vec<f64>>())
                .into_column()
        })
        .collect();
    Ok(DataFrame::new(columns)?)
}

impl fmt::Display for PanelTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Ok(summary) = self.panel_summary() {
            write!(f, "{}\n\n", summary)?;
        }
        write!(f, "{}", self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balanced() -> DataFrame {
        df!(
            "firm" => &["a", "a", "b", "b", "c", "c"],
            "year" => &[2000, 2001, 2000, 2001, 2000, 2001],
            "y" => &[1.0, 2.0, 3.0, 5.0, 8.0, 13.0]
        )
        .unwrap()
    }

    #[test]
    fn test_counts_and_balance() {
        let table = PanelTable::with_panel_key(balanced(), "firm", "year", false).unwrap();
        assert_eq!(table.entity_count().unwrap(), 3);
        assert_eq!(table.time_count().unwrap(), 2);
        assert!(table.is_balanced().unwrap());
    }

    #[test]
    fn test_unbalanced_is_not_an_error() {
        let df = balanced().slice(0, 5);
        let table = PanelTable::with_panel_key(df, "firm", "year", false).unwrap();
        assert_eq!(table.entity_count().unwrap(), 3);
        assert!(!table.is_balanced().unwrap());
    }

    #[test]
    fn test_accessors_require_key() {
        let table = PanelTable::new(balanced());
        assert!(matches!(
            table.entity_count(),
            Err(PanelError::PanelNotConfigured { .. })
        ));
        assert!(matches!(
            table.is_balanced(),
            Err(PanelError::PanelNotConfigured { .. })
        ));
        assert!(table.panel_summary().is_err());
    }

    #[test]
    fn test_missing_key_column() {
        let mut table = PanelTable::new(balanced());
        match table.set_panel_key("firm", "period", false) {
            Err(PanelError::ColumnNotFound(name)) => assert_eq!(name, "period"),
            other => panic!("expected ColumnNotFound, got {:?}", other),
        }
        assert!(table.key().is_none());
    }

    #[test]
    fn test_reserved_names_rejected() {
        let df = df!(
            "firm" => &["a", "b"],
            "t" => &[1, 1],
            "y" => &[1.0, 2.0]
        )
        .unwrap();
        let result = PanelTable::with_panel_key(df.clone(), "firm", "t", true);
        assert!(matches!(result, Err(PanelError::ReservedColumnName(ref n)) if n == "t"));

        let df = df!(
            "firm" => &["a", "b"],
            "year" => &[1, 1],
            "N" => &[1.0, 2.0]
        )
        .unwrap();
        let result = PanelTable::with_panel_key(df, "firm", "year", false);
        assert!(matches!(result, Err(PanelError::ReservedColumnName(ref n)) if n == "N"));
    }

    #[test]
    fn test_drop_key_columns_keeps_key() {
        let table = PanelTable::with_panel_key(balanced(), "firm", "year", true).unwrap();
        assert_eq!(table.column_count(), 1);
        assert!(table.column("firm").is_err());
        assert_eq!(table.resolve_column("firm").unwrap().len(), 6);
        assert_eq!(table.entity_count().unwrap(), 3);
    }

    #[test]
    fn test_rekeying_after_drop_uses_held_key_values() {
        let mut table = PanelTable::with_panel_key(balanced(), "firm", "year", true).unwrap();
        table.set_panel_key("firm", "year", false).unwrap();
        assert_eq!(table.entity_count().unwrap(), 3);
        assert_eq!(table.time_count().unwrap(), 2);
        assert!(table.column("firm").is_err());

        table.set_panel_key("year", "firm", true).unwrap();
        assert_eq!(table.entity_count().unwrap(), 2);
        assert_eq!(table.column_count(), 1);

        match table.set_panel_key("firm", "y2", false) {
            Err(PanelError::ColumnNotFound(name)) => assert_eq!(name, "y2"),
            other => panic!("expected ColumnNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_resetting_key_recomputes_counts() {
        let mut table = PanelTable::with_panel_key(balanced(), "firm", "year", false).unwrap();
        table.set_panel_key("year", "firm", false).unwrap();
        assert_eq!(table.entity_count().unwrap(), 2);
        assert_eq!(table.time_count().unwrap(), 3);
    }

    #[test]
    fn test_panel_summary() {
        let table = PanelTable::with_panel_key(balanced(), "firm", "year", false).unwrap();
        let summary = table.panel_summary().unwrap();
        assert_eq!(
            summary,
            "Balanced panel.\nGroup variable: firm\nTime variable: year\nn = 3\nT = 2\nN = 6"
        );
        assert!(table.to_string().starts_with("Balanced panel."));
    }

    #[test]
    fn test_grouping_subset_renumbers() {
        let grouping = EntityGrouping::from_codes(vec![0, 0, 1, 1, 2, 2], 3);
        let subset = grouping.subset(&[2, 3, 4]);
        assert_eq!(subset.codes(), &[0, 0, 1]);
        assert_eq!(subset.n_groups(), 2);
    }

    #[test]
    fn test_within_between_and_grand_means() {
        let table = PanelTable::with_panel_key(balanced(), "firm", "year", false).unwrap();

        let between = table.between(&["y"]).unwrap();
        let values: Vec<f64> = between.column("y").unwrap().f64().unwrap().into_no_null_iter().collect();
        assert_eq!(values, vec![1.5, 1.5, 4.0, 4.0, 10.5, 10.5]);

        let within = table.within(&["y"]).unwrap();
        let values: Vec<f64> = within.column("y").unwrap().f64().unwrap().into_no_null_iter().collect();
        assert_eq!(values, vec![-0.5, 0.5, -1.0, 1.0, -2.5, 2.5]);

        let means = table.grand_means(&[]).unwrap();
        let y_mean = means.iter().find(|(n, _)| n == "y").unwrap().1;
        assert!((y_mean - 32.0 / 6.0).abs() < 1e-12);
    }
}
