use panelreg::transform::fixed_effects;
use panelreg::{PanelError, PanelTable};
use polars::prelude::*;

fn load() -> PanelTable {
    PanelTable::from_csv("tests/data/investment.csv", b',', true).expect("fixture should load")
}

#[test]
fn test_balanced_fixture() {
    let mut table = load();
    assert_eq!(table.row_count(), 24);
    assert_eq!(table.column_count(), 5);

    table.set_panel_key("firm", "year", false).unwrap();
    assert_eq!(table.entity_count().unwrap(), 4);
    assert_eq!(table.time_count().unwrap(), 6);
    assert!(table.is_balanced().unwrap());
    assert_eq!(
        table.entity_count().unwrap() * table.time_count().unwrap(),
        table.row_count()
    );
}

#[test]
fn test_unbalanced_fixture() {
    // Drop the last year of the last firm.
    let data = load().data().slice(0, 23);
    let table = PanelTable::with_panel_key(data, "firm", "year", false).unwrap();
    assert_eq!(table.entity_count().unwrap(), 4);
    assert_eq!(table.time_count().unwrap(), 6);
    assert!(!table.is_balanced().unwrap());
    assert!(table.panel_summary().unwrap().starts_with("Unbalanced panel."));
}

#[test]
fn test_key_column_round_trip() {
    let original = load();
    let mut table = original.clone();
    table.set_panel_key("firm", "year", false).unwrap();

    for name in ["firm", "year", "inv"] {
        let before = original.column(name).unwrap();
        let after = table.column(name).unwrap();
        assert!(before.as_materialized_series().equals(after.as_materialized_series()));
    }
}

#[test]
fn test_panel_summary_report() {
    let mut table = load();
    table.set_panel_key("firm", "year", true).unwrap();
    assert_eq!(
        table.panel_summary().unwrap(),
        "Balanced panel.\nGroup variable: firm\nTime variable: year\nn = 4\nT = 6\nN = 24"
    );
}

#[test]
fn test_panel_not_configured() {
    let table = load();
    for result in [table.entity_count(), table.time_count()] {
        assert!(matches!(result, Err(PanelError::PanelNotConfigured { .. })));
    }
    assert!(matches!(
        table.panel_summary(),
        Err(PanelError::PanelNotConfigured { .. })
    ));
    assert!(table.within(&["inv"]).is_err());
}

#[test]
fn test_fixed_effects_transform_on_fixture() {
    let mut table = load();
    table.set_panel_key("firm", "year", false).unwrap();
    let grouping = table.entity_grouping().unwrap().clone();

    let inv: Vec<f64> = table
        .column("inv")
        .unwrap()
        .f64()
        .unwrap()
        .into_no_null_iter()
        .collect();
    let matrix = nalgebra::DMatrix::from_column_slice(inv.len(), 1, &inv);

    let once = fixed_effects(&matrix, &grouping);
    assert!((once.column(0).mean() - 56.21416666666667).abs() < 1e-9);
    assert!((once[(0, 0)] - 45.91583333333334).abs() < 1e-9);
    assert!((once[(1, 0)] - 49.94583333333334).abs() < 1e-9);

    let twice = fixed_effects(&once, &grouping);
    assert!((once - twice).abs().max() < 1e-9);
}

#[test]
fn test_grand_means_and_between() {
    let mut table = load();
    table.set_panel_key("firm", "year", true).unwrap();

    let means = table.grand_means(&["inv"]).unwrap();
    assert_eq!(means[0].0, "inv");
    assert!((means[0].1 - 56.21416666666667).abs() < 1e-9);

    let between = table.between(&["inv"]).unwrap();
    let values: Vec<f64> = between.column("inv").unwrap().f64().unwrap().into_no_null_iter().collect();
    // every alpha row carries the alpha mean
    assert!(values[..6].iter().all(|v| (v - values[0]).abs() < 1e-12));
    assert!((values[0] - 229.73 / 6.0).abs() < 1e-9);
}

#[test]
fn test_null_key_values_form_their_own_group() {
    let df = df!(
        "firm" => &[Some("a"), None, Some("a"), None],
        "year" => &[1, 1, 2, 2],
        "y" => &[1.0, 2.0, 3.0, 4.0]
    )
    .unwrap();
    let table = PanelTable::with_panel_key(df, "firm", "year", false).unwrap();
    assert_eq!(table.entity_count().unwrap(), 2);
    assert!(table.is_balanced().unwrap());
}
