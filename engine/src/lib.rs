//! FILENAME: engine/src/lib.rs
//! PURPOSE: Main library entry point for the workbook evaluation engine.
//! CONTEXT: Re-exports public types and modules for use by other crates.
//!
//! The engine is an in-memory spreadsheet workbook core: sheets of cells,
//! a formula evaluator over the `parser` crate's AST, a dependency graph
//! with cycle detection, and an update driver that keeps every formula
//! value consistent with its dependencies under arbitrary edits.

pub mod cell;
pub mod coord;
pub mod dependency_graph;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod references;
pub mod sheet;
pub mod workbook;

// Re-export commonly used types at the crate root
pub use cell::{Cell, CellError, CellErrorKind, CellKind, CellValue};
pub use coord::{column_label, column_number, is_valid_location, parse_location};
pub use dependency_graph::{CellId, DependencyGraph};
pub use error::WorkbookError;
pub use evaluator::Evaluator;
pub use functions::{ArgType, FuncDir, FuncInfo};
pub use sheet::Sheet;
pub use workbook::{NotifyFn, Workbook};

/// The engine version, reported by the VERSION() formula function.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn addition_across_sheets() {
        let mut wb = Workbook::new();
        wb.new_sheet(Some("Sheet1")).unwrap();
        wb.set_cell_contents("Sheet1", "A1", Some("12")).unwrap();
        wb.set_cell_contents("Sheet1", "B1", Some("34")).unwrap();
        wb.set_cell_contents("Sheet1", "C1", Some("=A1+B1")).unwrap();
        assert_eq!(
            wb.get_cell_value("Sheet1", "C1").unwrap(),
            CellValue::Number(dec("46"))
        );
    }

    #[test]
    fn case_insensitive_sheet_lookup() {
        let mut wb = Workbook::new();
        wb.new_sheet(Some("MySheet")).unwrap();
        wb.set_cell_contents("MYSHEET", "A1", Some("5")).unwrap();
        assert_eq!(
            wb.get_cell_value("mysheet", "a1").unwrap(),
            CellValue::Number(dec("5"))
        );
        assert_eq!(wb.list_sheets(), vec!["MySheet"]);
    }

    #[test]
    fn formula_values_stay_consistent_after_edits() {
        let mut wb = Workbook::new();
        wb.new_sheet(None).unwrap();
        wb.set_cell_contents("Sheet1", "A1", Some("1")).unwrap();
        wb.set_cell_contents("Sheet1", "B1", Some("=A1*10")).unwrap();
        wb.set_cell_contents("Sheet1", "C1", Some("=B1+1")).unwrap();

        wb.set_cell_contents("Sheet1", "A1", Some("5")).unwrap();
        assert_eq!(
            wb.get_cell_value("Sheet1", "B1").unwrap(),
            CellValue::Number(dec("50"))
        );
        assert_eq!(
            wb.get_cell_value("Sheet1", "C1").unwrap(),
            CellValue::Number(dec("51"))
        );
    }
}
