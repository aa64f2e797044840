//! FILENAME: persistence/src/json.rs
//! PURPOSE: JSON load/save of workbook cell contents.
//! CONTEXT: The on-disk format stores contents only, never evaluated
//! values:
//!
//!   { "sheets": [ { "name": "...", "cell-contents": { "A1": "=B1+1" } } ] }
//!
//! Loading validates the shape strictly (exactly the documented keys, with
//! the documented types), applies every cell without intermediate
//! recalculation, and runs the update driver once at the end. Saving emits
//! sheets in workbook tab order with uppercase, sorted location keys.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use serde::Serialize;
use serde_json::Value as JsonValue;

use engine::{CellId, Workbook};

use crate::error::PersistenceError;

#[derive(Serialize)]
struct SheetFile {
    name: String,
    #[serde(rename = "cell-contents")]
    cell_contents: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct WorkbookFile {
    sheets: Vec<SheetFile>,
}

/// Loads a workbook from JSON. The caller opens the reader; shape
/// violations are reported without partial application side effects being
/// visible to the caller (the workbook under construction is discarded).
pub fn load_workbook<R: Read>(reader: R) -> Result<Workbook, PersistenceError> {
    let data: JsonValue = serde_json::from_reader(reader)?;

    let Some(top) = data.as_object() else {
        return Err(PersistenceError::Shape(
            "top level must be a JSON object".to_string(),
        ));
    };
    if top.len() != 1 || !top.contains_key("sheets") {
        return Err(PersistenceError::Shape(
            "top level must have exactly one key, 'sheets'".to_string(),
        ));
    }
    let Some(sheets) = top["sheets"].as_array() else {
        return Err(PersistenceError::Shape(
            "'sheets' must be a JSON array".to_string(),
        ));
    };

    let mut workbook = Workbook::new();
    let mut changed: BTreeSet<CellId> = BTreeSet::new();

    for sheet in sheets {
        let Some(entry) = sheet.as_object() else {
            return Err(PersistenceError::Shape(
                "each sheet must be a JSON object".to_string(),
            ));
        };
        if entry.len() != 2 || !entry.contains_key("name") || !entry.contains_key("cell-contents") {
            return Err(PersistenceError::Shape(
                "each sheet must have exactly the keys 'name' and 'cell-contents'".to_string(),
            ));
        }
        let Some(name) = entry["name"].as_str() else {
            return Err(PersistenceError::Shape(
                "sheet name must be a string".to_string(),
            ));
        };
        let Some(cells) = entry["cell-contents"].as_object() else {
            return Err(PersistenceError::Shape(
                "'cell-contents' must be a JSON object".to_string(),
            ));
        };

        workbook.new_sheet(Some(name))?;
        for (location, contents) in cells {
            let Some(text) = contents.as_str() else {
                return Err(PersistenceError::Shape(
                    "cell contents must be strings".to_string(),
                ));
            };
            if !engine::is_valid_location(location) {
                return Err(PersistenceError::InvalidLocation(location.clone()));
            }
            changed.extend(workbook.stage_cell_contents(name, location, Some(text))?);
        }
    }

    workbook.recalculate(changed);
    Ok(workbook)
}

/// Saves a workbook's contents to JSON. The caller opens the writer.
pub fn save_workbook<W: Write>(workbook: &Workbook, writer: W) -> Result<(), PersistenceError> {
    let mut sheets = Vec::with_capacity(workbook.num_sheets());
    for name in workbook.list_sheets() {
        let mut cell_contents = BTreeMap::new();
        for location in workbook.list_cells(&name)? {
            if let Some(contents) = workbook.get_cell_contents(&name, &location)? {
                cell_contents.insert(location.to_uppercase(), contents);
            }
        }
        sheets.push(SheetFile {
            name,
            cell_contents,
        });
    }

    serde_json::to_writer(writer, &WorkbookFile { sheets })?;
    Ok(())
}
