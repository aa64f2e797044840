//! FILENAME: engine/src/workbook.rs
//! PURPOSE: The workbook: an ordered collection of sheets plus the update driver.
//! CONTEXT: Cells in any sheet may reference cells in any other sheet, so
//! the workbook owns the dependency graph and orchestrates every mutation:
//! content edits, sheet lifecycle (create/delete/rename/move/copy), block
//! move/copy, region sorting, and the re-evaluation pass that keeps every
//! formula value consistent with its dependencies.
//!
//! THE UPDATE DRIVER: after any mutation, `update_cells` runs Tarjan over
//! the dependency graph, marks cycle members with #CIRCREF!, and walks the
//! topological order re-evaluating exactly the cells that can have been
//! affected. Lazy functions can discover new dependencies mid-pass; those
//! are added as provisional edges and the pass restarts, iterating to a
//! fixed point. Provisional edges are retracted once the loop exits, and
//! accumulated value changes are dispatched to subscribers.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::debug;

use crate::cell::{CellError, CellErrorKind, CellKind, CellValue};
use crate::coord::{is_valid_location, location_name, parse_location, MAX_COLUMN, MAX_ROW};
use crate::dependency_graph::{CellId, DependencyGraph, TarjanResult};
use crate::error::WorkbookError;
use crate::evaluator::Evaluator;
use crate::functions::FuncDir;
use crate::references;
use crate::sheet::Sheet;

/// Change-notification callback: receives the workbook and the changed
/// cells as (lowercase sheet, uppercase location) pairs, sorted.
pub type NotifyFn = Box<dyn Fn(&Workbook, &[CellId])>;

/// Formulas whose leading call is one of these contribute static edges only
/// from their first argument; the rest of their dependencies are discovered
/// at evaluation time.
const LAZY_FORMULA_HEADS: [&str; 4] = ["=IF", "=IFERROR", "=CHOOSE", "=INDIRECT"];

/// A workbook: an ordered collection of sheets which may reference each
/// other, the dependency graph across them, and the registered change
/// subscribers.
#[derive(Default)]
pub struct Workbook {
    /// Sheets keyed by lowercase name.
    sheets: HashMap<String, Sheet>,
    /// Lowercase names in tab order.
    sheet_order: Vec<String>,
    graph: DependencyGraph,
    functions: FuncDir,
    subscribers: Vec<NotifyFn>,
}

impl Workbook {
    pub fn new() -> Self {
        Workbook::default()
    }

    pub(crate) fn sheet_by_lower(&self, lower: &str) -> Option<&Sheet> {
        self.sheets.get(lower)
    }

    pub(crate) fn func_dir(&self) -> &FuncDir {
        &self.functions
    }

    pub(crate) fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    fn lookup(&self, sheet_name: &str) -> Result<&Sheet, WorkbookError> {
        self.sheets
            .get(&sheet_name.to_lowercase())
            .ok_or_else(|| WorkbookError::NotFound(sheet_name.to_string()))
    }

    pub fn num_sheets(&self) -> usize {
        self.sheet_order.len()
    }

    /// Display names in tab order.
    pub fn list_sheets(&self) -> Vec<String> {
        self.sheet_order
            .iter()
            .filter_map(|key| self.sheets.get(key))
            .map(|sheet| sheet.display_name.clone())
            .collect()
    }

    /// Registers a callback invoked at the end of every mutation that
    /// changed at least one cell value. Callbacks that panic are isolated.
    pub fn notify_cells_changed(&mut self, callback: impl Fn(&Workbook, &[CellId]) + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    // ------------------------------------------------------------------
    // Sheet lifecycle
    // ------------------------------------------------------------------

    fn generate_sheet_name(&self) -> String {
        let mut index = 1;
        loop {
            let candidate = format!("Sheet{index}");
            if !self.sheets.contains_key(&candidate.to_lowercase()) {
                return candidate;
            }
            index += 1;
        }
    }

    fn check_new_name(&self, name: &str) -> Result<(), WorkbookError> {
        if !references::is_valid_sheet_name(name)
            || self.sheets.contains_key(&name.to_lowercase())
        {
            return Err(WorkbookError::Conflict(name.to_string()));
        }
        Ok(())
    }

    /// Adds a sheet with the given (case-insensitively unique) name, or a
    /// generated "Sheet<k>" name. Returns (0-based index, display name).
    pub fn new_sheet(&mut self, sheet_name: Option<&str>) -> Result<(usize, String), WorkbookError> {
        let name = match sheet_name {
            Some(given) => {
                self.check_new_name(given)?;
                given.to_string()
            }
            None => self.generate_sheet_name(),
        };

        let lower = name.to_lowercase();
        self.sheets.insert(lower.clone(), Sheet::new(name.clone()));
        self.sheet_order.push(lower);
        debug!("created sheet {:?}", name);

        // A new sheet may repair dangling references to its name
        self.update_cells(BTreeSet::new(), BTreeSet::new());

        Ok((self.sheet_order.len() - 1, name))
    }

    /// Deletes the named sheet and every graph node keyed to it, then
    /// re-evaluates (references into the sheet become dangling).
    pub fn del_sheet(&mut self, sheet_name: &str) -> Result<(), WorkbookError> {
        let lower = sheet_name.to_lowercase();
        if self.sheets.remove(&lower).is_none() {
            return Err(WorkbookError::NotFound(sheet_name.to_string()));
        }
        self.sheet_order.retain(|key| key != &lower);

        let to_remove: Vec<CellId> = self
            .graph
            .cells()
            .filter(|cell| cell.0 == lower)
            .cloned()
            .collect();
        for cell in &to_remove {
            self.graph.remove_cell(cell);
        }
        debug!("deleted sheet {:?}", sheet_name);

        self.update_cells(BTreeSet::new(), BTreeSet::new());
        Ok(())
    }

    /// Renames a sheet and rewrites every formula that references it (the
    /// rewrite also normalizes the quoting of other sheet names in the
    /// touched formulas).
    pub fn rename_sheet(
        &mut self,
        sheet_name: &str,
        new_sheet_name: &str,
    ) -> Result<(), WorkbookError> {
        let old_lower = sheet_name.to_lowercase();
        if !self.sheets.contains_key(&old_lower) {
            return Err(WorkbookError::NotFound(sheet_name.to_string()));
        }
        self.check_new_name(new_sheet_name)?;

        let new_lower = new_sheet_name.to_lowercase();
        let Some(mut sheet) = self.sheets.remove(&old_lower) else {
            return Err(WorkbookError::NotFound(sheet_name.to_string()));
        };
        sheet.display_name = new_sheet_name.to_string();
        self.sheets.insert(new_lower.clone(), sheet);
        if let Some(position) = self.sheet_order.iter().position(|key| key == &old_lower) {
            self.sheet_order[position] = new_lower.clone();
        }

        // Rewrite the graph first; it reports which formula texts mention
        // the old name. Graph edges are already correct afterwards, so the
        // cells are edited directly rather than re-staged.
        let referencing = self.graph.rename_sheet(&old_lower, &new_lower);
        for (sheet_key, location) in referencing {
            let Some(cell) = self
                .sheets
                .get_mut(&sheet_key)
                .and_then(|s| s.get_cell_mut(&location))
            else {
                continue;
            };
            let rewritten =
                references::replace_sheet_names(&cell.content, sheet_name, new_sheet_name);
            cell.set_content(&rewritten);
        }
        debug!("renamed sheet {:?} -> {:?}", sheet_name, new_sheet_name);

        self.update_cells(BTreeSet::new(), BTreeSet::new());
        Ok(())
    }

    /// Moves the named sheet to the given position in the tab order.
    pub fn move_sheet(&mut self, sheet_name: &str, index: usize) -> Result<(), WorkbookError> {
        let lower = sheet_name.to_lowercase();
        if !self.sheets.contains_key(&lower) {
            return Err(WorkbookError::NotFound(sheet_name.to_string()));
        }
        if index >= self.sheet_order.len() {
            return Err(WorkbookError::OutOfRange(index));
        }
        self.sheet_order.retain(|key| key != &lower);
        self.sheet_order.insert(index, lower);
        Ok(())
    }

    /// Copies a sheet to the end of the tab order under the name
    /// "<name>_<k>" for the smallest unique k. Formula texts are not
    /// rewritten, so they still reference the original sheet names.
    pub fn copy_sheet(&mut self, sheet_name: &str) -> Result<(usize, String), WorkbookError> {
        let source_lower = sheet_name.to_lowercase();
        let Some(source) = self.sheets.get(&source_lower) else {
            return Err(WorkbookError::NotFound(sheet_name.to_string()));
        };

        let mut index = 1;
        let mut copy_name = format!("{sheet_name}_{index}");
        while self.sheets.contains_key(&copy_name.to_lowercase()) {
            index += 1;
            copy_name = format!("{sheet_name}_{index}");
        }
        let copy_lower = copy_name.to_lowercase();

        let mut copied = source.clone();
        copied.display_name = copy_name.clone();

        let mut changed: BTreeSet<CellId> = BTreeSet::new();
        let formulas: Vec<(String, String)> = copied
            .locations()
            .map(|location| {
                let id: CellId = (copy_lower.clone(), location.clone());
                changed.insert(id);
                location.clone()
            })
            .filter_map(|location| {
                copied
                    .get_cell(&location)
                    .filter(|cell| cell.kind == CellKind::Formula)
                    .map(|cell| (location, cell.content.clone()))
            })
            .collect();

        self.sheets.insert(copy_lower.clone(), copied);
        self.sheet_order.push(copy_lower.clone());

        for (location, content) in formulas {
            let id: CellId = (copy_lower.clone(), location);
            self.graph.set_cell(id.clone());
            self.register_static_edges(&id, &content);
        }
        debug!("copied sheet {:?} as {:?}", sheet_name, copy_name);

        self.update_cells(changed.clone(), changed);
        Ok((self.sheet_order.len() - 1, copy_name))
    }

    /// The extent of the named sheet as (columns, rows).
    pub fn get_sheet_extent(&self, sheet_name: &str) -> Result<(u32, u32), WorkbookError> {
        Ok(self.lookup(sheet_name)?.extent())
    }

    /// The populated locations of the named sheet, sorted.
    pub fn list_cells(&self, sheet_name: &str) -> Result<Vec<String>, WorkbookError> {
        let mut locations: Vec<String> = self.lookup(sheet_name)?.locations().cloned().collect();
        locations.sort();
        Ok(locations)
    }

    // ------------------------------------------------------------------
    // Cell contents
    // ------------------------------------------------------------------

    /// Extracts the static dependency edges from a formula's text and adds
    /// them to the graph. For a formula headed by a lazy function, only the
    /// first argument contributes: the remaining references depend on
    /// values and are discovered at evaluation time.
    fn register_static_edges(&mut self, id: &CellId, content: &str) {
        let head = content
            .split('(')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_uppercase();
        let scan: &str = if LAZY_FORMULA_HEADS.contains(&head.as_str()) {
            content.split(',').next().unwrap_or(content)
        } else {
            content
        };

        let (locals, sheet_refs) = references::find_refs(scan);
        for location in locals {
            self.graph
                .add_dependency(id, (id.0.clone(), location.to_uppercase()));
        }
        for (sheet, location) in sheet_refs {
            self.graph
                .add_dependency(id, (sheet.to_lowercase(), location.to_uppercase()));
        }
    }

    /// Sets a cell's contents without running the update driver. Used for
    /// bulk operations (load, move/copy, sort) that batch one driver run at
    /// the end; pair with `recalculate`.
    ///
    /// Returns the cells whose value changed directly from the edit.
    pub fn stage_cell_contents(
        &mut self,
        sheet_name: &str,
        location: &str,
        contents: Option<&str>,
    ) -> Result<BTreeSet<CellId>, WorkbookError> {
        let lower = sheet_name.to_lowercase();
        if !self.sheets.contains_key(&lower) {
            return Err(WorkbookError::NotFound(sheet_name.to_string()));
        }
        let location = location.to_uppercase();
        if !is_valid_location(&location) {
            return Err(WorkbookError::InvalidArgument(format!(
                "Invalid cell location: {location}"
            )));
        }
        let id: CellId = (lower.clone(), location.clone());

        let existing = self.sheets.get(&lower).and_then(|s| s.get_cell(&location));
        let prior_kind = existing.map(|cell| cell.kind);
        let prev_value = existing.map(|cell| cell.value.clone());

        // A formula cell being replaced leaves the graph before anything else
        if prior_kind == Some(CellKind::Formula) {
            self.graph.remove_cell(&id);
        }

        let trimmed = contents.map(str::trim).unwrap_or("");
        if let Some(sheet) = self.sheets.get_mut(&lower) {
            if trimmed.is_empty() {
                sheet.delete_cell(&location);
            } else {
                sheet.set_cell_contents(&location, trimmed);
            }
        }

        if let Some(cell) = self.sheets.get(&lower).and_then(|s| s.get_cell(&location)) {
            if cell.kind == CellKind::Formula {
                let content = cell.content.clone();
                self.graph.set_cell(id.clone());
                self.register_static_edges(&id, &content);
            }
        }

        let new_value = self
            .sheets
            .get(&lower)
            .and_then(|s| s.get_cell(&location))
            .map(|cell| cell.value.clone());

        let mut changed = BTreeSet::new();
        if prev_value != new_value {
            changed.insert(id);
        }
        Ok(changed)
    }

    /// Sets the contents of one cell and updates the workbook. None or
    /// blank content deletes the cell.
    pub fn set_cell_contents(
        &mut self,
        sheet_name: &str,
        location: &str,
        contents: Option<&str>,
    ) -> Result<(), WorkbookError> {
        let changed = self.stage_cell_contents(sheet_name, location, contents)?;
        let id: CellId = (sheet_name.to_lowercase(), location.to_uppercase());
        self.update_cells(BTreeSet::from([id]), changed);
        Ok(())
    }

    pub fn get_cell_contents(
        &self,
        sheet_name: &str,
        location: &str,
    ) -> Result<Option<String>, WorkbookError> {
        let sheet = self.lookup(sheet_name)?;
        let location = location.to_uppercase();
        if !is_valid_location(&location) {
            return Err(WorkbookError::InvalidArgument(format!(
                "Invalid cell location: {location}"
            )));
        }
        Ok(sheet.get_cell(&location).map(|cell| cell.content.clone()))
    }

    /// The current value of a cell; absent cells are Empty.
    pub fn get_cell_value(
        &self,
        sheet_name: &str,
        location: &str,
    ) -> Result<CellValue, WorkbookError> {
        let sheet = self.lookup(sheet_name)?;
        let location = location.to_uppercase();
        if !is_valid_location(&location) {
            return Err(WorkbookError::InvalidArgument(format!(
                "Invalid cell location: {location}"
            )));
        }
        Ok(sheet
            .get_cell(&location)
            .map(|cell| cell.value.clone())
            .unwrap_or(CellValue::Empty))
    }

    /// Runs the update driver over an externally staged changed set.
    pub fn recalculate(&mut self, changed: BTreeSet<CellId>) {
        self.update_cells(changed.clone(), changed);
    }

    // ------------------------------------------------------------------
    // The update driver
    // ------------------------------------------------------------------

    /// Re-evaluates the affected cells in dependency order and notifies
    /// subscribers of every value change.
    ///
    /// `changed_content` is the set of cells whose text was just written
    /// (empty means "re-evaluate everything", used by sheet lifecycle
    /// operations); `changed_values` accumulates cells whose value changed.
    fn update_cells(&mut self, changed_content: BTreeSet<CellId>, mut changed_values: BTreeSet<CellId>) {
        // Edges added at evaluation time, retracted once the loop exits.
        let mut eval_edges: Vec<(CellId, CellId)> = Vec::new();
        let mut passes = 0u32;
        let mut restart = true;

        while restart {
            restart = false;
            passes += 1;

            let TarjanResult {
                order,
                cycle_heads,
                scc_members,
            } = self.graph.tarjan();

            // Cells strictly before the first changed input in topological
            // order already hold correct values and are skipped.
            let mut found_first = false;

            for node in order {
                let (sheet_key, location) = &node;
                if !self.sheets.contains_key(sheet_key) {
                    continue;
                }

                let snapshot = self
                    .sheets
                    .get(sheet_key)
                    .and_then(|sheet| sheet.get_cell(location))
                    .map(|cell| {
                        (
                            cell.value.clone(),
                            cell.kind,
                            cell.content.clone(),
                            references::has_eval_dep(&cell.content),
                        )
                    });
                let exists = snapshot.is_some();
                let prev_value = snapshot.as_ref().map(|(value, ..)| value.clone());
                let has_lazy = snapshot
                    .as_ref()
                    .map(|(_, _, _, lazy)| *lazy)
                    .unwrap_or(false);

                // Cells containing lazy functions always re-evaluate: their
                // effective dependencies can shift without a text change.
                found_first = found_first
                    || changed_content.is_empty()
                    || changed_content.contains(&node)
                    || has_lazy;

                if cycle_heads.contains(&node) || scc_members.contains(&node) {
                    if let Some(cell) = self
                        .sheets
                        .get_mut(sheet_key)
                        .and_then(|sheet| sheet.get_cell_mut(location))
                    {
                        debug!("cycle member: {}!{}", sheet_key, location);
                        cell.value = CellValue::Error(CellError::new(
                            CellErrorKind::CircularReference,
                            "Cycle detected",
                        ));
                    }
                    found_first = true;
                } else if found_first {
                    if let Some((_, CellKind::Formula, content, _)) = &snapshot {
                        let parsed = parser::parse_cached(content);
                        let (value, discovered) = match parsed.as_ref() {
                            Ok(expr) => {
                                let evaluator =
                                    Evaluator::new(&*self, sheet_key.clone(), Some(node.clone()));
                                let value = evaluator.evaluate(expr);
                                (value, evaluator.into_discovered())
                            }
                            // Formula kind implies the text parsed when set;
                            // a cache miss here still degrades gracefully.
                            Err(e) => (
                                CellValue::Error(CellError::new(
                                    CellErrorKind::ParseError,
                                    e.message.clone(),
                                )),
                                Vec::new(),
                            ),
                        };
                        if let Some(cell) = self
                            .sheets
                            .get_mut(sheet_key)
                            .and_then(|sheet| sheet.get_cell_mut(location))
                        {
                            cell.value = value;
                        }
                        for target in discovered {
                            let edge = (node.clone(), target);
                            if !eval_edges.contains(&edge) {
                                self.graph.add_dependency(&edge.0, edge.1.clone());
                                eval_edges.push(edge);
                                restart = true;
                            }
                        }
                    }
                }

                let new_value = self
                    .sheets
                    .get(sheet_key)
                    .and_then(|sheet| sheet.get_cell(location))
                    .map(|cell| cell.value.clone());
                if exists && prev_value != new_value {
                    changed_values.insert(node.clone());
                    found_first = true;
                }
            }
        }
        debug!(
            "update complete after {} pass(es); {} value change(s)",
            passes,
            changed_values.len()
        );

        if !changed_values.is_empty() {
            let changed: Vec<CellId> = changed_values.into_iter().collect();
            let subscribers = std::mem::take(&mut self.subscribers);
            {
                let workbook: &Workbook = &*self;
                for callback in &subscribers {
                    // A panicking subscriber must not poison the workbook
                    // or block the remaining subscribers.
                    let _ = catch_unwind(AssertUnwindSafe(|| callback(workbook, &changed)));
                }
            }
            self.subscribers = subscribers;
        }

        for (cell, dependency) in eval_edges {
            self.graph.remove_dependency(&cell, &dependency);
        }
    }

    // ------------------------------------------------------------------
    // Block move / copy
    // ------------------------------------------------------------------

    /// Moves the rectangle [start, end] so its top-left lands on `to`,
    /// rewriting relative references in moved formulas by the displacement.
    pub fn move_cells(
        &mut self,
        sheet_name: &str,
        start_location: &str,
        end_location: &str,
        to_location: &str,
        to_sheet: Option<&str>,
    ) -> Result<(), WorkbookError> {
        self.move_copy_cells(
            sheet_name,
            start_location,
            end_location,
            to_location,
            to_sheet,
            true,
        )
    }

    /// Like `move_cells`, but the source rectangle is left in place.
    pub fn copy_cells(
        &mut self,
        sheet_name: &str,
        start_location: &str,
        end_location: &str,
        to_location: &str,
        to_sheet: Option<&str>,
    ) -> Result<(), WorkbookError> {
        self.move_copy_cells(
            sheet_name,
            start_location,
            end_location,
            to_location,
            to_sheet,
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn move_copy_cells(
        &mut self,
        sheet_name: &str,
        start_location: &str,
        end_location: &str,
        to_location: &str,
        to_sheet: Option<&str>,
        is_move: bool,
    ) -> Result<(), WorkbookError> {
        let source_lower = sheet_name.to_lowercase();
        if !self.sheets.contains_key(&source_lower) {
            return Err(WorkbookError::NotFound(sheet_name.to_string()));
        }
        let target_name = to_sheet.unwrap_or(sheet_name).to_string();
        let target_lower = target_name.to_lowercase();
        if !self.sheets.contains_key(&target_lower) {
            return Err(WorkbookError::NotFound(target_name));
        }

        let (start_col, start_row) = parse_loc_arg(start_location)?;
        let (end_col, end_row) = parse_loc_arg(end_location)?;
        let (to_col, to_row) = parse_loc_arg(to_location)?;

        // Normalize so the block is addressed by its corners
        let top_row = start_row.min(end_row);
        let bottom_row = start_row.max(end_row);
        let left_col = start_col.min(end_col);
        let right_col = start_col.max(end_col);

        let row_offset = to_row as i64 - top_row as i64;
        let col_offset = to_col as i64 - left_col as i64;

        let dest_bottom = to_row as i64 + (bottom_row - top_row) as i64;
        let dest_right = to_col as i64 + (right_col - left_col) as i64;
        if dest_bottom > MAX_ROW as i64 || dest_right > MAX_COLUMN as i64 {
            return Err(WorkbookError::InvalidArgument(
                "Target area extends beyond ZZZZ9999".to_string(),
            ));
        }

        // When the destination rectangle overlaps the source on the same
        // sheet, the intersection must be snapshotted before any write
        // lands on it.
        let overlaps = source_lower == target_lower
            && to_row <= bottom_row
            && dest_bottom >= top_row as i64
            && to_col <= right_col
            && dest_right >= left_col as i64;

        let mut staged: HashMap<String, Option<(String, CellKind)>> = HashMap::new();
        if overlaps {
            for row in top_row.max(to_row)..=bottom_row.min(dest_bottom as u32) {
                for col in left_col.max(to_col)..=right_col.min(dest_right as u32) {
                    let location = location_name(col, row);
                    let snapshot = self
                        .sheets
                        .get(&source_lower)
                        .and_then(|sheet| sheet.get_cell(&location))
                        .map(|cell| (cell.content.clone(), cell.kind));
                    staged.insert(location, snapshot);
                }
            }
        }

        let mut changed: BTreeSet<CellId> = BTreeSet::new();

        for row in top_row..=bottom_row {
            for col in left_col..=right_col {
                let original = location_name(col, row);
                let destination = location_name(
                    (col as i64 + col_offset) as u32,
                    (row as i64 + row_offset) as u32,
                );
                changed.insert((target_lower.clone(), destination.clone()));

                let snapshot = match staged.get(&original) {
                    Some(entry) => entry.clone(),
                    None => self
                        .sheets
                        .get(&source_lower)
                        .and_then(|sheet| sheet.get_cell(&original))
                        .map(|cell| (cell.content.clone(), cell.kind)),
                };

                match snapshot {
                    Some((content, CellKind::Formula)) => {
                        let rewritten =
                            references::rewrite_formula_offsets(&content, row_offset, col_offset);
                        changed.extend(self.stage_cell_contents(
                            &target_name,
                            &destination,
                            Some(&rewritten),
                        )?);
                    }
                    Some((content, _)) => {
                        changed.extend(self.stage_cell_contents(
                            &target_name,
                            &destination,
                            Some(&content),
                        )?);
                    }
                    None => {
                        changed.extend(self.stage_cell_contents(&target_name, &destination, None)?);
                    }
                }
            }
        }

        if is_move {
            for row in top_row..=bottom_row {
                for col in left_col..=right_col {
                    let original = location_name(col, row);
                    // Overlap cells were already overwritten by the block
                    // itself and must not be cleared.
                    if staged.contains_key(&original) {
                        continue;
                    }
                    changed.extend(self.stage_cell_contents(sheet_name, &original, None)?);
                }
            }
        }

        self.update_cells(changed.clone(), changed);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Region sorting
    // ------------------------------------------------------------------

    /// Sorts the rows of the rectangle [start, end] stably by the given
    /// 1-based column indexes (negative index = descending). Formula cells
    /// are rewritten by their row displacement so intra-range relative
    /// references follow their rows; absolute markers pin.
    pub fn sort_region(
        &mut self,
        sheet_name: &str,
        start_location: &str,
        end_location: &str,
        sort_cols: &[i32],
    ) -> Result<(), WorkbookError> {
        let lower = sheet_name.to_lowercase();
        if !self.sheets.contains_key(&lower) {
            return Err(WorkbookError::NotFound(sheet_name.to_string()));
        }

        let (start_col, start_row) = parse_loc_arg(start_location)?;
        let (end_col, end_row) = parse_loc_arg(end_location)?;
        let top_row = start_row.min(end_row);
        let bottom_row = start_row.max(end_row);
        let left_col = start_col.min(end_col);
        let right_col = start_col.max(end_col);
        let width = (right_col - left_col + 1) as i64;

        if sort_cols.is_empty() {
            return Err(WorkbookError::InvalidArgument(
                "Empty sort column list".to_string(),
            ));
        }
        let mut seen: BTreeSet<i64> = BTreeSet::new();
        for &col in sort_cols {
            let magnitude = (col as i64).abs();
            if magnitude == 0 || magnitude > width {
                return Err(WorkbookError::InvalidArgument(format!(
                    "Sort column {col} out of range"
                )));
            }
            if !seen.insert(magnitude) {
                return Err(WorkbookError::InvalidArgument(format!(
                    "Duplicate sort column {col}"
                )));
            }
        }

        // Snapshot every row before any write: evaluated key values for
        // ordering, raw (content, kind) pairs for the write-back.
        let mut rows: Vec<SortRow> = Vec::new();
        for row in top_row..=bottom_row {
            let mut keys = Vec::new();
            let mut cells = Vec::new();
            for col in left_col..=right_col {
                let location = location_name(col, row);
                let cell = self
                    .sheets
                    .get(&lower)
                    .and_then(|sheet| sheet.get_cell(&location));
                keys.push(
                    cell.map(|c| c.value.clone())
                        .unwrap_or(CellValue::Empty),
                );
                cells.push(cell.map(|c| (c.content.clone(), c.kind)));
            }
            rows.push(SortRow {
                original_row: row,
                keys,
                cells,
            });
        }

        rows.sort_by(|a, b| compare_rows(a, b, sort_cols));

        let mut changed: BTreeSet<CellId> = BTreeSet::new();
        for (new_index, row) in rows.iter().enumerate() {
            let new_row = top_row + new_index as u32;
            let row_offset = new_row as i64 - row.original_row as i64;
            for (col_index, snapshot) in row.cells.iter().enumerate() {
                let destination = location_name(left_col + col_index as u32, new_row);
                changed.insert((lower.clone(), destination.clone()));
                match snapshot {
                    Some((content, CellKind::Formula)) => {
                        let rewritten = references::rewrite_formula_offsets(content, row_offset, 0);
                        changed.extend(self.stage_cell_contents(
                            sheet_name,
                            &destination,
                            Some(&rewritten),
                        )?);
                    }
                    Some((content, _)) => {
                        changed.extend(self.stage_cell_contents(
                            sheet_name,
                            &destination,
                            Some(content),
                        )?);
                    }
                    None => {
                        changed.extend(self.stage_cell_contents(sheet_name, &destination, None)?);
                    }
                }
            }
        }

        self.update_cells(changed.clone(), changed);
        Ok(())
    }
}

fn parse_loc_arg(location: &str) -> Result<(u32, u32), WorkbookError> {
    parse_location(&location.to_uppercase()).ok_or_else(|| {
        WorkbookError::InvalidArgument(format!("Invalid cell location: {location}"))
    })
}

/// One snapshotted row of a region being sorted.
struct SortRow {
    original_row: u32,
    keys: Vec<CellValue>,
    cells: Vec<Option<(String, CellKind)>>,
}

fn compare_rows(a: &SortRow, b: &SortRow, sort_cols: &[i32]) -> Ordering {
    for &col in sort_cols {
        let index = (col.unsigned_abs() as usize) - 1;
        let ascending = col > 0;
        let ord = compare_sort_values(&a.keys[index], &b.keys[index], ascending);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Sort-key ordering: blanks first, then errors (by kind), then values.
/// Same-type values compare naturally (text case-sensitively here); mixed
/// types fall back to their canonical text forms. Descending columns see
/// everything reversed.
fn compare_sort_values(a: &CellValue, b: &CellValue, ascending: bool) -> Ordering {
    let a_blank = is_blank(a);
    let b_blank = is_blank(b);
    if a_blank && b_blank {
        return Ordering::Equal;
    }
    if a_blank {
        return directed(Ordering::Less, ascending);
    }
    if b_blank {
        return directed(Ordering::Greater, ascending);
    }

    match (a, b) {
        (CellValue::Error(x), CellValue::Error(y)) => directed(x.kind.cmp(&y.kind), ascending),
        (CellValue::Error(_), _) => directed(Ordering::Less, ascending),
        (_, CellValue::Error(_)) => directed(Ordering::Greater, ascending),
        (CellValue::Number(x), CellValue::Number(y)) => directed(x.cmp(y), ascending),
        (CellValue::Text(x), CellValue::Text(y)) => directed(x.cmp(y), ascending),
        (CellValue::Boolean(x), CellValue::Boolean(y)) => directed(x.cmp(y), ascending),
        _ => directed(sort_text(a).cmp(&sort_text(b)), ascending),
    }
}

fn is_blank(value: &CellValue) -> bool {
    match value {
        CellValue::Empty => true,
        CellValue::Text(s) => s.is_empty(),
        _ => false,
    }
}

fn directed(ord: Ordering, ascending: bool) -> Ordering {
    if ascending {
        ord
    } else {
        ord.reverse()
    }
}

fn sort_text(value: &CellValue) -> String {
    match value {
        CellValue::Empty => String::new(),
        CellValue::Number(n) => crate::cell::canonicalize(*n).to_string(),
        CellValue::Text(s) => s.clone(),
        CellValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        CellValue::Error(e) => e.kind.as_literal().to_string(),
    }
}
