use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellValue, SpillError, SpillInfo};
use crate::formula::error::EvalError;
use crate::formula::eval::{
    self, CellLookup, EvalContext, EvalResult, FPayload, Matrix, Value,
};
use crate::formula::registry::FunctionRegistry;
use crate::locale::Locale;

// Cells currently being evaluated, for cycle detection. Thread-local because
// evaluation is synchronous and re-entrant within one thread.
thread_local! {
    static EVALUATING: RefCell<HashSet<(usize, usize)>> = RefCell::new(HashSet::new());
}

fn default_registry() -> Arc<FunctionRegistry> {
    Arc::new(FunctionRegistry::with_builtins())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    cells: FxHashMap<(usize, usize), Cell>,
    pub rows: usize,
    pub cols: usize,
    pub locale: Locale,
    #[serde(skip, default = "default_registry")]
    registry: Arc<FunctionRegistry>,
    /// Payloads spilled into receiver cells, keyed (row, col). Rebuilt on
    /// recompute, never serialized.
    #[serde(skip)]
    spill_values: FxHashMap<(usize, usize), FPayload>,
}

impl CellLookup for Sheet {
    fn get_payload(&self, row: usize, col: usize) -> FPayload {
        let in_cycle = EVALUATING.with(|e| e.borrow().contains(&(row, col)));
        if in_cycle {
            return FPayload::from_error(&EvalError::circular());
        }

        // Receiver cells resolve to their spilled payload, so =B2 works when
        // B2 only holds spill data.
        if let Some(spilled) = self.spill_values.get(&(row, col)) {
            return spilled.clone();
        }

        match self.cells.get(&(row, col)) {
            Some(cell) => self.cell_payload(row, col, cell),
            None => FPayload::default(),
        }
    }

    fn bounds(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

impl Sheet {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            name: String::from("Sheet1"),
            cells: FxHashMap::default(),
            rows,
            cols,
            locale: Locale::default(),
            registry: default_registry(),
            spill_values: FxHashMap::default(),
        }
    }

    pub fn with_registry(rows: usize, cols: usize, registry: Arc<FunctionRegistry>) -> Self {
        Self { registry, ..Self::new(rows, cols) }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn set_value(&mut self, row: usize, col: usize, input: &str) {
        self.clear_spill_from(row, col);

        let locale = self.locale.clone();
        let cell = self.cells.entry((row, col)).or_insert_with(Cell::new);
        cell.set(input, &locale);

        self.evaluate_and_spill(row, col);
    }

    fn eval_context(&self, row: usize, col: usize) -> EvalContext {
        EvalContext { locale: self.locale.clone(), origin_cell: Some((col, row)) }
    }

    fn cell_payload(&self, row: usize, col: usize, cell: &Cell) -> FPayload {
        let payload = match &cell.value {
            CellValue::Empty => FPayload::default(),
            CellValue::Number(n) => FPayload::number(*n),
            CellValue::Text(s) => FPayload::text(s.clone()),
            CellValue::Formula { ast: Some(ast), .. } => {
                EVALUATING.with(|e| e.borrow_mut().insert((row, col)));
                let result = eval::evaluate_ast(
                    ast,
                    &self.registry,
                    self,
                    &self.eval_context(row, col),
                );
                EVALUATING.with(|e| e.borrow_mut().remove(&(row, col)));
                result.into_payload()
            }
            CellValue::Formula { ast: None, source } => {
                FPayload::from_error(&EvalError::bad_expr(format!("Cannot parse '{source}'")))
            }
        };
        FPayload { format: payload.format.or_else(|| cell.format.clone()), ..payload }
    }

    /// Re-evaluate a cell's formula and spill the result when it is a
    /// matrix. A blocked rectangle records `SpillError` on the anchor.
    fn evaluate_and_spill(&mut self, row: usize, col: usize) {
        let ast = match self.cells.get(&(row, col)) {
            Some(cell) => match &cell.value {
                CellValue::Formula { ast: Some(ast), .. } => ast.clone(),
                _ => return,
            },
            None => return,
        };

        let result =
            eval::evaluate_ast(&ast, &self.registry, self, &self.eval_context(row, col));

        if let EvalResult::Matrix(matrix) = result {
            match self.check_spill_collision(row, col, matrix.rows(), matrix.cols()) {
                Ok(()) => {
                    self.apply_spill(row, col, &matrix);
                }
                Err(blocked_by) => {
                    if let Some(cell) = self.cells.get_mut(&(row, col)) {
                        cell.spill_info = None;
                        cell.spill_error = Some(SpillError { blocked_by });
                    }
                }
            }
        }
    }

    // =========================================================================
    // Spill management
    // =========================================================================

    /// Remove all spill data anchored at the given cell.
    pub fn clear_spill_from(&mut self, parent_row: usize, parent_col: usize) {
        let spill_info = match self.cells.get(&(parent_row, parent_col)) {
            Some(cell) => cell.spill_info.clone(),
            None => return,
        };

        if let Some(info) = spill_info {
            for dr in 0..info.rows {
                for dc in 0..info.cols {
                    if dr == 0 && dc == 0 {
                        continue;
                    }
                    let r = parent_row + dr;
                    let c = parent_col + dc;

                    self.spill_values.remove(&(r, c));
                    if let Some(cell) = self.cells.get_mut(&(r, c)) {
                        if cell.spill_parent == Some((parent_row, parent_col)) {
                            cell.spill_parent = None;
                        }
                    }
                }
            }

            if let Some(cell) = self.cells.get_mut(&(parent_row, parent_col)) {
                cell.spill_info = None;
            }
        }
    }

    /// Check whether a rows x cols rectangle anchored at the given cell can
    /// spill. Err carries the position of the first blocking cell.
    pub fn check_spill_collision(
        &self,
        parent_row: usize,
        parent_col: usize,
        rows: usize,
        cols: usize,
    ) -> Result<(), (usize, usize)> {
        for dr in 0..rows {
            for dc in 0..cols {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let r = parent_row + dr;
                let c = parent_col + dc;

                if let Some(cell) = self.cells.get(&(r, c)) {
                    let is_our_receiver = cell.spill_parent == Some((parent_row, parent_col));
                    if !is_our_receiver {
                        if !matches!(cell.value, CellValue::Empty) {
                            return Err((r, c));
                        }
                        // Receiving spill from a different anchor also blocks
                        if cell.spill_parent.is_some() {
                            return Err((r, c));
                        }
                    }
                }

                if self.spill_values.contains_key(&(r, c)) {
                    match self.cells.get(&(r, c)) {
                        Some(cell) if cell.spill_parent == Some((parent_row, parent_col)) => {}
                        _ => return Err((r, c)),
                    }
                }
            }
        }
        Ok(())
    }

    /// Write a matrix result into the sheet: the anchor keeps its formula
    /// and gains `SpillInfo`; every other cell of the rectangle receives the
    /// payload (Empty payloads included, so provenance survives).
    pub fn apply_spill(&mut self, parent_row: usize, parent_col: usize, matrix: &Matrix) -> bool {
        let rows = matrix.rows();
        let cols = matrix.cols();

        if self.check_spill_collision(parent_row, parent_col, rows, cols).is_err() {
            return false;
        }

        self.clear_spill_from(parent_row, parent_col);

        for dr in 0..rows {
            for dc in 0..cols {
                let r = parent_row + dr;
                let c = parent_col + dc;
                let payload = matrix.get(dr, dc).cloned().unwrap_or_default();

                if dr == 0 && dc == 0 {
                    let cell = self.cells.entry((r, c)).or_insert_with(Cell::new);
                    cell.spill_info = Some(SpillInfo { rows, cols });
                    cell.spill_error = None;
                } else {
                    self.spill_values.insert((r, c), payload);
                    let cell = self.cells.entry((r, c)).or_insert_with(Cell::new);
                    cell.spill_parent = Some((parent_row, parent_col));
                }
            }
        }

        true
    }

    pub fn get_spill_value(&self, row: usize, col: usize) -> Option<&FPayload> {
        self.spill_values.get(&(row, col))
    }

    pub fn is_spill_receiver(&self, row: usize, col: usize) -> bool {
        self.cells.get(&(row, col)).map(|c| c.is_spill_receiver()).unwrap_or(false)
    }

    pub fn is_spill_parent(&self, row: usize, col: usize) -> bool {
        self.cells.get(&(row, col)).map(|c| c.is_spill_parent()).unwrap_or(false)
    }

    pub fn get_spill_info(&self, row: usize, col: usize) -> Option<SpillInfo> {
        self.cells.get(&(row, col)).and_then(|c| c.spill_info.clone())
    }

    pub fn has_spill_error(&self, row: usize, col: usize) -> bool {
        self.cells.get(&(row, col)).map(|c| c.has_spill_error()).unwrap_or(false)
    }

    // =========================================================================
    // Display and access
    // =========================================================================

    /// Rendered text of a cell. Spilled Empty payloads render blank even
    /// though they read as 0 through `CellLookup`.
    pub fn get_display(&self, row: usize, col: usize) -> String {
        if let Some(cell) = self.cells.get(&(row, col)) {
            if cell.spill_error.is_some() {
                return "#SPILL!".to_string();
            }
        }
        match self.get_payload(row, col).value {
            Value::Empty => String::new(),
            other => other.to_text(),
        }
    }

    /// The format tag in effect at a position: a spilled payload's format
    /// wins over the cell's own.
    pub fn get_format_at(&self, row: usize, col: usize) -> Option<String> {
        if let Some(spilled) = self.spill_values.get(&(row, col)) {
            if spilled.format.is_some() {
                return spilled.format.clone();
            }
        }
        self.cells.get(&(row, col)).and_then(|c| c.format.clone())
    }

    pub fn get_raw(&self, row: usize, col: usize) -> String {
        self.cells.get(&(row, col)).map(|c| c.value.raw_display()).unwrap_or_default()
    }

    pub fn get_cell(&self, row: usize, col: usize) -> Cell {
        self.cells.get(&(row, col)).cloned().unwrap_or_default()
    }

    pub fn set_format(&mut self, row: usize, col: usize, format: Option<String>) {
        let cell = self.cells.entry((row, col)).or_insert_with(Cell::new);
        cell.format = format;
    }

    /// Remove a cell entirely, spill data included.
    pub fn clear_cell(&mut self, row: usize, col: usize) {
        self.clear_spill_from(row, col);
        self.cells.remove(&(row, col));
        self.spill_values.remove(&(row, col));
    }

    pub fn cells_iter(&self) -> impl Iterator<Item = (&(usize, usize), &Cell)> {
        self.cells.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sheet_is_debuggable() {
        // The registry rides inside the sheet; both must format
        let mut sheet = Sheet::new(4, 4);
        sheet.set_value(0, 0, "=SUM(1,2)");
        let dump = format!("{sheet:?}");
        assert!(dump.contains("Sheet1"));
    }

    #[test]
    fn test_scalar_formula_no_spill() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 0, "=1+2");
        assert_eq!(sheet.get_display(0, 0), "3");
        assert!(!sheet.is_spill_parent(0, 0));
    }

    #[test]
    fn test_transpose_spills_horizontally() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 0, "1");
        sheet.set_value(1, 0, "2");
        sheet.set_value(2, 0, "3");

        sheet.set_value(0, 2, "=TRANSPOSE(A1:A3)");

        assert_eq!(sheet.get_display(0, 2), "1");
        assert_eq!(sheet.get_display(0, 3), "2");
        assert_eq!(sheet.get_display(0, 4), "3");

        assert!(sheet.is_spill_parent(0, 2));
        assert!(!sheet.is_spill_receiver(0, 2));
        assert!(sheet.is_spill_receiver(0, 3));
        assert!(sheet.is_spill_receiver(0, 4));
        assert_eq!(sheet.get_spill_info(0, 2), Some(SpillInfo { rows: 1, cols: 3 }));
    }

    #[test]
    fn test_blocked_spill_shows_error_on_anchor_only() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 1, "1");
        sheet.set_value(0, 2, "2");
        sheet.set_value(0, 3, "3");
        sheet.set_value(1, 0, "blocker");

        // TOCOL needs A1:A3; A2 is taken
        sheet.set_value(0, 0, "=TOCOL(B1:D1)");

        assert!(sheet.has_spill_error(0, 0));
        assert_eq!(sheet.get_display(0, 0), "#SPILL!");
        assert_eq!(sheet.get_display(1, 0), "blocker");
        assert!(!sheet.is_spill_receiver(2, 0));
    }

    #[test]
    fn test_spill_cleared_when_formula_replaced() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 1, "1");
        sheet.set_value(0, 2, "2");
        sheet.set_value(0, 3, "3");
        sheet.set_value(0, 0, "=TOCOL(B1:D1)");

        assert!(sheet.is_spill_parent(0, 0));
        assert!(sheet.is_spill_receiver(1, 0));

        sheet.set_value(0, 0, "42");

        assert!(!sheet.is_spill_parent(0, 0));
        assert!(!sheet.is_spill_receiver(1, 0));
        assert_eq!(sheet.get_display(0, 0), "42");
        assert_eq!(sheet.get_display(1, 0), "");
    }

    #[test]
    fn test_spill_shrink_clears_stale_receivers() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 1, "1");
        sheet.set_value(0, 2, "2");
        sheet.set_value(0, 3, "3");

        sheet.set_value(0, 0, "=TOCOL(B1:D1)");
        assert_eq!(sheet.get_display(2, 0), "3");
        assert!(sheet.is_spill_receiver(2, 0));

        sheet.set_value(0, 0, "=TOCOL(B1:C1)");
        assert_eq!(sheet.get_display(1, 0), "2");
        assert_eq!(sheet.get_display(2, 0), "");
        assert!(!sheet.is_spill_receiver(2, 0));
    }

    #[test]
    fn test_references_resolve_through_spill_receivers() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 1, "1");
        sheet.set_value(0, 2, "2");
        sheet.set_value(0, 3, "3");
        sheet.set_value(0, 0, "=TOCOL(B1:D1)");

        sheet.set_value(0, 4, "=A2+A3");
        assert_eq!(sheet.get_display(0, 4), "5");

        sheet.set_value(1, 4, "=SUM(A1:A3)");
        assert_eq!(sheet.get_display(1, 4), "6");
    }

    #[test]
    fn test_spilled_empty_reads_zero_renders_blank() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 3, "7");
        // D2 left untouched; TOCOL(D1:D2) spills [7, Empty] into C1:C2
        sheet.set_value(0, 2, "=TOCOL(D1:D2)");

        assert!(sheet.is_spill_receiver(1, 2));
        assert_eq!(sheet.get_display(1, 2), "");
        assert_eq!(sheet.get_spill_value(1, 2).map(|p| p.value.clone()), Some(Value::Empty));

        sheet.set_value(0, 4, "=C2+1");
        assert_eq!(sheet.get_display(0, 4), "1");
    }

    #[test]
    fn test_spill_carries_source_formats() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 1, "5");
        sheet.set_format(0, 1, Some("currency".to_string()));

        sheet.set_value(2, 0, "=TRANSPOSE(B1:B1)");
        // 1x1 matrix result: anchor only, but the payload keeps the format
        assert!(sheet.is_spill_parent(2, 0));
        assert_eq!(sheet.get_payload(2, 0).format, Some("currency".to_string()));

        sheet.set_value(4, 0, "=EXPAND(B1:B1, 1, 2)");
        assert_eq!(sheet.get_format_at(4, 1), None);
        assert_eq!(sheet.get_spill_value(4, 1).map(|p| p.value.clone()), Some(Value::Number(0.0)));
        assert_eq!(sheet.get_format_at(4, 0), None);
        assert_eq!(sheet.get_payload(4, 0).format, Some("currency".to_string()));
    }

    #[test]
    fn test_circular_reference_detected() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 0, "=A1+1");
        assert_eq!(sheet.get_display(0, 0), "#CIRC!");
    }

    #[test]
    fn test_unparseable_formula_is_bad_expr() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 0, "=SUM(1,");
        assert_eq!(sheet.get_display(0, 0), "#BAD_EXPR");
        assert_eq!(sheet.get_raw(0, 0), "=SUM(1,");
    }

    #[test]
    fn test_clear_cell_removes_spill() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(0, 1, "1");
        sheet.set_value(0, 2, "2");
        sheet.set_value(0, 0, "=TOCOL(B1:C1)");
        assert!(sheet.is_spill_receiver(1, 0));

        sheet.clear_cell(0, 0);
        assert_eq!(sheet.get_display(0, 0), "");
        assert_eq!(sheet.get_display(1, 0), "");
        assert!(!sheet.is_spill_receiver(1, 0));
    }

    #[test]
    fn test_origin_cell_reaches_meta_functions() {
        let mut sheet = Sheet::new(10, 10);
        sheet.set_value(4, 2, "=ROW()+COLUMN()");
        // Row 5 + column 3, 1-based
        assert_eq!(sheet.get_display(4, 2), "8");
    }
}
