use serde::{Deserialize, Serialize};

use crate::formula::eval::format_number;
use crate::formula::parser::{self, Expr};
use crate::locale::Locale;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    #[serde(skip)]
    Formula { source: String, ast: Option<Expr> },
}

impl CellValue {
    /// Classify raw user input. A leading `=` makes a formula (kept verbatim
    /// as `source` even when it does not parse), numeric text a number,
    /// anything else text.
    pub fn from_input(input: &str, locale: &Locale) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return CellValue::Empty;
        }

        if trimmed.starts_with('=') {
            let ast = parser::parse(trimmed, locale).ok();
            return CellValue::Formula { source: trimmed.to_string(), ast };
        }

        if let Ok(num) = trimmed.parse::<f64>() {
            return CellValue::Number(num);
        }

        CellValue::Text(trimmed.to_string())
    }

    /// The text shown in the formula bar: formulas show their source.
    pub fn raw_display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Formula { source, .. } => source.clone(),
        }
    }
}

/// Marks a cell whose array result occupies a rectangle of neighbors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpillInfo {
    /// Dimensions of the spilled rectangle, anchor included.
    pub rows: usize,
    pub cols: usize,
}

/// An array result that could not spill; the anchor renders `#SPILL!`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpillError {
    /// The (row, col) of the first cell blocking the rectangle.
    pub blocked_by: (usize, usize),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cell {
    pub value: CellValue,
    /// Opaque format tag carried into evaluated payloads.
    pub format: Option<String>,
    /// Set on cells receiving spill data: the (row, col) of the anchor.
    #[serde(skip)]
    pub spill_parent: Option<(usize, usize)>,
    /// Set on the anchor of a successful spill.
    #[serde(skip)]
    pub spill_info: Option<SpillInfo>,
    /// Set on the anchor of a blocked spill.
    #[serde(skip)]
    pub spill_error: Option<SpillError>,
}

impl Cell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cell's content. Spill state is cleared; the sheet
    /// re-derives it on the next recompute.
    pub fn set(&mut self, input: &str, locale: &Locale) {
        self.value = CellValue::from_input(input, locale);
        self.spill_parent = None;
        self.spill_info = None;
        self.spill_error = None;
    }

    pub fn is_spill_receiver(&self) -> bool {
        self.spill_parent.is_some()
    }

    pub fn is_spill_parent(&self) -> bool {
        self.spill_info.is_some()
    }

    pub fn has_spill_error(&self) -> bool {
        self.spill_error.is_some()
    }
}
