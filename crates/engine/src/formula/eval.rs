// Formula evaluator - value model, reference resolution and operator
// semantics. Function calls are dispatched through the registry after the
// argument sanitizer has coerced raw values to the declared contract.

use crate::formula::args::ArgType;
use crate::formula::error::{ErrorCode, EvalError};
use crate::formula::parser::{self, Expr, Op};
use crate::formula::registry::FunctionRegistry;
use crate::formula::sanitize::{self, Arg};
use crate::locale::Locale;

// =============================================================================
// Value: the scalar primitive for all cell values
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Error literal, e.g. "#DIV/0!"
    Error(String),
}

impl Value {
    pub fn to_number(&self) -> Result<f64, EvalError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) if s.is_empty() => Ok(0.0),
            Value::Text(s) => s
                .parse::<f64>()
                .map_err(|_| EvalError::generic(format!("Cannot convert '{s}' to number"))),
            Value::Empty => Ok(0.0),
            Value::Error(e) => Err(EvalError::new(ErrorCode::from_literal(e), e.clone())),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Empty => String::new(),
            Value::Error(e) => e.clone(),
        }
    }

    pub fn to_bool(&self) -> Result<bool, EvalError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            Value::Text(s) => {
                if s.eq_ignore_ascii_case("TRUE") {
                    Ok(true)
                } else if s.eq_ignore_ascii_case("FALSE") || s.is_empty() {
                    Ok(false)
                } else {
                    Err(EvalError::generic(format!("Cannot convert '{s}' to boolean")))
                }
            }
            Value::Empty => Ok(false),
            Value::Error(e) => Err(EvalError::new(ErrorCode::from_literal(e), e.clone())),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// =============================================================================
// FPayload: value + format, the atomic evaluated unit
// =============================================================================

/// An evaluated cell payload: the value, the format riding along with it
/// (source-cell formats propagate through array functions), and for error
/// values the full human-readable message (`value` then holds the literal).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FPayload {
    pub value: Value,
    pub format: Option<String>,
    pub error: Option<String>,
}

impl FPayload {
    pub fn new(value: Value) -> Self {
        Self { value, format: None, error: None }
    }

    pub fn with_format(value: Value, format: Option<String>) -> Self {
        Self { value, format, error: None }
    }

    pub fn from_error(err: &EvalError) -> Self {
        Self {
            value: Value::Error(err.code.literal().to_string()),
            format: None,
            error: Some(err.message.clone()),
        }
    }

    pub fn number(n: f64) -> Self {
        Self::new(Value::Number(n))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::new(Value::Text(s.into()))
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(Value::Boolean(b))
    }

    pub fn is_error(&self) -> bool {
        self.value.is_error()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

// =============================================================================
// Matrix: 2D grid of payloads (dense storage, row-major)
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<FPayload>,
    rows: usize,
    cols: usize,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { data: vec![FPayload::default(); rows * cols], rows, cols }
    }

    pub fn from_rows(rows_data: Vec<Vec<FPayload>>) -> Self {
        if rows_data.is_empty() {
            return Self::new(0, 0);
        }
        let rows = rows_data.len();
        let cols = rows_data[0].len();
        let mut flat = Vec::with_capacity(rows * cols);
        for row in rows_data {
            flat.extend(row);
        }
        Self { data: flat, rows, cols }
    }

    pub fn scalar(payload: FPayload) -> Self {
        Self { data: vec![payload], rows: 1, cols: 1 }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&FPayload> {
        if row < self.rows && col < self.cols {
            Some(&self.data[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn set(&mut self, row: usize, col: usize, payload: FPayload) {
        if row < self.rows && col < self.cols {
            self.data[row * self.cols + col] = payload;
        }
    }

    /// Get the top-left payload (for scalar coercion)
    pub fn top_left(&self) -> FPayload {
        self.get(0, 0).cloned().unwrap_or_default()
    }

    pub fn is_scalar(&self) -> bool {
        self.rows == 1 && self.cols == 1
    }

    /// Cells in reading order: row-first by default, column-first when
    /// `by_column` is set (FLATTEN/TOROW/TOCOL scan flag).
    pub fn cells(&self, by_column: bool) -> Vec<FPayload> {
        let mut out = Vec::with_capacity(self.rows * self.cols);
        if by_column {
            for c in 0..self.cols {
                for r in 0..self.rows {
                    out.push(self.data[r * self.cols + c].clone());
                }
            }
        } else {
            out.extend(self.data.iter().cloned());
        }
        out
    }

    pub fn map(&self, f: impl Fn(&FPayload) -> FPayload) -> Matrix {
        Matrix {
            data: self.data.iter().map(f).collect(),
            rows: self.rows,
            cols: self.cols,
        }
    }
}

// =============================================================================
// EvalResult: scalar or matrix, decided by shape alone
// =============================================================================

/// What a formula (or a function's compute) evaluates to. Callers branch on
/// the shape of the result, never on a per-function "is array" flag: several
/// functions return a matrix only conditionally on their inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Scalar(FPayload),
    Matrix(Matrix),
}

impl EvalResult {
    /// Collapse to a single payload (matrix results coerce to top-left).
    pub fn into_payload(self) -> FPayload {
        match self {
            EvalResult::Scalar(p) => p,
            EvalResult::Matrix(m) => m.top_left(),
        }
    }

    /// Widen to a matrix (scalar results become 1x1).
    pub fn into_matrix(self) -> Matrix {
        match self {
            EvalResult::Scalar(p) => Matrix::scalar(p),
            EvalResult::Matrix(m) => m,
        }
    }

    pub fn from_error(err: &EvalError) -> Self {
        EvalResult::Scalar(FPayload::from_error(err))
    }
}

// =============================================================================
// Cell lookup and evaluation context
// =============================================================================

pub trait CellLookup {
    /// Evaluated payload of a cell; empty cells return an Empty payload
    /// (possibly carrying a format).
    fn get_payload(&self, row: usize, col: usize) -> FPayload;

    /// Used extent of the sheet, for whole-column/whole-row references.
    fn bounds(&self) -> (usize, usize) {
        (0, 0)
    }
}

/// An empty sheet; useful for formulas without references.
pub struct NoCells;

impl CellLookup for NoCells {
    fn get_payload(&self, _row: usize, _col: usize) -> FPayload {
        FPayload::default()
    }
}

/// Per-evaluation context handed to every compute implementation.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub locale: Locale,
    /// The cell the formula is written in, letting META-typed argument-less
    /// calls like ROW() resolve. (col, row), 0-based.
    pub origin_cell: Option<(usize, usize)>,
}

// =============================================================================
// Compilation and evaluation
// =============================================================================

/// A parsed, reusable formula.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormula {
    ast: Expr,
}

/// Parse a formula into an evaluable unit. #BAD_EXPR on any syntax error.
pub fn compile(formula: &str, locale: &Locale) -> Result<CompiledFormula, EvalError> {
    Ok(CompiledFormula { ast: parser::parse(formula, locale)? })
}

impl CompiledFormula {
    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Evaluate against a registry and cell lookup. Never fails: evaluation
    /// errors collapse into an error payload for the one cell.
    pub fn evaluate(
        &self,
        registry: &FunctionRegistry,
        lookup: &dyn CellLookup,
        ctx: &EvalContext,
    ) -> EvalResult {
        match eval_expr(&self.ast, registry, lookup, ctx) {
            Ok(result) => result,
            Err(err) => EvalResult::from_error(&err),
        }
    }
}

fn range_to_matrix(
    lookup: &dyn CellLookup,
    start_col: usize,
    start_row: usize,
    end_col: usize,
    end_row: usize,
) -> Matrix {
    let rows = end_row - start_row + 1;
    let cols = end_col - start_col + 1;
    let mut m = Matrix::new(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            m.set(r, c, lookup.get_payload(start_row + r, start_col + c));
        }
    }
    m
}

fn eval_expr(
    expr: &Expr,
    registry: &FunctionRegistry,
    lookup: &dyn CellLookup,
    ctx: &EvalContext,
) -> Result<EvalResult, EvalError> {
    match expr {
        Expr::Number(n) => Ok(EvalResult::Scalar(FPayload::number(*n))),
        Expr::Text(s) => Ok(EvalResult::Scalar(FPayload::text(s.clone()))),
        Expr::Boolean(b) => Ok(EvalResult::Scalar(FPayload::boolean(*b))),
        Expr::Empty => Ok(EvalResult::Scalar(FPayload::default())),
        Expr::CellRef { col, row, .. } => {
            Ok(EvalResult::Scalar(lookup.get_payload(*row, *col)))
        }
        Expr::Range { start_col, start_row, end_col, end_row } => Ok(EvalResult::Matrix(
            range_to_matrix(lookup, *start_col, *start_row, *end_col, *end_row),
        )),
        Expr::ColRange { start_col, end_col } => {
            let (rows, _) = lookup.bounds();
            let end_row = rows.saturating_sub(1);
            Ok(EvalResult::Matrix(range_to_matrix(lookup, *start_col, 0, *end_col, end_row)))
        }
        Expr::RowRange { start_row, end_row } => {
            let (_, cols) = lookup.bounds();
            let end_col = cols.saturating_sub(1);
            Ok(EvalResult::Matrix(range_to_matrix(lookup, 0, *start_row, end_col, *end_row)))
        }
        Expr::BinaryOp { op, left, right } => {
            let lhs = eval_expr(left, registry, lookup, ctx)?.into_payload();
            let rhs = eval_expr(right, registry, lookup, ctx)?.into_payload();
            eval_binary_op(*op, &lhs, &rhs).map(EvalResult::Scalar)
        }
        Expr::Function { name, args } => eval_function(name, args, registry, lookup, ctx),
    }
}

/// Binary operators work on scalars (matrix operands already collapsed to
/// top-left). Errors on either side short-circuit.
fn eval_binary_op(op: Op, lhs: &FPayload, rhs: &FPayload) -> Result<FPayload, EvalError> {
    for side in [lhs, rhs] {
        if let Value::Error(e) = &side.value {
            return Err(EvalError::new(ErrorCode::from_literal(e), e.clone()));
        }
    }

    match op {
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
            let a = lhs.value.to_number()?;
            let b = rhs.value.to_number()?;
            let n = match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div => {
                    if b == 0.0 {
                        return Err(EvalError::div_by_zero());
                    }
                    a / b
                }
                Op::Pow => a.powf(b),
                _ => unreachable!(),
            };
            Ok(FPayload::number(n))
        }
        Op::Concat => Ok(FPayload::text(format!(
            "{}{}",
            lhs.value.to_text(),
            rhs.value.to_text()
        ))),
        Op::Lt | Op::Gt | Op::Eq | Op::LtEq | Op::GtEq | Op::NotEq => {
            let ord = compare_values(&lhs.value, &rhs.value);
            let b = match op {
                Op::Lt => ord == std::cmp::Ordering::Less,
                Op::Gt => ord == std::cmp::Ordering::Greater,
                Op::Eq => ord == std::cmp::Ordering::Equal,
                Op::LtEq => ord != std::cmp::Ordering::Greater,
                Op::GtEq => ord != std::cmp::Ordering::Less,
                Op::NotEq => ord != std::cmp::Ordering::Equal,
                _ => unreachable!(),
            };
            Ok(FPayload::boolean(b))
        }
    }
}

/// Spreadsheet comparison: numbers < text < booleans, text case-insensitive,
/// empty coerces to the other side's zero value.
fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Text(x), Value::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Empty, Value::Empty) => Ordering::Equal,
        (Value::Empty, _) => compare_values(&zero_of(b), b),
        (_, Value::Empty) => compare_values(a, &zero_of(a)),
        // Mixed types order by type rank
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn zero_of(v: &Value) -> Value {
    match v {
        Value::Number(_) => Value::Number(0.0),
        Value::Text(_) => Value::Text(String::new()),
        Value::Boolean(_) => Value::Boolean(false),
        _ => Value::Empty,
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Empty | Value::Number(_) => 0,
        Value::Text(_) => 1,
        Value::Boolean(_) => 2,
        Value::Error(_) => 3,
    }
}

// =============================================================================
// Function dispatch
// =============================================================================

/// Render a reference expression back to its A1-style text, for META args.
fn reference_text(expr: &Expr) -> Option<String> {
    match expr {
        Expr::CellRef { col, row, .. } => Some(parser::cell_name(*col, *row)),
        Expr::Range { start_col, start_row, end_col, end_row } => Some(format!(
            "{}:{}",
            parser::cell_name(*start_col, *start_row),
            parser::cell_name(*end_col, *end_row)
        )),
        Expr::ColRange { start_col, end_col } => Some(format!(
            "{}:{}",
            parser::column_letters(*start_col),
            parser::column_letters(*end_col)
        )),
        Expr::RowRange { start_row, end_row } => {
            Some(format!("{}:{}", start_row + 1, end_row + 1))
        }
        _ => None,
    }
}

fn eval_function(
    name: &str,
    arg_exprs: &[Expr],
    registry: &FunctionRegistry,
    lookup: &dyn CellLookup,
    ctx: &EvalContext,
) -> Result<EvalResult, EvalError> {
    let spec = registry
        .get(name)
        .ok_or_else(|| EvalError::generic(format!("Unknown function {name}")))?;

    // Build raw arguments, honoring each declared slot's shape expectations
    let mut raw_args = Vec::with_capacity(arg_exprs.len());
    for (position, expr) in arg_exprs.iter().enumerate() {
        let def = spec.args.get(spec.meta.arg_to_focus(position));
        let raw = match expr {
            Expr::Empty => Arg::Missing,
            _ if def.is_some_and(|d| d.types.contains(&ArgType::Meta)) => {
                match reference_text(expr) {
                    Some(text) => Arg::Reference(text),
                    None => {
                        return Err(EvalError::generic(format!(
                            "Argument '{}' of [[FUNCTION_NAME]] must be a reference",
                            def.map(|d| d.name.as_str()).unwrap_or("?")
                        ))
                        .named(&spec.name))
                    }
                }
            }
            // A failing argument becomes an error payload; the sanitizer
            // propagates it for typed slots and lets ANY slots accept it
            _ => match eval_expr(expr, registry, lookup, ctx) {
                Ok(EvalResult::Scalar(p)) => Arg::Value(p),
                Ok(EvalResult::Matrix(m)) => Arg::Matrix(m),
                Err(err) => Arg::Value(FPayload::from_error(&err)),
            },
        };
        raw_args.push(raw);
    }

    let coerced = sanitize::sanitize_args(&spec.args, &spec.meta, raw_args)
        .map_err(|e| e.named(&spec.name))?;
    (spec.compute)(&coerced, ctx).map_err(|e| e.named(&spec.name))
}

/// Evaluate an already-parsed expression. The sheet recompute path keeps
/// parsed ASTs on cells and skips re-tokenizing.
pub fn evaluate_ast(
    ast: &Expr,
    registry: &FunctionRegistry,
    lookup: &dyn CellLookup,
    ctx: &EvalContext,
) -> EvalResult {
    match eval_expr(ast, registry, lookup, ctx) {
        Ok(result) => result,
        Err(err) => EvalResult::from_error(&err),
    }
}

/// Convenience: compile and evaluate in one call.
pub fn evaluate(
    formula: &str,
    registry: &FunctionRegistry,
    lookup: &dyn CellLookup,
    ctx: &EvalContext,
) -> EvalResult {
    match compile(formula, &ctx.locale) {
        Ok(unit) => unit.evaluate(registry, lookup, ctx),
        Err(err) => EvalResult::from_error(&err),
    }
}
