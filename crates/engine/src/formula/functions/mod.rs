// Builtin function implementations, grouped by category. Each module
// registers its functions with declared argument contracts; the sanitizer
// guarantees compute sees values already coerced to those contracts.

pub mod array;
pub mod logical;
pub mod math;
pub mod matrix;
pub mod reference;
pub mod text;

use crate::formula::error::{ErrorCode, EvalError, RegistrationError};
use crate::formula::eval::{FPayload, Matrix, Value};
use crate::formula::registry::FunctionRegistry;
use crate::formula::sanitize::Arg;

pub fn register_builtins(registry: &mut FunctionRegistry) -> Result<(), RegistrationError> {
    math::register(registry)?;
    logical::register(registry)?;
    text::register(registry)?;
    reference::register(registry)?;
    array::register(registry)?;
    matrix::register(registry)?;
    Ok(())
}

fn error_of(payload: &FPayload) -> Option<EvalError> {
    match &payload.value {
        Value::Error(e) => Some(EvalError::new(ErrorCode::from_literal(e), e.clone())),
        _ => None,
    }
}

/// Collect the numeric values of a mixed scalar/range argument list.
/// Non-numeric range cells were already degraded to Empty by the sanitizer
/// and are skipped; error cells abort with that error.
pub(crate) fn numeric_values(args: &[Arg]) -> Result<Vec<f64>, EvalError> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Arg::Missing | Arg::Reference(_) => {}
            Arg::Value(p) => {
                if let Some(err) = error_of(p) {
                    return Err(err);
                }
                if !p.is_empty() {
                    out.push(p.value.to_number()?);
                }
            }
            Arg::Matrix(m) => {
                for p in m.cells(false) {
                    if let Some(err) = error_of(&p) {
                        return Err(err);
                    }
                    if let Value::Number(n) = p.value {
                        out.push(n);
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Flatten an index argument (scalar or range, row-first) to integers.
pub(crate) fn index_values(arg: &Arg) -> Result<Vec<i64>, EvalError> {
    let mut out = Vec::new();
    match arg {
        Arg::Missing | Arg::Reference(_) => {}
        Arg::Value(p) => {
            if let Some(err) = error_of(p) {
                return Err(err);
            }
            out.push(p.value.to_number()? as i64);
        }
        Arg::Matrix(m) => {
            for p in m.cells(false) {
                if let Some(err) = error_of(&p) {
                    return Err(err);
                }
                if !p.is_empty() {
                    out.push(p.value.to_number()? as i64);
                }
            }
        }
    }
    Ok(out)
}

/// Ceiling on the number of cells a single function result may hold.
/// Dimension arguments beyond it become errors instead of allocations.
pub(crate) const MAX_RESULT_CELLS: usize = 4_000_000;

/// Decode a dimension argument into a bounded cell count. The range check
/// runs on the f64 so absurd values (1e300, NaN) never reach a cast.
pub(crate) fn dimension_value(arg: &Arg, what: &str) -> Result<usize, EvalError> {
    let n = arg.to_number()?;
    if !(0.0..=MAX_RESULT_CELLS as f64).contains(&n) {
        return Err(EvalError::generic(format!(
            "The {what} argument of [[FUNCTION_NAME]] must be between 0 and {MAX_RESULT_CELLS}, got {n}"
        )));
    }
    Ok(n as usize)
}

/// Resolve a 1-based, possibly negative index against a dimension length.
/// -1 addresses the last element; 0 and out-of-bounds values error.
pub(crate) fn resolve_index(index: i64, len: usize, what: &str) -> Result<usize, EvalError> {
    let len_i = len as i64;
    let resolved = if index > 0 {
        index - 1
    } else if index < 0 {
        len_i + index
    } else {
        return Err(EvalError::generic(format!(
            "The {what} index 0 is invalid for [[FUNCTION_NAME]]; indices are 1-based"
        )));
    };
    if resolved < 0 || resolved >= len_i {
        return Err(EvalError::generic(format!(
            "The {what} index {index} is out of bounds for [[FUNCTION_NAME]] ({len} available)"
        )));
    }
    Ok(resolved as usize)
}

/// Read a numeric grid out of a RANGE<NUMBER>-sanitized matrix: Empty cells
/// count as 0, error cells abort.
pub(crate) fn matrix_numbers(m: &Matrix) -> Result<Vec<Vec<f64>>, EvalError> {
    let mut grid = Vec::with_capacity(m.rows());
    for r in 0..m.rows() {
        let mut row = Vec::with_capacity(m.cols());
        for c in 0..m.cols() {
            let p = m.get(r, c).cloned().unwrap_or_default();
            if let Some(err) = error_of(&p) {
                return Err(err);
            }
            row.push(match p.value {
                Value::Number(n) => n,
                _ => 0.0,
            });
        }
        grid.push(row);
    }
    Ok(grid)
}

/// Require a single-row or single-column source and return its cells in
/// natural order.
pub(crate) fn vector_cells(m: &Matrix) -> Result<Vec<FPayload>, EvalError> {
    if m.rows() != 1 && m.cols() != 1 {
        return Err(EvalError::generic(
            "The range argument of [[FUNCTION_NAME]] must be a single row or a single column",
        ));
    }
    Ok(m.cells(false))
}

/// The pad payload for EXPAND/WRAPROWS/WRAPCOLS: the given value as-is
/// (errors included), or numeric 0 when omitted.
pub(crate) fn pad_payload(arg: Option<&Arg>) -> FPayload {
    match arg {
        Some(Arg::Value(p)) => p.clone(),
        Some(Arg::Matrix(m)) => m.top_left(),
        _ => FPayload::number(0.0),
    }
}
