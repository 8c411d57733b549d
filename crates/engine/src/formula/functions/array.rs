// Array shape builtins: selection, stacking, flattening and wrapping.
// Every output cell keeps the payload (value + format) of whichever source
// cell contributed it; pad values injected by the function itself carry no
// format unless the pad argument did.

use crate::formula::args::arg;
use crate::formula::error::{EvalError, RegistrationError};
use crate::formula::eval::{EvalContext, EvalResult, FPayload, Matrix};
use crate::formula::registry::FunctionRegistry;
use crate::formula::sanitize::Arg;

use super::{
    dimension_value, index_values, pad_payload, resolve_index, vector_cells, MAX_RESULT_CELLS,
};

pub fn register(registry: &mut FunctionRegistry) -> Result<(), RegistrationError> {
    registry.register(
        "CHOOSECOLS",
        "Creates a new array from the selected columns in the existing range.",
        vec![
            arg("range (range)", "The array that contains the columns to be returned."),
            arg("col (number, range<number>)", "First column index (1-based, negative counts from the end)."),
            arg("cols (number, range<number>, optional, repeating)", "Additional column indices."),
        ],
        choosecols,
    )?;
    registry.register(
        "CHOOSEROWS",
        "Creates a new array from the selected rows in the existing range.",
        vec![
            arg("range (range)", "The array that contains the rows to be returned."),
            arg("row (number, range<number>)", "First row index (1-based, negative counts from the end)."),
            arg("rows (number, range<number>, optional, repeating)", "Additional row indices."),
        ],
        chooserows,
    )?;
    registry.register(
        "EXPAND",
        "Expands or pads an array to specified row and column dimensions.",
        vec![
            arg("range (range)", "The array to expand."),
            arg("rows (number)", "The number of rows in the expanded array."),
            arg("columns (number, optional)", "The number of columns in the expanded array."),
            arg("pad_with (any, optional)", "The value with which to pad (defaults to 0)."),
        ],
        expand,
    )?;
    registry.register(
        "FLATTEN",
        "Flattens a range into a single column.",
        vec![
            arg("range (range)", "The range to flatten."),
            arg("scan_by_column (boolean, optional)", "Scan column-first instead of row-first."),
        ],
        flatten,
    )?;
    registry.register(
        "HSTACK",
        "Appends ranges horizontally and in sequence to return a larger array.",
        vec![
            arg("range1 (range)", "The first range."),
            arg("range2 (range, optional, repeating)", "Additional ranges to append."),
        ],
        hstack,
    )?;
    registry.register(
        "VSTACK",
        "Appends ranges vertically and in sequence to return a larger array.",
        vec![
            arg("range1 (range)", "The first range."),
            arg("range2 (range, optional, repeating)", "Additional ranges to append."),
        ],
        vstack,
    )?;
    registry.register(
        "TOROW",
        "Transforms a range into a single row.",
        vec![
            arg("range (range)", "The range to transform."),
            arg("ignore (number, optional, default=0)", "0: keep all, 1: drop blanks, 2: drop errors, 3: drop both."),
            arg("scan_by_column (boolean, optional)", "Scan column-first instead of row-first."),
        ],
        torow,
    )?;
    registry.register(
        "TOCOL",
        "Transforms a range into a single column.",
        vec![
            arg("range (range)", "The range to transform."),
            arg("ignore (number, optional, default=0)", "0: keep all, 1: drop blanks, 2: drop errors, 3: drop both."),
            arg("scan_by_column (boolean, optional)", "Scan column-first instead of row-first."),
        ],
        tocol,
    )?;
    registry.register(
        "TRANSPOSE",
        "Transposes the rows and columns of a range.",
        vec![arg("range (range)", "The range to transpose.")],
        transpose,
    )?;
    registry.register(
        "WRAPROWS",
        "Wraps a row or column of values into rows of the given width.",
        vec![
            arg("range (range)", "The single-row or single-column range to wrap."),
            arg("wrap_count (number)", "The maximum number of cells per row."),
            arg("pad_with (any, optional)", "The value with which to fill the last row (defaults to 0)."),
        ],
        wraprows,
    )?;
    registry.register(
        "WRAPCOLS",
        "Wraps a row or column of values into columns of the given height.",
        vec![
            arg("range (range)", "The single-row or single-column range to wrap."),
            arg("wrap_count (number)", "The maximum number of cells per column."),
            arg("pad_with (any, optional)", "The value with which to fill the last column (defaults to 0)."),
        ],
        wrapcols,
    )?;
    Ok(())
}

/// Index arguments flattened in argument order (range-valued index
/// arguments flatten row-first).
fn collect_indices(args: &[Arg]) -> Result<Vec<i64>, EvalError> {
    let mut indices = Vec::new();
    for a in args {
        indices.extend(index_values(a)?);
    }
    Ok(indices)
}

fn choosecols(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let m = args[0].matrix()?;
    let indices = collect_indices(&args[1..])?;
    let mut out = Matrix::new(m.rows(), indices.len());
    for (out_c, index) in indices.iter().enumerate() {
        let src_c = resolve_index(*index, m.cols(), "column")?;
        for r in 0..m.rows() {
            out.set(r, out_c, m.get(r, src_c).cloned().unwrap_or_default());
        }
    }
    Ok(EvalResult::Matrix(out))
}

fn chooserows(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let m = args[0].matrix()?;
    let indices = collect_indices(&args[1..])?;
    let mut out = Matrix::new(indices.len(), m.cols());
    for (out_r, index) in indices.iter().enumerate() {
        let src_r = resolve_index(*index, m.rows(), "row")?;
        for c in 0..m.cols() {
            out.set(out_r, c, m.get(src_r, c).cloned().unwrap_or_default());
        }
    }
    Ok(EvalResult::Matrix(out))
}

fn expand(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let m = args[0].matrix()?;
    let rows = dimension_value(&args[1], "rows")?;
    let cols = match args.get(2) {
        Some(a) if !a.is_missing() => dimension_value(a, "columns")?,
        _ => m.cols(),
    };
    if rows < m.rows() || cols < m.cols() {
        return Err(EvalError::generic(format!(
            "The target dimensions of [[FUNCTION_NAME]] ({rows}x{cols}) must cover the \
             source dimensions ({}x{})",
            m.rows(),
            m.cols()
        )));
    }
    if rows.saturating_mul(cols) > MAX_RESULT_CELLS {
        return Err(EvalError::generic(format!(
            "The target dimensions of [[FUNCTION_NAME]] ({rows}x{cols}) exceed the \
             {MAX_RESULT_CELLS}-cell result limit"
        )));
    }
    // Pad is applied by position, never by cell content: a source cell
    // legitimately holding 0 or FALSE stays untouched.
    let pad = pad_payload(args.get(3));
    let mut out = Matrix::new(rows, cols);
    for r in 0..rows {
        for c in 0..cols {
            let payload = match m.get(r, c) {
                Some(p) => p.clone(),
                None => pad.clone(),
            };
            out.set(r, c, payload);
        }
    }
    Ok(EvalResult::Matrix(out))
}

fn flatten(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let m = args[0].matrix()?;
    let by_column = matches!(args.get(1), Some(a) if !a.is_missing()) && args[1].to_bool()?;
    let cells = m.cells(by_column);
    Ok(EvalResult::Matrix(Matrix::from_rows(
        cells.into_iter().map(|p| vec![p]).collect(),
    )))
}

/// Payload written into stacking gaps when ranges have uneven dimensions.
fn missing_cell() -> FPayload {
    FPayload::from_error(&EvalError::not_available("No value available"))
}

fn stacked_matrices(args: &[Arg]) -> Result<Vec<Matrix>, EvalError> {
    let mut out = Vec::new();
    for a in args {
        if !a.is_missing() {
            out.push(a.matrix()?);
        }
    }
    Ok(out)
}

fn hstack(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let matrices = stacked_matrices(args)?;
    let rows = matrices.iter().map(Matrix::rows).max().unwrap_or(0);
    let cols = matrices.iter().map(Matrix::cols).sum();
    let mut out = Matrix::new(rows, cols);
    let mut col_offset = 0;
    for m in &matrices {
        for r in 0..rows {
            for c in 0..m.cols() {
                let payload = m.get(r, c).cloned().unwrap_or_else(missing_cell);
                out.set(r, col_offset + c, payload);
            }
        }
        col_offset += m.cols();
    }
    Ok(EvalResult::Matrix(out))
}

fn vstack(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let matrices = stacked_matrices(args)?;
    let rows = matrices.iter().map(Matrix::rows).sum();
    let cols = matrices.iter().map(Matrix::cols).max().unwrap_or(0);
    let mut out = Matrix::new(rows, cols);
    let mut row_offset = 0;
    for m in &matrices {
        for r in 0..m.rows() {
            for c in 0..cols {
                let payload = m.get(r, c).cloned().unwrap_or_else(missing_cell);
                out.set(row_offset + r, c, payload);
            }
        }
        row_offset += m.rows();
    }
    Ok(EvalResult::Matrix(out))
}

/// Shared TOROW/TOCOL filtering: the ignore flag drops blanks and/or
/// errors; an empty survivor list is a no-results condition.
fn layout_cells(args: &[Arg]) -> Result<Vec<FPayload>, EvalError> {
    let m = args[0].matrix()?;
    let ignore = match args.get(1) {
        Some(a) if !a.is_missing() => a.to_number()? as i64,
        _ => 0,
    };
    if !(0..=3).contains(&ignore) {
        return Err(EvalError::generic(format!(
            "The ignore argument of [[FUNCTION_NAME]] must be between 0 and 3, got {ignore}"
        )));
    }
    let by_column = matches!(args.get(2), Some(a) if !a.is_missing()) && args[2].to_bool()?;
    let drop_blanks = ignore == 1 || ignore == 3;
    let drop_errors = ignore == 2 || ignore == 3;
    let cells: Vec<FPayload> = m
        .cells(by_column)
        .into_iter()
        .filter(|p| !(drop_blanks && p.is_empty()) && !(drop_errors && p.is_error()))
        .collect();
    if cells.is_empty() {
        return Err(EvalError::not_available(
            "No results for the given arguments of [[FUNCTION_NAME]]",
        ));
    }
    Ok(cells)
}

fn torow(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let cells = layout_cells(args)?;
    Ok(EvalResult::Matrix(Matrix::from_rows(vec![cells])))
}

fn tocol(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let cells = layout_cells(args)?;
    Ok(EvalResult::Matrix(Matrix::from_rows(
        cells.into_iter().map(|p| vec![p]).collect(),
    )))
}

fn transpose(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let m = args[0].matrix()?;
    let mut out = Matrix::new(m.cols(), m.rows());
    for r in 0..m.rows() {
        for c in 0..m.cols() {
            out.set(c, r, m.get(r, c).cloned().unwrap_or_default());
        }
    }
    // A 1x1 source still comes back as a matrix: shape is decided by the
    // result, not by a per-function flag.
    Ok(EvalResult::Matrix(out))
}

fn wrap_setup(args: &[Arg]) -> Result<(Vec<FPayload>, usize, FPayload), EvalError> {
    let cells = vector_cells(&args[0].matrix()?)?;
    let count = dimension_value(&args[1], "wrap_count")?;
    if count < 1 {
        return Err(EvalError::generic(format!(
            "The wrap_count argument of [[FUNCTION_NAME]] must be at least 1, got {count}"
        )));
    }
    Ok((cells, count, pad_payload(args.get(2))))
}

fn wraprows(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let (cells, count, pad) = wrap_setup(args)?;
    let rows = cells.len().div_ceil(count);
    let mut out = Matrix::new(rows, count);
    for slot in 0..rows * count {
        let payload = cells.get(slot).cloned().unwrap_or_else(|| pad.clone());
        out.set(slot / count, slot % count, payload);
    }
    Ok(EvalResult::Matrix(out))
}

fn wrapcols(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let (cells, count, pad) = wrap_setup(args)?;
    let cols = cells.len().div_ceil(count);
    let mut out = Matrix::new(count, cols);
    for slot in 0..count * cols {
        let payload = cells.get(slot).cloned().unwrap_or_else(|| pad.clone());
        out.set(slot % count, slot / count, payload);
    }
    Ok(EvalResult::Matrix(out))
}

#[cfg(test)]
mod tests {
    use crate::formula::error::EvalError;
    use crate::formula::eval::{
        evaluate, CellLookup, EvalContext, EvalResult, FPayload, Value,
    };
    use crate::formula::registry::FunctionRegistry;
    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashMap;

    struct Cells(FxHashMap<(usize, usize), FPayload>);

    impl CellLookup for Cells {
        fn get_payload(&self, row: usize, col: usize) -> FPayload {
            self.0.get(&(row, col)).cloned().unwrap_or_default()
        }
    }

    // A1:B2 holds [[1, 2], [3, 4]]; A3 holds "x" with a format; B3 is blank.
    fn sheet() -> Cells {
        let mut cells = FxHashMap::default();
        cells.insert((0, 0), FPayload::number(1.0));
        cells.insert((0, 1), FPayload::number(2.0));
        cells.insert((1, 0), FPayload::number(3.0));
        cells.insert((1, 1), FPayload::number(4.0));
        cells.insert(
            (2, 0),
            FPayload::with_format(Value::Text("x".to_string()), Some("bold".to_string())),
        );
        Cells(cells)
    }

    fn eval(formula: &str) -> EvalResult {
        let registry = FunctionRegistry::with_builtins();
        evaluate(formula, &registry, &sheet(), &EvalContext::default())
    }

    fn numbers(result: EvalResult) -> Vec<Vec<Value>> {
        let m = result.into_matrix();
        (0..m.rows())
            .map(|r| {
                (0..m.cols())
                    .map(|c| m.get(r, c).cloned().unwrap_or_default().value)
                    .collect()
            })
            .collect()
    }

    fn n(v: f64) -> Value {
        Value::Number(v)
    }

    #[test]
    fn test_choosecols_selection_and_negative_index() {
        assert_eq!(
            numbers(eval("=CHOOSECOLS(A1:B2, 2, 1)")),
            vec![vec![n(2.0), n(1.0)], vec![n(4.0), n(3.0)]]
        );
        assert_eq!(
            numbers(eval("=CHOOSECOLS(A1:B2, -1)")),
            vec![vec![n(2.0)], vec![n(4.0)]]
        );
    }

    #[test]
    fn test_choosecols_rejects_zero_and_out_of_bounds() {
        assert_eq!(
            eval("=CHOOSECOLS(A1:B2, 0)").into_payload().value,
            Value::Error("#ERROR".to_string())
        );
        assert_eq!(
            eval("=CHOOSECOLS(A1:B2, 3)").into_payload().value,
            Value::Error("#ERROR".to_string())
        );
    }

    #[test]
    fn test_chooserows() {
        assert_eq!(
            numbers(eval("=CHOOSEROWS(A1:B2, -1, 1)")),
            vec![vec![n(3.0), n(4.0)], vec![n(1.0), n(2.0)]]
        );
    }

    #[test]
    fn test_expand_pads_and_keeps_formats() {
        let m = eval("=EXPAND(A1:B2, 3, 3, 66)").into_matrix();
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 3);
        assert_eq!(m.get(0, 0).map(|p| p.value.clone()), Some(n(1.0)));
        assert_eq!(m.get(2, 2).map(|p| p.value.clone()), Some(n(66.0)));
        assert_eq!(m.get(0, 2).map(|p| p.value.clone()), Some(n(66.0)));

        let m = eval("=EXPAND(A3:A3, 2, 2)").into_matrix();
        // Source formats ride along; missing pad defaults to 0
        assert_eq!(m.get(0, 0).and_then(|p| p.format.clone()), Some("bold".to_string()));
        assert_eq!(m.get(1, 1).map(|p| p.value.clone()), Some(n(0.0)));
    }

    #[test]
    fn test_expand_too_small_errors() {
        assert_eq!(
            eval("=EXPAND(A1:B2, 1, 1)").into_payload().value,
            Value::Error("#ERROR".to_string())
        );
    }

    #[test]
    fn test_expand_rejects_oversized_dimensions() {
        // Absurd targets error out before any matrix is built
        assert_eq!(
            eval("=EXPAND(A1:B2, 1e300, 1e300)").into_payload().value,
            Value::Error("#ERROR".to_string())
        );
        assert_eq!(
            eval("=EXPAND(A1:B2, 100000, 100000)").into_payload().value,
            Value::Error("#ERROR".to_string())
        );
    }

    #[test]
    fn test_expand_error_pad_passes_through() {
        let m = eval("=EXPAND(A1:B2, 3, 2, 1/0)").into_matrix();
        assert_eq!(
            m.get(2, 0).map(|p| p.value.clone()),
            Some(Value::Error("#DIV/0!".to_string()))
        );
    }

    #[test]
    fn test_flatten_scan_order() {
        assert_eq!(
            numbers(eval("=FLATTEN(A1:B2)")),
            vec![vec![n(1.0)], vec![n(2.0)], vec![n(3.0)], vec![n(4.0)]]
        );
        assert_eq!(
            numbers(eval("=FLATTEN(A1:B2, TRUE)")),
            vec![vec![n(1.0)], vec![n(3.0)], vec![n(2.0)], vec![n(4.0)]]
        );
    }

    #[test]
    fn test_hstack_vstack_pad_with_na() {
        let m = eval("=HSTACK(A1:A2, A1:B1)").into_matrix();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 3);
        assert_eq!(
            m.get(1, 1).map(|p| p.value.clone()),
            Some(Value::Error("#N/A".to_string()))
        );

        let m = eval("=VSTACK(A1:B1, A1:A2)").into_matrix();
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 2);
        assert_eq!(m.get(0, 1).map(|p| p.value.clone()), Some(n(2.0)));
        assert_eq!(
            m.get(1, 1).map(|p| p.value.clone()),
            Some(Value::Error("#N/A".to_string()))
        );
    }

    #[test]
    fn test_torow_ignore_flags() {
        assert_eq!(
            numbers(eval("=TOROW(A1:B2)")),
            vec![vec![n(1.0), n(2.0), n(3.0), n(4.0)]]
        );
        // A3:B3 holds one text cell and one blank; ignore=1 drops the blank
        let m = eval("=TOROW(A3:B3, 1)").into_matrix();
        assert_eq!(m.cols(), 1);
        assert_eq!(
            m.top_left().value,
            Value::Text("x".to_string())
        );
        assert_eq!(
            eval("=TOROW(A3:B3, 4)").into_payload().value,
            Value::Error("#ERROR".to_string())
        );
    }

    #[test]
    fn test_torow_everything_filtered_is_not_available() {
        let registry = FunctionRegistry::with_builtins();
        let mut cells = FxHashMap::default();
        cells.insert((0, 0), FPayload::from_error(&EvalError::div_by_zero()));
        let result = evaluate(
            "=TOROW(A1:A2, 3)",
            &registry,
            &Cells(cells),
            &EvalContext::default(),
        );
        assert_eq!(result.into_payload().value, Value::Error("#N/A".to_string()));
    }

    #[test]
    fn test_tocol_column_scan() {
        assert_eq!(
            numbers(eval("=TOCOL(A1:B2, 0, TRUE)")),
            vec![vec![n(1.0)], vec![n(3.0)], vec![n(2.0)], vec![n(4.0)]]
        );
    }

    #[test]
    fn test_transpose() {
        assert_eq!(
            numbers(eval("=TRANSPOSE(A1:B2)")),
            vec![vec![n(1.0), n(3.0)], vec![n(2.0), n(4.0)]]
        );
        // 1x1 stays a matrix result
        assert!(matches!(eval("=TRANSPOSE(A1:A1)"), EvalResult::Matrix(_)));
    }

    #[test]
    fn test_wraprows_wrapcols() {
        assert_eq!(
            numbers(eval("=WRAPROWS(FLATTEN(A1:B2), 3, 9)")),
            vec![vec![n(1.0), n(2.0), n(3.0)], vec![n(4.0), n(9.0), n(9.0)]]
        );
        assert_eq!(
            numbers(eval("=WRAPCOLS(FLATTEN(A1:B2), 3)")),
            vec![vec![n(1.0), n(4.0)], vec![n(2.0), n(0.0)], vec![n(3.0), n(0.0)]]
        );
    }

    #[test]
    fn test_wraprows_rejects_two_dimensional_source() {
        assert_eq!(
            eval("=WRAPROWS(A1:B2, 2)").into_payload().value,
            Value::Error("#ERROR".to_string())
        );
        assert_eq!(
            eval("=WRAPROWS(A1:B1, 0)").into_payload().value,
            Value::Error("#ERROR".to_string())
        );
    }

    #[test]
    fn test_wrap_count_is_bounded() {
        assert_eq!(
            eval("=WRAPROWS(A1:B1, 1e300)").into_payload().value,
            Value::Error("#ERROR".to_string())
        );
        assert_eq!(
            eval("=WRAPCOLS(A1:B1, 1e300)").into_payload().value,
            Value::Error("#ERROR".to_string())
        );
    }
}
