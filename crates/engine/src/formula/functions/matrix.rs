// Numeric matrix builtins. All of them read their inputs through
// RANGE<NUMBER> contracts, so compute only ever sees numbers, blanks and
// error cells.

use crate::formula::args::arg;
use crate::formula::error::{EvalError, RegistrationError};
use crate::formula::eval::{EvalContext, EvalResult, FPayload, Matrix, Value};
use crate::formula::registry::FunctionRegistry;
use crate::formula::sanitize::Arg;

use super::{error_of, matrix_numbers};

pub fn register(registry: &mut FunctionRegistry) -> Result<(), RegistrationError> {
    registry.register(
        "FREQUENCY",
        "Counts the frequency of data values within given class intervals.",
        vec![
            arg("data (range<number>)", "The values whose frequencies are counted."),
            arg("classes (range<number>)", "The upper bounds of the class intervals."),
        ],
        frequency,
    )?;
    registry.register(
        "MMULT",
        "Matrix product of two ranges.",
        vec![
            arg("matrix1 (range<number>)", "The first matrix."),
            arg("matrix2 (range<number>)", "The second matrix."),
        ],
        mmult,
    )?;
    registry.register(
        "MDETERM",
        "Determinant of a square matrix.",
        vec![arg("square_matrix (range<number>)", "The matrix.")],
        mdeterm,
    )?;
    registry.register(
        "MINVERSE",
        "Inverse of a square matrix.",
        vec![arg("square_matrix (range<number>)", "The matrix.")],
        minverse,
    )?;
    Ok(())
}

/// Numeric cells of a range in scan order; blanks and degraded cells are
/// skipped, error cells abort.
fn numeric_cells(m: &Matrix) -> Result<Vec<f64>, EvalError> {
    let mut out = Vec::new();
    for p in m.cells(false) {
        if let Some(err) = error_of(&p) {
            return Err(err);
        }
        if let Value::Number(n) = p.value {
            out.push(n);
        }
    }
    Ok(out)
}

fn frequency(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let data = numeric_cells(&args[0].matrix()?)?;
    let classes = numeric_cells(&args[1].matrix()?)?;

    // Each datum lands in the smallest class bound >= datum (first
    // occurrence on ties); counts come back in class order with an
    // overflow bucket appended.
    let mut counts = vec![0u32; classes.len() + 1];
    for datum in data {
        let bucket = classes
            .iter()
            .enumerate()
            .filter(|(_, bound)| **bound >= datum)
            .min_by(|(ia, a), (ib, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal).then(ia.cmp(ib)))
            .map(|(i, _)| i)
            .unwrap_or(classes.len());
        counts[bucket] += 1;
    }

    Ok(EvalResult::Matrix(Matrix::from_rows(
        counts.into_iter().map(|n| vec![FPayload::number(n as f64)]).collect(),
    )))
}

fn mmult(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let a = matrix_numbers(&args[0].matrix()?)?;
    let b = matrix_numbers(&args[1].matrix()?)?;
    let (n, k) = (a.len(), a.first().map_or(0, Vec::len));
    let (k2, m) = (b.len(), b.first().map_or(0, Vec::len));
    if k != k2 {
        return Err(EvalError::generic(format!(
            "The column count of the first matrix ({k}) must match the row count of the \
             second matrix ({k2}) in [[FUNCTION_NAME]]"
        )));
    }
    let mut out = Matrix::new(n, m);
    for r in 0..n {
        for c in 0..m {
            let dot: f64 = (0..k).map(|i| a[r][i] * b[i][c]).sum();
            out.set(r, c, FPayload::number(dot));
        }
    }
    Ok(EvalResult::Matrix(out))
}

fn square_grid(arg: &Arg) -> Result<Vec<Vec<f64>>, EvalError> {
    let grid = matrix_numbers(&arg.matrix()?)?;
    let n = grid.len();
    if n == 0 || grid[0].len() != n {
        return Err(EvalError::generic(format!(
            "[[FUNCTION_NAME]] requires a square matrix, got {n}x{}",
            grid.first().map_or(0, Vec::len)
        )));
    }
    Ok(grid)
}

fn mdeterm(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let mut grid = square_grid(&args[0])?;
    let n = grid.len();

    // Gaussian elimination with partial pivoting; the determinant is the
    // product of the pivots, sign-flipped per row swap.
    let mut det = 1.0;
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|a, b| {
                grid[*a][col]
                    .abs()
                    .partial_cmp(&grid[*b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if grid[pivot_row][col] == 0.0 {
            return Ok(EvalResult::Scalar(FPayload::number(0.0)));
        }
        if pivot_row != col {
            grid.swap(pivot_row, col);
            det = -det;
        }
        det *= grid[col][col];
        for row in col + 1..n {
            let factor = grid[row][col] / grid[col][col];
            for c in col..n {
                grid[row][c] -= factor * grid[col][c];
            }
        }
    }
    Ok(EvalResult::Scalar(FPayload::number(det)))
}

fn minverse(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let grid = square_grid(&args[0])?;
    let n = grid.len();

    // Gauss-Jordan on [grid | identity].
    let mut aug: Vec<Vec<f64>> = grid
        .into_iter()
        .enumerate()
        .map(|(r, mut row)| {
            row.extend((0..n).map(|c| if c == r { 1.0 } else { 0.0 }));
            row
        })
        .collect();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|a, b| {
                aug[*a][col]
                    .abs()
                    .partial_cmp(&aug[*b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if aug[pivot_row][col].abs() < f64::EPSILON {
            return Err(EvalError::generic(
                "The matrix passed to [[FUNCTION_NAME]] is singular and cannot be inverted",
            ));
        }
        aug.swap(pivot_row, col);
        let pivot = aug[col][col];
        for c in 0..2 * n {
            aug[col][c] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor != 0.0 {
                for c in 0..2 * n {
                    aug[row][c] -= factor * aug[col][c];
                }
            }
        }
    }

    let mut out = Matrix::new(n, n);
    for (r, row) in aug.iter().enumerate() {
        for c in 0..n {
            out.set(r, c, FPayload::number(row[n + c]));
        }
    }
    Ok(EvalResult::Matrix(out))
}

#[cfg(test)]
mod tests {
    use crate::formula::eval::{evaluate, CellLookup, EvalContext, EvalResult, FPayload, Value};
    use crate::formula::registry::FunctionRegistry;
    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashMap;

    struct Cells(FxHashMap<(usize, usize), FPayload>);

    impl CellLookup for Cells {
        fn get_payload(&self, row: usize, col: usize) -> FPayload {
            self.0.get(&(row, col)).cloned().unwrap_or_default()
        }
    }

    fn grid(values: &[&[f64]]) -> Cells {
        let mut cells = FxHashMap::default();
        for (r, row) in values.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                cells.insert((r, c), FPayload::number(*v));
            }
        }
        Cells(cells)
    }

    fn eval(formula: &str, cells: &Cells) -> EvalResult {
        let registry = FunctionRegistry::with_builtins();
        evaluate(formula, &registry, cells, &EvalContext::default())
    }

    fn column(result: EvalResult) -> Vec<f64> {
        let m = result.into_matrix();
        (0..m.rows())
            .map(|r| match m.get(r, 0).map(|p| p.value.clone()) {
                Some(Value::Number(n)) => n,
                other => panic!("expected number, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_frequency_preserves_class_order() {
        // Data in A, class bounds in B listed out of order
        let mut cells = grid(&[&[1.0, 10.0], &[4.0, 5.0], &[7.0], &[11.0]]);
        cells.0.insert((2, 1), FPayload::text("not a class"));
        let counts = column(eval("=FREQUENCY(A1:A4, B1:B3)", &cells));
        // <=10 bucket gets 7, <=5 bucket gets 1 and 4, 11 overflows
        assert_eq!(counts, vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_frequency_empty_classes_counts_everything_as_overflow() {
        let cells = grid(&[&[1.0], &[2.0]]);
        let counts = column(eval("=FREQUENCY(A1:A2, B1:B2)", &cells));
        assert_eq!(counts, vec![2.0]);
    }

    #[test]
    fn test_mmult() {
        let cells = grid(&[
            &[1.0, 2.0, 3.0, 1.0],
            &[4.0, 5.0, 6.0, 0.0],
            &[7.0, 8.0, 9.0, -1.0],
        ]);
        let m = eval("=MMULT(A1:C3, D1:D3)", &cells).into_matrix();
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 1);
        assert_eq!(column(EvalResult::Matrix(m)), vec![-2.0, -2.0, -2.0]);
    }

    #[test]
    fn test_mmult_dimension_mismatch() {
        let cells = grid(&[&[1.0, 2.0], &[3.0, 4.0]]);
        assert_eq!(
            eval("=MMULT(A1:B2, A1:B1)", &cells).into_payload().value,
            Value::Error("#ERROR".to_string())
        );
    }

    #[test]
    fn test_mdeterm() {
        let cells = grid(&[&[4.0, 6.0], &[3.0, 8.0]]);
        assert_eq!(eval("=MDETERM(A1:B2)", &cells).into_payload().value, Value::Number(14.0));

        let singular = grid(&[&[1.0, 2.0], &[2.0, 4.0]]);
        assert_eq!(
            eval("=MDETERM(A1:B2)", &singular).into_payload().value,
            Value::Number(0.0)
        );

        let rect = grid(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        assert_eq!(
            eval("=MDETERM(A1:C2)", &rect).into_payload().value,
            Value::Error("#ERROR".to_string())
        );
    }

    #[test]
    fn test_minverse() {
        let cells = grid(&[&[4.0, 7.0], &[2.0, 6.0]]);
        let m = eval("=MINVERSE(A1:B2)", &cells).into_matrix();
        let expected = [[0.6, -0.7], [-0.2, 0.4]];
        for r in 0..2 {
            for c in 0..2 {
                match m.get(r, c).map(|p| p.value.clone()) {
                    Some(Value::Number(n)) => assert!((n - expected[r][c]).abs() < 1e-12),
                    other => panic!("expected number, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_minverse_singular_errors() {
        let cells = grid(&[&[1.0, 2.0], &[2.0, 4.0]]);
        assert_eq!(
            eval("=MINVERSE(A1:B2)", &cells).into_payload().value,
            Value::Error("#ERROR".to_string())
        );
    }
}
