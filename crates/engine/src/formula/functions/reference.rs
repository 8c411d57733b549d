// Reference builtins: META-typed arguments receive the reference text
// itself; with no argument they fall back to the evaluation origin cell.

use crate::formula::args::arg;
use crate::formula::error::{EvalError, RegistrationError};
use crate::formula::eval::{EvalContext, EvalResult, FPayload};
use crate::formula::parser::{column_index, parse_cell_name};
use crate::formula::registry::FunctionRegistry;
use crate::formula::sanitize::Arg;

pub fn register(registry: &mut FunctionRegistry) -> Result<(), RegistrationError> {
    registry.register(
        "ROW",
        "Row number of a specified cell.",
        vec![arg("cell_reference (meta, optional)", "The cell whose row number is returned.")],
        row,
    )?;
    registry.register(
        "COLUMN",
        "Column number of a specified cell.",
        vec![arg("cell_reference (meta, optional)", "The cell whose column number is returned.")],
        column,
    )?;
    Ok(())
}

/// First component of a reference text ("B2:C4" -> "B2").
fn first_part(reference: &str) -> &str {
    reference.split(':').next().unwrap_or(reference)
}

fn origin_or_err(ctx: &EvalContext) -> Result<(usize, usize), EvalError> {
    ctx.origin_cell.ok_or_else(|| {
        EvalError::generic(
            "[[FUNCTION_NAME]] takes no implicit reference outside of a cell context",
        )
    })
}

fn row(args: &[Arg], ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let row = match args.first() {
        Some(Arg::Reference(r)) => {
            let part = first_part(r);
            match parse_cell_name(part) {
                Some((_, row)) => row,
                // Whole-row references: the part is the row number itself
                None => part
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .ok_or_else(|| {
                        EvalError::generic(format!("Invalid reference '{r}' for [[FUNCTION_NAME]]"))
                    })?,
            }
        }
        _ => origin_or_err(ctx)?.1,
    };
    Ok(EvalResult::Scalar(FPayload::number((row + 1) as f64)))
}

fn column(args: &[Arg], ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let col = match args.first() {
        Some(Arg::Reference(r)) => {
            let part = first_part(r);
            match parse_cell_name(part) {
                Some((col, _)) => col,
                // Whole-column references: the part is the column letters
                None if part.chars().all(|c| c.is_ascii_alphabetic()) && !part.is_empty() => {
                    column_index(part)
                }
                None => {
                    return Err(EvalError::generic(format!(
                        "Invalid reference '{r}' for [[FUNCTION_NAME]]"
                    )))
                }
            }
        }
        _ => origin_or_err(ctx)?.0,
    };
    Ok(EvalResult::Scalar(FPayload::number((col + 1) as f64)))
}

#[cfg(test)]
mod tests {
    use crate::formula::eval::{evaluate, EvalContext, NoCells, Value};
    use crate::formula::registry::FunctionRegistry;
    use pretty_assertions::assert_eq;

    fn eval_at(formula: &str, origin: Option<(usize, usize)>) -> Value {
        let registry = FunctionRegistry::with_builtins();
        let ctx = EvalContext { origin_cell: origin, ..Default::default() };
        evaluate(formula, &registry, &NoCells, &ctx).into_payload().value
    }

    #[test]
    fn test_row_column_with_explicit_reference() {
        assert_eq!(eval_at("=ROW(B7)", None), Value::Number(7.0));
        assert_eq!(eval_at("=COLUMN(B7)", None), Value::Number(2.0));
        // Ranges resolve to their first cell
        assert_eq!(eval_at("=ROW(B7:C9)", None), Value::Number(7.0));
        assert_eq!(eval_at("=COLUMN(AA1:AB2)", None), Value::Number(27.0));
    }

    #[test]
    fn test_row_column_fall_back_to_origin() {
        assert_eq!(eval_at("=ROW()", Some((3, 5))), Value::Number(6.0));
        assert_eq!(eval_at("=COLUMN()", Some((3, 5))), Value::Number(4.0));
    }

    #[test]
    fn test_row_without_origin_errors() {
        assert_eq!(eval_at("=ROW()", None), Value::Error("#ERROR".to_string()));
    }
}
