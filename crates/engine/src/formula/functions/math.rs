// Math and aggregation builtins.

use crate::formula::args::arg;
use crate::formula::error::{EvalError, RegistrationError};
use crate::formula::eval::{EvalContext, EvalResult, FPayload};
use crate::formula::registry::FunctionRegistry;
use crate::formula::sanitize::Arg;

use super::numeric_values;

pub fn register(registry: &mut FunctionRegistry) -> Result<(), RegistrationError> {
    registry.register(
        "SUM",
        "Sum of a series of numbers and/or cells.",
        vec![arg("values (number, range<number>, repeating)", "Values to add together.")],
        sum,
    )?;
    registry.register(
        "AVERAGE",
        "Numerical average value of the non-empty cells.",
        vec![arg("values (number, range<number>, repeating)", "Values to average.")],
        average,
    )?;
    registry.register(
        "MIN",
        "Minimum value in a numeric dataset.",
        vec![arg("values (number, range<number>, repeating)", "Values to consider.")],
        min,
    )?;
    registry.register(
        "MAX",
        "Maximum value in a numeric dataset.",
        vec![arg("values (number, range<number>, repeating)", "Values to consider.")],
        max,
    )?;
    registry.register(
        "COUNT",
        "Count of the numeric values in a dataset.",
        vec![arg("values (any, range, repeating)", "Values to count.")],
        count,
    )?;
    registry.register(
        "ABS",
        "Absolute value of a number.",
        vec![arg("value (number)", "The number.")],
        abs,
    )?;
    registry.register(
        "ROUND",
        "Rounds a number to a certain number of decimal places.",
        vec![
            arg("value (number)", "The value to round."),
            arg("places (number, optional, default=0)", "Decimal places to round to."),
        ],
        round,
    )?;
    Ok(())
}

fn sum(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let total: f64 = numeric_values(args)?.iter().sum();
    Ok(EvalResult::Scalar(FPayload::number(total)))
}

fn average(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let values = numeric_values(args)?;
    if values.is_empty() {
        return Err(EvalError::div_by_zero());
    }
    let total: f64 = values.iter().sum();
    Ok(EvalResult::Scalar(FPayload::number(total / values.len() as f64)))
}

fn min(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let values = numeric_values(args)?;
    let m = values.iter().copied().fold(f64::INFINITY, f64::min);
    Ok(EvalResult::Scalar(FPayload::number(if values.is_empty() { 0.0 } else { m })))
}

fn max(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let values = numeric_values(args)?;
    let m = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok(EvalResult::Scalar(FPayload::number(if values.is_empty() { 0.0 } else { m })))
}

fn count(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    use crate::formula::eval::Value;
    let mut n = 0usize;
    for a in args {
        match a {
            Arg::Value(p) => {
                // Scalar literals that look numeric count as numbers
                if matches!(p.value, Value::Number(_))
                    || matches!(&p.value, Value::Text(s) if s.parse::<f64>().is_ok())
                {
                    n += 1;
                }
            }
            Arg::Matrix(m) => {
                for p in m.cells(false) {
                    if matches!(p.value, Value::Number(_)) {
                        n += 1;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(EvalResult::Scalar(FPayload::number(n as f64)))
}

fn abs(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    Ok(EvalResult::Scalar(FPayload::number(args[0].to_number()?.abs())))
}

fn round(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let value = args[0].to_number()?;
    let places = args.get(1).map(|a| a.to_number()).transpose()?.unwrap_or(0.0) as i32;
    let factor = 10f64.powi(places);
    Ok(EvalResult::Scalar(FPayload::number((value * factor).round() / factor)))
}

#[cfg(test)]
mod tests {
    use crate::formula::eval::{evaluate, CellLookup, EvalContext, FPayload, Value};
    use crate::formula::registry::FunctionRegistry;
    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashMap;

    struct Cells(FxHashMap<(usize, usize), FPayload>);

    impl CellLookup for Cells {
        fn get_payload(&self, row: usize, col: usize) -> FPayload {
            self.0.get(&(row, col)).cloned().unwrap_or_default()
        }
    }

    fn sheet() -> Cells {
        let mut cells = FxHashMap::default();
        cells.insert((0, 0), FPayload::number(1.0));
        cells.insert((1, 0), FPayload::number(2.0));
        cells.insert((2, 0), FPayload::text("skip me"));
        cells.insert((3, 0), FPayload::number(4.0));
        Cells(cells)
    }

    fn eval(formula: &str) -> Value {
        let registry = FunctionRegistry::with_builtins();
        evaluate(formula, &registry, &sheet(), &EvalContext::default())
            .into_payload()
            .value
    }

    #[test]
    fn test_sum_skips_non_numeric_range_cells() {
        assert_eq!(eval("=SUM(A1:A4)"), Value::Number(7.0));
        assert_eq!(eval("=SUM(A1:A4, 3)"), Value::Number(10.0));
        assert_eq!(eval("=SUM()"), Value::Number(0.0));
    }

    #[test]
    fn test_sum_coerces_scalar_text() {
        // A scalar numeric string coerces; only range cells degrade silently
        assert_eq!(eval("=SUM(\"5\", 1)"), Value::Number(6.0));
    }

    #[test]
    fn test_average() {
        assert_eq!(eval("=AVERAGE(A1:A4)"), Value::Number(7.0 / 3.0));
        assert_eq!(eval("=AVERAGE(A5:A6)"), Value::Error("#DIV/0!".to_string()));
    }

    #[test]
    fn test_min_max() {
        assert_eq!(eval("=MIN(A1:A4)"), Value::Number(1.0));
        assert_eq!(eval("=MAX(A1:A4)"), Value::Number(4.0));
        assert_eq!(eval("=MIN(3, -2, 8)"), Value::Number(-2.0));
    }

    #[test]
    fn test_count() {
        assert_eq!(eval("=COUNT(A1:A4)"), Value::Number(3.0));
        assert_eq!(eval("=COUNT(A1:A4, \"7\", \"x\")"), Value::Number(4.0));
    }

    #[test]
    fn test_abs_round() {
        assert_eq!(eval("=ABS(-3)"), Value::Number(3.0));
        assert_eq!(eval("=ROUND(2.567, 2)"), Value::Number(2.57));
        assert_eq!(eval("=ROUND(2.5)"), Value::Number(3.0));
        assert_eq!(eval("=ROUND(123.4, -1)"), Value::Number(120.0));
    }

    #[test]
    fn test_error_in_range_propagates() {
        let mut cells = FxHashMap::default();
        cells.insert(
            (0, 0),
            FPayload::from_error(&crate::formula::error::EvalError::div_by_zero()),
        );
        let registry = FunctionRegistry::with_builtins();
        let result = evaluate("=SUM(A1:A2)", &registry, &Cells(cells), &EvalContext::default());
        assert_eq!(result.into_payload().value, Value::Error("#DIV/0!".to_string()));
    }
}
