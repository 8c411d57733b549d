// Text builtins.

use crate::formula::args::arg;
use crate::formula::error::{EvalError, RegistrationError};
use crate::formula::eval::{EvalContext, EvalResult, FPayload};
use crate::formula::registry::FunctionRegistry;
use crate::formula::sanitize::Arg;

pub fn register(registry: &mut FunctionRegistry) -> Result<(), RegistrationError> {
    registry.register(
        "CONCATENATE",
        "Appends strings to one another.",
        vec![arg("texts (string, range<string>, repeating)", "Strings to append.")],
        concatenate,
    )?;
    registry.register(
        "UPPER",
        "Converts a string to uppercase.",
        vec![arg("text (string)", "The string to convert.")],
        upper,
    )?;
    registry.register(
        "LEN",
        "Length of a string.",
        vec![arg("text (string)", "The string to measure.")],
        len,
    )?;
    Ok(())
}

fn concatenate(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let mut s = String::new();
    for a in args {
        match a {
            Arg::Matrix(m) => {
                for p in m.cells(false) {
                    s.push_str(&p.value.to_text());
                }
            }
            _ => s.push_str(&a.to_text()),
        }
    }
    Ok(EvalResult::Scalar(FPayload::text(s)))
}

fn upper(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    Ok(EvalResult::Scalar(FPayload::text(args[0].to_text().to_uppercase())))
}

fn len(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    Ok(EvalResult::Scalar(FPayload::number(args[0].to_text().chars().count() as f64)))
}

#[cfg(test)]
mod tests {
    use crate::formula::eval::{evaluate, EvalContext, NoCells, Value};
    use crate::formula::registry::FunctionRegistry;
    use pretty_assertions::assert_eq;

    fn eval(formula: &str) -> Value {
        let registry = FunctionRegistry::with_builtins();
        evaluate(formula, &registry, &NoCells, &EvalContext::default())
            .into_payload()
            .value
    }

    #[test]
    fn test_concatenate() {
        assert_eq!(eval("=CONCATENATE(\"a\", 1, TRUE)"), Value::Text("a1TRUE".to_string()));
        assert_eq!(eval("=CONCATENATE()"), Value::Text(String::new()));
    }

    #[test]
    fn test_upper_len() {
        assert_eq!(eval("=UPPER(\"aBc\")"), Value::Text("ABC".to_string()));
        assert_eq!(eval("=LEN(\"héllo\")"), Value::Number(5.0));
        // Numbers coerce to their decimal text first
        assert_eq!(eval("=LEN(1234)"), Value::Number(4.0));
    }
}
