// Logical builtins.

use crate::formula::args::arg;
use crate::formula::error::{EvalError, RegistrationError};
use crate::formula::eval::{EvalContext, EvalResult, FPayload, Value};
use crate::formula::registry::FunctionRegistry;
use crate::formula::sanitize::Arg;

use super::error_of;

pub fn register(registry: &mut FunctionRegistry) -> Result<(), RegistrationError> {
    registry.register(
        "IF",
        "Returns one value if a condition is true and another one if it is false.",
        vec![
            arg("condition (boolean)", "The condition to test."),
            arg("value_if_true (any)", "Value returned when the condition is TRUE."),
            arg("value_if_false (any, optional)", "Value returned when the condition is FALSE."),
        ],
        if_fn,
    )?;
    registry.register(
        "AND",
        "TRUE when all the provided conditions are TRUE.",
        vec![arg("conditions (boolean, range<boolean>, repeating)", "Conditions to test.")],
        and,
    )?;
    registry.register(
        "OR",
        "TRUE when at least one provided condition is TRUE.",
        vec![arg("conditions (boolean, range<boolean>, repeating)", "Conditions to test.")],
        or,
    )?;
    registry.register(
        "NOT",
        "Inverts a boolean value.",
        vec![arg("condition (boolean)", "The value to invert.")],
        not,
    )?;
    Ok(())
}

fn if_fn(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let branch = if args[0].to_bool()? { args.get(1) } else { args.get(2) };
    let payload = match branch {
        Some(Arg::Value(p)) => p.clone(),
        Some(Arg::Matrix(m)) => m.top_left(),
        // Omitted branch yields FALSE, matching the condition's domain
        _ => FPayload::boolean(false),
    };
    Ok(EvalResult::Scalar(payload))
}

fn collect_bools(args: &[Arg]) -> Result<Vec<bool>, EvalError> {
    let mut out = Vec::new();
    for a in args {
        match a {
            Arg::Missing | Arg::Reference(_) => {}
            Arg::Value(p) => {
                if let Some(err) = error_of(p) {
                    return Err(err);
                }
                if !p.is_empty() {
                    out.push(p.value.to_bool()?);
                }
            }
            Arg::Matrix(m) => {
                for p in m.cells(false) {
                    if let Some(err) = error_of(&p) {
                        return Err(err);
                    }
                    if let Value::Boolean(b) = p.value {
                        out.push(b);
                    }
                }
            }
        }
    }
    if out.is_empty() {
        return Err(EvalError::generic(
            "No boolean values found in the arguments of [[FUNCTION_NAME]]",
        ));
    }
    Ok(out)
}

fn and(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let all = collect_bools(args)?.into_iter().all(|b| b);
    Ok(EvalResult::Scalar(FPayload::boolean(all)))
}

fn or(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    let any = collect_bools(args)?.into_iter().any(|b| b);
    Ok(EvalResult::Scalar(FPayload::boolean(any)))
}

fn not(args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
    Ok(EvalResult::Scalar(FPayload::boolean(!args[0].to_bool()?)))
}
