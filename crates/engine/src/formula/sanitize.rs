// Argument sanitizer - coerces raw evaluated arguments to a function's
// declared contract before compute runs. Scalar coercions may raise typed
// errors naming the argument; range coercions never raise, they degrade
// non-matching cells to Empty instead (ranges are expected to contain mixed
// data and must not abort the whole formula).

use crate::formula::args::{ArgDefinition, ArgMeta, ArgType};
use crate::formula::error::{ErrorCode, EvalError};
use crate::formula::eval::{format_number, FPayload, Matrix, Value};

/// A raw or sanitized argument as handed to compute.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Omitted at the call site (and no default declared).
    Missing,
    Value(FPayload),
    Matrix(Matrix),
    /// META argument: the reference text itself, e.g. "A1" or "B2:C4".
    Reference(String),
}

impl Arg {
    pub fn is_missing(&self) -> bool {
        matches!(self, Arg::Missing)
    }

    pub fn to_number(&self) -> Result<f64, EvalError> {
        match self {
            Arg::Missing => Ok(0.0),
            Arg::Value(p) => p.value.to_number(),
            Arg::Matrix(m) => m.top_left().value.to_number(),
            Arg::Reference(r) => {
                Err(EvalError::generic(format!("Cannot convert reference '{r}' to number")))
            }
        }
    }

    pub fn to_bool(&self) -> Result<bool, EvalError> {
        match self {
            Arg::Missing => Ok(false),
            Arg::Value(p) => p.value.to_bool(),
            Arg::Matrix(m) => m.top_left().value.to_bool(),
            Arg::Reference(r) => {
                Err(EvalError::generic(format!("Cannot convert reference '{r}' to boolean")))
            }
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Arg::Missing => String::new(),
            Arg::Value(p) => p.value.to_text(),
            Arg::Matrix(m) => m.top_left().value.to_text(),
            Arg::Reference(r) => r.clone(),
        }
    }

    pub fn payload(&self) -> Option<&FPayload> {
        match self {
            Arg::Value(p) => Some(p),
            _ => None,
        }
    }

    /// The argument as a matrix (scalars widen to 1x1).
    pub fn matrix(&self) -> Result<Matrix, EvalError> {
        match self {
            Arg::Matrix(m) => Ok(m.clone()),
            Arg::Value(p) => Ok(Matrix::scalar(p.clone())),
            Arg::Missing => Err(EvalError::generic("Missing range argument")),
            Arg::Reference(r) => {
                Err(EvalError::generic(format!("Cannot use reference '{r}' as a range")))
            }
        }
    }

    pub fn reference(&self) -> Result<&str, EvalError> {
        match self {
            Arg::Reference(r) => Ok(r),
            _ => Err(EvalError::generic("Expected a reference argument")),
        }
    }
}

/// Check arity and coerce every argument. Positions past the repeating
/// block's start cycle through it; trailing declared-but-absent arguments
/// get their default applied, or stay Missing when optional without one.
pub fn sanitize_args(
    defs: &[ArgDefinition],
    meta: &ArgMeta,
    raw: Vec<Arg>,
) -> Result<Vec<Arg>, EvalError> {
    check_arity(defs, meta, raw.len())?;

    let mut out = Vec::with_capacity(raw.len().max(defs.len()));
    for (position, arg) in raw.into_iter().enumerate() {
        // arg_to_focus never lands out of bounds once arity passed
        let def = &defs[meta.arg_to_focus(position)];
        out.push(coerce_arg(arg, def)?);
    }
    // Absent trailing arguments: apply defaults where declared
    for def in defs.iter().skip(out.len()) {
        if def.repeating {
            break;
        }
        out.push(coerce_arg(Arg::Missing, def)?);
    }
    Ok(out)
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        "argument"
    } else {
        "arguments"
    }
}

fn check_arity(defs: &[ArgDefinition], meta: &ArgMeta, count: usize) -> Result<(), EvalError> {
    let all_mandatory = defs.iter().all(|d| d.is_mandatory());
    if all_mandatory {
        if count != defs.len() {
            return Err(EvalError::generic(format!(
                "Invalid number of arguments for the [[FUNCTION_NAME]] function. \
                 Expected {} {}, but got {} instead.",
                defs.len(),
                plural(defs.len()),
                count
            )));
        }
        return Ok(());
    }
    if count < meta.min_arg_required {
        return Err(EvalError::generic(format!(
            "Invalid number of arguments for the [[FUNCTION_NAME]] function. \
             Expected at least {} {}, but got {} instead.",
            meta.min_arg_required,
            plural(meta.min_arg_required),
            count
        )));
    }
    if count > meta.max_arg_possible {
        return Err(EvalError::generic(format!(
            "Invalid number of arguments for the [[FUNCTION_NAME]] function. \
             Expected at most {} {}, but got {} instead.",
            meta.max_arg_possible,
            plural(meta.max_arg_possible),
            count
        )));
    }
    Ok(())
}

fn coerce_arg(arg: Arg, def: &ArgDefinition) -> Result<Arg, EvalError> {
    // META passes the reference text through untouched
    if def.types.contains(&ArgType::Meta) {
        return match arg {
            Arg::Reference(_) | Arg::Missing => Ok(arg),
            _ => Err(EvalError::generic(format!(
                "Argument '{}' of [[FUNCTION_NAME]] must be a reference",
                def.name
            ))),
        };
    }

    let wants_range = def.types.iter().any(ArgType::is_range);
    let wants_scalar = def.types.iter().any(|t| !t.is_range());

    match arg {
        Arg::Matrix(m) => {
            if wants_range {
                Ok(Arg::Matrix(sanitize_matrix(m, def)))
            } else {
                // Scalar-only slot: coerce the top-left cell
                coerce_scalar(m.top_left(), def).map(Arg::Value)
            }
        }
        Arg::Value(p) => {
            if wants_scalar {
                coerce_scalar(p, def).map(Arg::Value)
            } else {
                // Range-only slot: wrap the scalar as a 1x1 matrix
                Ok(Arg::Matrix(sanitize_matrix(Matrix::scalar(p), def)))
            }
        }
        Arg::Missing => {
            if let Some(default) = &def.default {
                coerce_scalar(FPayload::text(default.clone()), def).map(Arg::Value)
            } else if def.optional || def.repeating {
                Ok(Arg::Missing)
            } else {
                coerce_scalar(FPayload::default(), def).map(Arg::Value)
            }
        }
        Arg::Reference(_) => Err(EvalError::generic(format!(
            "Argument '{}' of [[FUNCTION_NAME]] cannot be a bare reference",
            def.name
        ))),
    }
}

/// Per-cell degrade for RANGE<T>: cells whose value is not natively of the
/// expected primitive type become Empty. Error cells are preserved so that
/// aggregating functions can surface them. Idempotent by construction.
fn sanitize_matrix(m: Matrix, def: &ArgDefinition) -> Matrix {
    let expected: Vec<ArgType> = def.types.iter().filter(|t| t.is_range()).copied().collect();
    if expected.iter().any(|t| matches!(t, ArgType::Range)) {
        return m; // RANGE (any): everything passes
    }
    m.map(|p| {
        let matches = p.value.is_error()
            || expected.iter().any(|t| match t {
                ArgType::RangeNumber | ArgType::RangeDate => {
                    matches!(p.value, Value::Number(_))
                }
                ArgType::RangeString => matches!(p.value, Value::Text(_)),
                ArgType::RangeBoolean => matches!(p.value, Value::Boolean(_)),
                _ => false,
            });
        if matches {
            p.clone()
        } else {
            FPayload { value: Value::Empty, format: p.format.clone(), error: None }
        }
    })
}

fn native_match(value: &Value, t: ArgType) -> bool {
    match t {
        ArgType::Any => !value.is_error(),
        ArgType::Number | ArgType::Date => matches!(value, Value::Number(_)),
        ArgType::String => matches!(value, Value::Text(_)),
        ArgType::Boolean => matches!(value, Value::Boolean(_)),
        _ => false,
    }
}

fn coerce_scalar(p: FPayload, def: &ArgDefinition) -> Result<FPayload, EvalError> {
    // A value natively matching any declared type passes unchanged
    if def.types.iter().any(|t| native_match(&p.value, *t)) {
        return Ok(p);
    }
    // ANY accepts error payloads too (e.g. an error used as a pad value)
    if def.types.contains(&ArgType::Any) {
        return Ok(p);
    }

    // Otherwise the first listed scalar type's rules decide; declaration
    // order is semantically significant, not just documentation.
    let first = def
        .types
        .iter()
        .find(|t| !t.is_range())
        .copied()
        .unwrap_or(ArgType::Any);

    // Errors propagate out of scalar slots before any conversion
    if let Value::Error(e) = &p.value {
        return Err(EvalError::new(ErrorCode::from_literal(e), e.clone()));
    }

    let format = p.format.clone();
    let value = match first {
        ArgType::Number | ArgType::Date => match &p.value {
            Value::Empty => Value::Number(default_number(def)),
            Value::Boolean(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) if s.is_empty() => Value::Number(default_number(def)),
            Value::Text(s) => match s.parse::<f64>() {
                Ok(n) => Value::Number(n),
                Err(_) => {
                    return Err(EvalError::generic(format!(
                        "The function [[FUNCTION_NAME]] expects a number value for its \
                         argument '{}', but got '{s}' instead.",
                        def.name
                    )))
                }
            },
            _ => unreachable!(),
        },
        ArgType::Boolean => match &p.value {
            Value::Empty => Value::Boolean(default_bool(def)),
            Value::Number(n) => Value::Boolean(*n != 0.0),
            // Empty string coerces to false without throwing, unlike other
            // non-TRUE/FALSE strings
            Value::Text(s) if s.is_empty() => Value::Boolean(false),
            Value::Text(s) if s.eq_ignore_ascii_case("TRUE") => Value::Boolean(true),
            Value::Text(s) if s.eq_ignore_ascii_case("FALSE") => Value::Boolean(false),
            Value::Text(s) => {
                return Err(EvalError::generic(format!(
                    "The function [[FUNCTION_NAME]] expects a boolean value for its \
                     argument '{}', but got '{s}' instead.",
                    def.name
                )))
            }
            _ => unreachable!(),
        },
        ArgType::String => match &p.value {
            Value::Empty => Value::Text(def.default.clone().unwrap_or_default()),
            Value::Number(n) => Value::Text(format_number(*n)),
            Value::Boolean(b) => Value::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
            _ => unreachable!(),
        },
        // No scalar type declared at all: pass through
        _ => p.value.clone(),
    };
    Ok(FPayload { value, format, error: None })
}

fn default_number(def: &ArgDefinition) -> f64 {
    def.default
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn default_bool(def: &ArgDefinition) -> bool {
    def.default
        .as_deref()
        .map(|d| d.eq_ignore_ascii_case("TRUE"))
        .unwrap_or(false)
}
