// Argument declaration DSL and registration-time validation.
//
// Functions declare their parameters with compact strings like
// `"value (number, optional, default=10)"`. The DSL parser is deliberately
// forgiving (unknown tokens are skipped); the hard contract is enforced by
// `validate_arguments` when the function is registered.

use crate::formula::error::RegistrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Any,
    Boolean,
    Date,
    Number,
    String,
    Range,
    RangeBoolean,
    RangeDate,
    RangeNumber,
    RangeString,
    /// The argument receives the reference text itself, not an evaluated value
    Meta,
}

impl ArgType {
    /// Case-insensitive lookup of a DSL type token. `RANGE<ANY>` normalizes
    /// to plain `RANGE`. Returns None for anything that is not a type token.
    fn from_token(token: &str) -> Option<ArgType> {
        match token.to_uppercase().as_str() {
            "ANY" => Some(ArgType::Any),
            "BOOLEAN" => Some(ArgType::Boolean),
            "DATE" => Some(ArgType::Date),
            "NUMBER" => Some(ArgType::Number),
            "STRING" => Some(ArgType::String),
            "RANGE" | "RANGE<ANY>" => Some(ArgType::Range),
            "RANGE<BOOLEAN>" => Some(ArgType::RangeBoolean),
            "RANGE<DATE>" => Some(ArgType::RangeDate),
            "RANGE<NUMBER>" => Some(ArgType::RangeNumber),
            "RANGE<STRING>" => Some(ArgType::RangeString),
            "META" => Some(ArgType::Meta),
            _ => None,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(
            self,
            ArgType::Range
                | ArgType::RangeBoolean
                | ArgType::RangeDate
                | ArgType::RangeNumber
                | ArgType::RangeString
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgDefinition {
    pub name: String,
    pub description: String,
    /// Declared types in declaration order. Order is semantically
    /// significant: ambiguous inputs follow the first listed type's coercion.
    pub types: Vec<ArgType>,
    pub optional: bool,
    pub repeating: bool,
    /// Default literal from `default=value`, applied when the argument is
    /// missing at the call site.
    pub default: Option<String>,
}

impl ArgDefinition {
    pub fn is_mandatory(&self) -> bool {
        !self.optional && !self.repeating && self.default.is_none()
    }
}

/// Parse one argument declaration: `name (TYPE[,TYPE...][,optional]
/// [,repeating][,default=value])`. Unrecognized attribute tokens are
/// silently ignored; malformed declarations never panic (they surface later
/// through `validate_arguments` or an empty type list).
pub fn arg(definition: &str, description: &str) -> ArgDefinition {
    let (name, attrs) = match definition.find('(') {
        Some(open) => {
            let name = definition[..open].trim();
            let rest = &definition[open + 1..];
            let attrs = match rest.rfind(')') {
                Some(close) => &rest[..close],
                None => rest,
            };
            (name, attrs)
        }
        None => (definition.trim(), ""),
    };

    let mut types = Vec::new();
    let mut optional = false;
    let mut repeating = false;
    let mut default = None;

    for token in attrs.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if let Some(t) = ArgType::from_token(token) {
            types.push(t);
        } else if token.eq_ignore_ascii_case("optional") {
            optional = true;
        } else if token.eq_ignore_ascii_case("repeating") {
            repeating = true;
        } else if let Some(value) = token
            .strip_prefix("default=")
            .or_else(|| token.strip_prefix("DEFAULT="))
        {
            default = Some(value.trim().to_string());
        }
        // anything else: ignored
    }

    ArgDefinition {
        name: name.to_string(),
        description: description.to_string(),
        types,
        optional,
        repeating,
        default,
    }
}

/// Registration-time checks, in order:
/// 1. META must be the sole type on its argument;
/// 2. no non-repeating argument may follow a repeating one;
/// 3. no mandatory argument may follow an optional/repeating/defaulted one.
pub fn validate_arguments(
    function: &str,
    defs: &[ArgDefinition],
) -> Result<(), RegistrationError> {
    for def in defs {
        if def.types.contains(&ArgType::Meta) && def.types.len() > 1 {
            return Err(RegistrationError::MetaCombinedWithOtherTypes {
                function: function.to_string(),
                arg: def.name.clone(),
            });
        }
    }
    let mut seen_repeating = false;
    for def in defs {
        if seen_repeating && !def.repeating {
            return Err(RegistrationError::NonRepeatingAfterRepeating {
                function: function.to_string(),
                arg: def.name.clone(),
            });
        }
        seen_repeating |= def.repeating;
    }
    let mut seen_non_mandatory = false;
    for def in defs {
        if seen_non_mandatory && def.is_mandatory() {
            return Err(RegistrationError::MandatoryAfterOptional {
                function: function.to_string(),
                arg: def.name.clone(),
            });
        }
        seen_non_mandatory |= !def.is_mandatory();
    }
    Ok(())
}

/// Metadata derived once from a validated definition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgMeta {
    /// Count of mandatory arguments.
    pub min_arg_required: usize,
    /// usize::MAX stands in for "unbounded" when any argument repeats.
    pub max_arg_possible: usize,
    pub nbr_arg_repeating: usize,
    /// Index of the first repeating argument (defs.len() when none repeat).
    args_before_repeating: usize,
}

impl ArgMeta {
    pub fn from_defs(defs: &[ArgDefinition]) -> Self {
        let nbr_arg_repeating = defs.iter().filter(|d| d.repeating).count();
        let args_before_repeating = defs
            .iter()
            .position(|d| d.repeating)
            .unwrap_or(defs.len());
        Self {
            min_arg_required: defs.iter().filter(|d| d.is_mandatory()).count(),
            max_arg_possible: if nbr_arg_repeating > 0 { usize::MAX } else { defs.len() },
            nbr_arg_repeating,
            args_before_repeating,
        }
    }

    /// Map a 0-based call-site argument position onto a definition index.
    /// Identity without repeating args; with a repeating block (always a
    /// contiguous tail, guaranteed by validation) positions inside/past the
    /// block cycle through it, the last position of each cycle mapping to
    /// the last repeating slot.
    pub fn arg_to_focus(&self, position: usize) -> usize {
        if self.nbr_arg_repeating == 0 || position < self.args_before_repeating {
            return position;
        }
        self.args_before_repeating
            + (position - self.args_before_repeating) % self.nbr_arg_repeating
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_simple_definition() {
        let def = arg("value (number)", "the value to add");
        assert_eq!(def.name, "value");
        assert_eq!(def.description, "the value to add");
        assert_eq!(def.types, vec![ArgType::Number]);
        assert!(!def.optional);
        assert!(!def.repeating);
        assert_eq!(def.default, None);
    }

    #[test]
    fn test_parse_multiple_types_order_preserved() {
        let def = arg("x (string, number)", "");
        assert_eq!(def.types, vec![ArgType::String, ArgType::Number]);
        let def = arg("x (number, string)", "");
        assert_eq!(def.types, vec![ArgType::Number, ArgType::String]);
    }

    #[test]
    fn test_parse_optional_repeating_default() {
        let def = arg("pad_with (any, optional, default=0)", "");
        assert!(def.optional);
        assert_eq!(def.default, Some("0".to_string()));

        let def = arg("values (number, repeating)", "");
        assert!(def.repeating);
    }

    #[test]
    fn test_range_any_normalizes() {
        let def = arg("r (range<any>)", "");
        assert_eq!(def.types, vec![ArgType::Range]);
        let def = arg("r (RANGE<NUMBER>)", "");
        assert_eq!(def.types, vec![ArgType::RangeNumber]);
    }

    #[test]
    fn test_unknown_tokens_silently_ignored() {
        let def = arg("x (number, wibble, optional)", "");
        assert_eq!(def.types, vec![ArgType::Number]);
        assert!(def.optional);
    }

    #[test]
    fn test_missing_parens_gives_bare_name() {
        let def = arg("x", "");
        assert_eq!(def.name, "x");
        assert!(def.types.is_empty());
    }

    #[test]
    fn test_validate_meta_must_be_sole_type() {
        let defs = vec![arg("r (meta, number)", "")];
        assert_eq!(
            validate_arguments("ROW", &defs),
            Err(RegistrationError::MetaCombinedWithOtherTypes {
                function: "ROW".to_string(),
                arg: "r".to_string(),
            })
        );
        assert!(validate_arguments("ROW", &[arg("r (meta)", "")]).is_ok());
    }

    #[test]
    fn test_validate_non_repeating_after_repeating() {
        let defs = vec![arg("a (number, repeating)", ""), arg("b (number)", "")];
        assert_eq!(
            validate_arguments("F", &defs),
            Err(RegistrationError::NonRepeatingAfterRepeating {
                function: "F".to_string(),
                arg: "b".to_string(),
            })
        );
    }

    #[test]
    fn test_validate_mandatory_after_optional() {
        let defs = vec![arg("a (number, optional)", ""), arg("b (number)", "")];
        assert_eq!(
            validate_arguments("F", &defs),
            Err(RegistrationError::MandatoryAfterOptional {
                function: "F".to_string(),
                arg: "b".to_string(),
            })
        );
        // Defaulted counts as non-mandatory too
        let defs = vec![arg("a (number, default=1)", ""), arg("b (number)", "")];
        assert!(validate_arguments("F", &defs).is_err());
    }

    #[test]
    fn test_meta_counts() {
        let defs = vec![
            arg("a (number)", ""),
            arg("b (number, optional)", ""),
            arg("c (number, repeating)", ""),
        ];
        let meta = ArgMeta::from_defs(&defs);
        assert_eq!(meta.min_arg_required, 1);
        assert_eq!(meta.max_arg_possible, usize::MAX);
        assert_eq!(meta.nbr_arg_repeating, 1);

        let fixed = vec![arg("a (number)", ""), arg("b (number)", "")];
        let meta = ArgMeta::from_defs(&fixed);
        assert_eq!(meta.min_arg_required, 2);
        assert_eq!(meta.max_arg_possible, 2);
        assert_eq!(meta.nbr_arg_repeating, 0);
    }

    #[test]
    fn test_arg_to_focus_identity_without_repeating() {
        let defs = vec![arg("a (number)", ""), arg("b (number)", "")];
        let meta = ArgMeta::from_defs(&defs);
        assert_eq!(meta.arg_to_focus(0), 0);
        assert_eq!(meta.arg_to_focus(1), 1);
    }

    #[test]
    fn test_arg_to_focus_single_repeating() {
        let defs = vec![arg("a (number)", ""), arg("b (number, repeating)", "")];
        let meta = ArgMeta::from_defs(&defs);
        assert_eq!(meta.arg_to_focus(0), 0);
        assert_eq!(meta.arg_to_focus(1), 1);
        assert_eq!(meta.arg_to_focus(2), 1);
        assert_eq!(meta.arg_to_focus(42), 1);
    }

    #[test]
    fn test_arg_to_focus_cycles_through_repeating_block() {
        // One fixed argument, then three repeating ones
        let defs = vec![
            arg("a (number)", ""),
            arg("r1 (number, repeating)", ""),
            arg("r2 (number, repeating)", ""),
            arg("r3 (number, repeating)", ""),
        ];
        let meta = ArgMeta::from_defs(&defs);
        assert_eq!(meta.arg_to_focus(1), 1);
        assert_eq!(meta.arg_to_focus(2), 2);
        assert_eq!(meta.arg_to_focus(3), 3);
        assert_eq!(meta.arg_to_focus(4), 1);
        assert_eq!(meta.arg_to_focus(5), 2);
        assert_eq!(meta.arg_to_focus(19), 1);
        // Cyclic wraparound law: same focus one full period later
        for p in 1..10 {
            assert_eq!(meta.arg_to_focus(p), meta.arg_to_focus(p + 3));
        }
    }
}
