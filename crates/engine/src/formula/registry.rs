// Function registry - the single shared lookup table binding names to
// argument contracts and compute implementations. Populated once at startup
// and read-only afterwards, so sharing it across concurrent evaluations
// needs no locking.

use rustc_hash::FxHashMap;

use crate::formula::args::{validate_arguments, ArgDefinition, ArgMeta};
use crate::formula::error::{EvalError, RegistrationError};
use crate::formula::eval::{EvalContext, EvalResult};
use crate::formula::functions;
use crate::formula::sanitize::Arg;

/// Compute contract: sanitized arguments in, scalar-or-matrix result out.
/// Error messages may contain [[FUNCTION_NAME]]; the dispatcher substitutes
/// the registered name at the call site.
pub type ComputeFn = fn(&[Arg], &EvalContext) -> Result<EvalResult, EvalError>;

#[derive(Debug)]
pub struct FunctionSpec {
    /// Canonical (uppercase) registered name.
    pub name: String,
    pub description: String,
    pub args: Vec<ArgDefinition>,
    pub meta: ArgMeta,
    pub compute: ComputeFn,
}

#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, FunctionSpec>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function. Contract violations in the argument declarations
    /// surface here, at startup, never at call time.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        args: Vec<ArgDefinition>,
        compute: ComputeFn,
    ) -> Result<(), RegistrationError> {
        let key = name.to_uppercase();
        if self.functions.contains_key(&key) {
            return Err(RegistrationError::DuplicateFunction { function: key });
        }
        validate_arguments(&key, &args)?;
        let meta = ArgMeta::from_defs(&args);
        self.functions.insert(
            key.clone(),
            FunctionSpec {
                name: key.clone(),
                description: description.to_string(),
                args,
                meta,
                compute,
            },
        );
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(&name.to_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_uppercase())
    }

    /// Registered names, sorted (autocomplete order).
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// A registry pre-loaded with the builtin function set. The builtin
    /// declarations are a startup contract: a violation here is a bug in
    /// this crate, not a runtime condition.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        functions::register_builtins(&mut registry)
            .expect("builtin argument declarations must validate");
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::args::arg;
    use crate::formula::eval::FPayload;
    use pretty_assertions::assert_eq;

    fn noop(_args: &[Arg], _ctx: &EvalContext) -> Result<EvalResult, EvalError> {
        Ok(EvalResult::Scalar(FPayload::number(0.0)))
    }

    #[test]
    fn test_register_and_lookup_case_insensitive() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("MyFunc", "does things", vec![arg("a (number)", "")], noop)
            .unwrap();
        assert!(registry.get("myfunc").is_some());
        assert_eq!(registry.get("MYFUNC").unwrap().name, "MYFUNC");
        assert_eq!(registry.get("MYFUNC").unwrap().meta.min_arg_required, 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = FunctionRegistry::new();
        registry.register("F", "", vec![], noop).unwrap();
        assert_eq!(
            registry.register("f", "", vec![], noop),
            Err(RegistrationError::DuplicateFunction { function: "F".to_string() })
        );
    }

    #[test]
    fn test_invalid_declaration_rejected_at_registration() {
        let mut registry = FunctionRegistry::new();
        let defs = vec![arg("a (number, optional)", ""), arg("b (number)", "")];
        assert!(matches!(
            registry.register("F", "", defs, noop),
            Err(RegistrationError::MandatoryAfterOptional { .. })
        ));
        assert!(registry.get("F").is_none());
    }

    #[test]
    fn test_builtins_present() {
        let registry = FunctionRegistry::with_builtins();
        for name in [
            "SUM", "AVERAGE", "MIN", "MAX", "COUNT", "ABS", "ROUND", "IF", "AND", "OR", "NOT",
            "CONCATENATE", "UPPER", "LEN", "ROW", "COLUMN", "CHOOSECOLS", "CHOOSEROWS",
            "EXPAND", "FLATTEN", "HSTACK", "VSTACK", "TOROW", "TOCOL", "TRANSPOSE", "WRAPROWS",
            "WRAPCOLS", "FREQUENCY", "MMULT", "MDETERM", "MINVERSE",
        ] {
            assert!(registry.contains(name), "missing builtin {name}");
        }
    }

    #[test]
    fn test_names_sorted() {
        let registry = FunctionRegistry::with_builtins();
        let names = registry.names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}
