pub mod cell;
pub mod composer;
pub mod formula;
pub mod locale;
pub mod sheet;

pub use cell::{Cell, CellValue, SpillError, SpillInfo};
pub use composer::{Composer, EditionMode};
pub use formula::error::{ErrorCode, EvalError, RegistrationError};
pub use formula::eval::{
    compile, evaluate, CellLookup, CompiledFormula, EvalContext, EvalResult, FPayload, Matrix,
    NoCells, Value,
};
pub use formula::registry::FunctionRegistry;
pub use locale::Locale;
pub use sheet::Sheet;
