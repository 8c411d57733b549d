// Formula language core: tokenizing, parsing, argument contracts and
// evaluation.

pub mod args;
pub mod error;
pub mod eval;
pub mod functions;
pub mod parser;
pub mod registry;
pub mod sanitize;
pub mod tokenizer;
