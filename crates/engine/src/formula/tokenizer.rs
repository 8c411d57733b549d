// Formula tokenizer - converts a raw formula string into a typed,
// position-annotated token stream. Total: unrecognized characters become
// Unknown tokens so the editor can render half-typed formulas.
//
// The tokenizer has no semantic knowledge of functions: an identifier is a
// Function token purely because a '(' follows it. Parenthesis pairing and
// per-token function-call context are layered on in a second pass.

use serde::{Deserialize, Serialize};

use crate::locale::Locale;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    Operator,
    Number,
    String,
    Symbol,
    Function,
    Reference,
    LeftParen,
    RightParen,
    ArgSeparator,
    Space,
    Debugger,
    Unknown,
}

/// Structural snapshot of one already-terminated argument, as recorded in a
/// [`FunctionContext`]. A nested call is recorded with its own argument list;
/// everything else keeps the raw token text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgSnapshot {
    Literal { kind: TokenType, value: String },
    Call { name: String, args: Vec<Option<ArgSnapshot>> },
}

/// Read-only description of the innermost function call enclosing a token:
/// the call's name, the arguments fully parsed so far (empty slots preserved
/// as None), and the 0-based position of the argument being typed.
///
/// Contexts are structural snapshots, compared by value: two tokens inside
/// the same call at the same point hold equal contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionContext {
    pub parent: String,
    pub args: Vec<Option<ArgSnapshot>>,
    pub arg_position: usize,
}

/// One lexed token. `start`/`end` are char offsets into the source text;
/// `value` is the exact source slice (quotes and inner whitespace included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub start: usize,
    pub end: usize,
    pub length: usize,
    pub token_type: TokenType,
    pub value: String,
    /// Pairs a LeftParen with its matching RightParen. Assigned in opening
    /// order by a counter starting at 1; 0 is never used.
    pub paren_index: Option<u32>,
    pub function_context: Option<FunctionContext>,
}

impl Token {
    fn new(token_type: TokenType, start: usize, end: usize, value: String) -> Self {
        Self {
            start,
            end,
            length: end - start,
            token_type,
            value,
            paren_index: None,
            function_context: None,
        }
    }
}

/// Tokenize a formula. Pure and total: never panics, never fails.
///
/// Input without a leading '=' is not a formula: the whole text becomes a
/// single literal token (Number, String or Symbol).
pub fn tokenize(text: &str, locale: &Locale) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars[0] != '=' {
        return vec![literal_token(text, &chars, locale)];
    }
    let mut tokens = scan(&chars, locale);
    attach_parens_and_contexts(&mut tokens);
    tokens
}

/// Classify non-formula input as one literal token.
fn literal_token(text: &str, chars: &[char], locale: &Locale) -> Token {
    let normalized: String = text
        .chars()
        .map(|c| if c == locale.decimal_separator { '.' } else { c })
        .collect();
    let token_type = if normalized.trim().parse::<f64>().is_ok() {
        TokenType::Number
    } else if chars[0] == '"' {
        TokenType::String
    } else {
        TokenType::Symbol
    };
    Token::new(token_type, 0, chars.len(), text.to_string())
}

// =============================================================================
// Pass 1: raw scan
// =============================================================================

fn slice(chars: &[char], start: usize, end: usize) -> String {
    chars[start..end].iter().collect()
}

fn scan(chars: &[char], locale: &Locale) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        // Whitespace run (outside references)
        if c == ' ' || c == '\t' {
            let start = i;
            while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
                i += 1;
            }
            tokens.push(Token::new(TokenType::Space, start, i, slice(chars, start, i)));
            continue;
        }

        // Double-quoted string literal (backslash escapes; adjacent strings
        // stay separate tokens; unterminated runs to end of input)
        if c == '"' {
            let start = i;
            i += 1;
            while i < chars.len() {
                match chars[i] {
                    '\\' if i + 1 < chars.len() => i += 2,
                    '"' => {
                        i += 1;
                        break;
                    }
                    _ => i += 1,
                }
            }
            tokens.push(Token::new(TokenType::String, start, i, slice(chars, start, i)));
            continue;
        }

        // Single-quoted atom: a sheet-name-like literal, classified Symbol.
        // Doubled '' escapes a quote. Never opens a function-call context.
        if c == '\'' {
            let start = i;
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if i + 1 < chars.len() && chars[i + 1] == '\'' {
                        i += 2;
                    } else {
                        i += 1;
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            tokens.push(Token::new(TokenType::Symbol, start, i, slice(chars, start, i)));
            continue;
        }

        // Cell/range reference, tried before numbers and identifiers so that
        // `1:1`, `A:A` and `A1 : A2` lex as a single Reference token.
        if c == '$' || c.is_ascii_alphanumeric() {
            if let Some(end) = match_reference(chars, i) {
                tokens.push(Token::new(TokenType::Reference, i, end, slice(chars, i, end)));
                i = end;
                continue;
            }
        }

        // Number literal (locale decimal separator, scientific notation)
        if c.is_ascii_digit() || (c == locale.decimal_separator && next_is_digit(chars, i + 1)) {
            let end = match_number(chars, i, locale.decimal_separator);
            tokens.push(Token::new(TokenType::Number, i, end, slice(chars, i, end)));
            i = end;
            continue;
        }

        // Identifier: function name (when a '(' follows) or symbol.
        // Dotted names (STDEV.P) are one identifier.
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                i += 1;
            }
            let mut lookahead = i;
            while lookahead < chars.len() && (chars[lookahead] == ' ' || chars[lookahead] == '\t') {
                lookahead += 1;
            }
            let token_type = if lookahead < chars.len() && chars[lookahead] == '(' {
                TokenType::Function
            } else {
                TokenType::Symbol
            };
            tokens.push(Token::new(token_type, start, i, slice(chars, start, i)));
            continue;
        }

        // Argument separator (locale-dependent)
        if c == locale.arg_separator {
            tokens.push(Token::new(TokenType::ArgSeparator, i, i + 1, c.to_string()));
            i += 1;
            continue;
        }

        match c {
            '(' => {
                tokens.push(Token::new(TokenType::LeftParen, i, i + 1, "(".to_string()));
                i += 1;
            }
            ')' => {
                tokens.push(Token::new(TokenType::RightParen, i, i + 1, ")".to_string()));
                i += 1;
            }
            // Debugger marker: '?' directly after the leading '='
            '?' if i == 1 => {
                tokens.push(Token::new(TokenType::Debugger, i, i + 1, "?".to_string()));
                i += 1;
            }
            // Multi-char operators matched greedily before single-char ones
            '<' | '>' => {
                if i + 1 < chars.len() && (chars[i + 1] == '=' || (c == '<' && chars[i + 1] == '>'))
                {
                    tokens.push(Token::new(
                        TokenType::Operator,
                        i,
                        i + 2,
                        slice(chars, i, i + 2),
                    ));
                    i += 2;
                } else {
                    tokens.push(Token::new(TokenType::Operator, i, i + 1, c.to_string()));
                    i += 1;
                }
            }
            '+' | '-' | '*' | '/' | ':' | '=' | '^' | '&' | '%' => {
                tokens.push(Token::new(TokenType::Operator, i, i + 1, c.to_string()));
                i += 1;
            }
            _ => {
                tokens.push(Token::new(TokenType::Unknown, i, i + 1, c.to_string()));
                i += 1;
            }
        }
    }

    tokens
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    i < chars.len() && chars[i].is_ascii_digit()
}

fn match_number(chars: &[char], start: usize, decimal_separator: char) -> usize {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == decimal_separator && next_is_digit(chars, i + 1) {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    // Exponent only counts when digits follow (else 'e' starts an identifier)
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if next_is_digit(chars, j) {
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

// =============================================================================
// Reference matching
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum RefPart {
    Cell, // A1, $A$1
    Col,  // A, $A
    Row,  // 1, $1
}

/// Match one component of a reference (`$A$1`, `AB`, `$3`...). Returns the
/// exclusive end and the component kind. Rejects anything that an identifier
/// or longer number would claim (boundary must not be alphanumeric).
fn match_ref_part(chars: &[char], start: usize) -> Option<(usize, RefPart)> {
    let mut i = start;
    if i < chars.len() && chars[i] == '$' {
        i += 1;
    }
    let letters_start = i;
    while i < chars.len() && chars[i].is_ascii_alphabetic() {
        i += 1;
    }
    let letters = i - letters_start;
    if letters > 3 {
        return None; // columns go up to three letters; longer is an identifier
    }
    let col_end = i;
    if i < chars.len() && chars[i] == '$' && letters > 0 {
        i += 1;
    }
    let digits_start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    let digits = i - digits_start;

    let boundary_ok = |end: usize| {
        end >= chars.len() || !(chars[end].is_ascii_alphanumeric() || chars[end] == '_')
    };

    if letters > 0 && digits > 0 {
        if boundary_ok(i) {
            return Some((i, RefPart::Cell));
        }
        return None;
    }
    if letters > 0 {
        // '$' consumed after letters without digits does not belong to a column
        if boundary_ok(col_end) {
            return Some((col_end, RefPart::Col));
        }
        return None;
    }
    if digits > 0 && letters_start == digits_start {
        if boundary_ok(i) {
            return Some((i, RefPart::Row));
        }
        return None;
    }
    None
}

/// Match a full reference at `start`: a single cell, `cell:cell`,
/// whole-column `A:A` or whole-row `1:1`, with optional whitespace around
/// the ':' absorbed into the token. Returns the exclusive end.
fn match_reference(chars: &[char], start: usize) -> Option<usize> {
    let (first_end, first_kind) = match_ref_part(chars, start)?;

    let mut i = first_end;
    while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
        i += 1;
    }
    if i < chars.len() && chars[i] == ':' {
        i += 1;
        while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
            i += 1;
        }
        if let Some((second_end, second_kind)) = match_ref_part(chars, i) {
            if second_kind == first_kind {
                return Some(second_end);
            }
        }
    }

    // No range tail: a lone cell is still a reference, a lone column letter
    // or row number is not (identifier / number territory).
    match first_kind {
        RefPart::Cell => Some(first_end),
        RefPart::Col | RefPart::Row => None,
    }
}

// =============================================================================
// Pass 2: parenthesis pairing + function-call contexts
// =============================================================================

struct CallFrame {
    name: String,
    args: Vec<Option<ArgSnapshot>>,
    arg_position: usize,
    /// Snapshot of the in-progress argument; moved into `args` once the
    /// argument is terminated by a separator or by the call closing.
    current: Option<ArgSnapshot>,
}

struct ParenEntry {
    index: u32,
    frame: Option<CallFrame>,
}

fn innermost_context(stack: &[ParenEntry]) -> Option<FunctionContext> {
    stack.iter().rev().find_map(|entry| {
        entry.frame.as_ref().map(|frame| FunctionContext {
            parent: frame.name.clone(),
            args: frame.args.clone(),
            arg_position: frame.arg_position,
        })
    })
}

fn innermost_frame_mut(stack: &mut [ParenEntry]) -> Option<&mut CallFrame> {
    stack.iter_mut().rev().find_map(|entry| entry.frame.as_mut())
}

fn attach_parens_and_contexts(tokens: &mut [Token]) {
    let mut counter: u32 = 0;
    let mut stack: Vec<ParenEntry> = Vec::new();
    // Function name waiting for its opening paren (spaces may intervene)
    let mut pending_function: Option<String> = None;

    for token in tokens.iter_mut() {
        match token.token_type {
            TokenType::Function => {
                token.function_context = innermost_context(&stack);
                pending_function = Some(token.value.clone());
            }
            TokenType::Space => {
                token.function_context = innermost_context(&stack);
            }
            TokenType::LeftParen => {
                counter += 1;
                token.paren_index = Some(counter);
                let frame = pending_function.take().map(|name| CallFrame {
                    name,
                    args: Vec::new(),
                    arg_position: 0,
                    current: None,
                });
                stack.push(ParenEntry { index: counter, frame });
                // The opening paren of a call already belongs to that call,
                // so an unmatched trailing '(' still carries a context.
                token.function_context = innermost_context(&stack);
            }
            TokenType::RightParen => {
                pending_function = None;
                token.function_context = innermost_context(&stack);
                if let Some(entry) = stack.pop() {
                    token.paren_index = Some(entry.index);
                    if let Some(mut frame) = entry.frame {
                        // Closing terminates the trailing argument, but an
                        // empty slot after a separator is not re-counted.
                        if let Some(current) = frame.current.take() {
                            frame.args.push(Some(current));
                        }
                        let call = ArgSnapshot::Call { name: frame.name, args: frame.args };
                        if let Some(parent) = innermost_frame_mut(&mut stack) {
                            parent.current = Some(call);
                        }
                    }
                }
            }
            TokenType::ArgSeparator => {
                pending_function = None;
                if let Some(frame) = innermost_frame_mut(&mut stack) {
                    let terminated = frame.current.take();
                    frame.args.push(terminated); // None preserves an empty slot
                    frame.arg_position += 1;
                }
                // Separator context reflects the argument it just terminated
                token.function_context = innermost_context(&stack);
            }
            TokenType::Number | TokenType::String | TokenType::Symbol | TokenType::Reference => {
                pending_function = None;
                token.function_context = innermost_context(&stack);
                if let Some(frame) = innermost_frame_mut(&mut stack) {
                    frame.current = Some(ArgSnapshot::Literal {
                        kind: token.token_type,
                        value: token.value.clone(),
                    });
                }
            }
            TokenType::Operator | TokenType::Debugger | TokenType::Unknown => {
                pending_function = None;
                token.function_context = innermost_context(&stack);
            }
        }
    }
}
