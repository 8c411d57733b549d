// Formula parser - converts the token stream into an AST.
// Supports: numbers, cell refs (A1), ranges (A1:A5, A:A, 1:1), functions
// (SUM), basic math (+, -, *, /), comparison operators (<, >, =, <=, >=, <>),
// string literals, concatenation (&), exponentiation (^), percent postfix.

use crate::formula::error::EvalError;
use crate::formula::tokenizer::{tokenize, Token, TokenType};
use crate::locale::Locale;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Cell reference.
    /// - col_abs/row_abs: true if that component is absolute ($A vs A, $1 vs 1)
    CellRef {
        col: usize,
        row: usize,
        col_abs: bool,
        row_abs: bool,
    },
    /// Rectangular range reference (A1:B5), normalized so start <= end
    Range {
        start_col: usize,
        start_row: usize,
        end_col: usize,
        end_row: usize,
    },
    /// Whole-column range (A:C); rows come from the sheet bounds
    ColRange { start_col: usize, end_col: usize },
    /// Whole-row range (1:3); columns come from the sheet bounds
    RowRange { start_row: usize, end_row: usize },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Empty/omitted argument (e.g. the trailing slot in `=IF(a,b,)`)
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    // Comparison
    Lt,    // <
    Gt,    // >
    Eq,    // =
    LtEq,  // <=
    GtEq,  // >=
    NotEq, // <>
    // String
    Concat, // &
    // Exponentiation
    Pow, // ^
}

/// Parse a formula string into an AST. The input must start with '='.
/// All failures come back as #BAD_EXPR evaluation errors.
pub fn parse(formula: &str, locale: &Locale) -> Result<Expr, EvalError> {
    let formula = formula.trim();
    if !formula.starts_with('=') {
        return Err(EvalError::bad_expr("Formula must start with ="));
    }

    let tokens = tokenize(formula, locale);
    let ptokens = to_ptokens(&tokens[1..], locale)?;
    if ptokens.is_empty() {
        return Err(EvalError::bad_expr("Empty formula"));
    }
    let (expr, pos) = parse_comparison(&ptokens, 0)?;
    if pos < ptokens.len() {
        return Err(EvalError::bad_expr(format!(
            "Unexpected trailing input at position {pos}"
        )));
    }
    Ok(expr)
}

/// Parser-internal token: tokenizer output with values decoded.
#[derive(Debug, Clone)]
enum PToken {
    Number(f64),
    StringLit(String),
    Reference(Expr),
    Boolean(bool),
    Function(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
    Ampersand,
    Caret,
    Percent,
}

fn to_ptokens(tokens: &[Token], locale: &Locale) -> Result<Vec<PToken>, EvalError> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token.token_type {
            // Layout and debug markers are irrelevant to the AST
            TokenType::Space | TokenType::Debugger => {}
            TokenType::Number => {
                let normalized: String = token
                    .value
                    .chars()
                    .map(|c| if c == locale.decimal_separator { '.' } else { c })
                    .collect();
                let n: f64 = normalized
                    .parse()
                    .map_err(|_| EvalError::bad_expr(format!("Invalid number: {}", token.value)))?;
                out.push(PToken::Number(n));
            }
            TokenType::String => out.push(PToken::StringLit(unquote_string(&token.value))),
            TokenType::Reference => out.push(PToken::Reference(parse_reference(&token.value)?)),
            TokenType::Function => out.push(PToken::Function(token.value.to_uppercase())),
            TokenType::Symbol => {
                let upper = token.value.to_uppercase();
                match upper.as_str() {
                    "TRUE" => out.push(PToken::Boolean(true)),
                    "FALSE" => out.push(PToken::Boolean(false)),
                    _ => {
                        return Err(EvalError::bad_expr(format!(
                            "Unknown symbol: {}",
                            token.value
                        )))
                    }
                }
            }
            TokenType::LeftParen => out.push(PToken::LParen),
            TokenType::RightParen => out.push(PToken::RParen),
            TokenType::ArgSeparator => out.push(PToken::Comma),
            TokenType::Operator => out.push(match token.value.as_str() {
                "+" => PToken::Plus,
                "-" => PToken::Minus,
                "*" => PToken::Star,
                "/" => PToken::Slash,
                "<" => PToken::Lt,
                ">" => PToken::Gt,
                "=" => PToken::Eq,
                "<=" => PToken::LtEq,
                ">=" => PToken::GtEq,
                "<>" => PToken::NotEq,
                "&" => PToken::Ampersand,
                "^" => PToken::Caret,
                "%" => PToken::Percent,
                other => {
                    return Err(EvalError::bad_expr(format!("Unexpected operator: {other}")))
                }
            }),
            TokenType::Unknown => {
                return Err(EvalError::bad_expr(format!(
                    "Unexpected character: {}",
                    token.value
                )))
            }
        }
    }
    Ok(out)
}

/// Strip surrounding quotes and resolve backslash escapes.
fn unquote_string(raw: &str) -> String {
    let inner: Vec<char> = raw.chars().collect();
    let body = if inner.len() >= 2 && inner[0] == '"' && inner[inner.len() - 1] == '"' {
        &inner[1..inner.len() - 1]
    } else if !inner.is_empty() && inner[0] == '"' {
        &inner[1..] // unterminated literal
    } else {
        &inner[..]
    };
    let mut s = String::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] == '\\' && i + 1 < body.len() {
            s.push(body[i + 1]);
            i += 2;
        } else {
            s.push(body[i]);
            i += 1;
        }
    }
    s
}

// =============================================================================
// Reference decoding
// =============================================================================

/// Convert column letters to an index (A=0, B=1, ..., Z=25, AA=26, ...).
pub fn column_index(letters: &str) -> usize {
    letters
        .chars()
        .fold(0usize, |acc, c| acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1))
        - 1
}

/// Convert a column index back to letters (0 -> "A", 26 -> "AA").
pub fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// Render a cell position as its A1-style name.
pub fn cell_name(col: usize, row: usize) -> String {
    format!("{}{}", column_letters(col), row + 1)
}

/// Parse an A1-style cell name ('$' markers tolerated). Returns (col, row).
pub fn parse_cell_name(name: &str) -> Option<(usize, usize)> {
    match parse_ref_part(name)? {
        RefComponent::Cell { col, row, .. } => Some((col, row)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum RefComponent {
    Cell { col: usize, row: usize, col_abs: bool, row_abs: bool },
    Col { col: usize },
    Row { row: usize },
}

fn parse_ref_part(part: &str) -> Option<RefComponent> {
    let chars: Vec<char> = part.chars().collect();
    let mut i = 0;
    let col_abs = chars.first() == Some(&'$');
    if col_abs {
        i += 1;
    }
    let letters_start = i;
    while i < chars.len() && chars[i].is_ascii_alphabetic() {
        i += 1;
    }
    let letters: String = chars[letters_start..i].iter().collect();

    let mut row_abs = false;
    if i < chars.len() && chars[i] == '$' {
        row_abs = true;
        i += 1;
    }
    let digits_start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    let digits: String = chars[digits_start..i].iter().collect();
    if i != chars.len() {
        return None;
    }

    if !letters.is_empty() && !digits.is_empty() {
        let row: usize = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(RefComponent::Cell {
            col: column_index(&letters),
            row: row - 1,
            col_abs,
            row_abs,
        })
    } else if !letters.is_empty() {
        if row_abs {
            return None;
        }
        Some(RefComponent::Col { col: column_index(&letters) })
    } else if !digits.is_empty() {
        let row: usize = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(RefComponent::Row { row: row - 1 })
    } else {
        None
    }
}

/// Decode a Reference token's text (internal whitespace allowed around ':')
/// into a CellRef / Range / ColRange / RowRange expression.
pub fn parse_reference(text: &str) -> Result<Expr, EvalError> {
    let bad = || EvalError::bad_expr(format!("Invalid reference: {text}"));
    let mut parts = text.splitn(2, ':').map(str::trim);
    let first = parts.next().ok_or_else(bad)?;
    let second = parts.next();

    let first = parse_ref_part(first).ok_or_else(bad)?;
    let Some(second) = second else {
        return match first {
            RefComponent::Cell { col, row, col_abs, row_abs } => {
                Ok(Expr::CellRef { col, row, col_abs, row_abs })
            }
            _ => Err(bad()),
        };
    };
    let second = parse_ref_part(second).ok_or_else(bad)?;

    match (first, second) {
        (RefComponent::Cell { col: c1, row: r1, .. }, RefComponent::Cell { col: c2, row: r2, .. }) => {
            Ok(Expr::Range {
                start_col: c1.min(c2),
                start_row: r1.min(r2),
                end_col: c1.max(c2),
                end_row: r1.max(r2),
            })
        }
        (RefComponent::Col { col: c1 }, RefComponent::Col { col: c2 }) => {
            Ok(Expr::ColRange { start_col: c1.min(c2), end_col: c1.max(c2) })
        }
        (RefComponent::Row { row: r1 }, RefComponent::Row { row: r2 }) => {
            Ok(Expr::RowRange { start_row: r1.min(r2), end_row: r1.max(r2) })
        }
        _ => Err(bad()),
    }
}

// =============================================================================
// Recursive descent
// =============================================================================

// Lowest precedence: comparison operators
fn parse_comparison(tokens: &[PToken], pos: usize) -> Result<(Expr, usize), EvalError> {
    let (mut left, mut pos) = parse_concat(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            PToken::Lt => Op::Lt,
            PToken::Gt => Op::Gt,
            PToken::Eq => Op::Eq,
            PToken::LtEq => Op::LtEq,
            PToken::GtEq => Op::GtEq,
            PToken::NotEq => Op::NotEq,
            _ => break,
        };
        let (right, new_pos) = parse_concat(tokens, pos + 1)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

// String concatenation (&)
fn parse_concat(tokens: &[PToken], pos: usize) -> Result<(Expr, usize), EvalError> {
    let (mut left, mut pos) = parse_add_sub(tokens, pos)?;

    while pos < tokens.len() {
        if let PToken::Ampersand = &tokens[pos] {
            let (right, new_pos) = parse_add_sub(tokens, pos + 1)?;
            left = Expr::BinaryOp {
                op: Op::Concat,
                left: Box::new(left),
                right: Box::new(right),
            };
            pos = new_pos;
        } else {
            break;
        }
    }

    Ok((left, pos))
}

fn parse_add_sub(tokens: &[PToken], pos: usize) -> Result<(Expr, usize), EvalError> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            PToken::Plus => Op::Add,
            PToken::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[PToken], pos: usize) -> Result<(Expr, usize), EvalError> {
    let (mut left, mut pos) = parse_power(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            PToken::Star => Op::Mul,
            PToken::Slash => Op::Div,
            _ => break,
        };
        let (right, new_pos) = parse_power(tokens, pos + 1)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

// Exponentiation (^) - right-associative, higher precedence than * /
fn parse_power(tokens: &[PToken], pos: usize) -> Result<(Expr, usize), EvalError> {
    let (base, pos) = parse_percent(tokens, pos)?;

    if pos < tokens.len() {
        if let PToken::Caret = &tokens[pos] {
            // Right-associative: recurse into parse_power for the exponent
            let (exponent, new_pos) = parse_power(tokens, pos + 1)?;
            return Ok((
                Expr::BinaryOp {
                    op: Op::Pow,
                    left: Box::new(base),
                    right: Box::new(exponent),
                },
                new_pos,
            ));
        }
    }

    Ok((base, pos))
}

// Percent postfix (%) - highest precedence operator, desugars to * 0.01
fn parse_percent(tokens: &[PToken], pos: usize) -> Result<(Expr, usize), EvalError> {
    let (mut expr, mut pos) = parse_primary(tokens, pos)?;

    while pos < tokens.len() {
        if let PToken::Percent = &tokens[pos] {
            expr = Expr::BinaryOp {
                op: Op::Mul,
                left: Box::new(expr),
                right: Box::new(Expr::Number(0.01)),
            };
            pos += 1;
        } else {
            break;
        }
    }

    Ok((expr, pos))
}

fn parse_primary(tokens: &[PToken], pos: usize) -> Result<(Expr, usize), EvalError> {
    if pos >= tokens.len() {
        return Err(EvalError::bad_expr("Unexpected end of expression"));
    }

    match &tokens[pos] {
        PToken::Number(n) => Ok((Expr::Number(*n), pos + 1)),
        PToken::StringLit(s) => Ok((Expr::Text(s.clone()), pos + 1)),
        PToken::Boolean(b) => Ok((Expr::Boolean(*b), pos + 1)),
        PToken::Reference(expr) => Ok((expr.clone(), pos + 1)),
        PToken::Function(name) => {
            if pos + 1 < tokens.len() {
                if let PToken::LParen = &tokens[pos + 1] {
                    let (args, new_pos) = parse_function_args(tokens, pos + 2)?;
                    return Ok((Expr::Function { name: name.clone(), args }, new_pos));
                }
            }
            Err(EvalError::bad_expr(format!("Expected '(' after {name}")))
        }
        PToken::LParen => {
            let (expr, pos) = parse_comparison(tokens, pos + 1)?;
            if pos >= tokens.len() {
                return Err(EvalError::bad_expr("Missing closing parenthesis"));
            }
            match &tokens[pos] {
                PToken::RParen => Ok((expr, pos + 1)),
                _ => Err(EvalError::bad_expr("Expected closing parenthesis")),
            }
        }
        PToken::Plus => {
            // Unary plus (no-op, just parse the next expression)
            parse_primary(tokens, pos + 1)
        }
        PToken::Minus => {
            // Unary minus
            let (expr, pos) = parse_primary(tokens, pos + 1)?;
            Ok((
                Expr::BinaryOp {
                    op: Op::Sub,
                    left: Box::new(Expr::Number(0.0)),
                    right: Box::new(expr),
                },
                pos,
            ))
        }
        _ => Err(EvalError::bad_expr(format!("Unexpected token at position {pos}"))),
    }
}

fn parse_function_args(tokens: &[PToken], pos: usize) -> Result<(Vec<Expr>, usize), EvalError> {
    let mut args = Vec::new();
    let mut pos = pos;

    // Handle empty function call SUM()
    if pos < tokens.len() {
        if let PToken::RParen = &tokens[pos] {
            return Ok((args, pos + 1));
        }
    }

    loop {
        // Empty argument: next token is , or ) immediately
        if pos < tokens.len() && matches!(&tokens[pos], PToken::Comma | PToken::RParen) {
            args.push(Expr::Empty);
            match &tokens[pos] {
                PToken::RParen => return Ok((args, pos + 1)),
                PToken::Comma => {
                    pos += 1;
                    continue;
                }
                _ => unreachable!(),
            }
        }

        let (arg, new_pos) = parse_comparison(tokens, pos)?;
        args.push(arg);
        pos = new_pos;

        if pos >= tokens.len() {
            return Err(EvalError::bad_expr("Missing closing parenthesis in function call"));
        }

        match &tokens[pos] {
            PToken::RParen => return Ok((args, pos + 1)),
            PToken::Comma => pos += 1,
            _ => return Err(EvalError::bad_expr("Expected comma or closing parenthesis")),
        }
    }
}
