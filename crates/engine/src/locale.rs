use serde::{Deserialize, Serialize};

/// Separator conventions used when lexing and printing formulas.
///
/// Locales with a comma decimal separator use a semicolon to separate
/// function arguments, so the two can never collide inside a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    pub code: String,
    pub decimal_separator: char,
    pub arg_separator: char,
}

impl Default for Locale {
    fn default() -> Self {
        Self {
            code: "en_US".to_string(),
            decimal_separator: '.',
            arg_separator: ',',
        }
    }
}

impl Locale {
    /// Comma-decimal locale (e.g. fr_FR): `=SUM(1,5; 2)` means SUM(1.5, 2).
    pub fn comma_decimal(code: &str) -> Self {
        Self {
            code: code.to_string(),
            decimal_separator: ',',
            arg_separator: ';',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_locale_separators() {
        let locale = Locale::default();
        assert_eq!(locale.decimal_separator, '.');
        assert_eq!(locale.arg_separator, ',');
    }

    #[test]
    fn test_comma_decimal_locale() {
        let locale = Locale::comma_decimal("fr_FR");
        assert_eq!(locale.decimal_separator, ',');
        assert_eq!(locale.arg_separator, ';');
    }
}
