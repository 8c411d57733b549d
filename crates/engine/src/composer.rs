// Formula edition state machine, the editor-facing consumer of the token
// stream. Tracks the text being typed and a cursor, re-tokenizes on every
// change, and decides whether grid navigation should insert references
// (Selecting) or move the text caret (Editing).

use crate::formula::tokenizer::{tokenize, FunctionContext, Token, TokenType};
use crate::locale::Locale;

/// Edition submode: determines how grid interaction behaves while a cell is
/// being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditionMode {
    #[default]
    Inactive,
    /// Keystrokes edit text; arrows move the caret.
    Editing,
    /// The caret sits at a reference insertion point; clicking or arrowing
    /// on the grid inserts a reference.
    Selecting,
    /// Edition just started from scratch; the first grid move repositions
    /// the edited cell instead of inserting a reference.
    ResettingPosition,
}

impl EditionMode {
    pub fn is_active(&self) -> bool {
        !matches!(self, EditionMode::Inactive)
    }

    pub fn is_selecting(&self) -> bool {
        matches!(self, EditionMode::Selecting | EditionMode::ResettingPosition)
    }
}

#[derive(Debug, Clone)]
pub struct Composer {
    content: String,
    cursor: usize,
    mode: EditionMode,
    locale: Locale,
    tokens: Vec<Token>,
}

impl Composer {
    pub fn new(locale: Locale) -> Self {
        Self {
            content: String::new(),
            cursor: 0,
            mode: EditionMode::Inactive,
            locale,
            tokens: Vec::new(),
        }
    }

    pub fn mode(&self) -> EditionMode {
        self.mode
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Begin editing. Empty initial content starts in ResettingPosition so
    /// the first grid move relocates the edition instead of inserting.
    pub fn start_edition(&mut self, initial: &str) {
        self.content = initial.to_string();
        self.cursor = self.content.chars().count();
        self.mode = if initial.is_empty() {
            EditionMode::ResettingPosition
        } else {
            EditionMode::Editing
        };
        self.refresh();
    }

    /// Replace the edited text and cursor in one step (a keystroke).
    pub fn set_content(&mut self, content: &str, cursor: usize) {
        self.content = content.to_string();
        self.cursor = cursor.min(self.content.chars().count());
        if self.mode == EditionMode::Inactive {
            self.mode = EditionMode::Editing;
        }
        self.refresh();
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.content.chars().count());
        self.refresh();
    }

    /// Insert text (typically a clicked cell's reference) at the cursor.
    pub fn insert(&mut self, text: &str) {
        let byte_pos = self
            .content
            .char_indices()
            .nth(self.cursor)
            .map(|(i, _)| i)
            .unwrap_or(self.content.len());
        self.content.insert_str(byte_pos, text);
        self.cursor += text.chars().count();
        self.refresh();
    }

    /// Commit the edition. Unmatched open parens of a formula are balanced
    /// before the content is handed back.
    pub fn stop_edition(&mut self) -> String {
        let mut result = std::mem::take(&mut self.content);
        if result.starts_with('=') {
            let open = self.tokens.iter().filter(|t| t.token_type == TokenType::LeftParen).count();
            let close =
                self.tokens.iter().filter(|t| t.token_type == TokenType::RightParen).count();
            for _ in close..open {
                result.push(')');
            }
        }
        self.cursor = 0;
        self.mode = EditionMode::Inactive;
        self.tokens.clear();
        result
    }

    pub fn cancel_edition(&mut self) {
        self.content.clear();
        self.cursor = 0;
        self.mode = EditionMode::Inactive;
        self.tokens.clear();
    }

    /// The token the cursor sits in or directly after.
    pub fn token_at_cursor(&self) -> Option<&Token> {
        self.tokens.iter().find(|t| t.start < self.cursor && self.cursor <= t.end)
    }

    /// Context of the innermost call enclosing the cursor, for argument
    /// hints and autocomplete.
    pub fn function_context(&self) -> Option<&FunctionContext> {
        self.token_at_cursor().and_then(|t| t.function_context.as_ref())
    }

    /// The paren_index pair enclosing or touched by the cursor, for
    /// matching-paren highlighting.
    pub fn paren_pair_at_cursor(&self) -> Option<u32> {
        self.token_at_cursor().and_then(|t| t.paren_index)
    }

    fn refresh(&mut self) {
        self.tokens = tokenize(&self.content, &self.locale);
        if self.mode == EditionMode::Inactive {
            return;
        }
        self.mode = self.next_mode();
    }

    /// Selecting only applies while typing a formula, when the token at the
    /// cursor leaves a reference insertion point open. ResettingPosition
    /// survives until the content stops being empty or a bare '='.
    fn next_mode(&self) -> EditionMode {
        if self.mode == EditionMode::ResettingPosition
            && (self.content.is_empty() || self.content == "=")
        {
            return EditionMode::ResettingPosition;
        }
        if !self.content.starts_with('=') {
            return EditionMode::Editing;
        }
        let at_insertion_point = match self.token_at_cursor() {
            Some(t) => matches!(
                t.token_type,
                TokenType::ArgSeparator
                    | TokenType::LeftParen
                    | TokenType::Operator
                    | TokenType::Space
            ),
            // Cursor at position 0, before the '='
            None => false,
        };
        if at_insertion_point {
            EditionMode::Selecting
        } else {
            EditionMode::Editing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn composer_with(content: &str) -> Composer {
        let mut c = Composer::new(Locale::default());
        c.start_edition("");
        c.set_content(content, content.chars().count());
        c
    }

    #[test]
    fn test_starts_resetting_position_on_empty_content() {
        let mut c = Composer::new(Locale::default());
        c.start_edition("");
        assert_eq!(c.mode(), EditionMode::ResettingPosition);
        assert!(c.mode().is_selecting());

        c.set_content("=", 1);
        assert_eq!(c.mode(), EditionMode::ResettingPosition);

        // Actual content ends the transitional state
        c.set_content("=1", 2);
        assert_eq!(c.mode(), EditionMode::Editing);
    }

    #[test]
    fn test_selecting_after_call_opens() {
        let c = composer_with("=SUM(");
        assert_eq!(c.mode(), EditionMode::Selecting);
    }

    #[test]
    fn test_selecting_after_separator_and_operator() {
        assert_eq!(composer_with("=SUM(A1,").mode(), EditionMode::Selecting);
        assert_eq!(composer_with("=A1+").mode(), EditionMode::Selecting);
        assert_eq!(composer_with("=SUM(A1, ").mode(), EditionMode::Selecting);
    }

    #[test]
    fn test_editing_inside_reference_or_number() {
        assert_eq!(composer_with("=SUM(A1").mode(), EditionMode::Editing);
        assert_eq!(composer_with("=12.5").mode(), EditionMode::Editing);
        assert_eq!(composer_with("hello").mode(), EditionMode::Editing);
    }

    #[test]
    fn test_cursor_moves_change_mode() {
        let mut c = composer_with("=SUM(A1");
        assert_eq!(c.mode(), EditionMode::Editing);
        // Cursor right after the '(' is an insertion point
        c.set_cursor(5);
        assert_eq!(c.mode(), EditionMode::Selecting);
    }

    #[test]
    fn test_insert_reference_at_cursor() {
        let mut c = composer_with("=SUM(");
        c.insert("B2");
        assert_eq!(c.content(), "=SUM(B2");
        assert_eq!(c.mode(), EditionMode::Editing);
    }

    #[test]
    fn test_stop_edition_balances_parens() {
        let mut c = composer_with("=SUM(1,2");
        assert_eq!(c.stop_edition(), "=SUM(1,2)");
        assert_eq!(c.mode(), EditionMode::Inactive);

        let mut c = composer_with("=IF(AND(A1");
        assert_eq!(c.stop_edition(), "=IF(AND(A1))");

        // Non-formula text is committed untouched
        let mut c = composer_with("just (a note");
        assert_eq!(c.stop_edition(), "just (a note");
    }

    #[test]
    fn test_function_context_follows_cursor() {
        let c = composer_with("=SUM(1,");
        let ctx = c.function_context().expect("inside SUM");
        assert_eq!(ctx.parent, "SUM");
        assert_eq!(ctx.arg_position, 1);

        let c = composer_with("=1+2");
        assert!(c.function_context().is_none());
    }

    #[test]
    fn test_paren_pair_at_cursor() {
        let mut c = composer_with("=ADD(SUM(1))");
        // Cursor after the inner '(' of SUM
        c.set_cursor(9);
        assert_eq!(c.paren_pair_at_cursor(), Some(2));
    }
}
