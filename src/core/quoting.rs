//! Quote-state tracking for generated bash text.
//!
//! The substitution engine needs to know whether an insertion point sits
//! outside quotes, inside single quotes, or inside double quotes, so that a
//! value can be inserted bare (already quoted) or wrapped in single quotes
//! (to guarantee word-splitting and glob safety).

/// Quoting state at a cursor position within a chunk of shell text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteState {
    /// Outside any quoted region.
    #[default]
    Outside,
    /// Inside a single-quoted region.
    Single,
    /// Inside a double-quoted region.
    Double,
}

/// Advances `start` across `text`, transitioning on unescaped quote characters.
///
/// POSIX rules: a backslash escapes a following quote character everywhere
/// except inside single quotes, where nothing is special. Text without quote
/// characters leaves the state untouched.
pub fn scan(text: &str, start: QuoteState) -> QuoteState {
    let mut state = start;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' && state != QuoteState::Single {
            // The escaped character is consumed without a transition.
            chars.next();
            continue;
        }
        state = match (state, c) {
            (QuoteState::Outside, '\'') => QuoteState::Single,
            (QuoteState::Outside, '"') => QuoteState::Double,
            (QuoteState::Single, '\'') => QuoteState::Outside,
            (QuoteState::Double, '"') => QuoteState::Outside,
            (unchanged, _) => unchanged,
        };
    }
    state
}

/// Escapes single quotes so `text` can be embedded inside a single-quoted
/// region of a larger script.
pub fn quote_escape(text: &str) -> String {
    text.replace('\'', r#"'"'"'"#)
}
