//! ANSI decoration for the human-readable command preview.
//!
//! The materializer replaces the logical command with a short cached-script
//! invocation; this module produces the colorized rendering of the logical
//! command that precedes it in the logs, plus the alternate-screen-buffer
//! escapes that keep interactive displays short.

use crate::core::fields::{Segment, escape_braces, parse_template, quote_aware_merge};
use crate::core::quoting::QuoteState;
use colored::Colorize;
use lazy_static::lazy_static;
use regex::Regex;

/// Matches a single ANSI escape sequence.
/// Adapted from the ansi-regex npm package, as in upstream tooling.
const ANSI_PATTERN: &str = r"[\x1B\x9B][\[\]()#;?]*(?:(?:(?:(?:;[-a-zA-Z\d/#&.:=?%@~_]+)*|[a-zA-Z\d]+(?:;[-a-zA-Z\d/#&.:=?%@~_]*)*)?\x07)|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PR-TZcf-nq-uy=><~]))";

lazy_static! {
    // The `regex` crate has no backreferences, so the brace-pair cleanup uses
    // one pattern per brace kind.
    static ref OPEN_BRACE_PAIR: Regex =
        Regex::new(&format!(r"\{{(?:{ANSI_PATTERN})+\{{")).expect("static regex");
    static ref CLOSE_BRACE_PAIR: Regex =
        Regex::new(&format!(r"\}}(?:{ANSI_PATTERN})+\}}")).expect("static regex");
    static ref FIELD_RE: Regex = Regex::new(r"\{[^{}\s]+\}").expect("static regex");
    static ref STRING_RE: Regex = Regex::new(r"'[^'\n]*'").expect("static regex");
    static ref VAR_RE: Regex =
        Regex::new(r"\$\{?[A-Za-z_][A-Za-z0-9_]*\}?|\$\{[0-9]+\}").expect("static regex");
}

/// Terminal decoration with a single on/off switch.
///
/// With `colorize` off every accessor returns plain text, so non-interactive
/// logs stay clean. With it on, token coloring still defers to the `colored`
/// crate's own TTY detection.
#[derive(Debug, Clone, Copy)]
pub struct Ansi {
    pub colorize: bool,
}

impl Ansi {
    pub fn new(colorize: bool) -> Self {
        Self { colorize }
    }

    /// Switch the terminal to the alternate screen buffer.
    pub fn alt_buff(&self) -> &'static str {
        if self.colorize { "\x1b[?1049h" } else { "" }
    }

    /// Switch the terminal back to the main screen buffer.
    pub fn main_buff(&self) -> &'static str {
        if self.colorize { "\x1b[?1049l" } else { "" }
    }

    /// Light bash highlighting: fields, single-quoted strings, variables.
    fn highlight(&self, text: &str) -> String {
        if !self.colorize {
            return text.to_string();
        }
        let pass = FIELD_RE.replace_all(text, |caps: &regex::Captures<'_>| {
            caps[0].yellow().to_string()
        });
        let pass = STRING_RE.replace_all(&pass, |caps: &regex::Captures<'_>| {
            caps[0].green().to_string()
        });
        let pass = VAR_RE.replace_all(&pass, |caps: &regex::Captures<'_>| {
            caps[0].cyan().to_string()
        });
        pass.into_owned()
    }

    fn continuation(&self) -> String {
        if self.colorize {
            "\n#... ".yellow().to_string()
        } else {
            "\n#... ".to_string()
        }
    }

    /// Renders the logical (pre-materialization) command for logging:
    /// unresolved fields are single-quoted when they sit outside quotes, the
    /// text is highlighted, and continuation lines are marked as comments so
    /// a multi-line preview cannot be mistaken for executable log output.
    pub fn decorate_cmd(&self, cmd: &str) -> String {
        let parts = match parse_template(cmd) {
            Ok(segments) => segments_to_parts(segments),
            // A malformed template is shown raw rather than hidden.
            Err(_) => vec![(cmd.to_string(), None)],
        };
        let merged = quote_aware_merge(&parts, QuoteState::Outside);
        let decorated = self
            .highlight(&merged)
            .trim()
            .replace('\n', &self.continuation());
        smush_braces(&decorated)
    }
}

fn segments_to_parts(segments: Vec<Segment>) -> Vec<(String, Option<String>)> {
    let mut parts = Vec::new();
    let mut pending = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(literal) => pending.push_str(&escape_braces(&literal)),
            Segment::Field(field) => {
                parts.push((std::mem::take(&mut pending), Some(field.replacement_field())));
            }
        }
    }
    if !pending.is_empty() {
        parts.push((pending, None));
    }
    parts
}

/// Removes ANSI codes that a highlighter may have inserted between the two
/// halves of an escaped brace pair.
fn smush_braces(text: &str) -> String {
    let pass = OPEN_BRACE_PAIR.replace_all(text, "{{");
    CLOSE_BRACE_PAIR.replace_all(&pass, "}}").into_owned()
}
