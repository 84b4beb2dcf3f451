//! Placeholder field parsing and quote-aware substitution.
//!
//! Templates use a single flat field grammar: `{name}`, `{name!conv}`,
//! `{name:spec}`, with `{{` and `}}` as literal-brace escapes. A dedicated
//! scanner keeps this decoupled from any host language's string-formatting
//! machinery; the engine only ever re-emits the restricted grammar it parses.

use crate::constants::DEFERRED_FIELD_NAMESPACES;
use crate::core::quoting::{QuoteState, scan};
use crate::core::statement::ShVar;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while parsing or substituting template fields.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FieldError {
    #[error("unmatched '{{' at byte {0} of template")]
    UnmatchedOpen(usize),
    #[error("single '}}' at byte {0} of template; use '}}}}' for a literal brace")]
    UnmatchedClose(usize),
    /// The field is neither provided by an enhancer's substitution table nor
    /// part of a deferred workflow namespace. This is a configuration error
    /// in the calling enhancer, not a user input error.
    #[error("field '{{{0}}}' is not provided by any enhancer and is not a recognized workflow placeholder")]
    UnresolvedField(String),
}

/// One parsed replacement field: `name[!conversion][:spec]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub conversion: Option<char>,
    pub spec: Option<String>,
}

impl Field {
    /// Reconstructs the literal replacement-field text, braces included.
    pub fn replacement_field(&self) -> String {
        let mut out = format!("{{{}", self.name);
        if let Some(conversion) = self.conversion {
            out.push('!');
            out.push(conversion);
        }
        if let Some(spec) = &self.spec {
            out.push(':');
            out.push_str(spec);
        }
        out.push('}');
        out
    }

    /// The leading identifier, before any attribute or index access.
    fn namespace(&self) -> &str {
        self.name.split(['.', '[']).next().unwrap_or(&self.name)
    }

    /// True when the field belongs to the host workflow engine and is
    /// deliberately left for its later substitution pass.
    pub fn is_deferred(&self) -> bool {
        DEFERRED_FIELD_NAMESPACES.contains(&self.namespace())
    }
}

/// A template split into alternating literal and field segments.
///
/// Literal segments hold *unescaped* text: `{{` in the template is a single
/// `{` here. Re-emitting template syntax requires [`escape_braces`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Field(Field),
}

/// Doubles braces so literal text survives another template pass.
pub fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

/// Parses a template left-to-right into literal and field segments.
pub fn parse_template(text: &str) -> Result<Vec<Segment>, FieldError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = text.char_indices().peekable();

    while let Some((at, c)) = chars.next() {
        match c {
            '{' => {
                if chars.peek().is_some_and(|&(_, next)| next == '{') {
                    chars.next();
                    literal.push('{');
                    continue;
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field(parse_field(&mut chars, at)?));
            }
            '}' => {
                if chars.peek().is_some_and(|&(_, next)| next == '}') {
                    chars.next();
                    literal.push('}');
                    continue;
                }
                return Err(FieldError::UnmatchedClose(at));
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn parse_field(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    open_at: usize,
) -> Result<Field, FieldError> {
    let mut field = Field {
        name: String::new(),
        conversion: None,
        spec: None,
    };

    // Name runs to '!', ':' or the closing brace.
    loop {
        match chars.next() {
            None => return Err(FieldError::UnmatchedOpen(open_at)),
            Some((_, '}')) => return Ok(field),
            Some((_, '!')) => break,
            Some((_, ':')) => return parse_spec(chars, open_at, field),
            Some((_, c)) => field.name.push(c),
        }
    }

    // One conversion character, then an optional spec.
    match chars.next() {
        None => return Err(FieldError::UnmatchedOpen(open_at)),
        Some((_, c)) => field.conversion = Some(c),
    }
    match chars.next() {
        None => Err(FieldError::UnmatchedOpen(open_at)),
        Some((_, '}')) => Ok(field),
        Some((_, ':')) => parse_spec(chars, open_at, field),
        Some((at, _)) => Err(FieldError::UnmatchedClose(at)),
    }
}

fn parse_spec(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    open_at: usize,
    mut field: Field,
) -> Result<Field, FieldError> {
    let mut spec = String::new();
    loop {
        match chars.next() {
            None => return Err(FieldError::UnmatchedOpen(open_at)),
            Some((_, '}')) => {
                field.spec = Some(spec);
                return Ok(field);
            }
            Some((_, c)) => spec.push(c),
        }
    }
}

/// The distinct unresolved fields of `text`, in first-seen order.
pub fn unresolved_fields(text: &str) -> Result<Vec<Field>, FieldError> {
    let mut fields: Vec<Field> = Vec::new();
    for segment in parse_template(text)? {
        if let Segment::Field(field) = segment {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
    }
    Ok(fields)
}

/// Resolves the fields of `template` against `table`.
///
/// Resolved fields are replaced by the variable's `$name` reference form;
/// fields in a deferred workflow namespace are re-emitted verbatim for the
/// host engine's own substitution pass; anything else is a configuration
/// error. Literal text is re-escaped, so the output is itself valid template
/// syntax for the next stage.
pub fn substitute(template: &str, table: &HashMap<String, ShVar>) -> Result<String, FieldError> {
    let mut out = String::new();
    for segment in parse_template(template)? {
        match segment {
            Segment::Literal(literal) => out.push_str(&escape_braces(&literal)),
            Segment::Field(field) => {
                if let Some(var) = table.get(&field.name) {
                    out.push_str(&var.reference());
                } else if field.is_deferred() {
                    out.push_str(&field.replacement_field());
                } else {
                    return Err(FieldError::UnresolvedField(field.name));
                }
            }
        }
    }
    Ok(out)
}

/// Merges `(literal, value)` pairs, tracking quote state across the literals
/// and wrapping each value in single quotes whenever the state at its
/// insertion point equals `context`.
///
/// With `context == Outside` this makes bare values word-splitting safe for
/// human-facing previews. With `context == Single` a value landing inside a
/// single-quoted region is spliced out of the quotes (`'…'value'…'`) so that
/// positional parameters still expand in the materialized script.
pub fn quote_aware_merge(parts: &[(String, Option<String>)], context: QuoteState) -> String {
    let mut state = QuoteState::Outside;
    let mut out = String::new();
    for (literal, value) in parts {
        state = scan(literal, state);
        out.push_str(literal);
        if let Some(value) = value {
            if state == context {
                out.push('\'');
                out.push_str(value);
                out.push('\'');
            } else {
                out.push_str(value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::names::NameAllocator;

    fn table(entries: &[(&str, &ShVar)]) -> HashMap<String, ShVar> {
        entries
            .iter()
            .map(|(name, var)| (name.to_string(), (*var).clone()))
            .collect()
    }

    #[test]
    fn parses_plain_fields() {
        let segments = parse_template("run {input} now").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Literal("run ".to_string()),
                Segment::Field(Field {
                    name: "input".to_string(),
                    conversion: None,
                    spec: None
                }),
                Segment::Literal(" now".to_string()),
            ]
        );
    }

    #[test]
    fn parses_conversion_and_spec() {
        let segments = parse_template("{x!r} {y:>8} {z!s:04d}").unwrap();
        let fields: Vec<String> = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field(f) => Some(f.replacement_field()),
                Segment::Literal(_) => None,
            })
            .collect();
        assert_eq!(fields, ["{x!r}", "{y:>8}", "{z!s:04d}"]);
    }

    #[test]
    fn doubled_braces_are_literals() {
        let segments = parse_template("a{{b}}c").unwrap();
        assert_eq!(segments, vec![Segment::Literal("a{b}c".to_string())]);
    }

    #[test]
    fn unmatched_braces_error() {
        assert_eq!(parse_template("a{b"), Err(FieldError::UnmatchedOpen(1)));
        assert_eq!(parse_template("a}b"), Err(FieldError::UnmatchedClose(1)));
    }

    #[test]
    fn unresolved_deferred_fields_pass_through_unchanged() {
        let result = substitute("run {input} now", &HashMap::new()).unwrap();
        assert_eq!(result, "run {input} now");
    }

    #[test]
    fn dotted_deferred_fields_pass_through() {
        let result = substitute("cp {input.data} {output[0]}", &HashMap::new()).unwrap();
        assert_eq!(result, "cp {input.data} {output[0]}");
    }

    #[test]
    fn unknown_fields_are_a_configuration_error() {
        let err = substitute("run {my_venv}", &HashMap::new()).unwrap_err();
        assert_eq!(err, FieldError::UnresolvedField("my_venv".to_string()));
    }

    #[test]
    fn repeated_fields_resolve_identically_and_leave_nothing_unresolved() {
        let mut names = NameAllocator::new();
        let var = ShVar::fresh(&mut names);
        let result = substitute("a{x}b{x}c", &table(&[("x", &var)])).unwrap();
        assert_eq!(result, "a$ab$ac");
        assert_eq!(unresolved_fields(&result).unwrap(), vec![]);
    }

    #[test]
    fn literal_braces_survive_substitution_as_template_syntax() {
        let mut names = NameAllocator::new();
        let var = ShVar::fresh(&mut names);
        let result = substitute("awk '{{print $1}}' {x}", &table(&[("x", &var)])).unwrap();
        assert_eq!(result, "awk '{{print $1}}' $a");
    }

    #[test]
    fn unresolved_fields_dedups_in_first_seen_order() {
        let fields = unresolved_fields("{output} {input} {output}").unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["output", "input"]);
    }

    #[test]
    fn merge_quotes_values_outside_quotes_for_display() {
        let parts = vec![
            ("cp ".to_string(), Some("{input}".to_string())),
            (" ".to_string(), Some("{output}".to_string())),
        ];
        assert_eq!(
            quote_aware_merge(&parts, QuoteState::Outside),
            "cp '{input}' '{output}'"
        );
    }

    #[test]
    fn merge_leaves_already_quoted_values_bare_for_display() {
        let parts = vec![("echo '".to_string(), Some("{x}".to_string()))];
        assert_eq!(quote_aware_merge(&parts, QuoteState::Outside), "echo '{x}");
    }

    #[test]
    fn merge_splices_positional_params_out_of_single_quotes() {
        let parts = vec![
            ("echo '".to_string(), Some("${1}".to_string())),
            ("'".to_string(), None),
        ];
        assert_eq!(
            quote_aware_merge(&parts, QuoteState::Single),
            "echo ''${1}''"
        );
    }
}
