//! Builders for single commands and pipelines.
//!
//! These render without any context: a command line has the same textual form
//! in compact and debug mode. Pipelines compose with the `|` operator, e.g.
//! `echo("{wildcards}") | awk(["print tolower($0)"])`.

use crate::core::quoting::quote_escape;
use std::fmt;
use std::ops::BitOr;

/// A single command invocation: program, combined single-character flags,
/// arguments, and a trailing expression.
#[derive(Debug, Clone)]
pub struct ShCmd {
    program: String,
    flags: Vec<char>,
    args: Vec<String>,
    expr: String,
    quote_expr: bool,
}

impl ShCmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            flags: Vec::new(),
            args: Vec::new(),
            expr: String::new(),
            quote_expr: false,
        }
    }

    /// Adds a single-character flag; flags render combined, e.g. `-rf`.
    pub fn flag(mut self, flag: char) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Sets the trailing expression, e.g. the text passed to `echo`.
    pub fn expr(mut self, expr: impl fmt::Display) -> Self {
        self.expr = expr.to_string();
        self
    }

    /// Renders the trailing expression wrapped in double quotes.
    pub fn quoted_expr(mut self, expr: impl fmt::Display) -> Self {
        self.expr = expr.to_string();
        self.quote_expr = true;
        self
    }
}

impl fmt::Display for ShCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = vec![self.program.clone()];
        if !self.flags.is_empty() {
            parts.push(format!("-{}", self.flags.iter().collect::<String>()));
        }
        parts.extend(self.args.iter().cloned());
        if !self.expr.is_empty() {
            if self.quote_expr {
                parts.push(format!("\"{}\"", self.expr));
            } else {
                parts.push(self.expr.clone());
            }
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// An ordered `a | b | c` pipeline of commands.
#[derive(Debug, Clone)]
pub struct ShPipe(pub Vec<ShCmd>);

impl fmt::Display for ShPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ");
        write!(f, "{joined}")
    }
}

impl BitOr for ShCmd {
    type Output = ShPipe;

    fn bitor(self, rhs: Self) -> ShPipe {
        ShPipe(vec![self, rhs])
    }
}

impl BitOr<ShCmd> for ShPipe {
    type Output = Self;

    fn bitor(mut self, rhs: ShCmd) -> Self {
        self.0.push(rhs);
        self
    }
}

/// An awk program assembled from statements.
///
/// Rendering single-quotes the program and doubles its braces, so the action
/// block survives both shell quoting and the final template pass without the
/// caller escaping anything by hand.
#[derive(Debug, Clone)]
pub struct AwkBlock {
    statements: Vec<String>,
}

impl AwkBlock {
    pub fn new(statements: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for AwkBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.statements.join("; ");
        write!(f, "'{}'", quote_escape(&format!("{{{{ {body} }}}}")))
    }
}

/// `$( … )` capture of a single command or pipeline.
pub fn subsh_cmd(cmd: impl fmt::Display) -> String {
    format!("$({cmd})")
}

/// `awk '{{ … }}'` over an [`AwkBlock`] program. Variable bindings go in
/// front as ordinary arguments, e.g. `awk(["print n"]).arg("-v n=$count")`.
pub fn awk(statements: impl IntoIterator<Item = impl Into<String>>) -> ShCmd {
    ShCmd::new("awk").expr(AwkBlock::new(statements))
}

/// `echo "expr"`. The expression is double-quoted so embedded variable
/// references still expand.
pub fn echo(expr: impl fmt::Display) -> ShCmd {
    ShCmd::new("echo").quoted_expr(expr)
}

pub fn find(root: impl fmt::Display) -> ShCmd {
    ShCmd::new("find").arg(root)
}

/// `wc -l`.
pub fn wc_l() -> ShCmd {
    ShCmd::new("wc").flag('l')
}

pub fn mkdir_p(path: impl fmt::Display) -> ShCmd {
    ShCmd::new("mkdir").flag('p').arg(path)
}

pub fn mv(from: impl fmt::Display, to: impl fmt::Display) -> ShCmd {
    ShCmd::new("mv").arg(from).arg(to)
}

pub fn cat(path: impl fmt::Display) -> ShCmd {
    ShCmd::new("cat").arg(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_quotes_its_expression() {
        assert_eq!(echo("hello $x").to_string(), "echo \"hello $x\"");
    }

    #[test]
    fn flags_render_combined() {
        let cmd = ShCmd::new("rm").flag('r').flag('f').arg("/tmp/scratch");
        assert_eq!(cmd.to_string(), "rm -rf /tmp/scratch");
    }

    #[test]
    fn pipelines_join_with_pipes() {
        let pipe = echo("{wildcards}") | awk(["print tolower($0)"]) | wc_l();
        assert_eq!(
            pipe.to_string(),
            "echo \"{wildcards}\" | awk '{{ print tolower($0) }}' | wc -l"
        );
    }

    #[test]
    fn awk_joins_statements_and_doubles_braces() {
        let cmd = awk(["gsub(/a/, \"b\")", "print"]).arg("-v n=$count");
        assert_eq!(
            cmd.to_string(),
            "awk -v n=$count '{{ gsub(/a/, \"b\"); print }}'"
        );
    }

    #[test]
    fn awk_block_escapes_embedded_quotes() {
        let block = AwkBlock::new(["print '$1'"]);
        assert_eq!(block.to_string(), r#"'{{ print '"'"'$1'"'"' }}'"#);
    }

    #[test]
    fn subsh_cmd_wraps_in_capture() {
        assert_eq!(subsh_cmd(wc_l().arg("file")), "$(wc -l file)");
    }

    #[test]
    fn empty_parts_leave_no_gaps() {
        assert_eq!(ShCmd::new("true").to_string(), "true");
        assert_eq!(mkdir_p("/a/b").to_string(), "mkdir -p /a/b");
    }
}
