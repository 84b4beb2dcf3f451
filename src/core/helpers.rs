//! Ready-made script snippets built on the statement and command builders.

use crate::core::quoting::quote_escape;
use crate::core::statement::{ShCond, ShIf};
use crate::sh;
use std::fmt;

/// Removes `path` if it exists, whether file, directory or dangling symlink.
pub fn rm_if_exists(path: impl fmt::Display, recursive: bool) -> ShCond {
    let path = path.to_string();
    let flag = if recursive { "-rf " } else { "" };
    ShIf::exists(&path)
        .or(ShIf::is_symlink(&path))
        .then(sh![format!("rm {flag}{path}")])
}

/// `$(realpath path)` capture, optionally without resolving symlinks.
pub fn resolve(path: impl fmt::Display, no_symlinks: bool) -> String {
    let flag = if no_symlinks { "-s " } else { "" };
    format!("$(realpath {flag}{path})")
}

/// A stable md5 digest of a path's resolved location, computed at script run
/// time. Braces are doubled so the snippet survives the template pass.
pub fn hash_path(path: impl fmt::Display) -> String {
    format!(
        "$(realpath -s '{}' | md5sum | awk '{{{{print $1}}}}')",
        quote_escape(&path.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::statement::RenderContext;

    #[test]
    fn rm_if_exists_guards_on_file_or_symlink() {
        let mut ctx = RenderContext::compact();
        assert_eq!(
            rm_if_exists("$d/out", true).render(&mut ctx),
            "if [[ -e $d/out || -h $d/out ]]; then rm -rf $d/out; fi"
        );
    }

    #[test]
    fn resolve_renders_a_capture() {
        assert_eq!(resolve("$p", false), "$(realpath $p)");
        assert_eq!(resolve("$p", true), "$(realpath -s $p)");
    }

    #[test]
    fn hash_path_escapes_quotes_and_doubles_braces() {
        let snippet = hash_path("it's/a/path");
        assert!(snippet.contains(r#"'it'"'"'s/a/path'"#));
        assert!(snippet.contains("'{{{{print $1}}}}'") || snippet.contains("{{print $1}}"));
    }
}
