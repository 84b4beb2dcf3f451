//! Script materialization and the top-level enhancement entry point.
//!
//! [`ScriptForge::enhance`] composes enhancer contributions around a core
//! command, then (outside debug mode) writes the result to a content-addressed
//! script cache and returns a short invocation string in its place. Unresolved
//! workflow fields become positional parameters of the cached script, so one
//! cache entry serves every job that shares the same logical command.

use crate::constants::{SCRIPTS_DIR, SHEBANG, STRICT_MODE};
use crate::core::color::Ansi;
use crate::core::composer::{BashWrapper, Enhancer};
use crate::core::fields::{FieldError, Segment, parse_template, quote_aware_merge};
use crate::core::quoting::QuoteState;
use crate::core::statement::{RenderContext, ShBlock, ShEntity};
use anyhow::{Context, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Composition settings shared by every enhanced command of a workflow run.
#[derive(Debug, Clone)]
pub struct ScriptForge {
    script_root: PathBuf,
    debug: bool,
    colorize: bool,
    disable_script: bool,
}

impl ScriptForge {
    /// The script cache will live under `script_root`.
    pub fn new(script_root: impl Into<PathBuf>) -> Self {
        Self {
            script_root: script_root.into(),
            debug: false,
            colorize: true,
            disable_script: false,
        }
    }

    /// Debug mode: multi-line rendering, no script cache, no preview.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn colorize(mut self, colorize: bool) -> Self {
        self.colorize = colorize;
        self
    }

    /// Returns the composed one-liner directly instead of caching it, for
    /// hosts that cannot execute an external script.
    pub fn disable_script(mut self, disable: bool) -> Self {
        self.disable_script = disable;
        self
    }

    /// Wraps `core_cmd` with the given enhancers and returns the command the
    /// host workflow engine should execute.
    ///
    /// With no enhancers the core command is returned untouched. In debug
    /// mode (or with the cache disabled) the full composed script comes back
    /// inline; otherwise it is materialized under
    /// `<script_root>/__sb_scripts__/<md5-hex>` and the returned string is a
    /// commented preview followed by the cached script's invocation.
    pub fn enhance(&self, enhancers: &[&dyn Enhancer], core_cmd: &[&str]) -> Result<String> {
        let mut ctx = RenderContext::new(self.debug);
        let parts: Vec<ShEntity> = core_cmd.iter().map(|part| ShEntity::from(*part)).collect();
        let core = ShBlock::unwrapped(parts).render(&mut ctx);
        if enhancers.is_empty() {
            return Ok(core);
        }

        let mut wrappers = Vec::with_capacity(enhancers.len());
        for enhancer in enhancers {
            wrappers.push(enhancer.wrapper(&mut ctx.names)?);
        }
        let wrapper = BashWrapper::merge(wrappers);
        let body = wrapper
            .format_script(&core, &mut ctx)
            .context("failed to compose enhancer contributions")?;
        let cmd = if self.debug {
            format!("{STRICT_MODE}\n{body}")
        } else {
            format!("{STRICT_MODE}; {body}")
        };
        if self.debug || self.disable_script {
            return Ok(cmd);
        }

        let (script, fields) = positionalize(&cmd)?;
        let hash = self.content_hash(enhancers, &core, &script);
        let path = self.write_script(&hash, &script)?;

        let mut invocation = path.display().to_string();
        for field in &fields {
            invocation.push_str(&format!(" '{field}'"));
        }

        let logical = enhancers.iter().fold(core, |cmd, enhancer| {
            enhancer.log_format(&cmd).unwrap_or(cmd)
        });
        let ansi = Ansi::new(self.colorize);
        Ok(format!(
            "# shellforge enhanced: enable debug mode to view the full script\n\
             ## > {}{}\n\n{}\n#{}",
            ansi.decorate_cmd(&logical),
            ansi.alt_buff(),
            invocation,
            ansi.main_buff()
        ))
    }

    /// Cache key for one materialized script. Enhancers that expose cheap
    /// content signatures spare us hashing their full expansion; the core
    /// command is folded in so two commands sharing enhancers still get
    /// distinct entries.
    fn content_hash(&self, enhancers: &[&dyn Enhancer], core: &str, script: &str) -> String {
        let mut signatures: Vec<String> = enhancers
            .iter()
            .filter_map(|enhancer| enhancer.signature())
            .collect();
        if signatures.is_empty() {
            return md5_hex(script.as_bytes());
        }
        signatures.sort();
        let combined = format!("{}{core}", md5_hex(signatures.concat().as_bytes()));
        md5_hex(combined.as_bytes())
    }

    fn write_script(&self, hash: &str, script: &str) -> Result<PathBuf> {
        let dir = self.script_root.join(SCRIPTS_DIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create script cache at '{}'", dir.display()))?;
        let path = dir.join(hash);
        if path.exists() {
            debug!("script cache hit: {}", path.display());
            return Ok(path);
        }
        debug!("script cache miss, writing: {}", path.display());
        fs::write(&path, script)
            .with_context(|| format!("failed to write script '{}'", path.display()))?;
        make_executable(&path)?;
        Ok(path)
    }
}

/// Rewrites every unresolved field of `cmd` as a bash positional parameter,
/// wrapped in `#!/bin/bash`, and lists the replacement-field texts in argument
/// order. Repeated fields share one parameter. Parameters landing inside a
/// single-quoted region are spliced out of the quotes so they still expand.
fn positionalize(cmd: &str) -> Result<(String, Vec<String>), FieldError> {
    let mut order: Vec<String> = Vec::new();
    let mut parts: Vec<(String, Option<String>)> = Vec::new();
    let mut pending = String::new();
    for segment in parse_template(cmd)? {
        match segment {
            // The script is the final pass, so literals go in unescaped.
            Segment::Literal(literal) => pending.push_str(&literal),
            Segment::Field(field) => {
                let key = field.replacement_field();
                let index = match order.iter().position(|seen| *seen == key) {
                    Some(index) => index,
                    None => {
                        order.push(key);
                        order.len() - 1
                    }
                };
                parts.push((std::mem::take(&mut pending), Some(format!("${{{}}}", index + 1))));
            }
        }
    }
    parts.push((pending, None));
    let body = quote_aware_merge(&parts, QuoteState::Single);
    Ok((format!("{SHEBANG}{body}"), order))
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("failed to set permissions on '{}'", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::composer::{ComposeError, ScriptComp};
    use crate::core::names::NameAllocator;
    use crate::core::statement::Flock;
    use tempfile::TempDir;

    struct Noop;

    impl Enhancer for Noop {
        fn wrapper(&self, _names: &mut NameAllocator) -> Result<BashWrapper, ComposeError> {
            Ok(BashWrapper::new(ScriptComp::new()))
        }
    }

    struct Signed(&'static str);

    impl Enhancer for Signed {
        fn wrapper(&self, _names: &mut NameAllocator) -> Result<BashWrapper, ComposeError> {
            Ok(BashWrapper::new(ScriptComp::new().before("true")))
        }

        fn signature(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn cached_scripts(root: &Path) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = fs::read_dir(root.join(SCRIPTS_DIR))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn no_enhancers_returns_the_core_untouched() {
        let forge = ScriptForge::new("/nonexistent").colorize(false);
        assert_eq!(forge.enhance(&[], &["echo hi"]).unwrap(), "echo hi");
    }

    #[test]
    fn noop_enhancer_composes_to_a_strict_subshell() {
        let forge = ScriptForge::new("/nonexistent")
            .colorize(false)
            .disable_script(true);
        let cmd = forge.enhance(&[&Noop], &["echo hi"]).unwrap();
        assert_eq!(cmd, "set -euo pipefail; ( echo hi )");
    }

    #[test]
    fn debug_mode_renders_multiline_and_skips_the_cache() {
        let forge = ScriptForge::new("/nonexistent").colorize(false).debug(true);
        let cmd = forge.enhance(&[&Noop], &["echo hi"]).unwrap();
        assert_eq!(cmd, "set -euo pipefail\n(\n    echo hi\n)");
    }

    #[test]
    fn materialized_script_is_cached_once_and_executable() {
        let root = TempDir::new().unwrap();
        let forge = ScriptForge::new(root.path()).colorize(false);

        let first = forge.enhance(&[&Noop], &["echo hi"]).unwrap();
        let scripts = cached_scripts(root.path());
        assert_eq!(scripts.len(), 1);
        let body = fs::read_to_string(&scripts[0]).unwrap();
        assert_eq!(body, "#!/bin/bash\nset -euo pipefail; ( echo hi )");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&scripts[0]).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }

        // Same command again: same entry, same bytes, same invocation.
        let second = forge.enhance(&[&Noop], &["echo hi"]).unwrap();
        assert_eq!(first, second);
        assert_eq!(cached_scripts(root.path()).len(), 1);
        assert_eq!(fs::read_to_string(&scripts[0]).unwrap(), body);
    }

    #[test]
    fn distinct_commands_get_distinct_cache_entries() {
        let root = TempDir::new().unwrap();
        let forge = ScriptForge::new(root.path()).colorize(false);
        forge.enhance(&[&Noop], &["echo one"]).unwrap();
        forge.enhance(&[&Noop], &["echo two"]).unwrap();
        assert_eq!(cached_scripts(root.path()).len(), 2);
    }

    #[test]
    fn deferred_fields_become_positional_parameters() {
        let root = TempDir::new().unwrap();
        let forge = ScriptForge::new(root.path()).colorize(false);
        let result = forge
            .enhance(&[&Noop], &["cp {input} {output}", "touch {output}"])
            .unwrap();

        let scripts = cached_scripts(root.path());
        let body = fs::read_to_string(&scripts[0]).unwrap();
        assert!(body.contains("cp ${1} ${2}"));
        // The repeated field reuses its parameter.
        assert!(body.contains("touch ${2}"));

        let invocation = result.lines().nth(3).unwrap();
        assert!(invocation.starts_with(scripts[0].to_str().unwrap()));
        assert!(invocation.ends_with("'{input}' '{output}'"));
    }

    #[test]
    fn positionalize_splices_parameters_out_of_single_quotes() {
        let (script, fields) = positionalize("echo '{input}'").unwrap();
        assert_eq!(script, "#!/bin/bash\necho ''${1}''");
        assert_eq!(fields, ["{input}"]);
    }

    struct Locked;

    impl Enhancer for Locked {
        fn wrapper(&self, _names: &mut NameAllocator) -> Result<BashWrapper, ComposeError> {
            let lock = Flock::new("/tmp/forge.lock").unbounded().run(vec!["work".into()]);
            Ok(BashWrapper::new(ScriptComp::new().before(lock)))
        }
    }

    #[test]
    fn lock_fd_redirects_survive_materialization() {
        let root = TempDir::new().unwrap();
        let forge = ScriptForge::new(root.path()).colorize(false);
        let result = forge.enhance(&[&Locked], &["echo hi"]).unwrap();

        let scripts = cached_scripts(root.path());
        let body = fs::read_to_string(&scripts[0]).unwrap();
        // The fd allocation reaches bash intact instead of being rewritten
        // into a positional parameter.
        assert!(body.contains("exec {a}>/tmp/forge.lock"));
        assert!(!body.contains("${1}"));

        // And no phantom field leaks into the invocation.
        let invocation = result.lines().nth(3).unwrap();
        assert_eq!(invocation, scripts[0].to_str().unwrap());
    }

    #[test]
    fn signatures_replace_full_script_hashing() {
        let root = TempDir::new().unwrap();
        let forge = ScriptForge::new(root.path()).colorize(false);
        forge.enhance(&[&Signed("a")], &["echo hi"]).unwrap();
        forge.enhance(&[&Signed("b")], &["echo hi"]).unwrap();
        // Different signatures, same script text: two cache entries.
        assert_eq!(cached_scripts(root.path()).len(), 2);
    }

    #[test]
    fn preview_names_the_logical_command() {
        let root = TempDir::new().unwrap();
        let forge = ScriptForge::new(root.path()).colorize(false);
        let result = forge.enhance(&[&Noop], &["echo hi"]).unwrap();
        let mut lines = result.lines();
        assert_eq!(
            lines.next().unwrap(),
            "# shellforge enhanced: enable debug mode to view the full script"
        );
        assert_eq!(lines.next().unwrap(), "## > echo hi");
    }
}
