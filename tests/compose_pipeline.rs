//! End-to-end composition through the public API: an enhancer with
//! assignments, substitutions and a failure branch, materialized into the
//! script cache.

use shellforge::{
    BashWrapper, ComposeError, Enhancer, NameAllocator, ScriptComp, ScriptForge, ShVar,
};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Stages output into a scratch directory and removes it on failure.
struct StageOut {
    dir: &'static str,
}

impl Enhancer for StageOut {
    fn wrapper(&self, names: &mut NameAllocator) -> Result<BashWrapper, ComposeError> {
        let dest = ShVar::fresh(names);
        dest.set(self.dir);
        let comp = ScriptComp::new()
            .assign(&dest)
            .before(format!("mkdir -p {dest}"))
            .failure(format!("rm -rf {dest}"));
        Ok(BashWrapper::new(comp).with_subs([("dest".to_string(), dest.clone())]))
    }

    fn log_format(&self, cmd: &str) -> Option<String> {
        Some(format!("{cmd}  # staged via {}", self.dir))
    }
}

fn cached_scripts(root: &std::path::Path) -> Vec<PathBuf> {
    fs::read_dir(root.join("__sb_scripts__"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

#[test]
fn enhancer_substitutions_and_branches_reach_the_cached_script() {
    let root = TempDir::new().unwrap();
    let forge = ScriptForge::new(root.path()).colorize(false);
    let stage = StageOut { dir: "/tmp/stage" };

    let result = forge
        .enhance(&[&stage], &["cp {input} {dest}/out"])
        .unwrap();

    let scripts = cached_scripts(root.path());
    assert_eq!(scripts.len(), 1);
    let body = fs::read_to_string(&scripts[0]).unwrap();

    assert!(body.starts_with("#!/bin/bash\nset -euo pipefail; "));
    // The substituted variable is assigned, used in setup, and referenced in
    // the core; the deferred field became the first positional parameter.
    assert!(body.contains("a=/tmp/stage"));
    assert!(body.contains("mkdir -p $a"));
    assert!(body.contains("cp ${1} $a/out"));
    // Failure branch plus status re-propagation.
    assert!(body.contains("rm -rf $a; false"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&scripts[0]).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    // The preview shows the rewritten logical command; the invocation passes
    // the deferred field through for the host engine's own substitution.
    let mut lines = result.lines();
    assert_eq!(
        lines.next().unwrap(),
        "# shellforge enhanced: enable debug mode to view the full script"
    );
    assert_eq!(
        lines.next().unwrap(),
        "## > cp '{input}' '{dest}'/out  # staged via /tmp/stage"
    );
    assert_eq!(lines.next().unwrap(), "");
    let invocation = lines.next().unwrap();
    assert!(invocation.starts_with(scripts[0].to_str().unwrap()));
    assert!(invocation.ends_with(" '{input}'"));
}

#[test]
fn merged_enhancers_keep_their_order() {
    struct Before(&'static str);

    impl Enhancer for Before {
        fn wrapper(&self, _names: &mut NameAllocator) -> Result<BashWrapper, ComposeError> {
            Ok(BashWrapper::new(ScriptComp::new().before(self.0)))
        }
    }

    let forge = ScriptForge::new("/nonexistent")
        .colorize(false)
        .disable_script(true);
    let cmd = forge
        .enhance(&[&Before("echo first"), &Before("echo second")], &["echo hi"])
        .unwrap();
    assert_eq!(
        cmd,
        "set -euo pipefail; echo first; echo second; ( echo hi )"
    );
}
