// src/constants.rs

/// The name of the directory holding materialized scripts, under the script root.
pub const SCRIPTS_DIR: &str = "__sb_scripts__";

/// Shebang line written at the top of every materialized script file.
pub const SHEBANG: &str = "#!/bin/bash\n";

/// Strict-mode prologue prepended to every composed script.
pub const STRICT_MODE: &str = "set -euo pipefail";

/// Placeholder namespaces owned by the host workflow engine.
///
/// A field whose leading identifier is listed here is not an error when it
/// cannot be resolved locally: it is re-emitted verbatim so the host engine's
/// own substitution pass can fill it in.
pub const DEFERRED_FIELD_NAMESPACES: &[&str] = &[
    "input",
    "output",
    "params",
    "wildcards",
    "resources",
    "threads",
    "log",
    "config",
    "rule",
];
