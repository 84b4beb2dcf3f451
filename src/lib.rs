//! Composable bash script generation for workflow rules.
//!
//! Workflow engines hand their rules to the shell as single strings. This
//! crate builds those strings from typed pieces instead: a statement model
//! with compact and debug renderings, a quote-aware placeholder substitution
//! engine, and an enhancer protocol that lets independent setup/teardown
//! behaviors compose around a core command. [`ScriptForge`] ties it together,
//! materializing composed scripts into a content-addressed cache so the
//! command the engine finally sees stays short.

pub mod constants;
pub mod core;

pub use crate::core::cmd::{
    AwkBlock, ShCmd, ShPipe, awk, cat, echo, find, mkdir_p, mv, subsh_cmd, wc_l,
};
pub use crate::core::composer::{BashWrapper, ComposeError, Enhancer, ScriptComp, TextMod};
pub use crate::core::fields::{
    Field, FieldError, Segment, escape_braces, parse_template, quote_aware_merge, substitute,
    unresolved_fields,
};
pub use crate::core::helpers::{hash_path, resolve, rm_if_exists};
pub use crate::core::materializer::ScriptForge;
pub use crate::core::names::{NameAllocator, NameError};
pub use crate::core::quoting::{QuoteState, quote_escape, scan};
pub use crate::core::statement::{
    Flock, RenderContext, ShBlock, ShCond, ShEntity, ShFor, ShForLoop, ShIf, ShTry, ShValue,
    ShVar, Statement, canonicalize,
};
