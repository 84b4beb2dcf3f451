//! Enhancer composition: merging per-enhancer script fragments around a core
//! command.
//!
//! Each enhancer contributes one [`ScriptComp`]: variable declarations, a
//! `before` fragment, success/failure/finally fragments, and optional text
//! transforms. [`BashWrapper::merge`] assembles any number of contributions,
//! in order, into a single statement tree around the core command:
//!
//! ```text
//! declarations…; before…; Try(core).catch(failure…, false).else(success…).finally(after…)
//! ```
//!
//! `inner_mod` transforms wrap only the core command text, before any other
//! wrapping (e.g. a write-permission guard around the protected command);
//! `outer_mod` transforms wrap the fully assembled block after rendering
//! (e.g. serializing the whole unit, bookkeeping included, under a lock).

use crate::core::fields::{FieldError, substitute};
use crate::core::names::{NameAllocator, NameError};
use crate::core::statement::{RenderContext, ShBlock, ShEntity, ShTry, ShVar};
use log::debug;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while composing enhancer contributions.
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Name(#[from] NameError),
}

/// A pure text-to-text transform applied during assembly.
pub type TextMod = Box<dyn Fn(&str) -> String>;

/// One enhancer's contribution to the composed script.
#[derive(Default)]
pub struct ScriptComp {
    assignments: Vec<ShVar>,
    before: ShEntity,
    success: ShEntity,
    failure: ShEntity,
    after: ShEntity,
    inner_mod: Option<TextMod>,
    outer_mod: Option<TextMod>,
}

impl ScriptComp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a variable assigned at the top of the composed script.
    pub fn assign(mut self, var: &ShVar) -> Self {
        self.assignments.push(var.clone());
        self
    }

    /// Runs unconditionally before the core command.
    pub fn before(mut self, entity: impl Into<ShEntity>) -> Self {
        self.before = entity.into();
        self
    }

    /// Runs when the core command exits zero.
    pub fn success(mut self, entity: impl Into<ShEntity>) -> Self {
        self.success = entity.into();
        self
    }

    /// Runs when the core command exits non-zero, before the failure is
    /// re-propagated.
    pub fn failure(mut self, entity: impl Into<ShEntity>) -> Self {
        self.failure = entity.into();
        self
    }

    /// Runs regardless of the core command's exit status.
    pub fn finally(mut self, entity: impl Into<ShEntity>) -> Self {
        self.after = entity.into();
        self
    }

    /// Transform applied to the core command text before any wrapping.
    pub fn inner_mod(mut self, f: impl Fn(&str) -> String + 'static) -> Self {
        self.inner_mod = Some(Box::new(f));
        self
    }

    /// Transform applied to the rendered block after assembly.
    pub fn outer_mod(mut self, f: impl Fn(&str) -> String + 'static) -> Self {
        self.outer_mod = Some(Box::new(f));
        self
    }

    /// True when this component contributes nothing at all.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
            && self.before.is_empty()
            && self.success.is_empty()
            && self.failure.is_empty()
            && self.after.is_empty()
            && self.inner_mod.is_none()
            && self.outer_mod.is_none()
    }
}

impl fmt::Debug for ScriptComp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptComp")
            .field("assignments", &self.assignments)
            .field("before", &self.before)
            .field("success", &self.success)
            .field("failure", &self.failure)
            .field("after", &self.after)
            .field("inner_mod", &self.inner_mod.is_some())
            .field("outer_mod", &self.outer_mod.is_some())
            .finish()
    }
}

/// The ordered contributions of a composition plus the merged substitution
/// table.
#[derive(Debug, Default)]
pub struct BashWrapper {
    comps: Vec<ScriptComp>,
    subs: HashMap<String, ShVar>,
}

impl BashWrapper {
    pub fn new(comp: ScriptComp) -> Self {
        Self {
            comps: vec![comp],
            subs: HashMap::new(),
        }
    }

    /// Adds substitution table entries mapping field names to variables.
    pub fn with_subs(mut self, subs: impl IntoIterator<Item = (String, ShVar)>) -> Self {
        self.subs.extend(subs);
        self
    }

    /// Concatenates contributions in order and merges substitution tables.
    ///
    /// When two wrappers substitute the same field name, the later wrapper
    /// wins. This is intentional append-only-merge semantics, not an error:
    /// it lets a later enhancer refine an earlier one's substitution.
    pub fn merge(wrappers: impl IntoIterator<Item = Self>) -> Self {
        let mut merged = Self::default();
        for wrapper in wrappers {
            merged.comps.extend(wrapper.comps);
            merged.subs.extend(wrapper.subs);
        }
        merged
    }

    /// Assembles the composed statement tree around `core` and renders it.
    pub fn format_script(
        &self,
        core: &str,
        ctx: &mut RenderContext,
    ) -> Result<String, ComposeError> {
        let mut script = substitute(core, &self.subs)?;
        for inner_mod in self.comps.iter().filter_map(|c| c.inner_mod.as_ref()) {
            script = inner_mod(&script);
        }
        debug!("composing {} enhancer contribution(s)", self.comps.len());

        let mut try_stmt = ShTry::new(vec![ShEntity::from(script)]);
        let failures: Vec<ShEntity> = self.comps.iter().map(|c| c.failure.clone()).collect();
        if failures.iter().any(|e| !e.is_empty()) {
            let mut entities = failures;
            // Re-propagate the non-zero status after the failure fragments.
            entities.push(ShEntity::from("false"));
            try_stmt = try_stmt.catch(entities);
        }
        let successes: Vec<ShEntity> = self.comps.iter().map(|c| c.success.clone()).collect();
        if successes.iter().any(|e| !e.is_empty()) {
            try_stmt = try_stmt.or_else(successes);
        }
        let afters: Vec<ShEntity> = self.comps.iter().map(|c| c.after.clone()).collect();
        if afters.iter().any(|e| !e.is_empty()) {
            try_stmt = try_stmt.finally(afters);
        }

        let mut entities: Vec<ShEntity> = Vec::new();
        for comp in &self.comps {
            entities.extend(comp.assignments.iter().map(ShEntity::from));
        }
        for comp in &self.comps {
            entities.push(comp.before.clone());
        }
        entities.push(ShEntity::from(try_stmt));

        let mut block = ShBlock::unwrapped(entities).render(ctx);
        for outer_mod in self.comps.iter().filter_map(|c| c.outer_mod.as_ref()) {
            block = outer_mod(&block);
        }
        Ok(block)
    }
}

/// A producer of script contributions: one self-contained setup/teardown
/// behavior wrapped around a core command.
pub trait Enhancer {
    /// Produce this enhancer's contribution for one composition session.
    /// Fresh variable names must come from `names` so they cannot collide
    /// with other enhancers in the same session.
    fn wrapper(&self, names: &mut NameAllocator) -> Result<BashWrapper, ComposeError>;

    /// A stable content signature used for cache hashing in place of the full
    /// script text, when the enhancer can provide one cheaply.
    fn signature(&self) -> Option<String> {
        None
    }

    /// Optional rewrite of the logical command for human-readable logging.
    fn log_format(&self, cmd: &str) -> Option<String> {
        let _ = cmd;
        None
    }
}
