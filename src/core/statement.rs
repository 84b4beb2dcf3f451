//! The shell statement model and its rendering engine.
//!
//! Statements form a closed, tagged union; heterogeneous inputs (text,
//! variables, nested groups) are normalized by [`canonicalize`] before any
//! rendering happens, so the renderer never inspects "shapes" at runtime.
//! Rendering is driven by an explicit [`RenderContext`] (compact mode joins
//! statements with `; `, debug mode puts each statement on its own line with
//! indentation), threaded mutably through every call so statements that need
//! fresh variable names (try/except status capture, lock file descriptors)
//! draw them from the session's [`NameAllocator`].

use crate::core::cmd::{ShCmd, ShPipe};
use crate::core::names::{NameAllocator, NameError};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Length above which a debug-mode `$( … )` capture switches to its
/// multi-line form.
const SUBSH_FOLD_WIDTH: usize = 40;

// --- RENDER CONTEXT ---

/// Configuration and session state threaded through every render call.
#[derive(Debug)]
pub struct RenderContext {
    /// Debug form: one statement per line, indented block bodies.
    pub debug: bool,
    /// Session-scoped name allocator shared by construction and rendering.
    pub names: NameAllocator,
}

impl RenderContext {
    pub fn new(debug: bool) -> Self {
        Self {
            debug,
            names: NameAllocator::new(),
        }
    }

    /// Compact rendering with a fresh name allocator.
    pub fn compact() -> Self {
        Self::new(false)
    }

    fn sep(&self) -> &'static str {
        if self.debug { "\n" } else { "; " }
    }

    fn wrap(&self, body: &str) -> String {
        if self.debug {
            format!("(\n{}\n)", indent(body))
        } else {
            format!("( {body} )")
        }
    }
}

/// Indents every non-empty line by four spaces.
pub(crate) fn indent(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("    {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// --- VARIABLES ---

/// The deferred value of a [`ShVar`].
#[derive(Debug, Clone, Default)]
pub enum ShValue {
    /// Renders as `name=''`.
    #[default]
    Empty,
    /// Raw assignment text; variable references and captures pass through.
    Text(String),
    /// `name=$( … )` sub-shell capture.
    Capture(ShBlock),
}

impl From<&str> for ShValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ShValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&ShVar> for ShValue {
    fn from(var: &ShVar) -> Self {
        Self::Text(var.reference())
    }
}

impl From<ShBlock> for ShValue {
    fn from(block: ShBlock) -> Self {
        Self::Capture(block)
    }
}

impl From<ShCmd> for ShValue {
    fn from(cmd: ShCmd) -> Self {
        Self::Capture(ShBlock::from_statements(vec![Statement::Command(cmd)], false))
    }
}

impl From<ShPipe> for ShValue {
    fn from(pipe: ShPipe) -> Self {
        Self::Capture(ShBlock::from_statements(vec![Statement::Pipe(pipe)], false))
    }
}

#[derive(Debug)]
struct VarInner {
    name: String,
    export: Cell<bool>,
    value: RefCell<ShValue>,
}

/// A named shell variable slot.
///
/// Handles have reference semantics: the enhancer that created a variable owns
/// it, and everything that embeds it in a larger statement sees the same slot.
/// It renders exactly once as an assignment (when canonicalized in statement
/// position) and is read thereafter through its `$name` reference form.
#[derive(Debug, Clone)]
pub struct ShVar {
    inner: Rc<VarInner>,
}

impl ShVar {
    /// A variable with an auto-generated name.
    pub fn fresh(names: &mut NameAllocator) -> Self {
        Self::build(names.fresh())
    }

    /// A variable with an explicit name. Colliding with a live name in the
    /// session fails immediately; names are never silently changed.
    pub fn named(names: &mut NameAllocator, name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        names.reserve(&name)?;
        Ok(Self::build(name))
    }

    fn build(name: String) -> Self {
        Self {
            inner: Rc::new(VarInner {
                name,
                export: Cell::new(false),
                value: RefCell::new(ShValue::Empty),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Sets the deferred value; visible to every holder of this handle.
    pub fn set(&self, value: impl Into<ShValue>) -> &Self {
        *self.inner.value.borrow_mut() = value.into();
        self
    }

    /// Marks the assignment as exported to sub-processes.
    pub fn export(&self) -> &Self {
        self.inner.export.set(true);
        self
    }

    /// The `$name` reference form.
    pub fn reference(&self) -> String {
        format!("${}", self.inner.name)
    }

    pub(crate) fn render_assignment(&self, ctx: &mut RenderContext) -> String {
        let export = if self.inner.export.get() { "export " } else { "" };
        let name = &self.inner.name;
        let value = self.inner.value.borrow();
        match &*value {
            ShValue::Empty => format!("{export}{name}=''"),
            ShValue::Text(text) => format!("{export}{name}={text}"),
            ShValue::Capture(block) => format!("{export}{name}={}", render_subsh(block, ctx)),
        }
    }
}

impl fmt::Display for ShVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.inner.name)
    }
}

// --- ENTITIES & CANONICALIZATION ---

/// Anything that can appear in statement position when building blocks.
///
/// This is input sugar only: [`canonicalize`] turns a list of entities into
/// plain [`Statement`]s before rendering, dropping empties and recursively
/// flattening groups into nested blocks.
#[derive(Debug, Clone, Default)]
pub enum ShEntity {
    #[default]
    Empty,
    Text(String),
    Var(ShVar),
    Stmt(Statement),
    Group(Vec<ShEntity>),
}

impl ShEntity {
    /// True when the entity would contribute nothing to a render.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(t) => t.is_empty(),
            Self::Var(_) | Self::Stmt(_) => false,
            Self::Group(entities) => entities.iter().all(Self::is_empty),
        }
    }
}

impl From<&str> for ShEntity {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ShEntity {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&String> for ShEntity {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

impl From<ShVar> for ShEntity {
    fn from(var: ShVar) -> Self {
        Self::Var(var)
    }
}

impl From<&ShVar> for ShEntity {
    fn from(var: &ShVar) -> Self {
        Self::Var(var.clone())
    }
}

impl From<Statement> for ShEntity {
    fn from(statement: Statement) -> Self {
        Self::Stmt(statement)
    }
}

impl From<Vec<ShEntity>> for ShEntity {
    fn from(entities: Vec<ShEntity>) -> Self {
        Self::Group(entities)
    }
}

impl From<ShBlock> for ShEntity {
    fn from(block: ShBlock) -> Self {
        Self::Stmt(Statement::Block(block))
    }
}

impl From<ShCmd> for ShEntity {
    fn from(cmd: ShCmd) -> Self {
        Self::Stmt(Statement::Command(cmd))
    }
}

impl From<ShPipe> for ShEntity {
    fn from(pipe: ShPipe) -> Self {
        Self::Stmt(Statement::Pipe(pipe))
    }
}

impl From<ShCond> for ShEntity {
    fn from(cond: ShCond) -> Self {
        Self::Stmt(Statement::If(cond))
    }
}

impl From<ShForLoop> for ShEntity {
    fn from(for_loop: ShForLoop) -> Self {
        Self::Stmt(Statement::For(for_loop))
    }
}

impl From<ShTry> for ShEntity {
    fn from(try_stmt: ShTry) -> Self {
        Self::Stmt(Statement::Try(Box::new(try_stmt)))
    }
}

impl From<Flock> for ShEntity {
    fn from(lock: Flock) -> Self {
        Self::Stmt(Statement::Lock(lock))
    }
}

/// Builds a `Vec<ShEntity>` from mixed entity-convertible expressions.
#[macro_export]
macro_rules! sh {
    ($($entity:expr),* $(,)?) => {
        vec![$($crate::core::statement::ShEntity::from($entity)),*]
    };
}

/// Normalizes entities into statements: empties are dropped, groups become
/// nested wrapped blocks, and a bare variable becomes its assignment
/// statement (variables in *value* position keep their reference form).
pub fn canonicalize(entities: Vec<ShEntity>) -> Vec<Statement> {
    entities
        .into_iter()
        .filter_map(|entity| match entity {
            ShEntity::Empty => None,
            ShEntity::Text(text) if text.is_empty() => None,
            ShEntity::Text(text) => Some(Statement::Literal(text)),
            ShEntity::Var(var) => Some(Statement::Assign(var)),
            ShEntity::Stmt(statement) => Some(statement),
            ShEntity::Group(group) => {
                let block = ShBlock::wrapped(group);
                if block.is_empty() {
                    None
                } else {
                    Some(Statement::Block(block))
                }
            }
        })
        .collect()
}

// --- STATEMENTS ---

/// The closed set of shell constructs this engine emits.
#[derive(Debug, Clone)]
pub enum Statement {
    Literal(String),
    Assign(ShVar),
    Command(ShCmd),
    Pipe(ShPipe),
    Block(ShBlock),
    If(ShCond),
    For(ShForLoop),
    Try(Box<ShTry>),
    Lock(Flock),
    Subshell(ShBlock),
}

impl Statement {
    pub fn render(&self, ctx: &mut RenderContext) -> String {
        match self {
            Self::Literal(text) => text.clone(),
            Self::Assign(var) => var.render_assignment(ctx),
            Self::Command(cmd) => cmd.to_string(),
            Self::Pipe(pipe) => pipe.to_string(),
            Self::Block(block) => block.render(ctx),
            Self::If(cond) => cond.render(ctx),
            Self::For(for_loop) => for_loop.render(ctx),
            Self::Try(try_stmt) => try_stmt.render(ctx),
            Self::Lock(lock) => lock.render(ctx),
            Self::Subshell(block) => render_subsh(block, ctx),
        }
    }
}

fn render_joined(statements: &[Statement], ctx: &mut RenderContext) -> String {
    let parts: Vec<String> = statements
        .iter()
        .map(|s| s.render(ctx))
        .filter(|s| !s.is_empty())
        .collect();
    parts.join(ctx.sep())
}

/// `$( … )` capture; in debug mode long bodies fold onto their own lines.
fn render_subsh(block: &ShBlock, ctx: &mut RenderContext) -> String {
    let body = render_joined(&block.statements, ctx);
    if ctx.debug && body.len() > SUBSH_FOLD_WIDTH {
        format!("$(\n{}\n)", indent(&body))
    } else {
        format!("$({body})")
    }
}

// --- BLOCKS ---

/// An ordered group of statements, optionally wrapped in `( … )`.
#[derive(Debug, Clone, Default)]
pub struct ShBlock {
    statements: Vec<Statement>,
    wrap: bool,
}

impl ShBlock {
    /// A sub-shell-wrapped block: `( a; b )`.
    pub fn wrapped(entities: Vec<ShEntity>) -> Self {
        Self {
            statements: canonicalize(entities),
            wrap: true,
        }
    }

    /// An unwrapped sequence: `a; b`.
    pub fn unwrapped(entities: Vec<ShEntity>) -> Self {
        Self {
            statements: canonicalize(entities),
            wrap: false,
        }
    }

    pub(crate) fn from_statements(statements: Vec<Statement>, wrap: bool) -> Self {
        Self { statements, wrap }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Renders the block; a block with no effective statements renders as the
    /// empty string, never as `( )`.
    pub fn render(&self, ctx: &mut RenderContext) -> String {
        let body = render_joined(&self.statements, ctx);
        if body.is_empty() {
            return String::new();
        }
        if self.wrap { ctx.wrap(&body) } else { body }
    }
}

// --- CONDITIONALS ---

/// A `[[ … ]]` test expression under construction.
#[derive(Debug, Clone)]
pub struct ShIf {
    expr: String,
}

impl ShIf {
    pub fn new(expr: impl Into<String>) -> Self {
        Self { expr: expr.into() }
    }

    pub fn exists(path: impl fmt::Display) -> Self {
        Self::new(format!("-e {path}"))
    }

    pub fn is_dir(path: impl fmt::Display) -> Self {
        Self::new(format!("-d {path}"))
    }

    pub fn is_symlink(path: impl fmt::Display) -> Self {
        Self::new(format!("-h {path}"))
    }

    pub fn not_empty(expr: impl fmt::Display) -> Self {
        Self::new(format!("-n {expr}"))
    }

    pub fn executable(path: impl fmt::Display) -> Self {
        Self::new(format!("-x {path}"))
    }

    pub fn not(self) -> Self {
        Self::new(format!("! {}", self.expr))
    }

    pub fn or(self, other: Self) -> Self {
        Self::new(format!("{} || {}", self.expr, other.expr))
    }

    pub fn eq(self, rhs: impl fmt::Display) -> Self {
        Self::new(format!("{} == {rhs}", self.expr))
    }

    pub fn ne(self, rhs: impl fmt::Display) -> Self {
        Self::new(format!("{} != {rhs}", self.expr))
    }

    pub fn gt(self, rhs: impl fmt::Display) -> Self {
        Self::new(format!("{} -gt {rhs}", self.expr))
    }

    /// Attaches the then-branch, producing a renderable conditional.
    pub fn then(self, entities: Vec<ShEntity>) -> ShCond {
        ShCond::from_parts(format!("[[ {} ]]", self.expr), canonicalize(entities))
    }
}

/// A complete conditional statement.
#[derive(Debug, Clone)]
pub struct ShCond {
    condition: String,
    then_branch: Vec<Statement>,
    else_branch: Option<Vec<Statement>>,
}

impl ShCond {
    /// `condition` is a full command (already bracketed if it is a test).
    pub(crate) fn from_parts(condition: String, then_branch: Vec<Statement>) -> Self {
        Self {
            condition,
            then_branch,
            else_branch: None,
        }
    }

    pub fn or_else(mut self, entities: Vec<ShEntity>) -> Self {
        self.else_branch = Some(canonicalize(entities));
        self
    }

    pub fn render(&self, ctx: &mut RenderContext) -> String {
        let then_body = render_joined(&self.then_branch, ctx);
        if ctx.debug {
            let mut out = format!("if {}; then\n{}", self.condition, indent(&then_body));
            if let Some(else_branch) = &self.else_branch {
                let else_body = render_joined(else_branch, ctx);
                out.push_str(&format!("\nelse\n{}", indent(&else_body)));
            }
            out.push_str("\nfi");
            out
        } else {
            let mut out = format!("if {}; then {then_body}", self.condition);
            if let Some(else_branch) = &self.else_branch {
                let else_body = render_joined(else_branch, ctx);
                out.push_str(&format!("; else {else_body}"));
            }
            out.push_str("; fi");
            out
        }
    }
}

// --- LOOPS ---

/// A `for` loop head; attach the body with [`ShFor::run`].
#[derive(Debug, Clone)]
pub struct ShFor {
    var: ShVar,
    iterable: String,
}

impl ShFor {
    pub fn new(var: &ShVar, iterable: impl Into<String>) -> Self {
        Self {
            var: var.clone(),
            iterable: iterable.into(),
        }
    }

    pub fn run(self, entities: Vec<ShEntity>) -> ShForLoop {
        ShForLoop {
            var: self.var,
            iterable: self.iterable,
            body: canonicalize(entities),
        }
    }
}

/// A complete `for name in …; do …; done` loop.
#[derive(Debug, Clone)]
pub struct ShForLoop {
    var: ShVar,
    iterable: String,
    body: Vec<Statement>,
}

impl ShForLoop {
    pub fn render(&self, ctx: &mut RenderContext) -> String {
        let body = render_joined(&self.body, ctx);
        let head = format!("for {} in {}; do", self.var.name(), self.iterable);
        if ctx.debug {
            format!("{head}\n{}\ndone", indent(&body))
        } else {
            format!("{head} {body}; done")
        }
    }
}

// --- TRY / RECOVER ---

/// Try/recover semantics over bash's `errexit` option.
///
/// With no catch/else/finally attached, this degenerates to the bare wrapped
/// body and emits no status capture at all. Otherwise the render snapshots
/// `errexit`, disables it, runs the body under `( set -e; … )`, captures the
/// exit status into a fresh variable, restores `errexit`, runs `finally`
/// (always, exactly once), then branches on the captured status: catch on
/// non-zero, else on zero.
#[derive(Debug, Clone)]
pub struct ShTry {
    body: Vec<Statement>,
    catch_branch: Vec<Statement>,
    else_branch: Vec<Statement>,
    finally_branch: Vec<Statement>,
}

impl ShTry {
    pub fn new(body: Vec<ShEntity>) -> Self {
        Self {
            body: canonicalize(body),
            catch_branch: Vec::new(),
            else_branch: Vec::new(),
            finally_branch: Vec::new(),
        }
    }

    pub fn catch(mut self, entities: Vec<ShEntity>) -> Self {
        self.catch_branch = canonicalize(entities);
        self
    }

    pub fn or_else(mut self, entities: Vec<ShEntity>) -> Self {
        self.else_branch = canonicalize(entities);
        self
    }

    pub fn finally(mut self, entities: Vec<ShEntity>) -> Self {
        self.finally_branch = canonicalize(entities);
        self
    }

    pub fn render(&self, ctx: &mut RenderContext) -> String {
        if self.catch_branch.is_empty()
            && self.else_branch.is_empty()
            && self.finally_branch.is_empty()
        {
            return ShBlock::from_statements(self.body.clone(), true).render(ctx);
        }

        let status = ShVar::fresh(&mut ctx.names);
        status.set("$?");

        let mut guarded = vec![Statement::Literal("set -e".to_string())];
        guarded.extend(self.body.iter().cloned());

        let mut statements = vec![
            Statement::Literal("[[ $- = *e* ]]; SAVED_OPT_E=$?".to_string()),
            Statement::Literal("set +e".to_string()),
            Statement::Block(ShBlock::from_statements(guarded, true)),
            Statement::Assign(status.clone()),
            Statement::Literal("(( $SAVED_OPT_E )) && set +e || set -e".to_string()),
        ];
        statements.extend(self.finally_branch.iter().cloned());
        if !self.catch_branch.is_empty() {
            statements.push(Statement::If(ShCond::from_parts(
                format!("[[ {} != 0 ]]", status.reference()),
                self.catch_branch.clone(),
            )));
        }
        if !self.else_branch.is_empty() {
            statements.push(Statement::If(ShCond::from_parts(
                format!("[[ {} == 0 ]]", status.reference()),
                self.else_branch.clone(),
            )));
        }
        ShBlock::from_statements(statements, true).render(ctx)
    }
}

// --- ADVISORY LOCKS ---

/// An advisory-lock-guarded section, emitted as `flock` over an
/// auto-allocated file descriptor.
///
/// The default is an exclusive lock with a 900 second bounded wait; a bounded
/// wait that expires prints a diagnostic and either runs the caller's
/// `or_else` fragment or fails hard with `exit 1`. With [`Flock::unbounded`]
/// acquisition cannot fail, so no failure branch is emitted.
///
/// The fd-allocation redirect renders with doubled braces (`exec {{fd}}>…`);
/// the final template pass restores the literal braces bash needs, and the
/// fd name can never be mistaken for a replacement field along the way.
#[derive(Debug, Clone)]
pub struct Flock {
    target: String,
    wait: Option<u32>,
    shared: bool,
    body: Vec<Statement>,
    on_timeout: Option<Vec<Statement>>,
}

impl Flock {
    pub fn new(target: impl fmt::Display) -> Self {
        Self {
            target: target.to_string(),
            wait: Some(900),
            shared: false,
            body: Vec::new(),
            on_timeout: None,
        }
    }

    /// Bounds the wait for acquisition to `secs` seconds. A zero wait
    /// disables the bound entirely, like [`Flock::unbounded`].
    pub fn wait(mut self, secs: u32) -> Self {
        self.wait = if secs == 0 { None } else { Some(secs) };
        self
    }

    /// Waits for the lock indefinitely.
    pub fn unbounded(mut self) -> Self {
        self.wait = None;
        self
    }

    /// Takes the lock shared (read) instead of exclusive.
    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    /// The statements to run while holding the lock.
    pub fn run(mut self, entities: Vec<ShEntity>) -> Self {
        self.body = canonicalize(entities);
        self
    }

    /// Runs instead of failing hard when a bounded wait expires.
    pub fn or_else(mut self, entities: Vec<ShEntity>) -> Self {
        self.on_timeout = Some(canonicalize(entities));
        self
    }

    pub fn render(&self, ctx: &mut RenderContext) -> String {
        let fd = ctx.names.fresh();
        let target = &self.target;
        let mode = if self.shared { "-s " } else { "" };

        let dir_guard = Statement::If(ShCond::from_parts(
            format!("[[ -d {target} ]]"),
            vec![
                Statement::Literal(format!("echo \"flock: {target} is a directory\" 1>&2")),
                Statement::Literal("exit 1".to_string()),
            ],
        ));
        // Doubled braces so the redirect survives the final template pass.
        let open_fd = Statement::Literal(format!("exec {{{{{fd}}}}}>{target}"));

        let statements = match self.wait {
            // Unbounded wait cannot fail; no failure branch is reachable.
            None => {
                let mut statements = vec![
                    dir_guard,
                    open_fd,
                    Statement::Literal(format!("flock {mode}\"${fd}\"")),
                ];
                statements.extend(self.body.iter().cloned());
                statements
            }
            Some(secs) => {
                let mut failure = vec![Statement::Literal(format!(
                    "echo \"flock: failed to lock {target} within {secs}s\" 1>&2"
                ))];
                match &self.on_timeout {
                    Some(on_timeout) => failure.extend(on_timeout.iter().cloned()),
                    None => failure.push(Statement::Literal("exit 1".to_string())),
                }
                let guarded = ShCond::from_parts(
                    format!("flock -w {secs} {mode}\"${fd}\""),
                    self.body.clone(),
                )
                .with_else(failure);
                vec![dir_guard, open_fd, Statement::If(guarded)]
            }
        };
        ShBlock::from_statements(statements, true).render(ctx)
    }
}

impl ShCond {
    pub(crate) fn with_else(mut self, else_branch: Vec<Statement>) -> Self {
        self.else_branch = Some(else_branch);
        self
    }
}
