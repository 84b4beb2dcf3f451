//! Variable-name allocation for one composition session.
//!
//! Every enhancer in a composition draws its fresh variable names from the
//! same allocator, so auto-generated names can never collide across enhancers,
//! while unrelated compositions (and individual tests) stay deterministic by
//! starting from a fresh allocator.

use std::collections::HashSet;
use thiserror::Error;

/// Errors raised when reserving shell variable names.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NameError {
    /// The requested explicit name is already taken in this session, either by
    /// another explicit reservation or by an auto-generated name.
    #[error("variable '{0}' has already been defined, perhaps automatically")]
    Collision(String),
}

/// Allocates shell variable names scoped to a single composition session.
///
/// Auto-generated names follow the deterministic sequence
/// `a, b, …, z, aa, ab, …`, skipping anything already reserved.
#[derive(Debug, Default)]
pub struct NameAllocator {
    counter: usize,
    active: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an explicit name. Colliding with a live name is a
    /// construction-time error: names are never silently renamed.
    pub fn reserve(&mut self, name: &str) -> Result<(), NameError> {
        if !self.active.insert(name.to_string()) {
            return Err(NameError::Collision(name.to_string()));
        }
        Ok(())
    }

    /// Returns the next free auto-generated name.
    pub fn fresh(&mut self) -> String {
        loop {
            let candidate = spell(self.counter);
            self.counter += 1;
            if self.active.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Spells `n` in the spreadsheet-style lowercase sequence: `a`..`z`, `aa`...
fn spell(mut n: usize) -> String {
    let mut out = String::new();
    loop {
        let letter = (b'a' + (n % 26) as u8) as char;
        out.insert(0, letter);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out
}
