//! `link_create`.
//!
//! Inserts a `HardLink` or `SoftLink` node under the deepest resolvable
//! ancestor of the target path.

use crate::error::{MetadataError, Result};
use crate::object::{Payload, Token};

use super::VolDispatcher;

impl VolDispatcher {
    /// Create a hard link named `link_name` (under the deepest resolvable
    /// ancestor of `link_path`) pointing at `target`.
    pub fn link_create_hard(&mut self, parent: Token, link_path: &str, target: Token) -> Result<Token> {
        let (ancestor, remainder) = self.tree.search(parent, link_path);
        let link_name = remainder
            .last()
            .copied()
            .ok_or_else(|| MetadataError::InvariantViolation(format!("link_create_hard: {} already exists", link_path)))?;
        if remainder.len() != 1 {
            return Err(MetadataError::NotFound(format!(
                "link_create_hard: intermediate path for {} does not exist",
                link_path
            ))
            .into());
        }
        self.tree.add_child(ancestor, link_name, Payload::HardLink(target))
    }

    /// Create a soft link named `link_name` whose target is resolved
    /// lazily, at lookup time, from `target_path`.
    pub fn link_create_soft(&mut self, parent: Token, link_path: &str, target_path: &str) -> Result<Token> {
        let (ancestor, remainder) = self.tree.search(parent, link_path);
        let link_name = remainder
            .last()
            .copied()
            .ok_or_else(|| MetadataError::InvariantViolation(format!("link_create_soft: {} already exists", link_path)))?;
        if remainder.len() != 1 {
            return Err(MetadataError::NotFound(format!(
                "link_create_soft: intermediate path for {} does not exist",
                link_path
            ))
            .into());
        }
        self.tree
            .add_child(ancestor, link_name, Payload::SoftLink(target_path.to_string()))
    }

    /// Iterate `group`'s children in creation order, invoking `f(name)` for
    /// each; an early-terminating `false` return from `f` stops iteration
    /// immediately.
    pub fn link_iterate(&self, group: Token, mut f: impl FnMut(&str) -> bool) -> Result<()> {
        let node = self
            .tree
            .get(group)
            .ok_or_else(|| MetadataError::NotFound(format!("link_iterate: no such object {:?}", group)))?;
        for &child in node.children() {
            if let Some(child_node) = self.tree.get(child) {
                if !f(child_node.name()) {
                    break;
                }
            }
        }
        Ok(())
    }
}
