//! `group_create`.
//!
//! Auto-creates intermediate groups along the requested path; refuses to
//! re-create `.`.

use crate::error::{MetadataError, Result};
use crate::ffi::ObjectPointers;
use crate::object::{GroupProps, Payload, Token};

use super::{log_call, VolDispatcher};

impl VolDispatcher {
    /// Create a group at `path` (relative to `parent`), auto-creating any
    /// missing intermediate groups along the way.
    pub fn group_create(&mut self, filename: &str, parent: Token, path: &str) -> Result<ObjectPointers> {
        if path == "." {
            return Err(MetadataError::InvariantViolation("group_create: refusing to re-create '.'".into()).into());
        }
        let routing = self.classify(filename, path, true);
        log_call("group_create", filename, path, routing);

        let (mut current, remainder) = self.tree.search(parent, path);
        for component in remainder {
            current = self.tree.add_child(current, component, Payload::Group(GroupProps::default()))?;
        }

        let native = if routing.passthrough {
            let parent_native = self
                .native_handles
                .get(&parent)
                .copied()
                .ok_or_else(|| MetadataError::Unimplemented("group_create: no native parent handle".into()))?;
            Some(self.connector().create_group(parent_native, path)?)
        } else {
            None
        };
        if let Some(h) = native {
            self.native_handles.insert(current, h);
        }

        Ok(Self::wrap(native, Some(current)))
    }
}
