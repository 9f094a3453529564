//! `object_get`/`object_specific`/`object_optional`.
//!
//! Answers the generic "object" family of VOL callbacks against the
//! metadata tree: type/name/info queries, existence checks, and lookups
//! by name or token.

use crate::error::{MetadataError, Result};
use crate::object::{LocParams, ObjectType, Token};

use super::VolDispatcher;

/// Summary returned by `object_get(GET_INFO)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub obj_type: ObjectType,
    pub num_children: usize,
}

impl VolDispatcher {
    /// `H5VL_OBJECT_GET_FILE`: the token of the File enclosing `start`.
    pub fn object_get_file(&self, start: Token) -> Result<Token> {
        let (filename, _) = self.tree.fullname(start, None)?;
        self.files
            .get(&filename)
            .copied()
            .ok_or_else(|| MetadataError::NotFound(format!("object_get_file: no such file {}", filename)).into())
    }

    /// `H5VL_OBJECT_GET_NAME`: the object's name relative to its enclosing
    /// File.
    pub fn object_get_name(&self, start: Token) -> Result<String> {
        let (_, path) = self.tree.fullname(start, None)?;
        Ok(path)
    }

    /// `H5VL_OBJECT_GET_TYPE`. A bare root-object open reports `H5I_FILE`,
    /// which the host API surfaces as a group.
    pub fn object_get_type(&self, token: Token) -> Result<ObjectType> {
        let node = self
            .tree
            .get(token)
            .ok_or_else(|| MetadataError::NotFound(format!("object_get_type: no such object {:?}", token)))?;
        Ok(match node.payload().object_type() {
            ObjectType::File => ObjectType::Group,
            other => other,
        })
    }

    /// `H5VL_OBJECT_GET_INFO`.
    pub fn object_get_info(&self, token: Token) -> Result<ObjectInfo> {
        let node = self
            .tree
            .get(token)
            .ok_or_else(|| MetadataError::NotFound(format!("object_get_info: no such object {:?}", token)))?;
        Ok(ObjectInfo {
            obj_type: node.payload().object_type(),
            num_children: node.children().len(),
        })
    }

    /// `H5VL_OBJECT_LOOKUP`: resolve `path` relative to `start`, following
    /// links transparently.
    pub fn object_lookup(&self, start: Token, path: &str) -> Result<Token> {
        self.tree.locate(start, LocParams::ByName(path))
    }

    /// `H5VL_OBJECT_EXISTS`: whether `path` resolves to a live object
    /// relative to `start`, without surfacing a `NotFound` error.
    pub fn object_exists(&self, start: Token, path: &str) -> bool {
        let (_, remainder) = self.tree.search(start, path);
        remainder.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::FileProps;

    #[test]
    fn get_type_of_root_open_reports_group() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("f.h5", "*");
        let file = vol.file_create("f.h5", FileProps::default()).unwrap().metadata.unwrap();
        assert_eq!(vol.object_get_type(file).unwrap(), ObjectType::Group);
    }

    #[test]
    fn get_name_and_get_file_roundtrip_through_a_group() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("f.h5", "*");
        let file = vol.file_create("f.h5", FileProps::default()).unwrap().metadata.unwrap();
        let group = vol.group_create("f.h5", file, "/a").unwrap().metadata.unwrap();
        assert_eq!(vol.object_get_name(group).unwrap(), "/a");
        assert_eq!(vol.object_get_file(group).unwrap(), file);
    }

    #[test]
    fn exists_false_for_missing_path() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("f.h5", "*");
        let file = vol.file_create("f.h5", FileProps::default()).unwrap().metadata.unwrap();
        assert!(!vol.object_exists(file, "/nope"));
        vol.group_create("f.h5", file, "/a").unwrap();
        assert!(vol.object_exists(file, "/a"));
    }

    #[test]
    fn lookup_resolves_hard_link() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("f.h5", "*");
        let file = vol.file_create("f.h5", FileProps::default()).unwrap().metadata.unwrap();
        let group = vol.group_create("f.h5", file, "/a").unwrap().metadata.unwrap();
        vol.link_create_hard(file, "alias", group).unwrap();
        assert_eq!(vol.object_lookup(file, "/alias").unwrap(), group);
    }
}
