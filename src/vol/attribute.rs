//! `attr_create`/`attr_read`/`attr_write`/`attr_close`/`attr_iter`.
//!
//! Mirrors dataset semantics but with a single buffer per attribute;
//! attribute writes always deep-copy. Iteration is creation-order only,
//! regardless of the requested order or starting index — a deliberate
//! limitation, not a bug to reproduce differently.

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{MetadataError, Result};
use crate::object::{AttributePayload, Payload, Token};

use super::{log_call, VolDispatcher};

impl VolDispatcher {
    pub fn attr_create(
        &mut self,
        filename: &str,
        parent: Token,
        name: &str,
        dtype: Datatype,
        mem_type: Datatype,
        space: Dataspace,
    ) -> Result<Token> {
        let routing = self.classify(filename, name, false);
        log_call("attr_create", filename, name, routing);

        let buffer = vec![0u8; mem_type.size() * space.selected_count() as usize];
        let payload = AttributePayload { dtype, space, mem_type, buffer };
        self.tree.add_child(parent, name, Payload::Attribute(payload))
    }

    /// Attribute writes deep-copy into the owning buffer.
    pub fn attr_write(&mut self, token: Token, buf: &[u8]) -> Result<()> {
        let node = self
            .tree
            .get_mut(token)
            .ok_or_else(|| MetadataError::NotFound(format!("attr_write: no such object {:?}", token)))?;
        let attr = match node.payload_mut() {
            Payload::Attribute(a) => a,
            _ => return Err(MetadataError::TypeMismatch("attr_write: token is not an Attribute".into()).into()),
        };
        attr.buffer.clear();
        attr.buffer.extend_from_slice(buf);
        Ok(())
    }

    pub fn attr_read(&self, token: Token, buf: &mut [u8]) -> Result<()> {
        let node = self
            .tree
            .get(token)
            .ok_or_else(|| MetadataError::NotFound(format!("attr_read: no such object {:?}", token)))?;
        let attr = match node.payload() {
            Payload::Attribute(a) => a,
            _ => return Err(MetadataError::TypeMismatch("attr_read: token is not an Attribute".into()).into()),
        };
        let n = attr.buffer.len().min(buf.len());
        buf[..n].copy_from_slice(&attr.buffer[..n]);
        Ok(())
    }

    pub fn attr_close(&mut self, _token: Token) -> Result<()> {
        Ok(())
    }

    /// Iterate the children of `group` that are Attributes in creation
    /// order, invoking `f(name)` for each; an early-terminating `false`
    /// return from `f` stops iteration and propagates immediately.
    pub fn attr_iter(&self, group: Token, mut f: impl FnMut(&str) -> bool) -> Result<()> {
        let node = self
            .tree
            .get(group)
            .ok_or_else(|| MetadataError::NotFound(format!("attr_iter: no such object {:?}", group)))?;
        for &child in node.children() {
            if let Some(child_node) = self.tree.get(child) {
                if matches!(child_node.payload(), Payload::Attribute(_)) {
                    if !f(child_node.name()) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataspace::Dims;
    use crate::datatype::TypeClass;
    use crate::object::FileProps;

    #[test]
    fn fixed_length_attribute_roundtrip() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("f.h5", "*");
        let file = vol.file_create("f.h5", FileProps::default()).unwrap().metadata.unwrap();
        let dtype = Datatype::new(TypeClass::Integer, 4);
        let space = Dataspace::simple_fixed(Dims::from_slice(&[3]));
        let attr = vol.attr_create("f.h5", file, "ids", dtype.clone(), dtype, space).unwrap();

        let data: [i32; 3] = [1, 2, 3];
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        vol.attr_write(attr, &bytes).unwrap();

        let mut out = vec![0u8; bytes.len()];
        vol.attr_read(attr, &mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn attr_iter_visits_creation_order_and_stops_early() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("f.h5", "*");
        let file = vol.file_create("f.h5", FileProps::default()).unwrap().metadata.unwrap();
        let dtype = Datatype::new(TypeClass::Integer, 4);
        let space = Dataspace::simple_fixed(Dims::from_slice(&[1]));
        for name in ["a", "b", "c"] {
            vol.attr_create("f.h5", file, name, dtype.clone(), dtype.clone(), space.clone())
                .unwrap();
        }

        let mut seen = Vec::new();
        vol.attr_iter(file, |name| {
            seen.push(name.to_string());
            name != "b"
        })
        .unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }
}
