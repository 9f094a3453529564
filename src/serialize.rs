//! Serializer.
//!
//! A preorder traversal of an Object subtree: for each node, token, type
//! tag, name, child count, then a type-specific payload. Deserialization
//! runs in two passes: the first rebuilds the tree with placeholder
//! HardLinks recording only the target path; the second resolves them via
//! `search(path)`.

use crate::dataspace::{Class, Dataspace, Dims, Hyperslab, Selection};
use crate::datatype::{Datatype, TypeClass};
use crate::error::{MetadataError, Result};
use crate::object::{
    AttributePayload, DataTriple, DatasetPayload, DtypePayload, FileProps, GroupProps, Node, ObjectTree, Ownership,
    Payload, RemoteDatasetPayload, Token,
};
use crate::rpc::wire::{Reader, Writer};

/// Write a subtree rooted at `root` to a byte buffer. `include_data`
/// chooses between metadata-only and a full copy of every DataTriple's
/// bytes.
pub fn serialize(tree: &ObjectTree, root: Token, include_data: bool) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    serialize_node(tree, root, include_data, &mut w)?;
    Ok(w.finish())
}

fn serialize_node(tree: &ObjectTree, token: Token, include_data: bool, w: &mut Writer) -> Result<()> {
    let node = tree
        .get(token)
        .ok_or_else(|| MetadataError::NotFound(format!("serialize: dangling {:?}", token)))?;
    w.raw(&token.to_bytes());
    w.write_u8(payload_kind_byte(node.payload()));
    w.write_str(node.name());
    w.write_u64(node.children().len() as u64);
    serialize_payload(tree, node, include_data, w)?;
    for &child in node.children() {
        serialize_node(tree, child, include_data, w)?;
    }
    Ok(())
}

fn serialize_payload(tree: &ObjectTree, node: &Node, include_data: bool, w: &mut Writer) -> Result<()> {
    match node.payload() {
        Payload::File(props) => {
            w.write_u64(props.fcpl);
            w.write_u64(props.fapl);
        }
        Payload::DummyFile | Payload::DummyGroup | Payload::DummyDataset | Payload::Wrapper => {}
        Payload::RemoteFile { intercomm_index } | Payload::RemoteGroup { intercomm_index } => {
            w.write_u64(*intercomm_index as u64);
        }
        Payload::Group(props) => w.write_u64(props.gcpl),
        Payload::Dataset(d) => {
            encode_datatype(w, &d.dtype);
            encode_dataspace(w, &d.space);
            w.write_u64(d.dcpl);
            w.write_u64(d.dapl);
            w.write_u8(matches!(d.ownership, Ownership::User) as u8);
            w.write_u8(d.is_passthru as u8);
            w.write_u8(d.is_memory as u8);
            w.write_u8(include_data as u8);
            if include_data {
                w.write_u64(d.data.len() as u64);
                for triple in &d.data {
                    encode_datatype(w, &triple.dtype);
                    encode_dataspace(w, &triple.memory_space);
                    encode_dataspace(w, &triple.file_space);
                    w.write_bytes(triple.as_slice());
                }
            }
        }
        Payload::RemoteDataset(rd) => {
            encode_datatype(w, &rd.dtype);
            encode_dataspace(w, &rd.space);
            w.write_u64(rd.intercomm_index as u64);
        }
        Payload::Attribute(a) => {
            encode_datatype(w, &a.dtype);
            encode_dataspace(w, &a.space);
            encode_datatype(w, &a.mem_type);
            w.write_bytes(&a.buffer);
        }
        Payload::NamedDtype(d) | Payload::CommittedDatatype(d) => {
            encode_dtype_payload(w, d);
        }
        Payload::HardLink(target) => {
            // Object references, and HardLinks, are recorded as the
            // target's path rather than a raw identifier.
            let (_, path) = tree.fullname(*target, None)?;
            w.write_str(&path);
        }
        Payload::SoftLink(path) => w.write_str(path),
    }
    Ok(())
}

/// Rebuild a tree from a buffer produced by [`serialize`]. Returns the tree
/// and the token of the deserialized root.
pub fn deserialize(buf: &[u8]) -> Result<(ObjectTree, Token)> {
    let mut r = Reader::new(buf);
    let mut tree = ObjectTree::new();
    let mut pending_links: Vec<(Token, String)> = Vec::new();
    let root = deserialize_node(&mut r, &mut tree, None, &mut pending_links)?;
    // Pass two: resolve every placeholder HardLink by path.
    for (link_token, path) in pending_links {
        let (resolved, remainder) = tree.search(root, &path);
        if !remainder.is_empty() {
            return Err(MetadataError::DanglingLink(path).into());
        }
        *tree.get_mut(link_token).unwrap().payload_mut() = Payload::HardLink(resolved);
    }
    Ok((tree, root))
}

fn deserialize_node(
    r: &mut Reader,
    tree: &mut ObjectTree,
    parent: Option<Token>,
    pending: &mut Vec<(Token, String)>,
) -> Result<Token> {
    let _original_token = r.read_raw(8)?;
    let kind = payload_kind_from_byte(r.read_u8()?)?;
    let name = r.read_str()?;
    let num_children = r.read_u64()?;

    let (payload, link_target) = deserialize_payload(r, kind)?;
    let token = insert_node(tree, parent, name, payload)?;
    if let Some(path) = link_target {
        pending.push((token, path));
    }

    for _ in 0..num_children {
        deserialize_node(r, tree, Some(token), pending)?;
    }
    Ok(token)
}

fn insert_node(tree: &mut ObjectTree, parent: Option<Token>, name: String, payload: Payload) -> Result<Token> {
    match parent {
        None => {
            let token = tree.create_file(name, FileProps::default());
            *tree.get_mut(token).unwrap().payload_mut() = payload;
            Ok(token)
        }
        Some(p) => tree.add_child(p, name, payload),
    }
}

fn deserialize_payload(r: &mut Reader, kind: PayloadKind) -> Result<(Payload, Option<String>)> {
    let payload = match kind {
        PayloadKind::File => {
            let fcpl = r.read_u64()?;
            let fapl = r.read_u64()?;
            Payload::File(FileProps { fcpl, fapl })
        }
        PayloadKind::DummyFile => Payload::DummyFile,
        PayloadKind::RemoteFile => Payload::RemoteFile { intercomm_index: r.read_u64()? as usize },
        PayloadKind::Group => Payload::Group(GroupProps { gcpl: r.read_u64()? }),
        PayloadKind::DummyGroup => Payload::DummyGroup,
        PayloadKind::RemoteGroup => Payload::RemoteGroup { intercomm_index: r.read_u64()? as usize },
        PayloadKind::Dataset => {
            let dtype = decode_datatype(r)?;
            let space = decode_dataspace(r)?;
            let dcpl = r.read_u64()?;
            let dapl = r.read_u64()?;
            let ownership = if r.read_u8()? != 0 { Ownership::User } else { Ownership::Owned };
            let is_passthru = r.read_u8()? != 0;
            let is_memory = r.read_u8()? != 0;
            let include_data = r.read_u8()? != 0;
            let mut data = Vec::new();
            if include_data {
                let count = r.read_u64()?;
                for _ in 0..count {
                    let t_dtype = decode_datatype(r)?;
                    let mem_space = decode_dataspace(r)?;
                    let file_space = decode_dataspace(r)?;
                    let bytes = r.read_bytes()?.to_vec();
                    data.push(DataTriple::owned(t_dtype, mem_space, file_space, bytes));
                }
            }
            Payload::Dataset(DatasetPayload { dtype, space, dcpl, dapl, ownership, is_passthru, is_memory, data })
        }
        PayloadKind::DummyDataset => Payload::DummyDataset,
        PayloadKind::RemoteDataset => {
            let dtype = decode_datatype(r)?;
            let space = decode_dataspace(r)?;
            let intercomm_index = r.read_u64()? as usize;
            Payload::RemoteDataset(RemoteDatasetPayload { dtype, space, intercomm_index })
        }
        PayloadKind::Attribute => {
            let dtype = decode_datatype(r)?;
            let space = decode_dataspace(r)?;
            let mem_type = decode_datatype(r)?;
            let buffer = r.read_bytes()?.to_vec();
            Payload::Attribute(AttributePayload { dtype, space, mem_type, buffer })
        }
        PayloadKind::NamedDtype => Payload::NamedDtype(decode_dtype_payload(r)?),
        PayloadKind::CommittedDatatype => Payload::CommittedDatatype(decode_dtype_payload(r)?),
        PayloadKind::HardLink => {
            let path = r.read_str()?;
            return Ok((Payload::Wrapper, Some(path)));
        }
        PayloadKind::SoftLink => Payload::SoftLink(r.read_str()?),
        PayloadKind::Wrapper => Payload::Wrapper,
    };
    Ok((payload, None))
}

fn encode_dtype_payload(w: &mut Writer, d: &DtypePayload) {
    w.write_u8(d.native_id.is_some() as u8);
    if let Some(id) = d.native_id {
        w.write_u64(id);
    }
    w.write_u8(d.encoded.is_some() as u8);
    if let Some(enc) = &d.encoded {
        w.write_bytes(enc);
    }
}

fn decode_dtype_payload(r: &mut Reader) -> Result<DtypePayload> {
    let native_id = if r.read_u8()? != 0 { Some(r.read_u64()?) } else { None };
    let encoded = if r.read_u8()? != 0 { Some(r.read_bytes()?.to_vec()) } else { None };
    Ok(DtypePayload { native_id, encoded })
}

/// The discriminant every [`Payload`] variant serializes as. Distinct from
/// [`crate::object::ObjectType`], which collapses `Dummy*`/`Remote*` into
/// their coarse kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    File,
    DummyFile,
    RemoteFile,
    Group,
    DummyGroup,
    RemoteGroup,
    Dataset,
    DummyDataset,
    RemoteDataset,
    Attribute,
    NamedDtype,
    CommittedDatatype,
    HardLink,
    SoftLink,
    Wrapper,
}

fn payload_kind_byte(p: &Payload) -> u8 {
    (match p {
        Payload::File(_) => PayloadKind::File,
        Payload::DummyFile => PayloadKind::DummyFile,
        Payload::RemoteFile { .. } => PayloadKind::RemoteFile,
        Payload::Group(_) => PayloadKind::Group,
        Payload::DummyGroup => PayloadKind::DummyGroup,
        Payload::RemoteGroup { .. } => PayloadKind::RemoteGroup,
        Payload::Dataset(_) => PayloadKind::Dataset,
        Payload::DummyDataset => PayloadKind::DummyDataset,
        Payload::RemoteDataset(_) => PayloadKind::RemoteDataset,
        Payload::Attribute(_) => PayloadKind::Attribute,
        Payload::NamedDtype(_) => PayloadKind::NamedDtype,
        Payload::CommittedDatatype(_) => PayloadKind::CommittedDatatype,
        Payload::HardLink(_) => PayloadKind::HardLink,
        Payload::SoftLink(_) => PayloadKind::SoftLink,
        Payload::Wrapper => PayloadKind::Wrapper,
    }) as u8
}

fn payload_kind_from_byte(b: u8) -> Result<PayloadKind> {
    Ok(match b {
        0 => PayloadKind::File,
        1 => PayloadKind::DummyFile,
        2 => PayloadKind::RemoteFile,
        3 => PayloadKind::Group,
        4 => PayloadKind::DummyGroup,
        5 => PayloadKind::RemoteGroup,
        6 => PayloadKind::Dataset,
        7 => PayloadKind::DummyDataset,
        8 => PayloadKind::RemoteDataset,
        9 => PayloadKind::Attribute,
        10 => PayloadKind::NamedDtype,
        11 => PayloadKind::CommittedDatatype,
        12 => PayloadKind::HardLink,
        13 => PayloadKind::SoftLink,
        14 => PayloadKind::Wrapper,
        other => return Err(MetadataError::InvariantViolation(format!("deserialize: unknown payload kind {other}")).into()),
    })
}

pub(crate) fn encode_datatype(w: &mut Writer, dt: &Datatype) {
    w.write_u8(type_class_byte(dt.class()));
    w.write_u64(dt.size() as u64);
    w.write_u8(dt.is_variable_length() as u8);
    w.write_u8(dt.is_variable_length_string() as u8);
}

pub(crate) fn decode_datatype(r: &mut Reader) -> Result<Datatype> {
    let class = type_class_from_byte(r.read_u8()?)?;
    let size = r.read_u64()? as usize;
    let is_vl = r.read_u8()? != 0;
    let is_vl_string = r.read_u8()? != 0;
    Ok(if is_vl_string {
        Datatype::var_len_string(size)
    } else if is_vl {
        Datatype::var_len(size)
    } else {
        Datatype::new(class, size)
    })
}

fn type_class_byte(c: TypeClass) -> u8 {
    match c {
        TypeClass::Integer => 0,
        TypeClass::Float => 1,
        TypeClass::String => 2,
        TypeClass::Bitfield => 3,
        TypeClass::Opaque => 4,
        TypeClass::Compound => 5,
        TypeClass::Reference => 6,
        TypeClass::Enum => 7,
        TypeClass::VarLen => 8,
        TypeClass::Array => 9,
    }
}

fn type_class_from_byte(b: u8) -> Result<TypeClass> {
    Ok(match b {
        0 => TypeClass::Integer,
        1 => TypeClass::Float,
        2 => TypeClass::String,
        3 => TypeClass::Bitfield,
        4 => TypeClass::Opaque,
        5 => TypeClass::Compound,
        6 => TypeClass::Reference,
        7 => TypeClass::Enum,
        8 => TypeClass::VarLen,
        9 => TypeClass::Array,
        other => return Err(MetadataError::InvariantViolation(format!("decode_datatype: unknown class {other}")).into()),
    })
}

pub(crate) fn encode_dataspace(w: &mut Writer, ds: &Dataspace) {
    w.write_u8(class_byte(ds.class()));
    w.write_u64(ds.rank() as u64);
    for &d in ds.current_extent() {
        w.write_u64(d);
    }
    for m in ds.max_extent() {
        match m {
            Some(v) => {
                w.write_u8(1);
                w.write_u64(*v);
            }
            None => w.write_u8(0),
        }
    }
    encode_selection(w, ds.selection());
}

pub(crate) fn decode_dataspace(r: &mut Reader) -> Result<Dataspace> {
    let class = class_from_byte(r.read_u8()?)?;
    let rank = r.read_u64()? as usize;
    let mut current = Dims::new();
    for _ in 0..rank {
        current.push(r.read_u64()?);
    }
    let mut max = Vec::with_capacity(rank);
    for _ in 0..rank {
        max.push(if r.read_u8()? != 0 { Some(r.read_u64()?) } else { None });
    }
    let selection = decode_selection(r)?;
    let base = match class {
        Class::Scalar => Dataspace::scalar(),
        Class::Null => Dataspace::null(),
        Class::Simple => Dataspace::simple(current, max),
    };
    Ok(base.with_selection(selection))
}

fn class_byte(c: Class) -> u8 {
    match c {
        Class::Scalar => 0,
        Class::Simple => 1,
        Class::Null => 2,
    }
}

fn class_from_byte(b: u8) -> Result<Class> {
    Ok(match b {
        0 => Class::Scalar,
        1 => Class::Simple,
        2 => Class::Null,
        other => return Err(MetadataError::InvariantViolation(format!("decode_dataspace: unknown class {other}")).into()),
    })
}

fn write_dims(w: &mut Writer, d: &Dims) {
    w.write_u64(d.len() as u64);
    for &v in d {
        w.write_u64(v);
    }
}

fn read_dims(r: &mut Reader) -> Result<Dims> {
    let n = r.read_u64()? as usize;
    let mut d = Dims::new();
    for _ in 0..n {
        d.push(r.read_u64()?);
    }
    Ok(d)
}

fn encode_selection(w: &mut Writer, sel: &Selection) {
    match sel {
        Selection::None => w.write_u8(0),
        Selection::All => w.write_u8(1),
        Selection::Points(pts) => {
            w.write_u8(2);
            w.write_u64(pts.len() as u64);
            for p in pts {
                write_dims(w, p);
            }
        }
        Selection::Hyperslab(h) => {
            w.write_u8(3);
            write_dims(w, &h.start);
            write_dims(w, &h.stride);
            write_dims(w, &h.count);
            write_dims(w, &h.block);
        }
    }
}

fn decode_selection(r: &mut Reader) -> Result<Selection> {
    Ok(match r.read_u8()? {
        0 => Selection::None,
        1 => Selection::All,
        2 => {
            let n = r.read_u64()?;
            let mut pts = Vec::with_capacity(n as usize);
            for _ in 0..n {
                pts.push(read_dims(r)?);
            }
            Selection::Points(pts)
        }
        3 => Selection::Hyperslab(Hyperslab {
            start: read_dims(r)?,
            stride: read_dims(r)?,
            count: read_dims(r)?,
            block: read_dims(r)?,
        }),
        other => return Err(MetadataError::InvariantViolation(format!("decode_selection: unknown tag {other}")).into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::FileProps;

    #[test]
    fn group_hierarchy_roundtrips() {
        let mut tree = ObjectTree::new();
        let file = tree.create_file("f.h5", FileProps::default());
        let g = tree.add_child(file, "g", Payload::Group(GroupProps::default())).unwrap();
        tree.add_child(g, "h", Payload::Group(GroupProps::default())).unwrap();

        let buf = serialize(&tree, file, false).unwrap();
        let (restored, root) = deserialize(&buf).unwrap();

        let (found, remainder) = restored.search(root, "/g/h");
        assert!(remainder.is_empty());
        assert_eq!(restored.get(found).unwrap().name(), "h");
    }

    #[test]
    fn dataset_with_data_roundtrips_bytes() {
        let mut tree = ObjectTree::new();
        let file = tree.create_file("f.h5", FileProps::default());
        let dtype = Datatype::new(TypeClass::Float, 4);
        let space = Dataspace::simple_fixed(Dims::from_slice(&[4]));
        let bytes: Vec<u8> = (0..4i32).flat_map(|v| v.to_le_bytes()).collect();
        let triple = DataTriple::owned(dtype.clone(), space.clone(), space.clone(), bytes.clone());
        let ds = tree
            .add_child(
                file,
                "grid",
                Payload::Dataset(DatasetPayload {
                    dtype,
                    space,
                    dcpl: 0,
                    dapl: 0,
                    ownership: Ownership::Owned,
                    is_passthru: false,
                    is_memory: true,
                    data: vec![triple],
                }),
            )
            .unwrap();
        let _ = ds;

        let buf = serialize(&tree, file, true).unwrap();
        let (restored, root) = deserialize(&buf).unwrap();
        let (found, remainder) = restored.search(root, "/grid");
        assert!(remainder.is_empty());
        let dataset = restored.get(found).unwrap().payload().as_dataset().unwrap();
        assert_eq!(dataset.data.len(), 1);
        assert_eq!(dataset.data[0].as_slice(), bytes.as_slice());
    }

    #[test]
    fn null_dataspace_roundtrips_through_its_own_class() {
        let mut w = Writer::new();
        encode_dataspace(&mut w, &Dataspace::null());
        let mut r = Reader::new(&w.finish());
        let restored = decode_dataspace(&mut r).unwrap();
        assert_eq!(restored, Dataspace::null());
        assert_eq!(restored.class(), Class::Null);
    }

    #[test]
    fn hard_link_resolves_after_second_pass() {
        let mut tree = ObjectTree::new();
        let file = tree.create_file("f.h5", FileProps::default());
        let g = tree.add_child(file, "g", Payload::Group(GroupProps::default())).unwrap();
        tree.add_child(file, "alias", Payload::HardLink(g)).unwrap();

        let buf = serialize(&tree, file, false).unwrap();
        let (restored, root) = deserialize(&buf).unwrap();

        let (found, remainder) = restored.search(root, "/alias");
        assert!(remainder.is_empty());
        assert_eq!(restored.get(found).unwrap().name(), "g");
    }
}
