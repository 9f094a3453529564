//! Metadata tree.
//!
//! An in-memory mirror of the HDF5 object graph. Represented as an arena
//! (`HashMap<Token, Node>`) rather than an owning pointer graph: either
//! strategy works so long as destroying a File recursively releases the
//! subtree and weak HardLink references never dangle before the File
//! itself is destroyed.

mod token;

pub use token::Token;

use std::collections::HashMap;

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{MetadataError, Result};

/// The nine HDF5 object kinds. `Dummy*`/`Remote*` payload variants still
/// report the coarse type their placeholder/shadow stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    File,
    Group,
    Dataset,
    Attribute,
    NamedDtype,
    CommittedDatatype,
    HardLink,
    SoftLink,
    Wrapper,
}

/// Ownership of a `Dataset`'s write buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The tree owns a deep copy of every write.
    Owned,
    /// `user`: the producer's original buffer is borrowed (zero-copy).
    User,
}

/// One write recorded against a `Dataset`.
#[derive(Debug, Clone)]
pub struct DataTriple {
    pub dtype: Datatype,
    pub memory_space: Dataspace,
    pub file_space: Dataspace,
    /// Owned backing storage, `None` when `Ownership::User` borrows the
    /// producer's buffer instead (tracked by the caller in that case).
    pub bytes: Option<Vec<u8>>,
    /// Borrowed bytes for the `Ownership::User` case. Exactly one of
    /// `bytes`/`borrowed` is populated for a given triple.
    pub borrowed: Option<*const u8>,
    pub borrowed_len: usize,
}

// DataTriple's `borrowed` pointer is only ever read back through the
// zero-copy path while the producer keeps the original buffer alive: a
// caller obligation, not something this type can enforce.
unsafe impl Send for DataTriple {}
unsafe impl Sync for DataTriple {}

impl DataTriple {
    /// A triple that owns a deep copy of `data`.
    pub fn owned(dtype: Datatype, memory_space: Dataspace, file_space: Dataspace, data: Vec<u8>) -> Self {
        DataTriple {
            dtype,
            memory_space,
            file_space,
            bytes: Some(data),
            borrowed: None,
            borrowed_len: 0,
        }
    }

    /// A triple that borrows `data` without copying (zero-copy).
    ///
    /// # Safety
    /// The caller must ensure `data` remains valid for as long as this
    /// triple is reachable from the tree.
    pub unsafe fn borrowed(dtype: Datatype, memory_space: Dataspace, file_space: Dataspace, data: &[u8]) -> Self {
        DataTriple {
            dtype,
            memory_space,
            file_space,
            bytes: None,
            borrowed: Some(data.as_ptr()),
            borrowed_len: data.len(),
        }
    }

    /// View the triple's bytes, whether owned or borrowed.
    pub fn as_slice(&self) -> &[u8] {
        match (&self.bytes, self.borrowed) {
            (Some(b), _) => b,
            (None, Some(ptr)) => unsafe { std::slice::from_raw_parts(ptr, self.borrowed_len) },
            (None, None) => &[],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileProps {
    pub fcpl: u64,
    pub fapl: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GroupProps {
    pub gcpl: u64,
}

#[derive(Debug, Clone)]
pub struct DatasetPayload {
    pub dtype: Datatype,
    pub space: Dataspace,
    pub dcpl: u64,
    pub dapl: u64,
    pub ownership: Ownership,
    pub is_passthru: bool,
    pub is_memory: bool,
    pub data: Vec<DataTriple>,
}

#[derive(Debug, Clone)]
pub struct AttributePayload {
    pub dtype: Datatype,
    pub space: Dataspace,
    pub mem_type: Datatype,
    pub buffer: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct DtypePayload {
    /// Live HDF5 type identifier, when the host library is available.
    pub native_id: Option<u64>,
    /// Encoded binary form, used when no live identifier is held (e.g.
    /// after deserialization on a peer that never opened the type).
    pub encoded: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct RemoteDatasetPayload {
    pub dtype: Datatype,
    pub space: Dataspace,
    /// Index of the intercommunicator this shadow is bound to.
    pub intercomm_index: usize,
}

/// The concrete state of a node, one variant per HDF5 object kind plus the
/// `Dummy*`/`Remote*` flavors of File/Group/Dataset.
#[derive(Debug, Clone)]
pub enum Payload {
    File(FileProps),
    DummyFile,
    RemoteFile { intercomm_index: usize },

    Group(GroupProps),
    DummyGroup,
    RemoteGroup { intercomm_index: usize },

    Dataset(DatasetPayload),
    DummyDataset,
    RemoteDataset(RemoteDatasetPayload),

    Attribute(AttributePayload),
    NamedDtype(DtypePayload),
    CommittedDatatype(DtypePayload),

    /// Non-owning reference to another object in the same tree.
    HardLink(Token),
    /// A target path resolved lazily at lookup.
    SoftLink(String),

    Wrapper,
}

impl Payload {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Payload::File(_) | Payload::DummyFile | Payload::RemoteFile { .. } => ObjectType::File,
            Payload::Group(_) | Payload::DummyGroup | Payload::RemoteGroup { .. } => ObjectType::Group,
            Payload::Dataset(_) | Payload::DummyDataset | Payload::RemoteDataset(_) => ObjectType::Dataset,
            Payload::Attribute(_) => ObjectType::Attribute,
            Payload::NamedDtype(_) => ObjectType::NamedDtype,
            Payload::CommittedDatatype(_) => ObjectType::CommittedDatatype,
            Payload::HardLink(_) => ObjectType::HardLink,
            Payload::SoftLink(_) => ObjectType::SoftLink,
            Payload::Wrapper => ObjectType::Wrapper,
        }
    }

    pub fn as_dataset(&self) -> Option<&DatasetPayload> {
        match self {
            Payload::Dataset(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dataset_mut(&mut self) -> Option<&mut DatasetPayload> {
        match self {
            Payload::Dataset(d) => Some(d),
            _ => None,
        }
    }
}

/// A single node of the tree.
#[derive(Debug, Clone)]
pub struct Node {
    parent: Option<Token>,
    children: Vec<Token>,
    name: String,
    payload: Payload,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    pub fn parent(&self) -> Option<Token> {
        self.parent
    }

    pub fn children(&self) -> &[Token] {
        &self.children
    }
}

/// HDF5 location-parameter flavors resolved by [`ObjectTree::locate`].
pub enum LocParams<'a> {
    /// The object itself.
    SelfObject,
    /// By path relative to the starting object.
    ByName(&'a str),
    /// The n-th child in insertion order.
    ByIndex(usize),
    /// By a previously-obtained token.
    ByToken(Token),
}

/// The in-memory mirror of the HDF5 object graph.
#[derive(Debug, Default)]
pub struct ObjectTree {
    nodes: HashMap<Token, Node>,
}

impl ObjectTree {
    pub fn new() -> Self {
        ObjectTree { nodes: HashMap::new() }
    }

    /// Create a new root File node (no parent).
    pub fn create_file(&mut self, name: impl Into<String>, props: FileProps) -> Token {
        let token = Token::fresh();
        self.nodes.insert(
            token,
            Node {
                parent: None,
                children: Vec::new(),
                name: name.into(),
                payload: Payload::File(props),
            },
        );
        token
    }

    /// Append a new child under `parent`, in insertion order.
    pub fn add_child(&mut self, parent: Token, name: impl Into<String>, payload: Payload) -> Result<Token> {
        if !self.nodes.contains_key(&parent) {
            return Err(MetadataError::NotFound(format!("add_child: no such parent {:?}", parent)).into());
        }
        let token = Token::fresh();
        self.nodes.insert(
            token,
            Node {
                parent: Some(parent),
                children: Vec::new(),
                name: name.into(),
                payload,
            },
        );
        self.nodes.get_mut(&parent).unwrap().children.push(token);
        Ok(token)
    }

    pub fn get(&self, token: Token) -> Option<&Node> {
        self.nodes.get(&token)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Node> {
        self.nodes.get_mut(&token)
    }

    /// Recursively remove `token` and its subtree, detaching it from its
    /// parent's children list. HardLinks pointing at removed nodes become
    /// dangling; resolving that is left to the caller (it is only ever
    /// supposed to happen alongside the owning File's removal).
    pub fn remove(&mut self, token: Token) {
        let (parent, children) = match self.nodes.get(&token) {
            Some(n) => (n.parent, n.children.clone()),
            None => return,
        };
        for child in children {
            self.remove(child);
        }
        if let Some(parent) = parent {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|&c| c != token);
            }
        }
        self.nodes.remove(&token);
    }

    /// Resolve a `/`-separated path starting from `root`, following hard
    /// links transparently and restarting from a soft link's target on
    /// resolution. Returns the deepest object reached and the unmatched
    /// path remainder (empty if the full path resolved).
    pub fn search<'p>(&self, root: Token, path: &'p str) -> (Token, Vec<&'p str>) {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        self.search_components(root, &components)
    }

    fn search_components<'p>(&self, root: Token, components: &[&'p str]) -> (Token, Vec<&'p str>) {
        let mut current = root;
        for (i, comp) in components.iter().enumerate() {
            if *comp == "." {
                continue;
            }
            let node = match self.nodes.get(&current) {
                Some(n) => n,
                None => return (current, components[i..].to_vec()),
            };
            let found = node
                .children
                .iter()
                .find(|&&c| self.nodes.get(&c).map(|n| n.name.as_str()) == Some(*comp));
            match found {
                None => return (current, components[i..].to_vec()),
                Some(&child) => {
                    let resolved = self.resolve_links(child, &mut Vec::new());
                    if !self.nodes.contains_key(&resolved) {
                        return (current, components[i..].to_vec());
                    }
                    current = resolved;
                }
            }
        }
        (current, Vec::new())
    }

    /// Follow a chain of HardLinks transparently, and restart resolution
    /// from the root on a SoftLink (tracking visited tokens to avoid
    /// infinite loops on a cyclical soft-link chain).
    fn resolve_links(&self, token: Token, visited: &mut Vec<Token>) -> Token {
        if visited.contains(&token) {
            return token;
        }
        visited.push(token);
        match self.nodes.get(&token).map(|n| &n.payload) {
            Some(Payload::HardLink(target)) => self.resolve_links(*target, visited),
            Some(Payload::SoftLink(target_path)) => {
                // Soft links resolve relative to the enclosing File's root.
                if let Some((file_token, _)) = self.enclosing_file(token) {
                    let (resolved, remainder) = self.search(file_token, target_path);
                    if remainder.is_empty() {
                        return resolved;
                    }
                }
                token
            }
            _ => token,
        }
    }

    /// Resolve HDF5 location parameters into the object they designate.
    pub fn locate(&self, start: Token, params: LocParams<'_>) -> Result<Token> {
        match params {
            LocParams::SelfObject => Ok(start),
            LocParams::ByName(path) => {
                let (token, remainder) = self.search(start, path);
                if remainder.is_empty() {
                    Ok(token)
                } else {
                    Err(MetadataError::NotFound(format!("locate: unresolved path remainder {:?}", remainder)).into())
                }
            }
            LocParams::ByIndex(idx) => {
                let node = self
                    .nodes
                    .get(&start)
                    .ok_or_else(|| MetadataError::NotFound(format!("locate: no such object {:?}", start)))?;
                node.children
                    .get(idx)
                    .copied()
                    .ok_or_else(|| MetadataError::NotFound(format!("locate: no child at index {}", idx)).into())
            }
            LocParams::ByToken(token) => {
                if self.nodes.contains_key(&token) {
                    Ok(token)
                } else {
                    Err(MetadataError::NotFound(format!("locate: no such object {:?}", token)).into())
                }
            }
        }
    }

    /// Encode a token as raw `H5O_token_t`-shaped bytes.
    pub fn fill_token(&self, token: Token) -> [u8; 8] {
        token.to_bytes()
    }

    /// Decode raw `H5O_token_t`-shaped bytes, validating the token still
    /// names a live object.
    pub fn find_token(&self, bytes: [u8; 8]) -> Option<Token> {
        let token = Token::from_bytes(bytes);
        self.nodes.contains_key(&token).then_some(token)
    }

    /// Walk up from `token` to the enclosing File, returning its token and
    /// its name (the filename).
    fn enclosing_file(&self, token: Token) -> Option<(Token, String)> {
        let mut current = token;
        loop {
            let node = self.nodes.get(&current)?;
            if matches!(node.payload, Payload::File(_) | Payload::DummyFile | Payload::RemoteFile { .. }) {
                return Some((current, node.name.clone()));
            }
            current = node.parent?;
        }
    }

    /// Reconstruct `(filename, path)` by walking up to the enclosing File,
    /// optionally appending an extra path component.
    pub fn fullname(&self, token: Token, extra: Option<&str>) -> Result<(String, String)> {
        let mut components = Vec::new();
        if let Some(extra) = extra {
            components.push(extra.to_string());
        }
        let mut current = token;
        let filename;
        loop {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| MetadataError::NotFound(format!("fullname: dangling token {:?}", current)))?;
            if matches!(node.payload, Payload::File(_) | Payload::DummyFile | Payload::RemoteFile { .. }) {
                filename = node.name.clone();
                break;
            }
            components.push(node.name.clone());
            current = node
                .parent
                .ok_or_else(|| MetadataError::InvariantViolation(format!("{:?} has no parent and is not a File", current)))?;
        }
        components.reverse();
        Ok((filename, format!("/{}", components.join("/"))))
    }
}
