//! VOL dispatcher.
//!
//! Every operation follows the same four-step pattern: classify the call by
//! `(filename, path)`, forward to the native connector when passthrough
//! applies, update/query the metadata tree when memory applies, and
//! translate errors at the host boundary.

mod attribute;
mod dataset;
mod file;
mod group;
mod link;
mod object_ops;

pub use object_ops::ObjectInfo;

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::trace;

use crate::ffi::{NativeConnector, NullConnector, ObjectPointers};
use crate::object::{ObjectTree, Token};
use crate::router::{Policy, Router};

/// `before`/`after` hooks invoked around `file_close`.
pub type FileCloseHook = Box<dyn Fn(&str) + Send + Sync>;

/// A hook invoked after an in-memory `dataset_write` completes.
pub type AfterWriteHook = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Classification of a call's routing, the result of step 1 of every VOL
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Routing {
    pub passthrough: bool,
    pub memory: bool,
    pub zerocopy: bool,
}

/// Implements every VOL callback, forking between the metadata tree and the
/// native connector per `(filename, path)`.
pub struct VolDispatcher {
    pub(crate) tree: ObjectTree,
    /// Process-wide mapping from filename to File token. Kept inside the
    /// connector object rather than as a global, so two connector instances
    /// never contend over shared state.
    pub(crate) files: HashMap<String, Token>,
    /// Whether a given open filename was opened with `keep` set, so
    /// `file_close` knows whether to evict it from `files`.
    keep_flags: HashMap<String, bool>,
    pub(crate) router: Router,
    connector: Box<dyn NativeConnector + Send + Sync>,
    /// Native handle forwarded for a metadata token, when passthrough
    /// applies alongside the in-memory path.
    pub(crate) native_handles: HashMap<Token, crate::ffi::NativeHandle>,
    /// Wrapped in a lock rather than requiring `&mut self` to register: a
    /// hook is commonly attached from inside a callback already holding a
    /// shared reference to the dispatcher.
    before_close: RwLock<Vec<FileCloseHook>>,
    after_close: RwLock<Vec<FileCloseHook>>,
    after_write: RwLock<Vec<AfterWriteHook>>,
}

impl std::fmt::Debug for VolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolDispatcher")
            .field("files", &self.files.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for VolDispatcher {
    fn default() -> Self {
        Self::new(Router::new(), Box::new(NullConnector))
    }
}

impl VolDispatcher {
    pub fn new(router: Router, connector: Box<dyn NativeConnector + Send + Sync>) -> Self {
        VolDispatcher {
            tree: ObjectTree::new(),
            files: HashMap::new(),
            keep_flags: HashMap::new(),
            router,
            connector,
            native_handles: HashMap::new(),
            before_close: RwLock::new(Vec::new()),
            after_close: RwLock::new(Vec::new()),
            after_write: RwLock::new(Vec::new()),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn tree(&self) -> &ObjectTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ObjectTree {
        &mut self.tree
    }

    pub fn register_before_close(&self, hook: FileCloseHook) {
        self.before_close.write().push(hook);
    }

    pub fn register_after_close(&self, hook: FileCloseHook) {
        self.after_close.write().push(hook);
    }

    pub fn register_after_write(&self, hook: AfterWriteHook) {
        self.after_write.write().push(hook);
    }

    /// Step 1 of every VOL callback: classify `(filename, path)` against the
    /// router. `partial` should be `true` for calls that may be invoked on
    /// an ancestor before its descendant's full path is known (group/file
    /// creation along an auto-created intermediate path).
    pub(crate) fn classify(&self, filename: &str, path: &str, partial: bool) -> Routing {
        Routing {
            passthrough: self.router.match_any(filename, path, Policy::Passthrough, partial),
            memory: self.router.match_any(filename, path, Policy::Memory, partial),
            zerocopy: self.router.match_any(filename, path, Policy::ZeroCopy, partial),
        }
    }

    pub(crate) fn connector(&self) -> &(dyn NativeConnector + Send + Sync) {
        self.connector.as_ref()
    }

    pub(crate) fn run_after_write_hooks(&self, filename: &str, path: &str) {
        for hook in self.after_write.read().iter() {
            hook(filename, path);
        }
    }

    pub(crate) fn run_before_close_hooks(&self, filename: &str) {
        for hook in self.before_close.read().iter() {
            hook(filename);
        }
    }

    pub(crate) fn run_after_close_hooks(&self, filename: &str) {
        for hook in self.after_close.read().iter() {
            hook(filename);
        }
    }

    pub(crate) fn set_keep(&mut self, filename: &str, keep: bool) {
        self.keep_flags.insert(filename.to_string(), keep);
    }

    pub(crate) fn keep(&self, filename: &str) -> bool {
        self.keep_flags.get(filename).copied().unwrap_or(false)
    }

    /// Wrap a pair of `(native, metadata)` results from a callback the same
    /// way for every returned object.
    pub(crate) fn wrap(native: Option<crate::ffi::NativeHandle>, metadata: Option<Token>) -> ObjectPointers {
        match (native, metadata) {
            (Some(n), Some(m)) => ObjectPointers::both(n, m),
            (Some(n), None) => ObjectPointers::native_only(n),
            (None, Some(m)) => ObjectPointers::memory_only(m),
            (None, None) => ObjectPointers {
                native: None,
                metadata: None,
                transient: true,
            },
        }
    }
}

pub(crate) fn log_call(op: &str, filename: &str, path: &str, routing: Routing) {
    trace!(op, filename, path, passthrough = routing.passthrough, memory = routing.memory, zerocopy = routing.zerocopy, "vol call");
}
