//! Host VOL ABI shapes.
//!
//! `h5bridge` does not link against `libhdf5`. This module models the shape
//! of the host library's VOL connector ABI closely enough that a real
//! binding crate's `sys` module could implement [`NativeConnector`] against
//! the native library, while `h5bridge` itself is exercised against an
//! in-memory fake in tests.

use once_cell::sync::OnceCell;

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::HostError;

/// An opaque handle to a native HDF5 object, standing in for an `hid_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

/// Result type for calls into the native connector: the host's convention
/// is "0 or positive on success, negative on failure"; this crate surfaces
/// that instead as a typed `Result`, translating at the single point where a
/// VOL callback returns to the host.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// The subset of the native HDF5 VOL connector's entry points the
/// dispatcher needs to forward calls to when a `(filename, path)` matches
/// the passthrough policy.
///
/// A real implementation wraps the native (usually "pass-through")
/// connector HDF5 ships; tests use [`NullConnector`], which performs no
/// I/O and should not be reachable unless a test specifically exercises the
/// passthrough path.
pub trait NativeConnector: std::fmt::Debug {
    fn create_file(&self, name: &str) -> HostResult<NativeHandle>;
    fn open_file(&self, name: &str) -> HostResult<NativeHandle>;
    fn close_file(&self, handle: NativeHandle) -> HostResult<()>;

    fn create_group(&self, parent: NativeHandle, name: &str) -> HostResult<NativeHandle>;
    fn open_group(&self, parent: NativeHandle, name: &str) -> HostResult<NativeHandle>;
    fn close_group(&self, handle: NativeHandle) -> HostResult<()>;

    fn create_dataset(
        &self,
        parent: NativeHandle,
        name: &str,
        dtype: &Datatype,
        space: &Dataspace,
    ) -> HostResult<NativeHandle>;
    fn open_dataset(&self, parent: NativeHandle, name: &str) -> HostResult<NativeHandle>;
    fn write_dataset(
        &self,
        handle: NativeHandle,
        mem_space: &Dataspace,
        file_space: &Dataspace,
        buf: &[u8],
    ) -> HostResult<()>;
    fn read_dataset(
        &self,
        handle: NativeHandle,
        mem_space: &Dataspace,
        file_space: &Dataspace,
        buf: &mut [u8],
    ) -> HostResult<()>;
    fn close_dataset(&self, handle: NativeHandle) -> HostResult<()>;
}

/// A connector stub that fails every call. Used as the default when no
/// native connector is configured, so that a `(filename, path)` wrongly
/// classified as passthrough fails loudly rather than silently doing
/// nothing.
#[derive(Debug, Default)]
pub struct NullConnector;

impl NativeConnector for NullConnector {
    fn create_file(&self, _name: &str) -> HostResult<NativeHandle> {
        Err(HostError(-1))
    }
    fn open_file(&self, _name: &str) -> HostResult<NativeHandle> {
        Err(HostError(-1))
    }
    fn close_file(&self, _handle: NativeHandle) -> HostResult<()> {
        Err(HostError(-1))
    }
    fn create_group(&self, _parent: NativeHandle, _name: &str) -> HostResult<NativeHandle> {
        Err(HostError(-1))
    }
    fn open_group(&self, _parent: NativeHandle, _name: &str) -> HostResult<NativeHandle> {
        Err(HostError(-1))
    }
    fn close_group(&self, _handle: NativeHandle) -> HostResult<()> {
        Err(HostError(-1))
    }
    fn create_dataset(
        &self,
        _parent: NativeHandle,
        _name: &str,
        _dtype: &Datatype,
        _space: &Dataspace,
    ) -> HostResult<NativeHandle> {
        Err(HostError(-1))
    }
    fn open_dataset(&self, _parent: NativeHandle, _name: &str) -> HostResult<NativeHandle> {
        Err(HostError(-1))
    }
    fn write_dataset(
        &self,
        _handle: NativeHandle,
        _mem_space: &Dataspace,
        _file_space: &Dataspace,
        _buf: &[u8],
    ) -> HostResult<()> {
        Err(HostError(-1))
    }
    fn read_dataset(
        &self,
        _handle: NativeHandle,
        _mem_space: &Dataspace,
        _file_space: &Dataspace,
        _buf: &mut [u8],
    ) -> HostResult<()> {
        Err(HostError(-1))
    }
    fn close_dataset(&self, _handle: NativeHandle) -> HostResult<()> {
        Err(HostError(-1))
    }
}

/// A pair of `(native object, metadata object, transient)` the dispatcher
/// wraps every returned object in. `transient` marks objects created purely
/// to satisfy a host-side call that do not persist in the metadata tree
/// (e.g. a wrapped native handle for a passthrough-only object).
#[derive(Debug, Clone, Copy)]
pub struct ObjectPointers {
    pub native: Option<NativeHandle>,
    pub metadata: Option<crate::object::Token>,
    pub transient: bool,
}

impl ObjectPointers {
    pub fn memory_only(token: crate::object::Token) -> Self {
        ObjectPointers { native: None, metadata: Some(token), transient: false }
    }

    pub fn native_only(handle: NativeHandle) -> Self {
        ObjectPointers { native: Some(handle), metadata: None, transient: true }
    }

    pub fn both(handle: NativeHandle, token: crate::object::Token) -> Self {
        ObjectPointers { native: Some(handle), metadata: Some(token), transient: false }
    }
}

static AUTOLOAD_FLAG: OnceCell<bool> = OnceCell::new();

/// Presence of `HDF5_VOL_CONNECTOR` in the environment: its presence
/// suppresses explicit property-list application and instructs the host to
/// auto-load the connector. Read once per process and cached, since every
/// `file_open`/`file_create` call consults it.
pub fn is_autoloaded() -> bool {
    *AUTOLOAD_FLAG.get_or_init(|| std::env::var_os("HDF5_VOL_CONNECTOR").is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_connector_rejects_every_call() {
        let c = NullConnector;
        assert!(c.create_file("x.h5").is_err());
    }
}
