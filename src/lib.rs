#![warn(missing_docs)]
#![warn(missing_copy_implementations)]
#![warn(trivial_casts)]
#![warn(trivial_numeric_casts)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]
#![warn(unused_qualifications)]

//! `h5bridge`: an in-situ HDF5 VOL coupling layer between concurrent MPI
//! producer and consumer applications.
//!
//! A `h5bridge`-backed HDF5 file never touches a disk. Instead, a VOL
//! connector built from this crate intercepts every HDF5 call and routes
//! each `(filename, path)` pair, per glob patterns registered through
//! [`Config`], along one of three policies:
//!
//! - **memory**: the call updates an in-process metadata tree
//!   ([`object::ObjectTree`]) instead of any file on disk;
//! - **passthrough**: the call is forwarded to a real native HDF5 connector
//!   ([`ffi::NativeConnector`]) the host process links against;
//! - **zero-copy**: like memory, but dataset writes borrow the caller's
//!   buffer instead of copying it.
//!
//! A producer process can additionally bind a `(filename, path)` pattern to
//! an MPI intercommunicator index; on the consumer side, opening a matching
//! dataset starts a request/response protocol ([`rpc`], [`index`],
//! [`query`]) that fetches only the bytes the consumer's selection actually
//! overlaps, without either side ever materializing the whole dataset.
//! [`distributed::DistributedVol`] wires these two halves into the
//! dispatcher.
//!
//! # Usage
//!
//! ```
//! use h5bridge::object::FileProps;
//! use h5bridge::vol::VolDispatcher;
//! use h5bridge::Config;
//!
//! let router = Config::new().set_memory("run.h5", "*").build();
//! let mut vol = VolDispatcher::new(router, Box::new(h5bridge::ffi::NullConnector));
//! let ptrs = vol.file_create("run.h5", FileProps::default()).unwrap();
//! assert!(ptrs.metadata.is_some());
//! ```

pub mod dataspace;
pub mod datatype;
pub mod distributed;
pub mod error;
#[allow(missing_docs)]
pub mod ffi;
pub mod index;
pub mod object;
pub mod query;
pub mod router;
pub mod rpc;
pub mod serialize;
pub mod vol;

pub use error::{Error, Result};
pub use router::{Policy, Router};

#[doc(inline)]
pub use ffi::is_autoloaded;

/// Aggregates the pattern and intercommunicator registrations that make up
/// this crate's configuration surface. No file-based configuration format is
/// introduced: CLI parsing and config loading stay external to this crate,
/// so `Config` is just a builder over [`Router`].
#[derive(Debug, Default)]
pub struct Config {
    router: Router,
}

impl Config {
    /// Start with every pattern list empty.
    pub fn new() -> Self {
        Config::default()
    }

    /// Route `(filename, path)` to the in-memory metadata tree.
    pub fn set_memory(mut self, filename: impl Into<String>, path: impl Into<String>) -> Self {
        self.router.set_memory(filename, path);
        self
    }

    /// Route `(filename, path)` to the native connector.
    pub fn set_passthru(mut self, filename: impl Into<String>, path: impl Into<String>) -> Self {
        self.router.set_passthru(filename, path);
        self
    }

    /// Route `(filename, path)` through the in-memory tree without copying
    /// written buffers.
    pub fn set_zerocopy(mut self, filename: impl Into<String>, path: impl Into<String>) -> Self {
        self.router.set_zerocopy(filename, path);
        self
    }

    /// Bind `(filename, path)` to the intercommunicator named by
    /// `intercomm_index`, the index a [`distributed::DistributedVol`] looks
    /// up through [`Router::intercomm_for`].
    pub fn set_intercomm(mut self, filename: impl Into<String>, path: impl Into<String>, intercomm_index: usize) -> Self {
        self.router.set_intercomm(filename, path, intercomm_index);
        self
    }

    /// Consume the builder, producing the [`Router`] a [`vol::VolDispatcher`]
    /// is constructed with.
    pub fn build(self) -> Router {
        self.router
    }
}
