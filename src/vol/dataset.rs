//! `dataset_create`/`dataset_write`/`dataset_read`/`dataset_close` —
//! Callback contracts.
use crate::dataspace::{Dataspace, Selection};
use crate::datatype::Datatype;
use crate::error::{MetadataError, Result};
use crate::ffi::ObjectPointers;
use crate::object::{DataTriple, DatasetPayload, Ownership, Payload, Token};

use super::{log_call, VolDispatcher};

impl VolDispatcher {
    /// Attach a new `Dataset` node whose `is_passthru`/`is_memory` flags
    /// come from the router, and whose ownership flag comes from the
    /// zero-copy router.
    pub fn dataset_create(
        &mut self,
        filename: &str,
        parent: Token,
        path: &str,
        dtype: Datatype,
        space: Dataspace,
        dcpl: u64,
        dapl: u64,
    ) -> Result<ObjectPointers> {
        let routing = self.classify(filename, path, false);
        log_call("dataset_create", filename, path, routing);

        if !routing.memory && !routing.passthrough {
            return Err(MetadataError::InvariantViolation(format!(
                "dataset_create: {}:{} matches neither memory nor passthrough",
                filename, path
            ))
            .into());
        }

        let ownership = if routing.zerocopy { Ownership::User } else { Ownership::Owned };
        let (mut current, remainder) = self.tree.search(parent, path);
        let leaf_name = remainder
            .last()
            .copied()
            .ok_or_else(|| MetadataError::InvariantViolation(format!("dataset_create: {} already exists", path)))?;
        for component in &remainder[..remainder.len() - 1] {
            current = self
                .tree
                .add_child(current, *component, Payload::Group(crate::object::GroupProps::default()))?;
        }

        let payload = DatasetPayload {
            dtype: dtype.clone(),
            space: space.clone(),
            dcpl,
            dapl,
            ownership,
            is_passthru: routing.passthrough,
            is_memory: routing.memory,
            data: Vec::new(),
        };
        let token = self.tree.add_child(current, leaf_name, Payload::Dataset(payload))?;

        let native = if routing.passthrough {
            let parent_native = self.native_handles.get(&parent).copied();
            match parent_native {
                Some(p) => Some(self.connector().create_dataset(p, path, &dtype, &space)?),
                None => None,
            }
        } else {
            None
        };
        if let Some(h) = native {
            self.native_handles.insert(token, h);
        }

        Ok(Self::wrap(native, Some(token)))
    }

    /// Resolve `path` relative to `parent`. A path that already resolves to
    /// a `Dataset` is returned as-is; a path that doesn't resolve at all
    /// gets a `DummyDataset` placeholder leaf (mirroring `file_open`'s
    /// handling of an unknown name), left for a distributed consumer to
    /// upgrade to a `RemoteDataset`. A path resolving to a non-Dataset
    /// object, or whose intermediate groups don't exist, is an error.
    pub fn dataset_open(&mut self, filename: &str, parent: Token, path: &str) -> Result<ObjectPointers> {
        let routing = self.classify(filename, path, false);
        log_call("dataset_open", filename, path, routing);

        let (current, remainder) = self.tree.search(parent, path);
        let token = if remainder.is_empty() {
            let kind = self.tree.get(current).unwrap().payload().object_type();
            if kind != crate::object::ObjectType::Dataset {
                return Err(MetadataError::TypeMismatch(format!("dataset_open: {}:{} is not a Dataset", filename, path)).into());
            }
            current
        } else if remainder.len() == 1 {
            self.tree.add_child(current, remainder[0], Payload::DummyDataset)?
        } else {
            return Err(MetadataError::NotFound(format!("dataset_open: intermediate path for {} does not exist", path)).into());
        };

        let native = if routing.passthrough {
            match self.native_handles.get(&parent).copied() {
                Some(p) => Some(self.connector().open_dataset(p, path)?),
                None => None,
            }
        } else {
            None
        };
        if let Some(h) = native {
            self.native_handles.insert(token, h);
        }
        Ok(Self::wrap(native, Some(token)))
    }

    /// If `is_memory`, append a `DataTriple`; if ownership is `user`, store
    /// the borrowed pointer, otherwise allocate and copy the selected bytes
    /// as delimited by `iterate(memory, dtype_size, ...)`. If
    /// `is_passthru`, forward.
    pub fn dataset_write(
        &mut self,
        filename: &str,
        path: &str,
        token: Token,
        dtype: &Datatype,
        mem_space: &Dataspace,
        file_space: &Dataspace,
        buf: &[u8],
    ) -> Result<()> {
        let routing = self.classify(filename, path, false);
        log_call("dataset_write", filename, path, routing);

        let native_handle = self.native_handles.get(&token).copied();
        let node = self
            .tree
            .get_mut(token)
            .ok_or_else(|| MetadataError::NotFound(format!("dataset_write: no such object {:?}", token)))?;
        let dataset = node
            .payload_mut()
            .as_dataset_mut()
            .ok_or_else(|| MetadataError::TypeMismatch("dataset_write: token is not a Dataset".into()))?;

        if dataset.is_memory {
            let triple = match dataset.ownership {
                Ownership::User => unsafe { DataTriple::borrowed(dtype.clone(), mem_space.clone(), file_space.clone(), buf) },
                Ownership::Owned => {
                    let mut gathered = Vec::with_capacity(buf.len());
                    mem_space.iterate(dtype.size(), |offset, len| {
                        let start = offset as usize;
                        let end = start + len as usize;
                        gathered.extend_from_slice(&buf[start..end]);
                    });
                    DataTriple::owned(dtype.clone(), mem_space.clone(), file_space.clone(), gathered)
                }
            };
            dataset.data.push(triple);
        }

        if dataset.is_passthru {
            if let Some(handle) = native_handle {
                self.connector().write_dataset(handle, mem_space, file_space, buf)?;
            }
        }

        if dataset.is_memory {
            self.run_after_write_hooks(filename, path);
        }
        Ok(())
    }

    /// Verify type and rank match the stored metadata; iterate over each
    /// `DataTriple` whose file selection intersects the requested file
    /// selection, and copy bytes to the caller's buffer using
    /// `project_intersection` and the two-selection `iterate`.
    pub fn dataset_read(
        &self,
        filename: &str,
        path: &str,
        token: Token,
        dtype: &Datatype,
        mem_space: &Dataspace,
        file_space: &Dataspace,
        buf: &mut [u8],
    ) -> Result<()> {
        let routing = self.classify(filename, path, false);
        log_call("dataset_read", filename, path, routing);

        let node = self
            .tree
            .get(token)
            .ok_or_else(|| MetadataError::NotFound(format!("dataset_read: no such object {:?}", token)))?;
        let dataset = node
            .payload()
            .as_dataset()
            .ok_or_else(|| MetadataError::TypeMismatch("dataset_read: token is not a Dataset".into()))?;

        if !dtype.matches(&dataset.dtype) {
            return Err(MetadataError::TypeMismatch(format!(
                "dataset_read: {}:{} requested type does not match stored type",
                filename, path
            ))
            .into());
        }
        if mem_space.rank() != dataset.space.rank() && dataset.space.rank() != 0 {
            return Err(MetadataError::TypeMismatch(format!(
                "dataset_read: {}:{} rank mismatch ({} vs {})",
                filename,
                path,
                mem_space.rank(),
                dataset.space.rank()
            ))
            .into());
        }

        for triple in &dataset.data {
            if !triple.file_space.intersects(file_space) {
                continue;
            }
            let local_src = triple.file_space.project_intersection(&triple.memory_space, file_space);
            let mem_dst = file_space.project_intersection(mem_space, &triple.file_space);
            let elem = triple.dtype.size();
            let src_bytes = triple.as_slice();

            Dataspace::iterate_pair(&local_src, elem, &mem_dst, elem, |src_off, dst_off, len| {
                let s = src_off as usize;
                let d = dst_off as usize;
                let l = len as usize;
                if s + l <= src_bytes.len() && d + l <= buf.len() {
                    buf[d..d + l].copy_from_slice(&src_bytes[s..s + l]);
                }
            });
        }
        Ok(())
    }

    pub fn dataset_close(&mut self, token: Token) -> Result<()> {
        if let Some(native) = self.native_handles.remove(&token) {
            self.connector().close_dataset(native)?;
        }
        Ok(())
    }
}

/// Selection covering `count` elements starting at `start` along a single
/// dimension, a small helper tests reach for repeatedly.
pub fn slab_1d(start: u64, count: u64) -> Selection {
    Selection::Hyperslab(crate::dataspace::Hyperslab {
        start: crate::dataspace::Dims::from_slice(&[start]),
        stride: crate::dataspace::Dims::from_slice(&[1]),
        count: crate::dataspace::Dims::from_slice(&[count]),
        block: crate::dataspace::Dims::from_slice(&[1]),
    })
}
