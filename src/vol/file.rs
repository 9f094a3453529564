//! `file_create`/`file_open`/`file_close`.
use crate::error::Result;
use crate::ffi::ObjectPointers;
use crate::object::{FileProps, Payload};

use super::{log_call, VolDispatcher};

impl VolDispatcher {
    /// Always create a `File` metadata node; additionally create the
    /// passthrough file when the filename matches a passthrough glob.
    pub fn file_create(&mut self, filename: &str, props: FileProps) -> Result<ObjectPointers> {
        let routing = self.classify(filename, "", true);
        log_call("file_create", filename, "", routing);

        let token = self.tree.create_file(filename, props);
        self.files.insert(filename.to_string(), token);

        let native = if routing.passthrough {
            Some(self.connector().create_file(filename)?)
        } else {
            None
        };
        if let Some(h) = native {
            self.native_handles.insert(token, h);
        }
        Ok(Self::wrap(native, Some(token)))
    }

    /// Look up an existing File by name; if absent, install a `DummyFile`
    /// placeholder. A passthrough handle is created only when the name
    /// matches a passthrough glob and does not match a memory glob.
    pub fn file_open(&mut self, filename: &str) -> Result<ObjectPointers> {
        let routing = self.classify(filename, "", true);
        log_call("file_open", filename, "", routing);

        let token = if let Some(&token) = self.files.get(filename) {
            token
        } else {
            let token = self.tree.create_file(filename, FileProps::default());
            // An open of a name that does not exist locally starts out as
            // a `DummyFile` placeholder, replaced/discarded/upgraded to a
            // `RemoteFile` on further operations.
            self.tree.get_mut(token).unwrap().payload_mut().clone_from(&Payload::DummyFile);
            self.files.insert(filename.to_string(), token);
            token
        };

        let native = if routing.passthrough && !routing.memory {
            Some(self.connector().open_file(filename)?)
        } else {
            None
        };
        if let Some(h) = native {
            self.native_handles.insert(token, h);
        }
        Ok(Self::wrap(native, Some(token)))
    }

    /// Remove the File from the process map unless `keep` is set; delete
    /// the subtree; invoke before/after hooks.
    pub fn file_close(&mut self, filename: &str, keep: bool) -> Result<()> {
        let routing = self.classify(filename, "", true);
        log_call("file_close", filename, "", routing);

        self.run_before_close_hooks(filename);

        if let Some(&token) = self.files.get(filename) {
            if routing.passthrough {
                if let Some(native) = self.native_handles.remove(&token) {
                    self.connector().close_file(native)?;
                }
            }
            if !keep {
                self.tree.remove(token);
                self.files.remove(filename);
            } else {
                self.set_keep(filename, true);
            }
        }

        self.run_after_close_hooks(filename);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_open_of_unknown_name_creates_dummy() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("run.h5", "*");
        let ptrs = vol.file_open("run.h5").unwrap();
        let token = ptrs.metadata.unwrap();
        assert!(matches!(vol.tree().get(token).unwrap().payload(), Payload::DummyFile));
    }

    #[test]
    fn file_close_without_keep_evicts_from_map() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("run.h5", "*");
        vol.file_create("run.h5", FileProps::default()).unwrap();
        assert!(vol.files.contains_key("run.h5"));
        vol.file_close("run.h5", false).unwrap();
        assert!(!vol.files.contains_key("run.h5"));
    }

    #[test]
    fn file_close_with_keep_retains_map_entry() {
        let mut vol = VolDispatcher::default();
        vol.router_mut().set_memory("run.h5", "*");
        vol.file_create("run.h5", FileProps::default()).unwrap();
        vol.file_close("run.h5", true).unwrap();
        assert!(vol.files.contains_key("run.h5"));
    }
}
