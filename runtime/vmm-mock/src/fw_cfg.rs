//! In-memory fw-cfg file table

use std::collections::BTreeMap;

use pvpanic::{FwCfg, FwCfgError};

/// Size of the name field in a fw-cfg file directory entry (NUL included)
pub const FW_CFG_MAX_FILE_PATH: usize = 56;

/// Default number of file slots
pub const FW_CFG_FILE_SLOTS: usize = 32;

/// Named blobs exposed to guest firmware
#[derive(Debug, Clone)]
pub struct FwCfgTable {
    files: BTreeMap<String, Vec<u8>>,
    capacity: usize,
    /// Successful `add_file` calls, duplicates excluded
    adds: usize,
}

impl FwCfgTable {
    pub fn new() -> Self {
        Self::with_capacity(FW_CFG_FILE_SLOTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            files: BTreeMap::new(),
            capacity,
            adds: 0,
        }
    }

    /// Contents of `name`, if published
    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// Published files in name order
    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn add_count(&self) -> usize {
        self.adds
    }
}

impl Default for FwCfgTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FwCfg for FwCfgTable {
    fn add_file(&mut self, name: &str, data: Vec<u8>) -> Result<(), FwCfgError> {
        if name.len() >= FW_CFG_MAX_FILE_PATH {
            return Err(FwCfgError::NameTooLong {
                len: name.len(),
                max: FW_CFG_MAX_FILE_PATH - 1,
            });
        }
        if self.files.contains_key(name) {
            return Err(FwCfgError::DuplicateFile {
                name: name.to_string(),
            });
        }
        if self.files.len() >= self.capacity {
            return Err(FwCfgError::TableFull {
                capacity: self.capacity,
            });
        }

        self.files.insert(name.to_string(), data);
        self.adds += 1;
        Ok(())
    }
}
