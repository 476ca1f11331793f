//! Limits on files harvested from a sandbox

use crate::types::{DropReason, DroppedFile};
use ember_common::FileEntry;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_FILE_COUNT: usize = 10;

/// Per-file, aggregate and count ceilings for one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLimits {
    pub max_file_size: u64,
    pub max_total_size: u64,
    pub max_file_count: usize,
}

impl Default for FileLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            max_file_count: DEFAULT_MAX_FILE_COUNT,
        }
    }
}

impl FileLimits {
    pub fn new(max_file_size: u64, max_total_size: u64, max_file_count: usize) -> Self {
        Self {
            max_file_size,
            max_total_size,
            max_file_count,
        }
    }

    pub fn budget(&self) -> FileBudget {
        FileBudget {
            limits: *self,
            used_bytes: 0,
            used_files: 0,
        }
    }

    /// Split a listing into files worth transferring and files dropped.
    ///
    /// Hidden and empty files are ignored silently. Offending files are
    /// dropped and evaluation continues with the next entry.
    pub fn select(&self, entries: Vec<FileEntry>) -> (Vec<FileEntry>, Vec<DroppedFile>) {
        let mut budget = self.budget();
        let mut accepted = Vec::new();
        let mut dropped = Vec::new();

        for entry in entries {
            if is_ignored(&entry.name, entry.size) {
                continue;
            }
            match budget.admit(entry.size) {
                Ok(()) => accepted.push(entry),
                Err(reason) => dropped.push(DroppedFile::new(entry.name, Some(entry.size), reason)),
            }
        }

        (accepted, dropped)
    }
}

/// Files the extractor never reports: dotfiles and empty files.
pub fn is_ignored(name: &str, size: u64) -> bool {
    name.starts_with('.') || size == 0
}

/// Running totals while admitting files one by one
#[derive(Debug, Clone)]
pub struct FileBudget {
    limits: FileLimits,
    used_bytes: u64,
    used_files: usize,
}

impl FileBudget {
    /// Reserve room for a file of `size` bytes.
    pub fn admit(&mut self, size: u64) -> Result<(), DropReason> {
        if self.used_files >= self.limits.max_file_count {
            return Err(DropReason::FileCountExceeded);
        }
        if size > self.limits.max_file_size {
            return Err(DropReason::FileTooLarge);
        }
        if self.used_bytes + size > self.limits.max_total_size {
            return Err(DropReason::TotalSizeExceeded);
        }
        self.used_bytes += size;
        self.used_files += 1;
        Ok(())
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn used_files(&self) -> usize {
        self.used_files
    }
}
