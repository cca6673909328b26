//! Reference-counted shard store
//!
//! The store is owned by its index shard (one reference) and borrowed by each
//! live recovery status (one reference per status). When the count reaches
//! zero the store closes and drops its directory contents.
//!
//! # Design
//!
//! - Count lives in an `AtomicUsize`; acquisition is a CAS loop that refuses
//!   to resurrect a closed store
//! - Directory is an in-memory `FxHashMap` of file name to contents, enough
//!   for recovery bookkeeping (temp files, renames, cleanup)

use parking_lot::Mutex;
use recovery_core::{RecoveryError, Result, ShardId};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reference-counted store of one shard
pub struct Store {
    shard_id: ShardId,
    ref_count: AtomicUsize,
    directory: Mutex<FxHashMap<String, Vec<u8>>>,
}

impl Store {
    /// Create a store holding the initial reference of its owner
    pub fn new(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            ref_count: AtomicUsize::new(1),
            directory: Mutex::new(FxHashMap::default()),
        }
    }

    /// Shard this store belongs to
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Current number of references
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Whether the last reference has been released
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.ref_count() == 0
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    /// Acquire a reference unless the store is already closed
    pub fn try_inc_ref(&self) -> bool {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count == 0 {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .is_ok()
    }

    /// Acquire a reference, failing with `StoreClosed` if the store is closed
    pub fn inc_ref(&self) -> Result<()> {
        if self.try_inc_ref() {
            Ok(())
        } else {
            Err(RecoveryError::StoreClosed {
                shard_id: self.shard_id.clone(),
            })
        }
    }

    /// Release a reference
    ///
    /// Returns true if this call released the last reference and closed the
    /// store. Releasing a closed store is a no-op that returns false.
    pub fn dec_ref(&self) -> bool {
        let previous = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        match previous {
            Ok(1) => {
                self.close_internal();
                true
            }
            Ok(_) => false,
            Err(_) => {
                tracing::warn!(
                    target: "recovery::store",
                    shard_id = %self.shard_id,
                    "store reference released after close"
                );
                false
            }
        }
    }

    fn close_internal(&self) {
        let files = {
            let mut directory = self.directory.lock();
            let count = directory.len();
            directory.clear();
            count
        };
        tracing::trace!(
            target: "recovery::store",
            shard_id = %self.shard_id,
            files,
            "store closed"
        );
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RecoveryError::StoreClosed {
                shard_id: self.shard_id.clone(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Directory
    // ========================================================================

    /// Create or overwrite a file
    pub fn write_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.directory
            .lock()
            .insert(name.to_string(), contents.to_vec());
        Ok(())
    }

    /// Append to a file, creating it if missing
    pub fn append_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.directory
            .lock()
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(contents);
        Ok(())
    }

    /// Read a whole file
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.directory
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| RecoveryError::FileNotFound {
                name: name.to_string(),
            })
    }

    /// Rename a file, replacing any existing target
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.ensure_open()?;
        let mut directory = self.directory.lock();
        let contents = directory
            .remove(from)
            .ok_or_else(|| RecoveryError::FileNotFound {
                name: from.to_string(),
            })?;
        directory.insert(to.to_string(), contents);
        Ok(())
    }

    /// Delete files, ignoring names that don't exist
    pub fn delete_quiet<'a, I>(&self, names: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut directory = self.directory.lock();
        for name in names {
            directory.remove(name);
        }
    }

    /// Whether a file exists
    pub fn contains(&self, name: &str) -> bool {
        self.directory.lock().contains_key(name)
    }

    /// All file names, sorted
    pub fn list_all(&self) -> Vec<String> {
        let mut names: Vec<String> = self.directory.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("shard_id", &self.shard_id)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
