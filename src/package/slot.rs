//! Environment slot allocation.
//!
//! Environments live in numbered directories. A new slot is the smallest
//! positive number not yet taken, chosen and created under an exclusive
//! file lock so that concurrent installs never share a directory.
//!
//! A slot stays reserved through a second lock file from allocation until
//! its package link exists. Purge skips reserved slots.

use anyhow::{Context, Result};
use fs4::FileExt;
use log::debug;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::VenvError;
use crate::runtime::Runtime;

use super::EnvId;

pub const MAX_ENVIRONMENTS: u32 = 1_000_000;

/// A freshly created, empty environment directory.
#[derive(Debug)]
pub struct Slot {
    pub id: EnvId,
    pub path: PathBuf,
    reservation: Option<SlotReservation>,
}

impl Slot {
    /// Give up the reservation once the package link points at the slot.
    pub fn release(&mut self) -> Result<()> {
        match self.reservation.take() {
            Some(reservation) => reservation.release(),
            None => Ok(()),
        }
    }
}

/// Smallest positive id not in `used`.
pub fn next_free(used: &BTreeSet<u32>) -> Option<u32> {
    (1..=MAX_ENVIRONMENTS).find(|n| !used.contains(n))
}

/// Exclusive advisory lock, released on drop.
pub struct SlotLock {
    _file: File,
}

impl SlotLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file {:?}", path))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {:?}", path))?;
        debug!("Acquired lock {:?}", path);
        Ok(Self { _file: file })
    }
}

/// Lock file marking slot `id` as in use, next to the allocation lock.
pub fn reservation_path(lock_path: &Path, id: u32) -> PathBuf {
    lock_path.with_extension(format!("{}.lock", id))
}

/// Whether another invocation holds the reservation at `path`.
pub fn is_reserved(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            false
        }
        Err(_) => true,
    }
}

/// Held lock on a slot's reservation file. Dropping it unlocks and removes
/// the file.
#[derive(Debug)]
pub struct SlotReservation {
    file: Option<File>,
    path: PathBuf,
    lock_path: PathBuf,
}

impl SlotReservation {
    /// `None` when another invocation holds the reservation.
    fn try_take(path: PathBuf, lock_path: PathBuf) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open reservation {:?}", path))?;
        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }
        Ok(Some(Self {
            file: Some(file),
            path,
            lock_path,
        }))
    }

    /// Release under the allocation lock, so a concurrent purge sees either
    /// the reservation or the package link.
    fn release(mut self) -> Result<()> {
        let _lock = SlotLock::acquire(&self.lock_path)?;
        self.file.take();
        std::fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove reservation {:?}", self.path))?;
        debug!("Released reservation {:?}", self.path);
        Ok(())
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

pub struct SlotAllocator<'a, R: Runtime> {
    runtime: &'a R,
    venvs_dir: PathBuf,
    lock_path: PathBuf,
}

impl<'a, R: Runtime> SlotAllocator<'a, R> {
    pub fn new(runtime: &'a R, venvs_dir: PathBuf, lock_path: PathBuf) -> Self {
        Self {
            runtime,
            venvs_dir,
            lock_path,
        }
    }

    /// Ids of existing numbered directories. Other names are ignored.
    pub fn used_ids(&self) -> Result<BTreeSet<u32>> {
        if !self.runtime.exists(&self.venvs_dir) {
            return Ok(BTreeSet::new());
        }
        Ok(self
            .runtime
            .read_dir(&self.venvs_dir)?
            .iter()
            .filter_map(|entry| entry.file_name()?.to_str()?.parse::<EnvId>().ok())
            .map(EnvId::get)
            .collect())
    }

    /// Reserve and create the next free environment directory.
    #[tracing::instrument(skip(self))]
    pub fn allocate(&self) -> Result<Slot> {
        let _lock = SlotLock::acquire(&self.lock_path)?;

        let mut used = self.used_ids()?;
        loop {
            let id = next_free(&used).ok_or_else(|| VenvError::CapacityExhausted {
                max: MAX_ENVIRONMENTS,
                dir: self.venvs_dir.clone(),
            })?;
            let reservation =
                SlotReservation::try_take(reservation_path(&self.lock_path, id), self.lock_path.clone())?;
            let Some(reservation) = reservation else {
                debug!("Slot {} is still held by another invocation", id);
                used.insert(id);
                continue;
            };

            let path = self.venvs_dir.join(id.to_string());
            self.runtime
                .create_dir(&path)
                .with_context(|| format!("Failed to reserve environment {:?}", path))?;
            debug!("Allocated environment slot {:?}", path);

            return Ok(Slot {
                id: EnvId::new(id)?,
                path,
                reservation: Some(reservation),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use tempfile::tempdir;

    #[test]
    fn test_next_free() {
        assert_eq!(next_free(&BTreeSet::new()), Some(1));
        assert_eq!(next_free(&BTreeSet::from([1, 3])), Some(2));
        assert_eq!(next_free(&BTreeSet::from([1, 2, 3])), Some(4));
        assert_eq!(next_free(&BTreeSet::from([2])), Some(1));
    }

    #[test]
    fn test_next_free_exhausted() {
        let used: BTreeSet<u32> = (1..=MAX_ENVIRONMENTS).collect();
        assert_eq!(next_free(&used), None);
    }

    #[test]
    fn test_allocate_fills_gap() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let venvs = dir.path().join("venvs");
        for name in ["1", "3", "scratch"] {
            runtime.create_dir_all(&venvs.join(name)).unwrap();
        }

        let allocator =
            SlotAllocator::new(&runtime, venvs.clone(), dir.path().join(".venvlink.lock"));
        let slot = allocator.allocate().unwrap();

        assert_eq!(slot.id.get(), 2);
        assert_eq!(slot.path, venvs.join("2"));
        assert!(runtime.is_dir(&slot.path));

        let next = allocator.allocate().unwrap();
        assert_eq!(next.id.get(), 4);
    }

    #[test]
    fn test_allocate_creates_lock_file() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let venvs = dir.path().join("venvs");
        runtime.create_dir_all(&venvs).unwrap();
        let lock = dir.path().join(".venvlink.lock");

        SlotAllocator::new(&runtime, venvs, lock.clone())
            .allocate()
            .unwrap();
        assert!(runtime.exists(&lock));
    }

    #[test]
    fn test_reservation_held_until_release() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let venvs = dir.path().join("venvs");
        runtime.create_dir_all(&venvs).unwrap();
        let lock = dir.path().join(".venvlink.lock");
        let marker = reservation_path(&lock, 1);
        assert_eq!(marker, dir.path().join(".venvlink.1.lock"));

        let mut slot = SlotAllocator::new(&runtime, venvs, lock).allocate().unwrap();
        assert!(is_reserved(&marker));

        slot.release().unwrap();
        assert!(!is_reserved(&marker));
        assert!(!marker.exists());
        assert!(slot.path.is_dir());
    }

    #[test]
    fn test_allocate_skips_reserved_id() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let venvs = dir.path().join("venvs");
        runtime.create_dir_all(&venvs).unwrap();
        let lock = dir.path().join(".venvlink.lock");
        let allocator = SlotAllocator::new(&runtime, venvs.clone(), lock.clone());

        let first = allocator.allocate().unwrap();
        // A failed install removed its directory but still holds the slot.
        std::fs::remove_dir(&first.path).unwrap();

        let second = allocator.allocate().unwrap();
        assert_eq!(second.id.get(), 2);

        drop(first);
        assert!(!reservation_path(&lock, 1).exists());
        assert_eq!(allocator.allocate().unwrap().id.get(), 1);
    }
}
