//! The shared-object store and anonymous-mapping boundary: the only place
//! in this workspace that talks to the kernel's shared-memory namespace.
//! Everything here operates on already-canonicalised names
//! (`/kstate.<name>`); name validation happens one layer up.

use kstate_base::{not_found, os_error, Error, Result};
use memmap2::{Mmap, MmapMut, MmapOptions};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::{fstat, Mode};
use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd};
use tracing::debug;

fn nix_to_err(e: nix::Error) -> Error {
    if e == nix::Error::ENOENT {
        not_found(e.to_string())
    } else {
        os_error(e as i32)
    }
}

fn io_to_err(e: std::io::Error) -> Error {
    os_error(e.raw_os_error().unwrap_or(libc::EIO))
}

/// The length of every region: exactly one host page.
pub fn page_size() -> usize {
    // SAFETY: sysconf with a read-only query argument, no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n <= 0 {
        4096
    } else {
        n as usize
    }
}

/// A shared-object backing a region, already sized to one page.
#[derive(Debug)]
pub struct SharedObject {
    fd: OwnedFd,
}

impl SharedObject {
    /// Open-or-create the named region for read-write access, truncating it
    /// to one page. Safe to call even if the object already exists at the
    /// right size: truncating to the current size is a no-op.
    pub fn create_or_open(canonical_name: &str) -> Result<Self> {
        let mode = Mode::S_IRWXU | Mode::S_IRWXG | Mode::S_IRWXO;
        let fd = shm_open(
            canonical_name,
            OFlag::O_RDWR | OFlag::O_CREAT,
            mode,
        )
        .map_err(nix_to_err)?;
        let file = File::from(fd);
        file.set_len(page_size() as u64).map_err(io_to_err)?;
        debug!(name = canonical_name, "opened shared object for read-write");
        Ok(SharedObject { fd: file.into() })
    }

    /// Open an existing named region for read-only access. Fails
    /// [`Error::NotFound`] if the object does not already exist.
    pub fn open_read_only(canonical_name: &str) -> Result<Self> {
        let fd = shm_open(canonical_name, OFlag::O_RDONLY, Mode::empty()).map_err(nix_to_err)?;
        debug!(name = canonical_name, "opened shared object read-only");
        Ok(SharedObject { fd })
    }

    /// Open an existing named region for read-write access, without
    /// creating it. Used for a transaction's second mapping of a region a
    /// state has already subscribed to.
    pub fn open_existing_read_write(canonical_name: &str) -> Result<Self> {
        let fd = shm_open(canonical_name, OFlag::O_RDWR, Mode::empty()).map_err(nix_to_err)?;
        debug!(name = canonical_name, "opened shared object read-write (existing)");
        Ok(SharedObject { fd })
    }

    /// The current size of the backing object, in bytes.
    pub fn len(&self) -> Result<usize> {
        let st = fstat(self.fd.as_raw_fd()).map_err(nix_to_err)?;
        Ok(st.st_size as usize)
    }

    pub fn map_read_only(&self) -> Result<Mmap> {
        // SAFETY: the backing fd is a shared-memory object whose size we
        // control; other processes may concurrently resize or unlink it,
        // which mmap itself tolerates (stale mappings remain valid).
        unsafe { MmapOptions::new().map(&self.fd) }.map_err(io_to_err)
    }

    pub fn map_read_write(&self) -> Result<MmapMut> {
        // SAFETY: see `map_read_only`.
        unsafe { MmapOptions::new().map_mut(&self.fd) }.map_err(io_to_err)
    }
}

/// Unlink a named region. Absence of the object is logged, not an error,
/// matching the shared-object store's best-effort release contract.
pub fn unlink(canonical_name: &str) -> Result<()> {
    match shm_unlink(canonical_name) {
        Ok(()) => Ok(()),
        Err(nix::Error::ENOENT) => {
            debug!(name = canonical_name, "shared object already unlinked");
            Ok(())
        }
        Err(e) => Err(nix_to_err(e)),
    }
}

/// A private anonymous mapping of `len` bytes, initially zero, for use as a
/// transaction's working copy.
pub fn anon_mapping(len: usize) -> Result<MmapMut> {
    MmapOptions::new().len(len).map_anon().map_err(io_to_err)
}

/// Downgrade a writable anonymous mapping to read-only, the runtime
/// protection change a READ-only transaction's working copy needs after
/// being initialised from the live region.
pub fn downgrade_to_read_only(mapping: MmapMut) -> Result<Mmap> {
    mapping.make_read_only().map_err(io_to_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn create_then_open_read_only_round_trips() {
        let name = format!("/kstate.shm-test-{}", std::process::id());
        let _ = unlink(&name);
        let writer = SharedObject::create_or_open(&name).unwrap();
        assert_eq!(writer.len().unwrap(), page_size());

        let mut rw = writer.map_read_write().unwrap();
        rw[0] = 0xAB;
        rw.flush().unwrap();

        let reader = SharedObject::open_read_only(&name).unwrap();
        let ro = reader.map_read_only().unwrap();
        assert_eq!(ro[0], 0xAB);

        unlink(&name).unwrap();
    }

    #[test]
    fn open_read_only_missing_object_is_not_found() {
        let name = format!("/kstate.shm-missing-{}", std::process::id());
        let _ = unlink(&name);
        let err = SharedObject::open_read_only(&name).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn anon_mapping_starts_zeroed_and_can_be_downgraded() {
        let mut m = anon_mapping(page_size()).unwrap();
        assert!(m.iter().all(|&b| b == 0));
        m[0] = 7;
        let ro = downgrade_to_read_only(m).unwrap();
        assert_eq!(ro[0], 7);
    }

    #[test]
    fn unlink_of_missing_object_is_ok() {
        let name = format!("/kstate.shm-never-existed-{}", std::process::id());
        assert!(unlink(&name).is_ok());
    }
}
