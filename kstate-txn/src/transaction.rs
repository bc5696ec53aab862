use kstate_base::{diag_info, diag_warning, invalid_argument, permission_denied, Result};
use kstate_core::{user_name, IdAllocator, Permissions};
use kstate_shm::{anon_mapping, downgrade_to_read_only, SharedObject};
use kstate_state::State;
use memmap2::{Mmap, MmapMut};
use std::fmt;
use tracing::instrument;

static TXN_IDS: IdAllocator = IdAllocator::new();

/// Either a read-only or a read-write page mapping, depending on the
/// transaction's permissions.
enum View {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl View {
    fn as_bytes(&self) -> &[u8] {
        match self {
            View::ReadOnly(m) => &m[..],
            View::ReadWrite(m) => &m[..],
        }
    }

    fn as_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            View::ReadOnly(_) => None,
            View::ReadWrite(m) => Some(&mut m[..]),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        match self.as_bytes_mut() {
            Some(dst) => dst.copy_from_slice(bytes),
            None => unreachable!("commit only writes through a write-capable live mapping"),
        }
    }
}

struct Active {
    canonical_name: String,
    permissions: Permissions,
    /// Second, independent mapping of the same shared region.
    live: View,
    /// Snapshot of the region taken at start, for WRITE transactions only.
    baseline: Option<Vec<u8>>,
    /// Private anonymous mapping exposed to the caller.
    working: View,
}

/// An optimistic edit session against a [`State`].
///
/// Created empty via [`Transaction::new`], attached to a subscribed state
/// via [`Transaction::start`], and resolved via [`Transaction::commit`] or
/// [`Transaction::abort`] (or implicitly aborted on drop, if still active).
/// A transaction's resources are entirely independent of the [`State`] it
/// was started against: unsubscribing that state does not affect an
/// already-started transaction.
pub struct Transaction {
    id: u32,
    active: Option<Active>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction {
            id: TXN_IDS.next(),
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Non-zero while active; zero otherwise.
    pub fn id(&self) -> u32 {
        if self.is_active() {
            self.id
        } else {
            0
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| user_name(&a.canonical_name))
    }

    pub fn permissions(&self) -> Option<Permissions> {
        self.active.as_ref().map(|a| a.permissions)
    }

    /// The transaction's private working copy. `None` when not active.
    pub fn view(&self) -> Option<&[u8]> {
        self.active.as_ref().map(|a| a.working.as_bytes())
    }

    /// The transaction's private working copy, mutable. `None` when not
    /// active or when the transaction is READ-only.
    pub fn view_mut(&mut self) -> Option<&mut [u8]> {
        self.active.as_mut().and_then(|a| a.working.as_bytes_mut())
    }

    /// Start a transaction against `state`, which must currently be
    /// subscribed. `permissions` is promoted the same way
    /// [`State::subscribe`] promotes WRITE-alone to WRITE|READ. Starting a
    /// WRITE transaction against a READ-only state fails.
    #[instrument(skip(self, state))]
    pub fn start(&mut self, state: &State, permissions: u32) -> Result<()> {
        if self.is_active() {
            return Err(invalid_argument(
                "kstate_start_transaction: transaction is still active",
            ));
        }
        let Some(canonical) = state.canonical_name().map(str::to_owned) else {
            return Err(invalid_argument(
                "kstate_start_transaction: cannot start a transaction on an unsubscribed state",
            ));
        };

        let perms = Permissions::from_requested("kstate_start_transaction", permissions)?;
        let state_perms = state
            .permissions()
            .expect("state is subscribed, checked above");
        if perms.contains(Permissions::WRITE) && !state_perms.contains(Permissions::WRITE) {
            return Err(invalid_argument(
                "kstate_start_transaction: cannot start a write transaction on a read-only state",
            ));
        }

        let write = perms.contains(Permissions::WRITE);
        let object = if write {
            SharedObject::open_existing_read_write(&canonical)?
        } else {
            SharedObject::open_read_only(&canonical)?
        };
        let len = object.len()?;

        let (live, baseline) = if write {
            let mapping = object.map_read_write()?;
            let baseline = mapping[..].to_vec();
            (View::ReadWrite(mapping), Some(baseline))
        } else {
            (View::ReadOnly(object.map_read_only()?), None)
        };

        let mut working_rw = anon_mapping(len)?;
        working_rw.copy_from_slice(live.as_bytes());
        let working = if write {
            View::ReadWrite(working_rw)
        } else {
            View::ReadOnly(downgrade_to_read_only(working_rw)?)
        };

        diag_info(format!(
            "started transaction on '{}' with {perms}",
            user_name(&canonical)
        ));
        self.active = Some(Active {
            canonical_name: canonical,
            permissions: perms,
            live,
            baseline,
            working,
        });
        Ok(())
    }

    /// Abort an active transaction, discarding its working copy.
    pub fn abort(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Err(invalid_argument(
                "kstate_abort_transaction: transaction is not active",
            ));
        };
        diag_info(format!("aborted transaction on '{}'", user_name(&active.canonical_name)));
        Ok(())
    }

    /// Commit an active WRITE transaction.
    ///
    /// Fails [`PermissionDenied`](kstate_base::Error::PermissionDenied) and
    /// leaves the transaction active if it is READ-only (the caller must
    /// then abort). Fails the same way but *terminates* the transaction if
    /// the live region no longer matches the baseline captured at start
    /// (someone else committed first); otherwise writes the working copy
    /// back (if it differs from the live contents) and terminates.
    pub fn commit(&mut self) -> Result<()> {
        let Some(active) = &self.active else {
            return Err(invalid_argument(
                "kstate_commit_transaction: transaction is not active",
            ));
        };
        if !active.permissions.contains(Permissions::WRITE) {
            diag_warning("kstate_commit_transaction: cannot commit a read-only transaction");
            return Err(permission_denied(
                "kstate_commit_transaction: cannot commit a read-only transaction",
            ));
        }

        let name = user_name(&active.canonical_name).to_string();
        let baseline = active
            .baseline
            .as_deref()
            .expect("write transaction always captures a baseline at start");
        if active.live.as_bytes() != baseline {
            diag_warning(format!("commit refused: '{name}' changed during the transaction"));
            self.active = None;
            return Err(permission_denied(format!(
                "kstate_commit_transaction: '{name}' changed during the transaction"
            )));
        }

        let active = self.active.as_mut().expect("checked active above");
        if active.working.as_bytes() != active.live.as_bytes() {
            let bytes = active.working.as_bytes().to_vec();
            active.live.write_bytes(&bytes);
        }

        self.active = None;
        diag_info(format!("committed transaction on '{name}'"));
        Ok(())
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let _ = self.abort();
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.active {
            Some(active) => write!(
                f,
                "transaction[{}] '{}' ({})",
                self.id,
                user_name(&active.canonical_name),
                active.permissions
            ),
            None => write!(f, "<not active>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kstate_core::unique_name;
    use test_log::test;

    fn fresh_write_state() -> (State, String) {
        let mut state = State::new();
        let name = unique_name("Fred").unwrap();
        state.subscribe(&name, Permissions::WRITE.bits()).unwrap();
        (state, name)
    }

    #[test]
    fn fresh_region_reads_zero_through_a_started_transaction() {
        let (state, _) = fresh_write_state();
        let mut txn = Transaction::new();
        txn.start(&state, Permissions::WRITE.bits()).unwrap();
        assert!(txn.view().unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_commit_is_visible_through_the_state() {
        let (state, _) = fresh_write_state();
        let mut txn = Transaction::new();
        txn.start(&state, Permissions::WRITE.bits()).unwrap();
        txn.view_mut().unwrap()[0] = 0x42;
        txn.commit().unwrap();
        assert!(!txn.is_active());
        assert_eq!(state.view().unwrap()[0], 0x42);
    }

    #[test]
    fn second_committer_loses_the_race() {
        let (state, _) = fresh_write_state();
        let mut t1 = Transaction::new();
        let mut t2 = Transaction::new();
        t1.start(&state, Permissions::WRITE.bits()).unwrap();
        t2.start(&state, Permissions::WRITE.bits()).unwrap();

        t1.view_mut().unwrap()[0] = 0x12;
        t1.commit().unwrap();
        assert_eq!(state.view().unwrap()[0], 0x12);

        t2.view_mut().unwrap()[0] = 0x87;
        let err = t2.commit().unwrap_err();
        assert_eq!(err.errno(), libc::EPERM);
        assert!(!t2.is_active());
        assert_eq!(state.view().unwrap()[0], 0x12);

        t2.abort().unwrap_err(); // already terminated by the failed commit
    }

    #[test]
    fn read_only_commit_fails_but_stays_active() {
        let (state, _) = fresh_write_state();
        let mut txn = Transaction::new();
        txn.start(&state, Permissions::READ.bits()).unwrap();
        let err = txn.commit().unwrap_err();
        assert_eq!(err.errno(), libc::EPERM);
        assert!(txn.is_active());
        txn.abort().unwrap();
    }

    #[test]
    fn write_transaction_against_read_only_state_is_rejected() {
        let (_owner, name) = fresh_write_state();
        let mut reader = State::new();
        reader.subscribe(&name, Permissions::READ.bits()).unwrap();
        let mut txn = Transaction::new();
        let err = txn.start(&reader, Permissions::WRITE.bits()).unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[test]
    fn transaction_outlives_its_originating_state() {
        let (mut state, _) = fresh_write_state();
        let mut txn = Transaction::new();
        txn.start(&state, Permissions::WRITE.bits()).unwrap();
        drop(state.unsubscribe());
        txn.view_mut().unwrap()[0] = 9;
        txn.commit().unwrap();
    }

    #[test]
    fn double_abort_fails() {
        let (state, _) = fresh_write_state();
        let mut txn = Transaction::new();
        txn.start(&state, Permissions::WRITE.bits()).unwrap();
        txn.abort().unwrap();
        assert!(txn.abort().is_err());
    }

    #[test]
    fn double_commit_fails() {
        let (state, _) = fresh_write_state();
        let mut txn = Transaction::new();
        txn.start(&state, Permissions::WRITE.bits()).unwrap();
        txn.view_mut().unwrap()[0] = 0x55;
        txn.commit().unwrap();
        assert!(!txn.is_active());
        let err = txn.commit().unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
        assert_eq!(state.view().unwrap()[0], 0x55);
    }
}
