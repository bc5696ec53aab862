use kstate_base::{diag_info, diag_warning, invalid_argument, Result};
use kstate_core::{canonical_name, user_name, IdAllocator, Permissions};
use kstate_shm::{unlink, SharedObject};
use memmap2::Mmap;
use std::fmt;
use tracing::instrument;

static STATE_IDS: IdAllocator = IdAllocator::new();

struct Subscription {
    canonical_name: String,
    permissions: Permissions,
    mapping: Mmap,
}

/// A handle to a named, process-shared piece of state.
///
/// Created empty via [`State::new`], attached to a named shared region via
/// [`State::subscribe`], and detached via [`State::unsubscribe`] (or
/// implicitly on drop). The mapping exposed through [`State::view`] is
/// always read-only at the page-protection level, independent of the
/// permissions the state was subscribed with: WRITE only controls whether a
/// write transaction may be started against this state, not direct memory
/// writes.
pub struct State {
    id: u32,
    sub: Option<Subscription>,
}

impl State {
    /// Allocate an unsubscribed handle.
    pub fn new() -> Self {
        State {
            id: STATE_IDS.next(),
            sub: None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.sub.is_some()
    }

    /// Non-zero while subscribed; zero otherwise.
    pub fn id(&self) -> u32 {
        if self.is_subscribed() {
            self.id
        } else {
            0
        }
    }

    /// The user-supplied name this state was subscribed under, with the
    /// internal `/kstate.` prefix stripped.
    pub fn name(&self) -> Option<&str> {
        self.sub.as_ref().map(|s| user_name(&s.canonical_name))
    }

    pub fn permissions(&self) -> Option<Permissions> {
        self.sub.as_ref().map(|s| s.permissions)
    }

    /// The state's current contents. `None` when not subscribed.
    pub fn view(&self) -> Option<&[u8]> {
        self.sub.as_ref().map(|s| &s.mapping[..])
    }

    /// The canonical (prefixed) name, for consumption by `kstate-txn`'s
    /// `Transaction::start` only. Not part of the stable public surface.
    #[doc(hidden)]
    pub fn canonical_name(&self) -> Option<&str> {
        self.sub.as_ref().map(|s| s.canonical_name.as_str())
    }

    /// Subscribe to a named state. `permissions` is a bitset of
    /// [`Permissions::READ`] and/or [`Permissions::WRITE`]; WRITE alone is
    /// promoted to WRITE|READ. If this is the first WRITE-subscription to
    /// the name, its backing region is created and zero-filled.
    #[instrument(skip(self), fields(name))]
    pub fn subscribe(&mut self, name: &str, permissions: u32) -> Result<()> {
        if self.is_subscribed() {
            return Err(invalid_argument(
                "kstate_subscribe_state: state is already subscribed",
            ));
        }

        let perms = Permissions::from_requested("kstate_subscribe_state", permissions)?;
        let canonical = canonical_name("kstate_subscribe_state", name)?;

        let object = if perms.contains(Permissions::WRITE) {
            SharedObject::create_or_open(&canonical)?
        } else {
            SharedObject::open_read_only(&canonical)?
        };
        let mapping = object.map_read_only()?;

        self.sub = Some(Subscription {
            canonical_name: canonical,
            permissions: perms,
            mapping,
        });
        diag_info(format!("subscribed to '{name}' with {perms}"));
        Ok(())
    }

    /// Detach from the currently-subscribed state, unlinking its backing
    /// region. No-op if not subscribed. Does not affect transactions
    /// already started against this state.
    pub fn unsubscribe(&mut self) -> Result<()> {
        let Some(sub) = self.sub.take() else {
            return Ok(());
        };
        let user = user_name(&sub.canonical_name).to_string();
        drop(sub.mapping);
        match unlink(&sub.canonical_name) {
            Ok(()) => {
                diag_info(format!("unsubscribed from '{user}'"));
                Ok(())
            }
            Err(e) => {
                diag_warning(format!("unsubscribe of '{user}' failed: {e}"));
                Err(e)
            }
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for State {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub {
            Some(sub) => write!(
                f,
                "state[{}] '{}' ({})",
                self.id,
                user_name(&sub.canonical_name),
                sub.permissions
            ),
            None => write!(f, "<unsubscribed>"),
        }
    }
}
