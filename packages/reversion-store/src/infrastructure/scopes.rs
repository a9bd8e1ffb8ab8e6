//! Savepoint ownership
//!
//! A backend has one savepoint stack. The first `begin` on a thread claims
//! it; `begin` on any other thread blocks until the owner's outermost
//! scope is committed or rolled back. Scopes on the owning thread nest.
//!
//! Only scoped work is serialized: plain reads and writes issued outside
//! any scope by another thread are not held back.

use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};

use crate::domain::SavepointId;
use crate::error::{ReversionError, Result};

/// Thread-keyed owner of a savepoint stack
#[derive(Debug, Default)]
pub(crate) struct ScopeOwner {
    state: Mutex<Option<(ThreadId, Vec<SavepointId>)>>,
    released: Condvar,
}

impl ScopeOwner {
    /// Wait for the stack, then run `open` and record `savepoint`
    pub(crate) fn enter<F>(&self, savepoint: SavepointId, open: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.as_ref().is_some_and(|(owner, _)| *owner != me) {
            self.released.wait(&mut state);
        }
        open()?;
        state
            .get_or_insert_with(|| (me, Vec::new()))
            .1
            .push(savepoint);
        Ok(())
    }

    /// Run `close`, then drop `savepoint` and every scope opened after it
    ///
    /// The stack is handed to the next waiting thread once it is empty.
    pub(crate) fn release<F>(&self, savepoint: SavepointId, close: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let open = match state.as_mut() {
            Some((owner, open)) if *owner == me => open,
            _ => {
                return Err(ReversionError::transaction(format!(
                    "Savepoint {} is not open on this thread",
                    savepoint
                )))
            }
        };
        let position = open
            .iter()
            .rposition(|id| *id == savepoint)
            .ok_or_else(|| ReversionError::transaction(format!("Unknown savepoint {}", savepoint)))?;

        close()?;
        open.truncate(position);
        if open.is_empty() {
            *state = None;
            self.released.notify_all();
        }
        Ok(())
    }
}
