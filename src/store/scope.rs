//! Transaction scopes and the deadline watchdog.

use std::ops::Deref;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use rusqlite::{Connection, InterruptHandle, Transaction};

use super::error::StoreError;

/// An open transaction handed to a [`Store::with_scope`] closure.
///
/// Derefs to [`Connection`], so callees prepare and execute statements
/// against it directly. The scope commits when the closure returns `Ok` and
/// rolls back when it returns `Err` or panics; callees never commit or roll
/// back themselves.
///
/// [`Store::with_scope`]: super::Store::with_scope
pub struct TxScope<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> TxScope<'conn> {
    pub(crate) fn new(tx: Transaction<'conn>) -> Self {
        TxScope { tx }
    }

    pub(crate) fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().map_err(StoreError::from)
    }
}

impl Deref for TxScope<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

/// Interrupts the connection when a scope outlives its deadline.
///
/// Armed before the transaction begins and disarmed on drop, so the
/// watchdog covers the whole scope including the commit. An interrupted
/// statement fails with [`StoreError::TimedOut`] and the scope rolls back.
pub(crate) struct Watchdog {
    done: Sender<()>,
}

impl Watchdog {
    pub(crate) fn arm(handle: InterruptHandle, timeout: Duration) -> Self {
        let (done, armed) = mpsc::channel();
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = armed.recv_timeout(timeout) {
                log::warn!(
                    "transaction scope exceeded {:?}; interrupting connection",
                    timeout
                );
                handle.interrupt();
            }
        });
        Watchdog { done }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        let _ = self.done.send(());
    }
}
