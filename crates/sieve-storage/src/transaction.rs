//! Scoped LMDB transactions.
//!
//! A [`Transaction`] finalizes itself exactly once: explicitly through
//! [`Transaction::finalize`], or on drop. It commits when its success flag
//! is set and aborts otherwise, so every early return leaves the store
//! untouched unless the caller opted in.

use lmdb::{Database, RoCursor, RoTransaction, RwTransaction, Transaction as _, WriteFlags};
use parking_lot::MutexGuard;
use tracing::error;

enum Inner<'a> {
    Ro(RoTransaction<'a>),
    Rw(RwTransaction<'a>),
}

pub struct Transaction<'a> {
    success: bool,
    inner: Option<Inner<'a>>,
    // Held for the lifetime of a top-level write transaction. Nested write
    // transactions run under their parent's guard and carry none.
    _lock: Option<MutexGuard<'a, ()>>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn read_only(txn: RoTransaction<'a>) -> Self {
        Self {
            success: false,
            inner: Some(Inner::Ro(txn)),
            _lock: None,
        }
    }

    pub(crate) fn read_write(txn: RwTransaction<'a>, lock: Option<MutexGuard<'a, ()>>) -> Self {
        Self {
            success: false,
            inner: Some(Inner::Rw(txn)),
            _lock: lock,
        }
    }

    pub fn is_read_write(&self) -> bool {
        matches!(self.inner, Some(Inner::Rw(_)))
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.is_none()
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// Mark whether the transaction should commit when finalized.
    pub fn set_success(&mut self, success: bool) {
        self.success = success;
    }

    /// Commit or abort now. `success` overrides the stored flag.
    ///
    /// Returns `false` if the commit failed or the transaction was already
    /// finalized; an abort always succeeds.
    pub fn finalize(&mut self, success: Option<bool>) -> bool {
        let Some(inner) = self.inner.take() else {
            return false;
        };
        if let Some(success) = success {
            self.success = success;
        }
        if !self.success {
            match inner {
                Inner::Ro(txn) => txn.abort(),
                Inner::Rw(txn) => txn.abort(),
            }
            return true;
        }
        let committed = match inner {
            Inner::Ro(txn) => txn.commit(),
            Inner::Rw(txn) => txn.commit(),
        };
        match committed {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, code = e.to_err_code(), "storage: commit failed");
                false
            }
        }
    }

    pub(crate) fn begin_nested(&mut self) -> Result<RwTransaction<'_>, lmdb::Error> {
        self.rw()?.begin_nested_txn()
    }

    pub(crate) fn cursor(&self, db: Database) -> Result<RoCursor<'_>, lmdb::Error> {
        match &self.inner {
            Some(Inner::Ro(txn)) => txn.open_ro_cursor(db),
            Some(Inner::Rw(txn)) => txn.open_ro_cursor(db),
            None => Err(lmdb::Error::BadTxn),
        }
    }

    pub(crate) fn get(&self, db: Database, key: &[u8]) -> Result<&[u8], lmdb::Error> {
        match &self.inner {
            Some(Inner::Ro(txn)) => txn.get(db, &key),
            Some(Inner::Rw(txn)) => txn.get(db, &key),
            None => Err(lmdb::Error::BadTxn),
        }
    }

    pub(crate) fn put(
        &mut self,
        db: Database,
        key: &[u8],
        value: &[u8],
        flags: WriteFlags,
    ) -> Result<(), lmdb::Error> {
        self.rw()?.put(db, &key, &value, flags)
    }

    pub(crate) fn del(
        &mut self,
        db: Database,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<(), lmdb::Error> {
        self.rw()?.del(db, &key, value)
    }

    pub(crate) fn clear(&mut self, db: Database) -> Result<(), lmdb::Error> {
        self.rw()?.clear_db(db)
    }

    fn rw(&mut self) -> Result<&mut RwTransaction<'a>, lmdb::Error> {
        match &mut self.inner {
            Some(Inner::Rw(txn)) => Ok(txn),
            _ => Err(lmdb::Error::BadTxn),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.finalize(None);
    }
}
