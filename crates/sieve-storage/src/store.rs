//! LMDB environment wrapper.
//!
//! One environment holds every [`Table`]. Readers never block writers;
//! top-level write transactions serialize on `write_lock`, and nested write
//! transactions run under the parent's guard. Deferred writes accumulate in
//! `pending` behind their own lock and land in one transaction on
//! [`Lmdb::commit`].

use std::collections::HashMap;
use std::fs;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};

use lmdb::{Cursor, Database, Environment, RoCursor, WriteFlags};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::table::Table;
use crate::transaction::Transaction;

/// Whether a load visits one value or every duplicate at a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    One,
    Multiple,
}

/// Cursor walk direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Forward,
    Backward,
}

/// Outcome of a single write: success flag plus the engine's return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreResult {
    pub success: bool,
    /// `0` on success, the LMDB error code on failure, or
    /// `MDB_LAST_ERRCODE` if the engine was never reached.
    pub code: c_int,
}

impl StoreResult {
    fn not_run() -> Self {
        Self {
            success: false,
            code: lmdb_sys::MDB_LAST_ERRCODE,
        }
    }

    fn failed(e: &lmdb::Error) -> Self {
        Self {
            success: false,
            code: e.to_err_code(),
        }
    }

    fn ok() -> Self {
        Self {
            success: true,
            code: 0,
        }
    }
}

struct PendingWrite {
    table: Table,
    mode: Mode,
    key: Vec<u8>,
    value: Vec<u8>,
}

pub struct Lmdb {
    env: Environment,
    dbs: HashMap<Table, Database>,
    pending: Mutex<Vec<PendingWrite>>,
    pub(crate) write_lock: Mutex<()>,
    path: PathBuf,
}

impl Lmdb {
    /// Create or open the environment at `path` and every table in
    /// [`Table::ALL`].
    pub fn open(path: impl AsRef<Path>, config: &StorageConfig) -> Result<Self, StorageError> {
        config.validate()?;
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let env = Environment::new()
            .set_max_dbs(Table::ALL.len() as u32 + config.extra_tables)
            .set_map_size(config.map_size)
            .set_max_readers(config.max_readers)
            .set_flags(config.flags)
            .open(path)?;

        let mut dbs = HashMap::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            dbs.insert(table, env.create_db(Some(table.name()), table.flags())?);
        }

        info!(path = %path.display(), tables = dbs.len(), "storage: environment open");

        Ok(Self {
            env,
            dbs,
            pending: Mutex::new(Vec::new()),
            write_lock: Mutex::new(()),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn db(&self, table: Table) -> Database {
        // Every table is created in `open`.
        self.dbs[&table]
    }

    // --- Transactions ---

    /// Begin a read-only transaction. Never waits on writers.
    pub fn transaction_ro(&self) -> Option<Transaction<'_>> {
        match self.env.begin_ro_txn() {
            Ok(txn) => Some(Transaction::read_only(txn)),
            Err(e) => {
                error!(error = %e, code = e.to_err_code(), "storage: failed to begin read transaction");
                None
            }
        }
    }

    /// Begin a write transaction.
    ///
    /// Without a parent this waits for the write lock. With a parent the new
    /// transaction is nested inside it and commits into it.
    pub fn transaction_rw<'a>(
        &'a self,
        parent: Option<&'a mut Transaction<'_>>,
    ) -> Option<Transaction<'a>> {
        let begun = match parent {
            Some(parent) => parent
                .begin_nested()
                .map(|txn| Transaction::read_write(txn, None)),
            None => {
                let lock = self.write_lock.lock();
                self.env
                    .begin_rw_txn()
                    .map(|txn| Transaction::read_write(txn, Some(lock)))
            }
        };
        match begun {
            Ok(txn) => Some(txn),
            Err(e) => {
                error!(error = %e, code = e.to_err_code(), "storage: failed to begin write transaction");
                None
            }
        }
    }

    // --- Writes ---

    /// Write one key/value pair, in `parent` if given or in its own
    /// transaction otherwise.
    pub fn store(
        &self,
        table: Table,
        key: &[u8],
        value: &[u8],
        parent: Option<&mut Transaction<'_>>,
        flags: WriteFlags,
    ) -> StoreResult {
        let Some(mut txn) = self.transaction_rw(parent) else {
            return StoreResult::not_run();
        };
        match txn.put(self.db(table), key, value, flags) {
            Ok(()) if txn.finalize(Some(true)) => StoreResult::ok(),
            Ok(()) => StoreResult::not_run(),
            Err(e) => {
                trace!(table = table.name(), error = %e, code = e.to_err_code(), "storage: store failed");
                StoreResult::failed(&e)
            }
        }
    }

    /// Read-modify-write of one key inside a single write transaction.
    /// `update` receives the current value, or an empty slice if absent.
    pub fn store_or_update<F>(
        &self,
        table: Table,
        key: &[u8],
        update: F,
        parent: Option<&mut Transaction<'_>>,
        flags: WriteFlags,
    ) -> StoreResult
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let Some(mut txn) = self.transaction_rw(parent) else {
            return StoreResult::not_run();
        };
        let db = self.db(table);
        let replacement = {
            let previous: &[u8] = match txn.get(db, key) {
                Ok(value) => value,
                Err(lmdb::Error::NotFound) => &[],
                Err(e) => {
                    error!(table = table.name(), error = %e, "storage: failed to read previous value");
                    return StoreResult::failed(&e);
                }
            };
            update(previous)
        };
        match txn.put(db, key, &replacement, flags) {
            Ok(()) if txn.finalize(Some(true)) => StoreResult::ok(),
            Ok(()) => StoreResult::not_run(),
            Err(e) => {
                trace!(table = table.name(), error = %e, "storage: update failed");
                StoreResult::failed(&e)
            }
        }
    }

    /// Remove every value at `key`.
    pub fn delete(&self, table: Table, key: &[u8], parent: Option<&mut Transaction<'_>>) -> bool {
        self.write(table, parent, "delete", |txn, db| txn.del(db, key, None))
    }

    /// Remove one duplicate `(key, value)` pair.
    pub fn delete_value(
        &self,
        table: Table,
        key: &[u8],
        value: &[u8],
        parent: Option<&mut Transaction<'_>>,
    ) -> bool {
        self.write(table, parent, "delete value", |txn, db| {
            txn.del(db, key, Some(value))
        })
    }

    /// Empty a table. The table itself stays open.
    pub fn delete_table(&self, table: Table, parent: Option<&mut Transaction<'_>>) -> bool {
        self.write(table, parent, "delete table", |txn, db| txn.clear(db))
    }

    fn write<F>(
        &self,
        table: Table,
        parent: Option<&mut Transaction<'_>>,
        op: &'static str,
        f: F,
    ) -> bool
    where
        F: FnOnce(&mut Transaction<'_>, Database) -> Result<(), lmdb::Error>,
    {
        let Some(mut txn) = self.transaction_rw(parent) else {
            return false;
        };
        match f(&mut txn, self.db(table)) {
            Ok(()) => txn.finalize(Some(true)),
            Err(e) => {
                trace!(table = table.name(), op, error = %e, "storage: write failed");
                false
            }
        }
    }

    // --- Point reads ---

    pub fn exists(&self, table: Table, key: &[u8]) -> bool {
        match self.transaction_ro() {
            Some(txn) => self.exists_in(&txn, table, key, None),
            None => false,
        }
    }

    /// True if the specific duplicate `value` is stored at `key`.
    pub fn exists_value(&self, table: Table, key: &[u8], value: &[u8]) -> bool {
        match self.transaction_ro() {
            Some(txn) => self.exists_in(&txn, table, key, Some(value)),
            None => false,
        }
    }

    pub fn exists_in(
        &self,
        txn: &Transaction<'_>,
        table: Table,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> bool {
        let Some(cursor) = self.open_cursor(txn, table) else {
            return false;
        };
        let found = match value {
            Some(value) => cursor.get(Some(key), Some(value), lmdb_sys::MDB_GET_BOTH),
            None => cursor.get(Some(key), None, lmdb_sys::MDB_SET),
        };
        match found {
            Ok(_) => true,
            Err(lmdb::Error::NotFound) => false,
            Err(e) => {
                error!(table = table.name(), error = %e, "storage: exists lookup failed");
                false
            }
        }
    }

    /// Visit the first value at `key`, or every duplicate with
    /// [`Mode::Multiple`]. Returns `false` if the key is absent or a cursor
    /// step fails.
    pub fn load<F>(&self, table: Table, key: &[u8], cb: F, mode: Mode) -> bool
    where
        F: FnMut(&[u8]),
    {
        match self.transaction_ro() {
            Some(txn) => self.load_in(&txn, table, key, cb, mode),
            None => false,
        }
    }

    pub fn load_in<F>(
        &self,
        txn: &Transaction<'_>,
        table: Table,
        key: &[u8],
        mut cb: F,
        mode: Mode,
    ) -> bool
    where
        F: FnMut(&[u8]),
    {
        let Some(cursor) = self.open_cursor(txn, table) else {
            return false;
        };
        match cursor.get(Some(key), None, lmdb_sys::MDB_SET_KEY) {
            Ok((_, value)) => cb(value),
            Err(lmdb::Error::NotFound) => return false,
            Err(e) => {
                error!(table = table.name(), error = %e, "storage: load failed");
                return false;
            }
        }
        if mode == Mode::Multiple {
            loop {
                match cursor.get(None, None, lmdb_sys::MDB_NEXT_DUP) {
                    Ok((_, value)) => cb(value),
                    Err(lmdb::Error::NotFound) => break,
                    Err(e) => {
                        error!(table = table.name(), error = %e, "storage: duplicate walk failed");
                        return false;
                    }
                }
            }
        }
        true
    }

    // --- Scans ---

    /// Walk the whole table. `cb` returns `false` to stop early. An empty
    /// table is a successful walk with no callbacks.
    pub fn read<F>(&self, table: Table, cb: F, dir: Dir) -> bool
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        match self.transaction_ro() {
            Some(txn) => self.read_in(&txn, table, cb, dir),
            None => false,
        }
    }

    pub fn read_in<F>(&self, txn: &Transaction<'_>, table: Table, mut cb: F, dir: Dir) -> bool
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let Some(cursor) = self.open_cursor(txn, table) else {
            return false;
        };
        let (start, next) = match dir {
            Dir::Forward => (lmdb_sys::MDB_FIRST, lmdb_sys::MDB_NEXT),
            Dir::Backward => (lmdb_sys::MDB_LAST, lmdb_sys::MDB_PREV),
        };
        match cursor.get(None, None, start) {
            Err(lmdb::Error::NotFound) => true,
            first => scan(table, &cursor, first, None, next, &mut cb),
        }
    }

    /// Walk from exactly `key`. Returns `false` if `key` is absent.
    pub fn read_from<F>(&self, table: Table, key: &[u8], mut cb: F, dir: Dir) -> bool
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let Some(txn) = self.transaction_ro() else {
            return false;
        };
        let Some(cursor) = self.open_cursor(&txn, table) else {
            return false;
        };
        let next = match dir {
            Dir::Forward => lmdb_sys::MDB_NEXT,
            Dir::Backward => lmdb_sys::MDB_PREV,
        };
        match cursor.get(Some(key), None, lmdb_sys::MDB_SET_KEY) {
            Err(lmdb::Error::NotFound) => false,
            first => scan(table, &cursor, first, Some(key), next, &mut cb),
        }
    }

    /// Walk `table` forward through `cb`, then empty it, inside `txn`.
    pub fn read_and_delete<F>(
        &self,
        table: Table,
        mut cb: F,
        txn: &mut Transaction<'_>,
        message: &str,
    ) -> bool
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        info!(table = table.name(), "storage: beginning database upgrade for {message}");
        if !self.read_in(txn, table, &mut cb, Dir::Forward) {
            error!(table = table.name(), "storage: failed to read table before upgrade");
            return false;
        }
        if let Err(e) = txn.clear(self.db(table)) {
            error!(table = table.name(), error = %e, "storage: failed to delete table");
            return false;
        }
        info!(table = table.name(), "storage: finished database upgrade for {message}");
        true
    }

    fn open_cursor<'t>(&self, txn: &'t Transaction<'_>, table: Table) -> Option<RoCursor<'t>> {
        match txn.cursor(self.db(table)) {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                error!(table = table.name(), error = %e, "storage: failed to get cursor");
                None
            }
        }
    }

    // --- Deferred writes ---

    /// Buffer a write for the next [`commit`](Self::commit). [`Mode::One`]
    /// replaces any duplicates already stored at `key`.
    pub fn queue(&self, table: Table, key: &[u8], value: &[u8], mode: Mode) -> bool {
        self.pending.lock().push(PendingWrite {
            table,
            mode,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Write every queued entry in one transaction.
    ///
    /// The queue is drained whether or not the batch lands. Returns `false`
    /// for an empty queue or if any write fails, in which case none of the
    /// batch is applied.
    pub fn commit(&self) -> bool {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return false;
        }
        let Some(mut txn) = self.transaction_rw(None) else {
            return false;
        };
        for write in &batch {
            let db = self.db(write.table);
            if write.mode == Mode::One && write.table.allows_duplicates() {
                match txn.del(db, &write.key, None) {
                    Ok(()) | Err(lmdb::Error::NotFound) => {}
                    Err(e) => {
                        trace!(table = write.table.name(), error = %e, "storage: queued replace failed");
                        return false;
                    }
                }
            }
            if let Err(e) = txn.put(db, &write.key, &write.value, WriteFlags::empty()) {
                trace!(table = write.table.name(), error = %e, "storage: queued write failed");
                return false;
            }
        }
        let committed = txn.finalize(Some(true));
        debug!(writes = batch.len(), committed, "storage: committed queued writes");
        committed
    }

    // --- Integer keys ---

    pub fn store_index(
        &self,
        table: Table,
        index: usize,
        value: &[u8],
        parent: Option<&mut Transaction<'_>>,
        flags: WriteFlags,
    ) -> StoreResult {
        self.store(table, &index.to_ne_bytes(), value, parent, flags)
    }

    pub fn load_index<F>(&self, table: Table, index: usize, cb: F, mode: Mode) -> bool
    where
        F: FnMut(&[u8]),
    {
        self.load(table, &index.to_ne_bytes(), cb, mode)
    }

    pub fn read_from_index<F>(&self, table: Table, index: usize, cb: F, dir: Dir) -> bool
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.read_from(table, &index.to_ne_bytes(), cb, dir)
    }

    pub fn delete_index(
        &self,
        table: Table,
        index: usize,
        parent: Option<&mut Transaction<'_>>,
    ) -> bool {
        self.delete(table, &index.to_ne_bytes(), parent)
    }
}

/// Decode a native-width integer key written by the `*_index` methods.
pub fn index_key(key: &[u8]) -> Option<usize> {
    Some(usize::from_ne_bytes(key.try_into().ok()?))
}

type CursorStep<'t> = Result<(Option<&'t [u8]>, &'t [u8]), lmdb::Error>;

fn scan<'t, F>(
    table: Table,
    cursor: &RoCursor<'t>,
    first: CursorStep<'t>,
    first_key: Option<&[u8]>,
    next: u32,
    cb: &mut F,
) -> bool
where
    F: FnMut(&[u8], &[u8]) -> bool,
{
    let mut step = first;
    let mut fallback = first_key;
    loop {
        match step {
            Ok((key, value)) => {
                let key = key.or(fallback.take()).unwrap_or_default();
                if !cb(key, value) {
                    return true;
                }
            }
            Err(lmdb::Error::NotFound) => return true,
            Err(e) => {
                error!(table = table.name(), error = %e, "storage: cursor walk failed");
                return false;
            }
        }
        step = cursor.get(None, None, next);
    }
}
