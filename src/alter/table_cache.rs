//! Open table handles and name locks shared by all sessions.
//!
//! A rename swap must not run while another session still has the table
//! open. The altering session closes its own handle, marks the table
//! pending-close (new opens block), wakes every waiter and sleeps on the
//! condition variable until the handle count drops to zero.
//!
//! Two alterations of one table would each hold a handle while waiting for
//! the other's to close, so an alteration first takes the table's alter
//! lock. A second session altering the same table waits there, before it
//! opens anything.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use tracing::debug;

use crate::alter::definition::TableName;
use crate::alter::AlterError;

#[derive(Debug, Default)]
struct Entry {
    handles: usize,
    pending_close: bool,
    name_locked_by: Option<u64>,
    altered_by: Option<u64>,
}

impl Entry {
    fn is_idle(&self) -> bool {
        self.handles == 0
            && !self.pending_close
            && self.name_locked_by.is_none()
            && self.altered_by.is_none()
    }
}

/// Process-wide table cache.
#[derive(Debug, Default)]
pub struct TableCache {
    tables: Mutex<HashMap<String, Entry>>,
    changed: Condvar,
    catalog: Mutex<()>,
}

impl TableCache {
    /// Open a handle on `table`, waiting while it is being closed for an
    /// alteration.
    pub fn open(&self, table: &TableName) -> TableHandle<'_> {
        let key = table.key();
        let mut tables = self.tables.lock();
        while tables.get(&key).is_some_and(|e| e.pending_close) {
            self.changed.wait(&mut tables);
        }
        tables.entry(key.clone()).or_default().handles += 1;
        TableHandle { cache: self, key }
    }

    pub fn open_handles(&self, table: &TableName) -> usize {
        self.tables
            .lock()
            .get(&table.key())
            .map_or(0, |e| e.handles)
    }

    /// Reserve `table`'s name for `session`. Fails if the table is open or
    /// another session holds the name.
    pub fn lock_name(&self, table: &TableName, session: u64) -> Result<NameLock<'_>, AlterError> {
        let key = table.key();
        let mut tables = self.tables.lock();
        let entry = tables.entry(key.clone()).or_default();
        if entry.handles > 0 || entry.name_locked_by.is_some_and(|s| s != session) {
            return Err(AlterError::TableExists(table.name.clone()));
        }
        entry.name_locked_by = Some(session);
        Ok(NameLock { cache: self, key })
    }

    /// Wait until no other session is altering `table`, then claim it.
    pub fn lock_for_alter(&self, table: &TableName, session: u64) -> AlterLock<'_> {
        let key = table.key();
        let mut tables = self.tables.lock();
        while tables
            .get(&key)
            .is_some_and(|e| e.altered_by.is_some_and(|s| s != session))
        {
            debug!("Waiting for another ALTER TABLE on {}", key);
            self.changed.wait(&mut tables);
        }
        tables.entry(key.clone()).or_default().altered_by = Some(session);
        AlterLock { cache: self, key }
    }

    /// Serialises catalog changes (renames, drops of swapped tables). Never
    /// held while rows are copied.
    pub fn lock_catalog(&self) -> MutexGuard<'_, ()> {
        self.catalog.lock()
    }

    fn release<F: FnOnce(&mut Entry)>(&self, key: &str, f: F) {
        let mut tables = self.tables.lock();
        if let Some(entry) = tables.get_mut(key) {
            f(entry);
            if entry.is_idle() {
                tables.remove(key);
            }
        }
        self.changed.notify_all();
    }
}

/// An open table instance. Closed on drop.
#[derive(Debug)]
pub struct TableHandle<'a> {
    cache: &'a TableCache,
    key: String,
}

impl<'a> TableHandle<'a> {
    /// Close this handle and wait until nobody else has the table open.
    /// New opens block until the returned guard is dropped.
    pub fn into_exclusive(mut self) -> ExclusiveUse<'a> {
        let cache = self.cache;
        let key = std::mem::take(&mut self.key);
        std::mem::forget(self);
        let mut tables = cache.tables.lock();
        {
            let entry = tables.entry(key.clone()).or_default();
            entry.handles = entry.handles.saturating_sub(1);
            entry.pending_close = true;
        }
        cache.changed.notify_all();
        while tables.get(&key).is_some_and(|e| e.handles > 0) {
            debug!("Waiting for other handles on {} to close", key);
            cache.changed.wait(&mut tables);
        }
        ExclusiveUse { cache, key }
    }
}

impl Drop for TableHandle<'_> {
    fn drop(&mut self) {
        self.cache
            .release(&self.key, |e| e.handles = e.handles.saturating_sub(1));
    }
}

/// Held while no other session may open the table.
#[derive(Debug)]
pub struct ExclusiveUse<'a> {
    cache: &'a TableCache,
    key: String,
}

impl Drop for ExclusiveUse<'_> {
    fn drop(&mut self) {
        self.cache.release(&self.key, |e| e.pending_close = false);
    }
}

/// Reservation of a table name. Released on drop.
#[derive(Debug)]
pub struct NameLock<'a> {
    cache: &'a TableCache,
    key: String,
}

impl Drop for NameLock<'_> {
    fn drop(&mut self) {
        self.cache.release(&self.key, |e| e.name_locked_by = None);
    }
}

/// Claim on altering a table. Released on drop.
#[derive(Debug)]
pub struct AlterLock<'a> {
    cache: &'a TableCache,
    key: String,
}

impl Drop for AlterLock<'_> {
    fn drop(&mut self) {
        self.cache.release(&self.key, |e| e.altered_by = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn t() -> TableName {
        TableName::new("test", "t")
    }

    #[test]
    fn test_handles_counted() {
        let cache = TableCache::default();
        let a = cache.open(&t());
        let b = cache.open(&TableName::new("TEST", "T"));
        assert_eq!(cache.open_handles(&t()), 2);
        drop(a);
        assert_eq!(cache.open_handles(&t()), 1);
        drop(b);
        assert_eq!(cache.open_handles(&t()), 0);
        assert!(cache.tables.lock().is_empty());
    }

    #[test]
    fn test_name_lock_conflicts() {
        let cache = TableCache::default();
        let lock = cache.lock_name(&t(), 1).unwrap();
        assert_eq!(
            cache.lock_name(&t(), 2).unwrap_err(),
            AlterError::TableExists("t".into())
        );
        drop(lock);
        assert!(cache.lock_name(&t(), 2).is_ok());

        let _open = cache.open(&t());
        assert!(cache.lock_name(&t(), 3).is_err());
    }

    #[test]
    fn test_exclusive_waits_for_other_handles() {
        let cache = TableCache::default();
        let released = AtomicBool::new(false);
        let other = cache.open(&t());
        let own = cache.open(&t());

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(50));
                released.store(true, Ordering::SeqCst);
                drop(other);
            });
            let exclusive = own.into_exclusive();
            assert!(released.load(Ordering::SeqCst));
            assert_eq!(cache.open_handles(&t()), 0);
            drop(exclusive);
        });
        assert!(cache.tables.lock().is_empty());
    }

    #[test]
    fn test_open_blocks_while_pending_close() {
        let cache = TableCache::default();
        let reopened = AtomicBool::new(false);
        let exclusive = cache.open(&t()).into_exclusive();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let _h = cache.open(&t());
                reopened.store(true, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(50));
            assert!(!reopened.load(Ordering::SeqCst));
            drop(exclusive);
            waiter.join().unwrap();
        });
        assert!(reopened.load(Ordering::SeqCst));
    }

    #[test]
    fn test_alter_lock_serialises_sessions() {
        let cache = TableCache::default();
        let second_claimed = AtomicBool::new(false);
        let first = cache.lock_for_alter(&t(), 1);

        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let _second = cache.lock_for_alter(&t(), 2);
                second_claimed.store(true, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(50));
            assert!(!second_claimed.load(Ordering::SeqCst));
            // Other tables are not affected.
            drop(cache.lock_for_alter(&TableName::new("test", "u"), 3));
            drop(first);
            waiter.join().unwrap();
        });
        assert!(second_claimed.load(Ordering::SeqCst));
        assert!(cache.tables.lock().is_empty());
    }
}
