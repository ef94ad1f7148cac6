//! The ALTER TABLE driver and copy-table engine.
//!
//! [`AlterTable::execute`] runs one alteration through
//! `INIT -> CREATE_SHADOW -> COPY_ROWS -> RENAME_SWAP -> DONE`, or straight
//! to `DONE_NO_COPY` for metadata-only requests. Any error ends in
//! `FAILED` after the shadow table is dropped; name locks and table
//! handles are guards and are released on every path.
//!
//! The swap renames the source to a backup name, then the shadow to the
//! target name. If the second rename fails the backup is renamed back, so
//! the original table is never left without a name. Temporary tables go
//! through the same two renames, only without the table cache.
//!
//! Lock order: the table's alter lock for the whole statement, then
//! exclusive use of the table, then the catalog lock around the renames.
//! The catalog lock is never held while waiting for other handles.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::alter::definition::{names_eq, Row, TableDefinition, TableName, Value};
use crate::alter::diff::{compute_delta, AlterPlan, TableDefinitionDelta};
use crate::alter::engine::{EngineRegistry, KeySwitch, RowCursor, Session, StorageEngine};
use crate::alter::request::{AlterRequest, KeysOnOff, TablespaceOp};
use crate::alter::sort::{RowSorter, SortedRows, SORT_BUFFER_ROWS};
use crate::alter::table_cache::{NameLock, TableCache, TableHandle};
use crate::alter::AlterError;

/// Prefix of internal table names.
pub const TMP_FILE_PREFIX: &str = "#sql";

/// Name of the shadow table built by a copying alteration.
pub fn shadow_name(pid: u32, session_id: u64) -> String {
    format!("{}-{:x}_{:x}", TMP_FILE_PREFIX, pid, session_id).to_lowercase()
}

/// Name the original table is parked under during the swap.
pub fn backup_name(pid: u32, session_id: u64) -> String {
    format!("{}2-{:x}-{:x}", TMP_FILE_PREFIX, pid, session_id).to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlterState {
    Init,
    CreateShadow,
    CopyRows,
    RenameSwap,
    Done,
    DoneNoCopy,
    Failed,
}

/// Row counts of the copy phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyProgress {
    pub copied: u64,
    /// Rows skipped under IGNORE.
    pub duplicated_or_deleted: u64,
    /// Values that had to be cut to fit.
    pub warnings: u64,
    pub cursor: RowCursor,
}

/// What a finished alteration reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterOutcome {
    pub state: AlterState,
    /// The table's name after the alteration.
    pub table: TableName,
    pub copied: u64,
    pub deleted: u64,
    pub warnings: u64,
    /// `Records: ..  Duplicates: ..  Warnings: ..` for copies, else empty.
    pub message: String,
}

impl AlterOutcome {
    fn no_copy(table: TableName) -> Self {
        AlterOutcome {
            state: AlterState::DoneNoCopy,
            table,
            copied: 0,
            deleted: 0,
            warnings: 0,
            message: String::new(),
        }
    }

    fn copied(table: TableName, progress: &CopyProgress) -> Self {
        let deleted = progress.duplicated_or_deleted;
        AlterOutcome {
            state: AlterState::Done,
            table,
            copied: progress.copied,
            deleted,
            warnings: progress.warnings,
            message: format!(
                "Records: {}  Duplicates: {}  Warnings: {}",
                progress.copied + deleted,
                deleted,
                progress.warnings
            ),
        }
    }
}

/// Where copied rows come from.
enum RowSource {
    Scan(RowCursor),
    Sorted(SortedRows, RowCursor),
}

impl RowSource {
    fn next(
        &mut self,
        from: &dyn StorageEngine,
        table: &TableName,
    ) -> Result<Option<Row>, AlterError> {
        match self {
            RowSource::Scan(cursor) => from.read_row(table, cursor),
            RowSource::Sorted(rows, cursor) => {
                let row = rows.next_row()?;
                if row.is_some() {
                    cursor.position += 1;
                }
                Ok(row)
            }
        }
    }

    fn cursor(&self) -> RowCursor {
        match self {
            RowSource::Scan(cursor) | RowSource::Sorted(_, cursor) => *cursor,
        }
    }
}

/// Rename, reporting any failure as an error on rename.
fn rename(
    engine: &dyn StorageEngine,
    from: &TableName,
    to: &TableName,
) -> Result<(), AlterError> {
    engine.rename_table(from, to).map_err(|e| match e {
        AlterError::ErrorOnRename { .. } => e,
        other => {
            debug!("Rename of {} to {} failed: {}", from, to, other);
            AlterError::ErrorOnRename {
                from: from.to_string(),
                to: to.to_string(),
            }
        }
    })
}

fn drop_quietly(engine: &dyn StorageEngine, table: &TableName) {
    if let Err(e) = engine.drop_table(table) {
        warn!("Could not drop {}: {}", table, e);
    }
}

/// One ALTER TABLE statement in one session.
pub struct AlterTable<'a> {
    engines: &'a EngineRegistry,
    cache: &'a TableCache,
    session: &'a mut dyn Session,
    pid: u32,
    sort_buffer_rows: usize,
    state: AlterState,
}

impl<'a> AlterTable<'a> {
    pub fn new(
        engines: &'a EngineRegistry,
        cache: &'a TableCache,
        session: &'a mut dyn Session,
    ) -> Self {
        AlterTable {
            engines,
            cache,
            session,
            pid: std::process::id(),
            sort_buffer_rows: SORT_BUFFER_ROWS,
            state: AlterState::Init,
        }
    }

    /// Use `pid` instead of the process id in internal table names.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Rows ORDER BY keeps in memory before spilling a sorted run to disk.
    pub fn with_sort_buffer(mut self, rows: usize) -> Self {
        self.sort_buffer_rows = rows;
        self
    }

    pub fn state(&self) -> AlterState {
        self.state
    }

    /// Alter `table` as `request` asks.
    pub fn execute(
        &mut self,
        table: &TableName,
        request: &AlterRequest,
    ) -> Result<AlterOutcome, AlterError> {
        self.state = AlterState::Init;
        let result = self.run(table, request);
        if let Err(ref e) = result {
            debug!("ALTER TABLE {} failed in {:?}: {}", table, self.state, e);
            self.state = AlterState::Failed;
        }
        result
    }

    fn run(&mut self, table: &TableName, request: &AlterRequest) -> Result<AlterOutcome, AlterError> {
        let cache = self.cache;
        let _alter_lock = cache.lock_for_alter(table, self.session.id());
        let source = self
            .engines
            .find_table(table)
            .ok_or_else(|| AlterError::NoSuchTable(table.to_string()))?;
        let old = source.definition(table)?;
        let plan = compute_delta(&old, request)?;

        let rename_target = request
            .rename
            .as_ref()
            .filter(|target| !target.same_as(table));
        let _name_lock = match rename_target {
            Some(target) => self.reserve_target(&old, target)?,
            None => None,
        };

        let target = match &request.engine {
            Some(name) => self
                .engines
                .get(name)
                .ok_or_else(|| AlterError::UnknownEngine(name.clone()))?,
            None => Arc::clone(&source),
        };
        if !names_eq(target.name(), source.name()) && !source.can_switch_engines(table) {
            return Err(AlterError::RowIsReferenced);
        }
        if !source.can_alter() || !target.can_alter() {
            return Err(AlterError::IllegalHa(table.name.clone()));
        }

        match plan {
            AlterPlan::NoCopy { rename, keys_onoff } => {
                self.fast_path(&*source, table, rename, keys_onoff)
            }
            AlterPlan::Copy(delta) => self.copy_path(&old, &delta, request, &*source, &*target),
            AlterPlan::Tablespace(op) => self.tablespace(&*source, table, op),
        }
    }

    /// Lock the rename target's name and make sure nothing is there.
    fn reserve_target(
        &self,
        old: &TableDefinition,
        target: &TableName,
    ) -> Result<Option<NameLock<'a>>, AlterError> {
        let cache = self.cache;
        // Temporary tables are private to the session; no lock needed.
        let lock = if old.temporary {
            None
        } else {
            Some(cache.lock_name(target, self.session.id())?)
        };
        if self.engines.table_exists(target) {
            return Err(AlterError::TableExists(target.name.clone()));
        }
        Ok(lock)
    }

    fn note_illegal_ha(&mut self, table: &TableName) {
        let note = AlterError::IllegalHa(table.name.clone()).to_string();
        info!("{}", note);
        self.session.push_warning(note);
    }

    fn tablespace(
        &mut self,
        engine: &dyn StorageEngine,
        table: &TableName,
        op: TablespaceOp,
    ) -> Result<AlterOutcome, AlterError> {
        let _exclusive = self.cache.open(table).into_exclusive();
        match op {
            TablespaceOp::Discard => engine.discard_tablespace(table)?,
            TablespaceOp::Import => engine.import_tablespace(table)?,
        }
        self.state = AlterState::DoneNoCopy;
        Ok(AlterOutcome::no_copy(table.clone()))
    }

    fn fast_path(
        &mut self,
        engine: &dyn StorageEngine,
        table: &TableName,
        rename_to: Option<TableName>,
        keys_onoff: KeysOnOff,
    ) -> Result<AlterOutcome, AlterError> {
        let cache = self.cache;
        if keys_onoff != KeysOnOff::LeaveAsIs {
            let exclusive = cache.open(table).into_exclusive();
            let switched = match keys_onoff {
                KeysOnOff::Enable => engine.enable_indexes(table)?,
                KeysOnOff::Disable => engine.disable_indexes(table)?,
                KeysOnOff::LeaveAsIs => KeySwitch::Done,
            };
            drop(exclusive);
            if switched == KeySwitch::Unsupported {
                self.note_illegal_ha(table);
            }
        }

        let mut final_name = table.clone();
        if let Some(target) = rename_to {
            let _exclusive = cache.open(table).into_exclusive();
            let _catalog = cache.lock_catalog();
            if self.engines.table_exists(&target) {
                return Err(AlterError::TableExists(target.name.clone()));
            }
            debug!("Renaming {} to {}", table, target);
            rename(engine, table, &target)?;
            final_name = target;
        }

        self.state = AlterState::DoneNoCopy;
        Ok(AlterOutcome::no_copy(final_name))
    }

    fn copy_path(
        &mut self,
        old: &TableDefinition,
        delta: &TableDefinitionDelta,
        request: &AlterRequest,
        source: &dyn StorageEngine,
        target: &dyn StorageEngine,
    ) -> Result<AlterOutcome, AlterError> {
        let cache = self.cache;
        let table = &old.table;
        let final_name = delta.rename.clone().unwrap_or_else(|| table.clone());
        let shadow = final_name.with_name(shadow_name(self.pid, self.session.id()));

        let mut new_def = delta.definition(old);
        new_def.table = shadow.clone();
        new_def.engine = target.name().to_string();

        self.state = AlterState::CreateShadow;
        debug!("Creating shadow table {} in {}", shadow, target.name());
        target.create_table(&new_def)?;

        // Session-private tables are not in the cache.
        let handle = if old.temporary {
            None
        } else {
            Some(cache.open(table))
        };

        self.state = AlterState::CopyRows;
        let progress =
            match self.copy_rows(old, &new_def, delta, request, source, target) {
                Ok(progress) => progress,
                Err(e) => {
                    drop(handle);
                    drop_quietly(target, &shadow);
                    return Err(e);
                }
            };

        self.state = AlterState::RenameSwap;
        match handle {
            Some(handle) => self.swap(table, &final_name, &shadow, handle, source, target)?,
            None => self.swap_names(table, &final_name, &shadow, source, target)?,
        }

        info!(
            "Altered {}: {} rows copied, {} skipped, {} warnings",
            final_name, progress.copied, progress.duplicated_or_deleted, progress.warnings
        );
        self.state = AlterState::Done;
        Ok(AlterOutcome::copied(final_name, &progress))
    }

    /// Replace `table` with `shadow` under `final_name`.
    fn swap(
        &mut self,
        table: &TableName,
        final_name: &TableName,
        shadow: &TableName,
        handle: TableHandle<'_>,
        source: &dyn StorageEngine,
        target: &dyn StorageEngine,
    ) -> Result<(), AlterError> {
        let _exclusive = handle.into_exclusive();
        let _catalog = self.cache.lock_catalog();
        self.swap_names(table, final_name, shadow, source, target)
    }

    /// The two renames of the swap, with rollback. The shadow is dropped
    /// only while the original is still reachable under its own name.
    fn swap_names(
        &self,
        table: &TableName,
        final_name: &TableName,
        shadow: &TableName,
        source: &dyn StorageEngine,
        target: &dyn StorageEngine,
    ) -> Result<(), AlterError> {
        let backup = table.with_name(backup_name(self.pid, self.session.id()));
        if let Err(e) = rename(source, table, &backup) {
            drop_quietly(target, shadow);
            return Err(e);
        }
        if let Err(e) = rename(target, shadow, final_name) {
            warn!("Could not rename {} to {}; restoring {}", shadow, final_name, table);
            match rename(source, &backup, table) {
                Ok(()) => drop_quietly(target, shadow),
                Err(restore) => error!(
                    "{} is left as {} and the new rows as {}: {}",
                    table, backup, shadow, restore
                ),
            }
            return Err(e);
        }
        drop_quietly(source, &backup);
        Ok(())
    }

    fn manage_keys(
        &mut self,
        from: &dyn StorageEngine,
        to: &dyn StorageEngine,
        table: &TableName,
        shadow: &TableName,
        keys_onoff: KeysOnOff,
    ) -> Result<(), AlterError> {
        let switched = match keys_onoff {
            KeysOnOff::Enable => to.enable_indexes(shadow)?,
            KeysOnOff::Disable => to.disable_indexes(shadow)?,
            KeysOnOff::LeaveAsIs if from.indexes_are_disabled(table) => {
                to.disable_indexes(shadow)?
            }
            KeysOnOff::LeaveAsIs => KeySwitch::Done,
        };
        if switched == KeySwitch::Unsupported {
            self.note_illegal_ha(table);
        }
        Ok(())
    }

    /// Sorted rows for ORDER BY, or `None` to scan in storage order.
    fn ordered_rows(
        &mut self,
        old: &TableDefinition,
        new_def: &TableDefinition,
        order_by: &[String],
        from: &dyn StorageEngine,
        to: &dyn StorageEngine,
    ) -> Result<Option<SortedRows>, AlterError> {
        if order_by.is_empty() {
            return Ok(None);
        }
        if new_def.primary_key().is_some() && to.primary_key_is_clustered() {
            let message = format!(
                "ORDER BY ignored because there is a user-defined clustered index in the table '{}'",
                old.table.name
            );
            warn!("{}", message);
            self.session.push_warning(message);
            return Ok(None);
        }

        let columns = order_by
            .iter()
            .map(|name| {
                old.column_index(name).ok_or_else(|| AlterError::BadField {
                    column: name.clone(),
                    table: old.table.name.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut sorter = RowSorter::new(columns, self.sort_buffer_rows);
        let mut cursor = RowCursor::default();
        while let Some(row) = from.read_row(&old.table, &mut cursor)? {
            sorter.push(row)?;
        }
        if sorter.spilled_runs() > 0 {
            debug!("ORDER BY on {} spilled {} sorted runs", old.table, sorter.spilled_runs());
        }
        Ok(Some(sorter.finish()?))
    }

    fn copy_rows(
        &mut self,
        old: &TableDefinition,
        new_def: &TableDefinition,
        delta: &TableDefinitionDelta,
        request: &AlterRequest,
        from: &dyn StorageEngine,
        to: &dyn StorageEngine,
    ) -> Result<CopyProgress, AlterError> {
        let table = &old.table;
        let shadow = &new_def.table;
        self.manage_keys(from, to, table, shadow, request.keys_onoff)?;

        let mut source = match self.ordered_rows(old, new_def, &request.order_by, from, to)? {
            Some(rows) => RowSource::Sorted(rows, RowCursor::default()),
            None => RowSource::Scan(RowCursor::default()),
        };

        to.start_bulk_insert(shadow, from.row_count(table)?);
        let mut progress = CopyProgress::default();
        let result = self.copy_loop(&mut source, &mut progress, old, new_def, delta, request, from, to);
        progress.cursor = source.cursor();
        let ended = to.end_bulk_insert(shadow);
        result?;
        ended?;
        to.commit(shadow)?;
        Ok(progress)
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_loop(
        &mut self,
        source: &mut RowSource,
        progress: &mut CopyProgress,
        old: &TableDefinition,
        new_def: &TableDefinition,
        delta: &TableDefinitionDelta,
        request: &AlterRequest,
        from: &dyn StorageEngine,
        to: &dyn StorageEngine,
    ) -> Result<(), AlterError> {
        let sources = delta.source_indexes(old);
        let mut row_number = 0u64;

        while let Some(row) = source.next(from, &old.table)? {
            if self.session.is_killed() {
                return Err(AlterError::Killed);
            }
            row_number += 1;
            if let Some(column) = &delta.error_if_not_empty {
                return Err(AlterError::DataTruncated {
                    column: column.clone(),
                    row: row_number,
                });
            }

            let mut new_row = Vec::with_capacity(new_def.columns.len());
            for (col, src) in new_def.columns.iter().zip(&sources) {
                let value = match src {
                    Some(i) => row.get(*i).cloned().unwrap_or(Value::Null),
                    None => col.default.clone().unwrap_or(Value::Null),
                };
                let (value, truncated) = value.coerce(col);
                if truncated {
                    if !request.ignore {
                        return Err(AlterError::DataTruncated {
                            column: col.name.clone(),
                            row: row_number,
                        });
                    }
                    progress.warnings += 1;
                }
                new_row.push(value);
            }

            match to.write_row(&new_def.table, new_row) {
                Ok(()) => progress.copied += 1,
                Err(e) if request.ignore && e.is_skippable() => {
                    debug!("Skipping row {}: {}", row_number, e);
                    progress.duplicated_or_deleted += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
