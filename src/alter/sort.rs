//! Bounded-memory sort for `ALTER TABLE ... ORDER BY`.
//!
//! Rows are buffered up to a fixed count, sorted, and spilled to an
//! anonymous temporary file as one JSON line per row. When the scan ends,
//! the runs are merged through a heap. Tables that fit in one buffer never
//! touch the disk.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use tracing::debug;

use crate::alter::definition::{Row, Value};
use crate::alter::AlterError;

/// Rows held in memory before a run is written out.
pub const SORT_BUFFER_ROWS: usize = 64 * 1024;

fn sort_error(e: impl std::fmt::Display) -> AlterError {
    AlterError::SortFile(e.to_string())
}

fn compare(columns: &[usize], a: &Row, b: &Row) -> Ordering {
    columns
        .iter()
        .map(|&i| a.get(i).cmp(&b.get(i)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Collects rows and hands them back ordered by `columns`. Equal keys keep
/// their input order.
#[derive(Debug)]
pub struct RowSorter {
    columns: Vec<usize>,
    buffer_rows: usize,
    buffer: Vec<Row>,
    runs: Vec<BufReader<File>>,
}

impl RowSorter {
    pub fn new(columns: Vec<usize>, buffer_rows: usize) -> Self {
        RowSorter {
            columns,
            buffer_rows: buffer_rows.max(1),
            buffer: Vec::new(),
            runs: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Row) -> Result<(), AlterError> {
        self.buffer.push(row);
        if self.buffer.len() >= self.buffer_rows {
            self.spill()?;
        }
        Ok(())
    }

    /// Number of runs written to disk so far.
    pub fn spilled_runs(&self) -> usize {
        self.runs.len()
    }

    fn sort_buffer(&mut self) {
        let columns = &self.columns;
        self.buffer.sort_by(|a, b| compare(columns, a, b));
    }

    fn spill(&mut self) -> Result<(), AlterError> {
        self.sort_buffer();
        let mut file = tempfile::tempfile().map_err(sort_error)?;
        {
            let mut writer = BufWriter::new(&mut file);
            for row in self.buffer.drain(..) {
                serde_json::to_writer(&mut writer, &row).map_err(sort_error)?;
                writer.write_all(b"\n").map_err(sort_error)?;
            }
            writer.flush().map_err(sort_error)?;
        }
        file.seek(SeekFrom::Start(0)).map_err(sort_error)?;
        debug!("Spilled sort run {}", self.runs.len());
        self.runs.push(BufReader::new(file));
        Ok(())
    }

    pub fn finish(mut self) -> Result<SortedRows, AlterError> {
        if self.runs.is_empty() {
            self.sort_buffer();
            return Ok(SortedRows::Memory(self.buffer.into_iter()));
        }
        if !self.buffer.is_empty() {
            self.spill()?;
        }
        let mut merge = Merge {
            columns: self.columns,
            runs: self.runs,
            heap: BinaryHeap::new(),
        };
        for run in 0..merge.runs.len() {
            merge.refill(run)?;
        }
        Ok(SortedRows::Merge(merge))
    }
}

/// Next row of one run, ordered so the heap pops the smallest key first
/// and, among equal keys, the earliest run.
#[derive(Debug)]
struct Head {
    key: Vec<Value>,
    run: usize,
    row: Row,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key).then(other.run.cmp(&self.run))
    }
}

#[derive(Debug)]
pub struct Merge {
    columns: Vec<usize>,
    runs: Vec<BufReader<File>>,
    heap: BinaryHeap<Head>,
}

impl Merge {
    fn refill(&mut self, run: usize) -> Result<(), AlterError> {
        let mut line = String::new();
        if self.runs[run].read_line(&mut line).map_err(sort_error)? == 0 {
            return Ok(());
        }
        let row: Row = serde_json::from_str(&line).map_err(sort_error)?;
        let key = self
            .columns
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        self.heap.push(Head { key, run, row });
        Ok(())
    }
}

/// Sorted output of a [`RowSorter`].
#[derive(Debug)]
pub enum SortedRows {
    Memory(std::vec::IntoIter<Row>),
    Merge(Merge),
}

impl SortedRows {
    pub fn next_row(&mut self) -> Result<Option<Row>, AlterError> {
        match self {
            SortedRows::Memory(rows) => Ok(rows.next()),
            SortedRows::Merge(merge) => match merge.heap.pop() {
                Some(head) => {
                    merge.refill(head.run)?;
                    Ok(Some(head.row))
                }
                None => Ok(None),
            },
        }
    }
}
