//! Drizzle replication toolkit.
//!
//! The `rpl-utils` crate (library name `rpl`) has two halves:
//!
//! - [`binlog`]: the binary log event model, a reader for local files and
//!   replication connections, and the dump driver behind the
//!   `drizzlebinlog` binary, which prints a log as a replayable SQL script;
//! - [`alter`]: the ALTER TABLE engine, which diffs a table definition
//!   against a request and either changes metadata in place or copies the
//!   rows into a shadow table and swaps it in.
//!
//! # CLI Reference
//!
//! ```text
//! drizzlebinlog [OPTIONS] <LOG>...
//! drizzlebinlog -R --host db1 --user repl binlog.000042
//! ```
//!
//! Output goes to stdout (or `--result-file`). Connection settings are read
//! from `~/.my.cnf` (`[client]` and `[drizzlebinlog]` groups) unless
//! `--defaults-file` names another file; flags win over the file. See the
//! [`cli`] module for every option.
//!
//! # Library API
//!
//! ```no_run
//! use rpl::binlog::dump::{DumpOptions, DumpSession};
//!
//! let options = DumpOptions {
//!     database: Some("shop".to_string()),
//!     ..Default::default()
//! };
//! let mut session = DumpSession::new(options);
//! let mut out = Vec::new();
//! session.run_local(&["binlog.000001".to_string()], &mut out).unwrap();
//! print!("{}", String::from_utf8_lossy(&out));
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`binlog::codec`] | Event decode/encode against the active format |
//! | [`binlog::format`] | Format descriptions, probing of local logs |
//! | [`binlog::reader`] | Local file, stdin and remote event sources |
//! | [`binlog::load`] | LOAD DATA temporary file reassembly |
//! | [`binlog::render`] | SQL and `BINLOG` block output |
//! | [`binlog::dump`] | Event filters and the per-log dump loop |
//! | [`alter::diff`] | Validation and definition delta of a request |
//! | [`alter::copy`] | Shadow-table copy and rename swap |
//! | [`alter::table_cache`] | Open handles and name locks |
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli` | on | The `drizzlebinlog` binary and its clap/colored/ctrlc stack. |

pub mod alter;
pub mod binlog;
#[cfg(feature = "cli")]
pub mod cli;
pub mod util;

use thiserror::Error;

pub use alter::AlterError;

/// Errors returned by `rpl` operations.
#[derive(Error, Debug)]
pub enum RplError {
    /// An I/O error occurred (file open, read, seek, or write failure).
    #[error("I/O error: {0}")]
    Io(String),

    /// Malformed or truncated binary data.
    #[error("Parse error: {0}")]
    Parse(String),

    /// An invalid argument was supplied (bad option value, unparsable date, etc.).
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// The replication server reported an error or broke the protocol.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The dump of a log had to stop.
    #[error("{0}")]
    Stream(String),

    #[error(transparent)]
    Alter(#[from] AlterError),
}
