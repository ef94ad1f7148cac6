//! Command-line front end of the `drizzlebinlog` binary.
//!
//! Argument parsing uses clap derive macros. The [`app::Cli`] struct lives
//! in [`app`] and is shared between `main.rs` and `build.rs` (for man page
//! and completion generation) via `include!()`.
//!
//! [`binlog::execute`] turns the parsed flags into
//! [`DumpOptions`](crate::binlog::dump::DumpOptions) and a connection
//! config, then dumps every named log to the given writer. The writer is
//! a `&mut dyn Write` so tests can capture the output.
//!
//! | Option | Effect |
//! |--------|--------|
//! | `--start-position`, `--stop-position` | Position range (first/last log) |
//! | `--start-datetime`, `--stop-datetime` | Timestamp range |
//! | `--offset`, `--server-id`, `--database` | Event filters |
//! | `--base64-output`, `--short-form`, `--hexdump` | Output form |
//! | `--read-from-remote-server`, `--to-last-log` | Read from a server |
//! | `--host`, `--port`, `--user`, `--password`, `--defaults-file` | Connection |
//! | `--local-load` | Where rebuilt LOAD DATA files go |

pub mod app;
pub mod binlog;
