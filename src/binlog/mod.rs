//! Binary log reading and dumping.
//!
//! A binlog is a 4-byte magic number followed by length-prefixed events.
//! How an event is laid out depends on the active FORMAT_DESCRIPTION
//! (header length, per-type post-header lengths, checksums), which can
//! change in the middle of a stream.
//!
//! The layers, leaves first:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`constants`] | Offsets, lengths and flags |
//! | [`event_type`] | Event type codes and names |
//! | [`header`] | Common event header |
//! | [`format`] | Format descriptions and local-file probing |
//! | [`events`], [`rows`] | Typed event bodies |
//! | [`codec`] | Decode/encode against the active format |
//! | [`reader`] | Local and remote event sources |
//! | [`remote`] | Replication client connection |
//! | [`load`] | LOAD DATA file reassembly |
//! | [`render`] | SQL text and `BINLOG` rendering |
//! | [`dump`] | Filters and the dump driver |
//!
//! ```no_run
//! use rpl::binlog::dump::{DumpOptions, DumpSession};
//!
//! let mut session = DumpSession::new(DumpOptions::default());
//! let mut out = std::io::stdout();
//! session.run_local(&["binlog.000001".to_string()], &mut out).unwrap();
//! ```

pub mod codec;
pub mod constants;
pub mod dump;
pub mod event_type;
pub mod events;
pub mod format;
pub mod header;
pub mod load;
pub mod reader;
pub mod remote;
pub mod render;
pub mod rows;
