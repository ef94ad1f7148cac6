use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::debug;

use crate::binlog::dump::{parse_datetime, DumpOptions, DumpSession};
use crate::binlog::remote::ClientConnection;
use crate::binlog::render::{Base64Output, RenderOptions};
use crate::cli::app::{Base64Mode, Cli};
use crate::util::mysql::{find_defaults_file, parse_defaults_file, ConnectionConfig};
use crate::RplError;

/// Options for one `drizzlebinlog` run.
pub struct BinlogOptions {
    pub logs: Vec<String>,
    pub start_position: u64,
    pub stop_position: Option<u64>,
    pub start_datetime: Option<String>,
    pub stop_datetime: Option<String>,
    pub offset: u64,
    pub server_id: u32,
    pub database: Option<String>,
    pub base64_output: Base64Output,
    pub short_form: bool,
    pub hexdump: bool,
    pub force_if_open: bool,
    pub force_read: bool,
    pub remote: bool,
    pub to_last_log: bool,
    pub local_load: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub defaults_file: Option<String>,
    pub disable_log_bin: bool,
    pub set_charset: Option<String>,
    /// Set from a signal handler to stop between events.
    pub interrupt: Arc<AtomicBool>,
}

impl BinlogOptions {
    pub fn from_cli(cli: Cli, interrupt: Arc<AtomicBool>) -> Self {
        BinlogOptions {
            logs: cli.logs,
            start_position: cli.start_position,
            stop_position: cli.stop_position,
            start_datetime: cli.start_datetime,
            stop_datetime: cli.stop_datetime,
            offset: cli.offset,
            server_id: cli.server_id,
            database: cli.database,
            base64_output: match cli.base64_output {
                Base64Mode::Never => Base64Output::Never,
                Base64Mode::Auto => Base64Output::Auto,
                Base64Mode::Always => Base64Output::Always,
            },
            short_form: cli.short_form,
            hexdump: cli.hexdump,
            force_if_open: cli.force_if_open,
            force_read: cli.force_read,
            remote: cli.read_from_remote_server,
            to_last_log: cli.to_last_log,
            local_load: cli.local_load,
            host: cli.host,
            port: cli.port,
            user: cli.user,
            password: cli.password,
            defaults_file: cli.defaults_file,
            disable_log_bin: cli.disable_log_bin,
            set_charset: cli.set_charset,
            interrupt,
        }
    }

    /// Dump settings, with the datetimes parsed.
    pub fn dump_options(&self) -> Result<DumpOptions, RplError> {
        let defaults = DumpOptions::default();
        let local_load_dir = match &self.local_load {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                if !dir.is_dir() {
                    return Err(RplError::Argument(format!(
                        "--local-load directory {} does not exist",
                        dir.display()
                    )));
                }
                dir
            }
            None => defaults.local_load_dir.clone(),
        };
        Ok(DumpOptions {
            start_position: self.start_position,
            stop_position: self.stop_position.unwrap_or(defaults.stop_position),
            start_datetime: match &self.start_datetime {
                Some(s) => parse_datetime(s)?,
                None => defaults.start_datetime,
            },
            stop_datetime: match &self.stop_datetime {
                Some(s) => parse_datetime(s)?,
                None => defaults.stop_datetime,
            },
            offset: self.offset,
            server_id: self.server_id,
            database: self.database.clone(),
            render: RenderOptions {
                short_form: self.short_form,
                hexdump: self.hexdump,
                base64_output: self.base64_output,
            },
            force_if_open: self.force_if_open,
            force_read: self.force_read,
            to_last_log: self.to_last_log,
            local_load_dir,
            disable_log_bin: self.disable_log_bin,
            charset: self.set_charset.clone(),
        })
    }

    /// Connection settings: the option file, overridden by flags.
    pub fn connection(&self) -> ConnectionConfig {
        let file = match &self.defaults_file {
            Some(path) => Some(PathBuf::from(path)),
            None => find_defaults_file(),
        };
        let mut config = file
            .as_deref()
            .and_then(|path| {
                debug!("Reading connection defaults from {}", path.display());
                parse_defaults_file(path)
            })
            .unwrap_or_default();
        if let Some(h) = &self.host {
            config.host = h.clone();
        }
        if let Some(p) = self.port {
            config.port = p;
        }
        if let Some(u) = &self.user {
            config.user = u.clone();
        }
        if self.password.is_some() {
            config.password = self.password.clone();
        }
        config
    }
}

/// Dump every log in `opts.logs` to `writer`.
pub fn execute(opts: &BinlogOptions, writer: &mut dyn Write) -> Result<(), RplError> {
    let options = opts.dump_options()?;
    let mut session = DumpSession::new(options).with_interrupt(Arc::clone(&opts.interrupt));

    if !opts.remote {
        if let Some(missing) = opts
            .logs
            .iter()
            .find(|l| l.as_str() != "-" && !Path::new(l).exists())
        {
            return Err(RplError::Io(format!("Could not open log file '{}'", missing)));
        }
        return session.run_local(&opts.logs, writer);
    }

    let config = opts.connection();
    session.run(&opts.logs, writer, |session, name, out| {
        let conn = ClientConnection::connect(&config)?;
        debug!(
            "Connected to {} (server {}, connection {})",
            config.host, conn.handshake.server_version, conn.handshake.connection_id
        );
        session.dump_remote(conn, name, out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> BinlogOptions {
        let cli = Cli::try_parse_from(args).unwrap();
        BinlogOptions::from_cli(cli, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_flags_map_to_dump_options() {
        let opts = parse(&[
            "drizzlebinlog",
            "-d",
            "shop",
            "--start-position=120",
            "--stop-datetime",
            "2009-01-01",
            "--base64-output=never",
            "-sH",
            "bin.000001",
        ]);
        let dump = opts.dump_options().unwrap();
        assert_eq!(dump.database.as_deref(), Some("shop"));
        assert_eq!(dump.start_position, 120);
        assert_eq!(dump.stop_position, u64::MAX);
        assert!(dump.stop_datetime < u32::MAX);
        assert_eq!(dump.render.base64_output, Base64Output::Never);
        assert!(dump.render.short_form && dump.render.hexdump);
    }

    #[test]
    fn test_bad_datetime_is_an_argument_error() {
        let opts = parse(&["drizzlebinlog", "--start-datetime", "soon", "x"]);
        assert!(matches!(opts.dump_options(), Err(RplError::Argument(_))));
    }

    #[test]
    fn test_to_last_log_requires_remote() {
        assert!(Cli::try_parse_from(["drizzlebinlog", "-t", "bin.000001"]).is_err());
        assert!(Cli::try_parse_from(["drizzlebinlog", "-R", "-t", "bin.000001"]).is_ok());
    }

    #[test]
    fn test_flags_override_defaults_file() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "[client]\nhost=db1\nuser=repl\npassword=x").unwrap();
        let path = f.path().to_str().unwrap();
        let opts = parse(&["drizzlebinlog", "-R", "--defaults-file", path, "-u", "admin", "b"]);
        let config = opts.connection();
        assert_eq!(config.host, "db1");
        assert_eq!(config.user, "admin");
        assert_eq!(config.password.as_deref(), Some("x"));
    }

    #[test]
    fn test_missing_local_log() {
        let opts = parse(&["drizzlebinlog", "/nonexistent/bin.000001"]);
        let mut out = Vec::new();
        let err = execute(&opts, &mut out).unwrap_err();
        assert!(err.to_string().contains("Could not open log file"));
        assert!(out.is_empty());
    }
}
