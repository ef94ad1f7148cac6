use clap::{ArgAction, Parser, ValueEnum};

/// Dumps a Drizzle binary log in a format usable for viewing or for
/// piping to the drizzle command line client.
#[derive(Parser)]
#[command(name = "drizzlebinlog")]
#[command(about = "Dump Drizzle binary logs as SQL")]
#[command(version)]
pub struct Cli {
    /// Binary log files to dump, in order; `-` reads standard input
    #[arg(required_unless_present = "completions")]
    pub logs: Vec<String>,

    /// Start reading the first log at this position
    #[arg(short = 'j', long = "start-position", default_value_t = 4)]
    pub start_position: u64,

    /// Stop reading the last log at this position
    #[arg(long = "stop-position")]
    pub stop_position: Option<u64>,

    /// Start at the first event with this timestamp or later
    /// (e.g. "2004-12-25 11:25:56")
    #[arg(long = "start-datetime")]
    pub start_datetime: Option<String>,

    /// Stop at the first event with this timestamp or later
    #[arg(long = "stop-datetime")]
    pub stop_datetime: Option<String>,

    /// Skip the first N events
    #[arg(short = 'o', long, default_value_t = 0)]
    pub offset: u64,

    /// Only dump events created by the server with this id
    #[arg(long = "server-id", default_value_t = 0)]
    pub server_id: u32,

    /// Only dump statements run while this database was the default one
    #[arg(short = 'd', long)]
    pub database: Option<String>,

    /// When to print events as BINLOG statements
    #[arg(long = "base64-output", value_enum, default_value = "auto")]
    pub base64_output: Base64Mode,

    /// Just show the statements, without extra comments or row events
    #[arg(short = 's', long = "short-form")]
    pub short_form: bool,

    /// Augment output with hexadecimal and ASCII event dump
    #[arg(short = 'H', long)]
    pub hexdump: bool,

    /// Dump a log even if it was not closed properly
    #[arg(short = 'F', long = "force-if-open")]
    pub force_if_open: bool,

    /// Skip unknown events instead of stopping
    #[arg(short = 'f', long = "force-read")]
    pub force_read: bool,

    /// Read the logs from a server instead of local files
    #[arg(short = 'R', long = "read-from-remote-server")]
    pub read_from_remote_server: bool,

    /// Keep reading until the server's last log
    #[arg(short = 't', long = "to-last-log", requires = "read_from_remote_server")]
    pub to_last_log: bool,

    /// Write output to this file instead of stdout
    #[arg(short = 'r', long = "result-file")]
    pub result_file: Option<String>,

    /// Directory for the temporary files of LOAD DATA INFILE
    #[arg(short = 'l', long = "local-load")]
    pub local_load: Option<String>,

    /// Server host
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Connect as this user
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Password of the user
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Read connection settings from this option file instead of ~/.my.cnf
    #[arg(long = "defaults-file")]
    pub defaults_file: Option<String>,

    /// Stop the replayed statements from being logged again
    #[arg(short = 'D', long = "disable-log-bin")]
    pub disable_log_bin: bool,

    /// Add 'SET NAMES character_set' to the output
    #[arg(long = "set-charset")]
    pub set_charset: Option<String>,

    /// Log progress to stderr (repeat for more detail)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Control colored diagnostics
    #[arg(long, value_enum, default_value = "auto")]
    pub color: ColorMode,

    /// Print a shell completion script and exit
    #[arg(long, value_enum, hide = true)]
    pub completions: Option<clap_complete::Shell>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Base64Mode {
    Never,
    Auto,
    Always,
}
