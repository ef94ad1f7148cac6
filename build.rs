use clap::CommandFactory;
use clap_complete::{Generator, Shell};
use clap_mangen::Man;
use std::path::PathBuf;

// CLI definition shared with the library crate
include!("src/cli/app.rs");

fn main() {
    let out_dir =
        PathBuf::from(std::env::var("OUT_DIR").unwrap_or_else(|_| "target/man".to_string()));
    let man_dir = out_dir.join("man");
    std::fs::create_dir_all(&man_dir).unwrap();

    let mut buf = Vec::new();
    Man::new(Cli::command()).render(&mut buf).unwrap();
    std::fs::write(man_dir.join("drizzlebinlog.1"), buf).unwrap();

    // Shell completion scripts
    let completions_dir = out_dir.join("completions");
    std::fs::create_dir_all(&completions_dir).unwrap();

    for shell in [Shell::Bash, Shell::Zsh, Shell::Fish, Shell::PowerShell] {
        let mut cmd = Cli::command();
        let mut buf = Vec::new();
        clap_complete::generate(shell, &mut cmd, "drizzlebinlog", &mut buf);
        std::fs::write(completions_dir.join(shell.file_name("drizzlebinlog")), buf).unwrap();
    }

    println!("cargo:rerun-if-changed=src/cli/app.rs");
}
