#![cfg(feature = "cli")]
//! Shell completion generation for `drizzlebinlog`.

use clap::CommandFactory;
use rpl::cli::app::Cli;

fn generate_completions(shell: clap_complete::Shell) -> String {
    let mut cmd = Cli::command();
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut cmd, "drizzlebinlog", &mut buf);
    String::from_utf8(buf).expect("completions should be valid UTF-8")
}

#[test]
fn bash_completions_contain_options() {
    let output = generate_completions(clap_complete::Shell::Bash);
    assert!(output.contains("drizzlebinlog"));
    assert!(output.contains("--start-position"));
    assert!(output.contains("--read-from-remote-server"));
    assert!(output.contains("--base64-output"));
}

#[test]
fn zsh_completions_list_base64_modes() {
    let output = generate_completions(clap_complete::Shell::Zsh);
    assert!(output.contains("drizzlebinlog"));
    assert!(output.contains("never"));
    assert!(output.contains("always"));
}

#[test]
fn fish_completions_are_valid() {
    let output = generate_completions(clap_complete::Shell::Fish);
    assert!(!output.is_empty());
    assert!(output.contains("drizzlebinlog"));
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}
