//! Tests for the socket-backed commands and docs output.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use clap_complete::Shell;

#[test]
fn cli_parse_id_commands() {
    match parse(&["dlq", "pause", "3"]) {
        CliCommand::Pause { id } => assert_eq!(id, "3"),
        _ => panic!("expected Pause"),
    }
    match parse(&["dlq", "resume", "3"]) {
        CliCommand::Resume { id } => assert_eq!(id, "3"),
        _ => panic!("expected Resume"),
    }
    match parse(&["dlq", "cancel", "4"]) {
        CliCommand::Cancel { id } => assert_eq!(id, "4"),
        _ => panic!("expected Cancel"),
    }
    match parse(&["dlq", "remove", "5"]) {
        CliCommand::Remove { id } => assert_eq!(id, "5"),
        _ => panic!("expected Remove"),
    }
}

#[test]
fn cli_parse_limit_and_status() {
    match parse(&["dlq", "limit", "6"]) {
        CliCommand::Limit { n } => assert_eq!(n, 6),
        _ => panic!("expected Limit"),
    }
    assert!(matches!(parse(&["dlq", "status"]), CliCommand::Status));
    assert!(Cli::try_parse_from(["dlq", "limit", "lots"]).is_err());
}

#[test]
fn cli_parse_docs() {
    match parse(&["dlq", "completions", "bash"]) {
        CliCommand::Completions { shell } => assert_eq!(shell, Shell::Bash),
        _ => panic!("expected Completions"),
    }
    assert!(matches!(parse(&["dlq", "man"]), CliCommand::Man));
}
