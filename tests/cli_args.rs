// tests/cli_args.rs

use clap::Parser;

use backy::cli::{CliArgs, Commands, RunTarget};
use backy::version_string;

#[test]
fn version_strings_match_the_three_flavours() {
    assert_eq!(version_string(false, false), "Backy version: 0.5.0\n");
    assert_eq!(version_string(true, false), "0.5.0\n");
    assert_eq!(version_string(false, true), "v0.5.0\n");
}

#[test]
fn version_flags_conflict() {
    assert!(CliArgs::try_parse_from(["backy", "version", "--num", "--vpre"]).is_err());
}

#[test]
fn run_list_accepts_comma_separated_hosts() {
    let args = CliArgs::try_parse_from([
        "backy", "-f", "/etc/backy.yml", "run", "list", "nightly", "--hosts", "h1,h2", "--hosts", "h3",
    ])
    .expect("valid args");

    assert_eq!(args.config.as_deref(), Some("/etc/backy.yml"));
    match args.command {
        Commands::Run {
            target: RunTarget::List { name, hosts },
        } => {
            assert_eq!(name, "nightly");
            assert_eq!(hosts, vec!["h1", "h2", "h3"]);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn run_cmds_requires_at_least_one_name() {
    assert!(CliArgs::try_parse_from(["backy", "run", "cmds"]).is_err());

    let args = CliArgs::try_parse_from(["backy", "run", "cmds", "a", "b", "--max-concurrency", "2"])
        .expect("valid args");
    assert_eq!(args.max_concurrency, Some(2));
    assert!(matches!(
        args.command,
        Commands::Run { target: RunTarget::Cmds { ref names, ref hosts } }
            if names == &["a", "b"] && hosts.is_empty()
    ));
}

#[test]
fn global_flags_work_after_the_subcommand() {
    let args = CliArgs::try_parse_from(["backy", "cron", "--log-level", "debug", "--metrics", "/tmp/m.yml"])
        .expect("valid args");
    assert!(matches!(args.command, Commands::Cron));
    assert!(args.log_level.is_some());
    assert_eq!(args.metrics.as_deref(), Some(std::path::Path::new("/tmp/m.yml")));
}

#[tokio::test]
async fn version_command_needs_no_configuration() {
    let args = CliArgs::try_parse_from(["backy", "-f", "/nonexistent/backy.yml", "version"]).expect("valid args");
    assert!(backy::run(args).await.is_ok());
}
