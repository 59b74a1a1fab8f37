use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use hostkeys_core::secrets::ScriptSecretsType;

/// Operator CLI over the host-key repository.
#[derive(Parser, Debug)]
#[command(
    name = "hostkeys",
    about = "Inspect and manage function host keys in the configured secret store",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the keys of a scope (values redacted unless --reveal).
    Read {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        reveal: bool,
    },
    /// Add or replace keys in a scope, then signal other instances.
    Write {
        #[command(flatten)]
        target: Target,
        /// Key as name=value; repeatable. Host scope: host function keys.
        #[arg(long = "key", value_parser = parse_pair)]
        keys: Vec<(String, String)>,
        /// Host scope only: system key as name=value; repeatable.
        #[arg(long = "system-key", value_parser = parse_pair)]
        system_keys: Vec<(String, String)>,
        /// Host scope only: new master key value.
        #[arg(long)]
        master: Option<String>,
    },
    /// Remove secrets of functions not listed (subject to purge policy).
    Purge {
        /// Names of the functions that still exist.
        live: Vec<String>,
    },
    /// Snapshot operations.
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
    /// Show the sentinel marker of a scope.
    Marker {
        #[command(flatten)]
        target: Target,
    },
    /// Check that store and sentinel are reachable.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotCommand {
    /// Snapshot the current keys of a scope.
    Write {
        #[command(flatten)]
        target: Target,
    },
    /// List snapshot ids of a scope, oldest first.
    List {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

/// `host` or `function <name>`.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Target {
    #[arg(value_enum)]
    pub kind: TargetKind,
    /// Function name (required for `function`).
    pub function: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Host,
    Function,
}

impl Target {
    pub fn secrets_type(&self) -> ScriptSecretsType {
        match self.kind {
            TargetKind::Host => ScriptSecretsType::Host,
            TargetKind::Function => ScriptSecretsType::Function,
        }
    }

    pub fn function_name(&self) -> Option<&str> {
        self.function.as_deref()
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got `{raw}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_read_host() {
        let cli = Cli::try_parse_from(["hostkeys", "read", "host", "--reveal"]).expect("parse");
        assert_eq!(
            cli.command,
            Command::Read {
                target: Target {
                    kind: TargetKind::Host,
                    function: None
                },
                reveal: true,
            }
        );
    }

    #[test]
    fn parses_write_function_keys() {
        let cli = Cli::try_parse_from([
            "hostkeys", "write", "function", "fn1", "--key", "default=A", "--key", "caller=b=c",
        ])
        .expect("parse");
        let Command::Write { target, keys, .. } = cli.command else {
            panic!("expected write");
        };
        assert_eq!(target.secrets_type(), ScriptSecretsType::Function);
        assert_eq!(target.function_name(), Some("fn1"));
        assert_eq!(
            keys,
            vec![
                ("default".to_string(), "A".to_string()),
                ("caller".to_string(), "b=c".to_string())
            ]
        );
    }

    #[test]
    fn rejects_pairs_without_name() {
        assert!(Cli::try_parse_from(["hostkeys", "write", "host", "--key", "=v"]).is_err());
        assert!(Cli::try_parse_from(["hostkeys", "write", "host", "--key", "novalue"]).is_err());
    }

    #[test]
    fn parses_snapshot_and_purge() {
        let cli = Cli::try_parse_from(["hostkeys", "snapshot", "list", "function", "fn1"])
            .expect("parse");
        assert!(matches!(cli.command, Command::Snapshot(SnapshotCommand::List { .. })));

        let cli = Cli::try_parse_from(["hostkeys", "purge", "fn1", "fn2"]).expect("parse");
        assert_eq!(
            cli.command,
            Command::Purge {
                live: vec!["fn1".into(), "fn2".into()]
            }
        );
    }

    #[test]
    fn parses_config_init_with_global_path() {
        let cli = Cli::try_parse_from(["hostkeys", "config", "init", "--config", "/tmp/hk.toml"])
            .expect("parse");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/hk.toml")));
    }
}
