//! Purpose: `shardkeep` CLI entry point for inspecting component workspaces.
//! Role: Binary crate root; parses args, loads a component tree, emits JSON on stdout.
//! Invariants: Commands never write snapshots or payloads; loaded trees are dropped unsaved.
//! Invariants: The workspace root directory itself is created if missing, and nothing else.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod tree_json;

use shardkeep::api::{Error, ErrorKind, LoadOptions, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

#[derive(Parser)]
#[command(
    name = "shardkeep",
    version,
    about = "Inspect persisted component trees and their shard workspaces",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"A config file describes a component tree. Each shard keeps its own copy
of every component's snapshot (.bin) and index payload under the workspace.
"#,
    after_help = r#"EXAMPLES
  $ shardkeep paths compound.json --workspace /srv/ws --shard-id 2 --separated
  $ shardkeep inspect compound.json --shard-id 2 --separated
  $ shardkeep dump compound.json test_numpy --shard-id 2 --separated --limit 5

NOTES
  - Workspace falls back to metas.workspace, then $SHARDKEEP_WORKSPACE
  - Set RUST_LOG=debug to see save/restore decisions on stderr"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug)]
struct TreeArgs {
    #[arg(help = "Component config (JSON)", value_hint = ValueHint::FilePath)]
    config: PathBuf,
    #[arg(long, help = "Override the workspace root", value_hint = ValueHint::DirPath)]
    workspace: Option<PathBuf>,
    #[arg(long, help = "Shard id to resolve paths for")]
    shard_id: Option<u32>,
    #[arg(long, help = "Use the per-shard workspace (requires a shard id)")]
    separated: bool,
}

impl TreeArgs {
    fn load_options(&self) -> LoadOptions {
        let mut options = LoadOptions::new();
        if let Some(workspace) = &self.workspace {
            options = options.with_workspace(workspace);
        }
        if let Some(shard_id) = self.shard_id {
            options = options.with_shard_id(shard_id);
        }
        if self.separated {
            options = options.separated(true);
        }
        options
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Print resolved snapshot and payload paths",
        after_help = r#"EXAMPLES
  $ shardkeep paths compound.json --shard-id 0 --separated"#
    )]
    Paths {
        #[command(flatten)]
        tree: TreeArgs,
    },
    #[command(
        about = "Load a tree and report sizes, dirty flags, and attributes",
        after_help = r#"EXAMPLES
  $ shardkeep inspect compound.json --shard-id 1 --separated"#
    )]
    Inspect {
        #[command(flatten)]
        tree: TreeArgs,
    },
    #[command(
        about = "Print the entries of one indexer",
        after_help = r#"EXAMPLES
  $ shardkeep dump compound.json test_meta --shard-id 2 --separated
  $ shardkeep dump nested.json outer/inner --limit 10

NOTES
  - Nested components are addressed by `/`-separated names below the root"#
    )]
    Dump {
        #[command(flatten)]
        tree: TreeArgs,
        #[arg(help = "Component path below the root (empty for the root itself)")]
        component: String,
        #[arg(long, help = "Emit at most this many entries")]
        limit: Option<usize>,
    },
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Config)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `shardkeep --help`."));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command).map_err(add_corrupt_hint)
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::CorruptState || err.hint().is_some() {
        return err;
    }
    err.with_hint("Restore the file from a backup, or delete it to start that component empty.")
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Config => "invalid configuration",
        ErrorKind::InvalidWorkspace => "invalid workspace",
        ErrorKind::Persistence => "persistence failure",
        ErrorKind::CorruptState => "corrupt state",
        ErrorKind::TypeMismatch => "type mismatch",
        ErrorKind::NotFound => "not found",
        ErrorKind::IndexUnavailable => "index unavailable",
    }
    .to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(component) = err.component() {
        inner.insert("component".to_string(), json!(component));
    }
    if let Some(shard_id) = err.shard_id() {
        inner.insert("shard_id".to_string(), json!(shard_id));
    }
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(component) = err.component() {
        match err.shard_id() {
            Some(shard_id) => lines.push(format!("component: {component} (shard {shard_id})")),
            None => lines.push(format!("component: {component}")),
        }
    }
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
