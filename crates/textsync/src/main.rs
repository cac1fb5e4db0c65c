use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use textsync_config::AppConfig;
use textsync_core::TextMerger;
use textsync_mod_history::{
    decode_state, merge_history_states, verify_checksum, ChecksumAlgorithm, CoercingSanitizer,
    HistoryState, HistoryStore, Sha256Checksum,
};

/// Three-way text merge and synchronized undo/redo history for text fields.
#[derive(Parser, Debug)]
#[command(name = "textsync", version, about)]
struct Cli {
    /// Config file to use instead of `textsync.json` next to the executable.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Three-way merge of text files; prints the merged text and cursor as JSON.
    Merge {
        /// Last text both sides agreed on.
        base: PathBuf,
        /// Local buffer.
        local: PathBuf,
        /// Remote buffer.
        remote: PathBuf,
        /// Cursor offset in the local buffer, in chars.
        #[arg(long, default_value_t = 0)]
        cursor: usize,
    },
    /// Merges two history state files into one canonical state.
    MergeHistory { local: PathBuf, remote: PathBuf },
    /// Checks the checksum asserted by a history state file.
    Verify { state: PathBuf },
    /// Pushes a history state file into the store, merging on conflict.
    Sync {
        /// Field the history belongs to.
        #[arg(long)]
        field: String,
        state: PathBuf,
        /// Store version the state was based on. Defaults to the state's own version.
        #[arg(long)]
        expected_version: Option<i64>,
    },
    /// Prints the stored history of a field, or lists stored fields.
    Show {
        #[arg(long)]
        field: Option<String>,
    },
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_state(path: &Path) -> Result<HistoryState> {
    let payload = read_text(path)?;
    decode_state(&payload, &CoercingSanitizer)
        .with_context(|| format!("Invalid history state in {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(AppConfig::config_path);
    let config = AppConfig::load_or_create(&config_path);
    let algo: Arc<dyn ChecksumAlgorithm> = Arc::new(Sha256Checksum);

    match cli.command {
        Command::Merge {
            base,
            local,
            remote,
            cursor,
        } => {
            let merger = TextMerger::new(config.to_merge_options());
            let result = merger.merge(
                &read_text(&base)?,
                &read_text(&local)?,
                &read_text(&remote)?,
                cursor,
            );
            print_json(&result)
        }
        Command::MergeHistory { local, remote } => {
            let local = read_state(&local)?;
            let remote = read_state(&remote)?;
            for (name, state) in [("local", &local), ("remote", &remote)] {
                if let Err(e) = verify_checksum(state, algo.as_ref()) {
                    tracing::warn!("{name} state: {e}");
                }
            }
            let merged = merge_history_states(&local, &remote, &config.to_history_config(), algo.as_ref());
            print_json(&merged)
        }
        Command::Verify { state } => {
            let parsed = read_state(&state)?;
            verify_checksum(&parsed, algo.as_ref())
                .with_context(|| format!("Verification failed for {}", state.display()))?;
            println!("ok {}", algo.state_checksum(&parsed));
            Ok(())
        }
        Command::Sync {
            field,
            state,
            expected_version,
        } => {
            let parsed = read_state(&state)?;
            let expected = expected_version.unwrap_or(parsed.version);
            let store = HistoryStore::open(config.to_history_config(), algo)?;
            let persisted = store.sync_or_merge(&field, &parsed, expected)?;
            tracing::info!(field = %field, version = persisted.version, "History synced");
            print_json(&persisted)
        }
        Command::Show { field } => {
            let store = HistoryStore::open(config.to_history_config(), algo)?;
            match field {
                Some(field) => {
                    let state = store
                        .load(&field)?
                        .with_context(|| format!("No history stored for field '{field}'"))?;
                    print_json(&state)
                }
                None => {
                    for field in store.list_fields()? {
                        println!("{field}");
                    }
                    Ok(())
                }
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Starting textsync");
    run(cli)
}
