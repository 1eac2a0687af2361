//! lingua-sync - command line front end for the word book
//!
//! # Usage
//!
//! ```bash
//! # Save a word with its context
//! lingua-sync save serendipity --context "found it by serendipity"
//!
//! # Soft-delete a word
//! lingua-sync remove <id>
//!
//! # Merge with the Google Drive backup (signs in if needed)
//! lingua-sync sync
//!
//! # Keep the local settings when they conflict with the backup
//! lingua-sync sync --resolve local
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};

use lingua_sync::sync::{ConflictChoice, SyncMode};

#[derive(Parser, Debug)]
#[command(name = "lingua-sync")]
#[command(version)]
#[command(about = "Vocabulary notebook with Google Drive backup")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save a word
    Save {
        word: String,
        /// Sentence the word was found in
        #[arg(long)]
        context: Option<String>,
        /// Explanation markdown
        #[arg(long)]
        markdown: Option<String>,
    },

    /// Soft-delete a saved word by id
    Remove { id: String },

    /// Print the id of a saved word, if any
    Check { word: String },

    /// List saved words, newest first
    List,

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Synchronize with the Google Drive backup
    Sync {
        /// push (overwrite the backup) or pull (merge both ways)
        #[arg(long, default_value = "pull")]
        mode: SyncMode,
        /// Never prompt; keep local settings on conflict
        #[arg(long)]
        silent: bool,
        /// Resolve a settings conflict with this side
        #[arg(long, value_enum)]
        resolve: Option<ChoiceArg>,
    },

    /// Forget the Google credential (local data is kept)
    Logout,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    Set {
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        shortcuts: Option<bool>,
        #[arg(long)]
        explain_key: Option<String>,
        #[arg(long)]
        play_key: Option<String>,
        #[arg(long)]
        show_buttons: Option<bool>,
        #[arg(long)]
        auto_play: Option<bool>,
    },
    Reset,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ChoiceArg {
    Local,
    Remote,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let state = lingua_sync::run().await.context("Failed to start")?;
    let book = &state.book;

    match cli.command {
        Commands::Save { word, context, markdown } => {
            let mut payload = Map::new();
            payload.insert("word".to_string(), Value::String(word));
            if let Some(context) = context {
                payload.insert("context".to_string(), Value::String(context));
            }
            if let Some(markdown) = markdown {
                payload.insert("markdown".to_string(), Value::String(markdown));
            }
            let id = book.save(payload).await?;
            println!("{}", id);
        }
        Commands::Remove { id } => {
            book.remove(&id).await?;
            println!("Removed {}", id);
        }
        Commands::Check { word } => match book.check_active_by_content(&word)? {
            Some(id) => println!("{}", id),
            None => println!("not saved"),
        },
        Commands::List => {
            for entry in book.list_active()? {
                println!("{}\t{}", entry.id, entry.word().unwrap_or("-"));
            }
        }
        Commands::Settings { action } => match action {
            SettingsAction::Show => {
                println!("{}", serde_json::to_string_pretty(&book.settings()?)?);
            }
            SettingsAction::Set { prompt, shortcuts, explain_key, play_key, show_buttons, auto_play } => {
                let mut settings = book.settings()?;
                if let Some(prompt) = prompt {
                    settings.custom_prompt = Some(prompt).filter(|p| !p.is_empty());
                }
                if let Some(enabled) = shortcuts {
                    settings.shortcuts.enabled = enabled;
                }
                if let Some(key) = explain_key {
                    settings.shortcuts.explain = key;
                }
                if let Some(key) = play_key {
                    settings.shortcuts.play = key;
                }
                if let Some(show) = show_buttons {
                    settings.show_buttons = show;
                }
                if let Some(auto_play) = auto_play {
                    settings.auto_play_tts = auto_play;
                }
                book.save_settings(settings).await?;
                println!("Settings saved");
            }
            SettingsAction::Reset => {
                book.reset_settings().await?;
                println!("Settings reset to defaults");
            }
        },
        Commands::Sync { mode, silent, resolve } => {
            let report = book
                .sync(!silent, mode)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;

            match (report.conflict, resolve) {
                (Some(conflict), Some(choice)) => {
                    let choice = match choice {
                        ChoiceArg::Local => ConflictChoice::Local,
                        ChoiceArg::Remote => ConflictChoice::Remote,
                    };
                    let resolved = book
                        .resolve_settings_conflict(conflict, choice)
                        .await
                        .map_err(|e| anyhow!(e.user_message()))?;
                    println!("Conflict resolved, synced ({} words)", resolved.count);
                }
                (Some(conflict), None) => {
                    println!("Settings differ from the backup:");
                    println!("local:  {}", serde_json::to_string_pretty(&conflict.local)?);
                    println!("remote: {}", serde_json::to_string_pretty(&conflict.remote)?);
                    println!("Run again with --resolve local|remote");
                }
                (None, _) => println!("Synced ({} words, {})", report.count, report.mode.as_str()),
            }
        }
        Commands::Logout => {
            book.logout().await.map_err(|e| anyhow!(e.user_message()))?;
            println!("Signed out");
        }
    }

    book.flush_background().await;

    // Background backups never fail the command; surface them here instead
    let status = book.status().await;
    if let (Some(kind), Some(message)) = (status.last_error_kind, status.last_error) {
        eprintln!("warning: backup failed ({}): {}", kind, message);
    }
    Ok(())
}
