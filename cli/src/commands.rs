//! Command definitions and handlers
//!
//! Handlers write their result to the supplied writer (stdout in the
//! binary) and never print diagnostics there.

use std::io::{Read, Write};
use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use lore_memory::{EventId, FeedbackOutcome, ReadRequest, ReadTrigger, WriteRequest};

use crate::error::{CliError, CliResult};
use crate::memory::MemoryManager;

#[derive(Parser, Debug)]
#[command(name = "lore")]
#[command(about = "Cross-session memory for coding sessions")]
#[command(version)]
pub struct Cli {
    /// Data root (default: $LORE_DATA_DIR, then ~/.lore)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Project checkout root (default: current directory)
    #[arg(long, global = true)]
    pub project_root: Option<PathBuf>,

    /// Remote URL used for the project key (default: from .git/config)
    #[arg(long, global = true)]
    pub remote: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record a lesson from a JSON write request
    Record {
        /// Read the request from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Print the memories relevant to the current context
    Recall {
        #[arg(long, value_enum)]
        trigger: TriggerArg,

        #[arg(long, default_value = "default")]
        session: String,

        /// File touched in this session (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,

        /// Concept keyword in play (repeatable)
        #[arg(long = "concept")]
        concepts: Vec<String>,

        /// Free text to mine for more context
        #[arg(long)]
        text: Option<String>,
    },

    /// Report event ids that were useful
    Cite {
        ids: Vec<String>,

        /// Extract ids from a transcript file ("-" for stdin)
        #[arg(long)]
        from_text: Option<PathBuf>,
    },

    /// Set a core assertion for a topic
    Assert {
        #[arg(long)]
        topic: String,

        text: String,
    },

    /// Run retention, cleanup and threshold tuning
    Maintain,

    /// Print summary counts as JSON
    Stats,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerArg {
    SessionStart,
    MidSession,
    PreCompaction,
}

impl From<TriggerArg> for ReadTrigger {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::SessionStart => ReadTrigger::SessionStart,
            TriggerArg::MidSession => ReadTrigger::MidSession,
            TriggerArg::PreCompaction => ReadTrigger::PreCompaction,
        }
    }
}

/// Execute a parsed command
pub fn run(cli: Cli, input: &mut dyn Read, out: &mut dyn Write) -> CliResult<()> {
    let manager = MemoryManager::new(cli.data_dir, cli.project_root, cli.remote.as_deref())?;
    let engine = manager.open()?;
    let now = Utc::now();

    match cli.command {
        Command::Record { input: path } => {
            let raw = match path {
                Some(path) => std::fs::read_to_string(path)?,
                None => read_all(input)?,
            };
            let request: WriteRequest = serde_json::from_str(&raw)?;
            let outcome = engine.record(request, now)?;
            writeln!(out, "{}", serde_json::to_string(&outcome)?)?;
        }

        Command::Recall {
            trigger,
            session,
            files,
            concepts,
            text,
        } => {
            let mut request = ReadRequest::new(trigger.into(), session);
            request.context.files = files;
            request.context.concepts = concepts;
            request.context.text = text;

            let block = engine.recall(&request, now);
            if !block.is_empty() {
                writeln!(out, "{block}")?;
            }
        }

        Command::Cite { ids, from_text } => {
            let outcome = match from_text {
                Some(path) => {
                    let text = if path.as_os_str() == "-" {
                        read_all(input)?
                    } else {
                        std::fs::read_to_string(path)?
                    };
                    engine.cite_from_text(&text, now)
                }
                None => {
                    if ids.is_empty() {
                        return Err(CliError::InvalidArgument(
                            "cite needs ids or --from-text".to_string(),
                        ));
                    }
                    let ids = ids
                        .iter()
                        .map(|id| id.parse::<EventId>())
                        .collect::<Result<Vec<_>, _>>()?;
                    engine.cite(&ids, now)
                }
            };
            writeln!(out, "{}", feedback_json(&outcome))?;
        }

        Command::Assert { topic, text } => {
            engine.assert_fact(&topic, &text, now)?;
        }

        Command::Maintain => {
            let report = engine.maintain(now);
            writeln!(out, "{}", serde_json::to_string(&report)?)?;
        }

        Command::Stats => {
            writeln!(out, "{}", serde_json::to_string_pretty(&engine.stats())?)?;
        }
    }

    Ok(())
}

fn read_all(input: &mut dyn Read) -> CliResult<String> {
    let mut buf = String::new();
    input.read_to_string(&mut buf)?;
    Ok(buf)
}

fn feedback_json(outcome: &FeedbackOutcome) -> serde_json::Value {
    match outcome {
        FeedbackOutcome::Applied { updated } => {
            serde_json::json!({ "status": "applied", "updated": updated })
        }
        FeedbackOutcome::Skipped { reason } => {
            serde_json::json!({ "status": "skipped", "reason": reason })
        }
    }
}
