//! Command-line runners behind the `regsync` binary.

use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum, error::ErrorKind};
use tracing::info;

use crate::config::SyncConfig;
use crate::constants::env;
use crate::constants::store::DEFAULT_STORE_FILENAME;
use crate::ingestion::{BlockReport, SyncPipeline};
use crate::messages::{BlockMessage, DerivedFactTrigger, OutboundMessage};
use crate::store::SqliteLookupStore;
use crate::transport::fs::list_extracts;
use crate::transport::{JsonLinesOutbox, MessageOutbox, MessageSink, read_outbox};
use crate::upsert::ConflictPolicy;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictArg {
    Swallow,
    Reject,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(value: ConflictArg) -> Self {
        match value {
            ConflictArg::Swallow => ConflictPolicy::Swallow,
            ConflictArg::Reject => ConflictPolicy::Reject,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "regsync",
    disable_help_subcommand = true,
    about = "Synchronize register extracts into a lookup store",
    after_help = "Settings are resolved in order by explicit arg, REGSYNC_* environment variables, then defaults."
)]
struct RegsyncCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Cut an extract into block messages (one JSON object per line).
    Split(SplitArgs),
    /// Ingest whole extracts or planned blocks, then recompute derived facts.
    Ingest(IngestArgs),
    /// Recompute derived facts for named firms or queued triggers.
    Recompute(RecomputeArgs),
}

/// Store and outbox settings shared by the writing subcommands.
#[derive(Debug, Args)]
struct StoreArgs {
    #[arg(
        long = "store-path",
        value_name = "STORE_PATH",
        help = "Lookup store file (overrides REGSYNC_STORE_PATH)"
    )]
    store_path: Option<PathBuf>,
    #[arg(
        long = "store-dir",
        value_name = "DIR",
        conflicts_with = "store_path",
        help = "Directory for the lookup store (uses lookup.sqlite3 filename)"
    )]
    store_dir: Option<PathBuf>,
    #[arg(
        long = "outbox-path",
        value_name = "PATH",
        help = "Append change events and triggers to this JSON-lines file"
    )]
    outbox_path: Option<PathBuf>,
    #[arg(
        long = "transaction-limit",
        value_parser = parse_positive_usize,
        help = "Maximum guarded writes per store transaction"
    )]
    transaction_limit: Option<usize>,
    #[arg(long = "conflict-policy", value_enum, help = "Handling of lost write races")]
    conflict_policy: Option<ConflictArg>,
}

#[derive(Debug, Args)]
struct SplitArgs {
    #[arg(long, value_name = "LOCATION", help = "Extract file to split")]
    file: String,
    #[arg(
        long = "block-size",
        value_parser = parse_positive_usize,
        help = "Line groups per block"
    )]
    block_size: Option<usize>,
    #[arg(long, value_name = "PATH", help = "Write messages here instead of stdout")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct IngestArgs {
    #[arg(
        long,
        value_name = "PATH",
        required_unless_present = "blocks",
        help = "Extract file, or directory of .txt extracts, to ingest whole"
    )]
    file: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        conflicts_with = "file",
        help = "JSON-lines file of block messages produced by `split`"
    )]
    blocks: Option<PathBuf>,
    #[arg(long = "skip-derived", help = "Do not recompute derived facts afterwards")]
    skip_derived: bool,
    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Debug, Args)]
struct RecomputeArgs {
    #[arg(long = "firm", value_name = "FIRM_REFERENCE", help = "Firm to recompute; repeat as needed")]
    firms: Vec<String>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Outbox file whose trigger messages should be processed"
    )]
    triggers: Option<PathBuf>,
    #[command(flatten)]
    store: StoreArgs,
}

/// Run the CLI with `args_iter` (program name excluded).
pub fn run_regsync<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) =
        parse_cli::<RegsyncCli, _>(std::iter::once("regsync".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    match cli.command {
        Command::Split(args) => run_split(args),
        Command::Ingest(args) => run_ingest(args),
        Command::Recompute(args) => run_recompute(args),
    }
}

fn run_split(args: SplitArgs) -> Result<(), Box<dyn Error>> {
    let mut config = base_config()?;
    if let Some(block_size) = args.block_size {
        config.block_size = block_size;
    }
    let pipeline = SyncPipeline::new(
        Arc::new(crate::store::InMemoryLookupStore::new()),
        Arc::new(MessageOutbox::new()),
        &config,
    )?;
    let messages = pipeline.plan_blocks(&args.file)?;
    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout().lock()),
    };
    for message in &messages {
        writeln!(out, "{}", serde_json::to_string(message)?)?;
    }
    out.flush()?;
    Ok(())
}

fn run_ingest(args: IngestArgs) -> Result<(), Box<dyn Error>> {
    let config = resolve_config(&args.store)?;
    let pipeline = open_pipeline(&config)?;

    let mut total = BlockReport::default();
    if let Some(blocks) = &args.blocks {
        for message in read_block_messages(blocks)? {
            accumulate(&mut total, pipeline.process_block(&message)?);
        }
    } else if let Some(path) = &args.file {
        for extract in list_extracts(path)? {
            accumulate(&mut total, pipeline.ingest_file(&extract.to_string_lossy())?);
        }
    }
    print_report("ingest", &total);

    if !args.skip_derived {
        let derived = pipeline.process_triggers(&total.triggers)?;
        print_report("derived", &derived);
    }
    Ok(())
}

fn run_recompute(args: RecomputeArgs) -> Result<(), Box<dyn Error>> {
    let config = resolve_config(&args.store)?;
    let pipeline = open_pipeline(&config)?;

    let mut triggers: Vec<DerivedFactTrigger> =
        args.firms.into_iter().map(DerivedFactTrigger::new).collect();
    if let Some(path) = &args.triggers {
        triggers.extend(read_outbox(path)?.into_iter().filter_map(|message| match message {
            OutboundMessage::Trigger(trigger) => Some(trigger),
            OutboundMessage::Change(_) => None,
        }));
    }
    if triggers.is_empty() {
        return Err("recompute needs --firm or --triggers".into());
    }
    let report = pipeline.process_triggers(&triggers)?;
    print_report("derived", &report);
    Ok(())
}

fn open_pipeline(config: &SyncConfig) -> Result<SyncPipeline, Box<dyn Error>> {
    let store = Arc::new(SqliteLookupStore::open(config.store_path.clone())?);
    let sink: Arc<dyn MessageSink> = match &config.outbox_path {
        Some(path) => Arc::new(JsonLinesOutbox::open(path.clone())?),
        None => Arc::new(MessageOutbox::new()),
    };
    info!(store = %store.path().display(), outbox = ?config.outbox_path, "pipeline ready");
    Ok(SyncPipeline::new(store, sink, config)?)
}

/// Environment settings with the store path falling back to its default.
fn base_config() -> Result<SyncConfig, Box<dyn Error>> {
    let default_store = SyncConfig::default().store_path;
    Ok(SyncConfig::from_lookup(|name| {
        std::env::var(name).ok().or_else(|| {
            (name == env::STORE_PATH).then(|| default_store.to_string_lossy().to_string())
        })
    })?)
}

fn resolve_config(args: &StoreArgs) -> Result<SyncConfig, Box<dyn Error>> {
    let mut config = base_config()?;
    if let Some(path) = &args.store_path {
        config.store_path = path.clone();
    } else if let Some(dir) = &args.store_dir {
        config.store_path = dir.join(DEFAULT_STORE_FILENAME);
    }
    if let Some(path) = &args.outbox_path {
        config.outbox_path = Some(path.clone());
    }
    if let Some(limit) = args.transaction_limit {
        config.transaction_limit = limit;
    }
    if let Some(policy) = args.conflict_policy {
        config.conflict_policy = policy.into();
    }
    config.validate()?;
    Ok(config)
}

fn read_block_messages(path: &Path) -> Result<Vec<BlockMessage>, Box<dyn Error>> {
    let reader = BufReader::new(File::open(path)?);
    let mut messages = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        messages.push(BlockMessage::from_json(&line)?);
    }
    Ok(messages)
}

fn accumulate(total: &mut BlockReport, report: BlockReport) {
    total.groups += report.groups;
    total.items += report.items;
    total.upsert.merge(report.upsert);
    total.events.extend(report.events);
    total.triggers.extend(report.triggers);
}

fn print_report(label: &str, report: &BlockReport) {
    println!(
        "{label}: groups={} items={} inserted={} updated={} unchanged={} conflicted={} events={} triggers={}",
        report.groups,
        report.items,
        report.upsert.inserted,
        report.upsert.updated,
        report.upsert.unchanged,
        report.upsert.conflicted,
        report.events.len(),
        report.triggers.len(),
    );
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("Could not parse '{raw}' as a positive integer"))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
