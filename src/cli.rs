use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands::diff::DiffOptions;
use crate::commands::status::StatusOptions;
use crate::commands::sync::SyncOptions;
use crate::commands::{self, CommandReport, SourceOverrides};

#[derive(Debug, Parser)]
#[command(
    name = "favsync",
    version,
    about = "Incrementally archive a Bilibili favorites collection as Markdown"
)]
struct Cli {
    #[arg(long, global = true, help = "Print the report as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Archive items added since the last recorded run")]
    Sync(SyncArgs),
    #[command(about = "List items the next sync would archive, without writing")]
    Diff(DiffArgs),
    #[command(about = "Show resolved paths, configuration and snapshot history")]
    Status(StatusArgs),
}

#[derive(Debug, Args)]
struct SourceArgs {
    #[arg(value_name = "COLLECTION_ID", help = "Favorites folder (media) id")]
    collection_id: Option<String>,
    #[arg(long, value_name = "PATH", help = "Read items from a JSON dump instead of the web API")]
    dump: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    records_dir: Option<PathBuf>,
    #[arg(long, conflicts_with = "no_rewrite", help = "Rewrite transcripts through the chat service")]
    rewrite: bool,
    #[arg(long, help = "Keep raw transcripts even if rewriting is configured")]
    no_rewrite: bool,
    #[arg(
        long,
        value_name = "POLICY",
        help = "`full-manifest` (default) or `written-only`"
    )]
    record_policy: Option<String>,
}

#[derive(Debug, Args)]
struct DiffArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, value_name = "DIR")]
    records_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(value_name = "COLLECTION_ID")]
    collection_id: Option<String>,
    #[arg(long, value_name = "DIR")]
    records_dir: Option<PathBuf>,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("command={}", report.command);
    println!("ok={}", report.ok);
    for detail in &report.details {
        println!("{detail}");
    }
    for issue in &report.issues {
        println!("issue={issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match cli.command {
        Command::Sync(args) => commands::sync::run(&SyncOptions {
            overrides: SourceOverrides {
                collection_id: args.source.collection_id,
                dump: args.source.dump,
                output_dir: args.output_dir,
                records_dir: args.records_dir,
            },
            rewrite: match (args.rewrite, args.no_rewrite) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            record_policy: args.record_policy,
        })?,
        Command::Diff(args) => commands::diff::run(&DiffOptions {
            overrides: SourceOverrides {
                collection_id: args.source.collection_id,
                dump: args.source.dump,
                records_dir: args.records_dir,
                ..SourceOverrides::default()
            },
        })?,
        Command::Status(args) => commands::status::run(&StatusOptions {
            overrides: SourceOverrides {
                collection_id: args.collection_id,
                records_dir: args.records_dir,
                ..SourceOverrides::default()
            },
        })?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
