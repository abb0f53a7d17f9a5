//! Ratechain CLI
//!
//! Exchange rate lookups and conversions over local feed files.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::FeedArg;

/// Ratechain CLI
#[derive(Parser, Debug)]
#[command(name = "ratechain")]
#[command(about = "Exchange rate lookups and conversions over local feed files")]
struct Args {
    /// Feed file for a provider, as NAME=PATH. History providers take
    /// NAME=FROM_TEMPLATE,TO_TEMPLATE with a `{period}` placeholder.
    #[arg(short, long = "feed", value_name = "NAME=PATH", value_parser = commands::parse_feed)]
    feeds: Vec<FeedArg>,

    /// Default provider chain, comma-separated
    #[arg(long)]
    chain: Option<String>,

    /// Longest wait for a provider's first load, in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Field delimiter of the feed files
    #[arg(long, default_value = ",")]
    delimiter: char,

    /// Keep a copy of every loaded feed in this directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up an exchange rate
    Rate {
        base: String,
        term: String,

        /// As-of date, YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,

        /// Provider to ask; repeat for a chain
        #[arg(long = "provider")]
        providers: Vec<String>,
    },

    /// Convert an amount into another currency
    Convert {
        amount: String,
        from: String,
        to: String,

        /// As-of date, YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,

        /// Provider to ask; repeat for a chain
        #[arg(long = "provider")]
        providers: Vec<String>,

        /// Round the result to the currency's decimal places
        #[arg(long)]
        round: bool,
    },

    /// List providers, the default chain and feed load states
    Providers,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(
            args.log_json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!args.log_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    info!(feeds = args.feeds.len(), "Starting ratechain");
    if let Err(e) = run(args).await {
        eprintln!("{}", commands::describe_error(&e));
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = commands::build_config(&args.feeds, args.chain.as_deref(), args.timeout_ms)?;

    let engine = commands::build_engine(config, args.delimiter, args.cache_dir.as_deref())?;

    match args.command {
        Command::Rate { base, term, date, providers } => {
            commands::rate(&engine, &base, &term, date.as_deref(), providers, args.json).await
        }
        Command::Convert {
            amount,
            from,
            to,
            date,
            providers,
            round,
        } => {
            let request = commands::ConvertRequest {
                amount,
                from,
                to,
                date,
                providers,
                round,
            };
            commands::convert(&engine, request, args.json).await
        }
        Command::Providers => commands::providers(&engine, args.json).await,
    }
}
