use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use feed_reader::utils::{pluralize, time};
use feed_reader::{
    AggregateOutput, Clock, FeedAggregator, FeedItem, FeedOptions, FetchConfig, LocalStorage, RunSummary, SystemClock,
    DEFAULT_LIST,
};
use std::sync::Arc;
use tracing::{debug, Level};

const APP_NAME: &str = "feedr";
const TITLE_WIDTH_MAX: usize = 30;

#[derive(Parser)]
#[command(name = APP_NAME, version, about = "A command line feed reader")]
struct Cli {
    #[command(flatten)]
    display: DisplayArgs,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args)]
struct DisplayArgs {
    /// List to display feeds from (all lists when omitted)
    #[arg(short = 'L', long)]
    list: Option<String>,

    /// Maximum number of items to display, 0 for all
    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// "last" for the previous run, a duration such as 1d or 2h30m, or a date such as "2024-01-01 12:03:04"
    #[arg(long)]
    since: Option<String>,

    /// Print run statistics after the items
    #[arg(long)]
    summary: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Follow one or more feeds
    Follow {
        #[arg(required = true)]
        urls: Vec<String>,
        /// The list to add the feeds to
        #[arg(short = 'L', long, default_value = DEFAULT_LIST)]
        list: String,
    },
    /// Unfollow one or more feeds
    Unfollow {
        #[arg(required = true)]
        urls: Vec<String>,
        /// The list to remove the feeds from
        #[arg(short = 'L', long, default_value = DEFAULT_LIST)]
        list: String,
    },
    /// Show all lists, or the feeds in one list
    List {
        name: Option<String>,
        /// Rename the list
        #[arg(long, requires = "name", conflicts_with_all = ["merge", "remove"])]
        rename: Option<String>,
        /// Merge another list into this one and delete the other list
        #[arg(long, requires = "name", conflicts_with = "remove")]
        merge: Option<String>,
        /// Delete the list
        #[arg(long, requires = "name")]
        remove: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage = Arc::new(LocalStorage::from_env(APP_NAME, clock.clone())?);
    storage
        .init(env!("CARGO_PKG_VERSION"))
        .context("failed to initialize storage")?;
    debug!("Using storage at {:?}", storage.config_dir());

    let aggregator = FeedAggregator::new(storage, clock.clone(), FetchConfig::default())?;

    match cli.command {
        None => run_feed(&aggregator, clock.as_ref(), cli.display).await,
        Some(Command::Follow { urls, list }) => {
            let added = aggregator.follow(&urls, &list)?;
            println!("added {} to list: {}", pluralize(added as i64, "feed"), list);
            Ok(())
        }
        Some(Command::Unfollow { urls, list }) => {
            for (url, removed) in aggregator.unfollow(&urls, &list)? {
                if removed {
                    println!("{} was removed from the list", url);
                } else {
                    println!("{} was not found in the list", url);
                }
            }
            Ok(())
        }
        Some(Command::List {
            name,
            rename,
            merge,
            remove,
        }) => run_list(&aggregator, name, rename, merge, remove),
    }
}

fn run_list(
    aggregator: &FeedAggregator,
    name: Option<String>,
    rename: Option<String>,
    merge: Option<String>,
    remove: bool,
) -> anyhow::Result<()> {
    let Some(name) = name else {
        let lists = aggregator.lists()?;
        if lists.is_empty() {
            println!("{}", DEFAULT_LIST);
        }
        for list in lists {
            println!("{}", list);
        }
        return Ok(());
    };

    if let Some(new_name) = rename {
        aggregator.rename_list(&name, &new_name)?;
        println!("list {} was renamed to {}", name, new_name);
    } else if let Some(other) = merge {
        aggregator.merge_lists(&name, &other)?;
        println!("list {} was merged into {}", other, name);
    } else if remove {
        aggregator.remove_list(&name)?;
        println!("list {} was removed", name);
    } else {
        let feeds = aggregator.list_feeds(&name)?;
        for entry in &feeds {
            println!(
                "{}  {}",
                entry.added_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                entry.address
            );
        }
        println!("Total: {}", pluralize(feeds.len() as i64, "feed"));
    }
    Ok(())
}

async fn run_feed(aggregator: &FeedAggregator, clock: &dyn Clock, args: DisplayArgs) -> anyhow::Result<()> {
    let config = aggregator.storage().load_config()?;
    let since = match args.since.as_deref() {
        Some(raw) => time::parse_since(raw, clock.now(), config.last_run)?,
        None => None,
    };
    let opts = FeedOptions {
        lists: args.list.into_iter().collect(),
        limit: args.limit,
        since,
    };

    let AggregateOutput { items, summary } = aggregator.feed(&opts).await?;
    if items.is_empty() {
        eprintln!("no items to display");
        return Ok(());
    }
    print_items(&items, clock.now());
    if args.summary || config.summary {
        print_summary(&summary, clock.now());
    }
    Ok(())
}

/// Oldest first so the newest item ends up closest to the prompt.
fn print_items(items: &[FeedItem], now: DateTime<Utc>) {
    let relatives: Vec<String> = items
        .iter()
        .map(|item| time::relative((now - item.published_at).num_seconds()))
        .collect();
    let width = items
        .iter()
        .map(|item| item.feed_title.chars().count())
        .chain(relatives.iter().map(|r| r.chars().count()))
        .max()
        .unwrap_or(0)
        .min(TITLE_WIDTH_MAX);

    for (item, relative) in items.iter().zip(&relatives).rev() {
        let new_mark = if item.is_new { "• " } else { "" };
        println!(
            "{:<width$}  {}{}",
            truncate(&item.feed_title, width),
            new_mark,
            item.item_title,
            width = width
        );
        println!("{:<width$}  {}\n", relative, item.link, width = width);
    }
}

fn print_summary(summary: &RunSummary, now: DateTime<Utc>) {
    let elapsed = (now - summary.started_at).num_milliseconds() as f64 / 1000.0;
    println!(
        "Displayed {} from {} ({} cached, {} fetched) with {} in {:.2}s",
        pluralize(summary.items_shown as i64, "item"),
        pluralize(summary.feeds_count as i64, "feed"),
        summary.feeds_cached,
        summary.feeds_fetched,
        pluralize(summary.items_count as i64, "item"),
        elapsed
    );
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}
