use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

use myfeed::config::Config;
use myfeed::content::{resolve_full_text, FullTextSource};
use myfeed::feed::{self, ExportFormat, ImportOptions, ProxyFeedFetcher, Subscription};
use myfeed::storage::{
    Article, ArticleQuery, Database, DatabaseError, FeedType, ReadFilter, SEARCH_LIMIT,
};
use myfeed::util::{estimate_reading_minutes, truncate_to_width};

/// Owner used when neither `--user` nor `MYFEED_USER` is set.
const DEFAULT_OWNER: &str = "local";

/// Column width of titles in listings.
const TITLE_WIDTH: usize = 72;

/// Get the config directory path (~/.config/myfeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("myfeed"))
}

#[derive(Parser, Debug)]
#[command(name = "myfeed", about = "Feed aggregator with proxy-raced fetching and full-text resolution")]
struct Args {
    /// Owner of the subscriptions (defaults to $MYFEED_USER, then "local")
    #[arg(long, global = true)]
    user: Option<String>,

    /// Config file (defaults to ~/.config/myfeed/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (defaults to ~/.config/myfeed/myfeed.db)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed
    Add {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value = "")]
        category: String,
        /// Folder id to file the feed under
        #[arg(long)]
        folder: Option<i64>,
        /// Treat the source as an email newsletter bridge
        #[arg(long)]
        newsletter: bool,
    },
    /// Refresh every feed, or one feed by id
    Refresh {
        #[arg(long)]
        feed: Option<i64>,
    },
    /// Subscribe to every feed in an OPML file
    Import {
        file: PathBuf,
        /// File every imported feed under this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Write subscriptions as OPML or CSV
    Export {
        #[arg(long, value_enum, default_value = "opml")]
        format: ExportFormat,
        /// Output file or directory; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List subscribed feeds with their health
    Feeds,
    /// List articles, newest first
    List {
        #[arg(long)]
        category: Option<String>,
        /// Include read articles
        #[arg(long, conflicts_with = "read")]
        all: bool,
        /// Only read articles
        #[arg(long)]
        read: bool,
        #[arg(long, default_value_t = ArticleQuery::PAGE_SIZE)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Find articles by title, description or author
    Search {
        query: String,
        #[arg(long, default_value_t = SEARCH_LIMIT)]
        limit: i64,
    },
    /// Reading statistics
    Stats,
    /// Show an article's full text and mark it read
    Read { id: i64 },
    /// List folders
    Folders,
    /// Create a folder
    FolderAdd { name: String },
    /// Delete a folder; its feeds become unfiled
    FolderRm { id: i64 },
    /// Unsubscribe from a feed and drop its articles
    Remove { id: i64 },
    /// Mark every article as read
    MarkAllRead,
    /// Toggle an article's bookmark
    Bookmark { id: i64 },
    /// Toggle an article's read-later flag
    Later { id: i64 },
    /// List articles saved for later
    ReadLater,
    /// Delete every stored article, keeping subscriptions
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(path = %config_dir.display(), error = %e, "Failed to set config directory permissions to 0700");
        }
    }

    let config_path = args.config.clone().unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let owner = args
        .user
        .clone()
        .or_else(|| std::env::var("MYFEED_USER").ok())
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_OWNER.to_string());

    let db_path = args.db.clone().unwrap_or_else(|| config_dir.join("myfeed.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = reqwest::Client::builder()
        .user_agent(concat!("myfeed/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .context("Failed to build HTTP client")?;

    let result = run(args.command, &db, client, &config, &owner).await;
    db.close().await;
    result
}

async fn run(
    command: Command,
    db: &Database,
    client: reqwest::Client,
    config: &Config,
    owner: &str,
) -> Result<()> {
    let fetcher = ProxyFeedFetcher::new(
        client.clone(),
        config.proxies.clone(),
        config.ingest.max_items,
    );

    match command {
        Command::Add {
            url,
            title,
            category,
            folder,
            newsletter,
        } => {
            let subscription = Subscription {
                url,
                title,
                category,
                feed_type: if newsletter {
                    FeedType::Newsletter
                } else {
                    FeedType::Rss
                },
                folder_id: folder,
            };
            let added = feed::add_feed(
                db,
                &fetcher,
                owner,
                &subscription,
                config.ingest.articles_per_feed,
            )
            .await?;
            println!(
                "Subscribed to {} [{}] with {} new articles",
                added.feed.title, added.feed.category, added.articles.inserted
            );
        }

        Command::Refresh { feed: Some(feed_id) } => {
            let report =
                feed::refresh_one(db, &fetcher, owner, feed_id, config.ingest.articles_per_feed)
                    .await?;
            for outcome in &report.feeds {
                match &outcome.result {
                    Ok(count) => println!("{}: {} items", outcome.title, count),
                    Err(e) => println!("{}: {}", outcome.title, e),
                }
            }
            println!(
                "{} new, {} updated",
                report.articles.inserted, report.articles.updated
            );
        }

        Command::Refresh { feed: None } => {
            let (tx, rx) = mpsc::channel(64);
            let printer = tokio::spawn(print_progress(rx, "Refreshing"));
            let report = feed::refresh_all(
                db,
                &fetcher,
                owner,
                config.ingest.articles_per_feed,
                config.ingest.refresh_concurrency,
                Some(&tx),
            )
            .await;
            drop(tx);
            let _ = printer.await;
            let report = report.context("Refresh failed")?;

            for outcome in report.feeds.iter().filter(|f| f.result.is_err()) {
                if let Err(e) = &outcome.result {
                    eprintln!("  {}: {}", outcome.title, e);
                }
            }
            println!(
                "Refreshed {} feeds ({} failed): {} new, {} updated",
                report.feeds.len(),
                report.failed(),
                report.articles.inserted,
                report.articles.updated
            );
        }

        Command::Import { file, category } => {
            let entries = feed::parse_file(&file)
                .await
                .with_context(|| format!("Failed to read OPML file {}", file.display()))?;
            let options = ImportOptions {
                category,
                ..ImportOptions::from_config(&config.ingest)
            };

            let (tx, rx) = mpsc::channel(64);
            let printer = tokio::spawn(print_progress(rx, "Importing"));
            let report = feed::import_feeds(db, &fetcher, owner, entries, &options, Some(&tx)).await;
            drop(tx);
            let _ = printer.await;
            let report = report?;

            println!(
                "Imported {} feeds ({} duplicates skipped, {} could not be fetched), {} articles",
                report.succeeded, report.duplicates, report.fetch_failures, report.articles.inserted
            );
        }

        Command::Export { format, output } => {
            let feeds = db.get_feeds(owner).await.context("Failed to load feeds")?;
            let rendered = feed::render(&feeds, format)?;
            match output {
                Some(path) => {
                    let path = feed::export_path(&path, format);
                    feed::write_atomic(&path, &rendered)?;
                    println!("Exported {} feeds to {}", feeds.len(), path.display());
                }
                None => print!("{rendered}"),
            }
        }

        Command::Feeds => {
            for f in db.get_feeds(owner).await.context("Failed to load feeds")? {
                let status = match (&f.last_error, f.last_fetched_at) {
                    (Some(e), _) => format!("error: {e}"),
                    (None, Some(_)) => format!("{} items", f.article_count),
                    (None, None) => "never fetched".to_string(),
                };
                println!(
                    "{:>5}  {:<width$}  [{}]  {}",
                    f.id,
                    truncate_to_width(&f.title, TITLE_WIDTH),
                    f.category,
                    status,
                    width = TITLE_WIDTH
                );
            }
        }

        Command::List {
            category,
            all,
            read,
            limit,
            offset,
        } => {
            let query = ArticleQuery {
                category,
                read_filter: match (all, read) {
                    (true, _) => ReadFilter::All,
                    (_, true) => ReadFilter::Read,
                    _ => ReadFilter::Unread,
                },
                limit,
                offset,
            };
            let page = db.get_articles(owner, &query).await?;
            for a in &page.articles {
                print_article_row(a);
            }
            println!(
                "-- {} of {}{}",
                page.articles.len(),
                page.total,
                if page.has_more { ", more with --offset" } else { "" }
            );
        }

        Command::Search { query, limit } => {
            let hits = db.search_articles(owner, &query, limit).await?;
            for a in &hits {
                print_article_row(a);
            }
            println!("-- {} matches", hits.len());
        }

        Command::Stats => {
            let stats = db.get_stats(owner).await?;
            println!(
                "{} articles, {} read ({}%), {} unread, {} bookmarked, {} saved for later",
                stats.total,
                stats.read,
                stats.read_percent(),
                stats.unread(),
                stats.bookmarked,
                stats.read_later
            );
            for (category, count) in &stats.by_category {
                println!("{count:>6}  {category}");
            }
        }

        Command::Read { id } => {
            let article = db
                .get_article(owner, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Article {id} not found"))?;

            println!("{}", article.title);
            if let Some(link) = &article.link {
                println!("{link}");
            }

            let stored = article.full_content.as_deref().or(Some(article.description.as_str()));
            match resolve_full_text(&client, config, article.link.as_deref(), stored).await {
                Some(text) => {
                    if let Some(minutes) = estimate_reading_minutes(&text.content) {
                        println!("{minutes} min read ({})", text.source);
                    }
                    println!();
                    println!("{}", text.content);
                    if text.source == FullTextSource::Proxy {
                        db.set_full_content(owner, id, &text.content).await?;
                    }
                }
                None => {
                    println!();
                    println!("{}", article.description);
                }
            }

            db.set_article_read(owner, id, true).await?;
        }

        Command::Folders => {
            for folder in db.get_folders(owner).await? {
                println!("{:>5}  {}", folder.id, folder.name);
            }
        }

        Command::FolderAdd { name } => {
            let folder = db.create_folder(owner, &name).await?;
            println!("Created folder {} ({})", folder.name, folder.id);
        }

        Command::FolderRm { id } => {
            if !db.delete_folder(owner, id).await? {
                anyhow::bail!("Folder {id} not found");
            }
            println!("Deleted folder {id}");
        }

        Command::Remove { id } => {
            if !db.delete_feed(owner, id).await? {
                anyhow::bail!("Feed {id} not found");
            }
            println!("Unsubscribed from feed {id}");
        }

        Command::MarkAllRead => {
            let count = db.mark_all_read(owner).await?;
            println!("Marked {count} articles as read");
        }

        Command::Bookmark { id } => match db.toggle_bookmark(owner, id).await? {
            Some(true) => println!("Bookmarked {id}"),
            Some(false) => println!("Removed bookmark from {id}"),
            None => anyhow::bail!("Article {id} not found"),
        },

        Command::Later { id } => match db.toggle_read_later(owner, id).await? {
            Some(true) => println!("Saved {id} for later"),
            Some(false) => println!("Removed {id} from read later"),
            None => anyhow::bail!("Article {id} not found"),
        },

        Command::ReadLater => {
            for a in db.get_read_later(owner).await? {
                println!("{:>6}  {}", a.id, truncate_to_width(&a.title, TITLE_WIDTH));
            }
        }

        Command::Clear => {
            let count = db.clear_articles(owner).await?;
            println!("Deleted {count} articles");
        }
    }

    Ok(())
}

fn print_article_row(a: &Article) {
    let marker = match (a.is_bookmarked, a.is_read) {
        (true, _) => '*',
        (false, false) => '•',
        (false, true) => ' ',
    };
    println!(
        "{:>6} {} {}  ({})",
        a.id,
        marker,
        truncate_to_width(&a.title, TITLE_WIDTH),
        a.feed_title.as_deref().unwrap_or("?")
    );
}

/// Prints `(completed, total)` updates on one line until the sender is dropped.
async fn print_progress(mut rx: mpsc::Receiver<(usize, usize)>, label: &'static str) {
    use std::io::Write;

    let mut last = None;
    while let Some((done, total)) = rx.recv().await {
        eprint!("\r{label} {done}/{total}");
        let _ = std::io::stderr().flush();
        last = Some(total);
    }
    if last.is_some() {
        eprintln!();
    }
}
