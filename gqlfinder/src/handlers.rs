use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use colored::Colorize;
use gqlfinder_core::export::{export_file_name, write_export};
use gqlfinder_core::fetch::PageFetcher;
use gqlfinder_core::session::{SessionConfig, visit};
use gqlfinder_core::view::{Popup, ViewFormat, render_json, render_text};
use gqlfinder_core::{Aggregator, BadgeBoard, RuntimeClient, SqliteStorage};
use gqlfinder_scanner::{EndpointRecord, TabId};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

pub const DB_FILE_NAME: &str = "gqlfinder.db";

pub type CliAggregator = Aggregator<SqliteStorage, BadgeBoard>;

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(
    url: Option<&Url>,
    hosts_file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| parse_url_line(line.trim()))
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if Url::parse(line).is_ok() {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if Url::parse(&with_scheme).is_ok() {
        return Some(with_scheme);
    }

    eprintln!("⚠️  Skipping invalid URL '{}'", line);
    None
}

/// `--db` wins; otherwise the database lives in the (tilde-expanded) config dir.
pub fn resolve_db_path(config_dir: &str, db: Option<&PathBuf>) -> PathBuf {
    match db {
        Some(db) => PathBuf::from(shellexpand::tilde(&db.to_string_lossy()).as_ref()),
        None => Path::new(shellexpand::tilde(config_dir).as_ref()).join(DB_FILE_NAME),
    }
}

pub fn db_path_from_args(args: &ArgMatches) -> PathBuf {
    let config_dir = args
        .get_one::<String>("config-dir")
        .map(String::as_str)
        .unwrap_or(crate::commands::DEFAULT_CONFIG_DIR);
    resolve_db_path(config_dir, args.get_one::<PathBuf>("db"))
}

/// Read a JSON object of page globals, e.g. `{"__APOLLO_CLIENT__": {...}}`.
pub fn load_globals(path: Option<&PathBuf>) -> Result<Map<String, Value>> {
    let Some(path) = path else {
        return Ok(Map::new());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read globals file {}", path.display()))?;
    match serde_json::from_str::<Value>(&content)
        .with_context(|| format!("Globals file {} is not valid JSON", path.display()))?
    {
        Value::Object(globals) => Ok(globals),
        _ => bail!("Globals file {} must hold a JSON object", path.display()),
    }
}

/// Open the database (creating its directory on first use) and rebuild the
/// aggregator's in-memory state from it.
pub fn open_aggregator(db_path: &Path) -> Result<Arc<CliAggregator>> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    debug!("Opening database {}", db_path.display());
    let storage = SqliteStorage::new(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    Ok(Arc::new(Aggregator::new(storage, BadgeBoard::new())))
}

/// Spawn the aggregator's message loop. It stops once every client is dropped.
pub fn start_runtime(aggregator: Arc<CliAggregator>) -> (RuntimeClient, JoinHandle<()>) {
    let (client, inbox) = RuntimeClient::channel();
    let handle = tokio::spawn(aggregator.serve(inbox));
    (client, handle)
}

async fn stop_runtime(client: RuntimeClient, handle: JoinHandle<()>) -> Result<()> {
    drop(client);
    handle.await.context("Runtime task failed")?;
    Ok(())
}

fn tab_from_args(args: &ArgMatches) -> TabId {
    args.get_one::<TabId>("tab").copied().unwrap_or(1)
}

fn format_from_args(args: &ArgMatches) -> ViewFormat {
    args.get_one::<String>("format")
        .and_then(|f| ViewFormat::from_str(f))
        .unwrap_or(ViewFormat::Text)
}

fn print_endpoints(
    tab_id: TabId,
    records: &[EndpointRecord],
    format: ViewFormat,
    now: DateTime<Utc>,
) -> Result<()> {
    match format {
        ViewFormat::Text => print!("{}", render_text(tab_id, records, now.timestamp_millis())),
        ViewFormat::Json => println!("{}", render_json(records)?),
    }
    Ok(())
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> io::Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

pub fn handle_init(args: &ArgMatches, db_path: &Path) -> Result<()> {
    print_divider();
    println!("{}", "  GQLFINDER INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let force = args.get_flag("force");
    println!(
        "{} Target: {}",
        "→".blue(),
        db_path.display().to_string().bright_white()
    );
    println!();

    if SqliteStorage::exists(db_path) {
        let overwrite = if force {
            true
        } else {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Database already exists at:");
            println!(
                "  {} {}",
                "•".yellow(),
                db_path.display().to_string().bright_white()
            );
            println!();
            let response = print_prompt("Would you like to overwrite it? [y/N]:")?;
            println!();
            response == "y" || response == "yes"
        };

        if !overwrite {
            println!("{} Keeping existing database", "→".blue());
            return Ok(());
        }
        SqliteStorage::drop(db_path)
            .with_context(|| format!("Failed to remove {}", db_path.display()))?;
        println!("{} Existing database removed", "✓".green().bold());
    }

    println!("{} Creating database...", "→".blue());
    open_aggregator(db_path)?;

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

pub async fn handle_scan(args: &ArgMatches, db_path: &Path) -> Result<()> {
    let url = args.get_one::<Url>("url");
    let hosts_file = args.get_one::<PathBuf>("hosts-file");
    let first_tab = tab_from_args(args);
    let timeout = args.get_one::<u64>("timeout").copied().unwrap_or(10);
    let format = format_from_args(args);

    let urls = load_urls_from_source(url, hosts_file).map_err(anyhow::Error::msg)?;
    let globals = load_globals(args.get_one::<PathBuf>("globals"))?;

    let aggregator = open_aggregator(db_path)?;
    let (client, runtime) = start_runtime(aggregator.clone());
    let fetcher = PageFetcher::with_timeout(timeout)?;
    let config = SessionConfig::immediate();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut scanned = Vec::new();
    for (offset, url) in urls.iter().enumerate() {
        let tab_id = first_tab + offset as TabId;
        spinner.set_message(format!("Tab {}: {}", tab_id, url));

        match fetcher.fetch(url).await {
            Ok(page) => {
                visit(&*aggregator, &client, tab_id, &page, globals.clone(), &config).await;
                scanned.push(tab_id);
            }
            Err(e) => spinner.println(format!("{} {}: {}", "✗".red().bold(), url, e)),
        }
    }
    spinner.finish_and_clear();

    let now = Utc::now();
    for tab_id in scanned {
        let mut popup = Popup::new(tab_id, client.clone());
        popup.load().await;
        print_endpoints(tab_id, popup.endpoints(), format, now)?;
    }

    stop_runtime(client, runtime).await
}

pub async fn handle_list(args: &ArgMatches, db_path: &Path) -> Result<()> {
    let tab_id = tab_from_args(args);
    let (client, runtime) = start_runtime(open_aggregator(db_path)?);

    let mut popup = Popup::new(tab_id, client.clone());
    popup.load().await;
    print_endpoints(tab_id, popup.endpoints(), format_from_args(args), Utc::now())?;

    drop(popup);
    stop_runtime(client, runtime).await
}

pub async fn handle_clear(args: &ArgMatches, db_path: &Path) -> Result<()> {
    let tab_id = tab_from_args(args);
    let (client, runtime) = start_runtime(open_aggregator(db_path)?);

    let mut popup = Popup::new(tab_id, client.clone());
    if !popup.clear().await {
        bail!("Failed to clear endpoints for tab {}", tab_id);
    }
    println!("{} Cleared endpoints for tab {}", "✓".green().bold(), tab_id);

    drop(popup);
    stop_runtime(client, runtime).await
}

pub async fn handle_export(args: &ArgMatches, db_path: &Path) -> Result<()> {
    let tab_id = tab_from_args(args);
    let (client, runtime) = start_runtime(open_aggregator(db_path)?);

    let mut popup = Popup::new(tab_id, client.clone());
    popup.load().await;

    let now = Utc::now();
    let document = popup.export(now)?;
    let output = args
        .get_one::<PathBuf>("output")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(export_file_name(now)));
    write_export(&document, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} Exported {} endpoints to {}",
        "✓".green().bold(),
        document.endpoint_count.to_string().cyan(),
        output.display().to_string().bright_white()
    );

    drop(popup);
    stop_runtime(client, runtime).await
}
