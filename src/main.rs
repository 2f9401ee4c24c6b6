mod browser;
mod completion;
mod config;
mod error;
mod history;
mod journey;
mod logging;
mod metrics;
mod normalize;
mod paths;
mod pipeline;
mod prompt;
mod sanitize;
mod server;
mod settings;
mod store;

use crate::browser::{Browser, GenerationOptions};
use crate::completion::{CompletionClient, CompletionRequest};
use crate::config::Config;
use crate::history::{History, NavigationRecord};
use crate::journey::CapturedJourney;
use crate::metrics::PricingTable;
use crate::prompt::ArticleStyle;
use crate::settings::Preferences;
use crate::store::{FileStore, KeyValueStore};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "latentspace", version)]
#[command(about = "LatentSpace — an endless, model-generated encyclopedia", long_about = None)]
struct Cli {
    /// Port for the server
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Enable dev mode (permissive CORS, UI hosted separately)
    #[arg(long, global = true, default_value_t = false)]
    dev: bool,

    /// Open the UI in the default browser once the server is up
    #[arg(long, global = true, default_value_t = false)]
    open: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web UI and API (default)
    Serve,
    /// Generate one article to stdout
    Ask {
        /// Topic, optionally a context chain such as "Apple (fruit) > Seeds"
        topic: String,

        /// Override the saved model
        #[arg(long)]
        model: Option<String>,

        /// Override the saved article style
        #[arg(long, value_enum)]
        style: Option<ArticleStyle>,

        /// Wait for the whole article instead of streaming it
        #[arg(long, default_value_t = false)]
        no_stream: bool,
    },
    /// Save the provider API key
    Key {
        key: String,

        #[arg(long)]
        model: Option<String>,

        #[arg(long, value_enum)]
        style: Option<ArticleStyle>,
    },
    /// List the stored navigation history
    History,
    /// List the last captured journey
    Journey,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = Config::load_with_path()?;
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(paths::state_dir()));

    // Lightweight commands: no tracing needed.
    match &cli.cmd {
        Some(Command::Key { key, model, style }) => {
            return save_key(store.as_ref(), &config, key, model.as_deref(), *style);
        }
        Some(Command::History) => {
            print_history(store);
            return Ok(());
        }
        Some(Command::Journey) => {
            print_journey(store.as_ref());
            return Ok(());
        }
        _ => {}
    }

    // Keep stdout clean while an article streams to it.
    let streaming_to_stdout = matches!(cli.cmd, Some(Command::Ask { .. }));
    let log_dir = match logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
        suppress_stdout: streaming_to_stdout,
    }) {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("Failed to initialize logging: {err}");
            None
        }
    };

    let pricing = PricingTable::with_overrides(&config.pricing);
    let client = CompletionClient::new(
        &config.provider.base_url,
        Duration::from_secs(config.provider.request_timeout_secs),
    );

    match cli.cmd {
        Some(Command::Ask {
            topic,
            model,
            style,
            no_stream,
        }) => {
            let request = AskRequest {
                topic,
                model,
                style,
                stream: !no_stream,
            };
            ask(&client, store, &config, &pricing, request).await?;
        }

        // Default: bare `latentspace` → web UI + API
        None | Some(Command::Serve) => {
            let port = cli.port.unwrap_or(config.server.port);

            tracing::info!("--- LatentSpace Startup ---");
            if let Some(path) = config_path.as_ref() {
                tracing::info!("Config File: {}", path.display());
            } else {
                tracing::info!("Config File: (default)");
            }
            tracing::info!("State Directory: {}", paths::state_dir().display());
            if let Some(dir) = log_dir.as_ref() {
                tracing::info!("Log Directory: {}", dir.display());
            }
            tracing::info!("Provider: {}", config.provider.base_url);
            tracing::info!("Default Model: {}", config.provider.default_model);
            tracing::info!("Streaming: {}", config.provider.stream);
            tracing::info!("Server Port: {}", port);
            tracing::info!("---------------------------");

            let browser = Browser::new(
                client,
                store,
                &config.provider.default_model,
                settings::api_key_from_env(),
                pricing,
                GenerationOptions {
                    stream: config.provider.stream,
                    max_tokens: config.provider.max_tokens,
                    temperature: config.provider.temperature,
                },
            );
            server::start_server(browser, port, cli.dev, cli.open).await?;
        }

        // Already handled above
        Some(Command::Key { .. }) | Some(Command::History) | Some(Command::Journey) => {
            unreachable!()
        }
    }

    Ok(())
}

struct AskRequest {
    topic: String,
    model: Option<String>,
    style: Option<ArticleStyle>,
    stream: bool,
}

async fn ask(
    client: &CompletionClient,
    store: Arc<dyn KeyValueStore>,
    config: &Config,
    pricing: &PricingTable,
    req: AskRequest,
) -> Result<()> {
    let prefs = Preferences::load(
        store.as_ref(),
        &config.provider.default_model,
        settings::api_key_from_env(),
    );
    let model = req.model.unwrap_or_else(|| prefs.model.clone());
    let style = req.style.unwrap_or(prefs.style);
    let mut history = History::restore(store);

    let request = CompletionRequest {
        prompt: prompt::build_article_prompt(&req.topic, &history.path_topics(), style),
        model: model.clone(),
        stream: req.stream,
        max_tokens: config.provider.max_tokens,
        temperature: config.provider.temperature,
    };

    let credential = prefs.effective_api_key();
    let mut stdout = std::io::stdout();
    let result = client
        .complete_with(credential.as_deref(), &request, |fragment| {
            let _ = stdout.write_all(fragment.as_bytes());
            let _ = stdout.flush();
        })
        .await;
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(hint) = e.hint() {
                eprintln!("{}", hint);
            }
            if e.needs_credential() {
                eprintln!("Save one with: latentspace key <API_KEY>");
            }
            std::process::exit(1);
        }
    };

    let page = pipeline::render(&result, &model, pricing);
    println!();
    println!("---");
    println!("{}", page.metrics.summary_line());
    if !page.external_links.is_empty() {
        println!("External links: {}", page.external_links.join(", "));
    }
    history.push(NavigationRecord::new(req.topic.trim(), page.html, Some(page.metrics)));
    Ok(())
}

fn save_key(
    store: &dyn KeyValueStore,
    config: &Config,
    key: &str,
    model: Option<&str>,
    style: Option<ArticleStyle>,
) -> Result<()> {
    let mut prefs = Preferences::load(store, &config.provider.default_model, None);
    let model = model.map(str::to_string).unwrap_or_else(|| prefs.model.clone());
    let style = style.unwrap_or(prefs.style);
    prefs.save_credential(store, Some(key), &model, style)?;
    match prefs.api_key.as_deref() {
        Some(saved) => println!(
            "Saved API key {} (model: {}, style: {})",
            settings::redact(saved),
            prefs.model,
            prefs.style.as_str()
        ),
        None => println!("Removed saved API key"),
    }
    Ok(())
}

fn print_history(store: Arc<dyn KeyValueStore>) {
    let history = History::restore(store);
    let state = history.state();
    if state.records.is_empty() {
        println!("No history yet.");
        return;
    }
    for (i, record) in state.records.iter().enumerate() {
        let marker = if state.cursor == Some(i) { ">" } else { " " };
        let metrics = record
            .metrics
            .as_ref()
            .map(|m| format!("  [{}]", m.summary_line()))
            .unwrap_or_default();
        println!("{} {:>3}. {}{}", marker, i + 1, record.topic, metrics);
    }
}

fn print_journey(store: &dyn KeyValueStore) {
    match CapturedJourney::load_last(store) {
        Some(journey) if !journey.is_empty() => {
            println!(
                "Journey captured {}:",
                journey.captured_at.format("%Y-%m-%d %H:%M UTC")
            );
            for (i, topic) in journey.topics().iter().enumerate() {
                println!("  {:>3}. {}", i + 1, topic);
            }
        }
        _ => println!("No journey captured yet."),
    }
}
