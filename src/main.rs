use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use clap::{Parser, Subcommand};

mod api;
mod config;
mod ops;
mod tui;
mod widget;

use api::BackendClient;
use widget::Widget;

const DEFAULT_LOG_FILTER: &str = "debug,hyper=info,reqwest=info";

#[derive(Parser)]
#[command(name = "docchat")]
#[command(version = "0.1")]
#[command(about = "Upload a document and chat with it", long_about = None)]
struct Cli {
    /// Backend base URL (overrides config and DOCCHAT_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Open the interactive chat (Default)
    Chat {
        /// Preselect the file to upload
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Upload a file and ask one question, without the TUI
    Ask {
        path: PathBuf,
        query: String,
        /// Model to answer with
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let app_dir = config::Config::get_app_data_dir();

    // Setup logging
    let file_appender = tracing_appender::rolling::never(&app_dir, "debug.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        )
        // Only log errors to stderr to avoid messing up TUI
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new("error"))
        )
        .init();

    let mut config = config::Config::load().with_env_overrides();
    if let Some(url) = cli.url {
        config.base_url = url;
    }
    tracing::info!("Backend: {}", config.base_url);

    let client = BackendClient::new(&config.base_url)?;
    let initial_model = config.initial_model();

    let command = cli.command.unwrap_or(Commands::Chat { file: None });

    match command {
        Commands::Chat { file } => {
            let widget = Widget::new(config.models, &initial_model);
            tui::run_app(client, widget, file).await?;
        }
        Commands::Ask { path, query, model } => {
            let mut models = config.models;
            let model = model.unwrap_or(initial_model);
            if !models.contains(&model) {
                models.push(model.clone());
            }
            let widget = Widget::new(models, &model);
            ops::run_ask(client, widget, path, query).await?;
        }
    }

    // Drop guard to flush and close the log file
    drop(_guard);

    // Clean up debug log on clean exit
    let log_file = app_dir.join("debug.log");
    if log_file.exists() {
        let _ = std::fs::remove_file(log_file);
    }

    Ok(())
}
