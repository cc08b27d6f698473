//! Command-line interface.

mod lookup;
mod models;
mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use etymology_explainer::client::share_url;
use etymology_explainer::etymology::{CLIENT_DEFAULT_ERA, ERA_PRESETS};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

#[derive(Parser, Debug)]
#[command(name = "etymology", version, about = "Explain where words come from, era by era")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server
    Serve {
        /// Address to bind (overrides ETYMOLOGY_BIND)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Look up a word on a running server
    Lookup {
        /// Word to explain
        word: String,
        /// Era for the time capsule
        #[arg(long, default_value = CLIENT_DEFAULT_ERA)]
        era: String,
        /// Server base URL
        #[arg(long, env = "ETYMOLOGY_URL", default_value = DEFAULT_SERVER_URL)]
        url: String,
        /// Print the final result as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List the era presets
    Eras,
    /// List the Gemini models the configured API key can generate with
    Models,
    /// Print a shareable link for a word
    ShareUrl {
        word: String,
        #[arg(long, default_value = CLIENT_DEFAULT_ERA)]
        era: String,
        #[arg(long, env = "ETYMOLOGY_URL", default_value = DEFAULT_SERVER_URL)]
        url: String,
    },
}

/// Initialize tracing. `RUST_LOG` wins over `default_level`; `LOG_FORMAT=json`
/// switches to JSON lines. Logs go to stderr so `lookup` output stays clean.
fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { bind } => {
            init_logging("info");
            serve::cmd_serve(bind).await
        }
        Command::Lookup {
            word,
            era,
            url,
            json,
        } => {
            init_logging("warn");
            lookup::cmd_lookup(&url, &word, &era, json).await
        }
        Command::Models => {
            init_logging("warn");
            models::cmd_models().await
        }
        Command::Eras => {
            for era in ERA_PRESETS {
                let marker = if era == CLIENT_DEFAULT_ERA { " (default)" } else { "" };
                println!("{}{}", era, marker);
            }
            Ok(())
        }
        Command::ShareUrl { word, era, url } => {
            let base = url::Url::parse(&url)?;
            println!("{}", share_url(&base, &word, &era));
            Ok(())
        }
    }
}
