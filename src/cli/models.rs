//! `etymology models`: list the Gemini models usable for generation.

use anyhow::{Context, Result};

use etymology_explainer::config::AppConfig;
use etymology_explainer::providers::GeminiGenerator;

pub(crate) async fn cmd_models() -> Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;
    let generator = GeminiGenerator::new(
        &config.gemini,
        config.generation_timeout,
        reqwest::Client::new(),
    );

    let models = generator
        .list_models()
        .await
        .context("Failed to list Gemini models")?;
    if models.is_empty() {
        println!("No models support generateContent for this API key");
        return Ok(());
    }
    for name in models {
        let marker = if name.trim_start_matches("models/") == generator.model() {
            " (configured)"
        } else {
            ""
        };
        println!("{}{}", name, marker);
    }
    Ok(())
}
