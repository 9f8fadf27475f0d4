//! CLI command implementations.

pub mod run;
pub mod status;

use anyhow::Result;
use genchain_config::{load_prompts, parse_run_config};
use std::path::Path;

pub fn validate(config: &Path, prompts: Option<&Path>) -> Result<()> {
    let content = std::fs::read_to_string(config)?;
    let config = match parse_run_config(&content) {
        Ok(config) => config,
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    println!("Configuration is valid");
    println!("  variants:  {}", config.variants.join(", "));
    println!(
        "  face swap: {}",
        config
            .face_swap
            .as_ref()
            .map(|f| f.source.display().to_string())
            .unwrap_or_else(|| "off".to_string())
    );
    println!("  webhook:   {}", config.webhook.public_url);

    if let Some(path) = prompts {
        match load_prompts(path) {
            Ok(prompts) => println!("Prompts are valid ({} prompts)", prompts.len()),
            Err(e) => {
                println!("Prompts error: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
