use std::io::{self, Write};

use crate::config::{mask_apikey, Config};
use crate::error::{Context, Result};

/// Interactively updates the stored API credentials.
pub fn run() -> Result<()> {
    let mut config = Config::load_if_present()?.unwrap_or_default();

    println!("Enter your API credentials");
    println!("^C to cancel");
    print!("API-key[{}]: ", mask_apikey(&config.apikey));
    io::stdout().flush().context("Failed to flush prompt")?;

    let mut entered = String::new();
    io::stdin()
        .read_line(&mut entered)
        .context("Failed to read API key")?;
    let entered = entered.trim();
    if !entered.is_empty() {
        config.apikey = entered.to_string();
    }

    let path = config.save()?;
    println!("Config written to {}", path.display());
    Ok(())
}
