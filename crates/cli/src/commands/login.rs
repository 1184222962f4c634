//! Interactive Kite Connect login.
//!
//! Prints the login URL, reads the request token Kite appends to the redirect
//! (either the bare token or the whole redirect URL), and exchanges it for an
//! access token. The token is valid until the next morning; pass it to `run`
//! with `--access-token` or `STRADDLE_KITE__ACCESS_TOKEN`.

use anyhow::{bail, Result};
use clap::Args;
use straddle_core::ConfigLoader;
use straddle_kite::{KiteClient, KiteCredentials};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Arguments for the login command.
#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Config file path.
    #[arg(short, long, default_value = "config/Straddle.toml")]
    pub config: String,

    /// Request token (or redirect URL); prompted for when omitted.
    #[arg(long)]
    pub request_token: Option<String>,
}

/// Runs the login flow and prints the access token.
pub async fn run_login(args: LoginArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    if config.kite.api_key.is_empty() || config.kite.api_secret.is_empty() {
        bail!("kite.api_key and kite.api_secret must be configured to log in");
    }

    let credentials = KiteCredentials::from_config(&config.kite);
    println!("Log in at: {}", credentials.login_url(&config.kite.login_url));

    let input = match args.request_token {
        Some(token) => token,
        None => prompt("Request token or redirect URL: ").await?,
    };
    let Some(request_token) = extract_request_token(&input) else {
        bail!("no request token found in {input:?}");
    };

    let client = KiteClient::new(&config.kite, credentials)?;
    let session = client.generate_session(&request_token).await?;

    tracing::info!(user_id = ?session.user_id, "Kite session established");
    println!("Access token: {}", session.access_token);
    Ok(())
}

async fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    std::io::Write::flush(&mut std::io::stdout())?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line)
}

/// Pulls the request token out of a pasted token or redirect URL.
fn extract_request_token(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if !input.contains('=') {
        return Some(input.to_string());
    }
    let query = input.split_once('?').map_or(input, |(_, q)| q);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "request_token")
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}
