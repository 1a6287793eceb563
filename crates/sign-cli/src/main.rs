use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sign_analysis::{create_headers, extract_rules, SignRequest, SignatureRuleSet};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sign", about = "Recover request-signing rules from a web bundle")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the bundle and extract the signing rule set.
    Extract {
        #[arg(long)]
        page_url: String,
        /// Substring identifying the target script among the page's
        /// external script references.
        #[arg(long)]
        marker: String,
        #[arg(short, long, default_value = "rules.json")]
        out: PathBuf,
    },
    /// Recompute request headers from a stored rule set, for manual
    /// validation against a known-good response.
    Sign {
        #[arg(long)]
        rules: PathBuf,
        #[arg(long)]
        path: String,
        /// Millisecond timestamp; defaults to the current time.
        #[arg(long)]
        time: Option<String>,
        #[arg(long, default_value = "0")]
        user_id: String,
        #[arg(long, default_value = "")]
        cookie: String,
        #[arg(long, default_value = "")]
        user_agent: String,
        #[arg(long, default_value = "")]
        x_bc: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Args::parse().command {
        Command::Extract { page_url, marker, out } => {
            let rules = extract_rules(&page_url, &marker).await?;
            let json = serde_json::to_string_pretty(&rules)?;
            fs::write(&out, json).with_context(|| format!("writing {}", out.display()))?;
            println!("rules written to {}", out.display());
        }
        Command::Sign { rules, path, time, user_id, cookie, user_agent, x_bc } => {
            let rules: SignatureRuleSet = serde_json::from_slice(
                &fs::read(&rules).with_context(|| format!("reading {}", rules.display()))?,
            )?;
            let time = time.unwrap_or_else(|| {
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_millis().to_string())
                    .unwrap_or_default()
            });
            let request =
                SignRequest { path, time, user_id, cookie, user_agent, secondary_token: x_bc };
            let headers = create_headers(&rules, &request)?;
            println!("{}", serde_json::to_string_pretty(&headers)?);
        }
    }
    Ok(())
}
