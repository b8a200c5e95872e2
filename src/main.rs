/*
 * Responsibility
 * - CLI 引数の解釈 (serve / headers / sync)
 * - tokio runtime 起動
 * - app / services の呼び出し（ロジックは置かない）
 */
use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

mod api;
mod app;
mod config;
mod error;
mod middleware;
mod services;
mod state;

use crate::config::Config;
use crate::services::policy::{ClientContext, resolve};
use crate::services::static_config;

/// Security response header policy: serve it, preview it, or write it to the server config.
#[derive(Parser, Debug)]
#[command(name = "httpheader", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,

    /// Print the headers resolved for one client context.
    Headers {
        /// "site" or "administrator"
        #[arg(long, default_value = "site", value_parser = parse_client)]
        client: ClientContext,
    },

    /// Write the static-eligible headers into .htaccess / web.config under SITE_ROOT.
    Sync {
        /// Write even when write_static_headers is turned off.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn parse_client(raw: &str) -> Result<ClientContext, String> {
    ClientContext::parse(raw).ok_or_else(|| format!("unknown client context: {raw}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    app::init_tracing();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => app::run_server(config).await,
        Command::Headers { client } => {
            let resolved = resolve(&config.options, client);
            if resolved.is_empty() {
                tracing::info!(client = client.as_str(), "no security headers enabled");
            }
            for entry in resolved.for_context(client) {
                println!("{}: {}", entry.name(), entry.value);
            }
            Ok(())
        }
        Command::Sync { force } => {
            if !force && !config.options.write_static_headers {
                bail!("write_static_headers is turned off; pass --force to write anyway");
            }

            let resolved = resolve(&config.options, ClientContext::Front);
            let notice = tokio::task::spawn_blocking(move || {
                static_config::sync(&config.site_root, config.server_software, &resolved)
            })
            .await?;

            println!("{}", serde_json::to_string_pretty(&notice)?);
            if !notice.is_success() {
                bail!("{}", notice.message);
            }
            Ok(())
        }
    }
}
