use anyhow::{bail, Context};
use clap::{Arg, ArgMatches, Command};
use rtc_bridge::api::routes::create_router;
use rtc_bridge::app::{build_states, init_tracing};
use rtc_bridge::config::{load_config, AppConfig};
use rtc_bridge::db::client::DBClient;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

fn cli() -> Command {
    Command::new("rtc-bridge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Custodial RTC bridge ledger")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("CONFIG_FILE")
                .help("Path to configuration file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand(Command::new("serve").about("Run the HTTP server"))
        .subcommand(
            Command::new("sweep")
                .about("Run one settlement pass and print the results")
                .arg(
                    Arg::new("bridge")
                        .long("bridge")
                        .value_name("SLUG")
                        .help("Only settle this bridge")
                        .value_parser(clap::value_parser!(String)),
                ),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<PathBuf>("config");
    let config = load_config(config_path.map(PathBuf::as_path))?;
    init_tracing(&config.logging);

    info!("Starting RTC bridge with {} bridges", config.bridges.len());

    let db = DBClient::new(&config.database)
        .await
        .context("Failed to open database")?;
    info!("Running database migrations");
    db.run_migrations().await?;

    match matches.subcommand() {
        Some(("serve", _)) => serve(&config, db).await,
        Some(("sweep", sub)) => sweep(&config, db, sub).await,
        _ => bail!("Unknown command"),
    }
}

async fn serve(config: &AppConfig, db: DBClient) -> anyhow::Result<()> {
    let states = build_states(config, &db.pool)?;

    if config.settlement.enabled {
        for state in &states {
            if let Some(sweep) = state.settlement.clone() {
                tokio::spawn(async move {
                    info!("Starting settlement sweep as {}", sweep.holder());
                    sweep.run().await;
                });
            }
        }
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, create_router(states))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Shutting down RTC bridge");
    Ok(())
}

async fn sweep(config: &AppConfig, db: DBClient, matches: &ArgMatches) -> anyhow::Result<()> {
    let only = matches.get_one::<String>("bridge");
    if let Some(slug) = only {
        if config.bridge(slug).is_none() {
            bail!("No bridge named {}", slug);
        }
    }

    for state in build_states(config, &db.pool)? {
        let slug = state.service.bridge().slug.clone();
        if only.is_some_and(|wanted| *wanted != slug) {
            continue;
        }
        let Some(sweep) = state.settlement else {
            warn!("[{}] No payout executor configured, skipping", slug);
            continue;
        };

        let report = sweep.process_once().await?;
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "bridge": slug,
                "report": report,
            }))?
        );
    }
    Ok(())
}
