use anyhow::{bail, Context};
use clap::{Arg, ArgMatches, Command};
use rtc_bridge::app::init_tracing;
use rtc_bridge::bridge::accounts::{bind_wallet, create_account};
use rtc_bridge::chain::ChainKind;
use rtc_bridge::config::load_config;
use rtc_bridge::db::client::DBClient;
use rtc_bridge::db::database::{
    find_account_by_name, ledger_balance, list_wallets, recent_ledger_entries,
};
use rtc_bridge::utils::amount::micros_to_decimal;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;

const RECENT_ENTRIES: i64 = 20;

fn name_arg() -> Arg {
    Arg::new("name")
        .long("name")
        .value_name("NAME")
        .help("Account name")
        .required(true)
        .value_parser(clap::value_parser!(String))
}

fn cli() -> Command {
    Command::new("bridge-admin")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Manage RTC bridge accounts and wallet bindings")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("CONFIG_FILE")
                .help("Path to configuration file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand(
            Command::new("create-account")
                .about("Create an account and print its API key")
                .arg(name_arg()),
        )
        .subcommand(
            Command::new("bind-wallet")
                .about("Bind the account's wallet for a chain")
                .arg(name_arg())
                .arg(
                    Arg::new("chain")
                        .long("chain")
                        .value_name("CHAIN")
                        .help("solana or evm")
                        .required(true)
                        .value_parser(["solana", "evm"]),
                )
                .arg(
                    Arg::new("address")
                        .long("address")
                        .value_name("ADDRESS")
                        .required(true)
                        .value_parser(clap::value_parser!(String)),
                ),
        )
        .subcommand(
            Command::new("show-account")
                .about("Print balance, wallets and recent ledger entries")
                .arg(name_arg()),
        )
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> anyhow::Result<&'a String> {
    matches
        .get_one::<String>(id)
        .with_context(|| format!("--{} is required", id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<PathBuf>("config");
    let config = load_config(config_path.map(PathBuf::as_path))?;
    init_tracing(&config.logging);

    let db = DBClient::new(&config.database)
        .await
        .context("Failed to open database")?;
    db.run_migrations().await?;

    match matches.subcommand() {
        Some(("create-account", sub)) => {
            let (account, api_key) = create_account(&db.pool, required(sub, "name")?).await?;
            println!("Created account {} (id {})", account.name, account.id);
            println!("API key (shown once): {}", api_key);
        }
        Some(("bind-wallet", sub)) => {
            let pool = &db.pool;
            let account = account_by_name(pool, required(sub, "name")?).await?;
            let chain = ChainKind::from_str(required(sub, "chain")?).map_err(anyhow::Error::msg)?;
            let wallet = bind_wallet(pool, account.id, chain, required(sub, "address")?).await?;
            println!("Bound {} wallet {} to {}", wallet.chain, wallet.address, account.name);
        }
        Some(("show-account", sub)) => show_account(&db.pool, required(sub, "name")?).await?,
        _ => bail!("Unknown command"),
    }
    Ok(())
}

async fn account_by_name(
    pool: &SqlitePool,
    name: &str,
) -> anyhow::Result<rtc_bridge::db::models::Account> {
    match find_account_by_name(pool, name.trim()).await? {
        Some(account) => Ok(account),
        None => bail!("No account named {}", name),
    }
}

async fn show_account(pool: &SqlitePool, name: &str) -> anyhow::Result<()> {
    let account = account_by_name(pool, name).await?;
    let wallets = list_wallets(pool, account.id).await?;
    let ledger_sum = ledger_balance(pool, account.id).await?;
    let entries = recent_ledger_entries(pool, account.id, RECENT_ENTRIES).await?;

    println!("Account {} (id {})", account.name, account.id);
    println!("  balance: {} RTC", account.balance());
    if ledger_sum != account.balance_micros {
        println!(
            "  WARNING: ledger sums to {} RTC, balance column differs",
            micros_to_decimal(ledger_sum)
        );
    }
    for wallet in &wallets {
        println!("  {} wallet: {}", wallet.chain, wallet.address);
    }
    for entry in &entries {
        println!(
            "  {} {:<10} {:>14} -> {:>14}  {}",
            entry.bridge,
            entry.kind,
            micros_to_decimal(entry.delta_micros),
            micros_to_decimal(entry.balance_after_micros),
            entry.reference
        );
    }
    Ok(())
}
