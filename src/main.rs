#![allow(clippy::result_large_err)]

use commission_engine::{
    config::{database, settings},
    core::{regenerate, report},
    errors::{Error, Result},
};
use dotenvy::dotenv;
use sea_orm::DatabaseConnection;
use std::env;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: commission-engine <init | show <deal_id> | regenerate <deal_id> | drift <deal_id>>";

/// Operator commands.
enum Command {
    Init,
    Show(i64),
    Regenerate(i64),
    Drift(i64),
}

fn parse_command(args: &[String]) -> Result<Command> {
    let usage = || Error::Usage {
        message: USAGE.to_string(),
    };
    let deal_id = |raw: Option<&String>| -> Result<i64> {
        let raw = raw.ok_or_else(usage)?;
        raw.parse().map_err(|_| Error::Usage {
            message: format!("'{raw}' is not a deal id"),
        })
    };

    match args.first().map(String::as_str) {
        Some("init") => Ok(Command::Init),
        Some("show") => Ok(Command::Show(deal_id(args.get(1))?)),
        Some("regenerate") => Ok(Command::Regenerate(deal_id(args.get(1))?)),
        Some("drift") => Ok(Command::Drift(deal_id(args.get(1))?)),
        _ => Err(usage()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = parse_command(&args).inspect_err(|e| error!("{e}"))?;

    // 3. Engine settings
    let config = settings::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {e}"))?;
    let policy = config.engine.category_policy;
    info!(?policy, "Loaded engine settings");

    // 4. Database
    if env::var("DATABASE_URL").is_err() {
        std::fs::create_dir_all("data")?;
    }
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {e}"))?;
    database::create_tables(&db).await?;

    // 5. Run the command
    match command {
        Command::Init => info!("Database initialized successfully."),
        Command::Show(deal_id) => show_deal(&db, deal_id).await?,
        Command::Regenerate(deal_id) => {
            let summary = regenerate::regenerate_payment_splits(&db, deal_id, policy).await?;
            println!("{summary}");
        }
        Command::Drift(deal_id) => {
            let drift = regenerate::detect_split_drift(&db, deal_id, policy).await?;
            if drift.is_empty() {
                println!("No drift: stored splits match the recomputed values.");
            } else {
                warn!(deal_id, count = drift.len(), "Stored splits have drifted");
                for entry in &drift {
                    println!("{entry:?}");
                }
            }
        }
    }

    Ok(())
}

async fn show_deal(db: &DatabaseConnection, deal_id: i64) -> Result<()> {
    let overview = report::get_deal_payment_overview(db, deal_id).await?;
    let deal = &overview.deal;

    println!(
        "{} (deal {}) | fee {} | stage {:?}",
        deal.name,
        deal.id,
        report::format_usd(deal.fee),
        deal.stage
    );
    for payment in &overview.payments {
        println!("  {}", report::format_payment_summary(payment));
        for split in &payment.splits {
            let paid = if split.paid { " (paid)" } else { "" };
            println!(
                "      broker {}: {}{paid}",
                split.broker_id,
                report::format_usd(split.split_broker_total)
            );
        }
    }

    println!("Broker payouts:");
    for payout in report::broker_payout_summary(&overview) {
        println!(
            "  broker {}: total {} | paid {} | outstanding {}",
            payout.broker_id,
            report::format_usd(payout.total),
            report::format_usd(payout.paid),
            report::format_usd(payout.outstanding)
        );
    }

    Ok(())
}
