//! migrate-memberships: rewrite student memberships between the single `class_id` field
//! and the `class_ids` set, or recount class `student_count` values.

use clap::{Parser, Subcommand};
use classroom_api::{MembershipMigration, PgStore, Settings};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "migrate-memberships", version, about = "Student membership migration")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// `class_id` -> `class_ids` (default).
    Forward,
    /// `class_ids` with one element -> `class_id`. Multi-class students are skipped.
    Reverse,
    /// Recompute every class's `student_count`.
    Recount,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("classroom_api=info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env()?;
    let store = PgStore::connect(&settings).await?;

    let failed = match args.command.unwrap_or(Command::Forward) {
        Command::Forward => {
            let report = MembershipMigration::forward(&store).await?;
            print_report(&report)?;
            report.failed.len()
        }
        Command::Reverse => {
            let report = MembershipMigration::reverse(&store).await?;
            print_report(&report)?;
            report.failed.len()
        }
        Command::Recount => {
            let report = MembershipMigration::recount(&store).await?;
            print_report(&report)?;
            report.failed.len()
        }
    };

    if failed > 0 {
        tracing::error!(failed, "some records could not be migrated");
        std::process::exit(1);
    }
    Ok(())
}

fn print_report<T: Serialize>(report: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
