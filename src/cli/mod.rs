use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::api::{self, ApiState};
use crate::application::{parse_instant, LedgerService};
use crate::domain::Entry;

/// Doorlog - departure/return tracker
#[derive(Parser)]
#[command(name = "doorlog")]
#[command(about = "Tracks departures and returns of a single subject, with derived lateness")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "doorlog.db")]
    pub database: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// List all entries, most recent departure first
    List,

    /// Record a departure
    Open {
        /// Estimated time away, in minutes
        duration: i64,

        /// Departure time (ISO 8601 instant, defaults to now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Record a return for an open entry
    Close {
        /// Entry ID
        id: String,

        /// Return time (ISO 8601 instant, defaults to now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Run the HTTP API server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:3001")]
        listen: SocketAddr,

        /// Bearer token required on mutating routes (omit to leave them open)
        #[arg(long)]
        auth_token: Option<String>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                LedgerService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::List => {
                let service = LedgerService::connect(&self.database).await?;
                let entries = service.list().await?;
                print_entries(&entries);
            }

            Commands::Open { duration, at } => {
                let service = LedgerService::connect(&self.database).await?;
                let departure_time = parse_instant_or_now("departure time", at.as_deref())?;

                let entry = service.open(departure_time, duration).await?;
                println!(
                    "Opened entry {} (departed {}, expected back {})",
                    entry.id,
                    format_instant(entry.departure_time),
                    format_instant(entry.expected_return())
                );
            }

            Commands::Close { id, at } => {
                let service = LedgerService::connect(&self.database).await?;
                let entry_id =
                    Uuid::parse_str(&id).context("Invalid entry ID format (expected UUID)")?;
                let return_time = parse_instant_or_now("return time", at.as_deref())?;

                let entry = service.close(entry_id, return_time).await?;
                let late_by = entry.late_by.unwrap_or(0);
                if late_by > 0 {
                    println!("Closed entry {} ({} min late)", entry.id, late_by);
                } else {
                    println!("Closed entry {} (on time)", entry.id);
                }
            }

            Commands::Serve { listen, auth_token } => {
                tracing_subscriber::fmt()
                    .with_env_filter(
                        EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| EnvFilter::new("info")),
                    )
                    .init();

                let service = LedgerService::init(&self.database).await?;
                let state = Arc::new(ApiState {
                    service,
                    auth_token,
                });
                api::serve(listen, state).await?;
            }
        }

        Ok(())
    }
}

fn parse_instant_or_now(field: &str, value: Option<&str>) -> Result<DateTime<Utc>> {
    match value {
        Some(raw) => Ok(parse_instant(field, raw)?),
        None => Ok(Utc::now()),
    }
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M").to_string()
}

fn print_entries(entries: &[Entry]) {
    if entries.is_empty() {
        println!("No entries found.");
        return;
    }

    println!(
        "{:<36} {:<17} {:>5} {:<17} {:>5}",
        "ID", "DEPARTED", "EST", "RETURNED", "LATE"
    );
    println!("{}", "-".repeat(85));
    for entry in entries {
        println!(
            "{:<36} {:<17} {:>5} {:<17} {:>5}",
            entry.id,
            format_instant(entry.departure_time),
            entry.estimated_duration,
            entry
                .return_time
                .map(format_instant)
                .unwrap_or_else(|| "out".to_string()),
            entry
                .late_by
                .map(|m| m.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}
