#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the `WijkAgent` feed poller and incident store.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Args, Parser, Subcommand};
use wijkagent_database::IncidentRepository;
use wijkagent_incident_models::{Incident, IncidentFilter, NewIncident};
use wijkagent_ingest::Poller;
use wijkagent_ingest::config::{self, ConfigOverrides};
use wijkagent_ingest_models::PollerConfig;
use wijkagent_notifier::IncidentNotifier;

#[derive(Parser)]
#[command(name = "wijkagent_ingest", about = "WijkAgent incident ingestion tool")]
struct Cli {
    /// TOML configuration file (overrides `WIJKAGENT_CONFIG`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// `DuckDB` file to use (overrides `WIJKAGENT_DB_PATH`)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FeedArgs {
    /// Feed URL (overrides `WIJKAGENT_FEED_URL`)
    #[arg(long)]
    url: Option<String>,
    /// Seconds between polls
    #[arg(long)]
    interval: Option<u64>,
    /// HTTP request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Accepted `dienst` value
    #[arg(long)]
    service: Option<String>,
}

#[derive(Args)]
struct IncidentArgs {
    /// Incident type
    #[arg(long = "type")]
    incident_type: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value = "")]
    street: String,
    #[arg(long, default_value = "")]
    house_number: String,
    #[arg(long, default_value = "")]
    postcode: String,
    #[arg(long, default_value = "")]
    city: String,
    #[arg(long, default_value = "")]
    province: String,
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    lng: f64,
    /// When it happened ("YYYY-MM-DD HH:MM[:SS]"); `add` defaults to now,
    /// `update` keeps the stored time
    #[arg(long, value_parser = parse_local_time)]
    at: Option<NaiveDateTime>,
}

impl IncidentArgs {
    fn into_new_incident(self, now: NaiveDateTime) -> NewIncident {
        NewIncident {
            uid: String::new(),
            incident_type: self.incident_type,
            description: self.description,
            street: self.street,
            house_number: self.house_number,
            postcode: self.postcode,
            city: self.city,
            province: self.province,
            lat: self.lat,
            lng: self.lng,
            incident_at: self.at.unwrap_or(now),
            created_at: None,
        }
    }

    /// Replaces the editable fields of `existing`. `id`, `uid` and
    /// `created_at` are kept.
    fn apply(self, existing: Incident) -> Incident {
        Incident {
            incident_type: self.incident_type,
            description: self.description,
            street: self.street,
            house_number: self.house_number,
            postcode: self.postcode,
            city: self.city,
            province: self.province,
            lat: self.lat,
            lng: self.lng,
            incident_at: self.at.unwrap_or(existing.incident_at),
            ..existing
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed until interrupted
    Poll {
        #[command(flatten)]
        feed: FeedArgs,
    },
    /// Run a single poll tick and print its report
    PollOnce {
        #[command(flatten)]
        feed: FeedArgs,
    },
    /// List stored incidents, newest first
    List {
        /// Earliest incident date (inclusive, YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Latest incident date (inclusive, YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Exact incident type
        #[arg(long = "type")]
        incident_type: Option<String>,
        /// Exact city
        #[arg(long)]
        city: Option<String>,
    },
    /// Show one incident
    Show {
        /// Incident id
        id: i64,
    },
    /// Add an incident by hand
    Add {
        #[command(flatten)]
        fields: IncidentArgs,
    },
    /// Overwrite every field of a stored incident
    Update {
        /// Incident id
        id: i64,
        #[command(flatten)]
        fields: IncidentArgs,
    },
    /// Delete an incident
    Delete {
        /// Incident id
        id: i64,
    },
    /// Print aggregate statistics
    Stats {
        /// Number of types and cities to list
        #[arg(long, default_value = "5")]
        top: usize,
        /// Number of days in the per-day breakdown
        #[arg(long, default_value = "7")]
        days: u32,
    },
}

fn parse_local_time(s: &str) -> Result<NaiveDateTime, String> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s.trim(), format).ok())
        .ok_or_else(|| format!("expected YYYY-MM-DD HH:MM[:SS], got {s:?}"))
}

fn load_config(
    cli_config: Option<PathBuf>,
    database: Option<PathBuf>,
    feed: Option<FeedArgs>,
) -> Result<PollerConfig, config::ConfigError> {
    let mut overrides = ConfigOverrides {
        config_path: cli_config,
        database_path: database,
        ..ConfigOverrides::default()
    };
    if let Some(feed) = feed {
        overrides.api_url = feed.url;
        overrides.poll_interval_secs = feed.interval;
        overrides.request_timeout_secs = feed.timeout;
        overrides.service = feed.service;
    }
    config::load(&overrides)
}

fn open_repository(config: &PollerConfig) -> Result<Arc<IncidentRepository>, Box<dyn std::error::Error>> {
    let path = config::database_path(config);
    log::info!("Opening database at {}", path.display());
    Ok(Arc::new(IncidentRepository::open(&path)?))
}

fn print_incident_row(incident: &Incident) {
    println!(
        "{:<6} {:<19} {:<20} {:<20} {}",
        incident.id,
        incident.incident_at.format("%Y-%m-%d %H:%M:%S"),
        incident.incident_type,
        incident.city,
        incident.uid
    );
}

fn print_incident(incident: &Incident) {
    println!("ID:          {}", incident.id);
    println!("UID:         {}", incident.uid);
    println!("Type:        {}", incident.incident_type);
    println!("Description: {}", incident.description);
    println!(
        "Address:     {} {}, {} {}",
        incident.street, incident.house_number, incident.postcode, incident.city
    );
    println!("Province:    {}", incident.province);
    println!("Location:    {},{}", incident.lat, incident.lng);
    println!("Occurred:    {}", incident.incident_at);
    println!("Created:     {}", incident.created_at);
}

fn print_stats(
    repository: &IncidentRepository,
    top: usize,
    days: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Total incidents: {}", repository.total_count()?);

    let months = repository.month_comparison()?;
    let change = months
        .percent_change()
        .map_or_else(|| "n/a".to_string(), |pct| format!("{pct:+.1}%"));
    println!(
        "This month: {} (previous: {}, {:+}, {change})",
        months.current,
        months.previous,
        months.difference()
    );

    println!();
    println!("Top types:");
    for entry in repository.top_types(top)? {
        println!("  {:<24} {}", entry.label, entry.count);
    }

    println!();
    println!("Top cities:");
    for entry in repository.top_cities(top)? {
        println!("  {:<24} {}", entry.label, entry.count);
    }

    println!();
    println!("By time of day:");
    for entry in repository.counts_by_time_slot()? {
        println!(
            "  {:<10} {:<12} {}",
            entry.slot.to_string(),
            entry.slot.window(),
            entry.count
        );
    }

    println!();
    println!("Last {days} day(s):");
    for entry in repository.counts_per_day(days)? {
        println!("  {}  {}", entry.date, entry.count);
    }

    if let Some(latest) = repository.latest()? {
        println!();
        println!("Latest:");
        print_incident_row(&latest);
    }

    Ok(())
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Poll { feed } => {
            let config = load_config(cli.config, cli.database, Some(feed))?;
            let repository = open_repository(&config)?;
            let notifier = Arc::new(IncidentNotifier::new());
            notifier.subscribe_fn(|incident: &Incident| {
                println!(
                    "New incident #{}: {} in {} ({})",
                    incident.id, incident.incident_type, incident.city, incident.incident_at
                );
                Ok(())
            });

            let poller = Arc::new(Poller::from_config(&config, repository, notifier)?);
            let handle = poller.run(config.poll_interval());

            tokio::signal::ctrl_c().await?;
            log::info!("Interrupted, shutting down");
            handle.stop();
        }
        Commands::PollOnce { feed } => {
            let config = load_config(cli.config, cli.database, Some(feed))?;
            let repository = open_repository(&config)?;
            let poller = Poller::from_config(&config, repository, Arc::new(IncidentNotifier::new()))?;
            let report = poller.poll_once().await;
            println!("{report}");
            if report.fetch_failed {
                return Err("feed fetch failed".into());
            }
        }
        Commands::List {
            from,
            to,
            incident_type,
            city,
        } => {
            let config = load_config(cli.config, cli.database, None)?;
            let repository = open_repository(&config)?;
            let filter = IncidentFilter {
                from: from.map(|day| day.and_time(NaiveTime::MIN)),
                to: to.and_then(|day| day.and_hms_opt(23, 59, 59)),
                incident_type,
                city,
            };
            let incidents = repository.get_filtered(&filter)?;
            println!(
                "{:<6} {:<19} {:<20} {:<20} UID",
                "ID", "OCCURRED", "TYPE", "CITY"
            );
            println!("{}", "-".repeat(80));
            for incident in &incidents {
                print_incident_row(incident);
            }
            println!("{} incident(s)", incidents.len());
        }
        Commands::Show { id } => {
            let config = load_config(cli.config, cli.database, None)?;
            let repository = open_repository(&config)?;
            let incident = repository
                .get_by_id(id)?
                .ok_or_else(|| format!("No incident with id {id}"))?;
            print_incident(&incident);
        }
        Commands::Add { fields } => {
            let config = load_config(cli.config, cli.database, None)?;
            let repository = open_repository(&config)?;
            let incident =
                repository.add(fields.into_new_incident(chrono::Local::now().naive_local()))?;
            log::info!("Added incident {}", incident.id);
            print_incident(&incident);
        }
        Commands::Update { id, fields } => {
            let config = load_config(cli.config, cli.database, None)?;
            let repository = open_repository(&config)?;
            let existing = repository
                .get_by_id(id)?
                .ok_or_else(|| format!("No incident with id {id}"))?;
            let incident = repository
                .update(&fields.apply(existing))?
                .ok_or_else(|| format!("No incident with id {id}"))?;
            log::info!("Updated incident {}", incident.id);
            print_incident(&incident);
        }
        Commands::Delete { id } => {
            let config = load_config(cli.config, cli.database, None)?;
            let repository = open_repository(&config)?;
            if !repository.delete(id)? {
                return Err(format!("No incident with id {id}").into());
            }
            println!("Deleted incident {id}");
        }
        Commands::Stats { top, days } => {
            let config = load_config(cli.config, cli.database, None)?;
            let repository = open_repository(&config)?;
            print_stats(&repository, top, days)?;
        }
    }

    Ok(())
}
