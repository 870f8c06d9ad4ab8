use aggregates::{Bucket, BucketCounts};
use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use feeds::{ChangeKind, FeedClass};
use history_sqlite::Store;
use lookup::{Lookup, ViewOptions};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use zonetrail_core::{HistoryError, QueryCtx};

mod config;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum KindArg { New, Old, Moved }

impl From<KindArg> for ChangeKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::New => ChangeKind::New,
            KindArg::Old => ChangeKind::Old,
            KindArg::Moved => ChangeKind::Moved,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ClassArg { Domain, Nameserver }

impl From<ClassArg> for FeedClass {
    fn from(c: ClassArg) -> Self {
        match c {
            ClassArg::Domain => FeedClass::Domain,
            ClassArg::Nameserver => FeedClass::NameServer,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum BucketArg { Week, Month }

impl From<BucketArg> for Bucket {
    fn from(b: BucketArg) -> Self {
        match b {
            BucketArg::Week => Bucket::Week,
            BucketArg::Month => Bucket::Month,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "zonetrail", version, about = "Query the history of DNS zone snapshots")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./zonetrail.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// History database (overrides database.path)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,
    /// Output format: text, json, or jsonl
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Write list results as CSV instead
    #[arg(long, global = true, default_value_t = false)]
    csv: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Show a domain with its current and past nameservers
    Domain {
        name: String,
        /// Only counts, no peer lists
        #[arg(long, default_value_t = false)]
        counts_only: bool,
        /// Skip the archived list when it has more rows than this
        #[arg(long)]
        archived_max: Option<i64>,
    },
    /// Show a nameserver with its domains, zones and glue addresses
    Nameserver {
        name: String,
        #[arg(long, default_value_t = false)]
        counts_only: bool,
        #[arg(long)]
        archived_max: Option<i64>,
    },
    /// Show a zone ("." for the root) with its nameservers and import summary
    Zone {
        name: String,
        #[arg(long, default_value_t = false)]
        counts_only: bool,
        #[arg(long)]
        archived_max: Option<i64>,
    },
    /// Show an IPv4/IPv6 address with the nameservers it glues
    Ip {
        address: String,
        #[arg(long, default_value_t = false)]
        counts_only: bool,
        #[arg(long)]
        archived_max: Option<i64>,
    },
    /// Print a random currently active domain
    Random,
    /// Entities that changed on a date (YYYY-MM-DD)
    Feed {
        date: String,
        #[arg(long, value_enum, default_value_t = KindArg::New)]
        kind: KindArg,
        #[arg(long, value_enum, default_value_t = ClassArg::Domain)]
        class: ClassArg,
    },
    /// Per-day counts of feed entries whose name contains a substring
    FeedSearch {
        term: String,
        #[arg(long, value_enum, default_value_t = KindArg::New)]
        kind: KindArg,
        #[arg(long, value_enum, default_value_t = ClassArg::Domain)]
        class: ClassArg,
    },
    /// Weekly or monthly domain population and change volumes
    History {
        /// Zone to report on; the whole dataset when omitted
        #[arg(long, conflicts_with = "by_zone")]
        zone: Option<String>,
        /// One history per zone
        #[arg(long, default_value_t = false)]
        by_zone: bool,
        #[arg(long, value_enum, default_value_t = BucketArg::Week)]
        bucket: BucketArg,
        #[arg(long, default_value_t = 52)]
        limit: usize,
    },
    /// Zones that have left the root
    Graveyard,
    /// Zones where <prefix>.<zone> is registered, or with --available where it is free
    Prefix {
        prefix: String,
        #[arg(long, default_value_t = false)]
        available: bool,
    },
    /// Import summary of every zone
    Imports,
    /// Pending imports and recent import throughput
    Backlog {
        #[arg(long, default_value_t = 14)]
        days: usize,
    },
    /// Nameservers serving the most active domains
    TopNameservers {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Which kinds of entity a name or address is known as
    Search { name: String },
    /// Glue addresses active on a date
    ActiveIps {
        date: String,
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
    /// Glue zones an address is published under
    IpZones { address: String },
    /// Known addresses inside a CIDR block
    Cidr {
        block: String,
        #[arg(long, default_value_t = 256)]
        limit: usize,
    },
}

struct Output {
    format: OutputFormat,
    csv: bool,
}

impl Output {
    fn value<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.csv {
            bail!("--csv applies to list results only");
        }
        match self.format {
            OutputFormat::Text => print!("{}", serde_yaml::to_string(value)?),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Jsonl => println!("{}", serde_json::to_string(value)?),
        }
        Ok(())
    }

    fn rows<T: Serialize>(&self, rows: &[T]) -> Result<()> {
        if self.csv {
            let mut wtr = csv::Writer::from_writer(std::io::stdout());
            for row in rows {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
            return Ok(());
        }
        match self.format {
            OutputFormat::Text => print!("{}", serde_yaml::to_string(rows)?),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
            OutputFormat::Jsonl => {
                let mut out = std::io::stdout().lock();
                for row in rows {
                    writeln!(out, "{}", serde_json::to_string(row)?)?;
                }
            }
        }
        Ok(())
    }
}

/// Flat per-zone bucket for CSV, which cannot carry nested lists.
#[derive(Serialize)]
struct ZoneBucketRow<'a> {
    zone: &'a str,
    start: time::Date,
    avg_domains: i64,
    old: i64,
    moved: i64,
    new: i64,
}

impl<'a> ZoneBucketRow<'a> {
    fn new(zone: &'a str, b: &BucketCounts) -> Self {
        ZoneBucketRow { zone, start: b.start, avg_domains: b.avg_domains, old: b.old, moved: b.moved, new: b.new }
    }
}

fn print_version() {
    println!("zonetrail {} (core {})", env!("CARGO_PKG_VERSION"), zonetrail_core::version());
}

fn view_options(counts_only: bool, archived_max: Option<i64>) -> ViewOptions {
    let mut opts = if counts_only { ViewOptions::counts_only() } else { ViewOptions::default() };
    opts.archived_fetch_limit = archived_max;
    opts
}

async fn run(cli: Cli, lookup: Lookup, ctx: QueryCtx) -> Result<()> {
    let out = Output { format: cli.format, csv: cli.csv };
    let started = Instant::now();
    match cli.command {
        Commands::Version => print_version(),
        Commands::Domain { name, counts_only, archived_max } => {
            out.value(&lookup.domain(&ctx, &name, view_options(counts_only, archived_max)).await?)?;
        }
        Commands::Nameserver { name, counts_only, archived_max } => {
            out.value(&lookup.nameserver(&ctx, &name, view_options(counts_only, archived_max)).await?)?;
        }
        Commands::Zone { name, counts_only, archived_max } => {
            out.value(&lookup.zone(&ctx, &name, view_options(counts_only, archived_max)).await?)?;
        }
        Commands::Ip { address, counts_only, archived_max } => {
            out.value(&lookup.address(&ctx, &address, view_options(counts_only, archived_max)).await?)?;
        }
        Commands::Random => {
            let name = lookup.random_active_domain(&ctx).await?;
            match out.format {
                OutputFormat::Text => println!("{name}"),
                _ => out.value(&serde_json::json!({ "domain": name }))?,
            }
        }
        Commands::Feed { date, kind, class } => {
            let feeds = lookup.feed(&ctx, &date, kind.into(), class.into()).await?;
            if out.csv {
                let entries: Vec<_> = feeds.iter().flat_map(|f| f.entries.iter()).collect();
                out.rows(&entries)?;
            } else {
                out.rows(&feeds)?;
            }
            for f in feeds.iter().filter(|f| f.truncated) {
                eprintln!("warning: {} {} feed truncated at {} entries", f.date, f.kind, f.entries.len());
            }
        }
        Commands::FeedSearch { term, kind, class } => {
            let series = lookup.feed_search(&ctx, kind.into(), class.into(), &term).await?;
            if out.csv {
                let days: Vec<_> = series.iter().flat_map(|s| s.days.iter()).collect();
                out.rows(&days)?;
            } else {
                out.rows(&series)?;
            }
        }
        Commands::History { zone, by_zone, bucket, limit } => {
            if by_zone {
                let zones = lookup.history_by_zone(&ctx, bucket.into(), limit).await?;
                if out.csv {
                    let rows: Vec<_> = zones
                        .iter()
                        .flat_map(|z| z.buckets.iter().map(move |b| ZoneBucketRow::new(&z.zone, b)))
                        .collect();
                    out.rows(&rows)?;
                } else {
                    out.rows(&zones)?;
                }
            } else {
                out.rows(&lookup.history(&ctx, zone.as_deref(), bucket.into(), limit).await?)?;
            }
        }
        Commands::Graveyard => out.rows(&lookup.zone_lifecycles(&ctx).await?)?,
        Commands::Prefix { prefix, available } => {
            if available {
                out.rows(&lookup.available(&ctx, &prefix).await?)?;
            } else {
                out.rows(&lookup.registered(&ctx, &prefix).await?)?;
            }
        }
        Commands::Imports => out.rows(&lookup.zone_imports(&ctx).await?)?,
        Commands::Backlog { days } => {
            let backlog = lookup.import_backlog(&ctx, days).await?;
            if out.csv {
                out.rows(&backlog.days)?;
            } else {
                out.value(&backlog)?;
            }
        }
        Commands::TopNameservers { limit } => out.rows(&lookup.top_nameservers(&ctx, limit).await?)?,
        Commands::Search { name } => out.value(&lookup.search(&ctx, &name).await?)?,
        Commands::ActiveIps { date, limit } => out.rows(&lookup.active_addresses(&ctx, &date, limit).await?)?,
        Commands::IpZones { address } => out.rows(&lookup.address_zone_share(&ctx, &address).await?)?,
        Commands::Cidr { block, limit } => out.rows(&lookup.addresses_in_prefix(&ctx, &block, limit).await?)?,
    }
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "request done");
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<HistoryError>() {
        Some(HistoryError::NotFound { .. }) => 3,
        Some(HistoryError::Validation(_)) => 2,
        Some(HistoryError::Transient { .. }) => 75,
        _ => 1,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        print_version();
        return ExitCode::SUCCESS;
    }

    let result = (|| -> Result<()> {
        let cfg = config::load_config(cli.config.as_deref())?;
        let store = Store::open(cfg.store_config(cli.db.clone()))?;
        let lookup = Lookup::new(store, cfg.lookup_config(), cfg.feed_config());
        let ctx = QueryCtx::with_timeout(cfg.request_timeout());
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(run(cli, lookup, ctx))
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonetrail_core::{EntityClass, TransientKind};

    #[test]
    fn cli_parses_feed_arguments() {
        let cli = Cli::try_parse_from(["zonetrail", "--format", "jsonl", "feed", "2020-01-01", "--kind", "moved", "--class", "nameserver"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Jsonl);
        match cli.command {
            Commands::Feed { date, kind, class } => {
                assert_eq!(date, "2020-01-01");
                assert_eq!(ChangeKind::from(kind), ChangeKind::Moved);
                assert_eq!(FeedClass::from(class), FeedClass::NameServer);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn zone_and_by_zone_conflict() {
        assert!(Cli::try_parse_from(["zonetrail", "history", "--zone", "com", "--by-zone"]).is_err());
    }

    #[test]
    fn exit_codes_follow_error_class() {
        let nf: anyhow::Error = HistoryError::not_found(EntityClass::Domain, "X.COM").into();
        assert_eq!(exit_code(&nf), 3);
        let v: anyhow::Error = HistoryError::validation("short").into();
        assert_eq!(exit_code(&v), 2);
        let t: anyhow::Error = HistoryError::transient(TransientKind::Timeout, "q").into();
        assert_eq!(exit_code(&t), 75);
        assert_eq!(exit_code(&anyhow::anyhow!("io")), 1);
    }
}
