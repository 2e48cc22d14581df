//! Admin CLI for the scanning platform: database lifecycle, config-hash
//! inspection, and on-demand maintenance/index operations that would
//! otherwise only run on the supervisor's own schedule.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qscan_httpclient::cache::{PersistentCacheStore, PostgresCacheStore};
use qscan_index::PostgresIndexCreator;
use qscan_maintenance::{CacheSweepConfig, JobHistoryConfig};
use qscan_schemas::IndexRule;

#[derive(Parser)]
#[command(name = "qscan")]
#[command(about = "Scanning platform admin CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database lifecycle
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },
    /// Compute the layered config hash and print the canonical JSON
    ConfigHash {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Job record administration
    Job {
        #[command(subcommand)]
        cmd: JobCmd,
    },
    /// Persistent cache administration
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },
    /// Index-rule administration
    Index {
        #[command(subcommand)]
        cmd: IndexCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum JobCmd {
    /// Counts of job records by status, plus the retention health report
    Status,
    /// Run the job-history retention sweep now
    Sweep,
}

#[derive(Subcommand)]
enum CacheCmd {
    Stats,
    /// Run the expired/oversize/orphan sweep now
    Sweep,
}

#[derive(Subcommand)]
enum IndexCmd {
    /// Apply index rules declared as a JSON array in the given file
    Apply {
        #[arg(long)]
        rules: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => run_db(cmd).await,
        Commands::ConfigHash { paths } => run_config_hash(paths),
        Commands::Job { cmd } => run_job(cmd).await,
        Commands::Cache { cmd } => run_cache(cmd).await,
        Commands::Index { cmd } => run_index(cmd).await,
    }
}

async fn run_db(cmd: DbCmd) -> Result<()> {
    let pool = qscan_db::connect_from_env().await?;
    match cmd {
        DbCmd::Status => {
            let s = qscan_db::status(&pool).await?;
            println!("db_ok={} has_job_records_table={}", s.ok, s.has_job_records_table);
        }
        DbCmd::Migrate => {
            qscan_db::migrate(&pool).await?;
            println!("migrations_applied=true");
        }
    }
    Ok(())
}

fn run_config_hash(paths: Vec<String>) -> Result<()> {
    let refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = qscan_config::load_layered_yaml(&refs)?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}

async fn run_job(cmd: JobCmd) -> Result<()> {
    let pool = qscan_db::connect_from_env().await?;
    match cmd {
        JobCmd::Status => {
            let report = qscan_maintenance::health_report(&pool, JobHistoryConfig::default()).await?;
            println!("total={}", report.total);
            for (status, count) in &report.by_status {
                println!("  {status}={count}");
            }
            println!("average_logs_per_record={:.1}", report.average_logs_per_record);
            println!("max_logs_per_record={}", report.max_logs_per_record);
            println!("status={:?}", report.status);
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
        }
        JobCmd::Sweep => {
            let report = qscan_maintenance::sweep_job_history(&pool, JobHistoryConfig::default()).await?;
            println!(
                "aged_out_deleted={} logs_trimmed={} total_cap_deleted={}",
                report.aged_out_deleted, report.logs_trimmed, report.total_cap_deleted
            );
        }
    }
    Ok(())
}

async fn run_cache(cmd: CacheCmd) -> Result<()> {
    let pool = qscan_db::connect_from_env().await?;
    let store: Arc<dyn PersistentCacheStore> = Arc::new(PostgresCacheStore::new(pool.clone()));
    match cmd {
        CacheCmd::Stats => {
            let stats = store.stats().await?;
            println!("entry_count={}", stats.entry_count);
        }
        CacheCmd::Sweep => {
            let report = qscan_maintenance::sweep_cache(&store, CacheSweepConfig::default()).await?;
            let orphans = qscan_maintenance::sweep_orphans(&pool).await?;
            println!(
                "expired_deleted={} over_count_deleted={} over_size_deleted={} orphans_deleted={}",
                report.expired_deleted, report.over_count_deleted, report.over_size_deleted, orphans
            );
        }
    }
    Ok(())
}

async fn run_index(cmd: IndexCmd) -> Result<()> {
    match cmd {
        IndexCmd::Apply { rules } => {
            let pool = qscan_db::connect_from_env().await?;
            let raw = std::fs::read_to_string(&rules).with_context(|| format!("reading {rules}"))?;
            let rules: Vec<IndexRule> = serde_json::from_str(&raw).context("rules file must be a JSON array of IndexRule")?;
            let creator = Arc::new(PostgresIndexCreator::new(pool.clone()));
            let report = qscan_index::apply_rules(&pool, creator, &rules, qscan_index::ApplyConfig::default()).await?;
            println!(
                "skipped_fast_path={} already_applied={} created={} failed={}",
                report.skipped_fast_path,
                report.already_applied,
                report.created,
                report.failed.len()
            );
            for (key, reason) in &report.failed {
                println!("  failed: {key}: {reason}");
            }
        }
    }
    Ok(())
}
