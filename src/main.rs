use std::path::PathBuf;

use clap::{Parser, Subcommand};
use committee_sync::config::{CrmSettings, SyncConfig};
use committee_sync::context::SyncContext;
use committee_sync::crm::CrmApi;
use committee_sync::crm::dry_run::DryRun;
use committee_sync::crm::memory::InMemoryCrm;
use committee_sync::crm::rest::RestClient;
use committee_sync::io::{excel_read, excel_write};
use committee_sync::model::Roster;
use committee_sync::sync::{SyncReport, Syncer};
use committee_sync::tools::{CrmGroups, CrmIdTracker};
use committee_sync::{Result, SyncError};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    init_logging(cli.log_level.as_deref())?;
    match cli.command {
        Command::Probe(args) => execute_probe(args),
        Command::Sync(args) => execute_sync(args),
    }
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).map_err(|error| SyncError::Logging(error.to_string()))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|error| SyncError::Logging(error.to_string()))
}

fn execute_probe(args: ProbeArgs) -> Result<()> {
    let report = excel_read::probe_workbook(&args.input)?;
    for sheet in &report.sheets {
        println!("found sheet '{sheet}'");
    }
    for sheet in &report.missing_optional {
        println!("optional sheet '{sheet}' missing");
    }
    if !report.is_importable() {
        return Err(SyncError::InvalidWorkbook(format!(
            "missing sheets: {}",
            report.missing_required.join(", ")
        )));
    }
    println!("{} can be imported", args.input.display());
    Ok(())
}

fn execute_sync(args: SyncArgs) -> Result<()> {
    if !args.input.exists() {
        return Err(SyncError::MissingInput(args.input));
    }

    let mut config = match &args.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    args.apply_overrides(&mut config.crm);

    let roster = excel_read::read_roster(&args.input)?;

    let report = match &args.snapshot {
        Some(path) => {
            let crm = InMemoryCrm::load(path)?;
            let report = run_against(&crm, &config, &roster, args.dry_run)?;
            if !args.dry_run {
                crm.save(path)?;
                info!(snapshot = %path.display(), "saved CRM snapshot");
            }
            report
        }
        None => {
            let client = RestClient::new(&config.crm)?;
            run_against(&client, &config, &roster, args.dry_run)?
        }
    };

    if let Some(path) = &args.plan_output {
        excel_write::write_plan(path, &report.diff)?;
        info!(output = %path.display(), "wrote membership plan");
    }

    println!(
        "committees: {} found, {} created",
        report.committees_found, report.committees_created
    );
    println!(
        "persons: {} created, {} updated, {} failed",
        report.persons_created, report.persons_updated, report.persons_failed
    );
    println!(
        "memberships: {} new, {} changed, {} obsolete ({} skipped, {} collapsed)",
        report.diff.new.len(),
        report.diff.changed.len(),
        report.diff.obsolete.len(),
        report.applied.skipped,
        report.applied.collapsed
    );
    Ok(())
}

fn run_against<A: CrmApi>(
    api: A,
    config: &SyncConfig,
    roster: &Roster,
    dry_run: bool,
) -> Result<SyncReport> {
    if !dry_run {
        return sync_with(&api, config, roster);
    }
    let dry = DryRun::new(api);
    let report = sync_with(&dry, config, roster)?;
    info!(
        planned_writes = dry.planned_writes().len(),
        "dry run complete, nothing was written"
    );
    Ok(report)
}

fn sync_with(api: &dyn CrmApi, config: &SyncConfig, roster: &Roster) -> Result<SyncReport> {
    let tracker = CrmIdTracker::new(api, config.tracker.clone());
    let groups = CrmGroups::new(api);
    let syncer = Syncer::new(api, &tracker, &groups, config);
    syncer.sync(roster, &mut SyncContext::new())
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Synchronise committee rosters from spreadsheet exports into a CRM."
)]
struct Cli {
    /// Log filter, e.g. `info` or `committee_sync=debug`. Defaults to
    /// `RUST_LOG`, then `info`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that a workbook has the expected sheets.
    Probe(ProbeArgs),
    /// Import a workbook and reconcile the CRM with it.
    Sync(SyncArgs),
}

#[derive(clap::Args)]
struct ProbeArgs {
    /// Workbook to check.
    #[arg(long)]
    input: PathBuf,
}

#[derive(clap::Args)]
struct SyncArgs {
    /// Session workbook to import.
    #[arg(long)]
    input: PathBuf,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read from the CRM but only log the writes.
    #[arg(long)]
    dry_run: bool,

    /// Run against a JSON snapshot instead of a live CRM. The file is created
    /// when missing and updated after the run.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Write the planned membership changes to this workbook.
    #[arg(long)]
    plan_output: Option<PathBuf>,

    /// REST endpoint of the CRM.
    #[arg(long, env = "CRM_URL")]
    crm_url: Option<String>,

    #[arg(long, env = "CRM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "CRM_SITE_KEY", hide_env_values = true)]
    site_key: Option<String>,
}

impl SyncArgs {
    fn apply_overrides(&self, crm: &mut CrmSettings) {
        if let Some(url) = &self.crm_url {
            crm.url = url.clone();
        }
        if let Some(api_key) = &self.api_key {
            crm.api_key = api_key.clone();
        }
        if let Some(site_key) = &self.site_key {
            crm.site_key = site_key.clone();
        }
    }
}
