//! trident-place - Member placement tool
//!
//! Imports member exports into ternary placement trees and inspects the
//! result. Audit and referral resolution work on CSV files alone; import,
//! verify and show open the database in the resolved root folder.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trident_common::config::{self, TridentConfig};
use trident_common::db::{ClosureEntry, Gateway, Member, Placement, SqliteGateway};
use trident_common::{time, wallet};

use trident_place::audit::{audit_records, write_missing_sponsors_csv, write_resolved_referrals_csv};
use trident_place::db::members;
use trident_place::import::{
    load_records_from_path, resolve_referrals, ImportDriver, ImportOptions, LoadedRecords, ReferralChain,
};
use trident_place::ClosureIndex;

/// Command-line arguments for trident-place
#[derive(Parser, Debug)]
#[command(name = "trident-place")]
#[command(about = "Ternary placement of referred members")]
#[command(version)]
struct Args {
    /// Data folder holding trident.db (overrides TRIDENT_ROOT_FOLDER and the config file)
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// Config file (default: platform config dir, then /etc/trident)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a member export in activation order
    Import {
        /// Member CSV export
        csv: PathBuf,

        /// Full members export used to climb past unknown referrers
        #[arg(long)]
        chain: Option<PathBuf>,

        /// Write the import report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check an export for duplicate wallets and missing sponsors
    Audit {
        csv: PathBuf,

        /// Write missing sponsors to this CSV
        #[arg(long)]
        missing_out: Option<PathBuf>,
    },

    /// Rewrite referrers to the nearest ancestor present in the export
    ResolveReferrals {
        csv: PathBuf,

        /// Full members export providing the referral chain
        #[arg(long)]
        chain: PathBuf,

        /// Wallet used when no ancestor is present
        #[arg(long)]
        fallback: Option<String>,

        #[arg(long)]
        out: PathBuf,
    },

    /// Recompute the closure index from placements and compare
    Verify,

    /// Show a member's placement, sponsor, ancestors and children
    Show {
        wallet: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trident_place=info,trident_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting trident-place v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let config = config::load_config(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Command::Import { csv, chain, report } => {
            let gateway = open(&args.root_folder, &config).await?;
            run_import(gateway, &config, &csv, chain.as_deref(), report.as_deref()).await
        }
        Command::Audit { csv, missing_out } => run_audit(&config, &csv, missing_out.as_deref()),
        Command::ResolveReferrals {
            csv,
            chain,
            fallback,
            out,
        } => run_resolve_referrals(&config, &csv, &chain, fallback, &out),
        Command::Verify => {
            let gateway = open(&args.root_folder, &config).await?;
            run_verify(gateway).await
        }
        Command::Show { wallet, json } => {
            let gateway = open(&args.root_folder, &config).await?;
            run_show(gateway, &wallet, json).await
        }
    }
}

async fn open(root_folder: &Option<PathBuf>, config: &TridentConfig) -> Result<Arc<SqliteGateway>> {
    let root = config::resolve_root_folder(root_folder.as_deref(), config);
    let db_path = config::prepare_root_folder(&root)
        .with_context(|| format!("Failed to create root folder {}", root.display()))?;
    info!("Database path: {}", db_path.display());

    trident_place::open_gateway(&db_path)
        .await
        .context("Failed to open database")
}

fn load(path: &Path) -> Result<LoadedRecords> {
    let loaded = load_records_from_path(path).with_context(|| format!("Failed to read {}", path.display()))?;
    for invalid in &loaded.invalid {
        warn!(row = invalid.row, wallet = %invalid.wallet, reason = %invalid.reason, "Invalid row");
    }
    Ok(loaded)
}

async fn run_import(
    gateway: Arc<SqliteGateway>,
    config: &TridentConfig,
    csv: &Path,
    chain: Option<&Path>,
    report_path: Option<&Path>,
) -> Result<()> {
    let loaded = load(csv)?;
    let attempts = trident_place::stored_placement_attempts(&gateway).await?;
    let options = ImportOptions::from_config(&config.import, attempts);

    let mut driver = ImportDriver::new(gateway, options);
    if let Some(chain_path) = chain {
        let chain_records = load(chain_path)?;
        driver = driver.with_chain(ReferralChain::from_records(&chain_records.records));
    }

    let report = driver.run(loaded.records).await?;

    println!(
        "Imported {} records: {} roots, {} placed ({} spillover), {} already present, {} skipped, {} invalid rows",
        report.total,
        report.roots,
        report.placed,
        report.spillover,
        report.already_present,
        report.skipped.len(),
        loaded.invalid.len()
    );
    for skipped in &report.skipped {
        println!("  row {} ({}): {}", skipped.row, skipped.wallet, skipped.reason);
    }

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}

fn run_audit(config: &TridentConfig, csv: &Path, missing_out: Option<&Path>) -> Result<()> {
    let loaded = load(csv)?;
    let report = audit_records(&loaded.records, &config.import.root_markers);

    println!("Total rows: {}", report.total_rows);
    println!("Unique wallets: {}", report.unique_wallets);
    println!("Duplicate wallets: {}", report.duplicates.len());
    for duplicate in &report.duplicates {
        println!("  {} at rows {:?}", duplicate.wallet, duplicate.rows);
    }
    println!("Records with missing sponsors: {}", report.missing_sponsors.len());
    for (sponsor, count) in report.missing_sponsor_counts.iter().take(10) {
        println!("  {}: {} record(s)", sponsor, count);
    }

    if let Some(path) = missing_out {
        let file = std::fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        write_missing_sponsors_csv(file, &report.missing_sponsors)?;
        println!("Missing sponsors written to {}", path.display());
    }

    Ok(())
}

fn run_resolve_referrals(
    config: &TridentConfig,
    csv: &Path,
    chain: &Path,
    fallback: Option<String>,
    out: &Path,
) -> Result<()> {
    let loaded = load(csv)?;
    let chain_records = load(chain)?;
    let chain = ReferralChain::from_records(&chain_records.records);
    let fallback = fallback.or_else(|| config.import.fallback_sponsor.clone());

    let resolved = resolve_referrals(&loaded.records, &chain, fallback.as_deref());

    let file = std::fs::File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
    write_resolved_referrals_csv(file, &resolved)?;

    println!("Resolved {} referrals into {}", resolved.len(), out.display());
    Ok(())
}

async fn run_verify(gateway: Arc<SqliteGateway>) -> Result<()> {
    let report = ClosureIndex::new(gateway).verify().await?;

    println!(
        "Checked {} members, {} placements, {} closure entries",
        report.members_checked, report.placements_checked, report.entries_checked
    );

    if report.is_consistent() {
        println!("Closure index is consistent");
        return Ok(());
    }

    println!("Missing entries: {}", report.missing.len());
    println!("Unexpected entries: {}", report.unexpected.len());
    println!("Wrong depths: {}", report.wrong_depth.len());
    println!("Over-capacity parents: {}", report.over_capacity.len());
    println!("Root mismatches: {}", report.root_mismatches.len());
    println!("Cycles: {}", report.cycles.len());
    bail!("closure index is inconsistent")
}

/// Everything `show` prints about a member
#[derive(Debug, Serialize)]
struct MemberView {
    member: Member,
    joined_at: String,
    sponsor_wallet: Option<String>,
    placement: Option<Placement>,
    ancestors: Vec<ClosureEntry>,
    children: Vec<Placement>,
    descendants: i64,
}

async fn run_show(gateway: Arc<SqliteGateway>, wallet_arg: &str, json: bool) -> Result<()> {
    let gateway: &dyn Gateway = &*gateway;
    let Some(member) = members::find_by_wallet(gateway, wallet_arg).await? else {
        bail!("no member with wallet {}", wallet::clean(wallet_arg));
    };

    let sponsor_wallet = match member.sponsor_id {
        Some(id) => members::load_member(gateway, id).await?.map(|m| m.wallet),
        None => None,
    };

    let view = MemberView {
        joined_at: time::from_millis(member.joined_at_ms).to_rfc3339(),
        sponsor_wallet,
        placement: members::parent_of(gateway, member.id).await?,
        ancestors: members::ancestors_of(gateway, member.id).await?,
        children: members::children_of(gateway, member.id).await?,
        descendants: members::descendant_count(gateway, member.id).await?,
        member,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Member {} ({})", view.member.id, view.member.wallet);
    println!("  activation: {}", view.member.activation_order);
    println!("  joined: {}", view.joined_at);
    match (view.member.is_root(), view.member.root_id) {
        (true, _) => println!("  root of its own tree"),
        (false, Some(root)) => println!("  tree root: {}", root),
        (false, None) => println!("  not placed"),
    }
    if let Some(sponsor) = &view.sponsor_wallet {
        println!("  sponsor: {}", sponsor);
    }
    if let Some(placement) = &view.placement {
        println!("  parent: {} position {}", placement.parent_id, placement.position);
    }
    for ancestor in &view.ancestors {
        println!("  ancestor at depth {}: {}", ancestor.depth, ancestor.ancestor_id);
    }
    for child in &view.children {
        println!("  child {} at position {}", child.child_id, child.position);
    }
    println!("  descendants: {}", view.descendants);

    Ok(())
}
