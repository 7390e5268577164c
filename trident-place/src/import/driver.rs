//! Import driver
//!
//! Feeds member records to the placement engine strictly in ascending
//! activation order. The BFS frontier is only stable if no later-activated
//! member is placed before an earlier one, so ordering is enforced here
//! rather than trusted to the input file.
//!
//! Per-record failures are reported and skipped; only storage failures while
//! preparing the run abort it.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use trident_common::config::ImportConfig;
use trident_common::db::{Gateway, Member, MemberId, DEFAULT_MAX_PLACEMENT_ATTEMPTS};
use trident_common::{time, wallet};

use super::records::MemberRecord;
use super::referrals::ReferralChain;
use crate::db::members::{self, NewMember};
use crate::error::ImportError;
use crate::placement::{PlacementEngine, PlacementOutcome};
use crate::utils::retry_on_conflict;

/// Driver options
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Referrer values that start a new tree
    pub root_markers: Vec<String>,
    /// Sponsor used when a referrer cannot be resolved
    pub fallback_sponsor: Option<String>,
    /// Caller-level attempts per record on `PlacementConflict`
    pub max_placement_attempts: u32,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::from_config(&ImportConfig::default(), DEFAULT_MAX_PLACEMENT_ATTEMPTS)
    }
}

impl ImportOptions {
    /// Config file values win over the stored `max_placement_attempts` setting
    pub fn from_config(config: &ImportConfig, setting_attempts: i64) -> Self {
        let attempts = config
            .max_placement_attempts
            .unwrap_or_else(|| setting_attempts.clamp(1, u32::MAX as i64) as u32);

        Self {
            root_markers: config.root_markers.clone(),
            fallback_sponsor: config
                .fallback_sponsor
                .as_deref()
                .map(wallet::clean)
                .filter(|w| !w.is_empty())
                .map(str::to_string),
            max_placement_attempts: attempts.max(1),
        }
    }
}

/// What happened to one record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Created as the origin of a new tree
    Root { member_id: MemberId },
    /// Created (or recovered) and placed
    Placed {
        member_id: MemberId,
        placement: PlacementOutcome,
    },
    /// Wallet was already imported and placed
    AlreadyPresent { member_id: MemberId },
}

/// Record that was skipped, with the reason
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
    pub row: usize,
    pub activation_order: i64,
    pub wallet: String,
    pub reason: String,
}

/// Run summary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub total: usize,
    pub roots: usize,
    pub placed: usize,
    pub spillover: usize,
    pub already_present: usize,
    pub skipped: Vec<SkippedRecord>,
}

impl ImportReport {
    fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Root { .. } => self.roots += 1,
            RecordOutcome::Placed { placement, .. } => {
                self.placed += 1;
                if placement.is_spillover() {
                    self.spillover += 1;
                }
            }
            RecordOutcome::AlreadyPresent { .. } => self.already_present += 1,
        }
    }

    fn skip(&mut self, record: &MemberRecord, reason: &ImportError) {
        self.skipped.push(SkippedRecord {
            row: record.row,
            activation_order: record.activation_order,
            wallet: record.wallet.clone(),
            reason: reason.to_string(),
        });
    }
}

/// Where a sponsor was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SponsorSource {
    Direct,
    Chain,
    Fallback,
}

/// Import driver
pub struct ImportDriver {
    gateway: Arc<dyn Gateway>,
    engine: PlacementEngine,
    options: ImportOptions,
    chain: ReferralChain,
}

impl ImportDriver {
    pub fn new(gateway: Arc<dyn Gateway>, options: ImportOptions) -> Self {
        let engine = PlacementEngine::new(gateway.clone());
        Self {
            gateway,
            engine,
            options,
            chain: ReferralChain::new(),
        }
    }

    /// Referral chain used to climb past referrers that are not members
    pub fn with_chain(mut self, chain: ReferralChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn engine(&self) -> &PlacementEngine {
        &self.engine
    }

    /// Import `records`, sorted into ascending activation order first
    pub async fn run(&self, mut records: Vec<MemberRecord>) -> trident_common::Result<ImportReport> {
        records.sort_by_key(|r| r.activation_order);

        let mut report = ImportReport {
            total: records.len(),
            ..Default::default()
        };
        let mut stored_max = members::max_activation_order(self.gateway.as_ref()).await?;
        let mut seen_orders = HashSet::new();

        info!(
            records = records.len(),
            stored_max = ?stored_max,
            chain = self.chain.len(),
            "Starting import"
        );

        for record in &records {
            if !seen_orders.insert(record.activation_order) {
                let err = ImportError::DuplicateActivation(record.activation_order);
                warn!(row = record.row, wallet = %wallet::abbreviate(&record.wallet), error = %err, "Skipping record");
                report.skip(record, &err);
                continue;
            }

            match self.import_record(record, stored_max).await {
                Ok(outcome) => {
                    if !matches!(outcome, RecordOutcome::AlreadyPresent { .. }) {
                        stored_max = Some(stored_max.map_or(record.activation_order, |m| m.max(record.activation_order)));
                    }
                    report.record(&outcome);
                }
                Err(err) => {
                    warn!(
                        row = record.row,
                        activation = record.activation_order,
                        wallet = %wallet::abbreviate(&record.wallet),
                        error = %err,
                        "Skipping record"
                    );
                    report.skip(record, &err);
                }
            }
        }

        info!(
            total = report.total,
            roots = report.roots,
            placed = report.placed,
            spillover = report.spillover,
            already_present = report.already_present,
            skipped = report.skipped.len(),
            "Import finished"
        );

        Ok(report)
    }

    /// Import a single record
    pub async fn import_record(
        &self,
        record: &MemberRecord,
        stored_max: Option<i64>,
    ) -> Result<RecordOutcome, ImportError> {
        let gateway = self.gateway.as_ref();

        if let Some(existing) = members::find_by_wallet(gateway, &record.wallet).await? {
            if existing.activation_order != record.activation_order {
                return Err(ImportError::WalletReused {
                    wallet: existing.wallet,
                    activation_order: record.activation_order,
                    stored_activation: existing.activation_order,
                });
            }
            if existing.is_placed() {
                debug!(member = %existing.id, "Wallet already imported");
                return Ok(RecordOutcome::AlreadyPresent {
                    member_id: existing.id,
                });
            }

            // Created by an earlier run whose placement failed; it may only
            // go in while nothing activated after it is placed
            if let Some(placed_max) = members::max_placed_activation_order(gateway).await? {
                if existing.activation_order <= placed_max {
                    return Err(ImportError::OutOfOrder {
                        activation_order: existing.activation_order,
                        stored_max: placed_max,
                    });
                }
            }
            let sponsor = self.resolve_sponsor(record).await?;
            let placement = self.place_with_retry(sponsor.id, existing.id).await?;
            return Ok(RecordOutcome::Placed {
                member_id: existing.id,
                placement,
            });
        }

        if let Some(stored_max) = stored_max {
            if record.activation_order <= stored_max {
                return Err(ImportError::OutOfOrder {
                    activation_order: record.activation_order,
                    stored_max,
                });
            }
        }

        let joined_at = time::join_time_or_fallback(record.joined_at.as_deref(), record.activation_order);
        let mut new_member = NewMember {
            wallet: wallet::clean(&record.wallet).to_string(),
            activation_order: record.activation_order,
            joined_at_ms: time::to_millis(joined_at),
            is_root: false,
        };

        if record.is_root(&self.options.root_markers) {
            new_member.is_root = true;
            let member_id = members::create_member(gateway, &new_member).await?;
            info!(member = %member_id, wallet = %wallet::abbreviate(&record.wallet), "Created root member");
            return Ok(RecordOutcome::Root { member_id });
        }

        // Resolve before creating so an unresolvable record leaves nothing behind
        let sponsor = self.resolve_sponsor(record).await?;
        let member_id = members::create_member(gateway, &new_member).await?;
        let placement = self.place_with_retry(sponsor.id, member_id).await?;

        Ok(RecordOutcome::Placed {
            member_id,
            placement,
        })
    }

    async fn place_with_retry(
        &self,
        sponsor_id: MemberId,
        member_id: MemberId,
    ) -> Result<PlacementOutcome, ImportError> {
        let placement = retry_on_conflict("place member", self.options.max_placement_attempts, || {
            self.engine.place(sponsor_id, member_id)
        })
        .await?;
        Ok(placement)
    }

    /// Resolve the record's referrer to a placed member
    async fn resolve_sponsor(&self, record: &MemberRecord) -> Result<Member, ImportError> {
        let gateway = self.gateway.as_ref();
        let referrer = wallet::clean(&record.referrer);

        let mut candidates: Vec<(String, SponsorSource)> = Vec::new();
        if !referrer.is_empty() {
            candidates.push((referrer.to_string(), SponsorSource::Direct));
            candidates.extend(
                self.chain
                    .ancestors(referrer)
                    .into_iter()
                    .map(|w| (w, SponsorSource::Chain)),
            );
        }
        if let Some(fallback) = &self.options.fallback_sponsor {
            candidates.push((fallback.clone(), SponsorSource::Fallback));
        }

        for (candidate, source) in candidates {
            if wallet::same(&candidate, &record.wallet) {
                continue;
            }
            if let Some(member) = members::find_by_wallet(gateway, &candidate).await? {
                if member.is_placed() {
                    if source != SponsorSource::Direct {
                        debug!(
                            wallet = %wallet::abbreviate(&record.wallet),
                            referrer = %wallet::abbreviate(referrer),
                            sponsor = %wallet::abbreviate(&member.wallet),
                            source = ?source,
                            "Referrer resolved indirectly"
                        );
                    }
                    return Ok(member);
                }
            }
        }

        Err(ImportError::UnknownSponsor {
            referrer: referrer.to_string(),
        })
    }
}
