//! Referral chain resolution
//!
//! When a record's referrer is not itself a known member, the referral chain
//! (wallet → referrer, typically from a full members export) is climbed until
//! a known wallet is found. Climbing stops at blanks and loops.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use trident_common::wallet;

use super::records::MemberRecord;

/// Wallet → referrer map, keyed case-insensitively
#[derive(Debug, Clone, Default)]
pub struct ReferralChain {
    referrer_of: HashMap<String, String>,
}

impl ReferralChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from loaded records; blank referrers are not recorded
    pub fn from_records(records: &[MemberRecord]) -> Self {
        let mut chain = Self::new();
        for record in records {
            chain.insert(&record.wallet, &record.referrer);
        }
        chain
    }

    pub fn insert(&mut self, wallet: &str, referrer: &str) {
        let referrer = wallet::clean(referrer);
        if wallet::clean(wallet).is_empty() || referrer.is_empty() {
            return;
        }
        self.referrer_of.insert(wallet::key(wallet), referrer.to_string());
    }

    pub fn referrer_of(&self, wallet: &str) -> Option<&str> {
        self.referrer_of.get(&wallet::key(wallet)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.referrer_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.referrer_of.is_empty()
    }

    /// Referrers above `wallet`, nearest first, stopping at a blank or a repeat
    pub fn ancestors(&self, wallet: &str) -> Vec<String> {
        let mut seen = HashSet::from([wallet::key(wallet)]);
        let mut result = Vec::new();
        let mut current = wallet.to_string();

        while let Some(next) = self.referrer_of(&current) {
            if !seen.insert(wallet::key(next)) {
                break;
            }
            result.push(next.to_string());
            current = next.to_string();
        }

        result
    }
}

/// How a resolved referrer was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralSource {
    /// The record's own referrer is in the set
    Direct,
    /// Found by climbing the chain
    Climbed,
    /// Nothing in the chain matched
    Fallback,
}

/// Referrer rewritten to the nearest ancestor inside the record set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedReferral {
    #[serde(rename = "no")]
    pub activation_order: i64,
    pub wallet: String,
    pub referrer: Option<String>,
    pub source: ReferralSource,
}

/// For every record, find the nearest referrer (per its own referrer column,
/// then `chain`) that is itself one of `records`; otherwise use `fallback`.
pub fn resolve_referrals(
    records: &[MemberRecord],
    chain: &ReferralChain,
    fallback: Option<&str>,
) -> Vec<ResolvedReferral> {
    let present: HashSet<String> = records.iter().map(|r| wallet::key(&r.wallet)).collect();
    let fallback_key = fallback.map(wallet::key);

    records
        .iter()
        .map(|record| {
            let first = Some(wallet::clean(&record.referrer))
                .filter(|r| !r.is_empty())
                .or_else(|| chain.referrer_of(&record.wallet));

            let mut candidates: Vec<String> = Vec::new();
            if let Some(first) = first {
                candidates.push(first.to_string());
                candidates.extend(chain.ancestors(first));
            }

            let found = candidates.iter().enumerate().find_map(|(depth, candidate)| {
                let key = wallet::key(candidate);
                if Some(&key) == fallback_key.as_ref() || key == wallet::key(&record.wallet) {
                    // Reaching the fallback or looping back to self ends the climb
                    return Some(None);
                }
                present.contains(&key).then(|| Some((depth, candidate.clone())))
            });

            match found {
                Some(Some((depth, referrer))) => ResolvedReferral {
                    activation_order: record.activation_order,
                    wallet: record.wallet.clone(),
                    referrer: Some(referrer),
                    source: if depth == 0 {
                        ReferralSource::Direct
                    } else {
                        ReferralSource::Climbed
                    },
                },
                _ => ResolvedReferral {
                    activation_order: record.activation_order,
                    wallet: record.wallet.clone(),
                    referrer: fallback.map(str::to_string),
                    source: ReferralSource::Fallback,
                },
            }
        })
        .collect()
}
