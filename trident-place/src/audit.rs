//! Pre-import audit of member exports
//!
//! Finds problems that would make records skip during import: wallets that
//! appear more than once and referrers that are not in the file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;

use serde::Serialize;
use trident_common::wallet;

use crate::import::{MemberRecord, ResolvedReferral};

/// Wallet appearing on several rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateWallet {
    pub wallet: String,
    pub rows: Vec<usize>,
}

/// Record whose referrer is not in the file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingSponsor {
    pub row: usize,
    pub member_wallet: String,
    pub missing_sponsor: String,
    pub activation_order: i64,
}

/// Audit summary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub total_rows: usize,
    pub unique_wallets: usize,
    pub duplicates: Vec<DuplicateWallet>,
    pub missing_sponsors: Vec<MissingSponsor>,
    /// Missing sponsor wallets with the number of records naming them, most frequent first
    pub missing_sponsor_counts: Vec<(String, usize)>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.missing_sponsors.is_empty()
    }
}

/// Audit loaded records. Wallet comparison is case-insensitive.
pub fn audit_records(records: &[MemberRecord], root_markers: &[String]) -> AuditReport {
    let mut rows_by_wallet: BTreeMap<String, (String, Vec<usize>)> = BTreeMap::new();
    for record in records {
        rows_by_wallet
            .entry(wallet::key(&record.wallet))
            .or_insert_with(|| (record.wallet.clone(), Vec::new()))
            .1
            .push(record.row);
    }

    let duplicates = rows_by_wallet
        .values()
        .filter(|(_, rows)| rows.len() > 1)
        .map(|(wallet, rows)| DuplicateWallet {
            wallet: wallet.clone(),
            rows: rows.clone(),
        })
        .collect();

    let known: HashSet<&String> = rows_by_wallet.keys().collect();
    let mut missing_sponsors = Vec::new();
    let mut counts: HashMap<String, (String, usize)> = HashMap::new();

    for record in records {
        if record.is_root(root_markers) {
            continue;
        }
        let key = wallet::key(&record.referrer);
        if known.contains(&key) {
            continue;
        }
        missing_sponsors.push(MissingSponsor {
            row: record.row,
            member_wallet: record.wallet.clone(),
            missing_sponsor: record.referrer.clone(),
            activation_order: record.activation_order,
        });
        counts
            .entry(key)
            .or_insert_with(|| (record.referrer.clone(), 0))
            .1 += 1;
    }

    let mut missing_sponsor_counts: Vec<(String, usize)> = counts.into_values().collect();
    missing_sponsor_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    AuditReport {
        total_rows: records.len(),
        unique_wallets: rows_by_wallet.len(),
        duplicates,
        missing_sponsors,
        missing_sponsor_counts,
    }
}

/// Export missing sponsors; the header is written even when there are none
pub fn write_missing_sponsors_csv<W: Write>(writer: W, missing: &[MissingSponsor]) -> Result<(), csv::Error> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(["row", "member_wallet", "missing_sponsor", "activation_order"])?;
    for entry in missing {
        csv_writer.serialize(entry)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Export resolved referrals (`no, wallet, referrer, source`)
pub fn write_resolved_referrals_csv<W: Write>(writer: W, resolved: &[ResolvedReferral]) -> Result<(), csv::Error> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(["no", "wallet", "referrer", "source"])?;
    for entry in resolved {
        csv_writer.serialize(entry)?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::ReferralSource;

    fn record(row: usize, wallet: &str, referrer: &str) -> MemberRecord {
        MemberRecord {
            row,
            wallet: wallet.to_string(),
            referrer: referrer.to_string(),
            activation_order: row as i64 - 1,
            joined_at: None,
        }
    }

    fn markers() -> Vec<String> {
        vec![String::new(), "root".to_string()]
    }

    #[test]
    fn test_duplicates_ignore_case() {
        let records = vec![record(2, "0xAA", ""), record(3, "0xbb", "0xaa"), record(4, "0xaa", "0xbb")];

        let report = audit_records(&records, &markers());

        assert_eq!(report.unique_wallets, 2);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].rows, vec![2, 4]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_missing_sponsors_counted() {
        let records = vec![
            record(2, "0xa", "root"),
            record(3, "0xb", "0xGhost"),
            record(4, "0xc", "0xghost"),
            record(5, "0xd", "0xOther"),
            record(6, "0xe", "0xA"),
        ];

        let report = audit_records(&records, &markers());

        assert_eq!(report.missing_sponsors.len(), 3);
        assert_eq!(report.missing_sponsor_counts[0], ("0xGhost".to_string(), 2));
        assert_eq!(report.missing_sponsor_counts[1], ("0xOther".to_string(), 1));
        assert!(report.duplicates.is_empty());
    }

    #[test]
    fn test_missing_sponsors_csv_has_header_when_empty() {
        let mut out = Vec::new();
        write_missing_sponsors_csv(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "row,member_wallet,missing_sponsor,activation_order\n");
    }

    #[test]
    fn test_resolved_referrals_csv() {
        let resolved = vec![ResolvedReferral {
            activation_order: 4,
            wallet: "0xd".to_string(),
            referrer: Some("0xb".to_string()),
            source: ReferralSource::Climbed,
        }];
        let mut out = Vec::new();
        write_resolved_referrals_csv(&mut out, &resolved).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "no,wallet,referrer,source\n4,0xd,0xb,climbed\n");
    }
}
