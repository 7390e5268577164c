//! Member records loaded from CSV exports
//!
//! Exports come from several spreadsheets with different headers, so headers
//! are normalised and matched against a list of accepted names per field.

use std::io::Read;
use std::path::Path;

use serde::Serialize;
use trident_common::wallet;

use crate::error::RecordsError;

const WALLET_COLUMNS: &[&str] = &["user_name", "wallet_address", "user_bep20_address", "wallet"];
const REFERRER_COLUMNS: &[&str] = &[
    "referrer_user_name",
    "referrer_wallet",
    "referal_address",
    "referral_address",
    "referrer",
];
const ACTIVATION_COLUMNS: &[&str] = &["activation_sequence", "activation_order", "no"];
const JOINED_COLUMNS: &[&str] = &["activation_time", "joined_at", "payment_datetime"];

/// One member row from an export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberRecord {
    /// Spreadsheet row number (header is row 1)
    pub row: usize,
    pub wallet: String,
    /// Referrer wallet as written; may be blank
    pub referrer: String,
    pub activation_order: i64,
    pub joined_at: Option<String>,
}

impl MemberRecord {
    /// Blank referrer, self-referral, or a configured root marker
    pub fn is_root(&self, root_markers: &[String]) -> bool {
        let referrer = self.referrer.trim();
        referrer.is_empty()
            || wallet::same(referrer, &self.wallet)
            || root_markers.iter().any(|m| wallet::same(m, referrer))
    }
}

/// Row that could not be turned into a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidRow {
    pub row: usize,
    pub wallet: String,
    pub reason: String,
}

/// Result of loading an export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedRecords {
    pub records: Vec<MemberRecord>,
    pub invalid: Vec<InvalidRow>,
}

/// Normalise a header cell: strip BOM, trim, lowercase, spaces/hyphens to `_`
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Load records from a CSV file
pub fn load_records_from_path(path: &Path) -> Result<LoadedRecords, RecordsError> {
    let file = std::fs::File::open(path)?;
    load_records(file)
}

/// Load records from CSV text.
///
/// Rows with a blank wallet are ignored. Without an activation column the
/// file order defines activation; a present but unparseable value makes the
/// row invalid.
pub fn load_records<R: Read>(reader: R) -> Result<LoadedRecords, RecordsError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(normalize_header).collect();
    let find = |aliases: &[&str]| aliases.iter().find_map(|a| headers.iter().position(|h| h == a));

    let wallet_idx = find(WALLET_COLUMNS).ok_or_else(|| RecordsError::MissingColumn(WALLET_COLUMNS.join(", ")))?;
    let referrer_idx = find(REFERRER_COLUMNS);
    let activation_idx = find(ACTIVATION_COLUMNS);
    let joined_idx = find(JOINED_COLUMNS);

    let mut loaded = LoadedRecords::default();

    for (idx, result) in csv_reader.records().enumerate() {
        let record = result?;
        let row = idx + 2;
        let cell = |i: Option<usize>| i.and_then(|i| record.get(i)).unwrap_or("").trim();

        let wallet = cell(Some(wallet_idx));
        if wallet.is_empty() {
            continue;
        }

        let activation_order = match activation_idx {
            None => (idx + 1) as i64,
            Some(_) => match cell(activation_idx).parse::<i64>() {
                Ok(value) => value,
                Err(_) => {
                    loaded.invalid.push(InvalidRow {
                        row,
                        wallet: wallet.to_string(),
                        reason: format!("invalid activation order {:?}", cell(activation_idx)),
                    });
                    continue;
                }
            },
        };

        let joined_at = Some(cell(joined_idx)).filter(|v| !v.is_empty()).map(str::to_string);

        loaded.records.push(MemberRecord {
            row,
            wallet: wallet.to_string(),
            referrer: cell(referrer_idx).to_string(),
            activation_order,
            joined_at,
        });
    }

    tracing::debug!(
        records = loaded.records.len(),
        invalid = loaded.invalid.len(),
        "Loaded member records"
    );

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("\u{feff}User Name"), "user_name");
        assert_eq!(normalize_header(" Referrer_User Name "), "referrer_user_name");
        assert_eq!(normalize_header("USER BEP20 ADDRESS"), "user_bep20_address");
        assert_eq!(normalize_header("Activation-Sequence"), "activation_sequence");
    }

    #[test]
    fn test_load_spreadsheet_export() {
        let csv = "User Name,Referrer_User Name,Activation sequence,Activation time\n\
                   0xRoot,,1,03/01/2025 10:00\n\
                   0xAlice,0xroot,2,\n\
                   ,0xroot,3,\n\
                   0xBob,0xAlice,x,\n";

        let loaded = load_records(csv.as_bytes()).unwrap();

        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].wallet, "0xRoot");
        assert_eq!(loaded.records[0].joined_at.as_deref(), Some("03/01/2025 10:00"));
        assert_eq!(loaded.records[1].referrer, "0xroot");
        assert_eq!(loaded.records[1].row, 3);
        assert!(loaded.records[1].joined_at.is_none());

        assert_eq!(loaded.invalid.len(), 1);
        assert_eq!(loaded.invalid[0].row, 5);
        assert_eq!(loaded.invalid[0].wallet, "0xBob");
    }

    #[test]
    fn test_load_members_table_dump() {
        let csv = "wallet_address,referrer_wallet,current_level,activation_sequence,activation_time\n\
                   0xA,0xB,3,10,2025-03-01 00:00:00\n";

        let loaded = load_records(csv.as_bytes()).unwrap();

        assert_eq!(loaded.records[0].activation_order, 10);
        assert_eq!(loaded.records[0].referrer, "0xB");
    }

    #[test]
    fn test_file_order_without_activation_column() {
        let csv = "USER BEP20 ADDRESS,REFERAL ADDRESS\n0xA,\n0xB,0xA\n";

        let loaded = load_records(csv.as_bytes()).unwrap();

        let orders: Vec<i64> = loaded.records.iter().map(|r| r.activation_order).collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[test]
    fn test_missing_wallet_column_is_error() {
        let err = load_records("foo,bar\n1,2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, RecordsError::MissingColumn(_)));
    }

    #[test]
    fn test_root_detection() {
        let markers = vec![String::new(), "root".to_string()];
        let mut record = MemberRecord {
            row: 2,
            wallet: "0xA".to_string(),
            referrer: String::new(),
            activation_order: 1,
            joined_at: None,
        };
        assert!(record.is_root(&markers));

        record.referrer = "0xa".to_string();
        assert!(record.is_root(&markers));

        record.referrer = "ROOT".to_string();
        assert!(record.is_root(&markers));

        record.referrer = "0xB".to_string();
        assert!(!record.is_root(&markers));
    }
}
