//! Import driver and its inputs

pub mod driver;
pub mod records;
pub mod referrals;

pub use driver::{ImportDriver, ImportOptions, ImportReport, RecordOutcome, SkippedRecord};
pub use records::{load_records, load_records_from_path, InvalidRow, LoadedRecords, MemberRecord};
pub use referrals::{resolve_referrals, ReferralChain, ReferralSource, ResolvedReferral};
