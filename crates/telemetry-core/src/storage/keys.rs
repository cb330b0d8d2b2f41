//! Persisted key names.

/// `[epoch_secs, month, year]` of the last scheduled usage ping.
pub const DAU_LAST_LAUNCH_INFO: &str = "dau.last_launch_info";
/// Monday of the installation week, `YYYY-MM-DD`.
pub const DAU_WEEK_OF_INSTALLATION: &str = "dau.week_of_installation";

/// `false` once the first-run referral lookup has completed.
pub const URP_LOOKUP_OUTSTANDING: &str = "urp.lookup_outstanding";
pub const URP_DOWNLOAD_ID: &str = "urp.download_id";
pub const URP_REFERRAL_CODE: &str = "urp.referral_code";
pub const URP_REFERRAL_CODE_DELETE_AT: &str = "urp.referral_code_delete_at";
pub const URP_NEXT_CHECK_AT: &str = "urp.next_check_at";
pub const URP_RETRY_COUNT: &str = "urp.retry_count";

pub const CUSTOM_HEADER_RULES: &str = "custom_headers.rules";
