//! Transaction event structures consumed from the inbound stream.
//!
//! The wire format is the camelCase JSON emitted by the upstream publisher.
//! Profiles are optional: an absent profile simply disables the rules that
//! read it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Direction of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Trade,
}

/// A transaction event to be triaged, enriched with user, device, IP and
/// document profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    /// Unique transaction identifier.
    pub transaction_id: String,

    /// Account the transaction belongs to.
    pub user_id: String,

    /// Emission time. The publisher sends naive ISO timestamps, so parsing
    /// accepts both RFC 3339 and zone-less forms.
    #[serde(default = "Utc::now", deserialize_with = "flexible_time::deserialize")]
    pub timestamp: DateTime<Utc>,

    pub transaction_type: TransactionType,

    /// Monetary amount in `currency`.
    pub amount: f64,

    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_provider: Option<String>,

    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,

    #[serde(default)]
    pub user_profile: Option<UserProfile>,
    #[serde(default)]
    pub device_profile: Option<DeviceProfile>,
    #[serde(default)]
    pub ip_profile: Option<IpProfile>,
    #[serde(default)]
    pub document_profile: Option<DocumentProfile>,
    #[serde(default)]
    pub flags: Option<TransactionFlags>,
}

/// KYC and account-level attributes of the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,

    /// Monthly income the user declared at onboarding. Zero means undeclared.
    #[serde(default)]
    pub declared_monthly_income: f64,

    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub employment_status: Option<String>,
    #[serde(default)]
    pub source_of_funds: Option<String>,
    #[serde(default)]
    pub account_status: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub kyc_status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub account_created_at: Option<String>,
    #[serde(default)]
    pub total_deposits: f64,
    #[serde(default)]
    pub total_withdrawals: f64,
    #[serde(default)]
    pub transaction_count: i64,
    #[serde(default)]
    pub total_devices: i64,
}

/// Fingerprint of the device the transaction originated from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub browser_version: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub screen_resolution: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default)]
    pub emulator: bool,
    #[serde(default)]
    pub vpn: bool,
    #[serde(default)]
    pub proxy: bool,
    #[serde(default)]
    pub tor: bool,

    /// How many distinct users have been seen on this device.
    #[serde(default)]
    pub total_users_count: i64,
    #[serde(default)]
    pub flagged_users_count: i64,
}

/// Reputation of the originating IP address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpProfile {
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub asn: Option<String>,

    #[serde(default)]
    pub vpn: bool,
    #[serde(default)]
    pub proxy: bool,
    #[serde(default)]
    pub tor: bool,
    #[serde(default)]
    pub datacenter: bool,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub sanctioned_country: bool,
    #[serde(default)]
    pub high_risk_country: bool,

    #[serde(default)]
    pub risk_score: f64,
    #[serde(default)]
    pub total_users: i64,
    #[serde(default)]
    pub flagged_users: i64,
}

/// Outcome of identity-document verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentProfile {
    #[serde(default)]
    pub verification_status: Option<String>,
    /// Verification confidence in `[0,1]`; absent when no document was checked.
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub face_match_score: Option<f64>,
    #[serde(default)]
    pub document_quality_score: Option<f64>,
    #[serde(default)]
    pub forged: bool,
    #[serde(default)]
    pub ai_generated: bool,
    #[serde(default)]
    pub expired: bool,
}

/// Preset anomaly flags computed upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFlags {
    #[serde(default)]
    pub velocity_flag: bool,
    #[serde(default)]
    pub amount_anomaly_flag: bool,
    #[serde(default)]
    pub geographic_anomaly_flag: bool,
}

impl TransactionEvent {
    /// Create an event with the required fields; profiles start empty.
    pub fn new(
        transaction_id: impl Into<String>,
        user_id: impl Into<String>,
        transaction_type: TransactionType,
        amount: f64,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            transaction_type,
            amount,
            currency: None,
            payment_method: None,
            payment_provider: None,
            ip_address: None,
            device_id: None,
            country_code: None,
            user_profile: None,
            device_profile: None,
            ip_profile: None,
            document_profile: None,
            flags: None,
        }
    }

    /// Attach a user profile.
    pub fn with_user_profile(mut self, profile: UserProfile) -> Self {
        self.user_profile = Some(profile);
        self
    }

    /// Attach a device profile.
    pub fn with_device_profile(mut self, profile: DeviceProfile) -> Self {
        self.device_profile = Some(profile);
        self
    }

    /// Attach an IP profile.
    pub fn with_ip_profile(mut self, profile: IpProfile) -> Self {
        self.ip_profile = Some(profile);
        self
    }

    /// Attach a document profile.
    pub fn with_document_profile(mut self, profile: DocumentProfile) -> Self {
        self.document_profile = Some(profile);
        self
    }

    /// Attach preset anomaly flags.
    pub fn with_flags(mut self, flags: TransactionFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Compact summary of the transaction itself, used as case evidence.
    pub fn transaction_summary(&self) -> Map<String, Value> {
        let mut summary = Map::new();
        summary.insert("transaction_id".into(), json!(self.transaction_id));
        summary.insert("amount".into(), json!(self.amount));
        summary.insert("transaction_type".into(), json!(self.transaction_type));
        summary.insert("currency".into(), json!(self.currency));
        summary.insert("payment_method".into(), json!(self.payment_method));
        summary.insert("payment_provider".into(), json!(self.payment_provider));
        summary.insert("ip_address".into(), json!(self.ip_address));
        summary.insert("device_id".into(), json!(self.device_id));
        summary.insert("country_code".into(), json!(self.country_code));
        summary
    }

    /// User profile serialized as case evidence, empty when absent.
    pub fn identity_flags(&self) -> Map<String, Value> {
        profile_to_map(&self.user_profile)
    }

    /// IP profile serialized as case evidence, empty when absent.
    pub fn network_flags(&self) -> Map<String, Value> {
        profile_to_map(&self.ip_profile)
    }

    /// Preset anomaly flags serialized as case evidence, empty when absent.
    pub fn behavioral_flags(&self) -> Map<String, Value> {
        profile_to_map(&self.flags)
    }
}

fn profile_to_map<T: Serialize>(profile: &Option<T>) -> Map<String, Value> {
    match profile {
        Some(p) => match serde_json::to_value(p) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        None => Map::new(),
    }
}

mod flexible_time {
    //! The upstream publisher emits naive `isoformat()` timestamps; the
    //! dashboard and tests use RFC 3339. Accept both, assume UTC when the
    //! offset is missing.

    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp: {raw}")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_deserializes_camel_case() {
        let json = r#"{
            "transactionId": "TXN-001",
            "userId": "USR-42",
            "timestamp": "2026-07-01T10:15:30.123456",
            "transactionType": "DEPOSIT",
            "amount": 250.0,
            "currency": "USD",
            "ipProfile": {"sanctionedCountry": true, "countryCode": "IR"},
            "userProfile": {"declaredMonthlyIncome": 3000.0}
        }"#;

        let event: TransactionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.transaction_id, "TXN-001");
        assert_eq!(event.transaction_type, TransactionType::Deposit);
        assert!(event.ip_profile.as_ref().unwrap().sanctioned_country);
        assert_eq!(
            event.user_profile.as_ref().unwrap().declared_monthly_income,
            3000.0
        );
        assert!(event.device_profile.is_none());
    }

    #[test]
    fn test_timestamp_accepts_rfc3339() {
        use chrono::TimeZone;

        let json = r#"{
            "transactionId": "TXN-002",
            "userId": "USR-42",
            "timestamp": "2026-07-01T10:15:30Z",
            "transactionType": "TRADE",
            "amount": 10.0
        }"#;

        let event: TransactionEvent = serde_json::from_str(json).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 7, 1, 10, 15, 30).unwrap();
        assert_eq!(event.timestamp, expected);
    }

    #[test]
    fn test_event_round_trips() {
        let event = TransactionEvent::new("TXN-003", "USR-7", TransactionType::Withdrawal, 99.5)
            .with_ip_profile(IpProfile {
                vpn: true,
                high_risk_country: true,
                ..Default::default()
            });

        let json = serde_json::to_string(&event).unwrap();
        let back: TransactionEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(back.transaction_id, event.transaction_id);
        assert_eq!(back.transaction_type, event.transaction_type);
        assert!(back.ip_profile.unwrap().vpn);
    }

    #[test]
    fn test_evidence_maps() {
        let event = TransactionEvent::new("TXN-004", "USR-8", TransactionType::Deposit, 12.0)
            .with_flags(TransactionFlags {
                velocity_flag: true,
                ..Default::default()
            });

        let summary = event.transaction_summary();
        assert_eq!(summary["transaction_id"], json!("TXN-004"));
        assert_eq!(summary["amount"], json!(12.0));

        let behavioral = event.behavioral_flags();
        assert_eq!(behavioral["velocityFlag"], json!(true));

        // No user profile attached.
        assert!(event.identity_flags().is_empty());
    }
}
