//! Core types for the fraud engine

use crate::device::DeviceRecord;
use crate::history::UserHistory;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Scores at or above this value count as flagged
pub const FLAG_THRESHOLD: f64 = 30.0;

/// Risk score (0-100)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct RiskScore(f64);

impl RiskScore {
    /// Lowest possible score
    pub const MIN: f64 = 0.0;

    /// Highest possible score
    pub const MAX: f64 = 100.0;

    /// Create new risk score, clamped to 0-100 (NaN maps to 0)
    pub fn new(score: f64) -> Self {
        if score.is_nan() {
            return Self(Self::MIN);
        }
        Self(score.clamp(Self::MIN, Self::MAX))
    }

    /// Get raw score
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Risk level bin for this score
    pub fn level(&self) -> RiskLevel {
        RiskLevel::from_score(self.0)
    }

    /// Check if the score counts as flagged (>= 30)
    pub fn is_flagged(&self) -> bool {
        self.0 >= FLAG_THRESHOLD
    }
}

impl From<f64> for RiskScore {
    fn from(score: f64) -> Self {
        Self::new(score)
    }
}

impl From<RiskScore> for f64 {
    fn from(score: RiskScore) -> Self {
        score.0
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// [0, 30)
    Low,
    /// [30, 60)
    Medium,
    /// [60, 80)
    High,
    /// [80, 100]
    Critical,
}

impl RiskLevel {
    /// Half-open bins, the upper bin includes 100
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            RiskLevel::Critical
        } else if score >= 60.0 {
            RiskLevel::High
        } else if score >= 30.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// High and critical assessments raise alerts and need step-up
    pub fn is_elevated(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl From<RiskScore> for RiskLevel {
    fn from(score: RiskScore) -> Self {
        score.level()
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action recommended to the payment pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Proceed with settlement
    Approve,
    /// Proceed, queue for analyst review
    Review,
    /// Step-up verification before settlement
    RequireVerification,
    /// Generic decline
    Block,
}

impl RecommendedAction {
    /// Snake-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Approve => "approve",
            RecommendedAction::Review => "review",
            RecommendedAction::RequireVerification => "require_verification",
            RecommendedAction::Block => "block",
        }
    }

    /// Whether the pipeline must stop and wait (step-up or decline)
    pub fn interrupts(&self) -> bool {
        matches!(
            self,
            RecommendedAction::RequireVerification | RecommendedAction::Block
        )
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk factor category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorCategory {
    /// Amount and transaction shape
    Transaction,
    /// User behaviour (velocity, patterns)
    Behavioral,
    /// Device trust
    Device,
    /// Recipient or geography
    Location,
    /// Time of day
    Temporal,
    /// Network origin
    Network,
}

impl FactorCategory {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            FactorCategory::Transaction => "transaction",
            FactorCategory::Behavioral => "behavioral",
            FactorCategory::Device => "device",
            FactorCategory::Location => "location",
            FactorCategory::Temporal => "temporal",
            FactorCategory::Network => "network",
        }
    }
}

/// Atomic contributor to a risk score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudFactor {
    /// Factor name (e.g. "amount_anomaly", "pattern:card_testing")
    pub name: String,

    /// Category
    pub category: FactorCategory,

    /// Weight (0-1)
    pub weight: f64,

    /// Impact (0-100)
    pub impact: f64,

    /// Human-readable evidence
    pub evidence: Vec<String>,
}

impl FraudFactor {
    /// Create new factor, clamping weight and impact to their ranges
    pub fn new(name: impl Into<String>, category: FactorCategory, weight: f64, impact: f64) -> Self {
        Self {
            name: name.into(),
            category,
            weight: clamp_or_zero(weight, 0.0, 1.0),
            impact: clamp_or_zero(impact, 0.0, 100.0),
            evidence: Vec::new(),
        }
    }

    /// Attach evidence line
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }
}

fn clamp_or_zero(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// Kind of money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Person-to-person transfer
    P2pTransfer,
    /// Payment to a merchant
    MerchantPayment,
    /// Cash-out to an external account
    Withdrawal,
    /// Top-up from an external account
    Deposit,
    /// Refund of an earlier payment
    Refund,
}

/// Where the transaction originated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    /// Latitude in degrees
    pub latitude: Option<f64>,

    /// Longitude in degrees
    pub longitude: Option<f64>,

    /// ISO 3166-1 alpha-2
    pub country: Option<String>,

    /// City name
    pub city: Option<String>,

    /// Client IP
    pub ip_address: Option<IpAddr>,

    /// Offset of the user's local time from UTC
    pub utc_offset_minutes: Option<i32>,
}

/// Hardware profile reported by the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareProfile {
    /// Logical CPU cores
    pub cpu_cores: Option<u32>,

    /// Device memory in GB
    pub memory_gb: Option<f64>,

    /// Screen width in pixels
    pub screen_width: Option<u32>,

    /// Screen height in pixels
    pub screen_height: Option<u32>,
}

/// Software signature reported by the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareProfile {
    /// Browser name and version
    pub browser: Option<String>,

    /// Operating system
    pub os: Option<String>,

    /// Preferred language tag
    pub language: Option<String>,

    /// IANA timezone name
    pub timezone: Option<String>,
}

/// Network information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInfo {
    /// "wifi", "cellular", "ethernet"; anything else is unresolved
    pub connection_type: Option<String>,

    /// Client IP
    pub ip_address: Option<IpAddr>,
}

/// Behavioural signals captured during the session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehavioralSignals {
    /// Inter-keystroke / inter-tap intervals in milliseconds
    pub interaction_intervals_ms: Vec<f64>,
}

/// Device fingerprint as submitted with a transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFingerprint {
    /// Client-assigned device ID
    pub device_id: String,

    /// Hardware profile
    pub hardware: HardwareProfile,

    /// Software signature
    pub software: SoftwareProfile,

    /// Network information
    pub network: NetworkInfo,

    /// Session behaviour
    pub behavior: BehavioralSignals,
}

/// Immutable snapshot of an attempted money movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionContext {
    /// Transaction ID
    pub transaction_id: Uuid,

    /// Sending user
    pub user_id: String,

    /// Amount, positive
    pub amount: Decimal,

    /// ISO 4217 code
    pub currency: String,

    /// Transaction type
    pub transaction_type: TransactionType,

    /// Recipient user or merchant account
    pub recipient_id: String,

    /// Merchant, for payments
    #[serde(default)]
    pub merchant_id: Option<String>,

    /// Merchant category
    #[serde(default)]
    pub category: Option<String>,

    /// Transaction time
    pub timestamp: DateTime<Utc>,

    /// Origin location
    #[serde(default)]
    pub location: Location,

    /// Fingerprint, when the client sent one
    #[serde(default)]
    pub device: Option<DeviceFingerprint>,
}

impl TransactionContext {
    /// Check required fields; failures must be denied by the caller
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user_id is required".to_string()));
        }
        if self.recipient_id.trim().is_empty() {
            return Err(Error::InvalidInput("recipient_id is required".to_string()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(Error::InvalidInput(format!(
                "currency must be an ISO 4217 code, got {:?}",
                self.currency
            )));
        }
        if let Some(device) = &self.device {
            if device.device_id.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "device fingerprint without device_id".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Amount as f64 for ratio arithmetic
    pub fn amount_f64(&self) -> Option<f64> {
        self.amount.to_f64()
    }

    /// Hour of day in the user's local time (UTC when the offset is unknown)
    pub fn local_hour(&self) -> u32 {
        let offset = self.location.utc_offset_minutes.unwrap_or(0);
        (self.timestamp + Duration::minutes(offset as i64)).hour()
    }
}

/// Collaborators consulted during an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    /// Historical transaction summary provider
    History,
    /// Device trust registry store
    DeviceRegistry,
}

impl Collaborator {
    /// Snake-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Collaborator::History => "history",
            Collaborator::DeviceRegistry => "device_registry",
        }
    }
}

/// Off-hours window in local time, both bounds exclusive.
///
/// `start > end` wraps past midnight (22 → 6 is 23:00-05:59); `start < end`
/// stays within one day (1 → 5 is 02:00-04:59).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightWindow {
    /// Hours after this one are night
    pub start_hour: u32,
    /// Hours before this one are night
    pub end_hour: u32,
}

impl NightWindow {
    /// Create a window from its exclusive bounds
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self { start_hour, end_hour }
    }

    /// Whether a local hour falls inside the window
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour > self.end_hour {
            hour > self.start_hour || hour < self.end_hour
        } else {
            hour > self.start_hour && hour < self.end_hour
        }
    }

    /// Reject bounds outside 0-23 and empty windows
    pub fn validate(&self) -> Result<()> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(Error::InvalidConfig("night hours must be 0-23".to_string()));
        }
        if !(0..24).any(|hour| self.contains(hour)) {
            return Err(Error::InvalidConfig(format!(
                "night window {} -> {} contains no hour",
                self.start_hour, self.end_hour
            )));
        }
        Ok(())
    }
}

impl Default for NightWindow {
    fn default() -> Self {
        Self::new(22, 6)
    }
}

/// Everything the factor aggregator and rule interpreter read
#[derive(Debug, Clone, Copy)]
pub struct AssessmentInput<'a> {
    /// Transaction under assessment
    pub context: &'a TransactionContext,
    /// User history, `None` when unavailable
    pub history: Option<&'a UserHistory>,
    /// Device record after this sighting, `None` when unknown or unavailable
    pub device: Option<&'a DeviceRecord>,
    /// Off-hours window used by the temporal factor and `night_time` rules
    pub night: NightWindow,
}

impl<'a> AssessmentInput<'a> {
    /// Input with the default night window
    pub fn new(
        context: &'a TransactionContext,
        history: Option<&'a UserHistory>,
        device: Option<&'a DeviceRecord>,
    ) -> Self {
        Self {
            context,
            history,
            device,
            night: NightWindow::default(),
        }
    }

    /// Same input under another night window
    pub fn with_night(self, night: NightWindow) -> Self {
        Self { night, ..self }
    }

    /// Whether the transaction's local hour is inside the night window
    pub fn is_night(&self) -> bool {
        self.night.contains(self.context.local_hour())
    }
}

/// Risk assessment result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Assessment ID (referenced by alerts)
    pub assessment_id: Uuid,

    /// Transaction ID
    pub transaction_id: Uuid,

    /// Risk score
    pub risk_score: RiskScore,

    /// Risk level
    pub risk_level: RiskLevel,

    /// Confidence in the score (0-1)
    pub confidence: f64,

    /// Factors in evaluation order
    pub factors: Vec<FraudFactor>,

    /// Recommended pipeline action
    pub recommended_action: RecommendedAction,

    /// Step-up verification required
    pub verification_required: bool,

    /// amount * score / 100
    pub estimated_loss: Decimal,

    /// Wall time spent assessing, microseconds
    pub processing_time_us: u64,

    /// Collaborators that failed or timed out
    pub unavailable: Vec<Collaborator>,

    /// Alert raised for this assessment
    pub alert_id: Option<Uuid>,

    /// Assessment timestamp
    pub assessed_at: DateTime<Utc>,
}

impl RiskAssessment {
    /// Whether any collaborator signal was missing
    pub fn is_degraded(&self) -> bool {
        !self.unavailable.is_empty()
    }
}
