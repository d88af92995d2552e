//! Device trust registry
//!
//! Scores each device fingerprint from independent suspicion signals. The
//! score is a pure function of the fingerprint and the device's enrollment
//! state; only `last_seen` and `sightings` accumulate across sightings. Trust
//! is granted or revoked exclusively through [`DeviceTrustRegistry::enroll`]
//! and [`DeviceTrustRegistry::revoke`].

use crate::config::DeviceConfig;
use crate::types::DeviceFingerprint;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Independent suspicion signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSignal {
    /// Device not enrolled as trusted (always true at first sighting)
    UntrustedDevice,
    /// Browser missing or not in the known list
    UnrecognizedBrowser,
    /// OS missing or not in the known list
    UnrecognizedOs,
    /// Few cores or little memory
    LowEndHardware,
    /// Connection type missing or unrecognised
    UnresolvedNetwork,
    /// Interaction timing too regular for a human
    AutomatedInteraction,
}

impl DeviceSignal {
    /// Fixed score increment for this signal
    pub fn increment(&self, config: &DeviceConfig) -> f64 {
        match self {
            DeviceSignal::UntrustedDevice => config.untrusted_increment,
            DeviceSignal::UnrecognizedBrowser => config.unrecognized_browser_increment,
            DeviceSignal::UnrecognizedOs => config.unrecognized_os_increment,
            DeviceSignal::LowEndHardware => config.low_end_hardware_increment,
            DeviceSignal::UnresolvedNetwork => config.unresolved_network_increment,
            DeviceSignal::AutomatedInteraction => config.automation_increment,
        }
    }

    /// Snake-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceSignal::UntrustedDevice => "untrusted_device",
            DeviceSignal::UnrecognizedBrowser => "unrecognized_browser",
            DeviceSignal::UnrecognizedOs => "unrecognized_os",
            DeviceSignal::LowEndHardware => "low_end_hardware",
            DeviceSignal::UnresolvedNetwork => "unresolved_network",
            DeviceSignal::AutomatedInteraction => "automated_interaction",
        }
    }
}

/// Registry state for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Client-assigned device ID
    pub device_id: String,

    /// Fingerprint from the latest sighting
    pub fingerprint: DeviceFingerprint,

    /// Suspicion score (0-1)
    pub risk_score: f64,

    /// Signals behind the score
    pub signals: Vec<DeviceSignal>,

    /// Changed only by enrollment
    pub is_trusted: bool,

    /// First sighting
    pub first_seen: DateTime<Utc>,

    /// Latest sighting
    pub last_seen: DateTime<Utc>,

    /// Number of sightings
    pub sightings: u64,
}

/// Backing store for device records
///
/// Mutations are atomic per device id. `record_sighting` must never change
/// `is_trusted` on an existing record, and a stored record's score and
/// signals always match its stored trust.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Fetch a device record
    async fn get(&self, device_id: &str) -> Result<Option<DeviceRecord>>;

    /// Insert or merge a sighting. A sighting built under a different trust
    /// state than the stored one is rescored with `scorer`.
    async fn record_sighting(&self, record: DeviceRecord, scorer: &DeviceScorer) -> Result<()>;

    /// Set the enrollment flag and rescore, returning the updated record
    async fn set_trusted(
        &self,
        device_id: &str,
        trusted: bool,
        scorer: &DeviceScorer,
    ) -> Result<Option<DeviceRecord>>;

    /// Number of known devices
    async fn len(&self) -> Result<usize>;
}

/// In-memory device store
#[derive(Default)]
pub struct InMemoryDeviceStore {
    // Map: device_id -> DeviceRecord
    records: DashMap<String, DeviceRecord>,
}

impl InMemoryDeviceStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn get(&self, device_id: &str) -> Result<Option<DeviceRecord>> {
        Ok(self.records.get(device_id).map(|r| r.value().clone()))
    }

    async fn record_sighting(&self, record: DeviceRecord, scorer: &DeviceScorer) -> Result<()> {
        self.records
            .entry(record.device_id.clone())
            .and_modify(|existing| {
                existing.fingerprint = record.fingerprint.clone();
                if existing.is_trusted == record.is_trusted {
                    existing.risk_score = record.risk_score;
                    existing.signals = record.signals.clone();
                } else {
                    scorer.rescore(existing);
                }
                existing.last_seen = existing.last_seen.max(record.last_seen);
                existing.sightings += 1;
            })
            .or_insert(record);
        Ok(())
    }

    async fn set_trusted(
        &self,
        device_id: &str,
        trusted: bool,
        scorer: &DeviceScorer,
    ) -> Result<Option<DeviceRecord>> {
        Ok(self.records.get_mut(device_id).map(|mut entry| {
            entry.is_trusted = trusted;
            scorer.rescore(&mut entry);
            entry.clone()
        }))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

/// Signal detection and scoring for fingerprints
#[derive(Debug, Clone, Default)]
pub struct DeviceScorer {
    config: DeviceConfig,
}

impl DeviceScorer {
    /// Scorer with the given increments and thresholds
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    /// Signals present for a fingerprint given its enrollment state
    pub fn signals(&self, fingerprint: &DeviceFingerprint, trusted: bool) -> Vec<DeviceSignal> {
        let mut signals = Vec::new();

        if !trusted {
            signals.push(DeviceSignal::UntrustedDevice);
        }
        if !is_known(fingerprint.software.browser.as_deref(), &self.config.known_browsers) {
            signals.push(DeviceSignal::UnrecognizedBrowser);
        }
        if !is_known(fingerprint.software.os.as_deref(), &self.config.known_operating_systems) {
            signals.push(DeviceSignal::UnrecognizedOs);
        }
        if self.is_low_end(fingerprint) {
            signals.push(DeviceSignal::LowEndHardware);
        }
        let network_resolved = matches!(
            fingerprint.network.connection_type.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("wifi" | "cellular" | "ethernet")
        );
        if !network_resolved {
            signals.push(DeviceSignal::UnresolvedNetwork);
        }
        if self.looks_automated(&fingerprint.behavior.interaction_intervals_ms) {
            signals.push(DeviceSignal::AutomatedInteraction);
        }

        signals
    }

    /// Clamped sum of signal increments, rounded to two decimals
    pub fn score(&self, signals: &[DeviceSignal]) -> f64 {
        let total: f64 = signals.iter().map(|s| s.increment(&self.config)).sum();
        (total.clamp(0.0, 1.0) * 100.0).round() / 100.0
    }

    /// Recompute signals and score from the record's fingerprint and trust
    pub fn rescore(&self, record: &mut DeviceRecord) {
        record.signals = self.signals(&record.fingerprint, record.is_trusted);
        record.risk_score = self.score(&record.signals);
    }

    fn is_low_end(&self, fingerprint: &DeviceFingerprint) -> bool {
        let hw = &fingerprint.hardware;
        hw.cpu_cores.map_or(false, |c| c <= self.config.low_end_max_cores)
            || hw.memory_gb.map_or(false, |m| m <= self.config.low_end_max_memory_gb)
    }

    fn looks_automated(&self, intervals: &[f64]) -> bool {
        let samples: Vec<f64> = intervals.iter().copied().filter(|v| v.is_finite()).collect();
        if samples.len() < self.config.automation_min_samples {
            return false;
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        if mean <= 0.0 {
            return true;
        }
        let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        variance.sqrt() / mean < self.config.automation_max_variation
    }
}

/// Device trust registry
pub struct DeviceTrustRegistry {
    store: Arc<dyn DeviceStore>,
    scorer: DeviceScorer,
}

impl DeviceTrustRegistry {
    /// Create registry over a store
    pub fn new(store: Arc<dyn DeviceStore>, config: DeviceConfig) -> Self {
        Self {
            store,
            scorer: DeviceScorer::new(config),
        }
    }

    /// Signals present for a fingerprint given its enrollment state
    pub fn signals(&self, fingerprint: &DeviceFingerprint, trusted: bool) -> Vec<DeviceSignal> {
        self.scorer.signals(fingerprint, trusted)
    }

    /// Clamped sum of signal increments, rounded to two decimals
    pub fn score(&self, signals: &[DeviceSignal]) -> f64 {
        self.scorer.score(signals)
    }

    /// Build the record for this sighting from the previous one (if any).
    /// Pure: the store is not touched.
    pub fn observe(
        &self,
        fingerprint: &DeviceFingerprint,
        existing: Option<&DeviceRecord>,
        seen_at: DateTime<Utc>,
    ) -> DeviceRecord {
        let trusted = existing.map(|r| r.is_trusted).unwrap_or(false);
        let signals = self.signals(fingerprint, trusted);
        let risk_score = self.score(&signals);

        DeviceRecord {
            device_id: fingerprint.device_id.clone(),
            fingerprint: fingerprint.clone(),
            risk_score,
            signals,
            is_trusted: trusted,
            first_seen: existing.map(|r| r.first_seen).unwrap_or(seen_at),
            last_seen: seen_at,
            sightings: existing.map(|r| r.sightings + 1).unwrap_or(1),
        }
    }

    /// Look up a device
    pub async fn lookup(&self, device_id: &str) -> Result<Option<DeviceRecord>> {
        self.store.get(device_id).await
    }

    /// Persist a sighting built by [`observe`](Self::observe)
    pub async fn record(&self, record: DeviceRecord) -> Result<()> {
        if record.sightings == 1 {
            debug!("First sighting of device {}", record.device_id);
        }
        self.store.record_sighting(record, &self.scorer).await
    }

    /// Look up, rescore and persist a sighting; returns the score
    pub async fn upsert(&self, fingerprint: &DeviceFingerprint) -> Result<f64> {
        let existing = self.lookup(&fingerprint.device_id).await?;
        let record = self.observe(fingerprint, existing.as_ref(), Utc::now());
        let score = record.risk_score;
        self.record(record).await?;
        Ok(score)
    }

    /// Mark a device as trusted (external enrollment policy)
    pub async fn enroll(&self, device_id: &str) -> Result<DeviceRecord> {
        let record = self.set_trusted(device_id, true).await?;
        info!("Device {} enrolled as trusted", device_id);
        Ok(record)
    }

    /// Withdraw trust from a device
    pub async fn revoke(&self, device_id: &str) -> Result<DeviceRecord> {
        let record = self.set_trusted(device_id, false).await?;
        info!("Device {} trust revoked", device_id);
        Ok(record)
    }

    async fn set_trusted(&self, device_id: &str, trusted: bool) -> Result<DeviceRecord> {
        self.store
            .set_trusted(device_id, trusted, &self.scorer)
            .await?
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))
    }

    /// Number of known devices
    pub async fn len(&self) -> Result<usize> {
        self.store.len().await
    }
}

fn is_known(value: Option<&str>, known: &[String]) -> bool {
    match value {
        Some(v) => {
            let v = v.to_ascii_lowercase();
            known.iter().any(|k| v.contains(k.as_str()))
        }
        None => false,
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn registry() -> DeviceTrustRegistry {
        DeviceTrustRegistry::new(Arc::new(InMemoryDeviceStore::new()), DeviceConfig::default())
    }

    #[tokio::test]
    async fn test_first_sighting_untrusted() {
        let registry = registry();
        let score = registry.upsert(&nominal_fingerprint("dev-1")).await.unwrap();

        assert_eq!(score, 0.2);
        let record = registry.lookup("dev-1").await.unwrap().unwrap();
        assert!(!record.is_trusted);
        assert_eq!(record.signals, vec![DeviceSignal::UntrustedDevice]);
        assert_eq!(record.sightings, 1);
    }

    #[test]
    fn test_never_seen_device_gets_unknown_increment() {
        let registry = registry();
        let mut fp = nominal_fingerprint("dev-new");
        fp.software.browser = None;

        let record = registry.observe(&fp, None, Utc::now());
        assert!(record.signals.contains(&DeviceSignal::UntrustedDevice));
        assert!(record.risk_score >= DeviceConfig::default().untrusted_increment);
    }

    #[test]
    fn test_scripted_device_scores_high() {
        let registry = registry();
        let record = registry.observe(&scripted_fingerprint("bot"), None, Utc::now());

        assert_eq!(record.risk_score, 0.9);
        assert!(record.signals.contains(&DeviceSignal::AutomatedInteraction));
        assert!(record.signals.contains(&DeviceSignal::UnresolvedNetwork));
    }

    #[test]
    fn test_score_clamped() {
        let registry = registry();
        let mut fp = scripted_fingerprint("worst");
        fp.software.os = Some("TempleOS".to_string());
        fp.hardware.cpu_cores = Some(1);

        let record = registry.observe(&fp, None, Utc::now());
        assert_eq!(record.signals.len(), 6);
        assert_eq!(record.risk_score, 1.0);
    }

    #[tokio::test]
    async fn test_score_stateless_across_sightings() {
        let registry = registry();
        let fp = nominal_fingerprint("dev-2");

        let first = registry.upsert(&fp).await.unwrap();
        let second = registry.upsert(&fp).await.unwrap();
        assert_eq!(first, second);

        let record = registry.lookup("dev-2").await.unwrap().unwrap();
        assert_eq!(record.sightings, 2);
        assert!(record.last_seen >= record.first_seen);
    }

    #[tokio::test]
    async fn test_trust_only_via_enrollment() {
        let registry = registry();
        let fp = nominal_fingerprint("dev-3");
        registry.upsert(&fp).await.unwrap();

        // Repeated sightings never grant trust
        for _ in 0..5 {
            registry.upsert(&fp).await.unwrap();
        }
        assert!(!registry.lookup("dev-3").await.unwrap().unwrap().is_trusted);

        registry.enroll("dev-3").await.unwrap();
        assert_eq!(registry.upsert(&fp).await.unwrap(), 0.0);

        registry.revoke("dev-3").await.unwrap();
        assert_eq!(registry.upsert(&fp).await.unwrap(), 0.2);
    }

    #[tokio::test]
    async fn test_stale_sighting_keeps_enrollment() {
        let registry = registry();
        let fp = nominal_fingerprint("dev-4");
        registry.upsert(&fp).await.unwrap();

        // Sighting built before enrollment lands after it
        let stale = registry.observe(&fp, None, Utc::now());
        registry.enroll("dev-4").await.unwrap();
        registry.record(stale).await.unwrap();

        let record = registry.lookup("dev-4").await.unwrap().unwrap();
        assert!(record.is_trusted);
        assert_eq!(record.risk_score, 0.0);
        assert!(record.signals.is_empty());
        assert_eq!(record.sightings, 2);
    }

    #[tokio::test]
    async fn test_trust_change_rescores_stored_record() {
        let registry = registry();
        registry.upsert(&nominal_fingerprint("dev-5")).await.unwrap();

        let enrolled = registry.enroll("dev-5").await.unwrap();
        assert_eq!(enrolled.risk_score, 0.0);
        assert!(enrolled.signals.is_empty());

        let revoked = registry.revoke("dev-5").await.unwrap();
        assert_eq!(revoked.risk_score, 0.2);
        assert_eq!(revoked.signals, vec![DeviceSignal::UntrustedDevice]);
    }

    #[tokio::test]
    async fn test_enroll_unknown_device() {
        let registry = registry();
        assert!(matches!(
            registry.enroll("ghost").await,
            Err(Error::DeviceNotFound(_))
        ));
        assert_eq!(registry.len().await.unwrap(), 0);
    }
}
