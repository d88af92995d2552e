//! Fraud Engine for P2P payments
//!
//! Real-time transaction risk assessment: weighted signal scoring, a
//! configurable pattern/rule engine, device trust tracking, and alert and
//! analytics bookkeeping.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod alerts;
pub mod analytics;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod factors;
pub mod history;
pub mod metrics;
pub mod patterns;
pub mod scoring;
pub mod types;

pub use alerts::{AlertEvent, AlertManager, AlertStatus, FraudAlert, Resolution, ResolutionAction};
pub use analytics::{AnalyticsAggregator, AnalyticsSnapshot};
pub use config::EngineConfig;
pub use device::{
    DeviceRecord, DeviceScorer, DeviceStore, DeviceTrustRegistry, InMemoryDeviceStore,
};
pub use engine::{FraudEngine, FraudEngineBuilder};
pub use error::{Error, Result};
pub use history::{HistoryProvider, HistorySummary, HistoryWindow, InMemoryHistory, UserHistory};
pub use patterns::{Condition, FraudPattern, FraudRule, PatternEngine};
pub use scoring::{DecisionPolicy, RiskScorer};
pub use types::*;
