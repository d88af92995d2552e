//! Pattern/rule engine
//!
//! Patterns group weighted rules. Evaluation runs against an immutable
//! [`PatternSet`] snapshot taken when the assessment starts; administrative
//! updates swap in a new snapshot and never disturb evaluations in flight.
//! Trigger counters live outside the definitions, keyed by id, so they survive
//! pattern and rule updates.

pub mod condition;
pub mod library;

pub use condition::{Comparison, Condition, EvaluationFault, Field};
pub use library::default_patterns;

use crate::types::{AssessmentInput, FactorCategory, FraudFactor, RiskLevel};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Weighted condition within a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudRule {
    /// Unique across all patterns
    pub id: String,

    /// Display name
    pub name: String,

    /// Longer explanation
    #[serde(default)]
    pub description: String,

    /// Condition scored against each transaction
    pub condition: Condition,

    /// Contribution weight (0-1)
    pub weight: f64,

    /// Minimum condition score to trigger, in (0, 1]
    pub threshold: f64,

    /// Disabled rules are skipped
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl FraudRule {
    /// Enabled rule with the given condition
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        condition: Condition,
        weight: f64,
        threshold: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            condition,
            weight,
            threshold,
            enabled: true,
        }
    }

    /// Attach a description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidConfig("rule id must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.weight) {
            return Err(Error::InvalidConfig(format!(
                "rule {} weight must be within 0-1, got {}",
                self.id, self.weight
            )));
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "rule {} threshold must be within (0, 1], got {}",
                self.id, self.threshold
            )));
        }
        self.condition
            .validate()
            .map_err(|e| Error::InvalidConfig(format!("rule {}: {}", self.id, e)))
    }
}

/// Named group of rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudPattern {
    /// Unique pattern ID
    pub id: String,

    /// Display name
    pub name: String,

    /// Longer explanation
    #[serde(default)]
    pub description: String,

    /// Severity the pattern represents
    pub risk_level: RiskLevel,

    /// Category of the emitted factor
    #[serde(default = "behavioral_default")]
    pub category: FactorCategory,

    /// Inactive patterns are skipped
    #[serde(default = "enabled_default")]
    pub active: bool,

    /// Rules in evaluation order
    #[serde(default)]
    pub rules: Vec<FraudRule>,
}

fn behavioral_default() -> FactorCategory {
    FactorCategory::Behavioral
}

impl FraudPattern {
    /// Active behavioral pattern without rules
    pub fn new(id: impl Into<String>, name: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            risk_level,
            category: FactorCategory::Behavioral,
            active: true,
            rules: Vec::new(),
        }
    }

    /// Set the emitted factor category
    pub fn category(mut self, category: FactorCategory) -> Self {
        self.category = category;
        self
    }

    /// Attach a description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a rule
    pub fn rule(mut self, rule: FraudRule) -> Self {
        self.rules.push(rule);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidConfig("pattern id must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.id.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate rule id {} in pattern {}",
                    rule.id, self.id
                )));
            }
        }
        Ok(())
    }
}

/// Immutable view of the registered patterns
#[derive(Debug, Clone, Default)]
pub struct PatternSet(Arc<Vec<Arc<FraudPattern>>>);

impl PatternSet {
    /// Patterns in registration order
    pub fn iter(&self) -> impl Iterator<Item = &FraudPattern> {
        self.0.iter().map(|p| p.as_ref())
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No patterns registered
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Rule that fired during one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredRule {
    /// Rule ID
    pub rule_id: String,

    /// Condition score
    pub score: f64,
}

/// Pattern with at least one triggered rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Pattern ID
    pub pattern_id: String,

    /// Pattern display name
    pub pattern_name: String,

    /// Category of the emitted factor
    pub category: FactorCategory,

    /// Severity the pattern represents
    pub risk_level: RiskLevel,

    /// Rules that fired
    pub triggered: Vec<TriggeredRule>,

    /// Sum of weight × score over triggered rules
    pub score: f64,
}

impl PatternMatch {
    /// Factor named `pattern:<id>`
    pub fn to_factor(&self) -> FraudFactor {
        let mean = self.triggered.iter().map(|r| r.score).sum::<f64>()
            / self.triggered.len().max(1) as f64;

        let mut factor = FraudFactor::new(
            format!("pattern:{}", self.pattern_id),
            self.category,
            mean,
            (self.score * 100.0).min(100.0),
        )
        .with_evidence(format!("{} ({} risk)", self.pattern_name, self.risk_level));
        for rule in &self.triggered {
            factor = factor.with_evidence(format!("rule {} scored {:.2}", rule.rule_id, rule.score));
        }
        factor
    }
}

/// Rule that faulted during evaluation
#[derive(Debug, Clone)]
pub struct RuleFault {
    /// Pattern holding the rule
    pub pattern_id: String,

    /// Faulted rule
    pub rule_id: String,

    /// What went wrong
    pub fault: EvaluationFault,
}

impl From<RuleFault> for Error {
    fn from(fault: RuleFault) -> Self {
        Error::RuleEvaluation {
            rule_id: fault.rule_id,
            reason: fault.fault.to_string(),
        }
    }
}

/// Result of evaluating a pattern set
#[derive(Debug, Clone, Default)]
pub struct PatternEvaluation {
    /// Matches in registration order
    pub matches: Vec<PatternMatch>,
    /// Faulted rules, treated as not triggered
    pub faults: Vec<RuleFault>,
}

impl PatternEvaluation {
    /// One factor per matched pattern
    pub fn factors(&self) -> Vec<FraudFactor> {
        self.matches.iter().map(PatternMatch::to_factor).collect()
    }
}

#[derive(Default)]
struct TriggerStats {
    count: AtomicU64,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl TriggerStats {
    fn mark(&self, at: DateTime<Utc>) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last.lock();
        if last.map_or(true, |prev| prev < at) {
            *last = Some(at);
        }
    }

    fn read(&self) -> (u64, Option<DateTime<Utc>>) {
        (self.count.load(Ordering::Relaxed), *self.last.lock())
    }
}

/// Pattern definition plus counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSnapshot {
    /// Current definition
    pub pattern: FraudPattern,

    /// Times the pattern matched
    pub frequency: u64,

    /// Latest match
    pub last_detected: Option<DateTime<Utc>>,
}

/// Rule definition plus counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSnapshot {
    /// Owning pattern
    pub pattern_id: String,

    /// Current definition
    pub rule: FraudRule,

    /// Times the rule fired
    pub trigger_count: u64,

    /// Latest trigger
    pub last_triggered: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct PatternFile {
    #[serde(default)]
    patterns: Vec<FraudPattern>,
}

/// Pattern registry and evaluator
#[derive(Default)]
pub struct PatternEngine {
    patterns: RwLock<Arc<Vec<Arc<FraudPattern>>>>,

    // Map: rule_id -> stats
    rule_stats: DashMap<String, Arc<TriggerStats>>,

    // Map: pattern_id -> stats
    pattern_stats: DashMap<String, Arc<TriggerStats>>,
}

impl PatternEngine {
    /// Create empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with the built-in library registered
    pub fn with_defaults() -> Result<Self> {
        let engine = Self::new();
        for pattern in default_patterns() {
            engine.upsert_pattern(pattern)?;
        }
        Ok(engine)
    }

    /// Current definitions; cheap to take, unaffected by later updates
    pub fn snapshot(&self) -> PatternSet {
        PatternSet(Arc::clone(&self.patterns.read()))
    }

    /// Evaluate every active pattern in `set`
    pub fn evaluate(
        &self,
        set: &PatternSet,
        input: &AssessmentInput<'_>,
        at: DateTime<Utc>,
    ) -> PatternEvaluation {
        let mut evaluation = PatternEvaluation::default();

        for pattern in set.iter().filter(|p| p.active) {
            let mut triggered = Vec::new();
            let mut total = 0.0;

            for rule in pattern.rules.iter().filter(|r| r.enabled) {
                match rule.condition.evaluate(input) {
                    Ok(Some(score)) if score >= rule.threshold => {
                        total += rule.weight * score;
                        self.stats(&self.rule_stats, &rule.id).mark(at);
                        triggered.push(TriggeredRule {
                            rule_id: rule.id.clone(),
                            score,
                        });
                    }
                    Ok(_) => {}
                    Err(fault) => {
                        warn!(
                            pattern = %pattern.id,
                            rule = %rule.id,
                            "Rule faulted, treating as not triggered: {}",
                            fault
                        );
                        evaluation.faults.push(RuleFault {
                            pattern_id: pattern.id.clone(),
                            rule_id: rule.id.clone(),
                            fault,
                        });
                    }
                }
            }

            if triggered.is_empty() {
                continue;
            }

            self.stats(&self.pattern_stats, &pattern.id).mark(at);
            debug!(
                "Pattern {} matched ({} rules, score {:.2})",
                pattern.id,
                triggered.len(),
                total
            );
            evaluation.matches.push(PatternMatch {
                pattern_id: pattern.id.clone(),
                pattern_name: pattern.name.clone(),
                category: pattern.category,
                risk_level: pattern.risk_level,
                triggered,
                score: total,
            });
        }

        evaluation
    }

    /// All patterns with counters
    pub fn patterns(&self) -> Vec<PatternSnapshot> {
        self.snapshot()
            .iter()
            .map(|p| self.pattern_snapshot(p))
            .collect()
    }

    /// One pattern with counters
    pub fn pattern(&self, id: &str) -> Result<PatternSnapshot> {
        self.snapshot()
            .iter()
            .find(|p| p.id == id)
            .map(|p| self.pattern_snapshot(p))
            .ok_or_else(|| Error::PatternNotFound(id.to_string()))
    }

    /// Register or replace a pattern; replacement keeps its position
    pub fn upsert_pattern(&self, pattern: FraudPattern) -> Result<()> {
        pattern.validate()?;

        self.update(|patterns| {
            check_rule_ids_free(patterns, &pattern.id, pattern.rules.iter())?;
            let id = pattern.id.clone();
            match patterns.iter().position(|p| p.id == pattern.id) {
                Some(index) => {
                    patterns[index] = Arc::new(pattern);
                    info!("Pattern {} updated", id);
                }
                None => {
                    patterns.push(Arc::new(pattern));
                    info!("Pattern {} registered", id);
                }
            }
            Ok(())
        })
    }

    /// Activate or deactivate a pattern
    pub fn set_pattern_active(&self, id: &str, active: bool) -> Result<()> {
        self.update(|patterns| {
            let pattern = find_mut(patterns, id)?;
            pattern.active = active;
            info!("Pattern {} active = {}", id, active);
            Ok(())
        })
    }

    /// Remove a pattern; its counters are kept
    pub fn remove_pattern(&self, id: &str) -> Result<FraudPattern> {
        self.update(|patterns| {
            let index = patterns
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| Error::PatternNotFound(id.to_string()))?;
            let removed = patterns.remove(index);
            info!("Pattern {} removed", id);
            Ok(removed.as_ref().clone())
        })
    }

    /// All rules with counters, in registration order
    pub fn rules(&self) -> Vec<RuleSnapshot> {
        self.snapshot()
            .iter()
            .flat_map(|pattern| {
                pattern.rules.iter().map(move |rule| (pattern.id.clone(), rule))
            })
            .map(|(pattern_id, rule)| {
                let (trigger_count, last_triggered) = self.read_stats(&self.rule_stats, &rule.id);
                RuleSnapshot {
                    pattern_id,
                    rule: rule.clone(),
                    trigger_count,
                    last_triggered,
                }
            })
            .collect()
    }

    /// Replace a rule by id within a pattern, or append it
    pub fn update_rule(&self, pattern_id: &str, rule: FraudRule) -> Result<()> {
        rule.validate()?;

        self.update(|patterns| {
            check_rule_ids_free(patterns, pattern_id, std::iter::once(&rule))?;
            let pattern = find_mut(patterns, pattern_id)?;
            let rule_id = rule.id.clone();
            match pattern.rules.iter().position(|r| r.id == rule.id) {
                Some(index) => pattern.rules[index] = rule,
                None => pattern.rules.push(rule),
            }
            info!("Rule {} updated in pattern {}", rule_id, pattern_id);
            Ok(())
        })
    }

    /// Enable or disable a rule by id
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<()> {
        self.update(|patterns| {
            for pattern in patterns.iter_mut() {
                if let Some(index) = pattern.rules.iter().position(|r| r.id == rule_id) {
                    Arc::make_mut(pattern).rules[index].enabled = enabled;
                    info!("Rule {} enabled = {}", rule_id, enabled);
                    return Ok(());
                }
            }
            Err(Error::RuleNotFound(rule_id.to_string()))
        })
    }

    /// Load patterns from a TOML or JSON file (`[[patterns]]` / `{"patterns": [...]}`)
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));

        let file: PatternFile = if is_json {
            serde_json::from_str(&content).map_err(|e| {
                Error::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                Error::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
            })?
        };

        let count = file.patterns.len();
        for pattern in file.patterns {
            self.upsert_pattern(pattern)?;
        }
        info!("Loaded {} patterns from {}", count, path.display());
        Ok(count)
    }

    /// Copy-on-write update; the new set is published only on success
    fn update<T>(&self, apply: impl FnOnce(&mut Vec<Arc<FraudPattern>>) -> Result<T>) -> Result<T> {
        let mut guard = self.patterns.write();
        let mut next = guard.as_ref().clone();
        let out = apply(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }

    fn pattern_snapshot(&self, pattern: &FraudPattern) -> PatternSnapshot {
        let (frequency, last_detected) = self.read_stats(&self.pattern_stats, &pattern.id);
        PatternSnapshot {
            pattern: pattern.clone(),
            frequency,
            last_detected,
        }
    }

    fn stats(&self, map: &DashMap<String, Arc<TriggerStats>>, id: &str) -> Arc<TriggerStats> {
        if let Some(stats) = map.get(id) {
            return Arc::clone(stats.value());
        }
        Arc::clone(map.entry(id.to_string()).or_default().value())
    }

    fn read_stats(
        &self,
        map: &DashMap<String, Arc<TriggerStats>>,
        id: &str,
    ) -> (u64, Option<DateTime<Utc>>) {
        map.get(id).map(|s| s.read()).unwrap_or((0, None))
    }
}

fn find_mut<'a>(patterns: &'a mut [Arc<FraudPattern>], id: &str) -> Result<&'a mut FraudPattern> {
    patterns
        .iter_mut()
        .find(|p| p.id == id)
        .map(Arc::make_mut)
        .ok_or_else(|| Error::PatternNotFound(id.to_string()))
}

/// Rule ids must be unique across patterns other than `owner`
fn check_rule_ids_free<'a>(
    patterns: &[Arc<FraudPattern>],
    owner: &str,
    rules: impl Iterator<Item = &'a FraudRule>,
) -> Result<()> {
    let taken: HashSet<&str> = patterns
        .iter()
        .filter(|p| p.id != owner)
        .flat_map(|p| p.rules.iter().map(|r| r.id.as_str()))
        .collect();

    for rule in rules {
        if taken.contains(rule.id.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "rule id {} already used by another pattern",
                rule.id
            )));
        }
    }
    Ok(())
}
