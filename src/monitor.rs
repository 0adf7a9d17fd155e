//! Read-only compliance monitoring over keys and the usage log
//!
//! The monitor derives metrics, alerts, and periodic reports from the key
//! store and the append-only usage log. It never writes back into either;
//! acting on an alert is the caller's responsibility.

use crate::error::Result;
use crate::key::{KeyRecord, KeyStatus};
use crate::usage::CryptoOperation;
use crate::{CoverageSource, KeyStore, UsageLogStore};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const FAILED_ENCRYPTIONS_PER_HOUR: usize = 10;
const FAILED_DECRYPTIONS_PER_HOUR: usize = 3;
const OPS_PER_KEY_PER_DAY: u64 = 100;
const CRITICAL_OVERDUE_DAYS: i64 = 30;
const COVERAGE_ALERT_FLOOR: f64 = 0.8;
const COVERAGE_SCORE_FLOOR: f64 = 0.9;

/// A coverage source backed by fixed values
///
/// Field inventory lives with the record layer, outside this crate, so
/// coverage is injected. This implementation serves tests and deployments
/// that compute coverage out of band.
#[derive(Debug, Clone, Copy)]
pub struct StaticCoverageSource {
    coverage: f64,
    gaps: u32,
}

impl StaticCoverageSource {
    /// Creates a source reporting the given coverage fraction and audit
    /// gap count for every tenant
    pub fn new(coverage: f64, gaps: u32) -> Self {
        Self { coverage, gaps }
    }
}

impl Default for StaticCoverageSource {
    fn default() -> Self {
        Self::new(1.0, 0)
    }
}

#[async_trait]
impl CoverageSource for StaticCoverageSource {
    async fn encryption_coverage(&self, _tenant_id: &str) -> Result<f64> {
        Ok(self.coverage)
    }

    async fn audit_gaps(&self, _tenant_id: &str) -> Result<u32> {
        Ok(self.gaps)
    }
}

/// Point-in-time metrics for one tenant over a lookback window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionMetrics {
    pub tenant_id: String,
    pub window_start: DateTime<Utc>,
    pub encrypt_operations: u64,
    pub decrypt_operations: u64,
    pub failed_operations: u64,
    pub average_operation_time_ms: f64,

    /// Operation count per key id over the window
    pub key_usage_distribution: HashMap<String, u64>,

    /// Fraction of sensitive fields currently encrypted, in [0, 1]
    pub encryption_coverage: f64,

    /// 0..=100, higher is better
    pub compliance_score: f64,
}

/// Alert severity, ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Alert condition identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    FailedEncryptions,
    KeyRotationOverdue,
    UnusualKeyUsage,
    UnauthorizedAccess,
    LowCoverage,
}

/// One fired alert condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub details: String,
}

/// Periodic compliance report for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub tenant_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub key_management_score: f64,
    pub data_encryption_score: f64,
    pub access_control_score: f64,
    pub audit_trail_score: f64,

    /// Rounded mean of the four sub-scores
    pub overall_score: f64,
    pub violations: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Derives metrics, alerts, and reports from the key store and usage log
#[derive(Debug)]
pub struct ComplianceMonitor {
    key_store: Arc<dyn KeyStore>,
    usage_log: Arc<dyn UsageLogStore>,
    coverage: Arc<dyn CoverageSource>,
}

impl ComplianceMonitor {
    /// Creates a monitor over the given stores
    pub fn new(
        key_store: Arc<dyn KeyStore>,
        usage_log: Arc<dyn UsageLogStore>,
        coverage: Arc<dyn CoverageSource>,
    ) -> Self {
        Self {
            key_store,
            usage_log,
            coverage,
        }
    }

    /// Computes operation metrics and the compliance score for a tenant
    /// over the given lookback window
    pub async fn get_metrics(
        &self,
        tenant_id: &str,
        window: Duration,
    ) -> Result<EncryptionMetrics> {
        let now = Utc::now();
        let window_start = now - window;
        let entries = self.usage_log.entries_since(tenant_id, window_start).await?;

        let mut encrypt_operations = 0;
        let mut decrypt_operations = 0;
        let mut failed_operations = 0;
        let mut total_time_ms = 0u64;
        let mut key_usage_distribution: HashMap<String, u64> = HashMap::new();

        for entry in &entries {
            match entry.operation {
                CryptoOperation::Encrypt => encrypt_operations += 1,
                CryptoOperation::Decrypt => decrypt_operations += 1,
                CryptoOperation::Rotate => {}
            }
            if !entry.success {
                failed_operations += 1;
            }
            total_time_ms += entry.operation_time_ms;
            *key_usage_distribution.entry(entry.key_id.clone()).or_insert(0) += 1;
        }

        let average_operation_time_ms = if entries.is_empty() {
            0.0
        } else {
            total_time_ms as f64 / entries.len() as f64
        };

        let encryption_coverage = self.coverage.encryption_coverage(tenant_id).await?;
        let audit_gaps = self.coverage.audit_gaps(tenant_id).await?;
        let overdue = self.overdue_keys(tenant_id, now).await?.len();

        let mut score = 100.0 - 5.0 * overdue as f64 - 3.0 * audit_gaps as f64;
        if encryption_coverage < COVERAGE_SCORE_FLOOR {
            score -= 10.0;
        }
        let compliance_score = score.max(0.0);

        Ok(EncryptionMetrics {
            tenant_id: tenant_id.to_string(),
            window_start,
            encrypt_operations,
            decrypt_operations,
            failed_operations,
            average_operation_time_ms,
            key_usage_distribution,
            encryption_coverage,
            compliance_score,
        })
    }

    /// Evaluates every alert condition for a tenant
    ///
    /// Conditions fire independently; one pass can return several alerts.
    pub async fn monitor_alerts(&self, tenant_id: &str) -> Result<Vec<Alert>> {
        let now = Utc::now();
        let mut alerts = Vec::new();

        let last_hour = self.usage_log.entries_since(tenant_id, now - Duration::hours(1)).await?;

        let failed_encryptions = last_hour
            .iter()
            .filter(|e| e.operation == CryptoOperation::Encrypt && !e.success)
            .count();
        if failed_encryptions > FAILED_ENCRYPTIONS_PER_HOUR {
            alerts.push(Alert {
                kind: AlertKind::FailedEncryptions,
                severity: AlertSeverity::High,
                title: "High encryption failure rate".to_string(),
                details: format!(
                    "{} failed encryption operations in the last hour",
                    failed_encryptions
                ),
            });
        }

        for key in self.overdue_keys(tenant_id, now).await? {
            let overdue_days = (now - key.next_rotation).num_days();
            let severity = if overdue_days > CRITICAL_OVERDUE_DAYS {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            alerts.push(Alert {
                kind: AlertKind::KeyRotationOverdue,
                severity,
                title: "Key rotation overdue".to_string(),
                details: format!(
                    "key {} is {} days past its rotation deadline",
                    key.key_id, overdue_days
                ),
            });
        }

        let last_day = self.usage_log.entries_since(tenant_id, now - Duration::days(1)).await?;
        let mut per_key: HashMap<&str, u64> = HashMap::new();
        for entry in &last_day {
            *per_key.entry(entry.key_id.as_str()).or_insert(0) += 1;
        }
        for (key_id, count) in per_key {
            if count > OPS_PER_KEY_PER_DAY {
                alerts.push(Alert {
                    kind: AlertKind::UnusualKeyUsage,
                    severity: AlertSeverity::Medium,
                    title: "Unusual key usage volume".to_string(),
                    details: format!("key {} saw {} operations in the last day", key_id, count),
                });
            }
        }

        let failed_decryptions = last_hour
            .iter()
            .filter(|e| e.operation == CryptoOperation::Decrypt && !e.success)
            .count();
        if failed_decryptions > FAILED_DECRYPTIONS_PER_HOUR {
            alerts.push(Alert {
                kind: AlertKind::UnauthorizedAccess,
                severity: AlertSeverity::Critical,
                title: "Possible unauthorized access attempts".to_string(),
                details: format!(
                    "{} failed decryption operations in the last hour",
                    failed_decryptions
                ),
            });
        }

        let coverage = self.coverage.encryption_coverage(tenant_id).await?;
        if coverage < COVERAGE_ALERT_FLOOR {
            alerts.push(Alert {
                kind: AlertKind::LowCoverage,
                severity: AlertSeverity::Medium,
                title: "Low encryption coverage".to_string(),
                details: format!(
                    "only {:.0}% of sensitive fields are encrypted",
                    coverage * 100.0
                ),
            });
        }

        Ok(alerts)
    }

    /// Builds the periodic compliance report for a tenant
    pub async fn generate_compliance_report(
        &self,
        tenant_id: &str,
        period: Duration,
    ) -> Result<ComplianceReport> {
        let now = Utc::now();
        let period_start = now - period;
        let entries = self.usage_log.entries_since(tenant_id, period_start).await?;
        let keys = self.key_store.load_all(tenant_id).await?;
        let coverage = self.coverage.encryption_coverage(tenant_id).await?;
        let audit_gaps = self.coverage.audit_gaps(tenant_id).await?;

        let mut violations = Vec::new();
        let mut recommendations = Vec::new();

        // Key management: overdue and manually rotated keys both count
        // against the score.
        let active: Vec<&KeyRecord> = keys
            .iter()
            .filter(|k| k.status == KeyStatus::Active)
            .collect();
        let overdue: Vec<&&KeyRecord> = active.iter().filter(|k| k.is_rotation_due(now)).collect();
        let manual = active.iter().filter(|k| !k.auto_rotate).count();
        let key_management_score =
            (100.0 - 10.0 * overdue.len() as f64 - 5.0 * manual as f64).max(0.0);
        for key in &overdue {
            violations.push(format!(
                "key {} is past its rotation deadline ({})",
                key.key_id, key.next_rotation
            ));
        }

        // Data encryption: coverage carries the score, a high failure
        // ratio penalizes it.
        let failed = entries.iter().filter(|e| !e.success).count();
        let failure_ratio = if entries.is_empty() {
            0.0
        } else {
            failed as f64 / entries.len() as f64
        };
        let mut data_encryption_score = coverage * 100.0;
        if failure_ratio > 0.05 {
            data_encryption_score -= 20.0;
            violations.push(format!(
                "operation failure ratio {:.1}% exceeds 5%",
                failure_ratio * 100.0
            ));
        }
        let data_encryption_score = data_encryption_score.max(0.0);

        // Access control: hours with a failed-decryption spike.
        let spike_hours = failed_decryption_spike_hours(&entries, period_start, now);
        let access_control_score = (100.0 - 25.0 * spike_hours as f64).max(0.0);
        if spike_hours > 0 {
            violations.push(format!(
                "{} hour(s) with more than {} failed decryptions",
                spike_hours, FAILED_DECRYPTIONS_PER_HOUR
            ));
        }

        // Audit trail: gaps reported by the coverage source, plus a heavy
        // penalty when the period produced no log entries at all.
        let mut audit_trail_score = 100.0 - 3.0 * audit_gaps as f64;
        if entries.is_empty() {
            audit_trail_score -= 50.0;
            violations.push("no usage log entries for the reporting period".to_string());
        }
        let audit_trail_score = audit_trail_score.max(0.0);

        if key_management_score < 80.0 {
            recommendations
                .push("rotate overdue keys and enable automatic rotation".to_string());
        }
        if data_encryption_score < 80.0 {
            recommendations.push(
                "increase encryption coverage and investigate failing operations".to_string(),
            );
        }
        if access_control_score < 80.0 {
            recommendations
                .push("review failed decryption sources for unauthorized access".to_string());
        }
        if audit_trail_score < 80.0 {
            recommendations.push("close audit gaps and verify usage logging".to_string());
        }

        let overall_score = ((key_management_score
            + data_encryption_score
            + access_control_score
            + audit_trail_score)
            / 4.0)
            .round();

        Ok(ComplianceReport {
            tenant_id: tenant_id.to_string(),
            period_start,
            period_end: now,
            generated_at: now,
            key_management_score,
            data_encryption_score,
            access_control_score,
            audit_trail_score,
            overall_score,
            violations,
            recommendations,
        })
    }

    async fn overdue_keys(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<KeyRecord>> {
        let keys = self.key_store.load_all(tenant_id).await?;
        Ok(keys
            .into_iter()
            .filter(|k| k.status == KeyStatus::Active && k.is_rotation_due(now))
            .collect())
    }
}

fn failed_decryption_spike_hours(
    entries: &[crate::usage::UsageLogEntry],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> usize {
    let mut per_hour: HashMap<i64, usize> = HashMap::new();

    for entry in entries {
        if entry.operation != CryptoOperation::Decrypt || entry.success {
            continue;
        }
        if entry.timestamp < period_start || entry.timestamp > period_end {
            continue;
        }
        let hour = entry.timestamp.timestamp() / 3600;
        *per_hour.entry(hour).or_insert(0) += 1;
    }

    per_hour
        .values()
        .filter(|&&count| count > FAILED_DECRYPTIONS_PER_HOUR)
        .count()
}
