//! Anonymization transforms for record fields
//!
//! The engine operates on raw field values directly, bypassing the field
//! cipher: these transforms are destructive or semantic rather than
//! reversible encryption. Suppression and generalization are permanent;
//! pseudonymization is reversible only when a mapping is explicitly
//! requested and persisted.

pub mod generalize;
pub mod pseudonym;

use crate::error::{Error, Result};
use crate::key::KeyMaterial;
use crate::{MappingStore, RecordSource};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

pub use generalize::GeneralizationRule;
pub use pseudonym::{
    MappingEntry, PseudonymAlgorithm, PseudonymizationMapping, REDACTED,
};

/// One record's fields as seen by the anonymization engine
pub type Record = HashMap<String, Value>;

/// Anonymization technique identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnonymizationTechnique {
    Suppression,
    Generalization,
    Pseudonymization,
    KAnonymity,
    LDiversity,
    TCloseness,
}

/// Distribution statistics for one anonymization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizationStatistics {
    pub original_distinct_values: usize,
    pub anonymized_distinct_values: usize,

    /// Estimated fraction of information destroyed, in [0, 1]
    pub information_loss: f64,

    /// Estimated re-identification resistance, in [0, 1]
    pub privacy_level: f64,
}

/// Outcome of one anonymization invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizationResult {
    pub technique: AnonymizationTechnique,
    pub records_processed: usize,
    pub fields_anonymized: Vec<String>,
    pub statistics: AnonymizationStatistics,
    pub warnings: Vec<String>,

    /// Id of the persisted mapping for pseudonymization runs; the mapping
    /// retains originals only when the run was reversible
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<String>,
}

/// Options for a pseudonymization run
#[derive(Debug, Clone, Copy)]
pub struct PseudonymizationOptions {
    pub algorithm: PseudonymAlgorithm,

    /// Reshape pseudonyms onto the character-class structure of the
    /// original value
    pub retain_format: bool,

    /// Persist a mapping that retains the original values; without it the
    /// transform is permanent and the mapping stores [`REDACTED`]
    pub reversible: bool,
}

impl Default for PseudonymizationOptions {
    fn default() -> Self {
        Self {
            algorithm: PseudonymAlgorithm::HmacSha256,
            retain_format: false,
            reversible: false,
        }
    }
}

/// Technique configuration for a bulk run
#[derive(Debug, Clone)]
pub enum BulkTechnique {
    Suppression {
        fields: Vec<String>,
    },
    Generalization {
        rules: HashMap<String, GeneralizationRule>,
    },
    Pseudonymization {
        fields: Vec<String>,
        options: PseudonymizationOptions,
    },
}

/// Accumulated outcome of a bulk anonymization run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkAnonymizationOutcome {
    pub total_records: usize,
    pub processed_records: usize,
    pub failed_records: usize,
    pub errors: Vec<String>,
}

/// Applies suppression, generalization, and pseudonymization transforms
pub struct AnonymizationEngine {
    mappings: Arc<dyn MappingStore>,
    secret: KeyMaterial,
}

impl std::fmt::Debug for AnonymizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnonymizationEngine")
            .field("mappings", &self.mappings)
            .field("secret", &"<hidden>")
            .finish()
    }
}

impl AnonymizationEngine {
    /// Creates a new engine with the given mapping store and pseudonym
    /// secret
    pub fn new(mappings: Arc<dyn MappingStore>, secret: Vec<u8>) -> Self {
        Self {
            mappings,
            secret: KeyMaterial::new(secret),
        }
    }

    /// Suppresses fields: values become null
    ///
    /// Irreversible by construction. The result always carries a warning
    /// saying so. Idempotent: suppressing an already-null field is a no-op.
    pub fn suppress(&self, records: &mut [Record], fields: &[String]) -> AnonymizationResult {
        let original_distinct = distinct_values(records, fields);

        for record in records.iter_mut() {
            for field in fields {
                if let Some(value) = record.get_mut(field) {
                    *value = Value::Null;
                }
            }
        }

        AnonymizationResult {
            technique: AnonymizationTechnique::Suppression,
            records_processed: records.len(),
            fields_anonymized: fields.to_vec(),
            statistics: AnonymizationStatistics {
                original_distinct_values: original_distinct,
                anonymized_distinct_values: distinct_values(records, fields),
                information_loss: 1.0,
                privacy_level: 1.0,
            },
            warnings: vec![
                "suppression is destructive: original values are not recoverable".to_string(),
            ],
            mapping_id: None,
        }
    }

    /// Generalizes fields through a per-field rule table
    ///
    /// Deterministic: the same input record always generalizes to the same
    /// output. Values a rule cannot interpret are left untouched and
    /// produce a warning.
    pub fn generalize(
        &self,
        records: &mut [Record],
        rules: &HashMap<String, GeneralizationRule>,
    ) -> AnonymizationResult {
        let fields: Vec<String> = rules.keys().cloned().collect();
        let original_distinct = distinct_values(records, &fields);
        let mut warnings = Vec::new();

        for (index, record) in records.iter_mut().enumerate() {
            for (field, rule) in rules {
                let Some(value) = record.get_mut(field) else {
                    continue;
                };
                if value.is_null() {
                    continue;
                }

                match rule.apply(value) {
                    Some(generalized) => *value = generalized,
                    None => warnings.push(format!(
                        "record {}: field {} not generalizable by {:?}",
                        index, field, rule
                    )),
                }
            }
        }

        AnonymizationResult {
            technique: AnonymizationTechnique::Generalization,
            records_processed: records.len(),
            fields_anonymized: fields.clone(),
            statistics: AnonymizationStatistics {
                original_distinct_values: original_distinct,
                anonymized_distinct_values: distinct_values(records, &fields),
                information_loss: 0.7,
                privacy_level: 0.8,
            },
            warnings,
            mapping_id: None,
        }
    }

    /// Pseudonymizes fields with keyed digests
    ///
    /// A mapping is persisted for every run and its id returned. With
    /// `reversible=true` the mapping retains the originals; with
    /// `reversible=false` it stores [`REDACTED`] in their place, so
    /// recovery is impossible by construction.
    pub async fn pseudonymize(
        &self,
        records: &mut [Record],
        fields: &[String],
        options: PseudonymizationOptions,
        tenant_id: &str,
    ) -> Result<AnonymizationResult> {
        let original_distinct = distinct_values(records, fields);
        let mut warnings = Vec::new();
        let mut entries = Vec::new();
        let now = Utc::now();

        for (index, record) in records.iter_mut().enumerate() {
            for field in fields {
                let Some(value) = record.get_mut(field) else {
                    continue;
                };
                let Some(original) = value.as_str().map(str::to_string) else {
                    if !value.is_null() {
                        warnings.push(format!(
                            "record {}: field {} is not a string, skipped",
                            index, field
                        ));
                    }
                    continue;
                };

                let digest = self.secret.with_bytes(|secret| {
                    pseudonym::derive_pseudonym(secret, field, &original, options.algorithm)
                })?;

                let replacement = if options.retain_format {
                    pseudonym::retain_format(&digest, &original)
                } else {
                    digest
                };

                entries.push(MappingEntry {
                    field_name: field.clone(),
                    original: if options.reversible {
                        original
                    } else {
                        REDACTED.to_string()
                    },
                    pseudonym: replacement.clone(),
                    algorithm: options.algorithm,
                    created_at: now,
                });

                *value = Value::String(replacement);
            }
        }

        let mapping = PseudonymizationMapping {
            mapping_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            reversible: options.reversible,
            entries,
            created_at: now,
        };
        self.mappings.store(&mapping).await?;
        let mapping_id = Some(mapping.mapping_id);

        Ok(AnonymizationResult {
            technique: AnonymizationTechnique::Pseudonymization,
            records_processed: records.len(),
            fields_anonymized: fields.to_vec(),
            statistics: AnonymizationStatistics {
                original_distinct_values: original_distinct,
                anonymized_distinct_values: distinct_values(records, fields),
                information_loss: if options.reversible { 0.0 } else { 0.1 },
                privacy_level: 0.6,
            },
            warnings,
            mapping_id,
        })
    }

    /// k-anonymity is not supported
    ///
    /// The grouping/generalization algorithm is not implemented; callers
    /// must not rely on placeholder statistics.
    pub fn k_anonymity(&self, _records: &[Record], _k: usize) -> Result<AnonymizationResult> {
        Err(Error::NotImplemented(
            "k-anonymity grouping is not implemented".into(),
        ))
    }

    /// l-diversity is not supported
    pub fn l_diversity(&self, _records: &[Record], _l: usize) -> Result<AnonymizationResult> {
        Err(Error::NotImplemented(
            "l-diversity grouping is not implemented".into(),
        ))
    }

    /// t-closeness is not supported
    pub fn t_closeness(&self, _records: &[Record], _t: f64) -> Result<AnonymizationResult> {
        Err(Error::NotImplemented(
            "t-closeness grouping is not implemented".into(),
        ))
    }

    /// Applies one technique across all records of a source, one batch at
    /// a time
    ///
    /// A batch failure is recorded and the run continues with the next
    /// batch; nothing aborts on first error.
    pub async fn bulk_anonymize(
        &self,
        source: &Arc<dyn RecordSource>,
        technique: &BulkTechnique,
        batch_size: usize,
        tenant_id: &str,
    ) -> Result<BulkAnonymizationOutcome> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument("batch_size must be positive".into()));
        }

        let mut outcome = BulkAnonymizationOutcome {
            total_records: source.total_records().await?,
            ..Default::default()
        };

        let mut offset = 0;
        loop {
            let mut batch = match source.fetch_batch(offset, batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    let remaining = outcome.total_records.saturating_sub(offset);
                    outcome.failed_records += batch_size.min(remaining);
                    outcome
                        .errors
                        .push(format!("fetch failed at offset {}: {}", offset, e));
                    offset += batch_size;
                    if offset >= outcome.total_records {
                        break;
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                break;
            }
            let batch_len = batch.len();

            let applied = self
                .apply_technique(&mut batch, technique, tenant_id)
                .await;

            match applied {
                Ok(_) => match source.store_batch(offset, batch).await {
                    Ok(()) => outcome.processed_records += batch_len,
                    Err(e) => {
                        outcome.failed_records += batch_len;
                        outcome
                            .errors
                            .push(format!("store failed at offset {}: {}", offset, e));
                    }
                },
                Err(e) => {
                    outcome.failed_records += batch_len;
                    outcome
                        .errors
                        .push(format!("batch at offset {} failed: {}", offset, e));
                }
            }

            offset += batch_size;
        }

        Ok(outcome)
    }

    async fn apply_technique(
        &self,
        batch: &mut [Record],
        technique: &BulkTechnique,
        tenant_id: &str,
    ) -> Result<AnonymizationResult> {
        match technique {
            BulkTechnique::Suppression { fields } => Ok(self.suppress(batch, fields)),
            BulkTechnique::Generalization { rules } => Ok(self.generalize(batch, rules)),
            BulkTechnique::Pseudonymization { fields, options } => {
                self.pseudonymize(batch, fields, *options, tenant_id).await
            }
        }
    }
}

fn distinct_values(records: &[Record], fields: &[String]) -> usize {
    let mut seen = HashSet::new();

    for record in records {
        for field in fields {
            if let Some(value) = record.get(field) {
                if !value.is_null() {
                    seen.insert(value.to_string());
                }
            }
        }
    }

    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::InMemoryMappingStore;
    use crate::util;
    use serde_json::json;

    fn engine() -> (AnonymizationEngine, Arc<InMemoryMappingStore>) {
        let store = Arc::new(InMemoryMappingStore::new());
        (
            AnonymizationEngine::new(store.clone(), util::get_rand_bytes(32)),
            store,
        )
    }

    fn sample_records() -> Vec<Record> {
        vec![
            [
                ("email".to_string(), json!("alice@example.com")),
                ("age".to_string(), json!(34)),
                ("zip".to_string(), json!("94107")),
            ]
            .into_iter()
            .collect(),
            [
                ("email".to_string(), json!("bob@example.com")),
                ("age".to_string(), json!(27)),
                ("zip".to_string(), json!("94110")),
            ]
            .into_iter()
            .collect(),
        ]
    }

    #[test]
    fn suppression_nulls_fields_and_warns() {
        let (engine, _) = engine();
        let mut records = sample_records();

        let result = engine.suppress(&mut records, &["email".to_string()]);

        assert_eq!(result.records_processed, 2);
        assert!(records.iter().all(|r| r["email"].is_null()));
        assert_eq!(result.statistics.information_loss, 1.0);
        assert_eq!(result.statistics.privacy_level, 1.0);
        assert_eq!(result.statistics.anonymized_distinct_values, 0);
        assert!(result.warnings[0].contains("destructive"));

        // Idempotent: a second pass changes nothing.
        let again = engine.suppress(&mut records, &["email".to_string()]);
        assert!(records.iter().all(|r| r["email"].is_null()));
        assert_eq!(again.statistics.original_distinct_values, 0);
    }

    #[test]
    fn generalization_applies_rule_table() {
        let (engine, _) = engine();
        let mut records = sample_records();

        let rules: HashMap<String, GeneralizationRule> = [
            ("age".to_string(), GeneralizationRule::AgeDecade),
            ("zip".to_string(), GeneralizationRule::PostalPrefix(3)),
        ]
        .into_iter()
        .collect();

        let result = engine.generalize(&mut records, &rules);

        assert_eq!(records[0]["age"], json!(30));
        assert_eq!(records[1]["age"], json!(20));
        assert_eq!(records[0]["zip"], json!("941XX"));
        assert_eq!(records[1]["zip"], json!("941XX"));
        assert!(result.warnings.is_empty());
        assert!(
            result.statistics.anonymized_distinct_values
                < result.statistics.original_distinct_values
        );
    }

    #[test]
    fn generalization_warns_on_unparseable_values() {
        let (engine, _) = engine();
        let mut records = vec![[("zip".to_string(), json!("x"))].into_iter().collect()];

        let rules = [("zip".to_string(), GeneralizationRule::PostalPrefix(3))]
            .into_iter()
            .collect();
        let result = engine.generalize(&mut records, &rules);

        assert_eq!(result.warnings.len(), 1);
        assert_eq!(records[0]["zip"], json!("x"));
    }

    #[tokio::test]
    async fn pseudonymization_is_deterministic() {
        let (engine, _) = engine();
        let fields = vec!["email".to_string()];

        let mut first = sample_records();
        let mut second = sample_records();
        engine
            .pseudonymize(&mut first, &fields, PseudonymizationOptions::default(), "t1")
            .await
            .unwrap();
        engine
            .pseudonymize(&mut second, &fields, PseudonymizationOptions::default(), "t1")
            .await
            .unwrap();

        assert_eq!(first[0]["email"], second[0]["email"]);
        assert_ne!(first[0]["email"], json!("alice@example.com"));
        assert_ne!(first[0]["email"], first[1]["email"]);
    }

    #[tokio::test]
    async fn reversible_pseudonymization_persists_originals() {
        let (engine, store) = engine();
        let mut records = sample_records();
        let options = PseudonymizationOptions {
            reversible: true,
            ..Default::default()
        };

        let result = engine
            .pseudonymize(&mut records, &["email".to_string()], options, "t1")
            .await
            .unwrap();

        let mapping_id = result.mapping_id.unwrap();
        let mapping = store.load(&mapping_id).await.unwrap().unwrap();

        assert!(mapping.reversible);
        assert_eq!(mapping.entries.len(), 2);
        assert!(mapping
            .entries
            .iter()
            .any(|e| e.original == "alice@example.com"));
        assert_eq!(result.statistics.information_loss, 0.0);
    }

    #[tokio::test]
    async fn irreversible_pseudonymization_redacts_everywhere() {
        let (engine, store) = engine();
        let mut records = sample_records();
        let options = PseudonymizationOptions {
            reversible: false,
            ..Default::default()
        };

        let result = engine
            .pseudonymize(&mut records, &["email".to_string()], options, "t1")
            .await
            .unwrap();

        // A mapping is persisted, but it holds no originals.
        let mapping_id = result.mapping_id.clone().unwrap();
        let mapping = store.load(&mapping_id).await.unwrap().unwrap();
        assert!(!mapping.reversible);
        assert_eq!(mapping.entries.len(), 2);
        assert!(mapping.entries.iter().all(|e| e.original == REDACTED));

        // Neither the result nor the persisted mapping contains an
        // original value.
        let serialized = serde_json::to_string(&result).unwrap();
        assert!(!serialized.contains("alice@example.com"));
        let stored = serde_json::to_string(&mapping).unwrap();
        assert!(!stored.contains("alice@example.com"));
        assert!(!stored.contains("bob@example.com"));
    }

    #[tokio::test]
    async fn format_retention_keeps_shape() {
        let (engine, _) = engine();
        let mut records = vec![[("phone".to_string(), json!("555-867-5309"))]
            .into_iter()
            .collect::<Record>()];
        let options = PseudonymizationOptions {
            retain_format: true,
            ..Default::default()
        };

        engine
            .pseudonymize(&mut records, &["phone".to_string()], options, "t1")
            .await
            .unwrap();

        let shaped = records[0]["phone"].as_str().unwrap();
        assert_eq!(shaped.len(), 12);
        assert_eq!(&shaped[3..4], "-");
        assert_eq!(&shaped[7..8], "-");
        assert!(shaped
            .chars()
            .filter(|c| *c != '-')
            .all(|c| c.is_ascii_digit()));
    }

    struct VecSource {
        records: std::sync::Mutex<Vec<Record>>,
        fail_fetch_at: Option<usize>,
    }

    impl VecSource {
        fn new(records: Vec<Record>) -> Self {
            Self {
                records: std::sync::Mutex::new(records),
                fail_fetch_at: None,
            }
        }

        fn failing_at(records: Vec<Record>, offset: usize) -> Self {
            Self {
                records: std::sync::Mutex::new(records),
                fail_fetch_at: Some(offset),
            }
        }
    }

    #[async_trait::async_trait]
    impl RecordSource for VecSource {
        async fn fetch_batch(&self, offset: usize, limit: usize) -> crate::Result<Vec<Record>> {
            if self.fail_fetch_at == Some(offset) {
                return Err(Error::Internal("storage read failed".into()));
            }
            let records = self.records.lock().unwrap();
            Ok(records.iter().skip(offset).take(limit).cloned().collect())
        }

        async fn store_batch(&self, offset: usize, batch: Vec<Record>) -> crate::Result<()> {
            let mut records = self.records.lock().unwrap();
            for (i, record) in batch.into_iter().enumerate() {
                records[offset + i] = record;
            }
            Ok(())
        }

        async fn total_records(&self) -> crate::Result<usize> {
            Ok(self.records.lock().unwrap().len())
        }
    }

    fn four_records() -> Vec<Record> {
        (0..4)
            .map(|i| {
                [("email".to_string(), json!(format!("user{}@example.com", i)))]
                    .into_iter()
                    .collect()
            })
            .collect()
    }

    #[tokio::test]
    async fn bulk_run_processes_every_batch() {
        let (engine, _) = engine();
        let source: Arc<dyn RecordSource> = Arc::new(VecSource::new(four_records()));
        let technique = BulkTechnique::Suppression {
            fields: vec!["email".to_string()],
        };

        let outcome = engine
            .bulk_anonymize(&source, &technique, 2, "t1")
            .await
            .unwrap();

        assert_eq!(outcome.total_records, 4);
        assert_eq!(outcome.processed_records, 4);
        assert_eq!(outcome.failed_records, 0);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_counts_its_batch_and_the_run_continues() {
        let (engine, _) = engine();
        let source: Arc<dyn RecordSource> =
            Arc::new(VecSource::failing_at(four_records(), 0));
        let technique = BulkTechnique::Suppression {
            fields: vec!["email".to_string()],
        };

        let outcome = engine
            .bulk_anonymize(&source, &technique, 2, "t1")
            .await
            .unwrap();

        // The unreadable batch counts as failed and the next batch still
        // runs, so every record is accounted for.
        assert_eq!(outcome.total_records, 4);
        assert_eq!(outcome.processed_records, 2);
        assert_eq!(outcome.failed_records, 2);
        assert_eq!(
            outcome.total_records,
            outcome.processed_records + outcome.failed_records
        );
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("offset 0"));
    }

    #[test]
    fn disclosure_control_passes_are_explicitly_unsupported() {
        let (engine, _) = engine();
        let records = sample_records();

        assert!(matches!(
            engine.k_anonymity(&records, 3),
            Err(Error::NotImplemented(_))
        ));
        assert!(matches!(
            engine.l_diversity(&records, 2),
            Err(Error::NotImplemented(_))
        ));
        assert!(matches!(
            engine.t_closeness(&records, 0.2),
            Err(Error::NotImplemented(_))
        ));
    }
}
