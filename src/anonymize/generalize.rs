//! Generalization rules
//!
//! Each rule is a deterministic coarsening function: the same input always
//! produces the same generalized output. Rules are data, held in a per-field
//! table, so a deployment's generalization scheme is testable on its own.

use serde_json::Value;

/// A per-field coarsening function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralizationRule {
    /// Ages collapse to the lower bound of their decade (34 -> 30)
    AgeDecade,

    /// Postal codes keep a prefix and mask the rest ("94107" -> "941XX")
    PostalPrefix(usize),

    /// IPv4 addresses keep the first two octets ("10.1.2.3" -> "10.1.x.x")
    IpTruncate,

    /// Dates collapse to the year ("1990-04-12" -> "1990")
    YearOnly,
}

impl GeneralizationRule {
    /// Applies the rule to a field value
    ///
    /// Returns `None` when the value does not have the shape the rule
    /// expects; the caller leaves such values untouched and records a
    /// warning.
    pub fn apply(&self, value: &Value) -> Option<Value> {
        match self {
            GeneralizationRule::AgeDecade => match value {
                Value::Number(n) => {
                    let age = n.as_i64()?;
                    Some(Value::from((age / 10) * 10))
                }
                Value::String(s) => {
                    let age: i64 = s.trim().parse().ok()?;
                    Some(Value::String(((age / 10) * 10).to_string()))
                }
                _ => None,
            },
            GeneralizationRule::PostalPrefix(keep) => {
                let s = value.as_str()?;
                if s.len() < *keep {
                    return None;
                }
                let prefix: String = s.chars().take(*keep).collect();
                Some(Value::String(format!("{}XX", prefix)))
            }
            GeneralizationRule::IpTruncate => {
                let s = value.as_str()?;
                let octets: Vec<&str> = s.split('.').collect();
                if octets.len() != 4 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
                    return None;
                }
                Some(Value::String(format!("{}.{}.x.x", octets[0], octets[1])))
            }
            GeneralizationRule::YearOnly => {
                let s = value.as_str()?;
                // ISO-8601 dates and timestamps both start with the year.
                let year = s.get(..4)?;
                if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
                    Some(Value::String(year.to_string()))
                } else {
                    None
                }
            }
        }
    }
}
