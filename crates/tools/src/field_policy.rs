//! Field policy (§4.8): per-field confidence/source rules gating writes the
//! `core.remember` tool makes to the user model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Where a remembered value came from. Confidence requirements are looser
/// for a direct quote than for an inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    UserQuote,
    UserExplicit,
    UserImplicit,
    Inferred,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldPolicyEntry {
    pub min_confidence: f32,
    /// If set, `source` must be one of these.
    #[serde(default)]
    pub require_source: Option<Vec<EvidenceSource>>,
    #[serde(default)]
    pub escalate_if_uncertain: bool,
    /// For numeric fields: max allowed delta from the previous value.
    #[serde(default)]
    pub max_delta: Option<f64>,
}

impl Default for FieldPolicyEntry {
    fn default() -> Self {
        Self { min_confidence: 0.5, require_source: None, escalate_if_uncertain: false, max_delta: None }
    }
}

fn default_user_field_policy() -> FieldPolicyEntry {
    FieldPolicyEntry {
        min_confidence: 0.7,
        require_source: Some(vec![EvidenceSource::UserQuote, EvidenceSource::UserExplicit, EvidenceSource::UserImplicit]),
        escalate_if_uncertain: false,
        max_delta: None,
    }
}

/// Per-field policy table. Unlisted `user.*` fields fall back to
/// [`default_user_field_policy`]; every other unlisted field falls back to
/// `min_confidence=0.5` with no source restriction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldPolicyTable {
    pub overrides: HashMap<String, FieldPolicyEntry>,
}

impl FieldPolicyTable {
    fn policy_for(&self, field: &str) -> FieldPolicyEntry {
        if let Some(entry) = self.overrides.get(field) {
            return entry.clone();
        }
        if field.starts_with("user.") {
            default_user_field_policy()
        } else {
            FieldPolicyEntry::default()
        }
    }

    /// Check a proposed write. Returns `Err(reason)` *before* any side
    /// effect if the policy rejects it.
    pub fn check(
        &self,
        field: &str,
        confidence: f32,
        source: EvidenceSource,
        previous_numeric: Option<f64>,
        new_numeric: Option<f64>,
    ) -> Result<(), String> {
        let policy = self.policy_for(field);

        if confidence < policy.min_confidence {
            return Err(format!(
                "confidence {confidence:.2} below minimum {:.2} for field {field}",
                policy.min_confidence
            ));
        }

        if let Some(allowed) = &policy.require_source {
            if !allowed.contains(&source) {
                return Err(format!("source {source:?} not permitted for field {field}"));
            }
        }

        if let (Some(max_delta), Some(prev), Some(new)) = (policy.max_delta, previous_numeric, new_numeric) {
            if (new - prev).abs() > max_delta {
                return Err(format!("delta {:.3} exceeds max_delta {max_delta:.3} for field {field}", (new - prev).abs()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlisted_user_field_requires_high_confidence_and_source() {
        let table = FieldPolicyTable::default();
        assert!(table.check("user.name", 0.9, EvidenceSource::UserExplicit, None, None).is_ok());
        assert!(table.check("user.name", 0.5, EvidenceSource::UserExplicit, None, None).is_err());
        assert!(table.check("user.name", 0.9, EvidenceSource::Inferred, None, None).is_err());
    }

    #[test]
    fn unlisted_non_user_field_uses_lower_default() {
        let table = FieldPolicyTable::default();
        assert!(table.check("agent.notes", 0.5, EvidenceSource::System, None, None).is_ok());
        assert!(table.check("agent.notes", 0.4, EvidenceSource::System, None, None).is_err());
    }

    #[test]
    fn max_delta_rejects_large_numeric_jumps() {
        let mut table = FieldPolicyTable::default();
        table.overrides.insert(
            "user.age".to_string(),
            FieldPolicyEntry { min_confidence: 0.5, require_source: None, escalate_if_uncertain: false, max_delta: Some(2.0) },
        );
        assert!(table.check("user.age", 0.9, EvidenceSource::UserQuote, Some(30.0), Some(31.0)).is_ok());
        assert!(table.check("user.age", 0.9, EvidenceSource::UserQuote, Some(30.0), Some(40.0)).is_err());
    }
}
