//! Experiment / flag records.
//!
//! Variant order is fixed at creation: bucketing depends on both the variant count and each
//! variant's index, so renaming, reordering, or adding variants to a running record silently
//! reassigns visitors. Nothing in this crate mutates `variants`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{bucket, Assignment, BucketMode, Error, Result};

/// Default minimum impressions per variant before auto-stop may decide.
pub const DEFAULT_MIN_SAMPLES_PER_VARIANT: i64 = 100;

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

/// Whether a record is an A/B experiment or a progressive-rollout flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    #[default]
    Experiment,
    Flag,
}

impl ExperimentKind {
    pub fn bucket_mode(self) -> BucketMode {
        match self {
            Self::Experiment => BucketMode::Experiment,
            Self::Flag => BucketMode::Flag,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_samples() -> i64 {
    DEFAULT_MIN_SAMPLES_PER_VARIANT
}

/// A stored experiment or flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    /// Variant names; index 0 is control (for flags: `off`).
    pub variants: Vec<String>,
    pub traffic_percent: f64,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default, rename = "type")]
    pub kind: ExperimentKind,
    /// Only consulted for [`ExperimentKind::Experiment`].
    #[serde(default = "default_true")]
    pub auto_stop: bool,
    #[serde(default = "default_min_samples")]
    pub min_samples_per_variant: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Bumped by the repository on every successful write.
    #[serde(default)]
    pub revision: u64,
}

impl Experiment {
    /// A new active experiment with default auto-stop settings.
    pub fn new(id: impl Into<String>, variants: Vec<String>, traffic_percent: f64) -> Result<Self> {
        let e = Self {
            id: id.into(),
            variants,
            traffic_percent,
            status: ExperimentStatus::Active,
            kind: ExperimentKind::Experiment,
            auto_stop: true,
            min_samples_per_variant: DEFAULT_MIN_SAMPLES_PER_VARIANT,
            winner: None,
            completed_at: None,
            updated_at: None,
            revision: 0,
        };
        e.validate()?;
        Ok(e)
    }

    /// A new active flag with variants `["off", "on"]`.
    pub fn flag(id: impl Into<String>, traffic_percent: f64) -> Result<Self> {
        let mut e = Self::new(id, vec!["off".to_string(), "on".to_string()], traffic_percent)?;
        e.kind = ExperimentKind::Flag;
        e.auto_stop = false;
        Ok(e)
    }

    pub fn with_min_samples(mut self, min_samples_per_variant: i64) -> Self {
        self.min_samples_per_variant = min_samples_per_variant;
        self
    }

    pub fn with_auto_stop(mut self, auto_stop: bool) -> Self {
        self.auto_stop = auto_stop;
        self
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(Error::InvalidExperiment { reason });
        if self.id.is_empty() {
            return invalid("id must be non-empty".to_string());
        }
        if self.variants.len() < 2 {
            return invalid(format!(
                "'{}' needs at least 2 variants, got {}",
                self.id,
                self.variants.len()
            ));
        }
        if self.kind == ExperimentKind::Flag && self.variants.len() != 2 {
            return invalid(format!(
                "flag '{}' must have exactly 2 variants, got {}",
                self.id,
                self.variants.len()
            ));
        }
        for (i, v) in self.variants.iter().enumerate() {
            if v.is_empty() {
                return invalid(format!("'{}' variant {i} has an empty name", self.id));
            }
            if self.variants[..i].contains(v) {
                return invalid(format!("'{}' has duplicate variant '{v}'", self.id));
            }
        }
        if !(0.0..=100.0).contains(&self.traffic_percent) {
            return invalid(format!(
                "'{}' traffic percent {} is outside [0, 100]",
                self.id, self.traffic_percent
            ));
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == ExperimentStatus::Active
    }

    pub fn bucket_mode(&self) -> BucketMode {
        self.kind.bucket_mode()
    }

    /// Bucket a visitor against this record's current allocation.
    ///
    /// The experiment id is the hash key. Status is not consulted.
    pub fn assign(&self, visitor_key: &str) -> Assignment {
        bucket(
            visitor_key,
            &self.id,
            self.variants.len(),
            self.traffic_percent,
            self.bucket_mode(),
        )
    }

    pub fn variant_name(&self, index: usize) -> Option<&str> {
        self.variants.get(index).map(String::as_str)
    }
}
