//! Failure classification: decide whether a worker-reported failure gets
//! one retry or terminates the node.
//!
//! All retry policy lives here, keyed by `(stage, attempt_count,
//! fingerprint)`. The classifier never allows more than one retry per
//! stage per node; bounded attempts are a hard property of the core, not a
//! tunable.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::state_machine::Stage;

/// Categorized cause extracted from a failure log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureFingerprint {
    SchemaMismatch,
    InterfaceMismatch,
    MissingFile,
    ToolTransient,
    ToolInvocation,
    Timeout,
    Unknown,
}

/// What to do with a failed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDisposition {
    /// Re-publish the stage once with a fresh task id.
    RetryOnce,
    /// Poison pill: quarantine to the DLQ and fail the node.
    RejectToDlq,
    /// Fail the node without DLQ involvement.
    TerminalFail,
}

impl FailureDisposition {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RejectToDlq | Self::TerminalFail)
    }

    pub fn sends_to_dlq(&self) -> bool {
        matches!(self, Self::RejectToDlq)
    }
}

/// Ordered substring patterns mapping log text to fingerprints. First
/// match wins; integrators can replace the table wholesale.
#[derive(Debug, Clone)]
pub struct FingerprintRules {
    patterns: Vec<(String, FailureFingerprint)>,
}

impl Default for FingerprintRules {
    fn default() -> Self {
        let patterns = [
            ("schema mismatch", FailureFingerprint::SchemaMismatch),
            ("unknown field", FailureFingerprint::SchemaMismatch),
            ("validation error", FailureFingerprint::SchemaMismatch),
            ("interface mismatch", FailureFingerprint::InterfaceMismatch),
            ("port mismatch", FailureFingerprint::InterfaceMismatch),
            ("missing file", FailureFingerprint::MissingFile),
            ("no such file", FailureFingerprint::MissingFile),
            ("missing input", FailureFingerprint::MissingFile),
            ("tool/transient", FailureFingerprint::ToolTransient),
            ("temporarily unavailable", FailureFingerprint::ToolTransient),
            ("resource busy", FailureFingerprint::ToolTransient),
            ("license server", FailureFingerprint::ToolTransient),
            ("command not found", FailureFingerprint::ToolInvocation),
            ("invocation failed", FailureFingerprint::ToolInvocation),
            ("timeout", FailureFingerprint::Timeout),
        ]
        .into_iter()
        .map(|(p, f)| (p.to_string(), f))
        .collect();
        Self { patterns }
    }
}

impl FingerprintRules {
    pub fn new(patterns: Vec<(String, FailureFingerprint)>) -> Self {
        Self { patterns }
    }

    pub fn fingerprint(&self, log_output: &str) -> FailureFingerprint {
        let haystack = log_output.to_lowercase();
        self.patterns
            .iter()
            .find(|(pattern, _)| haystack.contains(pattern.as_str()))
            .map(|(_, fingerprint)| *fingerprint)
            .unwrap_or(FailureFingerprint::Unknown)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DlqClassifier {
    rules: FingerprintRules,
}

impl DlqClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: FingerprintRules) -> Self {
        Self { rules }
    }

    pub fn fingerprint(&self, log_output: &str) -> FailureFingerprint {
        self.rules.fingerprint(log_output)
    }

    /// The single policy function.
    ///
    /// `attempt_count` is the number of attempts already consumed for the
    /// stage (the failing attempt included).
    pub fn classify(
        &self,
        _stage: Stage,
        attempt_count: u32,
        fingerprint: FailureFingerprint,
    ) -> FailureDisposition {
        match fingerprint {
            // Poison pills: retrying cannot help and the payload belongs in
            // quarantine.
            FailureFingerprint::SchemaMismatch
            | FailureFingerprint::InterfaceMismatch
            | FailureFingerprint::MissingFile => FailureDisposition::RejectToDlq,

            // Possibly transient causes get exactly one retry.
            FailureFingerprint::ToolTransient
            | FailureFingerprint::ToolInvocation
            | FailureFingerprint::Timeout
            | FailureFingerprint::Unknown => {
                if attempt_count <= 1 {
                    FailureDisposition::RetryOnce
                } else {
                    FailureDisposition::TerminalFail
                }
            }
        }
    }

    /// Fingerprint a log and classify in one step.
    pub fn classify_log(
        &self,
        stage: Stage,
        attempt_count: u32,
        log_output: &str,
    ) -> (FailureFingerprint, FailureDisposition) {
        let fingerprint = self.fingerprint(log_output);
        (fingerprint, self.classify(stage, attempt_count, fingerprint))
    }
}

/// Deterministic signature of a failure log, carried into debug context so
/// repeated failures of the same shape are recognizable.
///
/// Only salient lines (errors, assertions, mismatches) feed the hash, so
/// timestamps and progress noise do not perturb it.
pub fn failure_signature(log_output: &str) -> String {
    let mut hasher = DefaultHasher::new();
    let mut salient = 0usize;
    for line in log_output.lines() {
        let lowered = line.to_lowercase();
        if lowered.contains("error")
            || lowered.contains("assert")
            || lowered.contains("mismatch")
            || lowered.contains("fail")
        {
            line.trim().hash(&mut hasher);
            salient += 1;
        }
    }
    if salient == 0 {
        log_output.trim().hash(&mut hasher);
    }
    format!("sig:{:016x}", hasher.finish())
}
