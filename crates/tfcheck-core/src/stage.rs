//! Validation pipeline stages and how each one's failures are treated.

use serde::{Deserialize, Serialize};

/// Stages of the per-module pipeline, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// terraform init -backend=false
    Init,

    /// terraform validate -json
    Validate,

    /// terraform fmt -check -list=true
    FormatCheck,
}

/// What a stage failing to run means for the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationPolicy {
    /// Log a warning and keep going.
    Warn,

    /// Fail the module and stop the pipeline.
    Abort,

    /// Log informationally; the module is not failed.
    Advisory,
}

impl Stage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Validate => "validate",
            Stage::FormatCheck => "format_check",
        }
    }

    /// How a failure to invoke this stage is handled. Only `validate`
    /// failing to run fails the module.
    pub fn invocation_policy(&self) -> InvocationPolicy {
        match self {
            Stage::Init => InvocationPolicy::Warn,
            Stage::Validate => InvocationPolicy::Abort,
            Stage::FormatCheck => InvocationPolicy::Advisory,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Record of one executed stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: Stage,

    /// Whether the stage ran and reported success.
    pub passed: bool,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Error text when the stage could not be invoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Init.name(), "init");
        assert_eq!(Stage::Validate.name(), "validate");
        assert_eq!(Stage::FormatCheck.name(), "format_check");
    }

    #[test]
    fn test_invocation_policies() {
        assert_eq!(Stage::Init.invocation_policy(), InvocationPolicy::Warn);
        assert_eq!(Stage::Validate.invocation_policy(), InvocationPolicy::Abort);
        assert_eq!(
            Stage::FormatCheck.invocation_policy(),
            InvocationPolicy::Advisory
        );
    }

    #[test]
    fn test_serialized_name_matches_log_name() {
        for stage in [Stage::Init, Stage::Validate, Stage::FormatCheck] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.name()));
        }
    }
}
