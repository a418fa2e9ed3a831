//! Required-version discovery for a module.
//!
//! A module declares the Terraform versions it supports in `versions.tf`:
//!
//! ```hcl
//! terraform {
//!   required_version = ">= 1.3, < 2.0"
//! }
//! ```
//!
//! Modules without a declaration are checked against [`DEFAULT_CONSTRAINT`].

use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::ConstraintError;

/// Constraint applied when a module does not declare one.
pub const DEFAULT_CONSTRAINT: &str = ">1.0.0";

/// File holding the `terraform { required_version = ... }` block.
pub const VERSIONS_FILE: &str = "versions.tf";

/// Where a constraint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintSource {
    Declared,
    Default,
}

/// Version-range expression a module's toolchain must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Constraint {
    pub expr: String,
    pub source: ConstraintSource,
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expr)
    }
}

/// Extract `terraform.required_version` from HCL source.
///
/// `Ok(None)` when there is no `terraform` block or it has no
/// `required_version`.
pub fn declared_constraint(source: &str, path: &Path) -> Result<Option<String>, ConstraintError> {
    let body = hcl::parse(source).map_err(|e| ConstraintError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    for block in body.blocks().filter(|b| b.identifier() == "terraform") {
        let Some(attr) = block
            .body()
            .attributes()
            .find(|a| a.key() == "required_version")
        else {
            continue;
        };

        return match attr.expr() {
            hcl::Expression::String(s) => Ok(Some(s.clone())),
            _ => Err(ConstraintError::NotAString {
                path: path.to_path_buf(),
            }),
        };
    }

    Ok(None)
}

/// Reads module constraints, falling back to a default expression.
#[derive(Debug, Clone)]
pub struct ConstraintReader {
    default: String,
}

impl Default for ConstraintReader {
    fn default() -> Self {
        Self::new(DEFAULT_CONSTRAINT)
    }
}

impl ConstraintReader {
    pub fn new(default: &str) -> Self {
        ConstraintReader {
            default: default.to_string(),
        }
    }

    /// Constraint for the module at `module`.
    ///
    /// A missing file or an empty declaration yields the default; a file that
    /// exists but cannot be parsed is an error.
    pub async fn read(&self, module: &Path) -> Result<Constraint, ConstraintError> {
        let path = module.join(VERSIONS_FILE);

        let declared = match tokio::fs::read_to_string(&path).await {
            Ok(source) => declared_constraint(&source, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => return Err(ConstraintError::Read { path, source }),
        };

        match declared {
            Some(expr) if !expr.trim().is_empty() => Ok(Constraint {
                expr,
                source: ConstraintSource::Declared,
            }),
            _ => {
                debug!(module = %module.display(), default = %self.default, "No declared constraint, using default");
                Ok(Constraint {
                    expr: self.default.clone(),
                    source: ConstraintSource::Default,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_versions(dir: &Path, contents: &str) {
        std::fs::write(dir.join(VERSIONS_FILE), contents).unwrap();
    }

    #[tokio::test]
    async fn test_declared_constraint_is_used() {
        let dir = tempdir().unwrap();
        write_versions(
            dir.path(),
            r#"
terraform {
  required_version = "~> 1.5"

  required_providers {
    aws = {
      source  = "hashicorp/aws"
      version = ">= 5.0"
    }
  }
}
"#,
        );

        let constraint = ConstraintReader::default().read(dir.path()).await.unwrap();
        assert_eq!(constraint.expr, "~> 1.5");
        assert_eq!(constraint.source, ConstraintSource::Declared);
    }

    #[tokio::test]
    async fn test_missing_file_uses_default() {
        let dir = tempdir().unwrap();
        let constraint = ConstraintReader::default().read(dir.path()).await.unwrap();
        assert_eq!(constraint.expr, DEFAULT_CONSTRAINT);
        assert_eq!(constraint.source, ConstraintSource::Default);
    }

    #[tokio::test]
    async fn test_empty_declaration_uses_default() {
        let dir = tempdir().unwrap();
        write_versions(dir.path(), "terraform {\n  required_version = \"\"\n}\n");

        let constraint = ConstraintReader::default().read(dir.path()).await.unwrap();
        assert_eq!(constraint.expr, DEFAULT_CONSTRAINT);
        assert_eq!(constraint.source, ConstraintSource::Default);
    }

    #[tokio::test]
    async fn test_block_without_required_version_uses_configured_default() {
        let dir = tempdir().unwrap();
        write_versions(dir.path(), "terraform {\n  experiments = []\n}\n");

        let constraint = ConstraintReader::new(">= 1.6.0")
            .read(dir.path())
            .await
            .unwrap();
        assert_eq!(constraint.expr, ">= 1.6.0");
    }

    #[tokio::test]
    async fn test_malformed_file_is_parse_error() {
        let dir = tempdir().unwrap();
        write_versions(dir.path(), "terraform {\n  required_version = \n");

        let err = ConstraintReader::default().read(dir.path()).await.unwrap_err();
        assert!(matches!(err, ConstraintError::Parse { .. }), "got {err:?}");
    }

    #[test]
    fn test_non_string_constraint_is_rejected() {
        let err = declared_constraint(
            "terraform {\n  required_version = 12\n}\n",
            Path::new("versions.tf"),
        )
        .unwrap_err();
        assert!(matches!(err, ConstraintError::NotAString { .. }));
    }

    #[test]
    fn test_other_blocks_are_ignored() {
        let source = r#"
provider "aws" {
  region = "eu-west-1"
}

terraform {
  required_version = ">= 1.0.0, < 2.0.0"
}
"#;
        let declared = declared_constraint(source, Path::new("versions.tf")).unwrap();
        assert_eq!(declared.as_deref(), Some(">= 1.0.0, < 2.0.0"));
    }
}
