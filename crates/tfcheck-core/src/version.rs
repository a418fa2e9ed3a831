//! Version constraints and resolution.
//!
//! Terraform spells version ranges with HashiCorp's constraint syntax rather
//! than Cargo's, so `~> 1.3` means `>= 1.3, < 2.0` and not `~1.3`. The
//! grammar is parsed here; the versions themselves are `semver::Version`.

use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

use semver::{BuildMetadata, Prerelease, Version};
use tfcheck_toolchain::VersionSource;
use tracing::debug;

use crate::error::ResolveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Pessimistic,
}

// Longest operators first so `>=` is not read as `>` followed by `=1.0`.
const OPERATORS: [(&str, Op); 7] = [
    ("~>", Op::Pessimistic),
    (">=", Op::Ge),
    ("<=", Op::Le),
    ("!=", Op::Ne),
    (">", Op::Gt),
    ("<", Op::Lt),
    ("=", Op::Eq),
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    op: Op,
    version: Version,
    /// Number of numeric segments written in the constraint (1..=3).
    segments: usize,
}

/// A parsed, comma-separated set of version constraints. A version matches
/// when it satisfies every clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraints {
    raw: String,
    clauses: Vec<Clause>,
}

fn invalid(expr: &str, reason: impl Into<String>) -> ResolveError {
    ResolveError::InvalidConstraint {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

/// Parse a possibly partial version (`1`, `1.2`, `v1.2.3-beta1`).
fn parse_partial(expr: &str, text: &str) -> Result<(Version, usize), ResolveError> {
    let text = text.strip_prefix('v').unwrap_or(text);
    let (core, build) = match text.split_once('+') {
        Some((core, build)) => (core, Some(build)),
        None => (text, None),
    };
    let (numbers, pre) = match core.split_once('-') {
        Some((numbers, pre)) => (numbers, Some(pre)),
        None => (core, None),
    };

    let parts: Vec<&str> = numbers.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid(expr, format!("malformed version {text:?}")));
    }

    let mut segments = [0u64; 3];
    for (slot, part) in segments.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| invalid(expr, format!("malformed version {text:?}")))?;
    }

    let mut version = Version::new(segments[0], segments[1], segments[2]);
    if let Some(pre) = pre {
        version.pre = Prerelease::new(pre).map_err(|e| invalid(expr, e.to_string()))?;
    }
    if let Some(build) = build {
        version.build = BuildMetadata::new(build).map_err(|e| invalid(expr, e.to_string()))?;
    }

    Ok((version, parts.len()))
}

fn parse_clause(expr: &str, text: &str) -> Result<Clause, ResolveError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(invalid(expr, "empty constraint clause"));
    }

    let (op, rest) = OPERATORS
        .iter()
        .find_map(|(token, op)| text.strip_prefix(token).map(|rest| (*op, rest)))
        .unwrap_or((Op::Eq, text));

    let rest = rest.trim();
    if rest.is_empty() {
        return Err(invalid(expr, format!("missing version after operator in {text:?}")));
    }

    let (version, segments) = parse_partial(expr, rest)?;
    Ok(Clause {
        op,
        version,
        segments,
    })
}

/// A constraint without a pre-release never admits a pre-release version; a
/// constraint with one only admits pre-releases of the same release.
fn prerelease_allowed(v: &Version, c: &Version) -> bool {
    match (c.pre.is_empty(), v.pre.is_empty()) {
        (false, false) => (v.major, v.minor, v.patch) == (c.major, c.minor, c.patch),
        (true, false) => false,
        _ => true,
    }
}

fn segment(v: &Version, i: usize) -> u64 {
    match i {
        0 => v.major,
        1 => v.minor,
        _ => v.patch,
    }
}

impl Clause {
    fn matches(&self, v: &Version) -> bool {
        let c = &self.version;
        let ord = v.cmp_precedence(c);
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Ne => ord != Ordering::Equal,
            Op::Gt => prerelease_allowed(v, c) && ord == Ordering::Greater,
            Op::Ge => prerelease_allowed(v, c) && ord != Ordering::Less,
            Op::Lt => prerelease_allowed(v, c) && ord == Ordering::Less,
            Op::Le => prerelease_allowed(v, c) && ord != Ordering::Greater,
            Op::Pessimistic => {
                if !prerelease_allowed(v, c) || (!c.pre.is_empty() && v.pre.is_empty()) {
                    return false;
                }
                if ord == Ordering::Less {
                    return false;
                }
                let last = self.segments - 1;
                (0..last).all(|i| segment(v, i) == segment(c, i))
                    && segment(v, last) >= segment(c, last)
            }
        }
    }
}

impl VersionConstraints {
    /// Parse a constraint expression such as `">= 1.2, < 2.0"`.
    pub fn parse(expr: &str) -> Result<Self, ResolveError> {
        if expr.trim().is_empty() {
            return Err(invalid(expr, "empty constraint"));
        }
        let clauses = expr
            .split(',')
            .map(|clause| parse_clause(expr, clause))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(VersionConstraints {
            raw: expr.to_string(),
            clauses,
        })
    }

    /// Whether `version` satisfies every clause.
    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().all(|c| c.matches(version))
    }

    /// The expression as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for VersionConstraints {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for VersionConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Highest version in `available` satisfying `constraints`, by semver
/// precedence. Input order is irrelevant.
pub fn select_highest(available: &[Version], constraints: &VersionConstraints) -> Option<Version> {
    available
        .iter()
        .filter(|v| constraints.matches(v))
        .max_by(|a, b| a.cmp_precedence(b).then_with(|| a.cmp(b)))
        .cloned()
}

/// Resolves constraint expressions against a [`VersionSource`].
#[derive(Clone)]
pub struct VersionResolver {
    source: Arc<dyn VersionSource>,
    product: String,
}

impl VersionResolver {
    pub fn new(source: Arc<dyn VersionSource>, product: &str) -> Self {
        VersionResolver {
            source,
            product: product.to_string(),
        }
    }

    /// Pick the highest published version satisfying `expr`.
    pub async fn resolve(&self, expr: &str) -> Result<Version, ResolveError> {
        let constraints = VersionConstraints::parse(expr)?;

        let available = self
            .source
            .list_versions(&self.product)
            .await
            .map_err(ResolveError::Registry)?;

        let version = select_highest(&available, &constraints).ok_or_else(|| {
            ResolveError::NoMatchingVersion {
                constraint: expr.to_string(),
            }
        })?;

        debug!(constraint = %expr, %version, candidates = available.len(), "Resolved version");
        Ok(version)
    }
}
