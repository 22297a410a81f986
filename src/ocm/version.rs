//! # Version Selection
//!
//! Lenient semver parsing, constraint matching and the downgrade guard.
//!
//! Constraints accept comparators separated by spaces or commas, `||`
//! alternatives, hyphen ranges (`1.0 - 2.0`), `!=` exclusions and `v`
//! prefixes. A bare version is an exact match.

use regex::Regex;
use semver::{Version, VersionReq};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("invalid semver constraint {constraint:?}: {reason}")]
    InvalidConstraint { constraint: String, reason: String },
    #[error("invalid semver filter: {0}")]
    InvalidFilter(#[from] regex::Error),
    #[error("no version of {component} satisfies {constraint:?}")]
    NoMatchingVersion {
        component: String,
        constraint: String,
    },
    #[error("version {selected} is lower than previously observed {previous} and downgrades are not allowed")]
    Downgrade { previous: String, selected: String },
}

/// Parse a version leniently: `v1.2` becomes `1.2.0`
pub fn parse_lenient(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split_at);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty()
        || parts.len() > 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }
    let mut padded: Vec<String> = parts
        .iter()
        .map(|p| p.trim_start_matches('0'))
        .map(|p| if p.is_empty() { "0" } else { p }.to_string())
        .collect();
    while padded.len() < 3 {
        padded.push("0".to_string());
    }
    Version::parse(&format!("{}{}", padded.join("."), suffix)).ok()
}

/// One `||` alternative: a requirement plus excluded versions
#[derive(Debug, Clone)]
struct Alternative {
    requirement: VersionReq,
    excluded: Vec<Version>,
}

impl Alternative {
    fn matches(&self, version: &Version) -> bool {
        self.requirement.matches(version) && !self.excluded.contains(version)
    }
}

/// A parsed semver constraint
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    raw: String,
    alternatives: Vec<Alternative>,
}

fn is_operator(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^' | '!'))
}

fn split_operator(token: &str) -> (&str, &str) {
    let at = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^' | '!'))
        .unwrap_or(token.len());
    token.split_at(at)
}

fn is_wildcard(version: &str) -> bool {
    version == "*"
        || version
            .split('.')
            .any(|p| matches!(p, "*" | "x" | "X"))
}

fn normalize_version(version: &str) -> &str {
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

impl VersionConstraint {
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let invalid = |reason: String| VersionError::InvalidConstraint {
            constraint: raw.to_string(),
            reason,
        };
        if raw.trim().is_empty() {
            return Err(invalid("constraint is empty".to_string()));
        }

        let mut alternatives = Vec::new();
        for alternative in raw.split("||") {
            let tokens: Vec<&str> = alternative
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .collect();
            if tokens.is_empty() {
                return Err(invalid("empty alternative".to_string()));
            }

            // glue detached operators (`>= 1.0`) to their version
            let mut joined: Vec<String> = Vec::new();
            let mut pending_operator: Option<&str> = None;
            for token in tokens {
                if is_operator(token) {
                    pending_operator = Some(token);
                } else if let Some(op) = pending_operator.take() {
                    joined.push(format!("{op}{token}"));
                } else {
                    joined.push(token.to_string());
                }
            }
            if let Some(op) = pending_operator {
                return Err(invalid(format!("operator {op} without version")));
            }

            let mut comparators: Vec<String> = Vec::new();
            let mut excluded = Vec::new();
            let mut index = 0;
            while index < joined.len() {
                let token = joined[index].as_str();
                if joined.get(index + 1).map(String::as_str) == Some("-") {
                    let upper = joined
                        .get(index + 2)
                        .ok_or_else(|| invalid("hyphen range without upper bound".to_string()))?;
                    comparators.push(format!(">={}", normalize_version(token)));
                    comparators.push(format!("<={}", normalize_version(upper)));
                    index += 3;
                    continue;
                }

                let (op, version) = split_operator(token);
                let version = normalize_version(version);
                match op {
                    "!=" => {
                        let version = parse_lenient(version)
                            .ok_or_else(|| invalid(format!("invalid version {version:?}")))?;
                        excluded.push(version);
                    }
                    "" if is_wildcard(version) => comparators.push(version.to_string()),
                    "" | "==" => comparators.push(format!("={version}")),
                    "=>" => comparators.push(format!(">={version}")),
                    "=<" => comparators.push(format!("<={version}")),
                    _ => comparators.push(format!("{op}{version}")),
                }
                index += 1;
            }

            let requirement = if comparators.is_empty() {
                VersionReq::STAR
            } else {
                VersionReq::parse(&comparators.join(", ")).map_err(|e| invalid(e.to_string()))?
            };
            alternatives.push(Alternative {
                requirement,
                excluded,
            });
        }

        Ok(Self {
            raw: raw.to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|a| a.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Select the highest available version satisfying `constraint`.
///
/// `filter` is applied to raw version strings first; versions that do not
/// parse are skipped. Returns the raw string together with the parsed version.
pub fn select_version(
    available: &[String],
    constraint: &VersionConstraint,
    filter: Option<&Regex>,
) -> Option<(String, Version)> {
    available
        .iter()
        .filter(|raw| filter.is_none_or(|f| f.is_match(raw)))
        .filter_map(|raw| parse_lenient(raw).map(|v| (raw.clone(), v)))
        .filter(|(_, v)| constraint.matches(v))
        .max_by(|(_, a), (_, b)| a.cmp(b))
}

/// Compile an optional semver filter
pub fn compile_filter(filter: Option<&str>) -> Result<Option<Regex>, VersionError> {
    filter
        .filter(|f| !f.trim().is_empty())
        .map(Regex::new)
        .transpose()
        .map_err(VersionError::from)
}

/// Reject a selected version lower than the previously observed one unless
/// downgrades are allowed.
pub fn check_downgrade(
    previous: Option<&str>,
    selected: &Version,
    enforce_downgradability: bool,
) -> Result<(), VersionError> {
    if enforce_downgradability {
        return Ok(());
    }
    match previous.and_then(parse_lenient) {
        Some(previous) if *selected < previous => Err(VersionError::Downgrade {
            previous: previous.to_string(),
            selected: selected.to_string(),
        }),
        _ => Ok(()),
    }
}
