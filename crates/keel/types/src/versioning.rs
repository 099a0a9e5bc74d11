//! Version ordering per versioning strategy
//!
//! A [`VersionComparator`] orders version strings newest first. Comparators
//! are total and null-safe: a version that cannot be parsed sorts after every
//! parseable version and never aborts a sort. Only a malformed regex is an
//! error, and it is raised when the comparator is built.

use crate::error::VersioningError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How the versions of an artifact are ordered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VersioningStrategy {
    /// Semantic version tags, optionally prefixed with `v`
    SemverTag,

    /// Monotonically increasing integer tags
    IncreasingTag,

    /// Debian package versions published as `{package}-{version}`
    Debian,

    /// A token captured from the tag by a regex
    Tag {
        strategy: TagVersionStrategy,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_regex: Option<String>,
    },
}

impl Default for VersioningStrategy {
    fn default() -> Self {
        Self::SemverTag
    }
}

/// Named tag layouts and how their captured token compares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagVersionStrategy {
    IncreasingTag,
    SemverTag,
    BranchJobCommitByJob,
    SemverJobCommitByJob,
    SemverJobCommitBySemver,
}

impl TagVersionStrategy {
    /// Regex used when no custom regex is configured
    pub fn default_regex(&self) -> &'static str {
        match self {
            Self::IncreasingTag => r"^(\d+)$",
            Self::SemverTag => r"^v?(\d+\.\d+\.\d+(?:[-+].*)?)$",
            Self::BranchJobCommitByJob => r"^master-h(\d+).*$",
            Self::SemverJobCommitByJob => r"^v\d+\.\d+\.\d+-h(\d+).*$",
            Self::SemverJobCommitBySemver => r"^v(\d+\.\d+\.\d+)-h\d+.*$",
        }
    }

    fn token_kind(&self) -> TokenKind {
        match self {
            Self::IncreasingTag | Self::BranchJobCommitByJob | Self::SemverJobCommitByJob => {
                TokenKind::Integer
            }
            Self::SemverTag | Self::SemverJobCommitBySemver => TokenKind::Semver,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Semver,
    Integer,
}

#[derive(Debug, Clone)]
enum VersionParser {
    Semver,
    Integer,
    Debian { prefix: String },
    Tag { regex: Regex, kind: TokenKind },
    /// A regex without a capture group: nothing is orderable
    Unorderable,
}

/// Orders version strings newest first
#[derive(Debug, Clone)]
pub struct VersionComparator {
    parser: VersionParser,
}

impl VersionComparator {
    /// Build the comparator for an artifact's versioning strategy
    pub fn new(
        strategy: &VersioningStrategy,
        artifact_name: &str,
    ) -> Result<Self, VersioningError> {
        let parser = match strategy {
            VersioningStrategy::SemverTag => VersionParser::Semver,
            VersioningStrategy::IncreasingTag => VersionParser::Integer,
            VersioningStrategy::Debian => VersionParser::Debian {
                prefix: format!("{}-", artifact_name),
            },
            VersioningStrategy::Tag {
                strategy,
                custom_regex,
            } => {
                let pattern = custom_regex
                    .as_deref()
                    .unwrap_or_else(|| strategy.default_regex());
                let regex = Regex::new(pattern).map_err(|e| VersioningError::InvalidRegex {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;

                // captures_len counts the implicit whole-match group
                match regex.captures_len() - 1 {
                    0 => VersionParser::Unorderable,
                    1 => VersionParser::Tag {
                        regex,
                        kind: strategy.token_kind(),
                    },
                    groups => {
                        return Err(VersioningError::InvalidRegex {
                            pattern: pattern.to_string(),
                            reason: format!("expected exactly one capture group, found {}", groups),
                        })
                    }
                }
            }
        };

        Ok(Self { parser })
    }

    /// Compare two versions; `Less` means `a` is newer and sorts first
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match (self.parse(a), self.parse(b)) {
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.cmp(a)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.cmp(a),
        }
    }

    /// Sort versions in place, newest first
    pub fn sort(&self, versions: &mut [String]) {
        versions.sort_by(|a, b| self.compare(a, b));
    }

    /// Whether `a` is strictly older than `b`
    pub fn is_older(&self, a: &str, b: &str) -> bool {
        self.compare(a, b) == Ordering::Greater
    }

    fn parse(&self, version: &str) -> Option<ParsedVersion> {
        match &self.parser {
            VersionParser::Semver => parse_semver(version),
            VersionParser::Integer => version.parse().ok().map(ParsedVersion::Integer),
            VersionParser::Debian { prefix } => {
                let stripped = version.strip_prefix(prefix.as_str()).unwrap_or(version);
                let parsed = DebianVersion::parse(stripped);
                if parsed.is_none() {
                    tracing::debug!(version, "Unable to parse debian version, sorting it last");
                }
                parsed.map(ParsedVersion::Debian)
            }
            VersionParser::Tag { regex, kind } => {
                let token = regex.captures(version)?.get(1)?.as_str();
                match kind {
                    TokenKind::Semver => parse_semver(token),
                    TokenKind::Integer => token.parse().ok().map(ParsedVersion::Integer),
                }
            }
            VersionParser::Unorderable => None,
        }
    }
}

/// Sort versions newest first under `strategy`
pub fn sort_versions(
    strategy: &VersioningStrategy,
    artifact_name: &str,
    mut versions: Vec<String>,
) -> Result<Vec<String>, VersioningError> {
    VersionComparator::new(strategy, artifact_name)?.sort(&mut versions);
    Ok(versions)
}

fn parse_semver(version: &str) -> Option<ParsedVersion> {
    let trimmed = version.strip_prefix('v').unwrap_or(version);
    semver::Version::parse(trimmed)
        .ok()
        .map(ParsedVersion::Semver)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ParsedVersion {
    Semver(semver::Version),
    Integer(u64),
    Debian(DebianVersion),
}

/// A debian version: `[epoch:]upstream[-revision]`
#[derive(Debug, Clone)]
struct DebianVersion {
    epoch: u64,
    upstream: String,
    revision: String,
}

impl DebianVersion {
    fn parse(version: &str) -> Option<Self> {
        let (epoch, rest) = match version.split_once(':') {
            Some((epoch, rest)) => (epoch.parse().ok()?, rest),
            None => (0, version),
        };
        let (upstream, revision) = rest.rsplit_once('-').unwrap_or((rest, ""));

        if !upstream.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        let upstream_ok = upstream
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ".+~-:".contains(c));
        let revision_ok = revision
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ".+~".contains(c));
        if !upstream_ok || !revision_ok {
            return None;
        }

        Some(Self {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.to_string(),
        })
    }
}

impl Ord for DebianVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| verrevcmp(&self.upstream, &other.upstream))
            .then_with(|| verrevcmp(&self.revision, &other.revision))
    }
}

impl PartialOrd for DebianVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DebianVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DebianVersion {}

/// Weight of a non-digit character; `~` sorts before everything, even the end
fn order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

/// dpkg's version segment comparison
fn verrevcmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);
    let digit_at = |s: &[u8], k: usize| s.get(k).is_some_and(|c| c.is_ascii_digit());

    while i < a.len() || j < b.len() {
        while (i < a.len() && !digit_at(a, i)) || (j < b.len() && !digit_at(b, j)) {
            let ac = order(a.get(i).copied());
            let bc = order(b.get(j).copied());
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        while a.get(i) == Some(&b'0') {
            i += 1;
        }
        while b.get(j) == Some(&b'0') {
            j += 1;
        }

        let mut first_diff = 0i32;
        while digit_at(a, i) && digit_at(b, j) {
            if first_diff == 0 {
                first_diff = a[i] as i32 - b[j] as i32;
            }
            i += 1;
            j += 1;
        }

        if digit_at(a, i) {
            return Ordering::Greater;
        }
        if digit_at(b, j) {
            return Ordering::Less;
        }
        if first_diff != 0 {
            return first_diff.cmp(&0);
        }
    }

    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sorted(strategy: &VersioningStrategy, name: &str, versions: &[&str]) -> Vec<String> {
        sort_versions(strategy, name, versions.iter().map(|v| v.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_semver_sorts_newest_first() {
        let versions = sorted(
            &VersioningStrategy::SemverTag,
            "fnord",
            &["v1.2.0", "v1.10.0", "v1.9.3"],
        );
        assert_eq!(versions, vec!["v1.10.0", "v1.9.3", "v1.2.0"]);
    }

    #[test]
    fn test_semver_unparseable_sorts_last() {
        let versions = sorted(
            &VersioningStrategy::SemverTag,
            "fnord",
            &["latest", "v0.1.0", "1.0.0", "not-a-version"],
        );
        assert_eq!(versions, vec!["1.0.0", "v0.1.0", "not-a-version", "latest"]);
    }

    #[test]
    fn test_increasing_tag() {
        let versions = sorted(
            &VersioningStrategy::IncreasingTag,
            "fnord",
            &["9", "10", "100", "abc"],
        );
        assert_eq!(versions, vec!["100", "10", "9", "abc"]);
    }

    #[test]
    fn test_debian_strips_package_prefix() {
        let versions = sorted(
            &VersioningStrategy::Debian,
            "fnord",
            &[
                "fnord-0.156.0-h58.f67fe09",
                "fnord-0.161.0-h61.116f116",
                "fnord-0.161.0~rc1-h60.aaaaaaa",
            ],
        );
        assert_eq!(
            versions,
            vec![
                "fnord-0.161.0-h61.116f116",
                "fnord-0.161.0~rc1-h60.aaaaaaa",
                "fnord-0.156.0-h58.f67fe09",
            ]
        );
    }

    #[test]
    fn test_debian_epoch_wins() {
        let comparator = VersionComparator::new(&VersioningStrategy::Debian, "fnord").unwrap();
        assert!(comparator.is_older("fnord-9.9.9", "fnord-1:0.1.0"));
    }

    #[test]
    fn test_debian_unparseable_sorts_last() {
        let versions = sorted(
            &VersioningStrategy::Debian,
            "fnord",
            &["fnord-garbage", "fnord-1.0.0-h1"],
        );
        assert_eq!(versions, vec!["fnord-1.0.0-h1", "fnord-garbage"]);
    }

    #[test]
    fn test_tag_branch_job_commit_by_job() {
        let strategy = VersioningStrategy::Tag {
            strategy: TagVersionStrategy::BranchJobCommitByJob,
            custom_regex: None,
        };
        let versions = sorted(
            &strategy,
            "fnord",
            &["master-h5.blah", "master-h12.blah", "feature-h99.blah"],
        );
        assert_eq!(
            versions,
            vec!["master-h12.blah", "master-h5.blah", "feature-h99.blah"]
        );
    }

    #[test]
    fn test_tag_semver_by_semver() {
        let strategy = VersioningStrategy::Tag {
            strategy: TagVersionStrategy::SemverJobCommitBySemver,
            custom_regex: None,
        };
        let versions = sorted(&strategy, "fnord", &["v1.2.0-h9.abc", "v1.10.0-h3.def"]);
        assert_eq!(versions, vec!["v1.10.0-h3.def", "v1.2.0-h9.abc"]);
    }

    #[test]
    fn test_custom_regex_without_group_is_unorderable() {
        let strategy = VersioningStrategy::Tag {
            strategy: TagVersionStrategy::IncreasingTag,
            custom_regex: Some(r"^build-\d+$".to_string()),
        };
        let comparator = VersionComparator::new(&strategy, "fnord").unwrap();
        // Falls back to descending string order
        assert_eq!(comparator.compare("build-1", "build-2"), Ordering::Greater);
    }

    #[test]
    fn test_custom_regex_with_two_groups_is_rejected() {
        let strategy = VersioningStrategy::Tag {
            strategy: TagVersionStrategy::IncreasingTag,
            custom_regex: Some(r"^(\w+)-(\d+)$".to_string()),
        };
        let err = VersionComparator::new(&strategy, "fnord").unwrap_err();
        assert!(matches!(err, VersioningError::InvalidRegex { .. }));
    }

    #[test]
    fn test_malformed_regex_is_rejected() {
        let strategy = VersioningStrategy::Tag {
            strategy: TagVersionStrategy::SemverTag,
            custom_regex: Some("^(unclosed".to_string()),
        };
        assert!(VersionComparator::new(&strategy, "fnord").is_err());
    }

    #[test]
    fn test_strategy_serde() {
        let json = r#"{"type":"tag","strategy":"branch-job-commit-by-job"}"#;
        let strategy: VersioningStrategy = serde_json::from_str(json).unwrap();
        assert_eq!(
            strategy,
            VersioningStrategy::Tag {
                strategy: TagVersionStrategy::BranchJobCommitByJob,
                custom_regex: None,
            }
        );
    }

    fn any_semver_tag() -> impl Strategy<Value = String> {
        prop_oneof![
            (0u64..12, 0u64..12, 0u64..12).prop_map(|(a, b, c)| format!("v{}.{}.{}", a, b, c)),
            (0u64..12, 0u64..12, 0u64..12).prop_map(|(a, b, c)| format!("{}.{}.{}", a, b, c)),
            "[a-z]{1,6}",
        ]
    }

    fn any_debian() -> impl Strategy<Value = String> {
        "fnord-[0-9]{1,2}(\\.[0-9a-z~]{1,3}){0,2}(-h[0-9]{1,2})?"
    }

    proptest! {
        #[test]
        fn semver_order_is_antisymmetric(a in any_semver_tag(), b in any_semver_tag()) {
            let comparator = VersionComparator::new(&VersioningStrategy::SemverTag, "fnord").unwrap();
            prop_assert_eq!(comparator.compare(&a, &b), comparator.compare(&b, &a).reverse());
        }

        #[test]
        fn semver_order_is_transitive(
            a in any_semver_tag(),
            b in any_semver_tag(),
            c in any_semver_tag(),
        ) {
            let comparator = VersionComparator::new(&VersioningStrategy::SemverTag, "fnord").unwrap();
            let mut versions = vec![a, b, c];
            comparator.sort(&mut versions);
            prop_assert_ne!(comparator.compare(&versions[0], &versions[1]), Ordering::Greater);
            prop_assert_ne!(comparator.compare(&versions[1], &versions[2]), Ordering::Greater);
            prop_assert_ne!(comparator.compare(&versions[0], &versions[2]), Ordering::Greater);
        }

        #[test]
        fn debian_order_is_antisymmetric(a in any_debian(), b in any_debian()) {
            let comparator = VersionComparator::new(&VersioningStrategy::Debian, "fnord").unwrap();
            prop_assert_eq!(comparator.compare(&a, &b), comparator.compare(&b, &a).reverse());
        }

        #[test]
        fn unparseable_sorts_after_parseable(v in any_semver_tag(), junk in "[a-z]{1,6}") {
            let comparator = VersionComparator::new(&VersioningStrategy::SemverTag, "fnord").unwrap();
            if semver::Version::parse(v.trim_start_matches('v')).is_ok() {
                prop_assert_eq!(comparator.compare(&v, &junk), Ordering::Less);
            }
        }
    }
}
