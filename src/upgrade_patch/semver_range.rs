//! Version ranges of the form `>=1.2.0 <1.4.0 || 1.5.x`
//!
//! Comparators separated by whitespace must all hold; groups separated by
//! `||` are alternatives. Operators are `=`, `==`, `!=`, `!`, `>`, `>=`,
//! `<`, `<=` (none means `=`). A version may use `x`, `X` or `*` for its
//! minor or patch component, which expands to the matching bounds.
//!
//! An empty range string is valid and matches nothing.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Gt => ordering == Ordering::Greater,
            Op::Ge => ordering != Ordering::Less,
            Op::Lt => ordering == Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn matches(&self, version: &Version) -> bool {
        self.op.holds(version.cmp_precedence(&self.version))
    }
}

/// A parsed version range
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SemverRange {
    raw: String,
    alternatives: Vec<Vec<Comparator>>,
}

impl SemverRange {
    /// Parse a range expression
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let alternatives = trimmed
            .split("||")
            .map(|group| parse_group(group, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_string(),
            alternatives,
        })
    }

    /// Whether `version` falls inside the range; an empty range contains nothing
    pub fn contains(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|group| group.iter().all(|c| c.matches(version)))
    }

    /// Whether the range was given as an empty string
    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    /// The expression as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn split_operator(token: &str) -> (Option<Op>, &str) {
    const OPERATORS: [(&str, Op); 8] = [
        (">=", Op::Ge),
        ("<=", Op::Le),
        ("!=", Op::Ne),
        ("==", Op::Eq),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
        ("!", Op::Ne),
    ];
    OPERATORS
        .iter()
        .find_map(|(prefix, op)| token.strip_prefix(prefix).map(|rest| (Some(*op), rest)))
        .unwrap_or((None, token))
}

fn parse_group(group: &str, raw: &str) -> Result<Vec<Comparator>, Error> {
    let mut comparators = Vec::new();
    let mut pending: Option<Op> = None;

    for token in group.split_whitespace() {
        let (op, rest) = split_operator(token);
        if rest.is_empty() {
            // operator separated from its version by a space
            match (pending, op) {
                (None, Some(op)) => pending = Some(op),
                _ => return Err(invalid(raw, token)),
            }
            continue;
        }
        let op = match (pending.take(), op) {
            (Some(_), Some(_)) => return Err(invalid(raw, token)),
            (Some(op), None) | (None, Some(op)) => op,
            (None, None) => Op::Eq,
        };
        comparators.extend(expand(op, rest, raw)?);
    }

    if pending.is_some() || comparators.is_empty() {
        return Err(invalid(raw, group.trim()));
    }
    Ok(comparators)
}

fn is_wildcard(part: &str) -> bool {
    matches!(part, "x" | "X" | "*")
}

fn number(part: &str, raw: &str) -> Result<u64, Error> {
    part.parse::<u64>().map_err(|_| invalid(raw, part))
}

/// Expand one `op version` token into concrete comparators
fn expand(op: Op, version: &str, raw: &str) -> Result<Vec<Comparator>, Error> {
    let parts: Vec<&str> = version.splitn(3, '.').collect();
    let wildcard_at = parts.iter().position(|p| is_wildcard(p));

    let Some(position) = wildcard_at else {
        let version = Version::parse(version).map_err(|e| {
            Error::validation(format!("Could not get version from string: {version:?}: {e}"))
        })?;
        return Ok(vec![Comparator { op, version }]);
    };

    if parts.len() != 3 || position == 0 || parts[position..].iter().any(|p| !is_wildcard(p)) {
        return Err(invalid(raw, version));
    }

    let major = number(parts[0], raw)?;
    let next = |n: u64| n.checked_add(1).ok_or_else(|| invalid(raw, version));
    let (low, high) = if position == 1 {
        (Version::new(major, 0, 0), Version::new(next(major)?, 0, 0))
    } else {
        let minor = number(parts[1], raw)?;
        (Version::new(major, minor, 0), Version::new(major, next(minor)?, 0))
    };

    let bound = |op, version| Comparator { op, version };
    Ok(match op {
        Op::Eq => vec![bound(Op::Ge, low), bound(Op::Lt, high)],
        Op::Gt => vec![bound(Op::Ge, high)],
        Op::Ge => vec![bound(Op::Ge, low)],
        Op::Lt => vec![bound(Op::Lt, low)],
        Op::Le => vec![bound(Op::Lt, high)],
        Op::Ne => return Err(invalid(raw, version)),
    })
}

fn invalid(raw: &str, token: &str) -> Error {
    Error::validation(format!("invalid version range {raw:?}: unexpected {token:?}"))
}

impl FromStr for SemverRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SemverRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for SemverRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for SemverRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
