//! Label and field selector parsing for cache list queries.
//!
//! Label selectors follow the Kubernetes set-based syntax:
//! `a=b`, `a==b`, `a!=b`, `a in (x,y)`, `a notin (x,y)`, `a` and `!a`,
//! joined by commas. Field selectors are only served when they are a single
//! equality, since every field lookup goes through a named index.

use std::collections::BTreeMap;
use std::str::FromStr;

use super::cache::CacheError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(k, values) => !labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// Parsed label selector; the empty selector matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl FromStr for LabelSelector {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let requirements = split_top_level(s)
            .into_iter()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(parse_requirement)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }
}

/// Split on commas that are not inside parentheses
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_requirement(part: &str) -> Result<Requirement, CacheError> {
    let invalid = || CacheError::InvalidSelector(part.to_string());

    if let Some(key) = part.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(valid_key(key.trim(), part)?));
    }
    if let Some((key, value)) = part.split_once("!=") {
        return Ok(Requirement::NotEquals(
            valid_key(key.trim(), part)?,
            value.trim().to_string(),
        ));
    }
    if let Some((key, value)) = part.split_once("==").or_else(|| part.split_once('=')) {
        return Ok(Requirement::Equals(
            valid_key(key.trim(), part)?,
            value.trim().to_string(),
        ));
    }

    let mut words = part.splitn(2, char::is_whitespace);
    let key = words.next().unwrap_or_default().trim();
    let rest = words.next().unwrap_or_default().trim();
    if rest.is_empty() {
        return Ok(Requirement::Exists(valid_key(key, part)?));
    }

    let (negate, values) = if let Some(values) = rest.strip_prefix("notin") {
        (true, values)
    } else if let Some(values) = rest.strip_prefix("in") {
        (false, values)
    } else {
        return Err(invalid());
    };
    let values = values
        .trim()
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(invalid)?
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>();
    let key = valid_key(key, part)?;
    Ok(if negate {
        Requirement::NotIn(key, values)
    } else {
        Requirement::In(key, values)
    })
}

fn valid_key(key: &str, part: &str) -> Result<String, CacheError> {
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(CacheError::InvalidSelector(part.to_string()));
    }
    Ok(key.to_string())
}

/// Parse a field selector that must be exactly one `field=value` equality
///
/// Returns the field name and the value.
pub fn exact_field_match(selector: &str) -> Result<(String, String), CacheError> {
    let unsupported = || {
        CacheError::UnsupportedSelector(format!(
            "non-exact field matches are not supported by the cache: {selector}"
        ))
    };

    let parts = split_top_level(selector);
    if parts.len() != 1 {
        return Err(unsupported());
    }
    let part = parts[0].trim();
    if part.contains("!=") {
        return Err(unsupported());
    }
    let (field, value) = part
        .split_once("==")
        .or_else(|| part.split_once('='))
        .ok_or_else(unsupported)?;
    let field = field.trim();
    if field.is_empty() {
        return Err(CacheError::InvalidSelector(selector.to_string()));
    }
    Ok((field.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_label_selector_equality_and_sets() {
        let sel: LabelSelector = "app=web, tier in (front, edge), !legacy".parse().unwrap();
        assert!(sel.matches(&labels(&[("app", "web"), ("tier", "edge")])));
        assert!(!sel.matches(&labels(&[("app", "web"), ("tier", "back")])));
        assert!(!sel.matches(&labels(&[
            ("app", "web"),
            ("tier", "edge"),
            ("legacy", "yes")
        ])));
    }

    #[test]
    fn test_label_selector_negations_match_absent_labels() {
        let sel: LabelSelector = "env!=prod,zone notin (a,b)".parse().unwrap();
        assert!(sel.matches(&labels(&[])));
        assert!(!sel.matches(&labels(&[("env", "prod")])));
        assert!(!sel.matches(&labels(&[("zone", "a")])));
    }

    #[test]
    fn test_label_selector_exists_and_empty() {
        let sel: LabelSelector = "owner".parse().unwrap();
        assert!(sel.matches(&labels(&[("owner", "")])));
        assert!(!sel.matches(&labels(&[])));
        assert!(LabelSelector::from_str("").unwrap().is_empty());
    }

    #[test]
    fn test_label_selector_rejects_garbage() {
        assert!(matches!(
            "tier within (a)".parse::<LabelSelector>(),
            Err(CacheError::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_exact_field_match() {
        assert_eq!(
            exact_field_match("spec.vpc==net-1").unwrap(),
            ("spec.vpc".to_string(), "net-1".to_string())
        );
        assert_eq!(
            exact_field_match("spec.vpc=net-1").unwrap(),
            ("spec.vpc".to_string(), "net-1".to_string())
        );
        assert!(matches!(
            exact_field_match("spec.vpc!=net-1"),
            Err(CacheError::UnsupportedSelector(_))
        ));
        assert!(matches!(
            exact_field_match("a=1,b=2"),
            Err(CacheError::UnsupportedSelector(_))
        ));
    }
}
