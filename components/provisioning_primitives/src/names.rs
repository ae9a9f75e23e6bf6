use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a provisioning step, e.g. `ESTP_CREATE_VM`.
///
/// Names are case-sensitive and shared between pipeline tables, step
/// factories and caller step lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for StepName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Name of an idempotent sub-action inside a step (ledger key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubStepName(String);

impl SubStepName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubStepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubStepName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Ordered step names requested for one run. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepList(Vec<StepName>);

impl StepList {
    pub fn new(steps: impl IntoIterator<Item = StepName>) -> Self {
        Self(steps.into_iter().collect())
    }

    /// Parse a comma separated list, ignoring blanks around names.
    pub fn parse(list: &str) -> Self {
        Self(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(StepName::from)
                .collect(),
        )
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StepName> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|s| s == name)
    }

    pub fn position(&self, name: &StepName) -> Option<usize> {
        self.0.iter().position(|s| s == name)
    }

    /// Same steps in reverse order, as used for teardown.
    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().cloned().collect())
    }
}

impl<'a> IntoIterator for &'a StepList {
    type Item = &'a StepName;
    type IntoIter = std::slice::Iter<'a, StepName>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<StepName> for StepList {
    fn from_iter<T: IntoIterator<Item = StepName>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for StepList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(StepName::as_str).collect();
        write!(f, "{}", names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ESTP_PREVM_CHECKS,ESTP_CREATE_VM", 2)]
    #[case(" ESTP_PREVM_CHECKS , ESTP_CREATE_VM ,", 2)]
    #[case("", 0)]
    #[case("ESTP_CREATE_VM", 1)]
    fn parses_comma_separated_lists(#[case] input: &str, #[case] expected: usize) {
        assert_eq!(StepList::parse(input).len(), expected);
    }

    #[test]
    fn step_names_are_case_sensitive() {
        let list = StepList::parse("ESTP_CREATE_VM");
        assert!(list.contains("ESTP_CREATE_VM"));
        assert!(!list.contains("estp_create_vm"));
    }

    #[test]
    fn reversed_keeps_all_names() {
        let list = StepList::parse("A,B,C");
        assert_eq!(list.reversed().to_string(), "C,B,A");
    }

    #[test]
    fn serializes_as_plain_array() {
        let list = StepList::parse("A,B");
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(json, r#"["A","B"]"#);
    }
}
