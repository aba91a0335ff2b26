//! Rule engine: ignore chain + pagination rewrite rules
//!
//! Pure functions over endpoint strings relative to the API base.
//! The Bitbucket tables live in [`RuleSet::bitbucket`]; they are fixed per
//! API version and not user-configurable.

use regex::Regex;

use crate::locator::{Locator, Params};

// ============================================================
// Ignore chain
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateKind {
    Contains,
    Prefix,
    Suffix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
    pub kind: PredicateKind,
    pub negate: bool,
    pub pattern: String,
}

impl IgnoreRule {
    pub fn contains(pattern: impl Into<String>) -> Self {
        Self::new(PredicateKind::Contains, pattern)
    }

    pub fn prefix(pattern: impl Into<String>) -> Self {
        Self::new(PredicateKind::Prefix, pattern)
    }

    pub fn suffix(pattern: impl Into<String>) -> Self {
        Self::new(PredicateKind::Suffix, pattern)
    }

    fn new(kind: PredicateKind, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            negate: false,
            pattern: pattern.into(),
        }
    }

    /// Invert the predicate
    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// Predicate with `negate` applied
    pub fn fires(&self, reference: &str) -> bool {
        let hit = match self.kind {
            PredicateKind::Contains => reference.contains(&self.pattern),
            PredicateKind::Prefix => reference.starts_with(&self.pattern),
            PredicateKind::Suffix => reference.ends_with(&self.pattern),
        };
        hit != self.negate
    }
}

/// Short-circuit deny chain: the first rule that fires ignores the
/// reference; a reference no rule fires on is kept.
pub fn should_ignore(reference: &str, rules: &[IgnoreRule]) -> bool {
    rules.iter().any(|rule| rule.fires(reference))
}

// ============================================================
// Rewrite rules
// ============================================================

#[derive(Debug, Clone)]
pub enum EndpointMatcher {
    Literal(String),
    Pattern(Regex),
}

impl EndpointMatcher {
    pub fn matches(&self, endpoint: &str) -> bool {
        match self {
            EndpointMatcher::Literal(s) => s == endpoint,
            EndpointMatcher::Pattern(re) => re.is_match(endpoint),
        }
    }
}

/// Expected state of a parameter before an edit applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Parameter must not be set
    Absent,
    /// Any value, including none
    Any,
    /// Parameter must be set to exactly this list
    Equals(Vec<String>),
}

impl Condition {
    fn holds(&self, current: Option<&Vec<String>>) -> bool {
        match self {
            Condition::Absent => current.is_none(),
            Condition::Any => true,
            Condition::Equals(expected) => current == Some(expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Set(Vec<String>),
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamEdit {
    pub when: Vec<(String, Condition)>,
    pub edits: Vec<(String, Edit)>,
}

impl ParamEdit {
    /// Set every `(key, value)` that is not already present.
    pub fn defaults(pairs: &[(&str, &[&str])]) -> Self {
        Self {
            when: pairs
                .iter()
                .map(|(k, _)| (k.to_string(), Condition::Absent))
                .collect(),
            edits: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Edit::Set(to_values(v))))
                .collect(),
        }
    }

    fn applies(&self, params: &Params) -> bool {
        self.when.iter().all(|(k, cond)| cond.holds(params.get(k)))
    }

    fn apply(&self, params: &mut Params) {
        for (key, edit) in &self.edits {
            match edit {
                Edit::Set(values) => {
                    params.insert(key.clone(), values.clone());
                }
                Edit::Remove => {
                    params.remove(key);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RewriteRule {
    pub matchers: Vec<EndpointMatcher>,
    pub param_edits: Vec<ParamEdit>,
}

impl RewriteRule {
    pub fn matches(&self, endpoint: &str) -> bool {
        self.matchers.iter().any(|m| m.matches(endpoint))
    }
}

/// Apply every matching rule in order; edits accumulate.
pub fn rewrite_params(endpoint: &str, params: &Params, rules: &[RewriteRule]) -> (String, Params) {
    let mut out = params.clone();
    for rule in rules.iter().filter(|r| r.matches(endpoint)) {
        for edit in &rule.param_edits {
            if edit.applies(&out) {
                edit.apply(&mut out);
            }
        }
    }
    (endpoint.to_string(), out)
}

fn to_values(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// ============================================================
// Bitbucket tables
// ============================================================

/// Ignore chain + rewrite rules for one repository
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub ignore: Vec<IgnoreRule>,
    pub rewrite: Vec<RewriteRule>,
}

impl RuleSet {
    pub fn should_ignore(&self, reference: &str) -> bool {
        should_ignore(reference, &self.ignore)
    }

    pub fn rewrite(&self, locator: &Locator) -> Locator {
        let (endpoint, params) = rewrite_params(&locator.endpoint, &locator.params, &self.rewrite);
        Locator::new(endpoint, params)
    }

    /// Rules for Bitbucket Cloud API 2.0, scoped to `owner/repo`.
    pub fn bitbucket(owner: &str, repo: &str) -> Self {
        let base = format!("repositories/{owner}/{repo}");

        let mut ignore = vec![IgnoreRule::prefix(base.clone()).negated()];
        // Heavy or mutating endpoints; repository content comes from the VCS itself.
        for part in ["patch", "diff", "src", "filehistory", "downloads"] {
            ignore.push(IgnoreRule::contains(format!("{base}/{part}")));
        }
        for part in ["issues/import", "issues/export", "hooks"] {
            ignore.push(IgnoreRule::prefix(format!("{base}/{part}")));
        }
        for action in ["approve", "decline", "merge", "vote", "watch"] {
            ignore.push(IgnoreRule::suffix(format!("/{action}")));
        }

        let re_base = format!("^{}", regex::escape(&base));
        let pattern = |tail: &str| {
            // Built from escaped identifiers and fixed fragments.
            EndpointMatcher::Pattern(
                Regex::new(&format!("{re_base}/{tail}$")).expect("static rewrite pattern"),
            )
        };
        let literal = |tail: &str| {
            if tail.is_empty() {
                EndpointMatcher::Literal(base.clone())
            } else {
                EndpointMatcher::Literal(format!("{base}/{tail}"))
            }
        };

        let full_page = ParamEdit::defaults(&[("pagelen", &["100"])]);
        let first_page = ParamEdit::defaults(&[("page", &["1"])]);

        let rewrite = vec![
            RewriteRule {
                // Activity pages are capped at 50 entries by the API.
                matchers: vec![pattern(r"pullrequests/\d+/activity"), literal("pullrequests/activity")],
                param_edits: vec![ParamEdit::defaults(&[("pagelen", &["50"])])],
            },
            RewriteRule {
                matchers: vec![
                    pattern(r"issues/\d+/changes"),
                    pattern(r"pullrequests/\d+/commits"),
                    literal("refs/tags"),
                ],
                param_edits: vec![full_page.clone()],
            },
            RewriteRule {
                matchers: vec![
                    pattern(r"pullrequests/\d+/comments"),
                    pattern(r"pullrequests/\d+/statuses"),
                    pattern(r"issues/\d+/attachments"),
                    pattern(r"issues/\d+/comments"),
                    pattern(r"commits/[^/]+"),
                    pattern(r"commit/[^/]+/comments"),
                    pattern(r"commit/[^/]+/statuses"),
                    literal("commits"),
                    literal("components"),
                    literal("forks"),
                    literal("issues"),
                    literal("milestones"),
                    literal("refs"),
                    literal("refs/branches"),
                    literal("versions"),
                    literal("watchers"),
                ],
                param_edits: vec![full_page, first_page.clone()],
            },
            RewriteRule {
                matchers: vec![pattern(r"diffstat/.+")],
                param_edits: vec![
                    ParamEdit::defaults(&[("pagelen", &["5000"])]),
                    first_page.clone(),
                ],
            },
            RewriteRule {
                matchers: vec![literal("pullrequests")],
                param_edits: vec![
                    ParamEdit::defaults(&[("state", &["MERGED", "OPEN", "SUPERSEDED", "DECLINED"])]),
                    ParamEdit::defaults(&[("pagelen", &["50"])]),
                    first_page,
                ],
            },
        ];

        Self { ignore, rewrite }
    }
}
