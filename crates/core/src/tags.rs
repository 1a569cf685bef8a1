use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::ReleaseTagKind;

static TAG_PATTERNS: LazyLock<Vec<(ReleaseTagKind, Regex)>> = LazyLock::new(|| {
    [
        (ReleaseTagKind::Breaking, r"(?i)\bbreaking\b"),
        (ReleaseTagKind::Security, r"(?i)\bsecurity\b"),
        (ReleaseTagKind::Feat, r"(?i)\b(feat|feature)\b"),
        (ReleaseTagKind::Fix, r"(?i)\b(fix|bug)\b"),
        (ReleaseTagKind::Docs, r"(?i)\b(docs|documentation)\b"),
    ]
    .into_iter()
    .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind, re)))
    .collect()
});

/// Classify release notes by whole-word keyword matches.
pub fn extract_tags(content: &str) -> BTreeSet<ReleaseTagKind> {
    if content.trim().is_empty() {
        return BTreeSet::new();
    }
    TAG_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(content))
        .map(|(kind, _)| *kind)
        .collect()
}
