//! User glob rules: the first, cheapest classification stage.

use crate::models::{ClassificationResult, ClassificationRule, Source};
use globset::{GlobBuilder, GlobMatcher};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Compile a rule pattern. Only `*` is special; everything else matches literally.
pub fn compile(pattern: &str) -> Option<GlobMatcher> {
    let mut collapsed = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(c);
    }
    let escaped = collapsed
        .split('*')
        .map(globset::escape)
        .collect::<Vec<_>>()
        .join("*");

    match GlobBuilder::new(&escaped)
        .case_insensitive(true)
        .literal_separator(false)
        .build()
    {
        Ok(glob) => Some(glob.compile_matcher()),
        Err(e) => {
            warn!(pattern, error = %e, "skipping invalid rule pattern");
            None
        }
    }
}

/// Evaluate rules in order; the first match wins with full confidence.
pub fn match_rule(filename: &str, rules: &[ClassificationRule]) -> Option<ClassificationResult> {
    rules.iter().find_map(|rule| {
        let matcher = compile(&rule.pattern)?;
        matcher.is_match(filename).then(|| ClassificationResult {
            is_relevant: true,
            destination: rule.destination.clone(),
            confidence: 1.0,
            rationale: format!("matched rule \"{}\"", rule.pattern),
            suggested_rename: None,
            source: Source::Rule,
        })
    })
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    pattern: String,
    destination: String,
}

/// Read `*.toml` rule files from a directory, sorted by file name.
pub fn load_rules_from_dir(dir: &Path) -> anyhow::Result<Vec<ClassificationRule>> {
    let mut rules = Vec::new();
    if !dir.exists() {
        return Ok(rules);
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("toml")
        {
            paths.push(entry.path());
        }
    }
    paths.sort();
    for path in paths {
        let content = fs::read_to_string(&path)?;
        let file: RuleFile = toml::from_str(&content)?;
        rules.push(ClassificationRule {
            id: None,
            pattern: file.pattern,
            destination: file.destination,
            created_at: 0,
        });
    }
    Ok(rules)
}
