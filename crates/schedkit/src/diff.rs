//! Local vs. remote rule diffs.

use crate::error::Result;
use crate::fetch::RuleGetter;
use crate::rule::Rule;
use colored::Colorize;
use similar::{ChangeTag, TextDiff};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// How a diff is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffFormat {
    /// Every line, changes wrapped in ANSI colors unconditionally
    #[default]
    PrettyColored,
    /// Unified diff with `--- a/NAME` / `+++ b/NAME` headers; colored
    /// only when terminal coloring is enabled
    Unified,
}

/// YAML of the remote rule (empty when absent) and of the local rule
pub fn diff(rule: &Rule, getter: &RuleGetter) -> Result<(String, String)> {
    let from = match getter.fetch_remote_rule(&rule.name)? {
        Some(remote) => remote.to_yaml()?,
        None => String::new(),
    };
    let to = rule.canonical().to_yaml()?;
    Ok((from, to))
}

/// Render the difference between two texts; equal texts render empty
pub fn format_diff(name: &str, from: &str, to: &str, format: DiffFormat) -> String {
    if from == to {
        return String::new();
    }
    let diff = TextDiff::from_lines(from, to);
    match format {
        DiffFormat::PrettyColored => {
            let mut out = String::new();
            for change in diff.iter_all_changes() {
                let line = trim_newline(change.value());
                match change.tag() {
                    ChangeTag::Delete => out.push_str(&format!("{RED}-{line}{RESET}\n")),
                    ChangeTag::Insert => out.push_str(&format!("{GREEN}+{line}{RESET}\n")),
                    ChangeTag::Equal => out.push_str(&format!(" {line}\n")),
                }
            }
            out
        }
        DiffFormat::Unified => {
            let mut out = format!("--- a/{name}\n+++ b/{name}\n");
            let mut unified = diff.unified_diff();
            unified.context_radius(3);
            for hunk in unified.iter_hunks() {
                out.push_str(&format!("{}\n", hunk.header().to_string().cyan()));
                for change in hunk.iter_changes() {
                    let line = trim_newline(change.value());
                    let rendered = match change.tag() {
                        ChangeTag::Delete => format!("-{line}").red().to_string(),
                        ChangeTag::Insert => format!("+{line}").green().to_string(),
                        ChangeTag::Equal => format!(" {line}"),
                    };
                    out.push_str(&rendered);
                    out.push('\n');
                }
            }
            out
        }
    }
}

fn trim_newline(line: &str) -> &str {
    line.strip_suffix('\n').unwrap_or(line)
}
