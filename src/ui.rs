use colored::Colorize;
use declarative::DriftSummary;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// `1 rule`, `3 rules`
pub fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// One-line summary of a diff run
pub fn summary_line(summary: &DriftSummary) -> String {
    let mut parts = vec![
        format!("{} changed", count(summary.drifted, "rule")),
        format!("{} in sync", summary.in_sync),
    ];
    if summary.invalid > 0 {
        parts.push(format!("{} invalid", summary.invalid));
    }
    parts.join(", ")
}

/// Print a fatal error, with advice when it came from the library
pub fn fatal(err: &anyhow::Error) {
    error(&format!("{err:#}"));
    if let Some(lib) = err.downcast_ref::<schedkit::Error>() {
        let category = lib.category();
        dim(&format!("{}: {}", category.description(), category.advice()));
    }
}

// ============================================================================
// Tests
// ============================================================================
