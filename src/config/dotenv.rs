use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::warn;

pub const ENV_FILE: &str = ".env";

/// One accepted `KEY=value` assignment from the env file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub line: usize,
    pub key: String,
    pub value: String,
}

/// Builds the variable map settings are resolved against: `<root>/.env`
/// first, then `process` on top. A missing file contributes nothing.
pub fn layered_env<I>(root: &Path, process: I) -> Result<HashMap<String, String>, std::io::Error>
where
    I: IntoIterator<Item = (String, String)>,
{
    let path = root.join(ENV_FILE);
    let mut env = HashMap::new();
    if path.is_file() {
        let raw = fs::read_to_string(path)?;
        for entry in parse_env_file(raw.as_str()) {
            env.insert(entry.key, entry.value);
        }
    }
    env.extend(process);
    Ok(env)
}

/// Parses env-file assignments in file order. Lines that are not a valid
/// assignment are skipped with a warning naming the line number.
pub fn parse_env_file(raw: &str) -> Vec<EnvEntry> {
    let mut entries = Vec::new();
    for (index, text) in raw.lines().enumerate() {
        let line = index + 1;
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let assignment = trimmed
            .strip_prefix("export")
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .map(str::trim_start)
            .unwrap_or(trimmed);

        let Some((key, value)) = assignment.split_once('=') else {
            warn!(line, "env file line is not KEY=value; skipped");
            continue;
        };
        let key = key.trim_end();
        if !is_env_name(key) {
            warn!(line, key, "env file key is not a valid variable name; skipped");
            continue;
        }
        entries.push(EnvEntry {
            line,
            key: key.to_string(),
            value: env_value(value.trim()),
        });
    }
    entries
}

fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(first) if first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn env_value(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].to_string();
    }
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return unescape_double_quoted(&raw[1..raw.len() - 1]);
    }
    match raw.find(" #") {
        Some(at) => raw[..at].trim_end().to_string(),
        None => raw.to_string(),
    }
}

fn unescape_double_quoted(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
