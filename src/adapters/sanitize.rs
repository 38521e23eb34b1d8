//! Log sanitization for health data and key material.
//!
//! Applied to every formatted log line before it reaches a sink. Redacts:
//! - Clinical feature values written as `Name=value`
//! - Numeric vectors (feature rows, weights, decrypted slots)
//! - Long hex or base64 runs (serialized keys, ciphertext dumps)
//! - Contextual secrets such as `secret_key=...`
//! - Email addresses
//!
//! Context and model fingerprints are 16 hex digits and stay readable.
//!
//! # Performance / DoS
//!
//! `sanitize()` caps its input (see `GLYCOSECURE_SANITIZE_MAX_BYTES`) and
//! checks a single `RegexSet` before running any replacement.

use regex::{Regex, RegexSet};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

/// Default per-call cap, overridable via `GLYCOSECURE_SANITIZE_MAX_BYTES`.
const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;

/// Column names of the diabetes feature set.
const FEATURE_NAMES: &str = "pregnancies|glucose|blood_?pressure|skin_?thickness|insulin|bmi|diabetes_?pedigree_?function|age";

struct Rule {
    regex: Regex,
    replacement: &'static str,
}

struct Patterns {
    set: RegexSet,
    rules: Vec<Rule>,
}

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> (&str, bool) {
    if input.len() <= max_bytes {
        return (input, false);
    }
    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

fn max_sanitize_bytes() -> usize {
    std::env::var("GLYCOSECURE_SANITIZE_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES)
}

fn rule_sources() -> Vec<(String, &'static str)> {
    let number = r"-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?";
    vec![
        (
            format!(r"(?i)\b(?:{FEATURE_NAMES})\b\s*[:=]\s*{number}"),
            "[REDACTED-FEATURE]",
        ),
        // Four or more numbers in brackets
        (
            format!(r"\[\s*{number}(?:\s*,\s*{number}){{3,}}\s*,?\s*\]"),
            "[REDACTED-VECTOR]",
        ),
        (
            r"(?i)\b(?:secret[_-]?key|private[_-]?key|secret|seed|password|token|sk)\b\s*[:=]\s*\S{8,}"
                .to_string(),
            "[REDACTED-SECRET]",
        ),
        (
            r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b"
                .to_string(),
            "[REDACTED-EMAIL]",
        ),
        (r"\b[0-9a-fA-F]{32,}\b".to_string(), "[REDACTED-KEY]"),
        (r"[A-Za-z0-9+/]{64,}={0,2}".to_string(), "[REDACTED-BLOB]"),
    ]
}

fn get_patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| {
        let sources = rule_sources();
        // Sources are literals above; a failure here is a programming error
        // caught by the unit tests.
        let set = RegexSet::new(sources.iter().map(|(p, _)| p.as_str()))
            .unwrap_or_else(|_| RegexSet::empty());
        let rules = sources
            .into_iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(&pattern)
                    .ok()
                    .map(|regex| Rule { regex, replacement })
            })
            .collect();
        Patterns { set, rules }
    })
}

/// Replace sensitive patterns in `input`.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_with_limit(input, max_sanitize_bytes())
}

fn sanitize_with_limit(input: &str, max_bytes: usize) -> String {
    let patterns = get_patterns();
    let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);

    let mut result = prefix.to_string();
    if patterns.set.is_match(prefix) {
        for idx in patterns.set.matches(prefix).into_iter() {
            if let Some(rule) = patterns.rules.get(idx) {
                result = rule
                    .regex
                    .replace_all(&result, rule.replacement)
                    .into_owned();
            }
        }
    }

    if truncated {
        result.push_str(" [TRUNCATED]");
    }
    result
}

/// Whether `input` holds anything [`sanitize`] would redact.
#[must_use]
pub fn contains_sensitive(input: &str) -> bool {
    let (prefix, _) = truncate_to_char_boundary(input, max_sanitize_bytes());
    get_patterns().set.is_match(prefix)
}

/// `MakeWriter` wrapper that sanitizes each formatted line before it is
/// written to the inner sink.
#[derive(Debug)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<M: Clone> Clone for SanitizingMakeWriter<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub struct SanitizingWriter<W> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W> SanitizingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }
}

impl<W: std::io::Write> SanitizingWriter<W> {
    fn flush_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            // Clean lines within the limit pass through untouched.
            if line.len() <= max_sanitize_bytes() && !contains_sensitive(&text) {
                self.inner.write_all(&line)?;
                continue;
            }
            let sanitized = sanitize(&text);
            self.inner.write_all(sanitized.as_bytes())?;
        }
        Ok(())
    }
}

impl<W: std::io::Write> std::io::Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        // A single huge line with no newline is flushed early.
        let hard_cap = max_sanitize_bytes().saturating_mul(2);
        if self.buffer.len() > hard_cap {
            let sanitized = sanitize(&String::from_utf8_lossy(&self.buffer));
            self.inner.write_all(sanitized.as_bytes())?;
            self.inner.write_all(b"\n")?;
            self.buffer.clear();
            return Ok(buf.len());
        }

        self.flush_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_lines()?;
        if !self.buffer.is_empty() {
            let sanitized = sanitize(&String::from_utf8_lossy(&self.buffer));
            self.inner.write_all(sanitized.as_bytes())?;
            self.buffer.clear();
        }
        self.inner.flush()
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter::new(self.inner.make_writer())
    }
}
