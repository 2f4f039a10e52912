//! Canonical URL path templates.
//!
//! A path is first stripped of its query string, then folded through an
//! ordered list of substitution patterns. Each pattern that matches replaces
//! every occurrence of each captured value with `<group_name>`; later
//! patterns see the output of earlier ones. Placeholders already in the path
//! are never rewritten, so templating a template is a no-op.

use memchr::{memchr, memchr2};
use regex::Regex;
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::Path;

use crate::error::ConfigError;

/// Path without its `?query` or `#fragment`.
pub fn strip_query(path: &str) -> &str {
    match memchr2(b'?', b'#', path.as_bytes()) {
        Some(i) => &path[..i],
        None => path,
    }
}

/// One compiled substitution pattern, e.g. `/feedapi/(?P<appid>\w+)/products/`.
#[derive(Debug, Clone)]
pub struct SubstitutionPattern {
    source: String,
    regex: Regex,
    names: Vec<String>,
}

impl SubstitutionPattern {
    pub fn compile(source: &str) -> Result<Self, ConfigError> {
        let invalid = |err| ConfigError::InvalidPattern {
            pattern: source.to_string(),
            source: err,
        };
        let plain = Regex::new(source).map_err(invalid)?;
        let names: Vec<String> = plain.capture_names().flatten().map(String::from).collect();
        if names.is_empty() {
            return Err(ConfigError::NoNamedGroups {
                pattern: source.to_string(),
            });
        }
        let regex = Regex::new(&format!(r"\A(?:{source})")).map_err(invalid)?;
        Ok(SubstitutionPattern {
            source: source.to_string(),
            regex,
            names,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Rewrite `path` if this pattern matches its start, else return it as is.
    pub fn apply(&self, path: &str) -> String {
        let Some(caps) = self.regex.captures(path) else {
            return path.to_string();
        };

        let spans = placeholder_spans(path);
        let mut subs: Vec<(&str, String)> = self
            .names
            .iter()
            .filter_map(|name| caps.name(name).map(|m| (name, m)))
            .filter(|(_, m)| !m.as_str().is_empty())
            // a value cut from an existing placeholder would corrupt it
            .filter(|(_, m)| {
                !spans
                    .iter()
                    .any(|span| m.start() < span.end && span.start < m.end())
            })
            .map(|(name, m)| (m.as_str(), format!("<{name}>")))
            .collect();
        // longest value wins where one captured value is a prefix of another
        subs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        replace_values(path, &subs)
    }
}

/// Length of the `<name>` placeholder at the start of `s`, if there is one.
fn placeholder_len(s: &str) -> Option<usize> {
    let name = s.strip_prefix('<')?;
    let end = memchr(b'>', name.as_bytes())?;
    let valid = end > 0
        && name.as_bytes()[..end]
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'[' | b']'));
    valid.then_some(end + 2)
}

fn placeholder_spans(path: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(i) = memchr(b'<', &path.as_bytes()[from..]) {
        let start = from + i;
        match placeholder_len(&path[start..]) {
            Some(len) => {
                spans.push(start..start + len);
                from = start + len;
            }
            None => from = start + 1,
        }
    }
    spans
}

/// Replace every occurrence of each value in a single left-to-right scan, so
/// text inserted for one value is never rewritten by another. Placeholders
/// already present are copied through untouched.
fn replace_values(haystack: &str, subs: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(haystack.len());
    let mut rest = haystack;
    'scan: while !rest.is_empty() {
        if let Some(len) = placeholder_len(rest) {
            out.push_str(&rest[..len]);
            rest = &rest[len..];
            continue;
        }
        for (value, placeholder) in subs {
            if let Some(tail) = rest.strip_prefix(*value) {
                out.push_str(placeholder);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        let Some(ch) = chars.next() else { break };
        out.push(ch);
        rest = chars.as_str();
    }
    out
}

/// Ordered substitution patterns. An empty templater only strips queries.
#[derive(Debug, Clone, Default)]
pub struct PathTemplater {
    patterns: Vec<SubstitutionPattern>,
}

impl PathTemplater {
    pub fn new(patterns: Vec<SubstitutionPattern>) -> Self {
        PathTemplater { patterns }
    }

    pub fn compile<I, S>(sources: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        sources
            .into_iter()
            .map(|s| SubstitutionPattern::compile(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(PathTemplater::new)
    }

    /// Load a JSON array of pattern strings.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let sources: Vec<String> =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                ConfigError::PatternFile {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        Self::compile(sources)
    }

    /// Append patterns after the existing ones.
    pub fn extend(&mut self, more: PathTemplater) {
        self.patterns.extend(more.patterns);
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn canonicalize(&self, path: &str) -> String {
        self.patterns
            .iter()
            .fold(strip_query(path).to_string(), |acc, p| p.apply(&acc))
    }
}
