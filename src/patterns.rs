//! Structural patterns describing the shape of a log line, and the registry
//! of predefined ones.

use regex::{Captures, Regex};

use crate::config::Field;
use crate::error::ConfigError;

/// Apache/nginx "combined" access log.
pub const APACHE2_ACCESS: &str = concat!(
    r"^(?P<ip>[0-9A-Fa-f.:]+)\s",
    r"\S+\s\S+\s",
    r"\[(?P<datetime>[^\]]+)\]\s",
    r#""(?P<method>GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS|UPDATE)\s"#,
    r"(?P<path>\S+)\s",
    r#"(?P<http_version>HTTP/[0-9.]+)"\s"#,
    r"(?P<status_code>\d{3})\s",
    r"(?P<content_size>\d+|-)\s",
    r#""(?P<referrer>[^"]*)"\s"#,
    r#""(?P<user_agent>[^"]*)"$"#,
);

/// Apache "common" access log, without referrer and user agent.
pub const APACHE2_COMMON: &str = concat!(
    r"^(?P<ip>[0-9A-Fa-f.:]+)\s",
    r"\S+\s\S+\s",
    r"\[(?P<datetime>[^\]]+)\]\s",
    r#""(?P<method>[A-Z]+)\s"#,
    r"(?P<path>\S+)\s",
    r#"(?P<http_version>HTTP/[0-9.]+)"\s"#,
    r"(?P<status_code>\d{3})\s",
    r"(?P<content_size>\d+|-)$",
);

const CUSTOM_NAME: &str = "custom";

/// A compiled line pattern whose named groups are all known [`Field`]s.
#[derive(Debug, Clone)]
pub struct StructuralPattern {
    name: String,
    source: String,
    regex: Regex,
    fields: Vec<Field>,
}

impl StructuralPattern {
    pub fn compile(name: impl Into<String>, source: &str) -> Result<Self, ConfigError> {
        let invalid = |source_err| ConfigError::InvalidPattern {
            pattern: source.to_string(),
            source: source_err,
        };
        // validate the pattern as written before wrapping it
        let plain = Regex::new(source).map_err(invalid)?;

        let mut fields = Vec::new();
        for group in plain.capture_names().flatten() {
            let field = Field::from_name(group).ok_or_else(|| ConfigError::UnknownField {
                pattern: source.to_string(),
                name: group.to_string(),
            })?;
            fields.push(field);
        }
        if fields.is_empty() {
            return Err(ConfigError::NoNamedGroups {
                pattern: source.to_string(),
            });
        }

        let regex = Regex::new(&format!(r"\A(?:{source})")).map_err(invalid)?;
        Ok(StructuralPattern {
            name: name.into(),
            source: source.to_string(),
            regex,
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn has(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }

    /// Fail unless every one of `fields` is captured by this pattern.
    pub fn require(&self, fields: &[Field]) -> Result<(), ConfigError> {
        match fields.iter().find(|f| !self.has(**f)) {
            Some(&field) => Err(ConfigError::MissingField {
                pattern: self.name.clone(),
                field,
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn captures<'h>(&self, line: &'h str) -> Option<Captures<'h>> {
        self.regex.captures(line)
    }
}

/// Named structural patterns. Built once, then only read.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: Vec<StructuralPattern>,
}

impl PatternRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Result<Self, ConfigError> {
        Self::empty()
            .with_pattern("apache2_access", APACHE2_ACCESS)?
            .with_pattern("apache2_common", APACHE2_COMMON)
    }

    /// Add or replace a named pattern.
    pub fn with_pattern(mut self, name: &str, source: &str) -> Result<Self, ConfigError> {
        let pattern = StructuralPattern::compile(name, source)?;
        match self.patterns.iter_mut().find(|p| p.name == name) {
            Some(slot) => *slot = pattern,
            None => self.patterns.push(pattern),
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&StructuralPattern> {
        self.patterns.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StructuralPattern> {
        self.patterns.iter()
    }

    /// Look `name_or_source` up by name, falling back to compiling it as a
    /// raw pattern.
    pub fn resolve(&self, name_or_source: &str) -> Result<StructuralPattern, ConfigError> {
        match self.get(name_or_source) {
            Some(pattern) => Ok(pattern.clone()),
            None => StructuralPattern::compile(CUSTOM_NAME, name_or_source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_compile_with_full_schema() {
        let registry = PatternRegistry::builtin().unwrap();
        let access = registry.get("apache2_access").unwrap();
        assert_eq!(access.fields(), &Field::ALL);
        let common = registry.get("apache2_common").unwrap();
        assert!(!common.has(Field::UserAgent));
        assert!(common.require(&[Field::Method, Field::Path]).is_ok());
    }

    #[test]
    fn resolve_prefers_registry_names() {
        let registry = PatternRegistry::builtin().unwrap();
        let pattern = registry.resolve("apache2_access").unwrap();
        assert_eq!(pattern.name(), "apache2_access");
        assert_eq!(pattern.as_str(), APACHE2_ACCESS);
    }

    #[test]
    fn resolve_compiles_raw_patterns() {
        let registry = PatternRegistry::builtin().unwrap();
        let pattern = registry.resolve(r"(?P<method>\w+) (?P<path>\S+)").unwrap();
        assert_eq!(pattern.name(), "custom");
        assert_eq!(pattern.fields(), &[Field::Method, Field::Path]);
    }

    #[test]
    fn malformed_pattern_is_rejected() {
        let registry = PatternRegistry::builtin().unwrap();
        let err = registry.resolve(r"(?P<path>[a-z").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn pattern_made_valid_only_by_wrapping_is_rejected() {
        let err = StructuralPattern::compile("x", r"a)|(?P<path>b").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn unknown_group_names_are_rejected() {
        let err = StructuralPattern::compile("x", r"(?P<level>\w+)").unwrap_err();
        match err {
            ConfigError::UnknownField { name, .. } => assert_eq!(name, "level"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn patterns_without_named_groups_are_rejected() {
        let err = StructuralPattern::compile("x", r"(\w+) (\S+)").unwrap_err();
        assert!(matches!(err, ConfigError::NoNamedGroups { .. }));
    }

    #[test]
    fn require_reports_the_missing_field() {
        let pattern = StructuralPattern::compile("x", r"(?P<ip>\S+)").unwrap();
        let err = pattern.require(&[Field::Method, Field::Path]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField { field: Field::Method, .. }
        ));
    }

    #[test]
    fn matching_is_anchored_at_line_start() {
        let pattern = StructuralPattern::compile("x", r"(?P<method>GET)").unwrap();
        assert!(pattern.captures("GET /").is_some());
        assert!(pattern.captures("x GET /").is_none());
    }

    #[test]
    fn with_pattern_replaces_existing_name() {
        let registry = PatternRegistry::builtin()
            .unwrap()
            .with_pattern("apache2_common", r"(?P<path>\S+)")
            .unwrap();
        assert_eq!(registry.iter().count(), 2);
        assert_eq!(
            registry.get("apache2_common").unwrap().fields(),
            &[Field::Path]
        );
    }
}
