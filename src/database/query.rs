//! Compiles search parameters and smart-folder rules into SQL predicates
//! over the `media` table (aliased `m`).
//!
//! Both paths produce a [`Filter`]: a list of clauses ANDed together plus the
//! values bound to their placeholders, in order.

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{LibraryError, Result};

pub const RULE_VERSION: u32 = 1;
pub const MAX_RATING: u8 = 5;

/// Trigram tokens need at least this many characters to match anything.
const FTS_MIN_CHARS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = SqlValue>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    fn mime_prefix(&mut self, prefix: &str) {
        let prefix = prefix.trim();
        let pattern = if prefix.contains('/') {
            format!("{}%", escape_like(prefix))
        } else {
            format!("{}/%", escape_like(prefix))
        };
        self.push("m.mime LIKE ? ESCAPE '\\'", [SqlValue::Text(pattern)]);
    }

    fn text(&mut self, query: &str) {
        let query = query.trim();
        if query.chars().count() >= FTS_MIN_CHARS {
            self.push(
                "m.id IN (SELECT media_id FROM media_fts WHERE media_fts MATCH ?)",
                [SqlValue::Text(fts_phrase(query))],
            );
        } else {
            let pattern = format!("%{}%", escape_like(query));
            self.push(
                "m.id IN (SELECT media_id FROM media_fts \
                 WHERE title LIKE ? ESCAPE '\\' OR note LIKE ? ESCAPE '\\')",
                [SqlValue::Text(pattern.clone()), SqlValue::Text(pattern)],
            );
        }
    }

    fn tag_names(&mut self, names: &[String]) {
        let placeholders = vec!["?"; names.len()].join(", ");
        self.push(
            format!(
                "m.id IN (SELECT mt.media_id FROM media_tags mt \
                 JOIN tags t ON t.id = mt.tag_id WHERE t.name IN ({}))",
                placeholders
            ),
            names.iter().cloned().map(SqlValue::Text),
        );
    }

    fn rating_at_least(&mut self, rating: u8) {
        self.push("m.rating >= ?", [SqlValue::Integer(rating as i64)]);
    }

    fn imported_after(&mut self, timestamp_ms: i64) {
        self.push("m.imported_at >= ?", [SqlValue::Integer(timestamp_ms)]);
    }

    fn title_contains(&mut self, needle: &str) {
        self.push(
            "m.title LIKE ? ESCAPE '\\'",
            [SqlValue::Text(format!("%{}%", escape_like(needle.trim())))],
        );
    }
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Quotes the whole query as one FTS5 phrase, so it matches as a substring.
fn fts_phrase(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Ad-hoc search. Every field is optional; blank strings are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchParams {
    pub text: Option<String>,
    pub tag: Option<String>,
    pub mime_prefix: Option<String>,
}

pub fn compile_search(params: &SearchParams) -> Filter {
    let mut filter = Filter::default();
    if let Some(prefix) = non_blank(params.mime_prefix.as_deref()) {
        filter.mime_prefix(prefix);
    }
    if let Some(text) = non_blank(params.text.as_deref()) {
        filter.text(text);
    }
    if let Some(tag) = non_blank(params.tag.as_deref()) {
        filter.tag_names(&[tag.to_string()]);
    }
    filter
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", deny_unknown_fields)]
pub enum RulePredicate {
    MimePrefix { value: String },
    TagIn { names: Vec<String> },
    RatingAtLeast { value: u8 },
    ImportedAfter { value: i64 },
    TitleContains { value: String },
}

/// Serialized smart-folder rule, version 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmartRule {
    pub version: u32,
    #[serde(default)]
    pub predicates: Vec<RulePredicate>,
}

/// Unversioned flat rule written by older libraries.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LegacyRule {
    mime_prefix: Option<String>,
    tag: Option<String>,
    tags: Option<Vec<String>>,
    rating_gte: Option<u8>,
    imported_after: Option<i64>,
    title_contains: Option<String>,
}

impl From<LegacyRule> for SmartRule {
    fn from(legacy: LegacyRule) -> Self {
        let mut predicates = Vec::new();
        if let Some(prefix) = non_blank(legacy.mime_prefix.as_deref()) {
            predicates.push(RulePredicate::MimePrefix {
                value: prefix.to_string(),
            });
        }
        let mut names = legacy.tags.unwrap_or_default();
        names.extend(legacy.tag);
        if names.iter().any(|n| !n.trim().is_empty()) {
            predicates.push(RulePredicate::TagIn { names });
        }
        if let Some(value) = legacy.rating_gte {
            predicates.push(RulePredicate::RatingAtLeast { value });
        }
        if let Some(value) = legacy.imported_after {
            predicates.push(RulePredicate::ImportedAfter { value });
        }
        if let Some(value) = non_blank(legacy.title_contains.as_deref()) {
            predicates.push(RulePredicate::TitleContains {
                value: value.to_string(),
            });
        }
        SmartRule {
            version: RULE_VERSION,
            predicates,
        }
    }
}

impl SmartRule {
    pub fn new(predicates: Vec<RulePredicate>) -> Self {
        Self {
            version: RULE_VERSION,
            predicates,
        }
    }

    /// Parses and validates a stored rule.
    ///
    /// Documents carrying a `version` key use the tagged predicate list;
    /// anything else is read as the legacy flat object. Unknown keys are
    /// rejected in both forms.
    pub fn parse(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)
            .map_err(|e| LibraryError::invalid(format!("malformed smart folder rule: {}", e)))?;
        let versioned = match &value {
            JsonValue::Object(map) => map.contains_key("version"),
            _ => return Err(LibraryError::invalid("smart folder rule must be a JSON object")),
        };

        let rule = if versioned {
            serde_json::from_value::<SmartRule>(value)
        } else {
            serde_json::from_value::<LegacyRule>(value).map(SmartRule::from)
        }
        .map_err(|e| LibraryError::invalid(format!("invalid smart folder rule: {}", e)))?;

        rule.validate()?;
        Ok(rule)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.version != RULE_VERSION {
            return Err(LibraryError::invalid(format!(
                "unsupported smart folder rule version {}",
                self.version
            )));
        }
        for predicate in &self.predicates {
            match predicate {
                RulePredicate::MimePrefix { value } if value.trim().is_empty() => {
                    return Err(LibraryError::invalid("mimePrefix must not be empty"));
                }
                RulePredicate::TitleContains { value } if value.trim().is_empty() => {
                    return Err(LibraryError::invalid("titleContains must not be empty"));
                }
                RulePredicate::TagIn { names } if names.iter().all(|n| n.trim().is_empty()) => {
                    return Err(LibraryError::invalid("tagIn needs at least one tag name"));
                }
                RulePredicate::RatingAtLeast { value } if *value > MAX_RATING => {
                    return Err(LibraryError::invalid(format!(
                        "ratingAtLeast must be between 0 and {}",
                        MAX_RATING
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// All tag names are OR'd into a single predicate; everything else is ANDed.
    pub fn compile(&self) -> Filter {
        let mut filter = Filter::default();
        let mut tag_names: Vec<String> = Vec::new();

        for predicate in &self.predicates {
            match predicate {
                RulePredicate::MimePrefix { value } => filter.mime_prefix(value),
                RulePredicate::TagIn { names } => {
                    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
                        if !tag_names.iter().any(|existing| existing == name) {
                            tag_names.push(name.to_string());
                        }
                    }
                }
                RulePredicate::RatingAtLeast { value } => filter.rating_at_least(*value),
                RulePredicate::ImportedAfter { value } => filter.imported_after(*value),
                RulePredicate::TitleContains { value } => filter.title_contains(value),
            }
        }

        if !tag_names.is_empty() {
            filter.tag_names(&tag_names);
        }
        filter
    }
}

pub fn compile_rule(json: &str) -> Result<Filter> {
    Ok(SmartRule::parse(json)?.compile())
}
