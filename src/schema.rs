//! Schema files: one rule per line describing a tag's type, allowed values
//! and whether it is required.
//!
//! ```text
//! # comment
//! !accession $ *
//! ^sample.id $
//! age # 0 150
//! weight % 0.5 500
//! sex $ male female "not given"
//! keywords [$] *
//! lab.* $
//! !person.[].name $
//! ```
//!
//! A leading `!` makes the tag required at every leaf, `^` required and
//! unique per leaf. Types are `#` int, `%` float and `$` string; brackets
//! declare a list type. Any value may be a comma-separated list and each
//! element is checked against the rule. Numeric rules may take a
//! `min max` pair, string rules a list of allowed values (wildcards
//! allowed, `*` alone for anything).

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::error::{Result, TagStormError};
use crate::wildcard::{is_wild, Wildcard};

/// Placeholder standing for an array index inside a tag name.
pub const ARRAY_PLACEHOLDER: &str = "[]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Required {
    Optional,
    Required,
    /// Required, and the value must differ between leaves.
    RequiredUnique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Float,
    String,
}

impl ValueType {
    pub fn symbol(self) -> char {
        match self {
            ValueType::Int => '#',
            ValueType::Float => '%',
            ValueType::String => '$',
        }
    }
}

/// How a rule's name is matched against tag names.
#[derive(Debug, Clone)]
enum NameMatch {
    Exact,
    Wild(Wildcard),
    /// Array template: full-name matcher plus a matcher for any tag of the
    /// same element, capturing its index sequence.
    Template { full: Regex, element: Regex },
}

/// One rule of a schema.
#[derive(Debug, Clone)]
pub struct TagSchema {
    pub name: String,
    pub required: Required,
    pub value_type: ValueType,
    /// Declared as a list; affects inference and rendering only.
    pub is_array: bool,
    pub min_val: Option<f64>,
    pub max_val: Option<f64>,
    /// Allowed string values; empty means anything.
    pub allowed: Vec<Wildcard>,
    /// Pieces of an array-template name around each `[]`.
    pub fragments: Vec<String>,
    /// Line of the schema file the rule came from.
    pub line: usize,
    name_match: NameMatch,
}

impl TagSchema {
    pub fn is_template(&self) -> bool {
        matches!(self.name_match, NameMatch::Template { .. })
    }

    pub fn is_wild(&self) -> bool {
        matches!(self.name_match, NameMatch::Wild(_))
    }

    pub fn matches_name(&self, tag: &str) -> bool {
        match &self.name_match {
            NameMatch::Exact => self.name == tag,
            NameMatch::Wild(w) => w.matches(tag),
            NameMatch::Template { full, .. } => full.is_match(tag),
        }
    }

    pub fn allows_any(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Index sequence of `tag` if it belongs to an element of this array
    /// template, e.g. `["2"]` for `a.2.x` under `a.[].y`.
    pub fn element_indexes<'t>(&self, tag: &'t str) -> Option<Vec<&'t str>> {
        let NameMatch::Template { element, .. } = &self.name_match else {
            return None;
        };
        let caps = element.captures(tag)?;
        Some(
            caps.iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str())
                .collect(),
        )
    }

    /// The template name with each placeholder replaced by an index.
    pub fn qualified_name(&self, indexes: &[&str]) -> String {
        let mut name = String::new();
        for (ix, fragment) in self.fragments.iter().enumerate() {
            name.push_str(fragment);
            if let Some(index) = indexes.get(ix) {
                if ix + 1 < self.fragments.len() {
                    name.push_str(index);
                }
            }
        }
        name
    }
}

/// A parsed schema file.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    file: String,
    rules: Vec<TagSchema>,
    exact: HashMap<String, usize>,
    templates: Vec<usize>,
    wilds: Vec<usize>,
}

impl Schema {
    /// Parse schema text. Malformed lines are fatal.
    pub fn parse(text: &str, file: &str) -> Result<Schema> {
        let mut schema = Schema {
            file: file.to_string(),
            ..Schema::default()
        };
        for (ix, line) in text.lines().enumerate() {
            let line_no = ix + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let rule = parse_rule(trimmed, file, line_no)?;
            schema.add(rule);
        }
        debug!(file, rules = schema.rules.len(), "read schema");
        Ok(schema)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Schema> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TagStormError::io(path, e))?;
        Self::parse(&text, &path.display().to_string())
    }

    fn add(&mut self, rule: TagSchema) {
        let ix = self.rules.len();
        match rule.name_match {
            NameMatch::Exact => {
                self.exact.entry(rule.name.clone()).or_insert(ix);
            }
            NameMatch::Wild(_) => self.wilds.push(ix),
            NameMatch::Template { .. } => self.templates.push(ix),
        }
        self.rules.push(rule);
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn rules(&self) -> &[TagSchema] {
        &self.rules
    }

    /// Rule for a concrete tag: exact name first, then array templates,
    /// then wildcard names, each in file order.
    pub fn find_rule(&self, tag: &str) -> Option<&TagSchema> {
        if let Some(&ix) = self.exact.get(tag) {
            return Some(&self.rules[ix]);
        }
        self.templates
            .iter()
            .chain(self.wilds.iter())
            .map(|&ix| &self.rules[ix])
            .find(|rule| rule.matches_name(tag))
    }
}

/// Split a rule line into words. Double or single quotes group words
/// containing spaces.
fn split_words(line: &str, file: &str, line_no: usize) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };
        let mut word = String::new();
        if first == '"' || first == '\'' {
            chars.next();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == first {
                    closed = true;
                    break;
                }
                word.push(ch);
            }
            if !closed {
                return Err(TagStormError::schema_error(file, line_no, "Unterminated quote"));
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                word.push(ch);
                chars.next();
            }
        }
        words.push(word);
    }
    Ok(words)
}

fn parse_type(token: &str) -> Option<(ValueType, bool)> {
    let (inner, is_array) = match token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        Some(inner) => (inner, true),
        None => (token, false),
    };
    let value_type = match inner {
        "#" => ValueType::Int,
        "%" => ValueType::Float,
        "$" => ValueType::String,
        _ => return None,
    };
    Some((value_type, is_array))
}

fn template_matchers(fragments: &[String]) -> (String, String) {
    let mut full = String::from("^");
    let mut element = String::from("^");
    let last = fragments.len() - 1;
    for (ix, fragment) in fragments.iter().enumerate() {
        full.push_str(&regex::escape(fragment));
        if ix < last {
            full.push_str(r"(\d+)");
            element.push_str(&regex::escape(fragment));
            element.push_str(r"(\d+)");
        }
    }
    full.push('$');
    element.push_str(r"(?:\D|$)");
    (full, element)
}

fn parse_rule(line: &str, file: &str, line_no: usize) -> Result<TagSchema> {
    let err = |message: String| TagStormError::schema_error(file, line_no, message);
    let words = split_words(line, file, line_no)?;
    let [name_word, type_word, rest @ ..] = words.as_slice() else {
        return Err(err("Expecting at least a name and a type".to_string()));
    };

    let (required, name) = if let Some(name) = name_word.strip_prefix('!') {
        (Required::Required, name)
    } else if let Some(name) = name_word.strip_prefix('^') {
        (Required::RequiredUnique, name)
    } else {
        (Required::Optional, name_word.as_str())
    };
    if name.is_empty() {
        return Err(err("Missing tag name".to_string()));
    }

    let (value_type, is_array) =
        parse_type(type_word).ok_or_else(|| err(format!("Unrecognized type {}", type_word)))?;

    let mut fragments = Vec::new();
    let name_match = if name.contains(ARRAY_PLACEHOLDER) {
        fragments = name.split(ARRAY_PLACEHOLDER).map(str::to_string).collect();
        let (full, element) = template_matchers(&fragments);
        let full = Regex::new(&full).map_err(|e| err(e.to_string()))?;
        let element = Regex::new(&element).map_err(|e| err(e.to_string()))?;
        NameMatch::Template { full, element }
    } else if is_wild(name) {
        NameMatch::Wild(Wildcard::new(name).map_err(|e| err(e.to_string()))?)
    } else {
        NameMatch::Exact
    };

    let mut min_val = None;
    let mut max_val = None;
    let mut allowed = Vec::new();
    match value_type {
        ValueType::Int | ValueType::Float => match rest {
            [] => {}
            [min, max] => {
                let parse = |s: &String| {
                    s.parse::<f64>()
                        .map_err(|_| err(format!("Expecting number got {}", s)))
                };
                min_val = Some(parse(min)?);
                max_val = Some(parse(max)?);
            }
            _ => return Err(err("Expecting min and max after numeric type".to_string())),
        },
        ValueType::String => {
            if !rest.iter().any(|v| v == "*") {
                allowed = rest
                    .iter()
                    .map(|v| Wildcard::new(v).map_err(|e| err(e.to_string())))
                    .collect::<Result<_>>()?;
            }
        }
    }

    Ok(TagSchema {
        name: name.to_string(),
        required,
        value_type,
        is_array,
        min_val,
        max_val,
        allowed,
        fragments,
        line: line_no,
        name_match,
    })
}
