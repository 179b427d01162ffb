use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::config::ValidateConfig;
use crate::csv::csv_split;
use crate::schema::{Required, Schema, TagSchema, ValueType};
use crate::tree::{StanzaId, TagStorm};

// ── Error types ─────────────────────────────────────────────────────

/// A problem found during schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaError {
    pub message: String,
    /// Tag the problem is about.
    pub tag: String,
    /// Start line of the stanza where it was found.
    pub line: usize,
    /// Machine-readable error code.
    pub code: &'static str,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} line {}", self.message, self.line)
    }
}

/// Outcome of validating a whole storm.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<SchemaError>,
    /// Validation stopped early because the error cap was reached.
    pub hit_limit: bool,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

// ── Validator ───────────────────────────────────────────────────────

/// Running state of one validation pass.
struct Validator<'a> {
    schema: &'a Schema,
    storm: &'a TagStorm,
    max_errors: usize,
    errors: Vec<SchemaError>,
    /// Per unique tag: value → start line of the leaf that had it.
    unique_seen: HashMap<&'a str, HashMap<&'a str, usize>>,
}

/// Check every tag of `storm` against `schema`, stopping once
/// `config.max_errors` problems have been found.
pub fn validate_storm(schema: &Schema, storm: &TagStorm, config: &ValidateConfig) -> ValidationReport {
    let mut validator = Validator {
        schema,
        storm,
        max_errors: config.max_errors,
        errors: Vec::new(),
        unique_seen: HashMap::new(),
    };

    for id in storm.walk() {
        if validator.full() {
            break;
        }
        validator.check_stanza(id);
    }

    let hit_limit = validator.full();
    if hit_limit {
        warn!(
            file = storm.file_name(),
            max_errors = validator.max_errors,
            "validation stopped at error limit"
        );
    }
    debug!(
        file = storm.file_name(),
        errors = validator.errors.len(),
        "validated tag storm"
    );
    ValidationReport {
        errors: validator.errors,
        hit_limit,
    }
}

impl<'a> Validator<'a> {
    fn full(&self) -> bool {
        self.errors.len() >= self.max_errors
    }

    fn report(&mut self, code: &'static str, tag: &str, line: usize, message: String) {
        if self.full() {
            return;
        }
        self.errors.push(SchemaError {
            message,
            tag: tag.to_string(),
            line,
            code,
        });
    }

    fn check_stanza(&mut self, id: StanzaId) {
        let (schema, storm) = (self.schema, self.storm);
        let stanza = storm.stanza(id);
        let line = stanza.start_line();
        for pair in stanza.tags() {
            match schema.find_rule(&pair.name) {
                Some(rule) => self.check_tag(rule, &pair.name, &pair.val, line),
                None => self.report(
                    "unknown-tag",
                    &pair.name,
                    line,
                    format!("Unrecognized tag {}", pair.name),
                ),
            }
        }
        if stanza.is_leaf() {
            self.check_required(id);
        }
    }

    /// Every value is a CSV list; each element must satisfy the rule.
    fn check_tag(&mut self, rule: &TagSchema, tag: &str, val: &str, line: usize) {
        match csv_split(val) {
            Ok(elements) => {
                for element in &elements {
                    self.check_value(rule, tag, element, line);
                }
            }
            Err(e) => self.report("bad-csv", tag, line, format!("Tag {}: {}", tag, e)),
        }
    }

    fn check_value(&mut self, rule: &TagSchema, tag: &str, val: &str, line: usize) {
        match rule.value_type {
            ValueType::Int => match val.parse::<i64>() {
                Ok(n) => self.check_range(rule, tag, n as f64, val, line),
                Err(_) => self.report(
                    "not-int",
                    tag,
                    line,
                    format!("Non-integer value {} for {}", val, tag),
                ),
            },
            ValueType::Float => match val.parse::<f64>() {
                Ok(x) => self.check_range(rule, tag, x, val, line),
                Err(_) => self.report(
                    "not-float",
                    tag,
                    line,
                    format!("Non-numerical value {} for {}", val, tag),
                ),
            },
            ValueType::String => {
                if !rule.allows_any() && !rule.allowed.iter().any(|w| w.matches(val)) {
                    self.report(
                        "not-allowed",
                        tag,
                        line,
                        format!("Unrecognized value '{}' for tag {}", val, tag),
                    );
                }
            }
        }
    }

    fn check_range(&mut self, rule: &TagSchema, tag: &str, x: f64, val: &str, line: usize) {
        let below = rule.min_val.map_or(false, |min| x < min);
        let above = rule.max_val.map_or(false, |max| x > max);
        if below || above {
            self.report(
                "out-of-range",
                tag,
                line,
                format!(
                    "{} value {} out of range {} to {}",
                    tag,
                    val,
                    rule.min_val.unwrap_or(f64::NEG_INFINITY),
                    rule.max_val.unwrap_or(f64::INFINITY)
                ),
            );
        }
    }

    /// Leaf checks: required tags resolve somewhere on the ancestor chain,
    /// unique tags differ between leaves, and every element of a required
    /// array has the required member.
    fn check_required(&mut self, leaf: StanzaId) {
        let schema = self.schema;
        let storm = self.storm;
        let line = storm.stanza(leaf).start_line();
        for rule in schema.rules() {
            if rule.required == Required::Optional || rule.is_wild() {
                continue;
            }
            if rule.is_template() {
                self.check_array_required(rule, leaf, line);
                continue;
            }
            let Some(val) = storm.find_val(leaf, &rule.name) else {
                self.report(
                    "missing-required",
                    &rule.name,
                    line,
                    format!("Missing required tag {}", rule.name),
                );
                continue;
            };
            if rule.required == Required::RequiredUnique {
                let seen = self.unique_seen.entry(rule.name.as_str()).or_default();
                if let Some(&first_line) = seen.get(val) {
                    self.report(
                        "not-unique",
                        &rule.name,
                        line,
                        format!(
                            "Value {} of tag {} not unique, also used in stanza at line {}",
                            val, rule.name, first_line
                        ),
                    );
                } else {
                    seen.insert(val, line);
                }
            }
        }
    }

    fn check_array_required(&mut self, rule: &TagSchema, leaf: StanzaId, line: usize) {
        let storm = self.storm;
        let tags = storm.tags_including_parents(leaf);
        let mut groups: Vec<Vec<&str>> = Vec::new();
        for pair in &tags {
            if let Some(indexes) = rule.element_indexes(&pair.name) {
                if !groups.contains(&indexes) {
                    groups.push(indexes);
                }
            }
        }
        for indexes in groups {
            let full_name = rule.qualified_name(&indexes);
            if !tags.iter().any(|p| p.name == full_name) {
                let element: String = indexes.iter().map(|i| format!(".{}", i)).collect();
                self.report(
                    "missing-array-required",
                    &full_name,
                    line,
                    format!(
                        "Missing required tag {} for element {} of {}",
                        full_name, element, rule.name
                    ),
                );
            }
        }
    }
}
