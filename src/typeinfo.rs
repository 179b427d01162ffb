//! Per-tag type inference: which tags hold integers, which numbers, how
//! wide their values get, and which hold lists.

use std::collections::HashMap;

use tracing::debug;

use crate::csv::{csv_join, csv_split};
use crate::schema::ValueType;
use crate::tree::TagStorm;

/// What has been observed about the values of one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagTypeInfo {
    pub name: String,
    /// Every value so far is a non-negative integer.
    pub is_unsigned: bool,
    /// Every value so far parses as a 64-bit integer.
    pub is_int: bool,
    /// Every value so far parses as a finite number.
    pub is_num: bool,
    pub min_val: f64,
    pub max_val: f64,
    /// Longest value seen, in characters.
    pub max_chars: usize,
    /// Number of values seen.
    pub count: usize,
    /// Seen with several values in one stanza, or with a list value.
    pub is_array: bool,
}

/// SQL column type chosen for a tag, with its contribution to row width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    pub sql: String,
    pub width: usize,
    pub is_string: bool,
}

impl ColumnType {
    fn number(sql: &str, width: usize) -> Self {
        ColumnType {
            sql: sql.to_string(),
            width,
            is_string: false,
        }
    }
}

const UNSIGNED_TIERS: [(f64, &str, usize); 4] = [
    (255.0, "tinyint unsigned", 1),
    (65535.0, "smallint unsigned", 2),
    (16777215.0, "mediumint unsigned", 3),
    (4294967295.0, "int unsigned", 4),
];

const SIGNED_TIERS: [(f64, f64, &str, usize); 4] = [
    (-128.0, 127.0, "tinyint", 1),
    (-32768.0, 32767.0, "smallint", 2),
    (-8388608.0, 8388607.0, "mediumint", 3),
    (-2147483648.0, 2147483647.0, "int", 4),
];

/// Width counted for a longblob column, which is stored off-row.
const BLOB_WIDTH: usize = 12;

impl TagTypeInfo {
    pub fn new(name: &str) -> Self {
        TagTypeInfo {
            name: name.to_string(),
            is_unsigned: true,
            is_int: true,
            is_num: true,
            min_val: f64::INFINITY,
            max_val: f64::NEG_INFINITY,
            max_chars: 0,
            count: 0,
            is_array: false,
        }
    }

    /// Fold one scalar value into the numeric classification.
    pub fn add_scalar(&mut self, val: &str) {
        if self.is_unsigned && val.parse::<u64>().is_err() {
            self.is_unsigned = false;
        }
        if self.is_int && val.parse::<i64>().is_err() {
            self.is_int = false;
        }
        if self.is_num {
            match val.parse::<f64>() {
                Ok(x) if x.is_finite() => {
                    self.min_val = self.min_val.min(x);
                    self.max_val = self.max_val.max(x);
                }
                _ => {
                    self.is_num = false;
                    self.is_int = false;
                    self.is_unsigned = false;
                }
            }
        }
    }

    /// Fold one whole tag value. List values mark the tag as an array and
    /// each element is classified on its own.
    pub fn add(&mut self, val: &str) {
        self.count += 1;
        self.max_chars = self.max_chars.max(val.chars().count());
        if val.contains(',') {
            if let Ok(elements) = csv_split(val) {
                if elements.len() > 1 {
                    self.is_array = true;
                    for element in &elements {
                        self.add_scalar(element);
                    }
                    return;
                }
            }
        }
        self.add_scalar(val);
    }

    pub fn value_type(&self) -> ValueType {
        if self.is_int {
            ValueType::Int
        } else if self.is_num {
            ValueType::Float
        } else {
            ValueType::String
        }
    }

    /// Pick the narrowest column type that holds every value seen. Strings
    /// longer than `max_varchar` become blobs.
    pub fn column_type(&self, max_varchar: usize) -> ColumnType {
        if !self.is_array && self.count > 0 {
            if self.is_unsigned {
                let (sql, width) = UNSIGNED_TIERS
                    .iter()
                    .find(|(max, _, _)| self.max_val <= *max)
                    .map(|&(_, sql, width)| (sql, width))
                    .unwrap_or(("bigint unsigned", 8));
                return ColumnType::number(sql, width);
            }
            if self.is_int {
                let (sql, width) = SIGNED_TIERS
                    .iter()
                    .find(|(min, max, _, _)| self.min_val >= *min && self.max_val <= *max)
                    .map(|&(_, _, sql, width)| (sql, width))
                    .unwrap_or(("bigint", 8));
                return ColumnType::number(sql, width);
            }
            if self.is_num {
                return ColumnType::number("double", 8);
            }
        }
        if self.max_chars <= max_varchar {
            let n = self.max_chars.max(1);
            ColumnType {
                sql: format!("varchar({})", n),
                width: n + 1,
                is_string: true,
            }
        } else {
            ColumnType {
                sql: "longblob".to_string(),
                width: BLOB_WIDTH,
                is_string: true,
            }
        }
    }

    /// A draft schema rule describing what was seen.
    pub fn schema_line(&self) -> String {
        let value_type = if self.is_array {
            ValueType::String
        } else {
            self.value_type()
        };
        let symbol = if self.is_array {
            format!("[{}]", value_type.symbol())
        } else {
            value_type.symbol().to_string()
        };
        match value_type {
            ValueType::Int => format!(
                "{} {} {} {}",
                self.name, symbol, self.min_val as i64, self.max_val as i64
            ),
            ValueType::Float => format!("{} {} {} {}", self.name, symbol, self.min_val, self.max_val),
            ValueType::String => format!("{} {} *", self.name, symbol),
        }
    }
}

/// Infer a type for every tag of the storm, in order of first appearance.
pub fn infer_types(storm: &TagStorm) -> Vec<TagTypeInfo> {
    let mut infos: Vec<TagTypeInfo> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for id in storm.walk() {
        let tags = storm.stanza(id).tags();
        let mut repeats: HashMap<&str, Vec<&str>> = HashMap::new();
        for pair in tags {
            let ix = *index.entry(pair.name.as_str()).or_insert_with(|| {
                infos.push(TagTypeInfo::new(&pair.name));
                infos.len() - 1
            });
            infos[ix].add(&pair.val);
            repeats.entry(pair.name.as_str()).or_default().push(&pair.val);
        }
        for (name, vals) in repeats {
            if vals.len() > 1 {
                let info = &mut infos[index[name]];
                info.is_array = true;
                info.max_chars = info.max_chars.max(csv_join(&vals).chars().count());
            }
        }
    }
    debug!(file = storm.file_name(), tags = infos.len(), "inferred tag types");
    infos
}
