use std::collections::HashMap;
use std::io::Write;

use tracing::debug;

use crate::config::SqlConfig;
use crate::csv::csv_join;
use crate::error::{Result, TagStormError};
use crate::tree::{StanzaId, TagStorm};
use crate::typeinfo::{infer_types, ColumnType, TagTypeInfo};

/// Words MySQL will not take as a bare column name.
const RESERVED_WORDS: &[&str] = &[
    "ACCESSIBLE", "ADD", "ALL", "ALTER", "ANALYZE", "AND", "AS", "ASC", "ASENSITIVE", "BEFORE",
    "BETWEEN", "BIGINT", "BINARY", "BLOB", "BOTH", "BY", "CALL", "CASCADE", "CASE", "CHANGE",
    "CHAR", "CHARACTER", "CHECK", "COLLATE", "COLUMN", "CONDITION", "CONSTRAINT", "CONTINUE",
    "CONVERT", "CREATE", "CROSS", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP",
    "CURRENT_USER", "CURSOR", "DATABASE", "DATABASES", "DAY_HOUR", "DAY_MICROSECOND",
    "DAY_MINUTE", "DAY_SECOND", "DEC", "DECIMAL", "DECLARE", "DEFAULT", "DELAYED", "DELETE",
    "DESC", "DESCRIBE", "DETERMINISTIC", "DISTINCT", "DISTINCTROW", "DIV", "DOUBLE", "DROP",
    "DUAL", "EACH", "ELSE", "ELSEIF", "ENCLOSED", "ESCAPED", "EXISTS", "EXIT", "EXPLAIN",
    "FALSE", "FETCH", "FLOAT", "FLOAT4", "FLOAT8", "FOR", "FORCE", "FOREIGN", "FROM",
    "FULLTEXT", "GRANT", "GROUP", "HAVING", "HIGH_PRIORITY", "HOUR_MICROSECOND", "HOUR_MINUTE",
    "HOUR_SECOND", "IF", "IGNORE", "IN", "INDEX", "INFILE", "INNER", "INOUT", "INSENSITIVE",
    "INSERT", "INT", "INT1", "INT2", "INT3", "INT4", "INT8", "INTEGER", "INTERVAL", "INTO",
    "IS", "ITERATE", "JOIN", "KEY", "KEYS", "KILL", "LEADING", "LEAVE", "LEFT", "LIKE",
    "LIMIT", "LINEAR", "LINES", "LOAD", "LOCALTIME", "LOCALTIMESTAMP", "LOCK", "LONG",
    "LONGBLOB", "LONGTEXT", "LOOP", "LOW_PRIORITY", "MATCH", "MEDIUMBLOB", "MEDIUMINT",
    "MEDIUMTEXT", "MIDDLEINT", "MINUTE_MICROSECOND", "MINUTE_SECOND", "MOD", "MODIFIES",
    "NATURAL", "NOT", "NO_WRITE_TO_BINLOG", "NULL", "NUMERIC", "ON", "OPTIMIZE", "OPTION",
    "OPTIONALLY", "OR", "ORDER", "OUT", "OUTER", "OUTFILE", "PRECISION", "PRIMARY",
    "PROCEDURE", "PURGE", "RANGE", "READ", "READS", "REAL", "REFERENCES", "REGEXP", "RELEASE",
    "RENAME", "REPEAT", "REPLACE", "REQUIRE", "RESTRICT", "RETURN", "REVOKE", "RIGHT", "RLIKE",
    "SCHEMA", "SCHEMAS", "SECOND_MICROSECOND", "SELECT", "SENSITIVE", "SEPARATOR", "SET",
    "SHOW", "SMALLINT", "SPATIAL", "SPECIFIC", "SQL", "SQLEXCEPTION", "SQLSTATE",
    "SQLWARNING", "SQL_BIG_RESULT", "SQL_CALC_FOUND_ROWS", "SQL_SMALL_RESULT", "SSL",
    "STARTING", "STRAIGHT_JOIN", "TABLE", "TERMINATED", "THEN", "TINYBLOB", "TINYINT",
    "TINYTEXT", "TO", "TRAILING", "TRIGGER", "TRUE", "UNDO", "UNION", "UNIQUE", "UNLOCK",
    "UNSIGNED", "UPDATE", "USAGE", "USE", "USING", "UTC_DATE", "UTC_TIME", "UTC_TIMESTAMP",
    "VALUES", "VARBINARY", "VARCHAR", "VARCHARACTER", "VARYING", "WHEN", "WHERE", "WHILE",
    "WITH", "WRITE", "XOR", "YEAR_MONTH", "ZEROFILL",
];

pub fn is_reserved_word(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    RESERVED_WORDS.contains(&upper.as_str())
}

/// Column name for a tag: every character outside `[A-Za-z0-9_]` becomes `_`.
pub fn sql_column_name(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Quote a value for a MySQL string literal.
pub fn sql_escape(val: &str) -> String {
    let mut out = String::with_capacity(val.len() + 2);
    out.push('\'');
    for ch in val.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// One output column.
#[derive(Debug, Clone)]
pub struct SqlColumn {
    /// Tag the column holds.
    pub field: String,
    pub name: String,
    pub column_type: ColumnType,
}

/// Turns a storm into a `CREATE TABLE` statement and one `INSERT` per leaf.
pub struct SqlEmitter<'a> {
    storm: &'a TagStorm,
    config: &'a SqlConfig,
    columns: Vec<SqlColumn>,
    column_ix: HashMap<String, usize>,
    row_width: usize,
}

impl<'a> SqlEmitter<'a> {
    /// Infer column types and check that the table can be created. Reserved
    /// or colliding column names, unknown key fields and rows wider than the
    /// configured limit are all fatal.
    pub fn new(storm: &'a TagStorm, config: &'a SqlConfig) -> Result<Self> {
        let infos = infer_types(storm);
        Self::with_types(storm, config, &infos)
    }

    pub fn with_types(storm: &'a TagStorm, config: &'a SqlConfig, infos: &[TagTypeInfo]) -> Result<Self> {
        let mut columns = Vec::with_capacity(infos.len());
        let mut column_ix = HashMap::new();
        let mut lower_names: HashMap<String, &str> = HashMap::new();
        for info in infos {
            let name = sql_column_name(&info.name);
            if is_reserved_word(&name) {
                return Err(TagStormError::ReservedWord {
                    field: info.name.clone(),
                    column: name,
                });
            }
            if let Some(first) = lower_names.insert(name.to_ascii_lowercase(), info.name.as_str()) {
                return Err(TagStormError::ColumnCollision {
                    first: first.to_string(),
                    second: info.name.clone(),
                    column: name,
                });
            }
            column_ix.insert(info.name.clone(), columns.len());
            columns.push(SqlColumn {
                field: info.name.clone(),
                name,
                column_type: info.column_type(config.max_varchar),
            });
        }

        for key in &config.key_fields {
            if !column_ix.contains_key(key) {
                return Err(TagStormError::UnknownKeyField(key.clone()));
            }
        }

        let row_width: usize = columns.iter().map(|c| c.column_type.width).sum();
        if row_width > config.row_width_limit {
            return Err(TagStormError::RowTooWide {
                width: row_width,
                limit: config.row_width_limit,
            });
        }
        debug!(
            table = %config.table,
            columns = columns.len(),
            row_width,
            "planned sql table"
        );
        Ok(SqlEmitter {
            storm,
            config,
            columns,
            column_ix,
            row_width,
        })
    }

    pub fn columns(&self) -> &[SqlColumn] {
        &self.columns
    }

    pub fn row_width(&self) -> usize {
        self.row_width
    }

    pub fn write_create<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut items: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("    {} {}", c.name, c.column_type.sql))
            .collect();
        for key in &self.config.key_fields {
            let column = &self.columns[self.column_ix[key]];
            if column.column_type.is_string {
                items.push(format!("    INDEX({}({}))", column.name, self.config.index_prefix));
            } else {
                items.push(format!("    INDEX({})", column.name));
            }
        }
        writeln!(w, "CREATE TABLE {} (", self.config.table)?;
        writeln!(w, "{}", items.join(",\n"))?;
        writeln!(w, ");")?;
        Ok(())
    }

    /// Effective tags of a leaf: nearest definition wins, repeats within
    /// the defining stanza joined as a list.
    fn leaf_values(&self, leaf: StanzaId) -> HashMap<&'a str, String> {
        let storm = self.storm;
        let mut values: HashMap<&'a str, String> = HashMap::new();
        for ancestor in storm.ancestors(leaf) {
            let mut local: Vec<(&'a str, Vec<&'a str>)> = Vec::new();
            for pair in storm.stanza(ancestor).tags() {
                if values.contains_key(pair.name.as_str()) {
                    continue;
                }
                match local.iter_mut().find(|(name, _)| *name == pair.name) {
                    Some((_, vals)) => vals.push(pair.val.as_str()),
                    None => local.push((pair.name.as_str(), vec![pair.val.as_str()])),
                }
            }
            for (name, vals) in local {
                let val = if vals.len() == 1 {
                    vals[0].to_string()
                } else {
                    csv_join(&vals)
                };
                values.insert(name, val);
            }
        }
        values
    }

    pub fn write_inserts<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut count = 0;
        for leaf in self.storm.leaves() {
            let values = self.leaf_values(leaf);
            let mut names = Vec::new();
            let mut literals = Vec::new();
            for column in &self.columns {
                if let Some(val) = values.get(column.field.as_str()) {
                    names.push(column.name.as_str());
                    literals.push(if column.column_type.is_string {
                        sql_escape(val)
                    } else {
                        val.clone()
                    });
                }
            }
            writeln!(
                w,
                "INSERT INTO {} ({}) VALUES ({});",
                self.config.table,
                names.join(","),
                literals.join(",")
            )?;
            count += 1;
        }
        debug!(table = %self.config.table, rows = count, "wrote sql inserts");
        Ok(())
    }

    pub fn write_all<W: Write>(&self, w: &mut W) -> Result<()> {
        self.write_create(w)?;
        self.write_inserts(w)
    }
}
