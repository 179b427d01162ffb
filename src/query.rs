use std::io::Write;

use tracing::debug;

use crate::error::{Result, TagStormError};
use crate::rql::{RqlCommand, RqlStatement};
use crate::tree::{StanzaId, TagStorm};
use crate::wildcard::{is_wild, Wildcard};

/// Selected values of one matching leaf, in field order. Fields the leaf
/// does not resolve are left out.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub stanza: StanzaId,
    pub values: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<QueryRow>),
    Count(usize),
}

impl QueryOutput {
    /// Rows as `.ra` records, a count as a single number.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        match self {
            QueryOutput::Count(n) => writeln!(w, "{}", n)?,
            QueryOutput::Rows(rows) => {
                for row in rows {
                    for (field, val) in &row.values {
                        writeln!(w, "{} {}", field, val)?;
                    }
                    writeln!(w)?;
                }
            }
        }
        Ok(())
    }
}

impl TagStorm {
    /// Expand the statement's field list against the fields of the storm.
    /// Wildcards match any number of fields; plain names must exist.
    pub fn expand_fields(&self, fields: &[String]) -> Result<Vec<String>> {
        let all = self.field_list();
        let mut expanded: Vec<String> = Vec::new();
        for field in fields {
            if is_wild(field) {
                let wild = Wildcard::new(field)?;
                for name in all.iter().filter(|name| wild.matches(name)) {
                    if !expanded.contains(name) {
                        expanded.push(name.clone());
                    }
                }
            } else if all.contains(field) {
                if !expanded.contains(field) {
                    expanded.push(field.clone());
                }
            } else {
                return Err(TagStormError::UnknownField {
                    field: field.clone(),
                    file: self.file_name().to_string(),
                });
            }
        }
        Ok(expanded)
    }

    /// Run a statement over the leaves of the storm. Inner stanzas only
    /// contribute through inheritance.
    pub fn query(&self, statement: &RqlStatement) -> Result<QueryOutput> {
        let fields = match statement.command {
            RqlCommand::Select => self.expand_fields(&statement.fields)?,
            RqlCommand::Count => Vec::new(),
        };
        let limit = statement.limit.unwrap_or(usize::MAX);

        let mut rows = Vec::new();
        let mut count = 0;
        for leaf in self.leaves() {
            if count >= limit {
                break;
            }
            let lookup = |field: &str| self.find_val(leaf, field);
            if let Some(filter) = &statement.where_clause {
                if !filter.matches(&lookup)? {
                    continue;
                }
            }
            count += 1;
            if statement.command == RqlCommand::Select {
                let values = fields
                    .iter()
                    .filter_map(|f| lookup(f.as_str()).map(|v| (f.clone(), v.to_string())))
                    .collect();
                rows.push(QueryRow {
                    stanza: leaf,
                    values,
                });
            }
        }
        debug!(file = self.file_name(), matched = count, "ran query");
        Ok(match statement.command {
            RqlCommand::Select => QueryOutput::Rows(rows),
            RqlCommand::Count => QueryOutput::Count(count),
        })
    }

    /// Parse and run RQL text.
    pub fn query_str(&self, text: &str) -> Result<QueryOutput> {
        self.query(&RqlStatement::parse(text)?)
    }
}
