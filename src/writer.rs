//! Serialization of a storm: the indented tag format, plus flattened
//! `.ra` and tab/comma separated tables where each stanza carries its
//! inherited tags.

use std::collections::HashMap;
use std::io::Write;

use ::csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::error::Result;
use crate::parser::EMPTY_STANZA_MARKER;
use crate::tree::{StanzaId, TagStorm};

/// Options shared by the flattening writers.
#[derive(Debug, Clone)]
pub struct FlatOptions {
    /// Tag identifying a stanza. Written first in `.ra` output; in tables
    /// only stanzas defining it are written.
    pub id_tag: Option<String>,
    /// Add a `parent` field holding the parent's `id_tag` value.
    pub with_parent: bool,
    /// Deepest level written; `None` for all.
    pub max_depth: Option<usize>,
    pub leaves_only: bool,
    /// Table cell value for a field the stanza lacks.
    pub null_val: String,
    /// Start the table header line with `#`.
    pub sharp_label: bool,
}

impl Default for FlatOptions {
    fn default() -> Self {
        FlatOptions {
            id_tag: None,
            with_parent: false,
            max_depth: None,
            leaves_only: false,
            null_val: String::new(),
            sharp_label: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStyle {
    Tab,
    Csv,
}

impl TableStyle {
    /// Record writer for this style. Tab tables never quote; CSV quotes
    /// cells holding commas, quotes or line breaks.
    pub(crate) fn writer<W: Write>(self, w: W) -> ::csv::Writer<W> {
        let mut builder = WriterBuilder::new();
        builder.terminator(Terminator::Any(b'\n'));
        if self == TableStyle::Tab {
            builder.delimiter(b'\t').quote_style(QuoteStyle::Never);
        }
        builder.from_writer(w)
    }
}

impl TagStorm {
    /// Write the storm in its native indented format. Only the first
    /// `max_depth` levels are written when a limit is given.
    pub fn write_tags<W: Write>(&self, w: &mut W, max_depth: Option<usize>) -> Result<()> {
        let max_depth = max_depth.unwrap_or(usize::MAX);
        for root in self.roots() {
            self.write_stanza(w, root, 0, max_depth)?;
        }
        Ok(())
    }

    fn write_stanza<W: Write>(&self, w: &mut W, id: StanzaId, depth: usize, max_depth: usize) -> Result<()> {
        if depth >= max_depth {
            return Ok(());
        }
        let indent = "\t".repeat(depth);
        let stanza = self.stanza(id);
        if stanza.tags().is_empty() {
            writeln!(w, "{}{}", indent, EMPTY_STANZA_MARKER)?;
        }
        for pair in stanza.tags() {
            if pair.val.is_empty() {
                writeln!(w, "{}{}", indent, pair.name)?;
            } else {
                writeln!(w, "{}{} {}", indent, pair.name, pair.val)?;
            }
        }
        writeln!(w)?;
        for child in self.children(id) {
            self.write_stanza(w, child, depth + 1, max_depth)?;
        }
        Ok(())
    }

    /// The whole storm as indented text.
    pub fn to_text(&self) -> String {
        let mut buf = Vec::new();
        self.write_tags(&mut buf, None)
            .unwrap_or_else(|_| unreachable!("writing to a Vec cannot fail"));
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn within_depth(&self, id: StanzaId, options: &FlatOptions) -> bool {
        options.max_depth.map_or(true, |max| self.depth(id) <= max)
    }

    /// The `parent` value for a stanza: its parent's own id tag.
    fn parent_id_val(&self, id: StanzaId, options: &FlatOptions) -> Option<&str> {
        if !options.with_parent {
            return None;
        }
        let id_tag = options.id_tag.as_deref()?;
        let parent = self.parent(id)?;
        self.find_local_val(parent, id_tag)
    }

    /// Write each stanza as a self-contained `.ra` record holding its own
    /// and inherited tags.
    pub fn write_flat_ra<W: Write>(&self, w: &mut W, options: &FlatOptions) -> Result<()> {
        for id in self.walk() {
            if !self.within_depth(id, options) || (options.leaves_only && !self.is_leaf(id)) {
                continue;
            }
            let mut written: Vec<&str> = Vec::new();
            if let Some(id_tag) = options.id_tag.as_deref() {
                if let Some(val) = self.find_local_val(id, id_tag) {
                    writeln!(w, "{} {}", id_tag, val)?;
                    written.push(id_tag);
                }
            }
            if let Some(parent_val) = self.parent_id_val(id, options) {
                writeln!(w, "parent {}", parent_val)?;
                written.push("parent");
            }
            for pair in self.tags_including_parents(id) {
                if !written.contains(&pair.name.as_str()) {
                    writeln!(w, "{} {}", pair.name, pair.val)?;
                }
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// Write the storm as one table row per stanza, one column per field.
    pub fn write_flat_table<W: Write>(&self, w: &mut W, options: &FlatOptions, style: TableStyle) -> Result<()> {
        let mut fields = self.field_list();
        if options.with_parent && !fields.iter().any(|f| f == "parent") {
            fields.insert(0, "parent".to_string());
        }

        let mut out = style.writer(w);
        let mut header = fields.clone();
        if options.sharp_label && style == TableStyle::Tab {
            if let Some(first) = header.first_mut() {
                first.insert(0, '#');
            }
        }
        out.write_record(&header)?;

        for id in self.walk() {
            if !self.within_depth(id, options) || (options.leaves_only && !self.is_leaf(id)) {
                continue;
            }
            if let Some(id_tag) = options.id_tag.as_deref() {
                if self.find_local_val(id, id_tag).is_none() {
                    continue;
                }
            }
            let mut row: HashMap<&str, &str> = HashMap::new();
            if let Some(parent_val) = self.parent_id_val(id, options) {
                row.insert("parent", parent_val);
            }
            for pair in self.tags_including_parents(id) {
                row.entry(pair.name.as_str()).or_insert(pair.val.as_str());
            }
            out.write_record(fields.iter().map(|field| {
                row.get(field.as_str()).copied().unwrap_or(options.null_val.as_str())
            }))?;
        }
        out.flush()?;
        Ok(())
    }
}
