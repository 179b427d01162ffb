use std::path::Path;

use tracing::debug;

use crate::config::ParseConfig;
use crate::error::{Result, TagStormError};
use crate::tree::{StanzaId, TagPair, TagStorm};

/// Marker line that stands for a stanza with no tags.
pub(crate) const EMPTY_STANZA_MARKER: &str = "#empty";

/// Parser state: the storm under construction plus the indentation stack.
struct StormParser<'a> {
    config: &'a ParseConfig,
    storm: TagStorm,
    /// Indentation of each open nesting level; the bottom entry is always 0.
    indents: Vec<usize>,
    parent: Option<StanzaId>,
    last: Option<StanzaId>,
    /// Stanza currently receiving tag lines, and its indentation.
    open: Option<(StanzaId, usize)>,
}

/// Parse tag storm text with explicit settings.
pub fn parse_with(text: &str, file_name: &str, config: &ParseConfig) -> Result<TagStorm> {
    let mut parser = StormParser {
        config,
        storm: TagStorm::new(file_name),
        indents: vec![0],
        parent: None,
        last: None,
        open: None,
    };

    for (ix, line) in text.lines().enumerate() {
        parser.parse_line(line, ix + 1)?;
    }

    let mut storm = parser.storm;
    storm.reverse_all();
    debug!(
        file = file_name,
        stanzas = storm.count_stanzas(),
        tags = storm.count_tags(),
        "parsed tag storm"
    );
    Ok(storm)
}

impl TagStorm {
    /// Read and parse a tag storm file with default settings.
    pub fn from_file(path: impl AsRef<Path>) -> Result<TagStorm> {
        Self::from_file_with(path, &ParseConfig::default())
    }

    pub fn from_file_with(path: impl AsRef<Path>, config: &ParseConfig) -> Result<TagStorm> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TagStormError::io(path, e))?;
        parse_with(&text, &path.display().to_string(), config)
    }
}

/// Width of the leading blanks of `line`, and the rest of the line.
fn measure_indent(line: &str, tab_stop: usize) -> (usize, &str) {
    let mut width = 0;
    for (ix, ch) in line.char_indices() {
        match ch {
            ' ' => width += 1,
            '\t' => width = (width / tab_stop + 1) * tab_stop,
            _ => return (width, &line[ix..]),
        }
    }
    (width, "")
}

/// Split a tag line into name and (trimmed) value.
fn split_tag_line(body: &str) -> TagPair {
    match body.find([' ', '\t']) {
        Some(ix) => TagPair::new(&body[..ix], body[ix..].trim()),
        None => TagPair::new(body, ""),
    }
}

impl<'a> StormParser<'a> {
    fn error(&self, line: usize, message: &str) -> TagStormError {
        TagStormError::parse_error(self.storm.file_name(), line, message)
    }

    fn parse_line(&mut self, line: &str, line_no: usize) -> Result<()> {
        let line = line.trim_end_matches('\r');
        let (indent, body) = measure_indent(line, self.config.tab_stop.max(1));

        if body.trim().is_empty() {
            self.open = None;
            return Ok(());
        }

        if body.starts_with('#') {
            if self.open.is_none() && body.trim_end() == EMPTY_STANZA_MARKER {
                let id = self.start_stanza(indent, line_no)?;
                self.open = Some((id, indent));
            }
            return Ok(());
        }

        let id = match self.open {
            Some((id, stanza_indent)) => {
                if indent != stanza_indent {
                    return Err(self.error(line_no, "Tags in stanza inconsistently indented"));
                }
                id
            }
            None => {
                let id = self.start_stanza(indent, line_no)?;
                self.open = Some((id, indent));
                id
            }
        };
        self.storm.push_pair(id, split_tag_line(body));
        Ok(())
    }

    /// Place a new stanza according to its indentation relative to the
    /// current nesting level.
    fn start_stanza(&mut self, indent: usize, line_no: usize) -> Result<StanzaId> {
        let current = self.indents.last().copied().unwrap_or(0);
        if indent > current {
            let Some(last) = self.last else {
                return Err(self.error(line_no, "Initial stanza needs to be non-indented"));
            };
            if self.indents.len() >= self.config.max_depth {
                return Err(self.error(
                    line_no,
                    &format!("Stanzas nested more than {} deep", self.config.max_depth),
                ));
            }
            self.indents.push(indent);
            self.parent = Some(last);
        } else if indent < current {
            loop {
                self.indents.pop();
                self.parent = self.parent.and_then(|p| self.storm.parent(p));
                match self.indents.last() {
                    Some(&level) if level == indent => break,
                    Some(&level) if level > indent => continue,
                    _ => return Err(self.error(line_no, "Indentation inconsistent")),
                }
            }
        }

        let id = self.storm.new_stanza_at_line(self.parent, line_no);
        self.last = Some(id);
        Ok(id)
    }
}
