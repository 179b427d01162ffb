//! Comma-separated lists stored inside a single tag value.
//!
//! Elements that would be ambiguous when joined (empty, containing a comma,
//! quote or line break, or with surrounding whitespace) are wrapped in double
//! quotes with internal quotes doubled. Everything else is written bare.

use std::borrow::Cow;

use crate::error::{Result, TagStormError};

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || s.contains([',', '"', '\n', '\r'])
        || s.starts_with(char::is_whitespace)
        || s.ends_with(char::is_whitespace)
}

/// Escape one element so it survives a trip through [`csv_parse_next`].
pub fn csv_escape(s: &str) -> Cow<'_, str> {
    if !needs_quotes(s) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    Cow::Owned(out)
}

/// Append `s` to a list under construction, adding the separating comma
/// when the list is non-empty.
pub fn csv_escape_and_append(buf: &mut String, s: &str) {
    if !buf.is_empty() {
        buf.push(',');
    }
    buf.push_str(&csv_escape(s));
}

/// Join elements into one escaped list.
pub fn csv_join<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut buf = String::new();
    let mut first = true;
    for item in items {
        // An empty first element escapes to `""`, so emptiness of `buf`
        // alone can't be used to decide on the comma here.
        if !first {
            buf.push(',');
        }
        buf.push_str(&csv_escape(item.as_ref()));
        first = false;
    }
    buf
}

/// Cursor over a comma-separated list.
pub struct CsvCursor<'a> {
    input: &'a str,
    pos: usize,
    done: bool,
}

impl<'a> CsvCursor<'a> {
    pub fn new(input: &'a str) -> Self {
        CsvCursor {
            input,
            pos: 0,
            done: input.is_empty(),
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn skip_blanks(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == ' ' || ch == '\t' {
                self.advance(1);
            } else {
                break;
            }
        }
    }

    fn error(&self, message: &str) -> TagStormError {
        TagStormError::Csv(format!("{} at offset {} of '{}'", message, self.pos, self.input))
    }

    fn parse_quoted(&mut self) -> Result<String> {
        self.advance(1);
        let mut result = String::new();
        loop {
            match self.peek_char() {
                None => return Err(self.error("unterminated quote")),
                Some('"') => {
                    self.advance(1);
                    if self.peek_char() == Some('"') {
                        self.advance(1);
                        result.push('"');
                    } else {
                        break;
                    }
                }
                Some(ch) => {
                    self.advance(ch.len_utf8());
                    result.push(ch);
                }
            }
        }
        self.skip_blanks();
        match self.peek_char() {
            None => self.done = true,
            Some(',') => self.advance(1),
            Some(_) => return Err(self.error("expecting comma after closing quote")),
        }
        Ok(result)
    }

    fn parse_bare(&mut self) -> String {
        let rest = self.remaining();
        match rest.find(',') {
            Some(ix) => {
                self.advance(ix + 1);
                rest[..ix].trim().to_string()
            }
            None => {
                self.pos = self.input.len();
                self.done = true;
                rest.trim().to_string()
            }
        }
    }
}

/// Return the next element of the list, or `None` once it is exhausted.
pub fn csv_parse_next(cursor: &mut CsvCursor<'_>) -> Result<Option<String>> {
    if cursor.done {
        return Ok(None);
    }
    cursor.skip_blanks();
    if cursor.peek_char() == Some('"') {
        cursor.parse_quoted().map(Some)
    } else {
        Ok(Some(cursor.parse_bare()))
    }
}

/// Split a whole list.
pub fn csv_split(s: &str) -> Result<Vec<String>> {
    let mut cursor = CsvCursor::new(s);
    let mut out = Vec::new();
    while let Some(val) = csv_parse_next(&mut cursor)? {
        out.push(val);
    }
    Ok(out)
}
