//! Faceted counting: for each facet field, how often each value is used and
//! how often it would be seen under the selections made in the *other*
//! fields. Rows pass the filter when every field accepts its value.

use std::cmp::Reverse;
use std::collections::HashMap;

use tracing::debug;

use crate::csv::{csv_join, csv_split};
use crate::error::{Result, TagStormError};
use crate::fielded::FieldedTable;
use crate::tree::{StanzaId, TagStorm};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetVal {
    pub val: String,
    /// Rows with this value.
    pub use_count: usize,
    /// Rows with this value that pass every other field's selection.
    pub select_count: usize,
    pub selected: bool,
}

#[derive(Debug, Clone)]
pub struct FacetField {
    name: String,
    vals: Vec<FacetVal>,
    index: HashMap<String, usize>,
    /// No value of this field is selected, so it lets every row through.
    all_selected: bool,
}

impl FacetField {
    pub fn new(name: &str) -> Self {
        FacetField {
            name: name.to_string(),
            vals: Vec::new(),
            index: HashMap::new(),
            all_selected: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values in order of first appearance.
    pub fn vals(&self) -> &[FacetVal] {
        &self.vals
    }

    pub fn all_selected(&self) -> bool {
        self.all_selected
    }

    pub fn find_val(&self, val: &str) -> Option<&FacetVal> {
        self.index.get(val).map(|&ix| &self.vals[ix])
    }

    fn val_ix(&mut self, val: &str) -> usize {
        if let Some(&ix) = self.index.get(val) {
            return ix;
        }
        let ix = self.vals.len();
        self.vals.push(FacetVal {
            val: val.to_string(),
            use_count: 0,
            select_count: 0,
            selected: false,
        });
        self.index.insert(val.to_string(), ix);
        ix
    }

    pub fn select(&mut self, val: &str) {
        let ix = self.val_ix(val);
        self.vals[ix].selected = true;
        self.all_selected = false;
    }

    /// Unselect a value. Once nothing is selected the field passes every
    /// row again.
    pub fn deselect(&mut self, val: &str) {
        if let Some(&ix) = self.index.get(val) {
            self.vals[ix].selected = false;
        }
        if !self.vals.iter().any(|v| v.selected) {
            self.all_selected = true;
        }
    }

    pub fn clear(&mut self) {
        for v in &mut self.vals {
            v.selected = false;
        }
        self.all_selected = true;
    }

    pub fn passes(&self, val: &str) -> bool {
        self.all_selected || self.find_val(val).map_or(false, |v| v.selected)
    }

    pub fn selected_vals(&self) -> impl Iterator<Item = &str> {
        self.vals.iter().filter(|v| v.selected).map(|v| v.val.as_str())
    }

    /// Values by descending select count, then use count, then by value.
    pub fn sorted_vals(&self) -> Vec<&FacetVal> {
        let mut sorted: Vec<&FacetVal> = self.vals.iter().collect();
        sorted.sort_by_key(|v| (Reverse(v.select_count), Reverse(v.use_count), v.val.as_str()));
        sorted
    }

    fn reset_counts(&mut self) {
        for v in &mut self.vals {
            v.use_count = 0;
            v.select_count = 0;
        }
    }
}

/// The facet fields of one table and their selections.
#[derive(Debug, Clone)]
pub struct FacetSet {
    fields: Vec<FacetField>,
}

impl FacetSet {
    pub fn new<S: AsRef<str>>(fields: &[S]) -> Self {
        FacetSet {
            fields: fields.iter().map(|f| FacetField::new(f.as_ref())).collect(),
        }
    }

    /// Facet set with selections restored from [`FacetSet::selection_string`]
    /// output.
    pub fn with_selection<S: AsRef<str>>(fields: &[S], selection: &str) -> Result<Self> {
        let mut set = FacetSet::new(fields);
        for block in split_blocks(selection) {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            let (name, list) = block.split_once(' ').unwrap_or((block, ""));
            let field = set.field_mut(name)?;
            for val in csv_split(list.trim())? {
                field.select(&val);
            }
        }
        Ok(set)
    }

    pub fn fields(&self) -> &[FacetField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FacetField> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn field_mut(&mut self, name: &str) -> Result<&mut FacetField> {
        self.fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| TagStormError::Facet(format!("no facet field named {}", name)))
    }

    pub fn select(&mut self, field: &str, val: &str) -> Result<()> {
        self.field_mut(field)?.select(val);
        Ok(())
    }

    pub fn deselect(&mut self, field: &str, val: &str) -> Result<()> {
        self.field_mut(field)?.deselect(val);
        Ok(())
    }

    pub fn clear(&mut self, field: &str) -> Result<()> {
        self.field_mut(field)?.clear();
        Ok(())
    }

    pub fn clear_counts(&mut self) {
        for f in &mut self.fields {
            f.reset_counts();
        }
    }

    /// Count one row holding a value for each field, in field order.
    /// Returns whether the row passes every field's selection.
    pub fn count_row<S: AsRef<str>>(&mut self, row: &[S]) -> Result<bool> {
        if row.len() != self.fields.len() {
            return Err(TagStormError::Facet(format!(
                "row has {} values for {} facet fields",
                row.len(),
                self.fields.len()
            )));
        }
        let passes: Vec<bool> = self
            .fields
            .iter()
            .zip(row)
            .map(|(f, v)| f.passes(v.as_ref()))
            .collect();
        let fails = passes.iter().filter(|p| !**p).count();

        for ((field, val), &ok) in self.fields.iter_mut().zip(row).zip(&passes) {
            let ix = field.val_ix(val.as_ref());
            let v = &mut field.vals[ix];
            v.use_count += 1;
            // The other fields all pass when nothing failed, or when the
            // only failure is this field itself.
            if fails == 0 || (fails == 1 && !ok) {
                v.select_count += 1;
            }
        }
        Ok(fails == 0)
    }

    /// Count every row of a table; the table must have a column for each
    /// facet field. Returns the indexes of the rows that pass.
    pub fn count_table(&mut self, table: &FieldedTable) -> Result<Vec<usize>> {
        let columns = self
            .fields
            .iter()
            .map(|f| table.must_find_field_ix(&f.name))
            .collect::<Result<Vec<usize>>>()?;
        let mut passing = Vec::new();
        for (ix, row) in table.rows().iter().enumerate() {
            let vals: Vec<&str> = columns.iter().map(|&c| row.row[c].as_str()).collect();
            if self.count_row(&vals)? {
                passing.push(ix);
            }
        }
        debug!(
            table = table.name(),
            rows = table.row_count(),
            passing = passing.len(),
            "counted facets"
        );
        Ok(passing)
    }

    /// Count every leaf of a storm using inherited values; missing tags
    /// count as empty strings. Returns the passing leaves.
    pub fn count_storm(&mut self, storm: &TagStorm) -> Result<Vec<StanzaId>> {
        let mut passing = Vec::new();
        for leaf in storm.leaves() {
            let vals: Vec<&str> = self
                .fields
                .iter()
                .map(|f| storm.find_val(leaf, &f.name).unwrap_or(""))
                .collect();
            if self.count_row(&vals)? {
                passing.push(leaf);
            }
        }
        Ok(passing)
    }

    /// Selections as text: one `name value,value...` line per field that
    /// has a selection.
    pub fn selection_string(&self) -> String {
        self.fields
            .iter()
            .filter(|f| !f.all_selected)
            .map(|f| format!("{} {}", f.name, csv_join(f.selected_vals())))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Split selection text into lines, ignoring line breaks inside quotes.
fn split_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (ix, ch) in text.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '\n' if !in_quotes => {
                blocks.push(&text[start..ix]);
                start = ix + 1;
            }
            _ => {}
        }
    }
    blocks.push(&text[start..]);
    blocks
}
