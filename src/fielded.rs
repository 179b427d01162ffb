//! Tables of named string columns, read from and written to tab-separated
//! text, and their conversions to and from tag storms.
//!
//! Turning a table into a storm divides the rows on one field per level.
//! Fields whose values move in step with the dividing field go into the
//! group stanza; the rest go down to the leaves. The dividing fields can
//! be given, chosen once for the whole table, or chosen afresh at every
//! level.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;

use ::csv::ReaderBuilder;
use tracing::debug;

use crate::error::{Result, TagStormError};
use crate::tree::{StanzaId, TagStorm};
use crate::typeinfo::TagTypeInfo;
use crate::writer::TableStyle;

/// One row plus the line it was read from (0 when built in code).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldedRow {
    pub row: Vec<String>,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct FieldedTable {
    name: String,
    fields: Vec<String>,
    field_ix: HashMap<String, usize>,
    rows: Vec<FieldedRow>,
    starts_sharp: bool,
}

impl FieldedTable {
    pub fn new<S: AsRef<str>>(name: &str, fields: &[S]) -> Self {
        let fields: Vec<String> = fields.iter().map(|f| f.as_ref().to_string()).collect();
        let field_ix = fields
            .iter()
            .enumerate()
            .map(|(ix, f)| (f.clone(), ix))
            .collect();
        FieldedTable {
            name: name.to_string(),
            fields,
            field_ix,
            rows: Vec::new(),
            starts_sharp: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn rows(&self) -> &[FieldedRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn starts_sharp(&self) -> bool {
        self.starts_sharp
    }

    fn error(&self, line: usize, message: impl Into<String>) -> TagStormError {
        TagStormError::Table {
            table: self.name.clone(),
            line,
            message: message.into(),
        }
    }

    /// Append a row; it must have one value per field.
    pub fn add_row<S: AsRef<str>>(&mut self, row: &[S], line: usize) -> Result<()> {
        if row.len() != self.fields.len() {
            return Err(self.error(
                line,
                format!("expecting {} fields, got {}", self.fields.len(), row.len()),
            ));
        }
        self.rows.push(FieldedRow {
            row: row.iter().map(|v| v.as_ref().to_string()).collect(),
            line,
        });
        Ok(())
    }

    pub fn find_field_ix(&self, field: &str) -> Option<usize> {
        self.field_ix.get(field).copied()
    }

    pub fn must_find_field_ix(&self, field: &str) -> Result<usize> {
        self.find_field_ix(field)
            .ok_or_else(|| self.error(0, format!("can't find field {}", field)))
    }

    /// Parse tab-separated text whose first line names the fields,
    /// optionally prefixed with `#`. Every field in `required` must be
    /// present. Blank lines are skipped and quotes have no meaning.
    pub fn from_tsv_str(name: &str, text: &str, required: &[&str]) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        let read_error = |e: ::csv::Error| TagStormError::Table {
            table: name.to_string(),
            line: e.position().map_or(0, |p| p.line() as usize),
            message: e.to_string(),
        };
        let mut records = reader.records();

        let header = match records.next() {
            Some(record) => record.map_err(read_error)?,
            None => {
                return Err(TagStormError::Table {
                    table: name.to_string(),
                    line: 1,
                    message: "no header line".to_string(),
                })
            }
        };
        let mut fields: Vec<&str> = header.iter().collect();
        let starts_sharp = fields.first().map_or(false, |f| f.starts_with('#'));
        if starts_sharp {
            let first = fields[0];
            fields[0] = &first[1..];
        }
        let mut table = FieldedTable::new(name, &fields);
        table.starts_sharp = starts_sharp;

        for field in required {
            if table.find_field_ix(field).is_none() {
                return Err(table.error(1, format!("missing required field {}", field)));
            }
        }

        for record in records {
            let record = record.map_err(read_error)?;
            let line = record.position().map_or(0, |p| p.line() as usize);
            let row: Vec<&str> = record.iter().collect();
            table.add_row(&row, line)?;
        }
        debug!(
            table = name,
            fields = table.fields.len(),
            rows = table.rows.len(),
            "read fielded table"
        );
        Ok(table)
    }

    pub fn from_tsv_file(path: impl AsRef<Path>, required: &[&str]) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TagStormError::io(path, e))?;
        Self::from_tsv_str(&path.display().to_string(), &text, required)
    }

    pub fn write_tsv<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut out = TableStyle::Tab.writer(w);
        let mut header = self.fields.clone();
        if self.starts_sharp {
            if let Some(first) = header.first_mut() {
                first.insert(0, '#');
            }
        }
        out.write_record(&header)?;
        for row in &self.rows {
            out.write_record(&row.row)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Fields a storm built from this table is divided on, highest level
    /// first. The last one marks the leaves.
    pub fn parting_fields(&self) -> Vec<String> {
        let rows: Vec<&FieldedRow> = self.rows.iter().collect();
        let columns: Vec<usize> = (0..self.fields.len()).collect();
        let infos = field_infos(self, &rows, &columns);
        parting_divs(&rows, &infos)
            .into_iter()
            .map(|ix| self.fields[ix].clone())
            .collect()
    }
}

/// Empty cells and the usual not-available markers carry no value.
fn is_defined_val(val: &str) -> bool {
    !val.is_empty() && val != "n/a" && val != "N/A"
}

// ── Choosing division fields ────────────────────────────────────────

/// One column summarized over a set of rows.
struct FieldInfo {
    /// Column in the whole table.
    ix: usize,
    /// Distinct values, undefined ones included.
    val_count: usize,
    /// Rows with a defined value.
    real_count: usize,
    type_info: TagTypeInfo,
}

fn field_infos(table: &FieldedTable, rows: &[&FieldedRow], columns: &[usize]) -> Vec<FieldInfo> {
    columns
        .iter()
        .map(|&ix| {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut real_count = 0;
            let mut type_info = TagTypeInfo::new(&table.fields[ix]);
            for row in rows {
                let val = row.row[ix].as_str();
                let defined = is_defined_val(val);
                if defined {
                    real_count += 1;
                }
                if seen.insert(val) && defined {
                    type_info.add(val);
                }
            }
            FieldInfo {
                ix,
                val_count: seen.len(),
                real_count,
                type_info,
            }
        })
        .collect()
}

/// True when each value of `a` always occurs with the same value of `b`.
fn predicts(rows: &[&FieldedRow], a: &FieldInfo, b: &FieldInfo) -> bool {
    if a.ix == b.ix {
        return true;
    }
    if a.val_count < b.val_count {
        return false;
    }
    let mut pairs: HashMap<&str, &str> = HashMap::new();
    rows.iter().all(|row| {
        let b_val = row.row[b.ix].as_str();
        *pairs.entry(row.row[a.ix].as_str()).or_insert(b_val) == b_val
    })
}

/// Fields that predict each other, plus how they relate to other sets.
struct LockedSet {
    /// Positions in the field info list, in table order. The first names the set.
    members: Vec<usize>,
    /// Sets whose head predicts this set's head, this set included.
    predictors: Vec<usize>,
    /// Sets this set's head predicts, this set included.
    predicted: Vec<usize>,
    score: f64,
}

fn find_locked_sets(rows: &[&FieldedRow], infos: &[FieldInfo]) -> Vec<LockedSet> {
    let pred: Vec<Vec<bool>> = infos
        .iter()
        .map(|a| infos.iter().map(|b| predicts(rows, a, b)).collect())
        .collect();

    let mut used = vec![false; infos.len()];
    let mut sets = Vec::new();
    for a in 0..infos.len() {
        if used[a] {
            continue;
        }
        let mut members = vec![a];
        for b in a + 1..infos.len() {
            if !used[b] && pred[a][b] && pred[b][a] {
                used[b] = true;
                members.push(b);
            }
        }
        sets.push(LockedSet {
            members,
            predictors: Vec::new(),
            predicted: Vec::new(),
            score: 0.0,
        });
    }

    let heads: Vec<usize> = sets.iter().map(|s| s.members[0]).collect();
    for (set, &a) in sets.iter_mut().zip(&heads) {
        for (t, &b) in heads.iter().enumerate() {
            if pred[b][a] {
                set.predictors.push(t);
            }
            if pred[a][b] {
                set.predicted.push(t);
            }
        }
    }

    let mut chains = vec![None; sets.len()];
    let row_count = rows.len() as f64;
    let scores: Vec<f64> = (0..sets.len())
        .map(|s| {
            let set = &sets[s];
            let head = &infos[set.members[0]];
            let real = head.real_count as f64 / row_count;
            let mut score =
                (4 * set.members.len() + 2 * set.predictors.len() + set.predicted.len()) as f64;
            score *= predictor_chain(&sets, s, &mut chains) as f64;
            score *= real * real;
            score /= (head.val_count as f64).sqrt();
            if set.members.iter().all(|&m| infos[m].type_info.is_num) {
                let all_int = set.members.iter().all(|&m| infos[m].type_info.is_int);
                score *= if all_int { 0.5 } else { 0.1 };
            }
            score
        })
        .collect();
    for (set, score) in sets.iter_mut().zip(scores) {
        set.score = score;
    }
    sets
}

/// Length of the longest chain of distinct predictors ending at set `s`.
fn predictor_chain(sets: &[LockedSet], s: usize, memo: &mut [Option<usize>]) -> usize {
    if let Some(len) = memo[s] {
        return len;
    }
    let mut longest = 0;
    for &p in &sets[s].predictors {
        if p != s {
            longest = longest.max(predictor_chain(sets, p, memo));
        }
    }
    memo[s] = Some(longest + 1);
    longest + 1
}

/// Set positions, best score first.
fn ranked(sets: &[LockedSet]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..sets.len()).collect();
    order.sort_by(|&a, &b| sets[b].score.total_cmp(&sets[a].score));
    order
}

/// Table columns to divide on for the whole table: the best scoring
/// sets in turn, skipping any set an earlier choice predicts.
fn parting_divs(rows: &[&FieldedRow], infos: &[FieldInfo]) -> Vec<usize> {
    let sets = find_locked_sets(rows, infos);
    let mut taken = vec![false; sets.len()];
    let mut divs = Vec::new();
    for s in ranked(&sets) {
        if taken[s] {
            continue;
        }
        divs.push(infos[sets[s].members[0]].ix);
        for &p in &sets[s].predicted {
            taken[p] = true;
        }
    }
    divs
}

// ── Table to storm ──────────────────────────────────────────────────

/// How [`TagStorm::from_fielded_table`] shapes the storm.
#[derive(Debug, Clone, Default)]
pub struct FromTableOptions {
    /// Fields to divide on, highest level first. The last one marks the
    /// leaves and is not divided on. Chosen from the data when empty.
    pub div_fields: Vec<String>,
    /// With no `div_fields`, pick the best dividing field at every level
    /// instead of once for the whole table.
    pub local: bool,
    /// Leave values shared by all children in the children.
    pub no_hoist: bool,
    /// Order each stanza's tags like the table's fields instead of by name.
    pub keep_order: bool,
}

/// How one level of rows is divided.
enum Parting<'d> {
    /// Every row becomes a leaf.
    Leaves,
    /// Group on `key`; `columns` go into the group stanza.
    On {
        key: usize,
        columns: Vec<usize>,
        rest: Option<&'d [usize]>,
    },
}

impl TagStorm {
    /// One row per stanza (or per leaf) with every field of the storm,
    /// resolved through inheritance. Missing values are empty strings.
    pub fn to_fielded_table(&self, leaves_only: bool) -> FieldedTable {
        let fields = self.field_list();
        let mut rows = Vec::new();
        for id in self.walk() {
            if leaves_only && !self.is_leaf(id) {
                continue;
            }
            let row = fields
                .iter()
                .map(|f| self.find_val(id, f).unwrap_or("").to_string())
                .collect();
            rows.push(FieldedRow {
                row,
                line: self.stanza(id).start_line(),
            });
        }
        let mut table = FieldedTable::new(self.file_name(), &fields);
        table.rows = rows;
        table
    }

    /// Build a storm from a table. At each level the rows are grouped on a
    /// dividing field, in order of first appearance. The group stanza gets
    /// that field and every other field it predicts; the remaining fields
    /// go down a level. Undefined values are dropped, then shared values
    /// are hoisted and tags sorted unless `options` say otherwise.
    pub fn from_fielded_table(table: &FieldedTable, options: &FromTableOptions) -> Result<TagStorm> {
        let rows: Vec<&FieldedRow> = table.rows().iter().collect();
        let columns: Vec<usize> = (0..table.fields().len()).collect();
        let divs = if !options.div_fields.is_empty() {
            let divs = options
                .div_fields
                .iter()
                .map(|f| table.must_find_field_ix(f))
                .collect::<Result<Vec<usize>>>()?;
            Some(divs)
        } else if options.local {
            None
        } else {
            Some(parting_divs(&rows, &field_infos(table, &rows, &columns)))
        };
        if let Some(divs) = &divs {
            let names: Vec<&str> = divs.iter().map(|&ix| table.fields()[ix].as_str()).collect();
            debug!(table = table.name(), divs = ?names, "parting table");
        }

        let mut storm = TagStorm::new(table.name());
        storm.partition(table, &rows, &columns, divs.as_deref(), None);

        storm.remove_empties();
        if !options.no_hoist {
            storm.hoist(None);
        }
        if options.keep_order {
            let order: Vec<&str> = table.fields().iter().map(String::as_str).collect();
            storm.order_sort(&order);
        } else {
            storm.alpha_sort();
        }
        debug!(
            table = table.name(),
            stanzas = storm.count_stanzas(),
            "converted table to tag storm"
        );
        Ok(storm)
    }

    fn partition(
        &mut self,
        table: &FieldedTable,
        rows: &[&FieldedRow],
        columns: &[usize],
        divs: Option<&[usize]>,
        parent: Option<StanzaId>,
    ) {
        let infos = field_infos(table, rows, columns);
        let parting = match divs {
            Some([key, rest @ ..]) if !rest.is_empty() => {
                match infos.iter().find(|info| info.ix == *key) {
                    Some(key_info) => Parting::On {
                        key: *key,
                        columns: infos
                            .iter()
                            .filter(|info| !rest.contains(&info.ix) && predicts(rows, key_info, info))
                            .map(|info| info.ix)
                            .collect(),
                        rest: Some(rest),
                    },
                    None => Parting::Leaves,
                }
            }
            Some(_) => Parting::Leaves,
            None => {
                let sets = find_locked_sets(rows, &infos);
                match ranked(&sets).first() {
                    Some(&best) => Parting::On {
                        key: infos[sets[best].members[0]].ix,
                        columns: sets[best]
                            .predicted
                            .iter()
                            .flat_map(|&p| sets[p].members.iter().map(|&m| infos[m].ix))
                            .collect(),
                        rest: None,
                    },
                    None => Parting::Leaves,
                }
            }
        };

        let (key, group_columns, rest) = match parting {
            Parting::Leaves => {
                for row in rows {
                    let id = self.new_stanza_at_end(parent);
                    self.append_defined(table, id, row, columns);
                }
                return;
            }
            Parting::On { key, columns, rest } => (key, columns, rest),
        };

        let mut groups: Vec<Vec<&FieldedRow>> = Vec::new();
        let mut group_ix: HashMap<&str, usize> = HashMap::new();
        for &row in rows {
            match group_ix.get(row.row[key].as_str()) {
                Some(&g) => groups[g].push(row),
                None => {
                    group_ix.insert(row.row[key].as_str(), groups.len());
                    groups.push(vec![row]);
                }
            }
        }

        let sub_columns: Vec<usize> = columns
            .iter()
            .copied()
            .filter(|ix| !group_columns.contains(ix))
            .collect();
        for members in groups {
            let id = self.new_stanza_at_end(parent);
            self.append_defined(table, id, members[0], &group_columns);
            if !sub_columns.is_empty() {
                self.partition(table, &members, &sub_columns, rest, Some(id));
            }
        }
    }

    fn append_defined(&mut self, table: &FieldedTable, id: StanzaId, row: &FieldedRow, columns: &[usize]) {
        for &ix in columns {
            let val = &row.row[ix];
            if is_defined_val(val) {
                self.append_tag(id, &table.fields()[ix], val);
            }
        }
    }
}
