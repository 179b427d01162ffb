use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::csv::csv_join;
use crate::error::{Result, TagStormError};

/// Index of a stanza inside the arena of the [`TagStorm`] that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StanzaId(usize);

impl StanzaId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One `name value` line of a stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPair {
    pub name: String,
    pub val: String,
}

impl TagPair {
    pub fn new(name: impl Into<String>, val: impl Into<String>) -> Self {
        TagPair {
            name: name.into(),
            val: val.into(),
        }
    }
}

/// A node of the tree: ordered tags plus first-child/next-sibling links.
#[derive(Debug, Clone, Default)]
pub struct TagStanza {
    pub(crate) tags: Vec<TagPair>,
    pub(crate) parent: Option<StanzaId>,
    pub(crate) first_child: Option<StanzaId>,
    pub(crate) next_sibling: Option<StanzaId>,
    /// 1-based line where the stanza started, 0 when built in code.
    pub(crate) start_line: usize,
}

impl TagStanza {
    pub fn tags(&self) -> &[TagPair] {
        &self.tags
    }

    pub fn parent(&self) -> Option<StanzaId> {
        self.parent
    }

    pub fn first_child(&self) -> Option<StanzaId> {
        self.first_child
    }

    pub fn next_sibling(&self) -> Option<StanzaId> {
        self.next_sibling
    }

    pub fn start_line(&self) -> usize {
        self.start_line
    }

    pub fn is_leaf(&self) -> bool {
        self.first_child.is_none()
    }

    /// Value of a tag defined on this stanza itself.
    pub fn local_val(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.val.as_str())
    }
}

/// A hierarchical tag database.
///
/// Stanzas live in one arena owned by the storm and are addressed by
/// [`StanzaId`]. Stanzas unlinked by mutations stay in the arena; everything
/// is released together when the storm is dropped.
#[derive(Debug, Clone)]
pub struct TagStorm {
    file_name: String,
    stanzas: Vec<TagStanza>,
    forest: Option<StanzaId>,
}

/// Iterator over a sibling chain.
pub struct Siblings<'a> {
    storm: &'a TagStorm,
    next: Option<StanzaId>,
}

impl Iterator for Siblings<'_> {
    type Item = StanzaId;

    fn next(&mut self) -> Option<StanzaId> {
        let id = self.next?;
        self.next = self.storm.node(id).next_sibling;
        Some(id)
    }
}

/// Depth-first pre-order walk over every linked stanza.
pub struct Walk<'a> {
    storm: &'a TagStorm,
    next: Option<StanzaId>,
}

impl Iterator for Walk<'_> {
    type Item = StanzaId;

    fn next(&mut self) -> Option<StanzaId> {
        let id = self.next?;
        let node = self.storm.node(id);
        self.next = match node.first_child {
            Some(child) => Some(child),
            None => {
                // Climb until some ancestor has a younger sibling.
                let mut cur = Some(id);
                let mut found = None;
                while let Some(c) = cur {
                    let n = self.storm.node(c);
                    if n.next_sibling.is_some() {
                        found = n.next_sibling;
                        break;
                    }
                    cur = n.parent;
                }
                found
            }
        };
        Some(id)
    }
}

impl TagStorm {
    /// Create a new, empty storm.
    pub fn new(file_name: impl Into<String>) -> Self {
        TagStorm {
            file_name: file_name.into(),
            stanzas: Vec::new(),
            forest: None,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn stanza(&self, id: StanzaId) -> &TagStanza {
        self.node(id)
    }

    fn node(&self, id: StanzaId) -> &TagStanza {
        &self.stanzas[id.0]
    }

    fn node_mut(&mut self, id: StanzaId) -> &mut TagStanza {
        &mut self.stanzas[id.0]
    }

    fn alloc(&mut self, stanza: TagStanza) -> StanzaId {
        self.stanzas.push(stanza);
        StanzaId(self.stanzas.len() - 1)
    }

    /// Create an empty stanza at the head of `parent`'s child list, or at the
    /// head of the forest when `parent` is `None`.
    pub fn new_stanza(&mut self, parent: Option<StanzaId>) -> StanzaId {
        self.new_stanza_at_line(parent, 0)
    }

    pub(crate) fn new_stanza_at_line(&mut self, parent: Option<StanzaId>, line: usize) -> StanzaId {
        let head = match parent {
            Some(p) => self.node(p).first_child,
            None => self.forest,
        };
        let id = self.alloc(TagStanza {
            parent,
            next_sibling: head,
            start_line: line,
            ..TagStanza::default()
        });
        match parent {
            Some(p) => self.node_mut(p).first_child = Some(id),
            None => self.forest = Some(id),
        }
        id
    }

    /// Create an empty stanza at the tail of `parent`'s child list.
    pub fn new_stanza_at_end(&mut self, parent: Option<StanzaId>) -> StanzaId {
        let head = match parent {
            Some(p) => self.node(p).first_child,
            None => self.forest,
        };
        let last = self.chain(head).last();
        let id = self.alloc(TagStanza {
            parent,
            ..TagStanza::default()
        });
        match (last, parent) {
            (Some(l), _) => self.node_mut(l).next_sibling = Some(id),
            (None, Some(p)) => self.node_mut(p).first_child = Some(id),
            (None, None) => self.forest = Some(id),
        }
        id
    }

    /// Add a tag at the beginning of a stanza.
    pub fn add_tag(&mut self, id: StanzaId, name: &str, val: &str) {
        self.node_mut(id).tags.insert(0, TagPair::new(name, val));
    }

    /// Add a tag at the end of a stanza.
    pub fn append_tag(&mut self, id: StanzaId, name: &str, val: &str) {
        self.node_mut(id).tags.push(TagPair::new(name, val));
    }

    pub(crate) fn push_pair(&mut self, id: StanzaId, pair: TagPair) {
        self.node_mut(id).tags.push(pair);
    }

    pub fn add_i64(&mut self, id: StanzaId, name: &str, val: i64) {
        self.add_tag(id, name, &val.to_string());
    }

    pub fn add_f64(&mut self, id: StanzaId, name: &str, val: f64) {
        self.add_tag(id, name, &val.to_string());
    }

    /// Replace the value of an existing tag, or append the tag if absent.
    pub fn update_tag(&mut self, id: StanzaId, name: &str, val: &str) {
        let stanza = self.node_mut(id);
        if let Some(pair) = stanza.tags.iter_mut().find(|p| p.name == name) {
            if pair.val != val {
                trace!(tag = name, from = %pair.val, to = val, "updating tag");
                pair.val = val.to_string();
            }
            return;
        }
        stanza.tags.push(TagPair::new(name, val));
    }

    /// Remove the first occurrence of a tag from one stanza.
    pub fn delete_tag(&mut self, id: StanzaId, name: &str) -> bool {
        let tags = &mut self.node_mut(id).tags;
        match tags.iter().position(|p| p.name == name) {
            Some(ix) => {
                tags.remove(ix);
                true
            }
            None => false,
        }
    }

    fn reverse_chain(&mut self, first: Option<StanzaId>) -> Option<StanzaId> {
        let mut prev = None;
        let mut cur = first;
        while let Some(id) = cur {
            let node = self.node_mut(id);
            cur = node.next_sibling;
            node.next_sibling = prev;
            prev = Some(id);
        }
        prev
    }

    /// Reverse every sibling list. Builders that add at the head call this
    /// once at the end to restore source order.
    pub fn reverse_all(&mut self) {
        self.forest = self.reverse_chain(self.forest);
        for ix in 0..self.stanzas.len() {
            let first = self.stanzas[ix].first_child;
            self.stanzas[ix].first_child = self.reverse_chain(first);
        }
    }

    fn link_chain(&mut self, ids: &[StanzaId]) -> Option<StanzaId> {
        for pair in ids.windows(2) {
            self.node_mut(pair[0]).next_sibling = Some(pair[1]);
        }
        if let Some(&last) = ids.last() {
            self.node_mut(last).next_sibling = None;
        }
        ids.first().copied()
    }

    // ── Navigation ──────────────────────────────────────────────────

    pub fn first_root(&self) -> Option<StanzaId> {
        self.forest
    }

    fn chain(&self, first: Option<StanzaId>) -> Siblings<'_> {
        Siblings {
            storm: self,
            next: first,
        }
    }

    pub fn roots(&self) -> Siblings<'_> {
        self.chain(self.forest)
    }

    pub fn children(&self, id: StanzaId) -> Siblings<'_> {
        self.chain(self.node(id).first_child)
    }

    pub fn parent(&self, id: StanzaId) -> Option<StanzaId> {
        self.node(id).parent
    }

    pub fn is_leaf(&self, id: StanzaId) -> bool {
        self.node(id).is_leaf()
    }

    /// The stanza itself followed by its parent chain up to the root.
    pub fn ancestors(&self, id: StanzaId) -> impl Iterator<Item = StanzaId> + '_ {
        std::iter::successors(Some(id), move |&s| self.node(s).parent)
    }

    /// Number of ancestors; roots are at depth 0.
    pub fn depth(&self, id: StanzaId) -> usize {
        self.ancestors(id).count() - 1
    }

    /// Lazily visit every stanza, parents before children, in tree order.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            storm: self,
            next: self.forest,
        }
    }

    /// Call `f` on every stanza in tree order.
    pub fn visit<F>(&self, mut f: F)
    where
        F: FnMut(&TagStorm, StanzaId),
    {
        for id in self.walk() {
            f(self, id);
        }
    }

    /// Call `f` with mutable access to every linked stanza.
    pub fn visit_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut TagStanza),
    {
        let ids: Vec<StanzaId> = self.walk().collect();
        for id in ids {
            f(self.node_mut(id));
        }
    }

    pub fn leaves(&self) -> impl Iterator<Item = StanzaId> + '_ {
        self.walk().filter(move |&id| self.node(id).is_leaf())
    }

    // ── Lookup ──────────────────────────────────────────────────────

    /// Value of a tag on the stanza itself; parents are not consulted.
    pub fn find_local_val(&self, id: StanzaId, name: &str) -> Option<&str> {
        self.node(id).local_val(name)
    }

    /// Value of a tag on the stanza or, failing that, its nearest ancestor.
    pub fn find_val(&self, id: StanzaId, name: &str) -> Option<&str> {
        self.ancestors(id)
            .find_map(|ancestor| self.node(ancestor).local_val(name))
    }

    pub fn must_find_val(&self, id: StanzaId, name: &str) -> Result<&str> {
        self.find_val(id, name).ok_or_else(|| TagStormError::MissingTag {
            tag: name.to_string(),
        })
    }

    /// Every tag visible from a stanza, own tags first, each name once.
    pub fn tags_including_parents(&self, id: StanzaId) -> Vec<&TagPair> {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        for ancestor in self.ancestors(id) {
            for pair in &self.node(ancestor).tags {
                if seen.insert(pair.name.as_str()) {
                    list.push(pair);
                }
            }
        }
        list
    }

    // ── Statistics ──────────────────────────────────────────────────

    /// Distinct tag names in order of first appearance.
    pub fn field_list(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        for id in self.walk() {
            for pair in &self.node(id).tags {
                if seen.insert(pair.name.as_str()) {
                    list.push(pair.name.clone());
                }
            }
        }
        list
    }

    /// How many times each tag name is used (not counting inheritance).
    pub fn field_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for id in self.walk() {
            for pair in &self.node(id).tags {
                *counts.entry(pair.name.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn count_stanzas(&self) -> usize {
        self.walk().count()
    }

    pub fn count_tags(&self) -> usize {
        self.walk().map(|id| self.node(id).tags.len()).sum()
    }

    pub fn count_fields(&self) -> usize {
        self.field_counts().len()
    }

    /// Number of levels in the deepest branch; 0 for an empty storm.
    pub fn max_depth(&self) -> usize {
        self.leaves().map(|id| self.depth(id) + 1).max().unwrap_or(0)
    }

    /// Count every stanza's effective value of `tag`. When `required` is
    /// given only stanzas that resolve that tag too are counted.
    pub fn count_tag_vals(&self, tag: &str, required: Option<&str>) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for id in self.walk() {
            if required.map_or(true, |r| self.find_val(id, r).is_some()) {
                if let Some(val) = self.find_val(id, tag) {
                    *counts.entry(val.to_string()).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// Delete every tag of the given name from the storm.
    pub fn delete_tags(&mut self, name: &str) {
        self.visit_mut(|stanza| stanza.tags.retain(|p| p.name != name));
    }

    /// Remove every tag whose name is one of `weeds`.
    pub fn weed(&mut self, weeds: &[&str]) {
        let weeds: HashSet<&str> = weeds.iter().copied().collect();
        self.visit_mut(|stanza| stanza.tags.retain(|p| !weeds.contains(p.name.as_str())));
    }

    /// Rename tags using `(old, new)` pairs.
    pub fn substitute(&mut self, subs: &[(&str, &str)]) {
        let subs: HashMap<&str, &str> = subs.iter().copied().collect();
        self.visit_mut(|stanza| {
            for pair in &mut stanza.tags {
                if let Some(new_name) = subs.get(pair.name.as_str()) {
                    pair.name = new_name.to_string();
                }
            }
        });
    }

    pub fn rename_tag(&mut self, old: &str, new: &str) {
        self.substitute(&[(old, new)]);
    }

    /// Add `new` with the value of `old` wherever `old` is defined locally.
    pub fn copy_tags(&mut self, old: &str, new: &str) {
        self.visit_mut(|stanza| {
            if let Some(val) = stanza.local_val(old).map(str::to_string) {
                stanza.tags.insert(0, TagPair::new(new, val));
            }
        });
    }

    /// Sort the tags of each stanza by name.
    pub fn alpha_sort(&mut self) {
        self.visit_mut(|stanza| stanza.tags.sort_by(|a, b| a.name.cmp(&b.name)));
    }

    /// Sort the tags of each stanza to follow `order`. Names not listed keep
    /// their relative order after the listed ones.
    pub fn order_sort(&mut self, order: &[&str]) {
        let rank: HashMap<&str, usize> = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        self.visit_mut(|stanza| {
            stanza
                .tags
                .sort_by_key(|p| rank.get(p.name.as_str()).copied().unwrap_or(order.len()))
        });
    }

    /// Merge tags repeated within a stanza into one tag whose value is the
    /// CSV list of all the occurrences.
    pub fn collapse_repeated_tags(&mut self) {
        self.visit_mut(|stanza| {
            let mut merged: Vec<(String, Vec<String>)> = Vec::new();
            let mut index: HashMap<String, usize> = HashMap::new();
            for pair in std::mem::take(&mut stanza.tags) {
                match index.get(&pair.name) {
                    Some(&ix) => merged[ix].1.push(pair.val),
                    None => {
                        index.insert(pair.name.clone(), merged.len());
                        merged.push((pair.name, vec![pair.val]));
                    }
                }
            }
            stanza.tags = merged
                .into_iter()
                .map(|(name, mut vals)| {
                    let val = if vals.len() == 1 {
                        vals.remove(0)
                    } else {
                        csv_join(&vals)
                    };
                    TagPair { name, val }
                })
                .collect();
        });
    }

    /// Rename each occurrence of a repeated tag to `name[i]`, counting from 1.
    pub fn index_repeated_tags(&mut self) {
        self.visit_mut(|stanza| {
            let mut totals: HashMap<String, usize> = HashMap::new();
            for pair in &stanza.tags {
                *totals.entry(pair.name.clone()).or_insert(0) += 1;
            }
            let mut seen: HashMap<String, usize> = HashMap::new();
            for pair in &mut stanza.tags {
                if totals.get(&pair.name).copied().unwrap_or(0) > 1 {
                    let n = seen.entry(pair.name.clone()).or_insert(0);
                    *n += 1;
                    pair.name = format!("{}[{}]", pair.name, n);
                }
            }
        });
    }

    /// Remove stanzas without tags. Their children take their place in the
    /// sibling list and are re-parented to the removed stanza's parent.
    pub fn remove_empties(&mut self) {
        let forest = self.forest;
        self.forest = self.remove_empties_in(forest, None);
    }

    fn remove_empties_in(&mut self, first: Option<StanzaId>, parent: Option<StanzaId>) -> Option<StanzaId> {
        let ids: Vec<StanzaId> = self.chain(first).collect();
        let mut kept = Vec::with_capacity(ids.len());
        for id in ids {
            let first_child = self.node(id).first_child;
            let kids = self.remove_empties_in(first_child, Some(id));
            self.node_mut(id).first_child = kids;
            if self.node(id).tags.is_empty() {
                let promoted: Vec<StanzaId> = self.chain(kids).collect();
                trace!(children = promoted.len(), "removing empty stanza");
                for kid in promoted {
                    self.node_mut(kid).parent = parent;
                    kept.push(kid);
                }
                let node = self.node_mut(id);
                node.first_child = None;
                node.next_sibling = None;
            } else {
                kept.push(id);
            }
        }
        self.link_chain(&kept)
    }

    /// Move tags that have the same value in every child up to the parent.
    /// With several roots a tagless root is created first so common values
    /// can be hoisted there. If `selected` is given only that tag moves.
    pub fn hoist(&mut self, selected: Option<&str>) {
        let roots: Vec<StanzaId> = self.roots().collect();
        if roots.len() > 1 {
            let root = self.alloc(TagStanza {
                first_child: self.forest,
                ..TagStanza::default()
            });
            for r in roots {
                self.node_mut(r).parent = Some(root);
            }
            self.forest = Some(root);
        }
        let roots: Vec<StanzaId> = self.roots().collect();
        for r in roots {
            self.hoist_below(r, selected);
        }
        self.remove_empties();
    }

    fn hoist_below(&mut self, id: StanzaId, selected: Option<&str>) {
        let kids: Vec<StanzaId> = self.children(id).collect();
        if kids.is_empty() {
            return;
        }
        for &kid in &kids {
            self.hoist_below(kid, selected);
        }

        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for &kid in &kids {
            for pair in &self.node(kid).tags {
                if seen.insert(pair.name.clone()) {
                    names.push(pair.name.clone());
                }
            }
        }

        for name in names {
            if selected.map_or(false, |s| s != name) {
                continue;
            }
            if let Some(val) = self.all_same_val(&name, &kids) {
                trace!(tag = %name, val = %val, "hoisting");
                self.update_tag(id, &name, &val);
                for &kid in &kids {
                    self.delete_tag(kid, &name);
                }
            }
        }
    }

    fn all_same_val(&self, name: &str, stanzas: &[StanzaId]) -> Option<String> {
        let mut val: Option<&str> = None;
        for &id in stanzas {
            let one = self.find_local_val(id, name)?;
            match val {
                None => val = Some(one),
                Some(v) if v != one => return None,
                Some(_) => {}
            }
        }
        val.map(str::to_string)
    }
}
