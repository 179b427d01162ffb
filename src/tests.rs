use crate::config::{ParseConfig, SqlConfig, TagStormConfig, ValidateConfig};
use crate::csv::{csv_escape, csv_escape_and_append, csv_join, csv_parse_next, csv_split, CsvCursor};
use crate::error::TagStormError;
use crate::facet::FacetSet;
use crate::fielded::{FieldedTable, FromTableOptions};
use crate::query::QueryOutput;
use crate::rql::{RqlCommand, RqlExpr, RqlStatement};
use crate::schema::{Required, Schema, ValueType};
use crate::sql::{sql_column_name, sql_escape, SqlEmitter};
use crate::tree::*;
use crate::typeinfo::infer_types;
use crate::validate::validate_storm;
use crate::wildcard::Wildcard;
use crate::writer::{FlatOptions, TableStyle};
use proptest::prelude::*;

// ── Shared fixture runners ──────────────────────────────────────────

/// Embed fixture files at compile time.
const PARSE_FIXTURES: &str = include_str!("../test-data/fixtures/parse.json");
const PARSE_ERROR_FIXTURES: &str = include_str!("../test-data/fixtures/parse-errors.json");
const SCHEMA_FIXTURES: &str = include_str!("../test-data/fixtures/schema.json");
const RQL_FIXTURES: &str = include_str!("../test-data/fixtures/rql.json");

fn storm(text: &str) -> TagStorm {
    crate::parse_tag_storm(text, "test.tags").unwrap()
}

/// Structure of a storm as `[{"tags": [[name, val]...], "children": [...]}]`,
/// leaving out empty child lists.
fn storm_to_json(storm: &TagStorm) -> serde_json::Value {
    serde_json::Value::Array(storm.roots().map(|id| stanza_to_json(storm, id)).collect())
}

fn stanza_to_json(storm: &TagStorm, id: StanzaId) -> serde_json::Value {
    let tags: Vec<serde_json::Value> = storm
        .stanza(id)
        .tags()
        .iter()
        .map(|p| serde_json::json!([p.name, p.val]))
        .collect();
    let children: Vec<serde_json::Value> = storm.children(id).map(|c| stanza_to_json(storm, c)).collect();
    if children.is_empty() {
        serde_json::json!({ "tags": tags })
    } else {
        serde_json::json!({ "tags": tags, "children": children })
    }
}

/// Local values of `tag` on the given stanzas.
fn local_vals<'a>(storm: &'a TagStorm, ids: impl Iterator<Item = StanzaId>, tag: &str) -> Vec<&'a str> {
    ids.map(|id| storm.find_local_val(id, tag).unwrap_or("")).collect()
}

fn pairs(storm: &TagStorm, id: StanzaId) -> Vec<(&str, &str)> {
    storm
        .stanza(id)
        .tags()
        .iter()
        .map(|p| (p.name.as_str(), p.val.as_str()))
        .collect()
}

#[test]
fn test_fixture_parse() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(PARSE_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let input = fixture["input"].as_str().unwrap();
        let expected = &fixture["expected"];

        let result = crate::parse_tag_storm(input, "fixture.tags");
        let storm = match result {
            Ok(storm) => storm,
            Err(e) => panic!("Fixture '{}': unexpected parse error: {}", name, e),
        };
        let actual = storm_to_json(&storm);
        assert_eq!(
            &actual, expected,
            "Fixture '{}': structure mismatch\n  Got:      {}\n  Expected: {}",
            name, actual, expected
        );
    }
}

#[test]
fn test_fixture_parse_errors() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(PARSE_ERROR_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let input = fixture["input"].as_str().unwrap();
        let expected_line = fixture["line"].as_u64().unwrap() as usize;
        let expected_message = fixture["message"].as_str().unwrap();

        let mut config = ParseConfig::default();
        if let Some(depth) = fixture.get("maxDepth").and_then(|v| v.as_u64()) {
            config.max_depth = depth as usize;
        }

        match crate::parser::parse_with(input, "fixture.tags", &config) {
            Err(TagStormError::Parse { file, line, message }) => {
                assert_eq!(file, "fixture.tags", "Fixture '{}'", name);
                assert_eq!(line, expected_line, "Fixture '{}': wrong line", name);
                assert_eq!(message, expected_message, "Fixture '{}': wrong message", name);
            }
            Err(other) => panic!("Fixture '{}': expected a parse error, got {}", name, other),
            Ok(_) => panic!("Fixture '{}': expected a parse error for {:?}", name, input),
        }
    }
}

#[test]
fn test_fixture_schema() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(SCHEMA_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let schema_input = fixture["schema"].as_str().unwrap();
        let tag_input = fixture["input"].as_str().unwrap();
        let expected_errors = fixture["expectedErrors"].as_array().unwrap();

        let schema = Schema::parse(schema_input, "fixture.schema")
            .unwrap_or_else(|e| panic!("Fixture '{}': schema error: {}", name, e));
        let storm = crate::parse_tag_storm(tag_input, "fixture.tags")
            .unwrap_or_else(|e| panic!("Fixture '{}': parse error: {}", name, e));

        let mut config = ValidateConfig::default();
        if let Some(max) = fixture.get("maxErrors").and_then(|v| v.as_u64()) {
            config.max_errors = max as usize;
        }
        let report = validate_storm(&schema, &storm, &config);

        let actual: Vec<(String, String)> = report
            .errors
            .iter()
            .map(|e| (e.code.to_string(), e.tag.clone()))
            .collect();
        let expected: Vec<(String, String)> = expected_errors
            .iter()
            .map(|e| {
                (
                    e["code"].as_str().unwrap().to_string(),
                    e["tag"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            actual, expected,
            "Fixture '{}': errors mismatch, messages: {:?}",
            name,
            report.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>()
        );

        let expect_limit = fixture
            .get("hitLimit")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        assert_eq!(report.hit_limit, expect_limit, "Fixture '{}': hit_limit", name);
    }
}

#[test]
fn test_fixture_rql() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(RQL_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let text = fixture["expr"].as_str().unwrap();
        let expect_error = fixture
            .get("error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let parsed = RqlExpr::parse(text);
        if expect_error {
            assert!(
                matches!(parsed, Err(TagStormError::Rql { .. })),
                "Fixture '{}': expected an RQL error, got {:?}",
                name,
                parsed
            );
            continue;
        }
        let expr = parsed.unwrap_or_else(|e| panic!("Fixture '{}': {}", name, e));
        let record = fixture["record"].as_object().unwrap();
        let lookup = |field: &str| record.get(field).and_then(|v| v.as_str());
        let expected = fixture["expected"].as_bool().unwrap();
        assert_eq!(expr.matches(&lookup).unwrap(), expected, "Fixture '{}': {}", name, text);
    }
}

// ── Parser ──────────────────────────────────────────────────────────

#[test]
fn test_parse_error_display() {
    let err = crate::parse_tag_storm("a 1\n\n    b 2\n\n  c 3\n", "test.tags").unwrap_err();
    assert_eq!(err.to_string(), "Indentation inconsistent line 5 of test.tags");
}

#[test]
fn test_parse_tab_stop_config() {
    let config = TagStormConfig::builder().tab_stop(4).build();
    let storm = crate::parser::parse_with("a 1\n\n\tb 2\n\n    c 3\n", "t", &config.parse).unwrap();
    let root = storm.first_root().unwrap();
    assert_eq!(local_vals(&storm, storm.children(root), "b"), vec!["2", ""]);
    assert_eq!(storm.children(root).count(), 2);
}

#[test]
fn test_start_lines_and_walk_order() {
    let s = storm("a 1\n\n\tb 2\n\n\t\tc 3\n\n\td 4\n\ne 5\n");
    let order: Vec<String> = s
        .walk()
        .map(|id| s.stanza(id).tags()[0].name.clone())
        .collect();
    assert_eq!(order, vec!["a", "b", "c", "d", "e"]);

    let leaves: Vec<&str> = s
        .leaves()
        .map(|id| s.stanza(id).tags()[0].name.as_str())
        .collect();
    assert_eq!(leaves, vec!["c", "d", "e"]);

    let lines: Vec<usize> = s.walk().map(|id| s.stanza(id).start_line()).collect();
    assert_eq!(lines, vec![1, 3, 5, 7, 9]);

    assert_eq!(s.count_stanzas(), 5);
    assert_eq!(s.max_depth(), 3);
    assert_eq!(s.roots().count(), 2);
}

#[test]
fn test_parse_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.tags");
    std::fs::write(&path, "lab wet\n\n\tsample s1\n").unwrap();

    let s = TagStorm::from_file(&path).unwrap();
    assert_eq!(s.count_stanzas(), 2);
    assert!(s.file_name().ends_with("samples.tags"));

    let missing = TagStorm::from_file(dir.path().join("nope.tags"));
    assert!(matches!(missing, Err(TagStormError::Io { .. })));
}

// ── Inheritance ─────────────────────────────────────────────────────

#[test]
fn test_own_value_shadows_ancestor() {
    let s = storm("lab wet\nage 1\n\n\tage 2\n\n\t\tname x\n");
    let leaf = s.leaves().next().unwrap();
    assert_eq!(s.find_val(leaf, "age"), Some("2"));
    assert_eq!(s.find_val(leaf, "lab"), Some("wet"));
    assert_eq!(s.find_local_val(leaf, "lab"), None);

    let root = s.first_root().unwrap();
    assert_eq!(s.find_val(root, "age"), Some("1"));
    assert_eq!(s.find_val(root, "name"), None);
}

#[test]
fn test_nearest_ancestor_wins() {
    let s = storm("lab wet\n\n\tlab dry\n\n\t\tsample s1\n");
    let leaf = s.leaves().next().unwrap();
    assert_eq!(s.find_val(leaf, "lab"), Some("dry"));
    assert_eq!(s.must_find_val(leaf, "lab").unwrap(), "dry");
    assert!(matches!(
        s.must_find_val(leaf, "age"),
        Err(TagStormError::MissingTag { .. })
    ));
}

#[test]
fn test_tags_including_parents() {
    let s = storm("lab wet\nage 1\n\n\tage 2\n\n\t\tname x\n");
    let leaf = s.leaves().next().unwrap();
    let tags: Vec<(&str, &str)> = s
        .tags_including_parents(leaf)
        .iter()
        .map(|p| (p.name.as_str(), p.val.as_str()))
        .collect();
    assert_eq!(tags, vec![("name", "x"), ("age", "2"), ("lab", "wet")]);
}

// ── Writer ──────────────────────────────────────────────────────────

#[test]
fn test_write_then_parse_round_trip() {
    let text = "lab wet\nflag\n\n\tsample s1\n\tage 5\n\n\t\tnote deep\n\n\tsample s2\n\nlab dry\n";
    let first = storm(text);
    let second = storm(&first.to_text());
    assert_eq!(storm_to_json(&first), storm_to_json(&second));
}

#[test]
fn test_write_tags_format() {
    let s = storm("a 1\n\n\tb 2\n");
    assert_eq!(s.to_text(), "a 1\n\n\tb 2\n\n");

    let mut buf = Vec::new();
    s.write_tags(&mut buf, Some(1)).unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "a 1\n\n");
}

#[test]
fn test_empty_stanza_round_trip() {
    let mut s = TagStorm::new("built");
    let root = s.new_stanza(None);
    let kid = s.new_stanza(Some(root));
    s.add_tag(kid, "a", "1");
    let text = s.to_text();
    assert_eq!(text, "#empty\n\n\ta 1\n\n");
    assert_eq!(storm_to_json(&storm(&text)), storm_to_json(&s));
}

#[test]
fn test_write_flat_ra() {
    let s = storm("sample root\nlab wet\n\n\tsample s1\n\tage 5\n");
    let options = FlatOptions {
        id_tag: Some("sample".to_string()),
        with_parent: true,
        leaves_only: true,
        ..FlatOptions::default()
    };
    let mut buf = Vec::new();
    s.write_flat_ra(&mut buf, &options).unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "sample s1\nparent root\nage 5\nlab wet\n\n"
    );
}

#[test]
fn test_write_flat_table() {
    let s = storm("lab wet\n\n\tsample s1\n\tage 5\n\n\tsample s2\n");

    let mut buf = Vec::new();
    s.write_flat_table(&mut buf, &FlatOptions::default(), TableStyle::Tab)
        .unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "#lab\tsample\tage\nwet\t\t\nwet\ts1\t5\nwet\ts2\t\n"
    );

    let options = FlatOptions {
        leaves_only: true,
        null_val: "NA".to_string(),
        ..FlatOptions::default()
    };
    let mut buf = Vec::new();
    s.write_flat_table(&mut buf, &options, TableStyle::Csv).unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "lab,sample,age\nwet,s1,5\nwet,s2,NA\n"
    );
}

#[test]
fn test_write_flat_tab_never_quotes() {
    let s = storm("name Smith, Jo\nnote say \"hi\"\n");
    let mut buf = Vec::new();
    s.write_flat_table(&mut buf, &FlatOptions::default(), TableStyle::Tab)
        .unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "#name\tnote\nSmith, Jo\tsay \"hi\"\n"
    );

    let mut buf = Vec::new();
    s.write_flat_table(&mut buf, &FlatOptions::default(), TableStyle::Csv)
        .unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "name,note\n\"Smith, Jo\",\"say \"\"hi\"\"\"\n"
    );
}

#[test]
fn test_write_flat_csv_quotes_values() {
    let s = storm("name Smith, Jo\n");
    let mut buf = Vec::new();
    s.write_flat_table(&mut buf, &FlatOptions::default(), TableStyle::Csv)
        .unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "name\n\"Smith, Jo\"\n");
}

// ── Construction and mutation ───────────────────────────────────────

#[test]
fn test_head_insertion_and_reverse_all() {
    let mut s = TagStorm::new("built");
    let root = s.new_stanza(None);
    let first = s.new_stanza(Some(root));
    s.add_tag(first, "n", "1");
    let second = s.new_stanza(Some(root));
    s.add_tag(second, "n", "2");
    assert_eq!(local_vals(&s, s.children(root), "n"), vec!["2", "1"]);

    s.reverse_all();
    assert_eq!(local_vals(&s, s.children(root), "n"), vec!["1", "2"]);

    let third = s.new_stanza_at_end(Some(root));
    s.add_tag(third, "n", "3");
    assert_eq!(local_vals(&s, s.children(root), "n"), vec!["1", "2", "3"]);
    assert_eq!(s.parent(third), Some(root));
}

#[test]
fn test_tag_editing() {
    let mut s = TagStorm::new("built");
    let id = s.new_stanza(None);
    s.add_tag(id, "b", "2");
    s.add_tag(id, "a", "1");
    s.append_tag(id, "c", "3");
    s.add_i64(id, "count", -4);
    s.add_f64(id, "ratio", 0.5);
    assert_eq!(
        pairs(&s, id),
        vec![("ratio", "0.5"), ("count", "-4"), ("a", "1"), ("b", "2"), ("c", "3")]
    );

    s.update_tag(id, "a", "one");
    s.update_tag(id, "d", "4");
    assert_eq!(s.find_local_val(id, "a"), Some("one"));
    assert_eq!(s.stanza(id).tags().last().unwrap().name, "d");

    assert!(s.delete_tag(id, "b"));
    assert!(!s.delete_tag(id, "b"));
    assert_eq!(s.find_local_val(id, "b"), None);
}

#[test]
fn test_statistics() {
    let s = storm("lab wet\n\n\tsample s1\n\tage 5\n\n\tsample s2\n\nlab dry\n\n\tsample s3\n");
    assert_eq!(s.field_list(), vec!["lab", "sample", "age"]);
    assert_eq!(s.field_counts()["sample"], 3);
    assert_eq!(s.count_tags(), 6);
    assert_eq!(s.count_fields(), 3);

    let with_sample = s.count_tag_vals("lab", Some("sample"));
    assert_eq!(with_sample["wet"], 2);
    assert_eq!(with_sample["dry"], 1);
    let all = s.count_tag_vals("lab", None);
    assert_eq!(all["wet"], 3);
    assert_eq!(all["dry"], 2);
}

#[test]
fn test_weed_substitute_copy() {
    let mut s = storm("lab wet\nold 1\n\n\told 2\n\tjunk x\n");
    s.weed(&["junk"]);
    s.substitute(&[("old", "new")]);
    s.copy_tags("lab", "site");
    let root = s.first_root().unwrap();
    let kid = s.children(root).next().unwrap();
    assert_eq!(pairs(&s, root), vec![("site", "wet"), ("lab", "wet"), ("new", "1")]);
    assert_eq!(pairs(&s, kid), vec![("new", "2")]);

    s.rename_tag("new", "newer");
    s.delete_tags("site");
    assert_eq!(pairs(&s, root), vec![("lab", "wet"), ("newer", "1")]);
}

#[test]
fn test_sorting_tags() {
    let mut s = storm("c 3\na 1\nb 2\n");
    let root = s.first_root().unwrap();
    s.alpha_sort();
    assert_eq!(pairs(&s, root), vec![("a", "1"), ("b", "2"), ("c", "3")]);
    s.order_sort(&["c"]);
    assert_eq!(pairs(&s, root), vec![("c", "3"), ("a", "1"), ("b", "2")]);
}

#[test]
fn test_collapse_repeated_tags() {
    let mut s = storm("t a\nt b\nu 1\nt c\n");
    s.collapse_repeated_tags();
    let root = s.first_root().unwrap();
    assert_eq!(pairs(&s, root), vec![("t", "a,b,c"), ("u", "1")]);
}

#[test]
fn test_index_repeated_tags() {
    let mut s = storm("t a\nt b\nu 1\nt c\n");
    s.index_repeated_tags();
    let root = s.first_root().unwrap();
    assert_eq!(
        pairs(&s, root),
        vec![("t[1]", "a"), ("t[2]", "b"), ("u", "1"), ("t[3]", "c")]
    );
}

#[test]
fn test_remove_empties_promotes_children() {
    let mut s = TagStorm::new("built");
    let root = s.new_stanza_at_end(None);
    s.add_tag(root, "x", "1");
    let empty = s.new_stanza_at_end(Some(root));
    let g1 = s.new_stanza_at_end(Some(empty));
    s.add_tag(g1, "g", "1");
    let g2 = s.new_stanza_at_end(Some(empty));
    s.add_tag(g2, "g", "2");
    let sib = s.new_stanza_at_end(Some(root));
    s.add_tag(sib, "s", "1");

    s.remove_empties();
    let kids: Vec<StanzaId> = s.children(root).collect();
    assert_eq!(kids, vec![g1, g2, sib]);
    assert!(kids.iter().all(|&k| s.parent(k) == Some(root)));
    assert_eq!(s.count_stanzas(), 4);
}

#[test]
fn test_hoist_shared_values() {
    let mut s = storm("sample s1\nlab wet\nage 5\n\nsample s2\nlab wet\nage 6\n");
    s.hoist(None);
    assert_eq!(
        storm_to_json(&s),
        serde_json::json!([{
            "tags": [["lab", "wet"]],
            "children": [
                { "tags": [["sample", "s1"], ["age", "5"]] },
                { "tags": [["sample", "s2"], ["age", "6"]] }
            ]
        }])
    );
}

#[test]
fn test_hoist_selected_tag_only() {
    let mut s = storm("lab wet\n\n\tage 5\n\tsite a\n\n\tage 5\n\tsite a\n");
    s.hoist(Some("age"));
    let root = s.first_root().unwrap();
    assert_eq!(pairs(&s, root), vec![("lab", "wet"), ("age", "5")]);
    assert_eq!(local_vals(&s, s.children(root), "site"), vec!["a", "a"]);
}

#[test]
fn test_hoist_nothing_shared_keeps_roots() {
    let mut s = storm("a 1\n\na 2\n");
    s.hoist(None);
    assert_eq!(s.roots().count(), 2);
    assert_eq!(local_vals(&s, s.roots(), "a"), vec!["1", "2"]);
}

// ── Index ───────────────────────────────────────────────────────────

#[test]
fn test_index_multi() {
    let s = storm("lab wet\n\n\tsample s1\n\n\tsample s2\n\nlab dry\n");
    let index = s.index("lab").unwrap();
    assert_eq!(index.tag(), "lab");
    assert_eq!(index.len(), 2);
    assert_eq!(index.get_all("wet").len(), 3);
    assert_eq!(index.get("wet"), s.first_root());
    assert!(index.get_all("moist").is_empty());
}

#[test]
fn test_index_unique_rejects_inherited_value() {
    let s = storm("id a\n\n\tx 1\n");
    match s.unique_index("id") {
        Err(TagStormError::NotUnique { tag, value, .. }) => {
            assert_eq!(tag, "id");
            assert_eq!(value, "a");
        }
        other => panic!("expected NotUnique, got {:?}", other),
    }
}

#[test]
fn test_index_unique_distinct_leaves() {
    let s = storm("lab wet\n\n\tid a\n\n\tid b\n\nid c\n");
    let index = s.unique_index("id").unwrap();
    assert_eq!(index.len(), 3);
    assert_eq!(index.get_all("a").len(), 1);
    let mut keys: Vec<&str> = index.keys().collect();
    keys.sort();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[test]
fn test_index_unique_collision() {
    let s = storm("id a\n\nid a\n");
    assert!(matches!(
        s.unique_index("id"),
        Err(TagStormError::NotUnique { .. })
    ));
    assert_eq!(s.index("id").unwrap().get_all("a").len(), 2);
}

// ── Schema ──────────────────────────────────────────────────────────

#[test]
fn test_schema_rule_parsing() {
    let schema = Schema::parse(
        "# samples\n!age # 0 150\n^id $\nkeywords [$] *\nsex $ male 'not given'\n",
        "s.schema",
    )
    .unwrap();
    let rules = schema.rules();
    assert_eq!(rules.len(), 4);

    assert_eq!(rules[0].required, Required::Required);
    assert_eq!(rules[0].value_type, ValueType::Int);
    assert_eq!(rules[0].min_val, Some(0.0));
    assert_eq!(rules[0].max_val, Some(150.0));
    assert_eq!(rules[0].line, 2);

    assert_eq!(rules[1].required, Required::RequiredUnique);
    assert!(rules[2].is_array);
    assert!(rules[2].allows_any());

    let allowed: Vec<&str> = rules[3].allowed.iter().map(|w| w.pattern()).collect();
    assert_eq!(allowed, vec!["male", "not given"]);
}

#[test]
fn test_schema_errors() {
    for (text, line) in [
        ("age\n", 1),
        ("ok $\nage @\n", 2),
        ("age # 1\n", 1),
        ("age # low high\n", 1),
        ("sex $ \"open\n", 1),
    ] {
        match Schema::parse(text, "bad.schema") {
            Err(TagStormError::Schema { line: l, file, .. }) => {
                assert_eq!(l, line, "{:?}", text);
                assert_eq!(file, "bad.schema");
            }
            other => panic!("expected schema error for {:?}, got {:?}", text, other),
        }
    }
}

#[test]
fn test_schema_rule_lookup_order() {
    let schema = Schema::parse("lab.* $\nlab.[] #\nlab.1 %\n", "s").unwrap();
    assert_eq!(schema.find_rule("lab.1").unwrap().value_type, ValueType::Float);
    assert_eq!(schema.find_rule("lab.2").unwrap().value_type, ValueType::Int);
    assert_eq!(schema.find_rule("lab.x").unwrap().value_type, ValueType::String);
    assert!(schema.find_rule("site").is_none());
}

#[test]
fn test_array_template_names() {
    let schema = Schema::parse("a.[].b.[].c $\n", "s").unwrap();
    let rule = &schema.rules()[0];
    assert!(rule.is_template());
    assert_eq!(rule.fragments, vec!["a.", ".b.", ".c"]);
    assert!(rule.matches_name("a.1.b.22.c"));
    assert!(!rule.matches_name("a.1.b.c"));
    assert_eq!(rule.qualified_name(&["1", "2"]), "a.1.b.2.c");
    assert_eq!(rule.element_indexes("a.3.b.4.d"), Some(vec!["3", "4"]));
    assert_eq!(rule.element_indexes("a.x"), None);
}

// ── Validation ──────────────────────────────────────────────────────

#[test]
fn test_validation_errors_only_grow() {
    let schema = Schema::parse("!id $\nage # 0 150\n", "s").unwrap();
    let config = ValidateConfig::default();
    let mut text = String::from("id a\nage 5\n");

    let mut last = validate_storm(&schema, &storm(&text), &config).errors.len();
    assert_eq!(last, 0);
    for violation in ["\nid b\nage 500\n", "\nage 3\n", "\nid c\ncolor red\n"] {
        text.push_str(violation);
        let count = validate_storm(&schema, &storm(&text), &config).errors.len();
        assert!(count > last, "adding {:?} went from {} to {}", violation, last, count);
        last = count;
    }
}

#[test]
fn test_validation_error_detail() {
    let schema = Schema::parse("age # 0 150\n", "s").unwrap();
    let s = storm("age 1\n\nage 151\n");
    let report = validate_storm(&schema, &s, &ValidateConfig::default());
    assert!(!report.is_valid());
    assert!(!report.hit_limit);
    assert_eq!(report.errors.len(), 1);
    let error = &report.errors[0];
    assert_eq!(error.code, "out-of-range");
    assert_eq!(error.line, 3);
    assert!(error.to_string().ends_with("line 3"));
}

// ── Type inference and SQL ──────────────────────────────────────────

const TYPED_STORM: &str = "id 1\nname bob\nscore 2.5\ntemp -3\nbig 300\n\n\
                           id 2\nname alexander\nscore 3\ntemp 4\nbig 70000\n";

#[test]
fn test_infer_column_types() {
    let infos = infer_types(&storm(TYPED_STORM));
    let types: Vec<(&str, String, usize)> = infos
        .iter()
        .map(|i| {
            let c = i.column_type(255);
            (i.name.as_str(), c.sql, c.width)
        })
        .collect();
    assert_eq!(
        types,
        vec![
            ("id", "tinyint unsigned".to_string(), 1),
            ("name", "varchar(9)".to_string(), 10),
            ("score", "double".to_string(), 8),
            ("temp", "tinyint".to_string(), 1),
            ("big", "mediumint unsigned".to_string(), 3),
        ]
    );
    assert_eq!(infos[1].column_type(3).sql, "longblob");
    assert_eq!(infos[1].column_type(3).width, 12);
}

#[test]
fn test_infer_arrays() {
    let infos = infer_types(&storm("tag a\ntag b\nsizes 1,2,3\nn 7\n"));
    assert!(infos[0].is_array);
    assert_eq!(infos[0].column_type(255).sql, "varchar(3)");
    assert!(infos[1].is_array);
    assert!(infos[1].is_int);
    assert_eq!(infos[1].column_type(255).sql, "varchar(5)");
    assert!(!infos[2].is_array);
}

#[test]
fn test_inference_is_idempotent() {
    let s = storm(TYPED_STORM);
    assert_eq!(infer_types(&s), infer_types(&s));
    assert_eq!(infer_types(&s), infer_types(&storm(&s.to_text())));
}

#[test]
fn test_inferred_schema_accepts_its_storm() {
    let s = storm(TYPED_STORM);
    let lines: Vec<String> = infer_types(&s).iter().map(|i| i.schema_line()).collect();
    assert_eq!(lines[0], "id # 1 2");
    assert_eq!(lines[1], "name $ *");
    assert_eq!(lines[2], "score % 2.5 3");

    let schema = Schema::parse(&lines.join("\n"), "inferred").unwrap();
    let report = validate_storm(&schema, &s, &ValidateConfig::default());
    assert!(report.is_valid(), "{:?}", report.errors);
}

const SQL_STORM: &str = "lab wet\n\n\tsample s1\n\tage 5\n\n\tsample s2\n\tage 6\n";

#[test]
fn test_sql_output() {
    let s = storm(SQL_STORM);
    let config = TagStormConfig::builder().key_field("sample").build();
    let emitter = SqlEmitter::new(&s, &config.sql).unwrap();
    assert_eq!(emitter.row_width(), 8);

    let mut buf = Vec::new();
    emitter.write_all(&mut buf).unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "CREATE TABLE tagStorm (\n    lab varchar(3),\n    sample varchar(2),\n    \
         age tinyint unsigned,\n    INDEX(sample(16))\n);\n\
         INSERT INTO tagStorm (lab,sample,age) VALUES ('wet','s1',5);\n\
         INSERT INTO tagStorm (lab,sample,age) VALUES ('wet','s2',6);\n"
    );
}

#[test]
fn test_sql_numeric_key_and_repeats() {
    let s = storm("age 5\ntag a\ntag b\n");
    let config = SqlConfig {
        table: "t".to_string(),
        key_fields: vec!["age".to_string()],
        ..SqlConfig::default()
    };
    let emitter = SqlEmitter::new(&s, &config).unwrap();
    let mut buf = Vec::new();
    emitter.write_all(&mut buf).unwrap();
    let out = String::from_utf8(buf).unwrap();
    assert!(out.contains("    INDEX(age)\n"), "{}", out);
    assert!(out.contains("VALUES (5,'a,b');"), "{}", out);
}

#[test]
fn test_sql_row_too_wide() {
    let s = storm(SQL_STORM);
    let config = SqlConfig {
        row_width_limit: 4,
        ..SqlConfig::default()
    };
    match SqlEmitter::new(&s, &config) {
        Err(e @ TagStormError::RowTooWide { .. }) => {
            assert!(e.to_string().contains("switch engines"));
        }
        Err(other) => panic!("expected RowTooWide, got {}", other),
        Ok(_) => panic!("expected RowTooWide"),
    }
}

#[test]
fn test_sql_column_name_problems() {
    let config = SqlConfig::default();

    let reserved = storm("order 1\n");
    assert!(matches!(
        SqlEmitter::new(&reserved, &config),
        Err(TagStormError::ReservedWord { .. })
    ));

    let collide = storm("a.b 1\nA_b 2\n");
    assert!(matches!(
        SqlEmitter::new(&collide, &config),
        Err(TagStormError::ColumnCollision { .. })
    ));

    let keyed = SqlConfig {
        key_fields: vec!["nope".to_string()],
        ..SqlConfig::default()
    };
    assert!(matches!(
        SqlEmitter::new(&storm("a 1\n"), &keyed),
        Err(TagStormError::UnknownKeyField(_))
    ));
}

#[test]
fn test_sql_quoting() {
    assert_eq!(sql_column_name("sample.id-2"), "sample_id_2");
    assert_eq!(sql_escape("it's"), "'it\\'s'");
    assert_eq!(sql_escape("a\\b\nc"), "'a\\\\b\\nc'");
}

// ── RQL statements and queries ──────────────────────────────────────

#[test]
fn test_rql_statement_parse() {
    let stmt = RqlStatement::parse("select sample,age from samples where age > 3 limit 2").unwrap();
    assert_eq!(stmt.command, RqlCommand::Select);
    assert_eq!(stmt.fields, vec!["sample", "age"]);
    assert_eq!(stmt.tables, vec!["samples"]);
    assert_eq!(stmt.where_vars, vec!["age"]);
    assert_eq!(stmt.limit, Some(2));

    let stmt: RqlStatement = "select sample.*, lab from a/b.tags".parse().unwrap();
    assert_eq!(stmt.fields, vec!["sample.*", "lab"]);
    assert_eq!(stmt.tables, vec!["a/b.tags"]);

    let count = RqlStatement::parse("SELECT COUNT(*) FROM t WHERE lab = 'wet'").unwrap();
    assert_eq!(count.command, RqlCommand::Count);
    assert!(count.fields.is_empty());
    assert_eq!(RqlStatement::parse("count from t").unwrap().command, RqlCommand::Count);
}

#[test]
fn test_rql_statement_errors() {
    for text in [
        "delete from t",
        "select a from",
        "select a from t where",
        "select a from t limit x",
        "select a from t garbage",
        "select a from t where b like 3",
        "",
    ] {
        assert!(
            matches!(RqlStatement::parse(text), Err(TagStormError::Rql { .. })),
            "{:?} should not parse",
            text
        );
    }

    match RqlStatement::parse("select a frm t") {
        Err(TagStormError::Rql { position, .. }) => {
            assert_eq!(position.line, 0);
            assert_eq!(position.column, 9);
        }
        other => panic!("expected RQL error, got {:?}", other),
    }
}

const QUERY_STORM: &str = "lab wet\n\n\tsample s1\n\tage 5\n\n\tsample s2\n\tage 12\n\n\
                           lab dry\n\n\tsample s3\n\tage 7\n";

fn selected_samples(output: &QueryOutput) -> Vec<&str> {
    match output {
        QueryOutput::Rows(rows) => rows
            .iter()
            .flat_map(|r| r.values.iter())
            .filter(|(f, _)| f == "sample")
            .map(|(_, v)| v.as_str())
            .collect(),
        QueryOutput::Count(_) => panic!("expected rows"),
    }
}

#[test]
fn test_query_leaves() {
    let s = storm(QUERY_STORM);
    let out = s.query_str("select sample from x where age > 6").unwrap();
    assert_eq!(selected_samples(&out), vec!["s2", "s3"]);

    let out = s.query_str("select sample from x limit 1").unwrap();
    assert_eq!(selected_samples(&out), vec!["s1"]);

    let out = s.query_str("select count(*) from x where lab = 'wet'").unwrap();
    assert_eq!(out, QueryOutput::Count(2));
}

#[test]
fn test_query_wildcard_fields() {
    let s = storm(QUERY_STORM);
    match s.query_str("select * from x where sample = 's1'").unwrap() {
        QueryOutput::Rows(rows) => {
            assert_eq!(rows.len(), 1);
            let values: Vec<(&str, &str)> = rows[0]
                .values
                .iter()
                .map(|(f, v)| (f.as_str(), v.as_str()))
                .collect();
            assert_eq!(values, vec![("lab", "wet"), ("sample", "s1"), ("age", "5")]);
        }
        QueryOutput::Count(_) => panic!("expected rows"),
    }

    assert_eq!(
        s.expand_fields(&["s*".to_string(), "lab".to_string(), "sample".to_string()])
            .unwrap(),
        vec!["sample", "lab"]
    );
    assert!(matches!(
        s.query_str("select nope from x"),
        Err(TagStormError::UnknownField { .. })
    ));
}

#[test]
fn test_query_output_write() {
    let s = storm(QUERY_STORM);
    let mut buf = Vec::new();
    s.query_str("select sample from x where age > 6")
        .unwrap()
        .write(&mut buf)
        .unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "sample s2\n\nsample s3\n\n");

    let mut buf = Vec::new();
    QueryOutput::Count(2).write(&mut buf).unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "2\n");
}

#[test]
fn test_rql_vars_used() {
    let expr = RqlExpr::parse("a = 1 and (b like 'x%' or a > c[0])").unwrap();
    assert_eq!(expr.vars_used(), vec!["a", "b", "c"]);
}

// ── Facets ──────────────────────────────────────────────────────────

const FACET_ROWS: [[&str; 2]; 3] = [["wet", "m"], ["wet", "f"], ["dry", "f"]];

#[test]
fn test_facet_counts_without_selection() {
    let mut facets = FacetSet::new(&["lab", "sex"]);
    for row in &FACET_ROWS {
        assert!(facets.count_row(row).unwrap());
    }
    for field in facets.fields() {
        assert!(field.all_selected());
        for val in field.vals() {
            assert_eq!(val.select_count, val.use_count, "{} {}", field.name(), val.val);
        }
    }
    let lab = facets.field("lab").unwrap();
    assert_eq!(lab.find_val("wet").unwrap().use_count, 2);
}

#[test]
fn test_facet_counts_with_selection() {
    let mut facets = FacetSet::new(&["lab", "sex"]);
    facets.select("lab", "wet").unwrap();
    let passing: Vec<bool> = FACET_ROWS
        .iter()
        .map(|row| facets.count_row(row).unwrap())
        .collect();
    assert_eq!(passing, vec![true, true, false]);

    let lab = facets.field("lab").unwrap();
    assert_eq!(lab.find_val("wet").unwrap().select_count, 2);
    // Selections in a field do not limit that field's own counts.
    assert_eq!(lab.find_val("dry").unwrap().select_count, 1);

    let sex = facets.field("sex").unwrap();
    let f = sex.find_val("f").unwrap();
    assert_eq!((f.use_count, f.select_count), (2, 1));
    let m = sex.find_val("m").unwrap();
    assert_eq!((m.use_count, m.select_count), (1, 1));

    let order: Vec<&str> = sex.sorted_vals().iter().map(|v| v.val.as_str()).collect();
    assert_eq!(order, vec!["f", "m"]);
}

#[test]
fn test_facet_count_table_and_storm() {
    let mut table = FieldedTable::new("t", &["lab", "sex", "id"]);
    for (ix, row) in FACET_ROWS.iter().enumerate() {
        table
            .add_row(&[row[0], row[1], ix.to_string().as_str()], ix + 2)
            .unwrap();
    }
    let mut facets = FacetSet::new(&["sex", "lab"]);
    facets.select("sex", "f").unwrap();
    assert_eq!(facets.count_table(&table).unwrap(), vec![1, 2]);

    let s = storm("lab wet\n\n\tsex m\n\n\tsex f\n\nlab dry\n\n\tsex f\n");
    let mut facets = FacetSet::new(&["lab", "sex"]);
    facets.select("lab", "dry").unwrap();
    let passing = facets.count_storm(&s).unwrap();
    assert_eq!(passing.len(), 1);
    assert_eq!(s.find_val(passing[0], "lab"), Some("dry"));

    let mut missing = FacetSet::new(&["nope"]);
    assert!(missing.count_table(&table).is_err());
}

#[test]
fn test_facet_row_width_and_unknown_field() {
    let mut facets = FacetSet::new(&["lab", "sex"]);
    assert!(matches!(facets.count_row(&["wet"]), Err(TagStormError::Facet(_))));
    assert!(matches!(facets.select("nope", "x"), Err(TagStormError::Facet(_))));
}

#[test]
fn test_facet_deselect_and_clear() {
    let mut facets = FacetSet::new(&["lab"]);
    facets.select("lab", "wet").unwrap();
    facets.select("lab", "dry").unwrap();
    facets.deselect("lab", "wet").unwrap();
    assert!(!facets.field("lab").unwrap().all_selected());
    facets.deselect("lab", "dry").unwrap();
    assert!(facets.field("lab").unwrap().all_selected());

    facets.select("lab", "wet").unwrap();
    facets.clear("lab").unwrap();
    assert!(facets.field("lab").unwrap().all_selected());
    assert_eq!(facets.selection_string(), "");
}

#[test]
fn test_facet_selection_string_round_trip() {
    let mut facets = FacetSet::new(&["lab", "sex", "site"]);
    facets.select("lab", "wet").unwrap();
    facets.select("lab", "dry,ish").unwrap();
    facets.select("sex", "x\ny").unwrap();
    let text = facets.selection_string();
    assert_eq!(text, "lab wet,\"dry,ish\"\nsex \"x\ny\"");

    let restored = FacetSet::with_selection(&["lab", "sex", "site"], &text).unwrap();
    for field in facets.fields() {
        let restored_field = restored.field(field.name()).unwrap();
        let expected: Vec<&str> = field.selected_vals().collect();
        let actual: Vec<&str> = restored_field.selected_vals().collect();
        assert_eq!(actual, expected, "field {}", field.name());
        assert_eq!(restored_field.all_selected(), field.all_selected());
    }

    assert!(FacetSet::with_selection(&["lab"], "nope x").is_err());
}

// ── CSV ─────────────────────────────────────────────────────────────

#[test]
fn test_csv_escape() {
    assert_eq!(csv_escape("plain"), "plain");
    assert_eq!(csv_escape(""), "\"\"");
    assert_eq!(csv_escape("a,b"), "\"a,b\"");
    assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    assert_eq!(csv_escape(" pad"), "\" pad\"");

    let mut buf = String::new();
    csv_escape_and_append(&mut buf, "a");
    csv_escape_and_append(&mut buf, "b,c");
    assert_eq!(buf, "a,\"b,c\"");
}

#[test]
fn test_csv_round_trip() {
    let lists: Vec<Vec<&str>> = vec![
        vec!["plain", "with,comma", "with \"quote\"", "", " padded "],
        vec![""],
        vec!["", ""],
        vec!["line\nbreak"],
        vec![],
    ];
    for list in lists {
        let joined = csv_join(&list);
        assert_eq!(csv_split(&joined).unwrap(), list, "joined as {:?}", joined);
    }
}

#[test]
fn test_csv_parse_next() {
    let mut cursor = CsvCursor::new("a, \"b,c\" , d");
    assert_eq!(csv_parse_next(&mut cursor).unwrap(), Some("a".to_string()));
    assert_eq!(csv_parse_next(&mut cursor).unwrap(), Some("b,c".to_string()));
    assert_eq!(csv_parse_next(&mut cursor).unwrap(), Some("d".to_string()));
    assert_eq!(csv_parse_next(&mut cursor).unwrap(), None);

    assert!(matches!(csv_split("\"open"), Err(TagStormError::Csv(_))));
    assert!(matches!(csv_split("\"a\"b"), Err(TagStormError::Csv(_))));
}

// ── Wildcards ───────────────────────────────────────────────────────

#[test]
fn test_wildcards() {
    let wild = |pattern: &str, s: &str| Wildcard::new(pattern).unwrap().matches(s);
    assert!(wild("s*1", "sample1"));
    assert!(wild("s?", "s2"));
    assert!(!wild("s?", "s22"));
    assert!(!wild("a.b*", "axb"));
    assert!(wild("exact", "exact"));
    assert!(!wild("exact", "exactly"));

    let like = Wildcard::like("a%_z").unwrap();
    assert!(like.matches("abcz"));
    assert!(!like.matches("az"));
    assert!(Wildcard::new("*").unwrap().matches(""));
    assert_eq!(like, Wildcard::like("a%_z").unwrap());
}

#[test]
fn test_wildcard_too_large_is_an_error() {
    let pattern = "_".repeat(300_000);
    assert!(matches!(
        Wildcard::like(&pattern),
        Err(TagStormError::Wildcard { .. })
    ));
}

#[test]
fn test_query_like_pattern_from_field_too_large() {
    let text = format!("a x\nb {}\n", "_".repeat(300_000));
    let s = storm(&text);
    assert!(matches!(
        s.query_str("select a from t where a like b"),
        Err(TagStormError::Wildcard { .. })
    ));
}

#[test]
fn test_rql_like_literal_too_large_fails_at_parse() {
    let text = format!("a like '{}'", "_".repeat(300_000));
    assert!(matches!(
        RqlExpr::parse(&text),
        Err(TagStormError::Rql { .. })
    ));
}

#[test]
fn test_rql_like_pattern_from_field() {
    let expr = RqlExpr::parse("name like pattern").unwrap();
    let record = [("name", "sample12"), ("pattern", "sample%")];
    let lookup = |field: &str| record.iter().find(|(k, _)| *k == field).map(|(_, v)| *v);
    assert!(expr.matches(&lookup).unwrap());
}

// ── Fielded tables ──────────────────────────────────────────────────

#[test]
fn test_fielded_table_tsv() {
    let text = "#name\tage\nbob\t5\nann\t7\n";
    let table = FieldedTable::from_tsv_str("people", text, &["age"]).unwrap();
    assert!(table.starts_sharp());
    assert_eq!(table.fields(), ["name", "age"]);
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.rows()[1].row, vec!["ann", "7"]);
    assert_eq!(table.rows()[1].line, 3);
    assert_eq!(table.find_field_ix("age"), Some(1));

    let mut buf = Vec::new();
    table.write_tsv(&mut buf).unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), text);
}

#[test]
fn test_fielded_table_errors() {
    assert!(matches!(
        FieldedTable::from_tsv_str("t", "#a\tb\n1\t2\n", &["c"]),
        Err(TagStormError::Table { .. })
    ));
    match FieldedTable::from_tsv_str("t", "a\tb\n1\t2\n3\n", &[]) {
        Err(TagStormError::Table { line, .. }) => assert_eq!(line, 3),
        other => panic!("expected table error, got {:?}", other),
    }
    assert!(FieldedTable::from_tsv_str("t", "", &[]).is_err());

    let table = FieldedTable::new("t", &["a"]);
    assert!(table.must_find_field_ix("b").is_err());
}

#[test]
fn test_storm_to_fielded_table() {
    let s = storm("lab wet\n\n\tsample s1\n\tage 5\n\n\tsample s2\n");
    let table = s.to_fielded_table(true);
    assert_eq!(table.fields(), ["lab", "sample", "age"]);
    let rows: Vec<&Vec<String>> = table.rows().iter().map(|r| &r.row).collect();
    assert_eq!(rows, vec![&vec!["wet", "s1", "5"], &vec!["wet", "s2", ""]]);
    assert_eq!(s.to_fielded_table(false).row_count(), 3);
}

fn lab_table() -> FieldedTable {
    FieldedTable::from_tsv_str(
        "labs",
        "#lab\tsample\tage\nwet\ts1\t5\nwet\ts2\t5\ndry\ts3\tn/a\n",
        &[],
    )
    .unwrap()
}

fn lab_options(div_fields: &[&str]) -> FromTableOptions {
    FromTableOptions {
        div_fields: div_fields.iter().map(|f| f.to_string()).collect(),
        no_hoist: true,
        keep_order: true,
        ..FromTableOptions::default()
    }
}

fn lab_storm_unhoisted() -> serde_json::Value {
    serde_json::json!([
        {
            "tags": [["lab", "wet"], ["age", "5"]],
            "children": [
                { "tags": [["sample", "s1"]] },
                { "tags": [["sample", "s2"]] }
            ]
        },
        {
            "tags": [["lab", "dry"]],
            "children": [{ "tags": [["sample", "s3"]] }]
        }
    ])
}

#[test]
fn test_fielded_table_to_storm() {
    let options = lab_options(&["lab", "sample"]);
    let s = TagStorm::from_fielded_table(&lab_table(), &options).unwrap();
    assert_eq!(storm_to_json(&s), lab_storm_unhoisted());
}

#[test]
fn test_fielded_table_last_div_is_not_divided() {
    let s = TagStorm::from_fielded_table(&lab_table(), &lab_options(&["lab"])).unwrap();
    assert_eq!(s.roots().count(), 3);
    assert_eq!(s.max_depth(), 1);
}

#[test]
fn test_fielded_table_to_storm_hoisted() {
    let options = FromTableOptions {
        no_hoist: false,
        ..lab_options(&["lab", "sample"])
    };
    let s = TagStorm::from_fielded_table(&lab_table(), &options).unwrap();
    assert_eq!(
        storm_to_json(&s),
        serde_json::json!([
            {
                "tags": [["lab", "wet"], ["age", "5"]],
                "children": [
                    { "tags": [["sample", "s1"]] },
                    { "tags": [["sample", "s2"]] }
                ]
            },
            { "tags": [["lab", "dry"], ["sample", "s3"]] }
        ])
    );
    let unknown = lab_options(&["nope"]);
    assert!(TagStorm::from_fielded_table(&lab_table(), &unknown).is_err());
}

#[test]
fn test_fielded_table_parting_fields() {
    assert_eq!(lab_table().parting_fields(), vec!["lab", "sample"]);

    // run and cell move together; the pair is named by its first field.
    let table = FieldedTable::from_tsv_str(
        "runs",
        "#run\tcell\tread\n1\tA\tr1\n1\tA\tr2\n2\tB\tr3\n2\tB\tr4\n",
        &[],
    )
    .unwrap();
    assert_eq!(table.parting_fields(), vec!["run", "read"]);
}

#[test]
fn test_fielded_table_to_storm_chosen_divs() {
    let s = TagStorm::from_fielded_table(&lab_table(), &FromTableOptions::default()).unwrap();
    assert_eq!(
        storm_to_json(&s),
        serde_json::json!([
            {
                "tags": [["age", "5"], ["lab", "wet"]],
                "children": [
                    { "tags": [["sample", "s1"]] },
                    { "tags": [["sample", "s2"]] }
                ]
            },
            { "tags": [["lab", "dry"], ["sample", "s3"]] }
        ])
    );
}

#[test]
fn test_fielded_table_to_storm_local() {
    let options = FromTableOptions {
        local: true,
        ..lab_options(&[])
    };
    let s = TagStorm::from_fielded_table(&lab_table(), &options).unwrap();
    assert_eq!(storm_to_json(&s), lab_storm_unhoisted());
}

#[test]
fn test_fielded_table_tsv_is_unquoted() {
    let text = "#name\tnote\nbob\tsay \"hi\n\nann\ta,b\n";
    let table = FieldedTable::from_tsv_str("notes", text, &[]).unwrap();
    assert_eq!(table.rows()[0].row, vec!["bob", "say \"hi"]);
    assert_eq!(table.rows()[1].row, vec!["ann", "a,b"]);
    assert_eq!(table.rows()[1].line, 4);

    let mut buf = Vec::new();
    table.write_tsv(&mut buf).unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "#name\tnote\nbob\tsay \"hi\nann\ta,b\n"
    );

    let crlf = FieldedTable::from_tsv_str("crlf", "a\tb\r\n1\t2\r\n", &[]).unwrap();
    assert!(!crlf.starts_sharp());
    assert_eq!(crlf.fields(), ["a", "b"]);
    assert_eq!(crlf.rows()[0].row, vec!["1", "2"]);
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_config_defaults() {
    let config = TagStormConfig::default();
    assert_eq!(config.parse.max_depth, 32);
    assert_eq!(config.parse.tab_stop, 8);
    assert_eq!(config.validate.max_errors, 10);
    assert_eq!(config.sql.table, "tagStorm");
    assert_eq!(config.sql.index_prefix, 16);
    assert_eq!(config.sql.max_varchar, 255);
    assert_eq!(config.sql.row_width_limit, 65535);
    assert_eq!(TagStormConfig::from_toml_str("").unwrap(), config);
}

#[test]
fn test_config_partial_toml() {
    let config = TagStormConfig::from_toml_str("[sql]\ntable = \"samples\"\nkey_fields = [\"id\"]\n").unwrap();
    assert_eq!(config.sql.table, "samples");
    assert_eq!(config.sql.key_fields, vec!["id"]);
    assert_eq!(config.sql.index_prefix, 16);
    assert_eq!(config.parse, ParseConfig::default());

    assert!(matches!(
        TagStormConfig::from_toml_str("[parse]\nmax_depth = \"deep\"\n"),
        Err(TagStormError::Config(_))
    ));
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tagstorm.toml");
    let config = TagStormConfig::builder()
        .max_depth(8)
        .max_errors(3)
        .table("t")
        .key_field("id")
        .index_prefix(8)
        .max_varchar(100)
        .row_width_limit(8000)
        .build();
    config.save(&path).unwrap();
    assert_eq!(TagStormConfig::from_file(&path).unwrap(), config);
}

// ── Properties ──────────────────────────────────────────────────────

fn arb_csv_items() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(any::<String>(), 0..8)
}

fn arb_tag() -> impl Strategy<Value = (String, String)> {
    (
        "[a-z][a-z0-9_.]{0,7}",
        prop_oneof![
            Just(String::new()),
            "[a-zA-Z0-9.,]([a-zA-Z0-9 .,]{0,10}[a-zA-Z0-9.,])?",
        ],
    )
}

/// Stanzas as (parent pick, tags). A pick of 0 makes a root, any other
/// pick names an earlier stanza.
fn arb_stanzas() -> impl Strategy<Value = Vec<(usize, Vec<(String, String)>)>> {
    prop::collection::vec((0usize..16, prop::collection::vec(arb_tag(), 1..4)), 1..12)
}

fn build_storm(stanzas: &[(usize, Vec<(String, String)>)]) -> TagStorm {
    let mut s = TagStorm::new("built.tags");
    let mut ids: Vec<StanzaId> = Vec::new();
    for (pick, tags) in stanzas {
        let parent = match pick % (ids.len() + 1) {
            0 => None,
            n => Some(ids[n - 1]),
        };
        let id = s.new_stanza_at_end(parent);
        for (name, val) in tags {
            s.append_tag(id, name, val);
        }
        ids.push(id);
    }
    s
}

proptest! {
    #[test]
    fn test_csv_list_round_trip(items in arb_csv_items()) {
        let mut buf = String::new();
        for item in &items {
            csv_escape_and_append(&mut buf, item);
        }
        let mut cursor = CsvCursor::new(&buf);
        let mut parsed = Vec::new();
        while let Some(item) = csv_parse_next(&mut cursor).unwrap() {
            parsed.push(item);
        }
        prop_assert_eq!(&parsed, &items);
        prop_assert_eq!(csv_split(&csv_join(&items)).unwrap(), items);
    }

    #[test]
    fn test_written_storm_parses_to_same_tree(stanzas in arb_stanzas()) {
        let built = build_storm(&stanzas);
        let text = built.to_text();
        let parsed = crate::parse_tag_storm(&text, "built.tags").unwrap();
        prop_assert_eq!(storm_to_json(&parsed), storm_to_json(&built));
        prop_assert_eq!(parsed.to_text(), text);
    }
}
