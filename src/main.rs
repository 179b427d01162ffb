//! `tagstorm`: command-line access to tag storm files.
//!
//! ```bash
//! tagstorm info samples.tags
//! tagstorm validate samples.schema samples.tags
//! tagstorm query samples.tags "select sample.* from samples where lab like 'w%'"
//! tagstorm sql --key accession samples.tags > samples.sql
//! ```

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tagstorm_rust::{
    infer_types, validate_storm, FacetSet, FieldedTable, FlatOptions, FromTableOptions, Schema,
    SqlEmitter, TableStyle, TagStorm, TagStormConfig,
};

/// Inspect, validate, query and convert tag storm files
#[derive(Parser, Debug)]
#[command(name = "tagstorm", version, about)]
struct Args {
    /// Configuration file path
    #[arg(long, value_name = "FILE", global = true, env = "TAGSTORM_CONFIG")]
    config: Option<PathBuf>,

    /// More log output; repeat for more
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print stanza, tag and field statistics
    Info {
        file: PathBuf,
    },
    /// Check a tag storm against a schema file
    Validate {
        schema: PathBuf,
        file: PathBuf,
        /// Stop after this many errors
        #[arg(long)]
        max_errors: Option<usize>,
    },
    /// Emit CREATE TABLE and INSERT statements
    Sql {
        file: PathBuf,
        /// Table name
        #[arg(long)]
        table: Option<String>,
        /// Field to index; may be repeated
        #[arg(long = "key")]
        keys: Vec<String>,
        /// Only write the CREATE TABLE statement
        #[arg(long)]
        create_only: bool,
    },
    /// Run an RQL statement over the leaves
    Query {
        file: PathBuf,
        rql: String,
    },
    /// Write every stanza with its inherited tags
    Flatten {
        file: PathBuf,
        #[arg(long, value_enum, default_value = "ra")]
        format: FlatFormat,
        /// Tag identifying each record; stanzas without it are skipped
        #[arg(long)]
        id: Option<String>,
        /// Add a parent column holding the parent's id
        #[arg(long)]
        with_parent: bool,
        /// Only write leaf stanzas
        #[arg(long)]
        leaves_only: bool,
        /// Value written for missing fields in tables
        #[arg(long, default_value = "")]
        null: String,
    },
    /// Convert a tab-separated table into a tag storm
    FromTab {
        table: PathBuf,
        /// Field to divide rows into stanzas by, highest level first; the
        /// last one marks the leaves. Chosen from the data when absent
        #[arg(long = "div")]
        div_fields: Vec<String>,
        /// Choose the dividing field afresh at every level
        #[arg(long, conflicts_with = "div_fields")]
        local: bool,
        /// Leave shared values in the leaves
        #[arg(long)]
        no_hoist: bool,
        /// Keep the table's field order instead of sorting tags by name
        #[arg(long)]
        keep_order: bool,
    },
    /// Infer a draft schema from the values in a tag storm
    Schema {
        file: PathBuf,
    },
    /// Count facet values over the leaves
    Facet {
        file: PathBuf,
        /// Facet field; may be repeated
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
        /// Selection as field=value; may be repeated
        #[arg(long = "select")]
        selections: Vec<String>,
    },
    /// Apply edits and write the storm back out
    Rewrite {
        file: PathBuf,
        /// Tag to remove; may be repeated
        #[arg(long = "weed")]
        weeds: Vec<String>,
        /// Rename as old=new; may be repeated
        #[arg(long = "sub")]
        subs: Vec<String>,
        /// Move values shared by all children up to the parent
        #[arg(long)]
        hoist: bool,
        /// Merge repeated tags into CSV lists
        #[arg(long, conflicts_with = "index_repeats")]
        collapse_repeats: bool,
        /// Rename repeated tags to name[1], name[2]...
        #[arg(long)]
        index_repeats: bool,
        /// Sort tags alphabetically
        #[arg(long)]
        sort: bool,
        /// Output file instead of stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FlatFormat {
    /// Blank-line separated records
    Ra,
    /// Tab-separated table
    Tab,
    /// Comma-separated table
    Csv,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => TagStormConfig::from_file(path)?,
        None => TagStormConfig::default(),
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    match args.command {
        Command::Info { file } => {
            let storm = read_storm(&file, &config)?;
            writeln!(out, "stanzas\t{}", storm.count_stanzas())?;
            writeln!(out, "tags\t{}", storm.count_tags())?;
            writeln!(out, "fields\t{}", storm.count_fields())?;
            writeln!(out, "depth\t{}", storm.max_depth())?;
            writeln!(out, "leaves\t{}", storm.leaves().count())?;
            let counts = storm.field_counts();
            for field in storm.field_list() {
                writeln!(out, "{}\t{}", field, counts.get(&field).copied().unwrap_or(0))?;
            }
        }
        Command::Validate {
            schema,
            file,
            max_errors,
        } => {
            let schema = Schema::from_file(&schema)?;
            let storm = read_storm(&file, &config)?;
            let mut validate_config = config.validate.clone();
            if let Some(max) = max_errors {
                validate_config.max_errors = max;
            }
            let report = validate_storm(&schema, &storm, &validate_config);
            for error in &report.errors {
                eprintln!("{}: {}", storm.file_name(), error);
            }
            if report.hit_limit {
                eprintln!("stopped after {} errors", report.errors.len());
            }
            if !report.is_valid() {
                return Ok(ExitCode::FAILURE);
            }
            info!(file = storm.file_name(), "valid");
        }
        Command::Sql {
            file,
            table,
            keys,
            create_only,
        } => {
            let storm = read_storm(&file, &config)?;
            let mut sql_config = config.sql.clone();
            if let Some(table) = table {
                sql_config.table = table;
            }
            sql_config.key_fields.extend(keys);
            let emitter = SqlEmitter::new(&storm, &sql_config)?;
            if create_only {
                emitter.write_create(&mut out)?;
            } else {
                emitter.write_all(&mut out)?;
            }
        }
        Command::Query { file, rql } => {
            let storm = read_storm(&file, &config)?;
            storm.query_str(&rql)?.write(&mut out)?;
        }
        Command::Flatten {
            file,
            format,
            id,
            with_parent,
            leaves_only,
            null,
        } => {
            let storm = read_storm(&file, &config)?;
            if with_parent && id.is_none() {
                bail!("--with-parent needs --id");
            }
            let options = FlatOptions {
                id_tag: id,
                with_parent,
                leaves_only,
                null_val: null,
                ..FlatOptions::default()
            };
            match format {
                FlatFormat::Ra => storm.write_flat_ra(&mut out, &options)?,
                FlatFormat::Tab => storm.write_flat_table(&mut out, &options, TableStyle::Tab)?,
                FlatFormat::Csv => storm.write_flat_table(&mut out, &options, TableStyle::Csv)?,
            }
        }
        Command::FromTab {
            table,
            div_fields,
            local,
            no_hoist,
            keep_order,
        } => {
            let required: Vec<&str> = div_fields.iter().map(String::as_str).collect();
            let table = FieldedTable::from_tsv_file(&table, &required)?;
            let options = FromTableOptions {
                div_fields,
                local,
                no_hoist,
                keep_order,
            };
            let storm = TagStorm::from_fielded_table(&table, &options)?;
            storm.write_tags(&mut out, None)?;
        }
        Command::Schema { file } => {
            let storm = read_storm(&file, &config)?;
            for info in infer_types(&storm) {
                writeln!(out, "{}", info.schema_line())?;
            }
        }
        Command::Facet {
            file,
            fields,
            selections,
        } => {
            let storm = read_storm(&file, &config)?;
            let mut facets = FacetSet::new(fields.as_slice());
            for selection in &selections {
                let (field, val) = split_assignment(selection, "--select")?;
                facets.select(field, val)?;
            }
            let passing = facets.count_storm(&storm)?;
            writeln!(out, "passing\t{}", passing.len())?;
            for field in facets.fields() {
                writeln!(out, "{}", field.name())?;
                for val in field.sorted_vals() {
                    let mark = if val.selected { "*" } else { "" };
                    writeln!(out, "\t{}{}\t{}\t{}", mark, val.val, val.select_count, val.use_count)?;
                }
            }
        }
        Command::Rewrite {
            file,
            weeds,
            subs,
            hoist,
            collapse_repeats,
            index_repeats,
            sort,
            output,
        } => {
            let mut storm = read_storm(&file, &config)?;
            let weeds: Vec<&str> = weeds.iter().map(String::as_str).collect();
            storm.weed(&weeds);
            let subs = subs
                .iter()
                .map(|s| split_assignment(s, "--sub"))
                .collect::<Result<Vec<_>>>()?;
            storm.substitute(&subs);
            if collapse_repeats {
                storm.collapse_repeated_tags();
            }
            if index_repeats {
                storm.index_repeated_tags();
            }
            if hoist {
                storm.hoist(None);
            }
            if sort {
                storm.alpha_sort();
            }
            match output {
                Some(path) => {
                    let f = std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    let mut w = BufWriter::new(f);
                    storm.write_tags(&mut w, None)?;
                    w.flush()?;
                }
                None => storm.write_tags(&mut out, None)?,
            }
        }
    }
    out.flush()?;
    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("tagstorm={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn read_storm(path: &Path, config: &TagStormConfig) -> Result<TagStorm> {
    let storm = TagStorm::from_file_with(path, &config.parse)?;
    info!(
        file = storm.file_name(),
        stanzas = storm.count_stanzas(),
        "read tag storm"
    );
    Ok(storm)
}

fn split_assignment<'a>(arg: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
    match arg.split_once('=') {
        Some((name, val)) if !name.is_empty() => Ok((name, val)),
        _ => bail!("{flag} expects name=value, got '{arg}'"),
    }
}
