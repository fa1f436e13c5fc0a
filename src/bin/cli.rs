use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use bagz_index::build::generate_index;
use bagz_index::config::merge_indices;
use bagz_index::dump;
use bagz_index::schema::{JsonRecordType, SchemaNode};

#[derive(Parser, Debug)]
pub struct Cli {
    #[clap(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Merge one or more index files sharing an identical config.
    Merge(MergeArgs),
    /// Build an index over a bag file of records.
    Generate(GenerateArgs),
    /// Print a structured dump of an index.
    Dump(DumpArgs),
}

#[derive(Parser, Debug)]
pub struct MergeArgs {
    #[clap(required = true)]
    pub inputs: Vec<PathBuf>,
    #[clap(short = 'o', long)]
    pub output: PathBuf,
}

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    #[clap(long)]
    pub input: PathBuf,
    #[clap(long)]
    pub output: PathBuf,
    /// JSON description of the input records' `SchemaNode`.
    #[clap(long)]
    pub schema_file: PathBuf,
    #[clap(long = "key-field")]
    pub key_field: Vec<String>,
    #[clap(long = "exclude-field")]
    pub exclude_field: Vec<String>,
    /// Build a trigram text index instead of a hashbucket key index.
    #[clap(long)]
    pub trigram: bool,
}

#[derive(Parser, Debug)]
pub struct DumpArgs {
    pub index: PathBuf,
}

fn main() -> Result<()> {
    bagz_index::logging::init_once();
    let args = Cli::try_parse()?;
    match args.cmd {
        Command::Merge(a) => merge(a),
        Command::Generate(a) => generate(a),
        Command::Dump(a) => dump_cmd(a),
    }
}

fn merge(args: MergeArgs) -> Result<()> {
    merge_indices(&args.inputs, &args.output)
}

fn generate(args: GenerateArgs) -> Result<()> {
    let schema_json = std::fs::read_to_string(&args.schema_file)
        .with_context(|| format!("reading schema file {:?}", args.schema_file))?;
    let schema: SchemaNode = serde_json::from_str(&schema_json).context("parsing schema JSON")?;
    let record_type = JsonRecordType::new(schema);
    generate_index(
        &args.input,
        &args.output,
        &record_type,
        &args.key_field,
        &args.exclude_field,
        args.trigram,
    )
}

fn dump_cmd(args: DumpArgs) -> Result<()> {
    let entries = dump::dump(&args.index)?;
    print!("{}", dump::render(&entries));
    Ok(())
}
