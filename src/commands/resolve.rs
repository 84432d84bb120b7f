//! Implementation of the `resolve` subcommand.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use choixe_ast::Value;
use choixe_ast::compile;
use choixe_engine::DocumentLoader;
use choixe_engine::FsLoader;
use choixe_engine::Processor;
use clap::Parser;
use indexmap::IndexMap;

/// The markup formats a resolved document can be printed in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// YAML output; branches print as a multi-document stream.
    #[default]
    Yaml,
    /// JSON output; branches print one document per line.
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yaml => write!(f, "yaml"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Arguments for the `resolve` subcommand.
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// The path to the configuration template (YAML, or JSON with a `.json`
    /// extension).
    #[clap(value_name = "CONFIG")]
    pub config: PathBuf,

    /// A context entry as `KEY=VALUE`; the value parses as a YAML scalar
    /// and dotted keys nest.
    ///
    /// Repeat the flag for multiple entries.
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,

    /// The path to a YAML or JSON document used as the base context.
    ///
    /// `--context` entries are applied on top of it.
    #[arg(long, value_name = "PATH")]
    pub context_file: Option<PathBuf>,

    /// Print every branch of the cartesian product instead of the first.
    #[arg(long)]
    pub all: bool,

    /// The output format.
    #[arg(short, long, value_enum, default_value_t)]
    pub output: OutputFormat,
}

/// Inserts a dotted key into the context, creating intermediate maps.
fn insert(context: &mut Value, key: &str, value: Value) -> Result<()> {
    let mut current = context;
    let mut parts = key.split('.').peekable();
    while let Some(part) = parts.next() {
        let Value::Map(map) = current else {
            bail!("context key `{key}` collides with a non-map entry");
        };

        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return Ok(());
        }

        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Map(IndexMap::new()));
    }

    Ok(())
}

/// Builds the runtime context from the command line flags.
fn build_context(args: &ResolveArgs) -> Result<Value> {
    let mut context = match &args.context_file {
        Some(path) => FsLoader
            .load(path)
            .context("failed to load the context file")?,
        None => Value::Map(IndexMap::new()),
    };

    for entry in &args.context {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("context entry `{entry}` is not of the form `KEY=VALUE`");
        };
        let value = serde_yaml_ng::from_str(value)
            .with_context(|| format!("failed to parse the value of context entry `{key}`"))?;
        insert(&mut context, key, value)?;
    }

    Ok(context)
}

/// Prints one resolved document.
fn print_document(value: &Value, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml_ng::to_string(value)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }

    Ok(())
}

/// Resolves a configuration template and prints the result.
pub fn resolve(args: ResolveArgs) -> Result<()> {
    let loader = FsLoader;
    let tree = loader
        .load(&args.config)
        .context("failed to load the configuration")?;
    let node = compile(&tree).context("failed to compile the configuration")?;

    let context = build_context(&args)?;
    let base_dir = std::path::absolute(&args.config)
        .context("failed to locate the configuration")?
        .parent()
        .map(PathBuf::from);

    let mut processor = Processor::new(&context).with_loader(&loader);
    if let Some(base_dir) = base_dir {
        processor = processor.with_base_dir(base_dir);
    }

    if args.all {
        let outputs = processor.process_all(&node)?;
        tracing::info!(branches = outputs.len(), "configuration resolved");
        for (i, output) in outputs.iter().enumerate() {
            if i > 0 && args.output == OutputFormat::Yaml {
                println!("---");
            }
            print_document(output, args.output)?;
        }
    } else {
        print_document(&processor.process(&node)?, args.output)?;
    }

    Ok(())
}
