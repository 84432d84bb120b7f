//! Implementation of the `inspect` subcommand.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use choixe_ast::Value;
use choixe_ast::compile;
use choixe_engine::DocumentLoader;
use choixe_engine::FsLoader;
use choixe_engine::Inspector;
use clap::Parser;
use indexmap::IndexMap;

/// Arguments for the `inspect` subcommand.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// The path to the configuration template (YAML, or JSON with a `.json`
    /// extension).
    #[clap(value_name = "CONFIG")]
    pub config: PathBuf,
}

/// Reports what a configuration template requires to resolve.
pub fn inspect(args: InspectArgs) -> Result<()> {
    let loader = FsLoader;
    let tree = loader
        .load(&args.config)
        .context("failed to load the configuration")?;
    let node = compile(&tree).context("failed to compile the configuration")?;

    let base_dir = std::path::absolute(&args.config)
        .context("failed to locate the configuration")?
        .parent()
        .map(PathBuf::from);
    let mut inspector = Inspector::new().with_loader(&loader);
    if let Some(base_dir) = base_dir {
        inspector = inspector.with_base_dir(base_dir);
    }
    let report = inspector.inspect(&node);

    let mut document = IndexMap::new();
    document.insert("processed".to_string(), Value::Bool(report.processed));
    document.insert("variables".to_string(), report.variables);
    document.insert("environ".to_string(), report.environ);
    document.insert(
        "imports".to_string(),
        Value::Sequence(
            report
                .imports
                .iter()
                .map(|path| Value::String(path.display().to_string()))
                .collect(),
        ),
    );
    if report.dynamic_imports {
        document.insert("dynamic_imports".to_string(), Value::Bool(true));
    }
    document.insert(
        "symbols".to_string(),
        Value::Sequence(
            report
                .symbols
                .iter()
                .map(|symbol| Value::String(symbol.clone()))
                .collect(),
        ),
    );

    print!("{}", serde_yaml_ng::to_string(&Value::Map(document))?);
    Ok(())
}
