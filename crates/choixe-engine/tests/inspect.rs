//! Static inspection tests over complete configurations.

use std::fs;

use choixe_ast::Node;
use choixe_ast::Value;
use choixe_ast::compile;
use choixe_engine::FsLoader;
use choixe_engine::Inspector;
use pretty_assertions::assert_eq;

/// Parses a YAML document into a raw tree.
fn tree(yaml: &str) -> Value {
    serde_yaml_ng::from_str(yaml).expect("the test document should parse")
}

/// Compiles a YAML document.
fn ast(yaml: &str) -> Node {
    compile(&tree(yaml)).expect("the test document should compile")
}

#[test]
fn test_plain_trees_are_not_processed() {
    let report = Inspector::new().inspect(&ast("{a: 1, b: [x, y]}"));

    assert!(!report.processed);
    assert_eq!(report.variables, tree("{}"));
    assert_eq!(report.environ, tree("{}"));
    assert!(report.imports.is_empty());
    assert!(report.symbols.is_empty());
}

#[test]
fn test_variables_form_a_tree_with_known_defaults() {
    let node = ast(
        r#"
        alpha: $var(a.b)
        beta: $var(a.c, default=5)
        gamma: name_$var(a.b)_suffix
        host: $var(HOST, default="localhost", env=true)
        "#,
    );

    let report = Inspector::new().inspect(&node);
    assert!(report.processed);
    assert_eq!(report.variables, tree("{a: {b: null, c: 5}}"));
    assert_eq!(report.environ, tree("{HOST: localhost}"));
}

#[test]
fn test_every_sweep_branch_is_walked() {
    let node = ast(
        r#"
        choice:
          $directive: sweep
          $args:
            - $var(first)
            - $var(second)
        "#,
    );

    let report = Inspector::new().inspect(&node);
    assert_eq!(report.variables, tree("{first: null, second: null}"));
}

#[test]
fn test_loop_iterables_appear_as_sequences() {
    let node = ast(
        r#"
        "$for(p.cs, x)":
          c_$index(x): $item(x.n)
        "#,
    );

    let report = Inspector::new().inspect(&node);
    assert!(report.processed);
    assert_eq!(report.variables, tree("{p: {cs: []}}"));
}

#[test]
fn test_literal_symbols_are_recorded_without_invocation() {
    let node = ast(
        r#"
        a:
          $call: math:scale
          $args:
            value: $var(v)
        b:
          $model: models.linear
        c:
          $call: $var(which)
        "#,
    );

    // No resolver is configured: inspection must not try to invoke anything.
    let report = Inspector::new().inspect(&node);
    let symbols: Vec<_> = report.symbols.iter().cloned().collect();
    assert_eq!(symbols, ["math:scale", "models.linear"]);
    assert_eq!(report.variables, tree("{v: null, which: null}"));
}

#[test]
fn test_static_imports_are_resolved_and_recursed_into() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("base.yml"),
        "lr: $var(params.lr)\nmore: $import(\"leaf.yml\")\n",
    )
    .unwrap();
    fs::write(dir.path().join("leaf.yml"), "flag: $var(deep.flag)\n").unwrap();

    let loader = FsLoader;
    let node = ast(r#"training: $import("base.yml")"#);
    let report = Inspector::new()
        .with_loader(&loader)
        .with_base_dir(dir.path())
        .inspect(&node);

    let imports: Vec<_> = report.imports.iter().cloned().collect();
    assert_eq!(imports.len(), 2);
    assert!(imports.iter().any(|p| p.ends_with("base.yml")));
    assert!(imports.iter().any(|p| p.ends_with("leaf.yml")));
    assert_eq!(
        report.variables,
        tree("{params: {lr: null}, deep: {flag: null}}")
    );
    assert!(!report.dynamic_imports);
}

#[test]
fn test_cyclic_imports_terminate() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.yml"), "x: $import(\"b.yml\")\n").unwrap();
    fs::write(dir.path().join("b.yml"), "y: $import(\"a.yml\")\n").unwrap();

    let loader = FsLoader;
    let node = ast(r#"$import("a.yml")"#);
    let report = Inspector::new()
        .with_loader(&loader)
        .with_base_dir(dir.path())
        .inspect(&node);

    assert_eq!(report.imports.len(), 2);
}

#[test]
fn test_dynamic_imports_are_flagged() {
    let node = ast(r#"cfg: $import("$var(stage).yml")"#);

    let report = Inspector::new().inspect(&node);
    assert!(report.dynamic_imports);
    assert!(report.imports.is_empty());
    assert_eq!(report.variables, tree("{stage: null}"));
}

#[test]
fn test_missing_import_files_do_not_fail_inspection() {
    let dir = tempfile::tempdir().unwrap();

    let loader = FsLoader;
    let node = ast(r#"cfg: $import("nowhere.yml")"#);
    let report = Inspector::new()
        .with_loader(&loader)
        .with_base_dir(dir.path())
        .inspect(&node);

    // The path is known statically even though it cannot be loaded.
    assert_eq!(report.imports.len(), 1);
}
