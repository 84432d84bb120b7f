//! End-to-end evaluation tests over complete configurations.

use std::fs;

use choixe_ast::Node;
use choixe_ast::Value;
use choixe_ast::compile;
use choixe_engine::ErrorKind;
use choixe_engine::FsLoader;
use choixe_engine::Processor;
use choixe_engine::SymbolRegistry;
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
fn test_plain_trees_resolve_to_themselves() {
    let source = tree(
        r#"
        name: run
        params:
          epochs: 10
          rates: [0.1, 0.01, null]
          deep:
            flag: true
        "#,
    );

    let node = compile(&source).unwrap();
    let output = Processor::new(&Value::Null).process(&node).unwrap();
    assert_eq!(output, source);
}

#[test]
fn test_variable_lookup_retains_types() {
    let context = tree(
        r#"
        i: 5
        f: 2.5
        b: true
        s: text
        nested:
          list: [1, 2]
        "#,
    );
    let node = ast(
        r#"
        a: $var(i)
        b: $var(f)
        c: $var(b)
        d: $var(s)
        e: $var(nested.list)
        "#,
    );

    let output = Processor::new(&context).process(&node).unwrap();
    assert_eq!(
        output,
        tree("{a: 5, b: 2.5, c: true, d: text, e: [1, 2]}")
    );
}

#[test]
fn test_bundle_with_default() {
    let context = tree("{a: {b: X}}");
    let node = ast(r#"s: $var(a.b) is $var(a.c, default="?")"#);

    let output = Processor::new(&context).process(&node).unwrap();
    assert_eq!(output, tree("{s: X is ?}"));
}

#[test]
fn test_bundle_coerces_primitives() {
    let context = tree("{i: 3, f: 0.5, b: false, n: null}");
    let node = ast("s: $var(i)/$var(f)/$var(b)/$var(n)");

    let output = Processor::new(&context).process(&node).unwrap();
    assert_eq!(output, tree("{s: 3/0.5/false/null}"));
}

#[test]
fn test_bundle_rejects_composite_values() {
    let context = tree("{xs: [1]}");
    let node = ast("s: value is $var(xs)");

    let error = Processor::new(&context).process(&node).unwrap_err();
    assert!(matches!(error.kind, ErrorKind::TypeMismatch { .. }));
}

#[test]
fn test_unresolved_variable_reports_its_location() {
    let node = ast("{a: {b: $var(missing.thing)}}");

    let error = Processor::new(&Value::Null).process(&node).unwrap_err();
    assert_eq!(error.path.to_string(), "$.a.b");
    assert!(matches!(
        error.kind,
        ErrorKind::UnresolvedVariable(id) if id == "missing.thing"
    ));
}

#[test]
fn test_environment_fallback() {
    let node = ast(r#"host: $var(CHOIXE_TEST_HOST, default="localhost", env=true)"#);

    // SAFETY: the variable is unique to this test.
    unsafe { std::env::set_var("CHOIXE_TEST_HOST", "h1") };
    let output = Processor::new(&Value::Null).process(&node).unwrap();
    assert_eq!(output, tree("{host: h1}"));

    unsafe { std::env::remove_var("CHOIXE_TEST_HOST") };
    let output = Processor::new(&Value::Null).process(&node).unwrap();
    assert_eq!(output, tree("{host: localhost}"));
}

#[test]
fn test_environment_values_stay_strings() {
    let node = ast("port: $var(CHOIXE_TEST_PORT, env=true)");

    // SAFETY: the variable is unique to this test.
    unsafe { std::env::set_var("CHOIXE_TEST_PORT", "8080") };
    let output = Processor::new(&Value::Null).process(&node).unwrap();
    assert_eq!(output, tree("{port: '8080'}"));
}

#[test]
fn test_missing_environment_variable_is_its_own_error() {
    let node = ast("host: $var(CHOIXE_TEST_ABSENT, env=true)");

    let error = Processor::new(&Value::Null).process(&node).unwrap_err();
    assert!(matches!(error.kind, ErrorKind::UnresolvedEnvVariable(_)));
}

#[test]
fn test_first_mode_collapses_sweeps() {
    let node = ast(
        r#"
        alpha: $sweep(a, b)
        beta: $sweep(10, 20)
        "#,
    );

    let output = Processor::new(&Value::Null).process(&node).unwrap();
    assert_eq!(output, tree("{alpha: a, beta: 10}"));
}

#[test]
fn test_two_global_sweeps_branch_in_row_major_order() {
    let node = ast(
        r#"
        alpha: $sweep(a, b)
        beta: $sweep(10, 20)
        "#,
    );

    let outputs = Processor::new(&Value::Null).process_all(&node).unwrap();
    assert_eq!(outputs, vec![
        tree("{alpha: a, beta: 10}"),
        tree("{alpha: a, beta: 20}"),
        tree("{alpha: b, beta: 10}"),
        tree("{alpha: b, beta: 20}"),
    ]);
}

#[test]
fn test_local_sweep_multiplies_only_its_own_option() {
    let node = ast(
        r#"
        foo:
          $directive: sweep
          $args:
            - alpha: $sweep(x, y)
              beta: 10
            - gamma: z
          $kwargs: {}
        "#,
    );

    let outputs = Processor::new(&Value::Null).process_all(&node).unwrap();
    assert_eq!(outputs, vec![
        tree("{foo: {alpha: x, beta: 10}}"),
        tree("{foo: {alpha: y, beta: 10}}"),
        tree("{foo: {gamma: z}}"),
    ]);
}

#[test]
fn test_sweep_in_map_key_branches() {
    let node = ast("use_$sweep(batch, layer)_norm: true");

    let outputs = Processor::new(&Value::Null).process_all(&node).unwrap();
    assert_eq!(outputs, vec![
        tree("{use_batch_norm: true}"),
        tree("{use_layer_norm: true}"),
    ]);
}

#[test]
fn test_sweep_inside_sequence() {
    let node = ast(
        r#"
        xs:
          - $sweep(1, 2)
          - 3
        "#,
    );

    let outputs = Processor::new(&Value::Null).process_all(&node).unwrap();
    assert_eq!(outputs, vec![tree("{xs: [1, 3]}"), tree("{xs: [2, 3]}")]);
}

#[test]
fn test_key_order_is_preserved() {
    let node = ast("{z: 1, m: 2, a: 3}");

    let output = Processor::new(&Value::Null).process(&node).unwrap();
    let keys: Vec<_> = output.as_map().unwrap().keys().cloned().collect();
    assert_eq!(keys, ["z", "m", "a"]);
}

#[test]
fn test_duplicate_keys_after_evaluation_fail() {
    let context = tree("{a: x}");
    let node = ast(
        r#"
        $var(a): 1
        x: 2
        "#,
    );

    let error = Processor::new(&context).process(&node).unwrap_err();
    assert!(matches!(
        error.kind,
        ErrorKind::DuplicateKey(key) if key == "x"
    ));
}

#[test]
fn test_for_loop_merges_map_bodies() {
    let context = tree(
        r#"
        p:
          cs:
            - {n: L, a: 5}
            - {n: M, a: 6}
        "#,
    );
    let node = ast(
        r#"
        "$for(p.cs, x)":
          c_$index(x):
            n: $item(x.n)
            a: $item(x.a)
        "#,
    );

    let output = Processor::new(&context).process(&node).unwrap();
    assert_eq!(
        output,
        tree("{c_0: {n: L, a: 5}, c_1: {n: M, a: 6}}")
    );
}

#[test]
fn test_for_loop_concatenates_sequence_bodies() {
    let context = tree("{xs: [1, 2, 3]}");
    let node = ast(
        r#"
        "$for(xs)":
          - $item
          - $index
        "#,
    );

    let output = Processor::new(&context).process(&node).unwrap();
    assert_eq!(output, tree("[1, 0, 2, 1, 3, 2]"));
}

#[test]
fn test_for_loop_concatenates_text_bodies() {
    let context = tree("{xs: [a, b, c]}");
    let node = ast(r#"joined: {"$for(xs)": "$item-"}"#);

    let output = Processor::new(&context).process(&node).unwrap();
    assert_eq!(output, tree("{joined: a-b-c-}"));
}

#[test]
fn test_empty_iterable_yields_the_identity() {
    let context = tree("{xs: []}");

    let merged = Processor::new(&context)
        .process(&ast(r#"{"$for(xs)": {k_$index: 1}}"#))
        .unwrap();
    assert_eq!(merged, tree("{}"));

    let concatenated = Processor::new(&context)
        .process(&ast(r#"{"$for(xs)": [$item]}"#))
        .unwrap();
    assert_eq!(concatenated, tree("[]"));

    let joined = Processor::new(&context)
        .process(&ast(r#"{s: {"$for(xs)": "$item"}}"#))
        .unwrap();
    assert_eq!(joined, tree("{s: ''}"));
}

#[test]
fn test_nested_loops_resolve_by_identifier_and_position() {
    let context = tree("{rows: [a, b], cols: [x, y]}");
    let node = ast(
        r#"
        "$for(rows, r)":
          k_$item(r):
            "$for(cols, c)": "$item(c)$item(r)$index"
        "#,
    );

    let output = Processor::new(&context).process(&node).unwrap();
    assert_eq!(output, tree("{k_a: xa0ya1, k_b: xb0yb1}"));
}

#[test]
fn test_item_without_a_path_is_the_whole_element() {
    let context = tree("{ps: [{a: 1}, {a: 2}]}");
    let node = ast(r#"{"$for(ps, p)": [$item(p)]}"#);

    let output = Processor::new(&context).process(&node).unwrap();
    assert_eq!(output, tree("[{a: 1}, {a: 2}]"));
}

#[test]
fn test_sweep_inside_loop_body_branches_per_iteration() {
    let context = tree("{xs: [1, 2]}");
    let node = ast(
        r#"
        "$for(xs)":
          - $sweep(a, b)
        "#,
    );

    let outputs = Processor::new(&context).process_all(&node).unwrap();
    assert_eq!(outputs, vec![
        tree("[a, a]"),
        tree("[a, b]"),
        tree("[b, a]"),
        tree("[b, b]"),
    ]);
}

#[test]
fn test_item_outside_a_loop_fails() {
    let node = ast("x: $item");

    let error = Processor::new(&Value::Null).process(&node).unwrap_err();
    assert!(matches!(error.kind, ErrorKind::UnknownLoopRef(_)));
}

#[test]
fn test_unknown_loop_reference_fails() {
    let context = tree("{xs: [1]}");
    let node = ast(r#"{"$for(xs, x)": [$item(y)]}"#);

    let error = Processor::new(&context).process(&node).unwrap_err();
    assert!(matches!(
        error.kind,
        ErrorKind::UnknownLoopRef(reference) if reference == "y"
    ));
}

#[test]
fn test_iterating_a_non_sequence_fails() {
    let context = tree("{xs: 5}");
    let node = ast(r#"{"$for(xs)": [$item]}"#);

    let error = Processor::new(&context).process(&node).unwrap_err();
    assert!(matches!(error.kind, ErrorKind::TypeMismatch { .. }));
}

#[test]
fn test_import_resolves_relative_to_the_importing_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(
        dir.path().join("sub/inner.yml"),
        "leaf: $import(\"leaf.yml\")\n",
    )
    .unwrap();
    fs::write(dir.path().join("sub/leaf.yml"), "{lr: 0.1}\n").unwrap();

    let loader = FsLoader;
    let node = ast(r#"params: $import("sub/inner.yml")"#);
    let output = Processor::new(&Value::Null)
        .with_loader(&loader)
        .with_base_dir(dir.path())
        .process(&node)
        .unwrap();

    assert_eq!(output, tree("{params: {leaf: {lr: 0.1}}}"));
}

#[test]
fn test_imported_documents_share_the_context() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("base.yml"), "lr: $var(params.lr)\n").unwrap();

    let context = tree("{params: {lr: 0.5}}");
    let loader = FsLoader;
    let node = ast(r#"training: $import("base.yml")"#);
    let output = Processor::new(&context)
        .with_loader(&loader)
        .with_base_dir(dir.path())
        .process(&node)
        .unwrap();

    assert_eq!(output, tree("{training: {lr: 0.5}}"));
}

#[test]
fn test_import_path_may_carry_directives() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("train.yml"), "{stage: train}\n").unwrap();

    let context = tree("{stage: train}");
    let loader = FsLoader;
    let node = ast(r#"cfg: $import("$var(stage).yml")"#);
    let output = Processor::new(&context)
        .with_loader(&loader)
        .with_base_dir(dir.path())
        .process(&node)
        .unwrap();

    assert_eq!(output, tree("{cfg: {stage: train}}"));
}

#[test]
fn test_import_cycles_are_detected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.yml"), "$import(\"b.yml\")\n").unwrap();
    fs::write(dir.path().join("b.yml"), "$import(\"a.yml\")\n").unwrap();

    let loader = FsLoader;
    let node = ast(r#"$import("a.yml")"#);
    let error = Processor::new(&Value::Null)
        .with_loader(&loader)
        .with_base_dir(dir.path())
        .process(&node)
        .unwrap_err();

    match error.kind {
        ErrorKind::ImportCycle(path) => assert!(path.ends_with("a.yml")),
        other => panic!("expected an import cycle, got {other}"),
    }
}

#[test]
fn test_missing_import_fails() {
    let dir = tempfile::tempdir().unwrap();

    let loader = FsLoader;
    let node = ast(r#"$import("nowhere.yml")"#);
    let error = Processor::new(&Value::Null)
        .with_loader(&loader)
        .with_base_dir(dir.path())
        .process(&node)
        .unwrap_err();

    assert!(matches!(error.kind, ErrorKind::ImportNotFound { .. }));
}

#[test]
fn test_call_embeds_the_returned_value() {
    let mut registry = SymbolRegistry::new();
    registry.register_function("math:scale", |kwargs| {
        let Some(Value::Int(value)) = kwargs.get("value") else {
            anyhow::bail!("`value` must be an integer");
        };
        let Some(Value::Int(factor)) = kwargs.get("factor") else {
            anyhow::bail!("`factor` must be an integer");
        };
        Ok(Value::Int(value * factor))
    });

    let node = ast(
        r#"
        scaled:
          $call: math:scale
          $args:
            value: 21
            factor: 2
        "#,
    );
    let output = Processor::new(&Value::Null)
        .with_symbols(&registry)
        .process(&node)
        .unwrap();

    assert_eq!(output, tree("{scaled: 42}"));
}

#[test]
fn test_call_arguments_are_evaluated() {
    let mut registry = SymbolRegistry::new();
    registry.register_function("echo", |kwargs| Ok(Value::Map(kwargs)));

    let context = tree("{lr: 0.1}");
    let node = ast(
        r#"
        out:
          $call: echo
          $args:
            rate: $var(lr)
        "#,
    );
    let output = Processor::new(&context)
        .with_symbols(&registry)
        .process(&node)
        .unwrap();

    assert_eq!(output, tree("{out: {rate: 0.1}}"));
}

#[test]
fn test_call_results_may_be_opaque() {
    /// A payload with no markup representation.
    #[derive(Debug, PartialEq)]
    struct Handle(u32);

    let mut registry = SymbolRegistry::new();
    registry.register_function("handles:open", |_| {
        Ok(Value::Opaque(choixe_ast::Opaque::new(Handle(7))))
    });

    let node = ast("{h: {$call: \"handles:open\"}}");
    let output = Processor::new(&Value::Null)
        .with_symbols(&registry)
        .process(&node)
        .unwrap();

    let Value::Map(map) = &output else {
        panic!("expected a map");
    };
    let Value::Opaque(opaque) = &map["h"] else {
        panic!("expected an opaque value");
    };
    assert_eq!(opaque.downcast_ref::<Handle>(), Some(&Handle(7)));

    // Opaque payloads must not leak into markup output.
    assert!(serde_yaml_ng::to_string(&output).is_err());
}

#[test]
fn test_model_requires_a_model_symbol() {
    let mut registry = SymbolRegistry::new();
    registry.register_function("plain", |kwargs| Ok(Value::Map(kwargs)));
    registry.register_model("models.linear", |kwargs| Ok(Value::Map(kwargs)));

    let node = ast(
        r#"
        m:
          $model: models.linear
          $args:
            inputs: 3
        "#,
    );
    let output = Processor::new(&Value::Null)
        .with_symbols(&registry)
        .process(&node)
        .unwrap();
    assert_eq!(output, tree("{m: {inputs: 3}}"));

    let node = ast("{m: {$model: plain}}");
    let error = Processor::new(&Value::Null)
        .with_symbols(&registry)
        .process(&node)
        .unwrap_err();
    assert!(matches!(
        error.kind,
        ErrorKind::NotAModel(symbol) if symbol == "plain"
    ));
}

#[test]
fn test_failing_calls_abort_evaluation() {
    let mut registry = SymbolRegistry::new();
    registry.register_function("boom", |_| anyhow::bail!("exploded"));

    let node = ast("{x: {$call: boom}}");
    let error = Processor::new(&Value::Null)
        .with_symbols(&registry)
        .process(&node)
        .unwrap_err();

    assert!(matches!(error.kind, ErrorKind::CallFailed { .. }));
}

#[test]
fn test_unregistered_symbols_fail() {
    let registry = SymbolRegistry::new();

    let node = ast("{x: {$call: nope}}");
    let error = Processor::new(&Value::Null)
        .with_symbols(&registry)
        .process(&node)
        .unwrap_err();

    assert!(matches!(error.kind, ErrorKind::SymbolResolution { .. }));
}
