use super::*;

const LEAVES: [&str; 4] = [
    "package_write_ipk",
    "package_write_rpm",
    "packagedata",
    "package_qa",
];

#[test]
fn test_no_setscenevalid() {
    let report = run(&["a1"], "");
    assert_eq!(report.action_set(), set(all("a1", &[])));
    assert!(report.plan.covered.is_empty());
    assert!(report.is_success());
}

#[test]
fn test_single_setscenevalid() {
    let report = run(&["a1"], "a1:do_package");

    let mut expected = all("a1", &["package"]);
    expected.extend(setscene("a1", &["package"]));
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_intermediate_setscenevalid() {
    let report = run(&["a1"], "a1:do_package a1:do_populate_sysroot");

    let mut expected = setscene("a1", &["package", "populate_sysroot"]);
    expected.extend(all("a1", &[]).into_iter().filter(|t| {
        [
            "a1:packagedata",
            "a1:package_qa",
            "a1:package_write_rpm",
            "a1:package_write_ipk",
            "a1:build",
        ]
        .contains(&t.as_str())
    }));
    assert_eq!(report.action_set(), set(expected));
}

const A1_VALID: &str = "a1:do_package a1:do_packagedata a1:do_package_qa \
                        a1:do_package_write_rpm a1:do_package_write_ipk a1:do_populate_sysroot";

fn a1_restored() -> Vec<String> {
    let mut expected = setscene("a1", &LEAVES);
    expected.extend(setscene("a1", &["populate_sysroot"]));
    expected.push("a1:build".into());
    expected
}

#[test]
fn test_all_setscenevalid() {
    let report = run(&["a1"], A1_VALID);
    assert_eq!(report.action_set(), set(a1_restored()));
}

#[test]
fn test_explicit_task_next_to_substituted_unit() {
    let report = run(&["c1:do_patch", "a1"], A1_VALID);

    let mut expected = a1_restored();
    expected.extend(["c1:fetch", "c1:unpack", "c1:patch"].map(String::from));
    assert_eq!(report.action_set(), set(expected));
    assert!(report.plan.notcovered.contains(&id("c1:do_patch")));
}

#[test]
fn test_no_settasks() {
    let report = run(&["a1", "c1"], "");

    let mut expected = all("a1", &[]);
    expected.extend(all("c1", &[]));
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_b1_no_setscenevalid() {
    let report = run(&["b1"], "");

    let mut expected = all("a1", &["build", "package_qa"]);
    expected.extend(all("b1", &[]));
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_no_setscenevalid_harddeps() {
    let report = run(&["d1"], "");

    let mut expected = all("a1", &["build", "package_qa"]);
    expected.extend(all("d1", &[]));
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_b1_dependency_package_valid() {
    let report = run(&["b1"], "a1:do_package");

    let mut expected = setscene("a1", &["package"]);
    expected.extend(all("a1", &["package", "build", "package_qa"]));
    expected.extend(all("b1", &[]));
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_b1_own_package_valid() {
    let report = run(&["b1"], "b1:do_package");

    let mut expected = all("a1", &["build", "package_qa"]);
    expected.extend(setscene("b1", &["package"]));
    expected.extend(all("b1", &["package"]));
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_b1_intermediate() {
    let report = run(
        &["b1"],
        "a1:do_package a1:do_populate_sysroot b1:do_package",
    );

    let mut expected = setscene("a1", &["package", "populate_sysroot"]);
    expected.extend(
        ["a1:packagedata", "a1:package_write_rpm", "a1:package_write_ipk"].map(String::from),
    );
    expected.extend(setscene("b1", &["package"]));
    expected.extend(all("b1", &["package"]));
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_all_setscenevalid_withdeps() {
    let mut entries = Vec::new();
    for unit in ["a1", "b1"] {
        for task in TASKS.iter().filter(|t| **t != "build") {
            entries.push(format!("{unit}:do_{task}"));
        }
    }
    let report = run(&["b1"], &entries.join(" "));

    let mut expected = setscene(
        "a1",
        &[
            "package_write_ipk",
            "package_write_rpm",
            "packagedata",
            "populate_sysroot",
        ],
    );
    expected.extend(setscene("b1", &LEAVES));
    expected.extend(setscene("b1", &["populate_sysroot"]));
    expected.push("b1:build".into());
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_explicit_task_runs_for_real() {
    let report = run(&["a1:do_populate_sysroot"], "a1:do_populate_sysroot");

    let expected = all("a1", &[])
        .into_iter()
        .take(7)
        .chain(["a1:populate_sysroot".to_string()]);
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_task_selection() {
    let config = RunConfig::new(["a1", "c1"])
        .unwrap()
        .task("do_install")
        .concurrency(2);
    let report = Harness::new().run(&config).unwrap();

    let mut expected: Vec<String> = all("a1", &[]).into_iter().take(7).collect();
    expected.extend(all("c1", &[]).into_iter().take(7));
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_force_ignores_valid_target() {
    let config = RunConfig::new(["a1:do_package"])
        .unwrap()
        .force(true)
        .valid(valid("a1:do_package"))
        .concurrency(2);
    let report = Harness::new().run(&config).unwrap();

    let expected = all("a1", &[]).into_iter().take(8);
    assert_eq!(report.action_set(), set(expected));
}

#[test]
fn test_dry_run_dispatches_nothing() {
    let harness = Harness::new();
    let config = RunConfig::new(["a1"])
        .unwrap()
        .valid(valid("a1:do_package a1:do_populate_sysroot"))
        .dry_run(true);
    let report = harness.run(&config).unwrap();

    assert!(report.dry_run);
    assert!(report.actions.is_empty());
    assert!(harness.script.log().is_empty());

    let covered: Vec<String> = report.plan.covered.iter().map(ToString::to_string).collect();
    assert_eq!(covered, ["a1:do_package", "a1:do_populate_sysroot"]);
    assert_eq!(report.plan.notcovered.len(), 5);
    assert!(report.plan.is_covered(&id("a1:do_package")));
    assert!(report.plan.contains(&id("a1:do_build")));
    assert!(!report.plan.contains(&id("a1:do_install")));
}

#[test]
fn test_slow_setscene_does_not_block_real_work() {
    let harness = Harness::new().script(Script::new().slow("a1:package_setscene", 300));
    let config = RunConfig::new(["a1"])
        .unwrap()
        .valid(valid("a1:do_package"))
        .concurrency(4);
    let report = harness.run(&config).unwrap();

    let mut expected = all("a1", &["package"]);
    expected.extend(setscene("a1", &["package"]));
    assert_eq!(report.action_set(), set(expected));

    let fetch = harness.script.position("+a1:fetch").unwrap();
    let restored = harness.script.position("-a1:package_setscene").unwrap();
    assert!(fetch < restored);
}

#[test]
fn test_dependencies_finish_before_consumers() {
    let harness = Harness::new();
    let config = RunConfig::new(["b1"]).unwrap().concurrency(8);
    harness.run(&config).unwrap();

    let graph = harness.runqueue().graph(&config).unwrap();
    for ix in graph.indices() {
        let consumer = action(&graph.node(ix).id, false);
        let Some(start) = harness.script.position(&format!("+{consumer}")) else {
            continue;
        };
        for &dep in graph.dependencies(ix) {
            let dep = action(&graph.node(dep).id, false);
            if let Some(end) = harness.script.position(&format!("-{dep}")) {
                assert!(end < start, "{dep} still running when {consumer} started");
            }
        }
    }
}

#[test]
fn test_diagnostics() {
    let harness = Harness::new();
    let config = RunConfig::new(["a1"])
        .unwrap()
        .valid(valid("a1:do_package a1:do_populate_sysroot"));
    let report = harness.run(&config).unwrap();
    let graph = harness.runqueue().graph(&config).unwrap();

    let diagnostics = &report.diagnostics;
    assert_eq!(diagnostics.execution_times.len(), 7);
    assert_eq!(diagnostics.restored.len(), 2);
    assert!(
        diagnostics
            .restored
            .contains(&graph.find("a1:do_populate_sysroot").unwrap())
    );

    let mermaid = diagnostics.render_mermaid(&graph);
    assert!(mermaid.starts_with("graph LR"));
    assert!(mermaid.contains("fill:#ADD8E6"));
    assert!(mermaid.contains("not run"));
}

#[test]
fn test_unknown_target_fails_before_dispatch() {
    let harness = Harness::new();
    let config = RunConfig::new(["zz"]).unwrap();
    let err = harness.run(&config).unwrap_err();

    assert!(matches!(err, RunError::Graph(_)));
    assert!(harness.script.log().is_empty());
}
