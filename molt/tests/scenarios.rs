use std::fs;
use std::path::{Path, PathBuf};

use molt::assemble::assemble;
use molt::pipeline::{collect_inputs, run_pipeline, PipelineOutput};
use molt::report::render_diagnostics;
use molt_core::DiagnosticSink;
use molt_stubs::StubRegistry;
use tempfile::TempDir;

fn write_input(dir: &Path, name: &str, src: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, src).expect("write input");
    path
}

fn translate_as(input: &Path, project: &str) -> Result<PipelineOutput, String> {
    let mut sink = DiagnosticSink::new();
    let registry = StubRegistry::with_builtins().expect("builtins");
    let files = collect_inputs(input, &mut sink);
    let sources = files
        .iter()
        .map(|f| (f.path.clone(), f.text.clone()))
        .collect();
    match run_pipeline(&files, &registry, project, &mut sink) {
        Some(out) => Ok(out),
        None => Err(render_diagnostics(&sink.into_vec(), &sources)),
    }
}

fn translate(input: &Path) -> Result<PipelineOutput, String> {
    translate_as(input, "demo")
}

#[test]
fn single_file_project_layout() {
    let tmp = TempDir::new().expect("tempdir");
    let input = write_input(
        tmp.path(),
        "hello.py",
        "def main() -> None:\n    print(\"Hello, World!\")\n",
    );

    let output = translate_as(&input, "hello").expect("translation should succeed");
    let out_dir = tmp.path().join("out");
    assemble(&out_dir, "hello", &output).expect("assemble");

    let main_rs = fs::read_to_string(out_dir.join("src/main.rs")).expect("main.rs");
    assert!(main_rs.contains("pub fn main() {"));
    assert!(main_rs.contains("println!(\"Hello, World!\");"));
    assert!(!out_dir.join("src/lib.rs").exists());

    let manifest = fs::read_to_string(out_dir.join("Cargo.toml")).expect("manifest");
    assert!(manifest.contains("name = \"hello\""));
    assert!(manifest.contains("[[bin]]"));
    assert!(manifest.contains("unused_must_use = \"allow\""));
}

#[test]
fn directory_layout_entry_module_imports_through_crate_name() {
    let tmp = TempDir::new().expect("tempdir");
    let input_dir = tmp.path().join("proj");
    fs::create_dir(&input_dir).expect("mkdir");
    write_input(
        &input_dir,
        "util.py",
        "def double(x: int) -> int:\n    return x * 2\n",
    );
    write_input(
        &input_dir,
        "main.py",
        "from util import double\n\ndef main() -> None:\n    print(double(21))\n",
    );

    let output = translate_as(&input_dir, "proj").expect("translation should succeed");
    assert_eq!(output.entry.as_deref(), Some("main"));

    let out_dir = tmp.path().join("out");
    assemble(&out_dir, "proj", &output).expect("assemble");

    let lib_rs = fs::read_to_string(out_dir.join("src/lib.rs")).expect("lib.rs");
    assert!(lib_rs.contains("pub mod util;"));
    assert!(!lib_rs.contains("pub mod main;"));

    let util_rs = fs::read_to_string(out_dir.join("src/util.rs")).expect("util.rs");
    assert!(util_rs.contains("pub fn double(x: i64) -> i64 {"));

    // The entry module is the binary root and reaches siblings through the
    // crate name.
    let main_rs = fs::read_to_string(out_dir.join("src/main.rs")).expect("main.rs");
    assert!(main_rs.contains("use proj::util::double;"));
    assert!(main_rs.contains("pub fn main() {"));
}

#[test]
fn directory_layout_named_entry_gets_a_shim() {
    let tmp = TempDir::new().expect("tempdir");
    let input_dir = tmp.path().join("proj");
    fs::create_dir(&input_dir).expect("mkdir");
    write_input(
        &input_dir,
        "app.py",
        "def main() -> None:\n    print(\"hi\")\n",
    );
    write_input(
        &input_dir,
        "helpers.py",
        "def nothing() -> None:\n    pass\n",
    );

    let output = translate_as(&input_dir, "tool").expect("translation should succeed");
    assert_eq!(output.entry.as_deref(), Some("app"));

    let out_dir = tmp.path().join("out");
    assemble(&out_dir, "tool", &output).expect("assemble");

    let lib_rs = fs::read_to_string(out_dir.join("src/lib.rs")).expect("lib.rs");
    assert!(lib_rs.contains("pub mod app;"));
    assert!(lib_rs.contains("pub mod helpers;"));

    let shim = fs::read_to_string(out_dir.join("src/main.rs")).expect("shim");
    assert_eq!(shim, "fn main() {\n    tool::app::main();\n}\n");
}

#[test]
fn stub_closure_covers_manifest_and_imports() {
    let tmp = TempDir::new().expect("tempdir");
    let input = write_input(
        tmp.path(),
        "chan.py",
        "async def main() -> None:\n    tx, rx = mpsc_channel(10)\n",
    );

    let output = translate(&input).expect("translation should succeed");
    assert!(output.requirements.contains_key("tokio"));

    let out_dir = tmp.path().join("out");
    assemble(&out_dir, "chan", &output).expect("assemble");

    let main_rs = fs::read_to_string(out_dir.join("src/main.rs")).expect("main.rs");
    assert!(main_rs.contains("use tokio::sync::mpsc;"));
    assert!(main_rs.contains("let (tx, mut rx) = mpsc::channel(10 as usize);"));
    assert!(main_rs.contains("#[tokio::main]"));

    let manifest = fs::read_to_string(out_dir.join("Cargo.toml")).expect("manifest");
    assert!(manifest.contains("tokio = { version = \"1\", features = [\"full\"] }"));
}

#[test]
fn diagnostics_render_with_stable_codes_and_locations() {
    let tmp = TempDir::new().expect("tempdir");
    let input = write_input(
        tmp.path(),
        "bad.py",
        "def f(x) -> int:\n    return unknown_name\n",
    );

    let err = translate(&input).expect_err("translation must fail");
    assert!(err.contains("E_MISSING_ANNOTATION"));
    assert!(err.contains("E_UNKNOWN_SYMBOL"));
    assert!(err.contains("bad.py:1:"));
    assert!(err.contains("bad.py:2:"));
}

#[test]
fn unsupported_constructs_use_their_own_code() {
    let tmp = TempDir::new().expect("tempdir");
    let input = write_input(tmp.path(), "gen.py", "def f() -> int:\n    yield 1\n");

    let err = translate(&input).expect_err("translation must fail");
    assert!(err.contains("E_UNSUPPORTED_CONSTRUCT"));
}

#[test]
fn emission_does_not_run_on_dirty_sink() {
    let tmp = TempDir::new().expect("tempdir");
    let input = write_input(
        tmp.path(),
        "mix.py",
        "def f(x) -> int:\n    return x\n\ndef main() -> None:\n    print(f(1))\n",
    );

    assert!(translate(&input).is_err());
}

#[test]
fn custom_stub_directory_participates() {
    let tmp = TempDir::new().expect("tempdir");
    let project = tmp.path().join("proj");
    fs::create_dir(&project).expect("mkdir");
    let stub_dir = project.join("stubs");
    fs::create_dir(&stub_dir).expect("mkdir stubs");
    fs::write(
        stub_dir.join("greeter.toml"),
        r#"
[package]
name = "greeter"
rust_crate = "greeter"
rust_version = "0.2"
src_module = "greeter"

[cargo.dependencies]
greeter = "0.2"

[[mappings.functions]]
src = "greeter.hello"
params = ["str"]
returns = "str"
rust_code = "greeter::hello(&{arg0})"
rust_imports = []
"#,
    )
    .expect("write stub");
    write_input(
        &project,
        "main.py",
        "def main() -> None:\n    msg: str = greeter.hello(\"World\")\n    print(msg)\n",
    );

    let mut sink = DiagnosticSink::new();
    let mut registry = StubRegistry::with_builtins().expect("builtins");
    registry.load_dir(&stub_dir).expect("load stubs");
    let files = collect_inputs(&project, &mut sink);
    let output = run_pipeline(&files, &registry, "proj", &mut sink).expect("pipeline");

    assert!(output.requirements.contains_key("greeter"));
    let text = &output.units[0].emitted.text;
    assert!(text.contains("greeter::hello(&\"World\".to_string())"));
}

#[test]
fn error_propagation_scenario_end_to_end() {
    let tmp = TempDir::new().expect("tempdir");
    let input = write_input(
        tmp.path(),
        "prop.py",
        "\
def might_fail() -> Result[int, str]:
    return Ok(42)

def caller() -> Result[int, str]:
    value: int = might_fail()
    return Ok(value + 1)

def main() -> None:
    result: Result[int, str] = caller()
    print(\"ok\")
",
    );

    let output = translate(&input).expect("translation should succeed");
    let text = &output.units[0].emitted.text;
    assert!(text.contains("let value: i64 = might_fail()?;"));
    assert!(text.contains("let result: Result<i64, String> = caller();"));
}

#[test]
fn idempotent_output_across_runs() {
    let tmp = TempDir::new().expect("tempdir");
    let input = write_input(
        tmp.path(),
        "idem.py",
        "def main() -> None:\n    values: list[int] = [1, 2, 3]\n    total: int = 0\n    for v in values:\n        total = total + v\n    print(total)\n",
    );

    let a = translate(&input).expect("first run");
    let b = translate(&input).expect("second run");
    assert_eq!(a.units[0].emitted.text, b.units[0].emitted.text);
}
