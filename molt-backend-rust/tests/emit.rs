use std::collections::HashMap;
use std::path::PathBuf;

use molt_backend_rust::{emit_module, EmitOptions, EmittedModule};
use molt_core::{analyze_module, lower_module, DiagnosticSink};
use molt_ir::NodeIdGen;
use molt_parse::parse_source;
use molt_stubs::StubRegistry;

fn emit_with_registry(src: &str) -> (EmittedModule, StubRegistry) {
    let ast = parse_source(src).expect("parse failed");
    let mut ids = NodeIdGen::new();
    let mut sink = DiagnosticSink::new();
    let path = PathBuf::from("demo.py");
    let ir = lower_module("demo", &path, &ast, &mut ids, &mut sink);
    let registry = StubRegistry::with_builtins().expect("builtins");
    let analysis = analyze_module(&ir, &registry, &HashMap::new(), &path, &mut sink);
    assert!(
        sink.is_empty(),
        "diagnostics before emission: {:?}",
        sink.into_vec()
    );
    let emitted =
        emit_module(&ir, &analysis, &registry, &EmitOptions::default()).expect("emit failed");
    (emitted, registry)
}

fn emit(src: &str) -> EmittedModule {
    emit_with_registry(src).0
}

#[test]
fn greet_lowers_format_macro_and_string_boundary() {
    let src = "\
def greet(name: str) -> str:
    return f\"Hello, {name}!\"

def main() -> None:
    message: str = greet(\"World\")
    print(message)
";
    let out = emit(src);
    assert!(out.text.contains("pub fn greet(name: String) -> String {"));
    assert!(out.text.contains("format!(\"Hello, {}!\", name)"));
    assert!(out.text.contains("let message: String = greet(\"World\".to_string());"));
    assert!(out.text.contains("println!(\"{}\", message);"));
}

#[test]
fn reassigned_counter_is_mutable_and_folds_to_compound() {
    let src = "\
def increment() -> int:
    x: int = 0
    x = x + 1
    x = x + 1
    return x
";
    let out = emit(src);
    assert!(out.text.contains("let mut x: i64 = 0;"));
    assert!(out.text.contains("x += 1;"));
    assert!(out.text.trim_end().ends_with("x\n}"));
}

#[test]
fn async_entry_gets_runtime_attribute_and_postfix_await() {
    let src = "\
async def greet(name: str) -> str:
    return f\"Hello, {name}!\"

async def main() -> None:
    message: str = await greet(\"World\")
    print(message)
";
    let out = emit(src);
    assert!(out.text.contains("#[tokio::main]\npub async fn main()"));
    assert!(out.text.contains("greet(\"World\".to_string()).await"));
    assert!(out.requirements.contains_key("tokio"));
}

#[test]
fn pass_through_main_attribute_suppresses_runtime_attribute() {
    let src = "\
# #[async_std::main]
async def main() -> None:
    pass
";
    let out = emit(src);
    assert!(out.text.contains("#[async_std::main]"));
    assert!(!out.text.contains("#[tokio::main]"));
}

#[test]
fn propagation_site_appends_question_mark() {
    let src = "\
def might_fail() -> Result[int, str]:
    return Ok(42)

def caller() -> Result[int, str]:
    value: int = might_fail()
    return Ok(value + 1)
";
    let out = emit(src);
    assert!(out.text.contains("let value: i64 = might_fail()?;"));
    assert!(out.text.contains("Ok(value + 1)"));
}

#[test]
fn index_loop_casts_to_platform_width() {
    let src = "\
def show(values: list[int]) -> None:
    i: int = 0
    while i < len(values):
        print(values[i])
        i = i + 1
";
    let out = emit(src);
    assert!(out.text.contains("while (i as usize) < values.len() {"));
    assert!(out.text.contains("values[i as usize]"));
    assert!(out.text.contains("i += 1;"));
}

#[test]
fn channel_unpack_emits_mut_receiver_import_and_requirement() {
    let src = "\
async def main() -> None:
    tx, rx = mpsc_channel(10)
";
    let (out, registry) = emit_with_registry(src);
    assert!(out.text.contains("let (tx, mut rx) = mpsc::channel(10 as usize);"));
    assert!(out.text.contains("use tokio::sync::mpsc;"));
    assert!(registry.collect_requirements().contains_key("tokio"));
}

#[test]
fn membership_rewrites_to_contains() {
    let src = "\
def f(names: list[str], haystack: str) -> bool:
    a: bool = \"x\" in haystack
    b: bool = \"y\" not in haystack
    c: bool = haystack.find(\"z\") >= 0
    d: bool = haystack.find(\"w\") == -1
    return a and b and c and d
";
    let out = emit(src);
    assert!(out.text.contains("haystack.contains(\"x\")"));
    assert!(out.text.contains("!haystack.contains(\"y\")"));
    assert!(out.text.contains("haystack.contains(\"z\")"));
    assert!(out.text.contains("!haystack.contains(\"w\")"));
    assert!(!out.text.contains(".find("));
}

#[test]
fn len_zero_folds_to_is_empty() {
    let src = "\
def f(items: list[int]) -> bool:
    return len(items) > 0
";
    let out = emit(src);
    assert!(out.text.contains("!items.is_empty()"));
}

#[test]
fn string_method_table() {
    let src = "\
def f(s: str) -> str:
    a: str = s.upper()
    b: str = s.strip()
    ok: bool = s.startswith(\"pre\")
    digit: bool = s.isdigit()
    if ok and digit:
        return a
    return b
";
    let out = emit(src);
    assert!(out.text.contains("s.to_uppercase()"));
    assert!(out.text.contains("s.trim().to_string()"));
    assert!(out.text.contains("s.starts_with(\"pre\")"));
    assert!(out.text.contains("s.chars().all(|c| c.is_ascii_digit())"));
}

#[test]
fn class_emits_struct_impl_and_receiver_forms() {
    let src = "\
class Counter:
    def __init__(self, start: int) -> None:
        self.value = start

    def increment(self) -> None:
        self.value = self.value + 1

    def get(self) -> int:
        return self.value

def main() -> None:
    c: Counter = Counter(10)
    c.increment()
    print(c.get())
";
    let out = emit(src);
    assert!(out.text.contains("#[derive(Debug, Clone)]\npub struct Counter {"));
    assert!(out.text.contains("pub value: i64,"));
    assert!(out.text.contains("pub fn new(start: i64) -> Self {"));
    assert!(out.text.contains("pub fn increment(&mut self) {"));
    assert!(out.text.contains("pub fn get(&self) -> i64 {"));
    assert!(out.text.contains("self.value += 1;"));
    assert!(out.text.contains("let mut c: Counter = Counter::new(10);"));
}

#[test]
fn dataclass_defaults_become_optional_parameters() {
    let src = "\
@dataclass
class Point:
    x: int
    y: int = 4

def main() -> None:
    p: Point = Point(3, 4)
    print(p.x)
";
    let out = emit(src);
    assert!(out.text.contains("pub fn new(x: i64, y: Option<i64>) -> Self {"));
    assert!(out.text.contains("y: y.unwrap_or(4),"));
    assert!(out.text.contains("Point::new(3, Some(4))"));
}

#[test]
fn derive_pass_through_suppresses_default_derive() {
    let src = "\
# #[derive(Debug, Serialize)]
@dataclass
class Config:
    name: str
";
    let out = emit(src);
    assert!(out.text.contains("#[derive(Debug, Serialize)]"));
    assert!(!out.text.contains("#[derive(Debug, Clone)]"));
}

#[test]
fn scoped_resource_lowers_to_lexical_block() {
    let src = "\
def work() -> None:
    with tempfile.TemporaryDirectory() as d:
        print(d)
";
    let (out, registry) = emit_with_registry(src);
    assert!(out.text.contains("let _scope = tempfile::tempdir().unwrap();"));
    assert!(out.text.contains("let d = _scope.path().to_string_lossy().to_string();"));
    assert!(registry.collect_requirements().contains_key("tempfile"));
}

#[test]
fn raise_becomes_err_return() {
    let src = "\
def validate(x: int) -> Result[int, str]:
    if x < 0:
        raise ValueError(\"must be positive\")
    return Ok(x)
";
    let out = emit(src);
    assert!(out.text.contains("return Err(\"must be positive\".to_string());"));
}

#[test]
fn emission_is_deterministic() {
    let src = "\
def greet(name: str) -> str:
    return f\"Hello, {name}!\"

def main() -> None:
    print(greet(\"World\"))
";
    let a = emit(src).text;
    let b = emit(src).text;
    assert_eq!(a, b);
}

#[test]
fn module_constants_become_items() {
    let src = "MAX_RETRIES: int = 3\nGREETING: str = \"hi\"\n";
    let out = emit(src);
    assert!(out.text.contains("pub const MAX_RETRIES: i64 = 3;"));
    assert!(out.text.contains("pub const GREETING: &str = \"hi\";"));
}

#[test]
fn shared_and_guarded_render_as_arc_and_async_mutex() {
    let src = "\
async def main() -> None:
    state: Arc[Mutex[int]] = Arc(Mutex(0))
    with state:
        print(\"locked\")
";
    let out = emit(src);
    assert!(out
        .text
        .contains("let state: std::sync::Arc<tokio::sync::Mutex<i64>> ="));
    assert!(out.text.contains("std::sync::Arc::new(tokio::sync::Mutex::new(0))"));
    assert!(out.text.contains("state.lock().await"));
    assert!(out.requirements.contains_key("tokio"));
}

#[test]
fn is_none_and_is_some_rewrites() {
    let src = "\
def f(x: int | None) -> bool:
    if x is None:
        return True
    return x is not None
";
    let out = emit(src);
    assert!(out.text.contains("x.is_none()"));
    assert!(out.text.contains("x.is_some()"));
}
