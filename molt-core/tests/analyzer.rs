use std::collections::HashMap;
use std::path::PathBuf;

use molt_core::{analyze_module, lower_module, Analysis, DiagnosticKind, DiagnosticSink};
use molt_ir::{ExprKind, ModuleIr, NodeIdGen, StmtKind, Ty};
use molt_parse::parse_source;
use molt_stubs::StubRegistry;

fn analyze(src: &str) -> (ModuleIr, Analysis, Vec<molt_core::Diagnostic>) {
    let ast = parse_source(src).expect("parse failed");
    let mut ids = NodeIdGen::new();
    let mut sink = DiagnosticSink::new();
    let path = PathBuf::from("demo.py");
    let ir = lower_module("demo", &path, &ast, &mut ids, &mut sink);
    let registry = StubRegistry::with_builtins().expect("builtins");
    let analysis = analyze_module(&ir, &registry, &HashMap::new(), &path, &mut sink);
    (ir, analysis, sink.into_vec())
}

fn kinds(diags: &[molt_core::Diagnostic]) -> Vec<DiagnosticKind> {
    diags.iter().map(|d| d.kind).collect()
}

#[test]
fn clean_function_produces_no_diagnostics() {
    let (_, _, diags) = analyze("def add(a: int, b: int) -> int:\n    return a + b\n");
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
}

#[test]
fn missing_parameter_annotation_is_fatal() {
    let (_, _, diags) = analyze("def f(x) -> int:\n    return 1\n");
    assert!(kinds(&diags).contains(&DiagnosticKind::MissingAnnotation));
}

#[test]
fn missing_return_annotation_is_fatal() {
    let (_, _, diags) = analyze("def f(x: int):\n    return x\n");
    assert!(kinds(&diags).contains(&DiagnosticKind::MissingAnnotation));
}

#[test]
fn analysis_continues_past_first_fatal() {
    let (_, _, diags) = analyze("def f(x) -> int:\n    return undefined_name\n");
    let ks = kinds(&diags);
    assert!(ks.contains(&DiagnosticKind::MissingAnnotation));
    assert!(ks.contains(&DiagnosticKind::UnknownSymbol));
}

#[test]
fn reassigned_local_is_marked_mutable() {
    let (ir, analysis, diags) =
        analyze("def increment() -> int:\n    x: int = 0\n    x = x + 1\n    return x\n");
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let decl = &ir.functions[0].body[0];
    assert!(matches!(decl.kind, StmtKind::Let { declares: true, .. }));
    assert!(analysis.mutable_bindings.contains(&decl.id));
}

#[test]
fn untouched_local_is_not_mutable() {
    let (ir, analysis, _) = analyze("def f() -> int:\n    x: int = 0\n    return x\n");
    let decl = &ir.functions[0].body[0];
    assert!(!analysis.mutable_bindings.contains(&decl.id));
}

#[test]
fn mutating_method_marks_receiver_mutable() {
    let (ir, analysis, diags) =
        analyze("def f() -> int:\n    items: list[int] = []\n    items.append(1)\n    return len(items)\n");
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let decl = &ir.functions[0].body[0];
    assert!(analysis.mutable_bindings.contains(&decl.id));
}

#[test]
fn integer_index_gets_cast_annotation() {
    let (ir, analysis, diags) = analyze(
        "def f(values: list[int], i: int) -> int:\n    return values[i]\n",
    );
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let StmtKind::Return { value: Some(v) } = &ir.functions[0].body[0].kind else {
        panic!("expected return");
    };
    let ExprKind::Subscript { index, .. } = &v.kind else {
        panic!("expected subscript");
    };
    assert!(analysis.index_casts.contains(&index.id));
}

#[test]
fn length_comparison_gets_cast_annotation() {
    let (ir, analysis, diags) = analyze(
        "def f(values: list[int]) -> int:\n    i: int = 0\n    while i < len(values):\n        i = i + 1\n    return i\n",
    );
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let StmtKind::While { cond, .. } = &ir.functions[0].body[1].kind else {
        panic!("expected while");
    };
    let ExprKind::Binary { left, .. } = &cond.kind else {
        panic!("expected comparison");
    };
    assert!(analysis.index_casts.contains(&left.id));
}

#[test]
fn result_call_in_result_context_is_a_propagation_site() {
    let src = "\
def might_fail() -> Result[int, str]:
    return Ok(42)

def caller() -> Result[int, str]:
    value: int = might_fail()
    return Ok(value + 1)
";
    let (ir, analysis, diags) = analyze(src);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let caller = ir.functions.iter().find(|f| f.name == "caller").unwrap();
    let StmtKind::Let { value, .. } = &caller.body[0].kind else {
        panic!("expected binding");
    };
    assert!(analysis.propagation.contains(&value.id));
}

#[test]
fn result_call_outside_result_context_is_not_propagated() {
    let src = "\
def might_fail() -> Result[int, str]:
    return Ok(42)

def main() -> None:
    result: Result[int, str] = might_fail()
    print(\"done\")
";
    let (ir, analysis, diags) = analyze(src);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let main = ir.functions.iter().find(|f| f.name == "main").unwrap();
    let StmtKind::Let { value, .. } = &main.body[0].kind else {
        panic!("expected binding");
    };
    assert!(!analysis.propagation.contains(&value.id));
}

#[test]
fn await_outside_async_is_fatal() {
    let src = "\
async def fetch() -> int:
    return 1

def main() -> None:
    x: int = await fetch()
";
    let (_, _, diags) = analyze(src);
    assert!(kinds(&diags).contains(&DiagnosticKind::AwaitOutsideAsync));
}

#[test]
fn sync_call_of_async_callee_is_fatal() {
    let src = "\
async def fetch() -> int:
    return 1

def main() -> None:
    x: int = fetch()
";
    let (_, _, diags) = analyze(src);
    assert!(kinds(&diags).contains(&DiagnosticKind::AwaitOutsideAsync));
}

#[test]
fn async_main_sets_entry_flag() {
    let (_, analysis, diags) = analyze("async def main() -> None:\n    pass\n");
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    assert!(analysis.async_main);
}

#[test]
fn unknown_symbol_is_reported() {
    let (_, _, diags) = analyze("def f() -> None:\n    mystery(1)\n");
    assert!(kinds(&diags).contains(&DiagnosticKind::UnknownSymbol));
}

#[test]
fn uninferable_bare_none_local_is_fatal() {
    let (_, _, diags) = analyze("def f() -> None:\n    x = None\n");
    assert!(kinds(&diags).contains(&DiagnosticKind::UninferableLocal));
}

#[test]
fn none_then_literal_infers_optional() {
    let src = "def f(flag: bool) -> None:\n    x = None\n    if flag:\n        x = 5\n";
    let (ir, analysis, diags) = analyze(src);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let decl = &ir.functions[0].body[0];
    let StmtKind::Let { value, .. } = &decl.kind else {
        panic!("expected binding")
    };
    assert_eq!(analysis.ty(value.id), Ty::option(Ty::Never));
    // The literal reassignment is wrapped into the optional constructor.
    let StmtKind::If { then_body, .. } = &ir.functions[0].body[1].kind else {
        panic!("expected if");
    };
    let StmtKind::Let { value: five, .. } = &then_body[0].kind else {
        panic!("expected reassignment");
    };
    assert!(analysis.some_wraps.contains(&five.id));
}

#[test]
fn type_mismatch_on_operands() {
    let (_, _, diags) = analyze("def f(s: str, n: int) -> int:\n    return s + n\n");
    assert!(kinds(&diags).contains(&DiagnosticKind::TypeMismatch));
}

#[test]
fn channel_unpack_marks_receiver_mutable() {
    let src = "\
async def main() -> None:
    tx, rx = mpsc_channel(10)
";
    let (ir, analysis, diags) = analyze(src);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let stmt = &ir.functions[0].body[0];
    let flags = analysis.tuple_mutable.get(&stmt.id).expect("tuple flags");
    assert_eq!(flags, &vec![false, true]);
}

#[test]
fn stub_requirements_accumulate_only_when_used() {
    let registry = StubRegistry::with_builtins().expect("builtins");
    let ast = parse_source("async def main() -> None:\n    tx, rx = mpsc_channel(10)\n")
        .expect("parse failed");
    let mut ids = NodeIdGen::new();
    let mut sink = DiagnosticSink::new();
    let path = PathBuf::from("demo.py");
    let ir = lower_module("demo", &path, &ast, &mut ids, &mut sink);
    analyze_module(&ir, &registry, &HashMap::new(), &path, &mut sink);
    assert!(sink.is_empty());
    assert!(registry.collect_requirements().contains_key("tokio"));
}

#[test]
fn class_method_dispatch_and_mutability() {
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
    let (ir, analysis, diags) = analyze(src);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let main = ir.functions.iter().find(|f| f.name == "main").unwrap();
    let decl = &main.body[0];
    // increment() takes the exclusive receiver, so `c` must be mutable.
    assert!(analysis.mutable_bindings.contains(&decl.id));
}

#[test]
fn membership_against_wrong_container_is_fatal() {
    let (_, _, diags) = analyze("def f(n: int) -> bool:\n    return \"a\" in n\n");
    assert!(kinds(&diags).contains(&DiagnosticKind::TypeMismatch));
}

#[test]
fn with_over_plain_shared_state_is_rejected() {
    let src = "\
class Counter:
    def __init__(self, start: int) -> None:
        self.value = start

def f(state: Arc[Counter]) -> None:
    with state as s:
        print(\"held\")
";
    let (_, _, diags) = analyze(src);
    assert!(kinds(&diags).contains(&DiagnosticKind::UnsupportedConstruct));
}

#[test]
fn with_over_guarded_state_and_scoped_stubs_is_accepted() {
    let src = "\
async def f(state: Arc[Mutex[int]]) -> None:
    with state:
        print(\"held\")

def g() -> None:
    with tempfile.TemporaryDirectory() as d:
        print(d)
";
    let (_, _, diags) = analyze(src);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
}

#[test]
fn method_call_on_unresolved_receiver_is_escalated_with_note() {
    let src = "def f() -> None:\n    x = mystery()\n    x.send(1)\n";
    let (_, _, diags) = analyze(src);
    let ks = kinds(&diags);
    // The unresolved call, the declaration, and the dispatch each report.
    assert!(ks.contains(&DiagnosticKind::UnknownSymbol));
    assert!(ks.contains(&DiagnosticKind::UninferableLocal));
    let dispatch = diags
        .iter()
        .find(|d| d.kind == DiagnosticKind::UninferableLocal && d.message.contains("send"))
        .expect("dispatch diagnostic names the method");
    assert!(dispatch
        .notes
        .iter()
        .any(|n| n.contains("annotate the receiver")));
}
