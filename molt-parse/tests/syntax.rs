use molt_ast::{ExprKind, FStringPart, Item, Stmt, TypeExprKind};
use molt_parse::parse_source;

#[test]
fn function_with_block_body_parses() {
    let src = "def add(a: int, b: int) -> int:\n    return a + b\n";
    let module = parse_source(src).expect("function should parse");
    assert_eq!(module.items.len(), 1);
    let Item::Function(f) = &module.items[0] else {
        panic!("expected function item");
    };
    assert_eq!(f.name.node, "add");
    assert_eq!(f.params.len(), 2);
    assert!(!f.is_async);
}

#[test]
fn single_line_suite_with_semicolons_parses() {
    let src = "def main() -> None: message: str = greet(\"World\"); print(message)\n";
    let module = parse_source(src).expect("single-line suite should parse");
    let Item::Function(f) = &module.items[0] else {
        panic!("expected function item");
    };
    assert_eq!(f.body.len(), 2);
}

#[test]
fn async_def_sets_flag() {
    let src = "async def fetch(url: str) -> str:\n    return url\n";
    let module = parse_source(src).expect("async def should parse");
    let Item::Function(f) = &module.items[0] else {
        panic!("expected function item");
    };
    assert!(f.is_async);
}

#[test]
fn dataclass_with_fields_parses() {
    let src = "\
@dataclass
class Point:
    x: int
    y: int = 0

    def norm(self) -> int:
        return self.x
";
    let module = parse_source(src).expect("class should parse");
    let Item::Class(c) = &module.items[0] else {
        panic!("expected class item");
    };
    assert!(c.has_decorator("dataclass"));
    assert_eq!(c.fields.len(), 2);
    assert!(c.fields[1].default.is_some());
    assert_eq!(c.methods.len(), 1);
}

#[test]
fn fstring_splits_into_parts() {
    let src = "def greet(name: str) -> str:\n    return f\"Hello, {name}!\"\n";
    let module = parse_source(src).expect("f-string should parse");
    let Item::Function(f) = &module.items[0] else {
        panic!("expected function item");
    };
    let Stmt::Return(ret) = &f.body[0] else {
        panic!("expected return");
    };
    let ExprKind::FString(parts) = &ret.value.as_ref().unwrap().kind else {
        panic!("expected f-string");
    };
    assert_eq!(parts.len(), 3);
    assert!(matches!(&parts[0], FStringPart::Literal(s) if s == "Hello, "));
    assert!(matches!(&parts[2], FStringPart::Literal(s) if s == "!"));
}

#[test]
fn fstring_format_spec_is_preserved() {
    let src = "s: str = f\"{ratio:.2f}\"\n";
    let module = parse_source(src).expect("format spec should parse");
    let Item::Stmt(Stmt::Assign(a)) = &module.items[0] else {
        panic!("expected assignment");
    };
    let ExprKind::FString(parts) = &a.value.kind else {
        panic!("expected f-string");
    };
    assert!(matches!(&parts[0], FStringPart::Interp { spec, .. } if spec == ".2f"));
}

#[test]
fn tuple_unpack_assignment_parses() {
    let src = "tx, rx = mpsc_channel(10)\n";
    let module = parse_source(src).expect("tuple unpack should parse");
    let Item::Stmt(Stmt::TupleAssign(t)) = &module.items[0] else {
        panic!("expected tuple assignment");
    };
    assert_eq!(t.targets.len(), 2);
    assert_eq!(t.targets[0].node, "tx");
    assert_eq!(t.targets[1].node, "rx");
}

#[test]
fn optional_annotation_forms_parse() {
    let src = "a: Optional[int] = None\nb: int | None = None\n";
    let module = parse_source(src).expect("optional forms should parse");
    let Item::Stmt(Stmt::Assign(b)) = &module.items[1] else {
        panic!("expected assignment");
    };
    assert!(matches!(
        &b.annotation.as_ref().unwrap().kind,
        TypeExprKind::Union(_)
    ));
}

#[test]
fn chained_comparisons_are_rejected() {
    let src = "ok: bool = 1 < 2 < 3\n";
    let err = parse_source(src).expect_err("expected parse error");
    assert!(err.unsupported);
    assert!(err.message.contains("chained comparisons"));
}

#[test]
fn try_except_is_rejected_as_unsupported() {
    let src = "def f() -> None:\n    try:\n        g()\n    except:\n        pass\n";
    let err = parse_source(src).expect_err("expected parse error");
    assert!(err.unsupported);
    assert!(err.message.contains("try/except"));
}

#[test]
fn starred_parameters_are_rejected() {
    let src = "def f(*args: int) -> None:\n    pass\n";
    let err = parse_source(src).expect_err("expected parse error");
    assert!(err.unsupported);
}

#[test]
fn slices_are_rejected() {
    let src = "def f(s: str) -> str:\n    return s[0:2]\n";
    let err = parse_source(src).expect_err("expected parse error");
    assert!(err.unsupported);
    assert!(err.message.contains("slice"));
}

#[test]
fn multi_clause_comprehensions_are_rejected() {
    let src = "xs: list[int] = [a for a in items for b in others]\n";
    let err = parse_source(src).expect_err("expected parse error");
    assert!(err.unsupported);
}

#[test]
fn pass_attr_comment_attaches_to_next_def() {
    let src = "# #[derive(Serialize)]\n@dataclass\nclass Config:\n    name: str\n";
    let module = parse_source(src).expect("attribute comment should parse");
    let Item::Class(c) = &module.items[0] else {
        panic!("expected class item");
    };
    assert_eq!(c.attrs, vec!["#[derive(Serialize)]".to_string()]);
}

#[test]
fn with_statement_parses() {
    let src = "def f() -> None:\n    with tempfile.TemporaryDirectory() as d:\n        print(d)\n";
    let module = parse_source(src).expect("with should parse");
    let Item::Function(f) = &module.items[0] else {
        panic!("expected function item");
    };
    let Stmt::With(w) = &f.body[0] else {
        panic!("expected with statement");
    };
    assert_eq!(w.target.as_ref().unwrap().node, "d");
}

#[test]
fn docstrings_are_lifted() {
    let src = "\"\"\"module doc\"\"\"\ndef f() -> None:\n    \"fn doc\"\n    pass\n";
    // Triple-quoted strings are not in the lexer subset; plain quotes are.
    let src = src.replace("\"\"\"module doc\"\"\"", "\"module doc\"");
    let module = parse_source(&src).expect("docstrings should parse");
    assert_eq!(module.docstring.as_deref(), Some("module doc"));
    let Item::Function(f) = &module.items[0] else {
        panic!("expected function item");
    };
    assert_eq!(f.docstring.as_deref(), Some("fn doc"));
    assert_eq!(f.body.len(), 1);
}
