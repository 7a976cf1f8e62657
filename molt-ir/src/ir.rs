#![forbid(unsafe_code)]

use molt_ast::Span;
use serde::Serialize;

use crate::ty::Ty;

/// Identity of a typed-IR node. The analyzer keys its annotation table by
/// these ids; the nodes themselves are never mutated after lowering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

#[derive(Clone, Debug, Default)]
pub struct NodeIdGen {
    next: u32,
}

impl NodeIdGen {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn fresh(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModuleIr {
    pub name: String,
    pub imports: Vec<ImportIr>,
    pub classes: Vec<ClassIr>,
    pub functions: Vec<FunctionIr>,
    pub consts: Vec<ConstIr>,
    pub docstring: Option<String>,
}

impl ModuleIr {
    pub fn entry_function(&self) -> Option<&FunctionIr> {
        self.functions.iter().find(|f| f.name == "main")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImportIr {
    pub module: String,
    pub names: Vec<(String, Option<String>)>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConstIr {
    pub id: NodeId,
    #[serde(skip_serializing)]
    pub span: Span,
    pub name: String,
    pub ty: Ty,
    pub value: ExprIr,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionIr {
    pub id: NodeId,
    #[serde(skip_serializing)]
    pub span: Span,
    pub name: String,
    pub params: Vec<ParamIr>,
    pub ret: Option<Ty>,
    pub body: Vec<StmtIr>,
    pub is_async: bool,
    pub is_method: bool,
    pub is_static: bool,
    /// Set when a method assigns through `self`; such methods take the
    /// exclusive receiver form.
    pub modifies_self: bool,
    pub attrs: Vec<String>,
    pub docstring: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParamIr {
    pub id: NodeId,
    #[serde(skip_serializing)]
    pub span: Span,
    pub name: String,
    pub ty: Option<Ty>,
    pub default: Option<ExprIr>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldIr {
    pub name: String,
    pub ty: Ty,
    pub default: Option<ExprIr>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassIr {
    pub id: NodeId,
    #[serde(skip_serializing)]
    pub span: Span,
    pub name: String,
    pub fields: Vec<FieldIr>,
    pub methods: Vec<FunctionIr>,
    pub is_dataclass: bool,
    pub attrs: Vec<String>,
    pub docstring: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StmtIr {
    pub id: NodeId,
    #[serde(skip_serializing)]
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum StmtKind {
    /// Binding or reassignment of a plain name. `declares` marks the first
    /// assignment in scope (emitted as `let`).
    Let {
        name: String,
        ty: Option<Ty>,
        value: ExprIr,
        declares: bool,
    },
    AssignAttr {
        obj: ExprIr,
        attr: String,
        value: ExprIr,
    },
    AssignIndex {
        obj: ExprIr,
        index: ExprIr,
        value: ExprIr,
    },
    /// Two-or-more-name destructuring, e.g. the channel-constructor idiom.
    LetTuple { names: Vec<String>, value: ExprIr },
    Return { value: Option<ExprIr> },
    If {
        cond: ExprIr,
        then_body: Vec<StmtIr>,
        elif_clauses: Vec<(ExprIr, Vec<StmtIr>)>,
        else_body: Vec<StmtIr>,
    },
    While { cond: ExprIr, body: Vec<StmtIr> },
    For {
        targets: Vec<String>,
        iter: ExprIr,
        body: Vec<StmtIr>,
    },
    /// Lexical block holding a scoped resource: the binding acquires at the
    /// top, the closing brace is the release point.
    Scope {
        context: ExprIr,
        binding: Option<String>,
        body: Vec<StmtIr>,
    },
    Raise { exc: Option<ExprIr> },
    Break,
    Continue,
    Pass,
    Expr { expr: ExprIr },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExprIr {
    pub id: NodeId,
    #[serde(skip_serializing)]
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ExprKind {
    NoneLit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    FString(Vec<FStrPart>),
    Name(String),
    Attribute {
        obj: Box<ExprIr>,
        attr: String,
    },
    Subscript {
        obj: Box<ExprIr>,
        index: Box<ExprIr>,
    },
    Call {
        func: String,
        args: Vec<ExprIr>,
        kwargs: Vec<(String, ExprIr)>,
    },
    MethodCall {
        recv: Box<ExprIr>,
        method: String,
        args: Vec<ExprIr>,
        kwargs: Vec<(String, ExprIr)>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<ExprIr>,
    },
    Binary {
        op: BinOp,
        left: Box<ExprIr>,
        right: Box<ExprIr>,
    },
    IfExp {
        cond: Box<ExprIr>,
        then: Box<ExprIr>,
        orelse: Box<ExprIr>,
    },
    List(Vec<ExprIr>),
    Map(Vec<(ExprIr, ExprIr)>),
    Set(Vec<ExprIr>),
    Tuple(Vec<ExprIr>),
    ListComp {
        element: Box<ExprIr>,
        target: String,
        iter: Box<ExprIr>,
        cond: Option<Box<ExprIr>>,
    },
    Await(Box<ExprIr>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum FStrPart {
    Literal(String),
    Interp { expr: ExprIr, spec: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    And,
    Or,

    In,
    NotIn,
    Is,
    IsNot,

    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::In
                | BinOp::NotIn
                | BinOp::Is
                | BinOp::IsNot
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod | BinOp::Pow
        )
    }
}
