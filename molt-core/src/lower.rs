#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::path::Path;

use molt_ast as ast;
use molt_ast::Span;
use molt_ir::{
    BinOp, ClassIr, ConstIr, ExprIr, ExprKind, FStrPart, FieldIr, FunctionIr, ImportIr, ModuleIr,
    NodeIdGen, ParamIr, StmtIr, StmtKind, Ty, UnaryOp,
};
use molt_stubs::ty_from_surface;

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};

const DATACLASS_MARKER: &str = "dataclass";
const STATIC_MARKERS: [&str; 2] = ["staticmethod", "classmethod"];

/// Lower a parsed module into the typed IR.
///
/// Node ids come from a generator shared across the whole invocation so the
/// annotation table can span modules.
pub fn lower_module(
    name: &str,
    path: &Path,
    module: &ast::Module,
    ids: &mut NodeIdGen,
    sink: &mut DiagnosticSink,
) -> ModuleIr {
    let mut lowerer = Lowerer {
        ids,
        sink,
        path,
        locals: HashSet::new(),
    };
    lowerer.module(name, module)
}

struct Lowerer<'a> {
    ids: &'a mut NodeIdGen,
    sink: &'a mut DiagnosticSink,
    path: &'a Path,
    /// Names assigned so far in the current function; drives the
    /// declaration-vs-reassignment flag.
    locals: HashSet<String>,
}

impl<'a> Lowerer<'a> {
    fn module(&mut self, name: &str, module: &ast::Module) -> ModuleIr {
        let mut imports = Vec::new();
        let mut classes = Vec::new();
        let mut functions = Vec::new();
        let mut consts = Vec::new();

        for item in &module.items {
            match item {
                ast::Item::Import(imp) => {
                    imports.push(ImportIr {
                        module: imp.module_path(),
                        names: imp
                            .names
                            .iter()
                            .map(|(n, a)| (n.node.clone(), a.as_ref().map(|x| x.node.clone())))
                            .collect(),
                    });
                }
                ast::Item::Function(f) => {
                    if let Some(d) = f.decorators.first() {
                        self.unsupported(d.span, format!("unsupported decorator '@{}'", d.node));
                        continue;
                    }
                    functions.push(self.function(f, false, false));
                }
                ast::Item::Class(c) => {
                    if let Some(cls) = self.class(c) {
                        classes.push(cls);
                    }
                }
                ast::Item::Stmt(stmt) => {
                    if let Some(c) = self.top_level_stmt(stmt) {
                        consts.push(c);
                    }
                }
            }
        }

        ModuleIr {
            name: name.to_string(),
            imports,
            classes,
            functions,
            consts,
            docstring: module.docstring.clone(),
        }
    }

    /// Top-level statements lower to constants; the runner idioms
    /// (`asyncio.run(main())` and the `__main__` guard) are deleted because
    /// entry selection happens by function name.
    fn top_level_stmt(&mut self, stmt: &ast::Stmt) -> Option<ConstIr> {
        match stmt {
            ast::Stmt::Assign(a) => {
                let ast::AssignTarget::Name(name) = &a.target else {
                    self.unsupported(a.span, "module-level statements are not supported");
                    return None;
                };
                let is_const_name =
                    !name.node.is_empty() && name.node.chars().all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit());
                let Some(annotation) = &a.annotation else {
                    self.unsupported(
                        a.span,
                        "module-level bindings must be annotated constants",
                    );
                    return None;
                };
                let ty = self.lower_type(annotation);
                if !is_const_name || !matches!(ty, Ty::Int | Ty::Float | Ty::Bool | Ty::String) {
                    self.unsupported(
                        a.span,
                        "module-level mutable bindings are not supported; only immutable constants",
                    );
                    return None;
                }
                Some(ConstIr {
                    id: self.ids.fresh(),
                    span: a.span,
                    name: name.node.clone(),
                    ty,
                    value: self.expr(&a.value),
                })
            }
            ast::Stmt::Expr(e) => {
                if is_asyncio_run(e) || is_main_call(e) {
                    return None;
                }
                self.unsupported(e.span, "module-level statements are not supported");
                None
            }
            ast::Stmt::If(i) => {
                if is_main_guard(&i.cond) {
                    return None;
                }
                self.unsupported(i.span, "module-level statements are not supported");
                None
            }
            other => {
                self.unsupported(stmt_span(other), "module-level statements are not supported");
                None
            }
        }
    }

    fn class(&mut self, c: &ast::ClassDef) -> Option<ClassIr> {
        if let Some(base) = c.bases.first() {
            self.unsupported(
                base.span,
                format!(
                    "inheritance is not supported (class '{}' lists a base class)",
                    c.name.node
                ),
            );
            return None;
        }

        let is_dataclass = c.has_decorator(DATACLASS_MARKER);
        for d in &c.decorators {
            if d.node != DATACLASS_MARKER {
                self.unsupported(d.span, format!("unsupported decorator '@{}'", d.node));
            }
        }

        let mut fields: Vec<FieldIr> = c
            .fields
            .iter()
            .map(|f| FieldIr {
                name: f.name.node.clone(),
                ty: self.lower_type(&f.ty),
                default: f.default.as_ref().map(|e| self.expr(e)),
            })
            .collect();

        // Non-dataclass classes derive their shape from `__init__`.
        if let Some(init) = c.methods.iter().find(|m| m.name.node == "__init__") {
            for field in self.fields_from_init(init) {
                if !fields.iter().any(|f| f.name == field.name) {
                    fields.push(field);
                }
            }
        }

        let mut methods = Vec::new();
        for m in &c.methods {
            let is_static = m
                .decorators
                .iter()
                .any(|d| STATIC_MARKERS.contains(&d.node.as_str()));
            for d in &m.decorators {
                if !STATIC_MARKERS.contains(&d.node.as_str()) {
                    self.unsupported(d.span, format!("unsupported decorator '@{}'", d.node));
                }
            }
            methods.push(self.function(m, true, is_static));
        }

        Some(ClassIr {
            id: self.ids.fresh(),
            span: c.span,
            name: c.name.node.clone(),
            fields,
            methods,
            is_dataclass,
            attrs: c.attrs.clone(),
            docstring: c.docstring.clone(),
        })
    }

    /// Collect `self.<attr> = ...` bindings from `__init__`: the field type
    /// is the annotation when present, else the type of a same-named
    /// parameter the value forwards.
    fn fields_from_init(&mut self, init: &ast::FunctionDef) -> Vec<FieldIr> {
        let mut fields = Vec::new();
        for stmt in &init.body {
            let ast::Stmt::Assign(a) = stmt else { continue };
            let ast::AssignTarget::Attribute { obj, attr, .. } = &a.target else {
                continue;
            };
            if !matches!(&obj.kind, ast::ExprKind::Name(n) if n == "self") {
                continue;
            }

            let ty = if let Some(ann) = &a.annotation {
                self.lower_type(ann)
            } else if let ast::ExprKind::Name(value_name) = &a.value.kind {
                match init
                    .params
                    .iter()
                    .find(|p| &p.name.node == value_name)
                    .and_then(|p| p.ty.as_ref())
                {
                    Some(t) => self.lower_type(t),
                    None => {
                        self.sink.error(
                            DiagnosticKind::MissingAnnotation,
                            self.path,
                            a.span,
                            format!("cannot determine the type of field '{}'", attr.node),
                        );
                        Ty::Unknown
                    }
                }
            } else {
                self.sink.error(
                    DiagnosticKind::MissingAnnotation,
                    self.path,
                    a.span,
                    format!(
                        "field '{}' needs an annotation on its assignment in __init__",
                        attr.node
                    ),
                );
                Ty::Unknown
            };

            fields.push(FieldIr {
                name: attr.node.clone(),
                ty,
                default: None,
            });
        }
        fields
    }

    fn function(&mut self, f: &ast::FunctionDef, in_class: bool, is_static: bool) -> FunctionIr {
        let saved = std::mem::take(&mut self.locals);

        let mut params = Vec::new();
        let mut is_method = false;
        for (i, p) in f.params.iter().enumerate() {
            if in_class && !is_static && i == 0 && p.name.node == "self" {
                is_method = true;
                self.locals.insert("self".to_string());
                continue;
            }
            self.locals.insert(p.name.node.clone());
            params.push(ParamIr {
                id: self.ids.fresh(),
                span: p.span,
                name: p.name.node.clone(),
                ty: p.ty.as_ref().map(|t| self.lower_type(t)),
                default: p.default.as_ref().map(|e| self.expr(e)),
            });
        }

        let ret = f.ret.as_ref().map(|t| self.lower_type(t));
        let body = self.block(&f.body);
        let modifies_self = body.iter().any(stmt_modifies_self);

        self.locals = saved;

        FunctionIr {
            id: self.ids.fresh(),
            span: f.span,
            name: f.name.node.clone(),
            params,
            ret,
            body,
            is_async: f.is_async,
            is_method,
            is_static,
            modifies_self,
            attrs: f.attrs.clone(),
            docstring: f.docstring.clone(),
        }
    }

    fn block(&mut self, stmts: &[ast::Stmt]) -> Vec<StmtIr> {
        stmts.iter().filter_map(|s| self.stmt(s)).collect()
    }

    fn stmt(&mut self, stmt: &ast::Stmt) -> Option<StmtIr> {
        let (span, kind) = match stmt {
            ast::Stmt::Assign(a) => (a.span, self.assign(a)?),
            ast::Stmt::AugAssign(a) => (a.span, self.aug_assign(a)?),
            ast::Stmt::TupleAssign(t) => {
                let names: Vec<String> = t.targets.iter().map(|i| i.node.clone()).collect();
                for n in &names {
                    self.locals.insert(n.clone());
                }
                (
                    t.span,
                    StmtKind::LetTuple {
                        names,
                        value: self.expr(&t.value),
                    },
                )
            }
            ast::Stmt::Return(r) => (
                r.span,
                StmtKind::Return {
                    value: r.value.as_ref().map(|e| self.expr(e)),
                },
            ),
            ast::Stmt::If(i) => (
                i.span,
                StmtKind::If {
                    cond: self.expr(&i.cond),
                    then_body: self.block(&i.then_body),
                    elif_clauses: i
                        .elif_clauses
                        .iter()
                        .map(|(c, b)| (self.expr(c), self.block(b)))
                        .collect(),
                    else_body: self.block(&i.else_body),
                },
            ),
            ast::Stmt::While(w) => (
                w.span,
                StmtKind::While {
                    cond: self.expr(&w.cond),
                    body: self.block(&w.body),
                },
            ),
            ast::Stmt::For(f) => {
                let targets: Vec<String> = f.targets.iter().map(|i| i.node.clone()).collect();
                for t in &targets {
                    self.locals.insert(t.clone());
                }
                (
                    f.span,
                    StmtKind::For {
                        targets,
                        iter: self.expr(&f.iter),
                        body: self.block(&f.body),
                    },
                )
            }
            ast::Stmt::With(w) => {
                if let Some(t) = &w.target {
                    self.locals.insert(t.node.clone());
                }
                (
                    w.span,
                    StmtKind::Scope {
                        context: self.expr(&w.context),
                        binding: w.target.as_ref().map(|t| t.node.clone()),
                        body: self.block(&w.body),
                    },
                )
            }
            ast::Stmt::Raise(r) => (
                r.span,
                StmtKind::Raise {
                    exc: r.exc.as_ref().map(|e| self.expr(e)),
                },
            ),
            ast::Stmt::Break { span } => (*span, StmtKind::Break),
            ast::Stmt::Continue { span } => (*span, StmtKind::Continue),
            ast::Stmt::Pass { span } => (*span, StmtKind::Pass),
            ast::Stmt::Expr(e) => (e.span, StmtKind::Expr { expr: self.expr(e) }),
        };

        Some(StmtIr {
            id: self.ids.fresh(),
            span,
            kind,
        })
    }

    fn assign(&mut self, a: &ast::AssignStmt) -> Option<StmtKind> {
        let value = self.expr(&a.value);
        match &a.target {
            ast::AssignTarget::Name(name) => {
                let declares = self.locals.insert(name.node.clone());
                Some(StmtKind::Let {
                    name: name.node.clone(),
                    ty: a.annotation.as_ref().map(|t| self.lower_type(t)),
                    value,
                    declares,
                })
            }
            ast::AssignTarget::Attribute { obj, attr, .. } => Some(StmtKind::AssignAttr {
                obj: self.expr(obj),
                attr: attr.node.clone(),
                value,
            }),
            ast::AssignTarget::Subscript { obj, index, .. } => Some(StmtKind::AssignIndex {
                obj: self.expr(obj),
                index: self.expr(index),
                value,
            }),
        }
    }

    /// `x += e` is rewritten here as a plain assignment of a binary
    /// operation; the emitter folds it back to the compound form.
    fn aug_assign(&mut self, a: &ast::AugAssignStmt) -> Option<StmtKind> {
        let op = lower_binop(a.op);
        let value = self.expr(&a.value);

        match &a.target {
            ast::AssignTarget::Name(name) => {
                if !self.locals.contains(&name.node) {
                    self.sink.error(
                        DiagnosticKind::UnknownSymbol,
                        self.path,
                        name.span,
                        format!("augmented assignment to undefined name '{}'", name.node),
                    );
                }
                let left = ExprIr {
                    id: self.ids.fresh(),
                    span: name.span,
                    kind: ExprKind::Name(name.node.clone()),
                };
                Some(StmtKind::Let {
                    name: name.node.clone(),
                    ty: None,
                    value: ExprIr {
                        id: self.ids.fresh(),
                        span: a.span,
                        kind: ExprKind::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(value),
                        },
                    },
                    declares: false,
                })
            }
            ast::AssignTarget::Attribute { obj, attr, span } => {
                let obj_ir = self.expr(obj);
                let left = ExprIr {
                    id: self.ids.fresh(),
                    span: *span,
                    kind: ExprKind::Attribute {
                        obj: Box::new(obj_ir.clone()),
                        attr: attr.node.clone(),
                    },
                };
                Some(StmtKind::AssignAttr {
                    obj: obj_ir,
                    attr: attr.node.clone(),
                    value: ExprIr {
                        id: self.ids.fresh(),
                        span: a.span,
                        kind: ExprKind::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(value),
                        },
                    },
                })
            }
            ast::AssignTarget::Subscript { span, .. } => {
                self.unsupported(*span, "augmented assignment through subscripts is not supported");
                None
            }
        }
    }

    fn expr(&mut self, e: &ast::Expr) -> ExprIr {
        let kind = match &e.kind {
            ast::ExprKind::NoneLit => ExprKind::NoneLit,
            ast::ExprKind::Bool(b) => ExprKind::Bool(*b),
            ast::ExprKind::Int(n) => ExprKind::Int(*n),
            ast::ExprKind::Float(v) => ExprKind::Float(*v),
            ast::ExprKind::Str(s) => ExprKind::Str(s.clone()),
            ast::ExprKind::FString(parts) => ExprKind::FString(
                parts
                    .iter()
                    .map(|p| match p {
                        ast::FStringPart::Literal(s) => FStrPart::Literal(s.clone()),
                        ast::FStringPart::Interp { expr, spec } => FStrPart::Interp {
                            expr: self.expr(expr),
                            spec: spec.clone(),
                        },
                    })
                    .collect(),
            ),
            ast::ExprKind::Name(n) => ExprKind::Name(n.clone()),
            ast::ExprKind::Attribute { obj, attr } => ExprKind::Attribute {
                obj: Box::new(self.expr(obj)),
                attr: attr.node.clone(),
            },
            ast::ExprKind::Subscript { obj, index } => ExprKind::Subscript {
                obj: Box::new(self.expr(obj)),
                index: Box::new(self.expr(index)),
            },
            ast::ExprKind::Call { func, args, kwargs } => {
                let args: Vec<ExprIr> = args.iter().map(|a| self.expr(a)).collect();
                let kwargs: Vec<(String, ExprIr)> = kwargs
                    .iter()
                    .map(|(k, v)| (k.node.clone(), self.expr(v)))
                    .collect();
                match &func.kind {
                    ast::ExprKind::Name(name) => ExprKind::Call {
                        func: name.clone(),
                        args,
                        kwargs,
                    },
                    ast::ExprKind::Attribute { obj, attr } => ExprKind::MethodCall {
                        recv: Box::new(self.expr(obj)),
                        method: attr.node.clone(),
                        args,
                        kwargs,
                    },
                    _ => {
                        self.unsupported(func.span, "computed call targets are not supported");
                        ExprKind::NoneLit
                    }
                }
            }
            ast::ExprKind::Unary { op, operand } => ExprKind::Unary {
                op: match op {
                    ast::UnaryOp::Neg => UnaryOp::Neg,
                    ast::UnaryOp::Not => UnaryOp::Not,
                },
                operand: Box::new(self.expr(operand)),
            },
            ast::ExprKind::Binary { left, op, right } => ExprKind::Binary {
                op: lower_binop(*op),
                left: Box::new(self.expr(left)),
                right: Box::new(self.expr(right)),
            },
            ast::ExprKind::IfExp { cond, then, orelse } => ExprKind::IfExp {
                cond: Box::new(self.expr(cond)),
                then: Box::new(self.expr(then)),
                orelse: Box::new(self.expr(orelse)),
            },
            ast::ExprKind::List(elems) => {
                ExprKind::List(elems.iter().map(|x| self.expr(x)).collect())
            }
            ast::ExprKind::Dict(pairs) => ExprKind::Map(
                pairs
                    .iter()
                    .map(|(k, v)| (self.expr(k), self.expr(v)))
                    .collect(),
            ),
            ast::ExprKind::Set(elems) => {
                ExprKind::Set(elems.iter().map(|x| self.expr(x)).collect())
            }
            ast::ExprKind::Tuple(elems) => {
                ExprKind::Tuple(elems.iter().map(|x| self.expr(x)).collect())
            }
            ast::ExprKind::ListComp {
                element,
                target,
                iter,
                cond,
            } => {
                self.locals.insert(target.node.clone());
                ExprKind::ListComp {
                    element: Box::new(self.expr(element)),
                    target: target.node.clone(),
                    iter: Box::new(self.expr(iter)),
                    cond: cond.as_ref().map(|c| Box::new(self.expr(c))),
                }
            }
            ast::ExprKind::Await(inner) => ExprKind::Await(Box::new(self.expr(inner))),
        };

        ExprIr {
            id: self.ids.fresh(),
            span: e.span,
            kind,
        }
    }

    fn lower_type(&mut self, t: &ast::TypeExpr) -> Ty {
        match &t.kind {
            ast::TypeExprKind::NoneType => Ty::Unit,
            ast::TypeExprKind::Union(variants) => {
                let lowered: Vec<Ty> = variants.iter().map(|v| self.lower_type(v)).collect();
                let nones = lowered.iter().filter(|t| **t == Ty::Unit).count();
                if nones == 1 && lowered.len() == 2 {
                    if let Some(inner) = lowered.into_iter().find(|t| *t != Ty::Unit) {
                        return Ty::option(inner);
                    }
                }
                self.unsupported(
                    t.span,
                    "only `T | None` unions are supported in annotations",
                );
                Ty::Unknown
            }
            ast::TypeExprKind::Name { path, args } => {
                let lowered: Vec<Ty> = args.iter().map(|a| self.lower_type(a)).collect();
                if path.len() == 1 {
                    match ty_from_surface(&path[0].node, lowered) {
                        Ok(ty) => ty,
                        Err(e) => {
                            self.sink.error(
                                DiagnosticKind::TypeMismatch,
                                self.path,
                                t.span,
                                e.message,
                            );
                            Ty::Unknown
                        }
                    }
                } else {
                    Ty::Named {
                        path: path
                            .iter()
                            .map(|i| i.node.as_str())
                            .collect::<Vec<_>>()
                            .join("."),
                        args: lowered,
                    }
                }
            }
        }
    }

    fn unsupported(&mut self, span: Span, message: impl Into<String>) {
        self.sink.error(
            DiagnosticKind::UnsupportedConstruct,
            self.path,
            span,
            message,
        );
    }
}

fn lower_binop(op: ast::BinOp) -> BinOp {
    match op {
        ast::BinOp::Add => BinOp::Add,
        ast::BinOp::Sub => BinOp::Sub,
        ast::BinOp::Mul => BinOp::Mul,
        ast::BinOp::Div => BinOp::Div,
        ast::BinOp::FloorDiv => BinOp::FloorDiv,
        ast::BinOp::Mod => BinOp::Mod,
        ast::BinOp::Pow => BinOp::Pow,
        ast::BinOp::Eq => BinOp::Eq,
        ast::BinOp::Ne => BinOp::Ne,
        ast::BinOp::Lt => BinOp::Lt,
        ast::BinOp::Le => BinOp::Le,
        ast::BinOp::Gt => BinOp::Gt,
        ast::BinOp::Ge => BinOp::Ge,
        ast::BinOp::And => BinOp::And,
        ast::BinOp::Or => BinOp::Or,
        ast::BinOp::In => BinOp::In,
        ast::BinOp::NotIn => BinOp::NotIn,
        ast::BinOp::Is => BinOp::Is,
        ast::BinOp::IsNot => BinOp::IsNot,
        ast::BinOp::BitAnd => BinOp::BitAnd,
        ast::BinOp::BitOr => BinOp::BitOr,
        ast::BinOp::BitXor => BinOp::BitXor,
        ast::BinOp::Shl => BinOp::Shl,
        ast::BinOp::Shr => BinOp::Shr,
    }
}

fn stmt_span(stmt: &ast::Stmt) -> Span {
    match stmt {
        ast::Stmt::Assign(a) => a.span,
        ast::Stmt::AugAssign(a) => a.span,
        ast::Stmt::TupleAssign(t) => t.span,
        ast::Stmt::Return(r) => r.span,
        ast::Stmt::If(i) => i.span,
        ast::Stmt::While(w) => w.span,
        ast::Stmt::For(f) => f.span,
        ast::Stmt::With(w) => w.span,
        ast::Stmt::Raise(r) => r.span,
        ast::Stmt::Break { span } | ast::Stmt::Continue { span } | ast::Stmt::Pass { span } => {
            *span
        }
        ast::Stmt::Expr(e) => e.span,
    }
}

fn stmt_modifies_self(stmt: &StmtIr) -> bool {
    match &stmt.kind {
        StmtKind::AssignAttr { obj, .. } => {
            matches!(&obj.kind, ExprKind::Name(n) if n == "self")
        }
        StmtKind::If {
            then_body,
            elif_clauses,
            else_body,
            ..
        } => {
            then_body.iter().any(stmt_modifies_self)
                || elif_clauses
                    .iter()
                    .any(|(_, b)| b.iter().any(stmt_modifies_self))
                || else_body.iter().any(stmt_modifies_self)
        }
        StmtKind::While { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::Scope { body, .. } => body.iter().any(stmt_modifies_self),
        _ => false,
    }
}

/// `asyncio.run(...)` at top level.
fn is_asyncio_run(e: &ast::Expr) -> bool {
    let ast::ExprKind::Call { func, .. } = &e.kind else {
        return false;
    };
    let ast::ExprKind::Attribute { obj, attr } = &func.kind else {
        return false;
    };
    attr.node == "run" && matches!(&obj.kind, ast::ExprKind::Name(n) if n == "asyncio")
}

/// A bare `main()` call at top level.
fn is_main_call(e: &ast::Expr) -> bool {
    let ast::ExprKind::Call { func, .. } = &e.kind else {
        return false;
    };
    matches!(&func.kind, ast::ExprKind::Name(n) if n == "main")
}

/// The `if __name__ == "__main__":` runner guard.
fn is_main_guard(cond: &ast::Expr) -> bool {
    let ast::ExprKind::Binary { left, op, right } = &cond.kind else {
        return false;
    };
    if *op != ast::BinOp::Eq {
        return false;
    }
    matches!(&left.kind, ast::ExprKind::Name(n) if n == "__name__")
        && matches!(&right.kind, ast::ExprKind::Str(s) if s == "__main__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use molt_parse::parse_source;
    use std::path::PathBuf;

    fn lower(src: &str) -> (ModuleIr, DiagnosticSink) {
        let ast = parse_source(src).expect("parse failed");
        let mut ids = NodeIdGen::new();
        let mut sink = DiagnosticSink::new();
        let ir = lower_module("demo", &PathBuf::from("demo.py"), &ast, &mut ids, &mut sink);
        (ir, sink)
    }

    #[test]
    fn augmented_assignment_becomes_binary_reassignment() {
        let (ir, sink) = lower("def f() -> int:\n    x: int = 0\n    x += 1\n    return x\n");
        assert!(sink.is_empty());
        let f = &ir.functions[0];
        let StmtKind::Let {
            declares, value, ..
        } = &f.body[1].kind
        else {
            panic!("expected reassignment");
        };
        assert!(!declares);
        assert!(matches!(value.kind, ExprKind::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn first_assignment_declares_later_ones_do_not() {
        let (ir, _) = lower("def f() -> int:\n    x: int = 0\n    x = 1\n    return x\n");
        let f = &ir.functions[0];
        assert!(matches!(&f.body[0].kind, StmtKind::Let { declares: true, .. }));
        assert!(matches!(&f.body[1].kind, StmtKind::Let { declares: false, .. }));
    }

    #[test]
    fn asyncio_run_idiom_is_deleted() {
        let (ir, sink) = lower(
            "async def main() -> None:\n    pass\n\nasyncio.run(main())\n",
        );
        assert!(sink.is_empty());
        assert_eq!(ir.functions.len(), 1);
        assert!(ir.consts.is_empty());
    }

    #[test]
    fn main_guard_is_deleted() {
        let (ir, sink) = lower(
            "def main() -> None:\n    pass\n\nif __name__ == \"__main__\":\n    main()\n",
        );
        assert!(sink.is_empty());
        assert_eq!(ir.functions.len(), 1);
    }

    #[test]
    fn module_constants_lower() {
        let (ir, sink) = lower("MAX_RETRIES: int = 3\n");
        assert!(sink.is_empty());
        assert_eq!(ir.consts.len(), 1);
        assert_eq!(ir.consts[0].name, "MAX_RETRIES");
        assert_eq!(ir.consts[0].ty, Ty::Int);
    }

    #[test]
    fn module_level_mutable_binding_is_rejected() {
        let (_, sink) = lower("cache: list[int] = []\n");
        assert!(sink.has_errors());
    }

    #[test]
    fn inheritance_is_rejected() {
        let (_, sink) = lower("class Child(Base):\n    pass\n");
        assert!(sink.has_errors());
    }

    #[test]
    fn dataclass_fields_and_methods_lower() {
        let (ir, sink) = lower(
            "@dataclass\nclass Point:\n    x: int\n    y: int = 0\n\n    def shift(self, dx: int) -> None:\n        self.x = self.x + dx\n",
        );
        assert!(sink.is_empty());
        let c = &ir.classes[0];
        assert!(c.is_dataclass);
        assert_eq!(c.fields.len(), 2);
        assert!(c.fields[1].default.is_some());
        assert!(c.methods[0].modifies_self);
        assert!(c.methods[0].is_method);
    }

    #[test]
    fn init_without_dataclass_derives_fields() {
        let (ir, sink) = lower(
            "class Counter:\n    def __init__(self, start: int) -> None:\n        self.value = start\n\n    def get(self) -> int:\n        return self.value\n",
        );
        assert!(sink.is_empty());
        let c = &ir.classes[0];
        assert_eq!(c.fields.len(), 1);
        assert_eq!(c.fields[0].name, "value");
        assert_eq!(c.fields[0].ty, Ty::Int);
    }

    #[test]
    fn method_call_and_free_call_lower_differently() {
        let (ir, _) = lower("def f(s: str) -> str:\n    g(1)\n    return s.strip()\n");
        let f = &ir.functions[0];
        let StmtKind::Expr { expr } = &f.body[0].kind else {
            panic!("expected expr stmt")
        };
        assert!(matches!(&expr.kind, ExprKind::Call { func, .. } if func == "g"));
        let StmtKind::Return { value: Some(v) } = &f.body[1].kind else {
            panic!("expected return")
        };
        assert!(matches!(&v.kind, ExprKind::MethodCall { method, .. } if method == "strip"));
    }
}
