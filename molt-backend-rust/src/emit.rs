#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};

use miette::Diagnostic;
use molt_core::Analysis;
use molt_ir::{
    BinOp, ClassIr, ExprIr, ExprKind, FStrPart, FunctionIr, ModuleIr, StmtIr, StmtKind, Ty,
    UnaryOp,
};
use molt_stubs::{expand_template, CrateRequirement, StubRegistry};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("backend error: {message}")]
#[diagnostic(code(molt::backend_rust))]
pub struct EmitError {
    pub message: String,
}

#[derive(Debug, Default)]
pub struct EmitOptions {
    /// Crate name used when the emitted module imports project siblings
    /// from a binary (`use <crate>::module::name;` instead of `crate::`).
    pub crate_name: Option<String>,
    /// Sibling module names within the same project.
    pub local_modules: BTreeSet<String>,
}

#[derive(Debug)]
pub struct EmittedModule {
    pub text: String,
    pub imports: BTreeSet<String>,
    pub requirements: BTreeMap<String, CrateRequirement>,
}

const RUST_KEYWORDS: [&str; 38] = [
    "as", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern", "fn", "for",
    "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return",
    "static", "struct", "super", "trait", "type", "unsafe", "use", "where", "while", "async",
    "await", "union", "box", "priv", "yield",
];

pub fn emit_module(
    module: &ModuleIr,
    analysis: &Analysis,
    registry: &StubRegistry,
    opts: &EmitOptions,
) -> Result<EmittedModule, EmitError> {
    let mut emitter = Emitter {
        analysis,
        registry,
        indent: 0,
        imports: BTreeSet::new(),
        requirements: BTreeMap::new(),
        in_result_fn: false,
        class_names: module.classes.iter().map(|c| c.name.clone()).collect(),
    };

    for imp in &module.imports {
        for (name, alias) in &imp.names {
            let bound = alias.as_deref().unwrap_or(name);
            if bound.chars().next().is_some_and(|c| c.is_uppercase()) {
                emitter.class_names.insert(bound.to_string());
            }
        }
    }

    let mut body = String::new();

    for k in &module.consts {
        let ty = emitter.render_const_ty(&k.ty);
        let value = emitter.const_value(k);
        body.push_str(&format!("pub const {}: {} = {};\n", k.name, ty, value));
    }
    if !module.consts.is_empty() {
        body.push('\n');
    }

    for c in &module.classes {
        emitter.class(&mut body, c);
        body.push('\n');
    }

    for f in &module.functions {
        emitter.function(&mut body, f);
        body.push('\n');
    }

    let mut header = String::new();
    if let Some(doc) = &module.docstring {
        if let Some(first) = doc.lines().next() {
            header.push_str(&format!("//! {first}\n\n"));
        }
    }

    let mut use_lines: BTreeSet<String> = emitter
        .imports
        .iter()
        .map(|i| format!("use {i};"))
        .collect();
    let prefix = opts.crate_name.clone().unwrap_or_else(|| "crate".to_string());
    for imp in &module.imports {
        let root = imp.module.split('.').next().unwrap_or(&imp.module);
        if !opts.local_modules.contains(root) {
            continue;
        }
        for (name, alias) in &imp.names {
            match alias {
                Some(a) => use_lines.insert(format!("use {prefix}::{root}::{name} as {a};")),
                None => use_lines.insert(format!("use {prefix}::{root}::{name};")),
            };
        }
    }
    for line in &use_lines {
        header.push_str(line);
        header.push('\n');
    }
    if !use_lines.is_empty() {
        header.push('\n');
    }

    let mut text = header;
    text.push_str(body.trim_end());
    text.push('\n');

    Ok(EmittedModule {
        text,
        imports: emitter.imports,
        requirements: emitter.requirements,
    })
}

struct Emitter<'a> {
    analysis: &'a Analysis,
    registry: &'a StubRegistry,
    indent: usize,
    imports: BTreeSet<String>,
    requirements: BTreeMap<String, CrateRequirement>,
    in_result_fn: bool,
    class_names: HashSet<String>,
}

impl<'a> Emitter<'a> {
    fn pad(&self) -> String {
        "    ".repeat(self.indent)
    }

    fn record_requirement(&mut self, name: &str, version: &str, features: &[&str]) {
        let req = CrateRequirement {
            name: name.to_string(),
            version: version.to_string(),
            features: features.iter().map(|f| f.to_string()).collect(),
        };
        self.requirements
            .entry(req.name.clone())
            .and_modify(|r| r.merge(&req))
            .or_insert(req);
    }

    // ---- types ----

    fn render_ty(&mut self, ty: &Ty) -> String {
        match ty {
            Ty::Bool => "bool".to_string(),
            Ty::Int => "i64".to_string(),
            Ty::Float => "f64".to_string(),
            Ty::Unit | Ty::Never => "()".to_string(),
            Ty::Str => "&str".to_string(),
            Ty::String => "String".to_string(),
            Ty::List(t) => format!("Vec<{}>", self.render_ty(t)),
            Ty::Map(k, v) => {
                self.imports.insert("std::collections::HashMap".to_string());
                format!("HashMap<{}, {}>", self.render_ty(k), self.render_ty(v))
            }
            Ty::Set(t) => {
                self.imports.insert("std::collections::HashSet".to_string());
                format!("HashSet<{}>", self.render_ty(t))
            }
            Ty::Tuple(ts) => {
                let inner: Vec<String> = ts.iter().map(|t| self.render_ty(t)).collect();
                format!("({})", inner.join(", "))
            }
            Ty::Option(t) => format!("Option<{}>", self.render_ty(t)),
            Ty::Result(ok, err) => {
                format!("Result<{}, {}>", self.render_ty(ok), self.render_ty(err))
            }
            Ty::Named { path, args } => {
                let base = match self.registry.lookup_type(path) {
                    Some(mapping) => mapping.rust,
                    None => path.clone(),
                };
                if args.is_empty() {
                    base
                } else {
                    let inner: Vec<String> = args.iter().map(|t| self.render_ty(t)).collect();
                    format!("{}<{}>", base, inner.join(", "))
                }
            }
            Ty::Function { params, ret, .. } => {
                let ps: Vec<String> = params.iter().map(|t| self.render_ty(t)).collect();
                format!("fn({}) -> {}", ps.join(", "), self.render_ty(ret))
            }
            Ty::Shared(t) => format!("std::sync::Arc<{}>", self.render_ty(t)),
            Ty::Guarded(t) => {
                self.record_requirement("tokio", "1", &["full"]);
                format!("tokio::sync::Mutex<{}>", self.render_ty(t))
            }
            Ty::Unknown => "()".to_string(),
        }
    }

    fn render_const_ty(&mut self, ty: &Ty) -> String {
        match ty {
            Ty::String => "&str".to_string(),
            other => self.render_ty(other),
        }
    }

    fn const_value(&mut self, k: &molt_ir::ConstIr) -> String {
        // Constants keep the borrowed form; strip the owning conversion.
        strip_owned(&self.expr(&k.value))
    }

    // ---- items ----

    fn class(&mut self, out: &mut String, c: &ClassIr) {
        let has_derive_attr = c.attrs.iter().any(|a| a.contains("#[derive("));
        for attr in &c.attrs {
            out.push_str(attr);
            out.push('\n');
        }
        if let Some(doc) = &c.docstring {
            if let Some(first) = doc.lines().next() {
                out.push_str(&format!("/// {first}\n"));
            }
        }
        if !has_derive_attr {
            out.push_str("#[derive(Debug, Clone)]\n");
        }

        out.push_str(&format!("pub struct {} {{\n", c.name));
        for field in &c.fields {
            let ty = self.render_ty(&field.ty);
            out.push_str(&format!("    pub {}: {},\n", escape_ident(&field.name), ty));
        }
        out.push_str("}\n\n");

        let has_init = c.methods.iter().any(|m| m.name == "__init__");
        if c.methods.is_empty() && !(c.is_dataclass && !c.fields.is_empty()) {
            return;
        }

        out.push_str(&format!("impl {} {{\n", c.name));
        self.indent += 1;

        if c.is_dataclass && !has_init && !c.fields.is_empty() {
            self.dataclass_ctor(out, c);
            out.push('\n');
        }

        for m in &c.methods {
            self.method(out, m);
            out.push('\n');
        }

        self.indent -= 1;
        if out.ends_with("\n\n") {
            out.pop();
        }
        out.push_str("}\n");
    }

    /// Synthetic constructor for the dataclass marker: one parameter per
    /// field, defaulted fields taking the optional form.
    fn dataclass_ctor(&mut self, out: &mut String, c: &ClassIr) {
        let pad = self.pad();
        let mut params = Vec::new();
        for field in &c.fields {
            let ty = if field.default.is_some() {
                format!("Option<{}>", self.render_ty(&field.ty))
            } else {
                self.render_ty(&field.ty)
            };
            params.push(format!("{}: {}", escape_ident(&field.name), ty));
        }
        out.push_str(&format!("{pad}pub fn new({}) -> Self {{\n", params.join(", ")));
        out.push_str(&format!("{pad}    Self {{\n"));
        for field in &c.fields {
            let name = escape_ident(&field.name);
            match &field.default {
                Some(default) => {
                    let d = self.expr(default);
                    out.push_str(&format!("{pad}        {name}: {name}.unwrap_or({d}),\n"));
                }
                None => out.push_str(&format!("{pad}        {name},\n")),
            }
        }
        out.push_str(&format!("{pad}    }}\n"));
        out.push_str(&format!("{pad}}}\n"));
    }

    fn method(&mut self, out: &mut String, m: &FunctionIr) {
        let pad = self.pad();
        for attr in &m.attrs {
            out.push_str(&format!("{pad}{attr}\n"));
        }
        if let Some(doc) = &m.docstring {
            if let Some(first) = doc.lines().next() {
                out.push_str(&format!("{pad}/// {first}\n"));
            }
        }

        let is_ctor = m.name == "__init__";
        let name = if is_ctor {
            "new".to_string()
        } else {
            escape_ident(&m.name)
        };

        let mut params = Vec::new();
        if !is_ctor && m.is_method {
            params.push(if m.modifies_self {
                "&mut self".to_string()
            } else {
                "&self".to_string()
            });
        }
        for p in &m.params {
            let ty = match &p.ty {
                Some(t) => self.render_ty(t),
                None => "()".to_string(),
            };
            params.push(format!("{}: {}", escape_ident(&p.name), ty));
        }

        let ret = if is_ctor {
            " -> Self".to_string()
        } else {
            self.ret_suffix(&m.ret)
        };

        let asyncness = if m.is_async { "async " } else { "" };
        out.push_str(&format!(
            "{pad}pub {asyncness}fn {name}({}){ret} {{\n",
            params.join(", ")
        ));

        if is_ctor {
            self.indent += 1;
            let inner = self.pad();
            out.push_str(&format!("{inner}Self {{\n"));
            for stmt in &m.body {
                if let StmtKind::AssignAttr { obj, attr, value } = &stmt.kind {
                    if matches!(&obj.kind, ExprKind::Name(n) if n == "self") {
                        let v = self.expr(value);
                        let field = escape_ident(attr);
                        if v == field {
                            out.push_str(&format!("{inner}    {field},\n"));
                        } else {
                            out.push_str(&format!("{inner}    {field}: {v},\n"));
                        }
                    }
                }
            }
            out.push_str(&format!("{inner}}}\n"));
            self.indent -= 1;
        } else {
            let saved = self.in_result_fn;
            self.in_result_fn = matches!(m.ret, Some(Ty::Result(..)));
            self.indent += 1;
            self.body(out, &m.body);
            self.indent -= 1;
            self.in_result_fn = saved;
        }

        out.push_str(&format!("{pad}}}\n"));
    }

    fn function(&mut self, out: &mut String, f: &FunctionIr) {
        for attr in &f.attrs {
            out.push_str(attr);
            out.push('\n');
        }
        if let Some(doc) = &f.docstring {
            if let Some(first) = doc.lines().next() {
                out.push_str(&format!("/// {first}\n"));
            }
        }

        // Async entry: attach the runtime attribute unless a pass-through
        // attribute already supplies a main-entry form.
        if f.name == "main" && f.is_async {
            let has_entry_attr = f.attrs.iter().any(|a| a.contains("::main"));
            if !has_entry_attr {
                out.push_str("#[tokio::main]\n");
                self.record_requirement("tokio", "1", &["full"]);
            }
        }

        let mut params = Vec::new();
        for p in &f.params {
            let ty = match &p.ty {
                Some(t) => self.render_ty(t),
                None => "()".to_string(),
            };
            params.push(format!("{}: {}", escape_ident(&p.name), ty));
        }

        let ret = self.ret_suffix(&f.ret);
        let asyncness = if f.is_async { "async " } else { "" };
        out.push_str(&format!(
            "pub {asyncness}fn {}({}){ret} {{\n",
            escape_ident(&f.name),
            params.join(", ")
        ));

        let saved = self.in_result_fn;
        self.in_result_fn = matches!(f.ret, Some(Ty::Result(..)));
        self.indent += 1;
        self.body(out, &f.body);
        self.indent -= 1;
        self.in_result_fn = saved;

        out.push_str("}\n");
    }

    fn ret_suffix(&mut self, ret: &Option<Ty>) -> String {
        match ret {
            Some(Ty::Unit) | None => String::new(),
            Some(t) => format!(" -> {}", self.render_ty(t)),
        }
    }

    // ---- statements ----

    fn body(&mut self, out: &mut String, stmts: &[StmtIr]) {
        let last = stmts.len().saturating_sub(1);
        for (i, stmt) in stmts.iter().enumerate() {
            self.stmt(out, stmt, i == last);
        }
    }

    fn block(&mut self, out: &mut String, stmts: &[StmtIr]) {
        for stmt in stmts {
            self.stmt(out, stmt, false);
        }
    }

    fn stmt(&mut self, out: &mut String, stmt: &StmtIr, is_last: bool) {
        let pad = self.pad();
        match &stmt.kind {
            StmtKind::Let {
                name,
                ty,
                value,
                declares,
            } => {
                let mut v = self.expr(value);
                if self.analysis.len_casts.contains(&value.id) {
                    v.push_str(" as i64");
                }
                let name = escape_ident(name);
                if *declares {
                    let mutability = if self.analysis.mutable_bindings.contains(&stmt.id) {
                        "mut "
                    } else {
                        ""
                    };
                    match ty {
                        Some(t) => {
                            let rendered = self.render_ty(t);
                            out.push_str(&format!(
                                "{pad}let {mutability}{name}: {rendered} = {v};\n"
                            ));
                        }
                        None => {
                            out.push_str(&format!("{pad}let {mutability}{name} = {v};\n"));
                        }
                    }
                } else if let Some(line) = self.compound_fold(&name, value) {
                    out.push_str(&format!("{pad}{line}\n"));
                } else {
                    out.push_str(&format!("{pad}{name} = {v};\n"));
                }
            }
            StmtKind::LetTuple { names, value } => {
                let v = self.expr(value);
                let flags = self.analysis.tuple_mutable.get(&stmt.id);
                let pattern: Vec<String> = names
                    .iter()
                    .enumerate()
                    .map(|(i, n)| {
                        let mutable = flags.map(|f| f.get(i).copied().unwrap_or(false)).unwrap_or(false);
                        if mutable {
                            format!("mut {}", escape_ident(n))
                        } else {
                            escape_ident(n)
                        }
                    })
                    .collect();
                out.push_str(&format!("{pad}let ({}) = {v};\n", pattern.join(", ")));
            }
            StmtKind::AssignAttr { obj, attr, value } => {
                let target = format!("{}.{}", self.expr(obj), escape_ident(attr));
                if let Some(line) = self.compound_fold(&target, value) {
                    out.push_str(&format!("{pad}{line}\n"));
                } else {
                    let v = self.expr(value);
                    out.push_str(&format!("{pad}{target} = {v};\n"));
                }
            }
            StmtKind::AssignIndex { obj, index, value } => {
                let o = self.expr(obj);
                let v = self.expr(value);
                match self.analysis.ty(obj.id) {
                    Ty::Map(..) => {
                        out.push_str(&format!("{pad}{o}.insert({}, {v});\n", self.expr(index)));
                    }
                    _ => {
                        let idx = self.index_expr(index);
                        out.push_str(&format!("{pad}{o}[{idx}] = {v};\n"));
                    }
                }
            }
            StmtKind::Return { value } => match value {
                Some(v) => {
                    let s = self.expr(v);
                    if is_last {
                        out.push_str(&format!("{pad}{s}\n"));
                    } else {
                        out.push_str(&format!("{pad}return {s};\n"));
                    }
                }
                None => {
                    if !is_last {
                        out.push_str(&format!("{pad}return;\n"));
                    }
                }
            },
            StmtKind::If {
                cond,
                then_body,
                elif_clauses,
                else_body,
            } => {
                let c = self.expr(cond);
                out.push_str(&format!("{pad}if {c} {{\n"));
                self.indent += 1;
                self.block(out, then_body);
                self.indent -= 1;
                for (ec, eb) in elif_clauses {
                    let c = self.expr(ec);
                    out.push_str(&format!("{pad}}} else if {c} {{\n"));
                    self.indent += 1;
                    self.block(out, eb);
                    self.indent -= 1;
                }
                if !else_body.is_empty() {
                    out.push_str(&format!("{pad}}} else {{\n"));
                    self.indent += 1;
                    self.block(out, else_body);
                    self.indent -= 1;
                }
                out.push_str(&format!("{pad}}}\n"));
            }
            StmtKind::While { cond, body } => {
                let c = self.expr(cond);
                out.push_str(&format!("{pad}while {c} {{\n"));
                self.indent += 1;
                self.block(out, body);
                self.indent -= 1;
                out.push_str(&format!("{pad}}}\n"));
            }
            StmtKind::For {
                targets,
                iter,
                body,
            } => {
                let pattern = if targets.len() == 1 {
                    escape_ident(&targets[0])
                } else {
                    format!(
                        "({})",
                        targets
                            .iter()
                            .map(|t| escape_ident(t))
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                };
                let it = self.for_iter(iter, targets.len());
                out.push_str(&format!("{pad}for {pattern} in {it} {{\n"));
                self.indent += 1;
                self.block(out, body);
                self.indent -= 1;
                out.push_str(&format!("{pad}}}\n"));
            }
            StmtKind::Scope {
                context,
                binding,
                body,
            } => self.scope(out, stmt, context, binding.as_deref(), body),
            StmtKind::Raise { exc } => {
                let value = match exc {
                    Some(e) => match &e.kind {
                        ExprKind::Call { func, args, .. } => match args.first() {
                            Some(msg) => self.expr(msg),
                            None => format!("\"{}\".to_string()", escape_string(func)),
                        },
                        _ => self.expr(e),
                    },
                    None => "\"error\".to_string()".to_string(),
                };
                out.push_str(&format!("{pad}return Err({value});\n"));
            }
            StmtKind::Break => out.push_str(&format!("{pad}break;\n")),
            StmtKind::Continue => out.push_str(&format!("{pad}continue;\n")),
            StmtKind::Pass => {}
            StmtKind::Expr { expr } => {
                let s = self.expr(expr);
                out.push_str(&format!("{pad}{s};\n"));
            }
        }
    }

    /// `x = x op y` folds back to `x op= y`.
    fn compound_fold(&mut self, target: &str, value: &ExprIr) -> Option<String> {
        let ExprKind::Binary { op, left, right } = &value.kind else {
            return None;
        };
        let op_str = match op {
            BinOp::Add => "+=",
            BinOp::Sub => "-=",
            BinOp::Mul => "*=",
            BinOp::Div => "/=",
            BinOp::Mod => "%=",
            BinOp::BitAnd => "&=",
            BinOp::BitOr => "|=",
            BinOp::BitXor => "^=",
            BinOp::Shl => "<<=",
            BinOp::Shr => ">>=",
            _ => return None,
        };
        let lhs = self.expr(left);
        if lhs != target {
            return None;
        }
        // String accumulation folds to push_str instead.
        if *op == BinOp::Add && self.analysis.ty(left.id).is_stringy() {
            let rhs = self.expr(right);
            return Some(format!("{target}.push_str(&{rhs});"));
        }
        let rhs = self.expr(right);
        Some(format!("{target} {op_str} {rhs};"))
    }

    fn scope(
        &mut self,
        out: &mut String,
        _stmt: &StmtIr,
        context: &ExprIr,
        binding: Option<&str>,
        body: &[StmtIr],
    ) {
        let pad = self.pad();
        out.push_str(&format!("{pad}{{\n"));
        self.indent += 1;
        let inner = self.pad();

        let ct = self.analysis.ty(context.id);
        let bind_template = self.scoped_bind_template(context);
        // Only a mutex (possibly behind the shared pointer) is lockable; a
        // bare shared pointer has nothing to lock.
        let lockable = matches!(&ct, Ty::Guarded(_))
            || matches!(&ct, Ty::Shared(inner) if matches!(&**inner, Ty::Guarded(_)));

        if let Some(template) = &bind_template {
            let acquired = self.expr(context);
            out.push_str(&format!("{inner}let _scope = {acquired};\n"));
            if let Some(name) = binding {
                let bound = template.replace("{ctx}", "_scope");
                out.push_str(&format!("{inner}let {} = {bound};\n", escape_ident(name)));
            }
        } else if lockable {
            let guarded = self.expr(context);
            let name = binding.map(escape_ident).unwrap_or_else(|| "_guard".to_string());
            out.push_str(&format!("{inner}let {name} = {guarded}.lock().await;\n"));
        } else {
            let acquired = self.expr(context);
            let name = binding.map(escape_ident).unwrap_or_else(|| "_ctx".to_string());
            out.push_str(&format!("{inner}let {name} = {acquired};\n"));
        }

        self.block(out, body);
        self.indent -= 1;
        out.push_str(&format!("{pad}}}\n"));
    }

    fn scoped_bind_template(&mut self, context: &ExprIr) -> Option<String> {
        let ExprKind::MethodCall { recv, method, .. } = &context.kind else {
            return None;
        };
        let ExprKind::Name(n) = &recv.kind else {
            return None;
        };
        self.registry
            .lookup_callable(&format!("{n}.{method}"))
            .and_then(|m| m.bind_template)
    }

    // ---- expressions ----

    fn expr(&mut self, e: &ExprIr) -> String {
        let mut s = self.expr_inner(e);
        if self.analysis.propagation.contains(&e.id) {
            s.push('?');
        }
        if self.analysis.some_wraps.contains(&e.id) {
            s = format!("Some({s})");
        }
        s
    }

    fn expr_inner(&mut self, e: &ExprIr) -> String {
        match &e.kind {
            ExprKind::NoneLit => "None".to_string(),
            ExprKind::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            ExprKind::Int(n) => n.to_string(),
            ExprKind::Float(v) => {
                let s = v.to_string();
                if s.contains('.') || s.contains('e') {
                    s
                } else {
                    format!("{s}.0")
                }
            }
            ExprKind::Str(s) => format!("\"{}\".to_string()", escape_string(s)),
            ExprKind::FString(parts) => self.fstring(parts),
            ExprKind::Name(n) => escape_ident(n),
            ExprKind::Attribute { obj, attr } => {
                if let ExprKind::Name(n) = &obj.kind {
                    if self.analysis.ty(obj.id) == Ty::Unit {
                        if let Some(mapping) =
                            self.registry.lookup_callable(&format!("{n}.{attr}"))
                        {
                            for imp in &mapping.rust_imports {
                                self.imports.insert(imp.clone());
                            }
                            return expand_template(&mapping.rust_code, None, &[]);
                        }
                    }
                }
                format!("{}.{}", self.expr(obj), escape_ident(attr))
            }
            ExprKind::Subscript { obj, index } => {
                let o = self.expr(obj);
                match self.analysis.ty(obj.id) {
                    Ty::Tuple(_) => {
                        if let ExprKind::Int(n) = index.kind {
                            return format!("{o}.{n}");
                        }
                        format!("{o}[{}]", self.expr(index))
                    }
                    Ty::Map(..) => {
                        let k = self.expr(index);
                        match &index.kind {
                            ExprKind::Str(_) => format!("{o}[{}]", strip_owned(&k)),
                            _ => format!("{o}[&{k}]"),
                        }
                    }
                    _ => {
                        let idx = self.index_expr(index);
                        format!("{o}[{idx}]")
                    }
                }
            }
            ExprKind::Call { func, args, .. } => self.call(e, func, args),
            ExprKind::MethodCall {
                recv, method, args, ..
            } => self.method_call(e, recv, method, args),
            ExprKind::Unary { op, operand } => {
                let inner = self.paren_expr(operand);
                match op {
                    UnaryOp::Neg => format!("-{inner}"),
                    UnaryOp::Not => format!("!{inner}"),
                }
            }
            ExprKind::Binary { op, left, right } => self.binary(e, *op, left, right),
            ExprKind::IfExp { cond, then, orelse } => {
                let c = self.expr(cond);
                let t = self.expr(then);
                let o = self.expr(orelse);
                format!("if {c} {{ {t} }} else {{ {o} }}")
            }
            ExprKind::List(elems) => {
                let inner: Vec<String> = elems.iter().map(|x| self.expr(x)).collect();
                format!("vec![{}]", inner.join(", "))
            }
            ExprKind::Map(pairs) => {
                self.imports.insert("std::collections::HashMap".to_string());
                if pairs.is_empty() {
                    return "HashMap::new()".to_string();
                }
                let inner: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("({}, {})", self.expr(k), self.expr(v)))
                    .collect();
                format!("HashMap::from([{}])", inner.join(", "))
            }
            ExprKind::Set(elems) => {
                self.imports.insert("std::collections::HashSet".to_string());
                if elems.is_empty() {
                    return "HashSet::new()".to_string();
                }
                let inner: Vec<String> = elems.iter().map(|x| self.expr(x)).collect();
                format!("HashSet::from([{}])", inner.join(", "))
            }
            ExprKind::Tuple(elems) => {
                let inner: Vec<String> = elems.iter().map(|x| self.expr(x)).collect();
                format!("({})", inner.join(", "))
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                cond,
            } => {
                let it = self.expr(iter);
                let t = escape_ident(target);
                let el = self.expr(element);
                let mut s = format!("{it}.iter()");
                if let Some(c) = cond {
                    let cs = self.expr(c);
                    s.push_str(&format!(".filter(|{t}| {cs})"));
                }
                s.push_str(&format!(".map(|{t}| {el}).collect::<Vec<_>>()"));
                s
            }
            ExprKind::Await(inner) => {
                format!("{}.await", self.expr_inner(inner))
            }
        }
    }

    fn index_expr(&mut self, index: &ExprIr) -> String {
        let idx = self.expr(index);
        if self.analysis.index_casts.contains(&index.id) {
            if matches!(index.kind, ExprKind::Name(_) | ExprKind::Int(_)) {
                format!("{idx} as usize")
            } else {
                format!("({idx}) as usize")
            }
        } else {
            idx
        }
    }

    /// Loop-iterator form: mappings iterate keys with a single target and
    /// entries with two.
    fn for_iter(&mut self, iter: &ExprIr, targets: usize) -> String {
        if targets == 1 {
            if let Ty::Map(..) = self.analysis.ty(iter.id) {
                let s = self.expr(iter);
                return format!("{s}.keys()");
            }
        }
        self.iter_expr(iter)
    }

    fn iter_expr(&mut self, iter: &ExprIr) -> String {
        if let ExprKind::Call { func, args, .. } = &iter.kind {
            if func == "range" {
                let parts: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                return match parts.len() {
                    1 => format!("0..{}", parts[0]),
                    2 => format!("{}..{}", parts[0], parts[1]),
                    _ => format!("({}..{}).step_by({} as usize)", parts[0], parts[1], parts[2]),
                };
            }
        }
        let ty = self.analysis.ty(iter.id);
        let s = self.expr(iter);
        match (&iter.kind, &ty) {
            (ExprKind::Name(_), Ty::List(_) | Ty::Set(_) | Ty::Map(..)) => format!("&{s}"),
            _ => s,
        }
    }

    fn fstring(&mut self, parts: &[FStrPart]) -> String {
        let mut template = String::new();
        let mut args: Vec<String> = Vec::new();

        for part in parts {
            match part {
                FStrPart::Literal(s) => {
                    template.push_str(&escape_string(s).replace('{', "{{").replace('}', "}}"));
                }
                FStrPart::Interp { expr, spec } => {
                    if spec.is_empty() {
                        template.push_str("{}");
                    } else {
                        template.push_str(&format!("{{:{spec}}}"));
                    }
                    args.push(self.expr(expr));
                }
            }
        }

        if args.is_empty() {
            format!("\"{template}\".to_string()")
        } else {
            format!("format!(\"{template}\", {})", args.join(", "))
        }
    }

    fn call(&mut self, e: &ExprIr, func: &str, args: &[ExprIr]) -> String {
        match func {
            "print" => return self.print_call(args),
            "len" => {
                if let Some(a) = args.first() {
                    return format!("{}.len()", self.expr(a));
                }
                return "0".to_string();
            }
            "str" => {
                if let Some(a) = args.first() {
                    let s = self.expr(a);
                    if s.ends_with(".to_string()") {
                        return s;
                    }
                    return format!("{s}.to_string()");
                }
            }
            "int" => {
                if let Some(a) = args.first() {
                    let s = self.expr(a);
                    return match self.analysis.ty(a.id) {
                        Ty::String | Ty::Str => {
                            let call = format!("{s}.parse::<i64>()");
                            if self.in_result_fn {
                                format!("{call}.map_err(|e| e.to_string())?")
                            } else {
                                format!("{call}.unwrap_or(0)")
                            }
                        }
                        _ => format!("{} as i64", paren(&s)),
                    };
                }
            }
            "float" => {
                if let Some(a) = args.first() {
                    let s = self.expr(a);
                    return match self.analysis.ty(a.id) {
                        Ty::String | Ty::Str => format!("{s}.parse::<f64>().unwrap_or(0.0)"),
                        _ => format!("{} as f64", paren(&s)),
                    };
                }
            }
            "Ok" | "Err" | "Some" => {
                let inner: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                return format!("{func}({})", inner.join(", "));
            }
            "Arc" => {
                if let Some(a) = args.first() {
                    return format!("std::sync::Arc::new({})", self.expr(a));
                }
            }
            "Mutex" => {
                if let Some(a) = args.first() {
                    self.record_requirement("tokio", "1", &["full"]);
                    return format!("tokio::sync::Mutex::new({})", self.expr(a));
                }
            }
            _ => {}
        }

        let rendered: Vec<String> = args.iter().map(|a| self.expr(a)).collect();

        if self.class_names.contains(func) {
            return format!("{func}::new({})", rendered.join(", "));
        }

        if let Some(mapping) = self.registry.lookup_callable(func) {
            return self.stub_expansion(&mapping.rust_code, &mapping.rust_imports, None, &rendered, mapping.needs_result, e);
        }

        format!("{}({})", escape_ident(func), rendered.join(", "))
    }

    fn print_call(&mut self, args: &[ExprIr]) -> String {
        let Some(arg) = args.first() else {
            return "println!()".to_string();
        };
        match &arg.kind {
            ExprKind::Str(s) => format!("println!(\"{}\")", escape_string(s)),
            ExprKind::FString(parts) => {
                let formatted = self.fstring(parts);
                if let Some(inner) = formatted.strip_prefix("format!(") {
                    format!("println!({}", inner)
                } else {
                    // Interpolation-free f-string folded to a plain literal.
                    format!("println!(\"{}\")", trim_literal(&formatted))
                }
            }
            _ => {
                let s = self.expr(arg);
                format!("println!(\"{{}}\", {})", strip_owned(&s))
            }
        }
    }

    fn stub_expansion(
        &mut self,
        template: &str,
        imports: &[String],
        receiver: Option<&str>,
        args: &[String],
        needs_result: bool,
        _at: &ExprIr,
    ) -> String {
        for imp in imports {
            self.imports.insert(imp.clone());
        }
        let mut s = expand_template(template, receiver, args);
        if needs_result {
            if self.in_result_fn {
                s = format!("{s}.map_err(|e| e.to_string())?");
            } else {
                s.push_str(".unwrap()");
            }
        }
        s
    }

    fn method_call(&mut self, e: &ExprIr, recv: &ExprIr, method: &str, args: &[ExprIr]) -> String {
        // Qualified call through a stubbed namespace or prefix-style
        // Result/Option helpers.
        if let ExprKind::Name(n) = &recv.kind {
            if n == "Result" || n == "Option" {
                if let Some(s) = self.result_helper(method, args) {
                    return s;
                }
            }
            if self.analysis.ty(recv.id) == Ty::Unit {
                if let Some(mapping) = self.registry.lookup_callable(&format!("{n}.{method}")) {
                    let rendered: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                    return self.stub_expansion(
                        &mapping.rust_code,
                        &mapping.rust_imports,
                        None,
                        &rendered,
                        mapping.needs_result,
                        e,
                    );
                }
            }
        }

        let recv_ty = self.analysis.ty(recv.id);
        let obj = self.expr(recv);
        let rendered: Vec<String> = args.iter().map(|a| self.expr(a)).collect();

        if recv_ty.is_stringy() {
            // Read-only receivers keep the borrowed literal form.
            let recv_str = strip_owned(&obj);
            if let Some(s) = self.string_method(&recv_str, method, &rendered) {
                return s;
            }
        }

        match (&recv_ty, method) {
            (Ty::List(_), "append") => return format!("{obj}.push({})", rendered.join(", ")),
            (Ty::List(_), "extend") => return format!("{obj}.extend({})", rendered.join(", ")),
            (Ty::List(_), "pop") => return format!("{obj}.pop()"),
            (Ty::List(_), "insert") => {
                let idx = self.index_expr(&args[0]);
                return format!("{obj}.insert({idx}, {})", rendered[1]);
            }
            (Ty::List(_), "remove") => {
                let needle = &rendered[0];
                return format!("{obj}.retain(|v| v != &{needle})");
            }
            (Ty::List(_), "clear") | (Ty::Set(_), "clear") | (Ty::Map(..), "clear") => {
                return format!("{obj}.clear()");
            }
            (Ty::Set(_), "add") => return format!("{obj}.insert({})", rendered.join(", ")),
            (Ty::Set(_), "remove") => return format!("{obj}.remove(&{})", rendered[0]),
            (Ty::Map(..), "get") => {
                let key = borrow_key(&rendered[0]);
                return match rendered.len() {
                    1 => format!("{obj}.get({key}).cloned()"),
                    _ => format!("{obj}.get({key}).cloned().unwrap_or({})", rendered[1]),
                };
            }
            (Ty::Map(..), "keys") => return format!("{obj}.keys()"),
            (Ty::Map(..), "values") => return format!("{obj}.values()"),
            (Ty::Map(..), "items") => return format!("{obj}.iter()"),
            (Ty::Guarded(_), "lock") => return format!("{obj}.lock().await"),
            (Ty::Named { path, .. }, _) => {
                let path = path.clone();
                if let Some(mapping) = self.registry.lookup_method(&path, method) {
                    return self.stub_expansion(
                        &mapping.rust_code,
                        &mapping.rust_imports,
                        Some(&obj),
                        &rendered,
                        mapping.needs_result,
                        e,
                    );
                }
            }
            _ => {}
        }

        format!("{obj}.{}({})", escape_ident(method), rendered.join(", "))
    }

    fn string_method(&mut self, obj: &str, method: &str, args: &[String]) -> Option<String> {
        let s = match (method, args.len()) {
            ("upper", 0) => format!("{obj}.to_uppercase()"),
            ("lower", 0) => format!("{obj}.to_lowercase()"),
            ("strip", 0) => format!("{obj}.trim().to_string()"),
            ("startswith", 1) => format!("{obj}.starts_with({})", borrow_str(&args[0])),
            ("endswith", 1) => format!("{obj}.ends_with({})", borrow_str(&args[0])),
            ("split", 0) => {
                format!("{obj}.split_whitespace().map(|s| s.to_string()).collect::<Vec<String>>()")
            }
            ("split", 1) => format!(
                "{obj}.split({}).map(|s| s.to_string()).collect::<Vec<String>>()",
                borrow_str(&args[0])
            ),
            ("join", 1) => format!("{}.join({})", args[0], borrow_str(obj)),
            ("replace", 2) => format!(
                "{obj}.replace({}, {})",
                borrow_str(&args[0]),
                borrow_str(&args[1])
            ),
            ("find", 1) => format!(
                "{obj}.find({}).map(|i| i as i64).unwrap_or(-1)",
                borrow_str(&args[0])
            ),
            ("isdigit", 0) => format!("{obj}.chars().all(|c| c.is_ascii_digit())"),
            ("isalpha", 0) => format!("{obj}.chars().all(|c| c.is_alphabetic())"),
            ("isalnum", 0) => format!("{obj}.chars().all(|c| c.is_alphanumeric())"),
            ("isspace", 0) => format!("{obj}.chars().all(|c| c.is_whitespace())"),
            _ => return None,
        };
        Some(s)
    }

    fn result_helper(&mut self, method: &str, args: &[ExprIr]) -> Option<String> {
        let subject = self.expr(args.first()?);
        match (method, args.len()) {
            ("unwrap" | "unwrap_err" | "is_ok" | "is_err" | "is_some" | "is_none", 1) => {
                Some(format!("{subject}.{method}()"))
            }
            ("unwrap_or", 2) => {
                let d = self.expr(&args[1]);
                Some(format!("{subject}.unwrap_or({d})"))
            }
            ("expect" | "expect_err", 2) => {
                let msg = self.expr(&args[1]);
                Some(format!("{subject}.{method}({})", borrow_str(&msg)))
            }
            _ => None,
        }
    }

    fn binary(&mut self, e: &ExprIr, op: BinOp, left: &ExprIr, right: &ExprIr) -> String {
        // Emptiness folds for length-against-zero comparisons.
        if let Some(s) = self.emptiness_fold(op, left, right) {
            return s;
        }
        // Sentinel comparisons of find() become membership tests.
        if let Some(s) = self.find_fold(op, left, right) {
            return s;
        }

        match op {
            BinOp::In | BinOp::NotIn => {
                let container_ty = self.analysis.ty(right.id);
                let c = self.expr(right);
                let x = self.expr(left);
                let test = match container_ty {
                    Ty::Map(..) => format!("{c}.contains_key(&{x})"),
                    Ty::String | Ty::Str => format!("{c}.contains({})", borrow_str(&x)),
                    _ => format!("{c}.contains(&{x})"),
                };
                return if op == BinOp::NotIn {
                    format!("!{test}")
                } else {
                    test
                };
            }
            BinOp::Is | BinOp::IsNot => {
                let subject = if matches!(left.kind, ExprKind::NoneLit) {
                    right
                } else {
                    left
                };
                let s = self.expr(subject);
                return if op == BinOp::Is {
                    format!("{s}.is_none()")
                } else {
                    format!("{s}.is_some()")
                };
            }
            BinOp::Pow => {
                let l = self.paren_expr(left);
                let r = self.expr(right);
                return format!("({l} as f64).powf({r} as f64)");
            }
            _ => {}
        }

        let lt = self.analysis.ty(left.id);
        let rt = self.analysis.ty(right.id);

        // Owned-string concatenation goes through the formatting macro so
        // both owned and borrowed operands work.
        if op == BinOp::Add && lt.is_stringy() && rt.is_stringy() {
            let l = self.expr(left);
            let r = self.expr(right);
            return format!("format!(\"{{}}{{}}\", {l}, {r})");
        }

        // True division on integers is float division.
        if op == BinOp::Div && lt == Ty::Int && rt == Ty::Int {
            let l = self.paren_expr(left);
            let r = self.paren_expr(right);
            return format!("{l} as f64 / {r} as f64");
        }

        let mut l = self.paren_expr(left);
        let mut r = self.paren_expr(right);
        if self.analysis.index_casts.contains(&left.id) {
            l = format!("({l} as usize)");
        }
        if self.analysis.index_casts.contains(&right.id) {
            r = format!("({r} as usize)");
        }

        let op_str = match op {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div | BinOp::FloorDiv => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Pow | BinOp::In | BinOp::NotIn | BinOp::Is | BinOp::IsNot => {
                let _ = e;
                "+"
            }
        };

        // String comparisons borrow both sides so String and &str mix.
        if op == BinOp::Eq || op == BinOp::Ne {
            if lt.is_stringy() && rt.is_stringy() {
                return format!("{} {op_str} {}", strip_owned(&l), strip_owned(&r));
            }
        }

        format!("{l} {op_str} {r}")
    }

    fn emptiness_fold(&mut self, op: BinOp, left: &ExprIr, right: &ExprIr) -> Option<String> {
        let len_arg = |e: &ExprIr| -> Option<ExprIr> {
            if let ExprKind::Call { func, args, .. } = &e.kind {
                if func == "len" && args.len() == 1 {
                    return Some(args[0].clone());
                }
            }
            None
        };

        if let Some(base) = len_arg(left) {
            let b = self.expr(&base);
            match (op, &right.kind) {
                (BinOp::Gt, ExprKind::Int(0)) | (BinOp::Ne, ExprKind::Int(0)) => {
                    return Some(format!("!{b}.is_empty()"));
                }
                (BinOp::Ge, ExprKind::Int(1)) => return Some(format!("!{b}.is_empty()")),
                (BinOp::Eq, ExprKind::Int(0)) => return Some(format!("{b}.is_empty()")),
                _ => {}
            }
        }
        if let Some(base) = len_arg(right) {
            let b = self.expr(&base);
            match (op, &left.kind) {
                (BinOp::Lt, ExprKind::Int(0)) => return Some(format!("!{b}.is_empty()")),
                (BinOp::Eq, ExprKind::Int(0)) => return Some(format!("{b}.is_empty()")),
                _ => {}
            }
        }
        None
    }

    fn find_fold(&mut self, op: BinOp, left: &ExprIr, right: &ExprIr) -> Option<String> {
        let ExprKind::MethodCall {
            recv, method, args, ..
        } = &left.kind
        else {
            return None;
        };
        if method != "find" || args.len() != 1 || !self.analysis.ty(recv.id).is_stringy() {
            return None;
        }

        let positive = match op {
            BinOp::Ge if is_int_literal(right, 0) => true,
            BinOp::Ne if is_int_literal(right, -1) => true,
            BinOp::Eq if is_int_literal(right, -1) => false,
            BinOp::Lt if is_int_literal(right, 0) => false,
            _ => return None,
        };

        let obj = self.expr(recv);
        let needle = self.expr(&args[0]);
        let test = format!("{obj}.contains({})", borrow_str(&needle));
        Some(if positive { test } else { format!("!{test}") })
    }

    fn paren_expr(&mut self, e: &ExprIr) -> String {
        let s = self.expr(e);
        if matches!(e.kind, ExprKind::Binary { .. } | ExprKind::IfExp { .. }) {
            format!("({s})")
        } else {
            s
        }
    }
}

fn escape_ident(name: &str) -> String {
    if RUST_KEYWORDS.contains(&name) {
        format!("r#{name}")
    } else {
        name.to_string()
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

/// Strip the owning conversion from a string-literal rendering.
fn strip_owned(s: &str) -> String {
    s.strip_suffix(".to_string()").unwrap_or(s).to_string()
}

/// Borrowed-argument form: literals drop the owning conversion, owned
/// values take a reference.
fn borrow_str(s: &str) -> String {
    if let Some(lit) = s.strip_suffix(".to_string()") {
        lit.to_string()
    } else if s.starts_with('"') || s.starts_with('&') {
        s.to_string()
    } else {
        format!("&{s}")
    }
}

fn borrow_key(s: &str) -> String {
    borrow_str(s)
}

fn paren(s: &str) -> String {
    if s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        s.to_string()
    } else {
        format!("({s})")
    }
}

fn trim_literal(formatted: &str) -> String {
    formatted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix(".to_string()"))
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(formatted)
        .to_string()
}

fn is_int_literal(e: &ExprIr, value: i64) -> bool {
    match &e.kind {
        ExprKind::Int(n) => *n == value,
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => matches!(operand.kind, ExprKind::Int(n) if -n == value),
        _ => false,
    }
}
