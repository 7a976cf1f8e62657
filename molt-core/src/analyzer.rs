#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;

use molt_ir::{
    BinOp, ClassIr, ExprIr, ExprKind, FStrPart, FunctionIr, ModuleIr, NodeId, StmtIr, StmtKind,
    Ty, UnaryOp,
};
use molt_stubs::StubRegistry;
use tracing::debug;

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};

/// Methods that require exclusive access to their receiver.
const MUTATING_METHODS: [&str; 8] = [
    "append", "extend", "insert", "pop", "remove", "clear", "add", "push",
];

#[derive(Clone, Debug)]
pub struct FnSig {
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub is_async: bool,
}

#[derive(Clone, Debug)]
pub struct MethodSig {
    pub sig: FnSig,
    pub is_static: bool,
    pub modifies_self: bool,
}

#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: String,
    /// Constructor parameter types, in field order for dataclasses.
    pub ctor_params: Vec<Ty>,
    pub fields: HashMap<String, Ty>,
    pub methods: HashMap<String, MethodSig>,
}

#[derive(Clone, Debug, Default)]
pub struct ModuleExports {
    pub functions: HashMap<String, FnSig>,
    pub classes: HashMap<String, ClassInfo>,
}

/// How a call argument travels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgMode {
    Value,
    Ref,
    MutRef,
}

/// Annotation table produced by one analyzer run. Keyed by node identity;
/// the IR itself is never touched.
#[derive(Debug, Default)]
pub struct Analysis {
    pub types: HashMap<NodeId, Ty>,
    /// `Let` statements whose binding needs the mutability modifier.
    pub mutable_bindings: HashSet<NodeId>,
    /// Per-name mutability of tuple destructurings.
    pub tuple_mutable: HashMap<NodeId, Vec<bool>>,
    /// Expressions to wrap in the platform-width index cast.
    pub index_casts: HashSet<NodeId>,
    /// Length calls flowing into integer context.
    pub len_casts: HashSet<NodeId>,
    /// Call sites lowered through the error-propagation operator.
    pub propagation: HashSet<NodeId>,
    /// Values that must be wrapped in the option constructor.
    pub some_wraps: HashSet<NodeId>,
    pub borrows: HashMap<NodeId, ArgMode>,
    pub async_main: bool,
}

impl Analysis {
    pub fn ty(&self, id: NodeId) -> Ty {
        self.types.get(&id).cloned().unwrap_or(Ty::Unknown)
    }
}

/// Collect the externally-visible signatures of a module so sibling modules
/// can resolve imported names.
pub fn collect_exports(module: &ModuleIr) -> ModuleExports {
    let mut exports = ModuleExports::default();

    for f in &module.functions {
        exports.functions.insert(f.name.clone(), fn_sig(f));
    }
    for c in &module.classes {
        exports.classes.insert(c.name.clone(), class_info(c));
    }
    exports
}

fn fn_sig(f: &FunctionIr) -> FnSig {
    FnSig {
        params: f
            .params
            .iter()
            .map(|p| p.ty.clone().unwrap_or(Ty::Unknown))
            .collect(),
        ret: f.ret.clone().unwrap_or(Ty::Unit),
        is_async: f.is_async,
    }
}

fn class_info(c: &ClassIr) -> ClassInfo {
    let mut methods = HashMap::new();
    for m in &c.methods {
        methods.insert(
            m.name.clone(),
            MethodSig {
                sig: fn_sig(m),
                is_static: m.is_static,
                modifies_self: m.modifies_self,
            },
        );
    }

    let ctor_params = if let Some(init) = methods.get("__init__") {
        init.sig.params.clone()
    } else {
        // Synthetic dataclass constructor: one parameter per field, with
        // defaulted fields taking the optional form.
        c.fields
            .iter()
            .map(|f| {
                if f.default.is_some() {
                    Ty::option(f.ty.clone())
                } else {
                    f.ty.clone()
                }
            })
            .collect()
    };

    ClassInfo {
        name: c.name.clone(),
        ctor_params,
        fields: c.fields.iter().map(|f| (f.name.clone(), f.ty.clone())).collect(),
        methods,
    }
}

struct Local {
    ty: Ty,
    decl: NodeId,
    tuple_index: Option<usize>,
}

pub fn analyze_module(
    module: &ModuleIr,
    registry: &StubRegistry,
    externals: &HashMap<String, ModuleExports>,
    path: &Path,
    sink: &mut DiagnosticSink,
) -> Analysis {
    let mut analyzer = Analyzer {
        registry,
        sink,
        path,
        analysis: Analysis::default(),
        functions: HashMap::new(),
        classes: HashMap::new(),
        modules: HashMap::new(),
        locals: HashMap::new(),
        consts: HashMap::new(),
        current_ret: Ty::Unit,
        current_async: false,
    };

    analyzer.register_module(module, externals);
    analyzer.run(module);
    analyzer.analysis
}

struct Analyzer<'a> {
    registry: &'a StubRegistry,
    sink: &'a mut DiagnosticSink,
    path: &'a Path,
    analysis: Analysis,
    functions: HashMap<String, FnSig>,
    classes: HashMap<String, ClassInfo>,
    /// Imported local project modules, resolvable as call qualifiers.
    modules: HashMap<String, ModuleExports>,
    locals: HashMap<String, Local>,
    consts: HashMap<String, Ty>,
    current_ret: Ty,
    current_async: bool,
}

impl<'a> Analyzer<'a> {
    fn register_module(&mut self, module: &ModuleIr, externals: &HashMap<String, ModuleExports>) {
        for f in &module.functions {
            self.functions.insert(f.name.clone(), fn_sig(f));
        }
        for c in &module.classes {
            self.classes.insert(c.name.clone(), class_info(c));
        }
        for k in &module.consts {
            self.consts.insert(k.name.clone(), k.ty.clone());
        }

        for imp in &module.imports {
            let root = imp.module.split('.').next().unwrap_or(&imp.module);
            if let Some(exports) = externals.get(root) {
                if imp.names.is_empty() {
                    self.modules.insert(root.to_string(), exports.clone());
                } else {
                    for (name, alias) in &imp.names {
                        let bound = alias.as_deref().unwrap_or(name);
                        if let Some(sig) = exports.functions.get(name) {
                            self.functions.insert(bound.to_string(), sig.clone());
                        } else if let Some(ci) = exports.classes.get(name) {
                            self.classes.insert(bound.to_string(), ci.clone());
                        } else {
                            debug!(module = %imp.module, name, "import does not resolve locally");
                        }
                    }
                }
            }
            // Stub-module imports resolve lazily at call sites.
        }
    }

    fn run(&mut self, module: &ModuleIr) {
        for k in &module.consts {
            let vt = self.infer(&k.value);
            if !compatible(&vt, &k.ty) {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    k.span,
                    format!("constant '{}' is annotated {} but initialized with {vt}", k.name, k.ty),
                );
            }
        }

        for c in &module.classes {
            for m in &c.methods {
                self.function(m, Some(&c.name));
            }
        }

        for f in &module.functions {
            self.function(f, None);
            if f.name == "main" && f.is_async {
                self.analysis.async_main = true;
            }
        }

        // Annotation completeness: an accepted program types every node.
        if !self.sink.has_errors() {
            let unresolved: Vec<NodeId> = self
                .analysis
                .types
                .iter()
                .filter(|(_, t)| t.contains_unknown())
                .map(|(id, _)| *id)
                .collect();
            if !unresolved.is_empty() {
                self.sink.push(crate::diagnostics::Diagnostic::new(
                    DiagnosticKind::UninferableLocal,
                    self.path,
                    None,
                    format!(
                        "{} expression(s) could not be fully typed",
                        unresolved.len()
                    ),
                ));
            }
        }
    }

    fn function(&mut self, f: &FunctionIr, class: Option<&str>) {
        self.locals.clear();

        for p in &f.params {
            let ty = match &p.ty {
                Some(t) => t.clone(),
                None => {
                    self.error(
                        DiagnosticKind::MissingAnnotation,
                        p.span,
                        format!("parameter '{}' must be annotated", p.name),
                    );
                    Ty::Unknown
                }
            };
            self.locals.insert(
                p.name.clone(),
                Local {
                    ty,
                    decl: p.id,
                    tuple_index: None,
                },
            );
        }

        if let Some(class_name) = class {
            if f.is_method {
                self.locals.insert(
                    "self".to_string(),
                    Local {
                        ty: Ty::named(class_name),
                        decl: f.id,
                        tuple_index: None,
                    },
                );
            }
        }

        self.current_ret = match &f.ret {
            Some(t) => t.clone(),
            None if f.name == "__init__" => Ty::Unit,
            None => {
                self.error(
                    DiagnosticKind::MissingAnnotation,
                    f.span,
                    format!("function '{}' must declare a return type", f.name),
                );
                Ty::Unit
            }
        };
        self.current_async = f.is_async;

        self.block(&f.body);
    }

    fn block(&mut self, stmts: &[StmtIr]) {
        for (i, stmt) in stmts.iter().enumerate() {
            self.stmt(stmt, &stmts[i + 1..]);
        }
    }

    fn stmt(&mut self, stmt: &StmtIr, rest: &[StmtIr]) {
        match &stmt.kind {
            StmtKind::Let {
                name,
                ty,
                value,
                declares,
            } => self.let_stmt(stmt, name, ty.as_ref(), value, *declares, rest),
            StmtKind::AssignAttr { obj, attr, value } => {
                let ot = self.infer(obj);
                let vt = self.infer(value);
                let ft = self.field_type(&ot, attr, stmt);
                if !compatible(&vt, &ft) {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        stmt.span,
                        format!("field '{attr}' has type {ft} but the value is {vt}"),
                    );
                }
                self.mark_mutable(obj);
            }
            StmtKind::AssignIndex { obj, index, value } => {
                let ot = self.infer(obj);
                let it = self.infer(index);
                let vt = self.infer(value);
                match &ot {
                    Ty::List(elem) => {
                        if it == Ty::Int {
                            self.analysis.index_casts.insert(index.id);
                        } else {
                            self.index_type_error(index, &it);
                        }
                        if !compatible(&vt, elem) {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                stmt.span,
                                format!("cannot store {vt} in {ot}"),
                            );
                        }
                    }
                    Ty::Map(k, v) => {
                        if !compatible(&it, k) || !compatible(&vt, v) {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                stmt.span,
                                format!("cannot store {it} -> {vt} in {ot}"),
                            );
                        }
                    }
                    Ty::Unknown => {}
                    other => {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            stmt.span,
                            format!("{other} does not support index assignment"),
                        );
                    }
                }
                self.mark_mutable(obj);
            }
            StmtKind::LetTuple { names, value } => {
                let vt = self.infer(value);
                let Ty::Tuple(elems) = &vt else {
                    if !vt.is_unknown() {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            stmt.span,
                            format!("cannot unpack {vt} into {} names", names.len()),
                        );
                    }
                    return;
                };
                if elems.len() != names.len() {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        stmt.span,
                        format!(
                            "cannot unpack a {}-element tuple into {} names",
                            elems.len(),
                            names.len()
                        ),
                    );
                    return;
                }

                // Channel receivers destructured from a constructor are
                // mutable up front: the consuming half needs it.
                let mut mutable = vec![false; names.len()];
                for (i, elem) in elems.iter().enumerate() {
                    if matches!(elem, Ty::Named { path, .. } if path == "Receiver") {
                        mutable[i] = true;
                    }
                }
                self.analysis.tuple_mutable.insert(stmt.id, mutable);

                for (i, (name, elem)) in names.iter().zip(elems.iter()).enumerate() {
                    self.locals.insert(
                        name.clone(),
                        Local {
                            ty: elem.clone(),
                            decl: stmt.id,
                            tuple_index: Some(i),
                        },
                    );
                }
            }
            StmtKind::Return { value } => {
                let vt = match value {
                    Some(v) => self.infer(v),
                    None => Ty::Unit,
                };
                let expected = self.current_ret.clone();
                if !compatible(&vt, &expected) {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        stmt.span,
                        format!("return type is {expected} but the value is {vt}"),
                    );
                }
            }
            StmtKind::If {
                cond,
                then_body,
                elif_clauses,
                else_body,
            } => {
                self.condition(cond);
                self.block(then_body);
                for (c, b) in elif_clauses {
                    self.condition(c);
                    self.block(b);
                }
                self.block(else_body);
            }
            StmtKind::While { cond, body } => {
                self.condition(cond);
                self.block(body);
            }
            StmtKind::For {
                targets,
                iter,
                body,
            } => {
                let it = self.infer(iter);
                let elems = self.element_types(&it, targets.len(), stmt);
                for (name, ty) in targets.iter().zip(elems) {
                    self.locals.insert(
                        name.clone(),
                        Local {
                            ty,
                            decl: stmt.id,
                            tuple_index: None,
                        },
                    );
                }
                self.block(body);
            }
            StmtKind::Scope {
                context,
                binding,
                body,
            } => {
                let ct = self.infer(context);
                // A `with` context must acquire something releasable: a
                // scoped-resource stub or guarded state.
                let is_stub = self.scoped_stub_context(context).is_some();
                if !is_stub && !is_guarded_state(&ct) && !ct.is_unknown() {
                    self.error(
                        DiagnosticKind::UnsupportedConstruct,
                        stmt.span,
                        format!(
                            "'with' needs a scoped resource or guarded state, found {ct}"
                        ),
                    );
                }
                if let Some(name) = binding {
                    let bound_ty = self.scope_binding_type(context, &ct);
                    self.locals.insert(
                        name.clone(),
                        Local {
                            ty: bound_ty,
                            decl: stmt.id,
                            tuple_index: None,
                        },
                    );
                }
                self.block(body);
            }
            StmtKind::Raise { exc } => self.raise_stmt(stmt, exc.as_ref()),
            StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
            StmtKind::Expr { expr } => {
                let t = self.infer(expr);
                self.maybe_propagate(expr, t, None);
            }
        }
    }

    fn let_stmt(
        &mut self,
        stmt: &StmtIr,
        name: &str,
        annotation: Option<&Ty>,
        value: &ExprIr,
        declares: bool,
        rest: &[StmtIr],
    ) {
        let raw = self.infer(value);
        let vt = self.maybe_propagate(value, raw, annotation);

        if declares {
            let ty = match annotation {
                Some(t) => {
                    if needs_some_wrap(&vt, t) {
                        self.analysis.some_wraps.insert(value.id);
                    } else if !compatible(&vt, t) {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            stmt.span,
                            format!("'{name}' is annotated {t} but initialized with {vt}"),
                        );
                    }
                    // Refine container literals typed against the annotation
                    // so no node is left partially unknown.
                    if vt.contains_unknown() {
                        self.analysis.types.insert(value.id, t.clone());
                    }
                    if matches!(value.kind, ExprKind::Call { ref func, .. } if func == "len")
                        && *t == Ty::Int
                    {
                        self.analysis.len_casts.insert(value.id);
                    }
                    t.clone()
                }
                None => {
                    if matches!(value.kind, ExprKind::NoneLit) {
                        match self.find_later_type(name, rest) {
                            Some(inner) => Ty::option(inner),
                            None => {
                                self.error(
                                    DiagnosticKind::UninferableLocal,
                                    stmt.span,
                                    format!("cannot infer the type of '{name}' from a bare None"),
                                );
                                Ty::Unknown
                            }
                        }
                    } else if vt.contains_unknown() {
                        self.error(
                            DiagnosticKind::UninferableLocal,
                            stmt.span,
                            format!("cannot infer the type of '{name}'; add an annotation"),
                        );
                        Ty::Unknown
                    } else {
                        vt.clone()
                    }
                }
            };

            self.locals.insert(
                name.to_string(),
                Local {
                    ty,
                    decl: stmt.id,
                    tuple_index: None,
                },
            );
        } else {
            let Some(local) = self.locals.get(name) else {
                self.error(
                    DiagnosticKind::UnknownSymbol,
                    stmt.span,
                    format!("assignment to undefined name '{name}'"),
                );
                return;
            };
            let lt = local.ty.clone();
            if needs_some_wrap(&vt, &lt) {
                self.analysis.some_wraps.insert(value.id);
            } else if !compatible(&vt, &lt) {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    stmt.span,
                    format!("'{name}' has type {lt} but is reassigned with {vt}"),
                );
            }
            self.mark_mutable_name(name);
        }
    }

    fn raise_stmt(&mut self, stmt: &StmtIr, exc: Option<&ExprIr>) {
        let Ty::Result(_, err) = self.current_ret.clone() else {
            self.error(
                DiagnosticKind::TypeMismatch,
                stmt.span,
                "raise is only supported inside Result-returning functions",
            );
            if let Some(e) = exc {
                self.infer(e);
            }
            return;
        };

        let Some(e) = exc else {
            self.error(
                DiagnosticKind::UnsupportedConstruct,
                stmt.span,
                "bare re-raise is not supported",
            );
            return;
        };

        // `raise Exc(message)`: the message becomes the error value.
        if let ExprKind::Call { args, .. } = &e.kind {
            if let Some(msg) = args.first() {
                let mt = self.infer(msg);
                if !compatible(&mt, &err) {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        stmt.span,
                        format!("error type is {err} but the raised message is {mt}"),
                    );
                }
            }
            for a in &e_call_args_skip_first(e) {
                self.infer(a);
            }
            self.analysis.types.insert(e.id, (*err).clone());
        } else {
            let et = self.infer(e);
            if !compatible(&et, &err) {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    stmt.span,
                    format!("error type is {err} but the raised value is {et}"),
                );
            }
        }
    }

    fn condition(&mut self, cond: &ExprIr) {
        let t = self.infer(cond);
        if !matches!(t, Ty::Bool | Ty::Unknown) {
            self.error(
                DiagnosticKind::TypeMismatch,
                cond.span,
                format!("condition must be bool, found {t}"),
            );
        }
    }

    // ---- expression inference ----

    fn infer(&mut self, e: &ExprIr) -> Ty {
        let ty = self.infer_inner(e);
        self.analysis.types.insert(e.id, ty.clone());
        ty
    }

    fn infer_inner(&mut self, e: &ExprIr) -> Ty {
        match &e.kind {
            ExprKind::NoneLit => Ty::option(Ty::Never),
            ExprKind::Bool(_) => Ty::Bool,
            ExprKind::Int(_) => Ty::Int,
            ExprKind::Float(_) => Ty::Float,
            ExprKind::Str(_) => Ty::String,
            ExprKind::FString(parts) => {
                for p in parts {
                    if let FStrPart::Interp { expr, .. } = p {
                        self.infer(expr);
                    }
                }
                Ty::String
            }
            ExprKind::Name(n) => self.name_type(e, n),
            ExprKind::Attribute { obj, attr } => self.attribute_type(e, obj, attr),
            ExprKind::Subscript { obj, index } => self.subscript_type(e, obj, index),
            ExprKind::Call { func, args, .. } => self.call_type(e, func, args),
            ExprKind::MethodCall {
                recv, method, args, ..
            } => self.method_call_type(e, recv, method, args),
            ExprKind::Unary { op, operand } => {
                let ot = self.infer(operand);
                match op {
                    UnaryOp::Neg => {
                        if !matches!(ot, Ty::Int | Ty::Float | Ty::Unknown) {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                e.span,
                                format!("cannot negate {ot}"),
                            );
                        }
                        ot
                    }
                    UnaryOp::Not => {
                        if !matches!(ot, Ty::Bool | Ty::Unknown) {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                e.span,
                                format!("'not' needs bool, found {ot}"),
                            );
                        }
                        Ty::Bool
                    }
                }
            }
            ExprKind::Binary { op, left, right } => self.binary_type(e, *op, left, right),
            ExprKind::IfExp { cond, then, orelse } => {
                self.condition(cond);
                let tt = self.infer(then);
                let ot = self.infer(orelse);
                unify_branches(&tt, &ot).unwrap_or_else(|| {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        e.span,
                        format!("conditional branches disagree: {tt} vs {ot}"),
                    );
                    Ty::Unknown
                })
            }
            ExprKind::List(elems) => {
                let mut elem_ty = Ty::Unknown;
                for el in elems {
                    let t = self.infer(el);
                    elem_ty = merge_elem(elem_ty, t);
                }
                Ty::list(elem_ty)
            }
            ExprKind::Map(pairs) => {
                let mut kt = Ty::Unknown;
                let mut vt = Ty::Unknown;
                for (k, v) in pairs {
                    kt = merge_elem(kt, self.infer(k));
                    vt = merge_elem(vt, self.infer(v));
                }
                Ty::map(kt, vt)
            }
            ExprKind::Set(elems) => {
                let mut elem_ty = Ty::Unknown;
                for el in elems {
                    elem_ty = merge_elem(elem_ty, self.infer(el));
                }
                Ty::set(elem_ty)
            }
            ExprKind::Tuple(elems) => {
                Ty::Tuple(elems.iter().map(|el| self.infer(el)).collect())
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                cond,
            } => {
                let it = self.infer(iter);
                let elem = self
                    .element_types(&it, 1, &fake_stmt(e))
                    .into_iter()
                    .next()
                    .unwrap_or(Ty::Unknown);
                let saved = self.locals.remove(target.as_str());
                self.locals.insert(
                    target.clone(),
                    Local {
                        ty: elem,
                        decl: e.id,
                        tuple_index: None,
                    },
                );
                if let Some(c) = cond {
                    self.condition(c);
                }
                let et = self.infer(element);
                self.locals.remove(target.as_str());
                if let Some(saved) = saved {
                    self.locals.insert(target.clone(), saved);
                }
                Ty::list(et)
            }
            ExprKind::Await(inner) => {
                if !self.current_async {
                    self.error(
                        DiagnosticKind::AwaitOutsideAsync,
                        e.span,
                        "await is only allowed inside async functions",
                    );
                }
                self.infer(inner)
            }
        }
    }

    fn name_type(&mut self, e: &ExprIr, name: &str) -> Ty {
        if let Some(local) = self.locals.get(name) {
            return local.ty.clone();
        }
        if let Some(t) = self.consts.get(name) {
            return t.clone();
        }
        if let Some(sig) = self.functions.get(name) {
            return Ty::Function {
                params: sig.params.clone(),
                ret: Box::new(sig.ret.clone()),
                is_async: sig.is_async,
            };
        }
        if self.classes.contains_key(name) {
            return Ty::named(name);
        }
        self.error(
            DiagnosticKind::UnknownSymbol,
            e.span,
            format!("undefined name '{name}'"),
        );
        Ty::Unknown
    }

    fn attribute_type(&mut self, e: &ExprIr, obj: &ExprIr, attr: &str) -> Ty {
        // Module attribute through a stubbed namespace, e.g. `sys.argv`.
        if let ExprKind::Name(n) = &obj.kind {
            if !self.locals.contains_key(n) {
                if let Some(mapping) = self.registry.lookup_callable(&format!("{n}.{attr}")) {
                    self.analysis.types.insert(obj.id, Ty::Unit);
                    return mapping.returns;
                }
            }
        }

        let ot = self.infer(obj);
        let ft = self.field_type(&ot, attr, &fake_stmt(e));
        ft
    }

    fn field_type(&mut self, owner: &Ty, attr: &str, at: &StmtIr) -> Ty {
        match owner {
            Ty::Named { path, .. } => {
                if let Some(info) = self.classes.get(path) {
                    if let Some(t) = info.fields.get(attr) {
                        return t.clone();
                    }
                }
                self.error(
                    DiagnosticKind::UnknownSymbol,
                    at.span,
                    format!("type {owner} has no field '{attr}'"),
                );
                Ty::Unknown
            }
            Ty::Unknown => Ty::Unknown,
            _ => {
                self.error(
                    DiagnosticKind::UnknownSymbol,
                    at.span,
                    format!("type {owner} has no field '{attr}'"),
                );
                Ty::Unknown
            }
        }
    }

    fn subscript_type(&mut self, e: &ExprIr, obj: &ExprIr, index: &ExprIr) -> Ty {
        let ot = self.infer(obj);
        let it = self.infer(index);
        match &ot {
            Ty::List(elem) => {
                if it == Ty::Int {
                    self.analysis.index_casts.insert(index.id);
                } else {
                    self.index_type_error(index, &it);
                }
                (**elem).clone()
            }
            Ty::Map(k, v) => {
                if !compatible(&it, k) {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        e.span,
                        format!("{ot} is keyed by {k}, found {it}"),
                    );
                }
                (**v).clone()
            }
            Ty::Tuple(elems) => {
                if let ExprKind::Int(n) = index.kind {
                    let i = n.max(0) as usize;
                    if i < elems.len() {
                        return elems[i].clone();
                    }
                }
                self.error(
                    DiagnosticKind::TypeMismatch,
                    e.span,
                    "tuples are indexed by literal positions within bounds",
                );
                Ty::Unknown
            }
            Ty::Unknown => Ty::Unknown,
            other => {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    e.span,
                    format!("{other} does not support indexing"),
                );
                Ty::Unknown
            }
        }
    }

    fn index_type_error(&mut self, index: &ExprIr, it: &Ty) {
        if !it.is_unknown() {
            self.error(
                DiagnosticKind::TypeMismatch,
                index.span,
                format!("sequence indices must be int, found {it}"),
            );
        }
    }

    fn call_type(&mut self, e: &ExprIr, func: &str, args: &[ExprIr]) -> Ty {
        match func {
            "len" => {
                let t = self.arg1(e, args);
                if !matches!(
                    t,
                    Ty::List(_) | Ty::Map(..) | Ty::Set(_) | Ty::String | Ty::Str | Ty::Unknown
                ) {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        e.span,
                        format!("len() needs a container or string, found {t}"),
                    );
                }
                return Ty::Int;
            }
            "range" => {
                if args.is_empty() || args.len() > 3 {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        e.span,
                        "range() takes one to three integer arguments",
                    );
                }
                for a in args {
                    let t = self.infer(a);
                    if !matches!(t, Ty::Int | Ty::Unknown) {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            a.span,
                            format!("range() arguments must be int, found {t}"),
                        );
                    }
                }
                return Ty::list(Ty::Int);
            }
            "print" => {
                for a in args {
                    self.infer(a);
                }
                return Ty::Unit;
            }
            "str" => {
                self.arg1(e, args);
                return Ty::String;
            }
            "int" => {
                self.arg1(e, args);
                return Ty::Int;
            }
            "float" => {
                self.arg1(e, args);
                return Ty::Float;
            }
            "bool" => {
                self.arg1(e, args);
                return Ty::Bool;
            }
            "Ok" => {
                let t = self.arg1(e, args);
                return Ty::result(t, Ty::Never);
            }
            "Err" => {
                let t = self.arg1(e, args);
                return Ty::result(Ty::Never, t);
            }
            "Some" => {
                let t = self.arg1(e, args);
                return Ty::option(t);
            }
            "Arc" => {
                let t = self.arg1(e, args);
                return Ty::shared(t);
            }
            "Mutex" => {
                let t = self.arg1(e, args);
                return Ty::guarded(t);
            }
            _ => {}
        }

        if let Some(sig) = self.functions.get(func).cloned() {
            self.check_args(e, func, &sig.params, args);
            if sig.is_async && !self.current_async {
                self.error(
                    DiagnosticKind::AwaitOutsideAsync,
                    e.span,
                    format!("async function '{func}' called from a non-async context"),
                );
            }
            return sig.ret;
        }

        if let Some(info) = self.classes.get(func).cloned() {
            self.check_ctor_args(e, &info, args);
            return Ty::named(&info.name);
        }

        if let Some(mapping) = self.registry.lookup_callable(func) {
            if !mapping.params.is_empty() {
                self.check_args(e, func, &mapping.params, args);
            } else {
                for a in args {
                    self.infer(a);
                }
            }
            return mapping.returns;
        }

        for a in args {
            self.infer(a);
        }
        self.error(
            DiagnosticKind::UnknownSymbol,
            e.span,
            format!("unknown function '{func}'"),
        );
        Ty::Unknown
    }

    fn method_call_type(
        &mut self,
        e: &ExprIr,
        recv: &ExprIr,
        method: &str,
        args: &[ExprIr],
    ) -> Ty {
        // Static Result/Option helpers written in the prefix style.
        if let ExprKind::Name(n) = &recv.kind {
            if (n == "Result" || n == "Option") && !args.is_empty() {
                return self.result_helper(e, method, args);
            }

            if !self.locals.contains_key(n) {
                // Project-module qualifier: `utils.helper(...)`.
                if let Some(exports) = self.modules.get(n).cloned() {
                    self.analysis.types.insert(recv.id, Ty::Unit);
                    if let Some(sig) = exports.functions.get(method) {
                        self.check_args(e, method, &sig.params, args);
                        if sig.is_async && !self.current_async {
                            self.error(
                                DiagnosticKind::AwaitOutsideAsync,
                                e.span,
                                format!("async function '{method}' called from a non-async context"),
                            );
                        }
                        return sig.ret.clone();
                    }
                    if let Some(info) = exports.classes.get(method).cloned() {
                        self.check_ctor_args(e, &info, args);
                        return Ty::named(&info.name);
                    }
                }

                // Stubbed namespace: `fs.read_to_string(...)`.
                let qualified = format!("{n}.{method}");
                if let Some(mapping) = self.registry.lookup_callable(&qualified) {
                    self.analysis.types.insert(recv.id, Ty::Unit);
                    if !mapping.params.is_empty() {
                        self.check_args(e, &qualified, &mapping.params, args);
                    } else {
                        for a in args {
                            self.infer(a);
                        }
                    }
                    return mapping.returns;
                }
            }
        }

        let rt = self.infer(recv);
        self.dispatch_method(e, recv, &rt, method, args)
    }

    fn dispatch_method(
        &mut self,
        e: &ExprIr,
        recv: &ExprIr,
        rt: &Ty,
        method: &str,
        args: &[ExprIr],
    ) -> Ty {
        let arg_tys: Vec<Ty> = args.iter().map(|a| self.infer(a)).collect();

        match rt {
            Ty::String | Ty::Str => self.string_method(e, method, &arg_tys),
            Ty::List(elem) => {
                if MUTATING_METHODS.contains(&method) {
                    self.mark_mutable(recv);
                    self.analysis.borrows.insert(recv.id, ArgMode::MutRef);
                }
                match (method, arg_tys.len()) {
                    ("append", 1) | ("remove", 1) => {
                        self.expect_compat(e, &arg_tys[0], elem);
                        Ty::Unit
                    }
                    ("extend", 1) => {
                        self.expect_compat(e, &arg_tys[0], rt);
                        Ty::Unit
                    }
                    ("insert", 2) => {
                        self.expect_compat(e, &arg_tys[0], &Ty::Int);
                        self.expect_compat(e, &arg_tys[1], elem);
                        if arg_tys[0] == Ty::Int {
                            self.analysis.index_casts.insert(args[0].id);
                        }
                        Ty::Unit
                    }
                    ("pop", 0) => Ty::option((**elem).clone()),
                    ("clear", 0) => Ty::Unit,
                    _ => self.unknown_method(e, rt, method),
                }
            }
            Ty::Map(k, v) => {
                if MUTATING_METHODS.contains(&method) {
                    self.mark_mutable(recv);
                }
                match (method, arg_tys.len()) {
                    ("get", 1) => {
                        self.expect_compat(e, &arg_tys[0], k);
                        Ty::option((**v).clone())
                    }
                    ("get", 2) => {
                        self.expect_compat(e, &arg_tys[0], k);
                        self.expect_compat(e, &arg_tys[1], v);
                        (**v).clone()
                    }
                    ("keys", 0) => Ty::list((**k).clone()),
                    ("values", 0) => Ty::list((**v).clone()),
                    ("items", 0) => Ty::list(Ty::Tuple(vec![(**k).clone(), (**v).clone()])),
                    ("clear", 0) => Ty::Unit,
                    _ => self.unknown_method(e, rt, method),
                }
            }
            Ty::Set(elem) => {
                if MUTATING_METHODS.contains(&method) {
                    self.mark_mutable(recv);
                }
                match (method, arg_tys.len()) {
                    ("add", 1) | ("remove", 1) => {
                        self.expect_compat(e, &arg_tys[0], elem);
                        Ty::Unit
                    }
                    ("clear", 0) => Ty::Unit,
                    _ => self.unknown_method(e, rt, method),
                }
            }
            Ty::Shared(inner) => {
                if method == "clone" && args.is_empty() {
                    rt.clone()
                } else {
                    // Shared pointers defer to the pointee.
                    self.dispatch_method(e, recv, &inner.clone(), method, args)
                }
            }
            Ty::Guarded(inner) => {
                if method == "lock" && args.is_empty() {
                    (**inner).clone()
                } else {
                    self.unknown_method(e, rt, method)
                }
            }
            Ty::Option(inner) => match (method, arg_tys.len()) {
                ("unwrap", 0) => (**inner).clone(),
                ("unwrap_or", 1) => {
                    self.expect_compat(e, &arg_tys[0], inner);
                    (**inner).clone()
                }
                ("is_some", 0) | ("is_none", 0) => Ty::Bool,
                _ => self.unknown_method(e, rt, method),
            },
            Ty::Result(ok, err) => match (method, arg_tys.len()) {
                ("unwrap", 0) => (**ok).clone(),
                ("unwrap_err", 0) => (**err).clone(),
                ("unwrap_or", 1) => {
                    self.expect_compat(e, &arg_tys[0], ok);
                    (**ok).clone()
                }
                ("is_ok", 0) | ("is_err", 0) => Ty::Bool,
                _ => self.unknown_method(e, rt, method),
            },
            Ty::Named { path, .. } => {
                if let Some(mapping) = self.registry.lookup_method(path, method) {
                    if mapping.mutates_receiver {
                        self.mark_mutable(recv);
                        self.analysis.borrows.insert(recv.id, ArgMode::MutRef);
                    }
                    if !mapping.params.is_empty() {
                        for (at, pt) in arg_tys.iter().zip(mapping.params.iter()) {
                            self.expect_compat(e, at, pt);
                        }
                    }
                    return mapping.returns;
                }
                if let Some(info) = self.classes.get(path).cloned() {
                    if let Some(m) = info.methods.get(method) {
                        if m.modifies_self {
                            self.mark_mutable(recv);
                            self.analysis.borrows.insert(recv.id, ArgMode::MutRef);
                        }
                        for (at, pt) in arg_tys.iter().zip(m.sig.params.iter()) {
                            self.expect_compat(e, at, pt);
                        }
                        if arg_tys.len() != m.sig.params.len() {
                            self.error(
                                DiagnosticKind::TypeMismatch,
                                e.span,
                                format!(
                                    "method '{method}' takes {} argument(s), got {}",
                                    m.sig.params.len(),
                                    arg_tys.len()
                                ),
                            );
                        }
                        if m.sig.is_async && !self.current_async {
                            self.error(
                                DiagnosticKind::AwaitOutsideAsync,
                                e.span,
                                format!("async method '{method}' called from a non-async context"),
                            );
                        }
                        return m.sig.ret.clone();
                    }
                }
                self.unknown_method(e, rt, method)
            }
            Ty::Unknown => {
                self.unresolved_receiver(e, recv, method);
                Ty::Unknown
            }
            _ => self.unknown_method(e, rt, method),
        }
    }

    /// Method dispatch needs a resolved receiver type; an unresolved one is
    /// escalated at the call site so the missing annotation is named.
    fn unresolved_receiver(&mut self, e: &ExprIr, recv: &ExprIr, method: &str) {
        let message = match &recv.kind {
            ExprKind::Name(n) => {
                format!("cannot dispatch '{method}': the type of '{n}' is unknown")
            }
            _ => format!("cannot dispatch '{method}' on a receiver of unknown type"),
        };
        let diag = crate::diagnostics::Diagnostic::new(
            DiagnosticKind::UninferableLocal,
            self.path,
            Some(e.span),
            message,
        )
        .with_note(format!(
            "annotate the receiver if '{method}' comes from a stubbed type"
        ));
        self.sink.push(diag);
    }

    fn string_method(&mut self, e: &ExprIr, method: &str, arg_tys: &[Ty]) -> Ty {
        match (method, arg_tys.len()) {
            ("upper", 0) | ("lower", 0) | ("strip", 0) => Ty::String,
            ("startswith", 1) | ("endswith", 1) => {
                self.expect_compat(e, &arg_tys[0], &Ty::String);
                Ty::Bool
            }
            ("split", 0) => Ty::list(Ty::String),
            ("split", 1) => {
                self.expect_compat(e, &arg_tys[0], &Ty::String);
                Ty::list(Ty::String)
            }
            ("join", 1) => {
                self.expect_compat(e, &arg_tys[0], &Ty::list(Ty::String));
                Ty::String
            }
            ("replace", 2) => {
                self.expect_compat(e, &arg_tys[0], &Ty::String);
                self.expect_compat(e, &arg_tys[1], &Ty::String);
                Ty::String
            }
            ("find", 1) => {
                self.expect_compat(e, &arg_tys[0], &Ty::String);
                Ty::Int
            }
            ("isdigit", 0) | ("isalpha", 0) | ("isalnum", 0) | ("isspace", 0) => Ty::Bool,
            _ => self.unknown_method(e, &Ty::String, method),
        }
    }

    fn result_helper(&mut self, e: &ExprIr, method: &str, args: &[ExprIr]) -> Ty {
        let subject = self.infer(&args[0]);
        for a in &args[1..] {
            self.infer(a);
        }
        match (&subject, method) {
            (Ty::Result(ok, _), "unwrap" | "expect" | "unwrap_or") => (**ok).clone(),
            (Ty::Result(_, err), "unwrap_err") => (**err).clone(),
            (Ty::Result(..), "is_ok" | "is_err") => Ty::Bool,
            (Ty::Option(inner), "unwrap" | "expect" | "unwrap_or") => (**inner).clone(),
            (Ty::Option(_), "is_some" | "is_none") => Ty::Bool,
            (Ty::Unknown, _) => Ty::Unknown,
            _ => {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    e.span,
                    format!("'{method}' is not applicable to {subject}"),
                );
                Ty::Unknown
            }
        }
    }

    fn binary_type(&mut self, e: &ExprIr, op: BinOp, left: &ExprIr, right: &ExprIr) -> Ty {
        let lt = self.infer(left);
        let rt = self.infer(right);

        match op {
            BinOp::And | BinOp::Or => {
                for (side, t) in [(left, &lt), (right, &rt)] {
                    if !matches!(t, Ty::Bool | Ty::Unknown) {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            side.span,
                            format!("boolean operator needs bool, found {t}"),
                        );
                    }
                }
                Ty::Bool
            }
            BinOp::Add
            | BinOp::Sub
            | BinOp::Mul
            | BinOp::Div
            | BinOp::FloorDiv
            | BinOp::Mod => {
                if op == BinOp::Add && lt.is_stringy() && rt.is_stringy() {
                    return Ty::String;
                }
                match (&lt, &rt) {
                    (Ty::Int, Ty::Int) => {
                        if op == BinOp::Div {
                            Ty::Float
                        } else {
                            Ty::Int
                        }
                    }
                    (Ty::Float, Ty::Float) | (Ty::Int, Ty::Float) | (Ty::Float, Ty::Int) => {
                        Ty::Float
                    }
                    (Ty::Unknown, _) | (_, Ty::Unknown) => Ty::Unknown,
                    _ => {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            e.span,
                            format!("operator does not apply to {lt} and {rt}"),
                        );
                        Ty::Unknown
                    }
                }
            }
            BinOp::Pow => {
                for (side, t) in [(left, &lt), (right, &rt)] {
                    if !matches!(t, Ty::Int | Ty::Float | Ty::Unknown) {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            side.span,
                            format!("exponentiation needs numbers, found {t}"),
                        );
                    }
                }
                Ty::Float
            }
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
                for (side, t) in [(left, &lt), (right, &rt)] {
                    if !matches!(t, Ty::Int | Ty::Unknown) {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            side.span,
                            format!("bitwise operator needs int, found {t}"),
                        );
                    }
                }
                Ty::Int
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.length_comparison_cast(left, &lt, right, &rt);
                let ordered = matches!(op, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge);
                let ok = if ordered {
                    (lt.is_numeric() && rt.is_numeric()) || (lt.is_stringy() && rt.is_stringy())
                } else {
                    compatible(&lt, &rt) || (lt.is_numeric() && rt.is_numeric())
                };
                if !ok && !lt.is_unknown() && !rt.is_unknown() {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        e.span,
                        format!("cannot compare {lt} with {rt}"),
                    );
                }
                Ty::Bool
            }
            BinOp::In | BinOp::NotIn => {
                let elem_ok = match &rt {
                    Ty::List(t) | Ty::Set(t) => compatible(&lt, t),
                    Ty::Map(k, _) => compatible(&lt, k),
                    Ty::String | Ty::Str => lt.is_stringy(),
                    Ty::Unknown => true,
                    _ => false,
                };
                if !elem_ok {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        e.span,
                        format!("membership test of {lt} in {rt}"),
                    );
                }
                Ty::Bool
            }
            BinOp::Is | BinOp::IsNot => {
                let none_side = matches!(left.kind, ExprKind::NoneLit)
                    || matches!(right.kind, ExprKind::NoneLit);
                let option_side = matches!(lt, Ty::Option(_)) || matches!(rt, Ty::Option(_));
                if !(none_side && option_side) && !lt.is_unknown() && !rt.is_unknown() {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        e.span,
                        "identity tests are only supported against None",
                    );
                }
                Ty::Bool
            }
        }
    }

    /// An integer local compared against a length gets the platform-width
    /// cast; the length side stays untouched.
    fn length_comparison_cast(&mut self, left: &ExprIr, lt: &Ty, right: &ExprIr, rt: &Ty) {
        let left_is_len = is_len_call(left);
        let right_is_len = is_len_call(right);
        if left_is_len && *rt == Ty::Int && !matches!(right.kind, ExprKind::Int(_)) {
            self.analysis.index_casts.insert(right.id);
        }
        if right_is_len && *lt == Ty::Int && !matches!(left.kind, ExprKind::Int(_)) {
            self.analysis.index_casts.insert(left.id);
        }
    }

    // ---- helpers ----

    fn maybe_propagate(&mut self, value: &ExprIr, vt: Ty, annotation: Option<&Ty>) -> Ty {
        let Ty::Result(ok, err) = &vt else {
            return vt;
        };
        let Ty::Result(_, cur_err) = &self.current_ret else {
            return vt;
        };
        if matches!(annotation, Some(Ty::Result(..))) {
            return vt;
        }
        if !matches!(
            value.kind,
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } | ExprKind::Await(_)
        ) {
            return vt;
        }
        if compatible(err, cur_err) {
            self.analysis.propagation.insert(value.id);
            return (**ok).clone();
        }
        vt
    }

    fn find_later_type(&mut self, name: &str, rest: &[StmtIr]) -> Option<Ty> {
        for stmt in rest {
            match &stmt.kind {
                StmtKind::Let { name: n, value, .. } if n == name => {
                    return shallow_literal_type(value);
                }
                StmtKind::If {
                    then_body,
                    elif_clauses,
                    else_body,
                    ..
                } => {
                    if let Some(t) = self.find_later_type(name, then_body) {
                        return Some(t);
                    }
                    for (_, body) in elif_clauses {
                        if let Some(t) = self.find_later_type(name, body) {
                            return Some(t);
                        }
                    }
                    if let Some(t) = self.find_later_type(name, else_body) {
                        return Some(t);
                    }
                }
                StmtKind::While { body, .. }
                | StmtKind::For { body, .. }
                | StmtKind::Scope { body, .. } => {
                    if let Some(t) = self.find_later_type(name, body) {
                        return Some(t);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn element_types(&mut self, iter_ty: &Ty, n: usize, at: &StmtIr) -> Vec<Ty> {
        let single = |t: Ty| -> Vec<Ty> {
            if n == 1 {
                vec![t]
            } else {
                vec![Ty::Unknown; n]
            }
        };
        match iter_ty {
            Ty::List(t) | Ty::Set(t) => {
                if n == 1 {
                    single((**t).clone())
                } else if let Ty::Tuple(elems) = &**t {
                    if elems.len() == n {
                        return elems.clone();
                    }
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        at.span,
                        format!("cannot unpack {t} into {n} loop variables"),
                    );
                    vec![Ty::Unknown; n]
                } else {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        at.span,
                        format!("cannot unpack {t} into {n} loop variables"),
                    );
                    vec![Ty::Unknown; n]
                }
            }
            Ty::Map(k, v) => {
                if n == 1 {
                    vec![(**k).clone()]
                } else if n == 2 {
                    vec![(**k).clone(), (**v).clone()]
                } else {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        at.span,
                        "mappings unpack into at most two loop variables",
                    );
                    vec![Ty::Unknown; n]
                }
            }
            Ty::Unknown => vec![Ty::Unknown; n],
            other => {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    at.span,
                    format!("{other} is not iterable"),
                );
                vec![Ty::Unknown; n]
            }
        }
    }

    /// The stub mapping behind a `with` context expression, when the
    /// context is a stub-resolved call.
    fn scoped_stub_context(&self, context: &ExprIr) -> Option<molt_stubs::FunctionMapping> {
        match &context.kind {
            ExprKind::Call { func, .. } => self.registry.lookup_callable(func),
            ExprKind::MethodCall { recv, method, .. } => {
                let ExprKind::Name(n) = &recv.kind else {
                    return None;
                };
                if self.locals.contains_key(n) {
                    return None;
                }
                self.registry.lookup_callable(&format!("{n}.{method}"))
            }
            _ => None,
        }
    }

    fn scope_binding_type(&mut self, context: &ExprIr, ct: &Ty) -> Ty {
        // Stubbed scoped resources may rebind through a template (e.g. a
        // temporary directory binds its path).
        if let Some(mapping) = self.scoped_stub_context(context) {
            if mapping.bind_template.is_some() {
                return Ty::String;
            }
        }
        match ct {
            Ty::Guarded(inner) => (**inner).clone(),
            Ty::Shared(inner) => match &**inner {
                Ty::Guarded(t) => (**t).clone(),
                _ => ct.clone(),
            },
            _ => ct.clone(),
        }
    }

    fn check_args(&mut self, e: &ExprIr, what: &str, params: &[Ty], args: &[ExprIr]) {
        if params.len() != args.len() {
            self.error(
                DiagnosticKind::TypeMismatch,
                e.span,
                format!(
                    "'{what}' takes {} argument(s), got {}",
                    params.len(),
                    args.len()
                ),
            );
        }
        for (arg, param) in args.iter().zip(params.iter()) {
            let at = self.infer(arg);
            if needs_some_wrap(&at, param) {
                self.analysis.some_wraps.insert(arg.id);
            } else if !compatible(&at, param) {
                self.error(
                    DiagnosticKind::TypeMismatch,
                    arg.span,
                    format!("argument has type {at}, expected {param}"),
                );
            }
            // Arguments default to by-value; exclusive receivers are
            // recorded separately during method dispatch.
            self.analysis.borrows.insert(arg.id, ArgMode::Value);
        }
        for arg in args.iter().skip(params.len()) {
            self.infer(arg);
        }
    }

    fn check_ctor_args(&mut self, e: &ExprIr, info: &ClassInfo, args: &[ExprIr]) {
        self.check_args(e, &info.name, &info.ctor_params, args);
    }

    fn arg1(&mut self, e: &ExprIr, args: &[ExprIr]) -> Ty {
        if args.len() != 1 {
            self.error(
                DiagnosticKind::TypeMismatch,
                e.span,
                "expected exactly one argument",
            );
        }
        match args.first() {
            Some(a) => self.infer(a),
            None => Ty::Unknown,
        }
    }

    fn expect_compat(&mut self, e: &ExprIr, found: &Ty, expected: &Ty) {
        if !compatible(found, expected) {
            self.error(
                DiagnosticKind::TypeMismatch,
                e.span,
                format!("argument has type {found}, expected {expected}"),
            );
        }
    }

    fn unknown_method(&mut self, e: &ExprIr, rt: &Ty, method: &str) -> Ty {
        let mut diag = crate::diagnostics::Diagnostic::new(
            DiagnosticKind::UnknownSymbol,
            self.path,
            Some(e.span),
            format!("type {rt} has no method '{method}'"),
        );
        if matches!(rt, Ty::Unknown | Ty::Named { .. }) {
            diag = diag.with_note(format!(
                "annotate the receiver if '{method}' comes from a stubbed type"
            ));
        }
        self.sink.push(diag);
        Ty::Unknown
    }

    fn mark_mutable(&mut self, recv: &ExprIr) {
        if let ExprKind::Name(n) = &recv.kind {
            self.mark_mutable_name(n);
        }
    }

    fn mark_mutable_name(&mut self, name: &str) {
        let Some(local) = self.locals.get(name) else {
            return;
        };
        match local.tuple_index {
            Some(i) => {
                if let Some(flags) = self.analysis.tuple_mutable.get_mut(&local.decl) {
                    if let Some(f) = flags.get_mut(i) {
                        *f = true;
                    }
                }
            }
            None => {
                self.analysis.mutable_bindings.insert(local.decl);
            }
        }
    }

    fn error(&mut self, kind: DiagnosticKind, span: molt_ast::Span, message: impl Into<String>) {
        self.sink.error(kind, self.path, span, message);
    }
}

fn is_len_call(e: &ExprIr) -> bool {
    matches!(&e.kind, ExprKind::Call { func, .. } if func == "len")
}

/// Lockable `with` contexts: a mutex, possibly behind the shared pointer.
fn is_guarded_state(ty: &Ty) -> bool {
    match ty {
        Ty::Guarded(_) => true,
        Ty::Shared(inner) => matches!(&**inner, Ty::Guarded(_)),
        _ => false,
    }
}

fn e_call_args_skip_first(e: &ExprIr) -> Vec<ExprIr> {
    if let ExprKind::Call { args, .. } = &e.kind {
        args.iter().skip(1).cloned().collect()
    } else {
        Vec::new()
    }
}

fn fake_stmt(e: &ExprIr) -> StmtIr {
    StmtIr {
        id: e.id,
        span: e.span,
        kind: StmtKind::Pass,
    }
}

/// Element-type accumulator for container displays: the first concrete
/// element wins; later elements only refine remaining unknowns.
fn merge_elem(current: Ty, next: Ty) -> Ty {
    if current.is_unknown() {
        return next;
    }
    if current.contains_unknown() && !next.contains_unknown() && compatible(&current, &next) {
        return next;
    }
    current
}

fn shallow_literal_type(e: &ExprIr) -> Option<Ty> {
    match &e.kind {
        ExprKind::Int(_) => Some(Ty::Int),
        ExprKind::Float(_) => Some(Ty::Float),
        ExprKind::Bool(_) => Some(Ty::Bool),
        ExprKind::Str(_) | ExprKind::FString(_) => Some(Ty::String),
        _ => None,
    }
}

/// Structural compatibility with `Never` and `Unknown` as wildcards and
/// borrowed/owned strings interchangeable.
pub fn compatible(found: &Ty, expected: &Ty) -> bool {
    match (found, expected) {
        (Ty::Unknown, _) | (_, Ty::Unknown) => true,
        (Ty::Never, _) | (_, Ty::Never) => true,
        (Ty::Str, Ty::String) | (Ty::String, Ty::Str) => true,
        (Ty::List(a), Ty::List(b)) | (Ty::Set(a), Ty::Set(b)) => compatible(a, b),
        (Ty::Map(ka, va), Ty::Map(kb, vb)) => compatible(ka, kb) && compatible(va, vb),
        (Ty::Tuple(xs), Ty::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(a, b)| compatible(a, b))
        }
        (Ty::Option(a), Ty::Option(b)) => compatible(a, b),
        (Ty::Result(ao, ae), Ty::Result(bo, be)) => compatible(ao, bo) && compatible(ae, be),
        (Ty::Shared(a), Ty::Shared(b)) | (Ty::Guarded(a), Ty::Guarded(b)) => compatible(a, b),
        (
            Ty::Named { path: pa, args: aa },
            Ty::Named { path: pb, args: ab },
        ) => pa == pb && aa.len() == ab.len() && aa.iter().zip(ab).all(|(a, b)| compatible(a, b)),
        _ => found == expected,
    }
}

/// `T` flowing into `Option[T]` is repaired by wrapping, not rejected.
fn needs_some_wrap(found: &Ty, expected: &Ty) -> bool {
    if let Ty::Option(inner) = expected {
        if matches!(found, Ty::Option(_)) {
            return false;
        }
        return compatible(found, inner) && !found.is_unknown();
    }
    false
}

fn unify_branches(a: &Ty, b: &Ty) -> Option<Ty> {
    if compatible(a, b) {
        // Prefer the more specific side.
        if matches!(a, Ty::Option(inner) if inner.is_unknown() || **inner == Ty::Never) {
            if let Ty::Option(_) = b {
                return Some(b.clone());
            }
        }
        if a.contains_unknown() || matches!(a, Ty::Option(i) if **i == Ty::Never) {
            if let Ty::Option(_) = b {
                return Some(b.clone());
            }
            if !b.contains_unknown() {
                return Some(b.clone());
            }
        }
        return Some(a.clone());
    }
    // None on one side lifts the other into the optional form.
    if matches!(a, Ty::Option(i) if **i == Ty::Never) {
        return Some(Ty::option(b.clone()));
    }
    if matches!(b, Ty::Option(i) if **i == Ty::Never) {
        return Some(Ty::option(a.clone()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_wildcards() {
        assert!(compatible(&Ty::result(Ty::Int, Ty::Never), &Ty::result(Ty::Int, Ty::String)));
        assert!(compatible(&Ty::option(Ty::Never), &Ty::option(Ty::Int)));
        assert!(compatible(&Ty::Str, &Ty::String));
        assert!(!compatible(&Ty::Int, &Ty::Float));
    }

    #[test]
    fn some_wrap_detection() {
        assert!(needs_some_wrap(&Ty::Int, &Ty::option(Ty::Int)));
        assert!(!needs_some_wrap(&Ty::option(Ty::Int), &Ty::option(Ty::Int)));
        assert!(!needs_some_wrap(&Ty::Int, &Ty::Int));
    }
}
