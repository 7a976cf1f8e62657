#![forbid(unsafe_code)]

use molt_ast::{
    span_between, AssignStmt, AssignTarget, AugAssignStmt, BinOp, ClassDef, Expr, ExprKind,
    FStringPart, FieldDef, ForStmt, FunctionDef, Ident, IfStmt, ImportStmt, Item, Module, Param,
    RaiseStmt, ReturnStmt, Span, Spanned, Stmt, TupleAssignStmt, TypeExpr, TypeExprKind, UnaryOp,
    WhileStmt, WithStmt,
};
use molt_lex::{unescape, Lexer, Token, TokenKind};

use crate::error::ParseError;

pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, idx: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek2_kind(&self) -> &TokenKind {
        let i = (self.idx + 1).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(ParseError::new(
                format!("expected {what}, found {:?}", self.peek_kind()),
                self.peek().span,
            ))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<Ident, ParseError> {
        let tok = self.peek().clone();
        if let TokenKind::Ident(name) = tok.kind {
            self.advance();
            Ok(Spanned::new(tok.span, name))
        } else {
            Err(ParseError::new(
                format!("expected {what}, found {:?}", tok.kind),
                tok.span,
            ))
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    // ---- module structure ----

    pub fn parse_module(&mut self) -> Result<Module, ParseError> {
        let mut items = Vec::new();
        let mut docstring = None;
        let mut first = true;

        loop {
            self.skip_newlines();

            let mut attrs = Vec::new();
            while let TokenKind::PassAttr(a) = self.peek_kind() {
                attrs.push(a.clone());
                self.advance();
                self.skip_newlines();
            }

            if matches!(self.peek_kind(), TokenKind::Eof) {
                break;
            }

            // Leading string expression is the module docstring.
            if first {
                if let TokenKind::Str(s) = self.peek_kind() {
                    if matches!(self.peek2_kind(), TokenKind::Newline) {
                        docstring = Some(s.clone());
                        self.advance();
                        self.advance();
                        first = false;
                        continue;
                    }
                }
            }
            first = false;

            items.extend(self.parse_item(attrs)?);
        }

        Ok(Module { items, docstring })
    }

    fn parse_item(&mut self, attrs: Vec<String>) -> Result<Vec<Item>, ParseError> {
        let decorators = self.parse_decorators()?;

        match self.peek_kind() {
            TokenKind::KwAsync => {
                let start = self.advance().span;
                if !matches!(self.peek_kind(), TokenKind::KwDef) {
                    return Err(ParseError::new("expected 'def' after 'async'", start));
                }
                self.advance();
                Ok(vec![Item::Function(self.parse_funcdef(
                    true, decorators, attrs, start,
                )?)])
            }
            TokenKind::KwDef => {
                let start = self.advance().span;
                Ok(vec![Item::Function(self.parse_funcdef(
                    false, decorators, attrs, start,
                )?)])
            }
            TokenKind::KwClass => {
                let start = self.advance().span;
                Ok(vec![Item::Class(self.parse_classdef(
                    decorators, attrs, start,
                )?)])
            }
            TokenKind::KwImport | TokenKind::KwFrom => {
                if !decorators.is_empty() {
                    return Err(ParseError::new(
                        "decorators cannot precede an import",
                        self.peek().span,
                    ));
                }
                Ok(vec![Item::Import(self.parse_import()?)])
            }
            _ => {
                if !decorators.is_empty() {
                    return Err(ParseError::new(
                        "decorators must precede a function or class definition",
                        self.peek().span,
                    ));
                }
                Ok(self
                    .parse_stmt_line()?
                    .into_iter()
                    .map(Item::Stmt)
                    .collect())
            }
        }
    }

    fn parse_decorators(&mut self) -> Result<Vec<Ident>, ParseError> {
        let mut decorators = Vec::new();
        while matches!(self.peek_kind(), TokenKind::At) {
            self.advance();
            let name = self.expect_ident("decorator name")?;
            if self.eat(&TokenKind::LParen) {
                return Err(ParseError::unsupported(
                    "decorators with arguments are not supported",
                    name.span,
                ));
            }
            self.expect(&TokenKind::Newline, "newline after decorator")?;
            self.skip_newlines();
            decorators.push(name);
        }
        Ok(decorators)
    }

    fn parse_import(&mut self) -> Result<ImportStmt, ParseError> {
        let start = self.peek().span;
        if self.eat(&TokenKind::KwImport) {
            let module = self.parse_dotted_name()?;
            let end = module.last().map(|i| i.span).unwrap_or(start);
            self.expect(&TokenKind::Newline, "newline after import")?;
            return Ok(ImportStmt {
                span: join(start, end),
                module,
                names: Vec::new(),
            });
        }

        self.expect(&TokenKind::KwFrom, "'from'")?;
        let module = self.parse_dotted_name()?;
        self.expect(&TokenKind::KwImport, "'import'")?;

        let mut names = Vec::new();
        loop {
            let name = self.expect_ident("imported name")?;
            let alias = if self.eat(&TokenKind::KwAs) {
                Some(self.expect_ident("import alias")?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let end = self.peek().span;
        self.expect(&TokenKind::Newline, "newline after import")?;
        Ok(ImportStmt {
            span: join(start, end),
            module,
            names,
        })
    }

    fn parse_dotted_name(&mut self) -> Result<Vec<Ident>, ParseError> {
        let mut parts = vec![self.expect_ident("module name")?];
        while self.eat(&TokenKind::Dot) {
            parts.push(self.expect_ident("module name")?);
        }
        Ok(parts)
    }

    fn parse_funcdef(
        &mut self,
        is_async: bool,
        decorators: Vec<Ident>,
        attrs: Vec<String>,
        start: Span,
    ) -> Result<FunctionDef, ParseError> {
        let name = self.expect_ident("function name")?;
        self.expect(&TokenKind::LParen, "'('")?;

        let mut params = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::RParen) {
            if matches!(self.peek_kind(), TokenKind::Star | TokenKind::StarStar) {
                return Err(ParseError::unsupported(
                    "starred parameters are not supported",
                    self.peek().span,
                ));
            }
            let pname = self.expect_ident("parameter name")?;
            let ty = if self.eat(&TokenKind::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };
            let default = if self.eat(&TokenKind::Eq) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param {
                span: pname.span,
                name: pname,
                ty,
                default,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;

        let ret = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };

        self.expect(&TokenKind::Colon, "':'")?;
        let mut body = self.parse_suite()?;
        let docstring = take_docstring(&mut body);

        Ok(FunctionDef {
            span: join(start, name.span),
            name,
            params,
            ret,
            body,
            is_async,
            decorators,
            attrs,
            docstring,
        })
    }

    fn parse_classdef(
        &mut self,
        decorators: Vec<Ident>,
        attrs: Vec<String>,
        start: Span,
    ) -> Result<ClassDef, ParseError> {
        let name = self.expect_ident("class name")?;

        let mut bases = Vec::new();
        if self.eat(&TokenKind::LParen) {
            while !matches!(self.peek_kind(), TokenKind::RParen) {
                bases.push(self.expect_ident("base class name")?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
        }

        self.expect(&TokenKind::Colon, "':'")?;
        self.expect(&TokenKind::Newline, "newline after class header")?;
        self.expect(&TokenKind::Indent, "indented class body")?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut docstring = None;
        let mut first = true;

        loop {
            self.skip_newlines();

            let mut member_attrs = Vec::new();
            while let TokenKind::PassAttr(a) = self.peek_kind() {
                member_attrs.push(a.clone());
                self.advance();
                self.skip_newlines();
            }

            if self.eat(&TokenKind::Dedent) {
                break;
            }

            if first {
                if let TokenKind::Str(s) = self.peek_kind() {
                    if matches!(self.peek2_kind(), TokenKind::Newline) {
                        docstring = Some(s.clone());
                        self.advance();
                        self.advance();
                        first = false;
                        continue;
                    }
                }
            }
            first = false;

            let member_decorators = self.parse_decorators()?;
            match self.peek_kind() {
                TokenKind::KwAsync => {
                    let mstart = self.advance().span;
                    self.expect(&TokenKind::KwDef, "'def'")?;
                    methods.push(self.parse_funcdef(
                        true,
                        member_decorators,
                        member_attrs,
                        mstart,
                    )?);
                }
                TokenKind::KwDef => {
                    let mstart = self.advance().span;
                    methods.push(self.parse_funcdef(
                        false,
                        member_decorators,
                        member_attrs,
                        mstart,
                    )?);
                }
                TokenKind::KwPass => {
                    self.advance();
                    self.expect(&TokenKind::Newline, "newline after 'pass'")?;
                }
                TokenKind::Ident(_) => {
                    let fname = self.expect_ident("attribute name")?;
                    self.expect(&TokenKind::Colon, "':' after attribute name")?;
                    let ty = self.parse_type()?;
                    let default = if self.eat(&TokenKind::Eq) {
                        Some(self.parse_expr()?)
                    } else {
                        None
                    };
                    self.expect(&TokenKind::Newline, "newline after attribute")?;
                    fields.push(FieldDef {
                        span: fname.span,
                        name: fname,
                        ty,
                        default,
                    });
                }
                _ => {
                    return Err(ParseError::new(
                        "expected method or annotated attribute in class body",
                        self.peek().span,
                    ));
                }
            }
        }

        Ok(ClassDef {
            span: join(start, name.span),
            name,
            bases,
            fields,
            methods,
            decorators,
            attrs,
            docstring,
        })
    }

    // ---- statements ----

    fn parse_suite(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.eat(&TokenKind::Newline) {
            self.expect(&TokenKind::Indent, "indented block")?;
            let mut out = Vec::new();
            loop {
                self.skip_newlines();
                while matches!(self.peek_kind(), TokenKind::PassAttr(_)) {
                    self.advance();
                    self.skip_newlines();
                }
                if self.eat(&TokenKind::Dedent) {
                    break;
                }
                if matches!(self.peek_kind(), TokenKind::Eof) {
                    break;
                }
                out.extend(self.parse_stmt_line()?);
            }
            Ok(out)
        } else {
            // Single-line suite: simple statements separated by ';'.
            let mut out = vec![self.parse_simple_stmt()?];
            while self.eat(&TokenKind::Semicolon) {
                out.push(self.parse_simple_stmt()?);
            }
            self.expect(&TokenKind::Newline, "newline at end of statement")?;
            Ok(out)
        }
    }

    fn parse_stmt_line(&mut self) -> Result<Vec<Stmt>, ParseError> {
        match self.peek_kind() {
            TokenKind::KwIf => Ok(vec![self.parse_if()?]),
            TokenKind::KwWhile => Ok(vec![self.parse_while()?]),
            TokenKind::KwFor => Ok(vec![self.parse_for()?]),
            TokenKind::KwWith => Ok(vec![self.parse_with()?]),
            TokenKind::KwDef | TokenKind::KwClass => Err(ParseError::unsupported(
                "nested definitions are not supported",
                self.peek().span,
            )),
            TokenKind::KwAsync => {
                // `async with` / `async for` fold into their sync forms; the
                // enclosing function already carries the async flag.
                let span = self.advance().span;
                match self.peek_kind() {
                    TokenKind::KwWith => Ok(vec![self.parse_with()?]),
                    TokenKind::KwFor => Ok(vec![self.parse_for()?]),
                    _ => Err(ParseError::unsupported(
                        "nested definitions are not supported",
                        span,
                    )),
                }
            }
            _ => {
                let mut out = vec![self.parse_simple_stmt()?];
                while self.eat(&TokenKind::Semicolon) {
                    out.push(self.parse_simple_stmt()?);
                }
                self.expect(&TokenKind::Newline, "newline at end of statement")?;
                Ok(out)
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(&TokenKind::KwIf, "'if'")?.span;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let then_body = self.parse_suite()?;

        let mut elif_clauses = Vec::new();
        let mut else_body = Vec::new();

        loop {
            if self.eat(&TokenKind::KwElif) {
                let c = self.parse_expr()?;
                self.expect(&TokenKind::Colon, "':'")?;
                elif_clauses.push((c, self.parse_suite()?));
            } else if self.eat(&TokenKind::KwElse) {
                self.expect(&TokenKind::Colon, "':'")?;
                else_body = self.parse_suite()?;
                break;
            } else {
                break;
            }
        }

        Ok(Stmt::If(IfStmt {
            span: start,
            cond,
            then_body,
            elif_clauses,
            else_body,
        }))
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(&TokenKind::KwWhile, "'while'")?.span;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let body = self.parse_suite()?;
        Ok(Stmt::While(WhileStmt {
            span: start,
            cond,
            body,
        }))
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(&TokenKind::KwFor, "'for'")?.span;
        let mut targets = vec![self.expect_ident("loop variable")?];
        while self.eat(&TokenKind::Comma) {
            targets.push(self.expect_ident("loop variable")?);
        }
        self.expect(&TokenKind::KwIn, "'in'")?;
        let iter = self.parse_expr()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let body = self.parse_suite()?;
        Ok(Stmt::For(ForStmt {
            span: start,
            targets,
            iter,
            body,
        }))
    }

    fn parse_with(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(&TokenKind::KwWith, "'with'")?.span;
        let context = self.parse_expr()?;
        let target = if self.eat(&TokenKind::KwAs) {
            Some(self.expect_ident("'with' target")?)
        } else {
            None
        };
        if matches!(self.peek_kind(), TokenKind::Comma) {
            return Err(ParseError::unsupported(
                "multiple context managers are not supported",
                self.peek().span,
            ));
        }
        self.expect(&TokenKind::Colon, "':'")?;
        let body = self.parse_suite()?;
        Ok(Stmt::With(WithStmt {
            span: start,
            context,
            target,
            body,
        }))
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        let span = self.peek().span;
        match self.peek_kind() {
            TokenKind::KwReturn => {
                self.advance();
                let value = if matches!(
                    self.peek_kind(),
                    TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::Return(ReturnStmt { span, value }))
            }
            TokenKind::KwBreak => {
                self.advance();
                Ok(Stmt::Break { span })
            }
            TokenKind::KwContinue => {
                self.advance();
                Ok(Stmt::Continue { span })
            }
            TokenKind::KwPass => {
                self.advance();
                Ok(Stmt::Pass { span })
            }
            TokenKind::KwRaise => {
                self.advance();
                let exc = if matches!(
                    self.peek_kind(),
                    TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::Raise(RaiseStmt { span, exc }))
            }
            TokenKind::KwTry => Err(ParseError::unsupported(
                "try/except is not supported; use Result-returning functions",
                span,
            )),
            TokenKind::KwYield => Err(ParseError::unsupported(
                "generators are not supported",
                span,
            )),
            TokenKind::KwGlobal | TokenKind::KwNonlocal => Err(ParseError::unsupported(
                "global and nonlocal declarations are not supported",
                span,
            )),
            TokenKind::KwDel => Err(ParseError::unsupported(
                "del statements are not supported",
                span,
            )),
            TokenKind::KwImport | TokenKind::KwFrom => Err(ParseError::unsupported(
                "imports are only allowed at module level",
                span,
            )),
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_expr_stmt(&mut self) -> Result<Stmt, ParseError> {
        let first = self.parse_expr()?;
        let span = first.span;

        // Tuple-unpacking assignment: `a, b = expr`.
        if matches!(self.peek_kind(), TokenKind::Comma) {
            let mut targets = vec![expr_to_name(first)?];
            while self.eat(&TokenKind::Comma) {
                let e = self.parse_expr()?;
                targets.push(expr_to_name(e)?);
            }
            self.expect(&TokenKind::Eq, "'=' after unpack targets")?;
            let value = self.parse_expr()?;
            return Ok(Stmt::TupleAssign(TupleAssignStmt {
                span,
                targets,
                value,
            }));
        }

        if self.eat(&TokenKind::Colon) {
            let annotation = self.parse_type()?;
            self.expect(&TokenKind::Eq, "'=' after annotated binding")?;
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign(AssignStmt {
                span,
                target: expr_to_target(first)?,
                annotation: Some(annotation),
                value,
            }));
        }

        if self.eat(&TokenKind::Eq) {
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign(AssignStmt {
                span,
                target: expr_to_target(first)?,
                annotation: None,
                value,
            }));
        }

        let aug = match self.peek_kind() {
            TokenKind::PlusEq => Some(BinOp::Add),
            TokenKind::MinusEq => Some(BinOp::Sub),
            TokenKind::StarEq => Some(BinOp::Mul),
            TokenKind::SlashEq => Some(BinOp::Div),
            TokenKind::PercentEq => Some(BinOp::Mod),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            let value = self.parse_expr()?;
            return Ok(Stmt::AugAssign(AugAssignStmt {
                span,
                target: expr_to_target(first)?,
                op,
                value,
            }));
        }

        Ok(Stmt::Expr(first))
    }

    // ---- type annotations ----

    pub fn parse_type(&mut self) -> Result<TypeExpr, ParseError> {
        let first = self.parse_type_atom()?;
        if !matches!(self.peek_kind(), TokenKind::Pipe) {
            return Ok(first);
        }
        let span = first.span;
        let mut variants = vec![first];
        while self.eat(&TokenKind::Pipe) {
            variants.push(self.parse_type_atom()?);
        }
        Ok(TypeExpr {
            span,
            kind: TypeExprKind::Union(variants),
        })
    }

    fn parse_type_atom(&mut self) -> Result<TypeExpr, ParseError> {
        if matches!(self.peek_kind(), TokenKind::KwNone) {
            let span = self.advance().span;
            return Ok(TypeExpr {
                span,
                kind: TypeExprKind::NoneType,
            });
        }

        let mut path = vec![self.expect_ident("type name")?];
        while self.eat(&TokenKind::Dot) {
            path.push(self.expect_ident("type name")?);
        }
        let span = path[0].span;

        let mut args = Vec::new();
        if self.eat(&TokenKind::LBracket) {
            loop {
                args.push(self.parse_type()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBracket, "']'")?;
        }

        Ok(TypeExpr {
            span,
            kind: TypeExprKind::Name { path, args },
        })
    }

    // ---- expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let then = self.parse_or()?;
        if !self.eat(&TokenKind::KwIf) {
            return Ok(then);
        }
        let cond = self.parse_or()?;
        self.expect(&TokenKind::KwElse, "'else' in conditional expression")?;
        let orelse = self.parse_expr()?;
        let span = then.span;
        Ok(Expr {
            span,
            kind: ExprKind::IfExp {
                cond: Box::new(cond),
                then: Box::new(then),
                orelse: Box::new(orelse),
            },
        })
    }

    /// Entry point used for f-string interpolations: a bare expression
    /// followed by end-of-fragment.
    pub fn parse_embedded_expr(&mut self) -> Result<Expr, ParseError> {
        let e = self.parse_expr()?;
        self.skip_newlines();
        if !matches!(self.peek_kind(), TokenKind::Eof) {
            return Err(ParseError::new(
                "unexpected trailing tokens in interpolation",
                self.peek().span,
            ));
        }
        Ok(e)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::KwOr) {
            let right = self.parse_and()?;
            left = binary(left, BinOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::KwAnd) {
            let right = self.parse_not()?;
            left = binary(left, BinOp::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek_kind(), TokenKind::KwNot) {
            // `not x in y` parses as `x not in y` at comparison level, so a
            // leading `not` here always negates.
            let span = self.advance().span;
            let operand = self.parse_not()?;
            return Ok(Expr {
                span,
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_bitor()?;
        let Some(op) = self.comparison_op()? else {
            return Ok(left);
        };
        let right = self.parse_bitor()?;
        if self.comparison_op()?.is_some() {
            return Err(ParseError::unsupported(
                "chained comparisons are not supported",
                self.peek().span,
            ));
        }
        Ok(binary(left, op, right))
    }

    fn comparison_op(&mut self) -> Result<Option<BinOp>, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::Neq => BinOp::Ne,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Le => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Ge => BinOp::Ge,
            TokenKind::KwIn => BinOp::In,
            TokenKind::KwNot => {
                if matches!(self.peek2_kind(), TokenKind::KwIn) {
                    self.advance();
                    self.advance();
                    return Ok(Some(BinOp::NotIn));
                }
                return Ok(None);
            }
            TokenKind::KwIs => {
                self.advance();
                if self.eat(&TokenKind::KwNot) {
                    return Ok(Some(BinOp::IsNot));
                }
                return Ok(Some(BinOp::Is));
            }
            _ => return Ok(None),
        };
        self.advance();
        Ok(Some(op))
    }

    fn parse_bitor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitxor()?;
        while matches!(self.peek_kind(), TokenKind::Pipe) {
            self.advance();
            let right = self.parse_bitxor()?;
            left = binary(left, BinOp::BitOr, right);
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitand()?;
        while matches!(self.peek_kind(), TokenKind::Caret) {
            self.advance();
            let right = self.parse_bitand()?;
            left = binary(left, BinOp::BitXor, right);
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_shift()?;
        while matches!(self.peek_kind(), TokenKind::Amp) {
            self.advance();
            let right = self.parse_shift()?;
            left = binary(left, BinOp::BitAnd, right);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_arith()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Shl => BinOp::Shl,
                TokenKind::Shr => BinOp::Shr,
                _ => break,
            };
            self.advance();
            let right = self.parse_arith()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek_kind(), TokenKind::Minus) {
            let span = self.advance().span;
            let operand = self.parse_factor()?;
            return Ok(Expr {
                span,
                kind: ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if self.eat(&TokenKind::StarStar) {
            let exp = self.parse_factor()?;
            return Ok(binary(base, BinOp::Pow, exp));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek_kind(), TokenKind::KwAwait) {
            let span = self.advance().span;
            let value = self.parse_postfix()?;
            return Ok(Expr {
                span,
                kind: ExprKind::Await(Box::new(value)),
            });
        }

        let mut expr = self.parse_atom()?;

        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let attr = self.expect_ident("attribute name")?;
                    let span = expr.span;
                    expr = Expr {
                        span,
                        kind: ExprKind::Attribute {
                            obj: Box::new(expr),
                            attr,
                        },
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_call_args()?;
                    let span = expr.span;
                    expr = Expr {
                        span,
                        kind: ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            kwargs,
                        },
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    if matches!(self.peek_kind(), TokenKind::Colon) {
                        return Err(ParseError::unsupported(
                            "slice expressions are not supported",
                            self.peek().span,
                        ));
                    }
                    let index = self.parse_expr()?;
                    if matches!(self.peek_kind(), TokenKind::Colon) {
                        return Err(ParseError::unsupported(
                            "slice expressions are not supported",
                            self.peek().span,
                        ));
                    }
                    self.expect(&TokenKind::RBracket, "']'")?;
                    let span = expr.span;
                    expr = Expr {
                        span,
                        kind: ExprKind::Subscript {
                            obj: Box::new(expr),
                            index: Box::new(index),
                        },
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(Ident, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        while !matches!(self.peek_kind(), TokenKind::RParen) {
            if matches!(self.peek_kind(), TokenKind::Star | TokenKind::StarStar) {
                return Err(ParseError::unsupported(
                    "starred arguments are not supported",
                    self.peek().span,
                ));
            }

            // `name=value` is a keyword argument; plain `name ==` is not.
            let is_kwarg = matches!(self.peek_kind(), TokenKind::Ident(_))
                && matches!(self.peek2_kind(), TokenKind::Eq);
            if is_kwarg {
                let name = self.expect_ident("keyword argument name")?;
                self.expect(&TokenKind::Eq, "'='")?;
                let value = self.parse_expr()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(ParseError::new(
                        "positional argument after keyword argument",
                        self.peek().span,
                    ));
                }
                args.push(self.parse_expr()?);
            }

            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        let span = tok.span;

        match tok.kind {
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expr {
                    span,
                    kind: ExprKind::Int(n),
                })
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr {
                    span,
                    kind: ExprKind::Float(v),
                })
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr {
                    span,
                    kind: ExprKind::Str(s),
                })
            }
            TokenKind::FStr(raw) => {
                self.advance();
                let parts = parse_fstring_parts(&raw, span.offset() + 2)?;
                Ok(Expr {
                    span,
                    kind: ExprKind::FString(parts),
                })
            }
            TokenKind::KwNone => {
                self.advance();
                Ok(Expr {
                    span,
                    kind: ExprKind::NoneLit,
                })
            }
            TokenKind::KwTrue => {
                self.advance();
                Ok(Expr {
                    span,
                    kind: ExprKind::Bool(true),
                })
            }
            TokenKind::KwFalse => {
                self.advance();
                Ok(Expr {
                    span,
                    kind: ExprKind::Bool(false),
                })
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr {
                    span,
                    kind: ExprKind::Name(name),
                })
            }
            TokenKind::LParen => {
                self.advance();
                if self.eat(&TokenKind::RParen) {
                    return Err(ParseError::new("empty parentheses", span));
                }
                let first = self.parse_expr()?;
                if matches!(self.peek_kind(), TokenKind::Comma) {
                    let mut elems = vec![first];
                    while self.eat(&TokenKind::Comma) {
                        if matches!(self.peek_kind(), TokenKind::RParen) {
                            break;
                        }
                        elems.push(self.parse_expr()?);
                    }
                    self.expect(&TokenKind::RParen, "')'")?;
                    return Ok(Expr {
                        span,
                        kind: ExprKind::Tuple(elems),
                    });
                }
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(first)
            }
            TokenKind::LBracket => {
                self.advance();
                if self.eat(&TokenKind::RBracket) {
                    return Ok(Expr {
                        span,
                        kind: ExprKind::List(Vec::new()),
                    });
                }
                let first = self.parse_expr()?;
                if self.eat(&TokenKind::KwFor) {
                    let target = self.expect_ident("comprehension variable")?;
                    self.expect(&TokenKind::KwIn, "'in'")?;
                    let iter = self.parse_or()?;
                    let cond = if self.eat(&TokenKind::KwIf) {
                        Some(Box::new(self.parse_or()?))
                    } else {
                        None
                    };
                    if matches!(self.peek_kind(), TokenKind::KwFor | TokenKind::KwIf) {
                        return Err(ParseError::unsupported(
                            "comprehensions with multiple clauses are not supported",
                            self.peek().span,
                        ));
                    }
                    self.expect(&TokenKind::RBracket, "']'")?;
                    return Ok(Expr {
                        span,
                        kind: ExprKind::ListComp {
                            element: Box::new(first),
                            target,
                            iter: Box::new(iter),
                            cond,
                        },
                    });
                }
                let mut elems = vec![first];
                while self.eat(&TokenKind::Comma) {
                    if matches!(self.peek_kind(), TokenKind::RBracket) {
                        break;
                    }
                    elems.push(self.parse_expr()?);
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Expr {
                    span,
                    kind: ExprKind::List(elems),
                })
            }
            TokenKind::LBrace => {
                self.advance();
                if self.eat(&TokenKind::RBrace) {
                    return Ok(Expr {
                        span,
                        kind: ExprKind::Dict(Vec::new()),
                    });
                }
                let first = self.parse_expr()?;
                if self.eat(&TokenKind::Colon) {
                    let first_val = self.parse_expr()?;
                    let mut pairs = vec![(first, first_val)];
                    while self.eat(&TokenKind::Comma) {
                        if matches!(self.peek_kind(), TokenKind::RBrace) {
                            break;
                        }
                        let k = self.parse_expr()?;
                        self.expect(&TokenKind::Colon, "':'")?;
                        let v = self.parse_expr()?;
                        pairs.push((k, v));
                    }
                    self.expect(&TokenKind::RBrace, "'}'")?;
                    return Ok(Expr {
                        span,
                        kind: ExprKind::Dict(pairs),
                    });
                }
                let mut elems = vec![first];
                while self.eat(&TokenKind::Comma) {
                    if matches!(self.peek_kind(), TokenKind::RBrace) {
                        break;
                    }
                    elems.push(self.parse_expr()?);
                }
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Expr {
                    span,
                    kind: ExprKind::Set(elems),
                })
            }
            TokenKind::KwLambda => Err(ParseError::unsupported(
                "lambda expressions are not supported",
                span,
            )),
            TokenKind::KwYield => Err(ParseError::unsupported(
                "generators are not supported",
                span,
            )),
            other => Err(ParseError::new(
                format!("unexpected token {other:?}"),
                span,
            )),
        }
    }
}

fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    let span = left.span;
    Expr {
        span,
        kind: ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    }
}

fn join(start: Span, end: Span) -> Span {
    let s = start.offset();
    let e = end.offset() + end.len();
    span_between(s, e.max(s))
}

fn expr_to_name(e: Expr) -> Result<Ident, ParseError> {
    match e.kind {
        ExprKind::Name(name) => Ok(Spanned::new(e.span, name)),
        _ => Err(ParseError::new(
            "unpack targets must be plain names",
            e.span,
        )),
    }
}

fn expr_to_target(e: Expr) -> Result<AssignTarget, ParseError> {
    match e.kind {
        ExprKind::Name(name) => Ok(AssignTarget::Name(Spanned::new(e.span, name))),
        ExprKind::Attribute { obj, attr } => Ok(AssignTarget::Attribute {
            span: e.span,
            obj: *obj,
            attr,
        }),
        ExprKind::Subscript { obj, index } => Ok(AssignTarget::Subscript {
            span: e.span,
            obj: *obj,
            index: *index,
        }),
        _ => Err(ParseError::new("invalid assignment target", e.span)),
    }
}

fn take_docstring(body: &mut Vec<Stmt>) -> Option<String> {
    if let Some(Stmt::Expr(Expr {
        kind: ExprKind::Str(s),
        ..
    })) = body.first()
    {
        let doc = s.clone();
        body.remove(0);
        Some(doc)
    } else {
        None
    }
}

/// Split a raw f-string body into literal and interpolation parts.
///
/// `base` is the absolute byte offset of the body within the source file, so
/// interpolation expressions get real spans.
fn parse_fstring_parts(raw: &str, base: usize) -> Result<Vec<FStringPart>, ParseError> {
    let bytes = raw.as_bytes();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let flush =
        |literal: &mut String, parts: &mut Vec<FStringPart>, at: usize| -> Result<(), ParseError> {
            if literal.is_empty() {
                return Ok(());
            }
            let cooked = unescape(literal).ok_or_else(|| {
                ParseError::new(
                    "invalid escape sequence in f-string",
                    span_between(base + at, base + at),
                )
            })?;
            parts.push(FStringPart::Literal(cooked));
            literal.clear();
            Ok(())
        };

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'{' {
            if bytes.get(i + 1) == Some(&b'{') {
                literal.push('{');
                i += 2;
                continue;
            }
            flush(&mut literal, &mut parts, i)?;

            // Scan to the matching brace, tracking nesting and quotes.
            let expr_start = i + 1;
            let mut depth = 0usize;
            let mut quote: Option<u8> = None;
            let mut spec_colon: Option<usize> = None;
            let mut j = expr_start;
            let end = loop {
                if j >= bytes.len() {
                    return Err(ParseError::new(
                        "unterminated interpolation in f-string",
                        span_between(base + i, base + raw.len()),
                    ));
                }
                let c = bytes[j];
                match quote {
                    Some(q) => {
                        if c == b'\\' {
                            j += 1;
                        } else if c == q {
                            quote = None;
                        }
                    }
                    None => match c {
                        b'"' | b'\'' => quote = Some(c),
                        b'(' | b'[' | b'{' => depth += 1,
                        b')' | b']' => depth = depth.saturating_sub(1),
                        b'}' => {
                            if depth == 0 {
                                break j;
                            }
                            depth -= 1;
                        }
                        b':' if depth == 0 && spec_colon.is_none() => {
                            spec_colon = Some(j);
                        }
                        b'!' if depth == 0 => {
                            return Err(ParseError::unsupported(
                                "f-string conversion flags are not supported",
                                span_between(base + j, base + j + 1),
                            ));
                        }
                        _ => {}
                    },
                }
                j += 1;
            };

            let (expr_end, spec) = match spec_colon {
                Some(c) => (c, raw[c + 1..end].to_string()),
                None => (end, String::new()),
            };
            let expr_src = &raw[expr_start..expr_end];
            if expr_src.trim().is_empty() {
                return Err(ParseError::new(
                    "empty interpolation in f-string",
                    span_between(base + i, base + end + 1),
                ));
            }

            let tokens = Lexer::with_offset(expr_src, base + expr_start)
                .lex()
                .map_err(|e| ParseError::new(e.message, e.span))?;
            let expr = Parser::new(&tokens).parse_embedded_expr()?;
            parts.push(FStringPart::Interp { expr, spec });

            i = end + 1;
        } else if b == b'}' {
            if bytes.get(i + 1) == Some(&b'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(ParseError::new(
                "single '}' in f-string",
                span_between(base + i, base + i + 1),
            ));
        } else {
            // Multi-byte characters pass through untouched.
            let ch_len = utf8_len(b);
            literal.push_str(&raw[i..i + ch_len]);
            i += ch_len;
        }
    }

    flush(&mut literal, &mut parts, raw.len())?;
    Ok(parts)
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}
