//! Recursive-descent parser: [`Token`] stream to [`Program`].
//!
//! Precedence is handled by a ladder of mutually-recursive `parse_*`
//! methods (lowest to highest binding power), the conventional shape for
//! a hand-written JS parser and the one the teacher's own parser uses.

use crate::core::ast::*;
use crate::core::token::{Lexer, PositionedToken, Token};
use crate::error::JSError;

pub struct Parser {
    tokens: Vec<PositionedToken>,
    pos: usize,
    filename: String,
}

impl Parser {
    pub fn new(source: &str, filename: &str) -> Result<Parser, JSError> {
        let tokens = Lexer::new(source).tokenize(filename)?;
        Ok(Parser { tokens, pos: 0, filename: filename.to_string() })
    }

    pub fn parse_program(mut self) -> Result<Program, JSError> {
        let mut stmts = Vec::new();
        while !self.at_eof() {
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    fn cur(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn at_eof(&self) -> bool {
        matches!(self.cur(), Token::Eof)
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn column(&self) -> usize {
        self.tokens[self.pos].column
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn check(&self, t: &Token) -> bool {
        self.cur() == t
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.check(t) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: &Token) -> Result<(), JSError> {
        if self.eat(t) {
            Ok(())
        } else {
            Err(self.err(format!("expected {:?}, found {:?}", t, self.cur())))
        }
    }

    fn err(&self, message: impl Into<String>) -> JSError {
        JSError::Parse { file: self.filename.clone(), line: self.line(), column: self.column(), message: message.into() }
    }

    fn kw(&self, name: &str) -> bool {
        matches!(self.cur(), Token::Keyword(k) if *k == name)
    }

    fn eat_kw(&mut self, name: &str) -> bool {
        if self.kw(name) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn ident_name(&mut self) -> Result<String, JSError> {
        match self.bump() {
            Token::Ident(s) => Ok(s),
            Token::Keyword(k) => Ok(k.to_string()),
            other => Err(self.err(format!("expected identifier, found {other:?}"))),
        }
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Result<Statement, JSError> {
        if self.check(&Token::LBrace) {
            return Ok(Statement::Block(self.parse_block()?));
        }
        if self.eat(&Token::Semicolon) {
            return Ok(Statement::Empty);
        }
        if self.kw("var") || self.kw("let") || self.kw("const") {
            let s = self.parse_var_decl()?;
            self.eat(&Token::Semicolon);
            return Ok(s);
        }
        if self.kw("function") {
            return Ok(Statement::FunctionDecl(self.parse_function(false)?));
        }
        if self.eat_kw("async") && self.kw("function") {
            let mut f = self.parse_function(false)?;
            f.is_async = true;
            return Ok(Statement::FunctionDecl(f));
        }
        if self.kw("class") {
            return Ok(Statement::ClassDecl(self.parse_class()?));
        }
        if self.eat_kw("if") {
            return self.parse_if();
        }
        if self.eat_kw("for") {
            return self.parse_for();
        }
        if self.eat_kw("while") {
            self.expect(&Token::LParen)?;
            let test = self.parse_expr()?;
            self.expect(&Token::RParen)?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Statement::While { test, body });
        }
        if self.eat_kw("do") {
            let body = Box::new(self.parse_statement()?);
            if !self.eat_kw("while") {
                return Err(self.err("expected 'while' after do-block"));
            }
            self.expect(&Token::LParen)?;
            let test = self.parse_expr()?;
            self.expect(&Token::RParen)?;
            self.eat(&Token::Semicolon);
            return Ok(Statement::DoWhile { test, body });
        }
        if self.eat_kw("break") {
            let label = if let Token::Ident(n) = self.cur().clone() {
                self.bump();
                Some(n)
            } else {
                None
            };
            self.eat(&Token::Semicolon);
            return Ok(Statement::Break(label));
        }
        if self.eat_kw("continue") {
            let label = if let Token::Ident(n) = self.cur().clone() {
                self.bump();
                Some(n)
            } else {
                None
            };
            self.eat(&Token::Semicolon);
            return Ok(Statement::Continue(label));
        }
        if self.eat_kw("return") {
            let value = if self.check(&Token::Semicolon) || self.check(&Token::RBrace) || self.at_eof() { None } else { Some(self.parse_expr()?) };
            self.eat(&Token::Semicolon);
            return Ok(Statement::Return(value));
        }
        if self.eat_kw("throw") {
            let value = self.parse_expr()?;
            self.eat(&Token::Semicolon);
            return Ok(Statement::Throw(value));
        }
        if self.eat_kw("try") {
            return self.parse_try();
        }
        if self.eat_kw("switch") {
            return self.parse_switch();
        }
        if let Token::Ident(name) = self.cur().clone() {
            if self.tokens.get(self.pos + 1).map(|p| &p.token) == Some(&Token::Colon) {
                self.bump();
                self.bump();
                let body = Box::new(self.parse_statement()?);
                return Ok(Statement::Labeled { label: name, body });
            }
        }
        let expr = self.parse_expr()?;
        self.eat(&Token::Semicolon);
        Ok(Statement::Expr(expr))
    }

    fn parse_block(&mut self) -> Result<Vec<Statement>, JSError> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) && !self.at_eof() {
            stmts.push(self.parse_statement()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    fn parse_var_decl(&mut self) -> Result<Statement, JSError> {
        let kind = if self.eat_kw("var") {
            Declarator::Var
        } else if self.eat_kw("let") {
            Declarator::Let
        } else {
            self.eat_kw("const");
            Declarator::Const
        };
        let mut decls = Vec::new();
        loop {
            let pattern = self.parse_binding_pattern()?;
            let init = if self.eat(&Token::Assign) { Some(self.parse_assign_expr()?) } else { None };
            decls.push((pattern, init));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(Statement::VarDecl { kind, declarations: decls })
    }

    fn parse_binding_pattern(&mut self) -> Result<Pattern, JSError> {
        if self.eat(&Token::LBracket) {
            let mut items = Vec::new();
            while !self.check(&Token::RBracket) {
                if self.eat(&Token::Comma) {
                    items.push(None);
                    continue;
                }
                items.push(Some(self.parse_binding_pattern()?));
                if !self.check(&Token::RBracket) {
                    self.eat(&Token::Comma);
                }
            }
            self.expect(&Token::RBracket)?;
            return Ok(Pattern::Array(items));
        }
        if self.eat(&Token::LBrace) {
            let mut fields = Vec::new();
            while !self.check(&Token::RBrace) {
                let key = self.ident_name()?;
                let pattern = if self.eat(&Token::Colon) { self.parse_binding_pattern()? } else { Pattern::Ident(key.clone()) };
                fields.push((key, pattern));
                if !self.check(&Token::RBrace) {
                    self.eat(&Token::Comma);
                }
            }
            self.expect(&Token::RBrace)?;
            return Ok(Pattern::Object(fields));
        }
        if self.eat(&Token::DotDotDot) {
            return Ok(Pattern::Rest(Box::new(self.parse_binding_pattern()?)));
        }
        let name = self.ident_name()?;
        let base = Pattern::Ident(name);
        if self.eat(&Token::Assign) {
            let default = self.parse_assign_expr()?;
            Ok(Pattern::Default(Box::new(base), Box::new(default)))
        } else {
            Ok(base)
        }
    }

    fn parse_if(&mut self) -> Result<Statement, JSError> {
        self.expect(&Token::LParen)?;
        let test = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat_kw("else") { Some(Box::new(self.parse_statement()?)) } else { None };
        Ok(Statement::If { test, consequent, alternate })
    }

    fn parse_for(&mut self) -> Result<Statement, JSError> {
        self.expect(&Token::LParen)?;

        if (self.kw("let") || self.kw("const") || self.kw("var")) && self.looks_like_for_in_of() {
            let decl_kind = if self.eat_kw("var") {
                Some(Declarator::Var)
            } else if self.eat_kw("let") {
                Some(Declarator::Let)
            } else {
                self.eat_kw("const");
                Some(Declarator::Const)
            };
            let pattern = self.parse_binding_pattern()?;
            if self.eat_kw("in") {
                let object = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Statement::ForIn { decl_kind, pattern, object, body });
            }
            self.eat_kw("of");
            let iterable = self.parse_assign_expr()?;
            self.expect(&Token::RParen)?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Statement::ForOf { decl_kind, pattern, iterable, body, is_await: false });
        }

        let init = if self.check(&Token::Semicolon) {
            None
        } else if self.kw("var") || self.kw("let") || self.kw("const") {
            Some(Box::new(self.parse_var_decl()?))
        } else {
            Some(Box::new(Statement::Expr(self.parse_expr()?)))
        };
        self.expect(&Token::Semicolon)?;
        let test = if self.check(&Token::Semicolon) { None } else { Some(self.parse_expr()?) };
        self.expect(&Token::Semicolon)?;
        let update = if self.check(&Token::RParen) { None } else { Some(self.parse_expr()?) };
        self.expect(&Token::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(Statement::For { init, test, update, body })
    }

    fn looks_like_for_in_of(&self) -> bool {
        let mut i = self.pos + 1;
        while let Some(p) = self.tokens.get(i) {
            match &p.token {
                Token::Keyword(k) if *k == "in" || *k == "of" => return true,
                Token::Semicolon => return false,
                Token::Eof => return false,
                _ => i += 1,
            }
        }
        false
    }

    fn parse_try(&mut self) -> Result<Statement, JSError> {
        let block = self.parse_block()?;
        let (catch_param, catch_block) = if self.eat_kw("catch") {
            let param = if self.eat(&Token::LParen) {
                let p = self.parse_binding_pattern()?;
                self.expect(&Token::RParen)?;
                Some(p)
            } else {
                None
            };
            (param, Some(self.parse_block()?))
        } else {
            (None, None)
        };
        let finally_block = if self.eat_kw("finally") { Some(self.parse_block()?) } else { None };
        Ok(Statement::Try { block, catch_param, catch_block, finally_block })
    }

    fn parse_switch(&mut self) -> Result<Statement, JSError> {
        self.expect(&Token::LParen)?;
        let discriminant = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        self.expect(&Token::LBrace)?;
        let mut cases = Vec::new();
        while !self.check(&Token::RBrace) {
            let test = if self.eat_kw("case") {
                let e = self.parse_expr()?;
                Some(e)
            } else {
                self.eat_kw("default");
                None
            };
            self.expect(&Token::Colon)?;
            let mut body = Vec::new();
            while !self.kw("case") && !self.kw("default") && !self.check(&Token::RBrace) {
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        self.expect(&Token::RBrace)?;
        Ok(Statement::Switch { discriminant, cases })
    }

    fn parse_function(&mut self, is_arrow: bool) -> Result<Function, JSError> {
        self.eat_kw("function");
        let is_generator = self.eat(&Token::Star);
        let name = if let Token::Ident(n) = self.cur().clone() {
            self.bump();
            Some(n)
        } else {
            None
        };
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(Function { name, params, body, is_async: false, is_generator, is_arrow })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, JSError> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            let rest = self.eat(&Token::DotDotDot);
            let pattern = self.parse_binding_pattern()?;
            params.push(Param { pattern, rest });
            if !self.check(&Token::RParen) {
                self.eat(&Token::Comma);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(params)
    }

    fn parse_class(&mut self) -> Result<ClassDecl, JSError> {
        self.eat_kw("class");
        let name = if let Token::Ident(n) = self.cur().clone() {
            self.bump();
            Some(n)
        } else {
            None
        };
        let superclass = if self.eat_kw("extends") { Some(Box::new(self.parse_unary_chain()?)) } else { None };
        self.expect(&Token::LBrace)?;
        let mut members = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.eat(&Token::Semicolon) {
                continue;
            }
            let is_static = self.eat_kw("static");
            let kind = if self.eat_kw("get") {
                MethodKind::Getter
            } else if self.eat_kw("set") {
                MethodKind::Setter
            } else {
                MethodKind::Normal
            };
            let key = self.ident_name()?;
            if self.check(&Token::LParen) {
                let params = self.parse_params()?;
                let body = self.parse_block()?;
                let kind = if key == "constructor" { MethodKind::Constructor } else { kind };
                members.push(ClassMember::Method {
                    key: key.clone(),
                    function: Function { name: Some(key), params, body, is_async: false, is_generator: false, is_arrow: false },
                    is_static,
                    kind,
                });
            } else {
                let value = if self.eat(&Token::Assign) { Some(self.parse_assign_expr()?) } else { None };
                self.eat(&Token::Semicolon);
                members.push(ClassMember::Field { key, value, is_static });
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(ClassDecl { name, superclass, members })
    }

    // ---- expressions (lowest to highest precedence) ----

    fn parse_expr(&mut self) -> Result<Expr, JSError> {
        let first = self.parse_assign_expr()?;
        if self.check(&Token::Comma) {
            let mut items = vec![first];
            while self.eat(&Token::Comma) {
                items.push(self.parse_assign_expr()?);
            }
            return Ok(Expr::Sequence(items));
        }
        Ok(first)
    }

    fn parse_assign_expr(&mut self) -> Result<Expr, JSError> {
        if self.is_arrow_function_ahead() {
            return self.parse_arrow_function();
        }
        if self.eat_kw("yield") {
            let delegate = self.eat(&Token::Star);
            let argument = if self.can_start_expr() { Some(Box::new(self.parse_assign_expr()?)) } else { None };
            return Ok(Expr::Yield { argument, delegate });
        }
        let left = self.parse_conditional()?;
        let op = match self.cur() {
            Token::Assign => Some(AssignOp::Set),
            Token::PlusAssign => Some(AssignOp::Add),
            Token::MinusAssign => Some(AssignOp::Sub),
            Token::StarAssign => Some(AssignOp::Mul),
            Token::SlashAssign => Some(AssignOp::Div),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let right = self.parse_assign_expr()?;
            return Ok(Expr::Assign(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn can_start_expr(&self) -> bool {
        !matches!(self.cur(), Token::Semicolon | Token::RParen | Token::RBrace | Token::RBracket | Token::Comma | Token::Eof)
    }

    fn is_arrow_function_ahead(&self) -> bool {
        if let Token::Ident(_) = self.cur() {
            return self.tokens.get(self.pos + 1).map(|p| &p.token) == Some(&Token::Arrow);
        }
        if self.check(&Token::LParen) {
            let mut depth = 0i32;
            let mut i = self.pos;
            loop {
                match self.tokens.get(i).map(|p| &p.token) {
                    Some(Token::LParen) => depth += 1,
                    Some(Token::RParen) => {
                        depth -= 1;
                        if depth == 0 {
                            return self.tokens.get(i + 1).map(|p| &p.token) == Some(&Token::Arrow);
                        }
                    }
                    Some(Token::Eof) | None => return false,
                    _ => {}
                }
                i += 1;
            }
        }
        false
    }

    fn parse_arrow_function(&mut self) -> Result<Expr, JSError> {
        let params = if let Token::Ident(n) = self.cur().clone() {
            self.bump();
            vec![Param { pattern: Pattern::Ident(n), rest: false }]
        } else {
            self.parse_params()?
        };
        self.expect(&Token::Arrow)?;
        let body = if self.check(&Token::LBrace) {
            self.parse_block()?
        } else {
            let expr = self.parse_assign_expr()?;
            vec![Statement::Return(Some(expr))]
        };
        Ok(Expr::ArrowBody(Box::new(Function { name: None, params, body, is_async: false, is_generator: false, is_arrow: true })))
    }

    fn parse_conditional(&mut self) -> Result<Expr, JSError> {
        let test = self.parse_nullish()?;
        if self.eat(&Token::Question) {
            let cons = self.parse_assign_expr()?;
            self.expect(&Token::Colon)?;
            let alt = self.parse_assign_expr()?;
            return Ok(Expr::Conditional(Box::new(test), Box::new(cons), Box::new(alt)));
        }
        Ok(test)
    }

    fn parse_nullish(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_or()?;
        while self.eat(&Token::QuestionQuestion) {
            let right = self.parse_or()?;
            left = Expr::Logical(BinOp::Nullish, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_and()?;
            left = Expr::Logical(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_bitor()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_bitor()?;
            left = Expr::Logical(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_bitxor()?;
        while self.eat(&Token::Pipe) {
            left = Expr::Binary(BinOp::BitOr, Box::new(left), Box::new(self.parse_bitxor()?));
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_bitand()?;
        while self.eat(&Token::Caret) {
            left = Expr::Binary(BinOp::BitXor, Box::new(left), Box::new(self.parse_bitand()?));
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::Amp) {
            left = Expr::Binary(BinOp::BitAnd, Box::new(left), Box::new(self.parse_equality()?));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.cur() {
                Token::Eq => BinOp::Eq,
                Token::StrictEq => BinOp::StrictEq,
                Token::NotEq => BinOp::NotEq,
                Token::StrictNotEq => BinOp::StrictNotEq,
                _ => break,
            };
            self.bump();
            left = Expr::Binary(op, Box::new(left), Box::new(self.parse_relational()?));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_shift()?;
        loop {
            let op = match self.cur() {
                Token::Lt => BinOp::Lt,
                Token::Gt => BinOp::Gt,
                Token::LtEq => BinOp::LtEq,
                Token::GtEq => BinOp::GtEq,
                Token::Keyword("instanceof") => BinOp::InstanceOf,
                Token::Keyword("in") => BinOp::In,
                _ => break,
            };
            self.bump();
            left = Expr::Binary(op, Box::new(left), Box::new(self.parse_shift()?));
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.cur() {
                Token::Shl => BinOp::Shl,
                Token::Shr => BinOp::Shr,
                Token::UShr => BinOp::UShr,
                _ => break,
            };
            self.bump();
            left = Expr::Binary(op, Box::new(left), Box::new(self.parse_additive()?));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.cur() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            left = Expr::Binary(op, Box::new(left), Box::new(self.parse_multiplicative()?));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, JSError> {
        let mut left = self.parse_exponent()?;
        loop {
            let op = match self.cur() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            left = Expr::Binary(op, Box::new(left), Box::new(self.parse_exponent()?));
        }
        Ok(left)
    }

    fn parse_exponent(&mut self) -> Result<Expr, JSError> {
        let left = self.parse_unary_chain()?;
        if self.eat(&Token::StarStar) {
            let right = self.parse_exponent()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_unary_chain(&mut self) -> Result<Expr, JSError> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary_chain()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary_chain()?)));
        }
        if self.eat(&Token::Plus) {
            return Ok(Expr::Unary(UnOp::Plus, Box::new(self.parse_unary_chain()?)));
        }
        if self.eat(&Token::Tilde) {
            return Ok(Expr::Unary(UnOp::BitNot, Box::new(self.parse_unary_chain()?)));
        }
        if self.eat_kw("typeof") {
            return Ok(Expr::Unary(UnOp::TypeOf, Box::new(self.parse_unary_chain()?)));
        }
        if self.eat_kw("void") {
            return Ok(Expr::Unary(UnOp::Void, Box::new(self.parse_unary_chain()?)));
        }
        if self.eat_kw("delete") {
            return Ok(Expr::Unary(UnOp::Delete, Box::new(self.parse_unary_chain()?)));
        }
        if self.eat_kw("await") {
            return Ok(Expr::Await(Box::new(self.parse_unary_chain()?)));
        }
        if self.eat(&Token::PlusPlus) {
            return Ok(Expr::Update { op: UpdateOp::Increment, prefix: true, target: Box::new(self.parse_unary_chain()?) });
        }
        if self.eat(&Token::MinusMinus) {
            return Ok(Expr::Update { op: UpdateOp::Decrement, prefix: true, target: Box::new(self.parse_unary_chain()?) });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, JSError> {
        let mut expr = self.parse_call_member()?;
        if self.eat(&Token::PlusPlus) {
            expr = Expr::Update { op: UpdateOp::Increment, prefix: false, target: Box::new(expr) };
        } else if self.eat(&Token::MinusMinus) {
            expr = Expr::Update { op: UpdateOp::Decrement, prefix: false, target: Box::new(expr) };
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr, JSError> {
        let mut expr = if self.eat_kw("new") {
            let callee = self.parse_call_member_no_call()?;
            let args = if self.check(&Token::LParen) { self.parse_args()? } else { Vec::new() };
            Expr::New { callee: Box::new(callee), args }
        } else {
            self.parse_primary()?
        };
        loop {
            if self.eat(&Token::Dot) {
                let name = self.ident_name()?;
                expr = Expr::Member { object: Box::new(expr), property: Box::new(Expr::StringLit(name)), computed: false, optional: false };
            } else if self.eat(&Token::QuestionDot) {
                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    expr = Expr::Call { callee: Box::new(expr), args, optional: true };
                    continue;
                }
                let name = self.ident_name()?;
                expr = Expr::Member { object: Box::new(expr), property: Box::new(Expr::StringLit(name)), computed: false, optional: true };
            } else if self.eat(&Token::LBracket) {
                let prop = self.parse_expr()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Member { object: Box::new(expr), property: Box::new(prop), computed: true, optional: false };
            } else if self.check(&Token::LParen) {
                let args = self.parse_args()?;
                expr = Expr::Call { callee: Box::new(expr), args, optional: false };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_member_no_call(&mut self) -> Result<Expr, JSError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = self.ident_name()?;
                expr = Expr::Member { object: Box::new(expr), property: Box::new(Expr::StringLit(name)), computed: false, optional: false };
            } else if self.eat(&Token::LBracket) {
                let prop = self.parse_expr()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Member { object: Box::new(expr), property: Box::new(prop), computed: true, optional: false };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<ArrayElement>, JSError> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        while !self.check(&Token::RParen) {
            if self.eat(&Token::DotDotDot) {
                args.push(ArrayElement::Spread(self.parse_assign_expr()?));
            } else {
                args.push(ArrayElement::Item(self.parse_assign_expr()?));
            }
            if !self.check(&Token::RParen) {
                self.eat(&Token::Comma);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, JSError> {
        match self.cur().clone() {
            Token::Number(n) => {
                self.bump();
                Ok(Expr::NumberLit(n))
            }
            Token::BigInt(s) => {
                self.bump();
                Ok(Expr::BigIntLit(s))
            }
            Token::String(s) => {
                self.bump();
                Ok(Expr::StringLit(s))
            }
            Token::TemplateString(parts) => {
                self.bump();
                let mut elements = Vec::new();
                for p in parts {
                    match p {
                        crate::core::token::TemplatePart::Literal(s) => elements.push(TemplateElement::Literal(s)),
                        crate::core::token::TemplatePart::Expr(src) => {
                            let sub = Parser::new(&src, &self.filename)?.parse_assign_expr_standalone()?;
                            elements.push(TemplateElement::Expr(Box::new(sub)));
                        }
                    }
                }
                Ok(Expr::TemplateLit(elements))
            }
            Token::Keyword("true") => {
                self.bump();
                Ok(Expr::BoolLit(true))
            }
            Token::Keyword("false") => {
                self.bump();
                Ok(Expr::BoolLit(false))
            }
            Token::Keyword("null") => {
                self.bump();
                Ok(Expr::NullLit)
            }
            Token::Keyword("undefined") => {
                self.bump();
                Ok(Expr::UndefinedLit)
            }
            Token::Keyword("this") => {
                self.bump();
                Ok(Expr::This)
            }
            Token::Keyword("super") => {
                self.bump();
                Ok(Expr::Super)
            }
            Token::Keyword("function") => Ok(Expr::Function(Box::new(self.parse_function(false)?))),
            Token::Keyword("async") => {
                self.bump();
                self.eat(&Token::Star);
                let mut f = self.parse_function(false)?;
                f.is_async = true;
                Ok(Expr::Function(Box::new(f)))
            }
            Token::Keyword("class") => Ok(Expr::Class(Box::new(self.parse_class()?))),
            Token::Ident(name) => {
                self.bump();
                if name == "new" && self.kw("target") {
                    self.bump();
                    return Ok(Expr::NewTarget);
                }
                Ok(Expr::Ident(name))
            }
            Token::LParen => {
                self.bump();
                let e = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Token::LBracket => self.parse_array_lit(),
            Token::LBrace => self.parse_object_lit(),
            other => Err(self.err(format!("unexpected token in expression position: {other:?}"))),
        }
    }

    fn parse_assign_expr_standalone(mut self) -> Result<Expr, JSError> {
        self.parse_assign_expr()
    }

    fn parse_array_lit(&mut self) -> Result<Expr, JSError> {
        self.expect(&Token::LBracket)?;
        let mut items = Vec::new();
        while !self.check(&Token::RBracket) {
            if self.check(&Token::Comma) {
                self.bump();
                items.push(None);
                continue;
            }
            if self.eat(&Token::DotDotDot) {
                items.push(Some(ArrayElement::Spread(self.parse_assign_expr()?)));
            } else {
                items.push(Some(ArrayElement::Item(self.parse_assign_expr()?)));
            }
            if !self.check(&Token::RBracket) {
                self.eat(&Token::Comma);
            }
        }
        self.expect(&Token::RBracket)?;
        Ok(Expr::ArrayLit(items))
    }

    fn parse_object_lit(&mut self) -> Result<Expr, JSError> {
        self.expect(&Token::LBrace)?;
        let mut props = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.eat(&Token::DotDotDot) {
                props.push(PropertyDef::Spread(self.parse_assign_expr()?));
                if !self.check(&Token::RBrace) {
                    self.eat(&Token::Comma);
                }
                continue;
            }
            let is_getter = self.kw("get") && !matches!(self.tokens.get(self.pos + 1).map(|p| &p.token), Some(Token::Colon) | Some(Token::Comma) | Some(Token::RBrace));
            let is_setter = self.kw("set") && !matches!(self.tokens.get(self.pos + 1).map(|p| &p.token), Some(Token::Colon) | Some(Token::Comma) | Some(Token::RBrace));
            if is_getter || is_setter {
                self.bump();
            }
            let computed_key = if self.eat(&Token::LBracket) {
                let e = self.parse_assign_expr()?;
                self.expect(&Token::RBracket)?;
                Some(Box::new(e))
            } else {
                None
            };
            let key = if computed_key.is_some() {
                String::new()
            } else {
                match self.cur().clone() {
                    Token::String(s) => {
                        self.bump();
                        s
                    }
                    Token::Number(n) => {
                        self.bump();
                        n.to_string()
                    }
                    _ => self.ident_name()?,
                }
            };
            if self.check(&Token::LParen) {
                let params = self.parse_params()?;
                let body = self.parse_block()?;
                props.push(PropertyDef::Method {
                    key: key.clone(),
                    function: Function { name: Some(key), params, body, is_async: false, is_generator: false, is_arrow: false },
                });
            } else if self.eat(&Token::Colon) {
                let value = self.parse_assign_expr()?;
                props.push(PropertyDef::KeyValue { key, computed_key, value });
            } else {
                props.push(PropertyDef::KeyValue { key: key.clone(), computed_key: None, value: Expr::Ident(key) });
            }
            if !self.check(&Token::RBrace) {
                self.eat(&Token::Comma);
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Expr::ObjectLit(props))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        Parser::new(src, "<test>").unwrap().parse_program().unwrap()
    }

    #[test]
    fn parses_var_decl_with_initializer() {
        let p = parse("let x = 1 + 2;");
        assert!(matches!(&p[0], Statement::VarDecl { kind: Declarator::Let, .. }));
    }

    #[test]
    fn parses_arrow_function() {
        let p = parse("const f = (a, b) => a + b;");
        if let Statement::VarDecl { declarations, .. } = &p[0] {
            assert!(matches!(declarations[0].1, Some(Expr::ArrowBody(_))));
        } else {
            panic!("expected var decl");
        }
    }

    #[test]
    fn parses_method_chain_call() {
        let p = parse("arr.map(f).reduce(g, 0);");
        assert!(matches!(&p[0], Statement::Expr(Expr::Call { .. })));
    }

    #[test]
    fn parses_for_of_with_await() {
        let p = parse("for (const x of xs) { y(x); }");
        assert!(matches!(&p[0], Statement::ForOf { .. }));
    }

    #[test]
    fn parses_try_catch_finally() {
        let p = parse("try { f(); } catch (e) { g(e); } finally { h(); }");
        assert!(matches!(&p[0], Statement::Try { catch_block: Some(_), finally_block: Some(_), .. }));
    }

    #[test]
    fn parses_async_await_expression() {
        let p = parse("async function f() { return await g(); }");
        if let Statement::FunctionDecl(f) = &p[0] {
            assert!(f.is_async);
        } else {
            panic!("expected function decl");
        }
    }

    #[test]
    fn parses_generator_yield() {
        let p = parse("function* g() { yield 1; }");
        if let Statement::FunctionDecl(f) = &p[0] {
            assert!(f.is_generator);
        } else {
            panic!("expected function decl");
        }
    }

    #[test]
    fn parses_template_literal_interpolation() {
        let p = parse("let s = `n=${n+1}`;");
        if let Statement::VarDecl { declarations, .. } = &p[0] {
            assert!(matches!(&declarations[0].1, Some(Expr::TemplateLit(_))));
        } else {
            panic!("expected var decl");
        }
    }
}
