//! Statement evaluation for the memory runtime.
//!
//! The language is a small line-oriented subset of Python:
//!
//! ```text
//! stmt   := target '=' expr | expr
//! target := name | postfix '.' name | postfix '[' expr ']'
//! expr   := term (('+' | '-') term)*
//! term   := unary ('*' unary)*
//! unary  := '-' unary | postfix
//! postfix:= atom ('(' args ')' | '.' name | '[' expr ']')*
//! atom   := int | float | string | 'None' | 'True' | 'False' | name
//!         | '[' exprs ']' | '{' (string ':' expr),* '}' | '(' expr ')'
//! ```
//!
//! Statements are separated by newlines or `;`. Newlines inside brackets are
//! ignored and `#` starts a comment. A line starting with whitespace raises
//! `IndentationError`. The value of a run is the value of its last statement
//! when that statement is an expression, `None` otherwise.

use std::rc::Rc;

use indexmap::IndexMap;

use super::{Kind, MemoryRuntime, downcast, float, int, list, none, raise, str};
use crate::{
    error::{BridgeResult, Error},
    handle::Handle,
    marshal::Arg,
};

pub(super) fn run(runtime: &MemoryRuntime, source: &str, globals: &Handle, locals: &Handle) -> BridgeResult<Handle> {
    let tokens = tokenize(source)?;
    let statements = Parser::new(tokens).statements()?;
    let scope = Scope {
        runtime,
        globals,
        locals,
    };
    let mut last = none();
    for statement in &statements {
        last = match statement {
            Stmt::Expr(expr) => scope.eval(expr)?,
            Stmt::Assign(target, expr) => {
                let value = scope.eval(expr)?;
                scope.assign(target, value)?;
                none()
            }
        };
    }
    Ok(last)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Op(char),
    Newline,
}

fn tokenize(source: &str) -> BridgeResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut chars = source.chars().peekable();
    let mut line = 1usize;
    let mut at_line_start = true;

    while let Some(&c) = chars.peek() {
        if at_line_start && depth == 0 {
            at_line_start = false;
            if c == ' ' || c == '\t' {
                // whitespace-only lines are fine, anything else is an indent
                let rest: String = chars.clone().take_while(|c| *c != '\n').collect();
                let trimmed = rest.trim();
                if !trimmed.is_empty() && !trimmed.starts_with('#') {
                    return Err(raise("IndentationError", format!("unexpected indent (line {line})")));
                }
            }
        }
        match c {
            '\n' => {
                chars.next();
                line += 1;
                at_line_start = depth == 0;
                if depth == 0 {
                    tokens.push(Token::Newline);
                }
            }
            ';' if depth == 0 => {
                chars.next();
                tokens.push(Token::Newline);
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                while chars.peek().is_some_and(|c| *c != '\n') {
                    chars.next();
                }
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == c => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(other),
                            None => break,
                        },
                        Some('\n') | None => {
                            return Err(raise(
                                "SyntaxError",
                                format!("unterminated string literal (line {line})"),
                            ));
                        }
                        Some(ch) => text.push(ch),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' || d == '_' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = text.replace('_', "");
                let token = if text.contains('.') {
                    text.parse().map(Token::Float).ok()
                } else {
                    text.parse().map(Token::Int).ok()
                };
                tokens.push(token.ok_or_else(|| raise("SyntaxError", format!("invalid number literal '{text}'")))?);
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(name));
            }
            '(' | '[' | '{' => {
                chars.next();
                depth += 1;
                tokens.push(Token::Op(c));
            }
            ')' | ']' | '}' => {
                chars.next();
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| raise("SyntaxError", format!("unmatched '{c}' (line {line})")))?;
                tokens.push(Token::Op(c));
            }
            '=' | '+' | '-' | '*' | '.' | ',' | ':' => {
                chars.next();
                tokens.push(Token::Op(c));
            }
            other => {
                return Err(raise(
                    "SyntaxError",
                    format!("invalid character '{other}' (line {line})"),
                ));
            }
        }
    }
    if depth > 0 {
        return Err(raise("SyntaxError", "unexpected EOF while parsing"));
    }
    Ok(tokens)
}

#[derive(Debug)]
enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    None,
    Bool(bool),
    Name(String),
    List(Vec<Self>),
    Dict(Vec<(String, Self)>),
    Neg(Box<Self>),
    Binary(Box<Self>, char, Box<Self>),
    Call {
        func: Box<Self>,
        args: Vec<Self>,
        kwargs: Vec<(String, Self)>,
    },
    Attr(Box<Self>, String),
    Item(Box<Self>, Box<Self>),
}

#[derive(Debug)]
enum Stmt {
    Expr(Expr),
    Assign(Expr, Expr),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, op: char) -> bool {
        if self.peek() == Some(&Token::Op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: char) -> BridgeResult<()> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{op}'")))
        }
    }

    fn unexpected(&self, context: &str) -> Error {
        match self.peek() {
            Some(token) => raise("SyntaxError", format!("{context}, found {token:?}")),
            None => raise("SyntaxError", format!("{context}, found end of input")),
        }
    }

    fn statements(&mut self) -> BridgeResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        loop {
            while self.peek() == Some(&Token::Newline) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Ok(statements);
            }
            statements.push(self.statement()?);
            match self.advance() {
                None | Some(Token::Newline) => {}
                Some(token) => return Err(raise("SyntaxError", format!("unexpected {token:?} after statement"))),
            }
        }
    }

    fn statement(&mut self) -> BridgeResult<Stmt> {
        let expr = self.expr()?;
        if !self.eat('=') {
            return Ok(Stmt::Expr(expr));
        }
        if !matches!(expr, Expr::Name(_) | Expr::Attr(..) | Expr::Item(..)) {
            return Err(raise("SyntaxError", "cannot assign to expression"));
        }
        Ok(Stmt::Assign(expr, self.expr()?))
    }

    fn expr(&mut self) -> BridgeResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op @ ('+' | '-'))) => *op,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = Expr::Binary(Box::new(left), op, Box::new(self.term()?));
        }
    }

    fn term(&mut self) -> BridgeResult<Expr> {
        let mut left = self.unary()?;
        while self.eat('*') {
            left = Expr::Binary(Box::new(left), '*', Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> BridgeResult<Expr> {
        if self.eat('-') {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> BridgeResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat('(') {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat('.') {
                match self.advance() {
                    Some(Token::Name(name)) => expr = Expr::Attr(Box::new(expr), name),
                    _ => return Err(raise("SyntaxError", "expected attribute name after '.'")),
                }
            } else if self.eat('[') {
                let key = self.expr()?;
                self.expect(']')?;
                expr = Expr::Item(Box::new(expr), Box::new(key));
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> BridgeResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.eat(')') {
            let is_keyword = matches!(
                (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)),
                (Some(Token::Name(_)), Some(Token::Op('=')))
            );
            if is_keyword {
                let Some(Token::Name(name)) = self.advance() else {
                    return Err(self.unexpected("expected keyword name"));
                };
                self.pos += 1;
                kwargs.push((name, self.expr()?));
            } else if kwargs.is_empty() {
                args.push(self.expr()?);
            } else {
                return Err(raise("SyntaxError", "positional argument follows keyword argument"));
            }
            if !self.eat(',') {
                self.expect(')')?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> BridgeResult<Expr> {
        match self.advance() {
            Some(Token::Int(i)) => Ok(Expr::Int(i)),
            Some(Token::Float(f)) => Ok(Expr::Float(f)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Name(name)) => Ok(match name.as_str() {
                "None" => Expr::None,
                "True" => Expr::Bool(true),
                "False" => Expr::Bool(false),
                _ => Expr::Name(name),
            }),
            Some(Token::Op('(')) => {
                let expr = self.expr()?;
                self.expect(')')?;
                Ok(expr)
            }
            Some(Token::Op('[')) => {
                let mut items = Vec::new();
                while !self.eat(']') {
                    items.push(self.expr()?);
                    if !self.eat(',') {
                        self.expect(']')?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Op('{')) => {
                let mut entries = Vec::new();
                while !self.eat('}') {
                    let Some(Token::Str(key)) = self.advance() else {
                        return Err(raise("SyntaxError", "dict keys must be string literals"));
                    };
                    self.expect(':')?;
                    entries.push((key, self.expr()?));
                    if !self.eat(',') {
                        self.expect('}')?;
                        break;
                    }
                }
                Ok(Expr::Dict(entries))
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected("expected an expression"))
            }
        }
    }
}

struct Scope<'a> {
    runtime: &'a MemoryRuntime,
    globals: &'a Handle,
    locals: &'a Handle,
}

impl Scope<'_> {
    fn lookup(&self, name: &str) -> BridgeResult<Handle> {
        let key = || Arg::Str(name.to_owned());
        self.locals
            .get_item(key())
            .or_else(|_| self.globals.get_item(key()))
            .or_else(|_| {
                self.runtime
                    .lookup_builtin(name)
                    .ok_or_else(|| raise("NameError", format!("name '{name}' is not defined")))
            })
    }

    fn eval(&self, expr: &Expr) -> BridgeResult<Handle> {
        match expr {
            Expr::Int(i) => Ok(int(*i)),
            Expr::Float(f) => Ok(float(*f)),
            Expr::Str(s) => Ok(str(s.clone())),
            Expr::None => Ok(none()),
            Expr::Bool(b) => Ok(super::bool(*b)),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(list(items.iter().map(|item| self.eval(item)).collect::<BridgeResult<_>>()?)),
            Expr::Dict(entries) => Ok(super::dict(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.eval(value)?)))
                    .collect::<BridgeResult<Vec<_>>>()?,
            )),
            Expr::Neg(operand) => {
                let value = self.eval(operand)?;
                match downcast(&value).map(|v| &v.kind) {
                    Some(Kind::Int(i)) => Ok(int(i.checked_neg().ok_or_else(|| raise("OverflowError", "integer overflow"))?)),
                    Some(Kind::Float(f)) => Ok(float(-f)),
                    _ => Err(raise("TypeError", "bad operand type for unary -")),
                }
            }
            Expr::Binary(left, op, right) => binary(&self.eval(left)?, *op, &self.eval(right)?),
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let mut call_args = args
                    .iter()
                    .map(|arg| self.eval(arg).map(Arg::Handle))
                    .collect::<BridgeResult<Vec<_>>>()?;
                if !kwargs.is_empty() {
                    let kwargs = kwargs
                        .iter()
                        .map(|(name, value)| Ok((name.clone(), Arg::Handle(self.eval(value)?))))
                        .collect::<BridgeResult<IndexMap<_, _>>>()?;
                    call_args.push(Arg::Kwargs(kwargs));
                }
                func.invoke(call_args)
            }
            Expr::Attr(target, name) => self.eval(target)?.get_attr(name),
            Expr::Item(target, key) => {
                let target = self.eval(target)?;
                target.get_item(Arg::Handle(self.eval(key)?))
            }
        }
    }

    fn assign(&self, target: &Expr, value: Handle) -> BridgeResult<()> {
        let (status, describe) = match target {
            Expr::Name(name) => (self.locals.set_item(Arg::Str(name.clone()), Arg::Handle(value)), name.clone()),
            Expr::Attr(object, name) => (self.eval(object)?.set_attr(name, Arg::Handle(value)), format!(".{name}")),
            Expr::Item(object, key) => {
                let object = self.eval(object)?;
                let key = self.eval(key)?;
                (object.set_item(Arg::Handle(key), Arg::Handle(value)), "item".to_owned())
            }
            _ => return Err(raise("SyntaxError", "cannot assign to expression")),
        };
        if status.is_ok() {
            Ok(())
        } else {
            Err(raise("TypeError", format!("assignment to {describe} failed")))
        }
    }
}

fn binary(left: &Handle, op: char, right: &Handle) -> BridgeResult<Handle> {
    let (Some(l), Some(r)) = (downcast(left), downcast(right)) else {
        return Err(raise("TypeError", "unsupported operand for foreign values"));
    };
    let overflow = || raise("OverflowError", "integer overflow");
    match (&l.kind, op, &r.kind) {
        (Kind::Int(a), '+', Kind::Int(b)) => Ok(int(a.checked_add(*b).ok_or_else(overflow)?)),
        (Kind::Int(a), '-', Kind::Int(b)) => Ok(int(a.checked_sub(*b).ok_or_else(overflow)?)),
        (Kind::Int(a), '*', Kind::Int(b)) => Ok(int(a.checked_mul(*b).ok_or_else(overflow)?)),
        (Kind::Str(a), '+', Kind::Str(b)) => Ok(str(format!("{a}{b}"))),
        (Kind::List(a), '+', Kind::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().map(Rc::clone));
            Ok(list(items))
        }
        (a, op, b) => match (as_float(a), as_float(b)) {
            (Some(a), Some(b)) => Ok(float(match op {
                '+' => a + b,
                '-' => a - b,
                _ => a * b,
            })),
            _ => Err(raise(
                "TypeError",
                format!(
                    "unsupported operand type(s) for {op}: '{}' and '{}'",
                    l.type_name(),
                    r.type_name()
                ),
            )),
        },
    }
}

#[expect(clippy::cast_precision_loss, reason = "mixed int/float arithmetic widens like the runtime does")]
fn as_float(kind: &Kind) -> Option<f64> {
    match kind {
        Kind::Int(i) => Some(*i as f64),
        Kind::Float(f) => Some(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ForeignRuntime, Primitive};

    fn eval(source: &str) -> BridgeResult<Handle> {
        let runtime = MemoryRuntime::new();
        let globals = runtime.globals();
        run(&runtime, source, &globals, &globals)
    }

    #[test]
    fn last_expression_is_the_result() {
        let value = eval("a = 2\nb = 3\na * b + 1").unwrap();
        assert_eq!(value.to_primitive().unwrap(), Primitive::Int(7));
    }

    #[test]
    fn trailing_assignment_yields_none() {
        let value = eval("a = 2").unwrap();
        assert_eq!(value.to_str().unwrap(), "None");
    }

    #[test]
    fn calls_with_keywords_and_brackets_across_lines() {
        let value = eval("d = {'x': [1, 2,\n 3]}\nlen(d['x'])").unwrap();
        assert_eq!(value.to_primitive().unwrap(), Primitive::Int(3));
    }

    #[test]
    fn indented_line_is_an_indentation_error() {
        let err = eval("a = 1\n  b = 2").unwrap_err();
        assert!(err.to_string().starts_with("IndentationError"), "{err}");
    }

    #[test]
    fn unknown_name_is_a_name_error() {
        let err = eval("missing + 1").unwrap_err();
        assert_eq!(err.to_string(), "NameError: name 'missing' is not defined");
    }

    #[test]
    fn comments_and_semicolons() {
        let value = eval("# leading comment\na = 'x'; a + 'y'  # trailing").unwrap();
        assert_eq!(value.to_str().unwrap(), "xy");
    }
}
