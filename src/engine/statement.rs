//! Statement tokenizer and parser for the reference engine
//!
//! Covers the small statement subset the in-memory engine executes:
//!
//! ```text
//! statement := [EXPLAIN] [USING PERIODIC COMMIT [int]] clause+
//! clause    := MATCH node ("," node)*
//!            | CREATE path ("," path)*
//!            | [DETACH] DELETE ident ("," ident)*
//!            | UNWIND expr AS ident
//!            | RETURN item ("," item)*        (last clause only)
//! path      := node (rel node)*
//! node      := "(" [ident] (":" label)* [map] ")"
//! rel       := "-[" [ident] ":" type [map] "]->" | "<-[" ... "]-"
//! item      := expr [AS ident]
//! ```
//!
//! Expressions support literals, lists, maps, `$param`s, variables, property
//! access, unary minus, `+ - * / %`, `range()`, `count()` and `id()`.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::messages::Parameters;

/// Default batch size of `USING PERIODIC COMMIT` without an explicit size
pub const DEFAULT_PERIODIC_BATCH: u64 = 1000;

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub explain: bool,
    /// Batch size when the statement uses periodic commit
    pub periodic_commit: Option<u64>,
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(Vec<NodePattern>),
    Create(Vec<PathPattern>),
    Delete { detach: bool, variables: Vec<String> },
    Unwind { expr: Expr, alias: String },
    Return(Vec<ReturnItem>),
}

impl Clause {
    pub fn is_write(&self) -> bool {
        matches!(self, Clause::Create(_) | Clause::Delete { .. })
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Clause::Match(_) => "MATCH",
            Clause::Create(_) => "CREATE",
            Clause::Delete { .. } => "DELETE",
            Clause::Unwind { .. } => "UNWIND",
            Clause::Return(_) => "RETURN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub variable: Option<String>,
    pub rel_type: String,
    pub properties: Vec<(String, Expr)>,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub start: NodePattern,
    pub steps: Vec<(RelPattern, NodePattern)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub expr: Expr,
    /// Alias, or the expression text as written
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Param(String),
    Variable(String),
    Property(Box<Expr>, String),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call { name: String, args: Vec<Expr> },
    CountStar,
}

impl Expr {
    pub fn is_aggregate(&self) -> bool {
        match self {
            Expr::CountStar => true,
            Expr::Call { name, .. } => name == "count",
            _ => false,
        }
    }

    fn collect_params(&self, out: &mut Vec<String>) {
        match self {
            Expr::Param(name) => out.push(name.clone()),
            Expr::List(items) => items.iter().for_each(|e| e.collect_params(out)),
            Expr::Map(entries) => entries.iter().for_each(|(_, e)| e.collect_params(out)),
            Expr::Property(inner, _) | Expr::Negate(inner) => inner.collect_params(out),
            Expr::Binary(_, l, r) => {
                l.collect_params(out);
                r.collect_params(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|e| e.collect_params(out)),
            Expr::Literal(_) | Expr::Variable(_) | Expr::CountStar => {}
        }
    }

    fn check_scope(&self, scope: &HashSet<String>) -> EngineResult<()> {
        match self {
            Expr::Variable(name) if !scope.contains(name) => {
                Err(EngineError::Semantic(format!("Variable `{}` not defined", name)))
            }
            Expr::List(items) => items.iter().try_for_each(|e| e.check_scope(scope)),
            Expr::Map(entries) => entries.iter().try_for_each(|(_, e)| e.check_scope(scope)),
            Expr::Property(inner, _) | Expr::Negate(inner) => inner.check_scope(scope),
            Expr::Binary(_, l, r) => {
                l.check_scope(scope)?;
                r.check_scope(scope)
            }
            Expr::Call { args, .. } => args.iter().try_for_each(|e| e.check_scope(scope)),
            _ => Ok(()),
        }
    }
}

impl Statement {
    /// Whether executing the statement would write
    pub fn is_write(&self) -> bool {
        self.clauses.iter().any(Clause::is_write)
    }

    /// Columns of the trailing RETURN, empty when there is none
    pub fn columns(&self) -> Vec<String> {
        match self.clauses.last() {
            Some(Clause::Return(items)) => items.iter().map(|i| i.name.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Fail with `ParameterMissing` unless every `$param` is supplied.
    pub fn check_parameters(&self, parameters: &Parameters) -> EngineResult<()> {
        let mut names = Vec::new();
        for clause in &self.clauses {
            match clause {
                Clause::Match(nodes) => nodes.iter().for_each(|n| props_params(&n.properties, &mut names)),
                Clause::Create(paths) => {
                    for path in paths {
                        props_params(&path.start.properties, &mut names);
                        for (rel, node) in &path.steps {
                            props_params(&rel.properties, &mut names);
                            props_params(&node.properties, &mut names);
                        }
                    }
                }
                Clause::Unwind { expr, .. } => expr.collect_params(&mut names),
                Clause::Return(items) => items.iter().for_each(|i| i.expr.collect_params(&mut names)),
                Clause::Delete { .. } => {}
            }
        }

        let mut missing: Vec<String> = names
            .into_iter()
            .filter(|name| !parameters.contains_key(name))
            .collect();
        missing.sort();
        missing.dedup();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ParameterMissing(missing.join(", ")))
        }
    }

    /// Variable scoping rules, checked before anything runs.
    fn check_scope(&self) -> EngineResult<()> {
        let mut scope: HashSet<String> = HashSet::new();
        let last = self.clauses.len().saturating_sub(1);

        for (index, clause) in self.clauses.iter().enumerate() {
            match clause {
                Clause::Match(nodes) => {
                    for node in nodes {
                        check_props_scope(&node.properties, &scope)?;
                        if let Some(var) = &node.variable {
                            scope.insert(var.clone());
                        }
                    }
                }
                Clause::Create(paths) => {
                    for path in paths {
                        let bind = |node: &NodePattern, scope: &mut HashSet<String>| {
                            check_props_scope(&node.properties, scope)?;
                            if let Some(var) = &node.variable {
                                scope.insert(var.clone());
                            }
                            Ok::<(), EngineError>(())
                        };
                        bind(&path.start, &mut scope)?;
                        for (rel, node) in &path.steps {
                            check_props_scope(&rel.properties, &scope)?;
                            if let Some(var) = &rel.variable {
                                scope.insert(var.clone());
                            }
                            bind(node, &mut scope)?;
                        }
                    }
                }
                Clause::Delete { variables, .. } => {
                    for var in variables {
                        Expr::Variable(var.clone()).check_scope(&scope)?;
                    }
                }
                Clause::Unwind { expr, alias } => {
                    expr.check_scope(&scope)?;
                    scope.insert(alias.clone());
                }
                Clause::Return(items) => {
                    if index != last {
                        return Err(EngineError::Syntax(
                            "RETURN can only be used at the end of the query".to_string(),
                        ));
                    }
                    for item in items {
                        item.expr.check_scope(&scope)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn props_params(props: &[(String, Expr)], out: &mut Vec<String>) {
    props.iter().for_each(|(_, e)| e.collect_params(out));
}

fn check_props_scope(props: &[(String, Expr)], scope: &HashSet<String>) -> EngineResult<()> {
    props.iter().try_for_each(|(_, e)| e.check_scope(scope))
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Param(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Gt,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    start: usize,
    end: usize,
}

fn tokenize(source: &str) -> EngineResult<Vec<Spanned>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '.' => Some(Token::Dot),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            _ => None,
        };
        if let Some(token) = single {
            i += 1;
            tokens.push(Spanned { token, start, end: i });
            continue;
        }

        if c.is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let is_float = i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit();
            if is_float {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let text = &source[start..i];
                let value = text
                    .parse::<f64>()
                    .map_err(|_| EngineError::Syntax(format!("invalid number '{}'", text)))?;
                tokens.push(Spanned { token: Token::Float(value), start, end: i });
            } else {
                let text = &source[start..i];
                let value = text
                    .parse::<i64>()
                    .map_err(|_| EngineError::Syntax(format!("integer '{}' is too large", text)))?;
                tokens.push(Spanned { token: Token::Int(value), start, end: i });
            }
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = bytes[i];
            i += 1;
            let mut text = String::new();
            loop {
                match bytes.get(i) {
                    None => return Err(EngineError::Syntax("unterminated string literal".to_string())),
                    Some(&b) if b == quote => {
                        i += 1;
                        break;
                    }
                    Some(&b'\\') if i + 1 < bytes.len() => {
                        let escaped = source[i + 1..].chars().next().unwrap_or_default();
                        text.push(escaped);
                        i += 1 + escaped.len_utf8();
                    }
                    Some(_) => {
                        let ch = source[i..].chars().next().unwrap_or_default();
                        text.push(ch);
                        i += ch.len_utf8().max(1);
                    }
                }
            }
            tokens.push(Spanned { token: Token::Str(text), start, end: i });
            continue;
        }

        if c == '$' {
            i += 1;
            let name_start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if name_start == i {
                return Err(EngineError::Syntax("expected parameter name after '$'".to_string()));
            }
            let name = source[name_start..i].to_string();
            tokens.push(Spanned { token: Token::Param(name), start, end: i });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Spanned { token: Token::Ident(source[start..i].to_string()), start, end: i });
            continue;
        }

        let ch = source[i..].chars().next().unwrap_or_default();
        return Err(EngineError::Syntax(format!("Invalid input '{}' at position {}", ch, i)));
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

/// Parse one statement.
pub fn parse(source: &str) -> EngineResult<Statement> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { source, tokens, pos: 0 };
    let statement = parser.statement()?;
    statement.check_scope()?;

    if !statement.is_write() {
        if let Some(last) = statement.clauses.last().filter(|c| !matches!(c, Clause::Return(_))) {
            return Err(EngineError::Semantic(format!(
                "Query cannot conclude with {} (must be RETURN or an update clause)",
                last.keyword()
            )));
        }
    }
    Ok(statement)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.start).unwrap_or(self.source.len())
    }

    fn error(&self, expected: &str) -> EngineError {
        match self.tokens.get(self.pos) {
            Some(spanned) => EngineError::Syntax(format!(
                "Invalid input '{}': expected {} (offset: {})",
                &self.source[spanned.start..spanned.end],
                expected,
                spanned.start
            )),
            None => EngineError::Syntax(format!("unexpected end of input: expected {}", expected)),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> EngineResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(keyword))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> EngineResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(what))
        }
    }

    fn identifier(&mut self) -> EngineResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("an identifier")),
        }
    }

    fn statement(&mut self) -> EngineResult<Statement> {
        let explain = self.eat_keyword("EXPLAIN");

        let periodic_commit = if self.eat_keyword("USING") {
            self.expect_keyword("PERIODIC")?;
            self.expect_keyword("COMMIT")?;
            match self.peek() {
                Some(Token::Int(n)) if *n > 0 => {
                    let n = *n as u64;
                    self.pos += 1;
                    Some(n)
                }
                Some(Token::Int(_)) => return Err(self.error("a positive batch size")),
                _ => Some(DEFAULT_PERIODIC_BATCH),
            }
        } else {
            None
        };

        let mut clauses = Vec::new();
        while self.peek().is_some() {
            clauses.push(self.clause()?);
        }
        if clauses.is_empty() {
            return Err(self.error("a clause"));
        }

        Ok(Statement { explain, periodic_commit, clauses })
    }

    fn clause(&mut self) -> EngineResult<Clause> {
        if self.eat_keyword("MATCH") {
            let mut nodes = vec![self.node_pattern()?];
            while self.eat(&Token::Comma) {
                nodes.push(self.node_pattern()?);
            }
            return Ok(Clause::Match(nodes));
        }

        if self.eat_keyword("CREATE") {
            let mut paths = vec![self.path_pattern()?];
            while self.eat(&Token::Comma) {
                paths.push(self.path_pattern()?);
            }
            return Ok(Clause::Create(paths));
        }

        let detach = self.eat_keyword("DETACH");
        if detach || self.at_keyword("DELETE") {
            self.expect_keyword("DELETE")?;
            let mut variables = vec![self.identifier()?];
            while self.eat(&Token::Comma) {
                variables.push(self.identifier()?);
            }
            return Ok(Clause::Delete { detach, variables });
        }

        if self.eat_keyword("UNWIND") {
            let expr = self.expression()?;
            self.expect_keyword("AS")?;
            let alias = self.identifier()?;
            return Ok(Clause::Unwind { expr, alias });
        }

        if self.eat_keyword("RETURN") {
            let mut items = vec![self.return_item()?];
            while self.eat(&Token::Comma) {
                items.push(self.return_item()?);
            }
            return Ok(Clause::Return(items));
        }

        Err(self.error("MATCH, CREATE, DELETE, DETACH, UNWIND or RETURN"))
    }

    fn return_item(&mut self) -> EngineResult<ReturnItem> {
        let start = self.offset();
        let expr = self.expression()?;
        let end = self.tokens.get(self.pos - 1).map(|s| s.end).unwrap_or(self.source.len());

        let name = if self.eat_keyword("AS") {
            self.identifier()?
        } else {
            self.source[start..end].trim().to_string()
        };
        Ok(ReturnItem { expr, name })
    }

    fn node_pattern(&mut self) -> EngineResult<NodePattern> {
        self.expect(Token::LParen, "'('")?;
        let mut node = NodePattern::default();

        if let Some(Token::Ident(_)) = self.peek() {
            node.variable = Some(self.identifier()?);
        }
        while self.eat(&Token::Colon) {
            node.labels.push(self.identifier()?);
        }
        if self.peek() == Some(&Token::LBrace) {
            node.properties = self.map_entries()?;
        }

        self.expect(Token::RParen, "')'")?;
        Ok(node)
    }

    fn path_pattern(&mut self) -> EngineResult<PathPattern> {
        let start = self.node_pattern()?;
        let mut steps = Vec::new();

        loop {
            let direction = match (self.peek(), self.peek_at(1)) {
                (Some(Token::Minus), Some(Token::LBracket)) => {
                    self.pos += 1;
                    Direction::Outgoing
                }
                (Some(Token::Lt), Some(Token::Minus)) => {
                    self.pos += 2;
                    Direction::Incoming
                }
                _ => break,
            };

            self.expect(Token::LBracket, "'['")?;
            let variable = match self.peek() {
                Some(Token::Ident(_)) => Some(self.identifier()?),
                _ => None,
            };
            self.expect(Token::Colon, "a relationship type")?;
            let rel_type = self.identifier()?;
            let properties = if self.peek() == Some(&Token::LBrace) {
                self.map_entries()?
            } else {
                Vec::new()
            };
            self.expect(Token::RBracket, "']'")?;
            self.expect(Token::Minus, "'-'")?;
            if direction == Direction::Outgoing {
                self.expect(Token::Gt, "'>'")?;
            }

            let node = self.node_pattern()?;
            steps.push((RelPattern { variable, rel_type, properties, direction }, node));
        }

        Ok(PathPattern { start, steps })
    }

    fn map_entries(&mut self) -> EngineResult<Vec<(String, Expr)>> {
        self.expect(Token::LBrace, "'{'")?;
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(entries);
        }
        loop {
            let key = self.identifier()?;
            self.expect(Token::Colon, "':'")?;
            entries.push((key, self.expression()?));
            if self.eat(&Token::RBrace) {
                return Ok(entries);
            }
            self.expect(Token::Comma, "',' or '}'")?;
        }
    }

    // ── Expressions ──

    fn expression(&mut self) -> EngineResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> EngineResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> EngineResult<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> EngineResult<Expr> {
        let mut expr = self.primary()?;
        while self.eat(&Token::Dot) {
            let key = self.identifier()?;
            expr = Expr::Property(Box::new(expr), key);
        }
        Ok(expr)
    }

    fn primary(&mut self) -> EngineResult<Expr> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.error("an expression")),
        };

        match token {
            Token::Int(n) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::from(n)))
            }
            Token::Float(f) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::from(f)))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::from(s)))
            }
            Token::Param(name) => {
                self.pos += 1;
                Ok(Expr::Param(name))
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.pos += 1;
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(Token::Comma, "',' or ']'")?;
                    }
                }
                Ok(Expr::List(items))
            }
            Token::LBrace => Ok(Expr::Map(self.map_entries()?)),
            Token::Ident(name) => {
                self.pos += 1;
                if name.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Literal(Value::Bool(true)));
                }
                if name.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Literal(Value::Bool(false)));
                }
                if name.eq_ignore_ascii_case("null") {
                    return Ok(Expr::Literal(Value::Null));
                }
                if self.peek() == Some(&Token::LParen) {
                    return self.call(name.to_ascii_lowercase());
                }
                Ok(Expr::Variable(name))
            }
            _ => Err(self.error("an expression")),
        }
    }

    fn call(&mut self, name: String) -> EngineResult<Expr> {
        self.expect(Token::LParen, "'('")?;

        if name == "count" && self.eat(&Token::Star) {
            self.expect(Token::RParen, "')'")?;
            return Ok(Expr::CountStar);
        }

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma, "',' or ')'")?;
            }
        }

        let arity_ok = match name.as_str() {
            "range" => args.len() == 2 || args.len() == 3,
            "count" | "id" => args.len() == 1,
            _ => {
                return Err(EngineError::Semantic(format!("Unknown function '{}'", name)));
            }
        };
        if !arity_ok {
            return Err(EngineError::Semantic(format!(
                "Wrong number of arguments for function '{}'",
                name
            )));
        }
        Ok(Expr::Call { name, args })
    }
}
