//! RQL, a small SQL-like query language over tag storms:
//!
//! ```text
//! select <fields> from <tables> [where <expr>] [limit N]
//! select count(*) from <tables> [where <expr>]
//! ```
//!
//! Expressions are statically typed when parsed. Symbols are strings; the
//! two sides of a comparison are cast to a common type (double over int
//! over boolean over string) and `like` needs strings on both sides.

use std::fmt;

use crate::csv::csv_split;
use crate::error::{Position, Result, TagStormError};
use crate::wildcard::Wildcard;

// ── Tokens ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokKind {
    Word,
    Number,
    Quoted,
    Punct,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokKind,
    /// Token text; for quoted strings the text between the quotes.
    text: String,
    offset: usize,
    /// Blanks between this token and the previous one.
    leading_spaces: usize,
}

impl Token {
    fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    fn is_punct(&self, p: &str) -> bool {
        self.kind == TokKind::Punct && self.text == p
    }
}

/// Lexer state: tracks position in the input string.
struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn take_while<F: Fn(char) -> bool>(&mut self, f: F) -> &'a str {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if !f(ch) {
                break;
            }
            self.advance(ch.len_utf8());
        }
        &self.input[start..self.pos]
    }

    /// Skip blanks and comments, returning how many blanks were skipped.
    fn skip_ws(&mut self) -> Result<usize> {
        let mut spaces = 0;
        loop {
            let blanks = self.take_while(char::is_whitespace);
            spaces += blanks.len();
            if self.peek_char() == Some('#') {
                self.take_while(|c| c != '\n');
                spaces += 1;
            } else if self.remaining().starts_with("/*") {
                let start = self.pos;
                match self.remaining()[2..].find("*/") {
                    Some(end) => self.advance(end + 4),
                    None => {
                        return Err(rql_error(self.input, start, "Unterminated comment"));
                    }
                }
                spaces += 1;
            } else {
                return Ok(spaces);
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        let leading_spaces = self.skip_ws()?;
        let offset = self.pos;
        let Some(ch) = self.peek_char() else {
            return Ok(None);
        };
        let (kind, text) = if ch.is_ascii_alphabetic() || ch == '_' {
            let word = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
            (TokKind::Word, word.to_string())
        } else if ch.is_ascii_digit() {
            let mut number = self.take_while(|c| c.is_ascii_digit()).to_string();
            let rest = self.remaining();
            if rest.starts_with('.') && rest[1..].starts_with(|c: char| c.is_ascii_digit()) {
                self.advance(1);
                number.push('.');
                number.push_str(self.take_while(|c| c.is_ascii_digit()));
            }
            (TokKind::Number, number)
        } else if ch == '"' || ch == '\'' {
            (TokKind::Quoted, self.quoted(ch)?)
        } else {
            let two = ["!=", "<>", "<=", ">="]
                .into_iter()
                .find(|p| self.remaining().starts_with(p));
            match two {
                Some(p) => {
                    self.advance(2);
                    (TokKind::Punct, p.to_string())
                }
                None => {
                    self.advance(ch.len_utf8());
                    (TokKind::Punct, ch.to_string())
                }
            }
        };
        Ok(Some(Token {
            kind,
            text,
            offset,
            leading_spaces,
        }))
    }

    fn quoted(&mut self, quote: char) -> Result<String> {
        let start = self.pos;
        self.advance(1);
        let mut result = String::new();
        loop {
            match self.peek_char() {
                None => return Err(rql_error(self.input, start, "Unterminated string")),
                Some('\\') => {
                    self.advance(1);
                    if let Some(next) = self.peek_char() {
                        self.advance(next.len_utf8());
                        result.push(next);
                    }
                }
                Some(ch) if ch == quote => {
                    self.advance(1);
                    return Ok(result);
                }
                Some(ch) => {
                    self.advance(ch.len_utf8());
                    result.push(ch);
                }
            }
        }
    }
}

fn position_at(input: &str, offset: usize) -> Position {
    let consumed = &input[..offset];
    let line = consumed.matches('\n').count();
    let last_newline = consumed.rfind('\n').map(|i| i + 1).unwrap_or(0);
    Position {
        line,
        column: offset - last_newline,
        offset,
    }
}

fn rql_error(input: &str, offset: usize, message: impl Into<String>) -> TagStormError {
    TagStormError::Rql {
        message: message.into(),
        input: input.to_string(),
        position: position_at(input, offset),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer { input, pos: 0 };
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

// ── Expression tree ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RqlType {
    Boolean,
    String,
    Int,
    Double,
}

/// Type both sides of a binary operation are cast to.
fn common_type(left: RqlType, right: RqlType) -> RqlType {
    use RqlType::*;
    if left == right {
        left
    } else if left == Double || right == Double {
        Double
    } else if left == Int || right == Int {
        Int
    } else {
        Boolean
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RqlVal {
    Boolean(bool),
    String(String),
    Int(i64),
    Double(f64),
}

impl RqlVal {
    pub fn as_bool(&self) -> bool {
        match self {
            RqlVal::Boolean(b) => *b,
            RqlVal::String(s) => !s.is_empty(),
            RqlVal::Int(i) => *i != 0,
            RqlVal::Double(x) => *x != 0.0,
        }
    }

    fn as_int(&self) -> i64 {
        match self {
            RqlVal::Boolean(b) => i64::from(*b),
            RqlVal::String(s) => lenient_int(s),
            RqlVal::Int(i) => *i,
            RqlVal::Double(x) => *x as i64,
        }
    }

    fn as_double(&self) -> f64 {
        match self {
            RqlVal::Boolean(b) => f64::from(u8::from(*b)),
            RqlVal::String(s) => s.trim().parse().unwrap_or(0.0),
            RqlVal::Int(i) => *i as f64,
            RqlVal::Double(x) => *x,
        }
    }

    fn cast(self, ty: RqlType) -> RqlVal {
        match ty {
            RqlType::Boolean => RqlVal::Boolean(self.as_bool()),
            RqlType::Int => RqlVal::Int(self.as_int()),
            RqlType::Double => RqlVal::Double(self.as_double()),
            RqlType::String => match self {
                RqlVal::String(s) => RqlVal::String(s),
                other => RqlVal::String(other.to_string()),
            },
        }
    }
}

impl fmt::Display for RqlVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RqlVal::Boolean(b) => write!(f, "{}", b),
            RqlVal::String(s) => write!(f, "{}", s),
            RqlVal::Int(i) => write!(f, "{}", i),
            RqlVal::Double(x) => write!(f, "{}", x),
        }
    }
}

/// Integer prefix of a string, 0 if there is none.
fn lenient_int(s: &str) -> i64 {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return i;
    }
    let sign_len = usize::from(s.starts_with(['-', '+']));
    let digits = s[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(s.len(), |ix| ix + sign_len);
    s[..digits].parse().unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(RqlVal),
    Symbol(String),
    /// Convert the child to the node's type.
    Cast(Box<RqlExpr>),
    Compare(CmpOp, Box<RqlExpr>, Box<RqlExpr>),
    /// Value, pattern, and the pattern precompiled when it is a literal.
    Like(Box<RqlExpr>, Box<RqlExpr>, Option<Wildcard>),
    Not(Box<RqlExpr>),
    And(Vec<RqlExpr>),
    Or(Vec<RqlExpr>),
    Negate(Box<RqlExpr>),
    /// Element of a comma-separated value, counting from 0.
    ArrayIx(Box<RqlExpr>, Box<RqlExpr>),
}

/// A typed expression.
#[derive(Debug, Clone, PartialEq)]
pub struct RqlExpr {
    pub kind: ExprKind,
    pub ty: RqlType,
}

impl RqlExpr {
    fn new(kind: ExprKind, ty: RqlType) -> Self {
        RqlExpr { kind, ty }
    }

    fn coerce(self, ty: RqlType) -> RqlExpr {
        if self.ty == ty {
            self
        } else {
            RqlExpr::new(ExprKind::Cast(Box::new(self)), ty)
        }
    }

    /// Parse a standalone expression.
    pub fn parse(text: &str) -> Result<RqlExpr> {
        let mut parser = RqlParser::new(text)?;
        let expr = parser.parse_expression()?;
        parser.expect_end()?;
        Ok(expr)
    }

    /// Evaluate against a record. `lookup` returns a field's value or
    /// `None`; missing fields read as empty strings. Fails only when a
    /// `like` pattern read from a field does not compile.
    pub fn eval<'v, F>(&self, lookup: &F) -> Result<RqlVal>
    where
        F: Fn(&str) -> Option<&'v str>,
    {
        Ok(match &self.kind {
            ExprKind::Literal(v) => v.clone(),
            ExprKind::Symbol(name) => RqlVal::String(lookup(name).unwrap_or("").to_string()),
            ExprKind::Cast(child) => child.eval(lookup)?.cast(self.ty),
            ExprKind::Compare(op, l, r) => {
                let (l, r) = (l.eval(lookup)?, r.eval(lookup)?);
                let ordering = match (&l, &r) {
                    (RqlVal::String(a), RqlVal::String(b)) => a.partial_cmp(b),
                    (RqlVal::Int(a), RqlVal::Int(b)) => a.partial_cmp(b),
                    (RqlVal::Double(a), RqlVal::Double(b)) => a.partial_cmp(b),
                    (RqlVal::Boolean(a), RqlVal::Boolean(b)) => a.partial_cmp(b),
                    _ => None,
                };
                let result = ordering.map_or(false, |o| match op {
                    CmpOp::Eq => o.is_eq(),
                    CmpOp::Ne => o.is_ne(),
                    CmpOp::Lt => o.is_lt(),
                    CmpOp::Le => o.is_le(),
                    CmpOp::Gt => o.is_gt(),
                    CmpOp::Ge => o.is_ge(),
                });
                RqlVal::Boolean(result)
            }
            ExprKind::Like(l, r, compiled) => {
                let s = l.eval(lookup)?.to_string();
                let matched = match compiled {
                    Some(wild) => wild.matches(&s),
                    None => Wildcard::like(&r.eval(lookup)?.to_string())?.matches(&s),
                };
                RqlVal::Boolean(matched)
            }
            ExprKind::Not(child) => RqlVal::Boolean(!child.eval(lookup)?.as_bool()),
            ExprKind::And(children) => {
                let mut all = true;
                for c in children {
                    if !c.eval(lookup)?.as_bool() {
                        all = false;
                        break;
                    }
                }
                RqlVal::Boolean(all)
            }
            ExprKind::Or(children) => {
                let mut any = false;
                for c in children {
                    if c.eval(lookup)?.as_bool() {
                        any = true;
                        break;
                    }
                }
                RqlVal::Boolean(any)
            }
            ExprKind::Negate(child) => match child.eval(lookup)? {
                RqlVal::Int(i) => RqlVal::Int(i.wrapping_neg()),
                other => RqlVal::Double(-other.as_double()),
            },
            ExprKind::ArrayIx(collection, index) => {
                let list = collection.eval(lookup)?.to_string();
                let ix = index.eval(lookup)?.as_int();
                let element = usize::try_from(ix)
                    .ok()
                    .and_then(|ix| csv_split(&list).ok()?.into_iter().nth(ix))
                    .unwrap_or_default();
                RqlVal::String(element)
            }
        })
    }

    /// Evaluate as a filter.
    pub fn matches<'v, F>(&self, lookup: &F) -> Result<bool>
    where
        F: Fn(&str) -> Option<&'v str>,
    {
        Ok(self.eval(lookup)?.as_bool())
    }

    /// Names of the fields the expression reads, each once.
    pub fn vars_used(&self) -> Vec<String> {
        let mut vars = Vec::new();
        self.collect_vars(&mut vars);
        vars
    }

    fn collect_vars(&self, vars: &mut Vec<String>) {
        match &self.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Symbol(name) => {
                if !vars.contains(name) {
                    vars.push(name.clone());
                }
            }
            ExprKind::Cast(c) | ExprKind::Not(c) | ExprKind::Negate(c) => c.collect_vars(vars),
            ExprKind::Compare(_, l, r) | ExprKind::Like(l, r, _) | ExprKind::ArrayIx(l, r) => {
                l.collect_vars(vars);
                r.collect_vars(vars);
            }
            ExprKind::And(children) | ExprKind::Or(children) => {
                for c in children {
                    c.collect_vars(vars);
                }
            }
        }
    }
}

// ── Statements ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RqlCommand {
    Select,
    Count,
}

/// A parsed RQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct RqlStatement {
    pub command: RqlCommand,
    /// Selected fields; may contain `*` and `?` wildcards.
    pub fields: Vec<String>,
    pub tables: Vec<String>,
    pub where_clause: Option<RqlExpr>,
    /// Fields read by the where clause.
    pub where_vars: Vec<String>,
    pub limit: Option<usize>,
}

impl RqlStatement {
    pub fn parse(text: &str) -> Result<RqlStatement> {
        let mut parser = RqlParser::new(text)?;
        parser.parse_statement()
    }
}

impl std::str::FromStr for RqlStatement {
    type Err = TagStormError;

    fn from_str(s: &str) -> Result<Self> {
        RqlStatement::parse(s)
    }
}

// ── Parser ──────────────────────────────────────────────────────────

/// Parser state: a token list and a cursor into it.
struct RqlParser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> RqlParser<'a> {
    fn new(input: &'a str) -> Result<Self> {
        Ok(RqlParser {
            input,
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> TagStormError {
        let offset = self.peek().map_or(self.input.len(), |t| t.offset);
        rql_error(self.input, offset, message)
    }

    fn must_next(&mut self, expecting: &str) -> Result<Token> {
        match self.next() {
            Some(token) => Ok(token),
            None => Err(self.error_here(format!("Expecting {}, got end of statement", expecting))),
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.peek().map_or(false, |t| t.is_keyword(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().map_or(false, |t| t.is_punct(p)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error_here(format!("Expecting '{}'", p)))
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(self.error_here(format!(
                "Extra stuff starting with '{}' past end of statement",
                t.text
            ))),
        }
    }

    // ── Field specs ─────────────────────────────────────────────────

    /// A field or table name: adjacent tokens made of letters, digits and
    /// `* ? . / _`, with no blanks between them.
    fn parse_field_spec(&mut self) -> Result<String> {
        let mut spec = String::new();
        while let Some(token) = self.peek() {
            let first = token.text.chars().next().unwrap_or(' ');
            let allowed = match token.kind {
                TokKind::Word => true,
                TokKind::Number => !spec.is_empty(),
                TokKind::Punct => matches!(first, '*' | '?' | '.' | '/' | '_'),
                TokKind::Quoted => false,
            };
            if !allowed || (!spec.is_empty() && token.leading_spaces > 0) {
                break;
            }
            spec.push_str(&token.text);
            self.pos += 1;
        }
        if spec.is_empty() {
            return Err(self.error_here("Expecting field name"));
        }
        Ok(spec)
    }

    fn parse_statement(&mut self) -> Result<RqlStatement> {
        let command_tok = self.must_next("command")?;
        let mut command = RqlCommand::Select;
        let mut fields = Vec::new();
        if command_tok.is_keyword("select") {
            let first = self.parse_field_spec()?;
            if first.eq_ignore_ascii_case("count") && self.eat_punct("(") {
                loop {
                    if self.must_next("')'")?.is_punct(")") {
                        break;
                    }
                }
                command = RqlCommand::Count;
            } else {
                fields.push(first);
                while self.eat_punct(",") {
                    fields.push(self.parse_field_spec()?);
                }
            }
        } else if command_tok.is_keyword("count") {
            command = RqlCommand::Count;
        } else {
            return Err(rql_error(
                self.input,
                command_tok.offset,
                format!("Unknown RQL command '{}'", command_tok.text),
            ));
        }

        let mut tables = Vec::new();
        if self.peek().is_some() {
            if !self.eat_keyword("from") {
                return Err(self.error_here("Missing 'from' clause"));
            }
            tables.push(self.parse_field_spec()?);
            while self.eat_punct(",") {
                tables.push(self.parse_field_spec()?);
            }
        }

        let mut where_clause = None;
        let mut where_vars = Vec::new();
        if self.eat_keyword("where") {
            let expr = self.parse_expression()?;
            where_vars = expr.vars_used();
            where_clause = Some(expr);
        }

        let mut limit = None;
        if let Some(token) = self.peek() {
            if !token.is_keyword("limit") {
                return Err(self.error_here(format!("Unknown clause '{}'", token.text)));
            }
            self.pos += 1;
            let count = self.must_next("number after limit")?;
            if count.kind != TokKind::Number {
                return Err(rql_error(
                    self.input,
                    count.offset,
                    format!("Expecting number after limit, got {}", count.text),
                ));
            }
            limit = Some(count.text.parse::<usize>().map_err(|_| {
                rql_error(self.input, count.offset, "Expecting whole number after limit")
            })?);
        }

        self.expect_end()?;
        Ok(RqlStatement {
            command,
            fields,
            tables,
            where_clause,
            where_vars,
            limit,
        })
    }

    // ── Expressions, lowest precedence first ────────────────────────

    fn parse_expression(&mut self) -> Result<RqlExpr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<RqlExpr> {
        let first = self.parse_and()?;
        if !self.peek().map_or(false, |t| t.is_keyword("or")) {
            return Ok(first);
        }
        let mut children = vec![first.coerce(RqlType::Boolean)];
        while self.eat_keyword("or") {
            children.push(self.parse_and()?.coerce(RqlType::Boolean));
        }
        Ok(RqlExpr::new(ExprKind::Or(children), RqlType::Boolean))
    }

    fn parse_and(&mut self) -> Result<RqlExpr> {
        let first = self.parse_not()?;
        if !self.peek().map_or(false, |t| t.is_keyword("and")) {
            return Ok(first);
        }
        let mut children = vec![first.coerce(RqlType::Boolean)];
        while self.eat_keyword("and") {
            children.push(self.parse_not()?.coerce(RqlType::Boolean));
        }
        Ok(RqlExpr::new(ExprKind::And(children), RqlType::Boolean))
    }

    fn parse_not(&mut self) -> Result<RqlExpr> {
        if self.eat_keyword("not") {
            let child = self.parse_cmp()?.coerce(RqlType::Boolean);
            return Ok(RqlExpr::new(ExprKind::Not(Box::new(child)), RqlType::Boolean));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<RqlExpr> {
        let left = self.parse_unary_minus()?;
        let Some(token) = self.peek() else {
            return Ok(left);
        };
        let op_offset = token.offset;
        let (op, is_like, negate) = if token.is_punct("=") {
            (Some(CmpOp::Eq), false, false)
        } else if token.is_punct("!=") || token.is_punct("<>") {
            (Some(CmpOp::Ne), false, false)
        } else if token.is_punct("<") {
            (Some(CmpOp::Lt), false, false)
        } else if token.is_punct("<=") {
            (Some(CmpOp::Le), false, false)
        } else if token.is_punct(">") {
            (Some(CmpOp::Gt), false, false)
        } else if token.is_punct(">=") {
            (Some(CmpOp::Ge), false, false)
        } else if token.is_keyword("like") {
            (None, true, false)
        } else if token.is_keyword("not") {
            (None, true, true)
        } else {
            return Ok(left);
        };
        self.pos += 1;
        if negate && !self.eat_keyword("like") {
            return Err(self.error_here("Expecting 'like' after 'not'"));
        }

        let right = self.parse_unary_minus()?;
        if is_like {
            if left.ty != RqlType::String || right.ty != RqlType::String {
                return Err(rql_error(
                    self.input,
                    op_offset,
                    "Expecting string type around comparison",
                ));
            }
            let compiled = match &right.kind {
                ExprKind::Literal(RqlVal::String(pattern)) => Some(
                    Wildcard::like(pattern)
                        .map_err(|e| rql_error(self.input, op_offset, e.to_string()))?,
                ),
                _ => None,
            };
            let like = RqlExpr::new(
                ExprKind::Like(Box::new(left), Box::new(right), compiled),
                RqlType::Boolean,
            );
            if negate {
                return Ok(RqlExpr::new(ExprKind::Not(Box::new(like)), RqlType::Boolean));
            }
            return Ok(like);
        }

        let ty = common_type(left.ty, right.ty);
        let (left, right) = (left.coerce(ty), right.coerce(ty));
        let op = op.unwrap_or(CmpOp::Eq);
        Ok(RqlExpr::new(
            ExprKind::Compare(op, Box::new(left), Box::new(right)),
            RqlType::Boolean,
        ))
    }

    fn parse_unary_minus(&mut self) -> Result<RqlExpr> {
        if !self.eat_punct("-") {
            return self.parse_index();
        }
        let child = self.parse_index()?;
        if child.ty == RqlType::Int {
            return Ok(RqlExpr::new(ExprKind::Negate(Box::new(child)), RqlType::Int));
        }
        let child = child.coerce(RqlType::Double);
        Ok(RqlExpr::new(ExprKind::Negate(Box::new(child)), RqlType::Double))
    }

    fn parse_index(&mut self) -> Result<RqlExpr> {
        let collection = self.parse_atom()?;
        if !self.eat_punct("[") {
            return Ok(collection);
        }
        let index = self.parse_atom()?.coerce(RqlType::Int);
        self.expect_punct("]")?;
        Ok(RqlExpr::new(
            ExprKind::ArrayIx(Box::new(collection), Box::new(index)),
            RqlType::String,
        ))
    }

    fn parse_atom(&mut self) -> Result<RqlExpr> {
        let token = self.must_next("expression")?;
        match token.kind {
            TokKind::Quoted => Ok(RqlExpr::new(
                ExprKind::Literal(RqlVal::String(token.text)),
                RqlType::String,
            )),
            TokKind::Word => {
                // Dotted names like sample.id read as one symbol.
                let mut name = token.text;
                while self.peek().map_or(false, |t| t.is_punct(".") && t.leading_spaces == 0) {
                    let Some(part) = self.tokens.get(self.pos + 1) else {
                        break;
                    };
                    if part.leading_spaces > 0 || part.kind == TokKind::Quoted || part.kind == TokKind::Punct {
                        break;
                    }
                    name.push('.');
                    name.push_str(&part.text);
                    self.pos += 2;
                }
                Ok(RqlExpr::new(ExprKind::Symbol(name), RqlType::String))
            }
            TokKind::Number => {
                if token.text.contains('.') {
                    let x = token.text.parse().map_err(|_| {
                        rql_error(self.input, token.offset, format!("Bad number {}", token.text))
                    })?;
                    Ok(RqlExpr::new(ExprKind::Literal(RqlVal::Double(x)), RqlType::Double))
                } else {
                    let i = token.text.parse().map_err(|_| {
                        rql_error(self.input, token.offset, format!("Number {} too big", token.text))
                    })?;
                    Ok(RqlExpr::new(ExprKind::Literal(RqlVal::Int(i)), RqlType::Int))
                }
            }
            TokKind::Punct if token.text == "(" => {
                let expr = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokKind::Punct => Err(rql_error(
                self.input,
                token.offset,
                format!("Unexpected {}", token.text),
            )),
        }
    }
}
