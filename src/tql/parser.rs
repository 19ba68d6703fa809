// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! TQL predicate parser.
//!
//! Hand-written recursive descent over the raw query string: single
//! pass, no token buffer, no parser-generator dependency. The parser is
//! schema-blind: identifiers stay strings, constants stay literals, and
//! the compiler does the typed lowering.
//!
//! ## Supported Grammar
//! ```text
//! query        := or_pred descriptor*
//! or_pred      := and_pred (OR and_pred)*
//! and_pred     := atom ((AND)? atom)*          // AND also by juxtaposition
//! atom         := NOT atom | "(" or_pred ")" | comparison
//!               | TRUEPREDICATE | FALSEPREDICATE
//! comparison   := value op value ("[c]")?
//! op           := == | != | < | <= | > | >= | BEGINSWITH | ENDSWITH
//!               | CONTAINS | LIKE | IN | TEXT
//! value        := term (("+"|"-") term)*
//! term         := primary (("*"|"/") primary)*
//! primary      := constant | (ANY|ALL|NONE|SOME)? keypath
//! keypath      := elem ("." elem | "[" index "]")* postop?
//! postop       := .@size | .@count | .@type | .@min | .@max | .@sum | .@avg
//! constant     := NUMBER | STRING | B64"..." | uuid(...) | oid(...)
//!               | timestamp | NULL | TRUE | FALSE | $N | $KN | "{" list "}"
//! descriptor   := SORT(path [ASC|DESC], ...) | DISTINCT(path, ...)
//!               | LIMIT(n)
//! ```

use super::ast::{
    AggOp, CompareOp, Comparison, Constant, DescriptorNode, ParsedQuery, PathElem, PostOp, Pred,
    Quantifier, ValueNode,
};
use super::base64;
use crate::error::{TroveError, TroveResult};
use crate::value::{ObjectId, Timestamp};
use once_cell::sync::Lazy;
use regex::Regex;

/// Date-time literal: `YYYY-MM-DD@HH:MM:SS[:NS]`.
static DATE_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})@(\d{1,2}):(\d{2}):(\d{2})(?::(\d+))?").unwrap()
});

/// Parses a TQL query string.
///
/// ## Error Conditions
/// - `SyntaxError` with the failing position
pub fn parse(query: &str) -> TroveResult<ParsedQuery> {
    let mut parser = Parser::new(query);
    parser.parse()
}

/// Parser state machine.
struct Parser<'a> {
    query: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(query: &'a str) -> Self {
        Self {
            query: query.trim_end(),
            pos: 0,
        }
    }

    fn parse(&mut self) -> TroveResult<ParsedQuery> {
        let predicate = self.parse_or()?;
        let mut descriptors = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek_keyword("SORT") {
                descriptors.push(self.parse_sort()?);
            } else if self.peek_keyword("DISTINCT") {
                descriptors.push(self.parse_distinct()?);
            } else if self.peek_keyword("LIMIT") {
                descriptors.push(self.parse_limit()?);
            } else {
                break;
            }
        }
        self.skip_whitespace();
        if self.pos < self.query.len() {
            return Err(self.error(format!(
                "unexpected input: '{}'",
                &self.query[self.pos..self.query.len().min(self.pos + 24)]
            )));
        }
        Ok(ParsedQuery {
            predicate,
            descriptors,
        })
    }

    fn parse_or(&mut self) -> TroveResult<Pred> {
        let mut operands = vec![self.parse_and()?];
        loop {
            self.skip_whitespace();
            if self.peek_keyword("OR") {
                self.expect_keyword("OR")?;
            } else if self.peek_str("||") {
                self.pos += 2;
            } else {
                break;
            }
            operands.push(self.parse_and()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Pred::Or(operands)
        })
    }

    fn parse_and(&mut self) -> TroveResult<Pred> {
        let mut operands = vec![self.parse_atom()?];
        loop {
            self.skip_whitespace();
            if self.peek_keyword("AND") {
                self.expect_keyword("AND")?;
            } else if self.peek_str("&&") {
                self.pos += 2;
            } else if self.starts_atom() {
                // implicit AND by juxtaposition
            } else {
                break;
            }
            operands.push(self.parse_atom()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Pred::And(operands)
        })
    }

    /// Whether the upcoming input begins a new atom (for implicit AND).
    fn starts_atom(&self) -> bool {
        if self.peek_keyword("OR")
            || self.peek_keyword("SORT")
            || self.peek_keyword("DISTINCT")
            || self.peek_keyword("LIMIT")
            || self.peek_keyword("ASC")
            || self.peek_keyword("DESC")
        {
            return false;
        }
        let mut pos = self.pos;
        while pos < self.query.len() && self.query.as_bytes()[pos].is_ascii_whitespace() {
            pos += 1;
        }
        match self.query.as_bytes().get(pos) {
            Some(&b) => {
                b.is_ascii_alphanumeric()
                    || matches!(b, b'_' | b'$' | b'@' | b'(' | b'!' | b'"' | b'\'' | b'{' | b'-')
            }
            None => false,
        }
    }

    fn parse_atom(&mut self) -> TroveResult<Pred> {
        self.skip_whitespace();
        if self.peek_keyword("NOT") {
            self.expect_keyword("NOT")?;
            return Ok(Pred::Not(Box::new(self.parse_atom()?)));
        }
        if self.peek_str("!") && !self.peek_str("!=") {
            self.pos += 1;
            return Ok(Pred::Not(Box::new(self.parse_atom()?)));
        }
        if self.peek_char() == Some('(') {
            self.advance();
            let inner = self.parse_or()?;
            self.skip_whitespace();
            if self.peek_char() != Some(')') {
                return Err(self.error("expected ')'".to_string()));
            }
            self.advance();
            return Ok(inner);
        }
        if self.peek_keyword("TRUEPREDICATE") {
            self.expect_keyword("TRUEPREDICATE")?;
            return Ok(Pred::True);
        }
        if self.peek_keyword("FALSEPREDICATE") {
            self.expect_keyword("FALSEPREDICATE")?;
            return Ok(Pred::False);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> TroveResult<Pred> {
        let left = self.parse_value()?;
        self.skip_whitespace();
        let op = self.parse_operator()?;
        let case_insensitive = self.parse_case_modifier()?;
        let right = self.parse_value()?;
        Ok(Pred::Cmp(Comparison {
            op,
            case_insensitive,
            left,
            right,
        }))
    }

    fn parse_operator(&mut self) -> TroveResult<CompareOp> {
        self.skip_whitespace();
        for (text, op) in [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            ("<>", CompareOp::Ne),
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
            ("=", CompareOp::Eq),
        ] {
            if self.peek_str(text) {
                self.pos += text.len();
                return Ok(op);
            }
        }
        for (word, op) in [
            ("BEGINSWITH", CompareOp::BeginsWith),
            ("ENDSWITH", CompareOp::EndsWith),
            ("CONTAINS", CompareOp::Contains),
            ("LIKE", CompareOp::Like),
            ("IN", CompareOp::In),
            ("TEXT", CompareOp::TextSearch),
        ] {
            if self.peek_keyword(word) {
                self.expect_keyword(word)?;
                return Ok(op);
            }
        }
        Err(self.error("expected comparison operator".to_string()))
    }

    fn parse_case_modifier(&mut self) -> TroveResult<bool> {
        if self.peek_str("[c]") {
            self.pos += 3;
            return Ok(true);
        }
        Ok(false)
    }

    // ---- values ----------------------------------------------------------

    fn parse_value(&mut self) -> TroveResult<ValueNode> {
        let mut node = self.parse_term()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('+') => '+',
                // A minus is arithmetic only between operands; a leading
                // minus belongs to the numeric literal.
                Some('-') => '-',
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            node = ValueNode::Arith {
                op,
                left: Box::new(node),
                right: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn parse_term(&mut self) -> TroveResult<ValueNode> {
        let mut node = self.parse_primary()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('*') => '*',
                Some('/') => '/',
                _ => break,
            };
            self.advance();
            let rhs = self.parse_primary()?;
            node = ValueNode::Arith {
                op,
                left: Box::new(node),
                right: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> TroveResult<ValueNode> {
        self.skip_whitespace();

        if let Some(constant) = self.try_parse_constant()? {
            return Ok(ValueNode::Constant(constant));
        }

        // Quantifier prefix.
        let quantifier = if self.peek_keyword("ANY") {
            self.expect_keyword("ANY")?;
            Some(Quantifier::Any)
        } else if self.peek_keyword("SOME") {
            self.expect_keyword("SOME")?;
            Some(Quantifier::Any)
        } else if self.peek_keyword("ALL") {
            self.expect_keyword("ALL")?;
            Some(Quantifier::All)
        } else if self.peek_keyword("NONE") {
            self.expect_keyword("NONE")?;
            Some(Quantifier::None)
        } else {
            None
        };

        self.parse_keypath(quantifier)
    }

    fn parse_keypath(&mut self, quantifier: Option<Quantifier>) -> TroveResult<ValueNode> {
        self.skip_whitespace();
        let mut path = Vec::new();
        let mut post_op = None;
        let mut aggregate = None;

        loop {
            self.skip_whitespace();
            if self.peek_str("@links") {
                self.pos += "@links".len();
                self.expect_char('.')?;
                let table = self.parse_identifier()?;
                self.expect_char('.')?;
                let column = self.parse_identifier()?;
                path.push(PathElem::Backlink { table, column });
            } else if self.peek_str("@keys") {
                self.pos += "@keys".len();
                path.push(PathElem::Keys);
            } else if self.peek_str("@values") {
                self.pos += "@values".len();
                path.push(PathElem::Values);
            } else if self.peek_str("@") {
                // Terminal post-op or aggregate.
                self.pos += 1;
                let word = self.parse_identifier()?;
                match word.as_str() {
                    "size" => post_op = Some(PostOp::Size),
                    "count" => post_op = Some(PostOp::Count),
                    "type" => post_op = Some(PostOp::Type),
                    "min" => aggregate = Some(AggOp::Min),
                    "max" => aggregate = Some(AggOp::Max),
                    "sum" => aggregate = Some(AggOp::Sum),
                    "avg" => aggregate = Some(AggOp::Avg),
                    other => {
                        return Err(self.error(format!("unknown post-op '@{}'", other)));
                    }
                }
                break;
            } else {
                let ident = self.parse_identifier()?;
                path.push(PathElem::Key(ident));
            }

            // Bracket accessors.
            while self.peek_char() == Some('[') {
                self.advance();
                self.skip_whitespace();
                if self.peek_keyword("ALL") {
                    self.expect_keyword("ALL")?;
                    path.push(PathElem::AllEntries);
                } else if self
                    .peek_char()
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false)
                {
                    let n = self.parse_number_usize()?;
                    path.push(PathElem::Index(n));
                } else {
                    let key = self.parse_string_literal()?;
                    path.push(PathElem::DictKey(key));
                }
                self.skip_whitespace();
                self.expect_char(']')?;
            }

            if self.peek_char() == Some('.') {
                self.advance();
                continue;
            }
            break;
        }

        if path.is_empty() {
            return Err(self.error("expected key path".to_string()));
        }
        Ok(ValueNode::Property {
            quantifier,
            path,
            post_op,
            aggregate,
        })
    }

    // ---- constants -------------------------------------------------------

    fn try_parse_constant(&mut self) -> TroveResult<Option<Constant>> {
        self.skip_whitespace();
        let rest = &self.query[self.pos..];

        if self.peek_keyword("NULL") || self.peek_keyword("NIL") {
            let word = if self.peek_keyword("NULL") { "NULL" } else { "NIL" };
            self.expect_keyword(word)?;
            return Ok(Some(Constant::Null));
        }
        if self.peek_keyword("TRUE") && !self.peek_keyword("TRUEPREDICATE") {
            self.expect_keyword("TRUE")?;
            return Ok(Some(Constant::True));
        }
        if self.peek_keyword("FALSE") && !self.peek_keyword("FALSEPREDICATE") {
            self.expect_keyword("FALSE")?;
            return Ok(Some(Constant::False));
        }

        match self.peek_char() {
            Some('"') | Some('\'') => {
                let s = self.parse_string_literal()?;
                return Ok(Some(Constant::String(s)));
            }
            Some('$') => {
                self.advance();
                let key_arg = self.peek_char() == Some('K');
                if key_arg {
                    self.advance();
                }
                let n = self.parse_number_usize()?;
                return Ok(Some(if key_arg {
                    Constant::KeyArg(n)
                } else {
                    Constant::Arg(n)
                }));
            }
            Some('{') => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    self.skip_whitespace();
                    if self.peek_char() == Some('}') {
                        self.advance();
                        break;
                    }
                    let item = self.try_parse_constant()?.ok_or_else(|| {
                        self.error("expected constant in list literal".to_string())
                    })?;
                    items.push(item);
                    self.skip_whitespace();
                    if self.peek_char() == Some(',') {
                        self.advance();
                    }
                }
                return Ok(Some(Constant::List(items)));
            }
            _ => {}
        }

        if rest.starts_with("B64\"") {
            self.pos += 4;
            let start = self.pos;
            while self.pos < self.query.len() && self.query.as_bytes()[self.pos] != b'"' {
                self.pos += 1;
            }
            if self.pos >= self.query.len() {
                return Err(self.error("unterminated base64 literal".to_string()));
            }
            let body = &self.query[start..self.pos];
            self.advance();
            let bytes = base64::decode(body)
                .ok_or_else(|| self.error("invalid base64 literal".to_string()))?;
            return Ok(Some(Constant::Base64(bytes)));
        }

        if rest.starts_with("uuid(") {
            self.pos += 5;
            let body = self.take_until(')')?;
            let parsed = uuid::Uuid::parse_str(body.trim())
                .map_err(|e| self.error(format!("invalid uuid literal: {}", e)))?;
            return Ok(Some(Constant::Uuid(parsed)));
        }

        if rest.starts_with("oid(") {
            self.pos += 4;
            let body = self.take_until(')')?.trim().to_string();
            let parsed = ObjectId::parse(&body)
                .map_err(|_| self.error("invalid object-id literal".to_string()))?;
            return Ok(Some(Constant::ObjectId(parsed)));
        }

        // Date-time literal.
        if let Some(caps) = DATE_LITERAL.captures(rest) {
            let whole = caps.get(0).expect("capture 0").as_str();
            let ts = timestamp_from_captures(&caps)
                .ok_or_else(|| self.error("invalid date literal".to_string()))?;
            self.pos += whole.len();
            return Ok(Some(Constant::Timestamp(ts)));
        }

        // Epoch timestamp literal `Tseconds:nanos`.
        if let Some(stripped) = rest.strip_prefix('T') {
            if stripped
                .chars()
                .next()
                .map(|c| c.is_ascii_digit() || c == '-')
                .unwrap_or(false)
            {
                if let Some((s, ns, used)) = parse_epoch_literal(stripped) {
                    let ts = Timestamp::new(s, ns)
                        .map_err(|_| self.error("invalid timestamp literal".to_string()))?;
                    self.pos += 1 + used;
                    return Ok(Some(Constant::Timestamp(ts)));
                }
            }
        }

        // Numbers.
        let starts_number = match self.peek_char() {
            Some(c) if c.is_ascii_digit() => true,
            Some('-') | Some('+') => self
                .query
                .as_bytes()
                .get(self.pos + 1)
                .map(|b| b.is_ascii_digit() || *b == b'.')
                .unwrap_or(false),
            Some('.') => self
                .query
                .as_bytes()
                .get(self.pos + 1)
                .map(|b| b.is_ascii_digit())
                .unwrap_or(false),
            _ => false,
        };
        if starts_number {
            return Ok(Some(self.parse_number_constant()?));
        }

        Ok(None)
    }

    fn parse_number_constant(&mut self) -> TroveResult<Constant> {
        let start = self.pos;
        if matches!(self.peek_char(), Some('-') | Some('+')) {
            self.advance();
        }
        let mut is_float = false;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == '.' && !is_float {
                is_float = true;
                self.advance();
            } else if (c == 'e' || c == 'E')
                && self
                    .query
                    .as_bytes()
                    .get(self.pos + 1)
                    .map(|b| b.is_ascii_digit() || *b == b'-' || *b == b'+')
                    .unwrap_or(false)
            {
                is_float = true;
                self.advance();
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.query[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(Constant::Float)
                .map_err(|_| self.error(format!("invalid number '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(Constant::Int)
                .map_err(|_| self.error(format!("invalid number '{}'", text)))
        }
    }

    // ---- descriptors -----------------------------------------------------

    fn parse_sort(&mut self) -> TroveResult<DescriptorNode> {
        self.expect_keyword("SORT")?;
        self.skip_whitespace();
        self.expect_char('(')?;
        let mut clauses = Vec::new();
        loop {
            let path = self.parse_dotted_path()?;
            self.skip_whitespace();
            let ascending = if self.peek_keyword("DESC")
                || self.peek_keyword("DESCENDING")
            {
                let word = if self.peek_keyword("DESCENDING") {
                    "DESCENDING"
                } else {
                    "DESC"
                };
                self.expect_keyword(word)?;
                false
            } else {
                if self.peek_keyword("ASCENDING") {
                    self.expect_keyword("ASCENDING")?;
                } else if self.peek_keyword("ASC") {
                    self.expect_keyword("ASC")?;
                }
                true
            };
            clauses.push((path, ascending));
            self.skip_whitespace();
            if self.peek_char() == Some(',') {
                self.advance();
                continue;
            }
            break;
        }
        self.expect_char(')')?;
        Ok(DescriptorNode::Sort(clauses))
    }

    fn parse_distinct(&mut self) -> TroveResult<DescriptorNode> {
        self.expect_keyword("DISTINCT")?;
        self.skip_whitespace();
        self.expect_char('(')?;
        let mut paths = Vec::new();
        loop {
            paths.push(self.parse_dotted_path()?);
            self.skip_whitespace();
            if self.peek_char() == Some(',') {
                self.advance();
                continue;
            }
            break;
        }
        self.expect_char(')')?;
        Ok(DescriptorNode::Distinct(paths))
    }

    fn parse_limit(&mut self) -> TroveResult<DescriptorNode> {
        self.expect_keyword("LIMIT")?;
        self.skip_whitespace();
        self.expect_char('(')?;
        self.skip_whitespace();
        let n = self.parse_number_usize()?;
        self.skip_whitespace();
        self.expect_char(')')?;
        Ok(DescriptorNode::Limit(n))
    }

    fn parse_dotted_path(&mut self) -> TroveResult<Vec<String>> {
        let mut path = vec![self.parse_identifier()?];
        while self.peek_char() == Some('.') {
            self.advance();
            path.push(self.parse_identifier()?);
        }
        Ok(path)
    }

    // ---- lexing helpers --------------------------------------------------

    fn parse_identifier(&mut self) -> TroveResult<String> {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.query.len() {
            let b = self.query.as_bytes()[self.pos];
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error("expected identifier".to_string()));
        }
        Ok(self.query[start..self.pos].to_string())
    }

    fn parse_string_literal(&mut self) -> TroveResult<String> {
        self.skip_whitespace();
        let quote = match self.peek_char() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected string literal".to_string())),
        };
        self.advance();
        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.advance();
            if c == quote {
                return Ok(out);
            }
            if c == '\\' {
                let esc = self
                    .peek_char()
                    .ok_or_else(|| self.error("unterminated escape".to_string()))?;
                self.advance();
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    'u' => {
                        let hex: String = self.query[self.pos..].chars().take(4).collect();
                        if hex.len() != 4 {
                            return Err(self.error("truncated \\u escape".to_string()));
                        }
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| self.error("invalid \\u escape".to_string()))?;
                        let ch = char::from_u32(code)
                            .ok_or_else(|| self.error("invalid \\u escape".to_string()))?;
                        out.push(ch);
                        self.pos += 4;
                    }
                    other => {
                        return Err(self.error(format!("unknown escape '\\{}'", other)));
                    }
                }
                continue;
            }
            out.push(c);
        }
        Err(self.error("unterminated string literal".to_string()))
    }

    fn parse_number_usize(&mut self) -> TroveResult<usize> {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.query.len() && self.query.as_bytes()[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected number".to_string()));
        }
        self.query[start..self.pos]
            .parse()
            .map_err(|_| self.error("invalid number".to_string()))
    }

    fn take_until(&mut self, terminator: char) -> TroveResult<&'a str> {
        let start = self.pos;
        while self.pos < self.query.len() {
            if self.query.as_bytes()[self.pos] == terminator as u8 {
                let body = &self.query[start..self.pos];
                self.pos += 1;
                return Ok(body);
            }
            self.pos += 1;
        }
        Err(self.error(format!("expected '{}'", terminator)))
    }

    fn expect_char(&mut self, expected: char) -> TroveResult<()> {
        self.skip_whitespace();
        if self.peek_char() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", expected)))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> TroveResult<()> {
        self.skip_whitespace();
        let end = self.pos + keyword.len();
        if end > self.query.len() || !self.query[self.pos..end].eq_ignore_ascii_case(keyword) {
            return Err(self.error(format!("expected '{}'", keyword)));
        }
        self.pos = end;
        Ok(())
    }

    /// Case-insensitive keyword lookahead with a word boundary.
    fn peek_keyword(&self, keyword: &str) -> bool {
        let mut pos = self.pos;
        while pos < self.query.len() && self.query.as_bytes()[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let end = pos + keyword.len();
        if end > self.query.len() || !self.query[pos..end].eq_ignore_ascii_case(keyword) {
            return false;
        }
        match self.query.as_bytes().get(end) {
            Some(b) => !(b.is_ascii_alphanumeric() || *b == b'_'),
            None => true,
        }
    }

    fn peek_str(&self, text: &str) -> bool {
        let mut pos = self.pos;
        while pos < self.query.len() && self.query.as_bytes()[pos].is_ascii_whitespace() {
            pos += 1;
        }
        self.query[pos..].starts_with(text)
    }

    fn peek_char(&self) -> Option<char> {
        self.query[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.query.len() && self.query.as_bytes()[self.pos].is_ascii_whitespace()
        {
            self.pos += 1;
        }
    }

    fn error(&self, message: String) -> TroveError {
        TroveError::SyntaxError {
            message,
            position: self.pos,
        }
    }
}

/// Builds a timestamp from a matched date literal.
fn timestamp_from_captures(caps: &regex::Captures<'_>) -> Option<Timestamp> {
    use chrono::{NaiveDate, NaiveDateTime};
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let day: u32 = caps.get(3)?.as_str().parse().ok()?;
    let hour: u32 = caps.get(4)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(5)?.as_str().parse().ok()?;
    let second: u32 = caps.get(6)?.as_str().parse().ok()?;
    let nanos: i32 = match caps.get(7) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let dt: NaiveDateTime = date.and_hms_opt(hour, minute, second)?;
    Timestamp::new(dt.and_utc().timestamp(), nanos).ok()
}

/// Parses `seconds:nanos`, returning consumed byte count.
fn parse_epoch_literal(input: &str) -> Option<(i64, i32, usize)> {
    let mut end = 0;
    let bytes = input.as_bytes();
    if bytes.first() == Some(&b'-') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == 0 || bytes.get(end) != Some(&b':') {
        return None;
    }
    let seconds: i64 = input[..end].parse().ok()?;
    let ns_start = end + 1;
    let mut ns_end = ns_start;
    if bytes.get(ns_end) == Some(&b'-') {
        ns_end += 1;
    }
    while ns_end < bytes.len() && bytes[ns_end].is_ascii_digit() {
        ns_end += 1;
    }
    if ns_end == ns_start {
        return None;
    }
    let nanos: i32 = input[ns_start..ns_end].parse().ok()?;
    Some((seconds, nanos, ns_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_comparison() {
        let q = parse("age > 21").unwrap();
        match q.predicate {
            Pred::Cmp(cmp) => {
                assert_eq!(cmp.op, CompareOp::Gt);
                assert!(matches!(cmp.right, ValueNode::Constant(Constant::Int(21))));
            }
            other => panic!("expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_and_or_precedence() {
        let q = parse("a == 1 AND b == 2 OR c == 3").unwrap();
        match q.predicate {
            Pred::Or(ops) => {
                assert_eq!(ops.len(), 2);
                assert!(matches!(ops[0], Pred::And(_)));
            }
            other => panic!("expected OR at top, got {:?}", other),
        }
    }

    #[test]
    fn test_implicit_and() {
        let q = parse("a == 1 b == 2").unwrap();
        match q.predicate {
            Pred::And(ops) => assert_eq!(ops.len(), 2),
            other => panic!("expected implicit AND, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_and_grouping() {
        let q = parse("NOT (a == 1 OR b == 2)").unwrap();
        assert!(matches!(q.predicate, Pred::Not(_)));
        let q2 = parse("!(a == 1)").unwrap();
        assert!(matches!(q2.predicate, Pred::Not(_)));
    }

    #[test]
    fn test_parse_string_ops_and_modifier() {
        let q = parse("name BEGINSWITH[c] 'Jo'").unwrap();
        match q.predicate {
            Pred::Cmp(cmp) => {
                assert_eq!(cmp.op, CompareOp::BeginsWith);
                assert!(cmp.case_insensitive);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_keypath_with_links() {
        let q = parse("friend.friend.name == 'Alice'").unwrap();
        match q.predicate {
            Pred::Cmp(cmp) => match cmp.left {
                ValueNode::Property { path, .. } => {
                    assert_eq!(path.len(), 3);
                    assert_eq!(path[0], PathElem::Key("friend".to_string()));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_backlinks_and_postops() {
        let q = parse("@links.people.friend.@count > 0").unwrap();
        match q.predicate {
            Pred::Cmp(cmp) => match cmp.left {
                ValueNode::Property { path, post_op, .. } => {
                    assert_eq!(
                        path[0],
                        PathElem::Backlink {
                            table: "people".to_string(),
                            column: "friend".to_string()
                        }
                    );
                    assert_eq!(post_op, Some(PostOp::Count));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_aggregate() {
        let q = parse("scores.@avg >= 4.5").unwrap();
        match q.predicate {
            Pred::Cmp(cmp) => match cmp.left {
                ValueNode::Property { aggregate, .. } => {
                    assert_eq!(aggregate, Some(AggOp::Avg));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_in_list_literal() {
        let q = parse("id IN {2, 4, 99}").unwrap();
        match q.predicate {
            Pred::Cmp(cmp) => {
                assert_eq!(cmp.op, CompareOp::In);
                match cmp.right {
                    ValueNode::Constant(Constant::List(items)) => assert_eq!(items.len(), 3),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_arguments() {
        let q = parse("age == $0 AND name == $1").unwrap();
        match q.predicate {
            Pred::And(ops) => {
                assert_eq!(ops.len(), 2);
                match &ops[0] {
                    Pred::Cmp(c) => {
                        assert!(matches!(c.right, ValueNode::Constant(Constant::Arg(0))))
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_quantifiers() {
        let q = parse("ALL scores > 3").unwrap();
        match q.predicate {
            Pred::Cmp(cmp) => match cmp.left {
                ValueNode::Property { quantifier, .. } => {
                    assert_eq!(quantifier, Some(Quantifier::All))
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_descriptors() {
        let q = parse("TRUEPREDICATE SORT(name ASC, age DESC) DISTINCT(name) LIMIT(10)").unwrap();
        assert_eq!(q.descriptors.len(), 3);
        assert_eq!(
            q.descriptors[0],
            DescriptorNode::Sort(vec![
                (vec!["name".to_string()], true),
                (vec!["age".to_string()], false),
            ])
        );
        assert_eq!(
            q.descriptors[1],
            DescriptorNode::Distinct(vec![vec!["name".to_string()]])
        );
        assert_eq!(q.descriptors[2], DescriptorNode::Limit(10));
    }

    #[test]
    fn test_parse_timestamp_literals() {
        let q = parse("created > T1700000000:500").unwrap();
        match q.predicate {
            Pred::Cmp(cmp) => match cmp.right {
                ValueNode::Constant(Constant::Timestamp(ts)) => {
                    assert_eq!(ts.seconds(), 1_700_000_000);
                    assert_eq!(ts.nanoseconds(), 500);
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse("created > 2023-01-15@08:30:00").is_ok());
    }

    #[test]
    fn test_parse_string_escapes() {
        let q = parse(r#"name == 'it\'s'"#).unwrap();
        match q.predicate {
            Pred::Cmp(cmp) => match cmp.right {
                ValueNode::Constant(Constant::String(s)) => assert_eq!(s, "it's"),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_arithmetic_value() {
        let q = parse("a + 2 * 3 == 7").unwrap();
        match q.predicate {
            Pred::Cmp(cmp) => match cmp.left {
                ValueNode::Arith { op: '+', right, .. } => {
                    assert!(matches!(*right, ValueNode::Arith { op: '*', .. }));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("name ==").is_err());
        assert!(parse("== 3").is_err());
        assert!(parse("(a == 1").is_err());
        assert!(parse("name LIKE 'x").is_err());
        assert!(parse("a == 1 SORT(name").is_err());
    }

    #[test]
    fn test_truepredicate_falsepredicate() {
        assert_eq!(parse("TRUEPREDICATE").unwrap().predicate, Pred::True);
        assert_eq!(parse("FALSEPREDICATE").unwrap().predicate, Pred::False);
    }
}
