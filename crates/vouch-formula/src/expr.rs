//! Anchor-formula expression grammar
//!
//! ```text
//! formula := ref '=' expr
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := number | ref | 'SUM' '(' ref ':' ref ')' | '(' expr ')'
//! ref     := column offset? | ('#' digits | '{' label '}') offset?
//! offset  := '[' ('+' | '-')? digits ']'
//! ```
//!
//! Column references (`A`, `AB`) are replicated down the rows; the optional
//! offset shifts the row (`B[-1]` is the previous row). Row references (`#3`,
//! `{Total revenue}`) are replicated across the columns; the offset shifts
//! the column.

use crate::anchor::Axis;
use crate::error::FormulaError;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

const MAX_COLUMN_LETTERS: usize = 3;

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

/// Row named by a row reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowAnchor {
    /// 0-based raw row index (written 1-based as `#n`)
    Number(usize),
    /// Row label, resolved against the grid
    Label(String),
}

/// Cell reference with a symbolic replication index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTemplate {
    /// Fixed column, replicated row
    Column {
        /// 0-based column
        column: usize,
        /// Shift from the replicated row
        row_offset: i64,
    },
    /// Fixed row, replicated column
    Row {
        /// Anchored row
        row: RowAnchor,
        /// Shift from the replicated column
        column_offset: i64,
    },
}

impl RefTemplate {
    /// Axis this reference is replicated along
    #[inline]
    #[must_use]
    pub fn axis(&self) -> Axis {
        match self {
            Self::Column { .. } => Axis::Rows,
            Self::Row { .. } => Axis::Columns,
        }
    }

    /// Shift from the replicated row or column
    #[inline]
    #[must_use]
    pub fn offset(&self) -> i64 {
        match self {
            Self::Column { row_offset, .. } => *row_offset,
            Self::Row { column_offset, .. } => *column_offset,
        }
    }
}

impl fmt::Display for RefTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let offset = match self {
            Self::Column { column, row_offset } => {
                f.write_str(&column_letters(*column))?;
                *row_offset
            }
            Self::Row { row, column_offset } => {
                match row {
                    RowAnchor::Number(n) => write!(f, "#{}", n + 1)?,
                    RowAnchor::Label(label) => write!(f, "{{{label}}}")?,
                }
                *column_offset
            }
        };
        if offset != 0 {
            write!(f, "[{offset:+}]")?;
        }
        Ok(())
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Literal
    Number(Decimal),
    /// Single cell
    Ref(RefTemplate),
    /// Sum over an inclusive range along the fixed axis
    Sum(RefTemplate, RefTemplate),
    /// Unary minus
    Neg(Box<Expr>),
    /// Binary operation
    Binary(Box<Expr>, Op, Box<Expr>),
}

impl Expr {
    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a RefTemplate>) {
        match self {
            Self::Number(_) => {}
            Self::Ref(r) => out.push(r),
            Self::Sum(a, b) => {
                out.push(a);
                out.push(b);
            }
            Self::Neg(inner) => inner.collect_refs(out),
            Self::Binary(lhs, _, rhs) => {
                lhs.collect_refs(out);
                rhs.collect_refs(out);
            }
        }
    }
}

/// Parsed `target = expr`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFormula {
    /// Asserted cell
    pub target: RefTemplate,
    /// Right-hand side
    pub expr: Expr,
}

impl ParsedFormula {
    /// Every reference, target first
    #[must_use]
    pub fn references(&self) -> Vec<&RefTemplate> {
        let mut refs = vec![&self.target];
        self.expr.collect_refs(&mut refs);
        refs
    }

    /// Replication axis implied by the references
    ///
    /// # Errors
    /// `FormulaError::MixedAxis` when column and row references are mixed.
    pub fn axis(&self) -> Result<Axis, FormulaError> {
        let axis = self.target.axis();
        if self.references().iter().all(|r| r.axis() == axis) {
            Ok(axis)
        } else {
            Err(FormulaError::MixedAxis)
        }
    }
}

/// Spreadsheet letters for a 0-based column
#[must_use]
pub fn column_letters(column: usize) -> String {
    let mut n = column + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// 0-based column for spreadsheet letters
#[must_use]
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || letters.len() > MAX_COLUMN_LETTERS {
        return None;
    }
    letters
        .chars()
        .try_fold(0usize, |acc, c| {
            let c = c.to_ascii_uppercase();
            c.is_ascii_uppercase()
                .then(|| acc * 26 + (c as usize - 'A' as usize + 1))
        })
        .map(|n| n - 1)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Column(usize),
    RowNumber(usize),
    RowLabel(String),
    Offset(i64),
    Sum,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Colon,
    Equals,
}

fn syntax(offset: usize, message: impl Into<String>) -> FormulaError {
    FormulaError::Syntax {
        offset,
        message: message.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, FormulaError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let take_while = |start: usize, pred: &dyn Fn(char) -> bool| -> usize {
        let mut end = start;
        while end < chars.len() && pred(chars[end].1) {
            end += 1;
        }
        end
    };
    let slice = |start: usize, end: usize| -> &str {
        let from = chars.get(start).map_or(text.len(), |c| c.0);
        let to = chars.get(end).map_or(text.len(), |c| c.0);
        &text[from..to]
    };

    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let end = take_while(i, &|c| c.is_ascii_digit() || c == '.');
                let literal = slice(i, end);
                let value = Decimal::from_str(literal)
                    .map_err(|_| syntax(pos, format!("invalid number {literal:?}")))?;
                tokens.push((pos, Token::Number(value)));
                i = end;
            }
            '#' => {
                let end = take_while(i + 1, &|c| c.is_ascii_digit());
                let digits = slice(i + 1, end);
                let n: usize = digits
                    .parse()
                    .map_err(|_| syntax(pos, "expected row number after '#'"))?;
                if n == 0 {
                    return Err(syntax(pos, "row numbers start at 1"));
                }
                tokens.push((pos, Token::RowNumber(n - 1)));
                i = end;
            }
            '{' => {
                let end = take_while(i + 1, &|c| c != '}');
                if end >= chars.len() {
                    return Err(syntax(pos, "unterminated row label"));
                }
                let label = slice(i + 1, end).trim();
                if label.is_empty() {
                    return Err(syntax(pos, "empty row label"));
                }
                tokens.push((pos, Token::RowLabel(label.to_string())));
                i = end + 1;
            }
            '[' => {
                let end = take_while(i + 1, &|c| c != ']');
                if end >= chars.len() {
                    return Err(syntax(pos, "unterminated offset"));
                }
                let raw = slice(i + 1, end).replace(' ', "");
                let raw = raw.strip_prefix('+').unwrap_or(&raw);
                let offset: i64 = raw
                    .parse()
                    .map_err(|_| syntax(pos, format!("invalid offset {raw:?}")))?;
                tokens.push((pos, Token::Offset(offset)));
                i = end + 1;
            }
            c if c.is_ascii_alphabetic() => {
                let end = take_while(i, &|c| c.is_ascii_alphabetic());
                let word = slice(i, end);
                if word.eq_ignore_ascii_case("sum") {
                    tokens.push((pos, Token::Sum));
                } else {
                    let column = column_index(word)
                        .ok_or_else(|| syntax(pos, format!("invalid column {word:?}")))?;
                    tokens.push((pos, Token::Column(column)));
                }
                i = end;
            }
            '+' => push_single(&mut tokens, &mut i, pos, Token::Plus),
            '-' => push_single(&mut tokens, &mut i, pos, Token::Minus),
            '*' => push_single(&mut tokens, &mut i, pos, Token::Star),
            '/' => push_single(&mut tokens, &mut i, pos, Token::Slash),
            '(' => push_single(&mut tokens, &mut i, pos, Token::LParen),
            ')' => push_single(&mut tokens, &mut i, pos, Token::RParen),
            ':' => push_single(&mut tokens, &mut i, pos, Token::Colon),
            '=' => push_single(&mut tokens, &mut i, pos, Token::Equals),
            other => return Err(syntax(pos, format!("unexpected character {other:?}"))),
        }
    }

    Ok(tokens)
}

fn push_single(tokens: &mut Vec<(usize, Token)>, i: &mut usize, pos: usize, token: Token) {
    tokens.push((pos, token));
    *i += 1;
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(o, _)| *o)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, wanted: &Token, what: &str) -> Result<(), FormulaError> {
        let offset = self.offset();
        match self.next() {
            Some(ref t) if t == wanted => Ok(()),
            _ => Err(syntax(offset, format!("expected {what}"))),
        }
    }

    fn formula(&mut self) -> Result<ParsedFormula, FormulaError> {
        let target = match self.peek() {
            Some(Token::Column(_) | Token::RowNumber(_) | Token::RowLabel(_)) => self.reference()?,
            _ => return Err(FormulaError::InvalidTarget),
        };
        if self.peek() != Some(&Token::Equals) {
            return Err(FormulaError::InvalidTarget);
        }
        self.pos += 1;
        let expr = self.expr()?;
        if self.pos < self.tokens.len() {
            return Err(syntax(self.offset(), "unexpected trailing input"));
        }
        Ok(ParsedFormula { target, expr })
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Op::Add,
                Some(Token::Minus) => Op::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Op::Mul,
                Some(Token::Slash) => Op::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        let offset = self.offset();
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::Column(_) | Token::RowNumber(_) | Token::RowLabel(_)) => {
                Ok(Expr::Ref(self.reference()?))
            }
            Some(Token::Sum) => {
                self.pos += 1;
                self.expect(&Token::LParen, "'(' after SUM")?;
                let from = self.reference()?;
                self.expect(&Token::Colon, "':' in SUM range")?;
                let to = self.reference()?;
                self.expect(&Token::RParen, "')' closing SUM")?;
                if from.axis() != to.axis() {
                    return Err(FormulaError::MixedAxis);
                }
                Ok(Expr::Sum(from, to))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(syntax(offset, "expected number, reference or '('")),
        }
    }

    fn reference(&mut self) -> Result<RefTemplate, FormulaError> {
        let offset = self.offset();
        let base = match self.next() {
            Some(Token::Column(column)) => RefTemplate::Column { column, row_offset: 0 },
            Some(Token::RowNumber(n)) => RefTemplate::Row {
                row: RowAnchor::Number(n),
                column_offset: 0,
            },
            Some(Token::RowLabel(label)) => RefTemplate::Row {
                row: RowAnchor::Label(label),
                column_offset: 0,
            },
            _ => return Err(syntax(offset, "expected reference")),
        };

        let Some(Token::Offset(shift)) = self.peek().cloned() else {
            return Ok(base);
        };
        self.pos += 1;
        Ok(match base {
            RefTemplate::Column { column, .. } => RefTemplate::Column {
                column,
                row_offset: shift,
            },
            RefTemplate::Row { row, .. } => RefTemplate::Row {
                row,
                column_offset: shift,
            },
        })
    }
}

/// Parse `target = expr`
///
/// # Errors
/// `FormulaError::Syntax`, `InvalidTarget`, `MixedAxis` or `NoReferences`.
pub fn parse_formula(text: &str) -> Result<ParsedFormula, FormulaError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: text.len(),
    };
    let parsed = parser.formula()?;
    parsed.axis()?;
    if parsed.references().len() < 2 {
        return Err(FormulaError::NoReferences);
    }
    Ok(parsed)
}
