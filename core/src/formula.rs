//! Restricted arithmetic formulas in `x` (absolute payment amount) and
//! `y` (payment frequency ratio).
//!
//! RULE: Source text is tokenized and parsed into an [`Expr`] tree before
//! anything is evaluated. Only the grammar below is accepted; every other
//! character, identifier or call fails at parse time.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := '-' unary | power
//! power   := primary ('**' unary)?
//! primary := number | 'x' | 'y' | func '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use crate::{config::FormulaSample, error::FormulaError};
use serde::{Deserialize, Serialize};

/// Maximum parser recursion depth.
pub const MAX_DEPTH: usize = 64;

/// Maximum token count. Bounds the height of left-leaning operator chains.
pub const MAX_TOKENS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }
}

/// The whitelisted math functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Min,
    Max,
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Floor,
    Ceil,
    Round,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "min"   => Function::Min,
            "max"   => Function::Max,
            "abs"   => Function::Abs,
            "sqrt"  => Function::Sqrt,
            "log"   => Function::Log,
            "exp"   => Function::Exp,
            "pow"   => Function::Pow,
            "floor" => Function::Floor,
            "ceil"  => Function::Ceil,
            "round" => Function::Round,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Min   => "min",
            Function::Max   => "max",
            Function::Abs   => "abs",
            Function::Sqrt  => "sqrt",
            Function::Log   => "log",
            Function::Exp   => "exp",
            Function::Pow   => "pow",
            Function::Floor => "floor",
            Function::Ceil  => "ceil",
            Function::Round => "round",
        }
    }

    fn check_arity(self, got: usize) -> Result<(), FormulaError> {
        let (ok, expected) = match self {
            Function::Min | Function::Max => (got >= 1, "at least 1"),
            Function::Log => ((1..=2).contains(&got), "1 or 2"),
            Function::Pow => (got == 2, "2"),
            _ => (got == 1, "1"),
        };
        if ok {
            Ok(())
        } else {
            Err(FormulaError::Arity {
                name: self.name().to_string(),
                expected,
                got,
            })
        }
    }
}

/// Syntax tree of a parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Variable(Variable),
    Unary {
        op:      UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op:  BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
}

/// A formula that has passed parsing and whitelisting.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    root: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0, depth: 0 };
        let root = parser.expr()?;
        parser.expect_end()?;
        Ok(Self { root })
    }

    /// Evaluate with the given bindings. Never panics; every numeric
    /// fault is reported as a `FormulaError`.
    pub fn eval(&self, x: f64, y: f64) -> Result<f64, FormulaError> {
        let value = eval_expr(&self.root, x, y)?;
        finite(value, "result")
    }
}

/// Parse and evaluate in one step.
pub fn evaluate_formula(source: &str, x: f64, y: f64) -> Result<f64, FormulaError> {
    Formula::parse(source)?.eval(x, y)
}

/// Outcome of the formula dry-run used by the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaValidation {
    pub valid:  bool,
    pub reason: Option<String>,
}

/// Parse `source` and evaluate it at every sample. Pure: touches no state.
pub fn validate_formula(source: &str, samples: &[FormulaSample]) -> FormulaValidation {
    let formula = match Formula::parse(source) {
        Ok(f) => f,
        Err(e) => {
            return FormulaValidation {
                valid:  false,
                reason: Some(e.to_string()),
            }
        }
    };
    for sample in samples {
        if let Err(e) = formula.eval(sample.x, sample.y) {
            return FormulaValidation {
                valid:  false,
                reason: Some(format!("at x={}, y={}: {e}", sample.x, sample.y)),
            };
        }
    }
    FormulaValidation {
        valid:  true,
        reason: None,
    }
}

// ── Tokenizer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Ident(s)  => s.clone(),
            Token::Plus      => "+".into(),
            Token::Minus     => "-".into(),
            Token::Star      => "*".into(),
            Token::StarStar  => "**".into(),
            Token::Slash     => "/".into(),
            Token::Percent   => "%".into(),
            Token::LParen    => "(".into(),
            Token::RParen    => ")".into(),
            Token::Comma     => ",".into(),
            Token::End       => "end of input".into(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, FormulaError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let start = i;
        let next = chars.get(i + 1).copied();

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch.is_ascii_digit() || (ch == '.' && next.is_some_and(|c| c.is_ascii_digit())) {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                    i = j;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| FormulaError::MalformedNumber { text: text.clone() })?;
            tokens.push((Token::Number(value), start));
            continue;
        }

        if ch.is_ascii_alphabetic() {
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            tokens.push((Token::Ident(chars[start..i].iter().collect()), start));
            continue;
        }

        let token = match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' if next == Some('*') => {
                i += 1;
                Token::StarStar
            }
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            _ => return Err(FormulaError::UnexpectedChar { ch, pos: start }),
        };
        i += 1;
        tokens.push((token, start));
    }

    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }
    if tokens.len() > MAX_TOKENS {
        return Err(FormulaError::TooLong { limit: MAX_TOKENS });
    }
    tokens.push((Token::End, chars.len()));
    Ok(tokens)
}

// ── Parser ─────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos:    usize,
    depth:  usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn advance(&mut self) -> (Token, usize) {
        let current = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        current
    }

    fn unexpected(&self, expected: &'static str) -> FormulaError {
        let (token, pos) = &self.tokens[self.pos];
        FormulaError::UnexpectedToken {
            found: token.describe(),
            pos: *pos,
            expected,
        }
    }

    fn expect_end(&self) -> Result<(), FormulaError> {
        match self.peek() {
            Token::End => Ok(()),
            _ => Err(self.unexpected("an operator or end of input")),
        }
    }

    fn enter(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FormulaError::TooDeep { limit: MAX_DEPTH });
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        self.enter()?;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus  => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star    => BinaryOp::Mul,
                Token::Slash   => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if matches!(self.peek(), Token::Minus) {
            self.advance();
            self.enter()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand) });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.primary()?;
        if matches!(self.peek(), Token::StarStar) {
            self.advance();
            self.enter()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary {
                op:  BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek().clone() {
            Token::Number(value) => {
                self.advance();
                Ok(Expr::Literal(value))
            }
            Token::LParen => {
                self.advance();
                let inner = self.expr()?;
                match self.peek() {
                    Token::RParen => {
                        self.advance();
                        Ok(inner)
                    }
                    _ => Err(self.unexpected("')'")),
                }
            }
            Token::Ident(name) => {
                self.advance();
                if matches!(self.peek(), Token::LParen) {
                    self.advance();
                    self.call(&name)
                } else {
                    match name.as_str() {
                        "x" => Ok(Expr::Variable(Variable::X)),
                        "y" => Ok(Expr::Variable(Variable::Y)),
                        _ => Err(FormulaError::UnknownIdentifier { name }),
                    }
                }
            }
            _ => Err(self.unexpected("a number, variable, function call or '('")),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr, FormulaError> {
        let func = Function::lookup(name)
            .ok_or_else(|| FormulaError::UnknownFunction { name: name.to_string() })?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            loop {
                args.push(self.expr()?);
                match self.peek() {
                    Token::Comma => {
                        self.advance();
                    }
                    Token::RParen => break,
                    _ => return Err(self.unexpected("',' or ')'")),
                }
            }
        }
        self.advance();
        func.check_arity(args.len())?;
        Ok(Expr::Call { func, args })
    }
}

// ── Evaluator ──────────────────────────────────────────────────────

fn finite(value: f64, op: &'static str) -> Result<f64, FormulaError> {
    if value.is_finite() {
        Ok(value)
    } else if value.is_nan() {
        Err(FormulaError::Domain { op })
    } else {
        Err(FormulaError::Overflow { op })
    }
}

fn eval_expr(expr: &Expr, x: f64, y: f64) -> Result<f64, FormulaError> {
    match expr {
        Expr::Literal(value) => finite(*value, "literal"),
        Expr::Variable(Variable::X) => Ok(x),
        Expr::Variable(Variable::Y) => Ok(y),
        Expr::Unary { op: UnaryOp::Neg, operand } => Ok(-eval_expr(operand, x, y)?),
        Expr::Binary { op, lhs, rhs } => {
            let a = eval_expr(lhs, x, y)?;
            let b = eval_expr(rhs, x, y)?;
            eval_binary(*op, a, b)
        }
        Expr::Call { func, args } => {
            let values = args
                .iter()
                .map(|arg| eval_expr(arg, x, y))
                .collect::<Result<Vec<_>, _>>()?;
            eval_call(*func, &values)
        }
    }
}

fn eval_binary(op: BinaryOp, a: f64, b: f64) -> Result<f64, FormulaError> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            // Result takes the sign of the divisor.
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        }
        BinaryOp::Pow => return checked_pow(a, b),
    };
    finite(value, op.symbol())
}

fn checked_pow(base: f64, exponent: f64) -> Result<f64, FormulaError> {
    if base == 0.0 && exponent < 0.0 {
        return Err(FormulaError::DivisionByZero);
    }
    if base < 0.0 && exponent.fract() != 0.0 {
        return Err(FormulaError::Domain { op: "**" });
    }
    finite(base.powf(exponent), "**")
}

fn eval_call(func: Function, args: &[f64]) -> Result<f64, FormulaError> {
    match func {
        Function::Min => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        Function::Max => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        Function::Abs => Ok(args[0].abs()),
        Function::Sqrt => {
            if args[0] < 0.0 {
                return Err(FormulaError::Domain { op: "sqrt" });
            }
            Ok(args[0].sqrt())
        }
        Function::Log => {
            if args[0] <= 0.0 {
                return Err(FormulaError::Domain { op: "log" });
            }
            match args.get(1) {
                None => Ok(args[0].ln()),
                Some(&base) => {
                    if base <= 0.0 || base == 1.0 {
                        return Err(FormulaError::Domain { op: "log" });
                    }
                    finite(args[0].ln() / base.ln(), "log")
                }
            }
        }
        Function::Exp => finite(args[0].exp(), "exp"),
        Function::Pow => checked_pow(args[0], args[1]),
        Function::Floor => Ok(args[0].floor()),
        Function::Ceil => Ok(args[0].ceil()),
        Function::Round => Ok(args[0].round_ties_even()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, x: f64, y: f64) -> Result<f64, FormulaError> {
        evaluate_formula(src, x, y)
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3", 0.0, 0.0).unwrap(), 7.0);
        assert_eq!(eval("(1 + 2) * 3", 0.0, 0.0).unwrap(), 9.0);
        assert_eq!(eval("2 ** 3 ** 2", 0.0, 0.0).unwrap(), 512.0);
        assert_eq!(eval("-2 ** 2", 0.0, 0.0).unwrap(), -4.0);
        assert_eq!(eval("2 ** -1", 0.0, 0.0).unwrap(), 0.5);
        assert_eq!(eval("10 - 4 - 3", 0.0, 0.0).unwrap(), 3.0);
    }

    #[test]
    fn variables_are_bound() {
        assert_eq!(eval("x * y + 0.05", 2.0, 0.5).unwrap(), 1.05);
        assert_eq!(eval("min(x, y, 3)", 5.0, 4.0).unwrap(), 3.0);
    }

    #[test]
    fn modulo_follows_divisor_sign() {
        assert_eq!(eval("7 % 3", 0.0, 0.0).unwrap(), 1.0);
        assert_eq!(eval("-7 % 3", 0.0, 0.0).unwrap(), 2.0);
        assert_eq!(eval("7 % -3", 0.0, 0.0).unwrap(), -2.0);
    }

    #[test]
    fn scientific_literals_parse() {
        assert_eq!(eval("1e-3 * x", 1000.0, 0.0).unwrap(), 1.0);
        assert_eq!(eval(".5 + 0.25", 0.0, 0.0).unwrap(), 0.75);
    }

    #[test]
    fn runtime_faults_are_errors() {
        assert_eq!(eval("1 / y", 1.0, 0.0), Err(FormulaError::DivisionByZero));
        assert_eq!(eval("x % 0", 1.0, 0.0), Err(FormulaError::DivisionByZero));
        assert_eq!(eval("log(y)", 1.0, 0.0), Err(FormulaError::Domain { op: "log" }));
        assert_eq!(eval("sqrt(-1)", 0.0, 0.0), Err(FormulaError::Domain { op: "sqrt" }));
        assert_eq!(eval("exp(1000)", 0.0, 0.0), Err(FormulaError::Overflow { op: "exp" }));
        assert_eq!(eval("0 ** -1", 0.0, 0.0), Err(FormulaError::DivisionByZero));
    }

    #[test]
    fn arity_is_checked_at_parse_time() {
        assert!(matches!(Formula::parse("pow(2)"), Err(FormulaError::Arity { .. })));
        assert!(matches!(Formula::parse("sqrt(1, 2)"), Err(FormulaError::Arity { .. })));
        assert!(matches!(Formula::parse("min()"), Err(FormulaError::Arity { .. })));
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(Formula::parse(&deep), Err(FormulaError::TooDeep { limit: MAX_DEPTH }));

        let long = vec!["1"; 400].join(" + ");
        assert_eq!(Formula::parse(&long), Err(FormulaError::TooLong { limit: MAX_TOKENS }));
    }
}
