//! Boolean rule formulas attached to dimensions: `VAR`, `(A AND B)`, `(A OR B)`, `NOT(A)`.
//!
//! Formulas are parsed once at registry load and evaluated many times. Evaluation is
//! total: a variable missing from the context is false.

use crate::error::{MeaningError, MeaningResult};
use std::collections::BTreeMap;
use std::fmt;

/// Working context: concept id -> truth value for one request.
pub type Context = BTreeMap<String, bool>;

/// Immutable AST for a dimension's logical rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalExpression {
    Variable(String),
    And(Box<LogicalExpression>, Box<LogicalExpression>),
    Or(Box<LogicalExpression>, Box<LogicalExpression>),
    Not(Box<LogicalExpression>),
}

impl LogicalExpression {
    pub fn parse(input: &str) -> MeaningResult<Self> {
        parse(input)
    }

    /// Evaluate against a context. Never fails; absent variables are false.
    pub fn evaluate(&self, context: &Context) -> bool {
        match self {
            LogicalExpression::Variable(name) => context.get(name).copied().unwrap_or(false),
            LogicalExpression::And(a, b) => a.evaluate(context) && b.evaluate(context),
            LogicalExpression::Or(a, b) => a.evaluate(context) || b.evaluate(context),
            LogicalExpression::Not(inner) => !inner.evaluate(context),
        }
    }

    /// Variables referenced by the expression, in first-occurrence order without repeats.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            LogicalExpression::Variable(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name.as_str());
                }
            }
            LogicalExpression::And(a, b) | LogicalExpression::Or(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            LogicalExpression::Not(inner) => inner.collect_variables(out),
        }
    }
}

/// Free-function form of [`LogicalExpression::evaluate`].
pub fn evaluate(expr: &LogicalExpression, context: &Context) -> bool {
    expr.evaluate(context)
}

impl fmt::Display for LogicalExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalExpression::Variable(name) => write!(f, "{}", name),
            LogicalExpression::And(a, b) => write!(f, "({} AND {})", a, b),
            LogicalExpression::Or(a, b) => write!(f, "({} OR {})", a, b),
            LogicalExpression::Not(inner) => write!(f, "NOT({})", inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier '{}'", s),
            Token::And => "AND".to_string(),
            Token::Or => "OR".to_string(),
            Token::Not => "NOT".to_string(),
            Token::Open => "'('".to_string(),
            Token::Close => "')'".to_string(),
        }
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | ':' | '-')
}

/// Tokenize into (byte offset, token) pairs.
fn tokenize(input: &str) -> MeaningResult<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == '(' {
            tokens.push((pos, Token::Open));
            chars.next();
            continue;
        }
        if ch == ')' {
            tokens.push((pos, Token::Close));
            chars.next();
            continue;
        }
        if is_ident_char(ch) {
            let mut word = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if is_ident_char(c) {
                    word.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let token = match word.to_ascii_uppercase().as_str() {
                "AND" => Token::And,
                "OR" => Token::Or,
                "NOT" => Token::Not,
                _ => Token::Ident(word),
            };
            tokens.push((pos, token));
            continue;
        }
        return Err(MeaningError::parse(pos, format!("unknown operator '{}'", ch)));
    }

    Ok(tokens)
}

/// Deepest expression tree, and deepest `(`/`NOT` nesting, a rule may have.
pub const MAX_DEPTH: usize = 256;

/// Parse a rule string into an expression.
pub fn parse(input: &str) -> MeaningResult<LogicalExpression> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(MeaningError::parse(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        nesting: 0,
    };
    let (expr, _) = parser.parse_or()?;
    if let Some((offset, token)) = parser.tokens.get(parser.pos) {
        let message = if *token == Token::Close {
            "unbalanced parentheses: unexpected ')'".to_string()
        } else {
            format!("unexpected trailing {}", token.describe())
        };
        return Err(MeaningError::parse(*offset, message));
    }
    Ok(expr)
}

/// Every parse function returns the expression with its tree depth.
struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    nesting: usize,
}

fn too_deep(offset: usize) -> MeaningError {
    MeaningError::parse(offset, format!("expression nested too deeply (limit {})", MAX_DEPTH))
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.end)
    }

    fn check_depth(depth: usize, offset: usize) -> MeaningResult<usize> {
        if depth > MAX_DEPTH {
            Err(too_deep(offset))
        } else {
            Ok(depth)
        }
    }

    fn enter(&mut self, offset: usize) -> MeaningResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_DEPTH {
            return Err(too_deep(offset));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> MeaningResult<(LogicalExpression, usize)> {
        let (mut left, mut depth) = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            let offset = self.offset();
            self.pos += 1;
            let (right, right_depth) = self.parse_and()?;
            depth = Self::check_depth(depth.max(right_depth) + 1, offset)?;
            left = LogicalExpression::Or(Box::new(left), Box::new(right));
        }
        Ok((left, depth))
    }

    fn parse_and(&mut self) -> MeaningResult<(LogicalExpression, usize)> {
        let (mut left, mut depth) = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            let offset = self.offset();
            self.pos += 1;
            let (right, right_depth) = self.parse_unary()?;
            depth = Self::check_depth(depth.max(right_depth) + 1, offset)?;
            left = LogicalExpression::And(Box::new(left), Box::new(right));
        }
        Ok((left, depth))
    }

    fn parse_unary(&mut self) -> MeaningResult<(LogicalExpression, usize)> {
        let offset = self.offset();
        match self.peek().cloned() {
            Some(Token::Not) => {
                self.enter(offset)?;
                self.pos += 1;
                let (inner, depth) = self.parse_unary()?;
                self.nesting -= 1;
                let depth = Self::check_depth(depth + 1, offset)?;
                Ok((LogicalExpression::Not(Box::new(inner)), depth))
            }
            Some(Token::Open) => {
                self.enter(offset)?;
                self.pos += 1;
                let (inner, depth) = self.parse_or()?;
                match self.peek() {
                    Some(Token::Close) => {
                        self.pos += 1;
                        self.nesting -= 1;
                        Ok((inner, depth))
                    }
                    Some(other) => Err(MeaningError::parse(
                        self.offset(),
                        format!("expected ')' but found {}", other.describe()),
                    )),
                    None => Err(MeaningError::parse(
                        self.end,
                        "unbalanced parentheses: missing ')'",
                    )),
                }
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok((LogicalExpression::Variable(name), 1))
            }
            Some(other) => Err(MeaningError::parse(
                offset,
                format!("unexpected {}", other.describe()),
            )),
            None => Err(MeaningError::parse(offset, "unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, bool)]) -> Context {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn parses_nested_grammar() {
        let expr = parse("((is_dog OR is_wolf) AND NOT(is_toy))").unwrap();
        assert_eq!(expr.to_string(), "((is_dog OR is_wolf) AND NOT(is_toy))");
        assert_eq!(expr.variables(), vec!["is_dog", "is_wolf", "is_toy"]);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let expr = parse("a and not b").unwrap();
        assert!(expr.evaluate(&ctx(&[("a", true)])));
        assert!(!expr.evaluate(&ctx(&[("a", true), ("b", true)])));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse("a OR b AND c").unwrap();
        assert_eq!(expr.to_string(), "(a OR (b AND c))");
    }

    #[test]
    fn missing_variable_is_false() {
        let expr = parse("(x OR y)").unwrap();
        assert!(!expr.evaluate(&Context::new()));
        let negated = parse("NOT(x)").unwrap();
        assert!(negated.evaluate(&Context::new()));
    }

    #[test]
    fn display_round_trips() {
        let expr = parse("NOT (a OR (b AND NOT c))").unwrap();
        assert_eq!(parse(&expr.to_string()).unwrap(), expr);
    }

    #[test]
    fn rejects_unbalanced_parentheses() {
        let err = parse("(a AND b").unwrap_err();
        assert!(matches!(err, MeaningError::Parse { offset: 8, .. }), "{err}");
        let err = parse("a AND b)").unwrap_err();
        assert!(matches!(err, MeaningError::Parse { offset: 7, .. }), "{err}");
    }

    #[test]
    fn rejects_unknown_operator() {
        let err = parse("a && b").unwrap_err();
        assert!(matches!(err, MeaningError::Parse { offset: 2, .. }), "{err}");
    }

    #[test]
    fn rejects_dangling_operator_and_empty_input() {
        assert!(parse("a AND").is_err());
        assert!(parse("OR b").is_err());
        assert!(parse("   ").is_err());
        assert!(parse("()").is_err());
        assert!(parse("a b").is_err());
    }

    #[test]
    fn deep_nesting_is_a_parse_error() {
        let parens = format!("{}a{}", "(".repeat(200_000), ")".repeat(200_000));
        let err = parse(&parens).unwrap_err();
        assert!(matches!(err, MeaningError::Parse { ref message, .. } if message.contains("too deeply")), "{err}");

        let nots = format!("{}a", "NOT ".repeat(100_000));
        assert!(matches!(parse(&nots), Err(MeaningError::Parse { .. })));

        let chain = vec!["a"; 100_000].join(" AND ");
        assert!(matches!(parse(&chain), Err(MeaningError::Parse { .. })));
    }

    #[test]
    fn nesting_up_to_the_limit_parses() {
        let parens = format!("{}a{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(parse(&parens).unwrap(), LogicalExpression::Variable("a".to_string()));

        let chain = vec!["a"; MAX_DEPTH].join(" OR ");
        assert!(parse(&chain).is_ok());
        let chain = vec!["a"; MAX_DEPTH + 1].join(" OR ");
        assert!(parse(&chain).is_err());
    }
}
