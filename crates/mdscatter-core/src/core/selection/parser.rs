use super::AtomSelectionParserError;
use super::selectors::Selector;
use crate::core::database::elements::ElementDatabase;
use crate::core::models::system::ChemicalSystem;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Comma,
    LParen,
    RParen,
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
struct Spanned {
    token: Token,
    position: usize,
}

const PUNCTUATION: &[char] = &['(', ')', ',', '&', '|', '~'];

fn tokenize(expression: &str) -> Vec<Spanned> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();
    while let Some(&(position, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '&' => Some(Token::And),
            '|' => Some(Token::Or),
            '~' => Some(Token::Not),
            _ => None,
        };
        if let Some(token) = single {
            chars.next();
            tokens.push(Spanned { token, position });
            continue;
        }
        let mut word = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if c.is_whitespace() || PUNCTUATION.contains(&c) {
                break;
            }
            word.push(c);
            chars.next();
        }
        let token = match word.to_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            _ => Token::Word(word),
        };
        tokens.push(Spanned { token, position });
    }
    tokens
}

/// Syntax tree of a selection expression, with selectors already resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Selector(Selector),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// One flag per atom of `system`.
    pub fn evaluate(&self, system: &ChemicalSystem) -> Vec<bool> {
        match self {
            Self::Selector(selector) => (0..system.total_number_of_atoms())
                .map(|index| selector.matches(system, index))
                .collect(),
            Self::Not(inner) => inner.evaluate(system).into_iter().map(|x| !x).collect(),
            Self::And(lhs, rhs) => zip_masks(lhs.evaluate(system), rhs.evaluate(system), |a, b| a && b),
            Self::Or(lhs, rhs) => zip_masks(lhs.evaluate(system), rhs.evaluate(system), |a, b| a || b),
        }
    }
}

fn zip_masks(lhs: Vec<bool>, rhs: Vec<bool>, op: impl Fn(bool, bool) -> bool) -> Vec<bool> {
    lhs.into_iter().zip(rhs).map(|(a, b)| op(a, b)).collect()
}

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    elements: &'a ElementDatabase,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.position)
            .unwrap_or(self.expression.len())
    }

    fn error(&self, reason: impl Into<String>) -> AtomSelectionParserError {
        AtomSelectionParserError::Syntax {
            expression: self.expression.to_string(),
            position: self.position(),
            reason: reason.into(),
        }
    }

    fn expr(&mut self) -> Result<Expr, AtomSelectionParserError> {
        let mut lhs = self.term()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, AtomSelectionParserError> {
        let mut lhs = self.factor()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, AtomSelectionParserError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.factor()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(Token::Word(_)) => self.selector(),
            Some(_) => Err(self.error("expected a selector, 'not' or '('")),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn selector(&mut self) -> Result<Expr, AtomSelectionParserError> {
        let Some(Token::Word(name)) = self.peek().cloned() else {
            return Err(self.error("expected a selector name"));
        };
        self.pos += 1;
        let mut arguments = Vec::new();
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            match self.peek().cloned() {
                Some(Token::Word(value)) => {
                    arguments.push(value);
                    self.pos += 1;
                }
                _ => return Err(self.error("expected a value after ','")),
            }
        }
        Selector::resolve(&name, &arguments, self.elements).map(Expr::Selector)
    }
}

/// Parses a full expression. Trailing tokens are an error.
pub fn parse(expression: &str, elements: &ElementDatabase) -> Result<Expr, AtomSelectionParserError> {
    let mut parser = Parser {
        expression,
        tokens: tokenize(expression),
        pos: 0,
        elements,
    };
    let root = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(root)
}
