//! Arithmetic over monitor values for `op` monitors.
//!
//! Grammar, loosest binding first: `+ -`, `* /`, unary `-`, right
//! associative `^`, then numbers, variables, `name(expr)` calls and
//! parenthesized expressions.

use std::iter::Peekable;
use std::str::Chars;

use anyhow::{Result, bail};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Negate(Box<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
    Call(String, Box<Expr>),
}

impl Expr {
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            chars: input.chars().peekable(),
        };
        let expr = parser.sum()?;
        parser.skip_whitespace();
        if let Some(c) = parser.chars.peek() {
            bail!("unexpected '{c}' in '{input}'");
        }
        Ok(expr)
    }

    /// Names of the variables referenced, in order of appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Number(_) => {}
            Self::Variable(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
            Self::Negate(inner) | Self::Call(_, inner) => inner.collect_variables(names),
            Self::Binary(_, left, right) => {
                left.collect_variables(names);
                right.collect_variables(names);
            }
        }
    }

    /// `None` for an unknown variable or function. Non-finite results are
    /// returned as computed.
    pub fn eval(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Option<f64> {
        Some(match self {
            Self::Number(n) => *n,
            Self::Variable(name) => lookup(name)?,
            Self::Negate(inner) => -inner.eval(lookup)?,
            Self::Binary(op, left, right) => {
                let (l, r) = (left.eval(lookup)?, right.eval(lookup)?);
                match op {
                    '+' => l + r,
                    '-' => l - r,
                    '*' => l * r,
                    '/' => l / r,
                    '^' => l.powf(r),
                    _ => return None,
                }
            }
            Self::Call(function, arg) => {
                let arg = arg.eval(lookup)?;
                match function.as_str() {
                    "log" => arg.ln(),
                    "sqrt" => arg.sqrt(),
                    "exp" => arg.exp(),
                    "abs" => arg.abs(),
                    _ => return None,
                }
            }
        })
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl Parser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn next_operator(&mut self, operators: &[char]) -> Option<char> {
        self.skip_whitespace();
        self.chars.next_if(|c| operators.contains(c))
    }

    fn sum(&mut self) -> Result<Expr> {
        let mut expr = self.product()?;
        while let Some(op) = self.next_operator(&['+', '-']) {
            expr = Expr::Binary(op, Box::new(expr), Box::new(self.product()?));
        }
        Ok(expr)
    }

    fn product(&mut self) -> Result<Expr> {
        let mut expr = self.unary()?;
        while let Some(op) = self.next_operator(&['*', '/']) {
            expr = Expr::Binary(op, Box::new(expr), Box::new(self.unary()?));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.next_operator(&['-']).is_some() {
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if self.next_operator(&['^']).is_some() {
            return Ok(Expr::Binary('^', Box::new(base), Box::new(self.unary()?)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        self.skip_whitespace();
        match self.chars.peek().copied() {
            Some('(') => {
                self.chars.next();
                let inner = self.sum()?;
                self.close_paren()?;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let text = self.take_while(|c| c.is_ascii_digit() || c == '.');
                Ok(Expr::Number(text.parse()?))
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                self.skip_whitespace();
                if self.chars.next_if_eq(&'(').is_some() {
                    let arg = self.sum()?;
                    self.close_paren()?;
                    return Ok(Expr::Call(name, Box::new(arg)));
                }
                Ok(Expr::Variable(name))
            }
            Some(c) => bail!("unexpected '{c}'"),
            None => bail!("expression ends early"),
        }
    }

    fn close_paren(&mut self) -> Result<()> {
        self.skip_whitespace();
        if self.chars.next_if_eq(&')').is_none() {
            bail!("missing ')'");
        }
        Ok(())
    }

    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut text = String::new();
        while let Some(c) = self.chars.next_if(|c| accept(*c)) {
            text.push(c);
        }
        text
    }
}
