//! A small hand-written recursive-descent evaluator for `conditional`'s
//! `condition` expressions. Deliberately not a general expression language:
//! no attribute access, no imports, no calls outside the whitelisted
//! function set (`and`, `or`, `not`, `file_exists`, `all_files_exist`,
//! `file_is_newer`), plus comparison and arithmetic over the results.

use std::fmt;

use weave_core::{RecipeError, RecipeResult};

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(items) => write!(f, "[{}]", items.len()),
        }
    }
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    End,
}

fn tokenize(input: &str) -> RecipeResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(RecipeError::Condition(format!(
                        "unterminated string literal in condition: {input}"
                    )));
                }
                tokens.push(Token::Str(chars[start..i].iter().collect()));
                i += 1;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| RecipeError::Condition(format!("invalid number '{text}' in condition")))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(RecipeError::Condition(format!(
                    "unexpected character '{other}' in condition: {input}"
                )))
            }
        }
    }
    tokens.push(Token::End);
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> RecipeResult<()> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(RecipeError::Condition(format!(
                "expected {expected:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn parse_expr(&mut self) -> RecipeResult<Value> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> RecipeResult<Value> {
        let left = self.parse_arith()?;
        let op = match self.peek() {
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge => {
                self.advance()
            }
            _ => return Ok(left),
        };
        let right = self.parse_arith()?;
        compare(&left, &op, &right)
    }

    fn parse_arith(&mut self) -> RecipeResult<Value> {
        let mut acc = self.parse_term()?;
        loop {
            match self.peek() {
                Token::Plus => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    acc = arith(&acc, '+', &rhs)?;
                }
                Token::Minus => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    acc = arith(&acc, '-', &rhs)?;
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    fn parse_term(&mut self) -> RecipeResult<Value> {
        let mut acc = self.parse_factor()?;
        loop {
            match self.peek() {
                Token::Star => {
                    self.advance();
                    let rhs = self.parse_factor()?;
                    acc = arith(&acc, '*', &rhs)?;
                }
                Token::Slash => {
                    self.advance();
                    let rhs = self.parse_factor()?;
                    acc = arith(&acc, '/', &rhs)?;
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    fn parse_factor(&mut self) -> RecipeResult<Value> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Value::Number(n))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Value::String(s))
            }
            Token::Minus => {
                self.advance();
                let v = self.parse_factor()?;
                match v {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    other => Err(RecipeError::Condition(format!(
                        "unary '-' requires a number, got {other}"
                    ))),
                }
            }
            Token::LParen => {
                self.advance();
                let v = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(v)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if self.peek() != &Token::RBracket {
                    items.push(self.parse_expr()?);
                    while self.peek() == &Token::Comma {
                        self.advance();
                        items.push(self.parse_expr()?);
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Value::List(items))
            }
            Token::Ident(name) => {
                self.advance();
                match name.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => self.parse_call(&name),
                }
            }
            other => Err(RecipeError::Condition(format!(
                "unexpected token {other:?} in condition"
            ))),
        }
    }

    fn parse_call(&mut self, name: &str) -> RecipeResult<Value> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != &Token::RParen {
            args.push(self.parse_expr()?);
            while self.peek() == &Token::Comma {
                self.advance();
                args.push(self.parse_expr()?);
            }
        }
        self.expect(&Token::RParen)?;
        call(name, args)
    }
}

fn call(name: &str, args: Vec<Value>) -> RecipeResult<Value> {
    match name {
        "and" => Ok(Value::Bool(args.iter().all(Value::truthy))),
        "or" => Ok(Value::Bool(args.iter().any(Value::truthy))),
        "not" => {
            let arg = args
                .into_iter()
                .next()
                .ok_or_else(|| RecipeError::Condition("not() requires one argument".into()))?;
            Ok(Value::Bool(!arg.truthy()))
        }
        "file_exists" => {
            let path = single_string_arg("file_exists", &args)?;
            Ok(Value::Bool(std::path::Path::new(&path).exists()))
        }
        "all_files_exist" => {
            let list = args
                .into_iter()
                .next()
                .ok_or_else(|| RecipeError::Condition("all_files_exist() requires one argument".into()))?;
            let Value::List(items) = list else {
                return Err(RecipeError::Condition(
                    "all_files_exist() requires a list argument".into(),
                ));
            };
            let all_exist = items.iter().all(|v| match v {
                Value::String(p) => std::path::Path::new(p).exists(),
                _ => false,
            });
            Ok(Value::Bool(all_exist))
        }
        "file_is_newer" => {
            if args.len() != 2 {
                return Err(RecipeError::Condition(
                    "file_is_newer() requires two arguments".into(),
                ));
            }
            let a = as_string(&args[0])?;
            let b = as_string(&args[1])?;
            let mtime = |p: &str| std::fs::metadata(p).and_then(|m| m.modified()).ok();
            let newer = match (mtime(&a), mtime(&b)) {
                (Some(ma), Some(mb)) => ma > mb,
                _ => false,
            };
            Ok(Value::Bool(newer))
        }
        other => Err(RecipeError::Condition(format!(
            "unknown function '{other}' in condition"
        ))),
    }
}

fn single_string_arg(fn_name: &str, args: &[Value]) -> RecipeResult<String> {
    match args.first() {
        Some(v) => as_string(v),
        None => Err(RecipeError::Condition(format!(
            "{fn_name}() requires one argument"
        ))),
    }
}

fn as_string(v: &Value) -> RecipeResult<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        other => Err(RecipeError::Condition(format!(
            "expected a string path, got {other}"
        ))),
    }
}

fn compare(left: &Value, op: &Token, right: &Value) -> RecipeResult<Value> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };

    let result = match op {
        Token::Eq => left == right,
        Token::Ne => left != right,
        Token::Lt => matches!(ordering, Some(std::cmp::Ordering::Less)),
        Token::Le => matches!(ordering, Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
        Token::Gt => matches!(ordering, Some(std::cmp::Ordering::Greater)),
        Token::Ge => matches!(
            ordering,
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ),
        other => {
            return Err(RecipeError::Condition(format!(
                "unexpected comparison operator {other:?}"
            )))
        }
    };
    Ok(Value::Bool(result))
}

fn arith(left: &Value, op: char, right: &Value) -> RecipeResult<Value> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let result = match op {
                '+' => a + b,
                '-' => a - b,
                '*' => a * b,
                '/' => {
                    if *b == 0.0 {
                        return Err(RecipeError::Condition("division by zero in condition".into()));
                    }
                    a / b
                }
                other => return Err(RecipeError::Condition(format!("unknown operator '{other}'"))),
            };
            Ok(Value::Number(result))
        }
        (Value::String(a), Value::String(b)) if op == '+' => Ok(Value::String(format!("{a}{b}"))),
        _ => Err(RecipeError::Condition(format!(
            "cannot apply '{op}' to {left} and {right}"
        ))),
    }
}

/// Evaluates an already-rendered condition string. The empty string and the
/// literal `"true"`/`"false"` (case-insensitive, optional surrounding
/// whitespace) short-circuit before the parser runs; an empty string is
/// falsy, matching a template that rendered no content.
pub fn evaluate_condition(rendered: &str) -> RecipeResult<bool> {
    let trimmed = rendered.trim();
    if trimmed.is_empty() {
        return Ok(false);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => return Ok(true),
        "false" => return Ok(false),
        _ => {}
    }

    let tokens = tokenize(trimmed)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let value = parser.parse_expr()?;
    if parser.peek() != &Token::End {
        return Err(RecipeError::Condition(format!(
            "trailing input after condition: {rendered}"
        )));
    }
    Ok(value.truthy())
}
