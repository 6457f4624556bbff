//! Tokenizer for path-query expressions

use serde_json::Value;

use super::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    QuotedIdentifier(String),
    Variable(String),
    Number(i64),
    Literal(Value),
    Dot,
    Star,
    Flatten,
    Filter,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Colon,
    Pipe,
    Or,
    And,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    At,
    Eof,
}

impl Token {
    /// Left binding power used by the Pratt parser
    pub fn binding_power(&self) -> u8 {
        match self {
            Token::Pipe => 1,
            Token::Or => 2,
            Token::And => 3,
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge => 5,
            Token::Flatten => 9,
            Token::Star => 20,
            Token::Filter => 21,
            Token::Dot => 40,
            Token::Not => 45,
            Token::LBrace => 50,
            Token::LBracket => 55,
            Token::LParen => 60,
            _ => 0,
        }
    }
}

/// Split an expression into positioned tokens, terminated by `Eof`
pub fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, Error> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let start = pos;
        let token = match c {
            ' ' | '\t' | '\n' | '\r' => {
                pos += 1;
                continue;
            }
            '.' => single(&mut pos, Token::Dot),
            '*' => single(&mut pos, Token::Star),
            ']' => single(&mut pos, Token::RBracket),
            '{' => single(&mut pos, Token::LBrace),
            '}' => single(&mut pos, Token::RBrace),
            '(' => single(&mut pos, Token::LParen),
            ')' => single(&mut pos, Token::RParen),
            ',' => single(&mut pos, Token::Comma),
            ':' => single(&mut pos, Token::Colon),
            '@' => single(&mut pos, Token::At),
            '[' => match chars.get(pos + 1) {
                Some(']') => double(&mut pos, Token::Flatten),
                Some('?') => double(&mut pos, Token::Filter),
                _ => single(&mut pos, Token::LBracket),
            },
            '|' => match chars.get(pos + 1) {
                Some('|') => double(&mut pos, Token::Or),
                _ => single(&mut pos, Token::Pipe),
            },
            '&' => match chars.get(pos + 1) {
                Some('&') => double(&mut pos, Token::And),
                _ => return Err(syntax(start, "expected '&&'")),
            },
            '!' => match chars.get(pos + 1) {
                Some('=') => double(&mut pos, Token::Ne),
                _ => single(&mut pos, Token::Not),
            },
            '=' => match chars.get(pos + 1) {
                Some('=') => double(&mut pos, Token::Eq),
                _ => return Err(syntax(start, "expected '=='")),
            },
            '<' => match chars.get(pos + 1) {
                Some('=') => double(&mut pos, Token::Le),
                _ => single(&mut pos, Token::Lt),
            },
            '>' => match chars.get(pos + 1) {
                Some('=') => double(&mut pos, Token::Ge),
                _ => single(&mut pos, Token::Gt),
            },
            '\'' => {
                let raw = delimited(&chars, &mut pos, '\'')?;
                Token::Literal(Value::String(raw))
            }
            '`' => {
                let raw = delimited(&chars, &mut pos, '`')?;
                let literal = serde_json::from_str(raw.trim())
                    .unwrap_or_else(|_| Value::String(raw.trim().to_string()));
                Token::Literal(literal)
            }
            '"' => {
                let raw = delimited(&chars, &mut pos, '"')?;
                let decoded: String = serde_json::from_str(&format!("\"{raw}\""))
                    .map_err(|_| syntax(start, "invalid quoted identifier"))?;
                Token::QuotedIdentifier(decoded)
            }
            '$' => {
                pos += 1;
                let name = take_while(&chars, &mut pos, is_ident_char);
                if name.is_empty() {
                    return Err(syntax(start, "expected variable name after '$'"));
                }
                Token::Variable(name)
            }
            c if c.is_ascii_digit() || (c == '-' && next_is_digit(&chars, pos)) => {
                pos += 1;
                let mut text = c.to_string();
                text.push_str(&take_while(&chars, &mut pos, |c| c.is_ascii_digit()));
                if chars.get(pos) == Some(&'.') && next_is_digit(&chars, pos) {
                    pos += 1;
                    text.push('.');
                    text.push_str(&take_while(&chars, &mut pos, |c| c.is_ascii_digit()));
                    let value: f64 = text
                        .parse()
                        .map_err(|_| syntax(start, "invalid number"))?;
                    Token::Literal(serde_json::json!(value))
                } else {
                    Token::Number(text.parse().map_err(|_| syntax(start, "invalid number"))?)
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                Token::Identifier(take_while(&chars, &mut pos, is_ident_char))
            }
            other => return Err(syntax(start, &format!("unexpected character '{other}'"))),
        };
        tokens.push((start, token));
    }

    tokens.push((chars.len(), Token::Eof));
    Ok(tokens)
}

fn single(pos: &mut usize, token: Token) -> Token {
    *pos += 1;
    token
}

fn double(pos: &mut usize, token: Token) -> Token {
    *pos += 2;
    token
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn next_is_digit(chars: &[char], pos: usize) -> bool {
    chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit())
}

fn take_while(chars: &[char], pos: &mut usize, pred: impl Fn(char) -> bool) -> String {
    let start = *pos;
    while *pos < chars.len() && pred(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

/// Read text up to the closing delimiter; `\<delim>` escapes the delimiter
fn delimited(chars: &[char], pos: &mut usize, delim: char) -> Result<String, Error> {
    let start = *pos;
    *pos += 1;
    let mut out = String::new();
    while *pos < chars.len() {
        let c = chars[*pos];
        if c == '\\' && chars.get(*pos + 1) == Some(&delim) {
            if delim == '"' {
                out.push('\\');
            }
            out.push(delim);
            *pos += 2;
            continue;
        }
        if c == '\\' && delim == '"' {
            out.push(c);
            if let Some(next) = chars.get(*pos + 1) {
                out.push(*next);
            }
            *pos += 2;
            continue;
        }
        if c == delim {
            *pos += 1;
            return Ok(out);
        }
        out.push(c);
        *pos += 1;
    }
    Err(syntax(start, &format!("unterminated {delim}")))
}

fn syntax(position: usize, message: &str) -> Error {
    Error::Syntax {
        position,
        message: message.to_string(),
    }
}
