//! Pratt parser producing the expression AST

use serde_json::Value;

use super::lexer::{tokenize, Token};
use super::Error;

/// Tokens below this binding power end a projection
const PROJECTION_STOP: u8 = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Identity,
    Variable(String),
    Field(String),
    Index(i64),
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
    Literal(Value),
    Subexpr(Box<Ast>, Box<Ast>),
    Projection(Box<Ast>, Box<Ast>),
    ValueProjection(Box<Ast>, Box<Ast>),
    Flatten(Box<Ast>),
    Filter {
        lhs: Box<Ast>,
        rhs: Box<Ast>,
        predicate: Box<Ast>,
    },
    MultiList(Vec<Ast>),
    MultiHash(Vec<(String, Ast)>),
    Function(String, Vec<Ast>),
    Not(Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Compare(Comparator, Box<Ast>, Box<Ast>),
    Pipe(Box<Ast>, Box<Ast>),
}

/// Parse an expression string into an AST
pub fn parse(input: &str) -> Result<Ast, Error> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        index: 0,
    };
    let ast = parser.expression(0)?;
    match parser.current() {
        Token::Eof => Ok(ast),
        other => Err(parser.error(&format!("unexpected token {other:?}"))),
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    index: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        self.peek(0)
    }

    fn peek(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.index + offset)
            .map(|(_, t)| t)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.index < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), Error> {
        if *self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!(
                "expected {expected:?}, found {:?}",
                self.current()
            )))
        }
    }

    fn error(&self, message: &str) -> Error {
        let position = self
            .tokens
            .get(self.index)
            .map(|(p, _)| *p)
            .unwrap_or_default();
        Error::Syntax {
            position,
            message: message.to_string(),
        }
    }

    fn expression(&mut self, rbp: u8) -> Result<Ast, Error> {
        let token = self.advance();
        let mut left = self.nud(token)?;
        while rbp < self.current().binding_power() {
            let token = self.advance();
            left = self.led(token, left)?;
        }
        Ok(left)
    }

    fn nud(&mut self, token: Token) -> Result<Ast, Error> {
        match token {
            Token::Literal(value) => Ok(Ast::Literal(value)),
            Token::Number(n) => Ok(Ast::Literal(Value::from(n))),
            Token::Identifier(name) => Ok(Ast::Field(name)),
            Token::QuotedIdentifier(name) => {
                if *self.current() == Token::LParen {
                    return Err(self.error("quoted identifier cannot be a function name"));
                }
                Ok(Ast::Field(name))
            }
            Token::Variable(name) => Ok(Ast::Variable(name)),
            Token::At => Ok(Ast::Identity),
            Token::Star => {
                let rhs = if *self.current() == Token::RBracket {
                    Ast::Identity
                } else {
                    self.projection_rhs(Token::Star.binding_power())?
                };
                Ok(Ast::ValueProjection(Box::new(Ast::Identity), Box::new(rhs)))
            }
            Token::Filter => self.filter(Ast::Identity),
            Token::LBrace => self.multi_hash(),
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Flatten => {
                let lhs = Ast::Flatten(Box::new(Ast::Identity));
                let rhs = self.projection_rhs(Token::Flatten.binding_power())?;
                Ok(Ast::Projection(Box::new(lhs), Box::new(rhs)))
            }
            Token::Not => {
                let inner = self.expression(Token::Not.binding_power())?;
                Ok(Ast::Not(Box::new(inner)))
            }
            Token::LBracket => match self.current() {
                Token::Number(_) | Token::Colon => {
                    let index = self.index_expression()?;
                    self.project_if_slice(Ast::Identity, index)
                }
                Token::Star if *self.peek(1) == Token::RBracket => {
                    self.advance();
                    self.advance();
                    let rhs = self.projection_rhs(Token::Star.binding_power())?;
                    Ok(Ast::Projection(Box::new(Ast::Identity), Box::new(rhs)))
                }
                _ => self.multi_list(),
            },
            other => Err(self.error(&format!("unexpected token {other:?}"))),
        }
    }

    fn led(&mut self, token: Token, left: Ast) -> Result<Ast, Error> {
        match token {
            Token::Dot => {
                if *self.current() == Token::Star {
                    self.advance();
                    let rhs = self.projection_rhs(Token::Dot.binding_power())?;
                    Ok(Ast::ValueProjection(Box::new(left), Box::new(rhs)))
                } else {
                    let rhs = self.dot_rhs(Token::Dot.binding_power())?;
                    Ok(Ast::Subexpr(Box::new(left), Box::new(rhs)))
                }
            }
            Token::Pipe => {
                let rhs = self.expression(Token::Pipe.binding_power())?;
                Ok(Ast::Pipe(Box::new(left), Box::new(rhs)))
            }
            Token::Or => {
                let rhs = self.expression(Token::Or.binding_power())?;
                Ok(Ast::Or(Box::new(left), Box::new(rhs)))
            }
            Token::And => {
                let rhs = self.expression(Token::And.binding_power())?;
                Ok(Ast::And(Box::new(left), Box::new(rhs)))
            }
            Token::LParen => {
                let name = match left {
                    Ast::Field(name) => name,
                    _ => return Err(self.error("invalid function name")),
                };
                let mut args = Vec::new();
                while *self.current() != Token::RParen {
                    args.push(self.expression(0)?);
                    if *self.current() == Token::Comma {
                        self.advance();
                    } else if *self.current() != Token::RParen {
                        return Err(self.error("expected ',' or ')' in argument list"));
                    }
                }
                self.expect(Token::RParen)?;
                Ok(Ast::Function(name, args))
            }
            Token::Filter => self.filter(left),
            Token::Flatten => {
                let lhs = Ast::Flatten(Box::new(left));
                let rhs = self.projection_rhs(Token::Flatten.binding_power())?;
                Ok(Ast::Projection(Box::new(lhs), Box::new(rhs)))
            }
            Token::LBracket => match self.current() {
                Token::Number(_) | Token::Colon => {
                    let index = self.index_expression()?;
                    self.project_if_slice(left, index)
                }
                _ => {
                    self.expect(Token::Star)?;
                    self.expect(Token::RBracket)?;
                    let rhs = self.projection_rhs(Token::Star.binding_power())?;
                    Ok(Ast::Projection(Box::new(left), Box::new(rhs)))
                }
            },
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge => {
                let bp = token.binding_power();
                let rhs = self.expression(bp)?;
                let op = match token {
                    Token::Eq => Comparator::Eq,
                    Token::Ne => Comparator::Ne,
                    Token::Lt => Comparator::Lt,
                    Token::Le => Comparator::Le,
                    Token::Gt => Comparator::Gt,
                    _ => Comparator::Ge,
                };
                Ok(Ast::Compare(op, Box::new(left), Box::new(rhs)))
            }
            other => Err(self.error(&format!("unexpected token {other:?}"))),
        }
    }

    fn filter(&mut self, left: Ast) -> Result<Ast, Error> {
        let predicate = self.expression(0)?;
        self.expect(Token::RBracket)?;
        let rhs = if *self.current() == Token::Flatten {
            Ast::Identity
        } else {
            self.projection_rhs(Token::Filter.binding_power())?
        };
        Ok(Ast::Filter {
            lhs: Box::new(left),
            rhs: Box::new(rhs),
            predicate: Box::new(predicate),
        })
    }

    fn index_expression(&mut self) -> Result<Ast, Error> {
        if *self.current() == Token::Colon || *self.peek(1) == Token::Colon {
            return self.slice_expression();
        }
        match self.advance() {
            Token::Number(n) => {
                self.expect(Token::RBracket)?;
                Ok(Ast::Index(n))
            }
            other => Err(self.error(&format!("expected index, found {other:?}"))),
        }
    }

    fn slice_expression(&mut self) -> Result<Ast, Error> {
        let mut parts = [None, None, None];
        let mut slot = 0;
        while *self.current() != Token::RBracket && slot < 3 {
            match self.current().clone() {
                Token::Colon => {
                    slot += 1;
                    self.advance();
                }
                Token::Number(n) => {
                    parts[slot] = Some(n);
                    self.advance();
                }
                other => return Err(self.error(&format!("unexpected token {other:?} in slice"))),
            }
        }
        self.expect(Token::RBracket)?;
        Ok(Ast::Slice {
            start: parts[0],
            stop: parts[1],
            step: parts[2],
        })
    }

    fn project_if_slice(&mut self, left: Ast, index: Ast) -> Result<Ast, Error> {
        let is_slice = matches!(index, Ast::Slice { .. });
        let indexed = Ast::Subexpr(Box::new(left), Box::new(index));
        if is_slice {
            let rhs = self.projection_rhs(Token::Star.binding_power())?;
            Ok(Ast::Projection(Box::new(indexed), Box::new(rhs)))
        } else {
            Ok(indexed)
        }
    }

    fn projection_rhs(&mut self, bp: u8) -> Result<Ast, Error> {
        match self.current() {
            t if t.binding_power() < PROJECTION_STOP => Ok(Ast::Identity),
            Token::LBracket | Token::Filter => self.expression(bp),
            Token::Dot => {
                self.advance();
                self.dot_rhs(bp)
            }
            other => Err(self.error(&format!("unexpected token {other:?} after projection"))),
        }
    }

    fn dot_rhs(&mut self, bp: u8) -> Result<Ast, Error> {
        match self.current() {
            Token::Identifier(_) | Token::QuotedIdentifier(_) | Token::Star => self.expression(bp),
            Token::LBracket => {
                self.advance();
                self.multi_list()
            }
            Token::LBrace => {
                self.advance();
                self.multi_hash()
            }
            other => Err(self.error(&format!("unexpected token {other:?} after '.'"))),
        }
    }

    fn multi_list(&mut self) -> Result<Ast, Error> {
        let mut items = Vec::new();
        loop {
            items.push(self.expression(0)?);
            if *self.current() == Token::RBracket {
                break;
            }
            self.expect(Token::Comma)?;
        }
        self.expect(Token::RBracket)?;
        Ok(Ast::MultiList(items))
    }

    fn multi_hash(&mut self) -> Result<Ast, Error> {
        let mut pairs = Vec::new();
        loop {
            let key = match self.advance() {
                Token::Identifier(k) | Token::QuotedIdentifier(k) => k,
                other => return Err(self.error(&format!("expected key, found {other:?}"))),
            };
            self.expect(Token::Colon)?;
            let value = self.expression(0)?;
            pairs.push((key, value));
            match self.advance() {
                Token::Comma => continue,
                Token::RBrace => break,
                other => return Err(self.error(&format!("expected ',' or '}}', found {other:?}"))),
            }
        }
        Ok(Ast::MultiHash(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Box<Ast> {
        Box::new(Ast::Field(name.to_string()))
    }

    #[test]
    fn test_subexpression() {
        assert_eq!(
            parse("metadata.name").unwrap(),
            Ast::Subexpr(field("metadata"), field("name"))
        );
    }

    #[test]
    fn test_comparison_binds_looser_than_dot() {
        assert_eq!(
            parse("spec.replicas == `3`").unwrap(),
            Ast::Compare(
                Comparator::Eq,
                Box::new(Ast::Subexpr(field("spec"), field("replicas"))),
                Box::new(Ast::Literal(serde_json::json!(3)))
            )
        );
    }

    #[test]
    fn test_projection_with_field() {
        assert_eq!(
            parse("items[*].name").unwrap(),
            Ast::Projection(field("items"), field("name"))
        );
    }

    #[test]
    fn test_filter_projection() {
        let ast = parse("conditions[?type == 'Ready'].status").unwrap();
        match ast {
            Ast::Filter { lhs, rhs, .. } => {
                assert_eq!(lhs, field("conditions"));
                assert_eq!(rhs, field("status"));
            }
            other => panic!("unexpected ast {other:?}"),
        }
    }

    #[test]
    fn test_function_call_with_variable() {
        assert_eq!(
            parse("length($items)").unwrap(),
            Ast::Function(
                "length".to_string(),
                vec![Ast::Variable("items".to_string())]
            )
        );
    }

    #[test]
    fn test_multi_select_hash() {
        assert_eq!(
            parse("{a: x, b: y}").unwrap(),
            Ast::MultiHash(vec![
                ("a".to_string(), Ast::Field("x".to_string())),
                ("b".to_string(), Ast::Field("y".to_string())),
            ])
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("a.").is_err());
        assert!(parse("foo(").is_err());
        assert!(parse("a b").is_err());
    }
}
