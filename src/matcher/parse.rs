//! Recursive descent parser for the approval expression language.
//! Precedence, loosest first: `or`, `and`, `not`, then primaries.

use anyhow::bail;

use pullgate_data::Login;

use super::scan::{tokenize, Token};
use super::{Matcher, Quorum};

pub(super) fn parse(input: &str) -> anyhow::Result<Matcher> {
    let tokens = tokenize(input);
    if tokens.is_empty() {
        bail!("empty approval expression");
    }
    let mut parser = Parser { tokens, pos: 0 };
    let matcher = parser.expr()?;
    if let Some(token) = parser.peek() {
        bail!("unexpected {} after expression", token.describe());
    }
    Ok(matcher)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> anyhow::Result<Token> {
        match self.tokens.get(self.pos) {
            Some(token) => {
                self.pos += 1;
                Ok(token.clone())
            }
            None => bail!("unexpected end of expression"),
        }
    }

    fn expect(&mut self, want: Token) -> anyhow::Result<()> {
        let token = self.next()?;
        if token != want {
            bail!("expected {}, found {}", want.describe(), token.describe());
        }
        Ok(())
    }

    fn eat(&mut self, want: &Token) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> anyhow::Result<Matcher> {
        let mut operands = vec![self.and_expr()?];
        while self.eat(&Token::Or) {
            operands.push(self.and_expr()?);
        }
        Ok(fold(operands, Matcher::Or))
    }

    fn and_expr(&mut self) -> anyhow::Result<Matcher> {
        let mut operands = vec![self.unary()?];
        while self.eat(&Token::And) {
            operands.push(self.unary()?);
        }
        Ok(fold(operands, Matcher::And))
    }

    fn unary(&mut self) -> anyhow::Result<Matcher> {
        if self.eat(&Token::Not) {
            Ok(Matcher::Not(Box::new(self.unary()?)))
        } else {
            self.primary()
        }
    }

    fn primary(&mut self) -> anyhow::Result<Matcher> {
        match self.next()? {
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBrace => self.anonymous(),
            Token::Name(name) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.function(&name)
                } else {
                    self.noun(&name)
                }
            }
            token => bail!("expected a name, found {}", token.describe()),
        }
    }

    fn anonymous(&mut self) -> anyhow::Result<Matcher> {
        let mut members: Vec<Login> = Vec::new();
        loop {
            match self.next()? {
                Token::Name(name) => members.push(Login::from(name.as_str())),
                token => bail!("expected a member name, found {}", token.describe()),
            }
            match self.next()? {
                Token::Comma => continue,
                Token::RBrace => break,
                token => bail!("expected ',' or '}}', found {}", token.describe()),
            }
        }
        members.sort();
        members.dedup();
        let quorum = self.attributes()?.unwrap_or_default();
        Ok(Matcher::Anonymous { members, quorum })
    }

    fn function(&mut self, name: &str) -> anyhow::Result<Matcher> {
        match name {
            "atleast" => {
                let count = match self.next()? {
                    Token::Name(first) => match first.parse::<u32>() {
                        Ok(count) => count,
                        Err(_) => {
                            bail!("atleast() first argument expected number, observed '{first}'")
                        }
                    },
                    token => {
                        bail!(
                            "atleast() first argument expected number, observed {}",
                            token.describe()
                        )
                    }
                };
                let mut choose = Vec::new();
                while self.eat(&Token::Comma) {
                    choose.push(self.expr()?);
                }
                self.expect(Token::RParen)?;
                if choose.is_empty() {
                    bail!("atleast() must have at least one argument");
                }
                Ok(Matcher::AtLeast { count, choose })
            }
            "author" => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(Matcher::Author(Box::new(inner)))
            }
            _ => bail!("unknown function '{name}'"),
        }
    }

    fn noun(&mut self, name: &str) -> anyhow::Result<Matcher> {
        let attrs = self.attributes()?;
        match name {
            "off" | "true" | "false" => {
                if attrs.is_some() {
                    bail!("attributes are not allowed for {name}");
                }
                Ok(match name {
                    "off" => Matcher::Disable,
                    "true" => Matcher::True,
                    _ => Matcher::False,
                })
            }
            // attributes are accepted and ignored for compatibility
            "issue-author" => Ok(Matcher::IssueAuthor),
            "all" => Ok(Matcher::Maintainers(attrs.unwrap_or_default())),
            "universe" => Ok(Matcher::Universe(attrs.unwrap_or_default())),
            "us" => Ok(Matcher::Us(attrs.unwrap_or_default())),
            "them" => Ok(Matcher::Them(attrs.unwrap_or_default())),
            _ => Ok(Matcher::Entity {
                name: Login::from(name),
                quorum: attrs.unwrap_or_default(),
            }),
        }
    }

    /// Parses an optional `[count=N,self=B]` clause.
    fn attributes(&mut self) -> anyhow::Result<Option<Quorum>> {
        if !self.eat(&Token::LBracket) {
            return Ok(None);
        }
        let mut count: Option<u32> = None;
        let mut self_approval: Option<bool> = None;
        loop {
            let key = match self.next()? {
                Token::Name(key) => key,
                token => bail!("expected an attribute name, found {}", token.describe()),
            };
            self.expect(Token::Equal)?;
            let value = match self.next()? {
                Token::Name(value) => value,
                token => bail!("expected an attribute value, found {}", token.describe()),
            };
            match key.as_str() {
                "count" => {
                    if count.is_some() {
                        bail!("duplicate count attribute");
                    }
                    count = Some(value.parse().map_err(|_| {
                        anyhow::anyhow!("expected number, found '{value}' for count attribute")
                    })?);
                }
                "self" => {
                    if self_approval.is_some() {
                        bail!("duplicate self attribute");
                    }
                    self_approval = Some(match value.as_str() {
                        "true" => true,
                        "false" => false,
                        _ => bail!("expected true or false, found '{value}' for self attribute"),
                    });
                }
                _ => bail!("unexpected attribute '{key}'"),
            }
            match self.next()? {
                Token::Comma => continue,
                Token::RBracket => break,
                token => bail!("expected ',' or ']', found {}", token.describe()),
            }
        }
        let defaults = Quorum::default();
        Ok(Some(Quorum {
            count: count.unwrap_or(defaults.count),
            self_approval: self_approval.unwrap_or(defaults.self_approval),
        }))
    }
}

fn fold(mut operands: Vec<Matcher>, combine: fn(Vec<Matcher>) -> Matcher) -> Matcher {
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        combine(operands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_binds_loosest() {
        let matcher = parse("a or b and not c").unwrap();
        match matcher {
            Matcher::Or(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], Matcher::And(_)));
            }
            other => panic!("expected or at the root, got {other}"),
        }
    }

    #[test]
    fn parentheses_override_precedence() {
        let matcher = parse("(a or b) and c").unwrap();
        assert!(matches!(matcher, Matcher::And(_)));
    }

    #[test]
    fn chains_flatten_into_one_node() {
        let matcher = parse("a and b and c").unwrap();
        match matcher {
            Matcher::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected and, got {other}"),
        }
    }

    #[test]
    fn entity_names_are_case_folded() {
        let matcher = parse("OctoCat[count=2]").unwrap();
        assert_eq!(
            matcher,
            Matcher::Entity {
                name: Login::from("octocat"),
                quorum: Quorum {
                    count: 2,
                    self_approval: true
                },
            }
        );
    }

    #[test]
    fn atleast_requires_a_leading_number() {
        let err = parse("atleast(all,universe)").unwrap_err();
        assert!(err.to_string().contains("expected number"));
        assert!(parse("atleast(2)").is_err());
    }

    #[test]
    fn unknown_functions_are_rejected() {
        let err = parse("exactly(2,all)").unwrap_err();
        assert!(err.to_string().contains("unknown function 'exactly'"));
    }

    #[test]
    fn duplicate_attributes_are_rejected() {
        assert!(parse("all[count=1,count=2]").is_err());
        assert!(parse("all[self=true,self=true]").is_err());
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(parse("all all").is_err());
        assert!(parse("all)").is_err());
    }
}
