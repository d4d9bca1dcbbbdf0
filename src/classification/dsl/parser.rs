//! Recursive-descent parser over the token stream, one function per grammar
//! production, following the explicit hand-written-state-machine style the
//! rest of the codebase favors over parser combinators.
//!
//! Grammar (informal):
//!   query      := or_expr
//!   or_expr    := and_expr (OR and_expr)*
//!   and_expr   := unary+
//!   unary      := '-'? primary
//!   primary    := '(' or_expr ')' | term
//!   term       := property ':' value | word

use super::ast::{CompareOp, Property, Query, Term, TermValue};
use super::lexer::{lex, Token, TokenKind};
use crate::error::{Error, Result};

pub fn parse(input: &str) -> Result<Query> {
    let tokens = lex(input).map_err(|(msg, pos)| Error::invalid_argument_at(msg, pos))?;
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        let at = parser.peek().map(|t| t.position).unwrap_or(input.len());
        return Err(Error::invalid_argument_at("unexpected trailing input", at));
    }
    Ok(query)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> Result<Query> {
        let mut clauses = vec![self.parse_and()?];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Or)) {
            self.advance();
            clauses.push(self.parse_and()?);
        }
        Ok(if clauses.len() == 1 { clauses.remove(0) } else { Query::Or(clauses) })
    }

    fn parse_and(&mut self) -> Result<Query> {
        let mut terms = vec![self.parse_unary()?];
        while self.starts_unary() {
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 { terms.remove(0) } else { Query::And(terms) })
    }

    fn starts_unary(&self) -> bool {
        matches!(
            self.peek().map(|t| &t.kind),
            Some(TokenKind::Word(_)) | Some(TokenKind::QuotedString(_)) | Some(TokenKind::LParen) | Some(TokenKind::Minus)
        )
    }

    fn parse_unary(&mut self) -> Result<Query> {
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Minus)) {
            self.advance();
            let inner = self.parse_primary()?;
            return Ok(Query::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Query> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::LParen) => {
                self.advance();
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token { kind: TokenKind::RParen, .. }) => Ok(inner),
                    Some(t) => Err(Error::invalid_argument_at("expected closing parenthesis", t.position)),
                    None => Err(Error::invalid_argument("expected closing parenthesis, found end of input")),
                }
            }
            Some(_) => self.parse_term(),
            None => Err(Error::invalid_argument("expected a term")),
        }
    }

    fn parse_term(&mut self) -> Result<Query> {
        let first = self.advance().ok_or_else(|| Error::invalid_argument("expected a term"))?;

        let word = match &first.kind {
            TokenKind::Word(w) => w.clone(),
            TokenKind::QuotedString(s) => {
                // A bare quoted string (no property:) is shorthand for text:"...".
                return Ok(Query::Term(Term { property: Property::Text, op: CompareOp::Eq, value: TermValue::Text(s.clone()) }));
            }
            _ => return Err(Error::invalid_argument_at("expected a word or quoted string", first.position)),
        };

        if !matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Colon)) {
            // Bare word shorthand for text:word
            return Ok(Query::Term(Term { property: Property::Text, op: CompareOp::Eq, value: TermValue::Text(word) }));
        }

        self.advance(); // consume ':'
        let property = Property::from_str(&word)
            .ok_or_else(|| Error::invalid_argument_at(format!("unknown property '{word}'"), first.position))?;

        let value_token = self.advance().ok_or_else(|| {
            Error::invalid_argument_at(format!("expected a value after '{word}:'"), first.position)
        })?;

        build_term(property, value_token, first.position)
    }
}

fn build_term(property: Property, value_token: Token, start: usize) -> Result<Query> {
    if property == Property::TimeOfDay {
        let raw = match &value_token.kind {
            TokenKind::Word(w) => w.clone(),
            _ => return Err(Error::invalid_argument_at("time-of-day requires an unquoted value", value_token.position)),
        };
        let (op, rest) = parse_compare_op(&raw);
        let (hour, minute) = parse_hh_mm(rest)
            .ok_or_else(|| Error::invalid_argument_at(format!("invalid time value '{raw}'"), value_token.position))?;
        return Ok(Query::Term(Term { property, op, value: TermValue::Time { hour, minute } }));
    }

    let raw = match &value_token.kind {
        TokenKind::Word(w) => w.clone(),
        TokenKind::QuotedString(s) => s.clone(),
        _ => return Err(Error::invalid_argument_at("expected a value", value_token.position)),
    };

    if matches!(property, Property::Recurring | Property::IsAllDay | Property::HasAttendees) {
        let b = match raw.as_str() {
            "yes" | "true" => true,
            "no" | "false" => false,
            _ => return Err(Error::invalid_argument_at(format!("expected yes/no, got '{raw}'"), start)),
        };
        return Ok(Query::Term(Term { property, op: CompareOp::Eq, value: TermValue::Bool(b) }));
    }

    if property == Property::Response && !["accepted", "declined", "tentative", "needsAction"].contains(&raw.as_str()) {
        return Err(Error::invalid_argument_at(format!("unknown response value '{raw}'"), start));
    }

    if property == Property::DayOfWeek && !["mon", "tue", "wed", "thu", "fri", "sat", "sun"].contains(&raw.as_str()) {
        return Err(Error::invalid_argument_at(format!("unknown day-of-week value '{raw}'"), start));
    }

    if property == Property::Transparency && !["opaque", "transparent"].contains(&raw.as_str()) {
        return Err(Error::invalid_argument_at(format!("unknown transparency value '{raw}'"), start));
    }

    Ok(Query::Term(Term { property, op: CompareOp::Eq, value: TermValue::Text(raw) }))
}

fn parse_compare_op(raw: &str) -> (CompareOp, &str) {
    for (prefix, op) in [(">=", CompareOp::Gte), ("<=", CompareOp::Lte), (">", CompareOp::Gt), ("<", CompareOp::Lt), ("=", CompareOp::Eq)] {
        if let Some(rest) = raw.strip_prefix(prefix) {
            return (op, rest);
        }
    }
    (CompareOp::Eq, raw)
}

fn parse_hh_mm(raw: &str) -> Option<(u32, u32)> {
    let (h, m) = raw.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_word_as_text_shorthand() {
        let q = parse("standup").unwrap();
        assert_eq!(q, Query::Term(Term { property: Property::Text, op: CompareOp::Eq, value: TermValue::Text("standup".into()) }));
    }

    #[test]
    fn parses_implicit_and() {
        let q = parse("domain:acme.com title:standup").unwrap();
        match q {
            Query::And(terms) => assert_eq!(terms.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn parses_or_with_parens_and_negation() {
        let q = parse("(domain:acme.com OR -title:standup)").unwrap();
        match q {
            Query::Or(clauses) => {
                assert_eq!(clauses.len(), 2);
                assert!(matches!(clauses[1], Query::Not(_)));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn parses_quoted_value() {
        let q = parse(r#"title:"weekly standup""#).unwrap();
        assert_eq!(
            q,
            Query::Term(Term { property: Property::Title, op: CompareOp::Eq, value: TermValue::Text("weekly standup".into()) })
        );
    }

    #[test]
    fn parses_time_of_day_comparison() {
        let q = parse("time-of-day:>=09:00").unwrap();
        assert_eq!(
            q,
            Query::Term(Term { property: Property::TimeOfDay, op: CompareOp::Gte, value: TermValue::Time { hour: 9, minute: 0 } })
        );
    }

    #[test]
    fn unknown_property_is_a_parse_error_with_position() {
        let err = parse("bogus:value").unwrap_err();
        match err {
            Error::InvalidArgument { position: Some(0), .. } => {}
            other => panic!("expected InvalidArgument at 0, got {other:?}"),
        }
    }

    #[test]
    fn unknown_response_value_is_a_parse_error() {
        assert!(parse("response:maybe").is_err());
    }

    #[test]
    fn malformed_time_value_is_a_parse_error() {
        assert!(parse("time-of-day:>25:99").is_err());
    }
}
