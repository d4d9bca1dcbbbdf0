//! Hand-written lexer for the classification query DSL. Produces a flat
//! token stream with byte offsets so parse errors can point at the exact
//! offending token (see `Error::InvalidArgument`'s `position` field).

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Word(String),
    QuotedString(String),
    Colon,
    LParen,
    RParen,
    Or,
    Minus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

pub fn lex(input: &str) -> Result<Vec<Token>, (String, usize)> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, position: i });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, position: i });
                i += 1;
            }
            ':' => {
                tokens.push(Token { kind: TokenKind::Colon, position: i });
                i += 1;
            }
            '-' => {
                tokens.push(Token { kind: TokenKind::Minus, position: i });
                i += 1;
            }
            '"' => {
                let start = i;
                i += 1;
                let mut value = String::new();
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == '"' {
                        closed = true;
                        i += 1;
                        break;
                    }
                    value.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(("unterminated quoted string".to_string(), start));
                }
                tokens.push(Token { kind: TokenKind::QuotedString(value), position: start });
            }
            _ => {
                let start = i;
                let mut word = String::new();
                while i < chars.len() && !matches!(chars[i], ' ' | '\t' | '\n' | '\r' | '(' | ')' | ':' | '"') {
                    word.push(chars[i]);
                    i += 1;
                }
                if word == "OR" {
                    tokens.push(Token { kind: TokenKind::Or, position: start });
                } else {
                    tokens.push(Token { kind: TokenKind::Word(word), position: start });
                }
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_simple_term() {
        let tokens = lex("title:standup").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token { kind: TokenKind::Word("title".into()), position: 0 },
                Token { kind: TokenKind::Colon, position: 5 },
                Token { kind: TokenKind::Word("standup".into()), position: 6 },
            ]
        );
    }

    #[test]
    fn lexes_quoted_value_with_spaces() {
        let tokens = lex(r#"title:"weekly standup""#).unwrap();
        assert_eq!(tokens[2].kind, TokenKind::QuotedString("weekly standup".into()));
    }

    #[test]
    fn lexes_or_and_parens_and_negation() {
        let tokens = lex("(domain:acme.com OR -title:standup)").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::LParen);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Or));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Minus));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::RParen);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let err = lex(r#"title:"standup"#).unwrap_err();
        assert_eq!(err.1, 6);
    }
}
