use logos::Logos;

use crate::ast::Span;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum Token {
    // Keywords, matched case-insensitively through `keyword`
    #[token("set")]
    Set,
    #[token("to")]
    To,
    #[token("unset")]
    Unset,
    #[token("print")]
    Print,
    #[token("wait")]
    Wait,
    #[token("lock")]
    Lock,
    #[token("unlock")]
    Unlock,
    #[token("preserve")]
    Preserve,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("until")]
    Until,
    #[token("when")]
    When,
    #[token("then")]
    Then,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("^")]
    Caret,
    #[token("=")]
    Eq,
    #[token("<>")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,

    // Literals
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    Text(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_lowercase())]
    Ident(String),
}

impl Token {
    /// Keyword spelled by a lower-cased identifier, if any.
    pub fn keyword(word: &str) -> Option<Token> {
        let token = match word {
            "set" => Token::Set,
            "to" => Token::To,
            "unset" => Token::Unset,
            "print" => Token::Print,
            "wait" => Token::Wait,
            "lock" => Token::Lock,
            "unlock" => Token::Unlock,
            "preserve" => Token::Preserve,
            "if" => Token::If,
            "else" => Token::Else,
            "until" => Token::Until,
            "when" => Token::When,
            "then" => Token::Then,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "true" => Token::True,
            "false" => Token::False,
            _ => return None,
        };
        Some(token)
    }
}

fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Lex source code into a stream of tokens with positions.
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span { start: range.start, end: range.end };
        match result {
            Ok(Token::Ident(word)) => {
                let token = Token::keyword(&word).unwrap_or(Token::Ident(word));
                tokens.push((token, span));
            }
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(LexError {
                    position: range.start,
                    snippet: source[range.clone()].to_string(),
                    suggestion: suggest_fix(&source[range]),
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad_token: &str) -> String {
    if bad_token.starts_with('"') {
        "Close the string with a matching '\"' on the same line".to_string()
    } else if bad_token == "!" || bad_token == "!=" {
        "Use '<>' for inequality and 'not' for negation".to_string()
    } else if bad_token == ";" {
        "Statements end with '.'".to_string()
    } else {
        format!("Unexpected character(s): '{}'", bad_token)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Lex error at position {position}: '{snippet}'. {suggestion}")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lex_set_statement() {
        assert_eq!(
            kinds("set alt to 100.5."),
            vec![
                Token::Set,
                Token::Ident("alt".into()),
                Token::To,
                Token::Number(100.5),
                Token::Dot,
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers_ignore_case() {
        assert_eq!(
            kinds("SET Alt TO 1."),
            vec![Token::Set, Token::Ident("alt".into()), Token::To, Token::Number(1.0), Token::Dot]
        );
        assert_eq!(kinds("When")[0], Token::When);
    }

    #[test]
    fn integer_before_terminator_is_not_a_decimal() {
        assert_eq!(kinds("1."), vec![Token::Number(1.0), Token::Dot]);
        assert_eq!(kinds("2e3"), vec![Token::Number(2000.0)]);
    }

    #[test]
    fn lex_string_escapes() {
        assert_eq!(kinds(r#""say \"hi\" \\ ok""#), vec![Token::Text(r#"say "hi" \ ok"#.into())]);
    }

    #[test]
    fn comparison_operators_take_longest_match() {
        assert_eq!(
            kinds("a <= b <> c >= d"),
            vec![
                Token::Ident("a".into()),
                Token::LtEq,
                Token::Ident("b".into()),
                Token::NotEq,
                Token::Ident("c".into()),
                Token::GtEq,
                Token::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn lex_comment_ignored() {
        assert_eq!(kinds("// comment\nprint 1."), vec![Token::Print, Token::Number(1.0), Token::Dot]);
        assert_eq!(kinds("print 1. // trailing"), vec![Token::Print, Token::Number(1.0), Token::Dot]);
    }

    #[test]
    fn spans_cover_tokens() {
        let tokens = lex("set x to 1.").unwrap();
        assert_eq!(tokens[1].1, Span { start: 4, end: 5 });
    }

    #[test]
    fn bad_character_is_reported() {
        let err = lex("set x to 1;").unwrap_err();
        assert_eq!(err.position, 10);
        assert_eq!(err.snippet, ";");
        assert!(err.suggestion.contains("'.'"));
    }
}
