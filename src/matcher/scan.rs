//! Tokenizer for the approval expression language. Punctuation and
//! whitespace delimit tokens; any other run of characters is a name.
//! `and`, `or` and `not` are reserved words.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Token {
    Name(String),
    LBracket,
    RBracket,
    Equal,
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
    LBrace,
    RBrace,
}

impl Token {
    pub(super) fn describe(&self) -> String {
        match self {
            Token::Name(name) => format!("'{name}'"),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::Equal => "'='".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Comma => "','".into(),
            Token::And => "'and'".into(),
            Token::Or => "'or'".into(),
            Token::Not => "'not'".into(),
            Token::LBrace => "'{'".into(),
            Token::RBrace => "'}'".into(),
        }
    }
}

fn word_token(word: &str) -> Token {
    match word {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        _ => Token::Name(word.to_string()),
    }
}

pub(super) fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let flush = |word: &mut String, tokens: &mut Vec<Token>| {
        if !word.is_empty() {
            tokens.push(word_token(word));
            word.clear();
        }
    };
    for ch in input.chars() {
        let punct = match ch {
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '=' => Some(Token::Equal),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            _ => None,
        };
        if let Some(token) = punct {
            flush(&mut word, &mut tokens);
            tokens.push(token);
        } else if ch.is_whitespace() {
            flush(&mut word, &mut tokens);
        } else {
            word.push(ch);
        }
    }
    flush(&mut word, &mut tokens);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_needs_no_whitespace() {
        let tokens = tokenize("all[count=2,self=false]");
        assert_eq!(
            tokens,
            vec![
                Token::Name("all".into()),
                Token::LBracket,
                Token::Name("count".into()),
                Token::Equal,
                Token::Name("2".into()),
                Token::Comma,
                Token::Name("self".into()),
                Token::Equal,
                Token::Name("false".into()),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn reserved_words_become_operators() {
        let tokens = tokenize("a and not b or c");
        assert_eq!(
            tokens,
            vec![
                Token::Name("a".into()),
                Token::And,
                Token::Not,
                Token::Name("b".into()),
                Token::Or,
                Token::Name("c".into()),
            ]
        );
    }

    #[test]
    fn names_may_contain_dashes_and_dots() {
        let tokens = tokenize("issue-author some.user_1");
        assert_eq!(
            tokens,
            vec![
                Token::Name("issue-author".into()),
                Token::Name("some.user_1".into()),
            ]
        );
    }
}
