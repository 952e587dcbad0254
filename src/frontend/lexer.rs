use crate::frontend::token::Token;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{line}:{col}: {message}")]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn error_at(&self, span: Span, message: impl Into<String>) -> LexerError {
        LexerError {
            message: message.into(),
            line: span.line,
            col: span.col,
        }
    }

    /// Skips whitespace, `//` line comments and `/* */` block comments.
    fn skip_trivia(&mut self) -> Result<(), LexerError> {
        loop {
            match (self.current(), self.peek()) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.current() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.span();
                    self.advance();
                    self.advance();
                    loop {
                        match (self.current(), self.peek()) {
                            (Some('*'), Some('/')) => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            (Some(_), _) => {
                                self.advance();
                            }
                            (None, _) => {
                                return Err(self.error_at(start, "unterminated block comment"));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let start = self.span();
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(Token::String(string));
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => string.push('\n'),
                        Some('t') => string.push('\t'),
                        Some('\\') => string.push('\\'),
                        Some('"') => string.push('"'),
                        Some(ch) => {
                            return Err(self.error_at(
                                self.span(),
                                format!("unknown escape sequence: \\{}", ch),
                            ));
                        }
                        None => {
                            return Err(
                                self.error_at(self.span(), "unexpected EOF in escape sequence")
                            );
                        }
                    }
                    self.advance();
                }
                Some('\n') => {
                    return Err(self.error_at(
                        start,
                        "unterminated string (newline before closing quote)",
                    ));
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => return Err(self.error_at(start, "unterminated string literal")),
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let start = self.span();
        let mut digits = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                has_dot = true;
                digits.push('.');
                self.advance();
            } else {
                break;
            }
        }

        if has_dot {
            digits
                .parse()
                .map(Token::Float)
                .map_err(|_| self.error_at(start, format!("invalid float: {}", digits)))
        } else {
            digits
                .parse()
                .map(Token::Integer)
                .map_err(|_| self.error_at(start, format!("integer out of range: {}", digits)))
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match ident.as_str() {
            "int" => Token::Int,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "return" => Token::Return,
            "print" => Token::Print,
            _ => Token::Ident(ident),
        }
    }

    fn read_operator(&mut self) -> Result<Token, LexerError> {
        let start = self.span();
        let ch = self.advance().unwrap_or('\0');
        let next = self.current();

        let pair = match (ch, next) {
            ('=', Some('=')) => Some(Token::EqEq),
            ('!', Some('=')) => Some(Token::NotEq),
            ('<', Some('=')) => Some(Token::LtEq),
            ('>', Some('=')) => Some(Token::GtEq),
            ('&', Some('&')) => Some(Token::AndAnd),
            ('|', Some('|')) => Some(Token::OrOr),
            _ => None,
        };
        if let Some(token) = pair {
            self.advance();
            return Ok(token);
        }

        let token = match ch {
            '=' => Token::Assign,
            '!' => Token::Bang,
            '<' => Token::Lt,
            '>' => Token::Gt,
            '&' => Token::Amp,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ';' => Token::Semicolon,
            ',' => Token::Comma,
            '|' => return Err(self.error_at(start, "expected '||', found single '|'")),
            ch => return Err(self.error_at(start, format!("unexpected character: '{}'", ch))),
        };

        Ok(token)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia()?;
            let span = self.span();

            let token = match self.current() {
                None => {
                    tokens.push(Spanned {
                        token: Token::Eof,
                        span,
                    });
                    break;
                }
                Some('"') => self.read_string()?,
                Some(ch) if ch.is_ascii_digit() => self.read_number()?,
                Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => self.read_identifier(),
                Some(_) => self.read_operator()?,
            };
            tokens.push(Spanned { token, span });
        }

        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        lexer
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .filter(|t| !matches!(t, Token::Eof))
            .collect()
    }

    #[test]
    fn test_declaration() {
        assert_eq!(
            tokens("int* p = &x;"),
            vec![
                Token::Int,
                Token::Star,
                Token::Ident("p".into()),
                Token::Assign,
                Token::Amp,
                Token::Ident("x".into()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            tokens("== != <= >= && || < > = !"),
            vec![
                Token::EqEq,
                Token::NotEq,
                Token::LtEq,
                Token::GtEq,
                Token::AndAnd,
                Token::OrOr,
                Token::Lt,
                Token::Gt,
                Token::Assign,
                Token::Bang,
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let t = tokens("int if else while return print isPrime _tmp1");
        assert!(t[..6].iter().all(Token::is_keyword));
        assert_eq!(t[6], Token::Ident("isPrime".into()));
        assert_eq!(t[7], Token::Ident("_tmp1".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("42 3.25 -7"),
            vec![
                Token::Integer(42),
                Token::Float(3.25),
                Token::Minus,
                Token::Integer(7)
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(r#""a\tb\n\"q\"\\""#),
            vec![Token::String("a\tb\n\"q\"\\".into())]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "x // line comment\n/* block\n comment */ y";
        assert_eq!(
            tokens(source),
            vec![Token::Ident("x".into()), Token::Ident("y".into())]
        );
    }

    #[test]
    fn test_spans() {
        let mut lexer = Lexer::new("int x;\n  print(x);");
        let spanned = lexer.tokenize().unwrap();
        assert_eq!(spanned[0].span, Span { line: 1, col: 1 });
        assert_eq!(spanned[3].token, Token::Print);
        assert_eq!(spanned[3].span, Span { line: 2, col: 3 });
    }

    #[test]
    fn test_single_pipe_is_an_error() {
        let err = Lexer::new("a | b").tokenize().unwrap_err();
        assert_eq!(err.to_string(), "1:3: expected '||', found single '|'");
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("\"open").tokenize().unwrap_err();
        assert_eq!(err.message, "unterminated string literal");
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = Lexer::new("x /* never closed").tokenize().unwrap_err();
        assert_eq!((err.line, err.col), (1, 3));
    }

    #[test]
    fn test_integer_overflow() {
        assert!(Lexer::new("99999999999999999999").tokenize().is_err());
    }
}
