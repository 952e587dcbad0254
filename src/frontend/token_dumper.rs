use crate::frontend::lexer::Spanned;
use crate::frontend::token::Token;
use std::io::{self, Write};

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints the source spelling instead
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned], out: &mut impl Write) -> io::Result<()> {
        for s in tokens {
            writeln!(out, "{}", self.render_one(s))?;
        }
        Ok(())
    }

    fn render_one(&self, s: &Spanned) -> String {
        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let shown = if self.show_debug_repr {
            format!("{:?}", s.token)
        } else {
            s.token.to_string()
        };

        format!(
            "[{:02}:{:02}] {}{:<8} {}{}",
            s.span.line, s.span.col, colr, kind, shown, reset
        )
    }

    fn kind(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Eof => "EOF",

            Integer(_) => "INT",
            Float(_) => "FLOAT",
            String(_) => "STRING",

            Ident(_) => "IDENT",

            Plus | Minus | Star | Slash | Percent | Bang | Amp | AndAnd | OrOr | Assign => "OP",
            EqEq | NotEq | Lt | LtEq | Gt | GtEq => "CMP",

            LParen | RParen | LBracket | RBracket | LBrace | RBrace | Semicolon | Comma => {
                "PUNCT"
            }

            Int | If | Else | While | Return | Print => "KEYWORD",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Eof => Self::DIM,
            String(_) => Self::GRN,
            Integer(_) | Float(_) => Self::CYN,
            Ident(_) => Self::YEL,
            t if t.is_keyword() => Self::BLU,
            LParen | RParen | LBracket | RBracket | LBrace | RBrace | Semicolon | Comma => {
                Self::DIM
            }
            _ => Self::MAG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    fn dump(dumper: TokenDumper, source: &str) -> String {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let mut out = Vec::new();
        dumper.dump(&tokens, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_plain_debug_dump() {
        let text = dump(TokenDumper::new().no_color(), "int x;");
        assert_eq!(
            text,
            "[01:01] KEYWORD  Int\n\
             [01:05] IDENT    Ident(\"x\")\n\
             [01:06] PUNCT    Semicolon\n\
             [01:07] EOF      Eof\n"
        );
    }

    #[test]
    fn test_pretty_dump_uses_spelling() {
        let text = dump(TokenDumper::new().no_color().pretty(), "a <= \"s\"");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "[01:03] CMP      <=");
        assert_eq!(lines[2], "[01:06] STRING   \"s\"");
    }

    #[test]
    fn test_color_wraps_each_line() {
        let text = dump(TokenDumper::new(), "42");
        let first = text.lines().next().unwrap();
        assert!(first.contains("\x1b[36mINT"));
        assert!(first.ends_with("\x1b[0m"));
    }
}
