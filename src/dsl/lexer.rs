use crate::error::RunError;

/// Token kinds. `[`/`]` lex as parentheses, so list literals accept both
/// bracket styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Name,
    Var,
    Dynamic,
    Print,
    Loop,
    While,
    Foreach,
    If,
    Else,
    Break,
    Continue,
    Func,
    Call,
    Sleep,

    // Literals & identifiers
    Number,
    Str,
    Ident,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Assign,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,

    Eof,
}

/// One lexed token: kind, raw text, and the 1-based source line it started
/// on. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
        }
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    match word {
        "name" => Some(TokenKind::Name),
        "var" => Some(TokenKind::Var),
        "dynamic" | "dyn" => Some(TokenKind::Dynamic),
        "print" => Some(TokenKind::Print),
        "loop" => Some(TokenKind::Loop),
        "while" => Some(TokenKind::While),
        "foreach" => Some(TokenKind::Foreach),
        "if" => Some(TokenKind::If),
        "else" => Some(TokenKind::Else),
        "break" => Some(TokenKind::Break),
        "continue" => Some(TokenKind::Continue),
        "func" => Some(TokenKind::Func),
        "call" => Some(TokenKind::Call),
        "sleep" => Some(TokenKind::Sleep),
        _ => None,
    }
}

/// Lazy tokenizer: one token per call, tracking the source line for
/// diagnostics. Returns the `Eof` sentinel forever after input exhaustion;
/// restartable only by constructing a fresh lexer.
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    /// The line the cursor is currently on.
    pub fn line(&self) -> usize {
        self.line
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn text(&self, start: usize) -> &'a str {
        self.source.get(start..self.pos).unwrap_or("")
    }

    pub fn next_token(&mut self) -> Result<Token, RunError> {
        self.skip_whitespace_and_comments();

        let Some(ch) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, "", self.line));
        };
        let start = self.pos;
        let line = self.line;

        match ch {
            b'"' => {
                self.pos += 1;
                self.lex_string(line)
            }
            b'0'..=b'9' => {
                while self
                    .peek()
                    .is_some_and(|b| b.is_ascii_digit() || b == b'.')
                {
                    self.pos += 1;
                }
                let text = self.text(start);
                if text.parse::<f64>().is_err() {
                    return Err(RunError::lex(line, format!("invalid number: {text}")));
                }
                Ok(Token::new(TokenKind::Number, text, line))
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while self
                    .peek()
                    .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
                {
                    self.pos += 1;
                }
                let word = self.text(start);
                let kind = keyword(word).unwrap_or(TokenKind::Ident);
                Ok(Token::new(kind, word, line))
            }
            b'=' | b'!' | b'<' | b'>' => self.lex_comparison(line),
            _ => {
                let kind = match ch {
                    b'+' => TokenKind::Plus,
                    b'-' => TokenKind::Minus,
                    b'*' => TokenKind::Star,
                    b'/' => TokenKind::Slash,
                    b'(' | b'[' => TokenKind::LParen,
                    b')' | b']' => TokenKind::RParen,
                    b'{' => TokenKind::LBrace,
                    b'}' => TokenKind::RBrace,
                    b',' => TokenKind::Comma,
                    other => {
                        return Err(RunError::lex(
                            line,
                            format!("illegal character: '{}'", other as char),
                        ));
                    }
                };
                self.pos += 1;
                Ok(Token::new(kind, self.text(start), line))
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.peek() {
            match ch {
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'#' => {
                    while self.peek().is_some_and(|b| b != b'\n') {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_string(&mut self, line: usize) -> Result<Token, RunError> {
        // No escape processing: the string runs to the next double quote.
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == b'"' {
                let text = self.text(start).to_string();
                self.pos += 1;
                return Ok(Token {
                    kind: TokenKind::Str,
                    text,
                    line,
                });
            }
            if ch == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
        Err(RunError::lex(line, "unterminated string"))
    }

    // Two-character comparisons are checked before their single-character
    // prefixes.
    fn lex_comparison(&mut self, line: usize) -> Result<Token, RunError> {
        let start = self.pos;
        let first = self.peek().unwrap_or(0);
        self.pos += 1;
        let two = self.peek() == Some(b'=');
        let kind = match (first, two) {
            (b'=', true) => TokenKind::Eq,
            (b'!', true) => TokenKind::Ne,
            (b'<', true) => TokenKind::Le,
            (b'>', true) => TokenKind::Ge,
            (b'=', false) => TokenKind::Assign,
            (b'<', false) => TokenKind::Lt,
            (b'>', false) => TokenKind::Gt,
            _ => {
                return Err(RunError::lex(
                    line,
                    format!("illegal character: '{}'", first as char),
                ));
            }
        };
        if two {
            self.pos += 1;
        }
        Ok(Token::new(kind, self.text(start), line))
    }
}
