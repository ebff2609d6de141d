//=====================================================
// File: tokenizer/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: MibScript lexical analysis
// Objective: Convert combined stdlib + user source text into tokens with
//            line/column provenance and collect lexical diagnostics
//=====================================================

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;

use crate::diagnostics::{DiagnosticKind, Diagnostics};

//=====================================================
// Section 1.0 - Token Model
//=====================================================

/// Directive dividing the standard library from user code.
pub const SENTINEL_DIRECTIVE: &str = "stdlib_end";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    Keyword,
    Operator,
    IntLiteral,
    LongLiteral,
    FloatLiteral,
    DoubleLiteral,
    BoolLiteral,
    CharLiteral,
    StringLiteral,
    Sentinel,
    Eof,
}

impl TokenKind {
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            TokenKind::IntLiteral
                | TokenKind::LongLiteral
                | TokenKind::FloatLiteral
                | TokenKind::DoubleLiteral
                | TokenKind::BoolLiteral
                | TokenKind::CharLiteral
                | TokenKind::StringLiteral
        )
    }
}

/// A lexeme with its position. `line` is user-relative once the stdlib
/// sentinel has been passed; `absolute_line` always indexes the combined text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
    pub absolute_line: usize,
}

impl Token {
    pub fn new(
        text: impl Into<String>,
        kind: TokenKind,
        line: usize,
        column: usize,
        absolute_line: usize,
    ) -> Self {
        Self {
            text: text.into(),
            kind,
            line,
            column,
            absolute_line,
        }
    }

    /// Token not backed by source text, used for nodes the parser synthesises.
    pub fn synthetic(text: impl Into<String>, kind: TokenKind, anchor: &Token) -> Self {
        Self::new(text, kind, anchor.line, anchor.column, anchor.absolute_line)
    }

    pub fn is(&self, text: &str) -> bool {
        self.text == text && !matches!(self.kind, TokenKind::StringLiteral | TokenKind::CharLiteral)
    }

    pub fn is_identifier(&self) -> bool {
        self.kind == TokenKind::Identifier
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::StringLiteral => write!(f, "\"{}\"", self.text.escape_default()),
            TokenKind::CharLiteral => write!(f, "'{}'", self.text.escape_default()),
            TokenKind::Eof => f.write_str("end of input"),
            _ => f.write_str(&self.text),
        }
    }
}

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "module", "using", "pub", "mut", "native", "enum", "struct", "if", "else", "while",
        "for", "do", "return", "null", "bool", "char", "int", "long", "float", "double",
        "string", "void",
    ]
    .into_iter()
    .collect()
});

/// Operator spellings, longest first so that `<<=` wins over `<<` and `<`.
const OPERATORS: &[&str] = &[
    "<<=", ">>=", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=", "-=", "*=", "/=", "%=",
    "&=", "|=", "^=", "::", "<", ">", "=", "!", "+", "-", "*", "/", "%", "&", "|", "^", "?",
    ":", ";", ",", ".", "(", ")", "{", "}",
];

pub fn is_keyword(text: &str) -> bool {
    KEYWORDS.contains(text)
}

//=====================================================
// Section 2.0 - Token Stream
//=====================================================

/// Tokenizer output: tokens, the sentinel line and accumulated diagnostics.
#[derive(Debug, Clone)]
pub struct TokenStream {
    pub tokens: Vec<Token>,
    pub stdlib_finish_line: usize,
    pub diagnostics: Diagnostics,
}

impl TokenStream {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.tokens.iter().map(|token| token.text.as_str()).collect()
    }
}

//=====================================================
// Section 3.0 - Tokenizer
//=====================================================

pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    stdlib_finish_line: usize,
    tokens: Vec<Token>,
    diagnostics: Diagnostics,
}

impl Tokenizer {
    pub fn new(input: &str) -> Self {
        let mut diagnostics = Diagnostics::new(input);
        // Library diagnostics raised before the sentinel is scanned still need
        // to know where the library ends.
        if let Some(index) = input
            .lines()
            .position(|line| line.trim() == format!("#{SENTINEL_DIRECTIVE}"))
        {
            diagnostics.set_stdlib_finish_line(index + 1);
        }
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            stdlib_finish_line: 0,
            tokens: Vec::new(),
            diagnostics,
        }
    }

    //Function: tokenize
    //Purpose: Scan the whole input, collecting every lexical diagnostic
    //Inputs: self
    //Returns: TokenStream
    pub fn tokenize(mut self) -> TokenStream {
        loop {
            self.skip_trivia();
            if self.is_at_end() {
                break;
            }
            let start_line = self.line;
            let start_column = self.column;
            let ch = self.peek();

            if ch.is_ascii_alphabetic() || ch == '_' {
                self.scan_word(start_line, start_column);
            } else if ch.is_ascii_digit() {
                self.scan_number(start_line, start_column);
            } else if ch == '"' {
                self.scan_string(start_line, start_column);
            } else if ch == '\'' {
                self.scan_char(start_line, start_column);
            } else if ch == '#' {
                self.scan_directive(start_line, start_column);
            } else if let Some(op) = self.match_operator() {
                for _ in 0..op.chars().count() {
                    self.advance();
                }
                self.push(op, TokenKind::Operator, start_line, start_column);
            } else {
                self.advance();
                self.diagnostics
                    .report_at(
                        DiagnosticKind::Lexical,
                        start_line,
                        start_column,
                        format!("unrecognized character '{ch}'"),
                    )
                    .with_quick_fix("remove the character");
            }
        }

        tracing::debug!(
            tokens = self.tokens.len(),
            stdlib_finish_line = self.stdlib_finish_line,
            "tokenized source"
        );
        self.diagnostics
            .set_stdlib_finish_line(self.stdlib_finish_line);
        TokenStream {
            tokens: self.tokens,
            stdlib_finish_line: self.stdlib_finish_line,
            diagnostics: self.diagnostics,
        }
    }

    //=====================================================
    // Section 3.1 - Scanners
    //=====================================================

    fn scan_word(&mut self, line: usize, column: usize) {
        let word = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        let kind = match word.as_str() {
            "true" | "false" => TokenKind::BoolLiteral,
            other if is_keyword(other) => TokenKind::Keyword,
            _ => TokenKind::Identifier,
        };
        self.push(word, kind, line, column);
    }

    fn scan_number(&mut self, line: usize, column: usize) {
        let mut text = self.take_while(|c| c.is_ascii_digit());
        let mut decimal = false;
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            decimal = true;
            self.advance();
            text.push('.');
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }

        let mut kind = if decimal {
            TokenKind::DoubleLiteral
        } else {
            TokenKind::IntLiteral
        };
        match self.peek() {
            'L' | 'l' if !decimal => {
                self.advance();
                kind = TokenKind::LongLiteral;
            }
            'f' | 'F' => {
                self.advance();
                kind = TokenKind::FloatLiteral;
            }
            'd' | 'D' => {
                self.advance();
                kind = TokenKind::DoubleLiteral;
            }
            'b' if !decimal && (text == "0" || text == "1") => {
                self.advance();
                kind = TokenKind::BoolLiteral;
                text = if text == "1" { "true" } else { "false" }.to_string();
            }
            _ => {}
        }

        if self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
            let rest = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
            self.diagnostics
                .report_at(
                    DiagnosticKind::Lexical,
                    line,
                    column,
                    format!("invalid numeric literal '{text}{rest}'"),
                )
                .with_quick_fix("valid suffixes are L (long), f (float), d (double) and b (bool, 0 or 1)");
            return;
        }
        self.push(text, kind, line, column);
    }

    fn scan_string(&mut self, line: usize, column: usize) {
        self.advance();
        let mut value = String::new();
        loop {
            if self.is_at_end() || self.peek() == '\n' {
                self.diagnostics
                    .report_at(DiagnosticKind::Lexical, line, column, "unterminated string literal")
                    .with_quick_fix("add a closing '\"'");
                return;
            }
            let ch = self.advance();
            match ch {
                '"' => break,
                '\\' => match self.scan_escape(line, column) {
                    Some(escaped) => value.push(escaped),
                    None => return,
                },
                other => value.push(other),
            }
        }
        self.push(value, TokenKind::StringLiteral, line, column);
    }

    fn scan_char(&mut self, line: usize, column: usize) {
        self.advance();
        let mut value = String::new();
        loop {
            if self.is_at_end() || self.peek() == '\n' {
                self.diagnostics
                    .report_at(DiagnosticKind::Lexical, line, column, "unterminated character literal")
                    .with_quick_fix("add a closing '''");
                return;
            }
            let ch = self.advance();
            match ch {
                '\'' => break,
                '\\' => match self.scan_escape(line, column) {
                    Some(escaped) => value.push(escaped),
                    None => return,
                },
                other => value.push(other),
            }
        }
        if value.chars().count() != 1 {
            self.diagnostics.report_at(
                DiagnosticKind::Lexical,
                line,
                column,
                format!("character literal must hold exactly one character, found '{value}'"),
            );
            return;
        }
        self.push(value, TokenKind::CharLiteral, line, column);
    }

    fn scan_escape(&mut self, line: usize, column: usize) -> Option<char> {
        if self.is_at_end() {
            self.diagnostics
                .report_at(DiagnosticKind::Lexical, line, column, "unterminated escape sequence");
            return None;
        }
        let escaped = match self.advance() {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            other => {
                self.diagnostics.report_at(
                    DiagnosticKind::Lexical,
                    line,
                    column,
                    format!("unknown escape sequence '\\{other}'"),
                );
                return None;
            }
        };
        Some(escaped)
    }

    fn scan_directive(&mut self, line: usize, column: usize) {
        self.advance();
        let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        if name == SENTINEL_DIRECTIVE {
            self.stdlib_finish_line = line;
            self.push(format!("#{name}"), TokenKind::Sentinel, line, column);
        } else {
            self.diagnostics.report_at(
                DiagnosticKind::Lexical,
                line,
                column,
                format!("unknown directive '#{name}'"),
            );
        }
    }

    //=====================================================
    // Section 3.2 - Cursor Helpers
    //=====================================================

    fn skip_trivia(&mut self) {
        loop {
            if self.is_at_end() {
                return;
            }
            let ch = self.peek();
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '/' && self.peek_next() == '/' {
                while !self.is_at_end() && self.peek() != '\n' {
                    self.advance();
                }
            } else if ch == '/' && self.peek_next() == '*' {
                let (line, column) = (self.line, self.column);
                self.advance();
                self.advance();
                loop {
                    if self.is_at_end() {
                        self.diagnostics.report_at(
                            DiagnosticKind::Lexical,
                            line,
                            column,
                            "unterminated block comment",
                        );
                        return;
                    }
                    if self.peek() == '*' && self.peek_next() == '/' {
                        self.advance();
                        self.advance();
                        break;
                    }
                    self.advance();
                }
            } else {
                return;
            }
        }
    }

    fn match_operator(&self) -> Option<&'static str> {
        OPERATORS.iter().copied().find(|op| {
            op.chars()
                .enumerate()
                .all(|(offset, expected)| self.input.get(self.position + offset) == Some(&expected))
        })
    }

    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> String {
        let mut text = String::new();
        while !self.is_at_end() && predicate(self.peek()) {
            text.push(self.advance());
        }
        text
    }

    fn push(&mut self, text: impl Into<String>, kind: TokenKind, absolute_line: usize, column: usize) {
        let line = if self.stdlib_finish_line > 0 && absolute_line > self.stdlib_finish_line {
            absolute_line - self.stdlib_finish_line
        } else {
            absolute_line
        };
        self.tokens
            .push(Token::new(text, kind, line, column, absolute_line));
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> char {
        self.input.get(self.position).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.input.get(self.position + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let ch = self.peek();
        self.position += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }
}

/// Convenience wrapper around [`Tokenizer::tokenize`].
pub fn tokenize(source: &str) -> TokenStream {
    Tokenizer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_operator_wins() {
        let stream = tokenize("a <<= b << c < d");
        assert_eq!(stream.texts(), vec!["a", "<<=", "b", "<<", "c", "<", "d"]);
    }

    #[test]
    fn numeric_suffixes_select_literal_kind() {
        let stream = tokenize("1 2L 3.5 4.5f 5d 1b 0b");
        let kinds: Vec<TokenKind> = stream.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral,
                TokenKind::LongLiteral,
                TokenKind::DoubleLiteral,
                TokenKind::FloatLiteral,
                TokenKind::DoubleLiteral,
                TokenKind::BoolLiteral,
                TokenKind::BoolLiteral,
            ]
        );
        assert_eq!(stream.tokens[5].text, "true");
        assert_eq!(stream.tokens[6].text, "false");
    }

    #[test]
    fn escapes_are_decoded() {
        let stream = tokenize(r#""a\tb\n" '\''"#);
        assert_eq!(stream.tokens[0].text, "a\tb\n");
        assert_eq!(stream.tokens[1].text, "'");
    }

    #[test]
    fn unknown_characters_do_not_stop_scanning() {
        let stream = tokenize("int $ x = 1 @;");
        assert!(stream.has_errors());
        assert_eq!(stream.diagnostics.len(), 2);
        assert_eq!(stream.texts(), vec!["int", "x", "=", "1", ";"]);
    }

    #[test]
    fn lines_after_sentinel_are_user_relative() {
        let stream = tokenize("module std {}\n#stdlib_end\nint x;");
        assert_eq!(stream.stdlib_finish_line, 2);
        let x = stream.tokens.iter().find(|t| t.text == "x").expect("x token");
        assert_eq!(x.line, 1);
        assert_eq!(x.absolute_line, 3);
        assert_eq!(x.column, 5);
    }
}

//=====================================================
// End of file
//=====================================================
