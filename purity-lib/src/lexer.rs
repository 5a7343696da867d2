use std::collections::HashMap;
use std::sync::LazyLock;

use utils::DiagnosticEmitter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier(pub usize);

#[derive(Clone, Debug, Copy, Eq, PartialEq, Hash)]
pub struct Location(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenValue {
    Id(Identifier),

    // Declarations
    Class,
    Extends,
    Field,
    Final,
    Method,

    // Statements
    Read,
    Write,
    Call,
    Native,
    Alloc,

    // Separators
    LeftBrace,
    RightBrace,
    Colon,
    Semicolon,
    Dot,

    EndOfFile,
}

use TokenValue::*;

fn from_char(c: char) -> Option<TokenValue> {
    match c {
        '{' => Some(LeftBrace),
        '}' => Some(RightBrace),
        ':' => Some(Colon),
        ';' => Some(Semicolon),
        '.' => Some(Dot),
        _ => None,
    }
}

impl core::fmt::Display for TokenValue {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match *self {
            Id(i) => write!(f, "identifier_{}", i.0),

            Class => write!(f, "class"),
            Extends => write!(f, "extends"),
            Field => write!(f, "field"),
            Final => write!(f, "final"),
            Method => write!(f, "method"),

            Read => write!(f, "read"),
            Write => write!(f, "write"),
            Call => write!(f, "call"),
            Native => write!(f, "native"),
            Alloc => write!(f, "alloc"),

            LeftBrace => write!(f, "{{"),
            RightBrace => write!(f, "}}"),
            Colon => write!(f, ":"),
            Semicolon => write!(f, ";"),
            Dot => write!(f, "."),

            EndOfFile => write!(f, "END_OF_FILE"),
        }
    }
}

static KEYWORDS: LazyLock<HashMap<String, TokenValue>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    for kw in [Class, Extends, Field, Final, Method] {
        m.insert(kw.to_string(), kw);
    }
    for kw in [Read, Write, Call, Native, Alloc] {
        m.insert(kw.to_string(), kw);
    }
    m
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub value: TokenValue,

    pub line_num: Location,
}

impl Token {
    pub fn error(&self, diag: &mut DiagnosticEmitter, s: &str) {
        if self.value == EndOfFile {
            diag.report(self.line_num.0, "at end of file", s);
        } else {
            diag.report(self.line_num.0, &format!("at '{self}'"), s);
        }
    }
}

impl core::fmt::Display for Token {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentifierTable {
    names: Vec<String>,
    ids: HashMap<String, Identifier>,
}

impl IdentifierTable {
    pub fn lookup(&self, ident: &str) -> Option<Identifier> {
        self.ids.get(ident).copied()
    }

    fn get_identifier(&mut self, ident: &str) -> Identifier {
        if let Some(id) = self.lookup(ident) {
            return id;
        }
        let id = Identifier(self.names.len());
        self.names.push(ident.to_owned());
        self.ids.insert(ident.to_owned(), id);
        id
    }

    pub fn get_name(&self, id: Identifier) -> &str {
        &self.names[id.0]
    }
}

pub struct Lexer<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line_num: u32,
    has_error: bool,
    diagnostic_emitter: &'src mut DiagnosticEmitter,
    identifiers: IdentifierTable,
}

#[derive(Debug, Clone, Default)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub identifiers: IdentifierTable,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, diagnostic_emitter: &'src mut DiagnosticEmitter) -> Self {
        Lexer {
            source,
            start: 0,
            current: 0,
            line_num: 1,
            has_error: false,
            diagnostic_emitter,
            identifiers: IdentifierTable::default(),
        }
    }

    /// Returns no tokens at all (not even the end of file) on error.
    pub fn lex_all(mut self) -> LexResult {
        if !self.source.is_ascii() {
            self.diagnostic_emitter
                .error(self.line_num, "Only ASCII input is supported.");
            return LexResult::default();
        }

        let mut tokens = Vec::new();
        while !self.is_at_end() {
            if let Some(tok) = self.lex() {
                tokens.push(tok);
            } else if self.has_error {
                return LexResult::default();
            }
        }

        tokens.push(Token {
            value: EndOfFile,
            line_num: Location(self.line_num),
        });

        LexResult {
            tokens,
            identifiers: self.identifiers,
        }
    }

    fn lex(&mut self) -> Option<Token> {
        loop {
            if self.is_at_end() {
                return None;
            }

            self.start = self.current;
            match self.advance() {
                c @ ('{' | '}' | ':' | ';' | '.') => {
                    return from_char(c).map(|value| Token {
                        value,
                        line_num: Location(self.line_num),
                    });
                }

                // Whitespace
                '\n' => {
                    self.line_num += 1;
                    continue;
                }
                ' ' | '\t' | '\r' => continue,

                // Comments
                '#' => {
                    self.skip_line();
                    continue;
                }
                '/' => {
                    if self.match_char('/') {
                        self.skip_line();
                        continue;
                    }
                    return self.unexpected();
                }

                // Constructors and static initializers: <init>, <clinit>.
                '<' => {
                    if !self.peek().is_ascii_alphabetic() {
                        return self.unexpected();
                    }
                    self.lex_identifier();
                    if !self.match_char('>') {
                        self.diagnostic_emitter
                            .error(self.line_num, "Expected '>' to close the special name.");
                        self.has_error = true;
                        return None;
                    }
                    return Some(self.identifier_token());
                }
                c => {
                    if c.is_ascii_alphabetic() || c == '_' || c == '$' {
                        self.lex_identifier();
                        let text = &self.source[self.start..self.current];
                        if let Some(kw) = KEYWORDS.get(text) {
                            return Some(Token {
                                value: *kw,
                                line_num: Location(self.line_num),
                            });
                        }
                        return Some(self.identifier_token());
                    }
                    return self.unexpected();
                }
            }
        }
    }

    fn unexpected(&mut self) -> Option<Token> {
        self.diagnostic_emitter.error(
            self.line_num,
            &format!(
                "Unexpected token: '{}'.",
                &self.source[self.start..self.current]
            ),
        );
        self.has_error = true;
        None
    }

    fn identifier_token(&mut self) -> Token {
        let text = &self.source[self.start..self.current];
        Token {
            value: Id(self.identifiers.get_identifier(text)),
            line_num: Location(self.line_num),
        }
    }

    fn lex_identifier(&mut self) {
        while self.peek().is_ascii_alphanumeric() || matches!(self.peek(), '_' | '$') {
            self.advance();
        }
    }

    fn skip_line(&mut self) {
        while !self.is_at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn peek(&self) -> char {
        self.source
            .as_bytes()
            .get(self.current)
            .map_or('\0', |&b| b as char)
    }

    fn advance(&mut self) -> char {
        let prev = self.peek();
        self.current += 1;
        prev
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == expected && !self.is_at_end() {
            self.current += 1;
            true
        } else {
            false
        }
    }
}
