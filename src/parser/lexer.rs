//! Lexer
//!
//! Converts source text into classified tokens on demand. Tokens are
//! spans into the source (offset + length) plus the parsed value for
//! number literals; nothing is allocated in the arena here. Exactly one
//! token of lookahead is retained: [`Lexer::peek`] is idempotent until
//! [`Lexer::advance`] consumes the token.

/// Token classification.
///
/// The keyword table is closed: it covers the control-flow keywords this
/// interpreter executes plus the remaining ES reserved words, which lex as
/// keywords and are rejected by the grammar. Anything else is `Ident`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals
    Number,
    Str,
    Ident,

    // Operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    PlusPlus,
    MinusMinus,

    Eq,       // =
    EqEq,     // ==
    EqEqEq,   // ===
    Bang,     // !
    BangEq,   // !=
    BangEqEq, // !==

    Lt,   // <
    LtEq, // <=
    Gt,   // >
    GtEq, // >=

    LtLt,   // <<
    GtGt,   // >>
    GtGtGt, // >>>

    Amp,      // &
    AmpAmp,   // &&
    Pipe,     // |
    PipePipe, // ||
    Caret,    // ^
    Tilde,    // ~

    Question,
    Colon,
    Semicolon,
    Comma,
    Dot,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // Compound assignment
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    StarStarEq,
    LtLtEq,
    GtGtEq,
    GtGtGtEq,
    AmpEq,
    PipeEq,
    CaretEq,

    // Keywords
    Break,
    Case,
    Catch,
    Class,
    Const,
    Continue,
    Debugger,
    Default,
    Delete,
    Do,
    Else,
    False,
    Finally,
    For,
    Function,
    If,
    In,
    InstanceOf,
    Let,
    New,
    Null,
    Of,
    Return,
    Switch,
    This,
    Throw,
    True,
    Try,
    TypeOf,
    Undefined,
    Var,
    Void,
    While,

    // Special
    Eof,
    Error,
}

/// One classified token: kind plus its source span. For `Str` the span
/// covers the content between the quotes; for everything else it covers
/// the whole lexeme. `num` is meaningful only for `Number`.
#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub off: u32,
    pub len: u32,
    pub num: f64,
}

impl Token {
    fn new(kind: TokenKind, off: usize, len: usize) -> Token {
        Token {
            kind,
            off: off as u32,
            len: len as u32,
            num: 0.0,
        }
    }

    /// Source offset just past this token.
    #[inline]
    pub fn end(&self) -> u32 {
        self.off + self.len
    }
}

/// Lexer over one source text with one-token lookahead.
pub struct Lexer {
    code: Vec<u8>,
    pos: usize,
    lookahead: Option<Token>,
    last_end: u32,
}

impl Lexer {
    pub fn new(source: &[u8]) -> Lexer {
        Lexer {
            code: source.to_vec(),
            pos: 0,
            lookahead: None,
            last_end: 0,
        }
    }

    /// Reuse this lexer for a fresh source text.
    pub fn reset(&mut self, source: &[u8]) {
        self.code.clear();
        self.code.extend_from_slice(source);
        self.pos = 0;
        self.lookahead = None;
        self.last_end = 0;
    }

    /// The source this lexer reads from.
    #[inline]
    pub fn source(&self) -> &[u8] {
        &self.code
    }

    /// The lexeme bytes of a token produced by this lexer.
    #[inline]
    pub fn token_bytes(&self, t: Token) -> &[u8] {
        &self.code[t.off as usize..t.end() as usize]
    }

    /// Jump to an absolute source position, discarding lookahead. Used to
    /// re-enter a captured code range (function call arguments).
    pub fn set_pos(&mut self, pos: u32) {
        self.pos = pos as usize;
        self.lookahead = None;
        self.last_end = pos;
    }

    /// Force the stream to end-of-input. Called when an error value is
    /// raised so no further tokens are consumed.
    pub fn skip_to_end(&mut self) {
        self.pos = self.code.len();
        self.lookahead = None;
    }

    #[inline]
    pub fn at_end(&mut self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    /// Look at the next token without consuming it. Idempotent.
    pub fn peek(&mut self) -> Token {
        if let Some(t) = self.lookahead {
            return t;
        }
        let t = self.scan();
        self.lookahead = Some(t);
        t
    }

    /// Consume and return the next token.
    pub fn advance(&mut self) -> Token {
        let t = self.peek();
        self.lookahead = None;
        self.last_end = t.end();
        t
    }

    /// Source offset just past the most recently consumed token. Used to
    /// delimit a function literal's text after its body has been scanned.
    #[inline]
    pub fn last_end(&self) -> u32 {
        self.last_end
    }

    fn byte(&self, at: usize) -> Option<u8> {
        self.code.get(at).copied()
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.byte(self.pos) {
                Some(b' ' | b'\t' | b'\r' | b'\n') => self.pos += 1,
                Some(b'/') if self.byte(self.pos + 1) == Some(b'/') => {
                    while let Some(c) = self.byte(self.pos) {
                        self.pos += 1;
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                Some(b'/') if self.byte(self.pos + 1) == Some(b'*') => {
                    self.pos += 2;
                    while let Some(c) = self.byte(self.pos) {
                        self.pos += 1;
                        if c == b'*' && self.byte(self.pos) == Some(b'/') {
                            self.pos += 1;
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn scan(&mut self) -> Token {
        self.skip_whitespace();

        let start = self.pos;
        let Some(c) = self.byte(start) else {
            return Token::new(TokenKind::Eof, start, 0);
        };

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            return self.scan_identifier();
        }
        if c.is_ascii_digit() {
            return self.scan_number();
        }
        if c == b'"' || c == b'\'' {
            return self.scan_string();
        }

        use TokenKind::*;
        self.pos += 1;
        let kind = match c {
            b'+' => match self.byte(self.pos) {
                Some(b'+') => self.eat(PlusPlus),
                Some(b'=') => self.eat(PlusEq),
                _ => Plus,
            },
            b'-' => match self.byte(self.pos) {
                Some(b'-') => self.eat(MinusMinus),
                Some(b'=') => self.eat(MinusEq),
                _ => Minus,
            },
            b'*' => match self.byte(self.pos) {
                Some(b'*') => {
                    self.pos += 1;
                    if self.byte(self.pos) == Some(b'=') {
                        self.eat(StarStarEq)
                    } else {
                        StarStar
                    }
                }
                Some(b'=') => self.eat(StarEq),
                _ => Star,
            },
            b'/' => match self.byte(self.pos) {
                Some(b'=') => self.eat(SlashEq),
                _ => Slash,
            },
            b'%' => match self.byte(self.pos) {
                Some(b'=') => self.eat(PercentEq),
                _ => Percent,
            },
            b'=' => match self.byte(self.pos) {
                Some(b'=') => {
                    self.pos += 1;
                    if self.byte(self.pos) == Some(b'=') {
                        self.eat(EqEqEq)
                    } else {
                        EqEq
                    }
                }
                _ => Eq,
            },
            b'!' => match self.byte(self.pos) {
                Some(b'=') => {
                    self.pos += 1;
                    if self.byte(self.pos) == Some(b'=') {
                        self.eat(BangEqEq)
                    } else {
                        BangEq
                    }
                }
                _ => Bang,
            },
            b'<' => match self.byte(self.pos) {
                Some(b'<') => {
                    self.pos += 1;
                    if self.byte(self.pos) == Some(b'=') {
                        self.eat(LtLtEq)
                    } else {
                        LtLt
                    }
                }
                Some(b'=') => self.eat(LtEq),
                _ => Lt,
            },
            b'>' => match self.byte(self.pos) {
                Some(b'>') => {
                    self.pos += 1;
                    match self.byte(self.pos) {
                        Some(b'>') => {
                            self.pos += 1;
                            if self.byte(self.pos) == Some(b'=') {
                                self.eat(GtGtGtEq)
                            } else {
                                GtGtGt
                            }
                        }
                        Some(b'=') => self.eat(GtGtEq),
                        _ => GtGt,
                    }
                }
                Some(b'=') => self.eat(GtEq),
                _ => Gt,
            },
            b'&' => match self.byte(self.pos) {
                Some(b'&') => self.eat(AmpAmp),
                Some(b'=') => self.eat(AmpEq),
                _ => Amp,
            },
            b'|' => match self.byte(self.pos) {
                Some(b'|') => self.eat(PipePipe),
                Some(b'=') => self.eat(PipeEq),
                _ => Pipe,
            },
            b'^' => match self.byte(self.pos) {
                Some(b'=') => self.eat(CaretEq),
                _ => Caret,
            },
            b'~' => Tilde,
            b'?' => Question,
            b':' => Colon,
            b';' => Semicolon,
            b',' => Comma,
            b'.' => Dot,
            b'(' => LParen,
            b')' => RParen,
            b'[' => LBracket,
            b']' => RBracket,
            b'{' => LBrace,
            b'}' => RBrace,
            _ => Error,
        };
        Token::new(kind, start, self.pos - start)
    }

    #[inline]
    fn eat(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn scan_identifier(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.byte(self.pos) {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'$' {
                self.pos += 1;
            } else {
                break;
            }
        }

        use TokenKind::*;
        let kind = match &self.code[start..self.pos] {
            b"break" => Break,
            b"case" => Case,
            b"catch" => Catch,
            b"class" => Class,
            b"const" => Const,
            b"continue" => Continue,
            b"debugger" => Debugger,
            b"default" => Default,
            b"delete" => Delete,
            b"do" => Do,
            b"else" => Else,
            b"false" => False,
            b"finally" => Finally,
            b"for" => For,
            b"function" => Function,
            b"if" => If,
            b"in" => In,
            b"instanceof" => InstanceOf,
            b"let" => Let,
            b"new" => New,
            b"null" => Null,
            b"of" => Of,
            b"return" => Return,
            b"switch" => Switch,
            b"this" => This,
            b"throw" => Throw,
            b"true" => True,
            b"try" => Try,
            b"typeof" => TypeOf,
            b"undefined" => Undefined,
            b"var" => Var,
            b"void" => Void,
            b"while" => While,
            _ => Ident,
        };
        Token::new(kind, start, self.pos - start)
    }

    /// Numbers consume the maximal valid prefix: `12.5xyz` lexes as `12.5`
    /// followed by the identifier `xyz`; `12.x` lexes `12` then `.`.
    fn scan_number(&mut self) -> Token {
        let start = self.pos;

        while self.byte(self.pos).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.byte(self.pos) == Some(b'.')
            && self.byte(self.pos + 1).is_some_and(|c| c.is_ascii_digit())
        {
            self.pos += 1;
            while self.byte(self.pos).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.byte(self.pos), Some(b'e' | b'E')) {
            // Only a well-formed exponent belongs to the number.
            let mut after = self.pos + 1;
            if matches!(self.byte(after), Some(b'+' | b'-')) {
                after += 1;
            }
            if self.byte(after).is_some_and(|c| c.is_ascii_digit()) {
                self.pos = after;
                while self.byte(self.pos).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text = std::str::from_utf8(&self.code[start..self.pos]).unwrap_or("");
        match text.parse::<f64>() {
            Ok(n) => {
                let mut t = Token::new(TokenKind::Number, start, self.pos - start);
                t.num = n;
                t
            }
            Err(_) => Token::new(TokenKind::Error, start, self.pos - start),
        }
    }

    /// String literals. The token span covers the raw content between the
    /// quotes; escapes are validated here and decoded by [`unescape`] when
    /// the string is materialized.
    fn scan_string(&mut self) -> Token {
        let quote = self.code[self.pos];
        self.pos += 1;
        let content = self.pos;
        loop {
            match self.byte(self.pos) {
                None => return Token::new(TokenKind::Error, content, self.pos - content),
                Some(c) if c == quote => {
                    let t = Token::new(TokenKind::Str, content, self.pos - content);
                    self.pos += 1;
                    return t;
                }
                Some(b'\\') => match self.byte(self.pos + 1) {
                    Some(b'n' | b'r' | b't' | b'0' | b'\\' | b'\'' | b'"') => self.pos += 2,
                    Some(b'x')
                        if self.byte(self.pos + 2).is_some_and(|c| c.is_ascii_hexdigit())
                            && self.byte(self.pos + 3).is_some_and(|c| c.is_ascii_hexdigit()) =>
                    {
                        self.pos += 4;
                    }
                    _ => return Token::new(TokenKind::Error, self.pos, 2),
                },
                Some(_) => self.pos += 1,
            }
        }
    }
}

/// Decode the escapes in a validated string-literal span.
pub fn unescape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 1 < raw.len() {
            match raw[i + 1] {
                b'n' => out.push(b'\n'),
                b'r' => out.push(b'\r'),
                b't' => out.push(b'\t'),
                b'0' => out.push(0),
                b'x' => {
                    let hi = (raw[i + 2] as char).to_digit(16).unwrap_or(0) as u8;
                    let lo = (raw[i + 3] as char).to_digit(16).unwrap_or(0) as u8;
                    out.push((hi << 4) | lo);
                    i += 4;
                    continue;
                }
                c => out.push(c),
            }
            i += 2;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lx = Lexer::new(src.as_bytes());
        let mut out = Vec::new();
        loop {
            let t = lx.advance();
            if t.kind == TokenKind::Eof {
                break;
            }
            out.push(t.kind);
        }
        out
    }

    #[test]
    fn test_numbers() {
        let mut lx = Lexer::new(b"42 3.14 1e10 2E-3");
        assert_eq!(lx.advance().num, 42.0);
        assert!((lx.advance().num - 3.14).abs() < 1e-12);
        assert_eq!(lx.advance().num, 1e10);
        assert_eq!(lx.advance().num, 2e-3);
    }

    #[test]
    fn test_number_maximal_prefix() {
        let mut lx = Lexer::new(b"12.5xyz");
        let n = lx.advance();
        assert_eq!(n.kind, TokenKind::Number);
        assert_eq!(n.num, 12.5);
        assert_eq!(n.len, 4);
        let id = lx.advance();
        assert_eq!(id.kind, TokenKind::Ident);
        assert_eq!(lx.token_bytes(id), b"xyz");
    }

    #[test]
    fn test_number_dot_without_digit_stops() {
        // `12.x` is Number(12) Dot Ident, not a malformed float.
        assert_eq!(
            kinds("12.x"),
            vec![TokenKind::Number, TokenKind::Dot, TokenKind::Ident]
        );
        // A bare `e` is not an exponent.
        assert_eq!(kinds("1e"), vec![TokenKind::Number, TokenKind::Ident]);
    }

    #[test]
    fn test_strings_and_escapes() {
        let mut lx = Lexer::new(br#""he\tllo" 'a\x41b'"#);
        let s1 = lx.advance();
        assert_eq!(s1.kind, TokenKind::Str);
        assert_eq!(unescape(lx.token_bytes(s1)), b"he\tllo");
        let s2 = lx.advance();
        assert_eq!(unescape(lx.token_bytes(s2)), b"aAb");
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let mut lx = Lexer::new(b"\"oops");
        assert_eq!(lx.advance().kind, TokenKind::Error);
    }

    #[test]
    fn test_greedy_operator_match() {
        assert_eq!(
            kinds("< <= << <<= >>> >>>="),
            vec![
                TokenKind::Lt,
                TokenKind::LtEq,
                TokenKind::LtLt,
                TokenKind::LtLtEq,
                TokenKind::GtGtGt,
                TokenKind::GtGtGtEq,
            ]
        );
        assert_eq!(
            kinds("+ ++ += === !== ** **="),
            vec![
                TokenKind::Plus,
                TokenKind::PlusPlus,
                TokenKind::PlusEq,
                TokenKind::EqEqEq,
                TokenKind::BangEqEq,
                TokenKind::StarStar,
                TokenKind::StarStarEq,
            ]
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("let foo typeof instanceof $bar"),
            vec![
                TokenKind::Let,
                TokenKind::Ident,
                TokenKind::TypeOf,
                TokenKind::InstanceOf,
                TokenKind::Ident,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("1 // line\n2 /* block\nstill */ 3"),
            vec![TokenKind::Number, TokenKind::Number, TokenKind::Number]
        );
    }

    #[test]
    fn test_peek_is_idempotent() {
        let mut lx = Lexer::new(b"a + b");
        let p1 = lx.peek();
        let p2 = lx.peek();
        assert_eq!(p1.kind, p2.kind);
        assert_eq!(p1.off, p2.off);
        let consumed = lx.advance();
        assert_eq!(consumed.off, p1.off);
        assert_eq!(lx.peek().kind, TokenKind::Plus);
    }

    #[test]
    fn test_skip_to_end() {
        let mut lx = Lexer::new(b"1 + 2");
        lx.advance();
        lx.skip_to_end();
        assert!(lx.at_end());
    }

    #[test]
    fn test_set_pos_reenters_range() {
        let mut lx = Lexer::new(b"f(1, 2)");
        lx.advance(); // f
        let lparen = lx.advance();
        lx.set_pos(lparen.end());
        assert_eq!(lx.advance().num, 1.0);
        assert_eq!(lx.advance().kind, TokenKind::Comma);
    }
}
