use crate::decoder::Position;

/// The fixed message reported when a parse result is consumed twice.
pub(crate) const CONSUMED_MESSAGE: &str = "the parse result has already been consumed";

/// A failure surfaced while opening, decoding, or parsing a document.
///
/// Errors are delivered in-band on the node stream: iteration yields the
/// error as its final item and every still-open child stream is aborted
/// with a copy of it. Malformed markup is never an error; only I/O
/// failures, byte-level decode failures, and internal protocol
/// violations reach consumers this way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserError {
    kind: ParserErrorKind,
    message: String,
    at: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserErrorKind {
    /// Opening or reading the input failed. The message carries the
    /// underlying OS error string verbatim.
    Io,

    /// An invalid leading byte or a truncated multi-byte sequence was
    /// found while decoding. The position is the character at which
    /// decoding failed.
    Decode,

    /// The lexer violated one of its own invariants, e.g. a character
    /// was pushed back twice without an intervening read.
    LexerProtocol,

    /// The tree builder received a token sequence no lexer should
    /// produce, e.g. an attribute value with no preceding name.
    ParserProtocol,

    /// A single-use parse result was consumed a second time.
    Consumed,
}

impl ParserError {
    pub(crate) fn io(message: impl Into<String>, at: Position) -> Self {
        Self {
            kind: ParserErrorKind::Io,
            message: message.into(),
            at,
        }
    }

    pub(crate) fn decode(message: impl Into<String>, at: Position) -> Self {
        Self {
            kind: ParserErrorKind::Decode,
            message: message.into(),
            at,
        }
    }

    pub(crate) fn lexer_protocol(message: impl Into<String>, at: Position) -> Self {
        Self {
            kind: ParserErrorKind::LexerProtocol,
            message: message.into(),
            at,
        }
    }

    pub(crate) fn parser_protocol(message: impl Into<String>, at: Position) -> Self {
        Self {
            kind: ParserErrorKind::ParserProtocol,
            message: message.into(),
            at,
        }
    }

    pub(crate) fn consumed() -> Self {
        Self {
            kind: ParserErrorKind::Consumed,
            message: CONSUMED_MESSAGE.into(),
            at: Position::start(),
        }
    }

    pub fn kind(&self) -> ParserErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn position(&self) -> Position {
        self.at
    }
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} (line {}, column {})",
            Into::<&str>::into(&self.kind),
            self.message,
            self.at.line,
            self.at.column
        )
    }
}

impl std::error::Error for ParserError {}

impl From<ParserErrorKind> for &str {
    fn from(val: ParserErrorKind) -> Self {
        match val {
            ParserErrorKind::Io => "io-error",
            ParserErrorKind::Decode => "decode-error",
            ParserErrorKind::LexerProtocol => "lexer-protocol-error",
            ParserErrorKind::ParserProtocol => "parser-protocol-error",
            ParserErrorKind::Consumed => "consumed-error",
        }
    }
}

impl From<&ParserErrorKind> for &str {
    fn from(val: &ParserErrorKind) -> Self {
        Into::<&str>::into(*val)
    }
}

impl std::fmt::Display for ParserErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}
