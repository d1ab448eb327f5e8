pub(crate) mod token;

use log::trace;
use tokio::sync::mpsc;

use crate::char_classes::{
    is_attribute_name_char, is_attribute_value_quote, is_raw_text_element, is_script_quote,
    is_style_quote, is_tag_name_char, is_tag_name_start_char, is_unquoted_attribute_value_char,
    is_void_element, is_whitespace,
};
use crate::decoder::{CharDecoder, DecodedChar, Position};
use token::Token;

/// Lexing stopped early: either an error token was already delivered,
/// or the receiving half of the token stream hung up.
struct Halt;

/// The tokenizer's states. Each state has one method on [`Tokenizer`]
/// which consumes characters, writes tokens, and names the next state;
/// the driver loop dispatches until a state reports completion.
#[derive(Debug)]
enum LexerState {
    TextContent,
    OpeningTagContents,
    ClosingTagName,
    ClosingTagEnd,
    CommentTag,
    RawElementContent { tag_name: String },
}

/// Outcome of scanning a `</tagname` candidate inside a raw-text body.
enum RawScan {
    /// The closer matched and its tokens were emitted.
    Closed,
    /// Not the closer; the consumed prefix was replayed into the buffer.
    NotClosed,
    /// The input ended mid-candidate.
    EndOfInput,
}

/// Byte-level lexer for HTML documents.
///
/// Characters are pulled one at a time from the decoder and tokens are
/// written to a bounded channel, so a slow consumer suspends the lexer
/// instead of letting it buffer the whole document.
pub(crate) struct Tokenizer {
    decoder: CharDecoder,
    sink: mpsc::Sender<Token>,
    ignore_self_closing_syntax: bool,
}

impl Tokenizer {
    pub(crate) fn new(
        decoder: CharDecoder,
        sink: mpsc::Sender<Token>,
        ignore_self_closing_syntax: bool,
    ) -> Self {
        Self {
            decoder,
            sink,
            ignore_self_closing_syntax,
        }
    }

    /// Runs the state machine until the input or the token stream ends.
    pub(crate) async fn run(mut self) {
        let mut state = LexerState::TextContent;
        loop {
            trace!("tokenizer entering {state:?}");
            let step = match state {
                LexerState::TextContent => self.lex_text_content().await,
                LexerState::OpeningTagContents => self.lex_opening_tag_contents().await,
                LexerState::ClosingTagName => self.lex_closing_tag_name().await,
                LexerState::ClosingTagEnd => self.lex_closing_tag_end().await,
                LexerState::CommentTag => self.lex_comment_tag().await,
                LexerState::RawElementContent { tag_name } => {
                    self.lex_raw_element_content(tag_name).await
                }
            };
            match step {
                Ok(Some(next)) => state = next,
                Ok(None) | Err(Halt) => return,
            }
        }
    }

    async fn pull(&mut self) -> Result<Option<DecodedChar>, Halt> {
        match self.decoder.next_char().await {
            Ok(next) => Ok(next),
            Err(error) => Err(self.abort(error).await),
        }
    }

    async fn unread(&mut self, ch: DecodedChar) -> Result<(), Halt> {
        match self.decoder.unread(ch) {
            Ok(()) => Ok(()),
            Err(error) => Err(self.abort(error).await),
        }
    }

    async fn emit(&mut self, token: Token) -> Result<(), Halt> {
        self.sink.send(token).await.map_err(|_| Halt)
    }

    async fn emit_eof(&mut self) -> Result<(), Halt> {
        let at = self.decoder.position();
        self.emit(Token::Eof { at }).await
    }

    /// Delivers a terminal error token. The stream closes after it, so
    /// the returned [`Halt`] must be propagated.
    async fn abort(&mut self, error: crate::errors::ParserError) -> Halt {
        let _ = self.sink.send(Token::Error(error)).await;
        Halt
    }

    async fn flush_text(
        &mut self,
        buffer: &mut String,
        buffer_at: &mut Option<Position>,
    ) -> Result<(), Halt> {
        if buffer.is_empty() {
            return Ok(());
        }
        let value = std::mem::take(buffer);
        let at = buffer_at.take().unwrap_or_else(|| self.decoder.position());
        self.emit(Token::Text { value, at }).await
    }

    /// Initial state: accumulates text until something that can start a
    /// tag, comment, or DOCTYPE shows up. A `<` followed by anything
    /// that cannot begin one of those constructs stays plain text, so
    /// `<3` renders as a heart instead of disappearing into a bogus tag.
    async fn lex_text_content(&mut self) -> Result<Option<LexerState>, Halt> {
        let mut text = String::new();
        let mut text_at: Option<Position> = None;
        loop {
            let Some(ch) = self.pull().await? else {
                self.flush_text(&mut text, &mut text_at).await?;
                self.emit_eof().await?;
                return Ok(None);
            };
            if ch.ch != '<' {
                push_char(&mut text, &mut text_at, ch);
                continue;
            }

            let Some(next) = self.pull().await? else {
                push_char(&mut text, &mut text_at, ch);
                self.flush_text(&mut text, &mut text_at).await?;
                self.emit_eof().await?;
                return Ok(None);
            };

            if is_tag_name_start_char(next.ch) {
                self.flush_text(&mut text, &mut text_at).await?;
                self.unread(next).await?;
                return Ok(Some(LexerState::OpeningTagContents));
            }

            match next.ch {
                '/' => {
                    let Some(name_start) = self.pull().await? else {
                        push_char(&mut text, &mut text_at, ch);
                        text.push('/');
                        self.flush_text(&mut text, &mut text_at).await?;
                        self.emit_eof().await?;
                        return Ok(None);
                    };
                    if is_tag_name_start_char(name_start.ch) {
                        self.flush_text(&mut text, &mut text_at).await?;
                        self.unread(name_start).await?;
                        return Ok(Some(LexerState::ClosingTagName));
                    }
                    // "</" with no tagname behind it is plain text.
                    push_char(&mut text, &mut text_at, ch);
                    text.push('/');
                    self.unread(name_start).await?;
                }
                '!' => {
                    if let Some(state) = self
                        .lex_markup_declaration(ch, &mut text, &mut text_at)
                        .await?
                    {
                        return Ok(Some(state));
                    }
                }
                _ => {
                    push_char(&mut text, &mut text_at, ch);
                    self.unread(next).await?;
                }
            }
        }
    }

    /// Examines what follows `<!`: a comment opener, a DOCTYPE
    /// declaration (uppercase, then whitespace), or nothing special.
    ///
    /// Only one character can be pushed back through the decoder, so on
    /// a partial match the consumed prefix is replayed into the text
    /// buffer verbatim and only the final mismatching character is
    /// unread for re-examination.
    async fn lex_markup_declaration(
        &mut self,
        opener: DecodedChar,
        text: &mut String,
        text_at: &mut Option<Position>,
    ) -> Result<Option<LexerState>, Halt> {
        let Some(first) = self.pull().await? else {
            push_char(text, text_at, opener);
            text.push('!');
            return Ok(None);
        };
        match first.ch {
            '-' => {
                let Some(second) = self.pull().await? else {
                    push_char(text, text_at, opener);
                    text.push_str("!-");
                    return Ok(None);
                };
                if second.ch == '-' {
                    self.flush_text(text, text_at).await?;
                    return Ok(Some(LexerState::CommentTag));
                }
                push_char(text, text_at, opener);
                text.push_str("!-");
                self.unread(second).await?;
                Ok(None)
            }
            'D' => {
                let mut matched = String::from("D");
                for expected in "OCTYPE".chars() {
                    let Some(ch) = self.pull().await? else {
                        push_char(text, text_at, opener);
                        text.push('!');
                        text.push_str(&matched);
                        return Ok(None);
                    };
                    if ch.ch != expected {
                        push_char(text, text_at, opener);
                        text.push('!');
                        text.push_str(&matched);
                        self.unread(ch).await?;
                        return Ok(None);
                    }
                    matched.push(ch.ch);
                }
                let Some(separator) = self.pull().await? else {
                    push_char(text, text_at, opener);
                    text.push_str("!DOCTYPE");
                    return Ok(None);
                };
                if !is_whitespace(separator.ch) {
                    push_char(text, text_at, opener);
                    text.push_str("!DOCTYPE");
                    self.unread(separator).await?;
                    return Ok(None);
                }
                self.flush_text(text, text_at).await?;
                self.lex_doctype_declaration().await?;
                Ok(Some(LexerState::TextContent))
            }
            _ => {
                push_char(text, text_at, opener);
                text.push('!');
                self.unread(first).await?;
                Ok(None)
            }
        }
    }

    /// Reads the identifier following `<!DOCTYPE` up to the closing `>`
    /// and emits it trimmed of surrounding whitespace. Runs inline from
    /// the text state rather than as a state of its own.
    async fn lex_doctype_declaration(&mut self) -> Result<(), Halt> {
        let mut value = String::new();
        let mut value_at: Option<Position> = None;
        loop {
            let Some(ch) = self.pull().await? else {
                break;
            };
            if ch.ch == '>' {
                break;
            }
            if value.is_empty() && is_whitespace(ch.ch) {
                continue;
            }
            push_char(&mut value, &mut value_at, ch);
        }
        while value.ends_with(is_whitespace) {
            value.pop();
        }
        let at = value_at.unwrap_or_else(|| self.decoder.position());
        self.emit(Token::DoctypeDeclaration { value, at }).await
    }

    /// Lexes everything between `<` and the tag-closing `>`: the
    /// tagname, the attributes, and the kind of tag end. Void tagnames
    /// and the `/>` syntax (unless configured away) both produce a
    /// self-closing end.
    async fn lex_opening_tag_contents(&mut self) -> Result<Option<LexerState>, Halt> {
        let Some(name) = self.lex_tag_name(Token::opening_tag_name).await? else {
            return Ok(None);
        };

        let is_void = is_void_element(&name);
        let is_raw = is_raw_text_element(&name);

        // The most recent non-whitespace character decides whether a
        // closing ">" was really "/>". Characters consumed while lexing
        // an attribute stay out of it, so a "/" inside an unquoted
        // attribute value cannot self-close the tag.
        let mut previous: Option<char> = None;
        loop {
            let Some(ch) = self.pull().await? else {
                self.emit_eof().await?;
                return Ok(None);
            };
            if is_whitespace(ch.ch) {
                continue;
            }
            if ch.ch == '>' {
                let self_closing =
                    is_void || (!self.ignore_self_closing_syntax && previous == Some('/'));
                if self_closing {
                    self.emit(Token::SelfClosingTagEnd { at: ch.at }).await?;
                    return Ok(Some(LexerState::TextContent));
                }
                self.emit(Token::OpeningTagEnd { at: ch.at }).await?;
                if is_raw {
                    return Ok(Some(LexerState::RawElementContent { tag_name: name }));
                }
                return Ok(Some(LexerState::TextContent));
            }
            previous = Some(ch.ch);
            if is_attribute_name_char(ch.ch) {
                self.unread(ch).await?;
                self.lex_opening_tag_attribute().await?;
            }
        }
    }

    /// Reads one tagname and emits it with the given constructor. The
    /// first character was already validated and unread by the caller.
    async fn lex_tag_name(
        &mut self,
        make: fn(String, Position) -> Token,
    ) -> Result<Option<String>, Halt> {
        let Some(first) = self.pull().await? else {
            self.emit_eof().await?;
            return Ok(None);
        };
        let at = first.at;
        let mut name = String::new();
        name.push(first.ch);
        loop {
            match self.pull().await? {
                Some(ch) if is_tag_name_char(ch.ch) => name.push(ch.ch),
                Some(ch) => {
                    self.unread(ch).await?;
                    break;
                }
                None => break,
            }
        }
        self.emit(make(name.clone(), at)).await?;
        Ok(Some(name))
    }

    /// Emits exactly one attribute name and, when an `=` immediately
    /// follows the name, at most one attribute value.
    ///
    /// Quoted values run to the matching unescaped quote; a backslash
    /// escapes the following character, which is emitted without the
    /// backslash. Unquoted values run until whitespace, `<`, `>`, or a
    /// quote character.
    async fn lex_opening_tag_attribute(&mut self) -> Result<(), Halt> {
        let Some(first) = self.pull().await? else {
            return Ok(());
        };
        let at = first.at;
        let mut name = String::new();
        name.push(first.ch);
        loop {
            match self.pull().await? {
                Some(ch) if is_attribute_name_char(ch.ch) => name.push(ch.ch),
                Some(ch) => {
                    self.unread(ch).await?;
                    break;
                }
                None => {
                    self.emit(Token::AttributeName { value: name, at }).await?;
                    return Ok(());
                }
            }
        }
        self.emit(Token::AttributeName { value: name, at }).await?;

        let Some(equals) = self.pull().await? else {
            return Ok(());
        };
        if equals.ch != '=' {
            // No value; this is a boolean attribute.
            self.unread(equals).await?;
            return Ok(());
        }

        let Some(opener) = self.pull().await? else {
            return Ok(());
        };
        if is_attribute_value_quote(opener.ch) {
            let quote = opener.ch;
            let at = self.decoder.position();
            let mut value = String::new();
            loop {
                let Some(ch) = self.pull().await? else {
                    break;
                };
                if ch.ch == '\\' {
                    let Some(escaped) = self.pull().await? else {
                        break;
                    };
                    value.push(escaped.ch);
                    continue;
                }
                if ch.ch == quote {
                    break;
                }
                value.push(ch.ch);
            }
            self.emit(Token::AttributeValue { value, at }).await?;
        } else if is_unquoted_attribute_value_char(opener.ch) {
            let at = opener.at;
            let mut value = String::new();
            value.push(opener.ch);
            loop {
                match self.pull().await? {
                    Some(ch) if is_unquoted_attribute_value_char(ch.ch) => value.push(ch.ch),
                    Some(ch) => {
                        self.unread(ch).await?;
                        break;
                    }
                    None => break,
                }
            }
            self.emit(Token::AttributeValue { value, at }).await?;
        } else {
            // "=" followed by something that cannot begin a value, e.g.
            // the tag's own ">". Leave it for the tag loop.
            self.unread(opener).await?;
        }
        Ok(())
    }

    async fn lex_closing_tag_name(&mut self) -> Result<Option<LexerState>, Halt> {
        match self.lex_tag_name(Token::closing_tag_name).await? {
            Some(_) => Ok(Some(LexerState::ClosingTagEnd)),
            None => Ok(None),
        }
    }

    /// Discards everything up to and including the `>` of a closing tag.
    async fn lex_closing_tag_end(&mut self) -> Result<Option<LexerState>, Halt> {
        loop {
            let Some(ch) = self.pull().await? else {
                self.emit_eof().await?;
                return Ok(None);
            };
            if ch.ch == '>' {
                return Ok(Some(LexerState::TextContent));
            }
        }
    }

    /// Buffers a comment body until `-->` and emits it trimmed.
    async fn lex_comment_tag(&mut self) -> Result<Option<LexerState>, Halt> {
        let at = self.decoder.position();
        let mut content = String::new();
        loop {
            let Some(ch) = self.pull().await? else {
                // Unterminated comment; keep what was collected.
                self.emit_trimmed_comment(content, at).await?;
                self.emit_eof().await?;
                return Ok(None);
            };
            content.push(ch.ch);
            if content.ends_with("-->") {
                content.truncate(content.len() - 3);
                self.emit_trimmed_comment(content, at).await?;
                return Ok(Some(LexerState::TextContent));
            }
        }
    }

    async fn emit_trimmed_comment(&mut self, content: String, at: Position) -> Result<(), Halt> {
        let value = content
            .trim_matches(|ch: char| is_whitespace(ch))
            .to_string();
        self.emit(Token::Comment { value, at }).await
    }

    /// Reads the body of a raw-text element (`script`, `style`,
    /// `textarea`, `title`) verbatim until its own closing tag.
    ///
    /// Script and style bodies track unescaped quotes so that a closer
    /// inside a string literal, like `'</style>'`, does not end the
    /// element. A backslash inside a quote escapes the next character
    /// for the purpose of quote tracking; the text itself is preserved
    /// exactly as written.
    async fn lex_raw_element_content(
        &mut self,
        tag_name: String,
    ) -> Result<Option<LexerState>, Halt> {
        let quote_class: Option<fn(char) -> bool> = if tag_name.eq_ignore_ascii_case("script") {
            Some(is_script_quote)
        } else if tag_name.eq_ignore_ascii_case("style") {
            Some(is_style_quote)
        } else {
            None
        };

        let mut content = String::new();
        let mut content_at: Option<Position> = None;
        let mut open_quote: Option<char> = None;
        loop {
            let Some(ch) = self.pull().await? else {
                self.flush_text(&mut content, &mut content_at).await?;
                self.emit_eof().await?;
                return Ok(None);
            };

            if let Some(quote) = open_quote {
                push_char(&mut content, &mut content_at, ch);
                if ch.ch == '\\' {
                    let Some(escaped) = self.pull().await? else {
                        self.flush_text(&mut content, &mut content_at).await?;
                        self.emit_eof().await?;
                        return Ok(None);
                    };
                    content.push(escaped.ch);
                } else if ch.ch == quote {
                    open_quote = None;
                }
                continue;
            }

            if ch.ch == '<' {
                match self
                    .lex_raw_closing_tag(&tag_name, ch, &mut content, &mut content_at)
                    .await?
                {
                    RawScan::Closed => return Ok(Some(LexerState::ClosingTagEnd)),
                    RawScan::NotClosed => continue,
                    RawScan::EndOfInput => {
                        self.flush_text(&mut content, &mut content_at).await?;
                        self.emit_eof().await?;
                        return Ok(None);
                    }
                }
            }

            if let Some(is_quote) = quote_class {
                if is_quote(ch.ch) {
                    open_quote = Some(ch.ch);
                }
            }
            push_char(&mut content, &mut content_at, ch);
        }
    }

    /// Tries to match `</tagname` plus a terminating non-tagname
    /// character at the current read position. On a match, the buffered
    /// body and the closing tagname are emitted; otherwise the consumed
    /// candidate is replayed into the buffer and scanning resumes.
    async fn lex_raw_closing_tag(
        &mut self,
        tag_name: &str,
        opener: DecodedChar,
        content: &mut String,
        content_at: &mut Option<Position>,
    ) -> Result<RawScan, Halt> {
        let Some(slash) = self.pull().await? else {
            push_char(content, content_at, opener);
            return Ok(RawScan::EndOfInput);
        };
        if slash.ch != '/' {
            push_char(content, content_at, opener);
            self.unread(slash).await?;
            return Ok(RawScan::NotClosed);
        }

        let mut matched = String::new();
        let mut matched_at: Option<Position> = None;
        for expected in tag_name.chars() {
            let Some(ch) = self.pull().await? else {
                push_char(content, content_at, opener);
                content.push('/');
                content.push_str(&matched);
                return Ok(RawScan::EndOfInput);
            };
            if !ch.ch.eq_ignore_ascii_case(&expected) {
                push_char(content, content_at, opener);
                content.push('/');
                content.push_str(&matched);
                self.unread(ch).await?;
                return Ok(RawScan::NotClosed);
            }
            if matched.is_empty() {
                matched_at = Some(ch.at);
            }
            matched.push(ch.ch);
        }

        // The name must terminate here: "</textarearug" is body text
        // even though "</textarea" appears inside it.
        match self.pull().await? {
            Some(ch) if is_tag_name_char(ch.ch) => {
                push_char(content, content_at, opener);
                content.push('/');
                content.push_str(&matched);
                self.unread(ch).await?;
                return Ok(RawScan::NotClosed);
            }
            Some(ch) => self.unread(ch).await?,
            None => {}
        }

        self.flush_text(content, content_at).await?;
        let at = matched_at.unwrap_or_else(|| self.decoder.position());
        self.emit(Token::ClosingTagName {
            value: tag_name.to_string(),
            at,
        })
        .await?;
        Ok(RawScan::Closed)
    }
}

impl Token {
    fn opening_tag_name(value: String, at: Position) -> Token {
        Token::OpeningTagName { value, at }
    }

    fn closing_tag_name(value: String, at: Position) -> Token {
        Token::ClosingTagName { value, at }
    }
}

/// Appends a decoded character to a buffer, recording the position of
/// the buffer's first character.
fn push_char(buffer: &mut String, buffer_at: &mut Option<Position>, ch: DecodedChar) {
    if buffer.is_empty() {
        *buffer_at = Some(ch.at);
    }
    buffer.push(ch.ch);
}
