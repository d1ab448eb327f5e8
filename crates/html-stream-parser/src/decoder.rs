use serde::Serialize;

use crate::byte_stream::ByteStream;
use crate::char_classes::is_line_break;
use crate::errors::ParserError;

/// A 1-based line/column location in the source document.
///
/// The column resets to 1 after every line break, and each codepoint in
/// the range U+000A..=U+000D counts as a line break, so a CR LF pair
/// advances the line counter twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    #[serde(rename = "l")]
    pub line: u32,
    #[serde(rename = "c")]
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub(crate) fn start() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A decoded codepoint tagged with the location it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DecodedChar {
    pub(crate) ch: char,
    pub(crate) at: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
}

/// Streaming character decoder over a [`ByteStream`].
///
/// The first pull inspects up to four bytes for a byte-order mark and
/// locks the encoding for the rest of the document; without a BOM the
/// input is treated as UTF-8. The decoder owns the line/column counters
/// and a single pushback slot, so a state machine reading from it can
/// peek one character ahead by unreading it.
pub(crate) struct CharDecoder {
    bytes: ByteStream,
    encoding: Option<TextEncoding>,
    replay: [u8; 4],
    replay_len: u8,
    replay_next: u8,
    line: u32,
    column: u32,
    pushback: Option<DecodedChar>,
}

impl CharDecoder {
    pub(crate) fn new(bytes: ByteStream) -> Self {
        Self {
            bytes,
            encoding: None,
            replay: [0; 4],
            replay_len: 0,
            replay_next: 0,
            line: 1,
            column: 1,
            pushback: None,
        }
    }

    /// The position the next pulled character will report.
    ///
    /// After an `unread` this reverts to the pushed-back character's own
    /// position, so position reads are stable across a peek.
    pub(crate) fn position(&self) -> Position {
        match self.pushback {
            Some(pushed) => pushed.at,
            None => Position {
                line: self.line,
                column: self.column,
            },
        }
    }

    /// Pulls the next decoded character, or `None` at end of input.
    pub(crate) async fn next_char(&mut self) -> Result<Option<DecodedChar>, ParserError> {
        if let Some(pushed) = self.pushback.take() {
            return Ok(Some(pushed));
        }

        let encoding = match self.encoding {
            Some(encoding) => encoding,
            None => {
                let sniffed = self.sniff_byte_order_mark().await?;
                self.encoding = Some(sniffed);
                sniffed
            }
        };

        let codepoint = match encoding {
            TextEncoding::Utf8 => self.next_codepoint_utf8().await?,
            TextEncoding::Utf16Le => self.next_codepoint_utf16(false).await?,
            TextEncoding::Utf16Be => self.next_codepoint_utf16(true).await?,
            TextEncoding::Utf32Le => self.next_codepoint_utf32(false).await?,
            TextEncoding::Utf32Be => self.next_codepoint_utf32(true).await?,
        };
        let Some(codepoint) = codepoint else {
            return Ok(None);
        };
        let Some(ch) = char::from_u32(codepoint) else {
            return Err(self.decode_error(format!(
                "U+{codepoint:04X} is not a valid Unicode scalar value"
            )));
        };

        let at = Position {
            line: self.line,
            column: self.column,
        };
        if is_line_break(ch) {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        Ok(Some(DecodedChar { ch, at }))
    }

    /// Pushes the most recently pulled character back into the decoder.
    ///
    /// Only one character may be outstanding: a second push without an
    /// intervening pull is an internal protocol violation.
    pub(crate) fn unread(&mut self, ch: DecodedChar) -> Result<(), ParserError> {
        if self.pushback.is_some() {
            return Err(ParserError::lexer_protocol(
                "a character was unread twice without an intervening read",
                ch.at,
            ));
        }
        self.pushback = Some(ch);
        Ok(())
    }

    /// Reads up to four bytes and matches them against the known
    /// byte-order marks. Bytes the BOM does not claim are replayed
    /// before anything further is read from the underlying stream.
    ///
    /// `FF FE` is UTF-16 LE unless followed by `00 00`, which makes it
    /// the UTF-32 LE mark, so the longer patterns are matched first.
    async fn sniff_byte_order_mark(&mut self) -> Result<TextEncoding, ParserError> {
        let mut prefix = [0u8; 4];
        let mut have = 0usize;
        while have < 4 {
            match self.next_stream_byte().await? {
                Some(byte) => {
                    prefix[have] = byte;
                    have += 1;
                }
                None => break,
            }
        }

        let (encoding, skip) = if have >= 4 && prefix == [0xFF, 0xFE, 0x00, 0x00] {
            (TextEncoding::Utf32Le, 4)
        } else if have >= 4 && prefix == [0x00, 0x00, 0xFE, 0xFF] {
            (TextEncoding::Utf32Be, 4)
        } else if have >= 3 && prefix[..3] == [0xEF, 0xBB, 0xBF] {
            (TextEncoding::Utf8, 3)
        } else if have >= 2 && prefix[..2] == [0xFF, 0xFE] {
            (TextEncoding::Utf16Le, 2)
        } else if have >= 2 && prefix[..2] == [0xFE, 0xFF] {
            (TextEncoding::Utf16Be, 2)
        } else {
            (TextEncoding::Utf8, 0)
        };

        self.replay = prefix;
        self.replay_next = skip as u8;
        self.replay_len = have as u8;

        Ok(encoding)
    }

    async fn next_raw_byte(&mut self) -> Result<Option<u8>, ParserError> {
        if self.replay_next < self.replay_len {
            let byte = self.replay[self.replay_next as usize];
            self.replay_next += 1;
            return Ok(Some(byte));
        }
        self.next_stream_byte().await
    }

    async fn next_stream_byte(&mut self) -> Result<Option<u8>, ParserError> {
        match self.bytes.next_byte().await {
            Ok(byte) => Ok(byte),
            Err(error) => Err(ParserError::io(error.to_string(), self.position())),
        }
    }

    async fn next_codepoint_utf8(&mut self) -> Result<Option<u32>, ParserError> {
        let Some(lead) = self.next_raw_byte().await? else {
            return Ok(None);
        };

        // The leading byte determines the sequence length; continuation
        // bytes each contribute their low six bits.
        let (mut codepoint, continuation_count) = match lead {
            0x00..=0x7F => (lead as u32, 0),
            0xC0..=0xDF => ((lead & 0x1F) as u32, 1),
            0xE0..=0xEF => ((lead & 0x0F) as u32, 2),
            0xF0..=0xF7 => ((lead & 0x07) as u32, 3),
            _ => {
                return Err(self.decode_error(format!("invalid UTF-8 leading byte 0x{lead:02X}")));
            }
        };

        for _ in 0..continuation_count {
            let Some(byte) = self.next_raw_byte().await? else {
                return Err(self.decode_error("truncated UTF-8 sequence at end of input"));
            };
            if byte & 0xC0 != 0x80 {
                return Err(
                    self.decode_error(format!("invalid UTF-8 continuation byte 0x{byte:02X}"))
                );
            }
            codepoint = (codepoint << 6) | (byte & 0x3F) as u32;
        }

        Ok(Some(codepoint))
    }

    async fn next_utf16_unit(&mut self, big_endian: bool) -> Result<Option<u16>, ParserError> {
        let Some(first) = self.next_raw_byte().await? else {
            return Ok(None);
        };
        let Some(second) = self.next_raw_byte().await? else {
            return Err(self.decode_error("truncated UTF-16 code unit at end of input"));
        };
        Ok(Some(if big_endian {
            u16::from_be_bytes([first, second])
        } else {
            u16::from_le_bytes([first, second])
        }))
    }

    async fn next_codepoint_utf16(&mut self, big_endian: bool) -> Result<Option<u32>, ParserError> {
        let Some(unit) = self.next_utf16_unit(big_endian).await? else {
            return Ok(None);
        };
        match unit {
            0xD800..=0xDBFF => {
                let Some(low) = self.next_utf16_unit(big_endian).await? else {
                    return Err(self.decode_error("unpaired UTF-16 surrogate at end of input"));
                };
                if !(0xDC00..=0xDFFF).contains(&low) {
                    return Err(self.decode_error(format!(
                        "expected a low surrogate after 0x{unit:04X}, found 0x{low:04X}"
                    )));
                }
                let high = (unit as u32 - 0xD800) << 10;
                Ok(Some(0x10000 + (high | (low as u32 - 0xDC00))))
            }
            0xDC00..=0xDFFF => {
                Err(self.decode_error(format!("unpaired UTF-16 low surrogate 0x{unit:04X}")))
            }
            _ => Ok(Some(unit as u32)),
        }
    }

    async fn next_codepoint_utf32(&mut self, big_endian: bool) -> Result<Option<u32>, ParserError> {
        let Some(first) = self.next_raw_byte().await? else {
            return Ok(None);
        };
        let mut unit = [first, 0, 0, 0];
        for slot in unit.iter_mut().skip(1) {
            let Some(byte) = self.next_raw_byte().await? else {
                return Err(self.decode_error("truncated UTF-32 code unit at end of input"));
            };
            *slot = byte;
        }
        Ok(Some(if big_endian {
            u32::from_be_bytes(unit)
        } else {
            u32::from_le_bytes(unit)
        }))
    }

    fn decode_error(&self, message: impl Into<String>) -> ParserError {
        ParserError::decode(message, self.position())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::ParserErrorKind;

    async fn decode_all(bytes: &[u8]) -> Result<Vec<DecodedChar>, ParserError> {
        let mut decoder = CharDecoder::new(ByteStream::from_bytes(bytes.into()));
        let mut decoded = Vec::new();
        while let Some(next) = decoder.next_char().await? {
            decoded.push(next);
        }
        Ok(decoded)
    }

    async fn decode_text(bytes: &[u8]) -> String {
        decode_all(bytes)
            .await
            .unwrap()
            .into_iter()
            .map(|decoded| decoded.ch)
            .collect()
    }

    fn utf16_bytes(text: &str, big_endian: bool) -> Vec<u8> {
        let mut bytes = Vec::new();
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&if big_endian {
                unit.to_be_bytes()
            } else {
                unit.to_le_bytes()
            });
        }
        bytes
    }

    fn utf32_bytes(text: &str, big_endian: bool) -> Vec<u8> {
        let mut bytes = Vec::new();
        for ch in text.chars() {
            bytes.extend_from_slice(&if big_endian {
                (ch as u32).to_be_bytes()
            } else {
                (ch as u32).to_le_bytes()
            });
        }
        bytes
    }

    #[tokio::test]
    async fn decodes_plain_utf8_without_a_bom() {
        assert_eq!(decode_text("héllo ☃".as_bytes()).await, "héllo ☃");
    }

    #[tokio::test]
    async fn skips_the_utf8_bom() {
        assert_eq!(decode_text("\u{FEFF}abc".as_bytes()).await, "abc");
    }

    #[tokio::test]
    async fn decodes_utf16_both_endians_with_boms() {
        assert_eq!(
            decode_text(&utf16_bytes("\u{FEFF}Hi 👋", false)).await,
            "Hi 👋"
        );
        assert_eq!(
            decode_text(&utf16_bytes("\u{FEFF}Hi 👋", true)).await,
            "Hi 👋"
        );
    }

    #[tokio::test]
    async fn decodes_utf32_both_endians_with_boms() {
        assert_eq!(
            decode_text(&utf32_bytes("\u{FEFF}Hi 👋", false)).await,
            "Hi 👋"
        );
        assert_eq!(
            decode_text(&utf32_bytes("\u{FEFF}Hi 👋", true)).await,
            "Hi 👋"
        );
    }

    #[tokio::test]
    async fn short_inputs_that_resemble_bom_prefixes_fall_back_to_utf8() {
        // A two-byte document cannot carry a three-byte mark.
        assert_eq!(decode_text(&[0xC3, 0xA9]).await, "é");
    }

    #[tokio::test]
    async fn tracks_lines_and_columns() {
        let decoded = decode_all(b"ab\ncd").await.unwrap();
        let positions: Vec<(u32, u32)> = decoded
            .iter()
            .map(|decoded| (decoded.at.line, decoded.at.column))
            .collect();
        assert_eq!(positions, vec![(1, 1), (1, 2), (1, 3), (2, 1), (2, 2)]);
    }

    #[tokio::test]
    async fn every_line_break_codepoint_advances_the_line() {
        let decoded = decode_all(b"a\r\nb").await.unwrap();
        let positions: Vec<(u32, u32)> = decoded
            .iter()
            .map(|decoded| (decoded.at.line, decoded.at.column))
            .collect();
        // CR and LF each count, so the pair skips a line number.
        assert_eq!(positions, vec![(1, 1), (1, 2), (2, 1), (3, 1)]);
    }

    #[tokio::test]
    async fn unread_replays_the_character_with_its_original_position() {
        let mut decoder = CharDecoder::new(ByteStream::from_bytes(b"xy".as_slice().into()));
        let first = decoder.next_char().await.unwrap().unwrap();
        assert_eq!(first.ch, 'x');

        decoder.unread(first).unwrap();
        assert_eq!(decoder.position(), Position::new(1, 1));

        let replayed = decoder.next_char().await.unwrap().unwrap();
        assert_eq!(replayed, first);
        assert_eq!(decoder.next_char().await.unwrap().unwrap().ch, 'y');
    }

    #[tokio::test]
    async fn double_unread_is_a_protocol_error() {
        let mut decoder = CharDecoder::new(ByteStream::from_bytes(b"xy".as_slice().into()));
        let first = decoder.next_char().await.unwrap().unwrap();
        decoder.unread(first).unwrap();
        let error = decoder.unread(first).unwrap_err();
        assert_eq!(error.kind(), ParserErrorKind::LexerProtocol);
    }

    #[tokio::test]
    async fn invalid_utf8_leading_byte_is_a_decode_error() {
        let error = decode_all(&[b'a', 0xFF]).await.unwrap_err();
        assert_eq!(error.kind(), ParserErrorKind::Decode);
        assert_eq!(error.position(), Position::new(1, 2));
    }

    #[tokio::test]
    async fn truncated_utf8_sequence_is_a_decode_error() {
        let error = decode_all(&[0xE2, 0x98]).await.unwrap_err();
        assert_eq!(error.kind(), ParserErrorKind::Decode);
    }

    #[tokio::test]
    async fn unpaired_utf16_surrogate_is_a_decode_error() {
        let mut bytes = utf16_bytes("\u{FEFF}a", false);
        bytes.extend_from_slice(&0xD800u16.to_le_bytes());
        let error = decode_all(&bytes).await.unwrap_err();
        assert_eq!(error.kind(), ParserErrorKind::Decode);
    }

    #[tokio::test]
    async fn out_of_range_utf32_codepoint_is_a_decode_error() {
        let mut bytes = utf32_bytes("\u{FEFF}", false);
        bytes.extend_from_slice(&0x0011_0000u32.to_le_bytes());
        let error = decode_all(&bytes).await.unwrap_err();
        assert_eq!(error.kind(), ParserErrorKind::Decode);
    }
}
