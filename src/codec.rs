//! Line framing for the terminal protocol.
//!
//! Outgoing commands are always UTF-8 JSON followed by a single `\n`.
//! Received lines may come from older connector builds that write Windows-1251
//! text; [`LineEncoding`] selects the transcoding applied before parsing.

use std::borrow::Cow;
use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{Error, Result};
use crate::protocol::{Command, CommandResult, Event};

pub const LINE_TERMINATOR: u8 = b'\n';

/// Longest line accepted from the terminal, terminator included.
pub const DEFAULT_MAX_LINE: usize = 8 * 1024 * 1024;

/// Character encoding of lines received from the terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineEncoding {
    #[default]
    Utf8,
    Windows1251,
}

impl LineEncoding {
    /// Reinterprets `line` as UTF-8 text. Never changes the number of lines.
    pub fn transcode<'a>(&self, line: &'a [u8]) -> Cow<'a, [u8]> {
        match self {
            LineEncoding::Utf8 => Cow::Borrowed(line),
            LineEncoding::Windows1251 => {
                // Unmapped bytes decode to U+FFFD rather than failing the line.
                let (text, _) = encoding_rs::WINDOWS_1251.decode_without_bom_handling(line);
                match text {
                    Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
                    Cow::Owned(s) => Cow::Owned(s.into_bytes()),
                }
            }
        }
    }
}

impl std::str::FromStr for LineEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(LineEncoding::Utf8),
            "windows-1251" | "windows1251" | "cp1251" => Ok(LineEncoding::Windows1251),
            other => Err(format!("unknown line encoding: {other}")),
        }
    }
}

/// Serializes `command` into one newline-terminated frame.
pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(command).map_err(Error::Encode)?;
    frame.push(LINE_TERMINATOR);
    Ok(frame)
}

pub fn decode_result(line: &[u8], encoding: LineEncoding) -> Result<CommandResult> {
    decode_line(line, encoding)
}

pub fn decode_event(line: &[u8], encoding: LineEncoding) -> Result<Event> {
    decode_line(line, encoding)
}

fn decode_line<T: DeserializeOwned>(line: &[u8], encoding: LineEncoding) -> Result<T> {
    let text = encoding.transcode(trim_terminator(line));
    serde_json::from_slice(&text).map_err(Error::MalformedPayload)
}

/// Appends the next line (terminator included) to `line`, reading at most
/// `limit` bytes. Returns the number of bytes read; `0` means EOF.
///
/// A line that reaches `limit` without a terminator is `InvalidData`: the
/// rest of it is still on the wire, so the stream cannot be resynchronized.
pub async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let read = (&mut *reader)
        .take(limit as u64)
        .read_until(LINE_TERMINATOR, line)
        .await?;
    if read >= limit && line.last() != Some(&LINE_TERMINATOR) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {limit} bytes"),
        ));
    }
    Ok(read)
}

/// Strips one trailing `\n` and an optional `\r` before it.
pub fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// True for lines carrying nothing but whitespace.
pub fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_appends_single_terminator() {
        let cmd = Command::new("ping", Some(json!("Ping")));
        let frame = encode_command(&cmd).unwrap();
        assert_eq!(frame, b"{\"cmd\":\"ping\",\"data\":\"Ping\"}\n");
        assert_eq!(frame.iter().filter(|&&b| b == LINE_TERMINATOR).count(), 1);
    }

    #[test]
    fn embedded_newlines_are_escaped() {
        let cmd = Command::new("sendTransaction", Some(json!({"comment": "a\nb"})));
        let frame = encode_command(&cmd).unwrap();
        assert_eq!(frame.iter().filter(|&&b| b == LINE_TERMINATOR).count(), 1);
        assert_eq!(*frame.last().unwrap(), LINE_TERMINATOR);
    }

    #[test]
    fn encoded_command_decodes_back() {
        let cmd = Command::new(
            "createDataSource",
            Some(json!({"class_code": "TQBR", "ticker": "SBER", "interval": 1})),
        );
        let frame = encode_command(&cmd).unwrap();
        let back: Command = serde_json::from_slice(trim_terminator(&frame)).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn decode_result_handles_crlf() {
        let result = decode_result(b"{\"success\":true,\"message\":\"Ping\"}\r\n", LineEncoding::Utf8)
            .unwrap();
        assert!(result.success);
        assert_eq!(result.message, "Ping");
    }

    #[test]
    fn decode_rejects_wrong_schema() {
        let err = decode_result(b"{\"message\":\"no success flag\"}\n", LineEncoding::Utf8)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));

        let err = decode_event(b"not json\n", LineEncoding::Utf8).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn windows_1251_is_transcoded() {
        // "Ошибка" in Windows-1251.
        let mut line = b"{\"success\":false,\"message\":\"".to_vec();
        line.extend_from_slice(&[0xCE, 0xF8, 0xE8, 0xE1, 0xEA, 0xE0]);
        line.extend_from_slice(b"\"}\n");

        let result = decode_result(&line, LineEncoding::Windows1251).unwrap();
        assert_eq!(result.message, "Ошибка");

        let err = decode_result(&line, LineEncoding::Utf8).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn windows_1251_ascii_passes_through() {
        let line = b"{\"cmd\":\"OnTrade\",\"t\":5,\"data\":null}\n";
        let event = decode_event(line, LineEncoding::Windows1251).unwrap();
        assert_eq!(event.name, "OnTrade");
        assert_eq!(event.timestamp, 5);
    }

    #[tokio::test]
    async fn read_line_stops_at_terminator() {
        let mut input: &[u8] = b"{\"cmd\":\"a\"}\n{\"cmd\":\"b\"}\n";
        let mut line = Vec::new();

        let read = read_line(&mut input, &mut line, 64).await.unwrap();
        assert_eq!(read, 12);
        assert_eq!(line, b"{\"cmd\":\"a\"}\n");

        line.clear();
        read_line(&mut input, &mut line, 64).await.unwrap();
        assert_eq!(line, b"{\"cmd\":\"b\"}\n");

        line.clear();
        assert_eq!(read_line(&mut input, &mut line, 64).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_line_rejects_overlong_line() {
        let long = vec![b'x'; 100];
        let mut input: &[u8] = &long;
        let mut line = Vec::new();

        let err = read_line(&mut input, &mut line, 32).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(line.len(), 32);

        // Exactly at the limit, terminator included, is fine.
        let mut input: &[u8] = b"0123456\n";
        line.clear();
        assert_eq!(read_line(&mut input, &mut line, 8).await.unwrap(), 8);
    }

    #[test]
    fn parse_encoding_names() {
        assert_eq!("cp1251".parse::<LineEncoding>().unwrap(), LineEncoding::Windows1251);
        assert_eq!("UTF-8".parse::<LineEncoding>().unwrap(), LineEncoding::Utf8);
        assert!("koi8-r".parse::<LineEncoding>().is_err());
    }
}
