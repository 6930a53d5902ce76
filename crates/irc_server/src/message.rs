//! Per-client frame buffer and line parser (§4.1).
//!
//! The frame buffer accumulates raw bytes read from a nonblocking socket and
//! splits them into complete `CRLF`-terminated lines. Each complete line is
//! then parsed into a [`ParsedMessage`] using the RFC 2812 grammar fragments
//! in [`crate::parsers`].

use crate::errors::CommandError;
use crate::parsers::{middle_parser, nickname_parser, trailing_parser, user_parser};
use nom::{
    IResult, Parser,
    branch::alt,
    character::complete::{char, satisfy},
    combinator::{opt, recognize},
    multi::{count, many0, many_m_n},
    sequence::{pair, preceded},
};

/// One fully parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl ParsedMessage {
    /// All parameters, trailing included, in wire order. Handlers are
    /// written against this rather than against `params`/`trailing`
    /// separately — most commands don't care which form carried a value.
    pub fn all_params(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.params.iter().map(String::as_str).collect();
        if let Some(t) = &self.trailing {
            out.push(t.as_str());
        }
        out
    }
}

fn prefix_parser(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(pair(
            nickname_parser,
            opt(pair(
                opt(preceded(char('!'), user_parser)),
                preceded(char('@'), middle_parser),
            )),
        )),
        middle_parser,
    ))
    .parse(input)
}

fn command_token_parser(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(many_m_n(
            1,
            usize::MAX,
            satisfy(|c: char| c.is_ascii_alphabetic()),
        )),
        recognize(count(satisfy(|c: char| c.is_ascii_digit()), 3)),
    ))
    .parse(input)
}

fn params_parser(input: &str) -> IResult<&str, (Vec<&str>, Option<&str>)> {
    let (rest, middles) = many0(preceded(char(' '), middle_parser_not_colon)).parse(input)?;
    let (rest, trailing) =
        opt(preceded(pair(char(' '), char(':')), trailing_parser)).parse(rest)?;
    Ok((rest, (middles, trailing)))
}

/// `middle` must not itself start with ':' — that byte introduces a trailing
/// parameter instead. Guard explicitly so `:trailing text` is never
/// swallowed as a `middle`.
fn middle_parser_not_colon(input: &str) -> IResult<&str, &str> {
    if input.starts_with(':') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }
    middle_parser(input)
}

fn terminated_prefix(input: &str) -> IResult<&str, &str> {
    let (rest, p) = prefix_parser(input)?;
    let (rest, _) = char(' ')(rest)?;
    Ok((rest, p))
}

fn line_parser(input: &str) -> IResult<&str, ParsedMessage> {
    let (rest, prefix) = opt(preceded(char(':'), terminated_prefix)).parse(input)?;
    let (rest, command) = command_token_parser(rest)?;
    let (rest, (middles, trailing)) = params_parser(rest)?;
    Ok((
        rest,
        ParsedMessage {
            prefix: prefix.map(str::to_owned),
            command: command.to_ascii_uppercase(),
            params: middles.into_iter().map(str::to_owned).collect(),
            trailing: trailing.map(str::to_owned),
        },
    ))
}

/// Parses one line (without its trailing CRLF, already stripped by the
/// [`FrameBuffer`]). Returns `None` on a malformed or empty line — the
/// dispatcher never disconnects for this, it just drops the line (§4.1).
pub fn parse_line(line: &str) -> Option<ParsedMessage> {
    if line.is_empty() {
        return None;
    }
    match line_parser(line) {
        Ok((_rest, msg)) => Some(msg),
        Err(_) => None,
    }
}

/// Accumulates inbound bytes for one client and yields complete lines.
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_line_len: usize,
}

impl FrameBuffer {
    pub fn new(max_line_len: usize) -> Self {
        FrameBuffer {
            buf: Vec::new(),
            max_line_len,
        }
    }

    /// Appends freshly read bytes and extracts every complete `CRLF`-delimited
    /// line now available. A line (with its terminator) exceeding
    /// `max_line_len` truncates the buffer and reports
    /// [`CommandError::LineTooLong`] — but the lines already extracted from
    /// earlier in the same `feed` call are still returned, never discarded.
    pub fn feed(&mut self, data: &[u8]) -> (Vec<String>, Option<CommandError>) {
        self.buf.extend_from_slice(data);

        let mut lines = Vec::new();
        loop {
            let Some(pos) = find_crlf(&self.buf) else {
                break;
            };
            let line_len = pos + 2;
            if line_len > self.max_line_len {
                self.buf.drain(..line_len);
                return (lines, Some(CommandError::LineTooLong));
            }
            let raw: Vec<u8> = self.buf.drain(..line_len).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 2]).into_owned();
            lines.push(text);
        }

        if self.buf.len() > self.max_line_len {
            self.buf.clear();
            return (lines, Some(CommandError::LineTooLong));
        }

        (lines, None)
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_buffer_splits_whole_lines_and_keeps_partial() {
        let mut fb = FrameBuffer::new(512);
        let (lines, err) = fb.feed(b"NICK alice\r\nUSER a 0");
        assert!(err.is_none());
        assert_eq!(lines, vec!["NICK alice".to_owned()]);
        let (lines, err) = fb.feed(b" * :Alice\r\n");
        assert!(err.is_none());
        assert_eq!(lines, vec!["USER a 0 * :Alice".to_owned()]);
    }

    #[test]
    fn frame_buffer_rejects_overlong_line() {
        let mut fb = FrameBuffer::new(16);
        let overlong = format!("PRIVMSG #x :{}\r\n", "a".repeat(64));
        let (lines, err) = fb.feed(overlong.as_bytes());
        assert!(lines.is_empty());
        assert_eq!(err, Some(CommandError::LineTooLong));
    }

    #[test]
    fn frame_buffer_keeps_earlier_lines_when_a_later_one_is_overlong() {
        let mut fb = FrameBuffer::new(16);
        let overlong = format!("PRIVMSG #x :{}\r\n", "a".repeat(64));
        let input = format!("NICK alice\r\n{overlong}");
        let (lines, err) = fb.feed(input.as_bytes());
        assert_eq!(lines, vec!["NICK alice".to_owned()]);
        assert_eq!(err, Some(CommandError::LineTooLong));
    }

    #[test]
    fn frame_buffer_accepts_exactly_512_bytes() {
        let mut fb = FrameBuffer::new(512);
        let prefix = "PRIVMSG #x :";
        let body_len = 512 - prefix.len() - 2; // minus CRLF
        let line = format!("{prefix}{}\r\n", "a".repeat(body_len));
        assert_eq!(line.len(), 512);
        let (lines, err) = fb.feed(line.as_bytes());
        assert!(err.is_none());
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn parses_simple_command_no_prefix() {
        let msg = parse_line("NICK alice").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.params, vec!["alice".to_owned()]);
        assert_eq!(msg.trailing, None);
    }

    #[test]
    fn parses_trailing_with_spaces() {
        let msg = parse_line("PRIVMSG #general :hello there friend").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#general".to_owned()]);
        assert_eq!(msg.trailing.as_deref(), Some("hello there friend"));
    }

    #[test]
    fn parses_prefix_and_numeric_command() {
        let msg = parse_line(":alice!a@host 001 alice :Welcome").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("alice!a@host"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.trailing.as_deref(), Some("Welcome"));
    }

    #[test]
    fn lowercases_are_uppercased_for_dispatch() {
        let msg = parse_line("join #general").unwrap();
        assert_eq!(msg.command, "JOIN");
    }

    #[test]
    fn empty_line_yields_none() {
        assert!(parse_line("").is_none());
    }

    #[test]
    fn malformed_line_yields_none_not_a_panic() {
        assert!(parse_line(":").is_none());
    }
}
