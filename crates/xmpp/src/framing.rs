//! Incremental stanza boundary detection over the inbound byte stream.

use quick_xml::Reader;
use quick_xml::errors::SyntaxError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use tracing::debug;

use crate::error::StanzaError;
use crate::stanza::StanzaNode;

/// Upper bound on buffered bytes that do not yet form a complete stanza.
pub const MAX_STANZA_BUFFER_SIZE: usize = 1024 * 1024;

const STREAM_CLOSE: &[u8] = b"</stream:stream>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The server's stream header; `id` feeds the digest computation.
    Opened { id: Option<String> },
    Stanza(StanzaNode),
    Closed,
}

#[derive(Debug)]
enum Frame {
    Open { id: Option<String>, consumed: usize },
    Close { consumed: usize },
    Element { start: usize, end: usize },
}

#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Returns the next complete stream event, `Ok(None)` when more input is
    /// needed. Elements that frame correctly but fail to parse are skipped.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>, StanzaError> {
        loop {
            self.skip_whitespace();
            if self.buffer.is_empty() {
                return Ok(None);
            }

            let Some(frame) = extract_frame(&self.buffer)? else {
                if self.buffer.len() > MAX_STANZA_BUFFER_SIZE {
                    return Err(StanzaError::BufferOverflow {
                        limit: MAX_STANZA_BUFFER_SIZE,
                    });
                }
                return Ok(None);
            };

            match frame {
                Frame::Open { id, consumed } => {
                    self.buffer.drain(..consumed);
                    return Ok(Some(StreamEvent::Opened { id }));
                }
                Frame::Close { consumed } => {
                    self.buffer.drain(..consumed);
                    return Ok(Some(StreamEvent::Closed));
                }
                Frame::Element { start, end } => {
                    let parsed = std::str::from_utf8(&self.buffer[start..end])
                        .map_err(|error| StanzaError::InvalidUtf8(error.to_string()))
                        .and_then(StanzaNode::parse);
                    self.buffer.drain(..end);
                    match parsed {
                        Ok(node) => return Ok(Some(StreamEvent::Stanza(node))),
                        Err(error) => {
                            debug!(%error, "discarding malformed stanza");
                        }
                    }
                }
            }
        }
    }

    fn skip_whitespace(&mut self) {
        let leading = self
            .buffer
            .iter()
            .take_while(|byte| byte.is_ascii_whitespace())
            .count();
        if leading > 0 {
            self.buffer.drain(..leading);
        }
    }
}

/// `stream:stream`, or `stream` under any other prefix.
fn is_stream_name(name: QName<'_>) -> bool {
    name.as_ref() == b"stream:stream" || name.local_name().as_ref() == b"stream"
}

fn stream_id(start: &BytesStart<'_>) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"id")
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

fn extract_frame(buffer: &[u8]) -> Result<Option<Frame>, StanzaError> {
    if buffer.starts_with(STREAM_CLOSE) {
        return Ok(Some(Frame::Close {
            consumed: STREAM_CLOSE.len(),
        }));
    }

    let mut reader = Reader::from_reader(buffer);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;

    let mut depth: u32 = 0;
    let mut element_start: Option<usize> = None;

    loop {
        let position = reader.buffer_position() as usize;

        match reader.read_event() {
            Ok(Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_)) => {}
            Ok(Event::Start(start)) => {
                if element_start.is_none() && is_stream_name(start.name()) {
                    return Ok(Some(Frame::Open {
                        id: stream_id(&start),
                        consumed: reader.buffer_position() as usize,
                    }));
                }
                depth += 1;
                if depth == 1 {
                    element_start = Some(position);
                }
            }
            Ok(Event::Empty(start)) => {
                if element_start.is_none() {
                    if is_stream_name(start.name()) {
                        return Ok(Some(Frame::Open {
                            id: stream_id(&start),
                            consumed: reader.buffer_position() as usize,
                        }));
                    }
                    return Ok(Some(Frame::Element {
                        start: position,
                        end: reader.buffer_position() as usize,
                    }));
                }
            }
            Ok(Event::Text(_) | Event::CData(_)) => {}
            Ok(Event::End(end)) => {
                if depth == 0 {
                    let name = end.name();
                    if is_stream_name(name) {
                        return Ok(Some(Frame::Close {
                            consumed: reader.buffer_position() as usize,
                        }));
                    }
                    return Err(StanzaError::Parse(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(name.as_ref())
                    )));
                }
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = element_start {
                        return Ok(Some(Frame::Element {
                            start,
                            end: reader.buffer_position() as usize,
                        }));
                    }
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(quick_xml::Error::Syntax(SyntaxError::UnclosedTag)) => return Ok(None),
            Err(quick_xml::Error::Syntax(
                SyntaxError::UnclosedComment
                | SyntaxError::UnclosedCData
                | SyntaxError::UnclosedDoctype
                | SyntaxError::UnclosedPIOrXmlDecl,
            )) => return Ok(None),
            Err(error) => return Err(StanzaError::Parse(error.to_string())),
        }
    }
}
