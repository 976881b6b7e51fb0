//! Byte-level classification of pseudo-terminal output.
//!
//! The decoder is a two-state machine (`Normal`, `InEscape`). In `Normal`
//! every byte is reported as a printable character, a bell, or an
//! unprintable control byte; ESC switches to `InEscape`, where bytes are
//! accumulated until the sequence terminator:
//!
//! - `ESC [` (CSI) ends at the first byte in `0x40..=0x7E`
//! - `ESC ]` (OSC) ends at BEL (`0x07`)
//!
//! Any other byte after ESC leaves the sequence unclassified; it keeps
//! accumulating until a later `ESC [`/`ESC ]` inside it terminates.

use tracing::trace;

pub const ESC: u8 = 0x1b;
pub const BEL: u8 = 0x07;

/// Byte following ESC that classifies a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Introducer {
    /// `[`
    Csi,
    /// `]`
    Osc,
}

impl Introducer {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'[' => Some(Self::Csi),
            b']' => Some(Self::Osc),
            _ => None,
        }
    }

    fn terminates(self, byte: u8) -> bool {
        match self {
            Self::Csi => (64..=126).contains(&byte),
            Self::Osc => byte == BEL,
        }
    }
}

/// A complete escape sequence, without the leading ESC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscapeSequence {
    bytes: Vec<u8>,
    introducer: Introducer,
}

impl EscapeSequence {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn introducer(&self) -> Introducer {
        self.introducer
    }

    /// The sequence as ASCII text (non-ASCII bytes replaced).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Final byte, which selects the command.
    pub fn terminator(&self) -> u8 {
        self.bytes.last().copied().unwrap_or_default()
    }
}

/// One decoded unit of terminal output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// Printable byte (`>= 32`) or formatting control in `8..=13`.
    Char(u8),
    /// BEL outside an escape sequence.
    Bell,
    /// Any other control byte outside an escape sequence.
    Unprintable(u8),
    /// A terminated escape sequence.
    Sequence(EscapeSequence),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    InEscape,
}

#[derive(Debug)]
pub struct EscapeDecoder {
    state: State,
    buffer: Vec<u8>,
    introducer: Option<Introducer>,
    previous: u8,
}

impl Default for EscapeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EscapeDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Normal,
            buffer: Vec::with_capacity(128),
            introducer: None,
            previous: 0,
        }
    }

    pub fn is_in_escape(&self) -> bool {
        self.state == State::InEscape
    }

    /// Bytes of the escape sequence currently being accumulated.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any partial sequence and return to `Normal`.
    pub fn reset(&mut self) {
        self.state = State::Normal;
        self.buffer.clear();
        self.introducer = None;
        self.previous = 0;
    }

    /// Decode `bytes`, handing each event to `emit` as it is recognized.
    ///
    /// State carries over between calls, so a sequence split across reads is
    /// reported once complete.
    pub fn feed(&mut self, bytes: &[u8], mut emit: impl FnMut(DecodedEvent)) {
        for &byte in bytes {
            if let Some(event) = self.push(byte) {
                emit(event);
            }
        }
    }

    /// Convenience wrapper around [`feed`](Self::feed) collecting the events.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<DecodedEvent> {
        let mut events = Vec::new();
        self.feed(bytes, |event| events.push(event));
        events
    }

    fn push(&mut self, byte: u8) -> Option<DecodedEvent> {
        match self.state {
            State::Normal => self.push_normal(byte),
            State::InEscape => self.push_escape(byte),
        }
    }

    fn push_normal(&mut self, byte: u8) -> Option<DecodedEvent> {
        self.previous = byte;
        match byte {
            ESC => {
                self.state = State::InEscape;
                self.buffer.clear();
                self.introducer = None;
                None
            }
            b if b >= 32 || (8..=13).contains(&b) => Some(DecodedEvent::Char(b)),
            BEL => Some(DecodedEvent::Bell),
            b => {
                trace!(byte = b, "non-printing byte");
                Some(DecodedEvent::Unprintable(b))
            }
        }
    }

    fn push_escape(&mut self, byte: u8) -> Option<DecodedEvent> {
        self.buffer.push(byte);

        if self.previous == ESC {
            self.previous = byte;
            self.introducer = Introducer::from_byte(byte);
            if self.introducer.is_some() {
                return None;
            }
        }
        self.previous = byte;

        let introducer = self.introducer?;
        if !introducer.terminates(byte) {
            return None;
        }

        // Leave `InEscape` before the sequence is handed on, so nothing the
        // handler does can keep the decoder stuck.
        let bytes = std::mem::take(&mut self.buffer);
        self.state = State::Normal;
        self.introducer = None;
        Some(DecodedEvent::Sequence(EscapeSequence { bytes, introducer }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(events: &[DecodedEvent]) -> &EscapeSequence {
        match events.last() {
            Some(DecodedEvent::Sequence(seq)) => seq,
            other => panic!("expected a sequence, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_passes_through() {
        let mut decoder = EscapeDecoder::new();
        let events = decoder.decode(b"ok\r\n");
        assert_eq!(
            events,
            vec![
                DecodedEvent::Char(b'o'),
                DecodedEvent::Char(b'k'),
                DecodedEvent::Char(b'\r'),
                DecodedEvent::Char(b'\n'),
            ]
        );
    }

    #[test]
    fn control_bytes_are_classified() {
        let mut decoder = EscapeDecoder::new();
        let events = decoder.decode(&[7, 8, 13, 0, 31]);
        assert_eq!(
            events,
            vec![
                DecodedEvent::Bell,
                DecodedEvent::Char(8),
                DecodedEvent::Char(13),
                DecodedEvent::Unprintable(0),
                DecodedEvent::Unprintable(31),
            ]
        );
    }

    #[test]
    fn csi_sequence_excludes_escape_byte() {
        let mut decoder = EscapeDecoder::new();
        let events = decoder.decode(b"\x1b[32m");
        assert_eq!(events.len(), 1);
        let seq = sequence(&events);
        assert_eq!(seq.bytes(), b"[32m");
        assert_eq!(seq.introducer(), Introducer::Csi);
        assert_eq!(seq.terminator(), b'm');
        assert!(!decoder.is_in_escape());
    }

    #[test]
    fn csi_split_across_reads() {
        let mut decoder = EscapeDecoder::new();
        assert!(decoder.decode(b"\x1b[4").is_empty());
        assert!(decoder.is_in_escape());
        assert_eq!(decoder.pending(), b"[4");
        let events = decoder.decode(b"1;33mX");
        assert_eq!(sequence(&events[..1]).bytes(), b"[41;33m");
        assert_eq!(events[1], DecodedEvent::Char(b'X'));
    }

    #[test]
    fn osc_ends_only_at_bell() {
        let mut decoder = EscapeDecoder::new();
        let events = decoder.decode(b"\x1b]0;user@host: ~/app ABCmz\x07");
        assert_eq!(events.len(), 1);
        let seq = sequence(&events);
        assert_eq!(seq.introducer(), Introducer::Osc);
        assert_eq!(seq.terminator(), BEL);
        assert!(!decoder.is_in_escape());
    }

    #[test]
    fn unclassified_escape_waits_for_next_introducer() {
        let mut decoder = EscapeDecoder::new();
        // ESC 7 (save cursor) has no introducer and never terminates by itself.
        assert!(decoder.decode(b"\x1b7abc").is_empty());
        assert!(decoder.is_in_escape());
        let events = decoder.decode(b"\x1b[0m");
        assert_eq!(sequence(&events).bytes(), b"7abc\x1b[0m");
        assert!(!decoder.is_in_escape());
    }

    #[test]
    fn reset_discards_partial_sequence() {
        let mut decoder = EscapeDecoder::new();
        decoder.decode(b"\x1b[12");
        decoder.reset();
        assert!(!decoder.is_in_escape());
        assert_eq!(decoder.decode(b"m"), vec![DecodedEvent::Char(b'm')]);
    }
}
