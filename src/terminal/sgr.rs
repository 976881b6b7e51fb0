//! Interpretation of decoded escape sequences.
//!
//! Only Select Graphic Rendition (`m`, or BEL for OSC) is acted on: the
//! arguments are resolved into a foreground and background code. Everything
//! else is reported as [`EscapeCommand::Unhandled`] and dropped by the sink.

use tracing::debug;

use super::decoder::{BEL, EscapeSequence};

pub const DEFAULT_FOREGROUND: &str = "37";
pub const DEFAULT_BACKGROUND: &str = "40";

/// The eight base colours of the classic SGR palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    Gray,
}

impl NamedColor {
    const PALETTE: [NamedColor; 8] = [
        NamedColor::Black,
        NamedColor::Red,
        NamedColor::Green,
        NamedColor::Yellow,
        NamedColor::Blue,
        NamedColor::Magenta,
        NamedColor::Cyan,
        NamedColor::Gray,
    ];

    fn from_code(code: &str, base: u8) -> Option<Self> {
        let value: u8 = code.parse().ok()?;
        let index = value.checked_sub(base)?;
        Self::PALETTE.get(usize::from(index)).copied()
    }

    /// `30`..=`37`.
    pub fn from_foreground_code(code: &str) -> Option<Self> {
        Self::from_code(code, 30)
    }

    /// `40`..=`47`.
    pub fn from_background_code(code: &str) -> Option<Self> {
        Self::from_code(code, 40)
    }

    pub fn to_crossterm(self) -> crossterm::style::Color {
        use crossterm::style::Color;
        match self {
            Self::Black => Color::Black,
            Self::Red => Color::Red,
            Self::Green => Color::Green,
            Self::Yellow => Color::Yellow,
            Self::Blue => Color::Blue,
            Self::Magenta => Color::Magenta,
            Self::Cyan => Color::Cyan,
            Self::Gray => Color::Grey,
        }
    }
}

fn is_foreground_code(code: &str) -> bool {
    NamedColor::from_foreground_code(code).is_some()
}

fn is_background_code(code: &str) -> bool {
    NamedColor::from_background_code(code).is_some()
}

/// A resolved SGR command.
///
/// `foreground`/`background` hold the raw argument selected for that slot;
/// codes outside the palette resolve to no colour, leaving the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgrCommand {
    pub arguments: Vec<String>,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

impl SgrCommand {
    fn resolve(arguments: Vec<String>) -> Self {
        let (foreground, background) = match arguments.as_slice() {
            [] => (Some(DEFAULT_FOREGROUND), Some(DEFAULT_BACKGROUND)),
            [only] if only == "0" => (Some(DEFAULT_FOREGROUND), Some(DEFAULT_BACKGROUND)),
            [only] if is_foreground_code(only) => (Some(only.as_str()), None),
            [only] if is_background_code(only) => (None, Some(only.as_str())),
            [_] => (None, None),
            [first, second] => (
                Some(second.as_str()),
                is_background_code(first).then_some(first.as_str()),
            ),
            [first, second, _] => (Some(second.as_str()), Some(first.as_str())),
            // Longer parameter lists are left alone.
            _ => (None, None),
        };
        Self {
            foreground: foreground.map(str::to_string),
            background: background.map(str::to_string),
            arguments,
        }
    }

    pub fn is_reset(&self) -> bool {
        self.arguments.is_empty() || self.arguments == ["0"]
    }

    pub fn foreground_color(&self) -> Option<NamedColor> {
        self.foreground
            .as_deref()
            .and_then(NamedColor::from_foreground_code)
    }

    pub fn background_color(&self) -> Option<NamedColor> {
        self.background
            .as_deref()
            .and_then(NamedColor::from_background_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscapeCommand {
    Sgr(SgrCommand),
    Unhandled { text: String, bytes: Vec<u8> },
}

/// Arguments between the introducer and the final byte, split on `;`.
pub fn arguments_of(text: &str) -> Vec<String> {
    let body = text.trim_start_matches(['[', ']']);
    let mut chars = body.chars();
    chars.next_back();
    chars
        .as_str()
        .split(';')
        .filter(|arg| !arg.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn interpret(sequence: &EscapeSequence) -> EscapeCommand {
    let text = sequence.text();
    match sequence.terminator() {
        b'm' | BEL => EscapeCommand::Sgr(SgrCommand::resolve(arguments_of(&text))),
        _ => {
            debug!(
                text = %text.escape_debug(),
                bytes = ?sequence.bytes(),
                "Unhandled escape sequence"
            );
            EscapeCommand::Unhandled {
                text,
                bytes: sequence.bytes().to_vec(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::decoder::{DecodedEvent, EscapeDecoder};

    fn command_for(input: &[u8]) -> EscapeCommand {
        let mut decoder = EscapeDecoder::new();
        let events = decoder.decode(input);
        match events.as_slice() {
            [DecodedEvent::Sequence(seq)] => interpret(seq),
            other => panic!("expected one sequence, got {other:?}"),
        }
    }

    fn sgr(input: &[u8]) -> SgrCommand {
        match command_for(input) {
            EscapeCommand::Sgr(cmd) => cmd,
            other => panic!("expected SGR, got {other:?}"),
        }
    }

    #[test]
    fn single_foreground_argument() {
        let cmd = sgr(b"\x1b[32m");
        assert_eq!(cmd.arguments, vec!["32".to_string()]);
        assert_eq!(cmd.foreground.as_deref(), Some("32"));
        assert_eq!(cmd.background, None);
        assert_eq!(cmd.foreground_color(), Some(NamedColor::Green));
    }

    #[test]
    fn single_background_argument() {
        let cmd = sgr(b"\x1b[44m");
        assert_eq!(cmd.foreground, None);
        assert_eq!(cmd.background_color(), Some(NamedColor::Blue));
    }

    #[test]
    fn background_then_foreground() {
        let cmd = sgr(b"\x1b[41;33m");
        assert_eq!(cmd.background.as_deref(), Some("41"));
        assert_eq!(cmd.foreground.as_deref(), Some("33"));
        assert_eq!(cmd.background_color(), Some(NamedColor::Red));
        assert_eq!(cmd.foreground_color(), Some(NamedColor::Yellow));
    }

    #[test]
    fn attribute_then_foreground_keeps_background() {
        let cmd = sgr(b"\x1b[01;34m");
        assert_eq!(cmd.foreground_color(), Some(NamedColor::Blue));
        assert_eq!(cmd.background, None);
    }

    #[test]
    fn three_arguments() {
        let cmd = sgr(b"\x1b[40;37;1m");
        assert_eq!(cmd.background_color(), Some(NamedColor::Black));
        assert_eq!(cmd.foreground_color(), Some(NamedColor::Gray));
    }

    #[test]
    fn four_or_more_arguments_leave_colors_unchanged() {
        for input in [&b"\x1b[40;37;1;4m"[..], b"\x1b[38;5;196;48;5;21m"] {
            let cmd = sgr(input);
            assert!(cmd.arguments.len() > 3);
            assert_eq!(cmd.foreground, None);
            assert_eq!(cmd.background, None);
            assert!(!cmd.is_reset());
        }
    }

    #[test]
    fn reset_forms() {
        for input in [&b"\x1b[m"[..], b"\x1b[0m"] {
            let cmd = sgr(input);
            assert!(cmd.is_reset());
            assert_eq!(cmd.foreground.as_deref(), Some(DEFAULT_FOREGROUND));
            assert_eq!(cmd.background.as_deref(), Some(DEFAULT_BACKGROUND));
        }
    }

    #[test]
    fn out_of_palette_code_leaves_colour() {
        let cmd = sgr(b"\x1b[1m");
        assert_eq!(cmd.foreground_color(), None);
        assert_eq!(cmd.background_color(), None);
        let cmd = sgr(b"\x1b[0;90m");
        assert_eq!(cmd.foreground.as_deref(), Some("90"));
        assert_eq!(cmd.foreground_color(), None);
    }

    #[test]
    fn osc_title_is_treated_as_sgr_without_colours() {
        let cmd = sgr(b"\x1b]0;pi@raspberrypi: ~\x07");
        assert_eq!(cmd.foreground_color(), None);
        assert_eq!(cmd.background_color(), None);
    }

    #[test]
    fn other_commands_are_unhandled() {
        match command_for(b"\x1b[2J") {
            EscapeCommand::Unhandled { text, bytes } => {
                assert_eq!(text, "[2J");
                assert_eq!(bytes, b"[2J");
            }
            other => panic!("expected unhandled, got {other:?}"),
        }
    }

    #[test]
    fn empty_arguments_are_dropped() {
        assert_eq!(arguments_of("[;;32;m"), vec!["32".to_string()]);
        assert!(arguments_of("[m").is_empty());
    }
}
