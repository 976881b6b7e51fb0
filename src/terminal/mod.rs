//! Remote terminal handling: the escape-sequence decoder, SGR interpretation
//! and the interactive session driver.

pub mod decoder;
pub mod session;
pub mod sgr;

pub use decoder::{DecodedEvent, EscapeDecoder, EscapeSequence, Introducer};
pub use session::{ConsoleSink, DecoderSink, Forwarding, ShellHandle, ShellSession};
pub use sgr::{EscapeCommand, NamedColor, SgrCommand, interpret};
