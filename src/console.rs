//! User-facing status output.
//!
//! Pipeline steps print structured status lines to stdout; failures go to
//! stderr in red. Lines end in `\r\n` because the monitor verb keeps the
//! terminal in raw mode while it waits for keys.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::{Color, Colorize};

static QUIET: AtomicBool = AtomicBool::new(false);

/// Suppress everything except errors.
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::SeqCst);
}

pub fn is_quiet() -> bool {
    QUIET.load(Ordering::SeqCst)
}

fn emit(text: &str, color: Option<Color>) {
    if is_quiet() {
        return;
    }
    let mut out = std::io::stdout().lock();
    let _ = match color {
        Some(color) => write!(out, "{}\r\n", text.color(color)),
        None => write!(out, "{text}\r\n"),
    };
    let _ = out.flush();
}

/// Plain line.
pub fn line(text: &str) {
    emit(text, None);
}

pub fn blank() {
    emit("", None);
}

/// A pipeline step (green, indented).
pub fn step(text: &str) {
    emit(&format!("    {text}"), Some(Color::Green));
}

/// A `label value` parameter line.
pub fn detail(label: &str, value: impl std::fmt::Display) {
    emit(&format!("    {label:<16}{value}"), Some(Color::Yellow));
}

/// Text echoed to or from the remote host.
pub fn transcript(text: &str) {
    emit(text, Some(Color::Yellow));
}

pub fn success(text: &str) {
    emit(text, Some(Color::Green));
}

pub fn warning(text: &str) {
    emit(text, Some(Color::Yellow));
}

pub fn help(text: &str) {
    emit(text, Some(Color::Cyan));
}

pub fn notice(text: &str) {
    emit(text, Some(Color::Red));
}

/// Error channel. Always printed.
pub fn error(text: &str) {
    let mut err = std::io::stderr().lock();
    let _ = write!(err, "{}\r\n", text.red());
    let _ = err.flush();
}

/// Print an error and its cause chain on the error channel.
pub fn error_chain(heading: &str, err: &(dyn std::error::Error + 'static)) {
    error(heading);
    error(&format!("    Error - {}", error_kind(err)));
    error(&format!("    {err}"));
    let mut source = err.source();
    while let Some(cause) = source {
        error(&format!("    caused by: {cause}"));
        source = cause.source();
    }
}

/// Short type-like name of an error, e.g. `RemoteError::Operation`.
fn error_kind(err: &(dyn std::error::Error + 'static)) -> String {
    let debug = format!("{err:?}");
    let end = debug
        .find(|c: char| c == '(' || c == '{' || c == ' ')
        .unwrap_or(debug.len());
    debug[..end].to_string()
}

/// Round a duration to two decimal places of seconds.
pub fn round_seconds(duration: std::time::Duration) -> f64 {
    (duration.as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round_seconds(Duration::from_millis(1234)), 1.23);
        assert_eq!(round_seconds(Duration::from_millis(1236)), 1.24);
        assert_eq!(round_seconds(Duration::ZERO), 0.0);
    }

    #[test]
    fn error_kind_uses_variant_name() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(error_kind(&err), "Custom");
    }
}
