mod util;

use proptest::prelude::*;
use sshdeploy::terminal::{
    DecodedEvent, EscapeCommand, EscapeDecoder, NamedColor, SgrCommand, interpret,
};
use util::TestTracing;

fn sequences(input: &[u8]) -> Vec<EscapeCommand> {
    let mut decoder = EscapeDecoder::new();
    decoder
        .decode(input)
        .into_iter()
        .filter_map(|event| match event {
            DecodedEvent::Sequence(seq) => Some(interpret(&seq)),
            _ => None,
        })
        .collect()
}

fn only_sgr(input: &[u8]) -> SgrCommand {
    match sequences(input).as_slice() {
        [EscapeCommand::Sgr(cmd)] => cmd.clone(),
        other => panic!("expected a single SGR command, got {other:?}"),
    }
}

fn printable(events: &[DecodedEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            DecodedEvent::Char(b) => Some(*b),
            _ => None,
        })
        .collect()
}

#[test]
fn green_foreground() {
    let cmd = only_sgr(b"\x1b[32m");
    assert_eq!(cmd.arguments, vec!["32"]);
    assert_eq!(cmd.foreground_color(), Some(NamedColor::Green));
}

#[test]
fn red_background_yellow_foreground() {
    let cmd = only_sgr(b"\x1b[41;33m");
    assert_eq!(cmd.background.as_deref(), Some("41"));
    assert_eq!(cmd.foreground.as_deref(), Some("33"));
}

#[test]
fn colored_prompt_keeps_text_intact() {
    let mut decoder = EscapeDecoder::new();
    let events = decoder.decode(b"\x1b[01;32mpi@raspberrypi\x1b[00m:\x1b[01;34m~ $\x1b[00m ");
    assert_eq!(printable(&events), b"pi@raspberrypi:~ $ ");
    let sequences = events
        .iter()
        .filter(|e| matches!(e, DecodedEvent::Sequence(_)))
        .count();
    assert_eq!(sequences, 4);
}

#[test]
fn osc_title_swallows_csi_terminators() {
    let mut decoder = EscapeDecoder::new();
    let events = decoder.decode(b"\x1b]0;make[1]: Leaving directory\x07done");
    assert!(matches!(events[0], DecodedEvent::Sequence(_)));
    assert_eq!(printable(&events), b"done");
}

#[test]
fn unhandled_sequences_are_logged_at_debug() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();

    let commands = sequences(b"\x1b[2J\x1b[H");
    assert_eq!(commands.len(), 2);
    assert!(
        commands
            .iter()
            .all(|c| matches!(c, EscapeCommand::Unhandled { .. }))
    );
    tracing.assert_contains("Unhandled escape sequence");
}

proptest! {
    #[test]
    fn plain_text_round_trips(text in "[ -~\r\n\t]{0,200}") {
        let mut decoder = EscapeDecoder::new();
        let events = decoder.decode(text.as_bytes());
        prop_assert_eq!(printable(&events), text.as_bytes().to_vec());
        prop_assert!(!decoder.is_in_escape());
    }

    #[test]
    fn chunking_does_not_change_events(
        bytes in proptest::collection::vec(any::<u8>(), 0..300),
        split in 0usize..300,
    ) {
        let split = split.min(bytes.len());
        let mut whole = EscapeDecoder::new();
        let expected = whole.decode(&bytes);

        let mut chunked = EscapeDecoder::new();
        let mut actual = chunked.decode(&bytes[..split]);
        actual.extend(chunked.decode(&bytes[split..]));

        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn csi_always_terminates(params in "[0-9;]{0,12}", last in 0x40u8..=0x7e) {
        let mut input = b"\x1b[".to_vec();
        input.extend_from_slice(params.as_bytes());
        input.push(last);

        let mut decoder = EscapeDecoder::new();
        let events = decoder.decode(&input);
        prop_assert_eq!(events.len(), 1);
        prop_assert!(!decoder.is_in_escape());
    }

    #[test]
    fn single_color_codes_map_to_one_slot(code in 30u8..=47) {
        let input = format!("\x1b[{code}m");
        let cmd = only_sgr(input.as_bytes());
        if code <= 37 {
            prop_assert!(cmd.foreground_color().is_some());
            prop_assert!(cmd.background.is_none());
        } else if code >= 40 {
            prop_assert!(cmd.background_color().is_some());
            prop_assert!(cmd.foreground.is_none());
        } else {
            prop_assert!(cmd.foreground.is_none() && cmd.background.is_none());
        }
    }
}
