//! Tests for line reassembly and event decoding over async readers.

use claude_relay::cli::{read_events, StreamEvent, StreamParser};
use tokio_test::io::Builder;

#[tokio::test]
async fn events_split_across_reads() {
    let reader = Builder::new()
        .read(br#"{"type":"system","subt"#)
        .read(br#"ype":"init","session_id":"s1"}"#)
        .read(b"\n{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",")
        .read(b"\"text\":\"hi\"}]}}\n{\"type\":\"result\",\"subtype\":\"success\"}\n")
        .build();

    let events = read_events(reader).await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].session_id(), Some("s1"));
    assert!(matches!(events[1], StreamEvent::Assistant { .. }));
    assert!(events[2].is_terminal());
}

#[tokio::test]
async fn diagnostic_lines_are_skipped() {
    let reader = Builder::new()
        .read(b"Warning: something on stdout\n")
        .read(b"{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s1\"}\n")
        .read(b"{not json at all}\n\n")
        .read(b"{\"type\":\"result\",\"subtype\":\"success\"}\n")
        .build();

    let events = read_events(reader).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events[1].is_terminal());
}

#[tokio::test]
async fn final_line_without_newline_is_decoded() {
    let reader = Builder::new()
        .read(b"{\"type\":\"result\",\"subtype\":\"success\",\"session_id\":\"tail\"}")
        .build();

    let events = read_events(reader).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].session_id(), Some("tail"));
}

#[tokio::test]
async fn truncated_final_line_is_dropped() {
    let reader = Builder::new()
        .read(b"{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s1\"}\n{\"type\":\"res")
        .build();

    let events = read_events(reader).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn parser_counts_discarded_lines() {
    let mut parser = StreamParser::new();
    let events = parser.feed(b"oops\n{\"type\":\"system\",\"subtype\":\"init\"}\nstill not json\n");
    assert_eq!(events.len(), 1);
    assert_eq!(parser.discarded(), 2);
}

#[test]
fn parser_handles_byte_at_a_time_feed() {
    let mut parser = StreamParser::new();
    let input = b"{\"type\":\"result\",\"subtype\":\"success\",\"session_id\":\"x\"}\n";
    let mut events = Vec::new();
    for byte in input {
        events.extend(parser.feed(std::slice::from_ref(byte)));
    }
    assert_eq!(events.len(), 1);
    assert!(events[0].is_terminal());
}

#[test]
fn parser_survives_oversized_line() {
    let mut parser = StreamParser::with_max_line_length(64);
    let mut input = vec![b'x'; 200];
    input.push(b'\n');
    input.extend_from_slice(b"{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s\"}\n");

    let events = parser.feed(&input);
    assert!(parser.discarded() >= 1);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].session_id(), Some("s"));
}
