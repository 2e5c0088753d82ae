//! Speaker-tagged transcript parsing
//!
//! The provider delivers the whole conversation as text, one turn per line:
//!
//! ```text
//! assistant: Hi, this is Maya from Acme.
//! user: Hello?
//! ```

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{NewTranscript, Speaker, TranscriptSegment};

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(assistant|user):\s*(.+)$").expect("transcript pattern is valid")
    })
}

/// Split raw transcript text into segments, dropping lines that are not a
/// `speaker: message` turn.
pub fn parse_transcript(raw: &str) -> Vec<TranscriptSegment> {
    let pattern = line_pattern();

    raw.lines()
        .map(|line| line.trim_end_matches('\r').trim())
        .filter_map(|line| {
            let caps = pattern.captures(line)?;
            let speaker = match &caps[1] {
                "assistant" => Speaker::Agent,
                _ => Speaker::User,
            };
            let text = caps[2].trim();
            if text.is_empty() {
                return None;
            }
            Some((speaker, text.to_string()))
        })
        .enumerate()
        .map(|(index, (speaker, text))| TranscriptSegment { speaker, text, index })
        .collect()
}

/// Build a transcript for storage, or `None` if the text holds no turns.
pub fn build_transcript(raw: Option<&str>) -> Option<NewTranscript> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let segments = parse_transcript(raw);
    if segments.is_empty() {
        tracing::warn!("Transcript had no parseable turns ({} chars)", raw.len());
    }
    Some(NewTranscript {
        content: raw.to_string(),
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_turns_in_order() {
        let segments = parse_transcript("assistant: X\nuser: Y");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].speaker, Speaker::Agent);
        assert_eq!(segments[0].text, "X");
        assert_eq!(segments[1].speaker, Speaker::User);
        assert_eq!(segments[1].text, "Y");
        assert_eq!(segments[1].index, 1);
    }

    #[test]
    fn test_malformed_lines_dropped() {
        let raw = "assistant: Hello there\n\nnoise without speaker\nsystem: hidden\nuser:\nuser: Sure, go ahead\r\n";
        let segments = parse_transcript(raw);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello there");
        assert_eq!(segments[1].text, "Sure, go ahead");
        assert_eq!(segments[1].index, 1);
    }

    #[test]
    fn test_message_may_contain_colons() {
        let segments = parse_transcript("user: call me at 5:30: tomorrow");
        assert_eq!(segments[0].text, "call me at 5:30: tomorrow");
    }

    #[test]
    fn test_build_transcript_skips_blank() {
        assert!(build_transcript(None).is_none());
        assert!(build_transcript(Some("   ")).is_none());
        let transcript = build_transcript(Some("assistant: hi")).unwrap();
        assert_eq!(transcript.segments.len(), 1);
    }
}
