//! Strips `<!--esi ... -->` passthrough comment markers from the buffered
//! text before the recognizer ever sees them, tolerating the markers
//! straddling chunk boundaries.

use crate::context::StreamerState;

const OPEN_MARKER: &str = "<!--esi";
const CLOSE_MARKER: &str = "-->";

/// Cross-chunk state for the `<!--esi ... -->` stripper.
#[derive(Debug, Default)]
pub struct CommentPreProcessor {
    in_esi_comment: bool,
}

impl CommentPreProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every complete marker pair found in `state.buffered_text`,
    /// carrying an incomplete trailing marker prefix into `postponed_text`.
    pub fn process(&mut self, state: &mut StreamerState) {
        loop {
            let marker = if self.in_esi_comment {
                CLOSE_MARKER
            } else {
                OPEN_MARKER
            };
            match state.buffered_text.find(marker) {
                Some(idx) => {
                    state.buffered_text.drain(idx..idx + marker.len());
                    self.in_esi_comment = !self.in_esi_comment;
                }
                None => {
                    if let Some(tail_len) = trailing_prefix_len(&state.buffered_text, marker) {
                        let split_at = state.buffered_text.len() - tail_len;
                        state.postponed_text = state.buffered_text.split_off(split_at);
                    }
                    break;
                }
            }
        }
    }
}

/// The length of the longest proper prefix of `marker` that `s` ends with.
fn trailing_prefix_len(s: &str, marker: &str) -> Option<usize> {
    for k in (1..marker.len()).rev() {
        if s.ends_with(&marker[..k]) {
            return Some(k);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_a_complete_marker_pair() {
        let mut p = CommentPreProcessor::new();
        let mut s = StreamerState {
            buffered_text: "a<!--esi b -->c".to_string(),
            postponed_text: String::new(),
        };
        p.process(&mut s);
        assert_eq!(s.buffered_text, "a b c");
        assert_eq!(s.postponed_text, "");
    }

    #[test]
    fn carries_incomplete_opener_into_postponed() {
        let mut p = CommentPreProcessor::new();
        let mut s = StreamerState {
            buffered_text: "before<!--es".to_string(),
            postponed_text: String::new(),
        };
        p.process(&mut s);
        assert_eq!(s.buffered_text, "before");
        assert_eq!(s.postponed_text, "<!--es");
    }

    #[test]
    fn carries_incomplete_closer_into_postponed_while_in_comment() {
        let mut p = CommentPreProcessor::new();
        p.in_esi_comment = true;
        let mut s = StreamerState {
            buffered_text: "yo --".to_string(),
            postponed_text: String::new(),
        };
        p.process(&mut s);
        assert_eq!(s.buffered_text, "yo ");
        assert_eq!(s.postponed_text, "--");
    }

    #[test]
    fn splits_across_two_chunks_matching_scenario_s6() {
        let mut p = CommentPreProcessor::new();

        let mut s = StreamerState {
            buffered_text: "<!--esi yo".to_string(),
            postponed_text: String::new(),
        };
        p.process(&mut s);
        assert_eq!(s.buffered_text, " yo");

        let mut s2 = StreamerState {
            buffered_text: s.buffered_text.clone() + " ho -->bar",
            postponed_text: String::new(),
        };
        // second chunk arrives fresh (no prefix carried here, just feeding
        // the continuation text straight through, as context.append would
        // after prepending postponed_text).
        s2.buffered_text = " yo".to_string() + " ho -->bar";
        p.process(&mut s2);
        assert_eq!(s2.buffered_text, " yo ho bar");
    }
}
