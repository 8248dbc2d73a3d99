//! Stream Normalizer
//!
//! Splits an incrementally delivered raw text stream into answer content and
//! reasoning content.

use std::sync::Arc;

use super::dialect::{scan, DialectTable, NeedleKind, Scan};

/// One classified piece of the raw stream. Never empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedDelta {
    /// Visible answer text
    Content(String),
    /// Reasoning text
    Reasoning(String),
}

impl NormalizedDelta {
    /// The text carried by this delta
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Content(s) | Self::Reasoning(s) => s,
        }
    }

    /// Whether this is reasoning text
    #[must_use]
    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::Reasoning(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Outside any thought
    Answer,
    /// Inside a tagged thought; holds the index of the tag pair
    Tagged(usize),
    /// Inside untagged reasoning found by an onset phrase
    Untagged,
}

/// Classifies one job's raw text stream
///
/// Feed fragments with [`push`](Self::push) and call [`finish`](Self::finish)
/// at end of input. Text that could be the start of a marker is held back
/// until the next fragment disambiguates it, so the concatenated output does
/// not depend on how the input was split.
///
/// Rules:
/// - Dialect tags (`<think>`, `[reasoning]`, ...) are matched
///   case-insensitively and consumed. The first tag seen pins that dialect
///   for the rest of the stream.
/// - Inside a tagged thought only the paired closing tag ends it.
/// - Outside a thought, before any tag or onset has been seen, an onset
///   phrase (`"First,"`, `"Step 1:"`, ...) starts untagged reasoning. The
///   phrase itself is reasoning.
/// - Untagged reasoning ends at the first final-answer marker
///   (`"Therefore,"`, ...), which is kept as content.
/// - A dialect tag inside untagged reasoning still takes over: the text
///   before it stays reasoning and the tag opens a tagged thought.
/// - Reasoning that matches no pattern is classified as content.
#[derive(Debug)]
pub struct StreamNormalizer {
    table: Arc<DialectTable>,
    buffer: String,
    mode: Mode,
    pinned: Option<usize>,
    reasoning_detected: bool,
    finished: bool,
}

impl Default for StreamNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamNormalizer {
    /// Normalizer using the built-in dialect table
    pub fn new() -> Self {
        Self::with_table(DialectTable::builtin())
    }

    /// Normalizer using a custom dialect table
    pub fn with_table(table: Arc<DialectTable>) -> Self {
        Self {
            table,
            buffer: String::new(),
            mode: Mode::Answer,
            pinned: None,
            reasoning_detected: false,
            finished: false,
        }
    }

    /// Feed one raw fragment and collect the deltas it settles
    pub fn push(&mut self, fragment: &str) -> Vec<NormalizedDelta> {
        if self.finished || fragment.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(fragment);
        self.drain(false)
    }

    /// Flush everything still held back. Further pushes are ignored.
    pub fn finish(&mut self) -> Vec<NormalizedDelta> {
        if self.finished {
            return Vec::new();
        }
        let out = self.drain(true);
        self.finished = true;
        out
    }

    /// Release held-back text as it stands, without ending the stream
    ///
    /// Used when something else must be ordered after the text already
    /// received. A marker split across this point is not recognized.
    pub fn flush(&mut self) -> Vec<NormalizedDelta> {
        if self.finished {
            return Vec::new();
        }
        self.drain(true)
    }

    /// Whether the stream is currently inside a thought
    #[must_use]
    pub fn inside_thought(&self) -> bool {
        self.mode != Mode::Answer
    }

    /// Bytes currently held back
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn drain(&mut self, last: bool) -> Vec<NormalizedDelta> {
        let mut out = Deltas::default();
        let table = Arc::clone(&self.table);

        loop {
            let reasoning = self.mode != Mode::Answer;
            let opens = match self.pinned {
                Some(index) => table.open_needle(index),
                None => table.open_needles(),
            };
            let onsets = if self.reasoning_detected {
                &[][..]
            } else {
                table.onset_needles()
            };
            let groups: [&[_]; 2] = match self.mode {
                Mode::Answer => [opens, onsets],
                Mode::Tagged(index) => [table.close_needle(index), &[]],
                Mode::Untagged => [table.marker_needles(), opens],
            };

            match scan(&self.buffer, &groups, last) {
                Scan::Found { at, needle } => {
                    out.push(reasoning, &self.buffer[..at]);
                    let consumed = match needle.kind {
                        NeedleKind::Open(index) => {
                            self.mode = Mode::Tagged(index);
                            self.pinned = Some(index);
                            self.reasoning_detected = true;
                            at + needle.text.len()
                        }
                        NeedleKind::Close(_) => {
                            self.mode = Mode::Answer;
                            at + needle.text.len()
                        }
                        NeedleKind::Onset => {
                            self.mode = Mode::Untagged;
                            self.reasoning_detected = true;
                            at
                        }
                        NeedleKind::Marker => {
                            self.mode = Mode::Answer;
                            at
                        }
                    };
                    self.buffer.drain(..consumed);
                }
                Scan::Pending { at } => {
                    out.push(reasoning, &self.buffer[..at]);
                    self.buffer.drain(..at);
                    break;
                }
                Scan::Clear => {
                    out.push(reasoning, &self.buffer);
                    self.buffer.clear();
                    break;
                }
            }
        }

        out.0
    }
}

/// Delta accumulator that merges adjacent pieces of the same kind
#[derive(Default)]
struct Deltas(Vec<NormalizedDelta>);

impl Deltas {
    fn push(&mut self, reasoning: bool, text: &str) {
        if text.is_empty() {
            return;
        }
        match (self.0.last_mut(), reasoning) {
            (Some(NormalizedDelta::Reasoning(s)), true) | (Some(NormalizedDelta::Content(s)), false) => {
                s.push_str(text);
            }
            (_, true) => self.0.push(NormalizedDelta::Reasoning(text.to_string())),
            (_, false) => self.0.push(NormalizedDelta::Content(text.to_string())),
        }
    }
}

/// Run a whole input through a fresh normalizer and return `(content, reasoning)`
pub fn split_reasoning(raw: &str) -> (String, String) {
    let mut normalizer = StreamNormalizer::new();
    let mut deltas = normalizer.push(raw);
    deltas.extend(normalizer.finish());
    collect(&deltas)
}

/// Concatenate deltas into `(content, reasoning)`
pub fn collect(deltas: &[NormalizedDelta]) -> (String, String) {
    let mut content = String::new();
    let mut reasoning = String::new();
    for delta in deltas {
        match delta {
            NormalizedDelta::Content(s) => content.push_str(s),
            NormalizedDelta::Reasoning(s) => reasoning.push_str(s),
        }
    }
    (content, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::dialect::TagPair;
    use pretty_assertions::assert_eq;

    fn run(fragments: &[&str]) -> (String, String) {
        let mut normalizer = StreamNormalizer::new();
        let mut deltas = Vec::new();
        for fragment in fragments {
            deltas.extend(normalizer.push(fragment));
        }
        deltas.extend(normalizer.finish());
        assert!(deltas.iter().all(|d| !d.text().is_empty()));
        collect(&deltas)
    }

    #[test]
    fn test_plain_content() {
        assert_eq!(run(&["Hello ", "world"]), ("Hello world".into(), String::new()));
    }

    #[test]
    fn test_tag_precedence() {
        let (content, reasoning) = split_reasoning("<think>Step 1: Therefore, X</think>Y");
        assert_eq!(reasoning, "Step 1: Therefore, X");
        assert_eq!(content, "Y");
    }

    #[test]
    fn test_untagged_fallback() {
        let (content, reasoning) = split_reasoning("First, consider A. Therefore, B.");
        assert_eq!(reasoning, "First, consider A. ");
        assert_eq!(content, "Therefore, B.");
    }

    #[test]
    fn test_content_before_tag() {
        let (content, reasoning) = split_reasoning("Sure. <thinking>plan</thinking>Done.");
        assert_eq!(content, "Sure. Done.");
        assert_eq!(reasoning, "plan");
    }

    #[test]
    fn test_tags_case_insensitive() {
        let (content, reasoning) = split_reasoning("<THINK>a</Think>b");
        assert_eq!((content.as_str(), reasoning.as_str()), ("b", "a"));
    }

    #[test]
    fn test_bracket_dialect() {
        let (content, reasoning) = split_reasoning("[reasoning]why[/reasoning]what");
        assert_eq!((content.as_str(), reasoning.as_str()), ("what", "why"));
    }

    #[test]
    fn test_only_paired_close_ends_thought() {
        let (content, reasoning) = split_reasoning("<think>a</thought>b</think>c");
        assert_eq!(reasoning, "a</thought>b");
        assert_eq!(content, "c");
    }

    #[test]
    fn test_tag_after_onset_opens_thought() {
        let input = "Step 1: foo <think>x</think>y";
        let expected = ("y".to_string(), "Step 1: foo x".to_string());
        assert_eq!(split_reasoning(input), expected);

        for split in 1..input.len() {
            let (head, tail) = input.split_at(split);
            assert_eq!(run(&[head, tail]), expected, "split at {split}");
        }
    }

    #[test]
    fn test_flush_releases_partial_tag_and_continues() {
        let mut normalizer = StreamNormalizer::new();
        assert_eq!(normalizer.push("a <thi"), vec![NormalizedDelta::Content("a ".into())]);
        assert_eq!(normalizer.flush(), vec![NormalizedDelta::Content("<thi".into())]);
        assert_eq!(normalizer.pending_len(), 0);

        let mut deltas = normalizer.push("<think>b</think>c");
        deltas.extend(normalizer.finish());
        assert_eq!(collect(&deltas), ("c".into(), "b".into()));
    }

    #[test]
    fn test_first_dialect_is_pinned() {
        let (content, reasoning) = split_reasoning("<think>a</think>b[thought]c[/thought]");
        assert_eq!(reasoning, "a");
        assert_eq!(content, "b[thought]c[/thought]");
    }

    #[test]
    fn test_multiple_thoughts() {
        let (content, reasoning) = split_reasoning("<think>a</think>b<think>c</think>d");
        assert_eq!((content.as_str(), reasoning.as_str()), ("bd", "ac"));
    }

    #[test]
    fn test_onset_ignored_after_tag() {
        let (content, reasoning) = split_reasoning("<think>x</think>First, the answer.");
        assert_eq!(reasoning, "x");
        assert_eq!(content, "First, the answer.");
    }

    #[test]
    fn test_onset_fires_once() {
        let (content, reasoning) =
            split_reasoning("Let me think. Therefore, yes. First, another point.");
        assert_eq!(reasoning, "Let me think. ");
        assert_eq!(content, "Therefore, yes. First, another point.");
    }

    #[test]
    fn test_unterminated_thought_flushes_as_reasoning() {
        assert_eq!(run(&["<think>still going</thi"]), (String::new(), "still going</thi".into()));
    }

    #[test]
    fn test_partial_start_tag_flushed_as_content() {
        assert_eq!(run(&["a <thin"]), ("a <thin".into(), String::new()));
    }

    #[test]
    fn test_partial_tag_withheld_until_next_fragment() {
        let mut normalizer = StreamNormalizer::new();
        assert_eq!(normalizer.push("hi <th"), vec![NormalizedDelta::Content("hi ".into())]);
        assert_eq!(normalizer.pending_len(), 3);
        assert_eq!(normalizer.push("ink>r"), vec![NormalizedDelta::Reasoning("r".into())]);
        assert!(normalizer.inside_thought());
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let mut normalizer = StreamNormalizer::new();
        assert!(normalizer.push("").is_empty());
        assert!(normalizer.finish().is_empty());
    }

    #[test]
    fn test_push_after_finish_ignored() {
        let mut normalizer = StreamNormalizer::new();
        normalizer.push("a");
        normalizer.finish();
        assert!(normalizer.push("b").is_empty());
        assert!(normalizer.finish().is_empty());
    }

    #[test]
    fn test_untagged_reasoning_without_marker() {
        let (content, reasoning) = split_reasoning("Step 1: add. Step 2: carry.");
        assert_eq!(content, "");
        assert_eq!(reasoning, "Step 1: add. Step 2: carry.");
    }

    #[test]
    fn test_unrecognized_reasoning_is_content() {
        let (content, reasoning) = split_reasoning("Hmm, maybe A. So B.");
        assert_eq!(content, "Hmm, maybe A. So B.");
        assert_eq!(reasoning, "");
    }

    #[test]
    fn test_custom_table() {
        let table = Arc::new(DialectTable::new(
            vec![TagPair::new("<scratch>", "</scratch>")],
            vec![],
            vec![],
        ));
        let mut normalizer = StreamNormalizer::with_table(table);
        let mut deltas = normalizer.push("<scratch>s</scratch><think>t</think>");
        deltas.extend(normalizer.finish());
        assert_eq!(collect(&deltas), ("<think>t</think>".into(), "s".into()));
    }

    #[test]
    fn test_every_split_point_matches_single_pass() {
        let inputs = [
            "<think>Step 1: Therefore, X</think>Y",
            "First, consider A. Therefore, B.",
            "Let me think [thought]inner[/thought] then Therefore, done",
            "plain answer with < and [ brackets",
            "Intro [THINKING]deep[/thinking] outro",
            "To solve this we add. The answer is 4. So the answer is 4.",
            "héllo <reflection>ünïcode</reflection> wörld",
            "<think>unterminated",
        ];
        for input in inputs {
            let expected = split_reasoning(input);
            let boundaries: Vec<usize> = (1..input.len())
                .filter(|i| input.is_char_boundary(*i))
                .collect();
            for &split in &boundaries {
                let (a, b) = input.split_at(split);
                assert_eq!(run(&[a, b]), expected, "split at {split} of {input:?}");
            }
            // One char per fragment
            let chars: Vec<String> = input.chars().map(String::from).collect();
            let fragments: Vec<&str> = chars.iter().map(String::as_str).collect();
            assert_eq!(run(&fragments), expected, "char-by-char {input:?}");
        }
    }
}
