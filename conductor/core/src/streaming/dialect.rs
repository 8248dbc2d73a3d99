//! Reasoning Dialects
//!
//! The marker conventions models use to delimit reasoning text, and the
//! phrases used to guess where untagged reasoning starts and stops.

use std::sync::{Arc, OnceLock};

/// A start/end tag pair such as `<think>` / `</think>`
///
/// Tags are matched case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagPair {
    /// Opening tag
    pub open: String,
    /// Closing tag
    pub close: String,
}

impl TagPair {
    /// Build a pair from its two tags
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

/// What a needle means when it is found in the stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NeedleKind {
    /// Opening tag of `tags[index]`
    Open(usize),
    /// Closing tag of `tags[index]`
    Close(usize),
    /// Untagged reasoning onset phrase
    Onset,
    /// Final-answer phrase that ends untagged reasoning
    Marker,
}

/// A literal searched for in the raw stream
#[derive(Clone, Debug)]
pub(crate) struct Needle {
    pub(crate) text: String,
    pub(crate) kind: NeedleKind,
    pub(crate) fold_case: bool,
}

impl Needle {
    fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether `hay` starts with this needle
    fn matches_at(&self, hay: &[u8]) -> bool {
        let pat = self.text.as_bytes();
        hay.len() >= pat.len() && self.eq_bytes(&hay[..pat.len()], pat)
    }

    /// Whether `hay` is a strict prefix of this needle
    fn is_partial(&self, hay: &[u8]) -> bool {
        let pat = self.text.as_bytes();
        hay.len() < pat.len() && self.eq_bytes(hay, &pat[..hay.len()])
    }

    fn eq_bytes(&self, a: &[u8], b: &[u8]) -> bool {
        if self.fold_case {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }
}

/// Result of scanning a buffer for needles
#[derive(Debug)]
pub(crate) enum Scan<'a> {
    /// A needle matched in full at byte offset `at`
    Found { at: usize, needle: &'a Needle },
    /// The buffer tail from `at` may still become a needle
    Pending { at: usize },
    /// Nothing can match anywhere in the buffer
    Clear,
}

/// Scan `buffer` for the earliest needle from any of `groups`
///
/// Positions are examined in ascending order. At each position a possible
/// partial match (unless `last` is set) wins over a full match, so the
/// outcome never depends on where the input was split. Among full matches
/// at one position the longest wins.
pub(crate) fn scan<'a>(buffer: &str, groups: &[&'a [Needle]], last: bool) -> Scan<'a> {
    let bytes = buffer.as_bytes();
    for at in 0..bytes.len() {
        // Needles are ASCII, so they can only start on a char boundary
        if !bytes[at].is_ascii() {
            continue;
        }
        let rest = &bytes[at..];
        let mut best: Option<&'a Needle> = None;
        let mut pending = false;
        for needle in groups.iter().flat_map(|g| g.iter()) {
            if needle.matches_at(rest) {
                if best.map_or(true, |b| needle.len() > b.len()) {
                    best = Some(needle);
                }
            } else if !last && needle.is_partial(rest) {
                pending = true;
            }
        }
        if pending {
            return Scan::Pending { at };
        }
        if let Some(needle) = best {
            return Scan::Found { at, needle };
        }
    }
    Scan::Clear
}

/// The full set of reasoning conventions a normalizer understands
#[derive(Clone, Debug)]
pub struct DialectTable {
    tags: Vec<TagPair>,
    opens: Vec<Needle>,
    closes: Vec<Needle>,
    onsets: Vec<Needle>,
    markers: Vec<Needle>,
}

impl DialectTable {
    /// Build a table from tag pairs, onset phrases and final-answer markers
    ///
    /// Pairs whose tags are not ASCII are skipped, as are empty phrases.
    pub fn new(tags: Vec<TagPair>, onsets: Vec<String>, markers: Vec<String>) -> Self {
        let tags: Vec<TagPair> = tags
            .into_iter()
            .filter(|t| is_needle_text(&t.open) && is_needle_text(&t.close))
            .collect();
        let opens: Vec<Needle> = tags
            .iter()
            .enumerate()
            .map(|(i, t)| Needle {
                text: t.open.clone(),
                kind: NeedleKind::Open(i),
                fold_case: true,
            })
            .collect();
        let closes: Vec<Needle> = tags
            .iter()
            .enumerate()
            .map(|(i, t)| Needle {
                text: t.close.clone(),
                kind: NeedleKind::Close(i),
                fold_case: true,
            })
            .collect();
        let phrases = |list: Vec<String>, kind: NeedleKind| -> Vec<Needle> {
            list.into_iter()
                .filter(|p| is_needle_text(p))
                .map(|text| Needle {
                    text,
                    kind,
                    fold_case: false,
                })
                .collect()
        };
        Self {
            tags,
            opens,
            closes,
            onsets: phrases(onsets, NeedleKind::Onset),
            markers: phrases(markers, NeedleKind::Marker),
        }
    }

    /// The built-in table shared by every normalizer
    pub fn builtin() -> Arc<Self> {
        static BUILTIN: OnceLock<Arc<DialectTable>> = OnceLock::new();
        Arc::clone(BUILTIN.get_or_init(|| {
            let tags = BUILTIN_TAGS
                .iter()
                .map(|(open, close)| TagPair::new(*open, *close))
                .collect();
            let owned =
                |list: &[&str]| -> Vec<String> { list.iter().map(|s| (*s).to_string()).collect() };
            Arc::new(Self::new(
                tags,
                owned(ONSET_PATTERNS),
                owned(FINAL_ANSWER_MARKERS),
            ))
        }))
    }

    /// Known tag pairs
    #[must_use]
    pub fn tags(&self) -> &[TagPair] {
        &self.tags
    }

    pub(crate) fn open_needles(&self) -> &[Needle] {
        &self.opens
    }

    pub(crate) fn open_needle(&self, index: usize) -> &[Needle] {
        std::slice::from_ref(&self.opens[index])
    }

    pub(crate) fn close_needle(&self, index: usize) -> &[Needle] {
        std::slice::from_ref(&self.closes[index])
    }

    pub(crate) fn onset_needles(&self) -> &[Needle] {
        &self.onsets
    }

    pub(crate) fn marker_needles(&self) -> &[Needle] {
        &self.markers
    }
}

impl Default for DialectTable {
    fn default() -> Self {
        Self::builtin().as_ref().clone()
    }
}

fn is_needle_text(s: &str) -> bool {
    !s.is_empty() && s.is_ascii()
}

/// Built-in tag dialects, angle-bracket first
pub const BUILTIN_TAGS: &[(&str, &str)] = &[
    ("<think>", "</think>"),
    ("<thinking>", "</thinking>"),
    ("<thought>", "</thought>"),
    ("<reasoning>", "</reasoning>"),
    ("<reflection>", "</reflection>"),
    ("[think]", "[/think]"),
    ("[thinking]", "[/thinking]"),
    ("[thought]", "[/thought]"),
    ("[reasoning]", "[/reasoning]"),
];

/// Phrases that open untagged reasoning (case-sensitive)
pub const ONSET_PATTERNS: &[&str] = &[
    "Step 1:",
    "First,",
    "Let me think",
    "Let's think",
    "Let's break down",
    "To solve this",
];

/// Phrases that end untagged reasoning; they belong to the answer
pub const FINAL_ANSWER_MARKERS: &[&str] = &[
    "Therefore,",
    "Final answer:",
    "\\boxed{",
    "In conclusion,",
    "The answer is",
    "So the answer is",
];
