//! Reasoning-Aware Stream Normalization
//!
//! Models that mix reasoning and answer text in one channel mark the
//! reasoning with tags (`<think>…</think>`, `[reasoning]…[/reasoning]`) or,
//! less reliably, with stock phrases ("First,", "Therefore,"). This module
//! turns such a raw character stream into separate content and reasoning
//! deltas while the stream is still arriving.
//!
//! # Architecture
//!
//! ```text
//!   raw fragments (arbitrary split points)
//!        │
//!        ▼
//! ┌──────────────────────────────────────────────┐
//! │               StreamNormalizer                │
//! │  buffer ── scan(needles for current mode) ──┐ │
//! │    ▲                                        │ │
//! │    └── withheld tail (possible marker) ◄────┘ │
//! │                                               │
//! │  Answer ──open tag──► Tagged ──close tag──►   │
//! │  Answer ──onset────► Untagged ──marker────►   │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!        NormalizedDelta::{Content, Reasoning}
//! ```
//!
//! # Guarantees
//!
//! - **Chunk-boundary invariance**: the concatenated content and reasoning
//!   are the same no matter how the input is split.
//! - **Bounded lookahead**: at most one needle's length of text is withheld.
//! - **No empty deltas**.

mod dialect;
mod normalizer;

pub use dialect::{
    DialectTable, TagPair, BUILTIN_TAGS, FINAL_ANSWER_MARKERS, ONSET_PATTERNS,
};
pub use normalizer::{collect, split_reasoning, NormalizedDelta, StreamNormalizer};
