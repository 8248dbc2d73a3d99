//! Stream Plumbing
//!
//! Combinators shared by the adapters: line splitting for NDJSON bodies,
//! SSE event framing, reasoning normalization, and the idle timeout.

use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::future;
use futures::stream::{self, Stream, StreamExt};

use super::error::ProviderError;
use super::traits::EventStream;
use crate::messages::ChatEvent;
use crate::streaming::{NormalizedDelta, StreamNormalizer};

/// A raw piece of provider output, before normalization
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawChunk {
    /// Text that may mix answer and tagged reasoning
    Text(String),
    /// Text the provider already marked as reasoning
    Reasoning(String),
}

/// Split a byte stream into trimmed, non-empty lines
///
/// Lines are cut on `\n` before decoding, so multi-byte characters split
/// across chunks survive. A trailing line without newline is yielded at end
/// of stream. The stream ends after the first error.
pub fn byte_lines<S, B>(bytes: S) -> impl Stream<Item = Result<String, ProviderError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    struct State<S> {
        inner: Pin<Box<S>>,
        buffer: Vec<u8>,
        done: bool,
    }

    let state = State {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line).trim().to_string();
                if text.is_empty() {
                    continue;
                }
                return Some((Ok(text), st));
            }
            if st.done {
                let rest = std::mem::take(&mut st.buffer);
                let text = String::from_utf8_lossy(&rest).trim().to_string();
                if text.is_empty() {
                    return None;
                }
                return Some((Ok(text), st));
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => st.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.done = true;
                    st.buffer.clear();
                    return Some((Err(ProviderError::from(e)), st));
                }
                None => st.done = true,
            }
        }
    })
}

/// Parse an SSE body into the `data` payload of each event
///
/// Comments and events without data are skipped. The stream ends after the
/// first error.
pub fn sse_events<S, B>(bytes: S) -> impl Stream<Item = Result<String, ProviderError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    bytes
        .eventsource()
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            let next = match item {
                Ok(event) => Ok(event.data),
                Err(EventStreamError::Transport(e)) => Err(ProviderError::from(e)),
                Err(e) => Err(ProviderError::malformed(format!("SSE stream error: {e}"))),
            };
            *failed = next.is_err();
            future::ready(Some(next))
        })
        .filter(|item| future::ready(!matches!(item, Ok(data) if data.trim().is_empty())))
}

/// Turn raw provider chunks into protocol events
///
/// Emits `Typing` first. `Text` chunks run through a [`StreamNormalizer`];
/// `Reasoning` chunks are reasoning already, and any text the normalizer is
/// still holding back is released ahead of them so events keep the
/// provider's order. Reasoning is forwarded as
/// `Reasoning` events only when `reasoning_mode` is set, and dropped
/// otherwise. The stream ends after the first error, once any withheld text
/// has been flushed.
pub fn normalized_events<S>(raw: S, reasoning_mode: bool) -> EventStream
where
    S: Stream<Item = Result<RawChunk, ProviderError>> + Send + 'static,
{
    struct State<S> {
        raw: Pin<Box<S>>,
        normalizer: StreamNormalizer,
        done: bool,
    }

    let state = State {
        raw: Box::pin(raw),
        normalizer: StreamNormalizer::new(),
        done: false,
    };

    let body = stream::unfold(state, move |mut st| async move {
        if st.done {
            return None;
        }
        let batch = match st.raw.next().await {
            Some(Ok(RawChunk::Text(text))) => to_events(st.normalizer.push(&text), reasoning_mode),
            Some(Ok(RawChunk::Reasoning(text))) => {
                let mut deltas = st.normalizer.flush();
                deltas.push(NormalizedDelta::Reasoning(text));
                to_events(deltas, reasoning_mode)
            }
            Some(Err(e)) => {
                st.done = true;
                let mut batch = to_events(st.normalizer.finish(), reasoning_mode);
                batch.push(Err(e));
                batch
            }
            None => {
                st.done = true;
                to_events(st.normalizer.finish(), reasoning_mode)
            }
        };
        Some((batch, st))
    })
    .flat_map(stream::iter);

    Box::pin(stream::once(async { Ok(ChatEvent::Typing) }).chain(body))
}

fn to_events(
    deltas: Vec<NormalizedDelta>,
    reasoning_mode: bool,
) -> Vec<Result<ChatEvent, ProviderError>> {
    deltas
        .into_iter()
        .filter(|d| !d.text().is_empty())
        .filter_map(|delta| match delta {
            NormalizedDelta::Content(text) => Some(Ok(ChatEvent::Token { content: text })),
            NormalizedDelta::Reasoning(text) if reasoning_mode => {
                Some(Ok(ChatEvent::Reasoning { content: text }))
            }
            NormalizedDelta::Reasoning(text) => {
                tracing::debug!(len = text.len(), "Dropping reasoning text");
                None
            }
        })
        .collect()
}

/// End the stream with a timeout error if no item arrives within `idle`
///
/// A zero duration disables the timeout.
pub fn with_idle_timeout(events: EventStream, idle: Duration) -> EventStream {
    if idle.is_zero() {
        return events;
    }

    Box::pin(stream::unfold(Some(events), move |state| async move {
        let mut events = state?;
        match tokio::time::timeout(idle, events.next()).await {
            Ok(Some(item)) => Some((item, Some(events))),
            Ok(None) => None,
            Err(_) => {
                tracing::warn!(idle_secs = idle.as_secs_f64(), "Provider stream went idle");
                let err = ProviderError::timeout(format!(
                    "no data from provider for {}s",
                    idle.as_secs()
                ));
                Some((Err(err), None))
            }
        }
    }))
}
