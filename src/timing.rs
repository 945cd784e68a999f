// src/timing.rs
//! Sentence-level timing reconciliation.
//!
//! Subtitles are cut from the authored display text, never from the
//! recognizer transcript. Recognizer timing is only trusted when it lines up
//! sentence for sentence; otherwise the audio duration is split evenly.

use crate::types::{SentenceWindow, TimingMethod, TranscriptSegment};

/// Explicit subtitle split marker inserted by the author.
pub const SPLIT_MARKER: &str = ";;";

/// Split authored text into subtitle units.
///
/// With a marker present the text is split strictly on it; without one the
/// whole text is a single unit. Blank pieces are dropped.
pub fn split_authored_text(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if !trimmed.contains(SPLIT_MARKER) {
        return vec![trimmed.to_string()];
    }
    trimmed
        .split(SPLIT_MARKER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTiming {
    pub method: TimingMethod,
    pub sentences: Vec<SentenceWindow>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimingResolver;

impl TimingResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve authored text plus one audio duration into contiguous windows.
    pub fn resolve(
        &self,
        authored_text: &str,
        total_duration: f64,
        segments: Option<&[TranscriptSegment]>,
    ) -> ResolvedTiming {
        let sentences = split_authored_text(authored_text);
        self.resolve_sentences(&sentences, total_duration, segments)
    }

    pub fn resolve_sentences(
        &self,
        sentences: &[String],
        total_duration: f64,
        segments: Option<&[TranscriptSegment]>,
    ) -> ResolvedTiming {
        if sentences.is_empty() || !(total_duration > 0.0) || !total_duration.is_finite() {
            return ResolvedTiming {
                method: TimingMethod::Empty,
                sentences: Vec::new(),
            };
        }

        if sentences.len() == 1 {
            return ResolvedTiming {
                method: TimingMethod::SingleSentence,
                sentences: vec![SentenceWindow {
                    index: 0,
                    text: sentences[0].clone(),
                    start: 0.0,
                    end: total_duration,
                }],
            };
        }

        match segments {
            Some(segs) if segs.len() == sentences.len() => ResolvedTiming {
                method: TimingMethod::SegmentMatch,
                sentences: map_segments(sentences, segs, total_duration),
            },
            _ => ResolvedTiming {
                method: TimingMethod::EqualDistribution,
                sentences: equal_distribution(sentences, total_duration),
            },
        }
    }
}

/// Split `total` into `N` equal windows; the last end is pinned to `total`.
pub fn equal_distribution(sentences: &[String], total: f64) -> Vec<SentenceWindow> {
    let n = sentences.len();
    if n == 0 {
        return Vec::new();
    }
    let step = total / n as f64;
    let mut windows = Vec::with_capacity(n);
    let mut start = 0.0;
    for (i, text) in sentences.iter().enumerate() {
        let end = if i + 1 == n { total } else { (i + 1) as f64 * step };
        windows.push(SentenceWindow {
            index: i,
            text: text.clone(),
            start,
            end,
        });
        start = end;
    }
    windows
}

/// Authored text with recognizer boundaries, normalized to start at 0, end at
/// `total` and stay contiguous. The cut between sentence `i` and `i + 1` is the
/// start of segment `i + 1`.
fn map_segments(
    sentences: &[String],
    segments: &[TranscriptSegment],
    total: f64,
) -> Vec<SentenceWindow> {
    let n = sentences.len();
    let mut boundaries = Vec::with_capacity(n + 1);
    boundaries.push(0.0);
    let mut prev = 0.0_f64;
    for seg in segments.iter().skip(1) {
        let cut = if seg.start.is_finite() { seg.start } else { prev };
        let cut = cut.clamp(prev, total);
        boundaries.push(cut);
        prev = cut;
    }
    boundaries.push(total);

    sentences
        .iter()
        .enumerate()
        .map(|(i, text)| SentenceWindow {
            index: i,
            text: text.clone(),
            start: boundaries[i],
            end: boundaries[i + 1],
        })
        .collect()
}
