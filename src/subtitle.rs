// src/subtitle.rs
//! SRT generation and the fixed burn-in style.

use crate::types::{SentenceWindow, TimingRecord};

/// Convert seconds to SRT time format (HH:MM:SS,mmm).
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

pub fn build_srt(sentences: &[SentenceWindow]) -> String {
    let mut lines = Vec::with_capacity(sentences.len() * 4);
    for (i, sentence) in sentences.iter().enumerate() {
        lines.push((i + 1).to_string());
        lines.push(format!(
            "{} --> {}",
            format_srt_time(sentence.start),
            format_srt_time(sentence.end)
        ));
        lines.push(sentence.text.trim().to_string());
        lines.push(String::new());
    }
    lines.join("\n")
}

pub fn srt_from_timing(timing: &TimingRecord) -> String {
    build_srt(&timing.sentences)
}

/// Burn-in style: white text, black outline, bottom-safe margin.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleStyle {
    pub font_name: String,
    pub font_size: u32,
    pub primary_colour: String,
    pub outline_colour: String,
    pub outline: u32,
    pub shadow: u32,
    pub margin_v: u32,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_name: "Noto Sans CJK KR".to_string(),
            font_size: 20,
            primary_colour: "&HFFFFFF".to_string(),
            outline_colour: "&H000000".to_string(),
            outline: 2,
            shadow: 1,
            margin_v: 15,
        }
    }
}

impl SubtitleStyle {
    /// Value for the subtitles filter's `force_style` option.
    pub fn force_style(&self) -> String {
        format!(
            "FontName={},FontSize={},PrimaryColour={},OutlineColour={},Outline={},Shadow={},MarginV={}",
            self.font_name,
            self.font_size,
            self.primary_colour,
            self.outline_colour,
            self.outline,
            self.shadow,
            self.margin_v
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(1.8), "00:00:01,800");
        assert_eq!(format_srt_time(3723.456), "01:02:03,456");
        assert_eq!(format_srt_time(-2.0), "00:00:00,000");
    }

    #[test]
    fn test_build_srt_numbers_cues_from_one() {
        let sentences = vec![
            SentenceWindow { index: 0, text: "Hello".into(), start: 0.0, end: 1.8 },
            SentenceWindow { index: 1, text: " World ".into(), start: 1.8, end: 4.0 },
        ];
        let srt = build_srt(&sentences);
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:01,800\nHello\n\n2\n00:00:01,800 --> 00:00:04,000\nWorld\n"
        );
    }

    #[test]
    fn test_force_style_contains_margin() {
        let style = SubtitleStyle::default().force_style();
        assert!(style.contains("MarginV=15"));
        assert!(style.contains("Outline=2"));
    }
}
