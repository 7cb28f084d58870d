//! Placeholder engine for dry runs without a model.
//!
//! Emits one word per `word_ms` of audio so replays exercise the full
//! scheduling path with transcripts whose length tracks the snapshot.

use super::{DecodeEngine, DecodeProfile, Segment, Transcript};
use crate::error::DecodeError;
use std::time::Duration;

const WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliett",
    "kilo", "lima", "mike", "november", "oscar", "papa",
];

/// Words per final segment.
const SEGMENT_WORDS: usize = 8;

#[derive(Debug, Clone)]
pub struct SyntheticEngine {
    sample_rate: u32,
    word_ms: u32,
    interim_latency: Duration,
    final_latency: Duration,
}

impl SyntheticEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            word_ms: 400,
            interim_latency: Duration::ZERO,
            final_latency: Duration::ZERO,
        }
    }

    /// Simulated decode cost per pass.
    pub fn with_latency(mut self, interim: Duration, final_pass: Duration) -> Self {
        self.interim_latency = interim;
        self.final_latency = final_pass;
        self
    }

    pub fn with_word_ms(mut self, word_ms: u32) -> Self {
        self.word_ms = word_ms.max(1);
        self
    }

    fn word_count(&self, samples: usize) -> usize {
        let ms = crate::audio::buffer::samples_to_ms(samples as u64, self.sample_rate);
        (ms / self.word_ms as u64) as usize
    }
}

impl DecodeEngine for SyntheticEngine {
    fn decode(&self, audio: &[i16], profile: &DecodeProfile) -> Result<Transcript, DecodeError> {
        if self.sample_rate == 0 {
            return Err(DecodeError::fatal("sample rate is zero"));
        }

        let latency = match profile.pass {
            crate::scheduler::JobClass::Interim => self.interim_latency,
            crate::scheduler::JobClass::Final => self.final_latency,
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let words: Vec<&str> = (0..self.word_count(audio.len()))
            .map(|i| WORDS[i % WORDS.len()])
            .collect();

        let segments = if profile.timestamps {
            let word_secs = self.word_ms as f64 / 1000.0;
            words
                .chunks(SEGMENT_WORDS)
                .enumerate()
                .map(|(i, chunk)| {
                    let start = (i * SEGMENT_WORDS) as f64 * word_secs;
                    let end = start + chunk.len() as f64 * word_secs;
                    Segment::new(start, end, chunk.join(" "))
                })
                .collect()
        } else {
            Vec::new()
        };

        let language = profile
            .language
            .clone()
            .or_else(|| profile.detect_language.then(|| "en".to_string()));

        Ok(Transcript {
            text: words.join(" "),
            segments,
            language,
        })
    }

    fn name(&self) -> &str {
        "synthetic"
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_tracks_duration() {
        let engine = SyntheticEngine::new(16000);
        let transcript = engine
            .decode(&[0; 16000], &DecodeProfile::interim("auto"))
            .unwrap();
        assert_eq!(transcript.text, "alpha bravo");
        assert!(transcript.segments.is_empty());
    }

    #[test]
    fn test_short_audio_yields_empty_text() {
        let engine = SyntheticEngine::new(16000);
        let transcript = engine
            .decode(&[0; 100], &DecodeProfile::interim("auto"))
            .unwrap();
        assert!(transcript.text.is_empty());
    }

    #[test]
    fn test_final_pass_has_segments_and_language() {
        let engine = SyntheticEngine::new(16000).with_word_ms(100);
        let transcript = engine
            .decode(&[0; 16000], &DecodeProfile::final_pass("auto"))
            .unwrap();

        assert_eq!(transcript.text.split(' ').count(), 10);
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[0].start, 0.0);
        assert!((transcript.segments[1].end - 1.0).abs() < 1e-9);
        assert_eq!(transcript.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_zero_rate_is_fatal() {
        let engine = SyntheticEngine::new(0);
        let err = engine
            .decode(&[0; 10], &DecodeProfile::interim("en"))
            .unwrap_err();
        assert!(!err.retryable);
    }
}
