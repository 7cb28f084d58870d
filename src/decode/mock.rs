use super::{DecodeEngine, DecodeProfile, Segment, Transcript};
use crate::error::DecodeError;
use crate::scheduler::JobClass;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Mock decode engine for testing
///
/// Scripted outputs are consumed in call order per pass; once a script is
/// exhausted the fixed response is returned.
#[derive(Debug)]
pub struct MockEngine {
    name: String,
    response: String,
    language: String,
    fail_interims: bool,
    fail_finals: bool,
    final_failures_left: AtomicUsize,
    delay: Option<Duration>,
    interim_script: Mutex<VecDeque<String>>,
    final_script: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(DecodeProfile, usize)>>,
}

impl MockEngine {
    /// Create a new mock engine with default settings
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            response: "mock transcription".to_string(),
            language: "en".to_string(),
            fail_interims: false,
            fail_finals: false,
            final_failures_left: AtomicUsize::new(0),
            delay: None,
            interim_script: Mutex::new(VecDeque::new()),
            final_script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Configure the mock to return a specific response for both passes
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Language reported when the profile asks for detection
    pub fn with_detected_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    /// Configure the mock to fail every decode
    pub fn with_failure(mut self) -> Self {
        self.fail_interims = true;
        self.fail_finals = true;
        self
    }

    /// Fail every interim pass, finals still succeed
    pub fn with_interim_failure(mut self) -> Self {
        self.fail_interims = true;
        self
    }

    /// Fail every final pass, interims still succeed
    pub fn with_final_failure(mut self) -> Self {
        self.fail_finals = true;
        self
    }

    /// Fail the first `count` final passes, then succeed
    pub fn with_final_failures(self, count: usize) -> Self {
        self.final_failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// Block each decode for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Texts returned by successive interim passes
    pub fn with_interim_script<I, S>(self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.interim_script).extend(texts.into_iter().map(Into::into));
        self
    }

    /// Texts returned by successive final passes
    pub fn with_final_script<I, S>(self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.final_script).extend(texts.into_iter().map(Into::into));
        self
    }

    /// Total number of decode calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Profiles seen so far, in call order
    pub fn seen_profiles(&self) -> Vec<DecodeProfile> {
        lock(&self.seen).iter().map(|(p, _)| p.clone()).collect()
    }

    /// Snapshot lengths seen so far, in call order
    pub fn seen_lengths(&self) -> Vec<usize> {
        lock(&self.seen).iter().map(|(_, len)| *len).collect()
    }

    fn should_fail(&self, pass: JobClass) -> bool {
        match pass {
            JobClass::Interim => self.fail_interims,
            JobClass::Final => {
                self.fail_finals
                    || self
                        .final_failures_left
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok()
            }
        }
    }
}

impl DecodeEngine for MockEngine {
    fn decode(&self, audio: &[i16], profile: &DecodeProfile) -> Result<Transcript, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.seen).push((profile.clone(), audio.len()));

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        if self.should_fail(profile.pass) {
            return Err(DecodeError::new("mock decode failure"));
        }

        let scripted = match profile.pass {
            JobClass::Interim => lock(&self.interim_script).pop_front(),
            JobClass::Final => lock(&self.final_script).pop_front(),
        };
        let text = scripted.unwrap_or_else(|| self.response.clone());

        let language = profile
            .language
            .clone()
            .or_else(|| profile.detect_language.then(|| self.language.clone()));
        let segments = if profile.timestamps && !text.is_empty() {
            let end = audio.len() as f64 / crate::defaults::SAMPLE_RATE as f64;
            vec![Segment::new(0.0, end, text.clone())]
        } else {
            Vec::new()
        };

        Ok(Transcript {
            text,
            segments,
            language,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        !(self.fail_interims && self.fail_finals)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
