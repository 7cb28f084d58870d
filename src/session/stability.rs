/// Tracks how much of successive interim transcripts stays unchanged.
///
/// `stable_chars` counts characters (not bytes) so the value is safe to use
/// as a prefix length on any UTF-8 text.
#[derive(Debug, Clone, Default)]
pub struct StabilityTracker {
    last: Option<String>,
}

impl StabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new interim text and return its stable prefix length.
    ///
    /// The first text after a reset has no stable prefix.
    pub fn update(&mut self, text: &str) -> usize {
        let stable = self
            .last
            .as_deref()
            .map_or(0, |prev| common_prefix_chars(prev, text));
        self.last = Some(text.to_string());
        stable
    }

    /// Forget the previous text. Called at every utterance boundary.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn last_text(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

/// Length in characters of the longest common prefix.
pub fn common_prefix_chars(a: &str, b: &str) -> usize {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count()
}
