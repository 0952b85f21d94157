//! LocalAgreement-N stabilization (C4).
//!
//! Confirms a word only once the last `N` consecutive hypotheses all begin
//! with it in the same position, case-insensitively. This is what turns a
//! flickering, constantly-revised ASR hypothesis into prefix-monotonic
//! confirmed text plus a volatile tentative suffix.

use std::collections::VecDeque;

/// An immutable word with timing, as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
}

impl TimestampedWord {
    pub fn new(text: impl Into<String>, start: f64, end: f64, confidence: f32) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            confidence,
        }
    }

    /// A new word with both timestamps shifted by `delta` seconds.
    pub fn shifted(&self, delta: f64) -> Self {
        Self {
            text: self.text.clone(),
            start: self.start + delta,
            end: self.end + delta,
            confidence: self.confidence,
        }
    }

    fn text_matches(&self, other: &TimestampedWord) -> bool {
        self.text.eq_ignore_ascii_case(&other.text)
    }
}

pub struct HypothesisBuffer {
    confirmed: VecDeque<TimestampedWord>,
    current_hypothesis: Vec<TimestampedWord>,
    previous_hypotheses: VecDeque<Vec<TimestampedWord>>,
    agreement_n: usize,
    max_confirmed_words: usize,
}

impl Default for HypothesisBuffer {
    fn default() -> Self {
        Self::new(2, 500)
    }
}

impl HypothesisBuffer {
    pub fn new(agreement_n: usize, max_confirmed_words: usize) -> Self {
        assert!(agreement_n >= 1, "agreement_n must be >= 1");
        Self {
            confirmed: VecDeque::new(),
            current_hypothesis: Vec::new(),
            previous_hypotheses: VecDeque::new(),
            agreement_n,
            max_confirmed_words,
        }
    }

    pub fn agreement_n(&self) -> usize {
        self.agreement_n
    }

    pub fn confirmed(&self) -> impl Iterator<Item = &TimestampedWord> {
        self.confirmed.iter()
    }

    pub fn confirmed_word_count(&self) -> usize {
        self.confirmed.len()
    }

    pub fn current_hypothesis(&self) -> &[TimestampedWord] {
        &self.current_hypothesis
    }

    /// Shift `words` by `offset_seconds`, drop any leading overlap with
    /// `confirmed`, and store the result as the current hypothesis.
    pub fn insert(&mut self, words: &[TimestampedWord], offset_seconds: f64) {
        let shifted: Vec<TimestampedWord> = words.iter().map(|w| w.shifted(offset_seconds)).collect();
        self.current_hypothesis = self.dedupe_against_confirmed(shifted);
    }

    fn dedupe_against_confirmed(&self, words: Vec<TimestampedWord>) -> Vec<TimestampedWord> {
        let Some(last_confirmed) = self.confirmed.back() else {
            return words;
        };
        let mut drop_count = 0;
        for w in &words {
            // A tie (end == last confirmed end) resolves to "drop the new word".
            if w.end <= last_confirmed.end {
                drop_count += 1;
            } else {
                break;
            }
        }
        words.into_iter().skip(drop_count).collect()
    }

    /// Compare the tail of `previous_hypotheses` plus `current_hypothesis`
    /// and confirm the longest common prefix across all `agreement_n`
    /// sequences. Returns the words newly appended to `confirmed`.
    pub fn flush(&mut self) -> Vec<TimestampedWord> {
        if self.current_hypothesis.is_empty() {
            return Vec::new();
        }

        let newly_confirmed = if self.previous_hypotheses.len() + 1 >= self.agreement_n {
            let window_len = self.agreement_n - 1;
            let window_start = self.previous_hypotheses.len() - window_len;
            let mut sequences: Vec<&[TimestampedWord]> = self
                .previous_hypotheses
                .iter()
                .skip(window_start)
                .map(|v| v.as_slice())
                .collect();
            sequences.push(&self.current_hypothesis);

            let agreed_prefix_len = longest_common_prefix_len(&sequences);
            sequences[sequences.len() - 1][..agreed_prefix_len].to_vec()
        } else {
            Vec::new()
        };

        let mut appended = Vec::new();
        if !newly_confirmed.is_empty() {
            for word in &newly_confirmed {
                self.confirmed.push_back(word.clone());
                appended.push(word.clone());
            }
            while self.confirmed.len() > self.max_confirmed_words {
                self.confirmed.pop_front();
            }
            self.current_hypothesis.drain(..newly_confirmed.len());
        }

        let taken = std::mem::take(&mut self.current_hypothesis);
        self.previous_hypotheses.push_back(taken);
        while self.previous_hypotheses.len() > self.agreement_n.saturating_sub(1).max(1) {
            self.previous_hypotheses.pop_front();
        }

        appended
    }

    pub fn get_confirmed_text(&self) -> String {
        join_words(self.confirmed.iter())
    }

    pub fn get_tentative_text(&self) -> String {
        join_words(self.current_hypothesis.iter())
    }

    /// Evict confirmed words whose end time is before `t`. Bookkeeping only
    /// — does not affect future confirmations.
    pub fn trim_to_time(&mut self, t: f64) {
        while let Some(front) = self.confirmed.front() {
            if front.end < t {
                self.confirmed.pop_front();
            } else {
                break;
            }
        }
    }

    /// The last `max_chars` of the confirmed text, truncated at a word
    /// boundary, for use as backend conditioning context.
    pub fn get_prompt_suffix(&self, max_chars: usize) -> String {
        let text = self.get_confirmed_text();
        if text.len() <= max_chars {
            return text;
        }
        let tail_start = crate::text::floor_char_boundary(&text, text.len() - max_chars);
        let words: Vec<&str> = text[tail_start..].split_whitespace().collect();
        // Drop a possibly-truncated first token to land on a word boundary,
        // unless that's the only token we have.
        if words.len() > 1 {
            words[1..].join(" ")
        } else {
            words.join(" ")
        }
    }

    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.current_hypothesis.clear();
        self.previous_hypotheses.clear();
    }
}

fn longest_common_prefix_len(sequences: &[&[TimestampedWord]]) -> usize {
    let Some(shortest) = sequences.iter().map(|s| s.len()).min() else {
        return 0;
    };
    for i in 0..shortest {
        let first = &sequences[0][i];
        if !sequences[1..].iter().all(|s| s[i].text_matches(first)) {
            return i;
        }
    }
    shortest
}

fn join_words<'a>(words: impl Iterator<Item = &'a TimestampedWord>) -> String {
    words.map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ")
}
