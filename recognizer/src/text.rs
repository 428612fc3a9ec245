//! Text assembly from recognized symbols.
//!
//! Letters build the in-progress word, `space` commits it, `delete`
//! drops the last letter, and `nothing` marks the text idle once no
//! symbol has arrived for the idle timeout.  A sentence is confirmed by
//! the fist gesture or by idleness, and identical consecutive sentences
//! are emitted once.
//!
//! All state sits behind one mutex held for a single operation; readers
//! take immutable [`TextState`] snapshots.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::sexp::{escape_string, flag};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Confirmed sentences kept for undo and status.
pub const SENTENCE_HISTORY: usize = 50;

// ── Symbols ────────────────────────────────────────────────

/// One unit of classifier output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Letter(char),
    Space,
    Delete,
    Nothing,
    /// A whole word from a word-level label.
    Word(String),
}

impl Symbol {
    /// Map a classifier label to a symbol.  Empty labels map to None.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        match label.to_ascii_lowercase().as_str() {
            "" => None,
            "space" => Some(Self::Space),
            "del" | "delete" => Some(Self::Delete),
            "nothing" => Some(Self::Nothing),
            _ => {
                let mut chars = label.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphabetic() => Some(Self::Letter(c)),
                    _ => Some(Self::Word(label.to_string())),
                }
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Letter(_) => "letter",
            Self::Space => "space",
            Self::Delete => "delete",
            Self::Nothing => "nothing",
            Self::Word(w) => w,
        }
    }
}

// ── State ──────────────────────────────────────────────────

/// Immutable view of the assembler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextState {
    pub current_word: String,
    pub confirmed_words: Vec<String>,
    /// Most recently confirmed sentence (empty before the first one).
    pub confirmed_sentence: String,
    /// Recently confirmed sentences, oldest first, at most
    /// [`SENTENCE_HISTORY`].
    pub sentences: VecDeque<String>,
    pub last_symbol_time: Option<Instant>,
    pub is_idle: bool,
}

impl TextState {
    /// Live caption: committed words followed by the word in progress.
    pub fn caption(&self) -> String {
        let mut parts: Vec<&str> = self.confirmed_words.iter().map(String::as_str).collect();
        if !self.current_word.is_empty() {
            parts.push(&self.current_word);
        }
        parts.join(" ")
    }

    pub fn has_pending(&self) -> bool {
        !self.current_word.is_empty() || !self.confirmed_words.is_empty()
    }

    /// Generate s-expression for status logging.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:caption \"{}\" :words {} :sentence \"{}\" :sentences {} :idle {})",
            escape_string(&self.caption()),
            self.confirmed_words.len(),
            escape_string(&self.confirmed_sentence),
            self.sentences.len(),
            flag(self.is_idle),
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: TextState,
    last_emitted: String,
}

impl Inner {
    fn commit_word(&mut self, now: Instant) {
        if !self.state.current_word.is_empty() {
            let word = std::mem::take(&mut self.state.current_word);
            debug!("Word committed: {}", word);
            self.state.confirmed_words.push(word);
            self.state.last_symbol_time = Some(now);
        }
    }

    fn clear_pending(&mut self) {
        self.state.current_word.clear();
        self.state.confirmed_words.clear();
        self.state.is_idle = false;
    }

    fn confirm(&mut self, now: Instant) -> Option<String> {
        self.commit_word(now);
        if self.state.confirmed_words.is_empty() {
            return None;
        }
        let sentence = self.state.confirmed_words.join(" ");
        // Pending text is dropped even when the sentence is a repeat.
        self.clear_pending();
        if sentence == self.last_emitted {
            debug!("Duplicate sentence suppressed: {}", sentence);
            return None;
        }
        info!("Sentence confirmed: {}", sentence);
        self.last_emitted = sentence.clone();
        self.state.confirmed_sentence = sentence.clone();
        self.state.sentences.push_back(sentence.clone());
        while self.state.sentences.len() > SENTENCE_HISTORY {
            self.state.sentences.pop_front();
        }
        Some(sentence)
    }
}

// ── Assembler ──────────────────────────────────────────────

/// Thread-safe symbol-to-sentence assembler.
pub struct TextAssembler {
    idle_timeout: Duration,
    inner: Mutex<Inner>,
}

impl Default for TextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl TextAssembler {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a symbol received at `now`.
    pub fn push_symbol_at(&self, symbol: Symbol, now: Instant) -> TextState {
        let mut inner = self.lock();
        match symbol {
            Symbol::Letter(c) => {
                inner.state.current_word.push(c);
                inner.state.last_symbol_time = Some(now);
                inner.state.is_idle = false;
            }
            Symbol::Word(word) => {
                inner.commit_word(now);
                if inner.state.confirmed_words.last() != Some(&word) {
                    debug!("Word accepted: {}", word);
                    inner.state.confirmed_words.push(word);
                }
                inner.state.last_symbol_time = Some(now);
                inner.state.is_idle = false;
            }
            Symbol::Space => inner.commit_word(now),
            Symbol::Delete => {
                if inner.state.current_word.pop().is_some() {
                    inner.state.last_symbol_time = Some(now);
                }
            }
            Symbol::Nothing => {
                if inner.state.has_pending() {
                    let elapsed = inner
                        .state
                        .last_symbol_time
                        .map(|t| now.saturating_duration_since(t))
                        .unwrap_or(Duration::MAX);
                    if elapsed > self.idle_timeout {
                        inner.state.is_idle = true;
                    }
                }
            }
        }
        inner.state.clone()
    }

    /// Confirm the pending sentence (fist gesture).
    pub fn confirm_sentence(&self) -> Option<String> {
        self.lock().confirm(Instant::now())
    }

    /// Confirm the pending sentence only if the idle flag is set.
    pub fn confirm_if_idle(&self) -> Option<String> {
        let mut inner = self.lock();
        if !inner.state.is_idle {
            return None;
        }
        inner.confirm(Instant::now())
    }

    /// Remove the word in progress, else the last committed word, else the
    /// last word of the last confirmed sentence.  Returns what was removed.
    pub fn undo_last_word(&self) -> Option<String> {
        let mut inner = self.lock();
        if !inner.state.current_word.is_empty() {
            return Some(std::mem::take(&mut inner.state.current_word));
        }
        if let Some(word) = inner.state.confirmed_words.pop() {
            return Some(word);
        }

        let last = inner.state.sentences.pop_back()?;
        let mut words: Vec<&str> = last.split_whitespace().collect();
        let removed = words.pop().map(str::to_string);
        if !words.is_empty() {
            inner.state.sentences.push_back(words.join(" "));
        }
        let latest = inner.state.sentences.back().cloned().unwrap_or_default();
        inner.state.confirmed_sentence = latest.clone();
        inner.last_emitted = latest;
        removed
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> TextState {
        self.lock().state.clone()
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn letters(asm: &TextAssembler, text: &str, now: Instant) {
        for c in text.chars() {
            let symbol = if c == ' ' {
                Symbol::Space
            } else {
                Symbol::Letter(c)
            };
            asm.push_symbol_at(symbol, now);
        }
    }

    #[test]
    fn test_symbol_parse() {
        assert_eq!(Symbol::parse("A"), Some(Symbol::Letter('A')));
        assert_eq!(Symbol::parse("space"), Some(Symbol::Space));
        assert_eq!(Symbol::parse("del"), Some(Symbol::Delete));
        assert_eq!(Symbol::parse("DELETE"), Some(Symbol::Delete));
        assert_eq!(Symbol::parse("nothing"), Some(Symbol::Nothing));
        assert_eq!(Symbol::parse("HELLO"), Some(Symbol::Word("HELLO".into())));
        assert_eq!(Symbol::parse("  "), None);
    }

    #[test]
    fn test_hi_there_scenario() {
        let asm = TextAssembler::default();
        letters(&asm, "HI THERE", Instant::now());
        assert_eq!(asm.snapshot().caption(), "HI THERE");
        assert_eq!(asm.confirm_sentence().as_deref(), Some("HI THERE"));

        let state = asm.snapshot();
        assert_eq!(state.current_word, "");
        assert!(state.confirmed_words.is_empty());
        assert_eq!(state.confirmed_sentence, "HI THERE");
        assert!(!state.is_idle);
    }

    #[test]
    fn test_delete_and_empty_confirm() {
        let asm = TextAssembler::default();
        assert!(asm.confirm_sentence().is_none());
        letters(&asm, "HX", Instant::now());
        asm.push_symbol_at(Symbol::Delete, Instant::now());
        asm.push_symbol_at(Symbol::Delete, Instant::now());
        asm.push_symbol_at(Symbol::Delete, Instant::now());
        assert_eq!(asm.snapshot().current_word, "");
        assert!(asm.confirm_sentence().is_none());
    }

    #[test]
    fn test_duplicate_sentence_suppressed() {
        let asm = TextAssembler::default();
        letters(&asm, "HI", Instant::now());
        assert_eq!(asm.confirm_sentence().as_deref(), Some("HI"));
        letters(&asm, "HI", Instant::now());
        assert!(asm.confirm_sentence().is_none());
        // The repeat is discarded rather than left pending.
        assert!(!asm.snapshot().has_pending());

        letters(&asm, "YO", Instant::now());
        assert_eq!(asm.confirm_sentence().as_deref(), Some("YO"));
        letters(&asm, "HI", Instant::now());
        assert_eq!(asm.confirm_sentence().as_deref(), Some("HI"));
        assert_eq!(asm.snapshot().sentences, vec!["HI", "YO", "HI"]);
    }

    #[test]
    fn test_sentence_history_is_bounded() {
        let asm = TextAssembler::default();
        let now = Instant::now();
        for i in 0..SENTENCE_HISTORY + 10 {
            asm.push_symbol_at(Symbol::Word(format!("W{}", i)), now);
            assert!(asm.confirm_sentence().is_some());
        }
        let state = asm.snapshot();
        assert_eq!(state.sentences.len(), SENTENCE_HISTORY);
        assert_eq!(state.sentences.front().map(String::as_str), Some("W10"));
        assert_eq!(state.confirmed_sentence, format!("W{}", SENTENCE_HISTORY + 9));
    }

    #[test]
    fn test_idle_requires_timeout() {
        let asm = TextAssembler::new(Duration::from_millis(1500));
        let t0 = Instant::now();
        letters(&asm, "OK", t0);

        let state = asm.push_symbol_at(Symbol::Nothing, t0 + Duration::from_millis(1000));
        assert!(!state.is_idle);
        assert!(asm.confirm_if_idle().is_none());

        let state = asm.push_symbol_at(Symbol::Nothing, t0 + Duration::from_millis(1500));
        assert!(!state.is_idle, "idle only once the timeout is exceeded");

        let state = asm.push_symbol_at(Symbol::Nothing, t0 + Duration::from_millis(1600));
        assert!(state.is_idle);
        assert_eq!(asm.confirm_if_idle().as_deref(), Some("OK"));
        assert!(!asm.snapshot().is_idle);
    }

    #[test]
    fn test_nothing_without_content_never_idles() {
        let asm = TextAssembler::new(Duration::from_millis(10));
        let t0 = Instant::now();
        let state = asm.push_symbol_at(Symbol::Nothing, t0 + Duration::from_secs(5));
        assert!(!state.is_idle);
    }

    #[test]
    fn test_letter_clears_idle() {
        let asm = TextAssembler::new(Duration::from_millis(10));
        let t0 = Instant::now();
        letters(&asm, "A", t0);
        assert!(asm.push_symbol_at(Symbol::Nothing, t0 + Duration::from_secs(1)).is_idle);
        let state = asm.push_symbol_at(Symbol::Letter('B'), t0 + Duration::from_secs(1));
        assert!(!state.is_idle);
        assert_eq!(state.current_word, "AB");
    }

    #[test]
    fn test_word_tokens_dedupe() {
        let asm = TextAssembler::default();
        asm.push_symbol_at(Symbol::Word("HELLO".into()), Instant::now());
        asm.push_symbol_at(Symbol::Word("HELLO".into()), Instant::now());
        letters(&asm, "MY", Instant::now());
        asm.push_symbol_at(Symbol::Word("FRIEND".into()), Instant::now());
        assert_eq!(asm.snapshot().confirmed_words, vec!["HELLO", "MY", "FRIEND"]);
    }

    #[test]
    fn test_undo_order() {
        let asm = TextAssembler::default();
        letters(&asm, "GOOD DAY", Instant::now());
        assert_eq!(asm.undo_last_word().as_deref(), Some("DAY"));
        assert_eq!(asm.undo_last_word().as_deref(), Some("GOOD"));
        assert!(asm.undo_last_word().is_none());
    }

    #[test]
    fn test_undo_trims_confirmed_sentence() {
        let asm = TextAssembler::default();
        letters(&asm, "SEE YOU", Instant::now());
        asm.confirm_sentence();
        assert_eq!(asm.undo_last_word().as_deref(), Some("YOU"));
        let state = asm.snapshot();
        assert_eq!(state.confirmed_sentence, "SEE");
        assert_eq!(state.sentences, vec!["SEE"]);

        assert_eq!(asm.undo_last_word().as_deref(), Some("SEE"));
        assert!(asm.snapshot().sentences.is_empty());
        assert_eq!(asm.snapshot().confirmed_sentence, "");
    }

    #[test]
    fn test_concurrent_snapshots() {
        use std::sync::Arc;
        let asm = Arc::new(TextAssembler::default());
        let writer = {
            let asm = Arc::clone(&asm);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    asm.push_symbol_at(Symbol::Letter('A'), Instant::now());
                }
            })
        };
        for _ in 0..200 {
            let state = asm.snapshot();
            assert!(state.current_word.chars().all(|c| c == 'A'));
        }
        writer.join().unwrap();
        assert_eq!(asm.snapshot().current_word.len(), 200);
    }

    #[test]
    fn test_status_sexp() {
        let asm = TextAssembler::default();
        letters(&asm, "A B", Instant::now());
        let s = asm.snapshot().status_sexp();
        assert!(s.contains(":caption \"A B\""), "{}", s);
        assert!(s.contains(":idle nil"));
    }
}
