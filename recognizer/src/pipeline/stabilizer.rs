//! Token stabilizer between the classifier and the text assembler.
//!
//! A classifier label is only passed on once it has been the answer for
//! several consecutive eligible frames, and a cooldown follows every
//! accepted token so one held sign is not typed repeatedly.

use tracing::debug;

#[derive(Debug, Clone)]
pub struct StabilizerConfig {
    /// Consecutive frames a label must repeat before it is accepted.
    pub hold_frames: u32,
    /// Eligible frames after an accepted token during which nothing is accepted.
    pub cooldown_frames: u32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            hold_frames: 8,
            cooldown_frames: 18,
        }
    }
}

pub struct TokenStabilizer {
    pub config: StabilizerConfig,
    last_label: Option<String>,
    held: u32,
    cooldown: u32,
}

impl TokenStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config,
            last_label: None,
            held: 0,
            cooldown: 0,
        }
    }

    /// Feed the label for an eligible frame (hand settled, no gesture
    /// forming).  `None` means the classifier had no answer; the hold is
    /// kept as is.  Returns the label when it is accepted.
    pub fn update(&mut self, label: Option<&str>) -> Option<String> {
        if self.cooldown > 0 {
            self.cooldown -= 1;
        }
        let label = label?;

        if self.last_label.as_deref() == Some(label) {
            self.held += 1;
        } else {
            self.last_label = Some(label.to_string());
            self.held = 1;
        }

        if self.held >= self.config.hold_frames && self.cooldown == 0 {
            self.held = 0;
            self.cooldown = self.config.cooldown_frames;
            debug!("Token accepted: {}", label);
            return Some(label.to_string());
        }
        None
    }

    /// Forget the held label (frame not eligible).  The cooldown keeps
    /// running down only on eligible frames.
    pub fn interrupt(&mut self) {
        self.last_label = None;
        self.held = 0;
    }

    /// Clear hold and cooldown.
    pub fn reset(&mut self) {
        self.interrupt();
        self.cooldown = 0;
    }

    pub fn held(&self) -> u32 {
        self.held
    }

    pub fn cooldown(&self) -> u32 {
        self.cooldown
    }
}
