//! CLI enum types for decision modes.

use clap::ValueEnum;

use crate::control::DecisionMode;

/// How candidate observations are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DecisionArg {
    /// Accept every valid candidate
    #[default]
    Auto,
    /// Review each candidate with hotkeys (A accept, R reject, Q quit)
    Keyboard,
}

impl From<DecisionArg> for DecisionMode {
    fn from(d: DecisionArg) -> Self {
        match d {
            DecisionArg::Auto => DecisionMode::Auto,
            DecisionArg::Keyboard => DecisionMode::Keyboard,
        }
    }
}
