//! Operator control for the capture loop.
//!
//! The loop asks a [`DecisionPort`] once per iteration whether to keep going,
//! and again whenever a candidate observation is ready. Headless runs use
//! [`AutoAccept`], tests use [`ScriptedDecisions`], and interactive runs use
//! [`KeyboardDecider`], which listens for global key presses via rdev.

use crate::accumulator::CandidateObservation;
use rdev::{listen, Event, EventType, Key};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Operator signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No input; for a candidate this means "no objection" and accepts it.
    Continue,
    Accept,
    Reject,
    Quit,
}

/// Which decision port a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMode {
    /// Accept every valid candidate.
    #[default]
    Auto,
    /// Review candidates with global hotkeys.
    Keyboard,
}

/// Source of operator decisions.
pub trait DecisionPort {
    /// Signal consumed once per loop iteration, before capturing.
    fn poll(&mut self) -> Decision {
        Decision::Continue
    }

    /// Decide on a candidate observation.
    fn decide(&mut self, candidate: &CandidateObservation) -> Decision;
}

/// Accepts every candidate and never quits.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoAccept;

impl DecisionPort for AutoAccept {
    fn decide(&mut self, _candidate: &CandidateObservation) -> Decision {
        Decision::Accept
    }
}

/// Replays a fixed list of candidate decisions, then accepts.
///
/// Polls return `Quit` once `quit_after_polls` iterations have been polled.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDecisions {
    verdicts: VecDeque<Decision>,
    quit_after_polls: Option<usize>,
    polls: usize,
    decided: usize,
}

impl ScriptedDecisions {
    pub fn new(verdicts: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            verdicts: verdicts.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn quit_after_polls(mut self, polls: usize) -> Self {
        self.quit_after_polls = Some(polls);
        self
    }

    /// Number of candidates presented so far.
    pub fn decided(&self) -> usize {
        self.decided
    }
}

impl DecisionPort for ScriptedDecisions {
    fn poll(&mut self) -> Decision {
        self.polls += 1;
        match self.quit_after_polls {
            Some(limit) if self.polls > limit => Decision::Quit,
            _ => Decision::Continue,
        }
    }

    fn decide(&mut self, _candidate: &CandidateObservation) -> Decision {
        self.decided += 1;
        self.verdicts.pop_front().unwrap_or(Decision::Accept)
    }
}

/// Map a key press to an operator decision.
pub fn decision_for_key(key: Key) -> Option<Decision> {
    match key {
        Key::KeyA | Key::Return => Some(Decision::Accept),
        Key::KeyR | Key::Backspace => Some(Decision::Reject),
        Key::KeyQ | Key::Escape => Some(Decision::Quit),
        _ => None,
    }
}

/// Decision port driven by global key presses.
///
/// A: accept, R: reject, Q/Esc: quit. A candidate with no key press within
/// the review window is accepted.
pub struct KeyboardDecider {
    /// Most recent unconsumed decision
    pending: Arc<Mutex<Option<Decision>>>,
    /// Flag to stop processing events
    stop_flag: Arc<AtomicBool>,
    listener_thread: Option<JoinHandle<()>>,
    review_window: Duration,
}

impl KeyboardDecider {
    pub fn new(review_window: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(None)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            listener_thread: None,
            review_window,
        }
    }

    /// Start listening for global key presses.
    ///
    /// On macOS, this requires Accessibility permission.
    pub fn start(&mut self) -> Result<(), String> {
        if self.listener_thread.is_some() {
            return Err("Keyboard listener already running".to_string());
        }

        let pending = Arc::clone(&self.pending);
        let stop_flag = Arc::clone(&self.stop_flag);

        let handle = thread::spawn(move || {
            let callback = move |event: Event| {
                if stop_flag.load(Ordering::SeqCst) {
                    return;
                }
                if let EventType::KeyPress(key) = event.event_type {
                    if let Some(decision) = decision_for_key(key) {
                        if let Ok(mut slot) = pending.lock() {
                            *slot = Some(decision);
                        }
                    }
                }
            };

            if let Err(e) = listen(callback) {
                log::error!("Keyboard listener error: {:?}", e);
            }
        });

        self.listener_thread = Some(handle);
        Ok(())
    }

    /// Stop reacting to key presses.
    ///
    /// rdev's listen() cannot be interrupted; the thread lives until exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.listener_thread = None;
    }

    fn take_pending(&self) -> Option<Decision> {
        self.pending.lock().map(|mut slot| slot.take()).unwrap_or(None)
    }
}

impl DecisionPort for KeyboardDecider {
    fn poll(&mut self) -> Decision {
        match self.take_pending() {
            Some(Decision::Quit) => Decision::Quit,
            _ => Decision::Continue,
        }
    }

    fn decide(&mut self, candidate: &CandidateObservation) -> Decision {
        // Accept or reject pressed before the candidate appeared doesn't count;
        // a quit does.
        if self.take_pending() == Some(Decision::Quit) {
            return Decision::Quit;
        }
        println!(
            "Pattern found in both cameras (frame pair {}): [A]ccept  [R]eject  [Q]uit",
            candidate.frame_index()
        );

        let deadline = Instant::now() + self.review_window;
        while Instant::now() < deadline {
            if let Some(decision) = self.take_pending() {
                return decision;
            }
            thread::sleep(Duration::from_millis(10));
        }
        Decision::Continue
    }
}

impl Drop for KeyboardDecider {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Quit request raised by Ctrl+C, checked once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct QuitSignal {
    flag: Arc<AtomicBool>,
}

impl QuitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set up the Ctrl+C handler.
    ///
    /// This should be called once at program startup.
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let flag = Arc::clone(&self.flag);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
            eprintln!("\nReceived Ctrl+C, stopping capture...");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_for_key() {
        assert_eq!(decision_for_key(Key::KeyA), Some(Decision::Accept));
        assert_eq!(decision_for_key(Key::Return), Some(Decision::Accept));
        assert_eq!(decision_for_key(Key::KeyR), Some(Decision::Reject));
        assert_eq!(decision_for_key(Key::KeyQ), Some(Decision::Quit));
        assert_eq!(decision_for_key(Key::Escape), Some(Decision::Quit));
        assert_eq!(decision_for_key(Key::KeyZ), None);
    }

    #[test]
    fn test_scripted_decisions_replay_then_accept() {
        let candidate = CandidateObservation::for_tests(0);
        let mut port = ScriptedDecisions::new([Decision::Reject, Decision::Accept]);
        assert_eq!(port.decide(&candidate), Decision::Reject);
        assert_eq!(port.decide(&candidate), Decision::Accept);
        assert_eq!(port.decide(&candidate), Decision::Accept);
        assert_eq!(port.decided(), 3);
    }

    #[test]
    fn test_scripted_decisions_quit_after_polls() {
        let mut port = ScriptedDecisions::default().quit_after_polls(2);
        assert_eq!(port.poll(), Decision::Continue);
        assert_eq!(port.poll(), Decision::Continue);
        assert_eq!(port.poll(), Decision::Quit);
    }

    #[test]
    fn test_keyboard_decider_uses_pending_key() {
        let candidate = CandidateObservation::for_tests(0);
        let mut decider = KeyboardDecider::new(Duration::from_millis(20));

        // No key within the window: candidate goes through.
        assert_eq!(decider.decide(&candidate), Decision::Continue);

        *decider.pending.lock().unwrap() = Some(Decision::Quit);
        assert_eq!(decider.poll(), Decision::Quit);
        assert_eq!(decider.poll(), Decision::Continue);

        // Stale accept is not treated as quit.
        *decider.pending.lock().unwrap() = Some(Decision::Accept);
        assert_eq!(decider.poll(), Decision::Continue);
    }

    #[test]
    fn test_keyboard_decider_keeps_quit_pressed_before_candidate() {
        let candidate = CandidateObservation::for_tests(3);
        let mut decider = KeyboardDecider::new(Duration::from_millis(20));

        *decider.pending.lock().unwrap() = Some(Decision::Quit);
        assert_eq!(decider.decide(&candidate), Decision::Quit);

        // A stale verdict is dropped and the window runs out.
        *decider.pending.lock().unwrap() = Some(Decision::Reject);
        assert_eq!(decider.decide(&candidate), Decision::Continue);
    }

    #[test]
    fn test_quit_signal_shared_between_clones() {
        let signal = QuitSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_raised());
        signal.raise();
        assert!(observer.is_raised());
    }

    #[test]
    fn test_decision_mode_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: DecisionMode,
        }
        let w: Wrapper = toml::from_str("mode = \"keyboard\"").unwrap();
        assert_eq!(w.mode, DecisionMode::Keyboard);
        let w: Wrapper = toml::from_str("mode = \"auto\"").unwrap();
        assert_eq!(w.mode, DecisionMode::Auto);
    }
}
