//! Next-episode timing: when to scrape the next episode ahead and when to
//! ask whether to continue.

use cinemeld_core::host::BingeChoice;

use crate::PlaybackConfig;

/// Shortest time the prompt stays up, in seconds.
const MIN_PROMPT: f64 = 45.0;

/// Seconds before the end at which the prompt appears.
pub fn prompt_window(duration: f64, fraction: f64, outro_start: Option<f64>) -> f64 {
    let base = (duration * fraction).max(MIN_PROMPT);
    match outro_start {
        Some(start) if start > 0.0 && start < duration => base.max(duration - start),
        _ => base,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BingeStep {
    PreScrape,
    Prompt,
}

#[derive(Debug, Clone)]
pub struct BingeEngine {
    prescrape_after: f64,
    prescrape_window: f64,
    prompt_fraction: f64,
    outro_start: Option<f64>,
    /// Position playback began from in this session.
    start: f64,
    prescraped: bool,
    prompted: bool,
    choice: Option<BingeChoice>,
}

impl BingeEngine {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            prescrape_after: config.prescrape_after,
            prescrape_window: config.prescrape_window,
            prompt_fraction: config.binge_prompt_fraction,
            outro_start: None,
            start: 0.0,
            prescraped: false,
            prompted: false,
            choice: None,
        }
    }

    pub fn set_outro(&mut self, start: Option<f64>) {
        self.outro_start = start;
    }

    /// Playback resumed at `position` rather than the beginning.
    pub fn started_at(&mut self, position: f64) {
        self.start = position.max(0.0);
    }

    /// Steps that became due at playback position `time`. Each fires once.
    /// The pre-scrape waits for `prescrape_after` seconds played in this
    /// session, counted from where playback began.
    pub fn due(&mut self, time: f64, duration: f64) -> Vec<BingeStep> {
        let mut steps = Vec::new();
        if duration <= 0.0 {
            return steps;
        }
        let remaining = duration - time;
        let played = time - self.start;
        if !self.prescraped && played >= self.prescrape_after && remaining <= self.prescrape_window {
            self.prescraped = true;
            steps.push(BingeStep::PreScrape);
        }
        if !self.prompted && remaining <= prompt_window(duration, self.prompt_fraction, self.outro_start) {
            self.prompted = true;
            steps.push(BingeStep::Prompt);
        }
        steps
    }

    pub fn decide(&mut self, choice: BingeChoice) {
        self.choice = Some(choice);
    }

    /// True when the prompt was shown and no answer came back yet.
    pub fn awaiting(&self) -> bool {
        self.prompted && self.choice.is_none()
    }

    pub fn continues(&self) -> bool {
        self.choice == Some(BingeChoice::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_has_a_floor_and_follows_the_outro() {
        assert_eq!(prompt_window(3600.0, 1.0 / 30.0, None), 120.0);
        assert_eq!(prompt_window(1200.0, 1.0 / 30.0, None), 45.0);
        assert_eq!(prompt_window(2400.0, 1.0 / 30.0, Some(2280.0)), 120.0);
        assert_eq!(prompt_window(2400.0, 1.0 / 30.0, Some(2200.0)), 200.0);
    }

    #[test]
    fn steps_fire_once_in_order() {
        let mut engine = BingeEngine::new(&PlaybackConfig::default());
        let mut fired = Vec::new();
        for t in (0..=3600).step_by(10) {
            for step in engine.due(t as f64, 3600.0) {
                fired.push((t, step));
            }
        }
        assert_eq!(fired, vec![(3000, BingeStep::PreScrape), (3480, BingeStep::Prompt)]);
        assert!(engine.awaiting());
        engine.decide(BingeChoice::Continue);
        assert!(engine.continues());
    }

    #[test]
    fn short_episodes_never_prescrape_early() {
        let mut engine = BingeEngine::new(&PlaybackConfig::default());
        assert!(engine.due(100.0, 500.0).is_empty());
        assert_eq!(engine.due(300.0, 500.0), vec![BingeStep::PreScrape]);
    }

    #[test]
    fn resumed_sessions_count_play_from_the_resume_point() {
        let mut engine = BingeEngine::new(&PlaybackConfig::default());
        engine.started_at(2800.0);
        assert!(engine.due(3010.0, 3600.0).is_empty());
        assert_eq!(engine.due(3100.0, 3600.0), vec![BingeStep::PreScrape]);
    }
}
