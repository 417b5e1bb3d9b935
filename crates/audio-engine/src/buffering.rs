//! Buffering controller.
//!
//! Separates "the caller asked to play" from "the source has enough data to
//! play": the graph is held while the read-ahead refills and released only when
//! it is full again and the logical state is still `Play`.

use audio_engine_types::{BufferingState, PlaybackState};

/// What the control loop must do to the graph after a buffering message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferingAction {
    Hold,
    Release,
    Nothing,
}

#[derive(Debug, Default)]
pub struct BufferingController {
    state: BufferingState,
}

impl BufferingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BufferingState {
        self.state
    }

    /// Forget everything; called when a new session starts.
    pub fn reset(&mut self) {
        self.state = BufferingState::Unbuffered;
    }

    pub fn on_percent(&mut self, percent: u8, logical: PlaybackState) -> BufferingAction {
        match (percent < 100, self.state) {
            (true, BufferingState::Buffering) => BufferingAction::Nothing,
            (true, _) => {
                self.state = BufferingState::Buffering;
                BufferingAction::Hold
            }
            (false, BufferingState::Buffering) => {
                self.state = BufferingState::Ready;
                if logical == PlaybackState::Play {
                    BufferingAction::Release
                } else {
                    BufferingAction::Nothing
                }
            }
            (false, _) => {
                self.state = BufferingState::Ready;
                BufferingAction::Nothing
            }
        }
    }

    /// Whether the graph must stay held even if the caller resumes.
    pub fn is_buffering(&self) -> bool {
        self.state == BufferingState::Buffering
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rising_sequence_holds_once_and_releases_once() {
        let mut ctl = BufferingController::new();
        let actions: Vec<_> = [50, 80, 100]
            .into_iter()
            .map(|p| ctl.on_percent(p, PlaybackState::Play))
            .collect();
        assert_eq!(
            actions,
            vec![
                BufferingAction::Hold,
                BufferingAction::Nothing,
                BufferingAction::Release
            ]
        );
        assert_eq!(ctl.state(), BufferingState::Ready);
    }

    #[test]
    fn full_buffer_while_paused_does_not_release() {
        let mut ctl = BufferingController::new();
        ctl.on_percent(10, PlaybackState::Play);
        assert_eq!(
            ctl.on_percent(100, PlaybackState::Pause),
            BufferingAction::Nothing
        );
        assert_eq!(ctl.state(), BufferingState::Ready);
    }

    #[test]
    fn hundred_without_buffering_is_ignored() {
        let mut ctl = BufferingController::new();
        assert_eq!(
            ctl.on_percent(100, PlaybackState::Play),
            BufferingAction::Nothing
        );
        assert_eq!(ctl.state(), BufferingState::Ready);
    }

    #[test]
    fn reset_returns_to_unbuffered() {
        let mut ctl = BufferingController::new();
        ctl.on_percent(0, PlaybackState::Play);
        ctl.reset();
        assert_eq!(ctl.state(), BufferingState::Unbuffered);
        assert!(!ctl.is_buffering());
    }
}
