//! Acquisition state machine.
//!
//! Owns the operating mode and the action-dispatch table. The table is a
//! total pure function over `(state, action)` so coverage is checkable by
//! enumerating the full product; pairs with no defined effect are no-op
//! self-loops. Only this module invokes the controller's mode-changing
//! operations.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::controller::{Controller, Direction};
use crate::traits::Result;

/// Operating mode of the acquisition system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GrabState {
    /// Initial state before the first dispatch.
    Start = 0,
    /// Continuous free-running acquisition for live monitoring.
    Preview = 1,
    /// Bounded software-triggered acquisition with timing records.
    Burst = 2,
    /// Terminal state; no further effectful actions are accepted.
    Teardown = 3,
}

impl GrabState {
    /// Every state, for table-coverage tests.
    pub const ALL: [Self; 4] = [Self::Start, Self::Preview, Self::Burst, Self::Teardown];

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Start,
            1 => Self::Preview,
            2 => Self::Burst,
            _ => Self::Teardown,
        }
    }
}

/// Domain action produced from one input event and consumed once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No effect; also the synthetic action that re-enters preview.
    NoAction,
    /// Raise the shared gain by one step.
    GainIncrease,
    /// Lower the shared gain by one step.
    GainDecrease,
    /// Lengthen the shared exposure by one step.
    ExposureIncrease,
    /// Shorten the shared exposure by one step.
    ExposureDecrease,
    /// Run one timed burst.
    BurstGrab,
    /// Leave the command loop and tear down.
    Quit,
}

impl Action {
    /// Every action, for table-coverage tests.
    pub const ALL: [Self; 7] = [
        Self::NoAction,
        Self::GainIncrease,
        Self::GainDecrease,
        Self::ExposureIncrease,
        Self::ExposureDecrease,
        Self::BurstGrab,
        Self::Quit,
    ];
}

/// Controller operation named by a transition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// No controller call.
    None,
    /// [`Controller::start_preview`].
    StartPreview,
    /// [`Controller::burst_grab`].
    BurstGrab,
    /// [`Controller::gain_adjust`] up.
    GainIncrease,
    /// [`Controller::gain_adjust`] down.
    GainDecrease,
    /// [`Controller::exposure_adjust`] up.
    ExposureIncrease,
    /// [`Controller::exposure_adjust`] down.
    ExposureDecrease,
    /// [`Controller::quit`].
    Quit,
}

/// The dispatch table: every `(state, action)` pair maps to a defined
/// `(next state, effect)`.
///
/// In `Start`, any adjustment (or no action) first brings the system into
/// preview. Adjustments during `Burst` are deliberate no-ops so the command
/// thread stays out of in-flight trigger timing, and a burst cannot be
/// re-entered while bursting. `Quit` reaches `Teardown` from every
/// non-terminal state; `Teardown` absorbs everything.
#[must_use]
pub const fn transition(state: GrabState, action: Action) -> (GrabState, Effect) {
    match (state, action) {
        (GrabState::Start | GrabState::Preview, Action::Quit) => (GrabState::Teardown, Effect::Quit),
        (GrabState::Start, Action::BurstGrab) => (GrabState::Burst, Effect::BurstGrab),
        (GrabState::Start, _) => (GrabState::Preview, Effect::StartPreview),

        (GrabState::Preview, Action::NoAction) => (GrabState::Preview, Effect::None),
        (GrabState::Preview, Action::GainIncrease) => (GrabState::Preview, Effect::GainIncrease),
        (GrabState::Preview, Action::GainDecrease) => (GrabState::Preview, Effect::GainDecrease),
        (GrabState::Preview, Action::ExposureIncrease) => {
            (GrabState::Preview, Effect::ExposureIncrease)
        }
        (GrabState::Preview, Action::ExposureDecrease) => {
            (GrabState::Preview, Effect::ExposureDecrease)
        }
        (GrabState::Preview, Action::BurstGrab) => (GrabState::Burst, Effect::BurstGrab),

        (GrabState::Burst, Action::NoAction) => (GrabState::Preview, Effect::StartPreview),
        (GrabState::Burst, Action::Quit) => (GrabState::Teardown, Effect::Quit),
        (GrabState::Burst, _) => (GrabState::Burst, Effect::None),

        (GrabState::Teardown, _) => (GrabState::Teardown, Effect::None),
    }
}

/// Shared, atomically readable cell holding the current [`GrabState`].
///
/// Written only by the state machine; read by the frame event sink on
/// driver callback threads to decide whether to record and re-trigger.
#[derive(Debug)]
pub struct GrabStateCell(AtomicU8);

impl GrabStateCell {
    /// Create a cell holding `state`.
    #[must_use]
    pub fn new(state: GrabState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Current state.
    #[must_use]
    pub fn load(&self) -> GrabState {
        GrabState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: GrabState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Drives mode changes: looks up transitions, publishes the new state, and
/// runs the named controller operation.
pub struct StateMachine {
    state: Arc<GrabStateCell>,
    controller: Controller,
}

impl StateMachine {
    /// Build a machine around `controller`, publishing state through `state`.
    #[must_use]
    pub fn new(controller: Controller, state: Arc<GrabStateCell>) -> Self {
        Self { state, controller }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> GrabState {
        self.state.load()
    }

    /// The controller, for parameter inspection.
    #[must_use]
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// The controller, for configuration before the first dispatch.
    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    /// Apply one action, draining any follow-up the effect yields (a
    /// completed burst yields the synthetic `NoAction` that re-enters
    /// preview). Driver errors propagate; they are fatal to the run.
    pub fn dispatch(&mut self, action: Action) -> Result<()> {
        let mut pending = Some(action);
        while let Some(action) = pending.take() {
            let previous = self.state.load();
            let (next, effect) = transition(previous, action);
            log::info!("state: {previous:?}  action: {action:?}  -> {next:?}");
            self.state.store(next);
            pending = self.run_effect(effect)?;
        }
        Ok(())
    }

    fn run_effect(&mut self, effect: Effect) -> Result<Option<Action>> {
        match effect {
            Effect::None => Ok(None),
            Effect::StartPreview => self.controller.start_preview().map(|()| None),
            Effect::BurstGrab => self
                .controller
                .burst_grab()
                .map(|()| Some(Action::NoAction)),
            Effect::GainIncrease => self.controller.gain_adjust(Direction::Up).map(|()| None),
            Effect::GainDecrease => self.controller.gain_adjust(Direction::Down).map(|()| None),
            Effect::ExposureIncrease => self
                .controller
                .exposure_adjust(Direction::Up)
                .map(|()| None),
            Effect::ExposureDecrease => self
                .controller
                .exposure_adjust(Direction::Down)
                .map(|()| None),
            Effect::Quit => {
                self.controller.quit();
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_total_over_the_full_product() {
        for state in GrabState::ALL {
            for action in Action::ALL {
                let (next, _effect) = transition(state, action);
                assert!(
                    GrabState::ALL.contains(&next),
                    "transition({state:?}, {action:?}) left the state space"
                );
            }
        }
    }

    #[test]
    fn test_quit_reaches_teardown_from_every_non_terminal_state() {
        for state in [GrabState::Start, GrabState::Preview, GrabState::Burst] {
            let (next, effect) = transition(state, Action::Quit);
            assert_eq!(next, GrabState::Teardown);
            assert_eq!(effect, Effect::Quit);
        }
    }

    #[test]
    fn test_teardown_is_absorbing() {
        for action in Action::ALL {
            let (next, effect) = transition(GrabState::Teardown, action);
            assert_eq!(next, GrabState::Teardown);
            assert_eq!(effect, Effect::None);
        }
    }

    #[test]
    fn test_adjustments_are_noops_during_burst() {
        for action in [
            Action::GainIncrease,
            Action::GainDecrease,
            Action::ExposureIncrease,
            Action::ExposureDecrease,
            Action::BurstGrab,
        ] {
            let (next, effect) = transition(GrabState::Burst, action);
            assert_eq!(next, GrabState::Burst, "{action:?} must not leave Burst");
            assert_eq!(effect, Effect::None, "{action:?} must have no effect");
        }
    }

    #[test]
    fn test_start_enters_preview_on_any_adjustment() {
        for action in [
            Action::NoAction,
            Action::GainIncrease,
            Action::GainDecrease,
            Action::ExposureIncrease,
            Action::ExposureDecrease,
        ] {
            let (next, effect) = transition(GrabState::Start, action);
            assert_eq!(next, GrabState::Preview);
            assert_eq!(effect, Effect::StartPreview);
        }
    }

    #[test]
    fn test_burst_completion_reenters_preview() {
        let (next, effect) = transition(GrabState::Burst, Action::NoAction);
        assert_eq!(next, GrabState::Preview);
        assert_eq!(effect, Effect::StartPreview);
    }

    #[test]
    fn test_state_cell_round_trips() {
        let cell = GrabStateCell::new(GrabState::Start);
        assert_eq!(cell.load(), GrabState::Start);
        for state in GrabState::ALL {
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
    }
}
