//! The single-fire alarm lifecycle for one monitored slot.
//!
//! # State Machine
//!
//! ```text
//!          start()            Open               acknowledge()
//!  Idle ───────────► Monitoring ──────► Triggered ──────────────► Acknowledged
//!   ▲                  ▲   ▲                │                          │
//!   │                  │   └── Closed / ────┘                          │
//!   │                  │       OutsideSlot                             │
//!   │                  └──────────────── Closed / OutsideSlot ─────────┘
//!   │
//!   └──────────────────────── stop() (from any state) ─────────────────
//! ```
//!
//! - **Idle:** Not monitoring. Poll outcomes are ignored.
//! - **Monitoring:** Polling, no open episode seen.
//! - **Triggered:** The form is open and the alarm is sounding. Entered
//!   once per episode; repeated `Open` outcomes are no-ops.
//! - **Acknowledged:** The user silenced the alarm. `Open` outcomes of
//!   the same episode are ignored until the episode resolves.
//!
//! `Error` and `Unknown` outcomes never change state.
//!
//! Every method returns a [`Step`] describing the transition so the
//! caller can act on exactly the edges it cares about. The machine itself
//! performs no side effects.

pub mod sound;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::status::PollOutcome;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlarmState {
    #[default]
    Idle,
    Monitoring,
    Triggered,
    Acknowledged,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmAction {
    /// Entry action of `Triggered`: start playback and post the
    /// persistent notification.
    Raise,

    /// Exit action of `Triggered`: stop playback and cancel the
    /// persistent notification.
    Silence,
}

/// A transition (possibly to the same state) and its side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub from: AlarmState,
    pub to: AlarmState,
    pub action: Option<AlarmAction>,
}

impl Step {
    fn stay(state: AlarmState) -> Self {
        Self {
            from: state,
            to: state,
            action: None,
        }
    }

    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Default)]
pub struct AlarmStateMachine {
    state: AlarmState,
}

impl AlarmStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Begin monitoring. No-op unless idle.
    pub fn start(&mut self) -> Step {
        match self.state {
            AlarmState::Idle => self.go(AlarmState::Monitoring, None),
            state => Step::stay(state),
        }
    }

    /// Stop monitoring from any state, silencing an active alarm.
    pub fn stop(&mut self) -> Step {
        let action = (self.state == AlarmState::Triggered).then_some(AlarmAction::Silence);
        self.go(AlarmState::Idle, action)
    }

    /// Feed one poll outcome.
    ///
    /// | State | Open | Closed / OutsideSlot | Error / Unknown |
    /// |-------|------|----------------------|-----------------|
    /// | Idle | Idle | Idle | Idle |
    /// | Monitoring | Triggered (Raise) | Monitoring | Monitoring |
    /// | Triggered | Triggered | Monitoring (Silence) | Triggered |
    /// | Acknowledged | Acknowledged | Monitoring | Acknowledged |
    pub fn observe(&mut self, outcome: PollOutcome) -> Step {
        use AlarmState::*;

        match (self.state, outcome) {
            (Monitoring, PollOutcome::Open) => self.go(Triggered, Some(AlarmAction::Raise)),
            (Triggered, o) if o.resolves_episode() => {
                self.go(Monitoring, Some(AlarmAction::Silence))
            }
            (Acknowledged, o) if o.resolves_episode() => self.go(Monitoring, None),
            (state, _) => Step::stay(state),
        }
    }

    /// User acknowledgment. Only meaningful while triggered.
    pub fn acknowledge(&mut self) -> Step {
        match self.state {
            AlarmState::Triggered => {
                self.go(AlarmState::Acknowledged, Some(AlarmAction::Silence))
            }
            state => Step::stay(state),
        }
    }

    /// Adopt a state decided elsewhere, without side effects.
    ///
    /// Used to keep a channel's local copy in line with the shared
    /// per-slot state after another channel triggered, acknowledged or
    /// resolved the episode.
    pub fn converge(&mut self, target: AlarmState) -> Step {
        self.go(target, None)
    }

    fn go(&mut self, to: AlarmState, action: Option<AlarmAction>) -> Step {
        let from = self.state;
        self.state = to;
        Step { from, to, action }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Input {
        Poll(PollOutcome),
        Ack,
    }

    const ALL_INPUTS: [Input; 6] = [
        Input::Poll(PollOutcome::Open),
        Input::Poll(PollOutcome::Closed),
        Input::Poll(PollOutcome::OutsideSlot),
        Input::Poll(PollOutcome::Error),
        Input::Poll(PollOutcome::Unknown),
        Input::Ack,
    ];

    fn feed(machine: &mut AlarmStateMachine, input: Input) -> Step {
        match input {
            Input::Poll(outcome) => machine.observe(outcome),
            Input::Ack => machine.acknowledge(),
        }
    }

    fn monitoring() -> AlarmStateMachine {
        let mut machine = AlarmStateMachine::new();
        machine.start();
        machine
    }

    #[test]
    fn starts_idle_and_ignores_polls() {
        let mut machine = AlarmStateMachine::new();
        assert_eq!(machine.state(), AlarmState::Idle);
        let step = machine.observe(PollOutcome::Open);
        assert_eq!(step.to, AlarmState::Idle);
        assert_eq!(step.action, None);
    }

    #[test]
    fn start_is_noop_unless_idle() {
        let mut machine = monitoring();
        machine.observe(PollOutcome::Open);
        let step = machine.start();
        assert!(!step.changed());
        assert_eq!(machine.state(), AlarmState::Triggered);
    }

    #[test]
    fn documented_scenario() {
        // Monitoring, Open, Open, Acknowledge, Open, Closed, Open
        let mut machine = AlarmStateMachine::new();
        let mut states = vec![machine.start().to];
        let mut triggers = 0;

        for input in [
            Input::Poll(PollOutcome::Open),
            Input::Poll(PollOutcome::Open),
            Input::Ack,
            Input::Poll(PollOutcome::Open),
            Input::Poll(PollOutcome::Closed),
            Input::Poll(PollOutcome::Open),
        ] {
            let step = feed(&mut machine, input);
            if step.action == Some(AlarmAction::Raise) {
                triggers += 1;
            }
            states.push(step.to);
        }

        use AlarmState::*;
        assert_eq!(triggers, 2);
        assert_eq!(
            states,
            [
                Monitoring,
                Triggered,
                Triggered,
                Acknowledged,
                Acknowledged,
                Monitoring,
                Triggered
            ]
        );
    }

    #[test]
    fn repeated_open_does_not_retrigger() {
        let mut machine = monitoring();
        assert_eq!(
            machine.observe(PollOutcome::Open).action,
            Some(AlarmAction::Raise)
        );
        for _ in 0..5 {
            let step = machine.observe(PollOutcome::Open);
            assert_eq!(step.action, None);
            assert_eq!(step.to, AlarmState::Triggered);
        }
    }

    #[test]
    fn errors_do_not_interrupt_an_episode() {
        let mut machine = monitoring();
        machine.observe(PollOutcome::Open);
        assert_eq!(machine.observe(PollOutcome::Error).action, None);
        assert_eq!(machine.observe(PollOutcome::Unknown).action, None);
        assert_eq!(machine.observe(PollOutcome::Open).action, None);
        assert_eq!(machine.state(), AlarmState::Triggered);
    }

    #[test]
    fn resolution_silences_triggered_alarm() {
        let mut machine = monitoring();
        machine.observe(PollOutcome::Open);
        let step = machine.observe(PollOutcome::OutsideSlot);
        assert_eq!(step.to, AlarmState::Monitoring);
        assert_eq!(step.action, Some(AlarmAction::Silence));
    }

    #[test]
    fn resolution_after_acknowledge_is_silent() {
        let mut machine = monitoring();
        machine.observe(PollOutcome::Open);
        assert_eq!(machine.acknowledge().action, Some(AlarmAction::Silence));
        let step = machine.observe(PollOutcome::Closed);
        assert_eq!(step.to, AlarmState::Monitoring);
        assert_eq!(step.action, None);
    }

    #[test]
    fn acknowledge_without_trigger_is_noop() {
        let mut machine = monitoring();
        let step = machine.acknowledge();
        assert!(!step.changed());
        assert_eq!(step.action, None);
    }

    #[test]
    fn stop_silences_only_when_triggered() {
        let mut machine = monitoring();
        machine.observe(PollOutcome::Open);
        assert_eq!(machine.stop().action, Some(AlarmAction::Silence));
        assert_eq!(machine.state(), AlarmState::Idle);

        let mut machine = monitoring();
        machine.observe(PollOutcome::Open);
        machine.acknowledge();
        assert_eq!(machine.stop().action, None);
    }

    #[test]
    fn converge_never_requests_actions() {
        let mut machine = monitoring();
        let step = machine.converge(AlarmState::Triggered);
        assert_eq!(step.action, None);
        assert_eq!(machine.observe(PollOutcome::Open).action, None);
    }

    /// Check the firing invariants over every input sequence up to a
    /// fixed length:
    ///
    /// - Raise happens only on an `Open` that follows a resolution (or
    ///   the start of monitoring) with no earlier raise in between.
    /// - Every raise is balanced by exactly one silence before the next
    ///   raise.
    #[test]
    fn fires_at_most_once_per_episode() {
        const DEPTH: u32 = 6;
        let total = ALL_INPUTS.len().pow(DEPTH);

        for mut n in 0..total {
            let mut machine = monitoring();
            let mut armed = true;
            let mut sounding = false;
            let mut sequence = Vec::new();

            for _ in 0..DEPTH {
                let input = ALL_INPUTS[n % ALL_INPUTS.len()];
                n /= ALL_INPUTS.len();
                sequence.push(input);

                let step = feed(&mut machine, input);
                match step.action {
                    Some(AlarmAction::Raise) => {
                        assert!(armed, "re-triggered within an episode: {sequence:?}");
                        assert!(!sounding, "raised while sounding: {sequence:?}");
                        armed = false;
                        sounding = true;
                    }
                    Some(AlarmAction::Silence) => {
                        assert!(sounding, "silenced while quiet: {sequence:?}");
                        sounding = false;
                    }
                    None => {}
                }

                if let Input::Poll(outcome) = input {
                    if outcome.resolves_episode() {
                        armed = true;
                        assert!(!sounding, "episode resolved while sounding: {sequence:?}");
                    }
                }
            }
        }
    }
}
