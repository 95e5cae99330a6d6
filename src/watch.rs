//! Three-state presence watcher.
//!
//! Generalizes the "wait for a target, react when it appears, re-arm when
//! it goes away" pattern: a probe is polled on an interval and the watcher
//! moves between `AwaitingTarget` and `Attached`, firing a callback on each
//! transition. The host decides what the probe inspects; nothing here knows
//! about any particular target.

use std::time::Duration;
use tokio::time;

use crate::batch::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingTarget,
    Attached,
}

pub struct Watcher<Probe, OnAttach, OnDetach> {
    interval: Duration,
    probe: Probe,
    on_attach: OnAttach,
    on_detach: OnDetach,
    stop: CancelToken,
}

impl<Probe, OnAttach, OnDetach> Watcher<Probe, OnAttach, OnDetach>
where
    Probe: FnMut() -> bool,
    OnAttach: FnMut(),
    OnDetach: FnMut(),
{
    pub fn new(
        interval: Duration,
        probe: Probe,
        on_attach: OnAttach,
        on_detach: OnDetach,
        stop: CancelToken,
    ) -> Self {
        Self {
            interval,
            probe,
            on_attach,
            on_detach,
            stop,
        }
    }

    /// Poll until the stop token fires. `on_attach` runs when the probe
    /// first reports the target present, `on_detach` when it goes away
    /// again; the watcher then waits for the next appearance.
    pub async fn run(mut self) {
        let mut state = State::AwaitingTarget;
        while !self.stop.is_cancelled() {
            let present = (self.probe)();
            match (state, present) {
                (State::AwaitingTarget, true) => {
                    state = State::Attached;
                    (self.on_attach)();
                }
                (State::Attached, false) => {
                    state = State::AwaitingTarget;
                    (self.on_detach)();
                }
                _ => {}
            }
            time::sleep(self.interval).await;
        }
    }
}
