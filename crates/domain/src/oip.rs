use std::sync::{Arc, Mutex};

/// Operation-in-progress state (§4.8). Transitions only go forward:
/// `Progress -> Success | Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OipState {
    Progress,
    Success,
    Fail,
}

#[derive(Debug, Default)]
struct OipInner {
    state: Option<OipState>,
    current: u64,
    end: Option<u64>,
    sub_oips: Vec<Oip>,
}

/// An addressable, pollable handle for a long-running operation.
///
/// Cloning an `Oip` shares the same underlying state (it is a thin
/// `Arc<Mutex<_>>` wrapper) so the task driving the operation and every
/// poller (REST handler, parent OIP) observe the same mutations.
#[derive(Debug, Clone)]
pub struct Oip(Arc<Mutex<OipInner>>);

impl Oip {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(OipInner {
            state: Some(OipState::Progress),
            ..Default::default()
        })))
    }

    pub fn with_end(end: u64) -> Self {
        let oip = Self::new();
        oip.0.lock().unwrap().end = Some(end);
        oip
    }

    pub fn state(&self) -> OipState {
        self.0.lock().unwrap().state.unwrap_or(OipState::Progress)
    }

    pub fn current(&self) -> u64 {
        self.0.lock().unwrap().current
    }

    pub fn end(&self) -> Option<u64> {
        self.0.lock().unwrap().end
    }

    pub fn sub_oips(&self) -> Vec<Oip> {
        self.0.lock().unwrap().sub_oips.clone()
    }

    /// Advance `current` by `delta`, saturating at `end` if one was set.
    pub fn advance(&self, delta: u64) {
        let mut inner = self.0.lock().unwrap();
        inner.current = inner
            .end
            .map(|end| (inner.current + delta).min(end))
            .unwrap_or(inner.current + delta);
    }

    pub fn push_sub_oip(&self, sub: Oip) {
        self.0.lock().unwrap().sub_oips.push(sub);
    }

    pub fn mark_success(&self) {
        self.0.lock().unwrap().state = Some(OipState::Success);
    }

    pub fn mark_fail(&self) {
        self.0.lock().unwrap().state = Some(OipState::Fail);
    }
}

impl Default for Oip {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_oip_starts_in_progress() {
        let oip = Oip::new();
        assert_eq!(oip.state(), OipState::Progress);
        assert_eq!(oip.current(), 0);
    }

    #[test]
    fn advance_saturates_at_end() {
        let oip = Oip::with_end(10);
        oip.advance(6);
        oip.advance(6);
        assert_eq!(oip.current(), 10);
    }

    #[test]
    fn sub_oips_are_append_only_via_push() {
        let top = Oip::new();
        top.push_sub_oip(Oip::new());
        top.push_sub_oip(Oip::new());
        assert_eq!(top.sub_oips().len(), 2);
    }

    #[test]
    fn state_transitions_forward() {
        let oip = Oip::new();
        oip.mark_success();
        assert_eq!(oip.state(), OipState::Success);
    }
}
