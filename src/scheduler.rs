//! Single-slot delayed-action scheduler.
//!
//! Holds at most one pending action. Scheduling replaces whatever was pending,
//! so a stale action can never fire after a newer decision.

/// Delayed actions the controller can arm.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    VbatMinCheck,
    PresetDc,
    PresetConfig,
    CheckActive,
    AdjustCcMode,
    EnterCcMode,
    CheckCcMode,
    EnterCvMode,
    CheckCvMode,
    CheckFpdoCvMode,
    /// Send the current adapter request, then resume the state's own action.
    PdMsgSend,
    AdjustTaVol,
    AdjustTaCur,
    CheckBypassMode,
    DcModeChange,
    StartReverse,
    CheckReverseActive,
    CheckReverseMode,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Pending {
    pub action: Action,
    pub due_ms: u64,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Scheduler {
    pending: Option<Pending>,
    now_ms: u64,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            pending: None,
            now_ms: 0,
        }
    }

    /// Arm `action` to fire after `delay_ms`, cancelling anything pending.
    pub fn schedule(&mut self, action: Action, delay_ms: u32) {
        #[cfg(feature = "defmt")]
        {
            if let Some(p) = self.pending {
                defmt::trace!("scheduler: {} superseded by {}", p.action, action);
            }
        }
        self.pending = Some(Pending {
            action,
            due_ms: self.now_ms + delay_ms as u64,
        });
    }

    /// Make the pending action due now.
    pub fn expedite(&mut self) {
        if let Some(p) = self.pending.as_mut() {
            p.due_ms = self.now_ms;
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Pending action and the time left until it is due.
    pub fn pending(&self) -> Option<(Action, u32)> {
        self.pending
            .map(|p| (p.action, p.due_ms.saturating_sub(self.now_ms).min(u32::MAX as u64) as u32))
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Take the pending action regardless of its deadline; the clock jumps to it.
    pub fn fire(&mut self) -> Option<Action> {
        let p = self.pending.take()?;
        self.now_ms = self.now_ms.max(p.due_ms);
        Some(p.action)
    }

    /// Advance the clock and take the pending action if it is due.
    pub fn advance(&mut self, elapsed_ms: u32) -> Option<Action> {
        self.now_ms += elapsed_ms as u64;
        match self.pending {
            Some(p) if p.due_ms <= self.now_ms => {
                self.pending = None;
                Some(p.action)
            }
            _ => None,
        }
    }
}
