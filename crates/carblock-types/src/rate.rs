use std::time::Duration;

/// Outcome of a rate-limit check for one sender at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The sender may send now. `remaining` counts this send too, so it is
    /// always at least 1.
    Allowed { remaining: u32 },

    /// The sender is at the limit; the earliest retry that can succeed is
    /// `retry_after` from now.
    Denied { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}
