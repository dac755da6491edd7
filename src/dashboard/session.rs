use crate::dashboard::config::DashboardConfig;

/// An open edit pass over the dashboard. `baseline` is the last config known
/// to be persisted; `pending` accumulates grid edits until they are saved or
/// discarded.
#[derive(Debug, Clone)]
pub struct EditSession {
    baseline: DashboardConfig,
    pending: DashboardConfig,
    dirty: bool,
}

impl EditSession {
    pub fn open(baseline: DashboardConfig) -> Self {
        Self {
            pending: baseline.clone(),
            baseline,
            dirty: false,
        }
    }

    pub fn pending(&self) -> &DashboardConfig {
        &self.pending
    }

    pub fn baseline(&self) -> &DashboardConfig {
        &self.baseline
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replace the pending config. Dirty tracks whether the arrangement
    /// really differs from the baseline, so an edit that is later undone
    /// leaves the session clean.
    pub fn update(&mut self, pending: DashboardConfig) {
        self.dirty = !pending.same_arrangement(&self.baseline);
        self.pending = pending;
    }

    /// After a save lands, the stored config becomes the new baseline and
    /// dirty is recomputed against whatever is pending now.
    pub fn rebase(&mut self, saved: DashboardConfig) {
        self.dirty = !self.pending.same_arrangement(&saved);
        self.baseline = saved;
    }
}
