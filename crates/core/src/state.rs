/// A job's position in the monotonic lifecycle `INIT -> WAITING ->
/// STARTING -> RUNNING -> DONE`, with `WAITING` and `STARTING` optional.
///
/// `JobState` implements `Ord` in lifecycle order so callers can assert "no
/// regression" with a plain `>=` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobState {
    /// Registered, not yet handed to a `Group` for admission.
    Init,
    /// Enqueued in a group's FIFO admission queue, blocked on a slot.
    Waiting,
    /// Admitted; child process is being spawned and wired up.
    Starting,
    /// Child process is running.
    Running,
    /// Child has exited (or been reaped after a signal) and the job has
    /// left its group and (unless kept for a pending `waitjobs`) the
    /// manager's registry.
    Done,
}

impl JobState {
    /// Whether this state counts against a group's `max_jobs` cap
    /// (`{STARTING, RUNNING}`).
    pub fn counts_against_group_cap(self) -> bool {
        matches!(self, JobState::Starting | JobState::Running)
    }
}

/// Per-group admission policy. `ident = None` denotes the unnamed default
/// group used when `enqueue` is called without `-g`.
#[derive(Debug, Clone, Default)]
pub struct GroupConfig {
    /// Group name, or `None` for the default group.
    pub ident: Option<String>,
    /// Maximum number of members in `{STARTING, RUNNING}`; `0` = unlimited.
    pub max_jobs: u32,
    /// Maximum system CPU percent at which new admissions proceed; `0.0` =
    /// unlimited.
    pub max_cpu: f64,
}

impl GroupConfig {
    /// A config with no caps at all — admission is immediate.
    pub fn unbounded(ident: Option<String>) -> Self {
        Self {
            ident,
            max_jobs: 0,
            max_cpu: 0.0,
        }
    }

    /// Whether this config has any cap at all (determines whether the
    /// group needs a FIFO admission queue rather than admitting instantly).
    pub fn has_caps(&self) -> bool {
        self.max_jobs > 0 || self.max_cpu > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_order_has_no_regressions() {
        assert!(JobState::Init < JobState::Waiting);
        assert!(JobState::Waiting < JobState::Starting);
        assert!(JobState::Starting < JobState::Running);
        assert!(JobState::Running < JobState::Done);
    }

    #[test]
    fn only_starting_and_running_count_against_cap() {
        assert!(!JobState::Init.counts_against_group_cap());
        assert!(!JobState::Waiting.counts_against_group_cap());
        assert!(JobState::Starting.counts_against_group_cap());
        assert!(JobState::Running.counts_against_group_cap());
        assert!(!JobState::Done.counts_against_group_cap());
    }

    #[test]
    fn unbounded_config_has_no_caps() {
        assert!(!GroupConfig::unbounded(None).has_caps());
    }
}
