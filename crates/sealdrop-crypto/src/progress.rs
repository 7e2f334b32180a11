//! Per-chunk progress notifications
//!
//! Observers are registered up front and receive one integer percentage per
//! completed chunk: `round(completed * 100 / total)`, non-decreasing, ending
//! at exactly 100. Failed or pending chunks never produce a notification.

/// Progress observer (percent complete, 0..=100)
pub type ProgressFn = Box<dyn Fn(u8) + Send + Sync>;

pub struct ProgressReporter {
    total: u64,
    completed: u64,
    observers: Vec<ProgressFn>,
}

impl ProgressReporter {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            completed: 0,
            observers: Vec::new(),
        }
    }

    /// Register an observer for subsequent chunk completions.
    pub fn subscribe(&mut self, observer: impl Fn(u8) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Register an already-boxed observer.
    pub fn subscribe_boxed(&mut self, observer: ProgressFn) {
        self.observers.push(observer);
    }

    /// Record one finished chunk and notify every observer.
    pub fn complete_chunk(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
        let pct = percent(self.completed, self.total);
        for observer in &self.observers {
            observer(pct);
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("total", &self.total)
            .field("completed", &self.completed)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// `round(completed / total * 100)`, halves rounding up.
pub fn percent(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = completed.min(total) as u128;
    let total = total as u128;
    ((completed * 200 + total) / (total * 2)) as u8
}
