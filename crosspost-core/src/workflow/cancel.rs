use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative stop request, checked by the workflow between states.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that also trips once `budget` has elapsed from now.
    pub fn with_deadline(budget: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + budget),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// `Err` carries the reason the run should stop.
    pub fn check(&self) -> Result<(), String> {
        if self.flag.load(Ordering::SeqCst) {
            return Err("cancellation requested".to_string());
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err("wall-clock deadline exceeded".to_string());
            }
        }
        Ok(())
    }
}
