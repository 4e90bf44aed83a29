use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a long-running operation
/// and whoever may want to stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// True when `token` is present and has been cancelled.
pub(crate) fn cancelled(token: Option<&CancelToken>) -> bool {
    token.map_or(false, CancelToken::is_cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!cancelled(Some(&token)));
        other.cancel();
        assert!(token.is_cancelled());
        assert!(cancelled(Some(&token)));
        assert!(!cancelled(None));
    }
}
