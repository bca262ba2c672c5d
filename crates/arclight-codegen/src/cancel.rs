//! Cooperative cancellation for kernel compilation
//!
//! Compilation can be long-running (GPU backends invoke a native compiler).
//! A `CancellationToken` is checked at pipeline phase boundaries, and always
//! before committing to the native compile call; a cancelled compilation
//! never yields a partial kernel.

use crate::error::{CodegenError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is never cancelled, for callers without a cancel path
    pub fn ignored() -> Self {
        Self::default()
    }

    /// Request cancellation; observed by all clones
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once `cancel` has been called on any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with [`CodegenError::Cancelled`] if cancellation was requested
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CodegenError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_clear() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.checkpoint().unwrap();
    }

    #[test]
    fn test_cancel_is_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.checkpoint(), Err(CodegenError::Cancelled)));
    }
}
