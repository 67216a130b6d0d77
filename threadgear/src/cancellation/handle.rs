//! Handles and scoped subscriptions derived from a cancellation token.

use std::sync::Weak;

use super::token::{CancelCallback, TokenShared, TokenState};

/// A cloneable capability to observe and subscribe to a token's cancellation.
///
/// A handle never keeps its token alive. Once the owning token has been
/// dropped, the handle reports the token as cancelled and finalized, and any
/// callback registered through it fires synchronously.
#[derive(Clone)]
pub struct CancellationHandle {
    shared: Weak<TokenShared>,
}

impl CancellationHandle {
    pub(crate) fn new(shared: Weak<TokenShared>) -> Self {
        Self { shared }
    }

    /// Returns whether cancellation has been requested on the bound token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared
            .upgrade()
            .map_or(true, |shared| shared.is_cancelled())
    }

    /// Returns the lifecycle state of the bound token.
    #[must_use]
    pub fn state(&self) -> TokenState {
        self.shared
            .upgrade()
            .map_or(TokenState::Finalized, |shared| shared.state())
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.shared.upgrade().and_then(|shared| shared.reason())
    }

    /// Registers a callback to be invoked when the token is cancelled.
    ///
    /// If the token is already cancelled (or gone), the callback is invoked
    /// synchronously before this returns, and the returned subscription is
    /// inert. Otherwise the callback fires exactly once, on the thread that
    /// requests cancellation, unless the subscription is dropped first.
    pub fn on_cancelled<F>(&self, callback: F) -> Subscription
    where
        F: FnOnce() + Send + 'static,
    {
        let callback: CancelCallback = Box::new(callback);
        let Some(shared) = self.shared.upgrade() else {
            TokenShared::invoke_suppressed(callback);
            return Subscription::inert();
        };
        match shared.subscribe(callback) {
            Some(id) => Subscription {
                shared: self.shared.clone(),
                id: Some(id),
            },
            None => Subscription::inert(),
        }
    }
}

impl std::fmt::Debug for CancellationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// A scoped registration of a cancellation callback.
///
/// Dropping the subscription unregisters the callback; this is a no-op if
/// cancellation has already fired and drained the registry.
#[must_use = "dropping a Subscription unregisters its callback immediately"]
pub struct Subscription {
    shared: Weak<TokenShared>,
    id: Option<u64>,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            shared: Weak::new(),
            id: None,
        }
    }

    /// Returns whether the callback is still registered and waiting to fire.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match (self.id, self.shared.upgrade()) {
            (Some(id), Some(shared)) => shared.is_subscribed(id),
            _ => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let (Some(id), Some(shared)) = (self.id.take(), self.shared.upgrade()) {
            shared.unsubscribe(id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
