//! Session guard
//!
//! Scoped ownership of one native session:
//! `Closed -> SlotDiscovered -> Opened -> Authenticated -> LoggedOut -> Closed`.
//!
//! Release (logout, then close) runs from `Drop`, so it happens on every exit
//! path: normal return, early `?` return, or unwinding. Errors raised while
//! releasing are logged and never replace the outcome of the enclosed work.
//! Guards are never pooled; every logical operation opens its own.

use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType};
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::error::{BrokerError, BrokerResult, TokenError, TokenOperation};
use crate::token::TokenBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Closed,
    SlotDiscovered,
    Opened,
    Authenticated,
    LoggedOut,
}

pub struct SessionGuard<'a, B: TokenBackend> {
    backend: &'a B,
    session: Option<B::Session>,
    state: GuardState,
    slot_count: usize,
    login_attempted: bool,
}

impl<'a, B: TokenBackend> SessionGuard<'a, B> {
    /// Discover slots and open a session on the first one, without logging in.
    pub fn open(backend: &'a B) -> BrokerResult<Self> {
        let slots = backend
            .discover_slots()
            .map_err(BrokerError::token(TokenOperation::DiscoverSlots))?;
        let slot = *slots.first().ok_or(BrokerError::NoTokenAvailable)?;
        debug!(?slot, slots = slots.len(), "Slot discovered");

        let session = backend
            .open_session(slot)
            .map_err(BrokerError::token(TokenOperation::OpenSession))?;
        debug!(?slot, "Session opened");

        Ok(Self {
            backend,
            session: Some(session),
            state: GuardState::Opened,
            slot_count: slots.len(),
            login_attempted: false,
        })
    }

    /// Open a session and log in with the PIN derived from `credential`.
    ///
    /// On login failure the guard is dropped here, closing the session
    /// before `AuthenticationFailed` is returned.
    pub fn login(backend: &'a B, credential: &Credential) -> BrokerResult<Self> {
        let mut guard = Self::open(backend)?;
        guard.authenticate(credential)?;
        Ok(guard)
    }

    fn authenticate(&mut self, credential: &Credential) -> BrokerResult<()> {
        self.session()?;
        self.login_attempted = true;
        self.backend
            .login(self.session()?, &credential.pin())
            .map_err(|source| BrokerError::AuthenticationFailed { source })?;

        self.state = GuardState::Authenticated;
        debug!(username = credential.username(), "Session authenticated");
        Ok(())
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Slots with a token present when this guard was opened
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn session(&self) -> BrokerResult<&B::Session> {
        self.session.as_ref().ok_or_else(|| BrokerError::TokenOperationFailed {
            operation: TokenOperation::OpenSession,
            source: TokenError::other("session already released"),
        })
    }

    // ==================== Token Operations ====================

    pub fn find_objects(&self, template: &[Attribute]) -> BrokerResult<Vec<B::Object>> {
        self.backend
            .find_objects(self.session()?, template)
            .map_err(BrokerError::token(TokenOperation::FindObjects))
    }

    pub fn get_attributes(
        &self,
        object: B::Object,
        types: &[AttributeType],
    ) -> BrokerResult<Vec<Attribute>> {
        self.backend
            .get_attributes(self.session()?, object, types)
            .map_err(BrokerError::token(TokenOperation::GetAttributes))
    }

    pub fn generate_key(
        &self,
        mechanism: &Mechanism<'_>,
        template: &[Attribute],
    ) -> BrokerResult<B::Object> {
        self.backend
            .generate_key(self.session()?, mechanism, template)
            .map_err(BrokerError::token(TokenOperation::GenerateKey))
    }

    pub fn generate_key_pair(
        &self,
        mechanism: &Mechanism<'_>,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> BrokerResult<(B::Object, B::Object)> {
        self.backend
            .generate_key_pair(self.session()?, mechanism, public_template, private_template)
            .map_err(BrokerError::token(TokenOperation::GenerateKeyPair))
    }

    pub fn destroy_object(&self, object: B::Object) -> BrokerResult<()> {
        self.backend
            .destroy_object(self.session()?, object)
            .map_err(BrokerError::token(TokenOperation::DestroyObject))
    }

    // ==================== Release ====================

    fn release(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        // A failed login still gets a logout attempt; the token's refusal is logged
        if self.state == GuardState::Authenticated || self.login_attempted {
            if let Err(e) = self.backend.logout(&session) {
                warn!("Logout failed during session release: {}", e);
            }
            self.state = GuardState::LoggedOut;
            debug!("Session logged out");
        }

        if let Err(e) = self.backend.close_session(session) {
            warn!("Close failed during session release: {}", e);
        }
        self.state = GuardState::Closed;
        debug!("Session closed");
    }
}

impl<B: TokenBackend> Drop for SessionGuard<'_, B> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Run `work` inside an authenticated session that is released on return.
pub fn with_session<B, T, F>(backend: &B, credential: &Credential, work: F) -> BrokerResult<T>
where
    B: TokenBackend,
    F: FnOnce(&SessionGuard<'_, B>) -> BrokerResult<T>,
{
    let guard = SessionGuard::login(backend, credential)?;
    work(&guard)
}
