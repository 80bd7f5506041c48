//! Native token protocol
//!
//! The ten PKCS#11 steps the broker drives. Templates and mechanisms use the
//! cryptoki types directly; slot, session and object handles are opaque to
//! the broker and only meaningful to the backend that issued them.

use std::fmt::Debug;

use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType};

use crate::error::TokenError;

/// Trait for token access (allows a test double in place of a vendor module)
pub trait TokenBackend: Send + Sync {
    type Slot: Copy + Debug;
    type Session;
    type Object: Copy + Debug;

    /// Slots that currently have a token present, in token order.
    fn discover_slots(&self) -> Result<Vec<Self::Slot>, TokenError>;

    /// Open a read/write serial session on a slot.
    fn open_session(&self, slot: Self::Slot) -> Result<Self::Session, TokenError>;

    fn login(&self, session: &Self::Session, pin: &str) -> Result<(), TokenError>;

    fn find_objects(
        &self,
        session: &Self::Session,
        template: &[Attribute],
    ) -> Result<Vec<Self::Object>, TokenError>;

    /// Read attributes of an object. Attributes the object does not carry
    /// are left out of the result.
    fn get_attributes(
        &self,
        session: &Self::Session,
        object: Self::Object,
        types: &[AttributeType],
    ) -> Result<Vec<Attribute>, TokenError>;

    fn generate_key(
        &self,
        session: &Self::Session,
        mechanism: &Mechanism<'_>,
        template: &[Attribute],
    ) -> Result<Self::Object, TokenError>;

    /// Returns `(public, private)` handles.
    fn generate_key_pair(
        &self,
        session: &Self::Session,
        mechanism: &Mechanism<'_>,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> Result<(Self::Object, Self::Object), TokenError>;

    fn destroy_object(&self, session: &Self::Session, object: Self::Object)
    -> Result<(), TokenError>;

    fn logout(&self, session: &Self::Session) -> Result<(), TokenError>;

    fn close_session(&self, session: Self::Session) -> Result<(), TokenError>;
}
