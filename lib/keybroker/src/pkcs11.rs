//! PKCS#11 backend over cryptoki
//!
//! Loads the vendor module once and drives it per call. No slot list,
//! session or login state is kept between calls.

use std::path::Path;

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use tracing::info;

use crate::config::BrokerConfig;
use crate::error::TokenError;
use crate::token::TokenBackend;

/// Loaded PKCS#11 module
pub struct Pkcs11Token {
    pkcs11: Pkcs11,
}

impl Pkcs11Token {
    /// Load and initialize the PKCS#11 module at `library_path`
    pub fn new(library_path: impl AsRef<Path>) -> Result<Self, TokenError> {
        let library_path = library_path.as_ref();
        info!("Loading PKCS#11 module from {}", library_path.display());

        let pkcs11 = Pkcs11::new(library_path)?;
        pkcs11.initialize(CInitializeArgs::OsThreads)?;

        Ok(Self { pkcs11 })
    }

    pub fn from_config(config: &BrokerConfig) -> Result<Self, TokenError> {
        Self::new(&config.library_path)
    }
}

impl TokenBackend for Pkcs11Token {
    type Slot = Slot;
    type Session = Session;
    type Object = ObjectHandle;

    fn discover_slots(&self) -> Result<Vec<Slot>, TokenError> {
        Ok(self.pkcs11.get_slots_with_token()?)
    }

    fn open_session(&self, slot: Slot) -> Result<Session, TokenError> {
        Ok(self.pkcs11.open_rw_session(slot)?)
    }

    fn login(&self, session: &Session, pin: &str) -> Result<(), TokenError> {
        session.login(UserType::User, Some(&AuthPin::new(pin.into())))?;
        Ok(())
    }

    fn find_objects(
        &self,
        session: &Session,
        template: &[Attribute],
    ) -> Result<Vec<ObjectHandle>, TokenError> {
        Ok(session.find_objects(template)?)
    }

    fn get_attributes(
        &self,
        session: &Session,
        object: ObjectHandle,
        types: &[AttributeType],
    ) -> Result<Vec<Attribute>, TokenError> {
        Ok(session.get_attributes(object, types)?)
    }

    fn generate_key(
        &self,
        session: &Session,
        mechanism: &Mechanism<'_>,
        template: &[Attribute],
    ) -> Result<ObjectHandle, TokenError> {
        Ok(session.generate_key(mechanism, template)?)
    }

    fn generate_key_pair(
        &self,
        session: &Session,
        mechanism: &Mechanism<'_>,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> Result<(ObjectHandle, ObjectHandle), TokenError> {
        Ok(session.generate_key_pair(mechanism, public_template, private_template)?)
    }

    fn destroy_object(&self, session: &Session, object: ObjectHandle) -> Result<(), TokenError> {
        session.destroy_object(object)?;
        Ok(())
    }

    fn logout(&self, session: &Session) -> Result<(), TokenError> {
        session.logout()?;
        Ok(())
    }

    fn close_session(&self, session: Session) -> Result<(), TokenError> {
        // cryptoki closes the handle on drop and logs C_CloseSession failures itself
        drop(session);
        Ok(())
    }
}
