//! In-memory token for tests
//!
//! Records every protocol call so tests can assert session balance and call
//! order, and exposes switches for the failure paths a real token can take.

use std::collections::HashSet;
use std::sync::Mutex;

use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass};
use cryptoki::types::Ulong;

use crate::attributes::KeyFlags;
use crate::error::TokenError;
use crate::token::TokenBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    DiscoverSlots,
    OpenSession,
    Login,
    FindObjects,
    GetAttributes,
    GenerateKey,
    GenerateKeyPair,
    DestroyObject,
    Logout,
    CloseSession,
}

#[derive(Debug, Clone)]
pub struct MockObject {
    pub handle: u64,
    pub class: ObjectClass,
    pub key_type: KeyType,
    pub label: Vec<u8>,
    pub id: Vec<u8>,
    pub flags: KeyFlags,
    pub value_len: Option<Ulong>,
    pub modulus_bits: Option<Ulong>,
    pub public_exponent: Option<Vec<u8>>,
    pub encrypt: Option<bool>,
    pub decrypt: Option<bool>,
    pub sign: Option<bool>,
    pub verify: Option<bool>,
}

impl MockObject {
    fn new(handle: u64, class: ObjectClass, key_type: KeyType) -> Self {
        Self {
            handle,
            class,
            key_type,
            label: Vec::new(),
            id: Vec::new(),
            flags: KeyFlags::default(),
            value_len: None,
            modulus_bits: None,
            public_exponent: None,
            encrypt: None,
            decrypt: None,
            sign: None,
            verify: None,
        }
    }

    fn apply(&mut self, template: &[Attribute]) {
        for attribute in template {
            match attribute {
                Attribute::Class(v) => self.class = *v,
                Attribute::KeyType(v) => self.key_type = *v,
                Attribute::Label(v) => self.label = v.clone(),
                Attribute::Id(v) => self.id = v.clone(),
                Attribute::Token(v) => self.flags.token = *v,
                Attribute::Private(v) => self.flags.private = *v,
                Attribute::Sensitive(v) => self.flags.sensitive = *v,
                Attribute::Extractable(v) => self.flags.extractable = *v,
                Attribute::ValueLen(v) => self.value_len = Some(*v),
                Attribute::ModulusBits(v) => self.modulus_bits = Some(*v),
                Attribute::PublicExponent(v) => self.public_exponent = Some(v.clone()),
                Attribute::Encrypt(v) => self.encrypt = Some(*v),
                Attribute::Decrypt(v) => self.decrypt = Some(*v),
                Attribute::Sign(v) => self.sign = Some(*v),
                Attribute::Verify(v) => self.verify = Some(*v),
                _ => {}
            }
        }
    }

    /// Only key objects carry CKA_KEY_TYPE
    fn is_key(&self) -> bool {
        self.class == ObjectClass::SECRET_KEY
            || self.class == ObjectClass::PRIVATE_KEY
            || self.class == ObjectClass::PUBLIC_KEY
    }

    fn matches(&self, template: &[Attribute]) -> bool {
        template.iter().all(|attribute| match attribute {
            Attribute::Class(v) => self.class == *v,
            Attribute::KeyType(v) => self.is_key() && self.key_type == *v,
            Attribute::Label(v) => self.label == *v,
            Attribute::Id(v) => self.id == *v,
            Attribute::Token(v) => self.flags.token == *v,
            _ => false,
        })
    }

    fn read(&self, types: &[AttributeType]) -> Vec<Attribute> {
        types
            .iter()
            .filter_map(|t| match t {
                AttributeType::Class => Some(Attribute::Class(self.class)),
                AttributeType::KeyType => self.is_key().then_some(Attribute::KeyType(self.key_type)),
                AttributeType::Label => Some(Attribute::Label(self.label.clone())),
                AttributeType::Id => Some(Attribute::Id(self.id.clone())),
                AttributeType::Token => Some(Attribute::Token(self.flags.token)),
                AttributeType::Private => Some(Attribute::Private(self.flags.private)),
                AttributeType::Sensitive => Some(Attribute::Sensitive(self.flags.sensitive)),
                AttributeType::Extractable => Some(Attribute::Extractable(self.flags.extractable)),
                AttributeType::Local => Some(Attribute::Local(self.flags.local)),
                AttributeType::Modifiable => Some(Attribute::Modifiable(self.flags.modifiable)),
                // Older tokens do not report CKA_DESTROYABLE
                AttributeType::Destroyable => None,
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct MockSession {
    id: u64,
}

#[derive(Default)]
struct MockState {
    slots: Vec<u64>,
    pin: String,
    objects: Vec<MockObject>,
    next_handle: u64,
    next_session: u64,
    open: HashSet<u64>,
    logged_in: HashSet<u64>,
    calls: Vec<Call>,
    last_opened_slot: Option<u64>,
    fail_open: bool,
    fail_release: bool,
    fail_generate: bool,
    fail_attributes: HashSet<u64>,
    fail_destroy: HashSet<u64>,
}

pub struct MockToken {
    state: Mutex<MockState>,
}

impl MockToken {
    /// One slot, accepting exactly `pin`
    pub fn new(pin: &str) -> Self {
        Self {
            state: Mutex::new(MockState {
                slots: vec![0],
                pin: pin.to_string(),
                next_handle: 1,
                next_session: 1,
                ..Default::default()
            }),
        }
    }

    pub fn without_slots() -> Self {
        Self::new("").with_slots(Vec::new())
    }

    pub fn with_slots(self, slots: Vec<u64>) -> Self {
        self.state().slots = slots;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    // ==================== Seeding ====================

    /// Store an object directly, bypassing the protocol. Returns its handle.
    pub fn insert(&self, class: ObjectClass, key_type: KeyType, label: &str, id: &[u8]) -> u64 {
        let mut state = self.state();
        let handle = state.next_handle;
        state.next_handle += 1;

        let mut object = MockObject::new(handle, class, key_type);
        object.label = label.as_bytes().to_vec();
        object.id = id.to_vec();
        object.flags = KeyFlags {
            token: true,
            private: true,
            sensitive: class != ObjectClass::PUBLIC_KEY,
            extractable: false,
            local: true,
            modifiable: true,
            destroyable: true,
        };
        state.objects.push(object);
        handle
    }

    pub fn insert_aes(&self, label: &str) -> u64 {
        self.insert(ObjectClass::SECRET_KEY, KeyType::AES, label, &[])
    }

    /// Store an RSA pair with both halves carrying `label`. Returns `(public, private)`.
    pub fn insert_rsa_pair(&self, label: &str) -> (u64, u64) {
        (
            self.insert(ObjectClass::PUBLIC_KEY, KeyType::RSA, label, &[]),
            self.insert(ObjectClass::PRIVATE_KEY, KeyType::RSA, label, &[]),
        )
    }

    // ==================== Failure Switches ====================

    pub fn fail_open(&self) {
        self.state().fail_open = true;
    }

    /// Make logout and close fail
    pub fn fail_release(&self) {
        self.state().fail_release = true;
    }

    pub fn fail_generate(&self) {
        self.state().fail_generate = true;
    }

    pub fn fail_attributes_for(&self, handle: u64) {
        self.state().fail_attributes.insert(handle);
    }

    pub fn fail_destroy_for(&self, handle: u64) {
        self.state().fail_destroy.insert(handle);
    }

    // ==================== Inspection ====================

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    /// Sessions opened but not yet closed
    pub fn open_sessions(&self) -> usize {
        self.state().open.len()
    }

    pub fn objects(&self) -> Vec<MockObject> {
        self.state().objects.clone()
    }

    pub fn object_labelled(&self, label: &str) -> Option<MockObject> {
        self.state()
            .objects
            .iter()
            .find(|o| o.label == label.as_bytes())
            .cloned()
    }

    pub fn last_opened_slot(&self) -> Option<u64> {
        self.state().last_opened_slot
    }
}

impl MockState {
    fn record(&mut self, call: Call) {
        self.calls.push(call);
    }

    fn require_login(&self, session: &MockSession) -> Result<(), TokenError> {
        if !self.open.contains(&session.id) {
            return Err(TokenError::other("CKR_SESSION_HANDLE_INVALID"));
        }
        if !self.logged_in.contains(&session.id) {
            return Err(TokenError::other("CKR_USER_NOT_LOGGED_IN"));
        }
        Ok(())
    }

    fn create(&mut self, template: &[Attribute]) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;

        let mut object = MockObject::new(handle, ObjectClass::DATA, KeyType::GENERIC_SECRET);
        object.flags.local = true;
        object.flags.modifiable = true;
        object.flags.destroyable = true;
        object.apply(template);
        self.objects.push(object);
        handle
    }
}

impl TokenBackend for MockToken {
    type Slot = u64;
    type Session = MockSession;
    type Object = u64;

    fn discover_slots(&self) -> Result<Vec<u64>, TokenError> {
        let mut state = self.state();
        state.record(Call::DiscoverSlots);
        Ok(state.slots.clone())
    }

    fn open_session(&self, slot: u64) -> Result<MockSession, TokenError> {
        let mut state = self.state();
        state.record(Call::OpenSession);
        if state.fail_open {
            return Err(TokenError::other("CKR_DEVICE_ERROR"));
        }
        let id = state.next_session;
        state.next_session += 1;
        state.open.insert(id);
        state.last_opened_slot = Some(slot);
        Ok(MockSession { id })
    }

    fn login(&self, session: &MockSession, pin: &str) -> Result<(), TokenError> {
        let mut state = self.state();
        state.record(Call::Login);
        if pin != state.pin {
            return Err(TokenError::other("CKR_PIN_INCORRECT"));
        }
        state.logged_in.insert(session.id);
        Ok(())
    }

    fn find_objects(
        &self,
        session: &MockSession,
        template: &[Attribute],
    ) -> Result<Vec<u64>, TokenError> {
        let mut state = self.state();
        state.record(Call::FindObjects);
        state.require_login(session)?;
        Ok(state
            .objects
            .iter()
            .filter(|o| o.matches(template))
            .map(|o| o.handle)
            .collect())
    }

    fn get_attributes(
        &self,
        session: &MockSession,
        object: u64,
        types: &[AttributeType],
    ) -> Result<Vec<Attribute>, TokenError> {
        let mut state = self.state();
        state.record(Call::GetAttributes);
        state.require_login(session)?;
        if state.fail_attributes.contains(&object) {
            return Err(TokenError::other("CKR_ATTRIBUTE_SENSITIVE"));
        }
        state
            .objects
            .iter()
            .find(|o| o.handle == object)
            .map(|o| o.read(types))
            .ok_or_else(|| TokenError::other("CKR_OBJECT_HANDLE_INVALID"))
    }

    fn generate_key(
        &self,
        session: &MockSession,
        mechanism: &Mechanism<'_>,
        template: &[Attribute],
    ) -> Result<u64, TokenError> {
        let mut state = self.state();
        state.record(Call::GenerateKey);
        state.require_login(session)?;
        if state.fail_generate || !matches!(mechanism, Mechanism::AesKeyGen) {
            return Err(TokenError::other("CKR_MECHANISM_INVALID"));
        }
        Ok(state.create(template))
    }

    fn generate_key_pair(
        &self,
        session: &MockSession,
        mechanism: &Mechanism<'_>,
        public_template: &[Attribute],
        private_template: &[Attribute],
    ) -> Result<(u64, u64), TokenError> {
        let mut state = self.state();
        state.record(Call::GenerateKeyPair);
        state.require_login(session)?;
        if state.fail_generate || !matches!(mechanism, Mechanism::RsaPkcsKeyPairGen) {
            return Err(TokenError::other("CKR_MECHANISM_INVALID"));
        }
        let public = state.create(public_template);
        let private = state.create(private_template);
        Ok((public, private))
    }

    fn destroy_object(&self, session: &MockSession, object: u64) -> Result<(), TokenError> {
        let mut state = self.state();
        state.record(Call::DestroyObject);
        state.require_login(session)?;
        if state.fail_destroy.contains(&object) {
            return Err(TokenError::other("CKR_ACTION_PROHIBITED"));
        }
        let before = state.objects.len();
        state.objects.retain(|o| o.handle != object);
        if state.objects.len() == before {
            return Err(TokenError::other("CKR_OBJECT_HANDLE_INVALID"));
        }
        Ok(())
    }

    fn logout(&self, session: &MockSession) -> Result<(), TokenError> {
        let mut state = self.state();
        state.record(Call::Logout);
        state.logged_in.remove(&session.id);
        if state.fail_release {
            return Err(TokenError::other("CKR_DEVICE_REMOVED"));
        }
        Ok(())
    }

    fn close_session(&self, session: MockSession) -> Result<(), TokenError> {
        let mut state = self.state();
        state.record(Call::CloseSession);
        state.open.remove(&session.id);
        if state.fail_release {
            return Err(TokenError::other("CKR_DEVICE_REMOVED"));
        }
        Ok(())
    }
}
