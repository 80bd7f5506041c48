//! Attribute mapping
//!
//! Translates between the semantic key vocabulary (class, type, label, id,
//! flags) and cryptoki attribute templates. Pure, no token access.
//!
//! A template built here is a conjunctive filter: each present field adds one
//! constraint and an empty template matches every object on the token.

use std::{fmt, str::FromStr};

use cryptoki::object::{Attribute, AttributeType, KeyType as NativeKeyType, ObjectClass};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{BrokerError, BrokerResult, TokenError, TokenOperation};

/// Attributes read for every listed object.
pub const RECORD_ATTRIBUTES: [AttributeType; 4] = [
    AttributeType::Class,
    AttributeType::KeyType,
    AttributeType::Label,
    AttributeType::Id,
];

/// Attributes read for a single detailed lookup.
pub const DETAIL_ATTRIBUTES: [AttributeType; 11] = [
    AttributeType::Class,
    AttributeType::KeyType,
    AttributeType::Label,
    AttributeType::Id,
    AttributeType::Token,
    AttributeType::Private,
    AttributeType::Sensitive,
    AttributeType::Extractable,
    AttributeType::Local,
    AttributeType::Modifiable,
    AttributeType::Destroyable,
];

// ==================== Key Class / Key Type ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyClass {
    SecretKey,
    PrivateKey,
    PublicKey,
}

impl KeyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyClass::SecretKey => "SECRET_KEY",
            KeyClass::PrivateKey => "PRIVATE_KEY",
            KeyClass::PublicKey => "PUBLIC_KEY",
        }
    }

    pub fn object_class(&self) -> ObjectClass {
        match self {
            KeyClass::SecretKey => ObjectClass::SECRET_KEY,
            KeyClass::PrivateKey => ObjectClass::PRIVATE_KEY,
            KeyClass::PublicKey => ObjectClass::PUBLIC_KEY,
        }
    }

    pub fn from_object_class(class: ObjectClass) -> Recognized<KeyClass> {
        if class == ObjectClass::SECRET_KEY {
            Recognized::Known(KeyClass::SecretKey)
        } else if class == ObjectClass::PRIVATE_KEY {
            Recognized::Known(KeyClass::PrivateKey)
        } else if class == ObjectClass::PUBLIC_KEY {
            Recognized::Known(KeyClass::PublicKey)
        } else {
            Recognized::Unknown(u64::from(*class))
        }
    }
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyClass {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SECRET_KEY" => Ok(KeyClass::SecretKey),
            "PRIVATE_KEY" => Ok(KeyClass::PrivateKey),
            "PUBLIC_KEY" => Ok(KeyClass::PublicKey),
            other => Err(BrokerError::validation(format!(
                "Unknown key class: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    Aes,
    Rsa,
    Ec,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Aes => "AES",
            KeyType::Rsa => "RSA",
            KeyType::Ec => "EC",
        }
    }

    pub fn native(&self) -> NativeKeyType {
        match self {
            KeyType::Aes => NativeKeyType::AES,
            KeyType::Rsa => NativeKeyType::RSA,
            KeyType::Ec => NativeKeyType::EC,
        }
    }

    pub fn from_native(key_type: NativeKeyType) -> Recognized<KeyType> {
        if key_type == NativeKeyType::AES {
            Recognized::Known(KeyType::Aes)
        } else if key_type == NativeKeyType::RSA {
            Recognized::Known(KeyType::Rsa)
        } else if key_type == NativeKeyType::EC {
            Recognized::Known(KeyType::Ec)
        } else {
            Recognized::Unknown(u64::from(*key_type))
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES" => Ok(KeyType::Aes),
            "RSA" => Ok(KeyType::Rsa),
            "EC" => Ok(KeyType::Ec),
            other => Err(BrokerError::validation(format!(
                "Unknown key type: {}",
                other
            ))),
        }
    }
}

/// Rendering of an attribute the token did not report.
pub const ABSENT_CODE: &str = "UNKNOWN_NONE";

/// A class or type read back from the token. Codes outside the supported
/// vocabulary are kept as `UNKNOWN_<code>` so enumeration never aborts.
/// Objects without the attribute at all (certificates and data objects carry
/// no `CKA_KEY_TYPE`) read as `Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recognized<T> {
    Known(T),
    Unknown(u64),
    Absent,
}

impl<T> Recognized<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Recognized::Known(value) => Some(value),
            Recognized::Unknown(_) | Recognized::Absent => None,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Recognized<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recognized::Known(value) => value.fmt(f),
            Recognized::Unknown(code) => write!(f, "UNKNOWN_{}", code),
            Recognized::Absent => f.write_str(ABSENT_CODE),
        }
    }
}

impl<T: FromStr> FromStr for Recognized<T> {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(value) = s.parse::<T>() {
            return Ok(Recognized::Known(value));
        }
        if s == ABSENT_CODE {
            return Ok(Recognized::Absent);
        }
        s.strip_prefix("UNKNOWN_")
            .and_then(|code| code.parse::<u64>().ok())
            .map(Recognized::Unknown)
            .ok_or_else(|| format!("Unrecognized value: {}", s))
    }
}

impl<T: fmt::Display> Serialize for Recognized<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: FromStr> Deserialize<'de> for Recognized<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl<T> From<T> for Recognized<T> {
    fn from(value: T) -> Self {
        Recognized::Known(value)
    }
}

// ==================== Records ====================

/// Semantic projection of a key object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    #[serde(rename = "key_class")]
    pub class: Recognized<KeyClass>,
    pub key_type: Recognized<KeyType>,
    pub label: Option<String>,
    /// Lowercase hex, `None` when the object carries no id.
    #[serde(rename = "key_id")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFlags {
    pub token: bool,
    pub private: bool,
    pub sensitive: bool,
    pub extractable: bool,
    pub local: bool,
    pub modifiable: bool,
    pub destroyable: bool,
}

/// A record together with its storage and protection flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDetail {
    #[serde(flatten)]
    pub record: KeyRecord,
    #[serde(flatten)]
    pub flags: KeyFlags,
}

// ==================== Filters ====================

/// Loosely typed search request, as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyQuery {
    #[serde(default)]
    pub key_class: Option<String>,
    #[serde(default)]
    pub key_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub key_id: Option<String>,
}

/// Validated search constraints. Absent fields do not constrain the match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub class: Option<KeyClass>,
    pub key_type: Option<KeyType>,
    pub label: Option<String>,
    pub id: Option<Vec<u8>>,
}

impl KeyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_label(label: impl Into<String>) -> Self {
        Self::new().with_label(label)
    }

    pub fn with_class(mut self, class: KeyClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_type(mut self, key_type: KeyType) -> Self {
        self.key_type = Some(key_type);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Parse a caller query. Empty strings count as absent.
    pub fn parse(query: &KeyQuery) -> BrokerResult<Self> {
        fn present(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|s| !s.is_empty())
        }

        Ok(Self {
            class: present(&query.key_class).map(str::parse).transpose()?,
            key_type: present(&query.key_type).map(str::parse).transpose()?,
            label: present(&query.label).map(str::to_string),
            id: present(&query.key_id).map(decode_id).transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.class.is_none() && self.key_type.is_none() && self.label.is_none() && self.id.is_none()
    }

    pub fn to_template(&self) -> Vec<Attribute> {
        to_template(self)
    }
}

impl TryFrom<&KeyQuery> for KeyFilter {
    type Error = BrokerError;

    fn try_from(query: &KeyQuery) -> Result<Self, Self::Error> {
        KeyFilter::parse(query)
    }
}

// ==================== Mapping ====================

/// Build a conjunctive search template, one attribute per present field.
pub fn to_template(filter: &KeyFilter) -> Vec<Attribute> {
    let mut template = Vec::new();

    if let Some(class) = filter.class {
        template.push(Attribute::Class(class.object_class()));
    }
    if let Some(key_type) = filter.key_type {
        template.push(Attribute::KeyType(key_type.native()));
    }
    if let Some(label) = &filter.label {
        template.push(Attribute::Label(label.as_bytes().to_vec()));
    }
    if let Some(id) = &filter.id {
        template.push(Attribute::Id(id.clone()));
    }

    template
}

/// Native attributes describing a record. Unknown class or type codes have
/// no native form and are rejected.
pub fn to_attributes(record: &KeyRecord) -> BrokerResult<Vec<Attribute>> {
    let class = record
        .class
        .known()
        .ok_or_else(|| BrokerError::validation(format!("Unsupported class: {}", record.class)))?;
    let key_type = record
        .key_type
        .known()
        .ok_or_else(|| BrokerError::validation(format!("Unsupported type: {}", record.key_type)))?;

    let mut filter = KeyFilter::new().with_class(*class).with_type(*key_type);
    if let Some(label) = &record.label {
        filter = filter.with_label(label.clone());
    }
    if let Some(id) = &record.id {
        filter = filter.with_id(decode_id(id)?);
    }

    Ok(to_template(&filter))
}

/// Reverse mapping for [`RECORD_ATTRIBUTES`]. Class must be present; a
/// missing key type maps to [`Recognized::Absent`].
pub fn from_attributes(attributes: &[Attribute]) -> BrokerResult<KeyRecord> {
    let mut class = None;
    let mut key_type = None;
    let mut label = None;
    let mut id = None;

    for attribute in attributes {
        match attribute {
            Attribute::Class(value) => class = Some(KeyClass::from_object_class(*value)),
            Attribute::KeyType(value) => key_type = Some(KeyType::from_native(*value)),
            Attribute::Label(bytes) => label = decode_label(bytes),
            Attribute::Id(bytes) => id = encode_id(bytes),
            _ => {}
        }
    }

    let missing = |name: &str| {
        BrokerError::token(TokenOperation::GetAttributes)(TokenError::other(format!(
            "object has no {}",
            name
        )))
    };

    Ok(KeyRecord {
        class: class.ok_or_else(|| missing("CKA_CLASS"))?,
        key_type: key_type.unwrap_or(Recognized::Absent),
        label,
        id,
    })
}

/// Boolean flags of [`DETAIL_ATTRIBUTES`]. Flags the token did not report are `false`.
pub fn flags_from_attributes(attributes: &[Attribute]) -> KeyFlags {
    let mut flags = KeyFlags::default();
    for attribute in attributes {
        match attribute {
            Attribute::Token(v) => flags.token = *v,
            Attribute::Private(v) => flags.private = *v,
            Attribute::Sensitive(v) => flags.sensitive = *v,
            Attribute::Extractable(v) => flags.extractable = *v,
            Attribute::Local(v) => flags.local = *v,
            Attribute::Modifiable(v) => flags.modifiable = *v,
            Attribute::Destroyable(v) => flags.destroyable = *v,
            _ => {}
        }
    }
    flags
}

pub fn detail_from_attributes(attributes: &[Attribute]) -> BrokerResult<KeyDetail> {
    Ok(KeyDetail {
        record: from_attributes(attributes)?,
        flags: flags_from_attributes(attributes),
    })
}

/// Decode label bytes, replacing invalid UTF-8. Empty labels map to `None`.
pub fn decode_label(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Render id bytes as lowercase hex. Empty ids map to `None`.
pub fn encode_id(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    Some(hex::encode(bytes))
}

pub fn decode_id(id: &str) -> BrokerResult<Vec<u8>> {
    hex::decode(id).map_err(|e| BrokerError::validation(format!("Invalid key id {:?}: {}", id, e)))
}
