//! Key generation requests and their native templates

use cryptoki::mechanism::Mechanism;
use cryptoki::object::Attribute;
use cryptoki::types::Ulong;
use serde::{Deserialize, Serialize};

use crate::attributes::{KeyClass, KeyType, decode_id};
use crate::error::{BrokerError, BrokerResult};

/// AES key length in bytes when none is requested (256-bit)
pub const DEFAULT_AES_KEY_BYTES: u64 = 32;
pub const DEFAULT_RSA_MODULUS_BITS: u64 = 2048;
/// 65537
pub const RSA_PUBLIC_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];
pub const PUBLIC_LABEL_SUFFIX: &str = "-public";

fn enabled() -> bool {
    true
}

/// Request to create a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub label: String,
    #[serde(rename = "key_class")]
    pub class: KeyClass,
    pub key_type: KeyType,
    /// Bytes for AES, modulus bits for RSA
    #[serde(default)]
    pub key_size: Option<u64>,
    /// Hex id stamped on every generated object
    #[serde(default, rename = "key_id")]
    pub id: Option<String>,
    #[serde(default = "enabled")]
    pub token: bool,
    #[serde(default = "enabled")]
    pub private: bool,
    #[serde(default = "enabled")]
    pub sensitive: bool,
    #[serde(default)]
    pub extractable: bool,
    #[serde(default)]
    pub encrypt: Option<bool>,
    #[serde(default)]
    pub decrypt: Option<bool>,
    #[serde(default)]
    pub sign: Option<bool>,
    #[serde(default)]
    pub verify: Option<bool>,
}

impl KeySpec {
    pub fn new(label: impl Into<String>, class: KeyClass, key_type: KeyType) -> Self {
        Self {
            label: label.into(),
            class,
            key_type,
            key_size: None,
            id: None,
            token: true,
            private: true,
            sensitive: true,
            extractable: false,
            encrypt: None,
            decrypt: None,
            sign: None,
            verify: None,
        }
    }

    pub fn aes(label: impl Into<String>) -> Self {
        Self::new(label, KeyClass::SecretKey, KeyType::Aes)
    }

    pub fn rsa(label: impl Into<String>) -> Self {
        Self::new(label, KeyClass::PrivateKey, KeyType::Rsa)
    }

    pub fn with_size(mut self, key_size: u64) -> Self {
        self.key_size = Some(key_size);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Generation call planned from a [`KeySpec`], built before any session is opened.
#[derive(Debug, Clone)]
pub enum KeyGeneration {
    Secret {
        template: Vec<Attribute>,
    },
    Pair {
        public_template: Vec<Attribute>,
        private_template: Vec<Attribute>,
    },
}

impl KeyGeneration {
    pub fn plan(spec: &KeySpec) -> BrokerResult<Self> {
        if spec.label.is_empty() {
            return Err(BrokerError::validation("Label cannot be empty"));
        }
        if spec.key_size == Some(0) {
            return Err(BrokerError::validation("Key size must be positive"));
        }
        let id = spec
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(decode_id)
            .transpose()?;

        match (spec.class, spec.key_type) {
            (KeyClass::SecretKey, KeyType::Aes) => Ok(Self::aes(spec, id)),
            (KeyClass::PrivateKey | KeyClass::PublicKey, KeyType::Rsa) => Ok(Self::rsa(spec, id)),
            (KeyClass::SecretKey, KeyType::Rsa | KeyType::Ec)
            | (KeyClass::PrivateKey | KeyClass::PublicKey, KeyType::Aes | KeyType::Ec) => {
                Err(BrokerError::unsupported(format!(
                    "Key generation for {} {} is not supported",
                    spec.class, spec.key_type
                )))
            }
        }
    }

    fn aes(spec: &KeySpec, id: Option<Vec<u8>>) -> Self {
        let mut template = vec![
            Attribute::Class(KeyClass::SecretKey.object_class()),
            Attribute::Label(spec.label.as_bytes().to_vec()),
            Attribute::Token(spec.token),
            Attribute::Private(spec.private),
            Attribute::Sensitive(spec.sensitive),
            Attribute::Extractable(spec.extractable),
            Attribute::KeyType(KeyType::Aes.native()),
            Attribute::ValueLen(Ulong::from(
                spec.key_size.unwrap_or(DEFAULT_AES_KEY_BYTES),
            )),
        ];
        if let Some(encrypt) = spec.encrypt {
            template.push(Attribute::Encrypt(encrypt));
        }
        if let Some(decrypt) = spec.decrypt {
            template.push(Attribute::Decrypt(decrypt));
        }
        if let Some(id) = id {
            template.push(Attribute::Id(id));
        }

        KeyGeneration::Secret { template }
    }

    fn rsa(spec: &KeySpec, id: Option<Vec<u8>>) -> Self {
        let mut public_template = vec![
            Attribute::Class(KeyClass::PublicKey.object_class()),
            Attribute::KeyType(KeyType::Rsa.native()),
            Attribute::ModulusBits(Ulong::from(
                spec.key_size.unwrap_or(DEFAULT_RSA_MODULUS_BITS),
            )),
            Attribute::PublicExponent(RSA_PUBLIC_EXPONENT.to_vec()),
            Attribute::Label(format!("{}{}", spec.label, PUBLIC_LABEL_SUFFIX).into_bytes()),
            Attribute::Token(spec.token),
        ];
        let mut private_template = vec![
            Attribute::Class(KeyClass::PrivateKey.object_class()),
            Attribute::KeyType(KeyType::Rsa.native()),
            Attribute::Label(spec.label.as_bytes().to_vec()),
            Attribute::Token(spec.token),
            Attribute::Private(spec.private),
            Attribute::Sensitive(spec.sensitive),
            Attribute::Extractable(spec.extractable),
        ];

        if let Some(encrypt) = spec.encrypt {
            public_template.push(Attribute::Encrypt(encrypt));
        }
        if let Some(verify) = spec.verify {
            public_template.push(Attribute::Verify(verify));
        }
        if let Some(decrypt) = spec.decrypt {
            private_template.push(Attribute::Decrypt(decrypt));
        }
        if let Some(sign) = spec.sign {
            private_template.push(Attribute::Sign(sign));
        }
        if let Some(id) = id {
            public_template.push(Attribute::Id(id.clone()));
            private_template.push(Attribute::Id(id));
        }

        KeyGeneration::Pair {
            public_template,
            private_template,
        }
    }

    pub fn mechanism(&self) -> Mechanism<'static> {
        match self {
            KeyGeneration::Secret { .. } => Mechanism::AesKeyGen,
            KeyGeneration::Pair { .. } => Mechanism::RsaPkcsKeyPairGen,
        }
    }
}
