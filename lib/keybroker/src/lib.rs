//! Key broker: PKCS#11 session and key lifecycle library
//!
//! This library maps key descriptions to native token attributes, scopes every
//! operation to one authenticated session, and lists, finds, creates and
//! deletes keys on the first available token.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod attributes;
pub mod broker;
pub mod config;
pub mod credential;
pub mod error;
pub mod keygen;
pub mod pkcs11;
pub mod session;
pub mod token;

#[cfg(test)]
mod mock;

pub use attributes::{
    DETAIL_ATTRIBUTES, KeyClass, KeyDetail, KeyFilter, KeyFlags, KeyQuery, KeyRecord, KeyType,
    RECORD_ATTRIBUTES, Recognized, decode_id, decode_label, detail_from_attributes, encode_id,
    flags_from_attributes, from_attributes, to_attributes, to_template,
};
pub use broker::{ConnectionStatus, DeleteOutcome, KeyBroker};
pub use config::{BrokerConfig, DEFAULT_LIBRARY_PATH, LIBRARY_ENV};
pub use credential::{Credential, derive_pin};
pub use error::{BrokerError, BrokerResult, TokenError, TokenOperation};
pub use keygen::{KeyGeneration, KeySpec};
pub use pkcs11::Pkcs11Token;
pub use session::{GuardState, SessionGuard, with_session};
pub use token::TokenBackend;
