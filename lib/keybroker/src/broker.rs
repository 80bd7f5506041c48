//! Key lifecycle broker
//!
//! Every operation opens its own authenticated session, does its work and
//! releases the session before returning. The broker holds no slot, session
//! or login state between calls, so one instance can serve concurrent callers.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::attributes::{
    DETAIL_ATTRIBUTES, KeyDetail, KeyFilter, KeyRecord, RECORD_ATTRIBUTES, detail_from_attributes,
    from_attributes,
};
use crate::config::BrokerConfig;
use crate::credential::Credential;
use crate::error::{BrokerError, BrokerResult, TokenOperation};
use crate::keygen::{KeyGeneration, KeySpec};
use crate::pkcs11::Pkcs11Token;
use crate::session::{SessionGuard, with_session};
use crate::token::TokenBackend;

/// Result of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// Objects matching the filter
    pub matched: usize,
    /// Objects actually destroyed
    pub deleted: usize,
}

/// Result of an unauthenticated connectivity probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Slots with a token present
    pub slots: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct KeyBroker<B: TokenBackend> {
    backend: B,
}

impl KeyBroker<Pkcs11Token> {
    /// Load the PKCS#11 module named by `config`
    pub fn from_config(config: &BrokerConfig) -> BrokerResult<Self> {
        let token = Pkcs11Token::from_config(config)
            .map_err(BrokerError::token(TokenOperation::Initialize))?;
        Ok(Self::new(token))
    }
}

impl<B: TokenBackend> KeyBroker<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    /// Verify that `credential` can log in to the token.
    pub fn authenticate(&self, credential: &Credential) -> BrokerResult<()> {
        with_session(&self.backend, credential, |_| Ok(()))?;
        info!(username = credential.username(), "Credential accepted by token");
        Ok(())
    }

    /// Open and close a session without logging in.
    pub fn check_connection(&self) -> ConnectionStatus {
        match SessionGuard::open(&self.backend) {
            Ok(guard) => ConnectionStatus {
                connected: true,
                slots: guard.slot_count(),
                error: None,
            },
            Err(e) => {
                warn!("Token connection check failed: {}", e);
                ConnectionStatus {
                    connected: false,
                    slots: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Every object on the token, in enumeration order.
    pub fn list(&self, credential: &Credential) -> BrokerResult<Vec<KeyRecord>> {
        self.filter(credential, &KeyFilter::new())
    }

    /// Objects matching every present field of `filter`.
    pub fn filter(
        &self,
        credential: &Credential,
        filter: &KeyFilter,
    ) -> BrokerResult<Vec<KeyRecord>> {
        let template = filter.to_template();

        with_session(&self.backend, credential, |guard| {
            let objects = guard.find_objects(&template)?;

            let mut records = Vec::with_capacity(objects.len());
            for object in objects {
                let record = guard
                    .get_attributes(object, &RECORD_ATTRIBUTES)
                    .and_then(|attributes| from_attributes(&attributes));
                match record {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(?object, "Skipping object: {}", e),
                }
            }

            Ok(records)
        })
    }

    /// First object matching `filter`, with its storage and protection flags.
    ///
    /// With several matches the first in token enumeration order wins; filter
    /// by id when the choice must be deterministic.
    pub fn find_one(&self, credential: &Credential, filter: &KeyFilter) -> BrokerResult<KeyDetail> {
        let template = filter.to_template();

        with_session(&self.backend, credential, |guard| {
            let object = guard
                .find_objects(&template)?
                .into_iter()
                .next()
                .ok_or(BrokerError::NotFound)?;

            let attributes = guard.get_attributes(object, &DETAIL_ATTRIBUTES)?;
            detail_from_attributes(&attributes)
        })
    }

    /// Generate a key or key pair described by `spec`.
    ///
    /// Fails with `Conflict` when an object already carries `spec.label`, and
    /// with `UnsupportedError` before touching the token when the class/type
    /// combination has no generation mechanism here.
    pub fn create(&self, credential: &Credential, spec: &KeySpec) -> BrokerResult<KeyRecord> {
        let plan = KeyGeneration::plan(spec)?;
        let label_template = KeyFilter::by_label(spec.label.as_str()).to_template();

        with_session(&self.backend, credential, |guard| {
            if !guard.find_objects(&label_template)?.is_empty() {
                return Err(BrokerError::Conflict {
                    label: spec.label.clone(),
                });
            }

            let mechanism = plan.mechanism();
            match &plan {
                KeyGeneration::Secret { template } => {
                    guard.generate_key(&mechanism, template)?;
                }
                KeyGeneration::Pair {
                    public_template,
                    private_template,
                } => {
                    guard.generate_key_pair(&mechanism, public_template, private_template)?;
                }
            }

            info!(
                label = %spec.label,
                class = %spec.class,
                key_type = %spec.key_type,
                "Key created"
            );

            Ok(KeyRecord {
                class: spec.class.into(),
                key_type: spec.key_type.into(),
                label: Some(spec.label.clone()),
                id: spec
                    .id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .map(str::to_ascii_lowercase),
            })
        })
    }

    /// Destroy every object matching `filter`.
    ///
    /// Objects that refuse destruction are logged and skipped; `deleted`
    /// counts only objects actually destroyed.
    pub fn delete(&self, credential: &Credential, filter: &KeyFilter) -> BrokerResult<DeleteOutcome> {
        let template = filter.to_template();

        with_session(&self.backend, credential, |guard| {
            let objects = guard.find_objects(&template)?;
            if objects.is_empty() {
                return Err(BrokerError::NotFound);
            }
            if filter.is_empty() {
                warn!(count = objects.len(), "Deleting with an empty filter");
            }

            let mut deleted = 0;
            for object in &objects {
                match guard.destroy_object(*object) {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!(?object, "Failed to destroy object: {}", e),
                }
            }

            info!(matched = objects.len(), deleted, "Delete finished");
            Ok(DeleteOutcome {
                matched: objects.len(),
                deleted,
            })
        })
    }
}
