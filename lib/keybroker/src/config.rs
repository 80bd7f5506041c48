//! Broker configuration

use std::path::PathBuf;

pub const LIBRARY_ENV: &str = "PKCS11_LIB";
pub const DEFAULT_LIBRARY_PATH: &str = "/opt/cloudhsm/lib/libcloudhsm_pkcs11.so";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Path to the vendor PKCS#11 module
    pub library_path: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            library_path: PathBuf::from(DEFAULT_LIBRARY_PATH),
        }
    }
}

impl BrokerConfig {
    pub fn new(library_path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: library_path.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let library_path = lookup(LIBRARY_ENV)
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| DEFAULT_LIBRARY_PATH.to_string());

        Self::new(library_path)
    }
}
