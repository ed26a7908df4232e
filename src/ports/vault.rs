//! Credential encryption seam.

use crate::error::Result;
use std::collections::BTreeMap;
use std::fmt;

/// Decrypted secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Plaintext(String);

impl Plaintext {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Plaintext(***)")
    }
}

/// Decrypted credential fields, passed through to the automation adapter untouched
#[derive(Debug, Clone, Default)]
pub struct DecryptedCredentials {
    pub principal: String,
    pub fields: BTreeMap<String, Plaintext>,
}

impl DecryptedCredentials {
    pub fn get(&self, field: &str) -> Option<&Plaintext> {
        self.fields.get(field)
    }
}

/// Opaque encrypt/decrypt
pub trait CredentialVault: Send + Sync + fmt::Debug {
    fn encrypt(&self, plaintext: &Plaintext) -> Result<String>;

    fn decrypt(&self, ciphertext: &str) -> Result<Plaintext>;
}
