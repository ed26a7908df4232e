//! Collaborator seams.
//!
//! The core never drives a login page, stores a row or decrypts a secret
//! itself; it goes through these traits.

pub mod automation;
pub mod persistence;
pub mod renewal;
pub mod vault;

pub use automation::AutomationAdapter;
pub use persistence::{AuditRecord, RefreshTarget, SessionRecord, SessionStore, StoredCredentials};
pub use renewal::TokenReissuer;
pub use vault::{CredentialVault, DecryptedCredentials, Plaintext};
