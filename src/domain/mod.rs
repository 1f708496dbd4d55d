//! Domain types shared by the codec, stores and key manager.

pub mod credential;

pub use credential::{
    CredentialMetadata, CredentialRecord, KeyStatus, NewCredential, ProviderKey, DEFAULT_KEY_TYPE,
};
