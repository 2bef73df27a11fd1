/// Parley Crypto Library
///
/// Encryption at rest for message bodies (AES-256-GCM). One key per
/// deployment, supplied through configuration. Each stored message records
/// whether its body was sealed, so toggling encryption never requires a
/// migration of older rows.

pub mod encrypt;
pub mod keys;

pub use encrypt::BodyCipher;
