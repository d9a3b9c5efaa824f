use serde::{Deserialize, Serialize};
use std::fmt;

/// The eight WordPress authentication keys and salts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecretKey {
    #[serde(rename = "AUTH_KEY")]
    AuthKey,
    #[serde(rename = "SECURE_AUTH_KEY")]
    SecureAuthKey,
    #[serde(rename = "LOGGED_IN_KEY")]
    LoggedInKey,
    #[serde(rename = "NONCE_KEY")]
    NonceKey,
    #[serde(rename = "AUTH_SALT")]
    AuthSalt,
    #[serde(rename = "SECURE_AUTH_SALT")]
    SecureAuthSalt,
    #[serde(rename = "LOGGED_IN_SALT")]
    LoggedInSalt,
    #[serde(rename = "NONCE_SALT")]
    NonceSalt,
}

impl SecretKey {
    /// All keys in the order wp-config.php conventionally lists them
    pub const ALL: [SecretKey; 8] = [
        SecretKey::AuthKey,
        SecretKey::SecureAuthKey,
        SecretKey::LoggedInKey,
        SecretKey::NonceKey,
        SecretKey::AuthSalt,
        SecretKey::SecureAuthSalt,
        SecretKey::LoggedInSalt,
        SecretKey::NonceSalt,
    ];

    /// The PHP constant name
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKey::AuthKey => "AUTH_KEY",
            SecretKey::SecureAuthKey => "SECURE_AUTH_KEY",
            SecretKey::LoggedInKey => "LOGGED_IN_KEY",
            SecretKey::NonceKey => "NONCE_KEY",
            SecretKey::AuthSalt => "AUTH_SALT",
            SecretKey::SecureAuthSalt => "SECURE_AUTH_SALT",
            SecretKey::LoggedInSalt => "LOGGED_IN_SALT",
            SecretKey::NonceSalt => "NONCE_SALT",
        }
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SecretKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SecretKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown secret key: {}", s))
    }
}
