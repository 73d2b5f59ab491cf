//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] types. The JWT signing key and the payment webhook
//! secret are held as `SecretString` so that `Debug` output of any struct
//! that carries them is redacted.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let webhook_secret = SecretString::from("whsec-123");
//! assert!(!format!("{webhook_secret:?}").contains("whsec-123"));
//! assert_eq!(webhook_secret.expose_secret(), "whsec-123");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Compare a presented secret against the expected one without
/// short-circuiting on the first differing byte.
#[must_use]
pub fn constant_time_eq(presented: &str, expected: &SecretString) -> bool {
    let a = presented.as_bytes();
    let b = expected.expose_secret().as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
