//! Exchange API credentials.
//!
//! The secret is held in a zeroizing buffer and wiped on drop. `Debug`
//! never prints it.

use std::fmt;
use zeroize::Zeroize;

/// API key pair for signed exchange requests.
#[derive(Clone)]
pub struct ApiCredentials {
    /// API key (public identifier, sent as a header)
    pub api_key: String,
    /// API secret (HMAC key, never leaves the process)
    pub api_secret: zeroize::Zeroizing<String>,
}

impl ApiCredentials {
    /// Create new API credentials.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: zeroize::Zeroizing::new(api_secret.into()),
        }
    }

    /// Both halves present
    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: String = self.api_key.chars().take(4).collect();
        f.debug_struct("ApiCredentials")
            .field("api_key", &format!("{}…", shown))
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl Zeroize for ApiCredentials {
    fn zeroize(&mut self) {
        self.api_key.zeroize();
        self.api_secret.zeroize();
    }
}

impl Drop for ApiCredentials {
    fn drop(&mut self) {
        self.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_zeroize() {
        let mut creds = ApiCredentials::new("test_key", "test_secret");

        assert_eq!(creds.api_key, "test_key");
        assert_eq!(*creds.api_secret, "test_secret");

        creds.zeroize();

        assert!(creds.api_key.is_empty());
        assert!(!creds.is_complete());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = ApiCredentials::new("abcdefgh", "super_secret");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("abcd"));
        assert!(!printed.contains("super_secret"));
        assert!(!printed.contains("efgh"));
    }
}
