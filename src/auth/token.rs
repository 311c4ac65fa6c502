use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::vendors::Vendor;

/// Bearer credential issued by a vendor's OAuth endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub vendor: Vendor,
    pub value: String,
    pub token_type: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// True while more than `margin` remains before expiry.
    pub fn is_usable(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        (self.expires_at - now)
            .to_std()
            .map(|left| left > margin)
            .unwrap_or(false)
    }

    /// Value of the `authorization` header. Both vendors expect `Bearer`
    /// even though Kiwoom reports its type in lower case.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("vendor", &self.vendor)
            .field("value", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn token(expires_in_minutes: i64) -> (Token, DateTime<Utc>) {
        let now = Utc::now();
        let token = Token {
            vendor: Vendor::KoreaInvestment,
            value: "eyJ0eXAiOiJKV1QiLCJhbGciOiJIUzI1NiJ9".into(),
            token_type: "Bearer".into(),
            issued_at: now,
            expires_at: now + ChronoDuration::minutes(expires_in_minutes),
        };
        (token, now)
    }

    #[test]
    fn usable_only_outside_the_margin() {
        let margin = Duration::from_secs(10 * 60);
        let (fresh, now) = token(11);
        assert!(fresh.is_usable(now, margin));

        let (near_expiry, now) = token(9);
        assert!(!near_expiry.is_usable(now, margin));

        let (expired, now) = token(-1);
        assert!(!expired.is_usable(now, Duration::ZERO));
    }

    #[test]
    fn debug_never_prints_the_secret() {
        let (token, _) = token(60);
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("eyJ0eXAi"));
        assert_eq!(token.authorization(), format!("Bearer {}", token.value));
    }
}
