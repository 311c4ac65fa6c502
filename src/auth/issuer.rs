use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};

use crate::config::VendorConfig;
use crate::error::{AppError, Result};
use crate::fetch::transport::{HttpTransport, TransportError};
use crate::vendors::{self, Vendor};

use super::token::Token;

/// Performs a single issuance call; retry policy belongs to the caller.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, vendor: Vendor) -> Result<Token>;
}

/// Issues tokens against the vendors' OAuth endpoints.
pub struct VendorIssuer {
    transport: Arc<dyn HttpTransport>,
    vendors: HashMap<Vendor, VendorConfig>,
}

impl VendorIssuer {
    pub fn new(transport: Arc<dyn HttpTransport>, vendors: HashMap<Vendor, VendorConfig>) -> Self {
        Self { transport, vendors }
    }
}

#[async_trait]
impl TokenIssuer for VendorIssuer {
    async fn issue(&self, vendor: Vendor) -> Result<Token> {
        let config = self
            .vendors
            .get(&vendor)
            .ok_or_else(|| AppError::Config(vec![format!("no configuration for {vendor}")]))?;
        if !config.credentials.is_complete() {
            return Err(AppError::authentication(vendor, "app key or secret is not configured"));
        }

        let request = vendors::token_request(vendor, config);
        debug!("Requesting {} token from {}", vendor, request.url);

        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|err| transport_failure(vendor, err))?;

        let body = vendors::classify_response(vendor, &response).map_err(|err| match err {
            // A refused issuance means the credentials themselves are bad.
            AppError::Rejected { code, message, .. } => {
                AppError::authentication(vendor, format!("token request refused ({code}): {message}"))
            }
            other => other,
        })?;

        let token = vendors::parse_token(vendor, &body, Utc::now())?;
        info!("Issued {} token, expires at {}", vendor, token.expires_at);
        Ok(token)
    }
}

/// Network-level failures are transient unless the request itself was unusable.
pub fn transport_failure(vendor: Vendor, err: TransportError) -> AppError {
    if err.is_retryable() {
        AppError::transient(vendor, err.to_string())
    } else {
        AppError::message(format!("{vendor}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::fetch::transport::ApiResponse;
    use crate::testing::ScriptedTransport;

    fn issuer(transport: Arc<ScriptedTransport>) -> VendorIssuer {
        let mut config = VendorConfig::builtin(Vendor::KoreaInvestment);
        config.credentials = Credentials::new("PSkey", "PSsecret");
        VendorIssuer::new(transport, HashMap::from([(Vendor::KoreaInvestment, config)]))
    }

    #[tokio::test]
    async fn issues_token_from_oauth_response() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(ApiResponse::new(
            200,
            r#"{"access_token":"kis-1","token_type":"Bearer","expires_in":86400}"#,
        ));

        let token = issuer(Arc::clone(&transport))
            .issue(Vendor::KoreaInvestment)
            .await
            .unwrap();
        assert_eq!(token.value, "kis-1");

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].url.ends_with("/oauth2/tokenP"));
    }

    #[tokio::test]
    async fn credential_rejection_is_authentication_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(ApiResponse::new(
            403,
            r#"{"error_code":"EGW00103","error_description":"유효하지 않은 AppKey입니다."}"#,
        ));

        let err = issuer(transport).issue(Vendor::KoreaInvestment).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication { .. }));
    }

    #[tokio::test]
    async fn issuance_throttle_is_rate_limited() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(ApiResponse::new(
            403,
            r#"{"error_code":"EGW00133","error_description":"접근토큰 발급 잠시 후 다시 시도하세요(1분당 1회)"}"#,
        ));

        let err = issuer(transport).issue(Vendor::KoreaInvestment).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_network() {
        let transport = Arc::new(ScriptedTransport::new());
        let issuer = VendorIssuer::new(
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            HashMap::from([(Vendor::Kiwoom, VendorConfig::builtin(Vendor::Kiwoom))]),
        );

        let err = issuer.issue(Vendor::Kiwoom).await.unwrap_err();
        assert!(matches!(err, AppError::Authentication { .. }));
        assert!(transport.requests().is_empty());
    }
}
