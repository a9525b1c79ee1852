//! Authorize against Entra ID using the client credentials flow.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::AccessToken;

/// Token endpoint base of the public Entra ID cloud.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] ServerError),
    #[error("token request cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
#[error("{status_code} status code")]
pub struct ServerError {
    pub status_code: u16,
}

fn check_status(res: &reqwest::Response) -> Result<(), ServerError> {
    let status = res.status();
    if !status.is_success() {
        return Err(ServerError {
            status_code: status.as_u16(),
        });
    }
    Ok(())
}

pub struct ClientCredentials {
    pub client: reqwest::Client,
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    /// Authority base URL; [`DEFAULT_AUTHORITY`] outside of tests.
    pub authority: String,
}

impl ClientCredentials {
    /// Perform the client credentials flow for one scope.
    pub async fn perform(&self, scope: &str) -> Result<AuthResponse, Error> {
        let params = &[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        let params = serde_urlencoded::to_string(params).expect("static form keys always encode");

        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id);

        let req = self
            .client
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(params)
            .build()?;

        let res = self.client.execute(req).await?;
        check_status(&res)?;
        let token_response = res.json().await?;
        Ok(token_response)
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    /// The issued access token.
    access_token: String,
    /// How long the token stays valid, in seconds.
    expires_in: u64,
}

impl From<AuthResponse> for AccessToken {
    fn from(auth: AuthResponse) -> Self {
        let AuthResponse {
            access_token,
            expires_in,
        } = auth;
        let expires_on = Instant::now() + Duration::from_secs(expires_in);
        Self {
            access_token,
            expires_on,
        }
    }
}

#[async_trait::async_trait]
impl super::TokenGenerator for ClientCredentials {
    type Error = Error;

    async fn get_token(
        &self,
        scope: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, Self::Error> {
        let auth_response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = self.perform(scope) => res?,
        };
        Ok(auth_response.into())
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use crate::db::auth::TokenGenerator;

    use super::*;

    fn generator(authority: String) -> ClientCredentials {
        ClientCredentials {
            client: reqwest::Client::new(),
            client_id: "invoice-backend".into(),
            client_secret: "s3cret".into(),
            tenant_id: "tenant-0".into(),
            authority,
        }
    }

    #[test]
    fn decodes_the_token_endpoint_response() {
        let body = r#"{"token_type":"Bearer","expires_in":3599,"access_token":"eyJ0eXAi"}"#;
        let auth: AuthResponse = serde_json::from_str(body).unwrap();
        let token = AccessToken::from(auth);
        assert_eq!(token.access_token, "eyJ0eXAi");
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn fetches_a_token_for_the_requested_scope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tenant-0/oauth2/v2.0/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "invoice-backend".into()),
                Matcher::UrlEncoded("scope".into(), "https://db.example/.default".into()),
            ]))
            .with_status(200)
            .with_body(serde_json::json!({"access_token": "T1", "expires_in": 3600}).to_string())
            .create_async()
            .await;

        let generator = generator(server.url());
        let token = generator
            .get_token("https://db.example/.default", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(token.access_token, "T1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_a_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/tenant-0/oauth2/v2.0/token")
            .with_status(401)
            .create_async()
            .await;

        let generator = generator(server.url());
        let err = generator
            .get_token("https://db.example/.default", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Server(ServerError { status_code: 401 })
        ));
    }

    #[tokio::test]
    async fn cancelled_signal_short_circuits_the_request() {
        let generator = generator("http://127.0.0.1:9".into());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = generator
            .get_token("https://db.example/.default", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
    }
}
