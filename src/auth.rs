//! Authentication endpoints: login, logout, token refresh.

use reqwest::header;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::{url_path_join, Client, USER_AGENT};
use crate::{CallsheetError, Result};

const REFRESH_PATH: &str = "auth/refresh-token";

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

impl Client {
    /// Log in with an email/password pair, storing the returned tokens on
    /// the client. Returns the full login payload (user profile included).
    ///
    /// Any credential rejection surfaces as
    /// [`CallsheetError::AuthenticationFailed`], whether the server answered
    /// with an error status or with `{"login": false}` in a 200 body.
    pub async fn log_in(&self, email: &str, password: &str) -> Result<Value> {
        let credentials = json!({ "email": email, "password": password });
        let body = match self.post("auth/login", &credentials).await {
            Ok(body) => body,
            Err(CallsheetError::Parameter { .. } | CallsheetError::NotAuthenticated { .. }) => {
                return Err(CallsheetError::AuthenticationFailed);
            }
            Err(other) => return Err(other),
        };
        if body.get("login").and_then(Value::as_bool) == Some(false) {
            return Err(CallsheetError::AuthenticationFailed);
        }
        let access = body.get("access_token").and_then(Value::as_str);
        let refresh = body.get("refresh_token").and_then(Value::as_str);
        match (access, refresh) {
            (Some(access), Some(refresh)) => self.set_tokens(access, refresh),
            (Some(access), None) => self.set_access_token(access),
            (None, _) => return Err(CallsheetError::AuthenticationFailed),
        }
        Ok(body)
    }

    /// Invalidate the session server-side and drop the stored tokens.
    ///
    /// A server without the logout route (404) is tolerated; the tokens are
    /// dropped locally all the same. Any other failure propagates and the
    /// tokens stay in place.
    pub async fn log_out(&self) -> Result<()> {
        match self.get("auth/logout", None).await {
            Ok(_) | Err(CallsheetError::RouteNotFound { .. }) => {
                self.clear_tokens();
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Trade the refresh token for a fresh access token.
    ///
    /// Uses a bare request on purpose: the refresh call must never enter
    /// the not-authenticated recovery loop it backs. Any non-success status
    /// is [`CallsheetError::NotAuthenticated`].
    pub async fn refresh_access_token(&self) -> Result<()> {
        let token = self.refresh_token().ok_or_else(|| CallsheetError::NotAuthenticated {
            path: REFRESH_PATH.to_string(),
        })?;
        let url = url_path_join([self.host().as_str(), REFRESH_PATH]);
        let response = self
            .http()
            .get(&url)
            .header(header::USER_AGENT, USER_AGENT)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CallsheetError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CallsheetError::NotAuthenticated {
                path: REFRESH_PATH.to_string(),
            });
        }
        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| CallsheetError::Http(e.to_string()))?;
        self.set_access_token(body.access_token);
        Ok(())
    }
}
