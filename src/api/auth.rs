//! Bearer key check in front of the device command routes
//!
//! Rejections answer in plain text like every other command error, with a
//! `WWW-Authenticate` challenge so clients know which scheme to use.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::ApiState;

/// What a command request carried in its `Authorization` header
#[derive(Debug, PartialEq, Eq)]
enum Presented<'a> {
    Nothing,
    /// Header present but not a bearer token
    OtherScheme,
    Bearer(&'a str),
}

impl<'a> Presented<'a> {
    fn from_headers(headers: &'a HeaderMap) -> Self {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Self::Nothing;
        };
        let Some((scheme, token)) = value.to_str().ok().and_then(|v| v.split_once(' ')) else {
            return Self::OtherScheme;
        };
        if scheme.eq_ignore_ascii_case("bearer") {
            Self::Bearer(token.trim())
        } else {
            Self::OtherScheme
        }
    }
}

fn unauthorized(reason: &'static str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        reason,
    )
        .into_response()
}

/// Let a device command through only with the bridge's key
///
/// Every command passes when the bridge runs without a key.
pub async fn authorize_command(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(key) = state.api_key.as_deref() else {
        return next.run(req).await;
    };

    let refused = match Presented::from_headers(req.headers()) {
        Presented::Bearer(token) if token == key => return next.run(req).await,
        Presented::Bearer(_) => "wrong API key",
        Presented::OtherScheme => "expected a bearer API key",
        Presented::Nothing => "missing API key",
    };
    tracing::warn!(
        method = %req.method(),
        path = %req.uri().path(),
        reason = refused,
        "device command refused"
    );
    unauthorized(refused)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn with_authorization(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn authorization_header_is_classified() {
        assert_eq!(Presented::from_headers(&HeaderMap::new()), Presented::Nothing);
        assert_eq!(
            Presented::from_headers(&with_authorization("Basic YWRtaW4=")),
            Presented::OtherScheme
        );
        assert_eq!(
            Presented::from_headers(&with_authorization("bridge-key-1")),
            Presented::OtherScheme
        );
        assert_eq!(
            Presented::from_headers(&with_authorization("bearer bridge-key-1")),
            Presented::Bearer("bridge-key-1")
        );
    }

    #[test]
    fn refusal_carries_a_bearer_challenge() {
        let response = unauthorized("missing API key");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
