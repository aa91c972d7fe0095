pub mod auth;
pub mod invitation;
pub mod mfa;
pub mod passkey;
pub mod tenant;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use std::net::SocketAddr;

use crate::middleware::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::services::{ClientMeta, EstablishedSession, SessionUser};

/// Session payload returned by every successful authentication.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBody {
    pub user: SessionUser,
    pub access_token: String,
    pub refresh_token: String,
}

impl From<EstablishedSession> for SessionBody {
    fn from(session: EstablishedSession) -> Self {
        Self {
            user: session.user,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
        }
    }
}

/// Request metadata recorded against refresh tokens and OTP issuance.
pub(crate) fn client_meta(headers: &HeaderMap, addr: SocketAddr) -> ClientMeta {
    ClientMeta {
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string()),
        ip_address: Some(addr.ip().to_string()),
    }
}

/// Set both session cookies: httpOnly, secure, strict same-site.
pub(crate) fn set_session_cookies(
    jar: CookieJar,
    session: &EstablishedSession,
    secure: bool,
) -> CookieJar {
    jar.add(session_cookie(
        ACCESS_TOKEN_COOKIE,
        session.access_token.clone(),
        secure,
    ))
    .add(session_cookie(
        REFRESH_TOKEN_COOKIE,
        session.refresh_token.clone(),
        secure,
    ))
}

/// Clear both session cookies.
pub(crate) fn clear_session_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build((ACCESS_TOKEN_COOKIE, "")).path("/").build())
        .remove(Cookie::build((REFRESH_TOKEN_COOKIE, "")).path("/").build())
}

fn session_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::SessionUser;
    use uuid::Uuid;

    fn session() -> EstablishedSession {
        EstablishedSession {
            user: SessionUser {
                user_id: Uuid::new_v4(),
                email: "a@x.com".to_string(),
                display_name: None,
                role: "owner".to_string(),
                permissions: vec![],
                selected_tenant_id: Uuid::new_v4(),
                tenants: vec![],
            },
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
        }
    }

    #[test]
    fn test_session_cookies_are_hardened() {
        let jar = set_session_cookies(CookieJar::new(), &session(), true);

        let access = jar.get(ACCESS_TOKEN_COOKIE).expect("access cookie");
        assert_eq!(access.value(), "access");
        assert_eq!(access.http_only(), Some(true));
        assert_eq!(access.secure(), Some(true));

        let refresh = jar.get(REFRESH_TOKEN_COOKIE).expect("refresh cookie");
        assert_eq!(refresh.value(), "refresh");
        assert_eq!(refresh.http_only(), Some(true));
    }

    #[test]
    fn test_session_body_shape() {
        let body = SessionBody::from(session());
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("accessToken").is_some());
        assert!(json.get("refreshToken").is_some());
        assert!(json["user"].get("selectedTenantId").is_some());
    }
}
