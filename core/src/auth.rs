use crate::config::MIN_PASSWORD_LEN;
use crate::misc::Typename;
use crate::models::{AuthResponse, LoginRequest, Profile, RegisterRequest};
use crate::session::{self, Identity};
use crate::transport::{self, ApiRequest, AuthTransport};
use tracing::{info, warn};

pub const INVALID_CREDENTIALS: &str = "Invalid username or password";
pub const DEFAULT_ROLE: &str = "analyst";

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    /// Rejected before any request was sent
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error(transparent)]
    Session(#[from] session::Error),
}

impl Typename for Error {
    fn typename(&self) -> &'static str {
        self.into()
    }
}

impl Error {
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(msg) => msg.clone(),
            Error::Transport(transport::Error::RequestFailed { status: 401, detail: None }) => {
                INVALID_CREDENTIALS.to_string()
            }
            Error::Transport(e) => e.user_message(),
            Error::Session(_) => "Could not store the session token.".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub remember: bool,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub role: Option<String>,
}

pub fn validate_login(creds: &Credentials) -> Result<(), Error> {
    if creds.username.trim().is_empty() || creds.password.is_empty() {
        return Err(Error::Validation("Enter your username and password.".into()));
    }
    Ok(())
}

pub fn validate_registration(reg: &Registration) -> Result<(), Error> {
    if reg.username.trim().is_empty() {
        return Err(Error::Validation("Username is required.".into()));
    }
    if !reg.email.contains('@') {
        return Err(Error::Validation("Enter a valid email address.".into()));
    }
    if reg.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!("Password must be at least {MIN_PASSWORD_LEN} characters.")));
    }
    if reg.password != reg.confirm_password {
        return Err(Error::Validation("Passwords do not match.".into()));
    }
    Ok(())
}

fn identity_of(resp: AuthResponse, fallback_username: &str) -> (String, Identity) {
    let identity = Identity {
        username: resp.username.unwrap_or_else(|| fallback_username.to_string()),
        role: resp.role,
        full_name: resp.full_name,
    };
    (resp.token, identity)
}

/// Exchanges credentials for a token and makes it the live session. A 401
/// here means wrong credentials, never a teardown.
pub async fn login(transport: &AuthTransport, creds: &Credentials) -> Result<Identity, Error> {
    validate_login(creds)?;
    let username = creds.username.trim();
    let body = LoginRequest { username, password: &creds.password, remember_me: creds.remember };
    let req = ApiRequest::post("/api/login").json(serde_json::to_value(body).map_err(transport::Error::from)?);

    let resp = transport.send_public(req).await?;
    if !resp.is_ok() {
        warn!(user = username, status = resp.status, "login rejected");
    }
    let (token, identity) = identity_of(resp.into_result()?.json()?, username);
    transport.session().begin(token, identity.clone(), creds.remember).await?;
    info!(user = %identity.username, "logged in");
    Ok(identity)
}

pub async fn register(transport: &AuthTransport, reg: &Registration) -> Result<Identity, Error> {
    validate_registration(reg)?;
    let username = reg.username.trim();
    let body = RegisterRequest {
        full_name: reg.full_name.trim(),
        username,
        email: reg.email.trim(),
        password: &reg.password,
        role: reg.role.as_deref().unwrap_or(DEFAULT_ROLE),
    };
    let req = ApiRequest::post("/api/register").json(serde_json::to_value(body).map_err(transport::Error::from)?);

    let resp = transport.send_public(req).await?;
    let (token, identity) = identity_of(resp.into_result()?.json()?, username);
    transport.session().begin(token, identity.clone(), false).await?;
    info!(user = %identity.username, "registered");
    Ok(identity)
}

/// Token probe. `None` when the token was rejected and the session torn down.
pub async fn profile(transport: &AuthTransport) -> Result<Option<Identity>, Error> {
    let Some(profile) = transport.fetch_json::<Profile>(ApiRequest::get("/api/me")).await? else {
        return Ok(None);
    };
    let identity = Identity { username: profile.username, role: profile.role, full_name: profile.full_name };
    transport.session().set_identity(identity.clone());
    Ok(Some(identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Harness;
    use reqwest::Method;
    use serde_json::json;

    fn creds(user: &str, pass: &str) -> Credentials {
        Credentials { username: user.into(), password: pass.into(), remember: true }
    }

    fn registration(pass: &str, confirm: &str) -> Registration {
        Registration {
            full_name: "Alice Analyst".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password: pass.into(),
            confirm_password: confirm.into(),
            role: None,
        }
    }

    #[test]
    fn test_registration_validation() {
        assert!(validate_registration(&registration("longenough", "longenough")).is_ok());
        let short = validate_registration(&registration("short", "short")).unwrap_err();
        assert_eq!(short.user_message(), "Password must be at least 8 characters.");
        let mismatch = validate_registration(&registration("longenough", "longenougH")).unwrap_err();
        assert_eq!(mismatch.user_message(), "Passwords do not match.");

        let mut no_user = registration("longenough", "longenough");
        no_user.username = "  ".into();
        assert!(matches!(validate_registration(&no_user), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_validation_sends_nothing() {
        let h = Harness::new();
        assert!(matches!(login(&h.transport, &creds("", "x")).await, Err(Error::Validation(_))));
        assert!(register(&h.transport, &registration("abc", "abc")).await.is_err());
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_login_stores_durable_token() {
        let h = Harness::new();
        h.backend.reply(
            Method::POST,
            "/api/login",
            200,
            json!({"token": "tok-9", "username": "alice", "role": "admin", "full_name": "Alice A"}),
        );

        let identity = login(&h.transport, &creds(" alice ", "secret")).await.unwrap();
        assert_eq!(identity.role.as_deref(), Some("admin"));
        assert_eq!(h.session.token().as_deref(), Some("tok-9"));
        assert!(h.session.remembered());

        let calls = h.backend.calls();
        let sent = &calls[0];
        assert_eq!(sent.body, Some(json!({"username": "alice", "password": "secret", "remember_me": true})));
    }

    #[tokio::test]
    async fn test_wrong_credentials_detail_is_shown() {
        let h = Harness::new();
        h.backend.reply(Method::POST, "/api/login", 401, json!({"detail": "Invalid username or password"}));

        let err = login(&h.transport, &creds("alice", "nope")).await.unwrap_err();
        assert_eq!(err.user_message(), "Invalid username or password");
        assert_eq!(h.session.token(), None);
        assert_eq!(h.session.store().load().await.unwrap(), None);
        assert_eq!(h.metrics.teardowns(), 0);
    }

    #[tokio::test]
    async fn test_register_conflict_and_success() {
        let h = Harness::new();
        h.backend.reply(Method::POST, "/api/register", 400, json!({"detail": "Username already exists"}));
        h.backend.reply(Method::POST, "/api/register", 200, json!({"token": "new", "username": "alice"}));

        let err = register(&h.transport, &registration("longenough", "longenough")).await.unwrap_err();
        assert_eq!(err.user_message(), "Username already exists");

        let identity = register(&h.transport, &registration("longenough", "longenough")).await.unwrap();
        assert_eq!(identity.username, "alice");
        assert!(!h.session.remembered());
        assert_eq!(h.backend.calls()[1].body.as_ref().unwrap()["role"], "analyst");
    }

    #[tokio::test]
    async fn test_profile_probe() {
        let h = Harness::new();
        h.login().await;
        h.backend.reply(Method::GET, "/api/me", 200, json!({"username": "analyst", "full_name": "Ann"}));
        let identity = profile(&h.transport).await.unwrap().unwrap();
        assert_eq!(h.session.identity().unwrap().display_name(), "Ann");
        assert_eq!(identity.username, "analyst");
    }
}
