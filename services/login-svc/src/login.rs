//! `POST /api/login`: compare the submitted pair with the configured one and
//! hand back a fresh opaque token.

use std::fmt;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use common_obs::{register_counter, CounterVec};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::validation::{FromValidForm, Validated};
use crate::{AppState, SERVICE_NAME};

pub const USERNAME_REQUIRED: &str = "username must not be empty";
pub const PASSWORD_REQUIRED: &str = "password must not be empty";

static LOGIN_ATTEMPTS: Lazy<CounterVec> = Lazy::new(|| {
    let counter = register_counter(
        "login_attempts_total",
        "Login attempts by outcome",
        &["service", "outcome"],
    );
    counter.ensure(&[SERVICE_NAME, "success"]);
    counter.ensure(&[SERVICE_NAME, "failure"]);
    counter
});

/// Login body as decoded. Missing and `null` fields fail `required`,
/// empty strings fail `length`.
#[derive(Default, Deserialize, Validate)]
pub struct LoginForm {
    #[validate(
        required(message = "username must not be empty"),
        length(min = 1, message = "username must not be empty")
    )]
    pub username: Option<String>,
    #[validate(
        required(message = "password must not be empty"),
        length(min = 1, message = "password must not be empty")
    )]
    pub password: Option<String>,
}

/// A login body whose fields are both present and non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl FromValidForm for LoginRequest {
    type Form = LoginForm;

    const FIELDS: &'static [&'static str] = &["username", "password"];

    fn from_valid_form(form: LoginForm) -> Self {
        Self {
            username: form.username.unwrap_or_default(),
            password: form.password.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResult {
    pub token: String,
    pub username: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Validated(request): Validated<LoginRequest>,
) -> Result<Json<Envelope<LoginResult>>, ApiError> {
    match state
        .authenticator
        .authenticate(&request.username, &request.password)
    {
        Ok(token) => {
            LOGIN_ATTEMPTS.inc(&[SERVICE_NAME, "success"], 1);
            tracing::info!(event = "login_succeeded", username = %request.username);
            Ok(Json(Envelope::success(LoginResult {
                token: token.into_string(),
                username: request.username,
            })))
        }
        Err(error) => {
            LOGIN_ATTEMPTS.inc(&[SERVICE_NAME, "failure"], 1);
            tracing::info!(event = "login_rejected", username = %request.username);
            Err(error.into())
        }
    }
}

/// Touch the login counters so they are exported before the first attempt.
pub(crate) fn register_metrics() {
    Lazy::force(&LOGIN_ATTEMPTS);
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::validation::FieldErrors;

    fn form(username: Option<&str>, password: Option<&str>) -> LoginForm {
        LoginForm {
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        }
    }

    fn errors_of(form: LoginForm) -> FieldErrors {
        let errors = form.validate().unwrap_err();
        FieldErrors::from_validation(&errors, LoginRequest::FIELDS)
    }

    #[test]
    fn complete_form_validates() {
        let checked = form(Some("admin"), Some("123456"));
        assert!(checked.validate().is_ok());

        let request = LoginRequest::from_valid_form(checked);
        assert_eq!(request.username, "admin");
        assert_eq!(request.password, "123456");
    }

    #[test]
    fn declared_messages_match_constants() {
        assert_eq!(errors_of(form(None, Some("x"))).first().message, USERNAME_REQUIRED);
        assert_eq!(errors_of(form(Some("x"), None)).first().message, PASSWORD_REQUIRED);
    }

    #[test]
    fn missing_username_reports_username_message() {
        let errors = errors_of(form(None, Some("123456")));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.first().field, "username");
        assert_eq!(errors.first().message, USERNAME_REQUIRED);
    }

    #[test]
    fn empty_password_reports_password_message() {
        let errors = errors_of(form(Some("admin"), Some("")));
        assert_eq!(errors.first().field, "password");
        assert_eq!(errors.first().message, PASSWORD_REQUIRED);
    }

    #[test]
    fn both_missing_lists_username_first() {
        let errors = errors_of(LoginForm::default());
        let fields: Vec<_> = errors.iter().map(|error| error.field).collect();
        assert_eq!(fields, vec!["username", "password"]);
    }

    #[test]
    fn whitespace_counts_as_present() {
        assert!(form(Some(" "), Some(" ")).validate().is_ok());
    }

    #[test]
    fn debug_output_hides_password() {
        let request = LoginRequest {
            username: "admin".to_string(),
            password: "123456".to_string(),
        };
        assert!(!format!("{request:?}").contains("123456"));
    }
}
