//! Request validation that runs before handlers.
//!
//! A body is decoded into a lenient form type whose field rules are
//! declared with `validator`. The [`Validated`] extractor runs those rules
//! and maps failures to [`ApiError::Validation`]; handlers only ever see
//! the checked request type.

use std::fmt;

use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::error::ApiError;

/// A validation failure attached to one input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Field errors in declaration order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldErrors {
    first: FieldError,
    rest: Vec<FieldError>,
}

impl FieldErrors {
    pub fn new(first: FieldError) -> Self {
        Self {
            first,
            rest: Vec::new(),
        }
    }

    /// Flatten `validator` output, walking `fields` in order because
    /// [`ValidationErrors`] is keyed by an unordered map.
    pub fn from_validation(errors: &ValidationErrors, fields: &[&'static str]) -> Self {
        let by_field = errors.field_errors();
        let mut ordered = fields.iter().copied().flat_map(|field| {
            by_field
                .get(field)
                .into_iter()
                .flat_map(|list| list.iter())
                .map(move |error| {
                    let message = error
                        .message
                        .as_deref()
                        .map(str::to_string)
                        .unwrap_or_else(|| error.code.to_string());
                    FieldError::new(field, message)
                })
        });

        match ordered.next() {
            Some(first) => Self {
                first,
                rest: ordered.collect(),
            },
            None => Self::new(FieldError::new("body", errors.to_string())),
        }
    }

    pub fn push(&mut self, error: FieldError) {
        self.rest.push(error);
    }

    pub fn first(&self) -> &FieldError {
        &self.first
    }

    pub fn len(&self) -> usize {
        1 + self.rest.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        std::iter::once(&self.first).chain(self.rest.iter())
    }

    pub fn into_first(self) -> FieldError {
        self.first
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, error) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// A request type built from a form that passed its `validator` rules.
pub trait FromValidForm: Sized {
    type Form: DeserializeOwned + Validate;

    /// Form fields in declaration order; the first failing one is reported.
    const FIELDS: &'static [&'static str];

    fn from_valid_form(form: Self::Form) -> Self;
}

/// JSON body extractor that validates the form before the handler sees it.
pub struct Validated<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Validated<T>
where
    S: Send + Sync,
    T: FromValidForm,
    T::Form: Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(form) = Json::<T::Form>::from_request(req, state).await?;
        if let Err(errors) = form.validate() {
            let errors = FieldErrors::from_validation(&errors, T::FIELDS);
            tracing::debug!(event = "validation_failed", errors = %errors);
            return Err(ApiError::Validation(errors));
        }
        Ok(Validated(T::from_valid_form(form)))
    }
}
