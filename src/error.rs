//! Crate-wide error taxonomy.
//!
//! One variant per error kind named in the error handling design: transport
//! failures, credential-related and other application errors returned by the
//! upstream envelope, permanent data errors (a required key missing from a
//! response), signer bootstrap failure, and progress-store I/O failure.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HarvesterError>;

/// The three upstream `code` values that indicate a credential problem
/// rather than a generic application error.
pub const CREDENTIAL_ERROR_CODES: [i64; 3] = [-101, -352, -412];

/// Returns whether an upstream response `code` should be treated as
/// credential-related (not logged in, risk control, request intercepted).
#[must_use]
pub fn is_credential_error_code(code: i64) -> bool {
  CREDENTIAL_ERROR_CODES.contains(&code)
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum HarvesterError {
  /// Connect/read/timeout failure from the transport layer.
  #[error("transport error: {0}")]
  Transport(String),

  /// Non-zero `code` returned in the response envelope.
  #[error("upstream error {code}: {message}")]
  Application {
    /// The upstream numeric response code.
    code: i64,
    /// The upstream human-readable message.
    message: String,
  },

  /// A required key (`bvid`, `rpid`, `mid`, ...) was missing from an
  /// otherwise successful response. The record is dropped, never emitted.
  #[error("missing field `{field}` in response for {entity}")]
  MissingField {
    /// Name of the expected field.
    field: &'static str,
    /// Short description of the entity being parsed (e.g. a bvid).
    entity: String,
  },

  /// Failed to decode a JSON response body.
  #[error("failed to parse response: {0}")]
  Parsing(String),

  /// The request signer could not refresh its mixin key from the bootstrap
  /// endpoint. Callers fall back to the configured static key; this variant
  /// exists for the warning log, not as a hard failure.
  #[error("signer bootstrap failed: {0}")]
  SignerBootstrap(String),

  /// A progress-store read or write failed. The in-memory pipeline keeps
  /// running; the next successful persist repairs durability.
  #[error("progress store I/O error: {0}")]
  ProgressIo(String),

  /// No credential was available and the endpoint requires one.
  #[error("no credential available")]
  NoCredential,

  /// All retry attempts were exhausted.
  #[error("exhausted {attempts} attempts, last error: {source}")]
  RetriesExhausted {
    /// Number of attempts made.
    attempts: u32,
    /// The error from the final attempt.
    #[source]
    source: Box<HarvesterError>,
  },

  /// Configuration failed validation.
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
}

impl HarvesterError {
  /// The upstream application code, if this is an [`HarvesterError::Application`].
  #[must_use]
  pub fn code(&self) -> Option<i64> {
    match self {
      HarvesterError::Application { code, .. } => Some(*code),
      _ => None,
    }
  }

  /// Whether this error is one of the credential-related application codes
  /// (`-101`, `-352`, `-412`).
  #[must_use]
  pub fn is_credential_error(&self) -> bool {
    self.code().is_some_and(is_credential_error_code)
  }

  /// Whether a retry loop should attempt this call again.
  ///
  /// Transport errors and application errors are retryable; permanent data
  /// errors, signer bootstrap failures (handled via fallback), and
  /// configuration errors are not.
  #[must_use]
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      HarvesterError::Transport(_) | HarvesterError::Application { .. } | HarvesterError::Parsing(_)
    )
  }
}

impl From<reqwest::Error> for HarvesterError {
  fn from(err: reqwest::Error) -> Self {
    HarvesterError::Transport(err.to_string())
  }
}

impl From<serde_json::Error> for HarvesterError {
  fn from(err: serde_json::Error) -> Self {
    HarvesterError::Parsing(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn credential_codes_are_recognized() {
    assert!(is_credential_error_code(-101));
    assert!(is_credential_error_code(-352));
    assert!(is_credential_error_code(-412));
    assert!(!is_credential_error_code(-404));
    assert!(!is_credential_error_code(0));
  }

  #[test]
  fn application_error_exposes_code_and_credential_flag() {
    let err = HarvesterError::Application { code: -352, message: "risk control".into() };
    assert_eq!(err.code(), Some(-352));
    assert!(err.is_credential_error());
    assert!(err.is_retryable());

    let other = HarvesterError::Application { code: -404, message: "not found".into() };
    assert!(!other.is_credential_error());
  }

  #[test]
  fn missing_field_is_not_retryable() {
    let err = HarvesterError::MissingField { field: "bvid", entity: "search result".into() };
    assert!(!err.is_retryable());
  }
}
