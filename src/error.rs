//! Error types for the market dashboard SDK

use thiserror::Error;

/// Errors raised by the data fetch layer
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network request failed
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Invalid response body
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Timeout waiting for response
    #[error("Request timeout")]
    Timeout,
}

impl ApiError {
    /// Creates an Http error from a status code
    pub fn http(status: reqwest::StatusCode) -> Self {
        Self::Http {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
        }
    }

    /// Returns true if the request never reached the backend
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

/// Errors surfaced by the query cache
///
/// Cloneable so that several readers joined on one fetch all receive it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The fetcher failed
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Nothing cached under this key
    #[error("No data cached for {key}")]
    NotCached { key: String },

    /// Cached value has a different type than requested
    #[error("Cached value for {key} has an unexpected type")]
    TypeMismatch { key: String },

    /// The fetch task panicked or was aborted before it settled
    #[error("Fetch for {key} did not complete")]
    Cancelled { key: String },
}

impl From<ApiError> for QueryError {
    fn from(err: ApiError) -> Self {
        Self::Fetch(err.to_string())
    }
}

/// Authentication errors shown to the user
///
/// Identity-provider failures are mapped by error code to a fixed message;
/// validation variants are raised before any network call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No account found with this email")]
    UserNotFound,

    #[error("Incorrect password")]
    WrongPassword,

    #[error("Invalid email or password")]
    InvalidCredential,

    #[error("An account with this email already exists")]
    EmailAlreadyInUse,

    #[error("Password should be at least 6 characters")]
    WeakPassword,

    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Too many attempts. Please try again later")]
    TooManyRequests,

    #[error("Network error. Please check your connection")]
    NetworkRequestFailed,

    #[error("Sign-in popup was closed before completing")]
    PopupClosed,

    #[error("This account has been disabled")]
    UserDisabled,

    #[error("Passwords do not match")]
    PasswordMismatch,

    /// Unmapped provider code
    #[error("Authentication failed ({code})")]
    Other { code: String },
}

impl AuthError {
    /// Maps an identity-provider error code to a user-facing error
    pub fn from_provider_code(code: &str) -> Self {
        match code {
            "auth/user-not-found" => Self::UserNotFound,
            "auth/wrong-password" => Self::WrongPassword,
            "auth/invalid-credential" => Self::InvalidCredential,
            "auth/email-already-in-use" => Self::EmailAlreadyInUse,
            "auth/weak-password" => Self::WeakPassword,
            "auth/invalid-email" => Self::InvalidEmail,
            "auth/too-many-requests" => Self::TooManyRequests,
            "auth/network-request-failed" => Self::NetworkRequestFailed,
            "auth/popup-closed-by-user" | "auth/cancelled-popup-request" => Self::PopupClosed,
            "auth/user-disabled" => Self::UserDisabled,
            other => Self::Other {
                code: other.to_string(),
            },
        }
    }
}

/// Errors from the auth snapshot store
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from admin moderation actions
#[derive(Debug, Error)]
pub enum AdminError {
    /// Acting user is not an admin
    #[error("User {uid} is not allowed to perform admin actions")]
    Forbidden { uid: String },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Query(#[from] QueryError),
}
