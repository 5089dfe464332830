//! Error types for subscription and dispatch operations.

use crate::subscriptions::{SubscriptionHandle, SubscriptionId};
use thiserror::Error;

/// Main error type for subscription operations.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("Handle {0} was not issued by this subscription manager")]
    InvalidHandle(SubscriptionHandle),

    #[error("Duplicate subscription id: {0}")]
    DuplicateId(SubscriptionId),

    #[error("Dispatch unavailable: {0}")]
    DispatchUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for subscription operations.
pub type Result<T> = std::result::Result<T, SubscriptionError>;
