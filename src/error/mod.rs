use serde::Serialize;
use thiserror::Error;

use crate::types::CURRENT_VERSION;

/// CNI error codes understood by the container runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Required environment variables missing or invalid
    InvalidEnvironmentVariables,
    /// Network configuration could not be decoded
    DecodingFailure,
    /// Network configuration or arguments are invalid
    InvalidNetworkConfig,
    /// Transient failure, the runtime may retry the whole command
    TryAgainLater,
    /// Anything else (device, link and namespace failures)
    Internal,
}

impl ErrorCode {
    /// Numeric code as defined by the CNI specification
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::InvalidEnvironmentVariables => 4,
            ErrorCode::DecodingFailure => 6,
            ErrorCode::InvalidNetworkConfig => 7,
            ErrorCode::TryAgainLater => 11,
            ErrorCode::Internal => 999,
        }
    }
}

/// Structured plugin error, reported to the runtime as a CNI error object
#[derive(Debug, Clone, Error)]
#[error("{}{}", .msg, details_suffix(.details))]
pub struct CniError {
    pub code: ErrorCode,
    pub msg: String,
    pub details: String,
}

fn details_suffix(details: &str) -> String {
    if details.is_empty() {
        String::new()
    } else {
        format!(": {}", details)
    }
}

impl CniError {
    pub fn new(code: ErrorCode, msg: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            details: details.into(),
        }
    }

    pub fn decoding_failure(msg: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(ErrorCode::DecodingFailure, msg, details)
    }

    pub fn invalid_config(details: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidNetworkConfig, "Invalid Configuration", details)
    }

    pub fn invalid_env(details: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidEnvironmentVariables, "Invalid Environment", details)
    }

    pub fn try_again_later(msg: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(ErrorCode::TryAgainLater, msg, details)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg, "")
    }

    /// Classify an arbitrary error chain. A `CniError` anywhere in the chain
    /// keeps its code; everything else is internal.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.chain().find_map(|cause| cause.downcast_ref::<CniError>()) {
            Some(cni) => cni.clone(),
            None => Self::internal(format!("{:#}", err)),
        }
    }

    /// Render as the CNI error object
    pub fn to_reply(&self, cni_version: &str) -> ErrorReply {
        ErrorReply {
            cni_version: cni_version.to_string(),
            code: self.code.as_u32(),
            msg: self.msg.clone(),
            details: self.details.clone(),
        }
    }
}

/// CNI error object written on failure
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReply {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ErrorReply {
    /// Print the error object as JSON on stdout
    pub fn print(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string(self)?;
        println!("{}", json);
        Ok(())
    }
}

/// A failed command and the CNI version its error object is written in
#[derive(Debug)]
pub struct Failure {
    pub cni_version: String,
    pub error: anyhow::Error,
}

impl Failure {
    pub fn new(cni_version: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            cni_version: cni_version.into(),
            error,
        }
    }

    pub fn reply(&self) -> ErrorReply {
        CniError::from_anyhow(&self.error).to_reply(&self.cni_version)
    }
}

/// Failures before the configuration is decoded use the current version
impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        Self::new(CURRENT_VERSION, error)
    }
}
