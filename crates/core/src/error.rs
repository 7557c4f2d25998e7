//! Errors surfaced by the rollcall binary.
//!
//! Failures are split by who has to act on them: a bad config file or a
//! component that would not start is the operator's problem (`DomainError`),
//! a socket or file that misbehaved is the host's (`InfraError`).

use std::fmt;

/// Problems with what the operator asked for.
#[derive(Debug)]
pub enum DomainError {
    /// `--config` named a file that does not exist
    ConfigNotFound { path: String },
    /// A value loaded fine but is unusable, e.g. a zero queue capacity
    ConfigInvalid { field: String, reason: String },
    ConfigParse { source: String },
    /// Store, publisher or admin endpoint could not be brought up
    Service { name: String, reason: String },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigNotFound { path } => write!(f, "Config not found: {}", path),
            Self::ConfigInvalid { field, reason } => {
                write!(f, "Config invalid [{}]: {}", field, reason)
            }
            Self::ConfigParse { source } => write!(f, "Config parse error: {}", source),
            Self::Service { name, reason } => write!(f, "Service '{}' failed: {}", name, reason),
        }
    }
}

impl std::error::Error for DomainError {}

/// Problems with the host: files, sockets, encoders.
#[derive(Debug)]
pub enum InfraError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Yaml(serde_yml::Error),
    /// A listener could not bind, or a peer could not be reached
    Network { addr: String, reason: String },
}

impl fmt::Display for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Json(err) => write!(f, "JSON error: {}", err),
            Self::Yaml(err) => write!(f, "YAML error: {}", err),
            Self::Network { addr, reason } => write!(f, "Network error [{}]: {}", addr, reason),
        }
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Yaml(e) => Some(e),
            Self::Network { .. } => None,
        }
    }
}

/// What `main` returns.
#[derive(Debug)]
pub enum RollcallError {
    Domain(DomainError),
    Infra(InfraError),
    /// Flattened `anyhow` chains from server plumbing
    Other(String),
}

impl fmt::Display for RollcallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(e) => write!(f, "{}", e),
            Self::Infra(e) => write!(f, "{}", e),
            Self::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for RollcallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Domain(e) => Some(e),
            Self::Infra(e) => Some(e),
            Self::Other(_) => None,
        }
    }
}

impl From<DomainError> for RollcallError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<InfraError> for RollcallError {
    fn from(err: InfraError) -> Self {
        Self::Infra(err)
    }
}

/// Each source converts into `InfraError` and, through it, `RollcallError`.
macro_rules! infra_sources {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for InfraError {
                fn from(err: $source) -> Self {
                    Self::$variant(err)
                }
            }

            impl From<$source> for RollcallError {
                fn from(err: $source) -> Self {
                    Self::Infra(InfraError::$variant(err))
                }
            }
        )*
    };
}

infra_sources! {
    std::io::Error => Io,
    serde_json::Error => Json,
    serde_yml::Error => Yaml,
}

impl From<anyhow::Error> for RollcallError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{:#}", err))
    }
}

impl RollcallError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigNotFound { path: path.into() })
    }

    pub fn config_parse_error(source: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigParse {
            source: source.into(),
        })
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn service_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::Service {
            name: name.into(),
            reason: reason.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_display() {
        let err = RollcallError::config_invalid("gateway.port", "must not be 0");
        assert_eq!(err.to_string(), "Config invalid [gateway.port]: must not be 0");
    }

    #[test]
    fn test_io_error_is_infra() {
        let err: RollcallError = std::io::Error::other("boom").into();
        assert!(matches!(err, RollcallError::Infra(InfraError::Io(_))));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_json_error_converts_through_infra() {
        let json = serde_json::from_str::<u16>("nope").unwrap_err();
        let infra: InfraError = serde_json::from_str::<u16>("nope").unwrap_err().into();
        let err: RollcallError = json.into();
        assert!(matches!(infra, InfraError::Json(_)));
        assert!(matches!(err, RollcallError::Infra(InfraError::Json(_))));
        assert!(err.to_string().starts_with("JSON error: "));
    }

    #[test]
    fn test_anyhow_keeps_context_chain() {
        let err = anyhow::anyhow!("bind failed").context("starting gateway");
        let err: RollcallError = err.into();
        assert_eq!(err.to_string(), "Error: starting gateway: bind failed");
    }
}
