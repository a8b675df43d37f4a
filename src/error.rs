//! The closed OAI-PMH error taxonomy (spec.md §7).

use thiserror::Error;

/// All failure modes this crate can surface, split into the three
/// families described by the protocol: wire-renderable protocol errors,
/// client-side errors that never reach the wire, and transport failures.
#[derive(Debug, Error)]
pub enum OaiError {
    #[error("{0}")]
    BadArgument(String),

    #[error("Illegal verb: {0}")]
    BadVerb(String),

    #[error("Unable to decode resumption token: {0}")]
    BadResumptionToken(String),

    #[error("Cannot disseminate format: {0}")]
    CannotDisseminateFormat(String),

    #[error("Id does not exist: {0}")]
    IdDoesNotExist(String),

    #[error("No records match the request")]
    NoRecordsMatch,

    #[error("No metadata formats available")]
    NoMetadataFormats,

    #[error("This repository does not support sets")]
    NoSetHierarchy,

    #[error("Unknown error: {0}")]
    Unknown(String),

    /// The response body did not parse as well-formed XML.
    #[error("response is not well-formed XML: {0}")]
    XmlSyntax(String),

    /// A datestamp on the wire, or given as input, was not a legal
    /// `YYYY-MM-DD` / `YYYY-MM-DDThh:mm:ssZ` value.
    #[error("illegal datestamp: {0}")]
    Datestamp(String),

    /// A client-side configuration problem, e.g. a repository reporting
    /// a granularity outside the two the protocol defines.
    #[error("configuration error: {0}")]
    Config(String),

    /// The transport gave up after exhausting its retry budget, or
    /// returned a non-2xx status outside the configured retry family.
    #[error("transport error: {0}")]
    Transport(String),

    /// A registry-local configuration mistake (e.g. an unknown field
    /// type in a declarative metadata reader). Never rendered on the
    /// wire; the repository embedding this crate misconfigured itself.
    #[error("metadata registry error: {0}")]
    Registry(String),
}

impl OaiError {
    /// `true` for the eight errors defined by the protocol itself —
    /// the ones a `Server` renders as `<error code="...">`.
    pub fn is_protocol(&self) -> bool {
        self.wire_code().is_some()
    }

    /// The lowercase wire code for protocol errors, e.g. `badArgument`.
    ///
    /// Grounded on `ErrorBase.oainame()` in pyoai: strip the trailing
    /// "Error" from the Python exception class name and lowercase the
    /// first letter. Rust has no class name to introspect, so the
    /// mapping is spelled out explicitly instead.
    pub fn wire_code(&self) -> Option<&'static str> {
        match self {
            OaiError::BadArgument(_) => Some("badArgument"),
            OaiError::BadVerb(_) => Some("badVerb"),
            OaiError::BadResumptionToken(_) => Some("badResumptionToken"),
            OaiError::CannotDisseminateFormat(_) => Some("cannotDisseminateFormat"),
            OaiError::IdDoesNotExist(_) => Some("idDoesNotExist"),
            OaiError::NoRecordsMatch => Some("noRecordsMatch"),
            OaiError::NoMetadataFormats => Some("noMetadataFormats"),
            OaiError::NoSetHierarchy => Some("noSetHierarchy"),
            OaiError::Unknown(_) => Some("unknown"),
            _ => None,
        }
    }

    /// Reconstruct a protocol error from a wire code and message, used
    /// by the client to decode a server's `<error>` element.
    pub fn from_wire_code(code: &str, message: impl Into<String>) -> OaiError {
        let message = message.into();
        match code {
            "badArgument" => OaiError::BadArgument(message),
            "badVerb" => OaiError::BadVerb(message),
            "badResumptionToken" => OaiError::BadResumptionToken(message),
            "cannotDisseminateFormat" => OaiError::CannotDisseminateFormat(message),
            "idDoesNotExist" => OaiError::IdDoesNotExist(message),
            "noRecordsMatch" => OaiError::NoRecordsMatch,
            "noMetadataFormats" => OaiError::NoMetadataFormats,
            "noSetHierarchy" => OaiError::NoSetHierarchy,
            _ => OaiError::Unknown(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, OaiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_code_strips_error_suffix_style() {
        assert_eq!(
            OaiError::BadArgument("x".into()).wire_code(),
            Some("badArgument")
        );
        assert_eq!(OaiError::NoRecordsMatch.wire_code(), Some("noRecordsMatch"));
    }

    #[test]
    fn client_side_errors_are_not_protocol() {
        assert!(!OaiError::XmlSyntax("bad".into()).is_protocol());
        assert!(!OaiError::Datestamp("bad".into()).is_protocol());
        assert!(!OaiError::Transport("timeout".into()).is_protocol());
    }

    #[test]
    fn round_trips_through_wire_code() {
        let original = OaiError::CannotDisseminateFormat("oai_dc".into());
        let code = original.wire_code().unwrap();
        let rebuilt = OaiError::from_wire_code(code, "oai_dc");
        assert_eq!(rebuilt.wire_code(), original.wire_code());
    }

    #[test]
    fn unrecognised_code_becomes_unknown() {
        let rebuilt = OaiError::from_wire_code("somethingElse", "huh");
        assert!(matches!(rebuilt, OaiError::Unknown(_)));
    }
}
