use std::fmt;

#[derive(Debug)]
pub enum SimError {
    Store(String),
    Search(String),
    Queue(String),
    Blacklist { family: String, source: std::io::Error },
    MissingOption(&'static str),
    QueueNotEmpty(usize),
    Stalled { pending: usize, waited_secs: u64 },
    Serialization(serde_json::Error),
    Encode(Box<bincode::error::EncodeError>),
    Decode(Box<bincode::error::DecodeError>),
    Io(std::io::Error),
    Config(String),
    Other(String),
}

impl SimError {
    /// Whether a job that failed with this error should go back on the queue.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SimError::Store(_) | SimError::Search(_) | SimError::Queue(_) | SimError::Io(_)
        )
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Store(e) => write!(f, "Group store error: {}", e),
            SimError::Search(e) => write!(f, "Search error: {}", e),
            SimError::Queue(e) => write!(f, "Queue error: {}", e),
            SimError::Blacklist { family, source } => {
                write!(f, "Failed to load blacklist '{}': {}", family, source)
            }
            SimError::MissingOption(name) => write!(f, "Missing required option: {}", name),
            SimError::QueueNotEmpty(n) => write!(f, "Queue is not empty ({} pending jobs)", n),
            SimError::Stalled { pending, waited_secs } => write!(
                f,
                "Queue stalled with {} pending jobs for {}s",
                pending, waited_secs
            ),
            SimError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SimError::Encode(e) => write!(f, "Encode error: {}", e),
            SimError::Decode(e) => write!(f, "Decode error: {}", e),
            SimError::Io(e) => write!(f, "IO error: {}", e),
            SimError::Config(e) => write!(f, "Configuration error: {}", e),
            SimError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimError::Blacklist { source, .. } => Some(source),
            SimError::Serialization(e) => Some(e),
            SimError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        SimError::Serialization(err)
    }
}

impl From<bincode::error::EncodeError> for SimError {
    fn from(err: bincode::error::EncodeError) -> Self {
        SimError::Encode(Box::new(err))
    }
}

impl From<bincode::error::DecodeError> for SimError {
    fn from(err: bincode::error::DecodeError) -> Self {
        SimError::Decode(Box::new(err))
    }
}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        SimError::Io(err)
    }
}

#[cfg(feature = "distributed")]
impl From<postgres::Error> for SimError {
    fn from(err: postgres::Error) -> Self {
        SimError::Store(err.to_string())
    }
}

#[cfg(feature = "distributed")]
impl From<reqwest::Error> for SimError {
    fn from(err: reqwest::Error) -> Self {
        SimError::Search(err.to_string())
    }
}

impl From<String> for SimError {
    fn from(err: String) -> Self {
        SimError::Other(err)
    }
}

impl From<&str> for SimError {
    fn from(err: &str) -> Self {
        SimError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SimError::Store("conn reset".into()).is_retryable());
        assert!(SimError::Search("timeout".into()).is_retryable());
        assert!(!SimError::MissingOption("cutoff").is_retryable());
        assert!(!SimError::QueueNotEmpty(3).is_retryable());
    }

    #[test]
    fn test_display_mentions_family() {
        let err = SimError::Blacklist {
            family: "resources_100".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("resources_100"));
    }
}
