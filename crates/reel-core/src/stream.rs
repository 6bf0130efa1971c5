/// One decoded line of the generation stream. Transient: produced per line
/// and consumed immediately by the client's read loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Status text from the backend, with a percentage when one was found.
    Progress { percent: Option<u8>, message: String },
    /// The backend announced where the produced media can be fetched.
    ArtifactReady { url: String },
    /// The backend will send nothing further on this stream.
    Terminal,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(StreamEvent::Terminal.is_terminal());
        assert!(!StreamEvent::ArtifactReady { url: "u".into() }.is_terminal());
        assert!(!StreamEvent::Progress {
            percent: None,
            message: "queued".into()
        }
        .is_terminal());
    }
}
