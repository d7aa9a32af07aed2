use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Error,
}

/// A chunk of text pushed to whoever is watching the download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: String,
}

impl ProgressEvent {
    pub fn progress(data: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Progress,
            data: data.into(),
        }
    }

    pub fn error(data: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            data: data.into(),
        }
    }
}

/// Where live progress goes. Passed down explicitly to everything that emits.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl EventSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // the receiver going away just means nobody is watching anymore
        if self.send(event).is_err() {
            trace!("progress receiver dropped, discarding event");
        }
    }
}
