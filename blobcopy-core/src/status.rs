use crate::BlobHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an asynchronous server-side copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStatus {
    Pending,
    Success,
    Aborted,
    Failed,
}

impl CopyStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CopyStatus::Pending)
    }

    /// Raw value as reported by the storage service.
    pub fn as_str(self) -> &'static str {
        match self {
            CopyStatus::Pending => "pending",
            CopyStatus::Success => "success",
            CopyStatus::Aborted => "aborted",
            CopyStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a raw copy status value to [`CopyStatus`].
///
/// Absent or unrecognized values mean "keep waiting" and map to `Pending`.
pub fn interpret(raw: Option<&str>) -> CopyStatus {
    match raw {
        Some("pending") => CopyStatus::Pending,
        Some("success") => CopyStatus::Success,
        Some("aborted") => CopyStatus::Aborted,
        Some("failed") => CopyStatus::Failed,
        _ => CopyStatus::Pending,
    }
}

/// Bytes copied so far out of the source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyProgress {
    pub copied_bytes: u64,
    pub total_bytes: u64,
}

impl CopyProgress {
    /// Parse a raw `"<copied>/<total>"` progress value.
    pub fn parse(raw: &str) -> Option<Self> {
        let (copied, total) = raw.trim().split_once('/')?;
        let copied_bytes = copied.trim().parse().ok()?;
        let total_bytes = total.trim().parse().ok()?;
        if copied_bytes > total_bytes {
            return None;
        }

        Some(Self {
            copied_bytes,
            total_bytes,
        })
    }

    pub fn to_raw(self) -> String {
        format!("{}/{}", self.copied_bytes, self.total_bytes)
    }
}

/// Opaque copy operation identifier assigned by the storage service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CopyId(String);

impl CopyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CopyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw status signal returned by a status check. Both fields are optional on
/// the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyStatusSignal {
    pub status: Option<String>,
    pub progress: Option<String>,
}

impl CopyStatusSignal {
    pub fn new(status: Option<&str>, progress: Option<CopyProgress>) -> Self {
        Self {
            status: status.map(str::to_string),
            progress: progress.map(CopyProgress::to_raw),
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }
}

/// One in-flight or completed asynchronous copy.
#[derive(Debug, Clone, Serialize)]
pub struct CopyOperation {
    id: CopyId,
    source: BlobHandle,
    destination: BlobHandle,
    status: CopyStatus,
    progress: Option<CopyProgress>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl CopyOperation {
    pub fn new(
        id: CopyId,
        source: BlobHandle,
        destination: BlobHandle,
        signal: &CopyStatusSignal,
    ) -> Self {
        let mut operation = Self {
            id,
            source,
            destination,
            status: CopyStatus::Pending,
            progress: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        operation.apply_signal(signal);
        operation
    }

    pub fn id(&self) -> &CopyId {
        &self.id
    }

    pub fn source(&self) -> &BlobHandle {
        &self.source
    }

    pub fn destination(&self) -> &BlobHandle {
        &self.destination
    }

    pub fn status(&self) -> CopyStatus {
        self.status
    }

    pub fn progress(&self) -> Option<CopyProgress> {
        self.progress
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status signal. A terminal operation ignores further signals.
    pub(crate) fn apply_signal(&mut self, signal: &CopyStatusSignal) -> CopyStatus {
        if self.is_terminal() {
            return self.status;
        }

        if let Some(progress) = signal.progress.as_deref().and_then(CopyProgress::parse) {
            self.progress = Some(progress);
        }

        let next = interpret(signal.status.as_deref());
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status = next;
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> BlobHandle {
        BlobHandle::new("mem://acct", "data", name).unwrap()
    }

    #[test]
    fn test_interpret_known_values() {
        assert_eq!(interpret(Some("pending")), CopyStatus::Pending);
        assert_eq!(interpret(Some("success")), CopyStatus::Success);
        assert_eq!(interpret(Some("aborted")), CopyStatus::Aborted);
        assert_eq!(interpret(Some("failed")), CopyStatus::Failed);
    }

    #[test]
    fn test_interpret_unknown_and_absent_is_pending() {
        for raw in ["", "Success", " success", "complete", "FAILED", "unknown"] {
            assert_eq!(interpret(Some(raw)), CopyStatus::Pending, "raw={:?}", raw);
        }
        assert_eq!(interpret(None), CopyStatus::Pending);
    }

    #[test]
    fn test_as_str_matches_interpret() {
        for status in [
            CopyStatus::Pending,
            CopyStatus::Success,
            CopyStatus::Aborted,
            CopyStatus::Failed,
        ] {
            assert_eq!(interpret(Some(status.as_str())), status);
        }
    }

    #[test]
    fn test_progress_parse() {
        assert_eq!(
            CopyProgress::parse("1024/4096"),
            Some(CopyProgress {
                copied_bytes: 1024,
                total_bytes: 4096
            })
        );
        assert_eq!(CopyProgress::parse("4096"), None);
        assert_eq!(CopyProgress::parse("a/b"), None);
        assert_eq!(CopyProgress::parse("10/5"), None);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut op = CopyOperation::new(
            CopyId::new("copy-1"),
            handle("src"),
            handle("dst"),
            &CopyStatusSignal::new(Some("pending"), None),
        );
        assert_eq!(op.status(), CopyStatus::Pending);
        assert!(op.completed_at().is_none());

        op.apply_signal(&CopyStatusSignal::new(Some("success"), None));
        assert_eq!(op.status(), CopyStatus::Success);
        let completed_at = op.completed_at();
        assert!(completed_at.is_some());

        for raw in [Some("pending"), Some("failed"), Some("aborted"), None] {
            op.apply_signal(&CopyStatusSignal::new(raw, None));
            assert_eq!(op.status(), CopyStatus::Success);
        }
        assert_eq!(op.completed_at(), completed_at);
    }

    #[test]
    fn test_progress_keeps_last_known_value() {
        let progress = CopyProgress {
            copied_bytes: 10,
            total_bytes: 20,
        };
        let mut op = CopyOperation::new(
            CopyId::new("copy-2"),
            handle("src"),
            handle("dst"),
            &CopyStatusSignal::new(Some("pending"), Some(progress)),
        );
        assert_eq!(op.progress(), Some(progress));

        op.apply_signal(&CopyStatusSignal::absent());
        assert_eq!(op.status(), CopyStatus::Pending);
        assert_eq!(op.progress(), Some(progress));
    }
}
