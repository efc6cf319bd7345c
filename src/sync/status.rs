//! Connection state published to the staff surface

use serde::Serialize;

use crate::error::{RemoteError, RemoteErrorKind};

/// Session-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Connecting,
    Synced,
    Offline,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Connecting => "CONNECTING",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Offline => "OFFLINE",
        };
        f.write_str(s)
    }
}

/// Status plus the operator-facing diagnostic for the last failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncState {
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<RemoteErrorKind>,
    /// Last snapshot merge (Unix millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<u64>,
}

impl SyncState {
    pub fn connecting() -> Self {
        Self {
            status: SyncStatus::Connecting,
            diagnostic: None,
            error_kind: None,
            last_synced_at: None,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.status == SyncStatus::Synced
    }

    /// Return a copy moved to SYNCED, clearing any earlier diagnostic.
    pub fn synced(&self, now: u64) -> Self {
        Self {
            status: SyncStatus::Synced,
            diagnostic: None,
            error_kind: None,
            last_synced_at: Some(now),
        }
    }

    /// Return a copy moved to OFFLINE, carrying the cause when there is one.
    pub fn offline(&self, cause: Option<&RemoteError>) -> Self {
        Self {
            status: SyncStatus::Offline,
            diagnostic: cause.map(|e| e.kind.diagnostic().to_string()),
            error_kind: cause.map(|e| e.kind),
            last_synced_at: self.last_synced_at,
        }
    }

    /// Return a copy moved to CONNECTING. The last diagnostic stays visible
    /// until the attempt resolves.
    pub fn reconnecting(&self) -> Self {
        Self {
            status: SyncStatus::Connecting,
            ..self.clone()
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::connecting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_carries_diagnostic_and_keeps_last_sync() {
        let state = SyncState::connecting().synced(42);
        let err = RemoteError::new(RemoteErrorKind::PermissionDenied, "denied");
        let offline = state.offline(Some(&err));

        assert_eq!(offline.status, SyncStatus::Offline);
        assert_eq!(offline.error_kind, Some(RemoteErrorKind::PermissionDenied));
        assert!(offline.diagnostic.unwrap().contains("denied access"));
        assert_eq!(offline.last_synced_at, Some(42));
    }

    #[test]
    fn test_synced_clears_diagnostic() {
        let err = RemoteError::network("down");
        let state = SyncState::connecting().offline(Some(&err)).reconnecting();
        assert_eq!(state.status, SyncStatus::Connecting);
        assert!(state.diagnostic.is_some());

        let synced = state.synced(7);
        assert!(synced.is_synced());
        assert!(synced.diagnostic.is_none());
        assert!(synced.error_kind.is_none());
    }
}
