//! End-of-run reporting.

use std::collections::HashMap;
use std::time::Duration;

use syncwire_protocol::codec::CodecCounters;
use syncwire_protocol::message::StreamStatus;
use syncwire_protocol::StreamDescriptor;

/// How the attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Completed,
    Cancelled,
}

/// What one sync attempt accomplished.
#[derive(Debug, Clone)]
pub struct ReplicationSummary {
    pub status: SyncStatus,
    /// RECORD messages read from the source.
    pub records_read: u64,
    /// RECORD messages delivered to the destination.
    pub records_written: u64,
    /// STATE messages acknowledged by the destination.
    pub states_committed: u64,
    /// Last observed status per stream, from stream-status TRACE messages.
    pub stream_statuses: HashMap<StreamDescriptor, StreamStatus>,
    pub source_counters: CodecCounters,
    pub destination_counters: CodecCounters,
    pub duration: Duration,
}

impl ReplicationSummary {
    /// Streams the source started but never reported complete.
    #[must_use]
    pub fn incomplete_streams(&self) -> Vec<&StreamDescriptor> {
        let mut streams: Vec<&StreamDescriptor> = self
            .stream_statuses
            .iter()
            .filter(|(_, status)| **status != StreamStatus::Complete)
            .map(|(descriptor, _)| descriptor)
            .collect();
        streams.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_streams_sorted() {
        let mut statuses = HashMap::new();
        statuses.insert(
            StreamDescriptor::new(Some("b"), "two"),
            StreamStatus::Running,
        );
        statuses.insert(
            StreamDescriptor::new(Some("a"), "one"),
            StreamStatus::Incomplete,
        );
        statuses.insert(
            StreamDescriptor::new(Some("a"), "done"),
            StreamStatus::Complete,
        );
        let summary = ReplicationSummary {
            status: SyncStatus::Completed,
            records_read: 0,
            records_written: 0,
            states_committed: 0,
            stream_statuses: statuses,
            source_counters: CodecCounters::default(),
            destination_counters: CodecCounters::default(),
            duration: Duration::ZERO,
        };
        let incomplete = summary.incomplete_streams();
        assert_eq!(incomplete.len(), 2);
        assert_eq!(incomplete[0].name, "one");
        assert_eq!(incomplete[1].name, "two");
    }
}
