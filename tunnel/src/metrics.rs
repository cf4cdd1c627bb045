//! Metric names emitted by the tunnel client.

/// Label for the table session id.
pub const SESSION_ID_LABEL: &str = "session_id";

/// Label for the interactive instance id.
pub const INSTANCE_ID_LABEL: &str = "instance_id";

/// Label for the task info channel read.
pub const CHANNEL_LABEL: &str = "channel";

// Read path

/// Counter for splits handed out by split listings.
pub const TUNNEL_SPLITS_LISTED_TOTAL: &str = "tunnel_splits_listed_total";

/// Counter for split pages fetched from the service.
pub const TUNNEL_SPLIT_PAGES_FETCHED_TOTAL: &str = "tunnel_split_pages_fetched_total";

// Write path

/// Counter for bytes streamed to block writers.
pub const TUNNEL_BYTES_WRITTEN_TOTAL: &str = "tunnel_bytes_written_total";

/// Counter for records streamed to block writers.
pub const TUNNEL_RECORDS_WRITTEN_TOTAL: &str = "tunnel_records_written_total";

/// Counter for blocks whose stream was finalized and produced a commit message.
pub const TUNNEL_BLOCKS_COMMITTED_TOTAL: &str = "tunnel_blocks_committed_total";

/// Counter for block writers aborted, explicitly or after a failed finalize.
pub const TUNNEL_BLOCKS_ABORTED_TOTAL: &str = "tunnel_blocks_aborted_total";

/// Counter for write sessions finalized through the commit coordinator.
pub const TUNNEL_SESSIONS_COMMITTED_TOTAL: &str = "tunnel_sessions_committed_total";

// Interactive sessions

/// Counter for status and result reads issued against task info channels.
pub const TUNNEL_CHANNEL_READS_TOTAL: &str = "tunnel_channel_reads_total";
