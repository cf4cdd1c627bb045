//! Interactive SQL sessions.
//!
//! An interactive session is hosted by a SQL task on a service instance. The client talks to the
//! task through named info channels: it polls `status` until the session runs, submits queries
//! on `query` and pulls their incremental results from `result`.

mod channel;
mod options;
mod results;
mod session;

pub use channel::{QUERY_CHANNEL, RESULT_CHANNEL, SQL_STATS_CHANNEL, STATUS_CHANNEL};
pub use options::{
    InteractiveSessionOptions, SCRIPT_SUBMIT_MODE, SESSION_NAME_HINT, SHARE_ID_HINT,
    SUBMIT_MODE_HINT, WORKER_COUNT_HINT, WORKER_MEMORY_HINT, WORKER_SPARE_SPAN_HINT,
};
pub use results::QueryResults;
pub use session::{InteractiveSession, SessionPhase};

pub(crate) use channel::TaskChannel;
