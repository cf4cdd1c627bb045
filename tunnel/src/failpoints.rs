use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, TunnelResult};

pub const BLOCK_WRITER_BEFORE_OPEN: &str = "block_writer.before_open";
pub const BLOCK_WRITER_BEFORE_FINISH: &str = "block_writer.before_finish";
pub const COMMIT_COORDINATOR_BEFORE_FINALIZE: &str = "commit_coordinator.before_finalize";

/// Returns an injected fault when the fail point `name` is configured with `return`.
pub fn tunnel_fail_point(name: &str) -> TunnelResult<()> {
    fail_point!(name, |parameter| {
        let detail = match parameter {
            Some(parameter) => format!("The failpoint '{name}' returned an error: {parameter}"),
            None => format!("The failpoint '{name}' returned an error"),
        };

        bail!(
            ErrorKind::InjectedFault,
            "An error occurred in a fail point",
            detail = detail
        );
    });

    Ok(())
}
