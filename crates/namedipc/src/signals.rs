use namedipc_sync::CancelToken;
use tracing::info;

use crate::exit::{CliError, CliResult, FAILURE};

/// Route SIGINT, SIGTERM and SIGHUP into `token`.
///
/// The handler only flips the flag. Loops notice it at their next check and
/// return normally, so lifecycle guards tear down on the regular exit path.
pub fn install_ctrlc_handler(token: CancelToken) -> CliResult<()> {
    ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            info!("interrupted, finishing");
        }
        token.cancel();
    })
    .map_err(|err| CliError::new(FAILURE, format!("signal handler setup failed: {err}")))
}
