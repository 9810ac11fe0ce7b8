use std::io::Write;
use std::process::{ExitCode, Termination};

use crate::output::eerror;

/// Run `main` and turn its outcome into an exit code.
///
/// Errors are printed as ` * Error: ...` on standard error, with their
/// whole chain of causes.
pub fn cli_main<F, T>(main: F) -> ExitCode
where
    F: FnOnce() -> anyhow::Result<T>,
    T: Termination,
{
    let mut stderr = std::io::stderr().lock();
    handle_top_level_result(main(), &mut stderr)
}

fn handle_top_level_result<T: Termination, W: Write>(
    result: anyhow::Result<T>,
    err: &mut W,
) -> ExitCode {
    match result {
        Ok(value) => value.report(),
        Err(error) => {
            tracing::debug!("{error:?}");
            if let Err(e) = eerror(err, &format!("{error:#}")) {
                tracing::warn!("failed to report error: {e}");
            }
            ExitCode::FAILURE
        }
    }
}
