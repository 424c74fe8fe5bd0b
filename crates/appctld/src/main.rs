//! `appctld` host binary entry point.

use std::process::ExitCode;

fn main() -> ExitCode {
    match appctld::run_host() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(
                target: concat!(env!("CARGO_PKG_NAME"), "::process"),
                %error,
                "host exited with an error"
            );
            ExitCode::FAILURE
        }
    }
}
