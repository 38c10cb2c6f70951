use std::process::ExitCode;

use edgeseg::app;

fn main() -> ExitCode {
    match app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err.report());
            ExitCode::FAILURE
        }
    }
}
