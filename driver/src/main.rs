//! The `rvopt` executable.
//!
//! Exit codes: 0 success, 1 input error, 2 irreducible control flow,
//! 3 internal invariant violation.

use std::{panic::AssertUnwindSafe, process::ExitCode};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    match std::panic::catch_unwind(AssertUnwindSafe(|| rvopt_driver::run(&args))) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(error)) => {
            eprintln!("rvopt: {error:#}");
            ExitCode::from(rvopt_driver::exit_code(&error))
        }
        Err(_) => {
            // The panic hook has already printed the message and location.
            eprintln!("rvopt: aborting on internal invariant violation");
            ExitCode::from(3)
        }
    }
}
