use std::process::ExitCode;

use rendezvousd::ShutdownReason;
use rendezvousd::supervisor::ChildStatus;

fn main() -> ExitCode {
    match rendezvousd::run_broker() {
        Ok(ShutdownReason::PrimaryExited(ChildStatus::Exited(code))) => {
            ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("rendezvousd: {error}");
            ExitCode::FAILURE
        }
    }
}
