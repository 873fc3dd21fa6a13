use std::process::ExitCode;

fn main() -> ExitCode {
    match refkeeper::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
