use std::process::ExitCode;

fn main() -> ExitCode {
    enquote_cli::run()
}
