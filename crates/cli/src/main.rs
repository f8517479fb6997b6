use std::process::ExitCode;

fn main() -> ExitCode {
    contractflow_cli::run()
}
