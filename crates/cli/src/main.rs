use std::process::ExitCode;

fn main() -> ExitCode {
    dialflow_cli::run()
}
