use std::process::ExitCode;

fn main() -> ExitCode {
    tillbot_cli::run()
}
