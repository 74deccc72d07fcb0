use std::process::ExitCode;

fn main() -> ExitCode {
    tastebud_cli::run()
}
