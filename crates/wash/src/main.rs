use clap::Parser;
use std::process::ExitCode;
use wash::{init_logging, run, Cli};

fn main() -> ExitCode {
    // Argument errors exit 2 via clap's own error handling.
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("building the runtime never fails");
    match runtime.block_on(run(cli.command)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("wash: {err:#}");
            ExitCode::from(1)
        }
    }
}
