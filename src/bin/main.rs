use nextgallery::{cli, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());
    telemetry::init(cli.verbose, cli.quiet);

    match cli::run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("error: {e}");
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    }
}
