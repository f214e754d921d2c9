use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = crosspostctl::Cli::parse();
    crosspostctl::init_tracing(cli.verbose, cli.logs_to_stderr());
    if let Err(err) = crosspostctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
