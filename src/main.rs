use clap::Parser;

#[tokio::main]
async fn main() {
    let args = linetap::Args::parse();

    if let Err(e) = linetap::run(args).await {
        eprintln!("linetap: {}", e);
        std::process::exit(1);
    }
}
