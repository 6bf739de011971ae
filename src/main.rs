use clap::Parser;
use dotenv::dotenv;
use llama_chat::cli::Args;
use log::error;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = llama_chat::run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
