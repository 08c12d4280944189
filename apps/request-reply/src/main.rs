//! Request/Reply Pipe
//!
//! Binary entry point for the stdin-to-stdout request/reply pipe.

#[tokio::main]
async fn main() {
    if let Err(e) = request_reply::run().await {
        eprintln!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}
