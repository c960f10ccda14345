//! SOCKS5 server with username/password authentication example

use socks5_relay::{Socks5Server, UserPass};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let auth = UserPass::new("<user>", "<pass>");

    let server = Socks5Server::new("127.0.0.1:1080").with_auth(Some(auth));

    server.run().await
}
