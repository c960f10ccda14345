//! SOCKS5 server with a custom dispatch policy that logs every chunk
//!
//! Try it with: curl https://github.com/ --socks5 127.0.0.1:1088

use anyhow::Result;
use async_trait::async_trait;
use socks5_relay::{
    ClientConnection, Destination, ProxyDispatch, ReplyCode, Socks5Server,
    codec::encode_reply,
    dispatch::{connect_destination, reject},
};
use std::sync::Arc;
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt},
    select,
};
use tracing::info;

#[derive(Debug)]
struct LoggingDispatch;

#[async_trait]
impl ProxyDispatch for LoggingDispatch {
    async fn dispatch(
        &self,
        request: Vec<u8>,
        destination: Destination,
        mut client: ClientConnection,
    ) -> Result<()> {
        let mut outbound = match connect_destination(&destination).await {
            Ok(stream) => stream,
            Err(e) => {
                reject(&mut client, &request, ReplyCode::from_io_error(&e)).await;
                return Err(e.into());
            }
        };

        let local = outbound.local_addr()?;
        info!("{} connected to {}", local, destination);

        client
            .stream_mut()
            .write_all(&encode_reply(&request, ReplyCode::Succeeded))
            .await?;

        let pending = client.take_pending();
        outbound.write_all(&pending).await?;

        let (mut client_read, mut client_write) = io::split(client.stream_mut());
        let (mut server_read, mut server_write) = outbound.split();

        let upstream = async {
            let mut buf = [0u8; 8192];
            loop {
                let n = client_read.read(&mut buf).await?;
                if n == 0 {
                    return Ok::<(), io::Error>(());
                }
                info!("sent {} bytes to {}", n, destination);
                server_write.write_all(&buf[..n]).await?;
            }
        };

        let downstream = async {
            let mut buf = [0u8; 8192];
            loop {
                let n = server_read.read(&mut buf).await?;
                if n == 0 {
                    return Ok::<(), io::Error>(());
                }
                info!("rcv {} bytes from {}", n, destination);
                client_write.write_all(&buf[..n]).await?;
            }
        };

        select! {
            res = upstream => res?,
            res = downstream => res?,
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let server = Socks5Server::new("127.0.0.1:1088").with_dispatch(Arc::new(LoggingDispatch));

    server.run().await
}
