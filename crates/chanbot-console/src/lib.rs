//! Console adapter.
//!
//! Stands in for the chat protocol connection: inbound IRC-style lines arrive on stdin,
//! outbound messages leave on stdout. Implements the `chanbot-core` [`ChatPort`].

use async_trait::async_trait;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

pub mod handlers;
pub mod line;
pub mod router;

use chanbot_core::{ports::ChatPort, Result};

pub struct ConsolePort {
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl ConsolePort {
    pub fn new(out: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl ChatPort for ConsolePort {
    async fn send_message(&self, target: &str, text: &str) -> Result<()> {
        let wire = line::format_privmsg(target, text);
        // One writer at a time so concurrent replies never interleave mid-line.
        let mut out = self.out.lock().await;
        out.write_all(wire.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn writes_one_line_per_message() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let port = ConsolePort::new(writer);

        port.send_message("#rust", "bob: hi").await.unwrap();
        port.send_message("NickServ", "ACC alice\r\nQUIT").await.unwrap();
        drop(port);

        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        assert_eq!(
            buf,
            "PRIVMSG #rust :bob: hi\nPRIVMSG NickServ :ACC alice  QUIT\n"
        );
    }
}
