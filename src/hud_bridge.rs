use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Operator commands coming from the HUD process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HudEvent {
    Start,
    Stop,
    /// "Roger": the operator confirmed the evacuation directive.
    Acknowledge,
}

#[derive(Deserialize)]
struct HudCommand {
    #[serde(rename = "type")]
    kind: String,
}

pub struct HudBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<HudEvent>,
    buffer_size: usize,
}

// The HUD is a separate display process on the same host; notices go out and
// commands come back as JSON datagrams on the ports from config.toml.
impl HudBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<HudEvent>) -> anyhow::Result<Self> {
        Self::bind(
            &format!("{}:{}", config.hud_local_ip, config.hud_local_port),
            format!("{}:{}", config.hud_remote_ip, config.hud_remote_port),
            config.hud_buffer_size,
            tx,
        )
        .await
    }

    pub async fn bind(
        local: &str,
        target_addr: String,
        buffer_size: usize,
        tx: mpsc::Sender<HudEvent>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            tx,
            buffer_size,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            let Some(event) = parse_command(&buf[..len]) else {
                continue;
            };
            if let Err(e) = self.tx.send(event).await {
                log::error!("Failed to forward HUD event: {}", e);
                break;
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }

    pub async fn send_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        self.send_message(&serde_json::to_string(value)?).await
    }
}

fn parse_command(datagram: &[u8]) -> Option<HudEvent> {
    let text = std::str::from_utf8(datagram).ok()?;
    match serde_json::from_str::<HudCommand>(text) {
        Ok(cmd) => match cmd.kind.as_str() {
            "start" => Some(HudEvent::Start),
            "stop" => Some(HudEvent::Stop),
            "roger" | "ack" => Some(HudEvent::Acknowledge),
            other => {
                log::debug!("Ignoring HUD command {:?}", other);
                None
            }
        },
        Err(e) => {
            log::debug!("Ignoring malformed HUD datagram: {}", e);
            None
        }
    }
}
