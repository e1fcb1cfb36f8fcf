use crate::config::Config;
use crate::feedback::FeedbackSink;
use crate::hazard::Severity;
use crate::proximity::ProximityAlert;
use async_trait::async_trait;
use serde::Serialize;
use tokio::net::UdpSocket;

/// On 200 ms, off 100 ms, on 200 ms.
pub const ALERT_PATTERN: [u64; 3] = [200, 100, 200];

#[derive(Serialize)]
struct Vibrate<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    pattern: &'a [u64],
    severity: Severity,
    zone: &'a str,
}

/// Drives the wearable haptic actuator process over local UDP.
pub struct HapticBridge {
    socket: UdpSocket,
    target_addr: String,
}

impl HapticBridge {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        Self::bind(
            &format!("{}:{}", config.haptic_local_ip, config.haptic_local_port),
            format!("{}:{}", config.haptic_remote_ip, config.haptic_remote_port),
        )
        .await
    }

    pub async fn bind(local: &str, target_addr: String) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self {
            socket,
            target_addr,
        })
    }

    pub async fn vibrate(&self, pattern: &[u64], severity: Severity, zone: &str) -> anyhow::Result<()> {
        let msg = serde_json::to_string(&Vibrate {
            kind: "vibrate",
            pattern,
            severity,
            zone,
        })?;
        self.socket.send_to(msg.as_bytes(), &self.target_addr).await?;
        Ok(())
    }
}

#[async_trait]
impl FeedbackSink for HapticBridge {
    async fn pulse(&self, alert: &ProximityAlert) -> anyhow::Result<()> {
        self.vibrate(&ALERT_PATTERN, alert.severity, &alert.zone_label).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proximity::Compass;

    #[tokio::test]
    async fn pulse_sends_the_alert_pattern() {
        let actuator = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bridge = HapticBridge::bind("127.0.0.1:0", actuator.local_addr().unwrap().to_string())
            .await
            .unwrap();

        let alert = ProximityAlert {
            zone_id: "h2".into(),
            zone_label: "EXPOSED WIRING".into(),
            direction: Compass::North,
            severity: Severity::High,
            distance: 3.0,
        };
        bridge.pulse(&alert).await.unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = actuator.recv_from(&mut buf).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "type": "vibrate",
                "pattern": [200, 100, 200],
                "severity": "HIGH",
                "zone": "EXPOSED WIRING"
            })
        );
    }
}
