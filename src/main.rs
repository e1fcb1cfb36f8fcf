use std::sync::Arc;

use sentinel_link::advisor::{AdvisorSettings, AdvisoryOrchestrator, Notice};
use sentinel_link::audio::{AlsaOutput, AudioOutput, VoiceId};
use sentinel_link::capture::DeviceCapture;
use sentinel_link::config::Config;
use sentinel_link::feedback::ChimeFeedback;
use sentinel_link::geo::{GeoTracker, Position};
use sentinel_link::haptic_bridge::HapticBridge;
use sentinel_link::hazard::HazardRegistry;
use sentinel_link::hud_bridge::{HudBridge, HudEvent};
use sentinel_link::link::{SessionEvent, WsConnector};
use sentinel_link::projection;
use sentinel_link::proximity::{ProximityEngine, ProximityMonitor};
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::new()?;
    log::info!("{} {} starting", config.app_name, config.app_version);

    // Hazard data is validated before anything touches a device.
    let registry = HazardRegistry::load_or_builtin(config.hazards_file)?;
    let projection = projection::from_config(
        config.projection,
        Position {
            latitude: config.origin_lat,
            longitude: config.origin_lon,
        },
        config.meters_per_unit,
    )?;

    // Speaker output; finished voices come back on voice_rx.
    let (voice_tx, mut voice_rx) = mpsc::unbounded_channel::<VoiceId>();
    let output: Arc<dyn AudioOutput> = Arc::new(AlsaOutput::open(
        config.playback_device,
        config.playback_sample_rate,
        config.playback_channels,
        config.playback_period_size,
        voice_tx,
    )?);

    // HUD bridge first, so start-up problems can be shown.
    let (hud_tx, mut hud_rx) = mpsc::channel::<HudEvent>(100);
    let hud = Arc::new(HudBridge::new(&config, hud_tx).await?);
    let hud_runner = hud.clone();
    tokio::spawn(async move {
        if let Err(e) = hud_runner.run().await {
            log::error!("HudBridge error: {}", e);
        }
    });

    let haptic = Arc::new(HapticBridge::new(&config).await?);

    // Proximity loop, independent of the streaming session.
    let (geo_watch, mut positions) = GeoTracker::spawn(config.gpsd_addr);
    let monitor = ProximityMonitor::new(
        ProximityEngine::new(registry, config.safety_buffer, config.feedback_throttle()),
        projection,
    )
    .with_sink(Arc::new(ChimeFeedback::new(output.clone())))
    .with_sink(haptic);
    let mut alerts = monitor.subscribe();
    let mut telemetry = monitor.subscribe_telemetry();
    let proximity = tokio::spawn(monitor.run(positions.clone()));

    // Tactical link.
    let api_key = config.api_key()?;
    let connector = Arc::new(
        WsConnector::new(config.ws_url, Some(&api_key))?.with_timeout(config.connect_timeout()),
    );
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(100);
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel::<Notice>();
    let mut advisor = AdvisoryOrchestrator::new(
        AdvisorSettings::from_config(&config),
        Box::new(DeviceCapture::new(&config)),
        connector,
        output.clone(),
        event_tx,
        notice_tx,
    );

    log::info!("Ready. Waiting for the operator to start a session.");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = hud_rx.recv() => match event {
                HudEvent::Start => {
                    if let Err(e) = advisor.start() {
                        log::warn!("Session did not start: {}", e);
                    }
                }
                HudEvent::Stop => advisor.stop(),
                HudEvent::Acknowledge => {
                    if !advisor.acknowledge_evacuation() {
                        log::debug!("Nothing to acknowledge");
                    }
                }
            },

            Some(event) = event_rx.recv() => advisor.handle_event(event),

            Some(voice) = voice_rx.recv() => {
                advisor.retire_voice(voice);
            }

            Some(notice) = notice_rx.recv() => {
                if let Err(e) = hud.send_json(&notice).await {
                    log::warn!("Failed to send to HUD: {}", e);
                }
            }

            Ok(()) = alerts.changed() => {
                let alert = alerts.borrow_and_update().clone();
                if let Err(e) = hud.send_json(&Notice::Proximity { alert }).await {
                    log::warn!("Failed to send to HUD: {}", e);
                }
            }

            Ok(()) = telemetry.changed() => {
                let zones = telemetry.borrow_and_update().clone();
                if let Err(e) = hud.send_json(&Notice::Telemetry { zones }).await {
                    log::warn!("Failed to send to HUD: {}", e);
                }
            }

            Ok(()) = positions.changed() => {
                let fix = *positions.borrow_and_update();
                if let Some(pos) = fix {
                    advisor.update_position(pos);
                }
            }
        }
    }

    advisor.stop();
    geo_watch.cancel();
    proximity.abort();
    while let Ok(notice) = notice_rx.try_recv() {
        let _ = hud.send_json(&notice).await;
    }
    Ok(())
}
