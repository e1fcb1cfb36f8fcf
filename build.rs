use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    link: Link,
    capture: Capture,
    playback: Playback,
    hud: Hud,
    haptic: Haptic,
    geo: Geo,
    tactical: Tactical,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Link {
    ws_url: String,
    model: String,
    api_key_env: String,
    connect_timeout_ms: u64,
}

#[derive(Deserialize)]
struct Capture {
    device: String,
    sample_rate: u32,
    window: usize,
    camera_index: u32,
    frame_interval_ms: u64,
    jpeg_quality: u8,
}

#[derive(Deserialize)]
struct Playback {
    device: String,
    inbound_sample_rate: u32,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
}

#[derive(Deserialize)]
struct Hud {
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
    buffer_size: usize,
}

#[derive(Deserialize)]
struct Haptic {
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
}

#[derive(Deserialize)]
struct Geo {
    gpsd_addr: String,
}

#[derive(Deserialize)]
struct Tactical {
    projection: String,
    origin_lat: f64,
    origin_lon: f64,
    meters_per_unit: f64,
    safety_buffer: f64,
    feedback_throttle_ms: u64,
    hazards_file: String,
}

// Reads config.toml at build time and exports every value as a rustc env var.
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // Tactical link
    println!("cargo:rustc-env=LINK_WS_URL={}", config.link.ws_url);
    println!("cargo:rustc-env=LINK_MODEL={}", config.link.model);
    println!("cargo:rustc-env=LINK_API_KEY_ENV={}", config.link.api_key_env);
    println!("cargo:rustc-env=LINK_CONNECT_TIMEOUT_MS={}", config.link.connect_timeout_ms);

    // Capture
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.capture.device);
    println!("cargo:rustc-env=CAPTURE_SAMPLE_RATE={}", config.capture.sample_rate);
    println!("cargo:rustc-env=CAPTURE_WINDOW={}", config.capture.window);
    println!("cargo:rustc-env=CAPTURE_CAMERA_INDEX={}", config.capture.camera_index);
    println!("cargo:rustc-env=CAPTURE_FRAME_INTERVAL_MS={}", config.capture.frame_interval_ms);
    println!("cargo:rustc-env=CAPTURE_JPEG_QUALITY={}", config.capture.jpeg_quality);

    // Playback
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.playback.device);
    println!("cargo:rustc-env=PLAYBACK_INBOUND_SAMPLE_RATE={}", config.playback.inbound_sample_rate);
    println!("cargo:rustc-env=PLAYBACK_SAMPLE_RATE={}", config.playback.sample_rate);
    println!("cargo:rustc-env=PLAYBACK_CHANNELS={}", config.playback.channels);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.playback.period_size);

    // HUD bridge
    println!("cargo:rustc-env=HUD_LOCAL_IP={}", config.hud.local_ip);
    println!("cargo:rustc-env=HUD_LOCAL_PORT={}", config.hud.local_port);
    println!("cargo:rustc-env=HUD_REMOTE_IP={}", config.hud.remote_ip);
    println!("cargo:rustc-env=HUD_REMOTE_PORT={}", config.hud.remote_port);
    println!("cargo:rustc-env=HUD_BUFFER_SIZE={}", config.hud.buffer_size);

    // Haptic bridge
    println!("cargo:rustc-env=HAPTIC_LOCAL_IP={}", config.haptic.local_ip);
    println!("cargo:rustc-env=HAPTIC_LOCAL_PORT={}", config.haptic.local_port);
    println!("cargo:rustc-env=HAPTIC_REMOTE_IP={}", config.haptic.remote_ip);
    println!("cargo:rustc-env=HAPTIC_REMOTE_PORT={}", config.haptic.remote_port);

    println!("cargo:rustc-env=GEO_GPSD_ADDR={}", config.geo.gpsd_addr);

    // Tactical grid
    println!("cargo:rustc-env=TACTICAL_PROJECTION={}", config.tactical.projection);
    println!("cargo:rustc-env=TACTICAL_ORIGIN_LAT={}", config.tactical.origin_lat);
    println!("cargo:rustc-env=TACTICAL_ORIGIN_LON={}", config.tactical.origin_lon);
    println!("cargo:rustc-env=TACTICAL_METERS_PER_UNIT={}", config.tactical.meters_per_unit);
    println!("cargo:rustc-env=TACTICAL_SAFETY_BUFFER={}", config.tactical.safety_buffer);
    println!("cargo:rustc-env=TACTICAL_FEEDBACK_THROTTLE_MS={}", config.tactical.feedback_throttle_ms);
    println!("cargo:rustc-env=TACTICAL_HAZARDS_FILE={}", config.tactical.hazards_file);
}
