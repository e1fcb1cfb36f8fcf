use serde::Serialize;
use std::time::Duration;

use crate::error::LinkError;

#[derive(Debug, Serialize, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // Tactical link
    pub ws_url: &'static str,
    pub model: &'static str,
    /// Name of the environment variable holding the API key. The key itself
    /// is only read at runtime.
    pub api_key_env: &'static str,
    pub connect_timeout_ms: u64,

    // Capture
    pub capture_device: &'static str,
    pub capture_sample_rate: u32,
    pub capture_window: usize,
    pub camera_index: u32,
    pub frame_interval_ms: u64,
    pub jpeg_quality: u8,

    // Playback
    pub playback_device: &'static str,
    pub inbound_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub playback_channels: u32,
    pub playback_period_size: usize,

    // HUD bridge
    pub hud_local_ip: &'static str,
    pub hud_local_port: u16,
    pub hud_remote_ip: &'static str,
    pub hud_remote_port: u16,
    pub hud_buffer_size: usize,

    // Haptic bridge
    pub haptic_local_ip: &'static str,
    pub haptic_local_port: u16,
    pub haptic_remote_ip: &'static str,
    pub haptic_remote_port: u16,

    pub gpsd_addr: &'static str,

    // Tactical grid
    pub projection: &'static str,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub meters_per_unit: f64,
    pub safety_buffer: f64,
    pub feedback_throttle_ms: u64,
    pub hazards_file: &'static str,
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, LinkError> {
    raw.parse()
        .map_err(|_| LinkError::Config(format!("Failed to parse {}: {:?}", name, raw)))
}

impl Config {
    /// Builds the configuration from the env vars `build.rs` exported out of
    /// `config.toml`.
    pub fn new() -> Result<Self, LinkError> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            ws_url: env!("LINK_WS_URL"),
            model: env!("LINK_MODEL"),
            api_key_env: env!("LINK_API_KEY_ENV"),
            connect_timeout_ms: parse(
                "LINK_CONNECT_TIMEOUT_MS",
                env!("LINK_CONNECT_TIMEOUT_MS"),
            )?,

            capture_device: env!("CAPTURE_DEVICE"),
            capture_sample_rate: parse("CAPTURE_SAMPLE_RATE", env!("CAPTURE_SAMPLE_RATE"))?,
            capture_window: parse("CAPTURE_WINDOW", env!("CAPTURE_WINDOW"))?,
            camera_index: parse("CAPTURE_CAMERA_INDEX", env!("CAPTURE_CAMERA_INDEX"))?,
            frame_interval_ms: parse("CAPTURE_FRAME_INTERVAL_MS", env!("CAPTURE_FRAME_INTERVAL_MS"))?,
            jpeg_quality: parse("CAPTURE_JPEG_QUALITY", env!("CAPTURE_JPEG_QUALITY"))?,

            playback_device: env!("PLAYBACK_DEVICE"),
            inbound_sample_rate: parse(
                "PLAYBACK_INBOUND_SAMPLE_RATE",
                env!("PLAYBACK_INBOUND_SAMPLE_RATE"),
            )?,
            playback_sample_rate: parse("PLAYBACK_SAMPLE_RATE", env!("PLAYBACK_SAMPLE_RATE"))?,
            playback_channels: parse("PLAYBACK_CHANNELS", env!("PLAYBACK_CHANNELS"))?,
            playback_period_size: parse("PLAYBACK_PERIOD_SIZE", env!("PLAYBACK_PERIOD_SIZE"))?,

            hud_local_ip: env!("HUD_LOCAL_IP"),
            hud_local_port: parse("HUD_LOCAL_PORT", env!("HUD_LOCAL_PORT"))?,
            hud_remote_ip: env!("HUD_REMOTE_IP"),
            hud_remote_port: parse("HUD_REMOTE_PORT", env!("HUD_REMOTE_PORT"))?,
            hud_buffer_size: parse("HUD_BUFFER_SIZE", env!("HUD_BUFFER_SIZE"))?,

            haptic_local_ip: env!("HAPTIC_LOCAL_IP"),
            haptic_local_port: parse("HAPTIC_LOCAL_PORT", env!("HAPTIC_LOCAL_PORT"))?,
            haptic_remote_ip: env!("HAPTIC_REMOTE_IP"),
            haptic_remote_port: parse("HAPTIC_REMOTE_PORT", env!("HAPTIC_REMOTE_PORT"))?,

            gpsd_addr: env!("GEO_GPSD_ADDR"),

            projection: env!("TACTICAL_PROJECTION"),
            origin_lat: parse("TACTICAL_ORIGIN_LAT", env!("TACTICAL_ORIGIN_LAT"))?,
            origin_lon: parse("TACTICAL_ORIGIN_LON", env!("TACTICAL_ORIGIN_LON"))?,
            meters_per_unit: parse("TACTICAL_METERS_PER_UNIT", env!("TACTICAL_METERS_PER_UNIT"))?,
            safety_buffer: parse("TACTICAL_SAFETY_BUFFER", env!("TACTICAL_SAFETY_BUFFER"))?,
            feedback_throttle_ms: parse(
                "TACTICAL_FEEDBACK_THROTTLE_MS",
                env!("TACTICAL_FEEDBACK_THROTTLE_MS"),
            )?,
            hazards_file: env!("TACTICAL_HAZARDS_FILE"),
        })
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn feedback_throttle(&self) -> Duration {
        Duration::from_millis(self.feedback_throttle_ms)
    }

    /// Reads the API key from the environment variable named in `config.toml`.
    pub fn api_key(&self) -> Result<String, LinkError> {
        std::env::var(self.api_key_env).map_err(|_| {
            LinkError::Config(format!("environment variable {} is not set", self.api_key_env))
        })
    }
}
