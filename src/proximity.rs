//! Proximity hazard engine: projection → distance → bearing → throttled alert.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::feedback::FeedbackSink;
use crate::geo::Position;
use crate::hazard::{HazardRegistry, HazardZone, Severity};
use crate::projection::{ProjectedPoint, Projection};

/// Grid units added to every zone radius before it triggers.
pub const SAFETY_BUFFER: f64 = 5.0;

/// Minimum spacing between two sensory feedback firings.
pub const FEEDBACK_THROTTLE: Duration = Duration::from_millis(2000);

/// Eight 45° sectors, in clockwise order starting at east. On a grid whose
/// `y` grows downward, clockwise runs east → south → west → north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Compass {
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
    North,
    NorthEast,
}

const SECTORS: [Compass; 8] = [
    Compass::East,
    Compass::SouthEast,
    Compass::South,
    Compass::SouthWest,
    Compass::West,
    Compass::NorthWest,
    Compass::North,
    Compass::NorthEast,
];

impl Compass {
    /// Quantizes an `atan2` angle in degrees. Each sector is half-open,
    /// `[centre - 22.5, centre + 22.5)`, so a boundary always falls into the
    /// sector clockwise of it.
    pub fn from_degrees(angle: f64) -> Self {
        let shifted = (angle + 22.5).rem_euclid(360.0);
        SECTORS[(shifted / 45.0) as usize % 8]
    }

    /// Direction of `to` as seen from `from`.
    pub fn between(from: ProjectedPoint, to: ProjectedPoint) -> Self {
        Self::from_degrees((to.y - from.y).atan2(to.x - from.x).to_degrees())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compass::East => "EAST",
            Compass::SouthEast => "SOUTH-EAST",
            Compass::South => "SOUTH",
            Compass::SouthWest => "SOUTH-WEST",
            Compass::West => "WEST",
            Compass::NorthWest => "NORTH-WEST",
            Compass::North => "NORTH",
            Compass::NorthEast => "NORTH-EAST",
        }
    }
}

impl fmt::Display for Compass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProximityAlert {
    pub zone_id: String,
    pub zone_label: String,
    /// Where the hazard lies from the operator.
    pub direction: Compass,
    pub severity: Severity,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneTelemetry {
    pub zone_id: String,
    pub label: String,
    pub distance: f64,
    pub in_range: bool,
}

#[derive(Debug, Clone)]
pub struct AlertThrottle {
    window: Duration,
    last_fired: Option<Instant>,
}

impl AlertThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: None,
        }
    }

    /// Fires if nothing has fired yet or strictly more than the window has
    /// passed since the last firing.
    pub fn try_fire(&mut self, now: Instant) -> bool {
        let open = match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.window,
        };
        if open {
            self.last_fired = Some(now);
        }
        open
    }

    pub fn last_fired(&self) -> Option<Instant> {
        self.last_fired
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub alert: Option<ProximityAlert>,
    /// Whether sensory feedback should fire for this evaluation.
    pub feedback: bool,
}

pub struct ProximityEngine {
    registry: HazardRegistry,
    safety_buffer: f64,
    throttle: AlertThrottle,
    active: Option<ProximityAlert>,
}

impl ProximityEngine {
    pub fn new(registry: HazardRegistry, safety_buffer: f64, throttle: Duration) -> Self {
        Self {
            registry,
            safety_buffer,
            throttle: AlertThrottle::new(throttle),
            active: None,
        }
    }

    /// Selects the nearest in-range zone (first in registry order on a tie),
    /// replaces the active alert with it, and consults the throttle.
    pub fn evaluate(&mut self, point: ProjectedPoint, now: Instant) -> Evaluation {
        let mut nearest: Option<(&HazardZone, f64)> = None;
        for zone in self.registry.zones() {
            let d = point.distance_to(zone.x, zone.y);
            if d < zone.radius + self.safety_buffer
                && nearest.is_none_or(|(_, best)| d < best)
            {
                nearest = Some((zone, d));
            }
        }

        let alert = nearest.map(|(zone, distance)| ProximityAlert {
            zone_id: zone.id.clone(),
            zone_label: zone.label.clone(),
            direction: Compass::between(point, ProjectedPoint::new(zone.x, zone.y)),
            severity: zone.severity,
            distance,
        });
        let feedback = alert.is_some() && self.throttle.try_fire(now);
        self.active = alert.clone();
        Evaluation { alert, feedback }
    }

    pub fn telemetry(&self, point: ProjectedPoint) -> Vec<ZoneTelemetry> {
        self.registry
            .zones()
            .iter()
            .map(|zone| {
                let distance = point.distance_to(zone.x, zone.y);
                ZoneTelemetry {
                    zone_id: zone.id.clone(),
                    label: zone.label.clone(),
                    distance,
                    in_range: distance < zone.radius + self.safety_buffer,
                }
            })
            .collect()
    }

    /// Swaps the registry. The active alert is kept until the next evaluation.
    pub fn set_registry(&mut self, registry: HazardRegistry) {
        log::info!("Hazard registry replaced ({} zones)", registry.len());
        self.registry = registry;
    }

    pub fn registry(&self) -> &HazardRegistry {
        &self.registry
    }

    pub fn active(&self) -> Option<&ProximityAlert> {
        self.active.as_ref()
    }
}

/// The proximity loop. Sole writer of the active alert; readers subscribe
/// to it through `watch` channels.
pub struct ProximityMonitor {
    engine: ProximityEngine,
    projection: Box<dyn Projection>,
    alerts: watch::Sender<Option<ProximityAlert>>,
    telemetry: watch::Sender<Vec<ZoneTelemetry>>,
    sinks: Vec<Arc<dyn FeedbackSink>>,
}

impl ProximityMonitor {
    pub fn new(engine: ProximityEngine, projection: Box<dyn Projection>) -> Self {
        Self {
            engine,
            projection,
            alerts: watch::Sender::new(None),
            telemetry: watch::Sender::new(Vec::new()),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn FeedbackSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ProximityAlert>> {
        self.alerts.subscribe()
    }

    pub fn subscribe_telemetry(&self) -> watch::Receiver<Vec<ZoneTelemetry>> {
        self.telemetry.subscribe()
    }

    pub fn engine_mut(&mut self) -> &mut ProximityEngine {
        &mut self.engine
    }

    pub async fn handle_fix(&mut self, pos: Position, now: Instant) -> Evaluation {
        let point = self.projection.project(pos);
        let eval = self.engine.evaluate(point, now);
        self.telemetry.send_replace(self.engine.telemetry(point));

        let previous = self.alerts.send_replace(eval.alert.clone());
        match (&previous, &eval.alert) {
            (None, Some(a)) => log::warn!(
                "Proximity alert: {} ({}) {} at {:.1}",
                a.zone_label,
                a.severity,
                a.direction,
                a.distance
            ),
            (Some(p), Some(a)) if p.zone_id != a.zone_id => {
                log::warn!("Proximity alert moved to {} ({})", a.zone_label, a.severity)
            }
            (Some(p), None) => log::info!("Proximity alert cleared ({})", p.zone_label),
            _ => {}
        }

        if eval.feedback {
            if let Some(alert) = &eval.alert {
                for sink in &self.sinks {
                    if let Err(e) = sink.pulse(alert).await {
                        log::warn!("Feedback sink failed: {:#}", e);
                    }
                }
            }
        }
        eval
    }

    /// Evaluates every fix until the position feed closes.
    pub async fn run(mut self, mut positions: watch::Receiver<Option<Position>>) {
        log::info!("Proximity engine armed with {} zones", self.engine.registry().len());
        loop {
            if positions.changed().await.is_err() {
                log::warn!("Position feed closed, proximity engine dormant");
                return;
            }
            let fix = *positions.borrow_and_update();
            if let Some(pos) = fix {
                self.handle_fix(pos, Instant::now()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::HazardCategory;

    fn zone(id: &str, x: f64, y: f64, radius: f64) -> HazardZone {
        HazardZone {
            id: id.into(),
            x,
            y,
            radius,
            category: HazardCategory::General,
            severity: Severity::High,
            label: format!("zone {}", id),
        }
    }

    fn engine(zones: Vec<HazardZone>) -> ProximityEngine {
        ProximityEngine::new(HazardRegistry::new(zones).unwrap(), SAFETY_BUFFER, FEEDBACK_THROTTLE)
    }

    fn p(x: f64, y: f64) -> ProjectedPoint {
        ProjectedPoint::new(x, y)
    }

    #[test]
    fn inside_radius_is_in_range() {
        let mut e = engine(vec![zone("a", 50.0, 50.0, 10.0)]);
        let eval = e.evaluate(p(55.0, 52.0), Instant::now());
        assert_eq!(eval.alert.unwrap().zone_id, "a");
    }

    #[test]
    fn just_past_radius_plus_buffer_is_out_of_range() {
        let mut e = engine(vec![zone("a", 50.0, 50.0, 10.0)]);
        let eps = 1e-9;
        assert!(e.evaluate(p(50.0 + 15.0 + eps, 50.0), Instant::now()).alert.is_none());
        // The buffer itself counts: 14.9 is outside the radius but still alerts.
        assert!(e.evaluate(p(64.9, 50.0), Instant::now()).alert.is_some());
    }

    #[test]
    fn nearest_zone_wins_and_ties_keep_registry_order() {
        let mut e = engine(vec![zone("far", 40.0, 50.0, 20.0), zone("near", 55.0, 50.0, 5.0)]);
        assert_eq!(e.evaluate(p(52.0, 50.0), Instant::now()).alert.unwrap().zone_id, "near");

        let mut e = engine(vec![zone("first", 40.0, 50.0, 10.0), zone("second", 60.0, 50.0, 10.0)]);
        assert_eq!(e.evaluate(p(50.0, 50.0), Instant::now()).alert.unwrap().zone_id, "first");
    }

    #[test]
    fn alert_clears_when_nothing_is_in_range() {
        let mut e = engine(vec![zone("a", 20.0, 20.0, 5.0)]);
        let now = Instant::now();
        assert!(e.evaluate(p(21.0, 21.0), now).alert.is_some());
        assert!(e.active().is_some());
        assert!(e.evaluate(p(80.0, 80.0), now).alert.is_none());
        assert!(e.active().is_none());
    }

    #[test]
    fn cardinal_directions_on_a_y_down_grid() {
        let op = p(50.0, 50.0);
        assert_eq!(Compass::between(op, p(60.0, 50.0)), Compass::East);
        assert_eq!(Compass::between(op, p(50.0, 60.0)), Compass::South);
        assert_eq!(Compass::between(op, p(40.0, 50.0)), Compass::West);
        assert_eq!(Compass::between(op, p(50.0, 40.0)), Compass::North);
        assert_eq!(Compass::between(op, p(60.0, 40.0)), Compass::NorthEast);
        assert_eq!(Compass::between(op, p(40.0, 60.0)), Compass::SouthWest);
        assert_eq!(Compass::East.to_string(), "EAST");
        assert_eq!(Compass::SouthEast.to_string(), "SOUTH-EAST");
    }

    #[test]
    fn sector_boundaries_resolve_clockwise_every_time() {
        for _ in 0..3 {
            assert_eq!(Compass::from_degrees(22.5), Compass::SouthEast);
            assert_eq!(Compass::from_degrees(-22.5), Compass::East);
            assert_eq!(Compass::from_degrees(157.5), Compass::West);
            assert_eq!(Compass::from_degrees(-157.5), Compass::NorthWest);
            assert_eq!(Compass::from_degrees(180.0), Compass::West);
            assert_eq!(Compass::from_degrees(-180.0), Compass::West);
            assert_eq!(Compass::from_degrees(-67.5), Compass::NorthEast);
        }
    }

    #[test]
    fn feedback_is_throttled_to_one_per_window() {
        let mut e = engine(vec![zone("a", 50.0, 50.0, 10.0)]);
        let t0 = Instant::now();
        let inside = p(51.0, 51.0);

        assert!(e.evaluate(inside, t0).feedback);
        let half_second = e.evaluate(inside, t0 + Duration::from_millis(500));
        assert!(half_second.alert.is_some());
        assert!(!half_second.feedback);

        assert!(e.evaluate(inside, t0 + Duration::from_millis(2100)).feedback);
    }

    #[test]
    fn throttle_window_is_exclusive() {
        let mut t = AlertThrottle::new(FEEDBACK_THROTTLE);
        let t0 = Instant::now();
        assert!(t.try_fire(t0));
        assert!(!t.try_fire(t0 + FEEDBACK_THROTTLE));
        assert!(t.try_fire(t0 + FEEDBACK_THROTTLE + Duration::from_millis(1)));
    }

    #[test]
    fn no_feedback_without_an_alert() {
        let mut e = engine(vec![zone("a", 10.0, 10.0, 2.0)]);
        assert!(!e.evaluate(p(90.0, 90.0), Instant::now()).feedback);
        assert!(e.throttle.last_fired().is_none());
    }

    #[test]
    fn operator_near_zone_a() {
        let mut e = engine(vec![zone("A", 25.0, 75.0, 12.0)]);
        let alert = e.evaluate(p(30.0, 78.0), Instant::now()).alert.unwrap();
        assert_eq!(alert.zone_label, "zone A");
        assert!((alert.distance - 34f64.sqrt()).abs() < 1e-9);
        // Zone centre is up-left of the operator on a y-down grid.
        assert_eq!(alert.direction, Compass::NorthWest);
    }

    #[test]
    fn telemetry_covers_every_zone() {
        let e = engine(vec![zone("a", 10.0, 10.0, 5.0), zone("b", 90.0, 90.0, 5.0)]);
        let t = e.telemetry(p(10.0, 13.0));
        assert_eq!(t.len(), 2);
        assert!(t[0].in_range);
        assert!(!t[1].in_range);
        assert!((t[0].distance - 3.0).abs() < 1e-9);
    }

    #[test]
    fn registry_can_be_swapped() {
        let mut e = engine(vec![zone("a", 10.0, 10.0, 5.0)]);
        assert!(e.evaluate(p(50.0, 50.0), Instant::now()).alert.is_none());
        e.set_registry(HazardRegistry::new(vec![zone("b", 50.0, 50.0, 5.0)]).unwrap());
        assert_eq!(e.evaluate(p(50.0, 50.0), Instant::now()).alert.unwrap().zone_id, "b");
    }
}
