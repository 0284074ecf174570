//! Event-relative window extraction
//!
//! Turns site buffers into the per-site features the inversions consume:
//! - peak horizontal displacement after the expected P arrival
//! - static offsets averaged over the last `average_window` seconds once
//!   the expected S arrival plus the averaging window has been recorded
//!
//! Displacements are referenced to the mean pre-event level of each
//! component so a station's absolute position does not leak into the
//! features.

use super::{ChannelBuffer, Site};
use crate::inversion::geo;
use crate::types::{
    ActiveEvent, Component, ModelKind, OffsetObservation, PeakDisplacementObservation,
};

/// Window parameters for peak displacement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PgdWindow {
    /// Seconds before origin averaged for the reference level
    pub pre_event_window: f64,
    /// Phase velocity defining the earliest eligible sample (km/s)
    pub velocity_km_s: f64,
    pub max_distance_km: f64,
}

/// Window parameters for static offsets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetWindow {
    pub pre_event_window: f64,
    pub velocity_km_s: f64,
    /// Averaging window at the end of the record (s)
    pub average_window: f64,
    pub max_distance_km: f64,
    /// Component weights (north, east, up)
    pub weights: [Option<f64>; 3],
}

/// Mean finite value over `[origin - pre, origin]`, else the first finite
/// value after origin.
fn reference_level(channel: &ChannelBuffer, origin: f64, pre: f64) -> Option<f64> {
    let (sum, n) = channel
        .index_range(origin - pre, origin)
        .map(|i| channel.get(i))
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n > 0 {
        return Some(sum / n as f64);
    }
    channel
        .index_range(origin, channel.end_time())
        .map(|i| channel.get(i))
        .find(|v| v.is_finite())
}

fn references(site: &Site, origin: f64, pre: f64) -> Option<[f64; 3]> {
    let mut refs = [0.0; 3];
    for (slot, component) in refs.iter_mut().zip(Component::ROW_ORDER) {
        *slot = reference_level(site.buffer.channel(component), origin, pre)?;
    }
    Some(refs)
}

fn peak_displacement(site: &Site, event: &ActiveEvent, window: &PgdWindow) -> PeakDisplacementObservation {
    let meta = &site.meta;
    let mut obs = PeakDisplacementObservation {
        site: meta.key.clone(),
        latitude: meta.latitude,
        longitude: meta.longitude,
        pgd: 0.0,
        weight: meta.pgd_weight,
        usable: false,
    };
    if site.is_skipped(ModelKind::Pgd) {
        return obs;
    }

    let distance = geo::hypocentral_distance_km(
        event.latitude,
        event.longitude,
        event.depth_km,
        meta.latitude,
        meta.longitude,
    );
    if distance > window.max_distance_km {
        return obs;
    }
    let Some([n0, e0, _]) = references(site, event.origin_time, window.pre_event_window) else {
        return obs;
    };

    let north = site.buffer.channel(Component::North);
    let east = site.buffer.channel(Component::East);
    let start = event.origin_time + distance / window.velocity_km_s;
    let peak = north
        .index_range(start, north.end_time())
        .filter_map(|i| {
            let (n, e) = (north.get(i), east.get(i));
            (n.is_finite() && e.is_finite()).then(|| (n - n0).hypot(e - e0))
        })
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));

    if let Some(pgd) = peak {
        obs.pgd = pgd;
        obs.usable = true;
    }
    obs
}

fn static_offset(
    site: &Site,
    event: &ActiveEvent,
    window: &OffsetWindow,
    model: ModelKind,
) -> OffsetObservation {
    let meta = &site.meta;
    let mut obs = OffsetObservation {
        site: meta.key.clone(),
        latitude: meta.latitude,
        longitude: meta.longitude,
        offset: [0.0; 3],
        weights: window.weights,
        usable: false,
    };
    if site.is_skipped(model) {
        return obs;
    }

    let distance = geo::hypocentral_distance_km(
        event.latitude,
        event.longitude,
        event.depth_km,
        meta.latitude,
        meta.longitude,
    );
    if distance > window.max_distance_km {
        return obs;
    }
    let Some(newest) = site.buffer.newest_common_index() else {
        return obs;
    };
    let t_newest = site.buffer.channel(Component::Up).time_at(newest);
    let ready = event.origin_time + distance / window.velocity_km_s + window.average_window;
    if t_newest < ready {
        return obs;
    }
    let Some(refs) = references(site, event.origin_time, window.pre_event_window) else {
        return obs;
    };

    for (k, component) in Component::ROW_ORDER.into_iter().enumerate() {
        let channel = site.buffer.channel(component);
        let (sum, n) = channel
            .index_range(t_newest - window.average_window, t_newest)
            .map(|i| channel.get(i))
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if n == 0 {
            return obs;
        }
        obs.offset[k] = sum / n as f64 - refs[k];
    }
    obs.usable = true;
    obs
}

/// Peak displacement for every site, usable or not.
pub fn extract_peak_displacements(
    sites: &[Site],
    event: &ActiveEvent,
    window: &PgdWindow,
) -> Vec<PeakDisplacementObservation> {
    sites.iter().map(|site| peak_displacement(site, event, window)).collect()
}

/// Static offsets for every site, masked according to `model`.
pub fn extract_offsets(
    sites: &[Site],
    event: &ActiveEvent,
    window: &OffsetWindow,
    model: ModelKind,
) -> Vec<OffsetObservation> {
    sites.iter().map(|site| static_offset(site, event, window, model)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SiteKey, SiteMetadata};

    fn event() -> ActiveEvent {
        ActiveEvent {
            id: "ev1".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            depth_km: 0.0,
            magnitude: 6.0,
            origin_time: 1000.0,
            version: 0,
        }
    }

    /// Site ~111 km north of the event with a step at t = 1050
    fn stepped_site() -> Site {
        let meta = SiteMetadata::new(SiteKey::new("CI", "AAA", "LY", ""), 1.0, 0.0, 1.0);
        let mut site = Site::new(meta, 300.0, 1200.0);
        for t in 900..=1200 {
            let t = t as f64;
            let step = if t >= 1050.0 { 1.0 } else { 0.0 };
            let spike = if t == 1060.0 { 1.0 } else { 0.0 };
            assert!(site.buffer.channel(Component::North).index_of(t).is_some());
            insert(&mut site, Component::North, t, 10.0 + 0.3 * step + spike);
            insert(&mut site, Component::East, t, 20.0 + 0.4 * step);
            insert(&mut site, Component::Up, t, 30.0 - 0.1 * step);
        }
        site
    }

    fn insert(site: &mut Site, component: Component, t: f64, v: f64) {
        use crate::acquisition::{decode_message, TraceBufBuilder};
        let chan = format!("LY{}", component);
        let msg = TraceBufBuilder::new("CI", "AAA", &chan, "")
            .start_time(t)
            .samples(&[(v * 1000.0).round() as i32])
            .build()
            .unwrap();
        site.buffer.merge(component, &decode_message(&msg).unwrap(), 1000.0);
    }

    #[test]
    fn test_peak_displacement_after_arrival() {
        let site = stepped_site();
        let window = PgdWindow { pre_event_window: 10.0, velocity_km_s: 3.0, max_distance_km: 1000.0 };
        let obs = extract_peak_displacements(&[site], &event(), &window);
        assert!(obs[0].usable);
        // Spike at 1060: north 1.3, east 0.4
        assert!((obs[0].pgd - 1.3f64.hypot(0.4)).abs() < 1e-9);
    }

    #[test]
    fn test_masked_and_far_sites_unusable() {
        let mut site = stepped_site();
        site.meta.skip_pgd = true;
        let window = PgdWindow { pre_event_window: 10.0, velocity_km_s: 3.0, max_distance_km: 1000.0 };
        assert!(!extract_peak_displacements(&[site], &event(), &window)[0].usable);

        let near_only = PgdWindow { max_distance_km: 50.0, ..window };
        assert!(!extract_peak_displacements(&[stepped_site()], &event(), &near_only)[0].usable);
    }

    #[test]
    fn test_static_offset() {
        let window = OffsetWindow {
            pre_event_window: 10.0,
            velocity_km_s: 2.0,
            average_window: 20.0,
            max_distance_km: 1000.0,
            weights: [Some(1.0), None, Some(0.5)],
        };
        let obs = extract_offsets(&[stepped_site()], &event(), &window, ModelKind::Cmt);
        assert!(obs[0].usable);
        assert!((obs[0].north() - 0.3).abs() < 1e-9);
        assert!((obs[0].east() - 0.4).abs() < 1e-9);
        assert!((obs[0].up() + 0.1).abs() < 1e-9);
        assert_eq!(obs[0].weights, [Some(1.0), None, Some(0.5)]);
    }

    #[test]
    fn test_offset_not_ready_before_s_wave() {
        let window = OffsetWindow {
            pre_event_window: 10.0,
            velocity_km_s: 0.5,
            average_window: 20.0,
            max_distance_km: 1000.0,
            weights: [None; 3],
        };
        // 111 km / 0.5 km/s = 222 s after origin > newest sample at 1200
        let obs = extract_offsets(&[stepped_site()], &event(), &window, ModelKind::Ff);
        assert!(!obs[0].usable);
    }

    #[test]
    fn test_empty_buffer_unusable() {
        let meta = SiteMetadata::new(SiteKey::new("CI", "BBB", "LY", ""), 0.5, 0.0, 1.0);
        let site = Site::new(meta, 300.0, 1200.0);
        let window = PgdWindow { pre_event_window: 10.0, velocity_km_s: 3.0, max_distance_km: 1000.0 };
        assert!(!extract_peak_displacements(&[site], &event(), &window)[0].usable);
    }
}
