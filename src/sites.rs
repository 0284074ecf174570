//! Site metadata and mask files
//!
//! Metadata lists one channel per line:
//!
//! ```text
//! # NET STA LOC CHAN  LAT       LON        ALT    SAMPRATE GAIN
//! UW    ALBH --  LYZ  48.3898  -123.4875   31.2   1.0      1000000
//! ```
//!
//! Channels sharing network, station, location and channel root form one
//! site, which must have all three components. The mask file excludes sites
//! from individual inversions and may carry a PGD weight:
//!
//! ```text
//! # NET STA LOC PGD CMT FF
//! UW    ALBH --  0   1   1   W=0.5
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use crate::types::{Component, SiteKey, SiteMetadata};

#[derive(Debug, Error)]
pub enum SiteMetadataError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("no complete three-component sites")]
    Empty,
}

fn parse_error(line: usize, reason: impl Into<String>) -> SiteMetadataError {
    SiteMetadataError::Parse { line, reason: reason.into() }
}

fn parse_field(line: usize, name: &str, token: &str) -> Result<f64, SiteMetadataError> {
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| parse_error(line, format!("invalid {name} '{token}'")))
}

/// Content lines with their 1-based numbers
fn content_lines(text: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    text.lines().enumerate().filter_map(|(i, line)| {
        let line = line.split('#').next().unwrap_or_default().trim();
        (!line.is_empty()).then(|| (i + 1, line.split_whitespace().collect()))
    })
}

fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

#[derive(Debug)]
struct PartialSite {
    meta: SiteMetadata,
    components: Vec<Component>,
}

/// Parse a metadata document into complete sites, in key order.
///
/// A sample rate ≤ 0 falls back to `default_dt`. Sites missing a component
/// are dropped with a warning.
pub fn parse_metadata(text: &str, default_dt: f64) -> Result<Vec<SiteMetadata>, SiteMetadataError> {
    let mut partial: BTreeMap<SiteKey, PartialSite> = BTreeMap::new();

    for (line, fields) in content_lines(text) {
        let [net, sta, loc, chan, lat, lon, alt, rate, gain] = fields[..] else {
            return Err(parse_error(line, format!("expected 9 fields, found {}", fields.len())));
        };
        let component = Component::from_channel(chan)
            .ok_or_else(|| parse_error(line, format!("unknown component in channel '{chan}'")))?;
        let latitude = parse_field(line, "latitude", lat)?;
        let longitude = wrap_longitude(parse_field(line, "longitude", lon)?);
        let altitude = parse_field(line, "altitude", alt)?;
        let rate = parse_field(line, "sample rate", rate)?;
        let gain = parse_field(line, "gain", gain)?;
        if gain <= 0.0 {
            return Err(parse_error(line, format!("gain must be positive, got {gain}")));
        }
        let dt = if rate > 0.0 { 1.0 / rate } else { default_dt };

        let key = SiteKey::from_channel(net, sta, chan, loc);
        let entry = partial.entry(key.clone()).or_insert_with(|| {
            let mut meta = SiteMetadata::new(key, latitude, longitude, dt);
            meta.altitude = altitude;
            meta.gain = gain;
            PartialSite { meta, components: Vec::with_capacity(3) }
        });
        if (entry.meta.dt - dt).abs() > 1e-9 {
            tracing::warn!(site = %entry.meta.key, channel = chan, "Sample rate differs between components, keeping first");
        }
        if entry.components.contains(&component) {
            tracing::warn!(site = %entry.meta.key, channel = chan, line = line, "Duplicate channel ignored");
        } else {
            entry.components.push(component);
        }
    }

    let sites: Vec<SiteMetadata> = partial
        .into_values()
        .filter_map(|site| {
            if site.components.len() == 3 {
                Some(site.meta)
            } else {
                tracing::warn!(site = %site.meta.key, components = site.components.len(), "Incomplete site dropped");
                None
            }
        })
        .collect();

    if sites.is_empty() {
        return Err(SiteMetadataError::Empty);
    }
    Ok(sites)
}

pub fn load_metadata(path: &Path, default_dt: f64) -> Result<Vec<SiteMetadata>, SiteMetadataError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| SiteMetadataError::Io { path: path.display().to_string(), source })?;
    let sites = parse_metadata(&text, default_dt)?;
    tracing::info!(path = %path.display(), sites = sites.len(), "Site metadata loaded");
    Ok(sites)
}

#[derive(Debug, Clone, Default, PartialEq)]
struct MaskEntry {
    skip: [bool; 3],
    weight: Option<f64>,
}

fn parse_flag(line: usize, token: &str) -> Result<bool, SiteMetadataError> {
    match token {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(parse_error(line, format!("mask flag must be 0 or 1, got '{other}'"))),
    }
}

fn parse_mask(text: &str) -> Result<BTreeMap<(String, String, String), MaskEntry>, SiteMetadataError> {
    let mut masks = BTreeMap::new();
    for (line, fields) in content_lines(text) {
        if fields.len() < 3 {
            return Err(parse_error(line, "expected NET STA LOC"));
        }
        let key = SiteKey::new(fields[0], fields[1], "", fields[2]);
        let mut entry = MaskEntry::default();
        let mut flag = 0;
        for token in &fields[3..] {
            if let Some(weight) = token.strip_prefix("W=") {
                let weight = parse_field(line, "weight", weight)?;
                if weight < 0.0 {
                    return Err(parse_error(line, format!("weight must be non-negative, got {weight}")));
                }
                entry.weight = Some(weight);
            } else if flag < 3 {
                entry.skip[flag] = parse_flag(line, token)?;
                flag += 1;
            } else {
                return Err(parse_error(line, format!("unexpected token '{token}'")));
            }
        }
        masks.insert((key.network, key.station, key.location), entry);
    }
    Ok(masks)
}

/// Apply a mask document to resolved sites. Returns how many sites matched.
pub fn apply_mask(sites: &mut [SiteMetadata], text: &str) -> Result<usize, SiteMetadataError> {
    let masks = parse_mask(text)?;
    let mut matched = 0;
    for site in sites.iter_mut() {
        let lookup = (site.key.network.clone(), site.key.station.clone(), site.key.location.clone());
        if let Some(entry) = masks.get(&lookup) {
            [site.skip_pgd, site.skip_cmt, site.skip_ff] = entry.skip;
            if entry.weight.is_some() {
                site.pgd_weight = entry.weight;
            }
            matched += 1;
        }
    }
    if matched < masks.len() {
        tracing::warn!(entries = masks.len(), matched = matched, "Some mask entries match no site");
    }
    Ok(matched)
}

pub fn load_mask(path: &Path, sites: &mut [SiteMetadata]) -> Result<usize, SiteMetadataError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| SiteMetadataError::Io { path: path.display().to_string(), source })?;
    let matched = apply_mask(sites, &text)?;
    tracing::info!(path = %path.display(), matched = matched, "Site mask applied");
    Ok(matched)
}
