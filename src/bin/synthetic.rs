//! Synthetic GFAST scenario generator
//!
//! Writes a replayable scenario for `gfast`:
//! - `sites.txt`: metadata for a ring of three-component GPS sites
//! - `traces.tb`: concatenated tracebuf messages
//! - `alerts.jsonl`: the event alert
//!
//! Displacements come from a point source: PGD scaling for the dynamic peak
//! and a double-couple static field for the permanent offset, plus Gaussian
//! noise.
//!
//! # Usage
//! ```bash
//! gfast-synthetic --out-dir scenario --magnitude 7.2 --seed 7
//! gfast --metadata scenario/sites.txt --traces scenario/traces.tb --alerts scenario/alerts.jsonl
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal, Uniform};

use gfast::acquisition::{SampleWidth, TraceBufBuilder};
use gfast::config::PgdConfig;
use gfast::inversion::decompose::{double_couple, scalar_moment};
use gfast::inversion::geo::{hypocentral_distance_km, offset_to_latlon};
use gfast::inversion::greens::site_greens;
use gfast::inversion::predict_pgd;
use gfast::types::{AlertMessage, NodalPlane};

// ============================================================================
// Scenario Constants
// ============================================================================

/// Counts per metre written into the metadata gain column
const GAIN: f64 = 1.0e6;
/// P-wave velocity used for the onset of motion (km/s)
const ONSET_VELOCITY: f64 = 3.0;
/// Duration of the dynamic pulse (s)
const PULSE_SECONDS: f64 = 20.0;
/// Samples per tracebuf message
const SAMPLES_PER_MESSAGE: usize = 60;
/// Shear modulus and Poisson ratio of the static model
const RIGIDITY: f64 = 3.0e10;
const POISSON: f64 = 0.25;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "gfast-synthetic")]
#[command(about = "Synthetic GPS displacement scenario for GFAST replay")]
#[command(version)]
struct Args {
    /// Output directory
    #[arg(long, default_value = "scenario")]
    out_dir: PathBuf,

    /// Number of sites
    #[arg(long, default_value = "24", value_parser = clap::value_parser!(u32).range(1..=500))]
    sites: u32,

    #[arg(long, default_value = "7.0")]
    magnitude: f64,

    #[arg(long, default_value = "38.3", allow_hyphen_values = true)]
    latitude: f64,

    #[arg(long, default_value = "142.4", allow_hyphen_values = true)]
    longitude: f64,

    #[arg(long, default_value = "20.0")]
    depth: f64,

    /// Fault strike/dip/rake of the static source (degrees)
    #[arg(long, default_value = "195.0")]
    strike: f64,
    #[arg(long, default_value = "14.0")]
    dip: f64,
    #[arg(long, default_value = "88.0", allow_hyphen_values = true)]
    rake: f64,

    /// Origin time (epoch seconds)
    #[arg(long, default_value = "1600000000.0")]
    origin: f64,

    /// Recorded seconds before origin
    #[arg(long, default_value = "60")]
    pre_event: u32,

    /// Recorded seconds after origin
    #[arg(long, default_value = "300")]
    duration: u32,

    /// Ring radii of the site network (km)
    #[arg(long, default_value = "30.0")]
    min_distance: f64,
    #[arg(long, default_value = "400.0")]
    max_distance: f64,

    /// Displacement noise standard deviation (m)
    #[arg(long, default_value = "0.005")]
    noise: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Scenario
// ============================================================================

#[derive(Debug, Clone)]
struct SyntheticSite {
    station: String,
    latitude: f64,
    longitude: f64,
    distance_km: f64,
    /// Peak horizontal displacement (m)
    pgd: f64,
    /// Static offset (north, east, up) in metres
    offset: [f64; 3],
}

impl SyntheticSite {
    /// Noise-free (north, east, up) displacement at `t` seconds after origin
    fn displacement(&self, t: f64) -> [f64; 3] {
        let onset = self.distance_km / ONSET_VELOCITY;
        if t < onset {
            return [0.0; 3];
        }
        let progress = ((t - onset) / PULSE_SECONDS).min(1.0);
        let [n, e, u] = self.offset.map(|c| c * progress);

        // Dynamic pulse along the static horizontal direction lifts the
        // horizontal peak to the scaling-law PGD
        let static_h = self.offset[0].hypot(self.offset[1]);
        let excess = (self.pgd - static_h).max(0.0);
        let pulse = excess * (std::f64::consts::PI * progress).sin();
        let (dn, de) = if static_h > 0.0 {
            (self.offset[0] / static_h, self.offset[1] / static_h)
        } else {
            (1.0, 0.0)
        };
        [n + pulse * dn, e + pulse * de, u]
    }
}

fn build_sites(args: &Args, rng: &mut StdRng) -> Vec<SyntheticSite> {
    let pgd_config = PgdConfig::default();
    let plane = NodalPlane { strike: args.strike, dip: args.dip, rake: args.rake };
    let tensor = double_couple(&plane, scalar_moment(args.magnitude));
    let coefficients = [tensor.mee, tensor.mnn, tensor.men, tensor.meu, tensor.mnu];

    let radius = Uniform::new_inclusive(args.min_distance, args.max_distance);
    let azimuth = Uniform::new(0.0, 360.0f64);

    (0..args.sites)
        .map(|i| {
            let r = radius.sample(&mut *rng);
            let az = azimuth.sample(&mut *rng).to_radians();
            let (east_km, north_km) = (r * az.sin(), r * az.cos());
            let (latitude, longitude) = offset_to_latlon(args.latitude, args.longitude, east_km, north_km);
            let distance_km = hypocentral_distance_km(args.latitude, args.longitude, args.depth, latitude, longitude);

            let greens = site_greens(east_km, north_km, args.depth, RIGIDITY, POISSON);
            let offset = greens.map(|row| row.iter().zip(coefficients).map(|(g, m)| g * m).sum::<f64>());

            SyntheticSite {
                station: format!("S{i:03}"),
                latitude,
                longitude,
                distance_km,
                pgd: predict_pgd(&pgd_config, args.magnitude, distance_km),
                offset,
            }
        })
        .collect()
}

fn write_metadata(path: &Path, sites: &[SyntheticSite]) -> Result<()> {
    let mut out = fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    writeln!(out, "# NET STA LOC CHAN LAT LON ALT SAMPRATE GAIN")?;
    for site in sites {
        for chan in ["LYZ", "LYN", "LYE"] {
            writeln!(
                out,
                "SY {} -- {} {:.5} {:.5} 0.0 1.0 {}",
                site.station, chan, site.latitude, site.longitude, GAIN
            )?;
        }
    }
    Ok(())
}

fn write_traces(path: &Path, args: &Args, sites: &[SyntheticSite], rng: &mut StdRng) -> Result<usize> {
    let noise = Normal::new(0.0, args.noise.max(0.0)).context("Invalid noise level")?;
    let start = args.origin - f64::from(args.pre_event);
    let nsamp = (args.pre_event + args.duration) as usize;

    let mut out = Vec::new();
    let mut messages = 0;
    for site in sites {
        // Rows: north, east, up
        let mut series = [Vec::with_capacity(nsamp), Vec::with_capacity(nsamp), Vec::with_capacity(nsamp)];
        for i in 0..nsamp {
            let t = start + i as f64 - args.origin;
            let clean = site.displacement(t);
            for (column, value) in series.iter_mut().zip(clean) {
                column.push(((value + noise.sample(rng)) * GAIN).round() as i32);
            }
        }

        for (chan, samples) in ["LYN", "LYE", "LYZ"].into_iter().zip(&series) {
            for (k, chunk) in samples.chunks(SAMPLES_PER_MESSAGE).enumerate() {
                let message = TraceBufBuilder::new("SY", &site.station, chan, "--")
                    .start_time(start + (k * SAMPLES_PER_MESSAGE) as f64)
                    .sample_rate(1.0)
                    .width(SampleWidth::Four)
                    .samples(chunk)
                    .build()
                    .context("Failed to build tracebuf message")?;
                out.extend_from_slice(&message);
                messages += 1;
            }
        }
    }
    fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(messages)
}

fn write_alert(path: &Path, args: &Args) -> Result<()> {
    let alert = AlertMessage {
        event_id: format!("synthetic{}", args.origin as i64),
        latitude: args.latitude,
        longitude: args.longitude,
        depth_km: args.depth,
        magnitude: args.magnitude,
        origin_time: args.origin,
        version: 0,
    };
    let line = serde_json::to_string(&alert)?;
    fs::write(path, format!("{line}\n")).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.min_distance > 0.0 && args.max_distance >= args.min_distance, "Invalid distance ring");

    let mut rng = match args.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    fs::create_dir_all(&args.out_dir).with_context(|| format!("Failed to create {}", args.out_dir.display()))?;
    let sites = build_sites(&args, &mut rng);

    write_metadata(&args.out_dir.join("sites.txt"), &sites)?;
    let messages = write_traces(&args.out_dir.join("traces.tb"), &args, &sites, &mut rng)?;
    write_alert(&args.out_dir.join("alerts.jsonl"), &args)?;

    let peak = sites.iter().map(|s| s.pgd).fold(0.0, f64::max);
    tracing::info!(
        out_dir = %args.out_dir.display(),
        sites = sites.len(),
        messages = messages,
        magnitude = args.magnitude,
        max_pgd_m = peak,
        seed = ?args.seed,
        "Scenario written"
    );
    Ok(())
}
