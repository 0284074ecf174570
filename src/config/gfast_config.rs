//! GFAST configuration - buffer, inversion grids and transport as TOML values
//!
//! Every field carries a serde default so an empty file (or no file at all)
//! yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use super::defaults::{CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};
use crate::buffer::{OffsetWindow, PgdWindow};
use crate::inversion::FaultPlane;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one GFAST deployment.
///
/// Load with `GfastConfig::load()` which searches:
/// 1. `$GFAST_CONFIG` env var
/// 2. `./gfast.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GfastConfig {
    /// Buffering, pacing and event bookkeeping
    #[serde(default)]
    pub general: GeneralConfig,

    /// Peak ground displacement scaling
    #[serde(default)]
    pub pgd: PgdConfig,

    /// Centroid moment tensor
    #[serde(default)]
    pub cmt: CmtConfig,

    /// Finite fault slip
    #[serde(default)]
    pub ff: FfConfig,

    /// Iteration archive
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Trace and alert transports
    #[serde(default)]
    pub transport: TransportConfig,
}

impl GfastConfig {
    /// Load configuration using the standard search order:
    /// 1. `$GFAST_CONFIG` environment variable
    /// 2. `./gfast.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", DEFAULT_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", DEFAULT_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are reported as warnings, never as errors.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Write the config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Check every constraint and report all violations together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = super::validation::validate_ranges(self);

        // NaN/Inf never fail a comparison, sweep every float explicitly
        if let Ok(value) = toml::Value::try_from(self) {
            for key in super::validation::non_finite_keys(&value, "") {
                errors.push(format!("{key} must be a finite number"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Extraction window for peak displacements
    pub fn pgd_window(&self) -> PgdWindow {
        PgdWindow {
            pre_event_window: self.general.pre_event_window,
            velocity_km_s: self.pgd.window_vel,
            max_distance_km: self.general.max_distance_km,
        }
    }

    /// Extraction window for CMT offsets
    pub fn cmt_window(&self) -> OffsetWindow {
        OffsetWindow {
            pre_event_window: self.general.pre_event_window,
            velocity_km_s: self.cmt.window_vel,
            average_window: self.cmt.window_avg,
            max_distance_km: self.general.max_distance_km,
            weights: [self.cmt.weight_n, self.cmt.weight_e, self.cmt.weight_u],
        }
    }

    /// Extraction window for FF offsets
    pub fn ff_window(&self) -> OffsetWindow {
        OffsetWindow {
            pre_event_window: self.general.pre_event_window,
            velocity_km_s: self.ff.window_vel,
            average_window: self.ff.window_avg,
            max_distance_km: self.general.max_distance_km,
            weights: [self.ff.weight_n, self.ff.weight_e, self.ff.weight_u],
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// [general]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Retention horizon of every site buffer (s)
    #[serde(default = "default_bufflen")]
    pub bufflen: f64,

    /// Sampling period for sites whose metadata omits one (s)
    #[serde(default = "default_dt")]
    pub default_dt: f64,

    /// Target iteration cadence (s)
    #[serde(default = "default_wait_time")]
    pub wait_time: f64,

    /// Events older than this since origin expire (s)
    #[serde(default = "default_processing_time")]
    pub processing_time: f64,

    /// Pre-origin window averaged for the reference level (s)
    #[serde(default = "default_pre_event_window")]
    pub pre_event_window: f64,

    /// Sites farther than this from the epicentre are not used (km)
    #[serde(default = "default_max_distance")]
    pub max_distance_km: f64,

    /// Minimum magnitude change that triggers a republish
    #[serde(default = "default_republish_mag_delta")]
    pub republish_mag_delta: f64,

    /// Evaluate grid points on the rayon pool
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Upper bound on wire messages drained per iteration
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_bufflen() -> f64 { 1800.0 }
fn default_dt() -> f64 { 1.0 }
fn default_wait_time() -> f64 { 1.0 }
fn default_processing_time() -> f64 { 300.0 }
fn default_pre_event_window() -> f64 { 5.0 }
fn default_max_distance() -> f64 { 3000.0 }
fn default_republish_mag_delta() -> f64 { 0.1 }
fn default_true() -> bool { true }
fn default_max_batch() -> usize { 4096 }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bufflen: default_bufflen(),
            default_dt: default_dt(),
            wait_time: default_wait_time(),
            processing_time: default_processing_time(),
            pre_event_window: default_pre_event_window(),
            max_distance_km: default_max_distance(),
            republish_mag_delta: default_republish_mag_delta(),
            parallel: default_true(),
            max_batch: default_max_batch(),
        }
    }
}

/// Depths 1, 3, 5, ... 99 km
fn default_depths() -> Vec<f64> {
    (0..50).map(|i| 1.0 + 2.0 * f64::from(i)).collect()
}

fn default_min_sites() -> usize { 4 }
fn default_rigidity() -> f64 { 3.0e10 }
fn default_poisson() -> f64 { 0.25 }
fn default_swave_velocity() -> f64 { 2.0 }
fn default_offset_window() -> f64 { 60.0 }

// ============================================================================
// [pgd]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgdConfig {
    #[serde(default = "default_min_sites")]
    pub min_sites: usize,

    /// Trial source depths (km)
    #[serde(default = "default_depths")]
    pub depths_km: Vec<f64>,

    /// Scaling law `log10(PGD_cm) = A + B·M + C·M·log10(R)`
    #[serde(default = "default_pgd_a")]
    pub a: f64,
    #[serde(default = "default_pgd_b")]
    pub b: f64,
    #[serde(default = "default_pgd_c")]
    pub c: f64,

    /// Distances below `dist_tol` are replaced by `dist_def` (km)
    #[serde(default = "default_dist_tol")]
    pub dist_tol: f64,
    #[serde(default = "default_dist_def")]
    pub dist_def: f64,

    /// P-wave velocity opening the peak window (km/s)
    #[serde(default = "default_pwave_velocity")]
    pub window_vel: f64,
}

fn default_pgd_a() -> f64 { -4.434 }
fn default_pgd_b() -> f64 { 1.047 }
fn default_pgd_c() -> f64 { -0.138 }
fn default_dist_tol() -> f64 { 1.0 }
fn default_dist_def() -> f64 { 1.0 }
fn default_pwave_velocity() -> f64 { 3.0 }

impl Default for PgdConfig {
    fn default() -> Self {
        Self {
            min_sites: default_min_sites(),
            depths_km: default_depths(),
            a: default_pgd_a(),
            b: default_pgd_b(),
            c: default_pgd_c(),
            dist_tol: default_dist_tol(),
            dist_def: default_dist_def(),
            window_vel: default_pwave_velocity(),
        }
    }
}

// ============================================================================
// [cmt]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmtConfig {
    #[serde(default = "default_min_sites")]
    pub min_sites: usize,

    #[serde(default = "default_depths")]
    pub depths_km: Vec<f64>,

    /// Latitude/longitude grid, centred on the hypocentre
    #[serde(default = "default_one")]
    pub nlat: usize,
    #[serde(default = "default_one")]
    pub nlon: usize,
    #[serde(default = "default_grid_step")]
    pub dlat: f64,
    #[serde(default = "default_grid_step")]
    pub dlon: f64,

    /// S-wave velocity opening the offset window (km/s)
    #[serde(default = "default_swave_velocity")]
    pub window_vel: f64,

    /// Offset averaging window (s)
    #[serde(default = "default_offset_window")]
    pub window_avg: f64,

    /// Component weights; absent components default to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_n: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_e: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_u: Option<f64>,

    /// Shear modulus (Pa)
    #[serde(default = "default_rigidity")]
    pub rigidity: f64,

    #[serde(default = "default_poisson")]
    pub poisson: f64,

    /// Decompose every grid point, not only the optimum
    #[serde(default)]
    pub decompose_all: bool,
}

fn default_one() -> usize { 1 }
fn default_grid_step() -> f64 { 0.1 }

impl Default for CmtConfig {
    fn default() -> Self {
        Self {
            min_sites: default_min_sites(),
            depths_km: default_depths(),
            nlat: default_one(),
            nlon: default_one(),
            dlat: default_grid_step(),
            dlon: default_grid_step(),
            window_vel: default_swave_velocity(),
            window_avg: default_offset_window(),
            weight_n: None,
            weight_e: None,
            weight_u: None,
            rigidity: default_rigidity(),
            poisson: default_poisson(),
            decompose_all: false,
        }
    }
}

// ============================================================================
// [ff]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfConfig {
    #[serde(default = "default_min_sites")]
    pub min_sites: usize,

    /// Patches along strike
    #[serde(default = "default_nstr")]
    pub nstr: usize,

    /// Patches down dip
    #[serde(default = "default_ndip")]
    pub ndip: usize,

    /// Scale of the Laplacian regularization rows
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,

    #[serde(default = "default_swave_velocity")]
    pub window_vel: f64,

    #[serde(default = "default_offset_window")]
    pub window_avg: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_n: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_e: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_u: Option<f64>,

    /// Planes tried when CMT produced no nodal planes
    #[serde(default)]
    pub fallback_planes: Vec<FaultPlane>,

    #[serde(default = "default_rigidity")]
    pub rigidity: f64,

    #[serde(default = "default_poisson")]
    pub poisson: f64,

    /// Fault size scaling: `L = 10^(length_a + length_b·M)` km
    #[serde(default = "default_length_a")]
    pub length_a: f64,
    #[serde(default = "default_length_b")]
    pub length_b: f64,

    /// `W = 10^(width_a + width_b·M)` km
    #[serde(default = "default_width_a")]
    pub width_a: f64,
    #[serde(default = "default_width_b")]
    pub width_b: f64,
}

fn default_nstr() -> usize { 10 }
fn default_ndip() -> usize { 5 }
fn default_smoothing() -> f64 { 0.05 }
fn default_length_a() -> f64 { -2.44 }
fn default_length_b() -> f64 { 0.59 }
fn default_width_a() -> f64 { -1.01 }
fn default_width_b() -> f64 { 0.32 }

impl Default for FfConfig {
    fn default() -> Self {
        Self {
            min_sites: default_min_sites(),
            nstr: default_nstr(),
            ndip: default_ndip(),
            smoothing: default_smoothing(),
            window_vel: default_swave_velocity(),
            window_avg: default_offset_window(),
            weight_n: None,
            weight_e: None,
            weight_u: None,
            fallback_planes: Vec::new(),
            rigidity: default_rigidity(),
            poisson: default_poisson(),
            length_a: default_length_a(),
            length_b: default_length_b(),
            width_a: default_width_a(),
            width_b: default_width_b(),
        }
    }
}

// ============================================================================
// [archive]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Sled database directory
    #[serde(default = "default_archive_path")]
    pub path: PathBuf,

    /// Disable to keep results in memory only
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("./gfast_archive")
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self { path: default_archive_path(), enabled: true }
    }
}

// ============================================================================
// [transport]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Fixed delay between reconnect attempts (ms)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Bounded wait on the trace source per iteration (ms)
    #[serde(default = "default_trace_timeout_ms")]
    pub trace_timeout_ms: u64,

    /// Bounded wait on the alert source per poll (ms)
    #[serde(default = "default_alert_timeout_ms")]
    pub alert_timeout_ms: u64,
}

fn default_max_reconnect_attempts() -> u32 { 5 }
fn default_reconnect_delay_ms() -> u64 { 2000 }
fn default_trace_timeout_ms() -> u64 { 100 }
fn default_alert_timeout_ms() -> u64 { 10 }

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            trace_timeout_ms: default_trace_timeout_ms(),
            alert_timeout_ms: default_alert_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = GfastConfig::from_toml_str("").unwrap();
        assert_eq!(config.general.bufflen, 1800.0);
        assert_eq!(config.pgd.depths_km.len(), 50);
        assert_eq!(config.pgd.depths_km[0], 1.0);
        assert_eq!(config.pgd.depths_km[49], 99.0);
        assert_eq!(config.ff.nstr * config.ff.ndip, 50);
        assert!(config.cmt.weight_n.is_none());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(GfastConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = GfastConfig::from_toml_str(
            r#"
[cmt]
nlat = 3
weight_u = 0.5

[[ff.fallback_planes]]
strike = 330.0
dip = 80.0
"#,
        )
        .unwrap();
        assert_eq!(config.cmt.nlat, 3);
        assert_eq!(config.cmt.nlon, 1);
        assert_eq!(config.cmt.weight_u, Some(0.5));
        assert_eq!(config.ff.fallback_planes, vec![FaultPlane { strike: 330.0, dip: 80.0 }]);
        assert_eq!(config.cmt_window().weights, [None, None, Some(0.5)]);
    }

    #[test]
    fn test_validation_collects_every_violation() {
        let err = GfastConfig::from_toml_str(
            r#"
[general]
bufflen = -1.0

[pgd]
depths_km = []

[ff]
nstr = 0
"#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(errors.len() >= 3, "{errors:?}");
                assert!(errors.iter().any(|e| e.contains("general.bufflen")));
                assert!(errors.iter().any(|e| e.contains("pgd.depths_km")));
                assert!(errors.iter().any(|e| e.contains("ff.nstr")));
            }
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = GfastConfig::default();
        let text = config.to_toml().unwrap();
        let back = GfastConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.pgd.depths_km, config.pgd.depths_km);
        assert_eq!(back.transport.reconnect_delay_ms, config.transport.reconnect_delay_ms);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gfast.toml");
        let mut config = GfastConfig::default();
        config.general.processing_time = 120.0;
        config.save_to_file(&path).unwrap();
        let loaded = GfastConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.general.processing_time, 120.0);
    }
}
