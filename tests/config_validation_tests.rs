//! Config Validation Tests
//!
//! Unknown-key detection, range checks and file loading, exercised through
//! the public config API.

use gfast::config::validation::{known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys};
use gfast::config::{ConfigError, GfastConfig};

// ============================================================================
// Unknown Keys
// ============================================================================

#[test]
fn typo_in_pgd_section_warns_with_suggestion() {
    let toml_str = r#"
[pgd]
dist_toll = 2.0
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert_eq!(warnings[0].field, "pgd.dist_toll");
    assert_eq!(warnings[0].suggestion.as_deref(), Some("pgd.dist_tol"));
    assert!(warnings[0].to_string().contains("did you mean 'pgd.dist_tol'"));
}

#[test]
fn typo_in_general_section_warns() {
    let warnings = validate_unknown_keys("[general]\nbuflen = 900.0\n");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].suggestion.as_deref(), Some("general.bufflen"));
}

#[test]
fn full_valid_config_produces_zero_warnings() {
    let toml_str = r#"
[general]
bufflen = 1200.0
default_dt = 1.0
wait_time = 1.0
processing_time = 240.0
pre_event_window = 5.0
max_distance_km = 2500.0
republish_mag_delta = 0.05
parallel = false
max_batch = 1024

[pgd]
min_sites = 5
depths_km = [5.0, 10.0, 20.0]
dist_tol = 0.5

[cmt]
nlat = 3
nlon = 3
dlat = 0.05
dlon = 0.05
weight_u = 0.5

[ff]
nstr = 12
ndip = 4
smoothing = 0.2

[[ff.fallback_planes]]
strike = 195.0
dip = 14.0

[archive]
path = "/var/lib/gfast/archive"
enabled = true

[transport]
max_reconnect_attempts = 20
reconnect_delay_ms = 500
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.is_empty(), "Expected 0 warnings, got: {:?}", warnings);
    let config = GfastConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.ff.fallback_planes.len(), 1);
    assert_eq!(config.cmt.weight_u, Some(0.5));
    assert_eq!(config.cmt.weight_n, None);
}

#[test]
fn unknown_key_does_not_fail_loading() {
    let config = GfastConfig::from_toml_str("[cmt]\nnlatt = 7\n").unwrap();
    // Typo ignored, default kept
    assert_eq!(config.cmt.nlat, 1);
}

#[test]
fn every_known_key_is_nested_under_a_known_section() {
    let known = known_config_keys();
    for key in &known {
        if let Some((section, _)) = key.split_once('.') {
            assert!(known.contains(section), "{key} has no section entry");
        }
    }
    assert!(suggest_correction("totally_unrelated_setting", &known).is_none());
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn defaults_are_valid() {
    assert!(validate_ranges(&GfastConfig::default()).is_empty());
    assert!(GfastConfig::default().validate().is_ok());
}

#[test]
fn range_errors_are_aggregated() {
    let toml_str = r#"
[general]
bufflen = -1.0

[pgd]
depths_km = []

[ff]
nstr = 0
poisson = 0.7
"#;
    let err = GfastConfig::from_toml_str(toml_str).unwrap_err();
    let ConfigError::Validation(errors) = err else {
        panic!("expected validation error, got {err}");
    };
    assert_eq!(errors.len(), 4, "{errors:?}");
    assert!(errors.iter().any(|e| e.starts_with("general.bufflen")));
    assert!(errors.iter().any(|e| e.starts_with("pgd.depths_km")));
    assert!(errors.iter().any(|e| e.starts_with("ff.nstr")));
    assert!(errors.iter().any(|e| e.starts_with("ff.poisson")));
}

#[test]
fn nan_values_are_rejected() {
    let err = GfastConfig::from_toml_str("[ff]\nsmoothing = nan\n").unwrap_err();
    let ConfigError::Validation(errors) = err else {
        panic!("expected validation error, got {err}");
    };
    assert!(errors.iter().any(|e| e == "ff.smoothing must be a finite number"), "{errors:?}");
}

#[test]
fn negative_component_weight_rejected() {
    let mut config = GfastConfig::default();
    config.ff.weight_e = Some(-1.0);
    let errors = validate_ranges(&config);
    assert_eq!(errors, vec!["ff.weight_e must be >= 0 (got -1)".to_string()]);
}

// ============================================================================
// File Loading
// ============================================================================

#[test]
fn load_from_file_round_trips_saved_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gfast.toml");

    let mut config = GfastConfig::default();
    config.general.bufflen = 900.0;
    config.pgd.depths_km = vec![8.0, 16.0];
    config.save_to_file(&path).unwrap();

    let loaded = GfastConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded.general.bufflen, 900.0);
    assert_eq!(loaded.pgd.depths_km, vec![8.0, 16.0]);
}

#[test]
fn load_from_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = GfastConfig::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
}

#[test]
fn parse_error_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[general\nbufflen = 1").unwrap();
    let err = GfastConfig::load_from_file(&path).unwrap_err();
    assert!(matches!(&err, ConfigError::Parse(p, _) if p == &path));
    assert!(err.to_string().contains("broken.toml"));
}
