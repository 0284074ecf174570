//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use super::GfastConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `GfastConfig`.
///
/// Must track the struct hierarchy in `gfast_config.rs`.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [general]
        "general",
        "general.bufflen",
        "general.default_dt",
        "general.wait_time",
        "general.processing_time",
        "general.pre_event_window",
        "general.max_distance_km",
        "general.republish_mag_delta",
        "general.parallel",
        "general.max_batch",
        // [pgd]
        "pgd",
        "pgd.min_sites",
        "pgd.depths_km",
        "pgd.a",
        "pgd.b",
        "pgd.c",
        "pgd.dist_tol",
        "pgd.dist_def",
        "pgd.window_vel",
        // [cmt]
        "cmt",
        "cmt.min_sites",
        "cmt.depths_km",
        "cmt.nlat",
        "cmt.nlon",
        "cmt.dlat",
        "cmt.dlon",
        "cmt.window_vel",
        "cmt.window_avg",
        "cmt.weight_n",
        "cmt.weight_e",
        "cmt.weight_u",
        "cmt.rigidity",
        "cmt.poisson",
        "cmt.decompose_all",
        // [ff]
        "ff",
        "ff.min_sites",
        "ff.nstr",
        "ff.ndip",
        "ff.smoothing",
        "ff.window_vel",
        "ff.window_avg",
        "ff.weight_n",
        "ff.weight_e",
        "ff.weight_u",
        "ff.fallback_planes",
        "ff.rigidity",
        "ff.poisson",
        "ff.length_a",
        "ff.length_b",
        "ff.width_a",
        "ff.width_b",
        // [archive]
        "archive",
        "archive.path",
        "archive.enabled",
        // [transport]
        "transport",
        "transport.max_reconnect_attempts",
        "transport.reconnect_delay_ms",
        "transport.trace_timeout_ms",
        "transport.alert_timeout_ms",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = join_key(prefix, k);
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

/// Dotted paths of every NaN/Inf float, including inside arrays.
pub fn non_finite_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    match value {
        toml::Value::Float(f) if !f.is_finite() => vec![prefix.to_string()],
        toml::Value::Table(table) => table
            .iter()
            .flat_map(|(k, v)| non_finite_keys(v, &join_key(prefix, k)))
            .collect(),
        toml::Value::Array(items) => items
            .iter()
            .enumerate()
            .flat_map(|(i, v)| non_finite_keys(v, &format!("{prefix}[{i}]")))
            .collect(),
        _ => Vec::new(),
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties go to the lexicographically smaller key so suggestions are stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|&(dist, _)| dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys; it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

fn require_positive(value: f64, name: &str, errors: &mut Vec<String>) {
    if value <= 0.0 {
        errors.push(format!("{name} must be > 0 (got {value})"));
    }
}

fn require_depths(depths: &[f64], name: &str, errors: &mut Vec<String>) {
    if depths.is_empty() {
        errors.push(format!("{name} must list at least one depth"));
    } else if depths.iter().any(|&d| d < 0.0) {
        errors.push(format!("{name} must not contain negative depths"));
    }
}

fn require_poisson(nu: f64, name: &str, errors: &mut Vec<String>) {
    if !(0.0..0.5).contains(&nu) {
        errors.push(format!("{name} must be in [0, 0.5) (got {nu})"));
    }
}

/// Collect every violated constraint on a parsed config.
pub fn validate_ranges(config: &GfastConfig) -> Vec<String> {
    let mut errors = Vec::new();

    let g = &config.general;
    require_positive(g.bufflen, "general.bufflen", &mut errors);
    require_positive(g.default_dt, "general.default_dt", &mut errors);
    require_positive(g.wait_time, "general.wait_time", &mut errors);
    require_positive(g.processing_time, "general.processing_time", &mut errors);
    require_positive(g.max_distance_km, "general.max_distance_km", &mut errors);
    if g.pre_event_window < 0.0 {
        errors.push("general.pre_event_window must be >= 0".to_string());
    }
    if g.republish_mag_delta < 0.0 {
        errors.push("general.republish_mag_delta must be >= 0".to_string());
    }
    if g.max_batch == 0 {
        errors.push("general.max_batch must be > 0".to_string());
    }

    let p = &config.pgd;
    if p.min_sites == 0 {
        errors.push("pgd.min_sites must be > 0".to_string());
    }
    require_depths(&p.depths_km, "pgd.depths_km", &mut errors);
    require_positive(p.dist_tol, "pgd.dist_tol", &mut errors);
    require_positive(p.dist_def, "pgd.dist_def", &mut errors);
    require_positive(p.window_vel, "pgd.window_vel", &mut errors);

    let c = &config.cmt;
    if c.min_sites == 0 {
        errors.push("cmt.min_sites must be > 0".to_string());
    }
    require_depths(&c.depths_km, "cmt.depths_km", &mut errors);
    if c.nlat == 0 || c.nlon == 0 {
        errors.push(format!("cmt.nlat and cmt.nlon must be > 0 (got {} x {})", c.nlat, c.nlon));
    }
    if c.nlat > 1 {
        require_positive(c.dlat, "cmt.dlat", &mut errors);
    }
    if c.nlon > 1 {
        require_positive(c.dlon, "cmt.dlon", &mut errors);
    }
    require_positive(c.window_vel, "cmt.window_vel", &mut errors);
    require_positive(c.window_avg, "cmt.window_avg", &mut errors);
    require_positive(c.rigidity, "cmt.rigidity", &mut errors);
    require_poisson(c.poisson, "cmt.poisson", &mut errors);

    let f = &config.ff;
    if f.min_sites == 0 {
        errors.push("ff.min_sites must be > 0".to_string());
    }
    if f.nstr * f.ndip == 0 {
        errors.push(format!("ff.nstr * ff.ndip must be > 0 (got {} x {})", f.nstr, f.ndip));
    }
    if f.smoothing < 0.0 {
        errors.push("ff.smoothing must be >= 0".to_string());
    }
    require_positive(f.window_vel, "ff.window_vel", &mut errors);
    require_positive(f.window_avg, "ff.window_avg", &mut errors);
    require_positive(f.rigidity, "ff.rigidity", &mut errors);
    require_poisson(f.poisson, "ff.poisson", &mut errors);
    for (i, plane) in f.fallback_planes.iter().enumerate() {
        if !(0.0..=90.0).contains(&plane.dip) {
            errors.push(format!("ff.fallback_planes[{i}].dip must be in [0, 90] (got {})", plane.dip));
        }
    }

    for (name, weight) in [
        ("cmt.weight_n", c.weight_n),
        ("cmt.weight_e", c.weight_e),
        ("cmt.weight_u", c.weight_u),
        ("ff.weight_n", f.weight_n),
        ("ff.weight_e", f.weight_e),
        ("ff.weight_u", f.weight_u),
    ] {
        if let Some(w) = weight {
            if w < 0.0 {
                errors.push(format!("{name} must be >= 0 (got {w})"));
            }
        }
    }

    if config.transport.max_reconnect_attempts == 0 {
        errors.push("transport.max_reconnect_attempts must be > 0".to_string());
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("bufflen", "bufflen"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("smothing", "smoothing"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [cmt]
            nlat = 3
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"cmt".to_string()));
        assert!(keys.contains(&"cmt.nlat".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[ff]
smothing = 0.1
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "ff.smothing");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("ff.smoothing"));
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[general]
bufflen = 600.0

[pgd]
depths_km = [5.0, 10.0]

[[ff.fallback_planes]]
strike = 10.0
dip = 45.0
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {:?}", warnings);
    }

    #[test]
    fn test_unknown_section_produces_warning() {
        let warnings = validate_unknown_keys("[quakeml]\nenabled = true\n");
        assert!(warnings.iter().any(|w| w.field == "quakeml"));
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_non_finite_keys_found_in_arrays() {
        let mut config = GfastConfig::default();
        config.pgd.depths_km[2] = f64::NAN;
        config.ff.smoothing = f64::INFINITY;
        let value = toml::Value::try_from(&config).unwrap();
        let keys = non_finite_keys(&value, "");
        assert!(keys.contains(&"pgd.depths_km[2]".to_string()));
        assert!(keys.contains(&"ff.smoothing".to_string()));
    }

    #[test]
    fn test_defaults_pass_range_checks() {
        assert!(validate_ranges(&GfastConfig::default()).is_empty());
    }

    #[test]
    fn test_zero_reconnect_attempts_rejected() {
        let mut config = GfastConfig::default();
        config.transport.max_reconnect_attempts = 0;
        config.cmt.poisson = 0.5;
        let errors = validate_ranges(&config);
        assert_eq!(errors.len(), 2, "{errors:?}");
    }
}
