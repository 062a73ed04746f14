//! TOML configuration.
//!
//! Every section is optional; missing keys fall back to the option structs'
//! defaults. Environment variables (`GEOWRANGLE_*`) override file values.
//!
//! ```toml
//! [topology]
//! fill_intersects = true
//! keep_contains = true
//! buffer_epsilon = 1e-7
//! self_intersection = "union_parts"
//!
//! [join]
//! predicate = "within"
//! collision_suffix = "_origin"
//!
//! [neighbors]
//! k = 5
//! radius = 500.0
//!
//! [transform]
//! exact_inverse = true
//!
//! [cities."厦门"]
//! datum = "gcj02"
//! metric_epsg = 32650
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{GeoWrangleError, Result};
use crate::functions::join::JoinOptions;
use crate::functions::neighbors::NeighborOptions;
use crate::functions::topology::TopologyOptions;
use crate::functions::transform::SpatialReference;
use crate::reference::ReferenceTables;

/// Datum conversion settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    /// Use bracket narrowing for GCJ02 → WGS84 instead of the one-step
    /// approximation.
    pub exact_inverse: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self { exact_inverse: true }
    }
}

/// Per-city override of the builtin reference tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct CityOverride {
    pub datum: Option<SpatialReference>,
    pub metric_epsg: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeoWrangleConfig {
    pub topology: TopologyOptions,
    pub join: JoinOptions,
    pub neighbors: NeighborOptions,
    pub transform: TransformOptions,
    pub cities: HashMap<String, CityOverride>,
}

fn invalid(key: &str, reason: impl std::fmt::Display) -> GeoWrangleError {
    GeoWrangleError::Config(format!("{key}: {reason}"))
}

impl GeoWrangleConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| invalid("toml", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply `GEOWRANGLE_*` environment overrides. Unparsable values are
    /// logged and ignored.
    pub fn with_env(mut self) -> Self {
        if let Ok(raw) = env::var("GEOWRANGLE_BUFFER_EPSILON") {
            match raw.parse::<f64>() {
                Ok(v) if v >= 0.0 => self.topology.buffer_epsilon = v,
                _ => tracing::warn!("invalid GEOWRANGLE_BUFFER_EPSILON '{raw}': expected a non-negative number"),
            }
        }
        if let Ok(raw) = env::var("GEOWRANGLE_METRIC_EPSG") {
            match raw.parse::<u16>() {
                Ok(v) => self.neighbors.metric_epsg = Some(v),
                Err(_) => tracing::warn!("invalid GEOWRANGLE_METRIC_EPSG '{raw}': expected an EPSG code"),
            }
        }
        if let Ok(raw) = env::var("GEOWRANGLE_EXACT_INVERSE") {
            match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.transform.exact_inverse = true,
                "0" | "false" | "no" => self.transform.exact_inverse = false,
                _ => tracing::warn!("invalid GEOWRANGLE_EXACT_INVERSE '{raw}': expected true or false"),
            }
        }
        self
    }

    fn validate(&self) -> Result<()> {
        let eps = self.topology.buffer_epsilon;
        if eps.is_nan() || eps < 0.0 {
            return Err(invalid("topology.buffer_epsilon", "must be non-negative"));
        }
        if self.neighbors.radius.is_some_and(|r| r.is_nan() || r < 0.0) {
            return Err(invalid("neighbors.radius", "must be non-negative"));
        }
        if self.join.collision_suffix.is_empty() {
            return Err(invalid("join.collision_suffix", "must not be empty"));
        }
        Ok(())
    }

    /// Builtin city tables with this config's `[cities]` overrides applied.
    pub fn reference_tables(&self) -> ReferenceTables {
        ReferenceTables::builtin().with_overrides(&self.cities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::join::SpatialPredicate;
    use crate::functions::neighbors::AggregateFunc;
    use crate::functions::topology::SelfIntersectionPolicy;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = GeoWrangleConfig::from_toml_str("").unwrap();
        assert_eq!(config, GeoWrangleConfig::default());
        assert_eq!(config.topology.buffer_epsilon, 1e-7);
        assert_eq!(config.join.collision_suffix, "_origin");
        assert!(config.transform.exact_inverse);
    }

    #[test]
    fn sections_parse() {
        let config = GeoWrangleConfig::from_toml_str(
            r#"
            [topology]
            fill_intersects = false
            self_intersection = "keep_largest"

            [join]
            predicate = "within"

            [neighbors]
            k = 3
            radius = 250.0
            aggregates = [{ column = "sales", func = "median" }]

            [cities."厦门市"]
            datum = "gcj02"
            metric_epsg = 32650
            "#,
        )
        .unwrap();
        assert!(!config.topology.fill_intersects);
        assert!(config.topology.keep_contains);
        assert_eq!(config.topology.self_intersection, SelfIntersectionPolicy::KeepLargest);
        assert_eq!(config.join.predicate, SpatialPredicate::Within);
        assert_eq!(config.neighbors.k, Some(3));
        assert_eq!(config.neighbors.aggregates[0].func, AggregateFunc::Median);
        assert_eq!(config.neighbors.prefix, "nn_");

        let tables = config.reference_tables();
        assert_eq!(tables.metric_epsg_for_city("厦门"), Some(32650));
    }

    #[test]
    fn bad_values_are_config_errors() {
        for doc in [
            "[topology]\nbuffer_epsilon = -1.0",
            "[neighbors]\nradius = -5.0",
            "[join]\npredicate = \"touches\"",
            "[join]\ncollision_suffix = \"\"",
            "not toml at all [",
        ] {
            let err = GeoWrangleConfig::from_toml_str(doc).unwrap_err();
            assert!(matches!(err, GeoWrangleError::Config(_)), "{doc}: {err}");
        }
    }

    // Only this test touches GEOWRANGLE_* variables.
    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let vars = [
            "GEOWRANGLE_BUFFER_EPSILON",
            "GEOWRANGLE_METRIC_EPSG",
            "GEOWRANGLE_EXACT_INVERSE",
        ];

        env::set_var("GEOWRANGLE_BUFFER_EPSILON", "0.5");
        env::set_var("GEOWRANGLE_METRIC_EPSG", "32651");
        env::set_var("GEOWRANGLE_EXACT_INVERSE", "no");
        let config = GeoWrangleConfig::default().with_env();
        assert_eq!(config.topology.buffer_epsilon, 0.5);
        assert_eq!(config.neighbors.metric_epsg, Some(32651));
        assert!(!config.transform.exact_inverse);

        env::set_var("GEOWRANGLE_BUFFER_EPSILON", "-1");
        env::set_var("GEOWRANGLE_METRIC_EPSG", "utm");
        env::set_var("GEOWRANGLE_EXACT_INVERSE", "maybe");
        let config = GeoWrangleConfig::from_toml_str("[topology]\nbuffer_epsilon = 0.25")
            .unwrap()
            .with_env();
        assert_eq!(config.topology.buffer_epsilon, 0.25);
        assert_eq!(config.neighbors.metric_epsg, None);
        assert!(config.transform.exact_inverse);

        for var in vars {
            env::remove_var(var);
        }
        assert_eq!(GeoWrangleConfig::default().with_env(), GeoWrangleConfig::default());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = GeoWrangleConfig::load_from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, GeoWrangleError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn file_contents_are_validated() {
        let path = env::temp_dir().join(format!("geowrangle-config-{}.toml", std::process::id()));
        fs::write(&path, "[neighbors]\nradius = -1.0\n").unwrap();
        let err = GeoWrangleConfig::load_from_file(&path).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(matches!(err, GeoWrangleError::Config(_)));
    }
}
