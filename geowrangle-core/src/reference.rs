//! Read-only city lookup tables.
//!
//! Built once with [`ReferenceTables::builtin`] (optionally overlaid with
//! config overrides) and passed by reference to whatever needs it.

use std::collections::HashMap;

use crate::config::CityOverride;
use crate::functions::metric::utm_epsg_for;
use crate::functions::transform::SpatialReference;
use crate::functions::transform::SpatialReference::{Gcj02, Wgs84};

/// What the tables know about one city.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CityReference {
    /// Datum local map providers publish coordinates in.
    pub datum: SpatialReference,
    /// Metric CRS suitable for distance work around the city.
    pub metric_epsg: u16,
    /// Approximate WGS84 centre, `(lng, lat)`.
    pub center: (f64, f64),
}

// (name, pinyin, lng, lat, datum)
const BUILTIN_CITIES: &[(&str, &str, f64, f64, SpatialReference)] = &[
    ("北京", "beijing", 116.4074, 39.9042, Gcj02),
    ("上海", "shanghai", 121.4737, 31.2304, Gcj02),
    ("广州", "guangzhou", 113.2644, 23.1291, Gcj02),
    ("深圳", "shenzhen", 114.0579, 22.5431, Gcj02),
    ("天津", "tianjin", 117.2010, 39.0842, Gcj02),
    ("重庆", "chongqing", 106.5516, 29.5630, Gcj02),
    ("成都", "chengdu", 104.0665, 30.5723, Gcj02),
    ("杭州", "hangzhou", 120.1551, 30.2741, Gcj02),
    ("南京", "nanjing", 118.7969, 32.0603, Gcj02),
    ("武汉", "wuhan", 114.3054, 30.5931, Gcj02),
    ("西安", "xian", 108.9402, 34.3416, Gcj02),
    ("苏州", "suzhou", 120.5853, 31.2989, Gcj02),
    ("郑州", "zhengzhou", 113.6254, 34.7466, Gcj02),
    ("长沙", "changsha", 112.9388, 28.2282, Gcj02),
    ("沈阳", "shenyang", 123.4315, 41.8057, Gcj02),
    ("青岛", "qingdao", 120.3826, 36.0671, Gcj02),
    ("哈尔滨", "harbin", 126.5349, 45.8038, Gcj02),
    ("昆明", "kunming", 102.8329, 24.8801, Gcj02),
    ("乌鲁木齐", "urumqi", 87.6168, 43.8256, Gcj02),
    ("拉萨", "lhasa", 91.1409, 29.6456, Gcj02),
    ("香港", "hongkong", 114.1694, 22.3193, Wgs84),
    ("澳门", "macau", 113.5439, 22.1987, Wgs84),
    ("台北", "taipei", 121.5654, 25.0330, Wgs84),
];

/// Lookup key for a city name: no trailing "市", no separators, ASCII
/// lower-cased.
pub fn normalize_city(name: &str) -> String {
    let trimmed = name.trim();
    let base = trimmed.strip_suffix('市').unwrap_or(trimmed);
    base.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '\'')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// City → datum / metric CRS lookup.
///
/// # Example
///
/// ```
/// use geowrangle_core::functions::transform::SpatialReference;
/// use geowrangle_core::reference::ReferenceTables;
///
/// let tables = ReferenceTables::builtin();
/// assert_eq!(tables.datum_for_city("北京市"), Some(SpatialReference::Gcj02));
/// assert_eq!(tables.metric_epsg_for_city("Shanghai"), Some(32651));
/// assert_eq!(tables.datum_for_city("Atlantis"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    cities: HashMap<String, CityReference>,
    // normalised alias -> key in `cities`
    aliases: HashMap<String, String>,
}

impl ReferenceTables {
    pub fn builtin() -> Self {
        let mut cities = HashMap::with_capacity(BUILTIN_CITIES.len());
        let mut aliases = HashMap::with_capacity(BUILTIN_CITIES.len());
        for &(name, pinyin, lng, lat, datum) in BUILTIN_CITIES {
            let key = normalize_city(name);
            cities.insert(
                key.clone(),
                CityReference {
                    datum,
                    metric_epsg: utm_epsg_for(lng, lat),
                    center: (lng, lat),
                },
            );
            aliases.insert(normalize_city(pinyin), key);
        }
        Self { cities, aliases }
    }

    fn key(&self, name: &str) -> String {
        let normalized = normalize_city(name);
        match self.aliases.get(&normalized) {
            Some(key) => key.clone(),
            None => normalized,
        }
    }

    /// Builtin tables with config overrides applied on top. An override for
    /// an unknown city needs both fields.
    pub fn with_overrides(mut self, overrides: &HashMap<String, CityOverride>) -> Self {
        for (name, o) in overrides {
            let key = self.key(name);
            match self.cities.get_mut(&key) {
                Some(existing) => {
                    if let Some(datum) = o.datum {
                        existing.datum = datum;
                    }
                    if let Some(epsg) = o.metric_epsg {
                        existing.metric_epsg = epsg;
                    }
                }
                None => match (o.datum, o.metric_epsg) {
                    (Some(datum), Some(metric_epsg)) => {
                        self.cities.insert(
                            key,
                            CityReference {
                                datum,
                                metric_epsg,
                                center: (f64::NAN, f64::NAN),
                            },
                        );
                    }
                    _ => tracing::warn!(city = %name, "override for unknown city needs datum and metric_epsg; ignored"),
                },
            }
        }
        self
    }

    pub fn city(&self, name: &str) -> Option<&CityReference> {
        self.cities.get(&self.key(name))
    }

    pub fn datum_for_city(&self, name: &str) -> Option<SpatialReference> {
        self.city(name).map(|c| c.datum)
    }

    pub fn metric_epsg_for_city(&self, name: &str) -> Option<u16> {
        self.city(name).map(|c| c.metric_epsg)
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_and_case_are_normalised() {
        assert_eq!(normalize_city(" 广州市 "), "广州");
        assert_eq!(normalize_city("Hong Kong"), "hongkong");
        assert_eq!(normalize_city("Xi'an"), "xian");
    }

    #[test]
    fn special_regions_publish_wgs84() {
        let tables = ReferenceTables::builtin();
        assert_eq!(tables.datum_for_city("香港"), Some(SpatialReference::Wgs84));
        assert_eq!(tables.datum_for_city("Macau"), Some(SpatialReference::Wgs84));
    }

    #[test]
    fn western_cities_get_their_own_utm_zone() {
        let tables = ReferenceTables::builtin();
        assert_eq!(tables.metric_epsg_for_city("乌鲁木齐"), Some(32645));
        assert_eq!(tables.metric_epsg_for_city("beijing"), Some(32650));
    }

    #[test]
    fn overrides_patch_and_extend() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "北京".to_string(),
            CityOverride {
                datum: Some(SpatialReference::Wgs84),
                metric_epsg: None,
            },
        );
        overrides.insert(
            "厦门市".to_string(),
            CityOverride {
                datum: Some(SpatialReference::Gcj02),
                metric_epsg: Some(32650),
            },
        );
        overrides.insert(
            "nowhere".to_string(),
            CityOverride {
                datum: Some(SpatialReference::Bd09),
                metric_epsg: None,
            },
        );
        let tables = ReferenceTables::builtin().with_overrides(&overrides);
        assert_eq!(tables.datum_for_city("北京"), Some(SpatialReference::Wgs84));
        assert_eq!(tables.datum_for_city("Beijing"), Some(SpatialReference::Wgs84));
        assert_eq!(tables.metric_epsg_for_city("北京"), Some(32650));
        assert_eq!(tables.metric_epsg_for_city("厦门"), Some(32650));
        assert_eq!(tables.city("nowhere"), None);
    }
}
