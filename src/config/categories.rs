//! Category predicate table
//!
//! Each facility category is bound to an Overpass QL template with `{radius}`,
//! `{lat}` and `{lon}` placeholders, a base radius and an escalated radius.
//! Templates are configuration data; the built-in ones are tuned for
//! Indonesian place names and short (15 s) server-side timeouts.

use crate::cache::key::predicate_fingerprint;
use crate::config::ConfigError;
use crate::fetcher::FacilityQuery;
use crate::FacilityCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default search radius in meters
pub const DEFAULT_RADIUS_M: u32 = 100;

/// Default escalated search radius in meters
pub const DEFAULT_ESCALATED_RADIUS_M: u32 = 200;

/// Placeholders every predicate template must contain
pub const REQUIRED_PLACEHOLDERS: [&str; 3] = ["{radius}", "{lat}", "{lon}"];

const RESIDENTIAL: &str = r#"[out:json][timeout:15]; (way["landuse"="residential"](around:{radius},{lat},{lon}); way["building"~"residential|apartments|house|dormitory"](around:{radius},{lat},{lon}); node["building"~"residential|apartments|house|dormitory"](around:{radius},{lat},{lon}); node["name"~"perumahan|apartemen|rumah susun|asrama|cluster|villa"](around:{radius},{lat},{lon}); way["name"~"perumahan|apartemen|rumah susun|asrama|cluster|villa"](around:{radius},{lat},{lon}); ); out center;"#;

const EDUCATION: &str = r#"[out:json][timeout:15]; (node["amenity"~"school|university|college|kindergarten"](around:{radius},{lat},{lon}); way["amenity"~"school|university|college|kindergarten"](around:{radius},{lat},{lon}); node["building"~"school|university|college"](around:{radius},{lat},{lon}); way["building"~"school|university|college"](around:{radius},{lat},{lon}); node["name"~"SD|SMP|SMA|Universitas|TK|PAUD|Pesantren|Lembaga kursus|Sekolah"](around:{radius},{lat},{lon}); way["name"~"SD|SMP|SMA|Universitas|TK|PAUD|Pesantren|Lembaga kursus|Sekolah"](around:{radius},{lat},{lon}); ); out center;"#;

const PUBLIC_AREA: &str = r#"[out:json][timeout:15]; (node["amenity"~"park|community_centre|marketplace|place_of_worship|bus_station|terminal"](around:{radius},{lat},{lon}); way["amenity"~"park|community_centre|marketplace|place_of_worship|bus_station|terminal"](around:{radius},{lat},{lon}); node["leisure"="park"](around:{radius},{lat},{lon}); way["leisure"="park"](around:{radius},{lat},{lon}); node["public_transport"](around:{radius},{lat},{lon}); node["tourism"="museum"](around:{radius},{lat},{lon}); way["tourism"="museum"](around:{radius},{lat},{lon}); node["name"~"taman kota|alun-alun|stasiun|terminal|tempat ibadah|museum|masjid|gereja"](around:{radius},{lat},{lon}); way["name"~"taman kota|alun-alun|stasiun|terminal|tempat ibadah|museum|masjid|gereja"](around:{radius},{lat},{lon}); ); out center;"#;

const CULINARY: &str = r#"[out:json][timeout:15]; (node["amenity"~"restaurant|cafe|food_court|fast_food"](around:{radius},{lat},{lon}); way["amenity"~"restaurant|cafe|food_court|fast_food"](around:{radius},{lat},{lon}); node["shop"~"bakery|coffee|tea"](around:{radius},{lat},{lon}); way["shop"~"bakery|coffee|tea"](around:{radius},{lat},{lon}); node["cuisine"](around:{radius},{lat},{lon}); way["cuisine"](around:{radius},{lat},{lon}); node["name"~"restoran|warung makan|kedai kopi|food court|cafe|rumah makan|warteg|kantin|warmindo|warung|kedai|mie ayam|bakso|nasi|soto|kopi|padang|martabak|bakery|roti"](around:{radius},{lat},{lon}); way["name"~"restoran|warung makan|kedai kopi|food court|cafe|rumah makan|warteg|kantin|warmindo|warung|kedai|mie ayam|bakso|nasi|soto|kopi|padang|martabak|bakery|roti"](around:{radius},{lat},{lon}); ); out center;"#;

const BUSINESS_CENTER: &str = r#"[out:json][timeout:15]; (node["shop"](around:{radius},{lat},{lon}); way["shop"](around:{radius},{lat},{lon}); node["building"~"commercial|office|retail|supermarket"](around:{radius},{lat},{lon}); way["building"~"commercial|office|retail|supermarket"](around:{radius},{lat},{lon}); node["amenity"="marketplace"](around:{radius},{lat},{lon}); way["amenity"="marketplace"](around:{radius},{lat},{lon}); node["office"](around:{radius},{lat},{lon}); way["office"](around:{radius},{lat},{lon}); node["name"~"gedung perkantoran|ruko|coworking space|perkantoran|mall|plaza|pusat perbelanjaan|shopping center|department store|hypermarket|pertokoan|pasar|market"](around:{radius},{lat},{lon}); way["name"~"gedung perkantoran|ruko|coworking space|perkantoran|mall|plaza|pusat perbelanjaan|shopping center|department store|hypermarket|pertokoan|pasar|market"](around:{radius},{lat},{lon}); ); out center;"#;

const GROCERIES: &str = r#"[out:json][timeout:15]; (node["shop"~"supermarket|grocery|greengrocer|butcher|seafood|deli|spices"](around:{radius},{lat},{lon}); way["shop"~"supermarket|grocery|greengrocer|butcher|seafood|deli|spices"](around:{radius},{lat},{lon}); node["name"~"toko kelontong|toko sembako|toko sayur|fresh market|pasar tradisional|supermarket|grocery|swalayan"](around:{radius},{lat},{lon}); way["name"~"toko kelontong|toko sembako|toko sayur|fresh market|pasar tradisional|supermarket|grocery|swalayan"](around:{radius},{lat},{lon}); ); out center;"#;

const CONVENIENCE_STORE: &str = r#"[out:json][timeout:15]; (node["shop"~"convenience"](around:{radius},{lat},{lon}); way["shop"~"convenience"](around:{radius},{lat},{lon}); node["name"~"indomaret|alfamart|alfamidi|circle k|family mart|lawson|7-eleven|minimart|mini mart|mini market|convenience store"](around:{radius},{lat},{lon}); way["name"~"indomaret|alfamart|alfamidi|circle k|family mart|lawson|7-eleven|minimart|mini mart|mini market|convenience store"](around:{radius},{lat},{lon}); ); out center;"#;

const INDUSTRIAL: &str = r#"[out:json][timeout:15]; (node["landuse"~"industrial"](around:{radius},{lat},{lon}); way["landuse"~"industrial"](around:{radius},{lat},{lon}); node["building"~"industrial|factory|warehouse"](around:{radius},{lat},{lon}); way["building"~"industrial|factory|warehouse"](around:{radius},{lat},{lon}); node["industrial"](around:{radius},{lat},{lon}); way["industrial"](around:{radius},{lat},{lon}); node["name"~"pabrik|factory|industri|pergudangan|gudang|warehouse|manufacturing|kawasan industri|workshop|bengkel"](around:{radius},{lat},{lon}); way["name"~"pabrik|factory|industri|pergudangan|gudang|warehouse|manufacturing|kawasan industri|workshop|bengkel"](around:{radius},{lat},{lon}); ); out center;"#;

const HOSPITAL_CLINIC: &str = r#"[out:json][timeout:15]; (node["amenity"~"hospital|clinic|doctors|healthcare|pharmacy"](around:{radius},{lat},{lon}); way["amenity"~"hospital|clinic|doctors|healthcare|pharmacy"](around:{radius},{lat},{lon}); node["healthcare"](around:{radius},{lat},{lon}); way["healthcare"](around:{radius},{lat},{lon}); node["building"="hospital"](around:{radius},{lat},{lon}); way["building"="hospital"](around:{radius},{lat},{lon}); node["name"~"rumah sakit|hospital|klinik|clinic|puskesmas|bidan|dokter|apotek|apotik|pharmacy"](around:{radius},{lat},{lon}); way["name"~"rumah sakit|hospital|klinik|clinic|puskesmas|bidan|dokter|apotek|apotik|pharmacy"](around:{radius},{lat},{lon}); ); out center;"#;

/// Built-in Overpass QL template for a category
pub fn default_predicate(category: FacilityCategory) -> &'static str {
    match category {
        FacilityCategory::Residential => RESIDENTIAL,
        FacilityCategory::Education => EDUCATION,
        FacilityCategory::PublicArea => PUBLIC_AREA,
        FacilityCategory::Culinary => CULINARY,
        FacilityCategory::BusinessCenter => BUSINESS_CENTER,
        FacilityCategory::Groceries => GROCERIES,
        FacilityCategory::ConvenienceStore => CONVENIENCE_STORE,
        FacilityCategory::Industrial => INDUSTRIAL,
        FacilityCategory::HospitalClinic => HOSPITAL_CLINIC,
    }
}

/// Substitute coordinates and radius into a predicate template
pub fn render_predicate(template: &str, latitude: f64, longitude: f64, radius_m: u32) -> String {
    template
        .replace("{radius}", &radius_m.to_string())
        .replace("{lat}", &format!("{latitude:.6}"))
        .replace("{lon}", &format!("{longitude:.6}"))
}

/// Configured query parameters for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CategorySettings {
    /// Overpass QL template; empty means the built-in template
    pub predicate: String,
    /// Base search radius in meters
    pub radius_m: u32,
    /// Radius used when escalation triggers
    pub escalated_radius_m: u32,
    /// Explicit predicate version; derived from the template when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate_version: Option<String>,
}

impl Default for CategorySettings {
    fn default() -> Self {
        Self {
            predicate: String::new(),
            radius_m: DEFAULT_RADIUS_M,
            escalated_radius_m: DEFAULT_ESCALATED_RADIUS_M,
            predicate_version: None,
        }
    }
}

impl CategorySettings {
    /// Settings with the built-in template for `category`
    pub fn for_category(category: FacilityCategory) -> Self {
        Self {
            predicate: default_predicate(category).to_string(),
            ..Self::default()
        }
    }

    /// Version string used in cache keys
    pub fn resolved_version(&self) -> String {
        self.predicate_version
            .clone()
            .unwrap_or_else(|| predicate_fingerprint(&self.predicate))
    }

    fn validate(&self, category: FacilityCategory) -> Result<(), ConfigError> {
        let field = format!("categories.{category}");
        let missing: Vec<&str> = REQUIRED_PLACEHOLDERS
            .iter()
            .copied()
            .filter(|placeholder| !self.predicate.contains(placeholder))
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::invalid(
                format!("{field}.predicate"),
                format!("missing placeholder(s) {}", missing.join(", ")),
            ));
        }
        if self.radius_m == 0 {
            return Err(ConfigError::invalid(
                format!("{field}.radius_m"),
                "must be greater than 0",
            ));
        }
        if self.escalated_radius_m <= self.radius_m {
            return Err(ConfigError::invalid(
                format!("{field}.escalated_radius_m"),
                format!(
                    "{} must be greater than radius_m ({})",
                    self.escalated_radius_m, self.radius_m
                ),
            ));
        }
        if matches!(&self.predicate_version, Some(v) if v.trim().is_empty()) {
            return Err(ConfigError::invalid(
                format!("{field}.predicate_version"),
                "must not be empty when set",
            ));
        }
        Ok(())
    }
}

/// Fill missing categories and empty templates with built-in defaults
pub(crate) fn fill_defaults(specs: &mut BTreeMap<FacilityCategory, CategorySettings>) {
    for category in FacilityCategory::ALL {
        let spec = specs
            .entry(category)
            .or_insert_with(|| CategorySettings::for_category(category));
        if spec.predicate.trim().is_empty() {
            spec.predicate = default_predicate(category).to_string();
        }
    }
}

/// Validate every category entry
pub(crate) fn validate_specs(
    specs: &BTreeMap<FacilityCategory, CategorySettings>,
) -> Result<(), ConfigError> {
    for category in FacilityCategory::ALL {
        match specs.get(&category) {
            Some(spec) => spec.validate(category)?,
            None => {
                return Err(ConfigError::invalid(
                    format!("categories.{category}"),
                    "category is not configured",
                ))
            }
        }
    }
    Ok(())
}

/// Category settings with the predicate version resolved
#[derive(Debug, Clone)]
pub struct ResolvedCategory {
    category: FacilityCategory,
    spec: CategorySettings,
    version: String,
}

impl ResolvedCategory {
    /// Category tag
    pub fn category(&self) -> FacilityCategory {
        self.category
    }

    /// Base search radius in meters
    pub fn radius_m(&self) -> u32 {
        self.spec.radius_m
    }

    /// Escalated search radius in meters
    pub fn escalated_radius_m(&self) -> u32 {
        self.spec.escalated_radius_m
    }

    /// Overpass QL template
    pub fn predicate(&self) -> &str {
        &self.spec.predicate
    }

    /// Predicate version used in cache keys
    pub fn predicate_version(&self) -> &str {
        &self.version
    }

    /// Build the query for a location and radius
    pub fn query(&self, latitude: f64, longitude: f64, radius_m: u32) -> FacilityQuery {
        FacilityQuery::new(
            self.category,
            latitude,
            longitude,
            radius_m,
            &self.spec.predicate,
            self.version.clone(),
        )
    }
}

/// Validated category table with one entry per [`FacilityCategory`]
#[derive(Debug, Clone)]
pub struct CategoryTable {
    entries: BTreeMap<FacilityCategory, ResolvedCategory>,
}

impl CategoryTable {
    /// Build from configured specs, filling gaps with built-in defaults
    pub fn from_specs(
        specs: &BTreeMap<FacilityCategory, CategorySettings>,
    ) -> Result<Self, ConfigError> {
        let mut specs = specs.clone();
        fill_defaults(&mut specs);
        validate_specs(&specs)?;

        let entries = specs
            .into_iter()
            .map(|(category, spec)| {
                let version = spec.resolved_version();
                (
                    category,
                    ResolvedCategory {
                        category,
                        spec,
                        version,
                    },
                )
            })
            .collect();
        Ok(Self { entries })
    }

    /// Table with all built-in templates and default radii
    pub fn defaults() -> Self {
        let entries = FacilityCategory::ALL
            .into_iter()
            .map(|category| {
                let spec = CategorySettings::for_category(category);
                let version = spec.resolved_version();
                (
                    category,
                    ResolvedCategory {
                        category,
                        spec,
                        version,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Entry for a category
    pub fn get(&self, category: FacilityCategory) -> Option<&ResolvedCategory> {
        self.entries.get(&category)
    }

    /// Entries in reporting order
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedCategory> {
        self.entries.values()
    }

    /// Predicate versions currently in use
    pub fn active_versions(&self) -> Vec<String> {
        self.entries.values().map(|e| e.version.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_predicates_have_placeholders() {
        for category in FacilityCategory::ALL {
            let template = default_predicate(category);
            for placeholder in REQUIRED_PLACEHOLDERS {
                assert!(
                    template.contains(placeholder),
                    "{category} template lacks {placeholder}"
                );
            }
        }
    }

    #[test]
    fn test_render_predicate() {
        let rendered = render_predicate(
            "node(around:{radius},{lat},{lon});",
            -6.2,
            106.816666,
            150,
        );
        assert_eq!(rendered, "node(around:150,-6.200000,106.816666);");
    }

    #[test]
    fn test_fill_defaults_completes_table() {
        let mut specs = BTreeMap::new();
        specs.insert(
            FacilityCategory::Culinary,
            CategorySettings {
                radius_m: 150,
                escalated_radius_m: 300,
                ..CategorySettings::default()
            },
        );
        fill_defaults(&mut specs);

        assert_eq!(specs.len(), 9);
        let culinary = &specs[&FacilityCategory::Culinary];
        assert_eq!(culinary.radius_m, 150);
        assert_eq!(culinary.predicate, CULINARY);
    }

    #[test]
    fn test_validation_rejects_missing_placeholder() {
        let mut specs = BTreeMap::new();
        specs.insert(
            FacilityCategory::Education,
            CategorySettings {
                predicate: "node(around:{radius},{lat});".to_string(),
                ..CategorySettings::default()
            },
        );
        let err = CategoryTable::from_specs(&specs).unwrap_err();
        assert!(err.to_string().contains("{lon}"));
    }

    #[test]
    fn test_validation_rejects_non_increasing_escalation() {
        let mut specs = BTreeMap::new();
        specs.insert(
            FacilityCategory::Education,
            CategorySettings {
                radius_m: 200,
                escalated_radius_m: 200,
                ..CategorySettings::default()
            },
        );
        assert!(CategoryTable::from_specs(&specs).is_err());
    }

    #[test]
    fn test_version_tracks_template() {
        let table = CategoryTable::defaults();
        let culinary = table.get(FacilityCategory::Culinary).unwrap();
        assert_eq!(culinary.predicate_version(), predicate_fingerprint(CULINARY));

        let mut specs = BTreeMap::new();
        specs.insert(
            FacilityCategory::Culinary,
            CategorySettings {
                predicate_version: Some("v2".to_string()),
                ..CategorySettings::for_category(FacilityCategory::Culinary)
            },
        );
        let table = CategoryTable::from_specs(&specs).unwrap();
        assert_eq!(
            table.get(FacilityCategory::Culinary).unwrap().predicate_version(),
            "v2"
        );
    }
}
