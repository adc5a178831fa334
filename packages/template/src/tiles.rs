//! Base map tiles and the registry of known tile providers.

use std::sync::LazyLock;

use cartoforge_database_models::TileLayerRecord;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::serialize::type_tagged;
use crate::style::parse_tag;
use crate::{Validate, ValidationError};

/// Placeholder marking where an access token goes in a URL template.
pub const ACCESS_TOKEN_PLACEHOLDER: &str = "{accessToken}";

const PROVIDERS_TOML: &str = include_str!("providers.toml");

/// A known XYZ tile provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TileProvider {
    /// Name builtin tiles refer to.
    pub name: String,
    pub display_name: String,
    /// URL template with `{z}`, `{x}`, `{y}` placeholders.
    pub url: String,
    pub attribution: String,
    pub max_zoom: u8,
}

impl TileProvider {
    /// Whether tiles cannot be fetched without an access token.
    #[must_use]
    pub fn requires_token(&self) -> bool {
        self.url.contains(ACCESS_TOKEN_PLACEHOLDER)
    }
}

#[derive(Deserialize)]
struct ProviderFile {
    provider: Vec<TileProvider>,
}

static PROVIDERS: LazyLock<Vec<TileProvider>> = LazyLock::new(|| {
    toml::de::from_str::<ProviderFile>(PROVIDERS_TOML)
        .unwrap_or_else(|e| panic!("Failed to parse providers.toml: {e}"))
        .provider
});

/// Every known tile provider.
///
/// # Panics
///
/// Panics if the embedded provider list is malformed.
#[must_use]
pub fn providers() -> &'static [TileProvider] {
    &PROVIDERS
}

/// Looks up a provider by name, ignoring case.
#[must_use]
pub fn provider(name: &str) -> Option<&'static TileProvider> {
    providers()
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Where a tile layer's images come from.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TileKind {
    /// A provider from the registry, referred to by name.
    #[default]
    Builtin,
    /// A custom XYZ URL template.
    Xyz,
}

/// A base or overlay tile layer of a map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(remote = "Self")]
pub struct TileLayer {
    /// Unique name; for builtin tiles, the provider name.
    pub name: String,
    /// Label in the layer control. Filled from the name on validation.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: TileKind,
    #[serde(default)]
    pub transparent: bool,
    #[serde(default = "default_true")]
    pub overlay: bool,
    /// Whether the layer appears in the layer control.
    #[serde(default = "default_true")]
    pub control: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub attribution: Option<String>,
}

type_tagged!(TileLayer, "TileLayer");

const fn default_true() -> bool {
    true
}

/// Resolved source of a tile layer, ready to hand to Leaflet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSource {
    pub url: String,
    pub attribution: String,
    pub access_token: Option<String>,
    pub max_zoom: u8,
}

impl TileLayer {
    /// A tile layer using a registry provider.
    #[must_use]
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            kind: TileKind::Builtin,
            transparent: false,
            overlay: true,
            control: true,
            url: None,
            access_token: None,
            attribution: None,
        }
    }

    /// A tile layer using a custom URL template.
    #[must_use]
    pub fn xyz(
        name: impl Into<String>,
        url: impl Into<String>,
        attribution: impl Into<String>,
    ) -> Self {
        Self {
            kind: TileKind::Xyz,
            url: Some(url.into()),
            attribution: Some(attribution.into()),
            ..Self::builtin(name)
        }
    }

    /// Whether an access token must be supplied, either because the URL
    /// template has a token placeholder or because the provider of the same
    /// name needs one.
    #[must_use]
    pub fn requires_token(&self) -> bool {
        self.url
            .as_deref()
            .is_some_and(|url| url.contains(ACCESS_TOKEN_PLACEHOLDER))
            || provider(&self.name).is_some_and(TileProvider::requires_token)
    }

    /// Resolves where the tiles come from. `None` for a builtin layer naming
    /// an unknown provider or an XYZ layer without a URL.
    #[must_use]
    pub fn source(&self) -> Option<TileSource> {
        match self.kind {
            TileKind::Builtin => provider(&self.name).map(|p| TileSource {
                url: p.url.clone(),
                attribution: p.attribution.clone(),
                access_token: None,
                max_zoom: p.max_zoom,
            }),
            TileKind::Xyz => Some(TileSource {
                url: self.url.clone()?,
                attribution: self.attribution.clone().unwrap_or_default(),
                access_token: self.access_token.clone(),
                max_zoom: crate::MAX_ZOOM,
            }),
        }
    }

    /// Label for the layer control.
    #[must_use]
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| title_case(&self.name))
    }

    /// Hydrates and validates a persisted tile layer.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the kind is unknown or the layer is
    /// invalid.
    pub fn from_persisted(record: &TileLayerRecord) -> Result<Self, ValidationError> {
        let mut tile = Self {
            name: record.name.clone(),
            display_name: record.display_name.clone(),
            kind: parse_tag("type", &record.kind)?,
            transparent: record.transparent,
            overlay: record.overlay,
            control: record.control,
            url: record.url.clone(),
            access_token: record.access_token.clone(),
            attribution: record.attribution.clone(),
        };
        tile.validate()?;
        Ok(tile)
    }

    /// Converts the tile layer to its persisted form.
    #[must_use]
    pub fn to_persisted(&self) -> TileLayerRecord {
        TileLayerRecord {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            kind: self.kind.to_string(),
            transparent: self.transparent,
            overlay: self.overlay,
            control: self.control,
            url: self.url.clone(),
            access_token: self.access_token.clone(),
            attribution: self.attribution.clone(),
        }
    }
}

impl Validate for TileLayer {
    /// Builtin layers drop their URL, attribution and token, so a provider
    /// needing a token can only be used through an XYZ layer. XYZ layers
    /// have all whitespace stripped from their URL and drop a token their
    /// provider does not use.
    fn validate(&mut self) -> Result<(), ValidationError> {
        crate::validate_name("name", &self.name)?;
        if self.display_name.as_deref().is_none_or(str::is_empty) {
            self.display_name = Some(title_case(&self.name));
        }

        if self.kind == TileKind::Builtin {
            self.url = None;
            self.attribution = None;
            self.access_token = None;
            if provider(&self.name).is_some_and(TileProvider::requires_token) {
                return Err(ValidationError::new(
                    "type",
                    format!(
                        "provider {:?} needs an access token; use an xyz tile layer",
                        self.name
                    ),
                ));
            }
            return Ok(());
        }

        let url: String = self
            .url
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if url.is_empty() {
            return Err(ValidationError::new("url", "an XYZ tile layer needs a URL"));
        }
        self.url = Some(url);

        if self.attribution.as_deref().is_none_or(str::is_empty) {
            return Err(ValidationError::new(
                "attribution",
                "an XYZ tile layer needs an attribution",
            ));
        }

        if !self.requires_token() {
            self.access_token = None;
        } else if self.access_token.as_deref().is_none_or(str::is_empty) {
            return Err(ValidationError::new(
                "access_token",
                format!("tile layer {:?} needs an access token", self.name),
            ));
        }
        Ok(())
    }
}

/// Upper-cases the first letter of every word and lower-cases the rest.
fn title_case(name: &str) -> String {
    let mut previous_alphabetic = false;
    name.chars()
        .map(|c| {
            let mapped = if previous_alphabetic {
                c.to_ascii_lowercase()
            } else {
                c.to_ascii_uppercase()
            };
            previous_alphabetic = c.is_alphabetic();
            mapped
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_parses_and_flags_token_providers() {
        assert!(providers().len() >= 5);
        assert!(!provider("openstreetmap").unwrap().requires_token());
        assert!(provider("OpenStreetMap").is_some());
        assert!(provider("mapbox").unwrap().requires_token());
        assert!(provider("nowhere").is_none());
    }

    #[test]
    fn provider_names_are_unique() {
        let mut names: Vec<&str> = providers().iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), providers().len());
    }

    #[test]
    fn builtin_clears_url_fields() {
        let mut tile = TileLayer {
            url: Some("http://x".to_string()),
            attribution: Some("someone".to_string()),
            access_token: Some("secret".to_string()),
            ..TileLayer::builtin("openstreetmap")
        };
        tile.validate().unwrap();
        assert_eq!(tile.url, None);
        assert_eq!(tile.attribution, None);
        assert_eq!(tile.access_token, None);
        assert_eq!(tile.display_name.as_deref(), Some("Openstreetmap"));
    }

    #[test]
    fn xyz_requires_url() {
        let mut tile = TileLayer {
            url: None,
            ..TileLayer::xyz("custom", "", "me")
        };
        assert_eq!(tile.validate().unwrap_err().field, "url");
    }

    #[test]
    fn xyz_requires_attribution() {
        let mut tile = TileLayer::xyz("custom", "https://t/{z}/{x}/{y}.png", "");
        assert_eq!(tile.validate().unwrap_err().field, "attribution");
    }

    #[test]
    fn xyz_url_loses_whitespace() {
        let mut tile = TileLayer::xyz("custom", " https://t/{z}/\n{x}/{y}.png\t", "me");
        tile.validate().unwrap();
        assert_eq!(tile.url.as_deref(), Some("https://t/{z}/{x}/{y}.png"));
    }

    #[test]
    fn token_is_required_only_when_used() {
        let url = "https://t/{z}/{x}/{y}.png?key={accessToken}";
        let mut tile = TileLayer::xyz("custom", url, "me");
        assert_eq!(tile.validate().unwrap_err().field, "access_token");

        tile.access_token = Some("secret".to_string());
        tile.validate().unwrap();
        assert_eq!(tile.access_token.as_deref(), Some("secret"));

        let mut plain = TileLayer {
            access_token: Some("unused".to_string()),
            ..TileLayer::xyz("plain", "https://t/{z}/{x}/{y}.png", "me")
        };
        plain.validate().unwrap();
        assert_eq!(plain.access_token, None);
    }

    #[test]
    fn token_providers_cannot_be_builtin() {
        let mut tile = TileLayer {
            access_token: Some("secret".to_string()),
            ..TileLayer::builtin("mapbox")
        };
        assert_eq!(tile.validate().unwrap_err().field, "type");

        let url = provider("mapbox").unwrap().url.clone();
        let mut tile = TileLayer {
            access_token: Some("secret".to_string()),
            ..TileLayer::xyz("mapbox", url, "Mapbox")
        };
        tile.validate().unwrap();
        let source = tile.source().unwrap();
        assert_eq!(source.access_token.as_deref(), Some("secret"));
    }

    #[test]
    fn sources_resolve_through_the_registry() {
        let source = TileLayer::builtin("plan_ign").source().unwrap();
        assert!(source.url.starts_with("https://data.geopf.fr/"));
        assert!(TileLayer::builtin("unknown").source().is_none());
    }

    #[test]
    fn title_case_splits_on_non_letters() {
        assert_eq!(title_case("plan_ign"), "Plan_Ign");
        assert_eq!(title_case("carto DB"), "Carto Db");
    }

    #[test]
    fn persisted_kind_round_trips() {
        let mut tile = TileLayer::xyz("custom", "https://t/{z}/{x}/{y}.png", "me");
        tile.validate().unwrap();
        let record = tile.to_persisted();
        assert_eq!(record.kind, "xyz");
        assert_eq!(TileLayer::from_persisted(&record).unwrap(), tile);
    }

    #[test]
    fn json_uses_type_key_for_kind() {
        let tile = TileLayer::builtin("openstreetmap");
        let json = serde_json::to_value(&tile).unwrap();
        assert_eq!(json["__type__"], "TileLayer");
        assert_eq!(json["type"], "builtin");
        assert_eq!(serde_json::from_value::<TileLayer>(json).unwrap(), tile);
    }
}
