use serde::{Deserialize, Serialize};

pub use crate::background::processors::pyramid::{MultiResConfig, PannellumConfig};

/// Player configuration for a spin-360 image sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spin360Config {
    #[serde(rename = "page", default)]
    pub pages: Vec<SpinPage>,
    #[serde(rename = "hotspot", default)]
    pub hotspots: Vec<PageHotspot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinPage {
    #[serde(rename = "img")]
    pub image_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HotspotType {
    Embed,
    Link,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageHotspot {
    #[serde(rename = "type")]
    pub kind: HotspotType,
    /// Target of `embed` and `link` hotspots
    #[serde(default)]
    pub url: String,
    /// Caption of `text` hotspots
    #[serde(default)]
    pub text: String,
    #[serde(rename = "coordinate", default)]
    pub coordinates: Vec<HotspotCoordinate>,
}

/// Position of a hotspot on one page. `x`/`y` are kept as the client sent them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotspotCoordinate {
    #[serde(rename = "index")]
    pub page_index: u32,
    pub x: String,
    pub y: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_player_config_wire_format() {
        let raw = json!({
            "page": [{ "img": "https://cdn.test/spin/snapshot-1.png" }],
            "hotspot": [{
                "type": "link",
                "url": "https://example.com",
                "text": "",
                "coordinate": [{ "index": 0, "x": "12.5%", "y": "40%" }]
            }]
        });
        let config: Spin360Config = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(config.hotspots[0].kind, HotspotType::Link);
        assert_eq!(config.hotspots[0].coordinates[0].x, "12.5%");
        assert_eq!(serde_json::to_value(&config).unwrap(), raw);
    }

    #[test]
    fn test_unknown_hotspot_type_rejected() {
        let raw = json!({ "page": [], "hotspot": [{ "type": "video", "coordinate": [] }] });
        assert!(serde_json::from_value::<Spin360Config>(raw).is_err());
    }
}
