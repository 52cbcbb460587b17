use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_icon() -> String {
    "bi-app".to_string()
}

// One installable app template in apps.json
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppCatalogEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category_zh: String,
    #[serde(default)]
    pub category_en: String,
    #[serde(default)]
    pub default_ports: BTreeMap<String, u16>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
}

// Fields omitted from an update request keep their stored values
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppPatch {
    pub name: String,
    pub image: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub category_zh: Option<String>,
    pub category_en: Option<String>,
    pub default_ports: Option<BTreeMap<String, u16>>,
    pub env: Option<Vec<String>>,
    pub volumes: Option<Vec<String>>,
}

impl AppPatch {
    pub fn apply_to(self, entry: &mut AppCatalogEntry) {
        if let Some(image) = self.image {
            entry.image = image;
        }
        if let Some(icon) = self.icon {
            entry.icon = icon;
        }
        if let Some(description) = self.description {
            entry.description = description;
        }
        if let Some(category_zh) = self.category_zh {
            entry.category_zh = category_zh;
        }
        if let Some(category_en) = self.category_en {
            entry.category_en = category_en;
        }
        if let Some(default_ports) = self.default_ports {
            entry.default_ports = default_ports;
        }
        if let Some(env) = self.env {
            entry.env = env;
        }
        if let Some(volumes) = self.volumes {
            entry.volumes = volumes;
        }
    }
}

// Catalog entry as shown in the app store, with the derived install flag
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CatalogView {
    #[serde(flatten)]
    pub entry: AppCatalogEntry,
    pub installed: bool,
}
