use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// `<chain>/assetlist.json` in a chain-registry checkout.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetList {
    pub chain_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Asset {
    #[serde(default)]
    pub description: String,
    pub base: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub denom_units: Vec<AssetDenomUnit>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chain_name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AssetDenomUnit {
    pub denom: String,
    #[serde(default)]
    pub exponent: u32,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Asset {
    /// Unit with the smallest exponent; later entries win ties.
    pub fn lowest_denom_unit(&self) -> Option<&AssetDenomUnit> {
        let mut lowest: Option<&AssetDenomUnit> = None;
        for unit in &self.denom_units {
            if lowest.map_or(true, |l| unit.exponent <= l.exponent) {
                lowest = Some(unit);
            }
        }
        lowest
    }

    /// Unit with the largest exponent; later entries win ties.
    pub fn highest_denom_unit(&self) -> Option<&AssetDenomUnit> {
        let mut highest: Option<&AssetDenomUnit> = None;
        for unit in &self.denom_units {
            if highest.map_or(true, |h| unit.exponent >= h.exponent) {
                highest = Some(unit);
            }
        }
        highest
    }
}

/// Read every chain's asset list under `location` into a base -> asset map.
pub fn read_catalog(location: &Path, blacklist: &[String]) -> Result<HashMap<String, Asset>> {
    let entries = fs::read_dir(location)
        .with_context(|| format!("Failed to read asset list directory {}", location.display()))?;

    let mut chain_dirs = Vec::new();
    for entry in entries {
        let entry = entry.context("Failed to read asset list directory entry")?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        if blacklist.iter().any(|b| b == &name) {
            debug!("Skipping blacklisted chain {}", name);
            continue;
        }
        chain_dirs.push((name, entry.path()));
    }
    chain_dirs.sort();

    let mut assets: HashMap<String, Asset> = HashMap::new();
    for (chain, dir) in chain_dirs {
        let file = dir.join("assetlist.json");
        if !file.is_file() {
            warn!("No assetlist.json for chain {}, skipping", chain);
            continue;
        }
        let raw = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let list: AssetList = match serde_json::from_str(&raw) {
            Ok(list) => list,
            Err(e) => {
                warn!("Malformed asset list for chain {}: {}", chain, e);
                continue;
            }
        };

        for mut asset in list.assets {
            asset.chain_name = list.chain_name.clone();
            if let Some(previous) = assets.get(&asset.base) {
                warn!(
                    "Duplicate asset {} found in {} and {}, keeping {}",
                    asset.base, previous.chain_name, asset.chain_name, asset.chain_name
                );
            }
            assets.insert(asset.base.clone(), asset);
        }
    }

    Ok(assets)
}
