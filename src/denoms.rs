use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::BigDecimal;
use diesel::PgConnection;
use tracing::info;

use crate::db::{self, models::{Denom, DenomUnit, DenomUnitAlias}};
use crate::error::DenomError;

pub mod asset_list;

pub use asset_list::{Asset, AssetDenomUnit};

const POOL_SHARE_PREFIX: &str = "gamm/pool/";
const POOL_SHARE_EXPONENT: i64 = 18;

/// Denom rows mirrored from the store, indexed for conversion.
#[derive(Debug, Default)]
struct StoreDenoms {
    by_base: HashMap<String, Denom>,
    units_by_denom: HashMap<i32, Vec<DenomUnit>>,
    // unit name or alias -> unit
    unit_index: HashMap<String, DenomUnit>,
}

/// Resolves base denominations to display units. Read-mostly; refreshes swap
/// whole maps under the write lock.
#[derive(Debug, Default)]
pub struct DenomRegistry {
    assets: RwLock<Arc<HashMap<String, Asset>>>,
    store: RwLock<Arc<StoreDenoms>>,
}

impl DenomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reload the asset list cache from a chain-registry checkout.
    pub fn refresh_catalog(
        &self,
        location: &Path,
        blacklist: &[String],
    ) -> Result<Arc<HashMap<String, Asset>>> {
        let assets = Arc::new(asset_list::read_catalog(location, blacklist)?);
        info!(
            "Loaded {} assets from {}",
            assets.len(),
            location.display()
        );
        self.replace_assets(assets.clone());
        Ok(assets)
    }

    pub fn replace_assets(&self, assets: Arc<HashMap<String, Asset>>) {
        match self.assets.write() {
            Ok(mut guard) => *guard = assets,
            Err(poisoned) => *poisoned.into_inner() = assets,
        }
    }

    fn assets_snapshot(&self) -> Arc<HashMap<String, Asset>> {
        match self.assets.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_snapshot(&self) -> Arc<StoreDenoms> {
        match self.store.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Rebuild the store mirror from committed denom, unit and alias rows.
    pub fn load_store(&self, conn: &mut PgConnection) -> Result<()> {
        let (denoms, units, aliases) = db::load_denoms(conn)?;
        self.replace_store(denoms, units, aliases);
        Ok(())
    }

    fn replace_store(&self, denoms: Vec<Denom>, units: Vec<DenomUnit>, aliases: Vec<DenomUnitAlias>) {
        let mut mirror = StoreDenoms::default();
        let units_by_id: HashMap<i32, DenomUnit> = units.iter().map(|u| (u.id, u.clone())).collect();
        for unit in units {
            mirror.unit_index.insert(unit.name.clone(), unit.clone());
            mirror.units_by_denom.entry(unit.denom_id).or_default().push(unit);
        }
        for alias in aliases {
            if let Some(unit) = units_by_id.get(&alias.denom_unit_id) {
                mirror.unit_index.entry(alias.alias).or_insert_with(|| unit.clone());
            }
        }
        for denom in denoms {
            mirror.by_base.insert(denom.base.clone(), denom);
        }

        let mirror = Arc::new(mirror);
        match self.store.write() {
            Ok(mut guard) => *guard = mirror,
            Err(poisoned) => *poisoned.into_inner() = mirror,
        }
    }

    /// Return the denom row for `base`, inserting a base-only placeholder when unknown.
    /// Only committed rows are mirrored; placeholders created inside an open
    /// transaction are not cached because the transaction may roll back.
    pub fn ensure_denom(&self, conn: &mut PgConnection, base: &str) -> Result<Denom> {
        if let Some(denom) = self.store_snapshot().by_base.get(base) {
            return Ok(denom.clone());
        }
        db::get_or_create_denom(conn, base)
    }

    /// Write the cached asset list into the store, then refresh the mirror.
    pub fn sync_store(&self, conn: &mut PgConnection) -> Result<usize> {
        let assets = self.assets_snapshot();
        let mut sorted: Vec<&Asset> = assets.values().collect();
        sorted.sort_by(|a, b| a.base.cmp(&b.base));
        let written = db::upsert_denoms(conn, &sorted)?;
        self.load_store(conn)?;
        Ok(written)
    }

    /// Scale `amount` of `denom` to its display unit, returning the value and symbol.
    pub fn convert(&self, amount: &BigDecimal, denom: &str) -> Result<(BigDecimal, String), DenomError> {
        if denom.starts_with(POOL_SHARE_PREFIX) {
            return Ok((shift(amount, POOL_SHARE_EXPONENT), denom.to_string()));
        }

        let lookup = if denom.starts_with("transfer/") {
            denom.rsplit('/').next().unwrap_or(denom)
        } else {
            denom
        };

        let assets = self.assets_snapshot();
        if let Some(asset) = assets.get(lookup) {
            let highest = asset.highest_denom_unit();
            let base_exponent = asset.lowest_denom_unit().map_or(0, |u| u.exponent);
            let highest_exponent = highest.map_or(0, |u| u.exponent);
            let highest_name = highest.map_or(lookup, |u| u.denom.as_str());
            let symbol = display_symbol(&asset.symbol, highest_name);
            let value = shift(amount, i64::from(highest_exponent) - i64::from(base_exponent));
            return Ok((value, symbol));
        }

        let store = self.store_snapshot();
        let resolved = match store.by_base.get(lookup) {
            Some(denom_row) => {
                let units = store.units_by_denom.get(&denom_row.id);
                let base_unit = units.and_then(|us| {
                    us.iter()
                        .find(|u| u.name == denom_row.base)
                        .or_else(|| us.iter().min_by_key(|u| u.exponent))
                });
                base_unit.map(|u| (denom_row, u))
            }
            None => store.unit_index.get(lookup).and_then(|unit| {
                store
                    .by_base
                    .values()
                    .find(|d| d.id == unit.denom_id)
                    .map(|d| (d, unit))
            }),
        };

        let (denom_row, unit) = resolved.ok_or_else(|| DenomError::NotFound(denom.to_string()))?;
        let highest = store
            .units_by_denom
            .get(&denom_row.id)
            .and_then(|us| us.iter().max_by_key(|u| u.exponent))
            .ok_or_else(|| DenomError::NotFound(denom.to_string()))?;

        let symbol = display_symbol(denom_row.symbol.as_deref().unwrap_or(""), &highest.name);
        let value = shift(amount, i64::from(highest.exponent) - i64::from(unit.exponent));
        Ok((value, symbol))
    }

    /// Like `convert`, but unknown denoms come back untouched with the base as symbol.
    pub fn convert_or_raw(&self, amount: &BigDecimal, denom: &str) -> (BigDecimal, String) {
        self.convert(amount, denom)
            .unwrap_or_else(|_| (amount.clone(), denom.to_string()))
    }
}

fn display_symbol(symbol: &str, highest_unit: &str) -> String {
    if symbol.is_empty() || symbol == "UNKNOWN" {
        highest_unit.to_string()
    } else {
        symbol.to_string()
    }
}

/// amount / 10^exponent, exact.
fn shift(amount: &BigDecimal, exponent: i64) -> BigDecimal {
    (amount * BigDecimal::new(BigInt::from(1), exponent)).normalized()
}
