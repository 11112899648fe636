//! Historical-backfill target resolution.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use csv::Reader;

use crate::models::{HistoricalTarget, RankedAsset, Symbol, Venue};
use crate::symbol_registry::is_excluded_asset;

/// Read the ranked-asset list: CSV with a header row and at least
/// `(rank, name, symbol)` columns, RFC 4180 quoting.
pub fn read_ranked_assets<P: AsRef<Path>>(path: P) -> Result<Vec<RankedAsset>> {
    let file = File::open(&path).with_context(|| format!("failed to open {}", path.as_ref().display()))?;
    let mut reader = Reader::from_reader(file);
    let mut assets = Vec::new();
    for record in reader.deserialize() {
        let asset: RankedAsset = record.context("failed to parse ranked-asset row")?;
        assets.push(asset);
    }
    Ok(assets)
}

fn usdm_contract_eligible(symbol: &Symbol) -> bool {
    matches!(symbol.contract_type.as_deref(), Some("PERPETUAL") | None)
}

/// For each ranked asset (uppercased, excluding BTC/stablecoins), pair with
/// any matching SPOT-USDT and/or USDT-M PERPETUAL/unspecified listing. An
/// asset may produce 0, 1, or 2 targets.
pub fn resolve_targets(
    ranked: &[RankedAsset],
    active_spot_symbols: &[Symbol],
    active_usdm_symbols: &[Symbol],
    excluded: &HashSet<&'static str>,
) -> Vec<HistoricalTarget> {
    let mut targets = Vec::new();
    for entry in ranked {
        let asset = entry.symbol.to_ascii_uppercase();
        if is_excluded_asset(&asset, excluded) {
            continue;
        }

        for symbol in active_spot_symbols {
            if symbol.base_asset.eq_ignore_ascii_case(&asset) && symbol.quote_asset.eq_ignore_ascii_case("USDT") {
                targets.push(HistoricalTarget {
                    asset: asset.clone(),
                    venue_symbol: symbol.symbol.clone(),
                    venue: Venue::Spot,
                });
            }
        }

        for symbol in active_usdm_symbols {
            if symbol.base_asset.eq_ignore_ascii_case(&asset) && usdm_contract_eligible(symbol) {
                targets.push(HistoricalTarget {
                    asset: asset.clone(),
                    venue_symbol: symbol.symbol.clone(),
                    venue: Venue::UsdtM,
                });
            }
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SymbolStatus;

    fn symbol(base: &str, quote: &str, venue: Venue, contract_type: Option<&str>) -> Symbol {
        Symbol {
            symbol: format!("{base}{quote}"),
            venue,
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            status: SymbolStatus::Active,
            contract_type: contract_type.map(str::to_string),
            delivery_date: None,
            onboard_date: None,
            tick_size: None,
            step_size: None,
            min_notional: None,
            updated_at: 0,
        }
    }

    #[test]
    fn asset_resolves_to_both_venues_when_both_listed() {
        let ranked = vec![RankedAsset {
            rank: 1,
            name: "Ether".to_string(),
            symbol: "eth".to_string(),
        }];
        let spot = vec![symbol("ETH", "USDT", Venue::Spot, None)];
        let usdm = vec![symbol("ETH", "USDT", Venue::UsdtM, Some("PERPETUAL"))];
        let excluded = crate::symbol_registry::default_excluded_assets();

        let targets = resolve_targets(&ranked, &spot, &usdm, &excluded);
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().any(|t| t.venue == Venue::Spot));
        assert!(targets.iter().any(|t| t.venue == Venue::UsdtM));
    }

    #[test]
    fn excluded_assets_produce_no_targets() {
        let ranked = vec![RankedAsset {
            rank: 1,
            name: "Bitcoin".to_string(),
            symbol: "btc".to_string(),
        }];
        let spot = vec![symbol("BTC", "USDT", Venue::Spot, None)];
        let excluded = crate::symbol_registry::default_excluded_assets();

        assert!(resolve_targets(&ranked, &spot, &[], &excluded).is_empty());
    }

    #[test]
    fn delivery_futures_contract_is_not_eligible() {
        let ranked = vec![RankedAsset {
            rank: 1,
            name: "Ether".to_string(),
            symbol: "eth".to_string(),
        }];
        let usdm = vec![symbol("ETH", "USDT", Venue::UsdtM, Some("CURRENT_QUARTER"))];
        let excluded = crate::symbol_registry::default_excluded_assets();

        assert!(resolve_targets(&ranked, &[], &usdm, &excluded).is_empty());
    }
}
