// =============================================================================
// PriceCache — latest observed price per symbol
// =============================================================================
//
// Written by the tick ingest handler, read by the win/loss tracker at signal
// expiry. Readers tolerate a snapshot that is stale by up to one tick.

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy)]
pub struct CachedPrice {
    pub price: f64,
    pub epoch: i64,
}

#[derive(Default)]
pub struct PriceCache {
    prices: RwLock<HashMap<String, CachedPrice>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest price for a symbol. Older epochs never overwrite
    /// newer ones.
    pub fn update(&self, symbol: &str, price: f64, epoch: i64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        let mut map = self.prices.write();
        match map.get(symbol) {
            Some(existing) if existing.epoch > epoch => {}
            _ => {
                map.insert(symbol.to_string(), CachedPrice { price, epoch });
            }
        }
    }

    pub fn latest(&self, symbol: &str) -> Option<CachedPrice> {
        self.prices.read().get(symbol).copied()
    }

    pub fn clear(&self, symbol: &str) {
        self.prices.write().remove(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_reads_latest() {
        let cache = PriceCache::new();
        cache.update("R_100", 101.5, 1000);
        let p = cache.latest("R_100").unwrap();
        assert_eq!(p.price, 101.5);
        assert_eq!(p.epoch, 1000);
    }

    #[test]
    fn older_epoch_does_not_overwrite() {
        let cache = PriceCache::new();
        cache.update("R_100", 101.5, 1000);
        cache.update("R_100", 99.0, 900);
        assert_eq!(cache.latest("R_100").unwrap().price, 101.5);
    }

    #[test]
    fn rejects_invalid_prices() {
        let cache = PriceCache::new();
        cache.update("R_100", f64::NAN, 1000);
        cache.update("R_100", 0.0, 1000);
        assert!(cache.latest("R_100").is_none());
    }

    #[test]
    fn unknown_symbol_is_none() {
        let cache = PriceCache::new();
        assert!(cache.latest("frxEURUSD").is_none());
    }
}
