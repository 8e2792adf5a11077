//! Fixed currency catalogs. Membership decides input precision and display
//! formatting: assets carry 8 fraction digits, reference currencies 2.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Asset,
    Reference,
}

impl CatalogKind {
    pub fn fraction_digits(self) -> usize {
        match self {
            Self::Asset => 8,
            Self::Reference => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
    pub id: &'static str,
    pub name: &'static str,
    pub symbol: &'static str,
    pub kind: CatalogKind,
}

impl Currency {
    const fn asset(id: &'static str, name: &'static str, symbol: &'static str) -> Self {
        Self {
            id,
            name,
            symbol,
            kind: CatalogKind::Asset,
        }
    }

    const fn reference(id: &'static str, name: &'static str, symbol: &'static str) -> Self {
        Self {
            id,
            name,
            symbol,
            kind: CatalogKind::Reference,
        }
    }

    pub fn is_asset(&self) -> bool {
        self.kind == CatalogKind::Asset
    }

    pub fn fraction_digits(&self) -> usize {
        self.kind.fraction_digits()
    }
}

pub static ASSETS: [Currency; 15] = [
    Currency::asset("bitcoin", "Bitcoin", "BTC"),
    Currency::asset("ethereum", "Ethereum", "ETH"),
    Currency::asset("dogecoin", "Dogecoin", "DOGE"),
    Currency::asset("cardano", "Cardano", "ADA"),
    Currency::asset("solana", "Solana", "SOL"),
    Currency::asset("ripple", "Ripple", "XRP"),
    Currency::asset("polkadot", "Polkadot", "DOT"),
    Currency::asset("binancecoin", "Binance Coin", "BNB"),
    Currency::asset("avalanche-2", "Avalanche", "AVAX"),
    Currency::asset("chainlink", "Chainlink", "LINK"),
    Currency::asset("polygon", "Polygon", "MATIC"),
    Currency::asset("uniswap", "Uniswap", "UNI"),
    Currency::asset("litecoin", "Litecoin", "LTC"),
    Currency::asset("stellar", "Stellar", "XLM"),
    Currency::asset("monero", "Monero", "XMR"),
];

pub static REFERENCES: [Currency; 15] = [
    Currency::reference("usd", "US Dollar", "USD"),
    Currency::reference("eur", "Euro", "EUR"),
    Currency::reference("gbp", "British Pound", "GBP"),
    Currency::reference("jpy", "Japanese Yen", "JPY"),
    Currency::reference("inr", "Indian Rupee", "INR"),
    Currency::reference("aud", "Australian Dollar", "AUD"),
    Currency::reference("cad", "Canadian Dollar", "CAD"),
    Currency::reference("chf", "Swiss Franc", "CHF"),
    Currency::reference("cny", "Chinese Yuan", "CNY"),
    Currency::reference("hkd", "Hong Kong Dollar", "HKD"),
    Currency::reference("sgd", "Singapore Dollar", "SGD"),
    Currency::reference("nzd", "New Zealand Dollar", "NZD"),
    Currency::reference("krw", "South Korean Won", "KRW"),
    Currency::reference("aed", "UAE Dirham", "AED"),
    Currency::reference("brl", "Brazilian Real", "BRL"),
];

pub fn catalog(kind: CatalogKind) -> &'static [Currency] {
    match kind {
        CatalogKind::Asset => &ASSETS,
        CatalogKind::Reference => &REFERENCES,
    }
}

/// Looks a currency up by id or ticker symbol, case-insensitively.
pub fn find_in(kind: CatalogKind, id_or_symbol: &str) -> Option<&'static Currency> {
    let needle = id_or_symbol.trim();
    if needle.is_empty() {
        return None;
    }
    catalog(kind).iter().find(|currency| {
        currency.id.eq_ignore_ascii_case(needle) || currency.symbol.eq_ignore_ascii_case(needle)
    })
}

pub fn find(id_or_symbol: &str) -> Option<&'static Currency> {
    find_in(CatalogKind::Asset, id_or_symbol)
        .or_else(|| find_in(CatalogKind::Reference, id_or_symbol))
}

/// Display rendering with the catalog's fixed fraction digits and thousands
/// grouping.
pub fn format_amount(value: f64, currency: &Currency) -> String {
    if value.is_nan() {
        return "0".to_string();
    }

    let fixed = format!("{:.*}", currency.fraction_digits(), value.abs());
    let (integer, fraction) = match fixed.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(fixed.len() + integer.len() / 3 + 1);
    if value.is_sign_negative() && value != 0.0 {
        grouped.push('-');
    }
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogs_are_disjoint() {
        for asset in ASSETS.iter() {
            assert!(find_in(CatalogKind::Reference, asset.id).is_none());
            assert!(find_in(CatalogKind::Reference, asset.symbol).is_none());
        }
    }

    #[test]
    fn finds_by_id_or_symbol() {
        assert_eq!(find("BTC").map(|c| c.id), Some("bitcoin"));
        assert_eq!(find("avalanche-2").map(|c| c.symbol), Some("AVAX"));
        assert_eq!(find("usd").map(|c| c.kind), Some(CatalogKind::Reference));
        assert!(find_in(CatalogKind::Asset, "usd").is_none());
        assert!(find("").is_none());
    }

    #[test]
    fn precision_follows_catalog() {
        assert_eq!(find("bitcoin").unwrap().fraction_digits(), 8);
        assert_eq!(find("eur").unwrap().fraction_digits(), 2);
    }

    #[test]
    fn formats_with_grouping_and_fixed_digits() {
        let usd = find("usd").unwrap();
        let btc = find("bitcoin").unwrap();

        assert_eq!(format_amount(1_234_567.891, usd), "1,234,567.89");
        assert_eq!(format_amount(0.5, usd), "0.50");
        assert_eq!(format_amount(-1_000.0, usd), "-1,000.00");
        assert_eq!(format_amount(0.002, btc), "0.00200000");
        assert_eq!(format_amount(f64::NAN, btc), "0");
    }
}
