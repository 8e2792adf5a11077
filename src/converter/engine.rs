//! Amount synchronization as a pure reducer: `Converter::apply(event)`
//! returns the next state. Nothing here touches the network or the clock.

use crate::converter::catalog::{self, CatalogKind, Currency};
use serde::Serialize;

const DERIVED_ROUNDING_PLACES: i32 = 2;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    From,
    To,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionState {
    pub from_amount: String,
    pub to_amount: String,
    pub last_edited: Field,
}

impl Default for ConversionState {
    fn default() -> Self {
        Self {
            from_amount: "1".to_string(),
            to_amount: String::new(),
            last_edited: Field::From,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceStatus {
    pub price: Option<f64>,
    pub change_24h_pct: Option<f64>,
    pub loading: bool,
    pub error: Option<String>,
}

impl PriceStatus {
    pub fn pending() -> Self {
        Self {
            loading: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryStatus {
    pub loading: bool,
    pub error: Option<String>,
}

impl HistoryStatus {
    pub fn pending() -> Self {
        Self {
            loading: true,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConverterEvent {
    EditFrom(String),
    EditTo(String),
    PriceChanged(PriceStatus),
    HistoryChanged(HistoryStatus),
    Swap,
    SelectFrom(String),
    SelectTo(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Converter {
    pub conversion: ConversionState,
    pub from: &'static Currency,
    pub to: &'static Currency,
    pub price: PriceStatus,
    pub history: HistoryStatus,
}

impl Converter {
    pub fn new(from: &'static Currency, to: &'static Currency) -> Self {
        Self {
            conversion: ConversionState::default(),
            from,
            to,
            price: PriceStatus::pending(),
            history: HistoryStatus::pending(),
        }
    }

    pub fn pair(&self) -> (&'static str, &'static str) {
        (self.from.id, self.to.id)
    }

    /// The price the engine may convert with: present, positive, and not
    /// being refreshed.
    pub fn usable_price(&self) -> Option<f64> {
        if self.price.loading {
            return None;
        }
        self.price
            .price
            .filter(|price| price.is_finite() && *price > 0.0)
    }

    pub fn loading(&self) -> bool {
        self.price.loading || self.history.loading
    }

    /// Error text to display; a price failure wins over a history failure.
    pub fn error(&self) -> Option<&str> {
        self.price
            .error
            .as_deref()
            .or(self.history.error.as_deref())
    }

    pub fn apply(mut self, event: ConverterEvent) -> Self {
        match event {
            ConverterEvent::EditFrom(text) => self.edit_from(text),
            ConverterEvent::EditTo(text) => self.edit_to(text),
            ConverterEvent::PriceChanged(status) => {
                self.price = status;
                self.recompute_derived();
            }
            ConverterEvent::HistoryChanged(status) => self.history = status,
            ConverterEvent::Swap => {
                std::mem::swap(&mut self.from, &mut self.to);
                self.reset_market_status();
            }
            ConverterEvent::SelectFrom(id) => {
                if let Some(currency) = catalog::find_in(CatalogKind::Asset, &id) {
                    if currency != self.from {
                        self.from = currency;
                        self.reset_market_status();
                    }
                }
            }
            ConverterEvent::SelectTo(id) => {
                if let Some(currency) = catalog::find_in(CatalogKind::Reference, &id) {
                    if currency != self.to {
                        self.to = currency;
                        self.reset_market_status();
                    }
                }
            }
        }
        self
    }

    fn edit_from(&mut self, text: String) {
        if text.is_empty() {
            self.clear_amounts();
            return;
        }
        if exceeds_precision(&text, self.from.fraction_digits()) {
            return;
        }

        self.conversion.last_edited = Field::From;
        if let Some(price) = self.usable_price() {
            self.conversion.to_amount = parse_amount(&text)
                .map(|amount| format_rounded(amount * price))
                .unwrap_or_default();
        }
        self.conversion.from_amount = text;
    }

    fn edit_to(&mut self, text: String) {
        if text.is_empty() {
            self.clear_amounts();
            return;
        }
        if exceeds_precision(&text, self.to.fraction_digits()) {
            return;
        }

        self.conversion.last_edited = Field::To;
        if let Some(price) = self.usable_price() {
            let from_is_asset = self.from.is_asset();
            self.conversion.from_amount = parse_amount(&text)
                .map(|amount| {
                    let converted = amount / price;
                    // Asset amounts keep full precision on this path only.
                    if from_is_asset {
                        converted.to_string()
                    } else {
                        format_rounded(converted)
                    }
                })
                .unwrap_or_default();
        }
        self.conversion.to_amount = text;
    }

    fn recompute_derived(&mut self) {
        let Some(price) = self.usable_price() else {
            return;
        };

        match self.conversion.last_edited {
            Field::From if !self.conversion.from_amount.is_empty() => {
                if let Some(amount) = parse_amount(&self.conversion.from_amount) {
                    self.conversion.to_amount = format_rounded(amount * price);
                }
            }
            Field::To if !self.conversion.to_amount.is_empty() => {
                if let Some(amount) = parse_amount(&self.conversion.to_amount) {
                    self.conversion.from_amount = format_rounded(amount / price);
                }
            }
            _ => {}
        }
    }

    fn clear_amounts(&mut self) {
        self.conversion.from_amount.clear();
        self.conversion.to_amount.clear();
    }

    fn reset_market_status(&mut self) {
        self.price = PriceStatus::pending();
        self.history = HistoryStatus::pending();
    }
}

pub fn fraction_digit_count(text: &str) -> usize {
    text.split('.').nth(1).map(str::len).unwrap_or(0)
}

fn exceeds_precision(text: &str, allowed: usize) -> bool {
    fraction_digit_count(text) > allowed
}

pub fn parse_amount(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}

fn format_rounded(value: f64) -> String {
    format!(
        "{:.*}",
        DERIVED_ROUNDING_PLACES as usize,
        round_to(value, DERIVED_ROUNDING_PLACES)
    )
}
