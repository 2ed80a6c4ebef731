//! Value objects shared across the engine

use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_string() } }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_zero(&self) -> bool { self.amount.is_zero() }
    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency { return Err(MoneyError::CurrencyMismatch); }
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }
    /// Subtraction floored at zero. Totals never go negative.
    pub fn sub_floor(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency { return Err(MoneyError::CurrencyMismatch); }
        Ok(Money::new((self.amount - other.amount).max(Decimal::ZERO), &self.currency))
    }
    pub fn min(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency { return Err(MoneyError::CurrencyMismatch); }
        Ok(Money::new(self.amount.min(other.amount), &self.currency))
    }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{} {}", self.amount, self.currency) }
}

#[derive(Debug, Clone)] pub enum MoneyError { CurrencyMismatch }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Currency mismatch") }
}

/// Identifies a purchasable (product, size[, color, material]) combination.
///
/// Renders as `product/size[/color[/material]]`. Derived `Ord` gives the
/// deterministic per-variant locking order used by multi-line commits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    product_id: String,
    size: String,
    color: Option<String>,
    material: Option<String>,
}

impl VariantKey {
    pub fn new(product_id: impl Into<String>, size: impl Into<String>) -> Result<Self, VariantKeyError> {
        let product_id = product_id.into().trim().to_string();
        let size = size.into().trim().to_string();
        if product_id.is_empty() || size.is_empty() { return Err(VariantKeyError::Empty); }
        if product_id.contains('/') || size.contains('/') { return Err(VariantKeyError::InvalidSegment); }
        Ok(Self { product_id, size, color: None, material: None })
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Result<Self, VariantKeyError> {
        let color = color.into().trim().to_string();
        if color.is_empty() { return Err(VariantKeyError::Empty); }
        if color.contains('/') { return Err(VariantKeyError::InvalidSegment); }
        self.color = Some(color);
        Ok(self)
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Result<Self, VariantKeyError> {
        let material = material.into().trim().to_string();
        if material.is_empty() { return Err(VariantKeyError::Empty); }
        if material.contains('/') { return Err(VariantKeyError::InvalidSegment); }
        self.material = Some(material);
        Ok(self)
    }

    pub fn product_id(&self) -> &str { &self.product_id }
    pub fn size(&self) -> &str { &self.size }
    pub fn color(&self) -> Option<&str> { self.color.as_deref() }
    pub fn material(&self) -> Option<&str> { self.material.as_deref() }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.product_id, self.size)?;
        if let Some(c) = &self.color { write!(f, "/{}", c)?; }
        if let Some(m) = &self.material { write!(f, "/{}", m)?; }
        Ok(())
    }
}

impl FromStr for VariantKey {
    type Err = VariantKeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() < 2 || parts.len() > 4 { return Err(VariantKeyError::InvalidSegment); }
        let mut key = VariantKey::new(parts[0], parts[1])?;
        if let Some(c) = parts.get(2) { key = key.with_color(*c)?; }
        if let Some(m) = parts.get(3) { key = key.with_material(*m)?; }
        Ok(key)
    }
}

// Wire format is the display string, not a struct.
impl Serialize for VariantKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VariantKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone)] pub enum VariantKeyError { Empty, InvalidSegment }
impl std::error::Error for VariantKeyError {}
impl fmt::Display for VariantKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "variant key segment empty"),
            Self::InvalidSegment => write!(f, "variant key must be product/size[/color[/material]]"),
        }
    }
}
