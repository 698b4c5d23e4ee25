use std::fmt;
use std::str::FromStr;

use rusqlite::types::Value;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use time::OffsetDateTime;

use crate::errors::InventoryError;

pub type PartId = i64;

/// Placeholder used for unknown text columns when seeding.
pub const PLACEHOLDER: &str = "-";

/// A catalog row as stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Part {
    pub id: PartId,
    pub category: String,
    pub car_name: String,
    pub model: String,
    pub product_name: String,
    pub quantity: i64,
    pub price: Price,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

/// Input for creating a part; the store assigns `id` and `last_updated`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPart {
    #[serde(default = "placeholder")]
    pub category: String,
    #[serde(default = "placeholder")]
    pub car_name: String,
    #[serde(default = "placeholder")]
    pub model: String,
    pub product_name: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub price: Price,
}

fn placeholder() -> String {
    PLACEHOLDER.to_string()
}

impl NewPart {
    pub fn new(
        category: impl Into<String>,
        car_name: impl Into<String>,
        model: impl Into<String>,
        product_name: impl Into<String>,
        quantity: i64,
        price: Price,
    ) -> Self {
        Self {
            category: category.into(),
            car_name: car_name.into(),
            model: model.into(),
            product_name: product_name.into(),
            quantity,
            price,
        }
    }

    /// The shape used by the first-run loader: name only, everything else blank.
    pub fn placeholder(product_name: impl Into<String>) -> Self {
        Self::new(
            PLACEHOLDER,
            PLACEHOLDER,
            PLACEHOLDER,
            product_name,
            0,
            Price::ZERO,
        )
    }

    pub fn validate(&self) -> Result<(), InventoryError> {
        validate_name(&self.product_name)?;
        validate_quantity(self.quantity)?;
        validate_price(self.price)
    }
}

/// Columns a caller may edit. `id` and `last_updated` are owned by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartField {
    Category,
    CarName,
    Model,
    ProductName,
    Quantity,
    Price,
}

impl PartField {
    pub const ALL: [PartField; 6] = [
        PartField::Category,
        PartField::CarName,
        PartField::Model,
        PartField::ProductName,
        PartField::Quantity,
        PartField::Price,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::CarName => "car_name",
            Self::Model => "model",
            Self::ProductName => "product_name",
            Self::Quantity => "quantity",
            Self::Price => "price",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Price => "price_cents",
            other => other.as_str(),
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Quantity | Self::Price)
    }

    /// Interpret text typed into a table cell for this column.
    pub fn parse_value(self, text: &str) -> Result<FieldValue, InventoryError> {
        match self {
            Self::Quantity => text
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| InventoryError::InvalidInput(format!("`{text}` is not a whole number"))),
            Self::Price => text
                .parse::<Price>()
                .map(FieldValue::Price)
                .map_err(|err| InventoryError::InvalidInput(err.to_string())),
            _ => Ok(FieldValue::Text(text.to_string())),
        }
    }

    /// The value a cleared cell takes: empty text or zero.
    pub fn cleared_value(self) -> FieldValue {
        match self {
            Self::Quantity => FieldValue::Integer(0),
            Self::Price => FieldValue::Price(Price::ZERO),
            _ => FieldValue::Text(String::new()),
        }
    }
}

impl FromStr for PartField {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PartField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| InventoryError::UnknownField(s.to_string()))
    }
}

impl fmt::Display for PartField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Price(Price),
}

/// Partial update: `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartUpdate {
    pub category: Option<String>,
    pub car_name: Option<String>,
    pub model: Option<String>,
    pub product_name: Option<String>,
    pub quantity: Option<i64>,
    pub price: Option<Price>,
}

impl PartUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(column name, value)` pairs, as an inline editor produces them.
    pub fn from_fields<I, K>(fields: I) -> Result<Self, InventoryError>
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: AsRef<str>,
    {
        let mut update = Self::new();
        for (name, value) in fields {
            update.set(name.as_ref().parse()?, value)?;
        }
        Ok(update)
    }

    /// Overwrite every editable column with the values of `part`.
    pub fn replace_with(part: &NewPart) -> Self {
        Self {
            category: Some(part.category.clone()),
            car_name: Some(part.car_name.clone()),
            model: Some(part.model.clone()),
            product_name: Some(part.product_name.clone()),
            quantity: Some(part.quantity),
            price: Some(part.price),
        }
    }

    pub fn set(&mut self, field: PartField, value: FieldValue) -> Result<(), InventoryError> {
        match (field, value) {
            (PartField::Category, FieldValue::Text(v)) => self.category = Some(v),
            (PartField::CarName, FieldValue::Text(v)) => self.car_name = Some(v),
            (PartField::Model, FieldValue::Text(v)) => self.model = Some(v),
            (PartField::ProductName, FieldValue::Text(v)) => self.product_name = Some(v),
            (PartField::Quantity, FieldValue::Integer(v)) => self.quantity = Some(v),
            (PartField::Price, FieldValue::Price(v)) => self.price = Some(v),
            (field, _) => {
                return Err(InventoryError::FieldType {
                    field: field.as_str(),
                    expected: match field {
                        PartField::Quantity => "an integer",
                        PartField::Price => "a price",
                        _ => "text",
                    },
                })
            }
        }
        Ok(())
    }

    pub fn with_category(mut self, value: impl Into<String>) -> Self {
        self.category = Some(value.into());
        self
    }

    pub fn with_car_name(mut self, value: impl Into<String>) -> Self {
        self.car_name = Some(value.into());
        self
    }

    pub fn with_model(mut self, value: impl Into<String>) -> Self {
        self.model = Some(value.into());
        self
    }

    pub fn with_product_name(mut self, value: impl Into<String>) -> Self {
        self.product_name = Some(value.into());
        self
    }

    pub fn with_quantity(mut self, value: i64) -> Self {
        self.quantity = Some(value);
        self
    }

    pub fn with_price(mut self, value: Price) -> Self {
        self.price = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Names of the columns this update touches, in column order.
    pub fn fields(&self) -> Vec<PartField> {
        self.assignments().into_iter().map(|(field, _)| field).collect()
    }

    pub fn validate(&self) -> Result<(), InventoryError> {
        if let Some(name) = &self.product_name {
            validate_name(name)?;
        }
        if let Some(quantity) = self.quantity {
            validate_quantity(quantity)?;
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        Ok(())
    }

    pub(crate) fn column_values(&self) -> Vec<(&'static str, Value)> {
        self.assignments()
            .into_iter()
            .map(|(field, value)| (field.column(), value))
            .collect()
    }

    fn assignments(&self) -> Vec<(PartField, Value)> {
        let text = |v: &Option<String>| v.as_ref().map(|s| Value::Text(s.clone()));
        [
            (PartField::Category, text(&self.category)),
            (PartField::CarName, text(&self.car_name)),
            (PartField::Model, text(&self.model)),
            (
                PartField::ProductName,
                self.product_name
                    .as_ref()
                    .map(|s| Value::Text(s.trim().to_string())),
            ),
            (PartField::Quantity, self.quantity.map(Value::Integer)),
            (PartField::Price, self.price.map(|p| Value::Integer(p.cents()))),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| (field, v)))
        .collect()
    }
}

/// Criteria for the filter view. Every criterion is optional and they
/// combine with AND; text criteria are case-insensitive substrings and the
/// price bounds are inclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PartFilter {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub min_price: Option<Price>,
    #[serde(default)]
    pub max_price: Option<Price>,
}

impl PartFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, value: impl Into<String>) -> Self {
        self.category = Some(value.into());
        self
    }

    pub fn with_name(mut self, value: impl Into<String>) -> Self {
        self.name = Some(value.into());
        self
    }

    pub fn with_min_price(mut self, value: Price) -> Self {
        self.min_price = Some(value);
        self
    }

    pub fn with_max_price(mut self, value: Price) -> Self {
        self.max_price = Some(value);
        self
    }

    /// Trimmed category text, `None` when blank.
    pub fn category_term(&self) -> Option<&str> {
        non_blank(self.category.as_deref())
    }

    /// Trimmed product-name text, `None` when blank.
    pub fn name_term(&self) -> Option<&str> {
        non_blank(self.name.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.category_term().is_none()
            && self.name_term().is_none()
            && self.min_price.is_none()
            && self.max_price.is_none()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// What [`add_or_replace_part`](super::InventoryStore::add_or_replace_part) did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum AddOutcome {
    Added(PartId),
    Replaced(PartId),
    /// A part with the same name exists and overwriting was not requested.
    Exists(PartId),
}

impl AddOutcome {
    pub fn id(self) -> PartId {
        match self {
            Self::Added(id) | Self::Replaced(id) | Self::Exists(id) => id,
        }
    }
}

fn validate_name(name: &str) -> Result<(), InventoryError> {
    if name.trim().is_empty() {
        return Err(InventoryError::InvalidInput(
            "product name must not be empty".into(),
        ));
    }
    Ok(())
}

fn validate_quantity(quantity: i64) -> Result<(), InventoryError> {
    if quantity < 0 {
        return Err(InventoryError::InvalidInput(format!(
            "quantity {quantity} is negative"
        )));
    }
    Ok(())
}

fn validate_price(price: Price) -> Result<(), InventoryError> {
    if price.is_negative() {
        return Err(InventoryError::InvalidInput(format!("price {price} is negative")));
    }
    Ok(())
}

/// Money with two decimal places, held as integer cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(i64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PriceParseError {
    #[error("`{0}` is not a price")]
    Malformed(String),
    #[error("`{0}` has more than two decimal places")]
    TooPrecise(String),
    #[error("`{0}` is out of range")]
    OutOfRange(String),
}

impl Price {
    pub const ZERO: Price = Price(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Rounds to the nearest cent; `None` for NaN, infinities and overflow.
    pub fn from_f64(value: f64) -> Option<Self> {
        let cents = (value * 100.0).round();
        if !cents.is_finite() || cents.abs() > i64::MAX as f64 {
            return None;
        }
        Some(Self(cents as i64))
    }
}

impl FromStr for Price {
    type Err = PriceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let malformed = || PriceParseError::Malformed(s.to_string());
        let (negative, unsigned) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.strip_prefix('+').unwrap_or(raw)),
        };
        let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(malformed());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        if fraction.len() > 2 {
            return Err(PriceParseError::TooPrecise(s.to_string()));
        }
        let out_of_range = || PriceParseError::OutOfRange(s.to_string());
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| out_of_range())?
        };
        let fraction: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| malformed())? * 10,
            _ => fraction.parse().map_err(|_| malformed())?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(fraction))
            .ok_or_else(out_of_range)?;
        Ok(Self(if negative { -cents } else { cents }))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Whole(i64),
            Decimal(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Whole(units) => units
                .checked_mul(100)
                .map(Price)
                .ok_or_else(|| de::Error::custom("price out of range")),
            Raw::Decimal(value) => {
                Price::from_f64(value).ok_or_else(|| de::Error::custom("price out of range"))
            }
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_filter_terms_do_not_count() {
        let filter = PartFilter::new().with_category("  ").with_name("");
        assert!(filter.is_empty());
        assert_eq!(PartFilter::new().with_name(" pump ").name_term(), Some("pump"));

        let parsed: PartFilter = serde_json::from_str(r#"{"min_price":"5.00"}"#).unwrap();
        assert_eq!(parsed.min_price, Some(Price::from_cents(500)));
        assert!(!parsed.is_empty());
    }

    #[test]
    fn price_parses_common_shapes() {
        assert_eq!("12".parse::<Price>().unwrap().cents(), 1200);
        assert_eq!("12.5".parse::<Price>().unwrap().cents(), 1250);
        assert_eq!(" 12.05 ".parse::<Price>().unwrap().cents(), 1205);
        assert_eq!(".5".parse::<Price>().unwrap().cents(), 50);
        assert_eq!("-1".parse::<Price>().unwrap().cents(), -100);
    }

    #[test]
    fn price_rejects_garbage_and_extra_precision() {
        assert!(matches!("".parse::<Price>(), Err(PriceParseError::Malformed(_))));
        assert!(matches!("1.2.3".parse::<Price>(), Err(PriceParseError::Malformed(_))));
        assert!(matches!("abc".parse::<Price>(), Err(PriceParseError::Malformed(_))));
        assert!(matches!("1.234".parse::<Price>(), Err(PriceParseError::TooPrecise(_))));
    }

    #[test]
    fn price_displays_two_decimals() {
        assert_eq!(Price::from_cents(1250).to_string(), "12.50");
        assert_eq!(Price::from_cents(5).to_string(), "0.05");
        assert_eq!(Price::from_cents(-100).to_string(), "-1.00");
    }

    #[test]
    fn price_deserializes_from_numbers_and_text() {
        let from_text: Price = serde_json::from_str("\"9.99\"").unwrap();
        let from_float: Price = serde_json::from_str("9.99").unwrap();
        let from_int: Price = serde_json::from_str("9").unwrap();
        assert_eq!(from_text.cents(), 999);
        assert_eq!(from_float.cents(), 999);
        assert_eq!(from_int.cents(), 900);
        assert_eq!(serde_json::to_string(&from_text).unwrap(), "\"9.99\"");
    }

    #[test]
    fn field_names_round_trip_and_unknown_names_fail() {
        for field in PartField::ALL {
            assert_eq!(field.as_str().parse::<PartField>().unwrap(), field);
        }
        let err = "colour".parse::<PartField>().unwrap_err();
        assert!(err.is_programmer_error());
    }

    #[test]
    fn update_from_fields_checks_value_kinds() {
        let update = PartUpdate::from_fields([
            ("quantity", FieldValue::Integer(3)),
            ("model", FieldValue::Text("Civic".into())),
        ])
        .unwrap();
        assert_eq!(update.fields(), vec![PartField::Model, PartField::Quantity]);

        let err = PartUpdate::from_fields([("quantity", FieldValue::Text("3".into()))]).unwrap_err();
        assert!(matches!(err, InventoryError::FieldType { field: "quantity", .. }));
        let err = PartUpdate::from_fields([("id", FieldValue::Integer(1))]).unwrap_err();
        assert!(matches!(err, InventoryError::UnknownField(_)));
    }

    #[test]
    fn update_validation_rejects_blank_names_and_negatives() {
        assert!(PartUpdate::new().with_product_name("  ").validate().is_err());
        assert!(PartUpdate::new().with_quantity(-1).validate().is_err());
        assert!(PartUpdate::new()
            .with_price(Price::from_cents(-1))
            .validate()
            .is_err());
        assert!(PartUpdate::new().with_quantity(0).validate().is_ok());
    }

    #[test]
    fn cell_text_parses_per_column() {
        assert_eq!(
            PartField::Quantity.parse_value(" 7 ").unwrap(),
            FieldValue::Integer(7)
        );
        assert_eq!(
            PartField::Price.parse_value("3.5").unwrap(),
            FieldValue::Price(Price::from_cents(350))
        );
        assert!(PartField::Quantity.parse_value("seven").is_err());
        assert_eq!(
            PartField::CarName.cleared_value(),
            FieldValue::Text(String::new())
        );
    }

    #[test]
    fn new_part_defaults_fill_placeholders() {
        let part: NewPart = serde_json::from_str(r#"{"product_name":"Oil Filter"}"#).unwrap();
        assert_eq!(part, NewPart::placeholder("Oil Filter"));
        assert!(part.validate().is_ok());
    }
}
