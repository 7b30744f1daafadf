#![allow(non_snake_case)]

use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnError, serde_as};

/// One entry of the Browse API `itemSummaries` array. Only the fields the
/// scanner reads are modelled; everything else is ignored. A field of the
/// wrong type reads as absent rather than failing the whole listing.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawListing {
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub title: Option<String>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub price: Option<RawPrice>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub condition: Option<String>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub itemWebUrl: Option<String>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub image: Option<RawImage>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub itemId: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPrice {
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub value: Option<PriceValue>,
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub currency: Option<String>,
}

/// eBay sends amounts as decimal strings; numbers are accepted too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PriceValue {
    Number(f64),
    Text(String),
}

impl PriceValue {
    fn amount(&self) -> Option<f64> {
        let amount = match self {
            PriceValue::Number(value) => Some(*value),
            PriceValue::Text(raw) => raw.trim().parse::<f64>().ok(),
        };
        amount.filter(|value| value.is_finite())
    }
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawImage {
    #[serde(default)]
    #[serde_as(deserialize_as = "DefaultOnError")]
    pub imageUrl: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedListing {
    pub title: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub condition: Option<String>,
    pub seller_item_url: Option<String>,
    pub image: Option<String>,
    pub item_id: Option<String>,
}

/// Maps a raw search result onto the fixed listing schema. Absent fields
/// become `None`; a missing title becomes the empty string.
pub fn normalize(item: &RawListing) -> NormalizedListing {
    let price = item.price.as_ref();
    NormalizedListing {
        title: item.title.clone().unwrap_or_default(),
        price: price.and_then(|p| p.value.as_ref()).and_then(PriceValue::amount),
        currency: price.and_then(|p| p.currency.clone()),
        condition: item.condition.clone(),
        seller_item_url: item.itemWebUrl.clone(),
        image: item.image.as_ref().and_then(|img| img.imageUrl.clone()),
        item_id: item.itemId.clone(),
    }
}
