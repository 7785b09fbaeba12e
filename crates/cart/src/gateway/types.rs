//! Remote cart wire types.
//!
//! Field names follow the remote API's camelCase JSON.

use serde::{Deserialize, Serialize};

use d4k_cart_core::{LineId, LineKey, Price, ProductId};

use crate::cart::LineItem;

/// A line in the remote cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLine {
    /// Server-assigned line ID.
    pub id: LineId,
    /// Catalog product.
    pub product_id: ProductId,
    /// Product display name.
    pub product_name: String,
    /// Unit price.
    pub product_price: Price,
    /// Product image.
    #[serde(default)]
    pub product_image_url: Option<String>,
    /// Quantity as reported by the remote. Validated on translation.
    pub quantity: i32,
    /// Variant size.
    #[serde(default)]
    pub size: Option<String>,
    /// Variant color.
    #[serde(default)]
    pub color: Option<String>,
    /// Remote's declared stock for the variant.
    #[serde(default)]
    pub stock: Option<i32>,
}

impl RemoteLine {
    /// Identity key of this line.
    #[must_use]
    pub fn key(&self) -> LineKey {
        LineKey {
            product_id: self.product_id,
            size: self.size.clone(),
        }
    }
}

/// The remote cart as returned by the fetch endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCart {
    /// Remote lines. A missing list is an empty cart.
    #[serde(default)]
    pub items: Vec<RemoteLine>,
}

impl RemoteCart {
    /// Find the line with this identity key.
    #[must_use]
    pub fn find(&self, key: &LineKey) -> Option<&RemoteLine> {
        self.items.iter().find(|line| line.key() == *key)
    }

    /// Find the line with this ID.
    #[must_use]
    pub fn find_by_id(&self, id: LineId) -> Option<&RemoteLine> {
        self.items.iter().find(|line| line.id == id)
    }
}

/// Request body for adding a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLineRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    pub size: Option<String>,
    pub color: Option<String>,
}

impl AddLineRequest {
    /// Identity key of the line this request targets.
    #[must_use]
    pub fn key(&self) -> LineKey {
        LineKey {
            product_id: self.product_id,
            size: self.size.clone(),
        }
    }
}

impl From<&LineItem> for AddLineRequest {
    fn from(item: &LineItem) -> Self {
        Self {
            product_id: item.product_id,
            quantity: item.quantity,
            size: item.size.clone(),
            color: item.color.clone(),
        }
    }
}

/// Request body for setting a line's quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLineRequest {
    pub quantity: u32,
}

/// Response envelope used by every remote endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}
