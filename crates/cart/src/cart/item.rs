//! Cart line items.

use serde::{Deserialize, Serialize};

use d4k_cart_core::{LineKey, Price, ProductId};

/// A purchasable line in the cart.
///
/// Identity is `(product_id, size)`; see [`LineItem::key`]. Every other field
/// is descriptive and may be refreshed from the catalog or the remote cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Catalog product.
    pub product_id: ProductId,
    /// Product display name.
    pub name: String,
    /// Price of a single unit.
    pub unit_price: Price,
    /// Product image.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Number of units, always at least 1.
    pub quantity: u32,
    /// Variant size.
    #[serde(default)]
    pub size: Option<String>,
    /// Variant color (descriptive only).
    #[serde(default)]
    pub color: Option<String>,
    /// Known stock for this variant. `None` means unlimited.
    #[serde(default)]
    pub stock_ceiling: Option<i32>,
}

impl LineItem {
    /// Build a line from catalog data and a quantity.
    ///
    /// The quantity is taken as given; callers clamp it first.
    #[must_use]
    pub fn from_catalog(item: CatalogItem, quantity: u32) -> Self {
        Self {
            product_id: item.product_id,
            name: item.name,
            unit_price: item.unit_price,
            image_url: item.image_url,
            quantity,
            size: item.size,
            color: item.color,
            stock_ceiling: item.stock_ceiling,
        }
    }

    /// Identity key of this line.
    #[must_use]
    pub fn key(&self) -> LineKey {
        LineKey {
            product_id: self.product_id,
            size: self.size.clone(),
        }
    }

    /// `unit_price * quantity`, or `None` if it cannot be represented.
    #[must_use]
    pub fn line_total(&self) -> Option<Price> {
        self.unit_price.checked_times(self.quantity)
    }
}

/// Catalog data for a product variant being added to the cart.
///
/// This is a [`LineItem`] without a quantity: the product page knows what the
/// shopper picked, the cart decides how many end up in the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Price,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub stock_ceiling: Option<i32>,
}

impl CatalogItem {
    /// Create catalog data with no image, size, color or stock information.
    #[must_use]
    pub fn new(product_id: ProductId, name: impl Into<String>, unit_price: Price) -> Self {
        Self {
            product_id,
            name: name.into(),
            unit_price,
            image_url: None,
            size: None,
            color: None,
            stock_ceiling: None,
        }
    }

    /// Set the variant size.
    #[must_use]
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    /// Set the variant color.
    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Set the known stock ceiling.
    #[must_use]
    pub const fn with_stock(mut self, stock: i32) -> Self {
        self.stock_ceiling = Some(stock);
        self
    }

    /// Set the product image.
    #[must_use]
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Identity key the item would have in the cart.
    #[must_use]
    pub fn key(&self) -> LineKey {
        LineKey {
            product_id: self.product_id,
            size: self.size.clone(),
        }
    }
}
