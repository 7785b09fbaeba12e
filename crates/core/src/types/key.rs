//! Line identity.
//!
//! Two cart lines are "the same purchasable line" when they share a product
//! and a size. Color is descriptive only and never part of the key.

use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// Identity key of a cart line: `(product_id, size)`.
///
/// A missing size is its own key value, distinct from every named size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineKey {
    /// Catalog product.
    pub product_id: ProductId,
    /// Variant size, if the product has sizes.
    pub size: Option<String>,
}

impl LineKey {
    /// Create a new identity key.
    #[must_use]
    pub fn new(product_id: ProductId, size: Option<impl Into<String>>) -> Self {
        Self {
            product_id,
            size: size.map(Into::into),
        }
    }

    /// Key for a product sold without sizes.
    #[must_use]
    pub const fn without_size(product_id: ProductId) -> Self {
        Self {
            product_id,
            size: None,
        }
    }
}

impl std::fmt::Display for LineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.size {
            Some(size) => write!(f, "{}/{size}", self.product_id),
            None => write!(f, "{}", self.product_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_is_identity_bearing() {
        let medium = LineKey::new(ProductId::new(1), Some("M"));
        let large = LineKey::new(ProductId::new(1), Some("L"));
        assert_ne!(medium, large);
        assert_eq!(medium, LineKey::new(ProductId::new(1), Some("M")));
    }

    #[test]
    fn test_no_size_differs_from_sized() {
        let none = LineKey::without_size(ProductId::new(1));
        let sized = LineKey::new(ProductId::new(1), Some("M"));
        assert_ne!(none, sized);
    }

    #[test]
    fn test_display() {
        assert_eq!(LineKey::new(ProductId::new(3), Some("XL")).to_string(), "3/XL");
        assert_eq!(LineKey::without_size(ProductId::new(3)).to_string(), "3");
    }
}
