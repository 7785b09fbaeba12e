//! Serialization glue between [`CartAggregate`] and a [`SnapshotStore`].
//!
//! Snapshot format: `{ "items": [...], "totalItems": n, "totalPrice": "d" }`.
//! Totals are written for readers of the raw slot; on load they are
//! recomputed from the items.

use crate::cart::CartAggregate;

use super::{PersistenceError, SnapshotStore};

/// Serialize an aggregate to its snapshot form.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn encode(aggregate: &CartAggregate) -> Result<String, PersistenceError> {
    Ok(serde_json::to_string(aggregate)?)
}

/// Parse a snapshot, normalizing it into a consistent aggregate.
///
/// # Errors
///
/// Returns an error if the snapshot is not valid JSON of the expected shape
/// or its total price cannot be represented.
pub fn decode(raw: &str) -> Result<CartAggregate, PersistenceError> {
    Ok(serde_json::from_str(raw)?)
}

/// Write `aggregate` to `slot`.
///
/// # Errors
///
/// Returns an error if encoding or the store write fails.
pub fn save(
    store: &dyn SnapshotStore,
    slot: &str,
    aggregate: &CartAggregate,
) -> Result<(), PersistenceError> {
    store.save(slot, &encode(aggregate)?)
}

/// Read the aggregate stored in `slot`, if any.
///
/// # Errors
///
/// Returns an error if the store read fails or the snapshot does not decode.
pub fn load(
    store: &dyn SnapshotStore,
    slot: &str,
) -> Result<Option<CartAggregate>, PersistenceError> {
    store.load(slot)?.map(|raw| decode(&raw)).transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use d4k_cart_core::{Price, ProductId};

    use super::*;
    use crate::cart::CatalogItem;
    use crate::persistence::MemorySnapshotStore;

    #[test]
    fn test_encode_shape() {
        let mut cart = CartAggregate::new();
        cart.add(
            CatalogItem::new(ProductId::new(4), "Hoodie", Price::from_cents(4500)).with_size("L"),
            2,
        );
        let json: serde_json::Value = serde_json::from_str(&encode(&cart).unwrap()).unwrap();
        assert_eq!(json["totalItems"], 2);
        assert_eq!(json["totalPrice"], "90.00");
        assert_eq!(json["items"][0]["size"], "L");
    }

    #[test]
    fn test_load_missing_slot() {
        let store = MemorySnapshotStore::new();
        assert!(load(&store, "cart").unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_preserves_aggregate() {
        let store = MemorySnapshotStore::new();
        let mut cart = CartAggregate::new();
        cart.add(
            CatalogItem::new(ProductId::new(4), "Hoodie", Price::from_cents(4500)).with_stock(3),
            2,
        );
        save(&store, "cart", &cart).unwrap();
        assert_eq!(load(&store, "cart").unwrap(), Some(cart));
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(matches!(
            decode("not json"),
            Err(PersistenceError::Serialization(_))
        ));
    }

    #[test]
    fn test_decode_overflowing_total_is_error() {
        let raw = r#"{"items": [
            {"productId": 4, "name": "Hoodie", "quantity": 1, "size": "L",
             "unitPrice": "79228162514264337593543950335"},
            {"productId": 4, "name": "Hoodie", "quantity": 1, "size": "M",
             "unitPrice": "79228162514264337593543950335"}
        ]}"#;
        assert!(matches!(
            decode(raw),
            Err(PersistenceError::Serialization(_))
        ));
    }
}
