//! Remote cart → local cart conversions.

use tracing::warn;

use d4k_cart_core::clamp;

use super::GatewayError;
use super::types::{RemoteCart, RemoteLine};
use crate::cart::{CartAggregate, LineItem};

/// Translate a remote line into a local line item.
///
/// The remote's declared stock becomes the line's stock ceiling and its
/// quantity is clamped to it. A line clamped to nothing yields `Ok(None)`.
///
/// # Errors
///
/// Returns `Malformed` if the remote quantity is below 1 or the line total
/// cannot be represented.
pub fn line_item_from_remote(line: RemoteLine) -> Result<Option<LineItem>, GatewayError> {
    let quantity = u32::try_from(line.quantity)
        .ok()
        .filter(|q| *q >= 1)
        .ok_or_else(|| {
            GatewayError::Malformed(format!(
                "line {} has invalid quantity {}",
                line.id, line.quantity
            ))
        })?;

    let allowed = clamp(quantity, line.stock);
    if allowed != quantity {
        warn!(
            line_id = %line.id,
            quantity,
            stock = ?line.stock,
            "Remote line exceeds declared stock, clamping"
        );
    }
    if allowed == 0 {
        return Ok(None);
    }
    if line.product_price.checked_times(allowed).is_none() {
        return Err(GatewayError::Malformed(format!(
            "line {} total overflows: {} x {allowed}",
            line.id, line.product_price
        )));
    }

    Ok(Some(LineItem {
        product_id: line.product_id,
        name: line.product_name,
        unit_price: line.product_price,
        image_url: line.product_image_url,
        quantity: allowed,
        size: line.size,
        color: line.color,
        stock_ceiling: line.stock,
    }))
}

/// Translate a whole remote cart into a local aggregate with fresh totals.
///
/// # Errors
///
/// Returns `Malformed` if any line is malformed or the cart total cannot be
/// represented; nothing is partially applied.
pub fn aggregate_from_remote(cart: RemoteCart) -> Result<CartAggregate, GatewayError> {
    let mut items = Vec::with_capacity(cart.items.len());
    for line in cart.items {
        if let Some(item) = line_item_from_remote(line)? {
            items.push(item);
        }
    }
    CartAggregate::try_from_items(items).map_err(|e| GatewayError::Malformed(e.to_string()))
}
