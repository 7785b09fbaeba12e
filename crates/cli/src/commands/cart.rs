//! Cart editing commands.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::json;

use d4k_cart::{CartAggregate, CartService, CartUpdate, CatalogItem};
use d4k_cart_core::{LineKey, Price, ProductId};

use super::CliError;
use super::sync::outcome_json;

/// Build a catalog item from command arguments.
///
/// # Errors
///
/// Returns `InvalidPrice` if `price` is not a non-negative decimal.
pub fn catalog_item(
    product: i64,
    name: String,
    price: &str,
    size: Option<String>,
    color: Option<String>,
    stock: Option<i32>,
    image: Option<String>,
) -> Result<CatalogItem, CliError> {
    let amount = Decimal::from_str(price.trim().trim_start_matches('$'))
        .map_err(|e| CliError::InvalidPrice(format!("{price}: {e}")))?;
    if amount.is_sign_negative() {
        return Err(CliError::InvalidPrice(format!("{price}: must not be negative")));
    }

    let mut item = CatalogItem::new(ProductId::new(product), name, Price::new(amount));
    if let Some(size) = size {
        item = item.with_size(size);
    }
    if let Some(color) = color {
        item = item.with_color(color);
    }
    if let Some(stock) = stock {
        item = item.with_stock(stock);
    }
    if let Some(image) = image {
        item = item.with_image(image);
    }
    Ok(item)
}

#[must_use]
pub const fn key(product: i64, size: Option<String>) -> LineKey {
    LineKey {
        product_id: ProductId::new(product),
        size,
    }
}

/// Print the current cart.
///
/// # Errors
///
/// Returns an error if JSON output cannot be rendered.
pub fn show(service: &CartService, json: bool) -> Result<(), CliError> {
    print_cart(&service.snapshot(), json)
}

/// Print the result of a mutation.
///
/// # Errors
///
/// Returns an error if JSON output cannot be rendered.
#[allow(clippy::print_stdout)]
pub fn print_update(update: &CartUpdate, json: bool) -> Result<(), CliError> {
    if json {
        let value = json!({
            "changed": update.changed,
            "sync": update.sync.as_ref().map(outcome_json),
            "cart": update.cart,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if !update.changed {
        println!("Cart unchanged");
    }
    if let Some(outcome) = &update.sync {
        super::sync::print_outcome(outcome);
    }
    print_cart(&update.cart, false)
}

#[allow(clippy::print_stdout)]
fn print_cart(cart: &CartAggregate, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(cart)?);
        return Ok(());
    }

    if cart.is_empty() {
        println!("Cart is empty");
        return Ok(());
    }

    for item in cart.items() {
        let mut variant = Vec::new();
        if let Some(size) = &item.size {
            variant.push(size.as_str());
        }
        if let Some(color) = &item.color {
            variant.push(color.as_str());
        }
        let variant = if variant.is_empty() {
            String::new()
        } else {
            format!(" ({})", variant.join(", "))
        };
        let total = item
            .line_total()
            .map_or_else(|| "overflow".to_string(), |total| total.to_string());
        println!(
            "{:>4} x {}{variant} @ {} = {total}",
            item.quantity, item.name, item.unit_price
        );
    }
    println!("{} items, total {}", cart.total_items(), cart.total_price());
    Ok(())
}
