//! Stock ceiling policy.
//!
//! A single pure rule: a requested quantity never exceeds the known stock of
//! the item. Catalog items without variant-level stock data have no ceiling
//! and are treated as unlimited.

/// Clamp a requested quantity against an optional stock ceiling.
///
/// - `None` ceiling: `requested` is returned unchanged.
/// - Positive ceiling: `min(requested, ceiling)`.
/// - Zero or negative ceiling: `0` (the item is out of stock).
///
/// # Example
///
/// ```rust
/// use d4k_cart_core::clamp;
///
/// assert_eq!(clamp(8, Some(5)), 5);
/// assert_eq!(clamp(3, Some(5)), 3);
/// assert_eq!(clamp(8, None), 8);
/// assert_eq!(clamp(8, Some(0)), 0);
/// ```
#[must_use]
pub fn clamp(requested: u32, ceiling: Option<i32>) -> u32 {
    match ceiling {
        None => requested,
        Some(c) => u32::try_from(c).map_or(0, |c| requested.min(c)),
    }
}
