#![forbid(unsafe_code)]

use storefront_core::slugify;

/// Default SKU for a variant whose SKU was left blank:
/// `{slug}-{color}-{size}` with color and size slugified, upper-cased.
pub fn generate_sku(product_slug: &str, color: &str, size: &str) -> String {
    format!("{}-{}-{}", product_slug, slugify(color), slugify(size)).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_tee_deep_blue_xl() {
        assert_eq!(generate_sku("classic-tee", "Deep Blue", "XL"), "CLASSIC-TEE-DEEP-BLUE-XL");
    }

    #[test]
    fn deterministic() {
        let a = generate_sku("runner", "Off White / Gum", "42.5");
        let b = generate_sku("runner", "Off White / Gum", "42.5");
        assert_eq!(a, b);
        assert_eq!(a, "RUNNER-OFF-WHITE-GUM-42-5");
    }
}
