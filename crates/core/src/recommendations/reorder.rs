use std::collections::HashSet;

use crate::domain::behavior::BehaviorProfile;
use crate::domain::product::Product;

/// Moves purchased products first, then products in any category the user has
/// bought from, then the rest. Order within each group is preserved.
pub fn partition_by_affinity(products: Vec<Product>, profiles: &[BehaviorProfile]) -> Vec<Product> {
    if profiles.is_empty() {
        return products;
    }

    let purchased = profiles.iter().map(|profile| &profile.product_id).collect::<HashSet<_>>();
    let categories = profiles.iter().map(|profile| &profile.category).collect::<HashSet<_>>();

    let mut bought = Vec::new();
    let mut preferred = Vec::new();
    let mut rest = Vec::new();
    for product in products {
        if purchased.contains(&product.id) {
            bought.push(product);
        } else if categories.contains(&product.category) {
            preferred.push(product);
        } else {
            rest.push(product);
        }
    }

    bought.extend(preferred);
    bought.extend(rest);
    bought
}
