//! Two-phase user similarity: an inverted index from purchase signals to
//! profiles, then pairwise co-occurrence counting against one target user.

use std::collections::{HashMap, HashSet};

use crate::domain::behavior::BehaviorProfile;
use crate::domain::product::{Category, ProductId};
use crate::domain::user::UserId;
use crate::recommendations::types::SimilarUser;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Signal {
    Product(ProductId),
    Category(Category),
}

/// Identity of one indexed profile.
type ProfileKey = (UserId, ProductId);

#[derive(Clone, Debug, Default)]
pub struct SimilarityIndex {
    postings: HashMap<Signal, Vec<ProfileKey>>,
    signals_by_user: HashMap<UserId, Vec<(ProductId, Category)>>,
}

impl SimilarityIndex {
    pub fn build<'a>(profiles: impl IntoIterator<Item = &'a BehaviorProfile>) -> Self {
        let mut index = Self::default();
        for profile in profiles {
            index.insert(profile);
        }
        index
    }

    pub fn insert(&mut self, profile: &BehaviorProfile) {
        let key = (profile.user_id.clone(), profile.product_id.clone());
        self.postings
            .entry(Signal::Product(profile.product_id.clone()))
            .or_default()
            .push(key.clone());
        self.postings.entry(Signal::Category(profile.category.clone())).or_default().push(key);
        self.signals_by_user
            .entry(profile.user_id.clone())
            .or_default()
            .push((profile.product_id.clone(), profile.category.clone()));
    }

    pub fn user_count(&self) -> usize {
        self.signals_by_user.len()
    }

    /// Users sharing at least `min_matches` product-or-category matches with `target`.
    ///
    /// A match is one (target profile, other profile) pair with the same product
    /// or the same category; a pair sharing both counts once. Ordered by match
    /// count descending, then user id.
    pub fn similar_to(&self, target: &UserId, min_matches: u32) -> Vec<SimilarUser> {
        let Some(target_signals) = self.signals_by_user.get(target) else {
            return Vec::new();
        };

        let mut counts: HashMap<&UserId, u32> = HashMap::new();
        for (product_id, category) in target_signals {
            let mut matched: HashSet<&ProfileKey> = HashSet::new();
            let by_product = self.postings.get(&Signal::Product(product_id.clone()));
            let by_category = self.postings.get(&Signal::Category(category.clone()));

            for key in by_product.into_iter().chain(by_category).flatten() {
                if &key.0 != target && matched.insert(key) {
                    *counts.entry(&key.0).or_insert(0) += 1;
                }
            }
        }

        let mut similar = counts
            .into_iter()
            .filter(|(_, matches)| *matches >= min_matches)
            .map(|(user_id, matches)| SimilarUser { user_id: user_id.clone(), matches })
            .collect::<Vec<_>>();
        similar.sort_by(|a, b| b.matches.cmp(&a.matches).then_with(|| a.user_id.cmp(&b.user_id)));
        similar
    }
}
