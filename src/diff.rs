use crate::listing::Listing;
use std::collections::HashSet;

/// Returns the listings in `current` that have a link and whose link does not
/// appear in `seen`. Order follows `current`.
pub fn diff(current: &[Listing], seen: &[Listing]) -> Vec<Listing> {
    let seen_links: HashSet<&str> = seen.iter().map(|l| l.link.as_str()).collect();
    current
        .iter()
        .filter(|l| l.has_link() && !seen_links.contains(l.link.as_str()))
        .cloned()
        .collect()
}

/// Appends the listings of `fresh` not yet present in `seen`, keeping the
/// first occurrence of any link that repeats within `fresh`.
pub fn merge(seen: &[Listing], fresh: &[Listing]) -> Vec<Listing> {
    let mut links: HashSet<&str> = seen.iter().map(|l| l.link.as_str()).collect();
    let mut merged = seen.to_vec();
    for listing in fresh {
        if listing.has_link() && links.insert(listing.link.as_str()) {
            merged.push(listing.clone());
        }
    }
    merged
}
