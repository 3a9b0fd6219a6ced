//! Heuristic field extraction for a single search-result card.
//!
//! Marketplace markup drifts constantly, so every field is resolved through an
//! ordered list of [`Strategy`] values. Each strategy looks at a
//! [`ListingSnapshot`] and either produces a value or passes; the first value
//! wins. Extraction never fails: the worst outcome is a [`Listing`] whose
//! optional fields are all absent.

use crate::listing::Listing;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace};

/// Dedicated title element inside a card.
pub const TITLE_SELECTOR: &str = r#"[data-testid="marketplace_listing_title"]"#;
/// Dedicated price element inside a card.
pub const PRICE_SELECTOR: &str = r#"[data-testid="listing_price"]"#;
/// Dedicated location element inside a card.
pub const GEOCODE_SELECTOR: &str = r#"[data-testid="reverse_geocode"]"#;
/// Child nodes whose text is scanned by the positional fallbacks.
pub const FRAGMENT_SELECTOR: &str = "span";
/// Ancestors that may carry listing metadata as JSON.
pub const METADATA_SELECTOR: &str = r#"[data-bt], [data-store*="location"]"#;

lazy_static! {
    static ref PRICE_LIKE: Regex = Regex::new(r"(?i)^PHP\s?\d|^\d|\d[.,]\d").unwrap();
    static ref PRODUCT_LIKE: Regex = Regex::new(
        r"(?i)\b(?:macbook|iphone|ipad|imac|apple|samsung|galaxy|pixel|dell|hp|lenovo|thinkpad|asus|acer|msi|intel|ryzen|core\s?i[3579]|m[1-4]|\d+\s?(?:gb|tb)|ssd|ram|retina|inch|pro|air|max|mini)\b"
    )
    .unwrap();
    static ref LOCALITY: Regex = Regex::new(
        r"(?i)\b(?:city|metro|manila|cebu|davao|province|municipality|town|village|barangay|brgy|district|county)\b"
    )
    .unwrap();
}

/// Raw text captured from one rendered listing card.
///
/// Every lookup that failed while capturing is recorded as `None` (or an
/// empty string in `fragments`) so that positional fallbacks stay aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingSnapshot {
    /// Destination of the card anchor, or of its first descendant anchor.
    pub href: Option<String>,
    /// Text of [`TITLE_SELECTOR`].
    pub title_text: Option<String>,
    /// Text of [`PRICE_SELECTOR`].
    pub price_text: Option<String>,
    /// Text of [`GEOCODE_SELECTOR`].
    pub geocode_text: Option<String>,
    /// The card's `aria-label`.
    pub aria_label: Option<String>,
    /// Inner text of every [`FRAGMENT_SELECTOR`] child, in document order.
    pub fragments: Vec<String>,
    /// Visible text of the whole card.
    pub anchor_text: Option<String>,
    /// Raw JSON from the closest [`METADATA_SELECTOR`] element.
    pub metadata: Option<String>,
}

/// What a strategy gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct FieldContext<'a> {
    pub node: &'a ListingSnapshot,
    /// Title resolved so far; only set while resolving later fields.
    pub title: Option<&'a str>,
}

/// One named step of a field's fallback cascade.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub run: fn(&FieldContext<'_>) -> Option<String>,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

pub const TITLE_STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "title_element",
        run: title_element,
    },
    Strategy {
        name: "aria_label",
        run: aria_label,
    },
    Strategy {
        name: "first_non_price_fragment",
        run: first_non_price_fragment,
    },
    Strategy {
        name: "anchor_text",
        run: anchor_text,
    },
];

pub const PRICE_STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "price_element",
        run: price_element,
    },
    Strategy {
        name: "second_fragment",
        run: second_fragment,
    },
];

pub const LOCATION_STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "geocode_element",
        run: geocode_element,
    },
    Strategy {
        name: "comma_fragment",
        run: comma_fragment,
    },
    Strategy {
        name: "locality_fragment",
        run: locality_fragment,
    },
    Strategy {
        name: "metadata",
        run: metadata_location,
    },
];

/// Builds a [`Listing`] from a captured card.
pub fn extract(node: &ListingSnapshot) -> Listing {
    let link = node
        .href
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let ctx = FieldContext { node, title: None };
    let title = resolve("title", TITLE_STRATEGIES, &ctx);

    let ctx = FieldContext {
        node,
        title: title.as_deref(),
    };
    let price = resolve("price", PRICE_STRATEGIES, &ctx);
    let location = resolve("location", LOCATION_STRATEGIES, &ctx);

    let listing = Listing {
        link,
        title,
        price,
        location,
    };
    debug!(?listing, "extracted listing");
    listing
}

/// Runs `strategies` in order and returns the first non-blank value.
pub fn resolve(field: &str, strategies: &[Strategy], ctx: &FieldContext<'_>) -> Option<String> {
    strategies.iter().find_map(|strategy| {
        let value = (strategy.run)(ctx).and_then(non_blank)?;
        trace!(field, strategy = strategy.name, %value, "field resolved");
        Some(value)
    })
}

/// Whether `text` reads like a displayed price rather than prose.
pub fn is_price_like(text: &str) -> bool {
    PRICE_LIKE.is_match(text.trim())
}

/// Whether `text` reads like a product title (brand or hardware tokens).
pub fn is_title_like(text: &str) -> bool {
    PRODUCT_LIKE.is_match(text)
}

pub fn is_locality(text: &str) -> bool {
    LOCALITY.is_match(text)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

fn title_element(ctx: &FieldContext<'_>) -> Option<String> {
    ctx.node.title_text.clone()
}

fn aria_label(ctx: &FieldContext<'_>) -> Option<String> {
    ctx.node.aria_label.clone()
}

fn first_non_price_fragment(ctx: &FieldContext<'_>) -> Option<String> {
    ctx.node
        .fragments
        .iter()
        .map(|t| t.trim())
        .find(|t| !t.is_empty() && !is_price_like(t))
        .map(str::to_string)
}

fn anchor_text(ctx: &FieldContext<'_>) -> Option<String> {
    ctx.node.anchor_text.clone()
}

fn price_element(ctx: &FieldContext<'_>) -> Option<String> {
    ctx.node.price_text.clone()
}

// Cards list title, price and location as sibling spans; price comes second.
fn second_fragment(ctx: &FieldContext<'_>) -> Option<String> {
    ctx.node.fragments.get(1).cloned()
}

fn geocode_element(ctx: &FieldContext<'_>) -> Option<String> {
    ctx.node.geocode_text.clone()
}

/// Fragments that could plausibly be a location.
fn location_candidates<'a>(ctx: &'a FieldContext<'a>) -> impl Iterator<Item = &'a str> + 'a {
    ctx.node
        .fragments
        .iter()
        .map(|t| t.trim())
        .filter(move |t| {
            !t.is_empty()
                && !is_price_like(t)
                && !is_title_like(t)
                && ctx.title.is_none_or(|title| title.trim() != *t)
        })
}

fn comma_fragment(ctx: &FieldContext<'_>) -> Option<String> {
    location_candidates(ctx)
        .find(|t| t.contains(','))
        .map(str::to_string)
}

fn locality_fragment(ctx: &FieldContext<'_>) -> Option<String> {
    location_candidates(ctx)
        .find(|t| is_locality(t))
        .map(str::to_string)
}

fn metadata_location(ctx: &FieldContext<'_>) -> Option<String> {
    let raw = ctx.node.metadata.as_deref()?;
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            debug!("ignoring unparsable listing metadata: {}", e);
            return None;
        }
    };
    location_from_metadata(&value)
}

/// Picks a display location out of embedded listing metadata.
pub fn location_from_metadata(value: &Value) -> Option<String> {
    let data = value.pointer("/location/reverse_geocode").unwrap_or(value);
    fn text(v: Option<&Value>) -> Option<&str> {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    if let Some(name) = text(data.pointer("/city_page/display_name")) {
        return Some(name.to_string());
    }
    match (text(data.get("city")), text(data.get("state"))) {
        (Some(city), Some(state)) => Some(format!("{city}, {state}")),
        (Some(city), None) => Some(city.to_string()),
        (None, Some(state)) => Some(state.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn card(fragments: &[&str]) -> ListingSnapshot {
        ListingSnapshot {
            href: Some("https://www.facebook.com/marketplace/item/42/".into()),
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn run(strategies: &[Strategy], name: &str, ctx: &FieldContext<'_>) -> Option<String> {
        let strategy = strategies.iter().find(|s| s.name == name).unwrap();
        (strategy.run)(ctx)
    }

    #[test]
    fn test_price_like_patterns() {
        assert!(is_price_like("PHP 1,500"));
        assert!(is_price_like("php1500"));
        assert!(is_price_like("15000"));
        assert!(is_price_like("₱12.50"));
        assert!(is_price_like("Was ₱1,200"));
        assert!(!is_price_like("MacBook Air 2015"));
        assert!(!is_price_like("Quezon City, Metro Manila"));
        assert!(!is_price_like(""));
    }

    #[test]
    fn test_title_skips_price_like_fragment() {
        let node = card(&["PHP 1,500", "MacBook Air 2015"]);
        assert_eq!(extract(&node).title.as_deref(), Some("MacBook Air 2015"));
    }

    #[test]
    fn test_title_cascade_order() {
        let mut node = card(&["Standing desk"]);
        node.anchor_text = Some("whole card text".into());
        node.aria_label = Some("Standing desk, oak".into());
        node.title_text = Some("Oak standing desk".into());
        assert_eq!(extract(&node).title.as_deref(), Some("Oak standing desk"));

        node.title_text = Some("   ".into());
        assert_eq!(extract(&node).title.as_deref(), Some("Standing desk, oak"));

        node.aria_label = None;
        assert_eq!(extract(&node).title.as_deref(), Some("Standing desk"));

        node.fragments = vec!["PHP 900".into()];
        assert_eq!(extract(&node).title.as_deref(), Some("whole card text"));
    }

    #[test]
    fn test_price_falls_back_to_second_fragment() {
        let node = card(&["MacBook Air 2015", "PHP 15,000", "Makati, Metro Manila"]);
        assert_eq!(extract(&node).price.as_deref(), Some("PHP 15,000"));

        let mut node = node;
        node.price_text = Some("PHP 14,000".into());
        assert_eq!(extract(&node).price.as_deref(), Some("PHP 14,000"));

        assert_eq!(extract(&card(&["only one"])).price, None);
    }

    #[test]
    fn test_location_prefers_comma_fragment() {
        let node = card(&[
            "PHP 15,000",
            "MacBook Pro, 16GB",
            "Pasig",
            "Makati, Metro Manila",
        ]);
        assert_eq!(
            extract(&node).location.as_deref(),
            Some("Makati, Metro Manila")
        );
    }

    #[test]
    fn test_location_falls_back_to_locality_keyword() {
        let node = card(&["Old bike", "PHP 2,000", "", "Quezon City"]);
        let listing = extract(&node);
        assert_eq!(listing.title.as_deref(), Some("Old bike"));
        assert_eq!(listing.location.as_deref(), Some("Quezon City"));
    }

    #[test]
    fn test_location_never_repeats_title() {
        let node = card(&["Cebu City bike", "PHP 2,000"]);
        let ctx = FieldContext {
            node: &node,
            title: Some("Cebu City bike"),
        };
        assert_eq!(run(LOCATION_STRATEGIES, "locality_fragment", &ctx), None);
    }

    #[test]
    fn test_location_geocode_element_wins() {
        let mut node = card(&["Bike", "PHP 2,000", "Makati, Metro Manila"]);
        node.geocode_text = Some("Taguig".into());
        assert_eq!(extract(&node).location.as_deref(), Some("Taguig"));
    }

    #[test]
    fn test_location_from_metadata_priority() {
        assert_eq!(
            location_from_metadata(&json!({
                "city_page": {"display_name": "Manila"},
                "city": "Ermita",
                "state": "NCR",
            })),
            Some("Manila".into())
        );
        assert_eq!(
            location_from_metadata(&json!({"city": "Ermita", "state": "NCR"})),
            Some("Ermita, NCR".into())
        );
        assert_eq!(
            location_from_metadata(&json!({"city": "Ermita"})),
            Some("Ermita".into())
        );
        assert_eq!(
            location_from_metadata(&json!({"state": "NCR"})),
            Some("NCR".into())
        );
        assert_eq!(
            location_from_metadata(&json!({
                "location": {"reverse_geocode": {"city": "Davao", "state": "Davao del Sur"}}
            })),
            Some("Davao, Davao del Sur".into())
        );
        assert_eq!(location_from_metadata(&json!({"city": ""})), None);
    }

    #[test]
    fn test_location_uses_metadata_when_fragments_fail() {
        let mut node = card(&["Bike", "PHP 2,000"]);
        node.metadata = Some(r#"{"city":"Ermita","state":"NCR"}"#.into());
        assert_eq!(extract(&node).location.as_deref(), Some("Ermita, NCR"));

        node.metadata = Some("{broken".into());
        assert_eq!(extract(&node).location, None);
    }

    #[test]
    fn test_empty_card_still_yields_listing() {
        let listing = extract(&ListingSnapshot::default());
        assert_eq!(listing, Listing::default());
    }

    #[test]
    fn test_link_is_trimmed() {
        let mut node = card(&[]);
        node.href = Some("  https://www.facebook.com/marketplace/item/7/ \n".into());
        assert_eq!(
            extract(&node).link,
            "https://www.facebook.com/marketplace/item/7/"
        );
    }
}
