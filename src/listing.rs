use serde::{Deserialize, Serialize};

/// A single marketplace item as it appeared on the search results page.
///
/// Listings are identified by `link` alone: a listing whose title or price
/// changed between runs is still the same listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Destination URL of the listing anchor
    #[serde(default)]
    pub link: String,
    /// Listing title
    #[serde(default)]
    pub title: Option<String>,
    /// Price as displayed, currency symbol included
    #[serde(default)]
    pub price: Option<String>,
    /// Seller locality (e.g. "Quezon City, Metro Manila")
    #[serde(default)]
    pub location: Option<String>,
}

impl Listing {
    /// Constructs a [`Listing`] with only its identity set.
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_price(mut self, price: impl Into<String>) -> Self {
        self.price = Some(price.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Whether this listing can take part in dedup at all.
    pub fn has_link(&self) -> bool {
        !self.link.is_empty()
    }

    /// Title for display, falling back to a placeholder.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unnamed item")
    }
}
