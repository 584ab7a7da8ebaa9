//! Internal spending categories and the provider category mapper.
//!
//! The aggregation provider attaches its own category taxonomy to each
//! transaction (an ordered list of strings, most general first). This module
//! maps that taxonomy onto the fixed set of internal categories used by
//! budgets and card reward tables. Mapping is a pure function: every input
//! resolves to exactly one internal category, falling back to
//! [Category::Other] when nothing matches.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// MODELS
// ============================================================================

/// The internal spending categories that budgets and reward tables key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Restaurants, bars, cafes and takeaways.
    #[serde(rename = "Food & Dining")]
    Dining,
    /// Supermarkets and grocery stores.
    #[serde(rename = "Groceries")]
    Groceries,
    /// General retail, clothing and online shopping.
    #[serde(rename = "Shopping")]
    Shopping,
    /// Fuel, public transport, ride shares and parking.
    #[serde(rename = "Transportation")]
    Transportation,
    /// Flights, accommodation and other travel spending.
    #[serde(rename = "Travel")]
    Travel,
    /// Movies, streaming, events and recreation.
    #[serde(rename = "Entertainment")]
    Entertainment,
    /// Utilities, phone, internet and other recurring bills.
    #[serde(rename = "Bills & Utilities")]
    BillsUtilities,
    /// Medical, pharmacy and fitness spending.
    #[serde(rename = "Health & Fitness")]
    Health,
    /// Transfers between accounts and card repayments.
    #[serde(rename = "Transfer")]
    Transfer,
    /// Salary, interest and other money coming in.
    #[serde(rename = "Income")]
    Income,
    /// Bank fees, ATM fees and service charges.
    #[serde(rename = "Fees & Charges")]
    Fees,
    /// Anything that could not be classified.
    #[serde(rename = "Other")]
    Other,
}

impl Category {
    /// The human-readable name, which is also how the category is stored in
    /// the database and serialized over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Dining => "Food & Dining",
            Category::Groceries => "Groceries",
            Category::Shopping => "Shopping",
            Category::Transportation => "Transportation",
            Category::Travel => "Travel",
            Category::Entertainment => "Entertainment",
            Category::BillsUtilities => "Bills & Utilities",
            Category::Health => "Health & Fitness",
            Category::Transfer => "Transfer",
            Category::Income => "Income",
            Category::Fees => "Fees & Charges",
            Category::Other => "Other",
        }
    }

    /// Parse a category from its human-readable name.
    ///
    /// Returns `None` for unrecognised names so callers can pick their own
    /// fallback.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Food & Dining" => Some(Category::Dining),
            "Groceries" => Some(Category::Groceries),
            "Shopping" => Some(Category::Shopping),
            "Transportation" => Some(Category::Transportation),
            "Travel" => Some(Category::Travel),
            "Entertainment" => Some(Category::Entertainment),
            "Bills & Utilities" => Some(Category::BillsUtilities),
            "Health & Fitness" => Some(Category::Health),
            "Transfer" => Some(Category::Transfer),
            "Income" => Some(Category::Income),
            "Fees & Charges" => Some(Category::Fees),
            "Other" => Some(Category::Other),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of mapping a provider category list to an internal category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryMatch {
    /// The internal category the provider taxonomy resolved to.
    pub category: Category,
    /// How confident the mapper is in the match, from 0.0 to 1.0.
    pub confidence: f64,
}

// ============================================================================
// MAPPING TABLE
// ============================================================================

/// The ordered lookup table from provider category fragments to internal
/// categories. Fragments are matched case-insensitively as substrings of the
/// primary provider category; the first matching row wins, so more specific
/// fragments must come before more general ones.
const MAPPING_TABLE: &[(&str, Category, f64)] = &[
    ("credit card payment", Category::Transfer, 0.95),
    ("fast food", Category::Dining, 0.95),
    ("restaurants", Category::Dining, 0.95),
    ("food and drink", Category::Dining, 0.9),
    ("coffee", Category::Dining, 0.85),
    ("supermarkets", Category::Groceries, 0.95),
    ("groceries", Category::Groceries, 0.95),
    ("gas stations", Category::Transportation, 0.9),
    ("taxi", Category::Transportation, 0.9),
    ("ride share", Category::Transportation, 0.9),
    ("parking", Category::Transportation, 0.85),
    ("public transportation", Category::Transportation, 0.9),
    ("airlines", Category::Travel, 0.95),
    ("lodging", Category::Travel, 0.9),
    ("travel", Category::Travel, 0.85),
    ("entertainment", Category::Entertainment, 0.95),
    ("recreation", Category::Entertainment, 0.8),
    ("clothing", Category::Shopping, 0.9),
    ("department stores", Category::Shopping, 0.9),
    ("shops", Category::Shopping, 0.85),
    ("utilities", Category::BillsUtilities, 0.95),
    ("telecommunication", Category::BillsUtilities, 0.85),
    ("subscription", Category::BillsUtilities, 0.8),
    ("pharmacies", Category::Health, 0.9),
    ("healthcare", Category::Health, 0.9),
    ("gyms and fitness", Category::Health, 0.85),
    ("transfer", Category::Transfer, 0.95),
    ("payroll", Category::Income, 0.95),
    ("deposit", Category::Income, 0.9),
    ("interest earned", Category::Income, 0.85),
    ("bank fees", Category::Fees, 0.95),
    ("atm", Category::Fees, 0.8),
];

/// Keyword heuristics applied when no table row matches the primary
/// provider category.
const KEYWORD_FALLBACKS: &[(&[&str], Category)] = &[
    (&["food", "restaurant"], Category::Dining),
    (&["gas", "transport"], Category::Transportation),
    (&["shop", "retail"], Category::Shopping),
    (&["transfer", "payment"], Category::Transfer),
    (&["deposit", "income"], Category::Income),
];

/// The confidence assigned to keyword-heuristic matches.
const KEYWORD_CONFIDENCE: f64 = 0.5;

/// The confidence assigned when nothing matched and the mapper fell back to
/// [Category::Other].
const FALLBACK_CONFIDENCE: f64 = 0.1;

/// Map an ordered provider category list to an internal category.
///
/// The first entry is treated as the primary category. Matching works in
/// three stages: the ordered fragment table, then keyword heuristics, then
/// [Category::Other]. This function is total: any input, including an empty
/// list, resolves to a category.
pub fn map_provider_categories(provider_categories: &[String]) -> CategoryMatch {
    let primary = match provider_categories.first() {
        Some(primary) => primary.trim().to_lowercase(),
        None => return other(),
    };

    if primary.is_empty() {
        return other();
    }

    for (fragment, category, confidence) in MAPPING_TABLE {
        if primary.contains(fragment) {
            return CategoryMatch {
                category: *category,
                confidence: *confidence,
            };
        }
    }

    for (keywords, category) in KEYWORD_FALLBACKS {
        if keywords.iter().any(|keyword| primary.contains(keyword)) {
            return CategoryMatch {
                category: *category,
                confidence: KEYWORD_CONFIDENCE,
            };
        }
    }

    other()
}

fn other() -> CategoryMatch {
    CategoryMatch {
        category: Category::Other,
        confidence: FALLBACK_CONFIDENCE,
    }
}

// ============================================================================
// TESTS
// ============================================================================
