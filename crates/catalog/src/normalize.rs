//! Name canonicalization.
//!
//! Three forms of every free-text name are used across the catalog:
//!
//! - the **comparison key** ([`normalize`]): two names are "the same" iff their keys match
//! - the **display name** ([`sanitize_display`]): the title-cased form that gets stored
//! - the **code token** ([`code_token`]): the uppercase, hyphenated fragment used in SKUs
//!
//! All functions are pure and total; empty input yields empty output.

use catalogerp_core::ValueObject;

/// Comparison key: trim, lowercase, collapse internal whitespace runs to one space.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in name.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

/// Display form: trim, collapse whitespace, title-case each word.
pub fn sanitize_display(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in name.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.extend(chars.flat_map(char::to_lowercase));
        }
    }
    out
}

/// SKU fragment: uppercase `[A-Z0-9]` runs joined by single hyphens.
pub fn code_token(name: &str) -> String {
    join_alphanumeric_runs(name, '-', |c| c.to_ascii_uppercase())
}

/// URL slug used by categories and subcategories (`"Soft Drinks"` → `"soft-drinks"`).
pub fn slugify(name: &str) -> String {
    join_alphanumeric_runs(name, '-', |c| c.to_ascii_lowercase())
}

fn join_alphanumeric_runs(input: &str, sep: char, map: impl Fn(char) -> char) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_sep = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push(sep);
            }
            pending_sep = false;
            out.push(map(ch));
        } else {
            pending_sep = true;
        }
    }
    out
}

/// A raw name resolved into its stored display form and its comparison key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalName {
    display: String,
    key: String,
}

impl ValueObject for CanonicalName {}

impl CanonicalName {
    pub fn new(raw: &str) -> Self {
        let display = sanitize_display(raw);
        let key = normalize(&display);
        Self { display, key }
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Whether an already-stored name denotes the same thing.
    pub fn matches(&self, stored_name: &str) -> bool {
        normalize(stored_name) == self.key
    }

    pub fn into_display(self) -> String {
        self.display
    }
}
