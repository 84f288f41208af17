//! Ingestion rows: the bulk CSV shape and its validated form.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use catalogerp_core::{DomainError, DomainResult, EntityId};

use crate::hierarchy::EntityKind;
use crate::normalize::CanonicalName;
use crate::product::Pricing;

/// Entity names (any level).
pub const MAX_NAME_LEN: usize = 200;

/// Product descriptions.
pub const MAX_DESCRIPTION_LEN: usize = 2000;

/// URLs / image paths.
pub const MAX_URL_LEN: usize = 2048;

/// Reference to a hierarchy entity from an input row: either an existing id or a
/// free-text name to resolve (find-or-create).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef {
    Id(EntityId),
    Name(String),
}

impl EntityRef {
    /// Interpret a cell: a UUID is an explicit id, anything else a name. Blank → `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<EntityId>() {
            Ok(id) => Some(EntityRef::Id(id)),
            Err(_) => Some(EntityRef::Name(trimmed.to_string())),
        }
    }

    pub fn name(raw: impl Into<String>) -> Self {
        EntityRef::Name(raw.into())
    }

    fn validate(&self, kind: EntityKind) -> DomainResult<()> {
        if let EntityRef::Name(name) = self {
            if CanonicalName::new(name).is_empty() {
                return Err(DomainError::validation(format!("{kind} name is empty")));
            }
            if name.chars().count() > MAX_NAME_LEN {
                return Err(DomainError::validation(format!(
                    "{kind} name is too long (max {MAX_NAME_LEN} chars)"
                )));
            }
        }
        Ok(())
    }
}

impl core::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntityRef::Id(id) => write!(f, "#{id}"),
            EntityRef::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// A validated product row, ready for resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRow {
    pub category: EntityRef,
    pub subcategory: Option<EntityRef>,
    pub manufacturer: EntityRef,
    pub brand: EntityRef,
    pub variant: EntityRef,
    pub pack_size: EntityRef,
    pub pack_type: EntityRef,
    pub pricing: Pricing,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub images: Vec<String>,
}

impl ProductRow {
    /// Row with the hierarchy fields set and everything else empty.
    pub fn new(
        category: EntityRef,
        manufacturer: EntityRef,
        brand: EntityRef,
        variant: EntityRef,
        pack_size: EntityRef,
        pack_type: EntityRef,
    ) -> Self {
        Self {
            category,
            subcategory: None,
            manufacturer,
            brand,
            variant,
            pack_size,
            pack_type,
            pricing: Pricing::default(),
            description: None,
            thumbnail: None,
            images: Vec::new(),
        }
    }

    pub fn with_subcategory(mut self, subcategory: EntityRef) -> Self {
        self.subcategory = Some(subcategory);
        self
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.category.validate(EntityKind::Category)?;
        if let Some(sub) = &self.subcategory {
            sub.validate(EntityKind::Subcategory)?;
        }
        self.manufacturer.validate(EntityKind::Manufacturer)?;
        self.brand.validate(EntityKind::Brand)?;
        self.variant.validate(EntityKind::Variant)?;
        self.pack_size.validate(EntityKind::PackSize)?;
        self.pack_type.validate(EntityKind::PackType)?;

        if let Some(d) = &self.description {
            if d.chars().count() > MAX_DESCRIPTION_LEN {
                return Err(DomainError::validation(format!(
                    "product_description is too long (max {MAX_DESCRIPTION_LEN} chars)"
                )));
            }
        }
        for url in self.thumbnail.iter().chain(self.images.iter()) {
            if url.len() > MAX_URL_LEN {
                return Err(DomainError::validation(format!(
                    "image url is too long (max {MAX_URL_LEN} chars)"
                )));
            }
        }
        Ok(())
    }
}

/// One record of a bulk CSV upload, as found in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvRow {
    #[serde(default)]
    pub major_category: String,
    #[serde(default)]
    pub sub_category: Option<String>,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub variant: String,
    #[serde(default)]
    pub pack_size: String,
    #[serde(default)]
    pub pack_type: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub discount: Option<String>,
    #[serde(default)]
    pub product_description: Option<String>,
    #[serde(default)]
    pub product_thumbnail: Option<String>,
    #[serde(default)]
    pub product_images: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(field: &str, value: &str) -> DomainResult<EntityRef> {
    EntityRef::parse(value).ok_or_else(|| DomainError::validation(format!("{field} is required")))
}

fn parse_amount(field: &str, value: &str) -> DomainResult<Decimal> {
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
    cleaned
        .parse::<Decimal>()
        .map_err(|_| DomainError::validation(format!("{field} '{value}' is not a number")))
}

impl TryFrom<CsvRow> for ProductRow {
    type Error = DomainError;

    fn try_from(raw: CsvRow) -> Result<Self, Self::Error> {
        let price = match non_blank(raw.price) {
            Some(p) => parse_amount("price", &p)?,
            None => Decimal::ZERO,
        };
        let discount = non_blank(raw.discount)
            .map(|d| parse_amount("discount", &d))
            .transpose()?;

        let images = non_blank(raw.product_images)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let row = ProductRow {
            category: required("major_category", &raw.major_category)?,
            subcategory: non_blank(raw.sub_category).and_then(|s| EntityRef::parse(&s)),
            manufacturer: required("manufacturer", &raw.manufacturer)?,
            brand: required("brand", &raw.brand)?,
            variant: required("variant", &raw.variant)?,
            pack_size: required("pack_size", &raw.pack_size)?,
            pack_type: required("pack_type", &raw.pack_type)?,
            pricing: Pricing::new(price, discount)?,
            description: non_blank(raw.product_description),
            thumbnail: non_blank(raw.product_thumbnail),
            images,
        };
        row.validate()?;
        Ok(row)
    }
}
