use serde::{Deserialize, Serialize};

use larder_core::{DomainError, DomainResult, IngredientId};

/// An ingredient from the catalog.
///
/// The unit is an opaque label at this layer (no conversion logic); the
/// engine only ever needs the ingredient's identity for existence checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: IngredientId,
    pub name: String,
    pub unit: String,
}

impl Ingredient {
    pub fn new(
        id: IngredientId,
        name: impl Into<String>,
        unit: impl Into<String>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("ingredient name cannot be empty"));
        }
        Ok(Self {
            id,
            name,
            unit: unit.into(),
        })
    }
}
