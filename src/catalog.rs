//! Validated collections of cargo lines and container templates.
//!
//! Both catalogs are copy-on-write: a snapshot taken before an edit keeps
//! seeing the old contents, so a running planning call never observes a
//! half-applied change.

use std::sync::Arc;

use crate::model::{
    BoxDimensions, CargoItem, ContainerTemplate, OrientationRule, StackingRules, ValidationError,
};
use crate::types::Dimensional;
use crate::units::Mass;

/// Partial update for a cargo line. `None` keeps the current value.
#[derive(Clone, Debug, Default)]
pub struct CargoItemPatch {
    pub name: Option<String>,
    pub dimensions: Option<BoxDimensions>,
    pub weight: Option<Mass>,
    pub quantity: Option<u32>,
    pub allowed_orientations: Option<Vec<OrientationRule>>,
    pub stacking: Option<StackingRules>,
    /// `Some(None)` clears the group.
    pub group_id: Option<Option<String>>,
}

impl CargoItemPatch {
    fn apply_to(self, item: &CargoItem) -> CargoItem {
        let mut updated = item.clone();
        if let Some(name) = self.name {
            updated.name = name;
        }
        if let Some(dimensions) = self.dimensions {
            updated.dimensions = dimensions;
        }
        if let Some(weight) = self.weight {
            updated.weight = weight;
        }
        if let Some(quantity) = self.quantity {
            updated.quantity = quantity;
        }
        if let Some(rules) = self.allowed_orientations {
            updated.allowed_orientations = rules.into_iter().collect();
            updated.allowed_orientations.insert(OrientationRule::AsGiven);
        }
        if let Some(stacking) = self.stacking {
            updated.stacking = stacking;
        }
        if let Some(group_id) = self.group_id {
            updated.group_id = group_id;
        }
        updated
    }
}

/// Ordered collection of cargo lines with unique ids.
#[derive(Clone, Debug, Default)]
pub struct CargoCatalog {
    items: Arc<Vec<CargoItem>>,
}

impl CargoCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog by adding every item in order.
    pub fn from_items(items: impl IntoIterator<Item = CargoItem>) -> Result<Self, ValidationError> {
        let mut catalog = Self::new();
        for item in items {
            catalog.add_item(item)?;
        }
        Ok(catalog)
    }

    /// Validates and appends a cargo line.
    pub fn add_item(&mut self, item: CargoItem) -> Result<&CargoItem, ValidationError> {
        item.validate()?;
        if self.position(&item.id).is_some() {
            return Err(ValidationError::DuplicateId(item.id));
        }
        let items = Arc::make_mut(&mut self.items);
        items.push(item);
        Ok(&items[items.len() - 1])
    }

    /// Removes a cargo line by id.
    pub fn remove_item(&mut self, id: &str) -> Result<CargoItem, ValidationError> {
        let index = self
            .position(id)
            .ok_or_else(|| ValidationError::UnknownItem(id.to_string()))?;
        Ok(Arc::make_mut(&mut self.items).remove(index))
    }

    /// Replaces a cargo line by id with the patched and re-validated version.
    pub fn update_item(
        &mut self,
        id: &str,
        patch: CargoItemPatch,
    ) -> Result<&CargoItem, ValidationError> {
        let index = self
            .position(id)
            .ok_or_else(|| ValidationError::UnknownItem(id.to_string()))?;
        let updated = patch.apply_to(&self.items[index]);
        updated.validate()?;
        let items = Arc::make_mut(&mut self.items);
        items[index] = updated;
        Ok(&items[index])
    }

    pub fn get(&self, id: &str) -> Option<&CargoItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn items(&self) -> &[CargoItem] {
        &self.items
    }

    /// Shared immutable view of the current contents.
    pub fn snapshot(&self) -> Arc<Vec<CargoItem>> {
        Arc::clone(&self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units over all lines.
    pub fn total_units(&self) -> u64 {
        self.items.iter().map(|item| item.quantity as u64).sum()
    }

    /// Volume of all units in mm³.
    pub fn total_volume(&self) -> f64 {
        self.items.iter().map(CargoItem::total_volume).sum()
    }

    /// Weight of all units in kg.
    pub fn total_weight(&self) -> f64 {
        self.items.iter().map(CargoItem::total_weight).sum()
    }

    /// Cheap pre-check: does some template have at least the catalog's volume?
    ///
    /// `false` proves that no single container instance can take everything.
    pub fn fits_by_volume<'a>(
        &self,
        templates: impl IntoIterator<Item = &'a ContainerTemplate>,
    ) -> bool {
        let required = self.total_volume();
        templates
            .into_iter()
            .any(|template| template.volume() >= required)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }
}

/// Ordered collection of container and truck templates with unique ids.
#[derive(Clone, Debug, Default)]
pub struct ContainerCatalog {
    templates: Arc<Vec<ContainerTemplate>>,
}

impl ContainerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates(
        templates: impl IntoIterator<Item = ContainerTemplate>,
    ) -> Result<Self, ValidationError> {
        let mut catalog = Self::new();
        for template in templates {
            catalog.add_template(template)?;
        }
        Ok(catalog)
    }

    pub fn add_template(
        &mut self,
        template: ContainerTemplate,
    ) -> Result<&ContainerTemplate, ValidationError> {
        template.validate()?;
        if self.get(&template.id).is_some() {
            return Err(ValidationError::DuplicateId(template.id));
        }
        let templates = Arc::make_mut(&mut self.templates);
        templates.push(template);
        Ok(&templates[templates.len() - 1])
    }

    pub fn remove_template(&mut self, id: &str) -> Result<ContainerTemplate, ValidationError> {
        let index = self
            .templates
            .iter()
            .position(|template| template.id == id)
            .ok_or_else(|| ValidationError::UnknownItem(id.to_string()))?;
        Ok(Arc::make_mut(&mut self.templates).remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&ContainerTemplate> {
        self.templates.iter().find(|template| template.id == id)
    }

    pub fn templates(&self) -> &[ContainerTemplate] {
        &self.templates
    }

    /// Templates eligible for planning, in catalog order.
    pub fn available(&self, include_coming_soon: bool) -> Vec<&ContainerTemplate> {
        eligible_templates(&self.templates, include_coming_soon)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Filters templates by availability, keeping their order. "Coming soon"
/// templates pass only when `include_coming_soon` is set.
pub fn eligible_templates(
    templates: &[ContainerTemplate],
    include_coming_soon: bool,
) -> Vec<&ContainerTemplate> {
    templates
        .iter()
        .filter(|template| include_coming_soon || template.availability)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContainerCategory;

    fn item(id: &str, quantity: u32) -> CargoItem {
        CargoItem::new(
            id,
            "Box",
            BoxDimensions::mm(1000.0, 500.0, 200.0).unwrap(),
            Mass::kg(20.0).unwrap(),
            quantity,
        )
        .unwrap()
    }

    fn template(id: &str, length: f64) -> ContainerTemplate {
        ContainerTemplate::new(
            id,
            id,
            ContainerCategory::Container,
            BoxDimensions::mm(length, 1000.0, 1000.0).unwrap(),
            Mass::kg(1000.0).unwrap(),
            10.0,
        )
        .unwrap()
    }

    #[test]
    fn aggregates_over_quantities() {
        let catalog = CargoCatalog::from_items([item("a", 2), item("b", 3)]).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.total_units(), 5);
        assert_eq!(catalog.total_volume(), 5.0 * 1000.0 * 500.0 * 200.0);
        assert_eq!(catalog.total_weight(), 100.0);
    }

    #[test]
    fn rejects_duplicates_and_invalid_items() {
        let mut catalog = CargoCatalog::new();
        catalog.add_item(item("a", 1)).unwrap();
        assert!(matches!(
            catalog.add_item(item("a", 4)),
            Err(ValidationError::DuplicateId(_))
        ));

        let mut broken = item("b", 1);
        broken.quantity = 0;
        assert!(catalog.add_item(broken).is_err());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn snapshots_do_not_see_later_edits() {
        let mut catalog = CargoCatalog::from_items([item("a", 2)]).unwrap();
        let before = catalog.snapshot();

        catalog
            .update_item(
                "a",
                CargoItemPatch {
                    quantity: Some(7),
                    ..CargoItemPatch::default()
                },
            )
            .unwrap();
        catalog.add_item(item("b", 1)).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].quantity, 2);
        assert_eq!(catalog.get("a").map(|i| i.quantity), Some(7));
    }

    #[test]
    fn update_revalidates_and_keeps_old_value_on_error() {
        let mut catalog = CargoCatalog::from_items([item("a", 2)]).unwrap();
        let result = catalog.update_item(
            "a",
            CargoItemPatch {
                stacking: Some(StackingRules {
                    stacking_disabled: true,
                    max_stack_mass: Some(Mass::kg(5.0).unwrap()),
                    ..StackingRules::default()
                }),
                ..CargoItemPatch::default()
            },
        );
        assert!(matches!(
            result,
            Err(ValidationError::ContradictoryStacking(_))
        ));
        assert_eq!(catalog.get("a"), Some(&item("a", 2)));
    }

    #[test]
    fn no_op_update_keeps_item_identical() {
        let original = item("a", 2).with_group("g1");
        let mut catalog = CargoCatalog::from_items([original.clone()]).unwrap();
        catalog
            .update_item("a", CargoItemPatch::default())
            .unwrap();
        assert_eq!(catalog.items(), &[original]);
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut catalog = CargoCatalog::new();
        assert!(matches!(
            catalog.remove_item("missing"),
            Err(ValidationError::UnknownItem(_))
        ));
        assert!(catalog
            .update_item("missing", CargoItemPatch::default())
            .is_err());
    }

    #[test]
    fn removes_by_id() {
        let mut catalog = CargoCatalog::from_items([item("a", 1), item("b", 1)]).unwrap();
        let removed = catalog.remove_item("a").unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(catalog.items().len(), 1);
        assert_eq!(catalog.items()[0].id, "b");
    }

    #[test]
    fn volume_precheck() {
        // 4 units of 0.1 m³ against 0.3 m³ and 0.5 m³ envelopes.
        let catalog = CargoCatalog::from_items([item("a", 4)]).unwrap();
        let small = template("small", 300.0);
        let large = template("large", 500.0);
        assert!(!catalog.fits_by_volume([&small]));
        assert!(catalog.fits_by_volume([&small, &large]));
    }

    #[test]
    fn container_catalog_filters_coming_soon() {
        let catalog = ContainerCatalog::from_templates([
            template("a", 1000.0),
            template("b", 2000.0).coming_soon(),
        ])
        .unwrap();
        let ids = |list: Vec<&ContainerTemplate>| {
            list.into_iter().map(|t| t.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(catalog.available(false)), vec!["a"]);
        assert_eq!(ids(catalog.available(true)), vec!["a", "b"]);

        // Manual entries may repeat a template id.
        let entries = vec![
            template("a", 1000.0),
            template("b", 2000.0).coming_soon(),
            template("a", 1000.0),
        ];
        assert_eq!(ids(eligible_templates(&entries, false)), vec!["a", "a"]);
        assert_eq!(ids(eligible_templates(&entries, true)).len(), 3);
    }

    #[test]
    fn container_catalog_validates_templates() {
        let mut catalog = ContainerCatalog::new();
        let mut invalid = template("x", 1000.0);
        invalid.max_payload.value = 0.0;
        assert!(catalog.add_template(invalid).is_err());
        catalog.add_template(template("x", 1000.0)).unwrap();
        assert!(catalog.add_template(template("x", 1200.0)).is_err());
        assert_eq!(catalog.remove_template("x").unwrap().id, "x");
        assert!(catalog.is_empty());
    }
}
