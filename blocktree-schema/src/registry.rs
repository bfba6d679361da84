use crate::schema::matches_pattern;
use crate::{FlavourSchema, Role, SchemaResult, SchemaValidationError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Registry of flavour schemas.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    flavours: BTreeMap<String, FlavourSchema>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a flavour. A flavour can only be registered once.
    pub fn register(&mut self, schema: FlavourSchema) -> SchemaResult<()> {
        if self.flavours.contains_key(&schema.flavour) {
            return Err(SchemaValidationError::new(
                &schema.flavour,
                "flavour is already registered",
            ));
        }
        self.flavours.insert(schema.flavour.clone(), schema);
        Ok(())
    }

    /// Builder form of [`Schema::register`].
    pub fn with(mut self, schema: FlavourSchema) -> SchemaResult<Self> {
        self.register(schema)?;
        Ok(self)
    }

    #[must_use]
    pub fn get(&self, flavour: &str) -> Option<&FlavourSchema> {
        self.flavours.get(flavour)
    }

    /// Like [`Schema::get`], failing for unknown flavours.
    pub fn require(&self, flavour: &str) -> SchemaResult<&FlavourSchema> {
        self.get(flavour)
            .ok_or_else(|| SchemaValidationError::new(flavour, "flavour is not registered"))
    }

    pub fn flavours(&self) -> impl Iterator<Item = &str> {
        self.flavours.keys().map(String::as_str)
    }

    #[must_use]
    pub fn role(&self, flavour: &str) -> Option<Role> {
        self.get(flavour).map(|s| s.role)
    }

    /// Validates a complete prop map for `flavour`.
    pub fn validate_props(&self, flavour: &str, props: &Map<String, Value>) -> SchemaResult<()> {
        self.require(flavour)?.validate_props(props)
    }

    /// Declared defaults overlaid with `props`.
    pub fn with_defaults(
        &self,
        flavour: &str,
        props: &Map<String, Value>,
    ) -> SchemaResult<Map<String, Value>> {
        let mut merged = self.require(flavour)?.defaults();
        merged.extend(props.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(merged)
    }

    /// Whether a `child` flavour may be placed under a `parent` flavour.
    #[must_use]
    pub fn is_valid(&self, child: &str, parent: &str) -> bool {
        let (Some(child_schema), Some(parent_schema)) = (self.get(child), self.get(parent)) else {
            return false;
        };
        self.check_pair(child_schema, parent_schema).is_ok()
    }

    /// Validates the position of a block: its role against its parent and
    /// the parent/children pattern lists in both directions.
    pub fn validate(
        &self,
        flavour: &str,
        parent: Option<&str>,
        children: &[&str],
    ) -> SchemaResult<()> {
        let schema = self.require(flavour)?;
        match (schema.role, parent) {
            (Role::Root, Some(parent)) => {
                return Err(SchemaValidationError::new(
                    flavour,
                    format!("root block cannot have parent: {parent}"),
                ));
            }
            (Role::Hub | Role::Content, None) => {
                return Err(SchemaValidationError::new(
                    flavour,
                    "hub and content blocks must have a parent",
                ));
            }
            (_, Some(parent)) => {
                let parent_schema = self.require(parent)?;
                self.check_pair(schema, parent_schema)?;
            }
            (Role::Root, None) => {}
        }
        for child in children {
            let child_schema = self.require(child)?;
            self.check_pair(child_schema, schema)?;
        }
        Ok(())
    }

    fn check_pair(&self, child: &FlavourSchema, parent: &FlavourSchema) -> SchemaResult<()> {
        let fail = |message: String| Err(SchemaValidationError::new(&child.flavour, message));
        match (child.role, parent.role) {
            (Role::Root, _) => {
                return fail(format!("root block cannot have parent: {}", parent.flavour));
            }
            (Role::Hub, Role::Content) => {
                return fail(format!(
                    "hub block cannot be child of content block: {}",
                    parent.flavour
                ));
            }
            (Role::Content, Role::Root) => {
                return fail(format!(
                    "content block can only be child of hub block or itself, got: {}",
                    parent.flavour
                ));
            }
            _ => {}
        }
        if let Some(allowed) = &child.parent {
            if !allowed.iter().any(|p| matches_pattern(p, &parent.flavour)) {
                return fail(format!("{} is not an allowed parent", parent.flavour));
            }
        }
        if let Some(allowed) = &parent.children {
            if !allowed.iter().any(|p| matches_pattern(p, &child.flavour)) {
                return fail(format!("{} does not accept this child", parent.flavour));
            }
        }
        Ok(())
    }
}
