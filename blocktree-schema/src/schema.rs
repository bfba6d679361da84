use crate::{PropsValidator, SchemaValidationError, TypedProps};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Where a flavour may sit in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The single top-level block of a document. Never has a parent.
    Root,
    /// A structural container (note, surface, frame).
    Hub,
    /// A leaf-ish content block (paragraph, list, code).
    Content,
}

/// The JSON type a prop value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Bool,
    /// A string restricted to [`PropField::enum_options`].
    Enum,
    Array,
    Object,
    /// Any JSON value.
    Json,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::Text | FieldType::Enum => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Json => true,
        }
    }
}

/// One declared prop of a flavour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropField {
    pub name: String,
    pub field_type: FieldType,
    /// Value written when a block is created without this prop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_options: Option<Vec<String>>,
}

impl PropField {
    fn simple(name: &str, field_type: FieldType, default: Option<Value>) -> Self {
        Self {
            name: name.into(),
            field_type,
            default,
            nullable: false,
            enum_options: None,
        }
    }

    pub fn text(name: &str, default: &str) -> Self {
        Self::simple(name, FieldType::Text, Some(Value::from(default)))
    }

    pub fn number(name: &str, default: f64) -> Self {
        Self::simple(name, FieldType::Number, Some(Value::from(default)))
    }

    pub fn bool(name: &str, default: bool) -> Self {
        Self::simple(name, FieldType::Bool, Some(Value::Bool(default)))
    }

    pub fn json(name: &str) -> Self {
        Self::simple(name, FieldType::Json, None)
    }

    pub fn array(name: &str) -> Self {
        Self::simple(name, FieldType::Array, Some(Value::Array(Vec::new())))
    }

    pub fn object(name: &str) -> Self {
        Self::simple(name, FieldType::Object, Some(Value::Object(Map::new())))
    }

    /// A string field restricted to `options`; the first option is the
    /// default.
    pub fn enumeration(name: &str, options: &[&str]) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Enum,
            default: options.first().map(|o| Value::from(*o)),
            nullable: false,
            enum_options: Some(options.iter().map(|o| (*o).to_owned()).collect()),
        }
    }

    /// Allows `null` for this field.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub(crate) fn check(&self, flavour: &str, value: &Value) -> Result<(), SchemaValidationError> {
        if value.is_null() {
            if self.nullable {
                return Ok(());
            }
            return Err(SchemaValidationError::new(
                flavour,
                format!("prop `{}` may not be null", self.name),
            ));
        }
        if !self.field_type.accepts(value) {
            return Err(SchemaValidationError::new(
                flavour,
                format!("prop `{}` expects {:?}, got {value}", self.name, self.field_type),
            ));
        }
        if let (Some(options), Some(s)) = (&self.enum_options, value.as_str()) {
            if !options.iter().any(|o| o == s) {
                return Err(SchemaValidationError::new(
                    flavour,
                    format!("prop `{}` must be one of {options:?}, got {s:?}", self.name),
                ));
            }
        }
        Ok(())
    }
}

/// Declaration of one block flavour.
#[derive(Clone, Serialize, Deserialize)]
pub struct FlavourSchema {
    pub flavour: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub role: Role,
    /// Allowed parent flavours; `None` means any. Patterns: exact flavour,
    /// `*`, or a prefix such as `affine:*`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Vec<String>>,
    /// Allowed child flavours; `None` means any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
    #[serde(default)]
    pub props: Vec<PropField>,
    /// Whether blocks of this flavour carry a text payload.
    #[serde(default)]
    pub with_text: bool,
    #[serde(skip)]
    validator: Option<Arc<dyn PropsValidator>>,
}

fn default_version() -> u32 {
    1
}

impl fmt::Debug for FlavourSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlavourSchema")
            .field("flavour", &self.flavour)
            .field("role", &self.role)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("props", &self.props)
            .field("with_text", &self.with_text)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl FlavourSchema {
    pub fn new(flavour: &str, role: Role) -> Self {
        Self {
            flavour: flavour.into(),
            version: default_version(),
            role,
            parent: None,
            children: None,
            props: Vec::new(),
            with_text: false,
            validator: None,
        }
    }

    #[must_use]
    pub fn parents(mut self, patterns: &[&str]) -> Self {
        self.parent = Some(patterns.iter().map(|p| (*p).to_owned()).collect());
        self
    }

    #[must_use]
    pub fn children(mut self, patterns: &[&str]) -> Self {
        self.children = Some(patterns.iter().map(|p| (*p).to_owned()).collect());
        self
    }

    #[must_use]
    pub fn prop(mut self, field: PropField) -> Self {
        self.props.push(field);
        self
    }

    #[must_use]
    pub fn text(mut self) -> Self {
        self.with_text = true;
        self
    }

    /// Attaches a custom validator, run on the full prop map after the
    /// per-field checks.
    #[must_use]
    pub fn validator(mut self, validator: impl PropsValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Requires the full prop map to deserialize into `P`.
    #[must_use]
    pub fn typed_props<P: DeserializeOwned + 'static>(self) -> Self {
        self.validator(TypedProps::<P>::new())
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&PropField> {
        self.props.iter().find(|f| f.name == name)
    }

    /// Default values of every field that declares one.
    #[must_use]
    pub fn defaults(&self) -> Map<String, Value> {
        self.props
            .iter()
            .filter_map(|f| f.default.clone().map(|d| (f.name.clone(), d)))
            .collect()
    }

    /// Checks a complete prop map: no unknown keys, every value of the
    /// declared type, and the custom validator (if any) satisfied.
    pub fn validate_props(&self, props: &Map<String, Value>) -> Result<(), SchemaValidationError> {
        for (key, value) in props {
            let field = self.field(key).ok_or_else(|| {
                SchemaValidationError::new(&self.flavour, format!("unknown prop `{key}`"))
            })?;
            field.check(&self.flavour, value)?;
        }
        if let Some(validator) = &self.validator {
            validator
                .validate(props)
                .map_err(|message| SchemaValidationError::new(&self.flavour, message))?;
        }
        Ok(())
    }
}

/// Matches a flavour against a pattern list entry.
pub(crate) fn matches_pattern(pattern: &str, flavour: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => flavour.starts_with(prefix),
        None => pattern == flavour,
    }
}
