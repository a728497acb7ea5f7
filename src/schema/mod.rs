//! Field specifications and resource schemas.
//!
//! A [`ResourceSchema`] is the static description of one resource kind: which
//! attributes exist, their types, and what a change to each of them costs
//! (nothing, an in-place update, or a full replacement). Schemas are built
//! once and collected into a [`SchemaRegistry`] that is passed around by
//! reference; nothing here is mutated after startup.

pub mod normalize;
mod value;

pub use normalize::{Normalizer, Validator};
pub use value::{Field, FieldMap, FieldType, FieldValue, FromFieldValue};

use crate::error::ReconcileError;
use std::collections::BTreeMap;

/// What a change to a field costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// A change forces the resource to be replaced.
    Immutable,
    /// A change is applied in place.
    Mutable,
    /// Never sent, only read back. Remote is authoritative.
    ComputedOnly,
}

/// Declaration of a single resource attribute.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub mutability: Mutability,
    pub default: Option<FieldValue>,
    pub validator: Option<Validator>,
    pub normalizer: Option<Normalizer>,
    /// One-way latch: once true remotely, going back to false forces a
    /// replacement.
    pub latch: bool,
    /// The API expects this field on every update, changed or not.
    pub always_send: bool,
}

impl FieldSpec {
    fn new(name: &'static str, field_type: FieldType, mutability: Mutability) -> Self {
        Self {
            name,
            field_type,
            mutability,
            default: None,
            validator: None,
            normalizer: None,
            latch: false,
            always_send: false,
        }
    }

    pub fn immutable(name: &'static str, field_type: FieldType) -> Self {
        Self::new(name, field_type, Mutability::Immutable)
    }

    pub fn mutable(name: &'static str, field_type: FieldType) -> Self {
        Self::new(name, field_type, Mutability::Mutable)
    }

    pub fn computed(name: &'static str, field_type: FieldType) -> Self {
        Self::new(name, field_type, Mutability::ComputedOnly)
    }

    pub fn with_default(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn validated(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn normalized(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Marks a bool field as a one-way latch.
    pub fn latch(mut self) -> Self {
        self.latch = true;
        self
    }

    pub fn always_send(mut self) -> Self {
        self.always_send = true;
        self
    }

    pub fn normalize(&self, value: FieldValue) -> FieldValue {
        match self.normalizer {
            Some(normalize) => normalize(value),
            None => value,
        }
    }

    /// Normalized default, if the field declares one.
    pub fn default_value(&self) -> Option<FieldValue> {
        self.default.clone().map(|v| self.normalize(v))
    }

    /// Normalizes a value and checks it against the declared type.
    fn check_type(&self, value: FieldValue) -> Result<FieldValue, ReconcileError> {
        let value = self.normalize(value);
        if value.field_type() != self.field_type {
            return Err(ReconcileError::validation(
                self.name,
                format!("expected {}, got {} {}", self.field_type, value.field_type(), value),
            ));
        }
        Ok(value)
    }

    /// Full desired-side check: type, then the declared validator.
    fn check_desired(&self, value: FieldValue) -> Result<FieldValue, ReconcileError> {
        let value = self.check_type(value)?;
        if let Some(validate) = self.validator {
            validate(&value).map_err(|message| ReconcileError::validation(self.name, message))?;
        }
        Ok(value)
    }
}

/// Static description of one resource kind.
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    kind: &'static str,
    fields: Vec<FieldSpec>,
    canonicalize: Option<fn(&mut FieldMap)>,
}

impl ResourceSchema {
    /// Builds a schema from its field table.
    ///
    /// # Panics
    ///
    /// If a field name is declared twice or a latch is put on a non-bool
    /// field. Schemas are static tables, so either is a programming error.
    pub fn new(kind: &'static str, fields: Vec<FieldSpec>) -> Self {
        for (i, spec) in fields.iter().enumerate() {
            assert!(
                spec.field_type == FieldType::Bool || !spec.latch,
                "{}: latch on non-bool field '{}'",
                kind,
                spec.name
            );
            assert!(
                fields[..i].iter().all(|other| other.name != spec.name),
                "{}: field '{}' declared twice",
                kind,
                spec.name
            );
        }
        Self {
            kind,
            fields,
            canonicalize: None,
        }
    }

    /// Installs a resource-level rewrite applied to both desired and remote
    /// state after per-field normalization. Used for aliases that span more
    /// than one field.
    pub fn with_canonicalizer(mut self, canonicalize: fn(&mut FieldMap)) -> Self {
        self.canonicalize = Some(canonicalize);
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validates desired state and fills in defaults.
    ///
    /// The result holds every managed field in canonical form. Fields with
    /// neither a configured value nor a default are left out and never
    /// compared.
    pub fn resolve_desired(&self, desired: &FieldMap) -> Result<FieldMap, ReconcileError> {
        for name in desired.names() {
            let Some(spec) = self.field(name) else {
                return Err(ReconcileError::UnknownField {
                    kind: self.kind.to_string(),
                    field: name.to_string(),
                });
            };
            if spec.mutability == Mutability::ComputedOnly {
                return Err(ReconcileError::validation(
                    name,
                    "field is computed by the API and cannot be configured",
                ));
            }
        }

        let mut resolved = FieldMap::new();
        for spec in &self.fields {
            let value = match desired.get(spec.name) {
                Some(v) => Some(spec.check_desired(v.clone())?),
                None => spec.default_value(),
            };
            if let Some(value) = value {
                resolved.insert(spec.name, value);
            }
        }
        if let Some(canonicalize) = self.canonicalize {
            canonicalize(&mut resolved);
        }
        Ok(resolved)
    }

    /// Validates remote state. Undeclared attributes are dropped, declared
    /// ones must carry the declared type once normalized.
    pub fn resolve_remote(&self, remote: &FieldMap) -> Result<FieldMap, ReconcileError> {
        let mut resolved = FieldMap::new();
        for spec in &self.fields {
            if let Some(v) = remote.get(spec.name) {
                resolved.insert(spec.name, spec.check_type(v.clone())?);
            }
        }
        if let Some(canonicalize) = self.canonicalize {
            canonicalize(&mut resolved);
        }
        Ok(resolved)
    }
}

/// Immutable table of every resource kind known to the process.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<&'static str, ResourceSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a schema while the registry is being built.
    pub fn register(mut self, schema: ResourceSchema) -> Self {
        self.schemas.insert(schema.kind(), schema);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&ResourceSchema> {
        self.schemas.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.schemas.keys().copied()
    }
}
