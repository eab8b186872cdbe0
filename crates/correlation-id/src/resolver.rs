//! Identifier resolution
//!
//! Decides which correlation ID a flow gets from the inbound header value:
//!
//! 1. No header (or an empty one): generate a fresh ID
//! 2. Header present but rejected by any validator: generate a fresh ID
//! 3. Otherwise: keep the header value
//!
//! The transformer runs on the chosen ID in every case.
//!
//! Generators, validators and transformers are single-method traits with
//! blanket implementations for closures, so either a type or a closure can
//! be plugged in.

use std::fmt;
use std::sync::Arc;

use uuid::{Uuid, Variant};

/// Produces fresh correlation IDs
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

/// Accepts or rejects an inbound header value
pub trait IdValidator: Send + Sync {
    fn validate(&self, value: &str) -> bool;
}

impl<F> IdValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn validate(&self, value: &str) -> bool {
        self(value)
    }
}

/// Rewrites the resolved ID before it is stored
pub trait IdTransformer: Send + Sync {
    fn transform(&self, id: String) -> String;
}

impl<F> IdTransformer for F
where
    F: Fn(String) -> String + Send + Sync,
{
    fn transform(&self, id: String) -> String {
        self(id)
    }
}

/// Default generator: a random v4 UUID as 32 lowercase hex characters
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidHexGenerator;

impl IdGenerator for UuidHexGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Default validator: see [`is_valid_uuid4`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Uuid4Validator;

impl IdValidator for Uuid4Validator {
    fn validate(&self, value: &str) -> bool {
        is_valid_uuid4(value)
    }
}

/// Check whether a string parses as an RFC 4122 version 4 UUID.
///
/// Hyphenated, simple (32 hex chars), braced and URN forms are accepted.
pub fn is_valid_uuid4(value: &str) -> bool {
    Uuid::parse_str(value)
        .map(|uuid| uuid.get_variant() == Variant::RFC4122 && uuid.get_version_num() == 4)
        .unwrap_or(false)
}

/// Where a resolved ID came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdSource {
    /// Taken from the inbound header
    Header,
    /// No usable header; generated
    Generated,
    /// Header failed validation; generated in its place
    Regenerated { rejected: String },
}

impl IdSource {
    /// Short lowercase label, for logs and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            IdSource::Header => "header",
            IdSource::Generated => "generated",
            IdSource::Regenerated { .. } => "regenerated",
        }
    }
}

/// Outcome of [`IdResolver::resolve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: String,
    pub source: IdSource,
}

impl Resolution {
    pub fn was_generated(&self) -> bool {
        !matches!(self.source, IdSource::Header)
    }

    pub fn was_rejected(&self) -> bool {
        matches!(self.source, IdSource::Regenerated { .. })
    }
}

/// Resolves inbound header values into correlation IDs
#[derive(Clone)]
pub struct IdResolver {
    generator: Arc<dyn IdGenerator>,
    validators: Vec<Arc<dyn IdValidator>>,
    transformer: Option<Arc<dyn IdTransformer>>,
}

impl IdResolver {
    /// Resolver with the default generator, UUID4 validation and no transformer
    pub fn new() -> Self {
        Self {
            generator: Arc::new(UuidHexGenerator),
            validators: vec![Arc::new(Uuid4Validator)],
            transformer: None,
        }
    }

    /// Replace the generator
    pub fn with_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    /// Replace the generator with a shared one
    pub fn with_shared_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Replace all validators with a single one
    pub fn with_validator(mut self, validator: impl IdValidator + 'static) -> Self {
        self.validators = vec![Arc::new(validator)];
        self
    }

    /// Add a validator; every validator must pass
    pub fn add_validator(mut self, validator: impl IdValidator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Accept any non-empty header value
    pub fn without_validation(mut self) -> Self {
        self.validators.clear();
        self
    }

    /// Set the transformer applied to every resolved ID
    pub fn with_transformer(mut self, transformer: impl IdTransformer + 'static) -> Self {
        self.transformer = Some(Arc::new(transformer));
        self
    }

    /// Generate a fresh ID with the configured generator (no transformer)
    pub fn generate(&self) -> String {
        self.generator.generate()
    }

    /// Shared handle to the configured generator
    pub fn generator(&self) -> Arc<dyn IdGenerator> {
        Arc::clone(&self.generator)
    }

    /// Number of configured validators
    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    /// Resolve an inbound header value into a correlation ID
    pub fn resolve(&self, header_value: Option<&str>) -> Resolution {
        let (id, source) = match header_value.filter(|value| !value.is_empty()) {
            None => (self.generator.generate(), IdSource::Generated),
            Some(value) if !self.is_valid(value) => (
                self.generator.generate(),
                IdSource::Regenerated {
                    rejected: value.to_string(),
                },
            ),
            Some(value) => (value.to_string(), IdSource::Header),
        };

        let id = match &self.transformer {
            Some(transformer) => transformer.transform(id),
            None => id,
        };

        Resolution { id, source }
    }

    fn is_valid(&self, value: &str) -> bool {
        self.validators.iter().all(|validator| validator.validate(value))
    }
}

impl Default for IdResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdResolver")
            .field("validators", &self.validators.len())
            .field("transformer", &self.transformer.is_some())
            .finish_non_exhaustive()
    }
}
