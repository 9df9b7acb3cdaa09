//! Data model for the secret access core.
//!
//! [`SecretReference`] is the cache/registration key. [`AccessCredential`] is
//! a genuine sum type — no reflective payload check, the compiler enforces
//! method/payload agreement for the ergonomic constructors, and
//! [`AccessCredential::new`] keeps a structural check for call sites that
//! build the method and payload separately.

use crate::error::ValidationError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;
use zeroize::Zeroizing;

/// A family of backing secret stores. Carries no behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreType {
    /// AWS Secrets Manager.
    AwsSecretsManager,
    /// A CyberArk-style enterprise vault.
    CyberArk,
}

/// Version hint carrying rollover semantics.
pub const VERSION_HINT_ACTIVE: &str = "active";
/// Version hint carrying rollover semantics.
pub const VERSION_HINT_INACTIVE: &str = "inactive";
/// The default version hint when none is given.
pub const VERSION_HINT_LATEST: &str = "latest";

/// Immutable triple `(store_type, name, version_hint)` — the cache and
/// registration key.
///
/// `version_hint` defaults to `"latest"`. The strings `"active"` and
/// `"inactive"` (case-insensitive) carry additional semantics for rollover
/// detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretReference {
    store_type: StoreType,
    name: String,
    version_hint: String,
}

impl SecretReference {
    /// Build a reference with the default `"latest"` version hint.
    pub fn new(store_type: StoreType, name: impl Into<String>) -> Result<Self, ValidationError> {
        Self::with_version_hint(store_type, name, VERSION_HINT_LATEST)
    }

    /// Build a reference with an explicit version hint.
    pub fn with_version_hint(
        store_type: StoreType,
        name: impl Into<String>,
        version_hint: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::new("SecretReference.name must not be empty"));
        }
        let version_hint = version_hint.into();
        if version_hint.is_empty() {
            return Err(ValidationError::new(
                "SecretReference.version_hint must not be empty",
            ));
        }
        Ok(Self {
            store_type,
            name,
            version_hint,
        })
    }

    /// The store family this reference targets.
    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    /// The store-local secret name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version hint (`"latest"`, `"active"`, `"inactive"`, or a
    /// backend-specific value).
    pub fn version_hint(&self) -> &str {
        &self.version_hint
    }

    /// True iff this reference's version hint is `"active"` (case-insensitive).
    pub fn is_active_hint(&self) -> bool {
        self.version_hint.eq_ignore_ascii_case(VERSION_HINT_ACTIVE)
    }

    /// The sibling reference with the same `(store_type, name)` and the given
    /// version hint. Used by rollover detection to find the paired
    /// `"inactive"` reference for an `"active"` one.
    pub fn sibling(&self, version_hint: impl Into<String>) -> Self {
        Self {
            store_type: self.store_type,
            name: self.name.clone(),
            version_hint: version_hint.into(),
        }
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}@{}", self.store_type, self.name, self.version_hint)
    }
}

/// An authentication scheme used to reach a backing store.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialMethod {
    /// A CyberArk API key.
    CyberArkApiKey,
    /// An AWS IAM role assumed via STS.
    IamRole,
}

/// A string that is never printed in diagnostic output.
#[derive(Clone, PartialEq, Eq)]
struct Redacted(String);

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// The payload half of an [`AccessCredential`], before it has been checked
/// against a [`CredentialMethod`].
///
/// This exists so [`AccessCredential::new`] can build method and payload
/// independently (e.g. from user configuration) and validate the pairing,
/// rather than only exposing the already-type-correct
/// `cyber_ark_api_key`/`iam_role` constructors.
#[derive(Clone)]
pub enum CredentialPayload {
    /// An opaque API key string.
    ApiKey(String),
    /// An STS AssumeRole configuration.
    StsConfig(STSAssumeRoleConfig),
}

impl fmt::Debug for CredentialPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.debug_tuple("ApiKey").field(&"[REDACTED]").finish(),
            Self::StsConfig(config) => f.debug_tuple("StsConfig").field(config).finish(),
        }
    }
}

/// An immutable pair `(method, payload)` used to authenticate to a store.
///
/// The payload shape is constrained by the method: `CyberArkApiKey` carries
/// a non-empty opaque string, `IamRole` carries an [`STSAssumeRoleConfig`].
/// There is deliberately no variant pairing `IamRole` with a bare string;
/// that loose form is never a valid credential.
#[derive(Debug, Clone)]
pub enum AccessCredential {
    /// A CyberArk API key.
    CyberArkApiKey(Redacted),
    /// An AWS IAM role assumed via STS.
    IamRole(STSAssumeRoleConfig),
}

impl AccessCredential {
    /// Build a credential from a method and an untyped payload, rejecting
    /// any mismatch between the two.
    pub fn new(
        method: CredentialMethod,
        payload: CredentialPayload,
    ) -> Result<Self, ValidationError> {
        match (method, payload) {
            (CredentialMethod::CyberArkApiKey, CredentialPayload::ApiKey(key)) => {
                Self::cyber_ark_api_key(key)
            }
            (CredentialMethod::CyberArkApiKey, CredentialPayload::StsConfig(_)) => {
                Err(ValidationError::new(
                    "CredentialMethod::CyberArkApiKey requires an API key payload",
                ))
            }
            (CredentialMethod::IamRole, CredentialPayload::StsConfig(config)) => {
                Ok(Self::iam_role(config))
            }
            (CredentialMethod::IamRole, CredentialPayload::ApiKey(_)) => Err(ValidationError::new(
                "CredentialMethod::IamRole requires an STS AssumeRole config, not a bare string",
            )),
        }
    }

    /// Build a CyberArk API key credential. Rejects an empty key.
    pub fn cyber_ark_api_key(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::new(
                "CyberArk API key payload must not be empty",
            ));
        }
        Ok(Self::CyberArkApiKey(Redacted(key)))
    }

    /// Build an IAM role credential from an STS AssumeRole config.
    pub fn iam_role(config: STSAssumeRoleConfig) -> Self {
        Self::IamRole(config)
    }

    /// The authentication method this credential uses.
    pub fn method(&self) -> CredentialMethod {
        match self {
            AccessCredential::CyberArkApiKey(_) => CredentialMethod::CyberArkApiKey,
            AccessCredential::IamRole(_) => CredentialMethod::IamRole,
        }
    }

    /// Scoped exposure of a CyberArk API key. `None` for other methods.
    pub fn with_api_key<R>(&self, f: impl FnOnce(&str) -> R) -> Option<R> {
        match self {
            AccessCredential::CyberArkApiKey(key) => Some(f(&key.0)),
            AccessCredential::IamRole(_) => None,
        }
    }

    /// The STS AssumeRole config. `None` for other methods.
    pub fn sts_config(&self) -> Option<&STSAssumeRoleConfig> {
        match self {
            AccessCredential::IamRole(config) => Some(config),
            AccessCredential::CyberArkApiKey(_) => None,
        }
    }
}

/// STS AssumeRole configuration for the `IamRole` credential method.
///
/// `external_id` is redacted in any diagnostic form.
#[derive(Clone)]
pub struct STSAssumeRoleConfig {
    role_arn: String,
    session_name: String,
    duration_seconds: u32,
    external_id: Option<Redacted>,
}

impl STSAssumeRoleConfig {
    /// The default session name used when none is given.
    pub const DEFAULT_SESSION_NAME: &'static str = "SecretAccessSession";
    /// The default assume-role duration, in seconds.
    pub const DEFAULT_DURATION_SECONDS: u32 = 900;

    /// Build a new config for the given role ARN, with default session name
    /// and duration. Rejects an empty ARN.
    pub fn new(role_arn: impl Into<String>) -> Result<Self, ValidationError> {
        let role_arn = role_arn.into();
        if role_arn.is_empty() {
            return Err(ValidationError::new(
                "STSAssumeRoleConfig.role_arn must not be empty",
            ));
        }
        Ok(Self {
            role_arn,
            session_name: Self::DEFAULT_SESSION_NAME.to_string(),
            duration_seconds: Self::DEFAULT_DURATION_SECONDS,
            external_id: None,
        })
    }

    /// Override the session name.
    pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = session_name.into();
        self
    }

    /// Override the assume-role duration, in seconds.
    pub fn with_duration_seconds(mut self, duration_seconds: u32) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }

    /// Attach an external ID.
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(Redacted(external_id.into()));
        self
    }

    /// The role ARN to assume.
    pub fn role_arn(&self) -> &str {
        &self.role_arn
    }

    /// The STS session name.
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// The assume-role duration, in seconds.
    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    /// Scoped exposure of the external ID, if one is set.
    pub fn with_external_id_bytes<R>(&self, f: impl FnOnce(&str) -> R) -> Option<R> {
        self.external_id.as_ref().map(|r| f(&r.0))
    }
}

impl fmt::Debug for STSAssumeRoleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("STSAssumeRoleConfig")
            .field("role_arn", &self.role_arn)
            .field("session_name", &self.session_name)
            .field("duration_seconds", &self.duration_seconds)
            .field("external_id", &self.external_id)
            .finish()
    }
}

/// `(version, last_retrieved, store_type, source_ref)`.
///
/// Equality and hash ignore `last_retrieved`.
#[derive(Debug, Clone)]
pub struct SecretMetadata {
    version: String,
    last_retrieved: SystemTime,
    store_type: StoreType,
    source_ref: SecretReference,
}

impl SecretMetadata {
    /// Build new metadata, stamping `last_retrieved` as now.
    pub fn new(version: impl Into<String>, store_type: StoreType, source_ref: SecretReference) -> Self {
        Self {
            version: version.into(),
            last_retrieved: SystemTime::now(),
            store_type,
            source_ref,
        }
    }

    /// The opaque store-assigned version identifier.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// When this secret was last retrieved from the store.
    pub fn last_retrieved(&self) -> SystemTime {
        self.last_retrieved
    }

    /// The store family this secret came from.
    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    /// The reference this metadata was fetched for.
    pub fn source_ref(&self) -> &SecretReference {
        &self.source_ref
    }

    /// A copy of this metadata with `last_retrieved` bumped to now.
    pub fn with_updated_timestamp(&self) -> Self {
        Self {
            last_retrieved: SystemTime::now(),
            ..self.clone()
        }
    }

    /// A copy of this metadata with a new version and `last_retrieved`
    /// bumped to now.
    pub fn with_new_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            last_retrieved: SystemTime::now(),
            ..self.clone()
        }
    }
}

impl PartialEq for SecretMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.store_type == other.store_type
            && self.source_ref == other.source_ref
    }
}
impl Eq for SecretMetadata {}
impl Hash for SecretMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
        self.store_type.hash(state);
        self.source_ref.hash(state);
    }
}

/// A zero-able, non-clonable secret byte buffer.
///
/// Memory is zeroed on drop. The only way to read the bytes is through
/// [`SecretBuffer::with_bytes`] (scoped exposure, never a raw accessor).
pub struct SecretBuffer(Zeroizing<Vec<u8>>);

impl SecretBuffer {
    /// Wrap raw bytes. The input vector is moved, not copied.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Scoped exposure of the buffer's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.0)
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True iff the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A defensive copy with its own backing allocation — mutating or
    /// clearing one does not affect the other.
    pub fn defensive_copy(&self) -> Self {
        Self::new(self.0.to_vec())
    }

    /// Overwrite the buffer with a fixed non-secret byte.
    pub fn clear(&mut self) {
        for b in self.0.iter_mut() {
            *b = b'0';
        }
    }

    fn bytes_eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// A stable unique identifier for a [`Secret`]. Never reused across fetches
/// that produce semantically different values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecretId(uuid::Uuid);

impl SecretId {
    /// Mint a fresh, random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SecretId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved secret entity: `(id, name, value, metadata)`.
///
/// Equality and hash are by `id` only. The `Debug` form includes id, name,
/// and metadata but never the value.
pub struct Secret {
    id: SecretId,
    name: String,
    value: SecretBuffer,
    metadata: SecretMetadata,
}

impl Secret {
    /// Mint a new secret with a freshly generated id.
    ///
    /// Providers call this (not a public setter) when producing a freshly
    /// fetched value — a new [`SecretId`] per call is what keeps "never
    /// reused across fetches that produce semantically different values"
    /// true without the core having to compare values itself.
    pub fn new(name: impl Into<String>, value: Vec<u8>, metadata: SecretMetadata) -> Self {
        Self {
            id: SecretId::new(),
            name: name.into(),
            value: SecretBuffer::new(value),
            metadata,
        }
    }

    /// The secret's stable identifier.
    pub fn id(&self) -> SecretId {
        self.id
    }

    /// The store-local secret name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This secret's metadata.
    pub fn metadata(&self) -> &SecretMetadata {
        &self.metadata
    }

    /// Scoped exposure of the secret's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.value.with_bytes(f)
    }

    /// Overwrite the buffer with a fixed non-secret byte.
    pub fn clear_value(&mut self) {
        self.value.clear();
    }

    /// Wrap this secret in a [`ScopedSecret`] that guarantees `clear_value`
    /// runs on every exit path (including panics) from the caller's region.
    pub fn into_scoped(self) -> ScopedSecret {
        ScopedSecret(Some(self))
    }

    /// An independent copy: same id, name, and metadata, but a freshly
    /// allocated value buffer. Clearing one copy's buffer never affects the
    /// other's.
    pub fn defensive_copy(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            value: self.value.defensive_copy(),
            metadata: self.metadata.clone(),
        }
    }

    pub(crate) fn value_bytes_eq(&self, other: &Self) -> bool {
        self.value.bytes_eq(&other.value)
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Secret {}
impl Hash for Secret {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Guarantees [`Secret::clear_value`] runs on every exit path from a
/// caller-defined region, including panics, by riding `Drop` instead of a
/// try/finally block.
pub struct ScopedSecret(Option<Secret>);

impl ScopedSecret {
    /// The wrapped secret. Panics if called after the wrapper was dropped,
    /// which cannot happen through safe usage since `Drop` consumes `self`.
    pub fn secret(&self) -> &Secret {
        self.0.as_ref().expect("ScopedSecret used after being dropped")
    }

    /// Scoped exposure of the secret's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.secret().with_bytes(f)
    }
}

impl Drop for ScopedSecret {
    fn drop(&mut self) {
        if let Some(mut secret) = self.0.take() {
            secret.clear_value();
        }
    }
}
