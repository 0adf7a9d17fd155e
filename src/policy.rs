//! Policies for field classification and key management

use crate::key::KeyPurpose;

/// Default rotation cycle for new keys
pub const DEFAULT_ROTATION_CYCLE_DAYS: i64 = 90;

/// Default size of the secret used to derive per-tenant search salts
pub const SEARCH_SALT_SECRET_SIZE: usize = 32;

/// How a per-field failure inside a record-level operation is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Keep the field's pre-operation value and attach a warning to the
    /// result. Trades confidentiality for availability: an encryption
    /// failure leaves plaintext in place.
    FailOpen,

    /// Propagate the first per-field error to the caller.
    FailClosed,
}

/// One entry of the field-name-to-purpose classification table
#[derive(Debug, Clone)]
pub struct PurposeRule {
    /// Substring matched against the lowercased field name
    pub pattern: &'static str,

    /// Purpose assigned when the pattern matches
    pub purpose: KeyPurpose,
}

/// Default classification table. Longest matching pattern wins; ties go to
/// the earlier entry. Field names matching no pattern fall back to
/// `KeyPurpose::UserData`.
pub const DEFAULT_PURPOSE_RULES: &[PurposeRule] = &[
    PurposeRule { pattern: "email", purpose: KeyPurpose::PersonalInfo },
    PurposeRule { pattern: "ssn", purpose: KeyPurpose::PersonalInfo },
    PurposeRule { pattern: "address", purpose: KeyPurpose::PersonalInfo },
    PurposeRule { pattern: "phone", purpose: KeyPurpose::PersonalInfo },
    PurposeRule { pattern: "birth", purpose: KeyPurpose::PersonalInfo },
    PurposeRule { pattern: "name", purpose: KeyPurpose::PersonalInfo },
    PurposeRule { pattern: "card", purpose: KeyPurpose::PaymentInfo },
    PurposeRule { pattern: "bank", purpose: KeyPurpose::PaymentInfo },
    PurposeRule { pattern: "iban", purpose: KeyPurpose::PaymentInfo },
    PurposeRule { pattern: "account_number", purpose: KeyPurpose::PaymentInfo },
    PurposeRule { pattern: "secret", purpose: KeyPurpose::SystemConfig },
    PurposeRule { pattern: "api_key", purpose: KeyPurpose::SystemConfig },
];

/// Policy for field-level cipher operations
#[derive(Debug, Clone)]
pub struct CipherPolicy {
    /// Ordered classification table mapping field names to key purposes
    pub purpose_rules: Vec<PurposeRule>,

    /// Per-field failure handling for record-level operations
    pub failure_mode: FailureMode,

    /// Whether `create_searchable_encryption` emits substring search tokens.
    ///
    /// Tokens leak n-gram frequency and value length and are therefore
    /// opt-in, never default.
    pub enable_search_tokens: bool,

    /// Secret used to derive per-tenant search salts.
    ///
    /// Defaults to fresh random bytes per policy instance, so search
    /// hashes only line up across independently built ciphers or process
    /// restarts when a stable secret is supplied through
    /// [`CipherPolicy::with_search_salt_secret`].
    pub search_salt_secret: Vec<u8>,
}

impl Default for CipherPolicy {
    fn default() -> Self {
        Self {
            purpose_rules: DEFAULT_PURPOSE_RULES.to_vec(),
            failure_mode: FailureMode::FailOpen,
            enable_search_tokens: false,
            search_salt_secret: crate::util::get_rand_bytes(SEARCH_SALT_SECRET_SIZE),
        }
    }
}

impl CipherPolicy {
    /// Creates a new policy with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-field failure handling mode
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Enables substring search token generation
    pub fn with_search_tokens(mut self) -> Self {
        self.enable_search_tokens = true;
        self
    }

    /// Sets the secret used to derive per-tenant search salts
    ///
    /// Deployments that need search hashes to survive process restarts must
    /// provide a stable secret here.
    pub fn with_search_salt_secret(mut self, secret: Vec<u8>) -> Self {
        self.search_salt_secret = secret;
        self
    }

    /// Replaces the field classification table
    pub fn with_purpose_rules(mut self, rules: Vec<PurposeRule>) -> Self {
        self.purpose_rules = rules;
        self
    }

    /// Resolves a field name to a key purpose via the classification table
    pub fn purpose_for_field(&self, field_name: &str) -> KeyPurpose {
        let lowered = field_name.to_lowercase();

        self.purpose_rules
            .iter()
            .filter(|rule| lowered.contains(rule.pattern))
            .max_by_key(|rule| rule.pattern.len())
            .map_or(KeyPurpose::UserData, |rule| rule.purpose)
    }

    /// Returns true if the classification table marks this field sensitive
    pub fn is_sensitive_field(&self, field_name: &str) -> bool {
        let lowered = field_name.to_lowercase();
        self.purpose_rules
            .iter()
            .any(|rule| lowered.contains(rule.pattern))
    }
}

/// Policy for key generation and rotation
#[derive(Debug, Clone)]
pub struct KeyPolicy {
    /// Rotation cycle applied to newly created keys
    pub rotation_cycle_days: i64,

    /// Whether new keys participate in the automatic rotation sweep
    pub auto_rotate: bool,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            rotation_cycle_days: DEFAULT_ROTATION_CYCLE_DAYS,
            auto_rotate: true,
        }
    }
}

impl KeyPolicy {
    /// Creates a new key policy with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rotation cycle for new keys
    pub fn with_rotation_cycle_days(mut self, days: i64) -> Self {
        self.rotation_cycle_days = days;
        self
    }

    /// Sets whether new keys are auto-rotated
    pub fn with_auto_rotate(mut self, auto_rotate: bool) -> Self {
        self.auto_rotate = auto_rotate;
        self
    }
}
