//! # Workflow Identity Validation
//!
//! Satu validator untuk semua jalur yang menerima identitas workflow:
//! trigger request dari user dan metadata push/pull dari node.
//!
//! ## Prinsip
//!
//! - Hex HARUS sudah lowercase. Mixed case ditolak, tidak dinormalisasi.
//! - Hex pendek yang valid diterima lalu di-left-pad ke panjang kanonik.
//! - Metadata dari node harus sudah kanonik (panjang tepat).

use dongate_proto::{KeyType, WorkflowMetadata, WorkflowSelector};

use sha2::{Digest, Sha256};

/// `0x` + 32 byte hex.
pub const WORKFLOW_ID_LEN: usize = 66;
/// `0x` + 20 byte hex.
pub const WORKFLOW_OWNER_LEN: usize = 42;
/// `0x` + 20 byte hex.
pub const EVM_ADDRESS_LEN: usize = 42;
/// `0x` + hex dari 10 karakter pertama sha256(name).
pub const WORKFLOW_NAME_HASH_LEN: usize = 22;
pub const MAX_WORKFLOW_NAME_LEN: usize = 64;
pub const MAX_WORKFLOW_TAG_LEN: usize = 32;

const NAME_HASH_PREFIX_CHARS: usize = 10;

/// Error validasi input identitas workflow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{0} must be lowercase")]
    NotLowercase(&'static str),

    #[error("{0} is not valid hex")]
    InvalidHex(&'static str),

    #[error("{field} is too long: max {max}, got {actual}")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("{field} has invalid length: expected {expected}, got {actual}")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("workflow must have at least one authorized key")]
    NoAuthorizedKeys,

    #[error("workflow selector requires workflowID or workflowOwner, workflowName and workflowTag")]
    IncompleteSelector,
}

// ════════════════════════════════════════════════════════════════════════════
// HEX
// ════════════════════════════════════════════════════════════════════════════

fn strip_0x(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}

/// Validasi hex string: lowercase, maksimal `max_len - 2` digit, hex valid.
///
/// Jumlah digit ganjil diterima karena akan di-pad oleh [`normalize_hex`].
pub fn validate_hex(field: &'static str, value: &str, max_len: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Missing(field));
    }
    if value != value.to_lowercase() {
        return Err(ValidationError::NotLowercase(field));
    }
    // Batas dihitung dari jumlah digit, dengan atau tanpa prefix `0x`.
    let digits = strip_0x(value);
    if digits.len() > max_len.saturating_sub(2) {
        return Err(ValidationError::TooLong {
            field,
            max: max_len,
            actual: digits.len() + 2,
        });
    }
    if digits.is_empty() {
        return Err(ValidationError::InvalidHex(field));
    }
    let padded;
    let even = if digits.len() % 2 == 1 {
        padded = format!("0{}", digits);
        padded.as_str()
    } else {
        digits
    };
    hex::decode(even).map_err(|_| ValidationError::InvalidHex(field))?;
    Ok(())
}

/// Validasi hex dengan panjang tepat (termasuk `0x`).
fn validate_exact_hex(field: &'static str, value: &str, len: usize) -> Result<(), ValidationError> {
    validate_hex(field, value, len)?;
    if value.len() != len || !value.starts_with("0x") {
        return Err(ValidationError::WrongLength {
            field,
            expected: len,
            actual: value.len(),
        });
    }
    Ok(())
}

/// Bentuk kanonik: `0x` + digit yang di-left-pad dengan `0` sampai `len`.
pub fn normalize_hex(value: &str, len: usize) -> String {
    let digits = strip_0x(value);
    let width = len.saturating_sub(2);
    format!("0x{:0>width$}", digits, width = width)
}

// ════════════════════════════════════════════════════════════════════════════
// SELECTOR (TRIGGER PATH)
// ════════════════════════════════════════════════════════════════════════════

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.len() > MAX_WORKFLOW_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "workflowName",
            max: MAX_WORKFLOW_NAME_LEN,
            actual: name.len(),
        });
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), ValidationError> {
    if tag.is_empty() {
        return Err(ValidationError::Missing("workflowTag"));
    }
    if tag.len() > MAX_WORKFLOW_TAG_LEN {
        return Err(ValidationError::TooLong {
            field: "workflowTag",
            max: MAX_WORKFLOW_TAG_LEN,
            actual: tag.len(),
        });
    }
    Ok(())
}

/// Validasi selector dari trigger request.
///
/// Tanpa `workflowID`, ketiga field owner, name, dan tag wajib ada.
/// Field yang diisi selalu divalidasi.
pub fn validate_selector(selector: &WorkflowSelector) -> Result<(), ValidationError> {
    if selector.workflow_id.is_empty()
        && (selector.workflow_owner.is_empty()
            || selector.workflow_name.is_empty()
            || selector.workflow_tag.is_empty())
    {
        return Err(ValidationError::IncompleteSelector);
    }
    if !selector.workflow_id.is_empty() {
        validate_hex("workflowID", &selector.workflow_id, WORKFLOW_ID_LEN)?;
    }
    if !selector.workflow_owner.is_empty() {
        validate_hex("workflowOwner", &selector.workflow_owner, WORKFLOW_OWNER_LEN)?;
    }
    if !selector.workflow_name.is_empty() {
        validate_name(&selector.workflow_name)?;
    }
    if !selector.workflow_tag.is_empty() {
        validate_tag(&selector.workflow_tag)?;
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════
// METADATA (NODE PATH)
// ════════════════════════════════════════════════════════════════════════════

/// Validasi metadata dari node sebelum masuk aggregator.
///
/// Semua field wajib dan sudah kanonik: ID dan owner dengan panjang tepat,
/// name berupa name hash, tag tidak kosong, minimal satu authorized key.
pub fn validate_metadata(metadata: &WorkflowMetadata) -> Result<(), ValidationError> {
    let sel = &metadata.workflow_selector;
    validate_exact_hex("workflowID", &sel.workflow_id, WORKFLOW_ID_LEN)?;
    validate_exact_hex("workflowOwner", &sel.workflow_owner, WORKFLOW_OWNER_LEN)?;
    validate_exact_hex("workflowName", &sel.workflow_name, WORKFLOW_NAME_HASH_LEN)?;
    validate_tag(&sel.workflow_tag)?;

    if metadata.authorized_keys.is_empty() {
        return Err(ValidationError::NoAuthorizedKeys);
    }
    for key in &metadata.authorized_keys {
        match key.key_type {
            KeyType::EcdsaEvm => validate_exact_hex("publicKey", &key.public_key, EVM_ADDRESS_LEN)?,
        }
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════
// DERIVED IDENTIFIERS
// ════════════════════════════════════════════════════════════════════════════

/// Name hash yang dipakai registry: `"0x" + hex(prefix 10 char hex(sha256(name)))`.
pub fn workflow_name_hash(name: &str) -> String {
    let full = hex::encode(Sha256::digest(name.as_bytes()));
    let prefix = &full[..NAME_HASH_PREFIX_CHARS];
    format!("0x{}", hex::encode(prefix.as_bytes()))
}

/// Execution ID untuk satu trigger: hex sha256(workflowID tanpa `0x` ‖ requestID).
pub fn execution_id(workflow_id: &str, request_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(strip_0x(workflow_id).as_bytes());
    hasher.update(request_id.as_bytes());
    hex::encode(hasher.finalize())
}
