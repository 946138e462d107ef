//! MIME boundary tokens for batch requests.
//!
//! Boundaries are derived from identifiers supplied by the caller, never
//! generated behind its back, so the same [`BatchIds`] always produce the
//! same wire bytes.

use azure_data_tables_core::error::{TablesError, TablesResult};

/// Prefix of the outer (batch) boundary.
pub const BATCH_PREFIX: &str = "batch_";

/// Prefix of the inner (changeset) boundary.
pub const CHANGESET_PREFIX: &str = "changeset_";

/// RFC 2046 caps boundaries at 70 characters.
const MAX_BOUNDARY_LEN: usize = 70;

/// The two identifiers a batch needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchIds {
    batch_id: String,
    changeset_id: String,
}

/// Boundary strings derived from [`BatchIds`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundaries {
    /// `batch_<batch_id>`
    pub batch: String,
    /// `changeset_<changeset_id>`
    pub changeset: String,
}

impl BatchIds {
    pub fn new(batch_id: impl Into<String>, changeset_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            changeset_id: changeset_id.into(),
        }
    }

    /// Draw two fresh UUID-formatted identifiers.
    pub fn random() -> Self {
        Self::new(random_uuid(), random_uuid())
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn changeset_id(&self) -> &str {
        &self.changeset_id
    }

    /// Derive the boundary strings.
    ///
    /// # Errors
    ///
    /// Returns [`TablesError::Builder`] if an identifier is empty, contains
    /// characters not allowed in a MIME boundary, or makes the boundary
    /// longer than 70 characters.
    pub fn boundaries(&self) -> TablesResult<Boundaries> {
        Ok(Boundaries {
            batch: boundary(BATCH_PREFIX, &self.batch_id)?,
            changeset: boundary(CHANGESET_PREFIX, &self.changeset_id)?,
        })
    }
}

fn boundary(prefix: &str, id: &str) -> TablesResult<String> {
    if id.is_empty() {
        return Err(TablesError::Builder(format!("{prefix}identifier is empty")));
    }
    if let Some(c) = id.chars().find(|c| !is_boundary_char(*c)) {
        return Err(TablesError::Builder(format!(
            "{c:?} is not allowed in a MIME boundary"
        )));
    }

    let boundary = format!("{prefix}{id}");
    if boundary.len() > MAX_BOUNDARY_LEN {
        return Err(TablesError::Builder(format!(
            "boundary `{boundary}` exceeds {MAX_BOUNDARY_LEN} characters"
        )));
    }
    Ok(boundary)
}

/// `bcharsnospace` from RFC 2046, section 5.1.1.
fn is_boundary_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "'()+_,-./:=?".contains(c)
}

fn random_uuid() -> String {
    format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        fastrand::u32(..),
        fastrand::u16(..),
        fastrand::u16(..0x1000),
        0x8000 | fastrand::u16(..0x4000),
        fastrand::u64(..1 << 48),
    )
}
