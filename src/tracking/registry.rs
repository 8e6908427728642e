//! Distribution registry: one access token per (document, recipient) pairing.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use chrono_tz::Tz;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::rollup::{increment_sent, reporting_day};
use super::{TrackingError, TrackingResult};
use crate::models::{Distribution, Document, NewDistribution};
use crate::schema::{distributions, documents};

pub const TOKEN_BYTES: usize = 32;
const TOKEN_ATTEMPTS: usize = 4;
const MAX_RECIPIENT_FIELD_LENGTH: usize = 512;
pub const MAX_VIEWER_EMAIL_LENGTH: usize = 320;
pub const MAX_BULK_RECIPIENTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationReason {
    Deleted,
    Expired,
    Manual,
}

impl RevocationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RevocationReason::Deleted => "deleted",
            RevocationReason::Expired => "expired",
            RevocationReason::Manual => "manual",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationReason {
    type Err = TrackingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deleted" => Ok(RevocationReason::Deleted),
            "expired" => Ok(RevocationReason::Expired),
            "manual" => Ok(RevocationReason::Manual),
            other => Err(TrackingError::validation(format!(
                "unknown revocation reason '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Recipient {
    pub company: Option<String>,
    pub email: Option<String>,
    pub url: Option<String>,
}

impl Recipient {
    /// Trims every field, drops blanks and validates the contact email if present.
    pub fn normalized(self) -> TrackingResult<Self> {
        let company = clean_field("recipient.company", self.company)?;
        let url = clean_field("recipient.url", self.url)?;
        let email = match clean_field("recipient.email", self.email)? {
            Some(email) => Some(normalize_viewer_email(&email)?),
            None => None,
        };
        Ok(Self {
            company,
            email,
            url,
        })
    }

    /// Test and internal sends carry neither a company nor a website.
    pub fn is_preview(&self) -> bool {
        self.company.is_none() && self.url.is_none()
    }
}

fn clean_field(name: &str, value: Option<String>) -> TrackingResult<Option<String>> {
    let Some(trimmed) = value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };
    if trimmed.chars().count() > MAX_RECIPIENT_FIELD_LENGTH {
        return Err(TrackingError::validation(format!(
            "{name} must be at most {MAX_RECIPIENT_FIELD_LENGTH} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

/// Trims and lowercases a self-reported viewer email, rejecting anything that
/// does not look like `local@domain.tld`.
pub fn normalize_viewer_email(raw: &str) -> TrackingResult<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(TrackingError::validation("email must not be empty"));
    }
    if email.len() > MAX_VIEWER_EMAIL_LENGTH {
        return Err(TrackingError::validation(format!(
            "email must be at most {MAX_VIEWER_EMAIL_LENGTH} characters"
        )));
    }
    if email.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(TrackingError::validation("email must not contain whitespace"));
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(TrackingError::validation("email must contain a single '@'"));
    };
    let labels: Vec<&str> = domain.split('.').collect();
    if local.is_empty() || labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(TrackingError::validation("email is not a valid address"));
    }

    Ok(email)
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Tokens are fixed-length lowercase hex; anything else cannot exist in the store.
pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

pub fn share_path(token: &str) -> String {
    format!("/d/{token}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Viewable,
    Gone,
    NotFound,
}

fn load_owned_document(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_id: Uuid,
) -> TrackingResult<Document> {
    let document: Document = documents::table
        .find(document_id)
        .select(Document::as_select())
        .first(conn)
        .optional()?
        .ok_or(TrackingError::NotFound("document"))?;

    if document.tenant_id != tenant_id {
        return Err(TrackingError::Ownership("document"));
    }
    Ok(document)
}

fn insert_with_fresh_token(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_id: Uuid,
    recipient: &Recipient,
    sent_at: NaiveDateTime,
) -> TrackingResult<Distribution> {
    for _ in 0..TOKEN_ATTEMPTS {
        let row = NewDistribution {
            id: Uuid::new_v4(),
            token: generate_token(),
            tenant_id,
            document_id,
            recipient_company: recipient.company.clone(),
            recipient_email: recipient.email.clone(),
            recipient_url: recipient.url.clone(),
            sent_at,
        };

        // A failed insert would abort the surrounding transaction, so token
        // collisions are detected with DO NOTHING instead of a unique violation.
        let inserted = diesel::insert_into(distributions::table)
            .values(&row)
            .on_conflict(distributions::token)
            .do_nothing()
            .returning(Distribution::as_returning())
            .get_result(conn)
            .optional()?;

        if let Some(distribution) = inserted {
            return Ok(distribution);
        }
        debug!("distribution token collision, regenerating");
    }

    Err(TrackingError::TokenExhausted)
}

pub fn register(
    conn: &mut PgConnection,
    tz: Tz,
    tenant_id: Uuid,
    document_id: Uuid,
    recipient: Recipient,
    sent_at: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> TrackingResult<Distribution> {
    register_bulk(conn, tz, tenant_id, document_id, vec![recipient], sent_at, now)?
        .pop()
        .ok_or(TrackingError::TokenExhausted)
}

/// Registers one distribution per recipient in a single transaction and bumps
/// the sent counter of the send day by the number of rows created.
pub fn register_bulk(
    conn: &mut PgConnection,
    tz: Tz,
    tenant_id: Uuid,
    document_id: Uuid,
    recipients: Vec<Recipient>,
    sent_at: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> TrackingResult<Vec<Distribution>> {
    if recipients.is_empty() {
        return Err(TrackingError::validation(
            "at least one recipient is required",
        ));
    }
    if recipients.len() > MAX_BULK_RECIPIENTS {
        return Err(TrackingError::validation(format!(
            "at most {MAX_BULK_RECIPIENTS} recipients per request"
        )));
    }
    let recipients = recipients
        .into_iter()
        .map(Recipient::normalized)
        .collect::<TrackingResult<Vec<_>>>()?;
    let sent_at = sent_at.unwrap_or(now);

    conn.transaction(|conn| {
        let document = load_owned_document(conn, tenant_id, document_id)?;
        if document.deleted_at.is_some() {
            return Err(TrackingError::Gone);
        }

        let mut created = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            created.push(insert_with_fresh_token(
                conn,
                tenant_id,
                document_id,
                recipient,
                sent_at,
            )?);
        }

        increment_sent(
            conn,
            document_id,
            reporting_day(sent_at, tz),
            created.len() as i64,
        )?;

        info!(
            tenant_id = %tenant_id,
            document_id = %document_id,
            count = created.len(),
            "registered distributions"
        );
        Ok(created)
    })
}

/// Looks up a token for the viewing path. Revoked distributions and
/// distributions of deleted documents resolve to `Gone`.
pub fn resolve(conn: &mut PgConnection, token: &str) -> TrackingResult<(Distribution, Document)> {
    if !is_well_formed_token(token) {
        return Err(TrackingError::NotFound("distribution"));
    }

    let (distribution, document) = distributions::table
        .inner_join(documents::table)
        .filter(distributions::token.eq(token))
        .select((Distribution::as_select(), Document::as_select()))
        .first::<(Distribution, Document)>(conn)
        .optional()?
        .ok_or(TrackingError::NotFound("distribution"))?;

    if distribution.revoked || document.deleted_at.is_some() {
        return Err(TrackingError::Gone);
    }
    Ok((distribution, document))
}

pub fn check(conn: &mut PgConnection, token: &str) -> TrackingResult<Availability> {
    match resolve(conn, token) {
        Ok(_) => Ok(Availability::Viewable),
        Err(TrackingError::Gone) => Ok(Availability::Gone),
        Err(TrackingError::NotFound(_)) => Ok(Availability::NotFound),
        Err(err) => Err(err),
    }
}

/// Loads a distribution for staff use, regardless of revocation state.
pub fn find_for_tenant(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    token: &str,
) -> TrackingResult<Distribution> {
    if !is_well_formed_token(token) {
        return Err(TrackingError::NotFound("distribution"));
    }

    let distribution: Distribution = distributions::table
        .filter(distributions::token.eq(token))
        .select(Distribution::as_select())
        .first(conn)
        .optional()?
        .ok_or(TrackingError::NotFound("distribution"))?;

    if distribution.tenant_id != tenant_id {
        return Err(TrackingError::Ownership("distribution"));
    }
    Ok(distribution)
}

/// Revokes a single distribution. Revoking an already revoked distribution
/// keeps the original reason and timestamp.
pub fn revoke_token(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    token: &str,
    reason: RevocationReason,
    now: NaiveDateTime,
) -> TrackingResult<Distribution> {
    conn.transaction(|conn| {
        let existing = find_for_tenant(conn, tenant_id, token)?;
        if existing.revoked {
            return Ok(existing);
        }

        let updated = diesel::update(
            distributions::table
                .filter(distributions::id.eq(existing.id))
                .filter(distributions::tenant_id.eq(tenant_id))
                .filter(distributions::revoked.eq(false)),
        )
        .set((
            distributions::revoked.eq(true),
            distributions::revoked_at.eq(Some(now)),
            distributions::revoked_reason.eq(Some(reason.as_str())),
        ))
        .returning(Distribution::as_returning())
        .get_result(conn)?;

        info!(
            distribution_id = %updated.id,
            tenant_id = %tenant_id,
            reason = %reason,
            "revoked distribution"
        );
        Ok(updated)
    })
}

/// Revokes every live distribution of a tenant's document. Rows of other
/// tenants are excluded by the statement itself, not only by the ownership check.
pub fn revoke_document(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_id: Uuid,
    reason: RevocationReason,
    now: NaiveDateTime,
) -> TrackingResult<usize> {
    conn.transaction(|conn| {
        load_owned_document(conn, tenant_id, document_id)?;
        revoke_document_rows(conn, tenant_id, document_id, reason, now)
    })
}

fn revoke_document_rows(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_id: Uuid,
    reason: RevocationReason,
    now: NaiveDateTime,
) -> TrackingResult<usize> {
    let revoked = diesel::update(
        distributions::table
            .filter(distributions::document_id.eq(document_id))
            .filter(distributions::tenant_id.eq(tenant_id))
            .filter(distributions::revoked.eq(false)),
    )
    .set((
        distributions::revoked.eq(true),
        distributions::revoked_at.eq(Some(now)),
        distributions::revoked_reason.eq(Some(reason.as_str())),
    ))
    .execute(conn)?;

    info!(
        tenant_id = %tenant_id,
        document_id = %document_id,
        reason = %reason,
        revoked,
        "revoked document distributions"
    );
    Ok(revoked)
}

/// Marks a document deleted and revokes its distributions in one transaction.
pub fn delete_document(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_id: Uuid,
    now: NaiveDateTime,
) -> TrackingResult<usize> {
    conn.transaction(|conn| {
        let document = load_owned_document(conn, tenant_id, document_id)?;
        if document.deleted_at.is_none() {
            diesel::update(
                documents::table
                    .filter(documents::id.eq(document_id))
                    .filter(documents::tenant_id.eq(tenant_id)),
            )
            .set(documents::deleted_at.eq(Some(now)))
            .execute(conn)?;
        }
        revoke_document_rows(conn, tenant_id, document_id, RevocationReason::Deleted, now)
    })
}
