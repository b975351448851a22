use std::collections::BTreeSet;

use super::identity::{FallbackIndex, IdentityIndex};
use super::model::{ActionComment, ActionRequestRow, IdentityKey, SOURCE_TABLE};

/// Outcome of resolving a snapshot of action request rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Fully resolved rows, in input order.
    pub records: Vec<ActionComment>,
    pub unmapped_runners: BTreeSet<String>,
    pub unmapped_requestors: BTreeSet<String>,
    /// Records whose requestor resolved only through the fallback hop.
    pub via_fallback: usize,
    /// Rows skipped for a null or blank comment.
    pub ineligible: usize,
}

/// Requestor lookup: direct hit, else exactly one hop through the fallback index.
/// The alternate email is never looked up in the fallback index again.
fn resolve_requestor(
    email: &str,
    identity: &IdentityIndex,
    fallback: &FallbackIndex,
) -> (Option<IdentityKey>, bool) {
    if let Some(key) = identity.get(email) {
        return (Some(key), false);
    }
    match fallback.get(email).and_then(|alt| identity.get(alt)) {
        Some(key) => (Some(key), true),
        None => (None, false),
    }
}

/// Map every eligible row to an [`ActionComment`], collecting the emails that
/// could not be resolved. Pure: no I/O and no state shared between rows.
pub fn resolve<'a, I>(rows: I, identity: &IdentityIndex, fallback: &FallbackIndex) -> Resolution
where
    I: IntoIterator<Item = &'a ActionRequestRow>,
{
    let mut out = Resolution::default();
    for row in rows {
        if !row.is_eligible() {
            out.ineligible += 1;
            continue;
        }
        let runner_email = row.runner_email();
        let requestor_email = row.requestor_email();

        let runner = identity.get(runner_email);
        let (requestor, used_fallback) = resolve_requestor(requestor_email, identity, fallback);

        let Some(runner_id) = runner else {
            out.unmapped_runners.insert(runner_email.to_string());
            continue;
        };
        let Some(requestor_id) = requestor else {
            out.unmapped_requestors.insert(requestor_email.to_string());
            continue;
        };
        if used_fallback {
            out.via_fallback += 1;
        }

        out.records.push(ActionComment {
            action_request_id: row.id,
            runner_id,
            requestor_id,
            season: row.season.clone().unwrap_or_default(),
            comment: row.comments.clone().unwrap_or_default(),
            action_type: row.action_type.clone().unwrap_or_default(),
            source_table: SOURCE_TABLE,
        });
    }
    out
}
