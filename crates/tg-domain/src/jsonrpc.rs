//! JSON-RPC error code mapping observed by a tool-protocol client bridge.
//!
//! The bridge itself is an external collaborator; this module only fixes
//! the canonical code assignment so bridge implementations (and tests
//! here) agree on the numbers.

use crate::model::Decision;

pub const APPROVAL_REQUIRED: i64 = -32001;
pub const ACCESS_DENIED: i64 = -32002;
pub const TOKEN_INVALID: i64 = -32003;

/// Maps an authorize outcome to its JSON-RPC error code. `None` for
/// `Allowed` — an allow carries no error. `is_token_retry` distinguishes a
/// failed token redemption (`TOKEN_INVALID`) from an ordinary policy deny
/// (`ACCESS_DENIED`).
pub fn code_for(decision: Decision, is_token_retry: bool) -> Option<i64> {
    match decision {
        Decision::Allowed => None,
        Decision::ApprovalRequired => Some(APPROVAL_REQUIRED),
        Decision::Denied if is_token_retry => Some(TOKEN_INVALID),
        Decision::Denied => Some(ACCESS_DENIED),
    }
}
