/// Router Module Index
///
/// Organizes the application's routing logic into security-segregated modules.
/// Access control is applied explicitly at the module level (via Axum layers
/// and in-handler role checks), preventing accidental exposure of protected
/// procedures. The three modules map directly to the access tiers of the
/// RPC façade.

/// Routes accessible to all callers: login, public follower registration,
/// the role list, and the Excel export.
pub mod public;

/// Follower procedures protected by the `AuthUser` extractor middleware.
/// Scoping (admin vs. member) happens inside the handlers.
pub mod authenticated;

/// User-management procedures restricted to the Administrator role.
pub mod admin;
