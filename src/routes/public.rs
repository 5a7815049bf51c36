use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that are **unauthenticated** and accessible to any client.
/// `createFollower` sits here because public self-registration is a core
/// flow; when a bearer token *is* presented on that call, the handler still
/// resolves it (via `MaybeAuthUser`) to attribute the registrant to the
/// calling member.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Unauthenticated liveness probe for monitoring and load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /rpc/login
        // Credential verification and session token issuance.
        .route("/rpc/login", post(handlers::login))
        // POST /rpc/createFollower
        // Public self-registration (member_id NULL) or member-attributed
        // registration when a valid token accompanies the call.
        .route("/rpc/createFollower", post(handlers::create_follower))
        // GET /api/roles
        // The two seeded roles, as {data: Role[]}.
        .route("/api/roles", get(handlers::get_roles))
        // GET /api/export
        // On-demand Excel export, streamed as an attachment. Runs outside
        // the RPC façade, independent of any session.
        .route("/api/export", get(handlers::export))
}
