use crate::{AppState, handlers};
use axum::{Router, routing::post};

/// Admin Router Module
///
/// User-management procedures, exclusively for the Administrator role.
///
/// Access Control:
/// This router is mounted behind the authentication middleware, and every
/// handler additionally matches on the caller's `RoleName` before touching
/// the repository, so a Member with a valid token still gets `Unauthorized`.
/// The procedure paths stay flat under `/rpc/` because the procedure names
/// are part of the external contract.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // POST /rpc/getUsers
        // Lists users (joined role + follower count) with role filter and
        // client-chosen ordering.
        .route("/rpc/getUsers", post(handlers::get_users))
        // POST /rpc/getTotalUsers
        // Count behind getUsers.
        .route("/rpc/getTotalUsers", post(handlers::get_total_users))
        // POST /rpc/createUser
        // Creates an account; the password is bcrypt-hashed server-side.
        .route("/rpc/createUser", post(handlers::create_user))
        // POST /rpc/updateUser
        // Updates name/username, optionally rotating the password.
        .route("/rpc/updateUser", post(handlers::update_user))
        // POST /rpc/deleteUser
        // Deletes an account; its followers fall back to the public pool.
        .route("/rpc/deleteUser", post(handlers::delete_user))
}
