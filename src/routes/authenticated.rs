use crate::{AppState, handlers};
use axum::{Router, routing::post};

/// Authenticated Router Module
///
/// Follower procedures available to any caller who passed the
/// authentication layer. Every handler receives a validated `AuthUser` and
/// derives its query scope from the role: an Administrator operates on all
/// rows, a Member only on rows where `member_id` equals their own id. The
/// scope is enforced in the repository queries, so an out-of-scope id simply
/// affects zero rows.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // POST /rpc/getFollowers
        // Paginated, searchable listing (page size 10, most recent first).
        .route("/rpc/getFollowers", post(handlers::get_followers))
        // POST /rpc/getTotalFollowers
        // Count under the same scope and filters as the listing.
        .route("/rpc/getTotalFollowers", post(handlers::get_total_followers))
        // POST /rpc/updateFollower
        // Edits a registrant; members can only touch their own rows.
        .route("/rpc/updateFollower", post(handlers::update_follower))
        // POST /rpc/deleteFollower
        // Removes a registrant under the caller's scope.
        .route("/rpc/deleteFollower", post(handlers::delete_follower))
}
