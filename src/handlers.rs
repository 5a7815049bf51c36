use crate::{
    AppState,
    auth::{AuthUser, MaybeAuthUser, issue_token},
    error::RpcError,
    export::{XLSX_CONTENT_TYPE, build_workbook},
    models::{
        CreateFollowerRequest, CreateUserRequest, Follower, GetFollowersRequest,
        GetTotalFollowersRequest, GetTotalUsersRequest, GetUsersRequest, IdRequest, LoginRequest,
        LoginResponse, RoleName, RolesResponse, UpdateFollowerRequest, UpdateUserRequest, UserView,
    },
    repository::{FollowerScope, WriteError},
};
use axum::{
    Json,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

// --- Authorization Helpers ---

/// Gate for administrator-scoped procedures. Exhaustive over the closed role
/// set, so adding a role forces this policy to be revisited.
fn require_admin(auth: &AuthUser) -> Result<(), RpcError> {
    match auth.role {
        RoleName::Administrator => Ok(()),
        RoleName::Member => Err(RpcError::Unauthorized(
            "administrator role required".to_string(),
        )),
    }
}

/// The follower-query scope for a caller: administrators see everything,
/// members only their own rows.
fn follower_scope(auth: &AuthUser) -> FollowerScope {
    match auth.role {
        RoleName::Administrator => FollowerScope::All,
        RoleName::Member => FollowerScope::Member(auth.id),
    }
}

fn map_write_error(e: WriteError) -> RpcError {
    match e {
        WriteError::Conflict(msg) => RpcError::Conflict(msg),
        WriteError::Database => RpcError::Internal("database failure".to_string()),
    }
}

// --- Session ---

/// login
///
/// [Public Procedure] Verifies username/password and issues a signed session
/// token embedding `{id, username, role}`.
///
/// *Security*: unknown username and wrong password produce the identical
/// `Unauthorized` message so account existence cannot be probed.
#[utoipa::path(
    post,
    path = "/rpc/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, RpcError> {
    let user = state
        .repo
        .get_user_by_username(&payload.username)
        .await
        .ok_or_else(RpcError::invalid_credentials)?;

    let valid = bcrypt::verify(&payload.password, &user.password).unwrap_or(false);
    if !valid {
        return Err(RpcError::invalid_credentials());
    }

    let role = user
        .role_name()
        .map_err(|e| RpcError::Internal(format!("corrupt role: {}", e)))?;
    let token = issue_token(user.id, &user.username, role, &state.config.jwt_secret)?;
    let view = UserView::try_from(user).map_err(RpcError::Internal)?;

    tracing::info!(user = %view.username, "login succeeded");
    Ok(Json(LoginResponse {
        user: view,
        access_token: token,
    }))
}

// --- User Procedures (Administrator only) ---

/// getUsers
///
/// [Admin Procedure] Lists users with optional role filter and client-chosen
/// ordering. The returned shape joins the role name and follower count.
#[utoipa::path(
    post,
    path = "/rpc/getUsers",
    request_body = GetUsersRequest,
    responses((status = 200, description = "Users", body = [UserView]))
)]
pub async fn get_users(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<GetUsersRequest>,
) -> Result<Json<Vec<UserView>>, RpcError> {
    require_admin(&auth)?;

    let users = state
        .repo
        .get_users(payload.role, payload.order_by, payload.order_sort)
        .await;

    // A row with an unrecognized role string is a corrupt record; drop it
    // from the listing rather than failing the whole call.
    let views = users
        .into_iter()
        .filter_map(|u| match UserView::try_from(u) {
            Ok(view) => Some(view),
            Err(e) => {
                tracing::error!("skipping corrupt user row: {}", e);
                None
            }
        })
        .collect();

    Ok(Json(views))
}

/// getTotalUsers
///
/// [Admin Procedure] Row count behind `getUsers`, same role filter.
#[utoipa::path(
    post,
    path = "/rpc/getTotalUsers",
    request_body = GetTotalUsersRequest,
    responses((status = 200, description = "Count", body = i64))
)]
pub async fn get_total_users(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<GetTotalUsersRequest>,
) -> Result<Json<i64>, RpcError> {
    require_admin(&auth)?;
    Ok(Json(state.repo.count_users(payload.role).await))
}

/// createUser
///
/// [Admin Procedure] Creates a user account. The password is hashed with
/// bcrypt before it reaches the repository.
#[utoipa::path(
    post,
    path = "/rpc/createUser",
    request_body = CreateUserRequest,
    responses(
        (status = 200, description = "Created", body = UserView),
        (status = 409, description = "Username already taken")
    )
)]
pub async fn create_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<Json<UserView>, RpcError> {
    require_admin(&auth)?;

    let role = RoleName::from_id(payload.role_id)
        .ok_or_else(|| RpcError::BadRequest(format!("unknown roleId: {}", payload.role_id)))?;

    let hash = bcrypt::hash(&payload.password, bcrypt::DEFAULT_COST)
        .map_err(|e| RpcError::Internal(format!("failed to hash password: {}", e)))?;

    let user = state
        .repo
        .create_user(&payload.fullname, &payload.username, &hash, role)
        .await
        .map_err(map_write_error)?;

    UserView::try_from(user).map(Json).map_err(RpcError::Internal)
}

/// updateUser
///
/// [Admin Procedure] Updates name/username; re-hashes the password only when
/// one was supplied.
#[utoipa::path(
    post,
    path = "/rpc/updateUser",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = UserView),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserView>, RpcError> {
    require_admin(&auth)?;

    let hash = match &payload.password {
        Some(password) => Some(
            bcrypt::hash(password, bcrypt::DEFAULT_COST)
                .map_err(|e| RpcError::Internal(format!("failed to hash password: {}", e)))?,
        ),
        None => None,
    };

    let updated = state
        .repo
        .update_user(
            payload.id,
            &payload.fullname,
            &payload.username,
            hash.as_deref(),
        )
        .await
        .map_err(map_write_error)?
        .ok_or_else(|| RpcError::NotFound("user not found".to_string()))?;

    UserView::try_from(updated)
        .map(Json)
        .map_err(RpcError::Internal)
}

/// deleteUser
///
/// [Admin Procedure] Deletes a user. Deleting an id that does not exist is
/// an explicit `NotFound`, with no side effects. The deleted member's
/// followers are orphaned into the public pool by the schema.
#[utoipa::path(
    post,
    path = "/rpc/deleteUser",
    request_body = IdRequest,
    responses(
        (status = 200, description = "Deleted", body = IdRequest),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<IdRequest>,
) -> Result<Json<IdRequest>, RpcError> {
    require_admin(&auth)?;

    if state.repo.delete_user(payload.id).await {
        Ok(Json(payload))
    } else {
        Err(RpcError::NotFound("user not found".to_string()))
    }
}

// --- Follower Procedures ---

/// getFollowers
///
/// [Authenticated Procedure] Paginated follower listing. Administrators see
/// all rows and may filter by `memberId` / `hasMember`; members are pinned
/// to their own rows regardless of requested filters.
#[utoipa::path(
    post,
    path = "/rpc/getFollowers",
    request_body = GetFollowersRequest,
    responses((status = 200, description = "Followers", body = [Follower]))
)]
pub async fn get_followers(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<GetFollowersRequest>,
) -> Json<Vec<Follower>> {
    let scope = follower_scope(&auth);
    let rows = state
        .repo
        .get_followers(
            scope,
            payload.page.unwrap_or(1),
            payload.search.as_deref(),
            payload.has_member,
            payload.member_id,
        )
        .await;
    Json(rows)
}

/// getTotalFollowers
///
/// [Authenticated Procedure] Count behind `getFollowers`, under the same
/// scope and filters. A member's total is the size of their own list, which
/// is what the dashboard's remaining-slots figure is computed from.
#[utoipa::path(
    post,
    path = "/rpc/getTotalFollowers",
    request_body = GetTotalFollowersRequest,
    responses((status = 200, description = "Count", body = i64))
)]
pub async fn get_total_followers(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<GetTotalFollowersRequest>,
) -> Json<i64> {
    let scope = follower_scope(&auth);
    let count = state
        .repo
        .count_followers(
            scope,
            payload.search.as_deref(),
            payload.has_member,
            payload.member_id,
        )
        .await;
    Json(count)
}

/// createFollower
///
/// [Public Procedure] Registers a follower. Attribution is derived from the
/// caller, never from the payload: anonymous and administrator calls create
/// a public registrant, a member call attributes the row to that member.
/// The per-member cap of 10 is enforced atomically in the repository.
#[utoipa::path(
    post,
    path = "/rpc/createFollower",
    request_body = CreateFollowerRequest,
    responses(
        (status = 200, description = "Registered", body = Follower),
        (status = 409, description = "Follower limit reached")
    )
)]
pub async fn create_follower(
    MaybeAuthUser(auth): MaybeAuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateFollowerRequest>,
) -> Result<Json<Follower>, RpcError> {
    let member_id = match &auth {
        Some(user) => match user.role {
            RoleName::Member => Some(user.id),
            // Administrators manage the public pool; their creates are unattributed.
            RoleName::Administrator => None,
        },
        None => None,
    };

    let follower = state
        .repo
        .create_follower(
            &payload.fullname,
            &payload.phone_number,
            payload.arrival_date,
            member_id,
        )
        .await
        .map_err(map_write_error)?;

    Ok(Json(follower))
}

/// updateFollower
///
/// [Authenticated Procedure] Edits a registrant. The repository applies the
/// caller's scope, so a member editing someone else's row gets `NotFound`.
#[utoipa::path(
    post,
    path = "/rpc/updateFollower",
    request_body = UpdateFollowerRequest,
    responses(
        (status = 200, description = "Updated", body = Follower),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_follower(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateFollowerRequest>,
) -> Result<Json<Follower>, RpcError> {
    let scope = follower_scope(&auth);
    state
        .repo
        .update_follower(
            payload.id,
            scope,
            &payload.fullname,
            &payload.phone_number,
            payload.arrival_date,
        )
        .await
        .map(Json)
        .ok_or_else(|| RpcError::NotFound("follower not found".to_string()))
}

/// deleteFollower
///
/// [Authenticated Procedure] Removes a registrant, under the caller's scope.
#[utoipa::path(
    post,
    path = "/rpc/deleteFollower",
    request_body = IdRequest,
    responses(
        (status = 200, description = "Deleted", body = IdRequest),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_follower(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<IdRequest>,
) -> Result<Json<IdRequest>, RpcError> {
    let scope = follower_scope(&auth);
    if state.repo.delete_follower(payload.id, scope).await {
        Ok(Json(payload))
    } else {
        Err(RpcError::NotFound("follower not found".to_string()))
    }
}

// --- Plain HTTP Endpoints ---

/// get_roles
///
/// [Public Route] `GET /api/roles` — the seeded role rows, wrapped in a
/// `{data: [...]}` envelope for the UI's role picker.
#[utoipa::path(
    get,
    path = "/api/roles",
    responses((status = 200, description = "Roles", body = RolesResponse))
)]
pub async fn get_roles(State(state): State<AppState>) -> Json<RolesResponse> {
    Json(RolesResponse {
        data: state.repo.get_roles().await,
    })
}

/// export
///
/// [Public Route] `GET /api/export` — builds the three-sheet workbook from a
/// fresh read of the three row sets and streams it as an attachment.
#[utoipa::path(
    get,
    path = "/api/export",
    responses((status = 200, description = "XLSX download"))
)]
pub async fn export(State(state): State<AppState>) -> Result<Response, RpcError> {
    let followers = state.repo.followers_with_member().await;
    let public_followers = state.repo.public_followers().await;
    let users = state
        .repo
        .export_users(&state.config.seed_admin_username)
        .await;

    let bytes = build_workbook(&followers, &users, &public_followers)
        .map_err(|e| RpcError::Internal(format!("failed to build workbook: {}", e)))?;

    tracing::info!(
        followers = followers.len(),
        users = users.len(),
        public_followers = public_followers.len(),
        "export generated"
    );

    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=data.xlsx",
            ),
        ],
        bytes,
    )
        .into_response())
}
