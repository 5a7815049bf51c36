use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use utoipa::ToSchema;

/// Maximum number of followers a single member (KOL) may register.
pub const MAX_FOLLOWERS_PER_MEMBER: i64 = 10;

/// Fixed page size for all paginated listings. Pages are 1-indexed.
pub const PAGE_SIZE: i64 = 10;

// --- Roles ---

/// RoleName
///
/// The closed set of roles in the system. The `roles` table is seeded with
/// exactly these two rows and is immutable afterwards, so the application
/// works with this enum and only touches the table at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum RoleName {
    Administrator,
    Member,
}

impl RoleName {
    /// The seeded primary key of this role in the `roles` table.
    pub fn id(self) -> i32 {
        match self {
            RoleName::Administrator => 1,
            RoleName::Member => 2,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(RoleName::Administrator),
            2 => Some(RoleName::Member),
            _ => None,
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleName::Administrator => write!(f, "Administrator"),
            RoleName::Member => write!(f, "Member"),
        }
    }
}

impl FromStr for RoleName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Administrator" => Ok(RoleName::Administrator),
            "Member" => Ok(RoleName::Member),
            other => Err(format!("unknown role name: {}", other)),
        }
    }
}

/// Role
///
/// A row of the seeded `roles` table, returned verbatim by `GET /api/roles`
/// so the admin UI can populate its role picker.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Role {
    pub id: i32,
    pub name: String,
}

// --- Users ---

/// User
///
/// The internal user record as the repository returns it: the `users` row
/// joined with its role name and follower count. Deliberately **not**
/// `Serialize` — the stored bcrypt hash must never reach the wire; handlers
/// convert to [`UserView`] first.
#[derive(Debug, Clone, FromRow, Default)]
pub struct User {
    pub id: i32,
    pub fullname: String,
    pub username: String,
    /// Bcrypt hash of the password, as stored in the `password` column.
    pub password: String,
    /// Joined `roles.name` for this user's `role_id`.
    pub role: String,
    /// Number of followers currently attributed to this user.
    pub followers: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role_name(&self) -> Result<RoleName, String> {
        self.role.parse()
    }
}

/// UserView
///
/// The wire shape of a user: everything in [`User`] except the password
/// hash, with the role as the closed enum.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserView {
    pub id: i32,
    pub fullname: String,
    pub username: String,
    pub role: RoleName,
    /// Follower count, shown on the admin dashboard.
    pub followers: i64,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<User> for UserView {
    type Error = String;

    fn try_from(user: User) -> Result<Self, Self::Error> {
        let role = user.role_name()?;
        Ok(UserView {
            id: user.id,
            fullname: user.fullname,
            username: user.username,
            role,
            followers: user.followers,
            created_at: user.created_at,
            updated_at: user.updated_at,
        })
    }
}

// --- Followers ---

/// Follower
///
/// A registrant record, optionally attributed to a member (the "KOL"
/// referral). `member_id = None` denotes a public registrant. The
/// `member_fullname` field is loaded via a JOIN in the repository query.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Follower {
    pub id: i32,
    pub fullname: String,
    pub phone_number: String,
    /// The registrant's declared arrival date (date only, no time component).
    #[ts(type = "string")]
    pub arrival_date: NaiveDate,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    /// FK to `users.id` when attributed, NULL for public registrants.
    pub member_id: Option<i32>,
    #[sqlx(default)]
    pub member_fullname: Option<String>,
}

// --- Request Payloads (RPC Inputs) ---

/// Input payload for the `login` procedure.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Output of the `login` procedure: the authenticated user plus a signed
/// bearer token carrying `{id, username, role}`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LoginResponse {
    pub user: UserView,
    pub access_token: String,
}

/// Sortable columns for the `getUsers` procedure. The serde names match the
/// wire values the original admin UI sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub enum UserOrderBy {
    #[serde(rename = "id")]
    Id,
    #[serde(rename = "fullname")]
    Fullname,
    #[serde(rename = "username")]
    Username,
    #[serde(rename = "roleId")]
    RoleId,
    #[default]
    #[serde(rename = "createdAt")]
    CreatedAt,
}

impl UserOrderBy {
    /// The ORDER BY expression for this column. Closed enum, so this can
    /// never inject anything into the query text.
    pub fn column(self) -> &'static str {
        match self {
            UserOrderBy::Id => "u.id",
            UserOrderBy::Fullname => "u.fullname",
            UserOrderBy::Username => "u.username",
            UserOrderBy::RoleId => "u.role_id",
            UserOrderBy::CreatedAt => "u.created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub enum OrderSort {
    #[serde(rename = "asc")]
    Asc,
    #[default]
    #[serde(rename = "desc")]
    Desc,
}

impl OrderSort {
    pub fn keyword(self) -> &'static str {
        match self {
            OrderSort::Asc => "ASC",
            OrderSort::Desc => "DESC",
        }
    }
}

/// Input payload for `getUsers`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct GetUsersRequest {
    /// Optional filter by role name ("Administrator" / "Member").
    #[serde(default)]
    pub role: Option<RoleName>,
    #[serde(default)]
    pub order_by: UserOrderBy,
    #[serde(default)]
    pub order_sort: OrderSort,
}

/// Input payload for `getTotalUsers`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct GetTotalUsersRequest {
    #[serde(default)]
    pub role: Option<RoleName>,
}

/// Input payload for `createUser`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateUserRequest {
    pub fullname: String,
    pub username: String,
    /// Plaintext password; hashed with bcrypt before storage.
    pub password: String,
    /// Must map to a seeded role (1 = Administrator, 2 = Member).
    pub role_id: i32,
}

/// Input payload for `updateUser`. The password is optional: when present
/// it is re-hashed, when absent the stored hash is kept.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateUserRequest {
    pub id: i32,
    pub fullname: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Shared input payload for the delete procedures (`deleteUser`,
/// `deleteFollower`): just the target id.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct IdRequest {
    pub id: i32,
}

/// Input payload for `getFollowers`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct GetFollowersRequest {
    /// 1-indexed page; defaults to the first page.
    #[serde(default)]
    pub page: Option<i64>,
    /// Case-insensitive substring match against the follower's own name or
    /// its linked member's name.
    #[serde(default)]
    pub search: Option<String>,
    /// Admin-only filter to a specific member's followers. Ignored for
    /// member callers, whose scope is always their own id.
    #[serde(default)]
    pub member_id: Option<i32>,
    /// Admin-only filter: `false` selects public registrants
    /// (`member_id IS NULL`), `true` selects attributed ones.
    #[serde(default)]
    pub has_member: Option<bool>,
}

/// Input payload for `getTotalFollowers`; same filters as the listing,
/// minus the page.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct GetTotalFollowersRequest {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub member_id: Option<i32>,
    #[serde(default)]
    pub has_member: Option<bool>,
}

/// Input payload for `createFollower`. Attribution is never client-chosen:
/// an anonymous call registers a public follower, a member-authenticated
/// call attributes the row to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateFollowerRequest {
    pub fullname: String,
    pub phone_number: String,
    #[ts(type = "string")]
    pub arrival_date: NaiveDate,
}

/// Input payload for `updateFollower`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateFollowerRequest {
    pub id: i32,
    pub fullname: String,
    pub phone_number: String,
    #[ts(type = "string")]
    pub arrival_date: NaiveDate,
}

/// Output envelope of `GET /api/roles`: `{data: Role[]}`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RolesResponse {
    pub data: Vec<Role>,
}

/// UserExportRow
///
/// Flattened user shape for the `KOL` sheet of the Excel export.
#[derive(Debug, Clone, FromRow, Default)]
pub struct UserExportRow {
    pub username: String,
    pub fullname: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_name_round_trips_through_strings() {
        for role in [RoleName::Administrator, RoleName::Member] {
            let parsed: RoleName = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("administrator".parse::<RoleName>().is_err());
        assert!("".parse::<RoleName>().is_err());
    }

    #[test]
    fn role_ids_match_seed_order() {
        assert_eq!(RoleName::Administrator.id(), 1);
        assert_eq!(RoleName::Member.id(), 2);
        assert_eq!(RoleName::from_id(2), Some(RoleName::Member));
        assert_eq!(RoleName::from_id(99), None);
    }

    #[test]
    fn user_view_drops_the_password_hash() {
        let user = User {
            id: 7,
            fullname: "Jane KOL".to_string(),
            username: "jane".to_string(),
            password: "$2b$12$secret-hash".to_string(),
            role: "Member".to_string(),
            followers: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let view = UserView::try_from(user).unwrap();
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("password"));
        assert!(json.contains(r#""role":"Member""#));
    }

    #[test]
    fn user_view_rejects_unknown_role_strings() {
        let user = User {
            role: "superuser".to_string(),
            ..Default::default()
        };
        assert!(UserView::try_from(user).is_err());
    }

    #[test]
    fn get_followers_request_defaults_are_empty() {
        // The UI often sends `{}`; every field must default cleanly.
        let req: GetFollowersRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.page, None);
        assert_eq!(req.search, None);
        assert_eq!(req.member_id, None);
        assert_eq!(req.has_member, None);
    }

    #[test]
    fn order_enums_use_wire_names() {
        let req: GetUsersRequest =
            serde_json::from_str(r#"{"orderBy":"roleId","orderSort":"asc"}"#).unwrap();
        assert_eq!(req.order_by, UserOrderBy::RoleId);
        assert_eq!(req.order_sort, OrderSort::Asc);
        // Defaults: most recent first.
        let req: GetUsersRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.order_by, UserOrderBy::CreatedAt);
        assert_eq!(req.order_sort, OrderSort::Desc);
    }

    #[test]
    fn follower_serializes_camel_case() {
        let f = Follower {
            id: 1,
            fullname: "A".to_string(),
            phone_number: "0812".to_string(),
            arrival_date: NaiveDate::from_ymd_opt(2025, 3, 9).unwrap(),
            created_at: Utc::now(),
            member_id: Some(2),
            member_fullname: Some("Jane KOL".to_string()),
        };
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains(r#""phoneNumber":"0812""#));
        assert!(json.contains(r#""arrivalDate":"2025-03-09""#));
        assert!(json.contains(r#""memberId":2"#));
    }
}
