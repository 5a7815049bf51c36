use crate::models::{
    Follower, MAX_FOLLOWERS_PER_MEMBER, OrderSort, PAGE_SIZE, Role, RoleName, User, UserExportRow,
    UserOrderBy,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, query_builder::QueryBuilder};
use std::sync::Arc;
use thiserror::Error;

/// FollowerScope
///
/// The authorization scope applied to every follower query. Handlers derive
/// it from the caller's role: an Administrator sees all rows, a Member is
/// pinned to their own `member_id` no matter what filters the request asked
/// for. Keeping the scope a repository argument means no query path can
/// forget it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerScope {
    /// Administrator: unrestricted, request filters apply.
    All,
    /// Member: every query is constrained to `member_id = <own id>`.
    Member(i32),
}

/// WriteError
///
/// Failure modes of the repository write paths that the caller must tell
/// apart: an invariant violation (duplicate username, follower cap) versus
/// an infrastructure failure. Read paths keep the log-and-default idiom.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{0}")]
    Conflict(String),
    #[error("database failure")]
    Database,
}

/// Repository Trait
///
/// Defines the abstract contract for all persistence operations, allowing
/// the handlers to interact with the data layer without knowing the specific
/// implementation (Postgres in production, the in-memory implementation in
/// tests).
///
/// **Send + Sync + async_trait** are required to make the trait object
/// (`Arc<dyn Repository>`) safely shareable across Axum's task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Roles ---
    /// The seeded role rows, for the admin UI's role picker.
    async fn get_roles(&self) -> Vec<Role>;

    // --- Users (Administrator-scoped) ---
    async fn get_users(
        &self,
        role: Option<RoleName>,
        order_by: UserOrderBy,
        order_sort: OrderSort,
    ) -> Vec<User>;
    async fn count_users(&self, role: Option<RoleName>) -> i64;
    async fn get_user(&self, id: i32) -> Option<User>;
    async fn get_user_by_username(&self, username: &str) -> Option<User>;
    /// Inserts a user with an already-hashed password. `Conflict` on a
    /// duplicate username.
    async fn create_user(
        &self,
        fullname: &str,
        username: &str,
        password_hash: &str,
        role: RoleName,
    ) -> Result<User, WriteError>;
    /// Updates name/username and optionally the password hash. `Ok(None)`
    /// when the id does not exist.
    async fn update_user(
        &self,
        id: i32,
        fullname: &str,
        username: &str,
        password_hash: Option<&str>,
    ) -> Result<Option<User>, WriteError>;
    /// Returns false when no row was deleted. Followers of the deleted user
    /// are orphaned into the public pool (`ON DELETE SET NULL`).
    async fn delete_user(&self, id: i32) -> bool;

    // --- Followers ---
    async fn get_followers(
        &self,
        scope: FollowerScope,
        page: i64,
        search: Option<&str>,
        has_member: Option<bool>,
        member_id: Option<i32>,
    ) -> Vec<Follower>;
    async fn count_followers(
        &self,
        scope: FollowerScope,
        search: Option<&str>,
        has_member: Option<bool>,
        member_id: Option<i32>,
    ) -> i64;
    /// Inserts a follower. When `member_id` is set, creates for that member
    /// serialize and the per-member cap is enforced before the row lands;
    /// hitting the cap is a `Conflict`.
    async fn create_follower(
        &self,
        fullname: &str,
        phone_number: &str,
        arrival_date: NaiveDate,
        member_id: Option<i32>,
    ) -> Result<Follower, WriteError>;
    /// `None` when the row does not exist *or* lies outside the caller's scope.
    async fn update_follower(
        &self,
        id: i32,
        scope: FollowerScope,
        fullname: &str,
        phone_number: &str,
        arrival_date: NaiveDate,
    ) -> Option<Follower>;
    async fn delete_follower(&self, id: i32, scope: FollowerScope) -> bool;

    // --- Export row sets ---
    /// Followers attributed to a member, with the member name joined in.
    async fn followers_with_member(&self) -> Vec<Follower>;
    /// Public registrants (`member_id IS NULL`).
    async fn public_followers(&self) -> Vec<Follower>;
    /// All users except the seeded administrator account.
    async fn export_users(&self, exclude_username: &str) -> Vec<UserExportRow>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the
/// application state.
pub type RepositoryState = Arc<dyn Repository>;

// Shared SELECT for the joined user shape (role name + follower count).
const USER_SELECT: &str = r#"
    SELECT u.id, u.fullname, u.username, u.password, r.name AS role,
           (SELECT COUNT(*) FROM followers f WHERE f.member_id = u.id) AS followers,
           u.created_at, u.updated_at
    FROM users u
    JOIN roles r ON r.id = u.role_id
"#;

// Shared SELECT for the joined follower shape (member name).
const FOLLOWER_SELECT: &str = r#"
    SELECT f.id, f.fullname, f.phone_number, f.arrival_date, f.created_at,
           f.member_id, m.fullname AS member_fullname
    FROM followers f
    LEFT JOIN users m ON m.id = f.member_id
    WHERE 1 = 1
"#;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by
/// PostgreSQL. All queries are runtime-constructed (QueryBuilder /
/// `query_as`) with bound parameters only.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Re-reads a follower through the joined shape, so write paths return
    /// the same record (member name included) as the listings.
    async fn fetch_follower(&self, id: i32) -> Option<Follower> {
        let query = format!("{} AND f.id = $1", FOLLOWER_SELECT);
        sqlx::query_as::<_, Follower>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("fetch_follower error: {:?}", e);
                None
            })
    }
}

/// apply_follower_filters
///
/// Appends the scope and request filters to a follower query. The scope is
/// applied first and unconditionally; a member caller's requested
/// `member_id`/`has_member` filters are ignored because their scope already
/// pins the rows.
fn apply_follower_filters<'a>(
    builder: &mut QueryBuilder<'a, sqlx::Postgres>,
    scope: FollowerScope,
    search: Option<&str>,
    has_member: Option<bool>,
    member_id: Option<i32>,
) {
    match scope {
        FollowerScope::Member(self_id) => {
            builder.push(" AND f.member_id = ");
            builder.push_bind(self_id);
        }
        FollowerScope::All => {
            if let Some(mid) = member_id {
                builder.push(" AND f.member_id = ");
                builder.push_bind(mid);
            }
            if let Some(flag) = has_member {
                builder.push(if flag {
                    " AND f.member_id IS NOT NULL "
                } else {
                    " AND f.member_id IS NULL "
                });
            }
        }
    }

    if let Some(s) = search {
        // Case-insensitive substring match on the follower's own name or the
        // linked member's name.
        let pattern = format!("%{}%", s);
        builder.push(" AND (f.fullname ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR m.fullname ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

/// Maps a sqlx error to a `WriteError`, classifying unique violations as
/// conflicts with the given message.
fn classify_write_error(e: sqlx::Error, conflict_message: &str) -> WriteError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            return WriteError::Conflict(conflict_message.to_string());
        }
    }
    tracing::error!("write error: {:?}", e);
    WriteError::Database
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_roles(&self) -> Vec<Role> {
        sqlx::query_as::<_, Role>("SELECT id, name FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("get_roles error: {:?}", e);
                vec![]
            })
    }

    /// get_users
    ///
    /// Implements the role filter and client-chosen ordering with
    /// QueryBuilder for safe parameterization. The ORDER BY column and
    /// direction come from closed enums, never from raw request text.
    async fn get_users(
        &self,
        role: Option<RoleName>,
        order_by: UserOrderBy,
        order_sort: OrderSort,
    ) -> Vec<User> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(USER_SELECT);
        builder.push(" WHERE 1 = 1 ");

        if let Some(r) = role {
            builder.push(" AND r.name = ");
            builder.push_bind(r.to_string());
        }

        builder.push(format!(
            " ORDER BY {} {}",
            order_by.column(),
            order_sort.keyword()
        ));

        match builder.build_query_as::<User>().fetch_all(&self.pool).await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!("get_users error: {:?}", e);
                vec![]
            }
        }
    }

    async fn count_users(&self, role: Option<RoleName>) -> i64 {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) FROM users u JOIN roles r ON r.id = u.role_id WHERE 1 = 1",
        );
        if let Some(r) = role {
            builder.push(" AND r.name = ");
            builder.push_bind(r.to_string());
        }

        builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("count_users error: {:?}", e);
                0
            })
    }

    async fn get_user(&self, id: i32) -> Option<User> {
        let query = format!("{} WHERE u.id = $1", USER_SELECT);
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("get_user error: {:?}", e);
                None
            })
    }

    async fn get_user_by_username(&self, username: &str) -> Option<User> {
        let query = format!("{} WHERE u.username = $1", USER_SELECT);
        sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("get_user_by_username error: {:?}", e);
                None
            })
    }

    /// create_user
    ///
    /// Inserts the row and re-reads it through the joined shape so the
    /// returned record carries the role name and (zero) follower count.
    async fn create_user(
        &self,
        fullname: &str,
        username: &str,
        password_hash: &str,
        role: RoleName,
    ) -> Result<User, WriteError> {
        let id: i32 = sqlx::query_scalar(
            "INSERT INTO users (fullname, username, password, role_id) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(fullname)
        .bind(username)
        .bind(password_hash)
        .bind(role.id())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify_write_error(e, "username already taken"))?;

        self.get_user(id).await.ok_or(WriteError::Database)
    }

    async fn update_user(
        &self,
        id: i32,
        fullname: &str,
        username: &str,
        password_hash: Option<&str>,
    ) -> Result<Option<User>, WriteError> {
        // COALESCE keeps the stored hash when no new password was supplied.
        let result = sqlx::query(
            "UPDATE users SET fullname = $2, username = $3, \
             password = COALESCE($4, password), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(fullname)
        .bind(username)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_write_error(e, "username already taken"))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(self.get_user(id).await)
    }

    async fn delete_user(&self, id: i32) -> bool {
        match sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("delete_user error: {:?}", e);
                false
            }
        }
    }

    /// get_followers
    ///
    /// Scoped, filtered, paginated listing. Fixed page size of 10,
    /// 1-indexed pages, most recent first (id as the tiebreaker so paging
    /// is stable within a single timestamp).
    async fn get_followers(
        &self,
        scope: FollowerScope,
        page: i64,
        search: Option<&str>,
        has_member: Option<bool>,
        member_id: Option<i32>,
    ) -> Vec<Follower> {
        // Clamp so the OFFSET arithmetic on a client-supplied page cannot
        // overflow i64.
        let page = page.clamp(1, i64::MAX / PAGE_SIZE);
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(FOLLOWER_SELECT);
        apply_follower_filters(&mut builder, scope, search, has_member, member_id);

        builder.push(" ORDER BY f.created_at DESC, f.id DESC LIMIT ");
        builder.push_bind(PAGE_SIZE);
        builder.push(" OFFSET ");
        builder.push_bind((page - 1) * PAGE_SIZE);

        match builder
            .build_query_as::<Follower>()
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("get_followers error: {:?}", e);
                vec![]
            }
        }
    }

    async fn count_followers(
        &self,
        scope: FollowerScope,
        search: Option<&str>,
        has_member: Option<bool>,
        member_id: Option<i32>,
    ) -> i64 {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) FROM followers f LEFT JOIN users m ON m.id = f.member_id WHERE 1 = 1",
        );
        apply_follower_filters(&mut builder, scope, search, has_member, member_id);

        builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("count_followers error: {:?}", e);
                0
            })
    }

    /// create_follower
    ///
    /// Attributed creates run in a transaction that first locks the member
    /// row with `FOR UPDATE`, serializing concurrent creates for the same
    /// member. Under READ COMMITTED, the count check alone is not enough:
    /// two in-flight inserts would each see the same committed count and
    /// both land. With the lock held, the guarded insert's count observes
    /// every row the previous holder committed.
    async fn create_follower(
        &self,
        fullname: &str,
        phone_number: &str,
        arrival_date: NaiveDate,
        member_id: Option<i32>,
    ) -> Result<Follower, WriteError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            tracing::error!("create_follower begin error: {:?}", e);
            WriteError::Database
        })?;

        if let Some(mid) = member_id {
            let member: Option<i32> =
                sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                    .bind(mid)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| {
                        tracing::error!("create_follower lock error: {:?}", e);
                        WriteError::Database
                    })?;
            if member.is_none() {
                return Err(WriteError::Conflict("member does not exist".to_string()));
            }
        }

        let inserted: Option<i32> = sqlx::query_scalar(
            "INSERT INTO followers (fullname, phone_number, arrival_date, member_id) \
             SELECT $1, $2, $3, $4 \
             WHERE $4::INT IS NULL \
                OR (SELECT COUNT(*) FROM followers WHERE member_id = $4) < $5 \
             RETURNING id",
        )
        .bind(fullname)
        .bind(phone_number)
        .bind(arrival_date)
        .bind(member_id)
        .bind(MAX_FOLLOWERS_PER_MEMBER)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| classify_write_error(e, "member does not exist"))?;

        let Some(id) = inserted else {
            return Err(WriteError::Conflict(format!(
                "You have reached the maximum limit of {} followers.",
                MAX_FOLLOWERS_PER_MEMBER
            )));
        };

        tx.commit().await.map_err(|e| {
            tracing::error!("create_follower commit error: {:?}", e);
            WriteError::Database
        })?;

        self.fetch_follower(id).await.ok_or(WriteError::Database)
    }

    async fn update_follower(
        &self,
        id: i32,
        scope: FollowerScope,
        fullname: &str,
        phone_number: &str,
        arrival_date: NaiveDate,
    ) -> Option<Follower> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("UPDATE followers SET fullname = ");
        builder.push_bind(fullname);
        builder.push(", phone_number = ");
        builder.push_bind(phone_number);
        builder.push(", arrival_date = ");
        builder.push_bind(arrival_date);
        builder.push(" WHERE id = ");
        builder.push_bind(id);
        // A member can only touch their own rows; 0 rows affected otherwise.
        if let FollowerScope::Member(self_id) = scope {
            builder.push(" AND member_id = ");
            builder.push_bind(self_id);
        }
        builder.push(" RETURNING id");

        let updated: Option<i32> = builder
            .build_query_scalar()
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("update_follower error: {:?}", e);
                None
            });

        match updated {
            Some(id) => self.fetch_follower(id).await,
            None => None,
        }
    }

    async fn delete_follower(&self, id: i32, scope: FollowerScope) -> bool {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("DELETE FROM followers WHERE id = ");
        builder.push_bind(id);
        if let FollowerScope::Member(self_id) = scope {
            builder.push(" AND member_id = ");
            builder.push_bind(self_id);
        }

        match builder.build().execute(&self.pool).await {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("delete_follower error: {:?}", e);
                false
            }
        }
    }

    async fn followers_with_member(&self) -> Vec<Follower> {
        let query = format!("{} AND f.member_id IS NOT NULL ORDER BY f.id", FOLLOWER_SELECT);
        sqlx::query_as::<_, Follower>(&query)
            .fetch_all(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("followers_with_member error: {:?}", e);
                vec![]
            })
    }

    async fn public_followers(&self) -> Vec<Follower> {
        let query = format!("{} AND f.member_id IS NULL ORDER BY f.id", FOLLOWER_SELECT);
        sqlx::query_as::<_, Follower>(&query)
            .fetch_all(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("public_followers error: {:?}", e);
                vec![]
            })
    }

    async fn export_users(&self, exclude_username: &str) -> Vec<UserExportRow> {
        sqlx::query_as::<_, UserExportRow>(
            "SELECT username, fullname FROM users WHERE username <> $1 ORDER BY id",
        )
        .bind(exclude_username)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("export_users error: {:?}", e);
            vec![]
        })
    }
}

/// ensure_schema_and_seed
///
/// Startup provisioning: creates the three tables if absent, inserts the two
/// immutable role rows, and upserts the seed administrator account. Safe to
/// run on every boot.
pub async fn ensure_schema_and_seed(
    pool: &PgPool,
    admin_username: &str,
    admin_password_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS roles (\
            id   SERIAL PRIMARY KEY,\
            name TEXT NOT NULL UNIQUE\
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (\
            id         SERIAL PRIMARY KEY,\
            fullname   TEXT NOT NULL,\
            username   TEXT NOT NULL UNIQUE,\
            password   TEXT NOT NULL,\
            role_id    INT NOT NULL REFERENCES roles(id),\
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),\
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\
        )",
    )
    .execute(pool)
    .await?;

    // Deleting a member orphans their registrants into the public pool
    // rather than destroying registration data.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS followers (\
            id           SERIAL PRIMARY KEY,\
            fullname     TEXT NOT NULL,\
            phone_number TEXT NOT NULL,\
            arrival_date DATE NOT NULL,\
            created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),\
            member_id    INT REFERENCES users(id) ON DELETE SET NULL\
        )",
    )
    .execute(pool)
    .await?;

    for role in [RoleName::Administrator, RoleName::Member] {
        sqlx::query("INSERT INTO roles (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
            .bind(role.id())
            .bind(role.to_string())
            .execute(pool)
            .await?;
    }

    sqlx::query(
        "INSERT INTO users (fullname, username, password, role_id) \
         VALUES ('Administrator', $1, $2, $3) ON CONFLICT (username) DO NOTHING",
    )
    .bind(admin_username)
    .bind(admin_password_hash)
    .bind(RoleName::Administrator.id())
    .execute(pool)
    .await?;

    Ok(())
}

// --- In-Memory Implementation (For Tests) ---

use chrono::Utc;
use std::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    users: Vec<User>,
    followers: Vec<Follower>,
    next_user_id: i32,
    next_follower_id: i32,
}

/// MemoryRepository
///
/// An in-memory implementation of `Repository` used by the test suite, so
/// handler and authorization logic can be exercised without a PostgreSQL
/// instance. Implements the same semantics as the Postgres queries:
/// scoping, search, fixed-size pagination, and the per-member cap.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_user_id: 1,
                next_follower_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Mirrors the production seed: inserts the administrator account with
    /// the given pre-hashed password and returns its id.
    pub fn seed_admin(&self, username: &str, password_hash: &str) -> i32 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_user_id;
        state.next_user_id += 1;
        let now = Utc::now();
        state.users.push(User {
            id,
            fullname: "Administrator".to_string(),
            username: username.to_string(),
            password: password_hash.to_string(),
            role: RoleName::Administrator.to_string(),
            followers: 0,
            created_at: now,
            updated_at: now,
        });
        id
    }
}

/// Does this follower pass the given scope and filters? Mirrors
/// `apply_follower_filters` plus the member-name join.
fn follower_matches(
    f: &Follower,
    scope: FollowerScope,
    search: Option<&str>,
    has_member: Option<bool>,
    member_id: Option<i32>,
) -> bool {
    match scope {
        FollowerScope::Member(self_id) => {
            if f.member_id != Some(self_id) {
                return false;
            }
        }
        FollowerScope::All => {
            if let Some(mid) = member_id {
                if f.member_id != Some(mid) {
                    return false;
                }
            }
            if let Some(flag) = has_member {
                if f.member_id.is_some() != flag {
                    return false;
                }
            }
        }
    }

    if let Some(s) = search {
        let needle = s.to_lowercase();
        let own = f.fullname.to_lowercase().contains(&needle);
        let via_member = f
            .member_fullname
            .as_ref()
            .map(|m| m.to_lowercase().contains(&needle))
            .unwrap_or(false);
        if !own && !via_member {
            return false;
        }
    }
    true
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_roles(&self) -> Vec<Role> {
        vec![
            Role {
                id: RoleName::Administrator.id(),
                name: RoleName::Administrator.to_string(),
            },
            Role {
                id: RoleName::Member.id(),
                name: RoleName::Member.to_string(),
            },
        ]
    }

    async fn get_users(
        &self,
        role: Option<RoleName>,
        order_by: UserOrderBy,
        order_sort: OrderSort,
    ) -> Vec<User> {
        let state = self.state.lock().unwrap();
        let mut users: Vec<User> = state
            .users
            .iter()
            .filter(|u| role.map(|r| u.role == r.to_string()).unwrap_or(true))
            .cloned()
            .map(|mut u| {
                u.followers = state
                    .followers
                    .iter()
                    .filter(|f| f.member_id == Some(u.id))
                    .count() as i64;
                u
            })
            .collect();
        drop(state);

        users.sort_by(|a, b| {
            let ord = match order_by {
                UserOrderBy::Id => a.id.cmp(&b.id),
                UserOrderBy::Fullname => a.fullname.cmp(&b.fullname),
                UserOrderBy::Username => a.username.cmp(&b.username),
                UserOrderBy::RoleId => {
                    let ra = a.role_name().map(|r| r.id()).unwrap_or(i32::MAX);
                    let rb = b.role_name().map(|r| r.id()).unwrap_or(i32::MAX);
                    ra.cmp(&rb)
                }
                UserOrderBy::CreatedAt => a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)),
            };
            match order_sort {
                OrderSort::Asc => ord,
                OrderSort::Desc => ord.reverse(),
            }
        });
        users
    }

    async fn count_users(&self, role: Option<RoleName>) -> i64 {
        let state = self.state.lock().unwrap();
        state
            .users
            .iter()
            .filter(|u| role.map(|r| u.role == r.to_string()).unwrap_or(true))
            .count() as i64
    }

    async fn get_user(&self, id: i32) -> Option<User> {
        let state = self.state.lock().unwrap();
        let mut user = state.users.iter().find(|u| u.id == id).cloned()?;
        user.followers = state
            .followers
            .iter()
            .filter(|f| f.member_id == Some(id))
            .count() as i64;
        Some(user)
    }

    async fn get_user_by_username(&self, username: &str) -> Option<User> {
        let id = {
            let state = self.state.lock().unwrap();
            state.users.iter().find(|u| u.username == username)?.id
        };
        self.get_user(id).await
    }

    async fn create_user(
        &self,
        fullname: &str,
        username: &str,
        password_hash: &str,
        role: RoleName,
    ) -> Result<User, WriteError> {
        let mut state = self.state.lock().unwrap();
        if state.users.iter().any(|u| u.username == username) {
            return Err(WriteError::Conflict("username already taken".to_string()));
        }
        let id = state.next_user_id;
        state.next_user_id += 1;
        let now = Utc::now();
        let user = User {
            id,
            fullname: fullname.to_string(),
            username: username.to_string(),
            password: password_hash.to_string(),
            role: role.to_string(),
            followers: 0,
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn update_user(
        &self,
        id: i32,
        fullname: &str,
        username: &str,
        password_hash: Option<&str>,
    ) -> Result<Option<User>, WriteError> {
        let mut state = self.state.lock().unwrap();
        if state
            .users
            .iter()
            .any(|u| u.username == username && u.id != id)
        {
            return Err(WriteError::Conflict("username already taken".to_string()));
        }
        let Some(user) = state.users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        user.fullname = fullname.to_string();
        user.username = username.to_string();
        if let Some(hash) = password_hash {
            user.password = hash.to_string();
        }
        user.updated_at = Utc::now();
        let mut updated = user.clone();
        updated.followers = state
            .followers
            .iter()
            .filter(|f| f.member_id == Some(id))
            .count() as i64;
        Ok(Some(updated))
    }

    async fn delete_user(&self, id: i32) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.users.len();
        state.users.retain(|u| u.id != id);
        if state.users.len() == before {
            return false;
        }
        // ON DELETE SET NULL: orphan the deleted member's registrants.
        for f in state.followers.iter_mut() {
            if f.member_id == Some(id) {
                f.member_id = None;
                f.member_fullname = None;
            }
        }
        true
    }

    async fn get_followers(
        &self,
        scope: FollowerScope,
        page: i64,
        search: Option<&str>,
        has_member: Option<bool>,
        member_id: Option<i32>,
    ) -> Vec<Follower> {
        // Clamp so the OFFSET arithmetic on a client-supplied page cannot
        // overflow i64.
        let page = page.clamp(1, i64::MAX / PAGE_SIZE);
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Follower> = state
            .followers
            .iter()
            .filter(|f| follower_matches(f, scope, search, has_member, member_id))
            .cloned()
            .collect();
        drop(state);

        // Most recent first, id as the tiebreaker.
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.into_iter()
            .skip(((page - 1) * PAGE_SIZE) as usize)
            .take(PAGE_SIZE as usize)
            .collect()
    }

    async fn count_followers(
        &self,
        scope: FollowerScope,
        search: Option<&str>,
        has_member: Option<bool>,
        member_id: Option<i32>,
    ) -> i64 {
        let state = self.state.lock().unwrap();
        state
            .followers
            .iter()
            .filter(|f| follower_matches(f, scope, search, has_member, member_id))
            .count() as i64
    }

    async fn create_follower(
        &self,
        fullname: &str,
        phone_number: &str,
        arrival_date: NaiveDate,
        member_id: Option<i32>,
    ) -> Result<Follower, WriteError> {
        let mut state = self.state.lock().unwrap();
        let member_fullname = match member_id {
            Some(mid) => {
                let attributed = state
                    .followers
                    .iter()
                    .filter(|f| f.member_id == Some(mid))
                    .count() as i64;
                if attributed >= MAX_FOLLOWERS_PER_MEMBER {
                    return Err(WriteError::Conflict(format!(
                        "You have reached the maximum limit of {} followers.",
                        MAX_FOLLOWERS_PER_MEMBER
                    )));
                }
                match state.users.iter().find(|u| u.id == mid) {
                    Some(member) => Some(member.fullname.clone()),
                    None => {
                        return Err(WriteError::Conflict("member does not exist".to_string()));
                    }
                }
            }
            None => None,
        };

        let id = state.next_follower_id;
        state.next_follower_id += 1;
        let follower = Follower {
            id,
            fullname: fullname.to_string(),
            phone_number: phone_number.to_string(),
            arrival_date,
            created_at: Utc::now(),
            member_id,
            member_fullname,
        };
        state.followers.push(follower.clone());
        Ok(follower)
    }

    async fn update_follower(
        &self,
        id: i32,
        scope: FollowerScope,
        fullname: &str,
        phone_number: &str,
        arrival_date: NaiveDate,
    ) -> Option<Follower> {
        let mut state = self.state.lock().unwrap();
        let follower = state.followers.iter_mut().find(|f| f.id == id)?;
        if let FollowerScope::Member(self_id) = scope {
            if follower.member_id != Some(self_id) {
                return None;
            }
        }
        follower.fullname = fullname.to_string();
        follower.phone_number = phone_number.to_string();
        follower.arrival_date = arrival_date;
        Some(follower.clone())
    }

    async fn delete_follower(&self, id: i32, scope: FollowerScope) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.followers.len();
        state.followers.retain(|f| {
            if f.id != id {
                return true;
            }
            match scope {
                FollowerScope::All => false,
                FollowerScope::Member(self_id) => f.member_id != Some(self_id),
            }
        });
        state.followers.len() != before
    }

    async fn followers_with_member(&self) -> Vec<Follower> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Follower> = state
            .followers
            .iter()
            .filter(|f| f.member_id.is_some())
            .cloned()
            .collect();
        rows.sort_by_key(|f| f.id);
        rows
    }

    async fn public_followers(&self) -> Vec<Follower> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<Follower> = state
            .followers
            .iter()
            .filter(|f| f.member_id.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|f| f.id);
        rows
    }

    async fn export_users(&self, exclude_username: &str) -> Vec<UserExportRow> {
        let state = self.state.lock().unwrap();
        state
            .users
            .iter()
            .filter(|u| u.username != exclude_username)
            .map(|u| UserExportRow {
                username: u.username.clone(),
                fullname: u.fullname.clone(),
            })
            .collect()
    }
}
