//! Record repository trait and in-memory implementation
//!
//! The `RecordRepository` trait owns the record collections the query
//! surface reads from. Resolvers receive it injected (as
//! `Arc<dyn RecordRepository>`) instead of reaching for shared global data,
//! so the mock dataset can be swapped for a real store or a test fixture.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{Error, Result, record::Record};

/// Public profile of a dashboard user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub login: String,
    pub first_name: String,
    pub last_name: String,
    pub audit_ratio: f64,
}

/// Source of users and their records
///
/// Implementations:
/// - `InMemoryRepository`: fixed records held in memory (mock dataset, tests)
///
/// # Example
/// ```no_run
/// # use xpboard_core::repository::{InMemoryRepository, RecordRepository};
/// # async fn example() -> xpboard_core::Result<()> {
/// let repo = InMemoryRepository::mock();
/// let user = repo.authenticate("student", "student123").await?;
/// let transactions = repo.transactions().await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// All known users
    async fn users(&self) -> Result<Vec<User>>;

    /// Look up one user
    ///
    /// # Errors
    /// - `Error::NotFound` if no user has this id
    async fn user(&self, id: i64) -> Result<User>;

    /// Every transaction record, for every user
    ///
    /// Tenant scoping is the caller's job (a `userId eq` predicate).
    async fn transactions(&self) -> Result<Vec<Record>>;

    /// Every progress record, for every user
    async fn progress(&self) -> Result<Vec<Record>>;

    /// Check a login/email and password pair
    ///
    /// # Errors
    /// - `Error::Unauthenticated` if the pair does not match a user
    async fn authenticate(&self, identifier: &str, password: &str) -> Result<User>;
}

#[derive(Debug, Clone)]
struct Account {
    user: User,
    email: String,
    password: String,
}

/// Repository backed by vectors held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    accounts: Vec<Account>,
    transactions: Vec<Record>,
    progress: Vec<Record>,
}

impl InMemoryRepository {
    /// Create a repository from explicit records and no accounts
    pub fn new(transactions: Vec<Record>, progress: Vec<Record>) -> Self {
        Self {
            accounts: Vec::new(),
            transactions,
            progress,
        }
    }

    /// Register a user together with the credentials it signs in with
    pub fn with_account(
        mut self,
        user: User,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.accounts.push(Account {
            user,
            email: email.into(),
            password: password.into(),
        });
        self
    }

    /// The built-in demo dataset: two students with XP transactions and
    /// graded progress entries.
    pub fn mock() -> Self {
        let transactions = [
            json!({"id": 101, "userId": 1, "type": "xp", "amount": 15000, "path": "/bahrain/bh-piscine/piscine-go", "createdAt": "2024-01-15T09:12:00Z", "object": {"name": "piscine-go", "type": "piscine"}}),
            json!({"id": 102, "userId": 1, "type": "xp", "amount": 2500, "path": "/bahrain/bh-piscine/piscine-go/quest-01", "createdAt": "2024-01-18T14:30:00Z", "object": {"name": "quest-01", "type": "exercise"}}),
            json!({"id": 103, "userId": 1, "type": "xp", "amount": 12000, "path": "/bahrain/bh-module/piscine-js", "createdAt": "2024-04-02T11:00:00Z", "object": {"name": "piscine-js", "type": "piscine"}}),
            json!({"id": 104, "userId": 1, "type": "xp", "amount": 24500, "path": "/bahrain/bh-module/go-reloaded", "createdAt": "2024-02-20T16:45:00Z", "object": {"name": "go-reloaded", "type": "project"}}),
            json!({"id": 105, "userId": 1, "type": "xp", "amount": 9000, "path": "/bahrain/bh-module/ascii-art", "createdAt": "2024-03-05T10:05:00Z", "object": {"name": "ascii-art", "type": "project"}}),
            json!({"id": 106, "userId": 1, "type": "xp", "amount": 34375, "path": "/bahrain/bh-module/graphql", "createdAt": "2024-05-11T08:20:00Z", "object": {"name": "graphql", "type": "project"}}),
            json!({"id": 107, "userId": 1, "type": "up", "amount": 1750, "path": "/bahrain/bh-module/go-reloaded", "createdAt": "2024-02-21T09:00:00Z", "object": {"name": "go-reloaded", "type": "project"}}),
            json!({"id": 108, "userId": 1, "type": "down", "amount": 1200, "path": "/bahrain/bh-module/ascii-art", "createdAt": "2024-03-06T12:40:00Z", "object": {"name": "ascii-art", "type": "project"}}),
            json!({"id": 109, "userId": 1, "type": "level", "amount": 12, "path": "/bahrain/bh-module", "createdAt": "2024-05-11T08:21:00Z", "object": {"name": "bh-module", "type": "module"}}),
            json!({"id": 201, "userId": 2, "type": "xp", "amount": 15000, "path": "/bahrain/bh-piscine/piscine-go", "createdAt": "2024-01-16T10:00:00Z", "object": {"name": "piscine-go", "type": "piscine"}}),
            json!({"id": 202, "userId": 2, "type": "xp", "amount": 12000, "path": "/bahrain/bh-module/piscine-js", "createdAt": "2024-04-10T13:15:00Z", "object": {"name": "piscine-js", "type": "piscine"}}),
            json!({"id": 203, "userId": 2, "type": "up", "amount": 900, "path": "/bahrain/bh-module/piscine-js", "createdAt": "2024-04-11T15:00:00Z", "object": {"name": "piscine-js", "type": "piscine"}}),
        ];

        let progress = [
            json!({"id": 301, "userId": 1, "grade": 1, "path": "/bahrain/bh-module/go-reloaded", "createdAt": "2024-02-20T16:40:00Z", "object": {"name": "go-reloaded", "type": "project"}}),
            json!({"id": 302, "userId": 1, "grade": 1.2, "path": "/bahrain/bh-module/ascii-art", "createdAt": "2024-03-05T10:00:00Z", "object": {"name": "ascii-art", "type": "project"}}),
            json!({"id": 303, "userId": 1, "grade": 0, "path": "/bahrain/bh-module/ascii-art-web", "createdAt": "2024-03-28T17:10:00Z", "object": {"name": "ascii-art-web", "type": "project"}}),
            json!({"id": 304, "userId": 1, "grade": 1, "path": "/bahrain/bh-module/graphql", "createdAt": "2024-05-11T08:15:00Z", "object": {"name": "graphql", "type": "project"}}),
            json!({"id": 305, "userId": 1, "grade": null, "path": "/bahrain/bh-module/forum", "createdAt": "2024-05-20T09:00:00Z", "object": {"name": "forum", "type": "project"}}),
            json!({"id": 401, "userId": 2, "grade": 0, "path": "/bahrain/bh-module/go-reloaded", "createdAt": "2024-03-01T11:30:00Z", "object": {"name": "go-reloaded", "type": "project"}}),
            json!({"id": 402, "userId": 2, "grade": 1, "path": "/bahrain/bh-module/go-reloaded", "createdAt": "2024-03-09T11:30:00Z", "object": {"name": "go-reloaded", "type": "project"}}),
        ];

        Self::new(
            transactions.into_iter().filter_map(Record::from_value).collect(),
            progress.into_iter().filter_map(Record::from_value).collect(),
        )
        .with_account(
            User {
                id: 1,
                login: "student".to_string(),
                first_name: "Sara".to_string(),
                last_name: "Ahmed".to_string(),
                audit_ratio: 1.3,
            },
            "student@example.com",
            "student123",
        )
        .with_account(
            User {
                id: 2,
                login: "learner".to_string(),
                first_name: "Omar".to_string(),
                last_name: "Khalil".to_string(),
                audit_ratio: 0.8,
            },
            "learner@example.com",
            "learner123",
        )
    }
}

#[async_trait]
impl RecordRepository for InMemoryRepository {
    async fn users(&self) -> Result<Vec<User>> {
        Ok(self.accounts.iter().map(|a| a.user.clone()).collect())
    }

    async fn user(&self, id: i64) -> Result<User> {
        self.accounts
            .iter()
            .find(|a| a.user.id == id)
            .map(|a| a.user.clone())
            .ok_or_else(|| Error::NotFound(format!("user {}", id)))
    }

    async fn transactions(&self) -> Result<Vec<Record>> {
        Ok(self.transactions.clone())
    }

    async fn progress(&self) -> Result<Vec<Record>> {
        Ok(self.progress.clone())
    }

    async fn authenticate(&self, identifier: &str, password: &str) -> Result<User> {
        self.accounts
            .iter()
            .find(|a| {
                (a.user.login == identifier || a.email == identifier) && a.password == password
            })
            .map(|a| a.user.clone())
            .ok_or_else(|| Error::Unauthenticated("Invalid credentials".to_string()))
    }
}
