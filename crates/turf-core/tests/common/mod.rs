//! Shared fixtures: a users collection with a secondary index, a plain
//! movies collection, and the container wiring them up.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use turf::{
    Collection, Collections, Database, Extension, IndexedCollection, IndexedProperty,
    ReadWriteTransaction, Result, SecondaryIndex, SerializationError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub first_name: String,
    pub last_name: String,
    pub is_current: bool,
    pub email: Option<String>,
    pub favourite_movies: Vec<String>,
}

pub fn user(first: &str, last: &str, is_current: bool, email: Option<&str>) -> User {
    User {
        first_name: first.to_string(),
        last_name: last.to_string(),
        is_current,
        email: email.map(str::to_string),
        favourite_movies: Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub name: String,
}

pub struct UserIndexedProperties {
    pub is_current: IndexedProperty<UsersCollection, bool>,
    pub last_name: IndexedProperty<UsersCollection, String>,
    pub email: IndexedProperty<UsersCollection, Option<String>>,
}

pub struct UsersCollection {
    pub indexed: UserIndexedProperties,
    index: SecondaryIndex<UsersCollection>,
    schema_version: u64,
    /// Counts deserializer invocations, to assert on cache behavior.
    pub deserialize_count: Arc<AtomicUsize>,
}

impl UsersCollection {
    pub fn new() -> Self {
        Self::with_schema_version(1)
    }

    pub fn with_schema_version(schema_version: u64) -> Self {
        let is_current: IndexedProperty<UsersCollection, bool> =
            IndexedProperty::new("isCurrent", |u: &User| u.is_current);
        let last_name: IndexedProperty<UsersCollection, String> =
            IndexedProperty::new("lastName", |u: &User| u.last_name.clone());
        let email: IndexedProperty<UsersCollection, Option<String>> =
            IndexedProperty::new("email", |u: &User| u.email.clone());

        let index = SecondaryIndex::new(
            "users",
            1,
            vec![is_current.lift(), last_name.lift(), email.lift()],
        );

        Self {
            indexed: UserIndexedProperties {
                is_current,
                last_name,
                email,
            },
            index,
            schema_version,
            deserialize_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Collection for UsersCollection {
    type Value = User;

    fn name(&self) -> &str {
        "users"
    }

    fn schema_version(&self) -> u64 {
        self.schema_version
    }

    fn serialize(&self, user: &User) -> std::result::Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(user).map_err(|e| SerializationError::Serialize {
            collection: "users".to_string(),
            reason: e.to_string(),
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Option<User> {
        self.deserialize_count.fetch_add(1, Ordering::SeqCst);
        serde_json::from_slice(bytes).ok()
    }

    fn associated_extensions(&self) -> Vec<&dyn Extension<Self>> {
        vec![&self.index]
    }
}

impl IndexedCollection for UsersCollection {
    fn index(&self) -> &SecondaryIndex<Self> {
        &self.index
    }
}

pub struct MoviesCollection;

impl Collection for MoviesCollection {
    type Value = Movie;

    fn name(&self) -> &str {
        "movies"
    }

    fn schema_version(&self) -> u64 {
        1
    }

    fn serialize(&self, movie: &Movie) -> std::result::Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(movie).map_err(|e| SerializationError::Serialize {
            collection: "movies".to_string(),
            reason: e.to_string(),
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Option<Movie> {
        serde_json::from_slice(bytes).ok()
    }
}

pub struct AppCollections {
    pub users: UsersCollection,
    pub movies: MoviesCollection,
}

impl AppCollections {
    pub fn new() -> Self {
        Self {
            users: UsersCollection::new(),
            movies: MoviesCollection,
        }
    }
}

impl Collections for AppCollections {
    fn set_up_collections(&self, tx: &mut ReadWriteTransaction<'_, Self>) -> Result<()> {
        tx.register_collection(&self.users)?;
        tx.register_collection(&self.movies)?;
        Ok(())
    }
}

pub fn open_db() -> (Database<AppCollections>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("turf.db"), AppCollections::new()).unwrap();
    (db, dir)
}

/// Write the three users of the index-query scenarios.
pub fn seed_users(db: &Database<AppCollections>) {
    let connection = db.new_connection().unwrap();
    connection
        .read_write_transaction(|tx, collections| {
            let mut users = tx.read_write(&collections.users);
            users.set("AmyAdams", &user("Amy", "Adams", true, Some("amy@example.com")))?;
            users.set("TomHanks", &user("Tom", "Hanks", false, Some("tom@example.com")))?;
            users.set("BillMurray", &user("Bill", "Murray", true, None))?;
            Ok(())
        })
        .unwrap();
}
