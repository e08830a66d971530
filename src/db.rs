use std::{fmt, path::PathBuf, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use log::*;
use sea_orm::{prelude::*, *};
use thiserror::Error;

use crate::{
	entity::user,
	trace::{self, Traceable, Traced},
};


#[derive(Clone)]
pub struct Database {
	orm: DatabaseConnection,
}

/// A unit of work. Everything the ledger does for one operation goes through
/// a single `Transaction`, which is rolled back when dropped without being
/// committed.
pub struct Transaction(sea_orm::DatabaseTransaction);

#[derive(Debug, Error)]
pub enum Error {
	OrmError(sea_orm::DbErr),
	/// A user that the ledger needs to lock or credit doesn't exist.
	MissingUser(i64),
	ActivityNotFound(i64),
}

pub type Result<T> = trace::Result<T, self::Error>;


#[async_trait]
pub trait PersistenceHandle {
	type Inner: ConnectionTrait;

	fn inner(&self) -> &Self::Inner;

	fn backend(&self) -> DatabaseBackend { self.inner().get_database_backend() }

	async fn find_user(&self, user_id: i64) -> Result<Option<user::Model>> {
		Ok(user::Entity::find_by_id(user_id).one(self.inner()).await?)
	}

	async fn find_user_by_name(&self, username: &str) -> Result<Option<user::Model>> {
		let result = user::Entity::find()
			.filter(user::Column::Username.eq(username))
			.one(self.inner())
			.await?;
		Ok(result)
	}

	/// Loads the rank of a user, without locking anything.
	async fn load_rank(&self, user_id: i64) -> Result<i64> {
		match self.find_user(user_id).await? {
			Some(record) => Ok(record.rank),
			None => trace::err(Error::MissingUser(user_id)),
		}
	}

	/// Registers a new user. Account management lives elsewhere in the
	/// platform, this only exists for tooling and tests.
	async fn create_user(&self, username: &str, rank: i64) -> Result<i64> {
		let record = user::ActiveModel {
			id: NotSet,
			username: Set(username.to_string()),
			rank: Set(rank),
			created_at: Set(Utc::now().timestamp_millis()),
		};
		let result = user::Entity::insert(record).exec(self.inner()).await?;
		Ok(result.last_insert_id)
	}
}


impl Database {
	pub async fn load(path: PathBuf) -> Result<Self> {
		let mut opts = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
		opts.idle_timeout(Duration::from_secs(10));
		opts.acquire_timeout(Duration::from_secs(5));
		opts.sqlx_logging(false);
		let orm = sea_orm::Database::connect(opts)
			.await
			.map_err(|e| Error::OrmError(e).trace())?;

		// Writers only wait for each other, readers are never blocked.
		orm.execute_unprepared("PRAGMA journal_mode=WAL").await?;
		debug!("Opened database {}", path.display());
		Ok(Self { orm })
	}

	pub async fn transaction(&self) -> Result<Transaction> {
		let tx = self.orm.begin().await?;
		Ok(Transaction(tx))
	}

	pub async fn close(self) -> Result<()> {
		self.orm.close().await?;
		Ok(())
	}
}

impl Transaction {
	pub async fn commit(self) -> Result<()> {
		self.0.commit().await?;
		Ok(())
	}
}

impl PersistenceHandle for Database {
	type Inner = sea_orm::DatabaseConnection;

	fn inner(&self) -> &Self::Inner { &self.orm }
}

impl PersistenceHandle for Transaction {
	type Inner = sea_orm::DatabaseTransaction;

	fn inner(&self) -> &Self::Inner { &self.0 }
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::OrmError(e) => write!(f, "{}", e),
			Self::MissingUser(id) => write!(f, "user {} is missing", id),
			Self::ActivityNotFound(id) => write!(f, "activity {} doesn't exist", id),
		}
	}
}

impl From<sea_orm::DbErr> for Error {
	fn from(other: sea_orm::DbErr) -> Self { Self::OrmError(other) }
}

impl From<sea_orm::DbErr> for Traced<Error> {
	fn from(other: sea_orm::DbErr) -> Self { Error::OrmError(other).trace() }
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::test;

	#[tokio::test]
	async fn test_user_rank() {
		let db = test::load_database("db").await;

		let id = db.create_user("alice", 1).await.unwrap();
		assert_eq!(db.load_rank(id).await.unwrap(), 1);
		let found = db.find_user_by_name("alice").await.unwrap().unwrap();
		assert_eq!(found.id, id);

		match db.load_rank(id + 1).await {
			Err(e) => assert!(matches!(*e, Error::MissingUser(m) if m == id + 1)),
			Ok(_) => panic!("rank of an unknown user loaded"),
		}
	}

	#[tokio::test]
	async fn test_dropped_transaction_rolls_back() {
		let db = test::load_database("db").await;

		let tx = db.transaction().await.unwrap();
		tx.create_user("bob", 1).await.unwrap();
		drop(tx);
		assert!(db.find_user_by_name("bob").await.unwrap().is_none());

		let tx = db.transaction().await.unwrap();
		tx.create_user("bob", 1).await.unwrap();
		tx.commit().await.unwrap();
		assert!(db.find_user_by_name("bob").await.unwrap().is_some());
	}
}
