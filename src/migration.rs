//! The module for migrating the database.
use std::fmt::Display;

use async_trait::async_trait;
use log::info;
use sea_orm::{
	prelude::*, sea_query::*, DatabaseBackend, DatabaseTransaction, Statement, TransactionTrait,
};

use crate::{
	db::{Database, PersistenceHandle},
	trace,
};

mod v0_1;


/// The latest database version.
pub const LATEST_VERSION: Version = Version { major: 0, minor: 1 };


type Result<T, E> = trace::Result<T, E>;


#[derive(Clone, Debug)]
pub struct Version {
	major: u32,
	minor: u32,
}

pub struct Migrations {
	/// A list of available migrations, ordered at version
	list: Vec<(Version, Box<dyn MigrationTrait + Send + Sync>)>,
}

#[async_trait]
trait MigrationTrait {
	async fn run(&self, tx: &DatabaseTransaction) -> Result<(), DbErr>;
}


impl Migrations {
	pub fn load() -> Self {
		Self {
			list: vec![(Version::new(0, 1), Box::new(v0_1::Migration))],
		}
	}

	/// Creates the version table on a fresh database.
	async fn install(&self, connection: &DatabaseConnection) -> Result<(), DbErr> {
		connection
			.execute_unprepared(
				r#"
				CREATE TABLE IF NOT EXISTS "version" (
					"major" integer NOT NULL,
					"minor" integer NOT NULL
				);
				INSERT INTO "version" (major, minor)
					SELECT 0, 0 WHERE NOT EXISTS (SELECT 1 FROM "version");
			"#,
			)
			.await?;
		Ok(())
	}

	async fn load_version(&self, connection: &DatabaseConnection) -> Result<Version, DbErr> {
		let q = Query::select()
			.from(Alias::new("version"))
			.column(Alias::new("major"))
			.column(Alias::new("minor"))
			.to_owned();
		let (sql, values) = q.build(SqliteQueryBuilder);
		let r = connection
			.query_one(Statement::from_sql_and_values(
				DatabaseBackend::Sqlite,
				sql,
				values,
			))
			.await?;
		let result = match r {
			Some(result) => result,
			None => return Err(DbErr::RecordNotFound("no version in the database".into()).into()),
		};
		let major: u32 = result.try_get_by_index(0)?;
		let minor: u32 = result.try_get_by_index(1)?;
		Ok(Version::new(major, minor))
	}

	async fn store_version(
		&self, tx: &DatabaseTransaction, version: &Version,
	) -> Result<(), DbErr> {
		let q = Query::update()
			.table(Alias::new("version"))
			.values([
				(Alias::new("major"), version.major.into()),
				(Alias::new("minor"), version.minor.into()),
			])
			.to_owned();
		let (sql, values) = q.build(SqliteQueryBuilder);
		let _ = tx
			.execute(Statement::from_sql_and_values(
				DatabaseBackend::Sqlite,
				sql,
				values,
			))
			.await?;
		Ok(())
	}

	pub async fn run(&self, db: &Database) -> Result<Version, DbErr> {
		let connection = db.inner();
		self.install(connection).await?;
		let mut current_version = self.load_version(connection).await?;

		for (new_version, migration) in &self.list {
			if new_version > &current_version {
				let tx = connection.begin().await?;
				info!(
					"Running database migration from {} to {}...",
					current_version, new_version
				);
				migration.run(&tx).await?;
				self.store_version(&tx, new_version).await?;
				tx.commit().await?;
				info!("Migrated database to {}.", new_version);
				current_version = new_version.clone();
			}
		}

		if current_version != LATEST_VERSION {
			return Err(DbErr::Migration(format!(
				"database is at {}, expected {}",
				current_version, LATEST_VERSION
			))
			.into());
		}
		Ok(current_version)
	}
}

impl Version {
	pub fn new(major: u32, minor: u32) -> Self { Self { major, minor } }
}

impl Display for Version {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "v{}.{}", self.major, self.minor)
	}
}

impl PartialEq for Version {
	fn eq(&self, other: &Self) -> bool { self.major == other.major && self.minor == other.minor }
}

impl PartialOrd for Version {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		match self.major.partial_cmp(&other.major) {
			Some(core::cmp::Ordering::Equal) => {}
			ord => return ord,
		}
		self.minor.partial_cmp(&other.minor)
	}
}


#[cfg(test)]
mod tests {
	use tempfile::NamedTempFile;

	use super::*;

	#[tokio::test]
	async fn test_migrations_are_repeatable() {
		let file = NamedTempFile::with_prefix("migration").unwrap();
		let db = Database::load(file.path().to_owned()).await.unwrap();

		let migrations = Migrations::load();
		assert_eq!(migrations.run(&db).await.unwrap(), LATEST_VERSION);
		// Nothing left to do the second time
		assert_eq!(migrations.run(&db).await.unwrap(), LATEST_VERSION);
	}
}
