//! Changing the rank of users.
//!
//! Any change to a user's rank has to happen while holding that user's lock,
//! which is obtained with `RankMutator::lock_users` inside the same
//! transaction.
//!
//! SQLite can only lock the whole database, so there the lock of one user
//! blocks writers for any other user as well. Operations on disjoint users
//! don't deadlock or fail on each other, but they do run one at a time.

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::*;
use sea_orm::{prelude::*, sea_query::Expr, DatabaseBackend, QueryFilter, QuerySelect};

use crate::{
	activity_store::Transition,
	db::{self, PersistenceHandle, Transaction},
	entity::user,
	trace,
};


#[async_trait]
pub trait RankMutator: Send + Sync {
	/// Locks the given users for the remainder of the transaction, and returns
	/// the rank each of them had at the moment the lock was taken.
	async fn lock_users(
		&self, tx: &Transaction, user_ids: &[i64],
	) -> db::Result<BTreeMap<i64, i64>>;

	/// Adds `delta` to the user's rank, and returns the resulting rank.
	/// `current_rank` is the rank as observed while holding the lock.
	///
	/// An applied delta may be limited, the caller learns how much of it was
	/// added from the returned rank. The reversal of a cancelled activity is
	/// always added in full.
	async fn change_rank(
		&self, tx: &Transaction, user_id: i64, current_rank: i64, delta: i64,
		transition: Transition,
	) -> db::Result<i64>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SqlRankMutator {
	/// Applied debits never take a rank below this value.
	floor: Option<i64>,
}


/// Limits a debit so that it doesn't push the rank below `floor`. Credits are
/// never touched, and a debit never turns into a credit when the rank already
/// is below the floor.
pub fn clamp_delta(current_rank: i64, delta: i64, floor: Option<i64>) -> i64 {
	match floor {
		Some(floor) if delta < 0 => delta.max((floor - current_rank).min(0)),
		_ => delta,
	}
}


impl SqlRankMutator {
	pub fn new(floor: Option<i64>) -> Self { Self { floor } }

	/// SQLite has no row locks. Writing to the row takes the database wide
	/// write lock instead, which is held until the transaction ends.
	async fn touch(&self, tx: &Transaction, user_id: i64) -> db::Result<()> {
		let result = user::Entity::update_many()
			.col_expr(user::Column::Rank, Expr::col(user::Column::Rank).into())
			.filter(user::Column::Id.eq(user_id))
			.exec(tx.inner())
			.await?;
		if result.rows_affected == 0 {
			return trace::err(db::Error::MissingUser(user_id));
		}
		Ok(())
	}
}

#[async_trait]
impl RankMutator for SqlRankMutator {
	async fn lock_users(
		&self, tx: &Transaction, user_ids: &[i64],
	) -> db::Result<BTreeMap<i64, i64>> {
		// Always lock in the same order, so that two transactions can't end up
		// waiting on each other.
		let mut ids = user_ids.to_vec();
		ids.sort_unstable();
		ids.dedup();

		let mut ranks = BTreeMap::new();
		for user_id in ids {
			let query = user::Entity::find_by_id(user_id);
			let record = if tx.backend() == DatabaseBackend::Sqlite {
				self.touch(tx, user_id).await?;
				query.one(tx.inner()).await?
			} else {
				query.lock_exclusive().one(tx.inner()).await?
			};
			match record {
				Some(r) => {
					ranks.insert(user_id, r.rank);
				}
				None => return trace::err(db::Error::MissingUser(user_id)),
			}
		}
		Ok(ranks)
	}

	async fn change_rank(
		&self, tx: &Transaction, user_id: i64, current_rank: i64, delta: i64,
		transition: Transition,
	) -> db::Result<i64> {
		let delta = match transition {
			Transition::Apply => clamp_delta(current_rank, delta, self.floor),
			Transition::Cancel => delta,
		};
		if delta == 0 {
			return Ok(current_rank);
		}

		let result = user::Entity::update_many()
			.col_expr(
				user::Column::Rank,
				Expr::col(user::Column::Rank).add(delta),
			)
			.filter(user::Column::Id.eq(user_id))
			.exec(tx.inner())
			.await?;
		if result.rows_affected == 0 {
			return trace::err(db::Error::MissingUser(user_id));
		}
		debug!(
			"Changed rank of user {} by {} from {}",
			user_id, delta, current_rank
		);
		Ok(current_rank + delta)
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::test;

	#[test]
	fn test_clamp_delta() {
		assert_eq!(clamp_delta(5, 10, Some(1)), 10);
		assert_eq!(clamp_delta(20, -10, Some(1)), -10);
		assert_eq!(clamp_delta(5, -10, Some(1)), -4);
		assert_eq!(clamp_delta(1, -10, Some(1)), 0);
		// Already below the floor, a debit can't raise the rank
		assert_eq!(clamp_delta(-3, -10, Some(1)), 0);
		assert_eq!(clamp_delta(5, -10, None), -10);
	}

	#[tokio::test]
	async fn test_lock_and_change() {
		let db = test::load_database("db").await;
		let alice = db.create_user("alice", 1).await.unwrap();
		let bob = db.create_user("bob", 7).await.unwrap();
		let mutator = SqlRankMutator::new(Some(1));

		let tx = db.transaction().await.unwrap();
		let ranks = mutator.lock_users(&tx, &[bob, alice, bob]).await.unwrap();
		assert_eq!(ranks.len(), 2);
		assert_eq!(ranks[&alice], 1);
		assert_eq!(ranks[&bob], 7);

		let rank = mutator
			.change_rank(&tx, alice, 1, 15, Transition::Apply)
			.await
			.unwrap();
		assert_eq!(rank, 16);
		let rank = mutator
			.change_rank(&tx, bob, 7, -10, Transition::Apply)
			.await
			.unwrap();
		assert_eq!(rank, 1);
		tx.commit().await.unwrap();

		assert_eq!(db.load_rank(alice).await.unwrap(), 16);
		assert_eq!(db.load_rank(bob).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_reversal_ignores_floor() {
		let db = test::load_database("db").await;
		let alice = db.create_user("alice", 0).await.unwrap();
		let mutator = SqlRankMutator::new(Some(1));

		let tx = db.transaction().await.unwrap();
		mutator.lock_users(&tx, &[alice]).await.unwrap();
		let rank = mutator
			.change_rank(&tx, alice, 0, 2, Transition::Apply)
			.await
			.unwrap();
		assert_eq!(rank, 2);
		let rank = mutator
			.change_rank(&tx, alice, 2, -2, Transition::Cancel)
			.await
			.unwrap();
		assert_eq!(rank, 0);
		tx.commit().await.unwrap();
		assert_eq!(db.load_rank(alice).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_lock_missing_user() {
		let db = test::load_database("db").await;
		let alice = db.create_user("alice", 1).await.unwrap();
		let mutator = SqlRankMutator::default();

		let tx = db.transaction().await.unwrap();
		match mutator.lock_users(&tx, &[alice, alice + 1]).await {
			Err(e) => assert!(matches!(*e, db::Error::MissingUser(id) if id == alice + 1)),
			Ok(_) => panic!("locked a user that doesn't exist"),
		}
	}
}
