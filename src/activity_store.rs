//! Persistence of the ledger rows.
//!
//! The store never locks anything by itself: the caller is expected to hold
//! the lock of every user whose rows it touches, which is what makes the
//! check-then-write sequences in here safe.

use async_trait::async_trait;
use chrono::Utc;
use log::*;
use sea_orm::{prelude::*, sea_query::Expr, NotSet, QueryFilter, QueryOrder, Set};

use crate::{
	db::{self, Database, PersistenceHandle, Transaction},
	entity::activity,
	trace,
};


/// The two states a ledger row can be in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
	Available,
	Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
	Apply,
	Cancel,
}

/// Identifies a ledger row. No two rows share the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActivityKey {
	pub object_id: String,
	pub user_id: i64,
	pub trigger_user_id: i64,
	pub activity_type: i32,
}

/// A row that an operation wants to see Available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
	pub key: ActivityKey,
	pub original_object_id: String,
	pub rank: i64,
	pub revision_id: Option<String>,
}

/// The outcome of writing one ledger row. `delta` is what still has to be
/// added to the user's rank because of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Applied {
	pub activity_id: i64,
	pub user_id: i64,
	pub delta: i64,
	pub transition: Transition,
	/// Whether this write moved the row into another state. False when
	/// somebody else got there first.
	pub changed: bool,
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
	async fn find_activity(
		&self, tx: &Transaction, key: &ActivityKey,
	) -> db::Result<Option<activity::Model>>;

	/// Finds all rows about the given object for any of the given activity
	/// types, whatever their state.
	async fn find_by_object(
		&self, db: &Database, object_id: &str, activity_types: &[i32],
	) -> db::Result<Vec<activity::Model>>;

	/// Finds a row of the given type for the user, about any object.
	async fn find_by_user(
		&self, tx: &Transaction, user_id: i64, activity_type: i32,
	) -> db::Result<Option<activity::Model>>;

	async fn upsert_available(&self, tx: &Transaction, candidate: &Candidate)
		-> db::Result<Applied>;

	async fn cancel(&self, tx: &Transaction, activity_id: i64) -> db::Result<Applied>;

	/// Overwrites the rank of a row with what was actually added to the
	/// user's rank, so that cancelling the row takes back exactly that.
	async fn record_rank(&self, tx: &Transaction, activity_id: i64, rank: i64)
		-> db::Result<()>;
}

/// The `ActivityStore` on top of the `activity` table.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlActivityStore;


/// The rank change that a transition causes for a row that is currently in
/// state `current`, or doesn't exist yet when `None`.
///
/// Applying an already available row, or cancelling a row that is already
/// cancelled or was never created, changes nothing.
pub fn effective_delta(current: Option<Status>, transition: Transition, rank: i64) -> i64 {
	match (transition, current) {
		(Transition::Apply, None) => rank,
		(Transition::Apply, Some(Status::Cancelled)) => rank,
		(Transition::Apply, Some(Status::Available)) => 0,
		(Transition::Cancel, Some(Status::Available)) => -rank,
		(Transition::Cancel, Some(Status::Cancelled)) => 0,
		(Transition::Cancel, None) => 0,
	}
}

fn now() -> i64 { Utc::now().timestamp_millis() }


impl activity::Model {
	pub fn status(&self) -> Status {
		if self.cancelled {
			Status::Cancelled
		} else {
			Status::Available
		}
	}

	pub fn key(&self) -> ActivityKey {
		ActivityKey {
			object_id: self.object_id.clone(),
			user_id: self.user_id,
			trigger_user_id: self.trigger_user_id,
			activity_type: self.activity_type,
		}
	}
}

impl Candidate {
	/// Takes away the rank of the candidate, while still keeping it around to
	/// be recorded.
	pub fn without_rank(mut self) -> Self {
		self.rank = 0;
		self
	}
}

impl SqlActivityStore {
	async fn insert(&self, tx: &Transaction, candidate: &Candidate) -> db::Result<i64> {
		let timestamp = now();
		let record = activity::ActiveModel {
			id: NotSet,
			user_id: Set(candidate.key.user_id),
			trigger_user_id: Set(candidate.key.trigger_user_id),
			object_id: Set(candidate.key.object_id.clone()),
			original_object_id: Set(candidate.original_object_id.clone()),
			activity_type: Set(candidate.key.activity_type),
			rank: Set(candidate.rank),
			has_rank: Set(candidate.rank != 0),
			cancelled: Set(false),
			cancelled_at: Set(None),
			revision_id: Set(candidate.revision_id.clone()),
			created_at: Set(timestamp),
			updated_at: Set(timestamp),
		};
		let result = activity::Entity::insert(record).exec(tx.inner()).await?;
		Ok(result.last_insert_id)
	}

	/// Makes a cancelled row available again, with the rank it is worth now.
	async fn restore(
		&self, tx: &Transaction, activity_id: i64, candidate: &Candidate,
	) -> db::Result<bool> {
		let result = activity::Entity::update_many()
			.col_expr(activity::Column::Cancelled, Expr::value(false))
			.col_expr(activity::Column::CancelledAt, Expr::value(None::<i64>))
			.col_expr(activity::Column::Rank, Expr::value(candidate.rank))
			.col_expr(activity::Column::HasRank, Expr::value(candidate.rank != 0))
			.col_expr(
				activity::Column::RevisionId,
				Expr::value(candidate.revision_id.clone()),
			)
			.col_expr(activity::Column::UpdatedAt, Expr::value(now()))
			.filter(activity::Column::Id.eq(activity_id))
			.filter(activity::Column::Cancelled.eq(true))
			.exec(tx.inner())
			.await?;
		Ok(result.rows_affected > 0)
	}

	async fn mark_cancelled(&self, tx: &Transaction, activity_id: i64) -> db::Result<bool> {
		let timestamp = now();
		let result = activity::Entity::update_many()
			.col_expr(activity::Column::Cancelled, Expr::value(true))
			.col_expr(activity::Column::CancelledAt, Expr::value(Some(timestamp)))
			.col_expr(activity::Column::UpdatedAt, Expr::value(timestamp))
			.filter(activity::Column::Id.eq(activity_id))
			.filter(activity::Column::Cancelled.eq(false))
			.exec(tx.inner())
			.await?;
		Ok(result.rows_affected > 0)
	}
}

#[async_trait]
impl ActivityStore for SqlActivityStore {
	async fn find_activity(
		&self, tx: &Transaction, key: &ActivityKey,
	) -> db::Result<Option<activity::Model>> {
		let result = activity::Entity::find()
			.filter(activity::Column::ObjectId.eq(key.object_id.as_str()))
			.filter(activity::Column::UserId.eq(key.user_id))
			.filter(activity::Column::TriggerUserId.eq(key.trigger_user_id))
			.filter(activity::Column::ActivityType.eq(key.activity_type))
			.one(tx.inner())
			.await?;
		Ok(result)
	}

	async fn find_by_object(
		&self, db: &Database, object_id: &str, activity_types: &[i32],
	) -> db::Result<Vec<activity::Model>> {
		let results = activity::Entity::find()
			.filter(activity::Column::ObjectId.eq(object_id))
			.filter(activity::Column::ActivityType.is_in(activity_types.iter().copied()))
			.order_by_asc(activity::Column::Id)
			.all(db.inner())
			.await?;
		Ok(results)
	}

	async fn find_by_user(
		&self, tx: &Transaction, user_id: i64, activity_type: i32,
	) -> db::Result<Option<activity::Model>> {
		let result = activity::Entity::find()
			.filter(activity::Column::UserId.eq(user_id))
			.filter(activity::Column::ActivityType.eq(activity_type))
			.one(tx.inner())
			.await?;
		Ok(result)
	}

	async fn upsert_available(
		&self, tx: &Transaction, candidate: &Candidate,
	) -> db::Result<Applied> {
		let user_id = candidate.key.user_id;
		let existing = self.find_activity(tx, &candidate.key).await?;
		let delta = effective_delta(
			existing.as_ref().map(|r| r.status()),
			Transition::Apply,
			candidate.rank,
		);

		let applied = match existing {
			None => {
				let activity_id = self.insert(tx, candidate).await?;
				debug!(
					"Recorded activity {} for user {} on object {}",
					activity_id, user_id, &candidate.key.object_id
				);
				Applied {
					activity_id,
					user_id,
					delta,
					transition: Transition::Apply,
					changed: true,
				}
			}
			Some(record) if record.cancelled => {
				let restored = self.restore(tx, record.id, candidate).await?;
				debug!("Restored cancelled activity {}", record.id);
				Applied {
					activity_id: record.id,
					user_id,
					delta: if restored { delta } else { 0 },
					transition: Transition::Apply,
					changed: restored,
				}
			}
			Some(record) => {
				debug!("Activity {} is already available", record.id);
				Applied {
					activity_id: record.id,
					user_id,
					delta,
					transition: Transition::Apply,
					changed: false,
				}
			}
		};
		Ok(applied)
	}

	async fn cancel(&self, tx: &Transaction, activity_id: i64) -> db::Result<Applied> {
		let record = match activity::Entity::find_by_id(activity_id)
			.one(tx.inner())
			.await?
		{
			Some(r) => r,
			None => return trace::err(db::Error::ActivityNotFound(activity_id)),
		};

		let mut delta = effective_delta(Some(record.status()), Transition::Cancel, record.rank);
		let mut changed = false;
		if record.cancelled {
			debug!("Activity {} is already cancelled", activity_id);
		} else if self.mark_cancelled(tx, activity_id).await? {
			debug!("Cancelled activity {}", activity_id);
			changed = true;
		} else {
			delta = 0;
		}

		Ok(Applied {
			activity_id,
			user_id: record.user_id,
			delta,
			transition: Transition::Cancel,
			changed,
		})
	}

	async fn record_rank(
		&self, tx: &Transaction, activity_id: i64, rank: i64,
	) -> db::Result<()> {
		let result = activity::Entity::update_many()
			.col_expr(activity::Column::Rank, Expr::value(rank))
			.col_expr(activity::Column::HasRank, Expr::value(rank != 0))
			.filter(activity::Column::Id.eq(activity_id))
			.exec(tx.inner())
			.await?;
		if result.rows_affected == 0 {
			return trace::err(db::Error::ActivityNotFound(activity_id));
		}
		Ok(())
	}
}
