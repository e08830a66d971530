//! The reputation ledger.
//!
//! Every rank-affecting event is recorded as an activity row. The row decides
//! whether the event still has to be applied to the user's rank, so that
//! repeating an operation never credits or debits anybody twice. The rows and
//! the ranks are changed together in one transaction, after the users
//! involved have been locked. Notifications go out after the commit.

use std::{collections::BTreeMap, sync::Arc};

use log::*;
use thiserror::Error;

use crate::{
	activity_store::{
		ActivityKey, ActivityStore, Applied, Candidate, SqlActivityStore, Status, Transition,
	},
	activity_type::{ActivityKind, ActivityType, ActivityTypeRegistry, StaticRegistry},
	config::Config,
	db::{self, Database, Transaction},
	notification::*,
	rank::{RankMutator, SqlRankMutator},
	trace::{self, Traced},
};


#[derive(Debug, Error)]
pub enum Error {
	#[error("database error: {0}")]
	Database(db::Error),
	/// The activity type isn't known to the registry, which means the
	/// platform is misconfigured.
	#[error("activity type `{0}` is not configured")]
	Misconfigured(&'static str),
}

pub type Result<T> = trace::Result<T, self::Error>;

/// An answer gets accepted as the solution to a question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptAnswer {
	pub trigger_user_id: i64,
	pub answer_object_id: String,
	pub question_object_id: String,
	pub question_user_id: i64,
	pub answer_user_id: i64,
	/// Whether the asker accepts their own answer. Nobody gains rank from that.
	pub is_self: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelAcceptAnswer {
	pub trigger_user_id: i64,
	pub answer_object_id: String,
	pub question_object_id: String,
	pub question_user_id: i64,
	pub answer_user_id: i64,
}

/// The dependencies shared by the ledger operations.
#[derive(Clone)]
pub struct Ledger {
	pub(crate) db: Database,
	pub(crate) store: Arc<dyn ActivityStore>,
	pub(crate) mutator: Arc<dyn RankMutator>,
	pub(crate) registry: Arc<dyn ActivityTypeRegistry>,
	pub(crate) sink: Arc<dyn NotificationSink>,
}

/// The accept and cancel-accept workflows of answers.
#[derive(Clone)]
pub struct ActivityLedger {
	ledger: Ledger,
}


/// The two rows an accepted answer needs: one for the asker and one for the
/// answerer.
fn accept_candidates(
	accept: &ActivityType, accepted: &ActivityType, op: &AcceptAnswer,
) -> Vec<Candidate> {
	let for_asker = Candidate {
		key: ActivityKey {
			object_id: op.answer_object_id.clone(),
			user_id: op.question_user_id,
			trigger_user_id: op.trigger_user_id,
			activity_type: accept.code,
		},
		original_object_id: op.question_object_id.clone(),
		rank: accept.rank,
		revision_id: None,
	};
	let for_answerer = Candidate {
		key: ActivityKey {
			object_id: op.answer_object_id.clone(),
			user_id: op.answer_user_id,
			trigger_user_id: op.trigger_user_id,
			activity_type: accepted.code,
		},
		original_object_id: op.answer_object_id.clone(),
		rank: accepted.rank,
		revision_id: None,
	};

	if op.is_self {
		vec![for_asker.without_rank(), for_answerer.without_rank()]
	} else {
		vec![for_asker, for_answerer]
	}
}


impl Ledger {
	pub fn new(
		db: Database, store: Arc<dyn ActivityStore>, mutator: Arc<dyn RankMutator>,
		registry: Arc<dyn ActivityTypeRegistry>, sink: Arc<dyn NotificationSink>,
	) -> Self {
		Self {
			db,
			store,
			mutator,
			registry,
			sink,
		}
	}

	/// Wires up the SQL implementations according to the config.
	pub fn from_config(db: Database, config: &Config, sink: Arc<dyn NotificationSink>) -> Self {
		Self::new(
			db,
			Arc::new(SqlActivityStore),
			Arc::new(SqlRankMutator::new(config.rank_floor)),
			Arc::new(StaticRegistry::from_config(config)),
			sink,
		)
	}

	pub(crate) async fn resolve(&self, kind: ActivityKind) -> Result<ActivityType> {
		self.registry
			.resolve(kind)
			.await
			.map_err(|e| Error::Misconfigured(e.0).into())
	}

	/// Applies the given rank changes to the locked users. `ranks` holds the
	/// ranks observed when the locks were taken, and is kept up to date so
	/// that a user that is affected twice is changed relative to its latest
	/// rank.
	///
	/// When the mutator only added part of a delta, the row remembers that
	/// part, so that cancelling it later gives back no more than was taken.
	pub(crate) async fn apply_deltas(
		&self, tx: &Transaction, ranks: &mut BTreeMap<i64, i64>, applied: &[Applied],
	) -> Result<()> {
		for a in applied.iter().filter(|a| a.delta != 0) {
			let current = match ranks.get(&a.user_id) {
				Some(rank) => *rank,
				None => return trace::err(Error::Database(db::Error::MissingUser(a.user_id))),
			};
			let new_rank = self
				.mutator
				.change_rank(tx, a.user_id, current, a.delta, a.transition)
				.await?;
			ranks.insert(a.user_id, new_rank);

			let added = new_rank - current;
			if a.transition == Transition::Apply && added != a.delta {
				debug!(
					"Activity {} was limited from {} to {}",
					a.activity_id, a.delta, added
				);
				self.store.record_rank(tx, a.activity_id, added).await?;
			}
		}
		Ok(())
	}

	pub(crate) async fn notify(&self, message: NotificationMessage) {
		let receiver = message.receiver_user_id;
		if let Err(e) = self.sink.send(message).await {
			warn!("Unable to notify user {}: {}", receiver, e);
		}
	}
}

impl ActivityLedger {
	pub fn new(ledger: Ledger) -> Self { Self { ledger } }

	pub async fn accept_answer(&self, op: &AcceptAnswer) -> Result<()> {
		let accept = self.ledger.resolve(ActivityKind::AnswerAccept).await?;
		let accepted = self.ledger.resolve(ActivityKind::AnswerAccepted).await?;
		let candidates = accept_candidates(&accept, &accepted, op);

		let user_ids: Vec<i64> = candidates.iter().map(|c| c.key.user_id).collect();
		let tx = self.ledger.db.transaction().await?;
		let mut ranks = self.ledger.mutator.lock_users(&tx, &user_ids).await?;

		let mut applied = Vec::with_capacity(candidates.len());
		for candidate in &candidates {
			applied.push(self.ledger.store.upsert_available(&tx, candidate).await?);
		}
		self.ledger.apply_deltas(&tx, &mut ranks, &applied).await?;
		tx.commit().await?;
		info!(
			"Answer {} accepted by user {}, rank changes: {:?}",
			&op.answer_object_id,
			op.trigger_user_id,
			applied
				.iter()
				.map(|a| (a.user_id, a.delta))
				.collect::<Vec<_>>()
		);

		for candidate in &candidates {
			if candidate.key.user_id == op.trigger_user_id {
				continue;
			}
			self.ledger
				.notify(NotificationMessage {
					kind: NotificationKind::Achievement,
					object_id: candidate.original_object_id.clone(),
					object_type: if candidate.key.activity_type == accept.code {
						ObjectType::Question
					} else {
						ObjectType::Answer
					},
					receiver_user_id: candidate.key.user_id,
					trigger_user_id: op.trigger_user_id,
					action: NotificationAction::AcceptAnswer,
					rank: candidate.rank,
				})
				.await;
		}
		if op.answer_user_id != op.question_user_id {
			self.ledger
				.notify(NotificationMessage {
					kind: NotificationKind::Inbox,
					object_id: op.answer_object_id.clone(),
					object_type: ObjectType::Answer,
					receiver_user_id: op.answer_user_id,
					trigger_user_id: op.trigger_user_id,
					action: NotificationAction::AcceptAnswer,
					rank: 0,
				})
				.await;
		}
		Ok(())
	}

	pub async fn cancel_accept_answer(&self, op: &CancelAcceptAnswer) -> Result<()> {
		let accept = self.ledger.resolve(ActivityKind::AnswerAccept).await?;
		let accepted = self.ledger.resolve(ActivityKind::AnswerAccepted).await?;

		// Rows that were never created, or are cancelled already, have nothing
		// to reverse.
		let records = self
			.ledger
			.store
			.find_by_object(
				&self.ledger.db,
				&op.answer_object_id,
				&[accept.code, accepted.code],
			)
			.await?;
		let available: Vec<_> = records
			.into_iter()
			.filter(|r| r.status() == Status::Available)
			.collect();
		if available.is_empty() {
			debug!(
				"Answer {} has no acceptance to cancel",
				&op.answer_object_id
			);
			return Ok(());
		}

		let user_ids: Vec<i64> = available.iter().map(|r| r.user_id).collect();
		let tx = self.ledger.db.transaction().await?;
		let mut ranks = self.ledger.mutator.lock_users(&tx, &user_ids).await?;

		let mut applied = Vec::with_capacity(available.len());
		for record in &available {
			applied.push(self.ledger.store.cancel(&tx, record.id).await?);
		}
		self.ledger.apply_deltas(&tx, &mut ranks, &applied).await?;
		tx.commit().await?;
		info!(
			"Acceptance of answer {} cancelled by user {}, rank changes: {:?}",
			&op.answer_object_id,
			op.trigger_user_id,
			applied
				.iter()
				.map(|a| (a.user_id, a.delta))
				.collect::<Vec<_>>()
		);

		// A row that a concurrent cancel got to first has been reported there
		for (record, a) in available.iter().zip(&applied) {
			if !a.changed || record.user_id == op.trigger_user_id {
				continue;
			}
			self.ledger
				.notify(NotificationMessage {
					kind: NotificationKind::Achievement,
					object_id: record.original_object_id.clone(),
					object_type: if record.activity_type == accept.code {
						ObjectType::Question
					} else {
						ObjectType::Answer
					},
					receiver_user_id: record.user_id,
					trigger_user_id: op.trigger_user_id,
					action: NotificationAction::CancelAcceptAnswer,
					rank: a.delta,
				})
				.await;
		}
		Ok(())
	}

	/// Whether the answer currently counts as accepted.
	pub async fn is_accepted(&self, answer_object_id: &str) -> Result<bool> {
		let accepted = self.ledger.resolve(ActivityKind::AnswerAccepted).await?;
		let records = self
			.ledger
			.store
			.find_by_object(&self.ledger.db, answer_object_id, &[accepted.code])
			.await?;
		Ok(records.iter().any(|r| r.status() == Status::Available))
	}
}

impl From<Traced<db::Error>> for Traced<Error> {
	fn from(other: Traced<db::Error>) -> Self { other.map(Error::Database) }
}
