//! The one-off rank bonus a user receives when their account gets activated.

use log::*;

use crate::{
	activity_store::{ActivityKey, Applied, Candidate},
	activity_type::ActivityKind,
	ledger::{Ledger, Result},
};


/// The object id recorded for activations, which aren't about any object.
pub const ACTIVATION_OBJECT_ID: &str = "0";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
	Activated { delta: i64 },
	/// The user has been activated before, nothing changed.
	AlreadyActive,
}

#[derive(Clone)]
pub struct AccountActivation {
	ledger: Ledger,
}


impl AccountActivation {
	pub fn new(ledger: Ledger) -> Self { Self { ledger } }

	pub async fn activate_user(&self, user_id: i64) -> Result<Activation> {
		let activated = self.ledger.resolve(ActivityKind::UserActivated).await?;

		let tx = self.ledger.db.transaction().await?;
		let mut ranks = self.ledger.mutator.lock_users(&tx, &[user_id]).await?;

		if let Some(record) = self
			.ledger
			.store
			.find_by_user(&tx, user_id, activated.code)
			.await?
		{
			debug!(
				"User {} has already been activated by activity {}",
				user_id, record.id
			);
			return Ok(Activation::AlreadyActive);
		}

		let candidate = Candidate {
			key: ActivityKey {
				object_id: ACTIVATION_OBJECT_ID.to_string(),
				user_id,
				trigger_user_id: user_id,
				activity_type: activated.code,
			},
			original_object_id: ACTIVATION_OBJECT_ID.to_string(),
			rank: activated.rank,
			revision_id: None,
		};
		let applied: Applied = self.ledger.store.upsert_available(&tx, &candidate).await?;
		self.ledger.apply_deltas(&tx, &mut ranks, &[applied]).await?;
		tx.commit().await?;

		info!("Activated user {} with {} rank", user_id, applied.delta);
		Ok(Activation::Activated {
			delta: applied.delta,
		})
	}
}
