use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tempfile::NamedTempFile;

use crate::{
	activation::AccountActivation,
	activity_type::{ActivityKind, StaticRegistry},
	activity_store::SqlActivityStore,
	db::Database,
	ledger::{ActivityLedger, Ledger},
	migration::Migrations,
	notification::*,
	rank::SqlRankMutator,
};


/// Remembers every notification that was sent to it.
#[derive(Clone, Default)]
pub struct RecordingSink {
	messages: Arc<Mutex<Vec<NotificationMessage>>>,
	/// Fail every send, after recording the message.
	pub fail: bool,
}

/// Everything needed to run ledger operations against a fresh database.
pub struct TestLedger {
	pub db: Database,
	pub sink: RecordingSink,
	pub answers: ActivityLedger,
	pub activation: AccountActivation,
}


pub fn initialize_rng() -> ChaCha8Rng {
	let seed = <ChaCha8Rng as SeedableRng>::Seed::default();
	ChaCha8Rng::from_seed(seed)
}

pub async fn load_database(filename: &str) -> Database {
	let temp_file = NamedTempFile::with_prefix(filename).unwrap();
	let db = Database::load(temp_file.path().to_owned())
		.await
		.expect("unable to load database");
	let migrations = Migrations::load();
	migrations.run(&db).await.expect("migration issue");
	debug!("Loaded database at {}", temp_file.path().display());
	// Keep the file around until the end of all tests, SQLite wants to reopen
	// it for every pooled connection.
	let _ = temp_file.into_temp_path().keep();
	db
}

/// The registry with the ranks used throughout the tests: +2 for the asker and
/// +10 for the answerer of an accepted answer, +5 for an activated account.
pub fn registry() -> StaticRegistry {
	StaticRegistry::default()
		.with(ActivityKind::AnswerAccept, 1, 2)
		.with(ActivityKind::AnswerAccepted, 2, 10)
		.with(ActivityKind::UserActivated, 3, 5)
}

/// A ledger with the test registry and a rank floor of 1.
pub async fn load_ledger(filename: &str) -> TestLedger {
	load_ledger_with(filename, registry(), RecordingSink::default(), Some(1)).await
}

pub async fn load_ledger_with(
	filename: &str, registry: StaticRegistry, sink: RecordingSink, rank_floor: Option<i64>,
) -> TestLedger {
	let db = load_database(filename).await;
	let ledger = Ledger::new(
		db.clone(),
		Arc::new(SqlActivityStore),
		Arc::new(SqlRankMutator::new(rank_floor)),
		Arc::new(registry),
		Arc::new(sink.clone()),
	);
	TestLedger {
		db,
		sink,
		answers: ActivityLedger::new(ledger.clone()),
		activation: AccountActivation::new(ledger),
	}
}

impl RecordingSink {
	pub fn failing() -> Self {
		Self {
			messages: Arc::default(),
			fail: true,
		}
	}

	pub fn messages(&self) -> Vec<NotificationMessage> { self.messages.lock().unwrap().clone() }

	pub fn take(&self) -> Vec<NotificationMessage> {
		std::mem::take(&mut *self.messages.lock().unwrap())
	}
}

#[async_trait]
impl NotificationSink for RecordingSink {
	async fn send(&self, message: NotificationMessage) -> Result<(), SendError> {
		self.messages.lock().unwrap().push(message);
		if self.fail {
			Err(SendError::Closed)
		} else {
			Ok(())
		}
	}
}
