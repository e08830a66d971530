//! Maintenance tool for the reputation ledger.
//!
//! The platform itself calls into the library, but accepting answers or
//! activating users by hand is useful for repairs and for trying out rank
//! configurations.

use std::{
	env,
	path::{Path, PathBuf},
	process,
	str::FromStr,
	sync::Arc,
};

use log::*;
use reputation::{
	activation::{AccountActivation, Activation},
	config::{self, Config},
	db::{Database, PersistenceHandle},
	ledger::{AcceptAnswer, ActivityLedger, CancelAcceptAnswer, Ledger},
	migration::Migrations,
	notification::QueueSink,
};


const USAGE: &str = "usage: reputationd <command>

commands:
  migrate
  create-user <name> [rank]
  rank <user>
  activate <user>
  accept <trigger> <answer> <question> <asker> <answerer> [--self]
  cancel-accept <trigger> <answer> <question> <asker> <answerer>";

enum Command {
	Migrate,
	CreateUser(String, i64),
	Rank(i64),
	Activate(i64),
	Accept(AcceptAnswer),
	CancelAccept(CancelAcceptAnswer),
}


fn initialize_logging() {
	if let Some(filename) = env::var_os("REPUTATION_LOG_FILE") {
		simple_logging::log_to_file(filename, LevelFilter::Debug)
			.expect("unable to initialize logger")
	} else {
		env_logger::init()
	}
}

fn config_path() -> PathBuf {
	match env::var_os(config::CONFIG_FILE_ENV) {
		Some(path) => PathBuf::from(path),
		None => PathBuf::from(config::CONFIG_FILE_PATH),
	}
}

fn load_config(path: &Path) -> Option<Config> {
	if !path.exists() {
		warn!(
			"Config file {} not found, using the default configuration.",
			path.display()
		);
		return Some(Config::default());
	}
	match Config::load(path) {
		Ok(c) => Some(c),
		Err(e) => {
			error!("Unable to load config file {}: {}", path.display(), e);
			None
		}
	}
}

fn parse_id(string: &str) -> Option<i64> {
	match i64::from_str(string) {
		Ok(id) => Some(id),
		Err(_) => {
			error!("Not a valid id: {}", string);
			None
		}
	}
}

fn parse_command(args: &[String]) -> Option<Command> {
	let args: Vec<&str> = args.iter().map(|a| a.as_str()).collect();
	let command = match args.as_slice() {
		["migrate"] => Command::Migrate,
		["create-user", name] => Command::CreateUser(name.to_string(), 1),
		["create-user", name, rank] => Command::CreateUser(name.to_string(), parse_id(rank)?),
		["rank", user] => Command::Rank(parse_id(user)?),
		["activate", user] => Command::Activate(parse_id(user)?),
		["accept", trigger, answer, question, asker, answerer, rest @ ..] => {
			let is_self = match rest {
				[] => false,
				["--self"] => true,
				_ => return None,
			};
			Command::Accept(AcceptAnswer {
				trigger_user_id: parse_id(trigger)?,
				answer_object_id: answer.to_string(),
				question_object_id: question.to_string(),
				question_user_id: parse_id(asker)?,
				answer_user_id: parse_id(answerer)?,
				is_self,
			})
		}
		["cancel-accept", trigger, answer, question, asker, answerer] =>
			Command::CancelAccept(CancelAcceptAnswer {
				trigger_user_id: parse_id(trigger)?,
				answer_object_id: answer.to_string(),
				question_object_id: question.to_string(),
				question_user_id: parse_id(asker)?,
				answer_user_id: parse_id(answerer)?,
			}),
		_ => return None,
	};
	Some(command)
}

async fn load_database(config: &Config) -> Option<Database> {
	let path = PathBuf::from(&config.database_path);
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			if let Err(e) = tokio::fs::create_dir_all(parent).await {
				error!("Unable to create database folder {}: {}", parent.display(), e);
				return None;
			}
		}
	}

	let db = match Database::load(path).await {
		Ok(db) => db,
		Err(e) => {
			error!("Unable to load database: {}", e);
			return None;
		}
	};

	// Run migrations (does nothing if there is nothing to migrate)
	match Migrations::load().run(&db).await {
		Ok(version) => debug!("Database is at version {}", version),
		Err(e) => {
			error!("Unable to migrate database: {}", e);
			return None;
		}
	}
	Some(db)
}

async fn run(command: Command, db: &Database, config: &Config) -> bool {
	let sink = Arc::new(QueueSink::new(
		db.clone(),
		config.notification_queue_capacity,
	));
	let ledger = Ledger::from_config(db.clone(), config, sink);

	match command {
		Command::Migrate => {
			info!("Database is up to date.");
			true
		}
		Command::CreateUser(name, rank) => match db.create_user(&name, rank).await {
			Ok(id) => {
				println!("{}", id);
				true
			}
			Err(e) => {
				error!("Unable to create user {}: {}", name, e);
				false
			}
		},
		Command::Rank(user_id) => match db.load_rank(user_id).await {
			Ok(rank) => {
				println!("{}", rank);
				true
			}
			Err(e) => {
				error!("Unable to load rank of user {}: {}", user_id, e);
				false
			}
		},
		Command::Activate(user_id) =>
			match AccountActivation::new(ledger).activate_user(user_id).await {
				Ok(Activation::Activated { delta }) => {
					println!("activated user {} ({:+})", user_id, delta);
					true
				}
				Ok(Activation::AlreadyActive) => {
					println!("user {} was already activated", user_id);
					true
				}
				Err(e) => {
					error!("Unable to activate user {}: {}", user_id, e);
					false
				}
			},
		Command::Accept(op) => match ActivityLedger::new(ledger).accept_answer(&op).await {
			Ok(()) => true,
			Err(e) => {
				error!("Unable to accept answer {}: {}", &op.answer_object_id, e);
				false
			}
		},
		Command::CancelAccept(op) =>
			match ActivityLedger::new(ledger).cancel_accept_answer(&op).await {
				Ok(()) => true,
				Err(e) => {
					error!(
						"Unable to cancel acceptance of answer {}: {}",
						&op.answer_object_id, e
					);
					false
				}
			},
	}
}

#[tokio::main]
async fn main() {
	initialize_logging();

	let args: Vec<String> = env::args().skip(1).collect();
	let command = match parse_command(&args) {
		Some(c) => c,
		None => {
			eprintln!("{}", USAGE);
			process::exit(2);
		}
	};

	let config = match load_config(&config_path()) {
		Some(c) => c,
		None => process::exit(1),
	};
	let db = match load_database(&config).await {
		Some(db) => db,
		None => process::exit(1),
	};

	let success = run(command, &db, &config).await;
	if let Err(e) = db.close().await {
		warn!("Unable to close database: {}", e);
	}
	if !success {
		process::exit(1);
	}
}
