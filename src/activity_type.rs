//! Activity types tell what kind of event a ledger row is about. The kinds the
//! ledger knows of are fixed, but the numeric code stored in the database and
//! the rank each kind is worth come from the configuration.

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ActivityTypeConfig, Config};


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ActivityKind {
	/// The answer to the user's question has been accepted.
	#[serde(rename = "answer.accept")]
	AnswerAccept,
	/// The user's answer has been accepted.
	#[serde(rename = "answer.accepted")]
	AnswerAccepted,
	#[serde(rename = "user.activated")]
	UserActivated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivityType {
	pub kind: ActivityKind,
	pub code: i32,
	pub rank: i64,
}

#[derive(Debug, Error)]
#[error("activity type `{0}` is not configured")]
pub struct UnknownActivityType(pub &'static str);

#[async_trait]
pub trait ActivityTypeRegistry: Send + Sync {
	async fn resolve(&self, kind: ActivityKind) -> Result<ActivityType, UnknownActivityType>;
}

/// A registry that never changes after it has been loaded.
#[derive(Clone, Debug, Default)]
pub struct StaticRegistry {
	types: HashMap<ActivityKind, ActivityTypeConfig>,
}


impl ActivityKind {
	pub const ALL: [ActivityKind; 3] = [
		ActivityKind::AnswerAccept,
		ActivityKind::AnswerAccepted,
		ActivityKind::UserActivated,
	];

	pub fn key(&self) -> &'static str {
		match self {
			Self::AnswerAccept => "answer.accept",
			Self::AnswerAccepted => "answer.accepted",
			Self::UserActivated => "user.activated",
		}
	}
}

impl fmt::Display for ActivityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.key()) }
}

impl StaticRegistry {
	/// Picks the known activity kinds out of the config. Keys that don't belong
	/// to any kind are ignored.
	pub fn from_config(config: &Config) -> Self {
		let mut types = HashMap::with_capacity(ActivityKind::ALL.len());
		for kind in ActivityKind::ALL {
			if let Some(c) = config.activity_types.get(kind.key()) {
				types.insert(kind, *c);
			}
		}
		Self { types }
	}

	pub fn with(mut self, kind: ActivityKind, code: i32, rank: i64) -> Self {
		self.types.insert(kind, ActivityTypeConfig { code, rank });
		self
	}

	pub fn lookup(&self, kind: ActivityKind) -> Result<ActivityType, UnknownActivityType> {
		match self.types.get(&kind) {
			Some(c) => Ok(ActivityType {
				kind,
				code: c.code,
				rank: c.rank,
			}),
			None => Err(UnknownActivityType(kind.key())),
		}
	}
}

#[async_trait]
impl ActivityTypeRegistry for StaticRegistry {
	async fn resolve(&self, kind: ActivityKind) -> Result<ActivityType, UnknownActivityType> {
		self.lookup(kind)
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_registry_from_default_config() {
		let registry = StaticRegistry::from_config(&Config::default());
		let accepted = registry.lookup(ActivityKind::AnswerAccepted).unwrap();
		assert_eq!(accepted.code, 2);
		assert_eq!(accepted.rank, 15);
	}

	#[test]
	fn test_unknown_kind() {
		let registry = StaticRegistry::default().with(ActivityKind::AnswerAccept, 1, 2);
		let e = registry.lookup(ActivityKind::UserActivated).unwrap_err();
		assert_eq!(e.0, "user.activated");
	}

	#[test]
	fn test_key_matches_serde_name() {
		for kind in ActivityKind::ALL {
			let json = serde_json::to_string(&kind).unwrap();
			assert_eq!(json, format!("\"{}\"", kind.key()));
		}
	}
}
