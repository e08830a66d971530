use std::{collections::HashMap, fmt, fs, io, path::Path};

use serde::*;
use thiserror::Error;


/// The file path of the configuration file
#[cfg(target_family = "unix")]
pub const CONFIG_FILE_PATH: &str = "/etc/reputation/config.toml";
#[cfg(target_family = "windows")]
pub const CONFIG_FILE_PATH: &str = "C:\\Program Files\\reputation\\config.toml";

/// Environment variable that overrides `CONFIG_FILE_PATH`.
pub const CONFIG_FILE_ENV: &str = "REPUTATION_CONFIG";

pub const DEFAULT_RANK_FLOOR: i64 = 1;
pub const DEFAULT_NOTIFICATION_QUEUE_CAPACITY: u64 = 10000;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
	pub database_path: String,

	/// Applying an activity never takes a user's rank below this value. Cancelling
	/// one gives back exactly what was applied, floor or not.
	pub rank_floor: Option<i64>,
	pub notification_queue_capacity: Option<u64>,

	/// The activity types, by their key, e.g. `answer.accepted`.
	pub activity_types: HashMap<String, ActivityTypeConfig>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ActivityTypeConfig {
	pub code: i32,
	pub rank: i64,
}

#[derive(Debug, Error)]
pub enum Error {
	Io(#[from] io::Error),
	Parse(#[from] toml::de::Error),
}


impl Config {
	pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
		let content = fs::read_to_string(path)?;
		Self::parse(&content)
	}

	/// Parses a config file. Activity types that the file leaves out keep their
	/// default.
	pub fn parse(content: &str) -> Result<Self, Error> {
		let mut config: Config = toml::from_str(content)?;
		for (key, value) in Self::default_activity_types() {
			config.activity_types.entry(key).or_insert(value);
		}
		Ok(config)
	}

	fn default_activity_types() -> HashMap<String, ActivityTypeConfig> {
		let mut map = HashMap::with_capacity(3);
		map.insert(
			"answer.accept".to_string(),
			ActivityTypeConfig { code: 1, rank: 2 },
		);
		map.insert(
			"answer.accepted".to_string(),
			ActivityTypeConfig { code: 2, rank: 15 },
		);
		map.insert(
			"user.activated".to_string(),
			ActivityTypeConfig { code: 3, rank: 0 },
		);
		map
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			database_path: "reputation.sqlite".to_string(),
			rank_floor: Some(DEFAULT_RANK_FLOOR),
			notification_queue_capacity: None,
			activity_types: Self::default_activity_types(),
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Io(e) => write!(f, "unable to read config file: {}", e),
			Self::Parse(e) => write!(f, "unable to parse config file: {}", e),
		}
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_overrides() {
		let config = Config::parse(
			r#"
			database_path = "/var/lib/reputation/db.sqlite"
			rank_floor = 0

			[activity_types."answer.accepted"]
			code = 12
			rank = 10
		"#,
		)
		.unwrap();

		assert_eq!(config.database_path, "/var/lib/reputation/db.sqlite");
		assert_eq!(config.rank_floor, Some(0));
		assert_eq!(
			config.activity_types["answer.accepted"],
			ActivityTypeConfig { code: 12, rank: 10 }
		);
		// Untouched types keep their defaults
		assert_eq!(
			config.activity_types["answer.accept"],
			ActivityTypeConfig { code: 1, rank: 2 }
		);
	}

	#[test]
	fn test_parse_rejects_garbage() {
		assert!(matches!(
			Config::parse("rank_floor = \"low\""),
			Err(Error::Parse(_))
		));
	}
}
