//! Notifications about rank changes.
//!
//! Sending them is best effort. A notification that can't be delivered is
//! logged by the ledger and then forgotten, it never undoes a rank change.

use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use log::*;
use sea_orm::{prelude::*, NotSet, PaginatorTrait, QueryOrder, QuerySelect, Set};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
	config::DEFAULT_NOTIFICATION_QUEUE_CAPACITY,
	db::{self, Database, PersistenceHandle},
	entity::notification,
};


#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
	/// Shows up in the user's achievements, along with the rank change.
	Achievement,
	Inbox,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
	Question,
	Answer,
	User,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
	AcceptAnswer,
	CancelAcceptAnswer,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct NotificationMessage {
	pub kind: NotificationKind,
	pub object_id: String,
	pub object_type: ObjectType,
	pub receiver_user_id: i64,
	pub trigger_user_id: i64,
	pub action: NotificationAction,
	/// The rank change to show along with an achievement.
	pub rank: i64,
}

#[derive(Debug, Error)]
pub enum SendError {
	/// The receiving end is gone.
	Closed,
	/// Too many notifications are waiting already.
	Full,
	Database(db::Error),
	Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
	async fn send(&self, message: NotificationMessage) -> Result<(), SendError>;
}

/// Hands notifications over to an in-process consumer.
#[derive(Clone)]
pub struct ChannelSink {
	sender: mpsc::Sender<NotificationMessage>,
}

/// Stores notifications in the `notification` table, from which a separate
/// consumer picks them up.
#[derive(Clone)]
pub struct QueueSink {
	db: Database,
	capacity: u64,
}


impl ChannelSink {
	/// Creates a sink together with the receiver it sends into.
	pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<NotificationMessage>) {
		let (sender, receiver) = mpsc::channel(buffer);
		(Self { sender }, receiver)
	}
}

#[async_trait]
impl NotificationSink for ChannelSink {
	async fn send(&self, message: NotificationMessage) -> Result<(), SendError> {
		self.sender.try_send(message).map_err(|e| match e {
			mpsc::error::TrySendError::Full(_) => SendError::Full,
			mpsc::error::TrySendError::Closed(_) => SendError::Closed,
		})
	}
}

impl QueueSink {
	pub fn new(db: Database, capacity: Option<u64>) -> Self {
		Self {
			db,
			capacity: capacity.unwrap_or(DEFAULT_NOTIFICATION_QUEUE_CAPACITY),
		}
	}

	/// Loads the oldest notifications still in the queue.
	pub async fn load_pending(&self, limit: u64) -> db::Result<Vec<(i64, NotificationMessage)>> {
		let records = notification::Entity::find()
			.order_by_asc(notification::Column::Id)
			.limit(limit)
			.all(self.db.inner())
			.await?;

		let mut messages = Vec::with_capacity(records.len());
		for record in records {
			match serde_json::from_str(&record.message) {
				Ok(message) => messages.push((record.id, message)),
				Err(e) => warn!("Notification {} is malformed: {}", record.id, e),
			}
		}
		Ok(messages)
	}

	/// Removes a notification from the queue once it has been delivered.
	pub async fn remove(&self, id: i64) -> db::Result<bool> {
		let result = notification::Entity::delete_by_id(id)
			.exec(self.db.inner())
			.await?;
		Ok(result.rows_affected > 0)
	}

	async fn count(&self) -> db::Result<u64> {
		Ok(notification::Entity::find().count(self.db.inner()).await?)
	}
}

#[async_trait]
impl NotificationSink for QueueSink {
	async fn send(&self, message: NotificationMessage) -> Result<(), SendError> {
		let count = self.count().await.map_err(|e| SendError::Database(e.into_inner()))?;
		if count >= self.capacity {
			return Err(SendError::Full);
		}

		let record = notification::ActiveModel {
			id: NotSet,
			receiver_user_id: Set(message.receiver_user_id),
			message: Set(serde_json::to_string(&message)?),
			created_at: Set(Utc::now().timestamp_millis()),
		};
		notification::Entity::insert(record)
			.exec(self.db.inner())
			.await
			.map_err(|e| SendError::Database(db::Error::OrmError(e)))?;
		Ok(())
	}
}

impl fmt::Display for SendError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Closed => write!(f, "notification receiver is closed"),
			Self::Full => write!(f, "notification queue is full"),
			Self::Database(e) => write!(f, "unable to queue notification: {}", e),
			Self::Encoding(e) => write!(f, "unable to encode notification: {}", e),
		}
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::test;

	fn message(receiver_user_id: i64) -> NotificationMessage {
		NotificationMessage {
			kind: NotificationKind::Inbox,
			object_id: "10020000000000042".to_string(),
			object_type: ObjectType::Answer,
			receiver_user_id,
			trigger_user_id: 1,
			action: NotificationAction::AcceptAnswer,
			rank: 0,
		}
	}

	#[tokio::test]
	async fn test_channel_sink() {
		let (sink, mut receiver) = ChannelSink::channel(1);
		sink.send(message(2)).await.unwrap();
		assert!(matches!(sink.send(message(3)).await, Err(SendError::Full)));
		assert_eq!(receiver.recv().await.unwrap().receiver_user_id, 2);

		drop(receiver);
		assert!(matches!(sink.send(message(4)).await, Err(SendError::Closed)));
	}

	#[tokio::test]
	async fn test_queue_sink() {
		let db = test::load_database("db").await;
		let sink = QueueSink::new(db, Some(2));

		sink.send(message(2)).await.unwrap();
		sink.send(message(3)).await.unwrap();
		assert!(matches!(sink.send(message(4)).await, Err(SendError::Full)));

		let pending = sink.load_pending(10).await.unwrap();
		assert_eq!(pending.len(), 2);
		assert_eq!(pending[0].1, message(2));
		assert!(sink.remove(pending[0].0).await.unwrap());
		assert!(!sink.remove(pending[0].0).await.unwrap());

		// There is room again
		sink.send(message(4)).await.unwrap();
		let receivers: Vec<i64> = sink
			.load_pending(10)
			.await
			.unwrap()
			.into_iter()
			.map(|(_, m)| m.receiver_user_id)
			.collect();
		assert_eq!(receivers, vec![3, 4]);
	}

	#[test]
	fn test_message_encoding() {
		let json = serde_json::to_value(message(2)).unwrap();
		assert_eq!(json["kind"], "inbox");
		assert_eq!(json["object_type"], "answer");
		assert_eq!(json["action"], "accept_answer");
	}
}
