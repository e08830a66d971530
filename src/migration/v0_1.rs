use async_trait::async_trait;
use sea_orm::{prelude::*, DatabaseTransaction};

use super::MigrationTrait;
use crate::trace;


pub struct Migration;


#[async_trait]
impl MigrationTrait for Migration {
	async fn run(&self, tx: &DatabaseTransaction) -> trace::Result<(), DbErr> {
		tx.execute_unprepared(
			r#"
			CREATE TABLE "user" (
				"id" integer NOT NULL PRIMARY KEY AUTOINCREMENT,
				"username" text NOT NULL UNIQUE,
				"rank" bigint NOT NULL DEFAULT 1,
				"created_at" bigint NOT NULL
			);

			CREATE TABLE "activity" (
				"id" integer NOT NULL PRIMARY KEY AUTOINCREMENT,
				"user_id" bigint NOT NULL,
				"trigger_user_id" bigint NOT NULL,
				"object_id" text NOT NULL,
				"original_object_id" text NOT NULL,
				"activity_type" integer NOT NULL,
				"rank" bigint NOT NULL DEFAULT 0,
				"has_rank" boolean NOT NULL DEFAULT 0,
				"cancelled" boolean NOT NULL DEFAULT 0,
				"cancelled_at" bigint,
				"revision_id" text,
				"created_at" bigint NOT NULL,
				"updated_at" bigint NOT NULL,
				FOREIGN KEY ("user_id") REFERENCES "user" ("id")
			);
			CREATE UNIQUE INDEX "activity_key"
				ON "activity" ("object_id", "user_id", "trigger_user_id", "activity_type");
			CREATE INDEX "activity_user_type" ON "activity" ("user_id", "activity_type");

			CREATE TABLE "notification" (
				"id" integer NOT NULL PRIMARY KEY AUTOINCREMENT,
				"receiver_user_id" bigint NOT NULL,
				"message" text NOT NULL,
				"created_at" bigint NOT NULL
			);
		"#,
		)
		.await?;
		Ok(())
	}
}
