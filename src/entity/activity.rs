//! An `activity` row records one rank-affecting event between a trigger user
//! and the user that receives the rank. There is at most one row for every
//! (object, user, trigger user, activity type) combination, enforced by a
//! unique index.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "activity")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = true)]
	pub id: i64,
	/// The user whose rank is affected.
	pub user_id: i64,
	pub trigger_user_id: i64,
	pub object_id: String,
	/// The object used to group notifications, e.g. the question an accepted
	/// answer belongs to.
	pub original_object_id: String,
	pub activity_type: i32,
	/// The configured rank delta of this row. Whether it still has to be
	/// applied follows from `cancelled`, not from this value.
	pub rank: i64,
	pub has_rank: bool,
	pub cancelled: bool,
	pub cancelled_at: Option<i64>,
	pub revision_id: Option<String>,
	pub created_at: i64,
	pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::user::Entity",
		from = "Column::UserId",
		to = "super::user::Column::Id",
		on_update = "NoAction",
		on_delete = "NoAction"
	)]
	User,
}

impl Related<super::user::Entity> for Entity {
	fn to() -> RelationDef { Relation::User.def() }
}

impl ActiveModelBehavior for ActiveModel {}
