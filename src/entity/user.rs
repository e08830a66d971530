//! The user row is owned by the account side of the platform. The ledger only
//! ever touches its `rank` column.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "user")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = true)]
	pub id: i64,
	#[sea_orm(unique)]
	pub username: String,
	pub rank: i64,
	pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::activity::Entity")]
	Activity,
}

impl Related<super::activity::Entity> for Entity {
	fn to() -> RelationDef { Relation::Activity.def() }
}

impl ActiveModelBehavior for ActiveModel {}
