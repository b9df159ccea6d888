pub mod prelude {
    pub use entity::prelude::*;
    pub use entity::sea_orm_active_enums::*;
    pub use entity::{
        action, digest_item, email_account, executed_action, executed_rule, rule,
        scheduled_action, thread_tracker, user,
    };
    pub use sea_orm::{
        prelude::{DateTimeWithTimeZone, Expr, Json, Uuid},
        sea_query::OnConflict,
        ActiveModelTrait, ActiveValue, ColumnTrait, Condition, ConnectionTrait,
        DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, EntityTrait, IsolationLevel,
        ModelTrait, Order, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait,
        Set, TransactionTrait,
    };
}
