//! Shared fixtures: a small shop store with users and orders.

use revtrail_capture::{FieldState, MutationKind, PendingMutation, StoreInfo};
use revtrail_config::{SettingsTier, TypeSettings};
use revtrail_mapping::TypeMapper;
use revtrail_types::{RawRecord, TargetType};
use serde_json::json;

/// Originating record attached to user mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
}

/// Identity of the shop store.
pub fn shop_info() -> StoreInfo {
    StoreInfo::new("Shop")
        .with_database("main")
        .with_connection("conn-1")
        .with_transaction("tx-1")
}

/// A new user whose `Id` is assigned by the store on commit.
pub fn user_insert(name: &str, password: &str) -> PendingMutation {
    PendingMutation::new("User", "users", MutationKind::Added)
        .with_key_field(FieldState::generated("Id"))
        .with_field(FieldState::new("Name", json!(name)))
        .with_field(FieldState::new("Password", json!(password)))
        .with_record(RawRecord::new(User {
            id: None,
            name: name.to_string(),
        }))
}

/// A rename of an existing user.
pub fn user_update(id: i64, from: &str, to: &str) -> PendingMutation {
    PendingMutation::new("User", "users", MutationKind::Modified)
        .with_key_field(FieldState::new("Id", json!(id)))
        .with_field(FieldState::tracked("Name", json!(from), json!(to)))
        .with_field(FieldState::new("Password", json!("unchanged")))
        .with_record(RawRecord::new(User {
            id: Some(id),
            name: to.to_string(),
        }))
}

/// Removal of an existing user.
pub fn user_delete(id: i64, name: &str) -> PendingMutation {
    PendingMutation::new("User", "users", MutationKind::Deleted)
        .with_key_field(FieldState::new("Id", json!(id)))
        .with_field(FieldState::new("Name", json!(name)))
        .with_record(RawRecord::new(User {
            id: Some(id),
            name: name.to_string(),
        }))
}

/// A new order with a store-assigned `Id`.
pub fn order_insert(total: f64) -> PendingMutation {
    PendingMutation::new("Order", "orders", MutationKind::Added)
        .with_schema("sales")
        .with_key_field(FieldState::generated("Id"))
        .with_field(FieldState::new("Total", json!(total)))
}

/// Global tier leaving user passwords out.
pub fn user_settings_tier() -> SettingsTier {
    SettingsTier::new().with_type("User", TypeSettings::new().ignore("Password"))
}

/// Target type for user audit rows.
pub fn user_audit_type() -> TargetType {
    TargetType::new("UserAudit").with_fields(["Id", "Name", "Password"])
}

/// Mapper sending users to `UserAudit` rows.
pub fn user_mapper() -> TypeMapper {
    TypeMapper::builder().map("User", user_audit_type()).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_insert_has_generated_key() {
        let mutation = user_insert("test", "123");
        assert!(mutation.is_key("Id"));
        assert!(mutation.field("Id").unwrap().store_generated);
        assert_eq!(mutation.field("Name").unwrap().current, json!("test"));
    }

    #[test]
    fn test_user_update_tracks_original() {
        let mutation = user_update(7, "old", "new");
        let name = mutation.field("Name").unwrap();
        assert!(name.is_modified());
        assert_eq!(name.original, Some(json!("old")));
    }
}
