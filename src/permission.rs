use log::info;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};

use crate::entity::{role, user};

/// A single named permission bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Permission(i32);

impl Permission {
    /// Zero-valued: every role trivially holds it and it never changes a mask.
    pub const DIRECTIVO: Self = Self(0);
    pub const FOLLOW: Self = Self(1);
    pub const COMMENT: Self = Self(2);
    pub const WRITE: Self = Self(4);
    pub const MODERATE: Self = Self(8);
    pub const ADMIN: Self = Self(16);

    pub const fn bits(self) -> i32 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PermissionSet(i32);

impl PermissionSet {
    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub fn has_permission(self, perm: Permission) -> bool {
        self.0 & perm.bits() == perm.bits()
    }

    pub fn add_permission(&mut self, perm: Permission) {
        if !self.has_permission(perm) {
            self.0 += perm.bits();
        }
    }

    pub fn remove_permission(&mut self, perm: Permission) {
        if self.has_permission(perm) {
            self.0 -= perm.bits();
        }
    }

    pub fn reset_permissions(&mut self) {
        self.0 = 0;
    }
}

impl role::Model {
    pub fn permission_set(&self) -> PermissionSet {
        PermissionSet::from_bits(self.permissions)
    }

    pub fn has_permission(&self, perm: Permission) -> bool {
        self.permission_set().has_permission(perm)
    }
}

pub const DEFAULT_ROLE: &str = "User";
pub const ADMIN_ROLE: &str = "Administrator";

fn seeded_roles() -> [(&'static str, &'static [Permission]); 4] {
    [
        ("User", &[Permission::FOLLOW, Permission::COMMENT, Permission::WRITE]),
        (
            "Moderator",
            &[Permission::FOLLOW, Permission::COMMENT, Permission::WRITE, Permission::MODERATE],
        ),
        (
            "Administrator",
            &[
                Permission::FOLLOW,
                Permission::COMMENT,
                Permission::WRITE,
                Permission::MODERATE,
                Permission::ADMIN,
            ],
        ),
        ("Directivo", &[Permission::DIRECTIVO]),
    ]
}

/// Creates the fixed roles or resets the existing ones to their permission sets.
/// Exactly one role ends up flagged as default.
pub async fn insert_roles(db: &DatabaseConnection) -> Result<(), DbErr> {
    let txn = db.begin().await?;
    for (name, perms) in seeded_roles() {
        let mut set = PermissionSet::default();
        set.reset_permissions();
        for perm in perms {
            set.add_permission(*perm);
        }
        let is_default = name == DEFAULT_ROLE;

        let existing = role::Entity::find()
            .filter(role::Column::Name.eq(name))
            .one(&txn)
            .await?;
        match existing {
            Some(existing) => {
                let mut active: role::ActiveModel = existing.into();
                active.permissions = Set(set.bits());
                active.is_default = Set(is_default);
                active.update(&txn).await?;
            }
            None => {
                role::ActiveModel {
                    name: Set(name.to_string()),
                    permissions: Set(set.bits()),
                    is_default: Set(is_default),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }
    }
    // roles created outside the seed list must not stay default
    role::Entity::update_many()
        .col_expr(role::Column::IsDefault, sea_orm::sea_query::Expr::value(false))
        .filter(role::Column::Name.ne(DEFAULT_ROLE))
        .exec(&txn)
        .await?;
    txn.commit().await?;
    info!("roles seeded");
    Ok(())
}

/// Role a freshly registered user receives.
pub async fn role_for_new_user<C: ConnectionTrait>(
    db: &C,
    email: &str,
    admin_email: Option<&str>,
) -> Result<Option<role::Model>, DbErr> {
    if admin_email.is_some_and(|admin| admin.eq_ignore_ascii_case(email)) {
        return role::Entity::find()
            .filter(role::Column::Name.eq(ADMIN_ROLE))
            .one(db)
            .await;
    }
    role::Entity::find()
        .filter(role::Column::IsDefault.eq(true))
        .one(db)
        .await
}

pub async fn user_can<C: ConnectionTrait>(db: &C, user: &user::Model, perm: Permission) -> Result<bool, DbErr> {
    let Some(role_id) = user.role_id else {
        return Ok(false);
    };
    let role = role::Entity::find_by_id(role_id).one(db).await?;
    Ok(role.is_some_and(|r| r.has_permission(perm)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_test_db;
    use sea_orm::PaginatorTrait;

    #[test]
    fn add_and_remove_are_idempotent() {
        let mut set = PermissionSet::default();
        set.add_permission(Permission::WRITE);
        set.add_permission(Permission::WRITE);
        assert_eq!(set.bits(), 4);
        set.add_permission(Permission::FOLLOW);
        assert!(set.has_permission(Permission::FOLLOW));
        set.remove_permission(Permission::WRITE);
        set.remove_permission(Permission::WRITE);
        assert_eq!(set.bits(), 1);
        set.reset_permissions();
        assert_eq!(set.bits(), 0);
    }

    #[test]
    fn zero_bit_is_always_held() {
        let mut set = PermissionSet::default();
        assert!(set.has_permission(Permission::DIRECTIVO));
        set.add_permission(Permission::DIRECTIVO);
        assert_eq!(set.bits(), 0);
    }

    #[actix_web::test]
    async fn seeding_creates_roles_with_single_default() {
        let db = connect_test_db().await;
        insert_roles(&db).await.unwrap();
        insert_roles(&db).await.unwrap();

        assert_eq!(role::Entity::find().count(&db).await.unwrap(), 4);
        let defaults = role::Entity::find()
            .filter(role::Column::IsDefault.eq(true))
            .all(&db)
            .await
            .unwrap();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].name, "User");
        assert_eq!(defaults[0].permissions, 7);

        let admin = role::Entity::find()
            .filter(role::Column::Name.eq(ADMIN_ROLE))
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.permissions, 31);
        assert!(admin.has_permission(Permission::ADMIN));
    }

    #[actix_web::test]
    async fn admin_email_gets_administrator_role() {
        let db = connect_test_db().await;
        insert_roles(&db).await.unwrap();

        let admin = role_for_new_user(&db, "Boss@Example.com", Some("boss@example.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.name, ADMIN_ROLE);

        let normal = role_for_new_user(&db, "someone@example.com", Some("boss@example.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(normal.name, DEFAULT_ROLE);
    }
}
