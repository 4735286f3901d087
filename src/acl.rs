//! Per-room access control lists.
//!
//! Each permission maps to a set of idents: plain usernames or one of the
//! `$`-prefixed groups below. The operator and the room's broadcaster pass
//! every check. Mutations are write-through to the database.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use tmi_proto::{normalize_room, Rank, User};

use crate::db::Database;
use crate::error::Result;

/// Everyone.
pub const GROUP_ALL: &str = "$all";
/// Channel moderators and above.
pub const GROUP_MODS: &str = "$mods";
/// Channel subscribers.
pub const GROUP_SUBS: &str = "$subs";
/// Turbo users.
pub const GROUP_TURBOS: &str = "$turbos";
/// Twitch staff and above.
pub const GROUP_STAFF: &str = "$staff";
/// Twitch admins.
pub const GROUP_ADMINS: &str = "$admins";

/// The recognized group idents.
pub const GROUPS: [&str; 6] = [
    GROUP_ALL,
    GROUP_MODS,
    GROUP_SUBS,
    GROUP_TURBOS,
    GROUP_STAFF,
    GROUP_ADMINS,
];

/// Access control list for one room.
pub struct Acl {
    room: String,
    operator: String,
    permissions: RwLock<HashMap<String, HashSet<String>>>,
    db: Database,
}

impl Acl {
    /// Load the ACL for a room from the database.
    pub async fn load(db: Database, room: &str, operator: &str) -> Result<Self> {
        let room = normalize_room(room);
        let mut permissions: HashMap<String, HashSet<String>> = HashMap::new();
        for (permission, ident) in db.acl().load(&room).await? {
            permissions.entry(permission).or_default().insert(ident);
        }

        Ok(Acl {
            room,
            operator: operator.to_ascii_lowercase(),
            permissions: RwLock::new(permissions),
            db,
        })
    }

    /// The room this ACL belongs to.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Grant a permission to an ident (username or `$group`).
    /// Returns whether the entry was new.
    pub async fn allow(&self, permission: &str, ident: &str) -> Result<bool> {
        let ident = canonical_ident(ident);
        self.db.acl().allow(&self.room, permission, &ident).await?;
        let added = self
            .permissions
            .write()
            .entry(permission.to_owned())
            .or_default()
            .insert(ident);
        Ok(added)
    }

    /// Revoke a permission from an ident. Returns whether it was present.
    pub async fn deny(&self, permission: &str, ident: &str) -> Result<bool> {
        let ident = canonical_ident(ident);
        self.db.acl().deny(&self.room, permission, &ident).await?;
        let removed = self
            .permissions
            .write()
            .get_mut(permission)
            .is_some_and(|idents| idents.remove(&ident));
        Ok(removed)
    }

    /// Idents holding a permission.
    pub fn allowed_idents(&self, permission: &str) -> Vec<String> {
        let permissions = self.permissions.read();
        let mut idents: Vec<String> = permissions
            .get(permission)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        idents.sort();
        idents
    }

    /// Whether a user holds a permission in this room.
    ///
    /// The operator and the broadcaster (the user whose name is the room's)
    /// are always allowed.
    pub fn is_allowed(&self, user: &User, permission: &str) -> bool {
        let name = user.name.to_ascii_lowercase();
        if name == self.operator || name == self.room {
            return true;
        }

        let permissions = self.permissions.read();
        let Some(idents) = permissions.get(permission) else {
            return false;
        };
        idents.iter().any(|ident| ident_matches(ident, user, &name))
    }
}

fn canonical_ident(ident: &str) -> String {
    ident.to_ascii_lowercase()
}

fn ident_matches(ident: &str, user: &User, name: &str) -> bool {
    match ident {
        GROUP_ALL => true,
        GROUP_MODS => user.rank >= Rank::Moderator,
        GROUP_SUBS => user.subscriber,
        GROUP_TURBOS => user.turbo,
        GROUP_STAFF => user.rank >= Rank::Staff,
        GROUP_ADMINS => user.rank >= Rank::Admin,
        _ => ident == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User {
            name: name.to_owned(),
            ..User::default()
        }
    }

    async fn acl() -> Acl {
        let db = Database::connect(":memory:").await.unwrap();
        Acl::load(db, "#somechan", "the_op").await.unwrap()
    }

    #[tokio::test]
    async fn operator_and_broadcaster_always_pass() {
        let acl = acl().await;
        assert!(acl.is_allowed(&user("The_Op"), "anything"));
        assert!(acl.is_allowed(&user("somechan"), "anything"));
        assert!(!acl.is_allowed(&user("rando"), "anything"));
    }

    #[tokio::test]
    async fn username_grants_are_case_insensitive() {
        let acl = acl().await;
        assert!(acl.allow("echo", "SomeGuy").await.unwrap());
        assert!(!acl.allow("echo", "someguy").await.unwrap());

        assert!(acl.is_allowed(&user("SOMEGUY"), "echo"));
        assert!(!acl.is_allowed(&user("someguy"), "other_permission"));

        assert!(acl.deny("echo", "someGuy").await.unwrap());
        assert!(!acl.is_allowed(&user("someguy"), "echo"));
    }

    #[tokio::test]
    async fn group_grants_match_user_attributes() {
        let acl = acl().await;
        acl.allow("timeout", GROUP_MODS).await.unwrap();
        acl.allow("quote", GROUP_SUBS).await.unwrap();

        let mut modder = user("modder");
        modder.rank = Rank::Moderator;
        assert!(acl.is_allowed(&modder, "timeout"));
        assert!(!acl.is_allowed(&modder, "quote"));

        let mut sub = user("sub");
        sub.subscriber = true;
        assert!(acl.is_allowed(&sub, "quote"));
        assert!(!acl.is_allowed(&sub, "timeout"));
    }

    #[tokio::test]
    async fn staff_outranks_mods_requirement() {
        let acl = acl().await;
        acl.allow("timeout", GROUP_MODS).await.unwrap();

        let mut staff = user("staffer");
        staff.rank = Rank::Staff;
        assert!(acl.is_allowed(&staff, "timeout"));
    }

    #[tokio::test]
    async fn all_group_admits_everyone() {
        let acl = acl().await;
        acl.allow("echo", GROUP_ALL).await.unwrap();
        assert!(acl.is_allowed(&user("anybody"), "echo"));
    }

    #[tokio::test]
    async fn grants_survive_reload() {
        let db = Database::connect(":memory:").await.unwrap();
        {
            let acl = Acl::load(db.clone(), "chan", "op").await.unwrap();
            acl.allow("echo", "someone").await.unwrap();
        }
        let acl = Acl::load(db, "chan", "op").await.unwrap();
        assert!(acl.is_allowed(&user("someone"), "echo"));
    }
}
