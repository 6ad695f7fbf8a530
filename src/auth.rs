use std::fmt;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::engine::EngineError;

pub const ADMIN_USER: &str = "admin";
pub const OPERATOR_USER: &str = "operator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Operator,
    Client,
}

impl Role {
    /// Role for a login name. The two staff accounts are fixed; every other
    /// user name is a client.
    pub fn for_user(user: &str) -> Self {
        match user {
            ADMIN_USER => Role::Admin,
            OPERATOR_USER => Role::Operator,
            _ => Role::Client,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Operator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Client => "client",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    BrowseCatalog,
    Book,
    ManageOwnReservations,
    ManageFleet,
    ManageAllReservations,
    ViewReports,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::BrowseCatalog => "browse the catalog",
            Capability::Book => "book vehicles",
            Capability::ManageOwnReservations => "manage own reservations",
            Capability::ManageFleet => "manage the fleet",
            Capability::ManageAllReservations => "manage all reservations",
            Capability::ViewReports => "view reports",
        })
    }
}

/// The whole permission matrix.
pub fn allows(role: Role, capability: Capability) -> bool {
    match role {
        Role::Admin | Role::Operator => true,
        Role::Client => matches!(
            capability,
            Capability::BrowseCatalog | Capability::Book | Capability::ManageOwnReservations
        ),
    }
}

pub fn authorize(role: Role, capability: Capability) -> Result<(), EngineError> {
    if allows(role, capability) {
        Ok(())
    } else {
        Err(EngineError::Forbidden { role, capability })
    }
}

/// Who is calling into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub role: Role,
    pub user: String,
}

impl Actor {
    pub fn new(user: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            role: Role::for_user(&user),
            user,
        }
    }

    pub fn admin() -> Self {
        Self::new(ADMIN_USER)
    }

    pub fn operator() -> Self {
        Self::new(OPERATOR_USER)
    }

    pub fn client(name: impl Into<String>) -> Self {
        Self {
            role: Role::Client,
            user: name.into(),
        }
    }

    pub fn authorize(&self, capability: Capability) -> Result<(), EngineError> {
        authorize(self.role, capability)
    }

    /// Staff may touch any reservation; clients only their own.
    pub fn authorize_owner(&self, owner: &str) -> Result<(), EngineError> {
        if allows(self.role, Capability::ManageAllReservations) {
            return Ok(());
        }
        self.authorize(Capability::ManageOwnReservations)?;
        if self.user == owner {
            Ok(())
        } else {
            Err(EngineError::Forbidden {
                role: self.role,
                capability: Capability::ManageAllReservations,
            })
        }
    }
}

/// Cleartext password source: one shared password per role.
#[derive(Debug, Clone)]
pub struct FleetAuthSource {
    admin_password: String,
    operator_password: String,
    client_password: String,
}

impl FleetAuthSource {
    pub fn new(admin_password: String, operator_password: String, client_password: String) -> Self {
        Self {
            admin_password,
            operator_password,
            client_password,
        }
    }

    fn password_for(&self, role: Role) -> &str {
        match role {
            Role::Admin => &self.admin_password,
            Role::Operator => &self.operator_password,
            Role::Client => &self.client_password,
        }
    }
}

#[async_trait]
impl AuthSource for FleetAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user: String = login.user().map(|u| u.to_string()).ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                "user name required".into(),
            )))
        })?;
        let role = Role::for_user(&user);
        Ok(Password::new(None, self.password_for(role).as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_hold_every_capability() {
        for role in [Role::Admin, Role::Operator] {
            for cap in [
                Capability::BrowseCatalog,
                Capability::Book,
                Capability::ManageOwnReservations,
                Capability::ManageFleet,
                Capability::ManageAllReservations,
                Capability::ViewReports,
            ] {
                assert!(authorize(role, cap).is_ok(), "{role} {cap}");
            }
        }
    }

    #[test]
    fn clients_cannot_administer() {
        assert!(authorize(Role::Client, Capability::Book).is_ok());
        assert!(authorize(Role::Client, Capability::BrowseCatalog).is_ok());
        for cap in [
            Capability::ManageFleet,
            Capability::ManageAllReservations,
            Capability::ViewReports,
        ] {
            assert!(matches!(
                authorize(Role::Client, cap),
                Err(EngineError::Forbidden { role: Role::Client, .. })
            ));
        }
    }

    #[test]
    fn roles_from_login_names() {
        assert_eq!(Role::for_user("admin"), Role::Admin);
        assert_eq!(Role::for_user("operator"), Role::Operator);
        assert_eq!(Role::for_user("maria"), Role::Client);
        assert_eq!(Role::for_user("Admin"), Role::Client);
    }

    #[test]
    fn owner_check() {
        let ana = Actor::client("ana");
        assert!(ana.authorize_owner("ana").is_ok());
        assert!(ana.authorize_owner("bob").is_err());
        assert!(Actor::operator().authorize_owner("bob").is_ok());
        assert!(Actor::admin().authorize_owner("bob").is_ok());
    }

    #[test]
    fn passwords_per_role() {
        let src = FleetAuthSource::new("a".into(), "o".into(), "c".into());
        assert_eq!(src.password_for(Role::Admin), "a");
        assert_eq!(src.password_for(Role::Operator), "o");
        assert_eq!(src.password_for(Role::Client), "c");
    }
}
