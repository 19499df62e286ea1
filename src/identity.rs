use ulid::Ulid;

/// Role carried by the authenticated principal. Administrators bypass the
/// role checks applied to hosts and guests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Guest,
    Administrator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Guest => "guest",
            Role::Administrator => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved caller of an operation, as handed over by the identity system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Ulid,
    pub role: Role,
}

impl Principal {
    pub fn new(id: Ulid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }

    /// Owner of the record, or an administrator.
    pub fn can_manage(&self, owner_id: Ulid) -> bool {
        self.is_admin() || self.id == owner_id
    }

    /// Parse a login name of the form `<role>:<ulid>`.
    pub fn from_login(user: &str) -> Result<Self, IdentityError> {
        let (role, id) = user
            .split_once(':')
            .ok_or_else(|| IdentityError::Malformed(user.to_string()))?;
        let role = match role.to_lowercase().as_str() {
            "host" => Role::Host,
            "guest" => Role::Guest,
            "admin" | "administrator" => Role::Administrator,
            other => return Err(IdentityError::UnknownRole(other.to_string())),
        };
        let id = Ulid::from_string(id).map_err(|e| IdentityError::BadId(e.to_string()))?;
        Ok(Self { id, role })
    }
}

#[derive(Debug, PartialEq)]
pub enum IdentityError {
    Missing,
    Malformed(String),
    UnknownRole(String),
    BadId(String),
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityError::Missing => write!(f, "no authenticated user"),
            IdentityError::Malformed(u) => {
                write!(f, "malformed user {u:?}: expected <role>:<id>")
            }
            IdentityError::UnknownRole(r) => write!(f, "unknown role: {r}"),
            IdentityError::BadId(e) => write!(f, "bad user id: {e}"),
        }
    }
}

impl std::error::Error for IdentityError {}
