//! Role/ownership rules gating every profile operation.
//!
//! Handlers resolve a `Principal` from the request session, then call
//! `authorize` before touching the students table. A `Denial` carries the
//! user-facing message plus the redirect target the client should follow;
//! it never escapes as a fault.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Student => "student",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A profile operation as seen by the policy. View/Update carry the owning
/// user id of the target profile (None when the profile is unlinked).
#[derive(Debug)]
pub enum Operation<'a> {
    ListAll,
    CreateForOther,
    Delete,
    View { owner: Option<&'a str> },
    Update { owner: Option<&'a str> },
    CreateOwn,
}

#[derive(Debug)]
pub struct Denial {
    pub code: &'static str,
    pub message: String,
    pub redirect: &'static str,
}

fn admin_required() -> Denial {
    Denial {
        code: "permission_denied",
        message: "Access denied. Admin privileges required.".to_string(),
        redirect: "studentDashboard",
    }
}

fn owner_required(verb: &str) -> Denial {
    Denial {
        code: "permission_denied",
        message: format!("You can only {} your own profile.", verb),
        redirect: "studentDashboard",
    }
}

pub fn authorize(principal: Option<&Principal>, op: &Operation) -> Result<(), Denial> {
    let Some(p) = principal else {
        return Err(Denial {
            code: "not_authenticated",
            message: "login required".to_string(),
            redirect: "login",
        });
    };

    match op {
        Operation::ListAll | Operation::CreateForOther | Operation::Delete => {
            if p.is_admin() {
                Ok(())
            } else {
                Err(admin_required())
            }
        }
        Operation::View { owner } => {
            if p.is_admin() || *owner == Some(p.user_id.as_str()) {
                Ok(())
            } else {
                Err(owner_required("view"))
            }
        }
        Operation::Update { owner } => {
            if p.is_admin() || *owner == Some(p.user_id.as_str()) {
                Ok(())
            } else {
                Err(owner_required("edit"))
            }
        }
        // Any authenticated principal may start its own profile; the handler
        // redirects to the existing one when a profile is already linked.
        Operation::CreateOwn => Ok(()),
    }
}
