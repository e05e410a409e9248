//! Role hierarchy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform role, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Enrolled learner
    Student = 0,
    /// Course instructor
    Teacher = 1,
    /// Administrator of one department
    DepartmentAdmin = 2,
    /// Administrator of one institution
    InstitutionAdmin = 3,
    /// Platform operator
    SystemAdmin = 4,
}

impl Role {
    /// Every role, lowest tier first
    pub const ALL: [Role; 5] = [
        Role::Student,
        Role::Teacher,
        Role::DepartmentAdmin,
        Role::InstitutionAdmin,
        Role::SystemAdmin,
    ];

    /// Privilege tier (0 = lowest)
    #[inline]
    pub fn tier(self) -> u8 {
        self as u8
    }

    /// Highest privilege tier
    pub fn top() -> Role {
        Role::SystemAdmin
    }

    /// Number of tiers moved upward from `self` to `target` (0 for lateral or downward moves)
    pub fn tiers_to(self, target: Role) -> u8 {
        target.tier().saturating_sub(self.tier())
    }

    /// Whether the role carries administrative rights over some scope
    pub fn is_admin(self) -> bool {
        self >= Role::DepartmentAdmin
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::DepartmentAdmin => "department_admin",
            Role::InstitutionAdmin => "institution_admin",
            Role::SystemAdmin => "system_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "department_admin" => Ok(Role::DepartmentAdmin),
            "institution_admin" => Ok(Role::InstitutionAdmin),
            "system_admin" => Ok(Role::SystemAdmin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Scope of an administrative check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminScope {
    /// Whole platform
    System,
    /// One institution
    Institution,
    /// One department
    Department,
}

impl AdminScope {
    /// Lowest role that administers this scope
    pub fn minimum_role(self) -> Role {
        match self {
            AdminScope::System => Role::SystemAdmin,
            AdminScope::Institution => Role::InstitutionAdmin,
            AdminScope::Department => Role::DepartmentAdmin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Student < Role::Teacher);
        assert!(Role::InstitutionAdmin < Role::SystemAdmin);
        assert_eq!(Role::top(), Role::SystemAdmin);
        assert_eq!(Role::Student.tiers_to(Role::SystemAdmin), 4);
        assert_eq!(Role::Teacher.tiers_to(Role::Student), 0);
    }

    #[test]
    fn test_role_parse() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_uses_wire_names() {
        let json = serde_json::to_string(&Role::DepartmentAdmin).unwrap();
        assert_eq!(json, "\"department_admin\"");
    }
}
