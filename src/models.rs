use std::{fmt, str::FromStr};

use chrono::NaiveDateTime;
use diesel::{
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::{Pg, PgValue},
    prelude::*,
    serialize::{self, Output, ToSql},
    sql_types::Text,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// Declares a closed set of lowercase string values stored in a `VARCHAR` column.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, AsExpression, FromSqlRow, Serialize, Deserialize,
        )]
        #[diesel(sql_type = Text)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                raw.parse().map_err(Into::into)
            }
        }
    };
}

text_enum!(Role, "role", {
    Patient => "patient",
    Doctor => "doctor",
    Admin => "admin",
});

text_enum!(AuthProvider, "auth provider", {
    Local => "local",
    External => "external",
});

text_enum!(RequestStatus, "request status", {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub auth_provider: AuthProvider,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub auth_provider: AuthProvider,
}

#[derive(Debug, Clone, Queryable)]
pub struct Profile {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub blood_type: Option<String>,
    pub height: Option<String>,
    pub weight: Option<String>,
    pub address: Option<String>,
    pub medical_conditions: serde_json::Value,
    pub allergies: serde_json::Value,
    pub medications: serde_json::Value,
    pub unit_preference: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = profiles)]
pub struct NewProfile {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Queryable)]
pub struct DoctorDetails {
    pub email: String,
    pub specialization: Option<String>,
    pub phone: Option<String>,
    pub experience_years: Option<i32>,
    pub education: Option<String>,
    pub license_number: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = doctor_details)]
pub struct NewDoctorDetails {
    pub email: String,
    pub specialization: Option<String>,
    pub phone: Option<String>,
    pub experience_years: Option<i32>,
    pub education: Option<String>,
    pub license_number: Option<String>,
}

#[derive(Debug, Clone, Queryable)]
pub struct Report {
    pub file_id: Uuid,
    pub user_email: String,
    pub file_name: String,
    pub file_path: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub embedding_path: String,
    pub ai_summary: serde_json::Value,
    pub test_results: serde_json::Value,
    pub doctor_comment: Option<String>,
    pub comment_date: Option<NaiveDateTime>,
    pub uploaded_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = reports)]
pub struct NewReport {
    pub file_id: Uuid,
    pub user_email: String,
    pub file_name: String,
    pub file_path: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub embedding_path: String,
    pub ai_summary: serde_json::Value,
    pub test_results: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = connection_requests)]
pub struct ConnectionRequest {
    pub id: Uuid,
    pub patient_email: String,
    pub doctor_email: String,
    pub message: String,
    pub request_date: NaiveDateTime,
    pub status: RequestStatus,
    pub rejection_message: Option<String>,
    pub resolved_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = connection_requests)]
pub struct NewConnectionRequest {
    pub id: Uuid,
    pub patient_email: String,
    pub doctor_email: String,
    pub message: String,
    pub request_date: NaiveDateTime,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Queryable)]
pub struct AssignedDoctor {
    pub user_email: String,
    pub doctor_email: String,
    pub request_id: Option<Uuid>,
    pub assigned_date: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = assigned_doctors)]
pub struct NewAssignedDoctor {
    pub user_email: String,
    pub doctor_email: String,
    pub request_id: Option<Uuid>,
    pub assigned_date: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::{AuthProvider, RequestStatus, Role};

    #[test]
    fn role_round_trips_through_text() {
        for role in [Role::Patient, Role::Doctor, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn rejects_unknown_values() {
        let err = "user".parse::<Role>().unwrap_err();
        assert_eq!(err.to_string(), "unknown role 'user'");
        assert!("google".parse::<AuthProvider>().is_err());
        assert!("PENDING".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&RequestStatus::Accepted).unwrap();
        assert_eq!(json, "\"accepted\"");
        let parsed: Role = serde_json::from_str("\"doctor\"").unwrap();
        assert_eq!(parsed, Role::Doctor);
    }
}
